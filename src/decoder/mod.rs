//! Status stream decoding
//!
//! Turns the free-form text a target emits into per-case results.

mod protocol;
mod stream;

pub use protocol::{Entity, ProtocolError, RunId, StatusLine, Verb, NANOS_PER_TICK};
pub use stream::{DecodedRun, StatusDecoder, INCOMPLETE, NOT_REPORTED};
