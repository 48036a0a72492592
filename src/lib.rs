//! devrunner - test orchestrator for virtual engines and serial-attached devices
//!
//! Runs a catalog of test cases on a bounded pool of virtual engine slots
//! and on every physical device that turns up during the run, skipping
//! cases already covered by an equivalent device.

pub mod cli;
pub mod config;
pub mod decoder;
pub mod device;
pub mod executor;
pub mod models;
pub mod output;
pub mod selection;
pub mod utils;
