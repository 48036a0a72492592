//! Status line grammar
//!
//! Targets report progress as one event per line:
//!
//! ```text
//! <runId>:<entityKind><classIndex>[T<methodIndex>][D<dataRowIndex>]:<elapsedTicks>:<verb>[:<detail>]
//! ```
//!
//! `entityKind` is `C` for a group, `M` for a plain method and `D` for a
//! data-row method. Elapsed time is counted in 100 ns ticks. The detail may
//! itself contain `:`.

use std::fmt;
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;

/// Nanoseconds per elapsed tick
pub const NANOS_PER_TICK: u64 = 100;

/// Malformed status line
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    #[error("missing field: {0}")]
    MissingField(&'static str),

    #[error("unknown entity: {0}")]
    UnknownEntity(String),

    #[error("invalid elapsed ticks: {0}")]
    InvalidTicks(String),

    #[error("unknown verb: {0}")]
    UnknownVerb(String),
}

/// Per-run correlation token
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct RunId(String);

impl RunId {
    pub fn random() -> Self {
        Self(format!("{:08x}", rand::random::<u32>()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for RunId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl fmt::Display for RunId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// What a status line refers to
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Entity {
    Group {
        class: usize,
    },
    Method {
        class: usize,
        method: usize,
        data_row: Option<usize>,
    },
}

impl Entity {
    pub fn class(&self) -> usize {
        match self {
            Entity::Group { class } | Entity::Method { class, .. } => *class,
        }
    }
}

impl FromStr for Entity {
    type Err = ProtocolError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let unknown = || ProtocolError::UnknownEntity(s.to_string());
        let mut chars = s.chars();
        let kind = chars.next().ok_or_else(unknown)?;
        let rest = chars.as_str();

        match kind {
            'C' => {
                let class = rest.parse().map_err(|_| unknown())?;
                Ok(Entity::Group { class })
            }
            'M' => {
                let (class, method) = rest.split_once('T').ok_or_else(unknown)?;
                Ok(Entity::Method {
                    class: class.parse().map_err(|_| unknown())?,
                    method: method.parse().map_err(|_| unknown())?,
                    data_row: None,
                })
            }
            'D' => {
                let (class, rest) = rest.split_once('T').ok_or_else(unknown)?;
                let (method, row) = rest.split_once('D').ok_or_else(unknown)?;
                Ok(Entity::Method {
                    class: class.parse().map_err(|_| unknown())?,
                    method: method.parse().map_err(|_| unknown())?,
                    data_row: Some(row.parse().map_err(|_| unknown())?),
                })
            }
            _ => Err(unknown()),
        }
    }
}

impl fmt::Display for Entity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Entity::Group { class } => write!(f, "C{class}"),
            Entity::Method {
                class,
                method,
                data_row: None,
            } => write!(f, "M{class}T{method}"),
            Entity::Method {
                class,
                method,
                data_row: Some(row),
            } => write!(f, "D{class}T{method}D{row}"),
        }
    }
}

/// Lifecycle event reported by a target
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Verb {
    /// Group start on `C`, method start on `M`/`D`
    Start,
    Instantiate,
    Setup,
    SetupComplete,
    SetupFailed,
    Skipped,
    Pass,
    Fail,
    TestsComplete,
    Cleanup,
    Dispose,
    CleanupFailed,
    Done,
    AllDone,
}

impl Verb {
    pub fn token(&self) -> &'static str {
        match self {
            Verb::Start => "start",
            Verb::Instantiate => "instantiate",
            Verb::Setup => "setup",
            Verb::SetupComplete => "setup-complete",
            Verb::SetupFailed => "setup-failed",
            Verb::Skipped => "skipped",
            Verb::Pass => "pass",
            Verb::Fail => "fail",
            Verb::TestsComplete => "tests-complete",
            Verb::Cleanup => "cleanup",
            Verb::Dispose => "dispose",
            Verb::CleanupFailed => "cleanup-failed",
            Verb::Done => "done",
            Verb::AllDone => "all-done",
        }
    }
}

impl FromStr for Verb {
    type Err = ProtocolError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s {
            "start" => Verb::Start,
            "instantiate" => Verb::Instantiate,
            "setup" => Verb::Setup,
            "setup-complete" => Verb::SetupComplete,
            "setup-failed" => Verb::SetupFailed,
            "skipped" => Verb::Skipped,
            "pass" => Verb::Pass,
            "fail" => Verb::Fail,
            "tests-complete" => Verb::TestsComplete,
            "cleanup" => Verb::Cleanup,
            "dispose" => Verb::Dispose,
            "cleanup-failed" => Verb::CleanupFailed,
            "done" => Verb::Done,
            "all-done" => Verb::AllDone,
            other => return Err(ProtocolError::UnknownVerb(other.to_string())),
        })
    }
}

impl fmt::Display for Verb {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.token())
    }
}

/// One decoded status line
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StatusLine {
    pub run_id: String,
    pub entity: Entity,
    pub elapsed_ticks: u64,
    pub verb: Verb,
    pub detail: Option<String>,
}

impl StatusLine {
    pub fn new(run_id: &RunId, entity: Entity, verb: Verb) -> Self {
        Self {
            run_id: run_id.to_string(),
            entity,
            elapsed_ticks: 0,
            verb,
            detail: None,
        }
    }

    pub fn elapsed(mut self, ticks: u64) -> Self {
        self.elapsed_ticks = ticks;
        self
    }

    pub fn detail(mut self, detail: impl Into<String>) -> Self {
        self.detail = Some(detail.into());
        self
    }

    pub fn duration(&self) -> Duration {
        Duration::from_nanos(self.elapsed_ticks.saturating_mul(NANOS_PER_TICK))
    }
}

impl FromStr for StatusLine {
    type Err = ProtocolError;

    fn from_str(line: &str) -> Result<Self, Self::Err> {
        let mut fields = line.trim_end_matches(['\r', '\n']).splitn(5, ':');

        let run_id = fields.next().ok_or(ProtocolError::MissingField("run id"))?;
        if run_id.is_empty() {
            return Err(ProtocolError::MissingField("run id"));
        }
        let entity = fields
            .next()
            .ok_or(ProtocolError::MissingField("entity"))?
            .parse()?;
        let ticks = fields
            .next()
            .ok_or(ProtocolError::MissingField("elapsed ticks"))?;
        let elapsed_ticks = ticks
            .parse()
            .map_err(|_| ProtocolError::InvalidTicks(ticks.to_string()))?;
        let verb = fields
            .next()
            .ok_or(ProtocolError::MissingField("verb"))?
            .parse()?;
        let detail = fields.next().map(str::to_string);

        Ok(Self {
            run_id: run_id.to_string(),
            entity,
            elapsed_ticks,
            verb,
            detail,
        })
    }
}

impl fmt::Display for StatusLine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}:{}:{}:{}",
            self.run_id, self.entity, self.elapsed_ticks, self.verb
        )?;
        if let Some(detail) = &self.detail {
            write!(f, ":{detail}")?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_group_line() {
        let line: StatusLine = "ab12cd34:C3:0:start".parse().unwrap();
        assert_eq!(line.run_id, "ab12cd34");
        assert_eq!(line.entity, Entity::Group { class: 3 });
        assert_eq!(line.verb, Verb::Start);
        assert_eq!(line.detail, None);
    }

    #[test]
    fn test_parse_data_row_line_with_detail() {
        let line: StatusLine = "r1:D0T2D5:15000:fail:expected 1: got 2\r\n".parse().unwrap();
        assert_eq!(
            line.entity,
            Entity::Method {
                class: 0,
                method: 2,
                data_row: Some(5)
            }
        );
        assert_eq!(line.verb, Verb::Fail);
        assert_eq!(line.detail.as_deref(), Some("expected 1: got 2"));
        assert_eq!(line.duration(), Duration::from_micros(1500));
    }

    #[test]
    fn test_parse_rejects_free_text() {
        assert!("Hello from the device".parse::<StatusLine>().is_err());
        assert!("x:Q1:0:start".parse::<StatusLine>().is_err());
        assert!("x:M1:0:start".parse::<StatusLine>().is_err());
        assert!("x:C1:abc:start".parse::<StatusLine>().is_err());
        assert_eq!(
            "x:C1:0:explode".parse::<StatusLine>(),
            Err(ProtocolError::UnknownVerb("explode".to_string()))
        );
    }

    #[test]
    fn test_display_matches_grammar() {
        let run_id = RunId::from("00ff00ff");
        let line = StatusLine::new(
            &run_id,
            Entity::Method {
                class: 1,
                method: 0,
                data_row: None,
            },
            Verb::SetupFailed,
        )
        .elapsed(42)
        .detail("boom");
        assert_eq!(line.to_string(), "00ff00ff:M1T0:42:setup-failed:boom");
    }

    #[test]
    fn test_random_run_id_is_hex() {
        let id = RunId::random();
        assert_eq!(id.as_str().len(), 8);
        assert!(id.as_str().chars().all(|c| c.is_ascii_hexdigit()));
    }
}
