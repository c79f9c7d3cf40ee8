//! Verdicts and the per-title record handed to the recorder.

use std::fmt;

use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Status {
    Pass,
    Fail,
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Pass => f.write_str("PASS"),
            Self::Fail => f.write_str("FAIL"),
        }
    }
}

/// Why a title got its verdict.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", content = "detail", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Reason {
    None,
    /// Still running at a hard cap and had to be killed.
    Timeout,
    /// A failure signature appeared in the new log bytes; holds the matched text.
    ErrorPattern(String),
    /// Exited before the minimum-liveness threshold, whatever the exit code.
    ExitedEarly,
    LogReadError(String),
    /// The launcher itself could not be spawned.
    LaunchError(String),
    ArchiveNoImage,
    ArchiveExhausted,
}

impl fmt::Display for Reason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::None => f.write_str("NONE"),
            Self::Timeout => f.write_str("TIMEOUT"),
            Self::ErrorPattern(m) => write!(f, "ERROR_PATTERN({m})"),
            Self::ExitedEarly => f.write_str("EXITED_EARLY"),
            Self::LogReadError(e) => write!(f, "LOG_READ_ERROR({e})"),
            Self::LaunchError(e) => write!(f, "LAUNCH_ERROR({e})"),
            Self::ArchiveNoImage => f.write_str("ARCHIVE_NO_IMAGE"),
            Self::ArchiveExhausted => f.write_str("ARCHIVE_EXHAUSTED"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Verdict {
    pub status: Status,
    pub reason: Reason,
}

impl Verdict {
    pub fn pass() -> Self {
        Self {
            status: Status::Pass,
            reason: Reason::None,
        }
    }

    pub fn fail(reason: Reason) -> Self {
        Self {
            status: Status::Fail,
            reason,
        }
    }

    pub fn passed(&self) -> bool {
        self.status == Status::Pass
    }
}

impl fmt::Display for Verdict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.reason {
            Reason::None => write!(f, "{}", self.status),
            ref reason => write!(f, "{} ({reason})", self.status),
        }
    }
}

/// One row per title, however many archive sub-attempts it took.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TestRecord {
    pub platform: String,
    pub title: String,
    pub path: String,
    pub core_id: String,
    pub emulator_id: String,
    pub elapsed_seconds: f64,
    pub verdict: Verdict,
    /// Launches made for this title, direct attempt included.
    pub attempts: u32,
    /// Archive member that passed, when the fallback found one.
    pub image: Option<String>,
}
