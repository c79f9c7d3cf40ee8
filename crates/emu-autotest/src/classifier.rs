//! Outcome classifier.
//!
//! Turns an [`AttemptResult`] plus the log bytes written since the attempt
//! began into a [`Verdict`]. Rules, first match wins:
//!
//! 1. alive at the deadline and a clean log: PASS
//! 2. exited before the minimum-liveness threshold: FAIL `EXITED_EARLY`
//! 3. failure signature in the new log bytes: FAIL `ERROR_PATTERN`
//! 4. the log could not be read: FAIL `LOG_READ_ERROR`
//! 5. killed at a hard cap: FAIL `TIMEOUT`
//! 6. otherwise PASS

use std::fs::File;
use std::io::{self, Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};
use std::time::Duration;

use regex::bytes::{Regex, RegexBuilder};

use crate::supervisor::{AttemptResult, Terminal};
use crate::verdict::{Reason, Verdict};

/// Case-insensitive literal signatures compiled into one alternation.
#[derive(Debug, Clone)]
pub struct SignatureSet {
    regex: Option<Regex>,
}

impl SignatureSet {
    pub fn new<S: AsRef<str>>(signatures: &[S]) -> Result<Self, regex::Error> {
        let alternation = signatures
            .iter()
            .map(|s| s.as_ref())
            .filter(|s| !s.is_empty())
            .map(regex::escape)
            .collect::<Vec<_>>()
            .join("|");
        if alternation.is_empty() {
            return Ok(Self { regex: None });
        }
        let regex = RegexBuilder::new(&alternation)
            .case_insensitive(true)
            .build()?;
        Ok(Self { regex: Some(regex) })
    }

    /// Leftmost match, as it appears in `haystack`.
    pub fn find(&self, haystack: &[u8]) -> Option<String> {
        let m = self.regex.as_ref()?.find(haystack)?;
        Some(String::from_utf8_lossy(m.as_bytes()).into_owned())
    }
}

/// What the log said about one attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LogScan {
    Clean,
    Matched(String),
    ReadError(String),
}

/// Scan bytes from `offset` to the current end of `path`.
///
/// A log that does not exist yet has no new bytes. Bytes before `offset`
/// are never read, even if the file has since been truncated below it.
pub fn scan_log(path: &Path, offset: u64, signatures: &SignatureSet) -> LogScan {
    match read_from(path, offset) {
        Ok(bytes) => match signatures.find(&bytes) {
            Some(m) => LogScan::Matched(m),
            None => LogScan::Clean,
        },
        Err(e) if e.kind() == io::ErrorKind::NotFound => LogScan::Clean,
        Err(e) => LogScan::ReadError(e.to_string()),
    }
}

fn read_from(path: &Path, offset: u64) -> io::Result<Vec<u8>> {
    let mut file = File::open(path)?;
    file.seek(SeekFrom::Start(offset))?;
    let mut bytes = Vec::new();
    file.read_to_end(&mut bytes)?;
    Ok(bytes)
}

/// Apply the decision rules.
pub fn classify(result: &AttemptResult, scan: &LogScan, min_liveness: Duration) -> Verdict {
    if result.terminal == Terminal::StillAliveAtDeadline && *scan == LogScan::Clean {
        return Verdict::pass();
    }
    if matches!(result.terminal, Terminal::Completed(_)) && result.elapsed < min_liveness {
        return Verdict::fail(Reason::ExitedEarly);
    }
    match scan {
        LogScan::Matched(m) => return Verdict::fail(Reason::ErrorPattern(m.clone())),
        LogScan::ReadError(e) => return Verdict::fail(Reason::LogReadError(e.clone())),
        LogScan::Clean => {}
    }
    if result.terminal == Terminal::ForceKilled {
        return Verdict::fail(Reason::Timeout);
    }
    Verdict::pass()
}

/// Log-reading half of the classifier, bound to one platform.
#[derive(Debug, Clone)]
pub struct Classifier {
    log_path: PathBuf,
    signatures: SignatureSet,
    min_liveness: Duration,
}

impl Classifier {
    pub fn new(log_path: PathBuf, signatures: SignatureSet, min_liveness: Duration) -> Self {
        Self {
            log_path,
            signatures,
            min_liveness,
        }
    }

    pub fn classify(&self, result: &AttemptResult, log_offset: u64) -> Verdict {
        let scan = scan_log(&self.log_path, log_offset, &self.signatures);
        if let LogScan::Matched(m) = &scan {
            log::debug!("Failure signature '{m}' in {}", self.log_path.display());
        }
        classify(result, &scan, self.min_liveness)
    }
}
