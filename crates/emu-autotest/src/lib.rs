//! Launch, monitor, classify and retry emulator titles on an EmuELEC box.
//!
//! For each title the harness launches the emulator, treats a process still
//! running at the platform's checkpoint as a successful boot, checks the
//! fresh part of the shared log for failure signatures and, for archives
//! that fail whole, retries every image inside them in order. A reaper makes
//! sure nothing emulator-shaped is left running before the next title.

pub mod archive;
pub mod classifier;
pub mod config;
pub mod enumerate;
pub mod error;
pub mod harness;
pub mod platform;
pub mod reaper;
pub mod registry;
pub mod report;
pub mod supervisor;
pub mod verdict;

pub use config::{LaunchStyle, PlatformProfile, RunConfig, WaitMode};
pub use error::{ConfigError, HarnessError, Result};
pub use harness::{AttemptOutcome, AttemptRunner, EmulatorRunner, Harness, run_title};
pub use platform::{PlatformConfig, TitleCandidate, resolve_platform};
pub use report::{ConsoleReport, CsvReport, Recorder, Recorders, RunSummary};
pub use verdict::{Reason, Status, TestRecord, Verdict};
