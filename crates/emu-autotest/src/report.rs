//! Result recorders: CSV report, console progress, JSON summary.

use std::fs::File;
use std::io::{self, Write};
use std::path::Path;

use serde::Serialize;

use crate::error::Result;
use crate::verdict::{Status, TestRecord};

pub const DEFAULT_REPORT_FILE: &str = "test_report.csv";

/// Receives each record as soon as its title is done.
pub trait Recorder {
    fn record(&mut self, record: &TestRecord) -> Result<()>;
}

impl Recorder for Vec<TestRecord> {
    fn record(&mut self, record: &TestRecord) -> Result<()> {
        self.push(record.clone());
        Ok(())
    }
}

/// Forwards every record to each inner recorder in turn.
#[derive(Default)]
pub struct Recorders<'a> {
    inner: Vec<&'a mut dyn Recorder>,
}

impl<'a> Recorders<'a> {
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with(mut self, recorder: &'a mut dyn Recorder) -> Self {
        self.inner.push(recorder);
        self
    }
}

impl Recorder for Recorders<'_> {
    fn record(&mut self, record: &TestRecord) -> Result<()> {
        for recorder in &mut self.inner {
            recorder.record(record)?;
        }
        Ok(())
    }
}

#[derive(Serialize)]
struct CsvRow<'r> {
    title: &'r str,
    platform: &'r str,
    core: &'r str,
    emulator: &'r str,
    elapsed_s: String,
    status: Status,
    reason: String,
    attempts: u32,
    image: &'r str,
}

impl<'r> From<&'r TestRecord> for CsvRow<'r> {
    fn from(r: &'r TestRecord) -> Self {
        Self {
            title: &r.title,
            platform: &r.platform,
            core: &r.core_id,
            emulator: &r.emulator_id,
            elapsed_s: format!("{:.2}", r.elapsed_seconds),
            status: r.verdict.status,
            reason: r.verdict.reason.to_string(),
            attempts: r.attempts,
            image: r.image.as_deref().unwrap_or(""),
        }
    }
}

/// One CSV row per title, flushed as it is written.
pub struct CsvReport<W: Write> {
    writer: csv::Writer<W>,
}

impl CsvReport<File> {
    pub fn create(path: &Path) -> Result<Self> {
        Ok(Self::new(File::create(path)?))
    }
}

impl<W: Write> CsvReport<W> {
    pub fn new(out: W) -> Self {
        Self {
            writer: csv::Writer::from_writer(out),
        }
    }

    pub fn into_inner(self) -> Option<W> {
        self.writer.into_inner().ok()
    }
}

impl<W: Write> Recorder for CsvReport<W> {
    fn record(&mut self, record: &TestRecord) -> Result<()> {
        self.writer.serialize(CsvRow::from(record))?;
        self.writer.flush()?;
        Ok(())
    }
}

/// `[i/n] name ... PASS` lines.
pub struct ConsoleReport<W: Write> {
    out: W,
    total: usize,
    seen: usize,
}

impl ConsoleReport<io::Stdout> {
    pub fn stdout(total: usize) -> Self {
        Self::new(io::stdout(), total)
    }
}

impl<W: Write> ConsoleReport<W> {
    pub fn new(out: W, total: usize) -> Self {
        Self { out, total, seen: 0 }
    }

    pub fn into_inner(self) -> W {
        self.out
    }
}

impl<W: Write> Recorder for ConsoleReport<W> {
    fn record(&mut self, record: &TestRecord) -> Result<()> {
        self.seen += 1;
        write!(
            self.out,
            "[{}/{}] {} ... {}",
            self.seen, self.total, record.title, record.verdict
        )?;
        if let Some(image) = &record.image {
            write!(self.out, " via {image}")?;
        }
        writeln!(self.out)?;
        self.out.flush()?;
        Ok(())
    }
}

/// Totals for a finished run.
#[derive(Debug, Serialize)]
pub struct RunSummary<'a> {
    pub platform: &'a str,
    pub total: usize,
    pub passed: usize,
    pub failed: usize,
    pub elapsed_seconds: f64,
    pub records: &'a [TestRecord],
}

impl<'a> RunSummary<'a> {
    pub fn new(platform: &'a str, records: &'a [TestRecord]) -> Self {
        let passed = records.iter().filter(|r| r.verdict.passed()).count();
        Self {
            platform,
            total: records.len(),
            passed,
            failed: records.len() - passed,
            elapsed_seconds: records.iter().map(|r| r.elapsed_seconds).sum(),
            records,
        }
    }

    pub fn all_passed(&self) -> bool {
        self.failed == 0
    }

    pub fn write_json(&self, path: &Path) -> Result<()> {
        let file = File::create(path)?;
        serde_json::to_writer_pretty(file, self)?;
        Ok(())
    }

    /// Closing console block.
    pub fn print(&self, out: &mut impl Write) -> io::Result<()> {
        writeln!(out)?;
        writeln!(out, "Tested {} {} title(s)", self.total, self.platform)?;
        writeln!(out, "  PASS: {}", self.passed)?;
        writeln!(out, "  FAIL: {}", self.failed)?;
        writeln!(out, "  Elapsed: {:.2}s", self.elapsed_seconds)
    }
}
