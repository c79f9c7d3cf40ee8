//! Per-title state machine and the sequential run loop.
//!
//! ```text
//! Init -> AttemptDirect -> Done                     (pass, or not an archive)
//!                       -> Extract -> Done          (ARCHIVE_NO_IMAGE)
//!                                  -> Candidate* -> Done       (first pass)
//!                                                -> Exhausted -> Done
//! ```

use std::path::Path;
use std::time::Duration;

use crate::archive::{CandidateQueue, extract_images, is_archive};
use crate::classifier::{Classifier, SignatureSet};
use crate::config::{PlatformProfile, RunConfig};
use crate::error::Result;
use crate::platform::TitleCandidate;
use crate::reaper::Reaper;
use crate::registry::{CmdlineMatcher, ProcFs};
use crate::report::Recorder;
use crate::supervisor::Supervisor;
use crate::verdict::{Reason, TestRecord, Verdict};

/// Verdict and wall-clock time of one launch.
#[derive(Debug, Clone, PartialEq)]
pub struct AttemptOutcome {
    pub verdict: Verdict,
    pub elapsed: Duration,
}

/// One launch-classify-reap cycle against a single file.
pub trait AttemptRunner {
    /// `content` is the title itself or an image extracted from it.
    fn attempt(&mut self, title: &TitleCandidate, content: &Path) -> AttemptOutcome;
}

/// The real runner: supervisor, then classifier, then reaper.
pub struct EmulatorRunner<'a> {
    supervisor: Supervisor<'a>,
    classifier: Classifier,
    profile: &'a PlatformProfile,
    table: ProcFs,
    matcher: CmdlineMatcher,
}

impl<'a> EmulatorRunner<'a> {
    pub fn new(config: &'a RunConfig, profile: &'a PlatformProfile) -> Result<Self> {
        let signatures = SignatureSet::new(&profile.signatures)?;
        Ok(Self {
            supervisor: Supervisor::new(config, profile),
            classifier: Classifier::new(config.log_path.clone(), signatures, profile.min_liveness),
            profile,
            table: ProcFs::new(),
            matcher: CmdlineMatcher::new(&profile.process_fragments),
        })
    }

    fn reaper(&self) -> Reaper<'_> {
        Reaper::new(
            &self.table,
            &self.matcher,
            self.profile.grace,
            self.profile.settle,
        )
    }
}

impl AttemptRunner for EmulatorRunner<'_> {
    fn attempt(&mut self, title: &TitleCandidate, content: &Path) -> AttemptOutcome {
        match self.supervisor.launch(&title.platform, content) {
            Ok(mut launched) => {
                let verdict = self
                    .classifier
                    .classify(&launched.result, launched.attempt.log_offset);
                log::info!(
                    "{}: {:?} after {:.2}s -> {verdict}",
                    content.display(),
                    launched.result.terminal,
                    launched.result.elapsed_seconds()
                );
                let report = self.reaper().reap(Some(&mut launched.child));
                if !report.swept.is_empty() {
                    log::debug!("Swept {} straggler(s) {:?}", report.swept.len(), report.swept);
                }
                AttemptOutcome {
                    verdict,
                    elapsed: launched.result.elapsed,
                }
            }
            Err(e) => {
                log::warn!("Could not launch {}: {e}", content.display());
                self.reaper().reap(None);
                AttemptOutcome {
                    verdict: Verdict::fail(Reason::LaunchError(e.to_string())),
                    elapsed: Duration::ZERO,
                }
            }
        }
    }
}

#[derive(Debug)]
enum TitleState {
    Init,
    AttemptDirect,
    Extract,
    Candidate(CandidateQueue),
    Exhausted,
    Done(Verdict),
}

/// Bookkeeping for one title while it moves through [`TitleState`].
struct TitleRun<'t> {
    title: &'t TitleCandidate,
    profile: &'t PlatformProfile,
    attempts: u32,
    elapsed: Duration,
    image: Option<String>,
}

impl<'t> TitleRun<'t> {
    fn new(title: &'t TitleCandidate, profile: &'t PlatformProfile) -> Self {
        Self {
            title,
            profile,
            attempts: 0,
            elapsed: Duration::ZERO,
            image: None,
        }
    }

    fn run(mut self, runner: &mut dyn AttemptRunner) -> TestRecord {
        let mut state = TitleState::Init;
        let verdict = loop {
            state = match self.step(state, runner) {
                TitleState::Done(verdict) => break verdict,
                next => next,
            };
        };
        self.into_record(verdict)
    }

    fn step(&mut self, state: TitleState, runner: &mut dyn AttemptRunner) -> TitleState {
        match state {
            TitleState::Init => TitleState::AttemptDirect,
            TitleState::AttemptDirect => {
                let title = self.title;
                let verdict = self.launch(runner, &title.path);
                if verdict.passed()
                    || matches!(verdict.reason, Reason::LaunchError(_))
                    || !is_archive(&title.path, &self.profile.archive_extensions)
                {
                    TitleState::Done(verdict)
                } else {
                    log::info!("{} failed whole ({verdict}); trying its images", title.display_name);
                    TitleState::Extract
                }
            }
            TitleState::Extract => {
                let extracted = extract_images(&self.title.path, &self.profile.image_extensions);
                if extracted.is_empty() {
                    TitleState::Done(Verdict::fail(Reason::ArchiveNoImage))
                } else {
                    log::debug!("{} candidate image(s) extracted", extracted.images().len());
                    // The queue owns the scratch dir until this title is done.
                    TitleState::Candidate(CandidateQueue::new(extracted))
                }
            }
            TitleState::Candidate(mut queue) => match queue.next_candidate() {
                Some(image) => {
                    let verdict = self.launch(runner, &image);
                    if verdict.passed() {
                        self.image = image.file_name().map(|n| n.to_string_lossy().into_owned());
                        TitleState::Done(verdict)
                    } else {
                        TitleState::Candidate(queue)
                    }
                }
                None => TitleState::Exhausted,
            },
            TitleState::Exhausted => TitleState::Done(Verdict::fail(Reason::ArchiveExhausted)),
            done @ TitleState::Done(_) => done,
        }
    }

    fn launch(&mut self, runner: &mut dyn AttemptRunner, content: &Path) -> Verdict {
        let outcome = runner.attempt(self.title, content);
        self.attempts += 1;
        self.elapsed += outcome.elapsed;
        outcome.verdict
    }

    fn into_record(self, verdict: Verdict) -> TestRecord {
        let platform = &self.title.platform;
        TestRecord {
            platform: platform.name().to_string(),
            title: self.title.display_name.clone(),
            path: self.title.path.display().to_string(),
            core_id: platform.core_id().to_string(),
            emulator_id: platform.emulator_id().to_string(),
            elapsed_seconds: self.elapsed.as_secs_f64(),
            verdict,
            attempts: self.attempts,
            image: self.image,
        }
    }
}

/// Test one title from start to verdict.
pub fn run_title(
    runner: &mut dyn AttemptRunner,
    title: &TitleCandidate,
    profile: &PlatformProfile,
) -> TestRecord {
    TitleRun::new(title, profile).run(runner)
}

/// Runs titles one at a time, streaming each record to a recorder.
pub struct Harness<'a, R> {
    runner: R,
    profile: &'a PlatformProfile,
}

impl<'a, R: AttemptRunner> Harness<'a, R> {
    pub fn new(runner: R, profile: &'a PlatformProfile) -> Self {
        Self { runner, profile }
    }

    pub fn run(
        &mut self,
        titles: &[TitleCandidate],
        recorder: &mut dyn Recorder,
    ) -> Result<Vec<TestRecord>> {
        let mut records = Vec::with_capacity(titles.len());
        for title in titles {
            log::debug!("Testing {}", title.path.display());
            let record = run_title(&mut self.runner, title, self.profile);
            recorder.record(&record)?;
            records.push(record);
        }
        Ok(records)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::platform::PlatformConfig;
    use std::collections::HashMap;
    use std::fs::{self, File};
    use std::io::Write;
    use std::path::PathBuf;
    use std::sync::Arc;
    use zip::write::SimpleFileOptions;

    /// Verdicts keyed by file name; anything unlisted exits early.
    #[derive(Default)]
    struct ScriptedRunner {
        verdicts: HashMap<String, Verdict>,
        calls: Vec<String>,
    }

    impl ScriptedRunner {
        fn passing(names: &[&str]) -> Self {
            Self {
                verdicts: names.iter().map(|n| ((*n).to_string(), Verdict::pass())).collect(),
                calls: Vec::new(),
            }
        }
    }

    impl AttemptRunner for ScriptedRunner {
        fn attempt(&mut self, _title: &TitleCandidate, content: &Path) -> AttemptOutcome {
            let name = content
                .file_name()
                .expect("file name")
                .to_string_lossy()
                .into_owned();
            let verdict = self
                .verdicts
                .get(&name)
                .cloned()
                .unwrap_or_else(|| Verdict::fail(Reason::ExitedEarly));
            self.calls.push(name);
            AttemptOutcome {
                verdict,
                elapsed: Duration::from_millis(1500),
            }
        }
    }

    fn write_zip(path: &Path, members: &[&str]) {
        let mut zip = zip::ZipWriter::new(File::create(path).expect("create"));
        for name in members {
            zip.start_file(*name, SimpleFileOptions::default()).expect("start");
            zip.write_all(name.as_bytes()).expect("write");
        }
        zip.finish().expect("finish");
    }

    struct Fixture {
        dir: tempfile::TempDir,
        platform: Arc<PlatformConfig>,
        profile: PlatformProfile,
    }

    impl Fixture {
        fn new() -> Self {
            let dir = tempfile::tempdir().expect("tempdir");
            let platform = Arc::new(
                PlatformConfig::new("c64", dir.path(), &[".d64", ".zip"], "libretro", "vice_x64")
                    .expect("valid"),
            );
            Self {
                dir,
                platform,
                profile: PlatformProfile::builtin("c64"),
            }
        }

        fn title(&self, name: &str) -> TitleCandidate {
            TitleCandidate::new(self.dir.path().join(name), None, Arc::clone(&self.platform))
        }

        fn archive(&self, name: &str, members: &[&str]) -> TitleCandidate {
            write_zip(&self.dir.path().join(name), members);
            self.title(name)
        }
    }

    #[test]
    fn direct_pass_needs_one_attempt() {
        let fx = Fixture::new();
        let mut runner = ScriptedRunner::passing(&["game.zip"]);
        let record = run_title(&mut runner, &fx.archive("game.zip", &["a.d64"]), &fx.profile);
        assert_eq!(record.verdict, Verdict::pass());
        assert_eq!(record.attempts, 1);
        assert_eq!(record.image, None);
        assert_eq!(runner.calls, vec!["game.zip"]);
    }

    #[test]
    fn stops_at_first_passing_candidate() {
        let fx = Fixture::new();
        let title = fx.archive("game.zip", &["one.d64", "two.d64", "three.d64"]);
        let mut runner = ScriptedRunner::passing(&["two.d64"]);
        let record = run_title(&mut runner, &title, &fx.profile);

        assert_eq!(record.verdict, Verdict::pass());
        assert_eq!(runner.calls, vec!["game.zip", "one.d64", "two.d64"]);
        assert_eq!(record.attempts, 3);
        assert_eq!(record.image.as_deref(), Some("two.d64"));
        assert!((record.elapsed_seconds - 4.5).abs() < 1e-9);
    }

    #[test]
    fn every_candidate_once_then_exhausted() {
        let fx = Fixture::new();
        let title = fx.archive("game.zip", &["one.d64", "two.t64", "readme.txt", "three.PRG"]);
        let mut runner = ScriptedRunner::default();
        let record = run_title(&mut runner, &title, &fx.profile);

        assert_eq!(record.verdict, Verdict::fail(Reason::ArchiveExhausted));
        assert_eq!(runner.calls, vec!["game.zip", "one.d64", "two.t64", "three.PRG"]);
    }

    #[test]
    fn archive_without_images_is_never_retried() {
        let fx = Fixture::new();
        let title = fx.archive("docs.zip", &["readme.txt", "cover.png"]);
        let mut runner = ScriptedRunner::default();
        let record = run_title(&mut runner, &title, &fx.profile);

        assert_eq!(record.verdict, Verdict::fail(Reason::ArchiveNoImage));
        assert_eq!(runner.calls, vec!["docs.zip"]);
    }

    #[test]
    fn corrupt_archive_counts_as_no_image() {
        let fx = Fixture::new();
        fs::write(fx.dir.path().join("bad.zip"), b"not a zip").expect("write");
        let mut runner = ScriptedRunner::default();
        let record = run_title(&mut runner, &fx.title("bad.zip"), &fx.profile);
        assert_eq!(record.verdict, Verdict::fail(Reason::ArchiveNoImage));
    }

    #[test]
    fn plain_image_failure_is_final() {
        let fx = Fixture::new();
        fs::write(fx.dir.path().join("game.d64"), b"x").expect("write");
        let mut runner = ScriptedRunner::default();
        let record = run_title(&mut runner, &fx.title("game.d64"), &fx.profile);

        assert_eq!(record.verdict, Verdict::fail(Reason::ExitedEarly));
        assert_eq!(record.attempts, 1);
        assert_eq!(record.platform, "c64");
        assert_eq!(record.core_id, "vice_x64");
        assert_eq!(record.emulator_id, "libretro");
    }

    #[test]
    fn launch_error_skips_fallback() {
        let fx = Fixture::new();
        let title = fx.archive("game.zip", &["a.d64"]);
        let mut runner = ScriptedRunner::default();
        runner.verdicts.insert(
            "game.zip".into(),
            Verdict::fail(Reason::LaunchError("No such file or directory".into())),
        );
        let record = run_title(&mut runner, &title, &fx.profile);
        assert!(matches!(record.verdict.reason, Reason::LaunchError(_)));
        assert_eq!(runner.calls, vec!["game.zip"]);
    }

    #[test]
    fn reruns_are_identical() {
        let fx = Fixture::new();
        let titles = vec![
            fx.archive("a.zip", &["x.d64", "y.d64"]),
            fx.archive("b.zip", &["z.txt"]),
            fx.title("c.d64"),
        ];
        let run = || {
            let runner = ScriptedRunner::passing(&["y.d64", "c.d64"]);
            let mut sink: Vec<TestRecord> = Vec::new();
            let records = Harness::new(runner, &fx.profile)
                .run(&titles, &mut sink)
                .expect("run");
            assert_eq!(records, sink);
            records
        };

        let first = run();
        assert_eq!(first.len(), 3);
        assert_eq!(first, run());
        let statuses: Vec<String> = first.iter().map(|r| r.verdict.to_string()).collect();
        assert_eq!(statuses, vec!["PASS", "FAIL (ARCHIVE_NO_IMAGE)", "PASS"]);
    }

    #[test]
    fn spawn_failure_becomes_launch_error() {
        let fx = Fixture::new();
        let config = RunConfig::default()
            .with_launcher(PathBuf::from("/nonexistent/emuelecRunEmu.sh"))
            .with_log_path(fx.dir.path().join("exec.log"));
        let profile = PlatformProfile {
            settle: Duration::ZERO,
            process_fragments: vec![fx.dir.path().display().to_string()],
            ..PlatformProfile::builtin("c64")
        };
        let runner = EmulatorRunner::new(&config, &profile).expect("runner");
        let mut sink: Vec<TestRecord> = Vec::new();
        let records = Harness::new(runner, &profile)
            .run(&[fx.title("game.d64")], &mut sink)
            .expect("run");
        assert!(matches!(records[0].verdict.reason, Reason::LaunchError(_)));
    }
}
