//! Launch supervisor: spawn one emulator child and bound its run.
//!
//! The supervisor never cleans up after the child; whatever is still
//! running when it returns belongs to the [`crate::reaper::Reaper`].

use std::ffi::OsString;
use std::fs::{self, File, OpenOptions};
use std::io;
use std::path::Path;
use std::process::{Child, Command, ExitStatus, Stdio};
use std::time::{Duration, Instant};

use wait_timeout::ChildExt;

use crate::config::{LaunchStyle, PlatformProfile, RunConfig, WaitMode};
use crate::platform::PlatformConfig;

/// Everything fixed at the moment one attempt starts.
#[derive(Debug, Clone)]
pub struct LaunchAttempt {
    pub command: Vec<OsString>,
    pub start_time: Instant,
    /// Log length when the attempt started; the classifier reads from here.
    pub log_offset: u64,
    pub timeout: Duration,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Terminal {
    /// Exited before the deadline. Signal deaths are reported as 128 + signo.
    Completed(i32),
    StillAliveAtDeadline,
    ForceKilled,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AttemptResult {
    pub elapsed: Duration,
    pub terminal: Terminal,
}

impl AttemptResult {
    pub fn elapsed_seconds(&self) -> f64 {
        self.elapsed.as_secs_f64()
    }
}

/// A finished attempt. `child` may still be running.
#[derive(Debug)]
pub struct Launched {
    pub attempt: LaunchAttempt,
    pub result: AttemptResult,
    pub child: Child,
}

pub struct Supervisor<'a> {
    config: &'a RunConfig,
    profile: &'a PlatformProfile,
    controllers: String,
}

impl<'a> Supervisor<'a> {
    /// The controller string is read once here and reused for every launch.
    pub fn new(config: &'a RunConfig, profile: &'a PlatformProfile) -> Self {
        Self {
            config,
            profile,
            controllers: read_controllers(&config.controllers_file),
        }
    }

    pub fn launch(&self, platform: &PlatformConfig, content: &Path) -> io::Result<Launched> {
        let command = build_command(self.config, platform, content, &self.controllers);
        let log_offset = log_length(&self.config.log_path);
        log::debug!(
            "Launching {:?} (log offset {log_offset})",
            command.iter().map(|a| a.to_string_lossy()).collect::<Vec<_>>()
        );

        let (program, args) = command
            .split_first()
            .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidInput, "empty command"))?;
        let mut cmd = Command::new(program);
        cmd.args(args).stdin(Stdio::null());
        match self.open_log_sink() {
            Some(log) => {
                cmd.stdout(Stdio::from(log.try_clone()?))
                    .stderr(Stdio::from(log));
            }
            None => {
                cmd.stdout(Stdio::null()).stderr(Stdio::null());
            }
        }

        let start_time = Instant::now();
        let mut child = cmd.spawn()?;
        let timeout = self.profile.checkpoint;

        let terminal = match child.wait_timeout(timeout) {
            Ok(Some(status)) => Terminal::Completed(exit_code(status)),
            Ok(None) => match self.profile.wait_mode {
                WaitMode::Checkpoint => Terminal::StillAliveAtDeadline,
                WaitMode::UntilExit => {
                    log::debug!("pid {} still running at hard cap, killing", child.id());
                    force_kill(&mut child);
                    Terminal::ForceKilled
                }
            },
            Err(e) => {
                log::warn!("Wait on pid {} failed: {e}; killing", child.id());
                force_kill(&mut child);
                Terminal::ForceKilled
            }
        };

        Ok(Launched {
            attempt: LaunchAttempt {
                command,
                start_time,
                log_offset,
                timeout,
            },
            result: AttemptResult {
                elapsed: start_time.elapsed(),
                terminal,
            },
            child,
        })
    }

    fn open_log_sink(&self) -> Option<File> {
        if !self.config.capture_output {
            return None;
        }
        let path = &self.config.log_path;
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            let _ = fs::create_dir_all(parent);
        }
        match OpenOptions::new().create(true).append(true).open(path) {
            Ok(f) => Some(f),
            Err(e) => {
                log::warn!("Cannot append to {}: {e}; discarding child output", path.display());
                None
            }
        }
    }
}

/// Build the launcher argument list for `content`.
pub fn build_command(
    config: &RunConfig,
    platform: &PlatformConfig,
    content: &Path,
    controllers: &str,
) -> Vec<OsString> {
    match &config.launch_style {
        LaunchStyle::EmuElec => vec![
            config.launcher.clone().into_os_string(),
            content.as_os_str().to_os_string(),
            format!("-P{}", platform.name()).into(),
            format!("--core={}", platform.core_id()).into(),
            format!("--emulator={}", platform.emulator_id()).into(),
            format!("--controllers=\"{controllers}\"").into(),
        ],
        LaunchStyle::RetroArch {
            binary,
            core_path,
            config: retroarch_cfg,
        } => vec![
            binary.clone().into_os_string(),
            "-v".into(),
            "-L".into(),
            core_path.clone().into_os_string(),
            "--config".into(),
            retroarch_cfg.clone().into_os_string(),
            content.as_os_str().to_os_string(),
        ],
    }
}

/// Controller string from the gamepad file, quotes escaped for the
/// launcher's shell. Missing file gives an empty string.
pub fn read_controllers(path: &Path) -> String {
    match fs::read_to_string(path) {
        Ok(text) => text.trim().replace('"', "\\\""),
        Err(e) if e.kind() == io::ErrorKind::NotFound => String::new(),
        Err(e) => {
            log::warn!("Cannot read {}: {e}", path.display());
            String::new()
        }
    }
}

/// Current byte length of the log, zero if it does not exist yet.
pub fn log_length(path: &Path) -> u64 {
    fs::metadata(path).map_or(0, |m| m.len())
}

fn exit_code(status: ExitStatus) -> i32 {
    use std::os::unix::process::ExitStatusExt;
    status
        .code()
        .or_else(|| status.signal().map(|s| 128 + s))
        .unwrap_or(-1)
}

fn force_kill(child: &mut Child) {
    let _ = child.kill();
    let _ = child.wait();
}
