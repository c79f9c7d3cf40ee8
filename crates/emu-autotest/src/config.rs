//! Run configuration.
//!
//! A [`RunConfig`] is assembled once, before the first title launches, and
//! is only ever borrowed afterwards. Sources in priority order:
//!
//! 1. Command-line overrides (applied by the binary through the `with_*`
//!    builders)
//! 2. Environment variables (`ES_CFG_FILE`, `RETROARCH_BIN`,
//!    `VICE_CORE_PATH`, `RETROARCH_CFG`)
//! 3. Config file (`--config`, `$EMU_AUTOTEST_CONFIG` or `./emu-autotest.toml`)
//! 4. Built-in defaults
//!
//! # Config File Format
//!
//! ```toml
//! launcher = "/usr/bin/emuelecRunEmu.sh"
//! log_path = "/tmp/logs/exec.log"
//! catalog = "/storage/.config/emulationstation/es_systems.cfg"
//!
//! # Launch RetroArch directly instead of through the EmuELEC wrapper
//! [launch]
//! style = "retro-arch"
//! binary = "retroarch"
//! core_path = "/tmp/cores/vice_x64_libretro.so"
//! config = "/storage/.config/retroarch/retroarch.cfg"
//!
//! [platforms.amiga]
//! checkpoint_secs = 90
//! signatures = ["segmentation fault", "guru meditation", "panic"]
//! ```

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;

use crate::error::{ConfigError, HarnessError, Result};
use crate::platform::normalize_extension;

pub const DEFAULT_LAUNCHER: &str = "/usr/bin/emuelecRunEmu.sh";
pub const DEFAULT_LOG_PATH: &str = "/tmp/logs/exec.log";
pub const DEFAULT_CONTROLLERS_FILE: &str = "/tmp/gamepads.cfg";
pub const LOCAL_CONFIG_FILE: &str = "emu-autotest.toml";
pub const CONFIG_ENV: &str = "EMU_AUTOTEST_CONFIG";

const DEFAULT_SIGNATURES: &[&str] = &[
    "error",
    "failed",
    "segmentation fault",
    "traceback",
    "guru meditation",
    "panic",
];

/// How the supervisor interprets a process that is still running at its deadline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum WaitMode {
    /// The deadline is a liveness checkpoint: still running means booted.
    #[default]
    Checkpoint,
    /// The launcher should exit by itself; the deadline is a hard cap.
    UntilExit,
}

/// How the launch command line is built.
#[derive(Debug, Clone, PartialEq, Eq, Default, Deserialize)]
#[serde(tag = "style", rename_all = "kebab-case")]
pub enum LaunchStyle {
    /// `<launcher> <title> -P<platform> --core=.. --emulator=.. --controllers=".."`
    #[default]
    EmuElec,
    /// `<binary> -v -L <core_path> --config <config> <title>`
    RetroArch {
        binary: PathBuf,
        core_path: PathBuf,
        config: PathBuf,
    },
}

/// Per-platform timing, failure signatures and process identification.
#[derive(Debug, Clone, PartialEq)]
pub struct PlatformProfile {
    /// Liveness checkpoint (or hard cap in [`WaitMode::UntilExit`]).
    pub checkpoint: Duration,
    /// Exits faster than this are failures regardless of exit code.
    pub min_liveness: Duration,
    /// How long the reaper waits after an interrupt before killing.
    pub grace: Duration,
    /// How long the reaper waits for the process table to go idle.
    pub settle: Duration,
    pub wait_mode: WaitMode,
    pub signatures: Vec<String>,
    pub process_fragments: Vec<String>,
    /// Archive members with these extensions are fallback candidates, in order.
    pub image_extensions: Vec<String>,
    pub archive_extensions: Vec<String>,
    /// Keywords for fuzzy catalog lookup, highest priority first.
    pub aliases: Vec<String>,
}

impl Default for PlatformProfile {
    fn default() -> Self {
        Self {
            checkpoint: Duration::from_secs(5),
            min_liveness: Duration::from_secs(3),
            grace: Duration::from_secs(5),
            settle: Duration::from_secs(10),
            wait_mode: WaitMode::Checkpoint,
            signatures: strings(DEFAULT_SIGNATURES),
            process_fragments: strings(&["retroarch"]),
            image_extensions: Vec::new(),
            archive_extensions: strings(&[".zip"]),
            aliases: Vec::new(),
        }
    }
}

impl PlatformProfile {
    /// Built-in profile for `platform`, falling back to the generic one.
    pub fn builtin(platform: &str) -> Self {
        let base = Self::default();
        match platform.to_lowercase().as_str() {
            "c64" => Self {
                process_fragments: strings(&["retroarch", "vice_x64", "x64_libretro"]),
                image_extensions: strings(&[
                    ".d64", ".t64", ".tap", ".prg", ".g64", ".crt", ".p00", ".d71", ".d81",
                ]),
                aliases: strings(&[
                    "c64",
                    "commodore64",
                    "commodore 64",
                    "commodore_64",
                    "vice",
                    "x64",
                ]),
                ..base
            },
            "amiga" => Self {
                checkpoint: Duration::from_secs(10),
                signatures: strings(&["segmentation fault", "guru meditation", "panic"]),
                process_fragments: strings(&["retroarch", "puae_libretro", "puae2021", "uae"]),
                image_extensions: strings(&[".adf", ".adz", ".dms", ".ipf"]),
                aliases: strings(&["amiga", "uae"]),
                ..base
            },
            "psx" => Self {
                checkpoint: Duration::from_secs(25),
                process_fragments: strings(&[
                    "retroarch",
                    "pcsx_rearmed",
                    "duckstation",
                    "swanstation",
                ]),
                image_extensions: strings(&[".cue", ".chd", ".pbp", ".iso"]),
                aliases: strings(&["psx", "playstation"]),
                ..base
            },
            _ => base,
        }
    }

    fn merge(
        &mut self,
        platform: &str,
        file: ProfileFile,
    ) -> std::result::Result<(), ConfigError> {
        let secs = |key: &'static str, value: Option<f64>| {
            value
                .map(|v| {
                    Duration::try_from_secs_f64(v).map_err(|source| ConfigError::Duration {
                        platform: platform.to_string(),
                        key,
                        value: v,
                        source,
                    })
                })
                .transpose()
        };
        if let Some(d) = secs("checkpoint_secs", file.checkpoint_secs)? {
            self.checkpoint = d;
        }
        if let Some(d) = secs("min_liveness_secs", file.min_liveness_secs)? {
            self.min_liveness = d;
        }
        if let Some(d) = secs("grace_secs", file.grace_secs)? {
            self.grace = d;
        }
        if let Some(d) = secs("settle_secs", file.settle_secs)? {
            self.settle = d;
        }
        if let Some(mode) = file.wait_mode {
            self.wait_mode = mode;
        }
        if let Some(sigs) = file.signatures {
            self.signatures = sigs;
        }
        if let Some(frags) = file.process_fragments {
            self.process_fragments = frags;
        }
        if let Some(exts) = file.image_extensions {
            self.image_extensions = exts.iter().filter_map(|e| normalize_extension(e)).collect();
        }
        if let Some(exts) = file.archive_extensions {
            self.archive_extensions = exts.iter().filter_map(|e| normalize_extension(e)).collect();
        }
        if let Some(aliases) = file.aliases {
            self.aliases = aliases;
        }
        Ok(())
    }
}

/// Immutable configuration for one test run.
#[derive(Debug, Clone)]
pub struct RunConfig {
    pub launcher: PathBuf,
    /// The shared log channel tailed by offset.
    pub log_path: PathBuf,
    pub controllers_file: PathBuf,
    /// Catalog locations; the first that exists is used.
    pub catalog_paths: Vec<PathBuf>,
    /// Append the child's stdout and stderr to `log_path`.
    pub capture_output: bool,
    pub launch_style: LaunchStyle,
    profiles: HashMap<String, PlatformProfile>,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            launcher: PathBuf::from(DEFAULT_LAUNCHER),
            log_path: PathBuf::from(DEFAULT_LOG_PATH),
            controllers_file: PathBuf::from(DEFAULT_CONTROLLERS_FILE),
            catalog_paths: default_catalog_paths(std::env::var_os("HOME").map(PathBuf::from)),
            capture_output: true,
            launch_style: LaunchStyle::EmuElec,
            profiles: HashMap::new(),
        }
    }
}

/// On-disk shape of the config file. Every field is optional.
#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
struct ConfigFile {
    launcher: Option<PathBuf>,
    log_path: Option<PathBuf>,
    controllers_file: Option<PathBuf>,
    catalog: Option<PathBuf>,
    capture_output: Option<bool>,
    launch: Option<LaunchStyle>,
    platforms: HashMap<String, ProfileFile>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
struct ProfileFile {
    checkpoint_secs: Option<f64>,
    min_liveness_secs: Option<f64>,
    grace_secs: Option<f64>,
    settle_secs: Option<f64>,
    wait_mode: Option<WaitMode>,
    signatures: Option<Vec<String>>,
    process_fragments: Option<Vec<String>>,
    image_extensions: Option<Vec<String>>,
    archive_extensions: Option<Vec<String>>,
    aliases: Option<Vec<String>>,
}

impl RunConfig {
    /// Load configuration from all sources except the command line.
    ///
    /// `explicit` is the `--config` path; when absent `$EMU_AUTOTEST_CONFIG`
    /// and then `./emu-autotest.toml` are tried. A missing implicit file is
    /// fine, a missing explicit one or a file that does not parse is fatal.
    pub fn load(explicit: Option<&Path>) -> Result<Self> {
        let mut config = Self::default();

        let (path, required) = match explicit {
            Some(p) => (p.to_path_buf(), true),
            None => match std::env::var_os(CONFIG_ENV) {
                Some(p) => (PathBuf::from(p), true),
                None => (PathBuf::from(LOCAL_CONFIG_FILE), false),
            },
        };

        if required || path.exists() {
            let text = std::fs::read_to_string(&path)?;
            config.merge_toml(&text).map_err(|source| HarnessError::Config {
                path: path.clone(),
                source,
            })?;
            log::info!("Loaded config from {}", path.display());
        }

        config.apply_env(|key| std::env::var(key).ok());
        Ok(config)
    }

    /// Overlay a TOML document onto this configuration.
    pub fn merge_toml(&mut self, text: &str) -> std::result::Result<(), ConfigError> {
        let file: ConfigFile = toml::from_str(text)?;

        if let Some(launcher) = file.launcher {
            self.launcher = launcher;
        }
        if let Some(log_path) = file.log_path {
            self.log_path = log_path;
        }
        if let Some(controllers) = file.controllers_file {
            self.controllers_file = controllers;
        }
        if let Some(catalog) = file.catalog {
            self.catalog_paths.insert(0, catalog);
        }
        if let Some(capture) = file.capture_output {
            self.capture_output = capture;
        }
        if let Some(style) = file.launch {
            self.launch_style = style;
        }
        for (name, overlay) in file.platforms {
            let key = name.to_lowercase();
            let mut profile = self.profile(&key);
            profile.merge(&key, overlay)?;
            self.profiles.insert(key, profile);
        }
        Ok(())
    }

    /// Apply environment overrides through `get`.
    pub fn apply_env(&mut self, get: impl Fn(&str) -> Option<String>) {
        if let Some(path) = get("ES_CFG_FILE") {
            log::info!("Using ES_CFG_FILE from environment: {path}");
            self.catalog_paths.insert(0, PathBuf::from(path));
        }
        if let LaunchStyle::RetroArch {
            binary,
            core_path,
            config,
        } = &mut self.launch_style
        {
            if let Some(v) = get("RETROARCH_BIN") {
                *binary = PathBuf::from(v);
            }
            if let Some(v) = get("VICE_CORE_PATH") {
                *core_path = PathBuf::from(v);
            }
            if let Some(v) = get("RETROARCH_CFG") {
                *config = PathBuf::from(v);
            }
        }
    }

    /// Effective profile for `platform`: file overlay, else built-in.
    pub fn profile(&self, platform: &str) -> PlatformProfile {
        let key = platform.to_lowercase();
        self.profiles
            .get(&key)
            .cloned()
            .unwrap_or_else(|| PlatformProfile::builtin(&key))
    }

    /// Replace the profile for `platform`.
    #[must_use]
    pub fn with_profile(mut self, platform: &str, profile: PlatformProfile) -> Self {
        self.profiles.insert(platform.to_lowercase(), profile);
        self
    }

    #[must_use]
    pub fn with_launcher(mut self, launcher: PathBuf) -> Self {
        self.launcher = launcher;
        self
    }

    #[must_use]
    pub fn with_log_path(mut self, log_path: PathBuf) -> Self {
        self.log_path = log_path;
        self
    }

    #[must_use]
    pub fn with_catalog(mut self, catalog: PathBuf) -> Self {
        self.catalog_paths = vec![catalog];
        self
    }

    /// The first catalog path that exists.
    pub fn locate_catalog(&self) -> Result<&Path> {
        self.catalog_paths
            .iter()
            .find(|p| p.is_file())
            .map(PathBuf::as_path)
            .ok_or_else(|| HarnessError::CatalogNotFound {
                searched: self.catalog_paths.clone(),
            })
    }
}

fn default_catalog_paths(home: Option<PathBuf>) -> Vec<PathBuf> {
    let mut paths = Vec::new();
    if let Some(home) = home {
        paths.push(home.join(".emulationstation/es_systems.cfg"));
    }
    paths.extend(
        [
            "/storage/.config/emulationstation/es_systems.cfg",
            "/emuelec/configs/emulationstation/es_systems.cfg",
            "./es_systems.cfg",
        ]
        .map(PathBuf::from),
    );
    paths
}

fn strings(items: &[&str]) -> Vec<String> {
    items.iter().map(|s| (*s).to_string()).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builtin_profiles() {
        let c64 = PlatformProfile::builtin("C64");
        assert_eq!(c64.checkpoint, Duration::from_secs(5));
        assert_eq!(c64.min_liveness, Duration::from_secs(3));
        assert!(c64.process_fragments.contains(&"vice_x64".to_string()));
        assert_eq!(c64.image_extensions.first().map(String::as_str), Some(".d64"));

        let psx = PlatformProfile::builtin("psx");
        assert_eq!(psx.checkpoint, Duration::from_secs(25));

        let unknown = PlatformProfile::builtin("vectrex");
        assert_eq!(unknown, PlatformProfile::default());
    }

    #[test]
    fn toml_overlay_merges_over_builtin() {
        let mut config = RunConfig::default();
        config
            .merge_toml(
                r#"
                launcher = "/opt/run.sh"
                log_path = "/var/log/emu.log"

                [platforms.C64]
                checkpoint_secs = 2.5
                wait_mode = "until-exit"
                image_extensions = ["D64", ".T64"]
                "#,
            )
            .expect("valid toml");

        assert_eq!(config.launcher, PathBuf::from("/opt/run.sh"));
        assert_eq!(config.log_path, PathBuf::from("/var/log/emu.log"));

        let c64 = config.profile("c64");
        assert_eq!(c64.checkpoint, Duration::from_millis(2500));
        assert_eq!(c64.wait_mode, WaitMode::UntilExit);
        assert_eq!(c64.image_extensions, vec![".d64", ".t64"]);
        // untouched fields keep the built-in values
        assert_eq!(c64.min_liveness, Duration::from_secs(3));
        assert!(c64.aliases.contains(&"commodore64".to_string()));
    }

    #[test]
    fn unrepresentable_durations_are_rejected() {
        let mut config = RunConfig::default();
        let err = config
            .merge_toml("[platforms.c64]\ncheckpoint_secs = -1\n")
            .expect_err("negative checkpoint");
        assert!(matches!(err, ConfigError::Duration { key: "checkpoint_secs", .. }));
        assert!(err.to_string().contains("[platforms.c64] checkpoint_secs = -1"));

        assert!(config.merge_toml("[platforms.psx]\nsettle_secs = nan\n").is_err());
        assert!(config.merge_toml("[platforms.psx]\ngrace_secs = 1e300\n").is_err());
        // nothing was applied from the rejected documents
        assert_eq!(config.profile("c64").checkpoint, Duration::from_secs(5));
    }

    #[test]
    fn unknown_keys_are_rejected() {
        let mut config = RunConfig::default();
        assert!(config.merge_toml("lanucher = \"/typo\"").is_err());
    }

    #[test]
    fn retroarch_style_takes_env_overrides() {
        let mut config = RunConfig::default();
        config
            .merge_toml(
                r#"
                [launch]
                style = "retro-arch"
                binary = "retroarch"
                core_path = "/tmp/cores/vice_x64_libretro.so"
                config = "/storage/.config/retroarch/retroarch.cfg"
                "#,
            )
            .expect("valid toml");

        config.apply_env(|key| match key {
            "VICE_CORE_PATH" => Some("/cores/x64sc.so".to_string()),
            "ES_CFG_FILE" => Some("/custom/es_systems.cfg".to_string()),
            _ => None,
        });

        assert_eq!(
            config.launch_style,
            LaunchStyle::RetroArch {
                binary: PathBuf::from("retroarch"),
                core_path: PathBuf::from("/cores/x64sc.so"),
                config: PathBuf::from("/storage/.config/retroarch/retroarch.cfg"),
            }
        );
        assert_eq!(config.catalog_paths[0], PathBuf::from("/custom/es_systems.cfg"));
    }

    #[test]
    fn catalog_search_order() {
        let paths = default_catalog_paths(Some(PathBuf::from("/home/pi")));
        assert_eq!(paths[0], PathBuf::from("/home/pi/.emulationstation/es_systems.cfg"));
        assert_eq!(paths.last(), Some(&PathBuf::from("./es_systems.cfg")));
    }

    #[test]
    fn missing_catalog_lists_searched_paths() {
        let config = RunConfig::default().with_catalog(PathBuf::from("/definitely/not/here.cfg"));
        let err = config.locate_catalog().expect_err("missing");
        assert!(err.to_string().contains("/definitely/not/here.cfg"));
    }
}
