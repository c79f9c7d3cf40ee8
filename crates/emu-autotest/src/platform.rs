//! Typed platform configuration and title candidates.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use format_es_systems::{SystemCatalog, SystemEntry};

use crate::error::{HarnessError, Result};

/// A platform as resolved from the catalog.
///
/// Extensions are lower-case and dot-prefixed and `rom_dir` is absolute;
/// both are enforced by [`PlatformConfig::new`], the only constructor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlatformConfig {
    name: String,
    rom_dir: PathBuf,
    extensions: Vec<String>,
    emulator_id: String,
    core_id: String,
}

impl PlatformConfig {
    pub fn new<S: AsRef<str>>(
        name: &str,
        rom_dir: &Path,
        extensions: &[S],
        emulator_id: &str,
        core_id: &str,
    ) -> Result<Self> {
        let mut normalized: Vec<String> = Vec::with_capacity(extensions.len());
        for ext in extensions.iter().filter_map(|e| normalize_extension(e.as_ref())) {
            if !normalized.contains(&ext) {
                normalized.push(ext);
            }
        }

        Ok(Self {
            name: name.to_string(),
            rom_dir: resolve_dir(rom_dir)?,
            extensions: normalized,
            emulator_id: emulator_id.to_string(),
            core_id: core_id.to_string(),
        })
    }

    pub fn from_catalog(entry: &SystemEntry) -> Result<Self> {
        Self::new(
            &entry.name,
            Path::new(&entry.path),
            &entry.extensions,
            &entry.emulator,
            &entry.core,
        )
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn rom_dir(&self) -> &Path {
        &self.rom_dir
    }

    pub fn extensions(&self) -> &[String] {
        &self.extensions
    }

    pub fn emulator_id(&self) -> &str {
        &self.emulator_id
    }

    pub fn core_id(&self) -> &str {
        &self.core_id
    }

    /// Case-insensitive extension check against the configured set.
    pub fn accepts(&self, path: &Path) -> bool {
        path_extension(path).is_some_and(|ext| self.extensions.contains(&ext))
    }
}

/// Pick `requested` out of the catalog: exact name first, then `aliases`
/// as substring keywords in priority order.
pub fn resolve_platform<S: AsRef<str>>(
    catalog: &SystemCatalog,
    requested: &str,
    aliases: &[S],
) -> Result<PlatformConfig> {
    let entry = catalog
        .find(requested)
        .or_else(|| catalog.find_fuzzy(aliases))
        .ok_or_else(|| HarnessError::PlatformNotFound(requested.to_string()))?;

    if entry.name != requested {
        log::info!("Platform '{requested}' resolved to catalog system '{}'", entry.name);
    }
    PlatformConfig::from_catalog(entry)
}

/// One file under test.
#[derive(Debug, Clone)]
pub struct TitleCandidate {
    pub path: PathBuf,
    pub display_name: String,
    pub platform: Arc<PlatformConfig>,
}

impl TitleCandidate {
    pub fn new(path: PathBuf, display_name: Option<String>, platform: Arc<PlatformConfig>) -> Self {
        let display_name = display_name.unwrap_or_else(|| {
            path.file_name()
                .map_or_else(|| path.display().to_string(), |f| f.to_string_lossy().into_owned())
        });
        Self {
            path,
            display_name,
            platform,
        }
    }
}

/// `"D64"`, `".d64"` and `" .D64 "` all become `".d64"`; blanks are dropped.
pub fn normalize_extension(raw: &str) -> Option<String> {
    let trimmed = raw.trim().trim_start_matches('.');
    if trimmed.is_empty() {
        return None;
    }
    Some(format!(".{}", trimmed.to_lowercase()))
}

/// Lower-cased, dot-prefixed extension of `path`.
pub fn path_extension(path: &Path) -> Option<String> {
    path.extension()
        .and_then(|e| e.to_str())
        .and_then(normalize_extension)
}

fn resolve_dir(dir: &Path) -> Result<PathBuf> {
    let expanded = match dir.strip_prefix("~") {
        Ok(rest) => match std::env::var_os("HOME") {
            Some(home) => PathBuf::from(home).join(rest),
            None => dir.to_path_buf(),
        },
        Err(_) => dir.to_path_buf(),
    };
    Ok(std::path::absolute(expanded)?)
}
