//! Run-aborting errors.
//!
//! Anything that only concerns one title is a [`crate::verdict::Reason`],
//! never a `HarnessError`.

use std::path::PathBuf;

use thiserror::Error;

pub type Result<T> = std::result::Result<T, HarnessError>;

#[derive(Debug, Error)]
pub enum HarnessError {
    #[error("no system catalog found; searched:\n  {}", format_paths(.searched))]
    CatalogNotFound { searched: Vec<PathBuf> },
    #[error("failed to parse {}: {source}", .path.display())]
    Catalog {
        path: PathBuf,
        #[source]
        source: format_es_systems::CatalogError,
    },
    #[error("invalid config {}: {source}", .path.display())]
    Config {
        path: PathBuf,
        #[source]
        source: ConfigError,
    },
    #[error("platform '{0}' not present in the system catalog")]
    PlatformNotFound(String),
    #[error("no titles matching {extensions:?} under {}", .dir.display())]
    NoTitles { dir: PathBuf, extensions: Vec<String> },
    #[error("launcher {} does not exist", .0.display())]
    LauncherMissing(PathBuf),
    #[error("invalid failure signature: {0}")]
    Signatures(#[from] regex::Error),
    #[error("report error: {0}")]
    Report(#[from] csv::Error),
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Problems with a config document itself.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error(transparent)]
    Toml(#[from] toml::de::Error),
    #[error("[platforms.{platform}] {key} = {value}: {source}")]
    Duration {
        platform: String,
        key: &'static str,
        value: f64,
        #[source]
        source: std::time::TryFromFloatSecsError,
    },
}

fn format_paths(paths: &[PathBuf]) -> String {
    paths
        .iter()
        .map(|p| p.display().to_string())
        .collect::<Vec<_>>()
        .join("\n  ")
}
