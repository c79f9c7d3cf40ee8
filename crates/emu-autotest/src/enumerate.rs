//! Title enumeration.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use format_es_systems::Gamelist;
use glob::Pattern;
use rand::seq::SliceRandom;

use crate::platform::{PlatformConfig, TitleCandidate};

pub const GAMELIST_FILE: &str = "gamelist.xml";

/// Every regular file under `rom_dir` whose extension the platform accepts,
/// in sorted path order. A missing directory yields nothing.
pub fn enumerate_titles(platform: &PlatformConfig) -> Vec<PathBuf> {
    let dir = platform.rom_dir();
    if !dir.is_dir() {
        log::debug!("{} is not a directory", dir.display());
        return Vec::new();
    }

    let pattern = format!("{}/**/*", Pattern::escape(&dir.to_string_lossy()));
    let paths = match glob::glob(&pattern) {
        Ok(paths) => paths,
        Err(e) => {
            log::warn!("Bad walk pattern {pattern}: {e}");
            return Vec::new();
        }
    };

    let mut titles: Vec<PathBuf> = paths
        .filter_map(|entry| match entry {
            Ok(path) => Some(path),
            Err(e) => {
                log::debug!("Skipping unreadable entry: {e}");
                None
            }
        })
        .filter(|path| path.is_file() && platform.accepts(path))
        .collect();
    titles.sort();
    titles
}

/// Enumerate and attach display names from the directory's `gamelist.xml`.
pub fn discover(platform: &Arc<PlatformConfig>) -> Vec<TitleCandidate> {
    let names = load_gamelist(platform.rom_dir());
    enumerate_titles(platform)
        .into_iter()
        .map(|path| {
            let name = names.display_name(&path).map(str::to_string);
            TitleCandidate::new(path, name, Arc::clone(platform))
        })
        .collect()
}

/// Candidates for explicitly named files, skipping enumeration.
pub fn from_paths(paths: &[PathBuf], platform: &Arc<PlatformConfig>) -> Vec<TitleCandidate> {
    let names = load_gamelist(platform.rom_dir());
    paths
        .iter()
        .map(|p| {
            let path = std::path::absolute(p).unwrap_or_else(|_| p.clone());
            let name = names.display_name(&path).map(str::to_string);
            TitleCandidate::new(path, name, Arc::clone(platform))
        })
        .collect()
}

/// Keep the first `limit` titles, or a random `limit` of them.
pub fn sample(mut titles: Vec<TitleCandidate>, limit: Option<usize>, random: bool) -> Vec<TitleCandidate> {
    let Some(limit) = limit else {
        return titles;
    };
    if random {
        titles.shuffle(&mut rand::rng());
    }
    titles.truncate(limit);
    titles
}

fn load_gamelist(rom_dir: &Path) -> Gamelist {
    let path = rom_dir.join(GAMELIST_FILE);
    let Ok(text) = fs::read_to_string(&path) else {
        return Gamelist::default();
    };
    match Gamelist::parse(&text, rom_dir) {
        Ok(list) => list,
        Err(e) => {
            log::warn!("{} unreadable ({e}); using file names", path.display());
            Gamelist::default()
        }
    }
}
