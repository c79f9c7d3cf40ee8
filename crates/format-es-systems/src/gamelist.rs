//! Scraped game list (`gamelist.xml`) living next to a platform's ROMs.
//!
//! Only the `<path>` and `<name>` of each `<game>` are kept; everything else
//! a scraper writes (artwork, ratings, descriptions) is ignored.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use roxmltree::Document;

use crate::{CatalogError, child_text};

#[derive(Debug, Clone, Default)]
pub struct Gamelist {
    names: HashMap<PathBuf, String>,
    order: Vec<PathBuf>,
}

impl Gamelist {
    /// Parse a game list. Relative `<path>` values are resolved against
    /// `rom_dir` with any leading `./` removed.
    pub fn parse(xml: &str, rom_dir: &Path) -> Result<Self, CatalogError> {
        let doc = Document::parse(xml)?;
        let mut list = Self::default();

        for game in doc
            .root_element()
            .children()
            .filter(|n| n.has_tag_name("game"))
        {
            let Some(raw) = child_text(game, "path").filter(|p| !p.is_empty()) else {
                continue;
            };
            let full = if raw.starts_with('/') {
                PathBuf::from(&raw)
            } else {
                rom_dir.join(raw.trim_start_matches("./"))
            };
            let name = child_text(game, "name")
                .filter(|n| !n.is_empty())
                .or_else(|| full.file_name().map(|f| f.to_string_lossy().into_owned()))
                .unwrap_or_default();

            if list.names.insert(full.clone(), name).is_none() {
                list.order.push(full);
            }
        }

        Ok(list)
    }

    /// Scraped name for `path`, if the list has one.
    pub fn display_name(&self, path: &Path) -> Option<&str> {
        self.names.get(path).map(String::as_str)
    }

    /// Listed game paths in document order.
    pub fn paths(&self) -> &[PathBuf] {
        &self.order
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }
}
