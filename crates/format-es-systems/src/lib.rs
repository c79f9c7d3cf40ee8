//! EmulationStation system catalog (`es_systems.cfg`) parser.
//!
//! The catalog is an XML document with one `<system>` element per platform:
//!
//! ```xml
//! <systemList>
//!   <system>
//!     <name>c64</name>
//!     <path>/storage/roms/c64</path>
//!     <extension>.d64 .D64 .zip .ZIP</extension>
//!     <emulators>
//!       <emulator name="libretro">
//!         <cores><core default="true">vice_x64</core></cores>
//!       </emulator>
//!     </emulators>
//!   </system>
//! </systemList>
//! ```
//!
//! Older catalogs use flat `<emulator>` and `<core>` text nodes instead of
//! the nested form; both are accepted.

pub mod gamelist;

pub use gamelist::Gamelist;

use roxmltree::{Document, Node};
use thiserror::Error;

/// Value used when a system names no emulator or core.
pub const DEFAULT_ID: &str = "default";

#[derive(Debug, Error)]
pub enum CatalogError {
    #[error("malformed XML: {0}")]
    Xml(#[from] roxmltree::Error),
    #[error("catalog contains no <system> entries")]
    NoSystems,
}

/// One `<system>` element, as written in the catalog.
///
/// Values are not normalized here; extension case and path resolution are
/// the consumer's business.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SystemEntry {
    pub name: String,
    pub path: String,
    pub extensions: Vec<String>,
    pub emulator: String,
    pub core: String,
}

#[derive(Debug, Clone, Default)]
pub struct SystemCatalog {
    systems: Vec<SystemEntry>,
}

impl SystemCatalog {
    pub fn parse(xml: &str) -> Result<Self, CatalogError> {
        let doc = Document::parse(xml)?;
        let systems: Vec<SystemEntry> = doc
            .root_element()
            .children()
            .filter(|n| n.has_tag_name("system"))
            .filter_map(parse_system)
            .collect();

        if systems.is_empty() {
            return Err(CatalogError::NoSystems);
        }
        Ok(Self { systems })
    }

    pub fn systems(&self) -> &[SystemEntry] {
        &self.systems
    }

    /// Exact, case-sensitive lookup by `<name>`.
    pub fn find(&self, name: &str) -> Option<&SystemEntry> {
        self.systems.iter().find(|s| s.name == name)
    }

    /// First system whose lower-cased name contains one of `keywords`.
    ///
    /// Keywords are tried in order, so earlier keywords win over later ones
    /// even if a later keyword matches a system listed first.
    pub fn find_fuzzy<S: AsRef<str>>(&self, keywords: &[S]) -> Option<&SystemEntry> {
        keywords.iter().find_map(|kw| {
            let kw = kw.as_ref().to_lowercase();
            self.systems
                .iter()
                .find(|s| s.name.to_lowercase().contains(&kw))
        })
    }
}

fn parse_system(node: Node<'_, '_>) -> Option<SystemEntry> {
    let name = child_text(node, "name")?;
    if name.is_empty() {
        return None;
    }

    let path = child_text(node, "path").unwrap_or_default();
    let extensions = child_text(node, "extension")
        .map(|raw| raw.split_whitespace().map(str::to_string).collect())
        .unwrap_or_default();

    let emulator = node
        .descendants()
        .find(|n| n.has_tag_name("emulator"))
        .and_then(|n| {
            n.attribute("name")
                .map(str::to_string)
                .or_else(|| own_text(n))
        })
        .filter(|s| !s.is_empty())
        .unwrap_or_else(|| DEFAULT_ID.to_string());

    // Nested catalogs may list several cores; the one marked default wins.
    let cores: Vec<Node<'_, '_>> = node
        .descendants()
        .filter(|n| n.has_tag_name("core"))
        .collect();
    let core = cores
        .iter()
        .find(|n| n.attribute("default") == Some("true"))
        .or_else(|| cores.first())
        .and_then(|n| own_text(*n))
        .filter(|s| !s.is_empty())
        .unwrap_or_else(|| DEFAULT_ID.to_string());

    Some(SystemEntry {
        name,
        path,
        extensions,
        emulator,
        core,
    })
}

/// Trimmed text of the first direct child named `tag`.
pub(crate) fn child_text(node: Node<'_, '_>, tag: &str) -> Option<String> {
    node.children()
        .find(|n| n.has_tag_name(tag))
        .map(|n| own_text(n).unwrap_or_default())
}

fn own_text(node: Node<'_, '_>) -> Option<String> {
    node.text().map(|t| t.trim().to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    const NESTED: &str = r#"<?xml version="1.0"?>
<systemList>
  <system>
    <name>c64</name>
    <fullname>Commodore 64</fullname>
    <path>/storage/roms/c64</path>
    <extension>.d64 .D64 .zip .ZIP</extension>
    <emulators>
      <emulator name="libretro">
        <cores>
          <core>vice_x64sc</core>
          <core default="true">vice_x64</core>
        </cores>
      </emulator>
    </emulators>
  </system>
  <system>
    <name>amiga</name>
    <path>/storage/roms/amiga</path>
    <extension>adf zip</extension>
    <emulator>libretro</emulator>
    <core>puae</core>
  </system>
  <system>
    <name></name>
    <path>/nowhere</path>
  </system>
</systemList>"#;

    #[test]
    fn parses_nested_and_flat_systems() {
        let catalog = SystemCatalog::parse(NESTED).expect("valid");
        assert_eq!(catalog.systems().len(), 2);

        let c64 = catalog.find("c64").expect("c64");
        assert_eq!(c64.path, "/storage/roms/c64");
        assert_eq!(c64.extensions, vec![".d64", ".D64", ".zip", ".ZIP"]);
        assert_eq!(c64.emulator, "libretro");
        assert_eq!(c64.core, "vice_x64");

        let amiga = catalog.find("amiga").expect("amiga");
        assert_eq!(amiga.emulator, "libretro");
        assert_eq!(amiga.core, "puae");
        assert_eq!(amiga.extensions, vec!["adf", "zip"]);
    }

    #[test]
    fn first_core_wins_without_a_default_mark() {
        let xml = "<systemList><system><name>c64</name><path>/r</path>\
                   <emulators><emulator name=\"libretro\"><cores>\
                   <core>vice_x64sc</core><core>vice_x64</core>\
                   </cores></emulator></emulators></system></systemList>";
        let catalog = SystemCatalog::parse(xml).expect("valid");
        assert_eq!(catalog.find("c64").expect("c64").core, "vice_x64sc");
    }

    #[test]
    fn missing_emulator_and_core_default() {
        let xml = "<systemList><system><name>psx</name><path>/r</path></system></systemList>";
        let catalog = SystemCatalog::parse(xml).expect("valid");
        let psx = catalog.find("psx").expect("psx");
        assert_eq!(psx.emulator, DEFAULT_ID);
        assert_eq!(psx.core, DEFAULT_ID);
        assert!(psx.extensions.is_empty());
    }

    #[test]
    fn empty_catalog_is_an_error() {
        let err = SystemCatalog::parse("<systemList/>").expect_err("no systems");
        assert!(matches!(err, CatalogError::NoSystems));
    }

    #[test]
    fn malformed_xml_is_an_error() {
        let err = SystemCatalog::parse("<systemList><system>").expect_err("malformed");
        assert!(matches!(err, CatalogError::Xml(_)));
    }

    #[test]
    fn fuzzy_lookup_respects_keyword_priority() {
        let xml = "<systemList>\
            <system><name>vice-extras</name></system>\
            <system><name>Commodore64</name></system>\
            </systemList>";
        let catalog = SystemCatalog::parse(xml).expect("valid");
        let hit = catalog
            .find_fuzzy(&["c64", "commodore64", "vice"])
            .expect("match");
        assert_eq!(hit.name, "Commodore64");
        assert!(catalog.find_fuzzy(&["nes"]).is_none());
    }
}
