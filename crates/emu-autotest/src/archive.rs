//! Archive fallback: pull recognized images out of a title's archive so
//! each can be launched on its own.
//!
//! Some archives exit the emulator within a couple of seconds when handed
//! over whole, typically because they hold several images or keep the
//! image in a subdirectory. Extracting and trying each image in archive
//! order recovers most of them.

use std::fs::{self, File};
use std::io;
use std::path::{Path, PathBuf};

use tempfile::TempDir;
use zip::ZipArchive;

use crate::platform::path_extension;

/// True when `path` has one of the configured archive extensions.
pub fn is_archive<S: AsRef<str>>(path: &Path, archive_extensions: &[S]) -> bool {
    path_extension(path).is_some_and(|ext| archive_extensions.iter().any(|a| a.as_ref() == ext))
}

/// Extracted images in archive order, living in a scratch directory that is
/// removed when this value is dropped.
#[derive(Debug, Default)]
pub struct ExtractedImages {
    scratch: Option<TempDir>,
    images: Vec<PathBuf>,
}

impl ExtractedImages {
    pub fn images(&self) -> &[PathBuf] {
        &self.images
    }

    pub fn is_empty(&self) -> bool {
        self.images.is_empty()
    }

    pub fn scratch_dir(&self) -> Option<&Path> {
        self.scratch.as_ref().map(TempDir::path)
    }
}

/// Extract every member whose name ends in one of `image_extensions`.
///
/// Never fails: an archive that cannot be opened yields no images, and a
/// member that cannot be extracted is skipped.
pub fn extract_images<S: AsRef<str>>(archive: &Path, image_extensions: &[S]) -> ExtractedImages {
    match try_extract(archive, image_extensions) {
        Ok(extracted) => extracted,
        Err(e) => {
            log::warn!("Cannot open archive {}: {e}", archive.display());
            ExtractedImages::default()
        }
    }
}

fn try_extract<S: AsRef<str>>(archive: &Path, image_extensions: &[S]) -> io::Result<ExtractedImages> {
    let mut zip = ZipArchive::new(File::open(archive)?).map_err(io::Error::other)?;
    let scratch = tempfile::Builder::new().prefix("emu-autotest-").tempdir()?;
    let mut images = Vec::new();

    for index in 0..zip.len() {
        let mut member = match zip.by_index(index) {
            Ok(m) => m,
            Err(e) => {
                log::warn!("{}: member {index} unreadable: {e}", archive.display());
                continue;
            }
        };
        if member.is_dir() {
            continue;
        }
        let lower = member.name().to_lowercase();
        if !image_extensions.iter().any(|ext| lower.ends_with(ext.as_ref())) {
            continue;
        }
        let Some(file_name) = member
            .enclosed_name()
            .and_then(|p| p.file_name().map(ToOwned::to_owned))
        else {
            log::warn!("{}: skipping unsafe member name {}", archive.display(), member.name());
            continue;
        };

        // One directory per member so equal base names in different
        // archive folders do not overwrite each other.
        let slot = scratch.path().join(format!("{index:04}"));
        let target = slot.join(file_name);
        let written = fs::create_dir_all(&slot)
            .and_then(|()| File::create(&target))
            .and_then(|mut out| io::copy(&mut member, &mut out));
        match written {
            Ok(_) => images.push(target),
            Err(e) => log::warn!("{}: cannot extract {}: {e}", archive.display(), member.name()),
        }
    }

    Ok(ExtractedImages {
        scratch: Some(scratch),
        images,
    })
}

/// Ordered, single-use queue of fallback candidates.
///
/// Candidates come out in archive order and each exactly once.
#[derive(Debug)]
pub struct CandidateQueue {
    extracted: ExtractedImages,
    next: usize,
}

impl CandidateQueue {
    pub fn new(extracted: ExtractedImages) -> Self {
        Self { extracted, next: 0 }
    }

    pub fn len(&self) -> usize {
        self.extracted.images.len()
    }

    pub fn is_empty(&self) -> bool {
        self.extracted.is_empty()
    }

    /// Index of the next candidate, 0-based.
    pub fn position(&self) -> usize {
        self.next
    }

    pub fn next_candidate(&mut self) -> Option<PathBuf> {
        let path = self.extracted.images.get(self.next)?.clone();
        self.next += 1;
        Some(path)
    }
}
