//! Post-download archive extraction.
//!
//! Runs once the transfer pool has drained, one archive at a time. Every entry
//! of an archive is validated before anything is written, so an archive that
//! tries to escape its destination leaves no trace on disk.

use std::fs::{self, File};
use std::io;
use std::path::{Path, PathBuf};

use zip::ZipArchive;

use crate::download::{BatchControl, BatchStats};
use crate::error::{BatchError, BatchResult, ExtractError, ExtractResult};

/// Unpacks one archive into a directory.
pub trait ArchiveExtractor: Send + Sync {
    /// Extract `archive` into `destination`, returning the number of files written.
    fn extract(&self, archive: &Path, destination: &Path) -> ExtractResult<usize>;
}

/// Where and how archives are unpacked.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ExtractSettings {
    /// Extract into a folder named after the archive instead of beside it.
    pub to_subfolder: bool,
    /// Remove the archive after it was extracted successfully.
    pub delete_archive: bool,
}

/// Extractor for `.zip` archives.
#[derive(Debug, Default, Clone, Copy)]
pub struct ZipExtractor;

impl ZipExtractor {
    /// Create a new zip extractor.
    pub fn new() -> Self {
        Self
    }
}

impl ArchiveExtractor for ZipExtractor {
    fn extract(&self, archive: &Path, destination: &Path) -> ExtractResult<usize> {
        let file = File::open(archive).map_err(|e| ExtractError::Open {
            path: archive.to_path_buf(),
            source: e,
        })?;
        let mut zip = ZipArchive::new(file)?;

        // Validate everything first: one bad entry rejects the whole archive.
        let mut targets = Vec::with_capacity(zip.len());
        for index in 0..zip.len() {
            let entry = zip.by_index(index)?;
            let relative = entry
                .enclosed_name()
                .ok_or_else(|| ExtractError::UnsafeEntry {
                    entry: entry.name().to_string(),
                })?;
            targets.push(destination.join(relative));
        }

        fs::create_dir_all(destination).map_err(|e| ExtractError::io(destination, e))?;

        let mut files_written = 0;
        for (index, target) in targets.into_iter().enumerate() {
            let mut entry = zip.by_index(index)?;

            if entry.is_dir() {
                fs::create_dir_all(&target).map_err(|e| ExtractError::io(&target, e))?;
                continue;
            }

            if let Some(parent) = target.parent() {
                fs::create_dir_all(parent).map_err(|e| ExtractError::io(parent, e))?;
            }

            let mut out = File::create(&target).map_err(|e| ExtractError::io(&target, e))?;
            io::copy(&mut entry, &mut out).map_err(|e| ExtractError::io(&target, e))?;

            #[cfg(unix)]
            {
                use std::os::unix::fs::PermissionsExt;
                if let Some(mode) = entry.unix_mode() {
                    fs::set_permissions(&target, fs::Permissions::from_mode(mode & 0o777))
                        .map_err(|e| ExtractError::io(&target, e))?;
                }
            }

            files_written += 1;
        }

        Ok(files_written)
    }
}

/// Directory an archive is unpacked into.
///
/// Either the archive's own directory, or a sibling folder named after the
/// archive without its extension.
pub fn extraction_target(archive: &Path, to_subfolder: bool) -> PathBuf {
    let parent = archive.parent().unwrap_or_else(|| Path::new("."));
    if !to_subfolder {
        return parent.to_path_buf();
    }
    match archive.file_stem() {
        Some(stem) => parent.join(stem),
        None => parent.to_path_buf(),
    }
}

/// Extract `archives` in order, stopping at the first failure.
///
/// Cancellation is checked between archives. Returns the number of archives
/// extracted.
pub(crate) fn extract_archives(
    extractor: &dyn ArchiveExtractor,
    archives: &[PathBuf],
    settings: ExtractSettings,
    control: &BatchControl,
    stats: &BatchStats,
) -> BatchResult<usize> {
    let mut extracted = 0;

    for archive in archives {
        if control.is_cancelled() {
            tracing::info!(remaining = archives.len() - extracted, "extraction cancelled");
            break;
        }

        let destination = extraction_target(archive, settings.to_subfolder);
        let files = extractor
            .extract(archive, &destination)
            .map_err(|source| extraction_error(archive, source))?;

        tracing::debug!(
            archive = %archive.display(),
            destination = %destination.display(),
            files,
            "archive extracted"
        );

        if settings.delete_archive {
            fs::remove_file(archive)
                .map_err(|e| extraction_error(archive, ExtractError::io(archive, e)))?;
        }

        extracted += 1;
        stats.record_extracted();
    }

    Ok(extracted)
}

fn extraction_error(archive: &Path, source: ExtractError) -> BatchError {
    let name = archive
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| archive.display().to_string());
    tracing::error!(archive = %name, error = %source, "extraction failed");
    BatchError::Extraction {
        archive: name,
        source,
    }
}
