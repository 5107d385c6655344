//! Input discovery for the CLI.
//!
//! Turns command-line paths into HEIC/HEIF candidates: explicit files are
//! checked by name, directories are walked recursively.

use crate::item::SourceFile;
use crate::naming::is_heic_candidate;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

/// Result of collecting inputs.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CollectedSources {
    /// HEIC/HEIF files, in discovery order.
    pub accepted: Vec<PathBuf>,
    /// Explicitly named files that are not HEIC/HEIF, or paths that do not exist.
    pub unsupported: Vec<PathBuf>,
}

fn file_name(path: &Path) -> &str {
    path.file_name().and_then(|n| n.to_str()).unwrap_or("")
}

/// Checks if a path names a HEIC/HEIF file by extension (case-insensitive).
pub fn is_heic_path(path: &Path) -> bool {
    is_heic_candidate(file_name(path), None)
}

/// Collects HEIC/HEIF files from `paths`.
///
/// - Directories are walked recursively, skipping hidden directories below
///   the root, and only HEIC/HEIF files are kept; other files in a directory
///   are ignored silently
/// - Explicit files are kept when they pass the HEIC check, otherwise they
///   are reported as unsupported
/// - Directory entries are sorted by name so batches are reproducible
pub fn collect_sources(paths: &[PathBuf]) -> CollectedSources {
    let mut collected = CollectedSources::default();

    for path in paths {
        if path.is_dir() {
            let walker = WalkDir::new(path)
                .sort_by_file_name()
                .into_iter()
                .filter_entry(|entry| {
                    if entry.depth() == 0 || !entry.file_type().is_dir() {
                        return true;
                    }
                    !entry
                        .file_name()
                        .to_str()
                        .map(|name| name.starts_with('.'))
                        .unwrap_or(false)
                });

            for entry in walker.filter_map(|e| e.ok()) {
                if entry.file_type().is_file() && is_heic_path(entry.path()) {
                    collected.accepted.push(entry.into_path());
                }
            }
        } else if path.is_file() && is_heic_path(path) {
            collected.accepted.push(path.clone());
        } else {
            collected.unsupported.push(path.clone());
        }
    }

    collected
}

/// Reads a file into a [`SourceFile`] named after its file name.
pub fn load_source(path: &Path) -> io::Result<SourceFile> {
    let bytes = fs::read(path)?;
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string());
    Ok(SourceFile::new(name, bytes))
}
