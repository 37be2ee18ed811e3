//! IPA archive creation.
//!
//! Compresses a working directory (normally the one holding `Payload/`) back
//! into a zip archive.
//!
//! For the reverse operation, see the [`extract`](super::extract) module.
//!
//! # Features
//!
//! - Configurable compression via [`CompressionLevel`]
//! - Deterministic entry order (lexical directory walk) and fixed entry
//!   timestamps, so identical trees produce identical archives
//! - Preserves Unix file permissions and symlinks
//!
//! # Examples
//!
//! ```no_run
//! use xresign::ipa::{compress_dir, CompressionLevel};
//!
//! compress_dir("tmp/app", "Resigned/MyApp.ipa", CompressionLevel::DEFAULT)?;
//! # Ok::<(), xresign::Error>(())
//! ```

use crate::{Error, Result};
use std::fs::{self, File};
use std::io::{self, Write};
use std::path::Path;
use tracing::debug;
use walkdir::WalkDir;
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, DateTime, ZipWriter};

/// ZIP compression level for IPA creation.
///
/// Controls the trade-off between compression speed and output file size.
///
/// # Examples
///
/// ```
/// use xresign::ipa::CompressionLevel;
///
/// let balanced = CompressionLevel::DEFAULT;
/// assert_eq!(balanced.level(), 6);
///
/// // Values above 9 are clamped
/// assert_eq!(CompressionLevel::new(12).level(), 9);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CompressionLevel(u32);

impl CompressionLevel {
    /// No compression (level 0). Files are stored rather than deflated.
    pub const NONE: CompressionLevel = CompressionLevel(0);

    /// Default deflate level (6).
    pub const DEFAULT: CompressionLevel = CompressionLevel(6);

    /// Maximum deflate level (9).
    pub const MAX: CompressionLevel = CompressionLevel(9);

    /// Creates a compression level from 0-9.
    ///
    /// Values greater than 9 are clamped to 9.
    #[must_use]
    pub fn new(level: u32) -> Self {
        CompressionLevel(level.min(9))
    }

    /// Returns the compression level value (0-9).
    #[must_use]
    pub fn level(&self) -> u32 {
        self.0
    }

    fn file_options(self) -> SimpleFileOptions {
        let options = SimpleFileOptions::default().last_modified_time(DateTime::default());
        if self.0 == 0 {
            options.compression_method(CompressionMethod::Stored)
        } else {
            options
                .compression_method(CompressionMethod::Deflated)
                .compression_level(Some(self.0 as i64))
        }
    }
}

impl Default for CompressionLevel {
    fn default() -> Self {
        Self::DEFAULT
    }
}

impl From<u32> for CompressionLevel {
    fn from(level: u32) -> Self {
        CompressionLevel::new(level)
    }
}

/// Compresses `source_dir` into a zip archive at `archive_path`.
///
/// The tree is walked in lexical order. Each file becomes a deflated entry
/// and each directory a zero-length entry whose name ends in `/`; entry
/// names are relative to `source_dir` and always use `/` as separator. The
/// root directory itself is not recorded.
///
/// # Errors
///
/// Returns [`Error::Io`] if the tree cannot be walked or read, or the
/// output cannot be written.
pub fn compress_dir(
    source_dir: impl AsRef<Path>,
    archive_path: impl AsRef<Path>,
    compression_level: CompressionLevel,
) -> Result<()> {
    let source_dir = source_dir.as_ref();
    let archive_path = archive_path.as_ref();

    if !source_dir.is_dir() {
        return Err(Error::Io(io::Error::new(
            io::ErrorKind::NotFound,
            format!("Not a directory: {}", source_dir.display()),
        )));
    }

    if let Some(parent) = archive_path.parent() {
        fs::create_dir_all(parent)?;
    }

    let mut zip = ZipWriter::new(File::create(archive_path)?);
    let options = compression_level.file_options();
    let mut entries = 0usize;

    for entry in WalkDir::new(source_dir)
        .min_depth(1)
        .follow_links(false)
        .sort_by_file_name()
    {
        let entry = entry.map_err(|e| {
            Error::Io(io::Error::other(format!("Failed to walk directory: {}", e)))
        })?;

        let path = entry.path();
        let relative_path = path.strip_prefix(source_dir).map_err(|_| {
            Error::Io(io::Error::new(
                io::ErrorKind::InvalidInput,
                "Failed to compute relative path",
            ))
        })?;
        let archive_name = archive_name(relative_path);

        let metadata = fs::symlink_metadata(path)?;

        #[cfg(unix)]
        let options = {
            use std::os::unix::fs::PermissionsExt;
            options.unix_permissions(metadata.permissions().mode() & 0o7777)
        };

        if metadata.is_dir() {
            zip.add_directory(format!("{}/", archive_name), options)
                .map_err(io_error)?;
        } else if metadata.file_type().is_symlink() {
            let target = fs::read_link(path)?;
            zip.add_symlink(archive_name, target.to_string_lossy(), options)
                .map_err(io_error)?;
        } else {
            zip.start_file(archive_name, options).map_err(io_error)?;
            let mut file = File::open(path)?;
            io::copy(&mut file, &mut zip)?;
        }

        entries += 1;
    }

    zip.finish().map_err(io_error)?.flush()?;

    debug!(
        source = %source_dir.display(),
        archive = %archive_path.display(),
        entries,
        "archive created"
    );

    Ok(())
}

fn archive_name(relative_path: &Path) -> String {
    relative_path
        .components()
        .map(|c| c.as_os_str().to_string_lossy())
        .collect::<Vec<_>>()
        .join("/")
}

/// Write-side zip failures are reported as I/O errors.
fn io_error(e: zip::result::ZipError) -> Error {
    match e {
        zip::result::ZipError::Io(e) => Error::Io(e),
        other => Error::Io(io::Error::other(other.to_string())),
    }
}
