//! IPA extraction functionality.
//!
//! Extracts zip archives to a working directory and locates the single
//! application bundle inside `Payload/`.

use crate::{Error, Result};
use std::fs::{self, File};
use std::io::{self, Read};
use std::path::{Component, Path, PathBuf};
use tracing::{debug, warn};
use zip::result::ZipError;
use zip::ZipArchive;

/// Name of the directory holding the application bundle inside an IPA.
pub const PAYLOAD_DIR: &str = "Payload";

/// Extract a zip archive to a destination directory.
///
/// Every entry is recreated under `dest_dir` at its relative path, with
/// intermediate directories created as needed. File contents are written
/// exactly and Unix mode bits are restored, on directories once all their
/// contents are written. Symlink entries are recreated as symlinks.
///
/// Nothing is ever written outside `dest_dir`: symlink targets must stay
/// inside it, and every entry's parent is resolved on disk before writing,
/// so a path routed through an earlier symlink entry is caught as well.
///
/// # Errors
///
/// Returns [`Error::ArchiveRead`] if the archive cannot be opened or an
/// entry is malformed (including entries that would escape `dest_dir`),
/// and [`Error::Io`] if writing to `dest_dir` fails.
pub fn extract_archive(archive_path: impl AsRef<Path>, dest_dir: impl AsRef<Path>) -> Result<()> {
    let archive_path = archive_path.as_ref();
    let dest_dir = dest_dir.as_ref();

    let file = File::open(archive_path).map_err(|e| {
        Error::ArchiveRead(ZipError::Io(io::Error::new(
            e.kind(),
            format!("cannot open {}: {}", archive_path.display(), e),
        )))
    })?;
    let mut archive = ZipArchive::new(file)?;

    fs::create_dir_all(dest_dir)?;
    let root = dest_dir.canonicalize()?;

    #[cfg(unix)]
    let mut dir_modes: Vec<(PathBuf, u32)> = Vec::new();

    for i in 0..archive.len() {
        let mut entry = archive.by_index(i)?;

        let relative = entry
            .enclosed_name()
            .ok_or_else(|| escape_error(entry.name()))?;
        let outpath = dest_dir.join(&relative);

        if entry.is_dir() {
            ensure_within(&root, &outpath, entry.name())?;
            fs::create_dir_all(&outpath)?;
            #[cfg(unix)]
            {
                if let Some(mode) = entry.unix_mode() {
                    dir_modes.push((outpath, mode));
                }
            }
            continue;
        }

        if let Some(parent) = outpath.parent() {
            ensure_within(&root, parent, entry.name())?;
            fs::create_dir_all(parent)?;
        }

        // Replace whatever an earlier entry left here; never write through it.
        remove_existing(&outpath)?;

        #[cfg(unix)]
        {
            let is_symlink = entry
                .unix_mode()
                .map(|mode| (mode & 0o170000) == 0o120000)
                .unwrap_or(false);

            if is_symlink {
                let mut target = String::new();
                entry.read_to_string(&mut target)?;

                if !link_stays_within(&relative, Path::new(&target)) {
                    return Err(escape_error(entry.name()));
                }

                std::os::unix::fs::symlink(&target, &outpath)?;
                continue;
            }
        }

        let mut outfile = File::create(&outpath)?;
        io::copy(&mut entry, &mut outfile)?;

        #[cfg(unix)]
        set_mode(&outpath, entry.unix_mode())?;
    }

    // Deepest first, so a read-only parent never blocks its children.
    #[cfg(unix)]
    {
        dir_modes.sort_by_key(|(path, _)| std::cmp::Reverse(path.components().count()));
        for (path, mode) in dir_modes {
            set_mode(&path, Some(mode))?;
        }
    }

    debug!(
        archive = %archive_path.display(),
        entries = archive.len(),
        "archive extracted"
    );

    Ok(())
}

fn escape_error(name: &str) -> Error {
    warn!(entry = name, "archive entry escapes destination");
    Error::ArchiveRead(ZipError::InvalidArchive(
        "entry path escapes destination".into(),
    ))
}

/// Resolve the closest existing ancestor of `path` and require it to lie
/// under `root`.
fn ensure_within(root: &Path, path: &Path, name: &str) -> Result<()> {
    let mut existing = path;
    while existing.symlink_metadata().is_err() {
        match existing.parent() {
            Some(parent) => existing = parent,
            None => break,
        }
    }

    let resolved = existing.canonicalize().map_err(|_| escape_error(name))?;
    if !resolved.starts_with(root) {
        return Err(escape_error(name));
    }
    Ok(())
}

/// A symlink at `link` (relative to the destination) pointing at `target`
/// stays inside the destination.
fn link_stays_within(link: &Path, target: &Path) -> bool {
    if target.has_root() {
        return false;
    }

    let mut depth: usize = 0;
    let parent = link.parent().unwrap_or_else(|| Path::new(""));
    for component in parent.components().chain(target.components()) {
        match component {
            Component::Normal(_) => depth += 1,
            Component::CurDir => {}
            Component::ParentDir => match depth.checked_sub(1) {
                Some(d) => depth = d,
                None => return false,
            },
            Component::RootDir | Component::Prefix(_) => return false,
        }
    }
    true
}

fn remove_existing(path: &Path) -> Result<()> {
    match path.symlink_metadata() {
        Ok(meta) if meta.is_dir() => fs::remove_dir_all(path)?,
        Ok(_) => fs::remove_file(path)?,
        Err(e) if e.kind() == io::ErrorKind::NotFound => {}
        Err(e) => return Err(e.into()),
    }
    Ok(())
}

#[cfg(unix)]
fn set_mode(path: &Path, mode: Option<u32>) -> Result<()> {
    use std::os::unix::fs::PermissionsExt;

    if let Some(mode) = mode {
        fs::set_permissions(path, fs::Permissions::from_mode(mode & 0o7777))?;
    }
    Ok(())
}

/// Locate the application root inside `<work_dir>/Payload/`.
///
/// The payload directory must contain exactly one entry.
///
/// # Errors
///
/// Returns [`Error::Structure`] if `Payload/` is missing, empty, or holds
/// more than one entry.
pub fn find_app_root(work_dir: impl AsRef<Path>) -> Result<PathBuf> {
    let payload_dir = work_dir.as_ref().join(PAYLOAD_DIR);

    if !payload_dir.is_dir() {
        return Err(Error::Structure(format!(
            "no {} directory found in package",
            PAYLOAD_DIR
        )));
    }

    let mut entries = fs::read_dir(&payload_dir)?
        .map(|entry| entry.map(|e| e.path()))
        .collect::<io::Result<Vec<_>>>()?;

    match entries.len() {
        0 => Err(Error::Structure(format!(
            "no app found in {} directory",
            PAYLOAD_DIR
        ))),
        1 => Ok(entries.remove(0)),
        n => Err(Error::Structure(format!(
            "expected one entry in {} directory, found {}",
            PAYLOAD_DIR, n
        ))),
    }
}
