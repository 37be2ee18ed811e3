//! Filesystem helpers for copying files and directory trees.

use crate::{Error, Result};
use std::fs;
use std::io;
use std::path::Path;
use walkdir::WalkDir;

/// Copy `src` to `dst` byte for byte, creating or truncating `dst`.
///
/// Permission bits are copied along with the contents.
pub fn copy_file(src: impl AsRef<Path>, dst: impl AsRef<Path>) -> Result<()> {
    let src = src.as_ref();
    let dst = dst.as_ref();

    if !src.is_file() {
        return Err(annotate(
            io::Error::from(io::ErrorKind::NotFound),
            "open",
            src,
        ));
    }
    fs::copy(src, dst).map_err(|e| annotate(e, "copy to", dst))?;

    Ok(())
}

/// Recursively mirror `src_dir` into `dst_dir`.
///
/// Directory permission bits are preserved. Symbolic links are followed and
/// copied as the files or directories they point to. Stops at the first
/// error without rolling back what was already copied.
pub fn copy_tree(src_dir: impl AsRef<Path>, dst_dir: impl AsRef<Path>) -> Result<()> {
    let src_dir = src_dir.as_ref();
    let dst_dir = dst_dir.as_ref();

    for entry in WalkDir::new(src_dir).follow_links(true) {
        let entry = entry.map_err(|e| {
            Error::Io(io::Error::other(format!("Failed to walk directory: {}", e)))
        })?;

        let relative = entry.path().strip_prefix(src_dir).map_err(|_| {
            Error::Io(io::Error::new(
                io::ErrorKind::InvalidInput,
                "Failed to compute relative path",
            ))
        })?;
        let target = dst_dir.join(relative);

        if entry.file_type().is_dir() {
            fs::create_dir_all(&target).map_err(|e| annotate(e, "create", &target))?;
            let permissions = entry
                .metadata()
                .map_err(|e| Error::Io(io::Error::other(e.to_string())))?
                .permissions();
            fs::set_permissions(&target, permissions)?;
        } else {
            copy_file(entry.path(), &target)?;
        }
    }

    Ok(())
}

fn annotate(e: io::Error, action: &str, path: &Path) -> Error {
    Error::Io(io::Error::new(
        e.kind(),
        format!("cannot {} {}: {}", action, path.display(), e),
    ))
}
