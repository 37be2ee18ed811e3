//! Discovery of independently signed components inside an app bundle.

use crate::{Error, Result};
use std::fmt;
use std::io;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

/// Kind of a signable component, derived from its path suffix.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ComponentKind {
    /// `.app` directory: the main application or a nested app.
    Application,
    /// `.appex` directory: an app extension / plug-in.
    Extension,
    /// `.framework` directory.
    Framework,
    /// `.dylib` regular file.
    DynamicLibrary,
}

impl ComponentKind {
    /// Classify a walked entry, or `None` if it is not a component.
    pub fn classify(path: &Path, is_dir: bool, is_file: bool) -> Option<Self> {
        let ext = path.extension()?.to_string_lossy().to_lowercase();
        match (ext.as_str(), is_dir, is_file) {
            ("app", true, _) => Some(ComponentKind::Application),
            ("appex", true, _) => Some(ComponentKind::Extension),
            ("framework", true, _) => Some(ComponentKind::Framework),
            ("dylib", _, true) => Some(ComponentKind::DynamicLibrary),
            _ => None,
        }
    }

    pub fn is_application(self) -> bool {
        self == ComponentKind::Application
    }
}

impl fmt::Display for ComponentKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ComponentKind::Application => "app",
            ComponentKind::Extension => "extension",
            ComponentKind::Framework => "framework",
            ComponentKind::DynamicLibrary => "dylib",
        };
        f.write_str(name)
    }
}

/// A discovered signable unit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Component {
    pub path: PathBuf,
    pub kind: ComponentKind,
}

/// Walk `app_root` and return every component in signing order.
///
/// Extensions, frameworks and dynamic libraries come first, in walk order.
/// Application bundles (the root itself and any nested apps) come last, so
/// that an outer bundle is always sealed after the signatures it references.
///
/// The walk descends into every directory, including components, to find
/// nested bundles. Symlinks are not followed, and a symlink is never
/// classified as a component.
///
/// # Errors
///
/// Returns [`Error::Io`] if an entry of the tree cannot be read.
pub fn discover_components(app_root: impl AsRef<Path>) -> Result<Vec<Component>> {
    let app_root = app_root.as_ref();
    let mut components = Vec::new();

    for entry in WalkDir::new(app_root).follow_links(false).sort_by_file_name() {
        let entry = entry.map_err(|e| {
            Error::Io(io::Error::other(format!("Failed to walk directory: {}", e)))
        })?;

        let file_type = entry.file_type();
        if let Some(kind) =
            ComponentKind::classify(entry.path(), file_type.is_dir(), file_type.is_file())
        {
            components.push(Component {
                path: entry.into_path(),
                kind,
            });
        }
    }

    // Stable: walk order is kept inside each partition.
    components.sort_by_key(|c| c.kind.is_application());

    Ok(components)
}
