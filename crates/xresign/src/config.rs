//! Job configuration for one resigning run.

use crate::ipa::CompressionLevel;
use crate::{Error, Result};
use std::path::{Path, PathBuf};

/// Kind of input package.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceKind {
    /// A zip-compressed `.ipa` package.
    Ipa,
    /// A bare `.app` bundle directory.
    AppBundle,
}

impl SourceKind {
    /// Determine the source kind from a path extension (case-insensitive).
    pub fn from_path(path: &Path) -> Option<Self> {
        let ext = path.extension()?.to_string_lossy().to_lowercase();
        match ext.as_str() {
            "ipa" => Some(SourceKind::Ipa),
            "app" => Some(SourceKind::AppBundle),
            _ => None,
        }
    }
}

/// Immutable input to one pipeline run.
///
/// Only the source package and the signing identity are mandatory. Every
/// optional value falls back to what is already embedded in the package.
///
/// # Example
///
/// ```
/// use xresign::JobConfig;
///
/// let config = JobConfig::new("MyApp.ipa", "Apple Development: Jane Doe")
///     .provisioning_profile("profile.mobileprovision")
///     .bundle_id("com.acme.app");
/// assert_eq!(config.bundle_id.as_deref(), Some("com.acme.app"));
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobConfig {
    /// `.ipa` file or `.app` directory to resign.
    pub source: PathBuf,
    /// Signing identity name as known to `codesign`.
    pub identity: String,
    /// Entitlements plist applied instead of the profile's entitlements.
    pub entitlements: Option<PathBuf>,
    /// Provisioning profile embedded in place of the existing one.
    pub provisioning_profile: Option<PathBuf>,
    /// New bundle identifier of the main application.
    pub bundle_id: Option<String>,
    /// Compression level of the output IPA.
    pub compression_level: CompressionLevel,
}

impl JobConfig {
    pub fn new(source: impl AsRef<Path>, identity: impl Into<String>) -> Self {
        Self {
            source: source.as_ref().to_path_buf(),
            identity: identity.into(),
            entitlements: None,
            provisioning_profile: None,
            bundle_id: None,
            compression_level: CompressionLevel::DEFAULT,
        }
    }

    /// Use an explicit entitlements plist instead of the profile's.
    pub fn entitlements(mut self, path: impl AsRef<Path>) -> Self {
        self.entitlements = Some(path.as_ref().to_path_buf());
        self
    }

    /// Embed this provisioning profile as `embedded.mobileprovision`.
    pub fn provisioning_profile(mut self, path: impl AsRef<Path>) -> Self {
        self.provisioning_profile = Some(path.as_ref().to_path_buf());
        self
    }

    /// Replace the main application's bundle identifier.
    ///
    /// Extensions receive derived identifiers `<id>.extra<N>`.
    pub fn bundle_id(mut self, bundle_id: impl Into<String>) -> Self {
        self.bundle_id = Some(bundle_id.into());
        self
    }

    pub fn compression_level(mut self, level: impl Into<CompressionLevel>) -> Self {
        self.compression_level = level.into();
        self
    }

    /// Kind of the source package, if its extension is recognized.
    pub fn source_kind(&self) -> Option<SourceKind> {
        SourceKind::from_path(&self.source)
    }

    /// Validate the configuration without touching the filesystem beyond
    /// existence checks.
    ///
    /// Returns an error if:
    /// - the source path or identity is empty
    /// - the source does not exist or is neither `.ipa` nor `.app`
    /// - an entitlements file is given that does not exist or is not `.plist`
    /// - a provisioning profile is given that does not exist or is not
    ///   `.mobileprovision`
    /// - a bundle identifier is given that is not dotted alphanumerics
    pub fn validate(&self) -> Result<SourceKind> {
        if self.source.as_os_str().is_empty() {
            return Err(Error::Validation("source IPA path is required".into()));
        }
        if self.identity.trim().is_empty() {
            return Err(Error::Validation("certificate is required".into()));
        }
        if !self.source.exists() {
            return Err(Error::Validation(format!(
                "source file does not exist: {}",
                self.source.display()
            )));
        }
        let kind = self.source_kind().ok_or_else(|| {
            Error::Validation(format!(
                "unsupported file type: {} (must be .ipa or .app)",
                self.source.display()
            ))
        })?;

        if let Some(ref entitlements) = self.entitlements {
            check_optional_file(entitlements, "entitlements", "plist")?;
        }
        if let Some(ref profile) = self.provisioning_profile {
            check_optional_file(profile, "mobile provision", "mobileprovision")?;
        }
        if let Some(ref bundle_id) = self.bundle_id {
            if !is_valid_bundle_id(bundle_id) {
                return Err(Error::Validation(format!(
                    "invalid bundle ID format: {} (expected format: com.company.app)",
                    bundle_id
                )));
            }
        }

        Ok(kind)
    }
}

fn check_optional_file(path: &Path, what: &str, extension: &str) -> Result<()> {
    if !path.exists() {
        return Err(Error::Validation(format!(
            "{} file does not exist: {}",
            what,
            path.display()
        )));
    }
    if !path
        .extension()
        .map_or(false, |e| e.to_string_lossy().eq_ignore_ascii_case(extension))
    {
        return Err(Error::Validation(format!(
            "{} file must be .{}, got: {}",
            what,
            extension,
            path.display()
        )));
    }
    Ok(())
}

/// A bundle identifier is at least three characters of `[A-Za-z0-9.-]`
/// containing at least one dot.
pub fn is_valid_bundle_id(bundle_id: &str) -> bool {
    bundle_id.len() >= 3
        && bundle_id.contains('.')
        && bundle_id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '.' || c == '-')
}
