//! Entitlement and bundle identifier resolution.

use crate::bundle::{ComponentKind, BUNDLE_IDENTIFIER_KEY, EMBEDDED_PROFILE, INFO_PLIST};
use crate::fs_util::copy_file;
use crate::tools::SigningTools;
use crate::{Error, JobConfig, Result};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::debug;

/// File name of the resolved entitlements inside the run's temp root.
pub const ENTITLEMENTS_FILE: &str = "entitlements.plist";

/// File name of the decoded provisioning profile inside the run's temp root.
pub const PROVISIONING_PLIST_FILE: &str = "provisioning.plist";

const ENTITLEMENTS_KEY: &str = "Entitlements";

/// Produce the entitlements file to sign with and return its path.
///
/// An explicit entitlements override is copied verbatim. Otherwise the
/// application's `embedded.mobileprovision` is decoded and its
/// `Entitlements` value extracted into a standalone plist. The profile is
/// never decoded when an override is configured.
///
/// # Errors
///
/// Returns [`Error::ExternalTool`] if the profile is missing, cannot be
/// decoded, or has no usable `Entitlements` dictionary.
pub fn resolve_entitlements(
    config: &JobConfig,
    app_root: &Path,
    work_dir: &Path,
    tools: &dyn SigningTools,
) -> Result<PathBuf> {
    let entitlements_path = work_dir.join(ENTITLEMENTS_FILE);

    if let Some(ref explicit) = config.entitlements {
        copy_file(explicit, &entitlements_path)?;
        debug!(source = %explicit.display(), "using explicit entitlements");
        return Ok(entitlements_path);
    }

    let profile_path = app_root.join(EMBEDDED_PROFILE);
    if !profile_path.is_file() {
        return Err(Error::external(
            "decode provisioning profile",
            format!("no provisioning profile at {}", profile_path.display()),
        ));
    }

    let decoded = tools.decode_profile(&profile_path)?;
    let provisioning_plist = work_dir.join(PROVISIONING_PLIST_FILE);
    fs::write(&provisioning_plist, decoded)?;

    let entitlements = tools.read_plist_key(&provisioning_plist, ENTITLEMENTS_KEY)?;
    ensure_dictionary(&entitlements)?;
    fs::write(&entitlements_path, entitlements)?;

    debug!(profile = %profile_path.display(), "entitlements extracted from profile");
    Ok(entitlements_path)
}

/// Tool output must parse as a plist dictionary to be used as entitlements.
fn ensure_dictionary(data: &[u8]) -> Result<()> {
    let value: plist::Value = plist::from_bytes(data).map_err(|e| {
        Error::external(
            "read plist key",
            format!("entitlements are not a valid plist: {}", e),
        )
    })?;

    if value.as_dictionary().is_none() {
        return Err(Error::external(
            "read plist key",
            "entitlements are not a dictionary",
        ));
    }
    Ok(())
}

/// New bundle identifier for a component, or `None` to leave it unchanged.
///
/// The main application takes the configured identifier as is. Extensions
/// get `<id>.extra<extension_index>`, where `extension_index` counts
/// extensions from zero in discovery order. Other kinds are never renamed.
pub fn resolve_bundle_identifier(
    kind: ComponentKind,
    config: &JobConfig,
    extension_index: usize,
) -> Option<String> {
    let bundle_id = config.bundle_id.as_deref()?;
    match kind {
        ComponentKind::Application => Some(bundle_id.to_string()),
        ComponentKind::Extension => Some(format!("{}.extra{}", bundle_id, extension_index)),
        ComponentKind::Framework | ComponentKind::DynamicLibrary => None,
    }
}

/// Write `identifier` into `<bundle>/Info.plist`.
pub fn apply_bundle_identifier(
    tools: &dyn SigningTools,
    bundle_path: &Path,
    identifier: &str,
) -> Result<()> {
    tools.set_plist_key(
        &bundle_path.join(INFO_PLIST),
        BUNDLE_IDENTIFIER_KEY,
        identifier,
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tools::CodesignRequest;
    use crate::ErrorKind;
    use std::cell::RefCell;
    use tempfile::TempDir;

    const ENTITLEMENTS_XML: &[u8] = br#"<?xml version="1.0" encoding="UTF-8"?>
<!DOCTYPE plist PUBLIC "-//Apple//DTD PLIST 1.0//EN" "http://www.apple.com/DTDs/PropertyList-1.0.dtd">
<plist version="1.0">
<dict>
    <key>application-identifier</key>
    <string>ABCDE12345.com.acme.app</string>
</dict>
</plist>
"#;

    /// Tools that record which operations ran and return canned output.
    struct ProfileTools {
        calls: RefCell<Vec<String>>,
        entitlements: Vec<u8>,
    }

    impl ProfileTools {
        fn new(entitlements: &[u8]) -> Self {
            Self {
                calls: RefCell::new(Vec::new()),
                entitlements: entitlements.to_vec(),
            }
        }
    }

    impl SigningTools for ProfileTools {
        fn decode_profile(&self, profile: &Path) -> Result<Vec<u8>> {
            self.calls
                .borrow_mut()
                .push(format!("decode {}", profile.display()));
            Ok(b"<plist/>".to_vec())
        }

        fn read_plist_key(&self, _plist: &Path, key: &str) -> Result<Vec<u8>> {
            self.calls.borrow_mut().push(format!("read {}", key));
            Ok(self.entitlements.clone())
        }

        fn set_plist_key(&self, plist: &Path, key: &str, value: &str) -> Result<()> {
            self.calls
                .borrow_mut()
                .push(format!("set {} {}={}", plist.display(), key, value));
            Ok(())
        }

        fn codesign(&self, _request: &CodesignRequest<'_>) -> Result<()> {
            unreachable!("resolution never signs")
        }

        fn list_identities(&self) -> Result<String> {
            unreachable!("resolution never lists identities")
        }
    }

    fn setup() -> (TempDir, PathBuf, PathBuf) {
        let temp_dir = TempDir::new().unwrap();
        let work_dir = temp_dir.path().join("tmp");
        let app_root = work_dir.join("app/Payload/MyApp.app");
        fs::create_dir_all(&app_root).unwrap();
        (temp_dir, work_dir, app_root)
    }

    #[test]
    fn test_explicit_entitlements_take_precedence() {
        let (temp_dir, work_dir, app_root) = setup();
        fs::write(app_root.join(EMBEDDED_PROFILE), b"profile").unwrap();
        let explicit = temp_dir.path().join("custom.plist");
        fs::write(&explicit, b"verbatim, not even a plist").unwrap();

        let tools = ProfileTools::new(ENTITLEMENTS_XML);
        let config = JobConfig::new("MyApp.ipa", "Cert").entitlements(&explicit);
        let resolved = resolve_entitlements(&config, &app_root, &work_dir, &tools).unwrap();

        assert_eq!(resolved, work_dir.join(ENTITLEMENTS_FILE));
        assert_eq!(fs::read(&resolved).unwrap(), b"verbatim, not even a plist");
        assert!(tools.calls.borrow().is_empty());
    }

    #[test]
    fn test_entitlements_from_embedded_profile() {
        let (_temp_dir, work_dir, app_root) = setup();
        fs::write(app_root.join(EMBEDDED_PROFILE), b"profile").unwrap();

        let tools = ProfileTools::new(ENTITLEMENTS_XML);
        let config = JobConfig::new("MyApp.ipa", "Cert");
        let resolved = resolve_entitlements(&config, &app_root, &work_dir, &tools).unwrap();

        assert_eq!(fs::read(&resolved).unwrap(), ENTITLEMENTS_XML);
        assert!(work_dir.join(PROVISIONING_PLIST_FILE).exists());
        let calls = tools.calls.borrow();
        assert_eq!(calls.len(), 2);
        assert!(calls[0].starts_with("decode ") && calls[0].ends_with(EMBEDDED_PROFILE));
        assert_eq!(calls[1], "read Entitlements");
    }

    #[test]
    fn test_missing_profile_is_external_tool_error() {
        let (_temp_dir, work_dir, app_root) = setup();

        let tools = ProfileTools::new(ENTITLEMENTS_XML);
        let config = JobConfig::new("MyApp.ipa", "Cert");
        let err = resolve_entitlements(&config, &app_root, &work_dir, &tools).unwrap_err();

        assert_eq!(err.kind(), ErrorKind::ExternalTool);
        assert!(tools.calls.borrow().is_empty());
    }

    #[test]
    fn test_unparseable_entitlements_are_rejected() {
        let (_temp_dir, work_dir, app_root) = setup();
        fs::write(app_root.join(EMBEDDED_PROFILE), b"profile").unwrap();

        let tools = ProfileTools::new(b"<plist version=\"1.0\"><dict><key>broken");
        let config = JobConfig::new("MyApp.ipa", "Cert");
        let err = resolve_entitlements(&config, &app_root, &work_dir, &tools).unwrap_err();

        assert_eq!(err.kind(), ErrorKind::ExternalTool);
        assert!(!work_dir.join(ENTITLEMENTS_FILE).exists());
    }

    #[test]
    fn test_non_dictionary_entitlements_are_rejected() {
        let (_temp_dir, work_dir, app_root) = setup();
        fs::write(app_root.join(EMBEDDED_PROFILE), b"profile").unwrap();

        let tools = ProfileTools::new(b"<plist version=\"1.0\"><string>x</string></plist>");
        let config = JobConfig::new("MyApp.ipa", "Cert");
        let err = resolve_entitlements(&config, &app_root, &work_dir, &tools).unwrap_err();

        assert_eq!(err.kind(), ErrorKind::ExternalTool);
    }

    #[test]
    fn test_bundle_identifier_derivation() {
        let config = JobConfig::new("MyApp.ipa", "Cert").bundle_id("com.acme.app");

        assert_eq!(
            resolve_bundle_identifier(ComponentKind::Application, &config, 0).as_deref(),
            Some("com.acme.app")
        );
        let extensions: Vec<_> = (0..3)
            .map(|i| resolve_bundle_identifier(ComponentKind::Extension, &config, i).unwrap())
            .collect();
        assert_eq!(
            extensions,
            vec![
                "com.acme.app.extra0",
                "com.acme.app.extra1",
                "com.acme.app.extra2"
            ]
        );
        assert_eq!(
            resolve_bundle_identifier(ComponentKind::Framework, &config, 0),
            None
        );
    }

    #[test]
    fn test_bundle_identifier_unchanged_without_override() {
        let config = JobConfig::new("MyApp.ipa", "Cert");
        assert_eq!(
            resolve_bundle_identifier(ComponentKind::Application, &config, 0),
            None
        );
        assert_eq!(
            resolve_bundle_identifier(ComponentKind::Extension, &config, 4),
            None
        );
    }

    #[test]
    fn test_apply_bundle_identifier_targets_info_plist() {
        let tools = ProfileTools::new(ENTITLEMENTS_XML);
        apply_bundle_identifier(&tools, Path::new("MyApp.app"), "com.acme.app").unwrap();

        assert_eq!(
            tools.calls.borrow()[0],
            format!(
                "set {} CFBundleIdentifier=com.acme.app",
                Path::new("MyApp.app").join(INFO_PLIST).display()
            )
        );
    }
}
