//! Bundle metadata stored in `Info.plist`.

use crate::{Error, Result};
use std::fs;
use std::path::Path;

/// Name of a bundle's info manifest.
pub const INFO_PLIST: &str = "Info.plist";

/// Name of the provisioning profile embedded in an application bundle.
pub const EMBEDDED_PROFILE: &str = "embedded.mobileprovision";

/// Info manifest key holding the bundle identifier.
pub const BUNDLE_IDENTIFIER_KEY: &str = "CFBundleIdentifier";

/// Read the bundle identifier from `<bundle>/Info.plist`.
///
/// Returns `Ok(None)` if the bundle has no `Info.plist` or the key is
/// missing.
pub fn read_bundle_identifier(bundle_path: impl AsRef<Path>) -> Result<Option<String>> {
    let info_plist_path = bundle_path.as_ref().join(INFO_PLIST);

    if !info_plist_path.exists() {
        return Ok(None);
    }

    let plist_data = fs::read(&info_plist_path)?;
    let plist: plist::Value = plist::from_bytes(&plist_data).map_err(|e| {
        Error::Structure(format!(
            "failed to parse {}: {}",
            info_plist_path.display(),
            e
        ))
    })?;

    Ok(plist
        .as_dictionary()
        .and_then(|d| d.get(BUNDLE_IDENTIFIER_KEY))
        .and_then(|v| v.as_string())
        .map(|s| s.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_read_bundle_identifier() {
        let temp_dir = TempDir::new().unwrap();
        fs::write(
            temp_dir.path().join(INFO_PLIST),
            br#"<?xml version="1.0" encoding="UTF-8"?>
<!DOCTYPE plist PUBLIC "-//Apple//DTD PLIST 1.0//EN" "http://www.apple.com/DTDs/PropertyList-1.0.dtd">
<plist version="1.0">
<dict>
    <key>CFBundleIdentifier</key>
    <string>com.test.app</string>
</dict>
</plist>"#,
        )
        .unwrap();

        let id = read_bundle_identifier(temp_dir.path()).unwrap();
        assert_eq!(id.as_deref(), Some("com.test.app"));
    }

    #[test]
    fn test_read_bundle_identifier_without_plist() {
        let temp_dir = TempDir::new().unwrap();
        assert_eq!(read_bundle_identifier(temp_dir.path()).unwrap(), None);
    }

    #[test]
    fn test_read_bundle_identifier_malformed() {
        let temp_dir = TempDir::new().unwrap();
        fs::write(temp_dir.path().join(INFO_PLIST), b"not a plist").unwrap();
        assert!(read_bundle_identifier(temp_dir.path()).is_err());
    }
}
