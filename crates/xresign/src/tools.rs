//! The external signing capability.
//!
//! Signing, profile decoding and plist editing are delegated to the macOS
//! utilities `codesign`, `security` and `PlistBuddy`. [`SigningTools`]
//! describes the operations the pipeline needs; [`SystemTools`] runs the
//! real executables. All calls are synchronous and have no timeout.

use crate::{Error, Result};
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::process::{Command, Output};
use tracing::debug;

/// Flags passed to `codesign`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CodesignFlags {
    /// Replace an existing signature (`-f`).
    pub force: bool,
    /// Embed a DER-encoded copy of the entitlements (`--generate-entitlement-der`).
    pub generate_entitlement_der: bool,
}

impl Default for CodesignFlags {
    fn default() -> Self {
        Self {
            force: true,
            generate_entitlement_der: true,
        }
    }
}

/// A single `codesign` invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CodesignRequest<'a> {
    pub target: &'a Path,
    pub entitlements: &'a Path,
    pub identity: &'a str,
    pub flags: CodesignFlags,
}

/// Operations of the external signing capability.
///
/// Implementations must report every failure, including unusable output,
/// as [`Error::ExternalTool`].
pub trait SigningTools {
    /// Decode a signed provisioning profile into its plist representation.
    fn decode_profile(&self, profile: &Path) -> Result<Vec<u8>>;

    /// Extract the value of `key` from a plist file as a standalone XML plist.
    fn read_plist_key(&self, plist: &Path, key: &str) -> Result<Vec<u8>>;

    /// Set `key` to the string `value` in a plist file, in place.
    fn set_plist_key(&self, plist: &Path, key: &str, value: &str) -> Result<()>;

    /// Replace the code signature of `request.target`.
    fn codesign(&self, request: &CodesignRequest<'_>) -> Result<()>;

    /// List the signing identities available to `codesign`.
    fn list_identities(&self) -> Result<String>;
}

/// Locations of the executables used by [`SystemTools`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolPaths {
    pub security: PathBuf,
    pub plist_buddy: PathBuf,
    pub codesign: PathBuf,
}

impl Default for ToolPaths {
    fn default() -> Self {
        Self {
            security: PathBuf::from("security"),
            plist_buddy: PathBuf::from("/usr/libexec/PlistBuddy"),
            codesign: PathBuf::from("/usr/bin/codesign"),
        }
    }
}

/// [`SigningTools`] backed by the macOS command-line utilities.
#[derive(Debug, Clone, Default)]
pub struct SystemTools {
    paths: ToolPaths,
}

impl SystemTools {
    pub fn new(paths: ToolPaths) -> Self {
        Self { paths }
    }

    pub fn paths(&self) -> &ToolPaths {
        &self.paths
    }

    /// Run `program` and return its output if it exited successfully.
    ///
    /// On failure the error message carries stderr, falling back to stdout
    /// since `codesign` reports some errors there.
    fn run(&self, tool: &str, program: &Path, args: &[OsString]) -> Result<Output> {
        debug!(program = %program.display(), ?args, "running external tool");

        let output = Command::new(program)
            .args(args)
            .output()
            .map_err(|e| {
                Error::external(tool, format!("cannot run {}: {}", program.display(), e))
            })?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            let detail = if stderr.trim().is_empty() {
                String::from_utf8_lossy(&output.stdout).trim().to_string()
            } else {
                stderr.trim().to_string()
            };
            return Err(Error::external(
                tool,
                format!("{} ({})", detail, output.status),
            ));
        }

        Ok(output)
    }
}

fn decode_profile_args(profile: &Path) -> Vec<OsString> {
    vec!["cms".into(), "-D".into(), "-i".into(), profile.into()]
}

fn read_plist_key_args(plist: &Path, key: &str) -> Vec<OsString> {
    vec![
        "-x".into(),
        "-c".into(),
        format!("Print:{}", key).into(),
        plist.into(),
    ]
}

fn set_plist_key_args(plist: &Path, key: &str, value: &str) -> Vec<OsString> {
    vec![
        "-c".into(),
        format!("Set:{} {}", key, value).into(),
        plist.into(),
    ]
}

fn codesign_args(request: &CodesignRequest<'_>) -> Vec<OsString> {
    let mut args: Vec<OsString> = vec!["--continue".into()];
    if request.flags.generate_entitlement_der {
        args.push("--generate-entitlement-der".into());
    }
    if request.flags.force {
        args.push("-f".into());
    }
    args.push("-s".into());
    args.push(request.identity.into());
    args.push("--entitlements".into());
    args.push(request.entitlements.into());
    args.push(request.target.into());
    args
}

fn list_identities_args() -> Vec<OsString> {
    vec![
        "find-identity".into(),
        "-v".into(),
        "-p".into(),
        "codesigning".into(),
    ]
}

impl SigningTools for SystemTools {
    fn decode_profile(&self, profile: &Path) -> Result<Vec<u8>> {
        let output = self.run(
            "decode provisioning profile",
            &self.paths.security,
            &decode_profile_args(profile),
        )?;
        Ok(output.stdout)
    }

    fn read_plist_key(&self, plist: &Path, key: &str) -> Result<Vec<u8>> {
        let output = self.run(
            "read plist key",
            &self.paths.plist_buddy,
            &read_plist_key_args(plist, key),
        )?;
        Ok(output.stdout)
    }

    fn set_plist_key(&self, plist: &Path, key: &str, value: &str) -> Result<()> {
        self.run(
            "set plist key",
            &self.paths.plist_buddy,
            &set_plist_key_args(plist, key, value),
        )?;
        Ok(())
    }

    fn codesign(&self, request: &CodesignRequest<'_>) -> Result<()> {
        self.run("codesign", &self.paths.codesign, &codesign_args(request))?;
        Ok(())
    }

    fn list_identities(&self) -> Result<String> {
        let output = self.run(
            "list identities",
            &self.paths.security,
            &list_identities_args(),
        )?;
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }
}
