//! Command-line interface for the xresign iOS re-signing tool.
//!
//! Re-signs `.ipa` packages and `.app` bundles with a keychain identity
//! using the macOS `codesign`, `security` and `PlistBuddy` utilities.

use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;
use xresign::{JobConfig, Resigner, SigningTools, SystemTools, ToolPaths};

#[derive(Parser, Debug)]
#[command(name = "xresign")]
#[command(about = "Re-sign iOS apps with a new certificate and provisioning profile")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Re-sign an .ipa package or .app bundle
    Resign(ResignCmd),

    /// List the code signing identities in the keychain
    Identities(ToolArgs),
}

#[derive(Args, Debug)]
struct ResignCmd {
    /// Source .ipa or .app
    #[arg(short, long)]
    source: PathBuf,

    /// Signing identity (certificate name or SHA-1 hash)
    #[arg(short = 'c', long)]
    certificate: String,

    /// Entitlements plist, used instead of the profile's entitlements
    #[arg(short, long)]
    entitlements: Option<PathBuf>,

    /// Provisioning profile to embed
    #[arg(short, long)]
    provision: Option<PathBuf>,

    /// New bundle identifier
    #[arg(short, long)]
    bundle: Option<String>,

    /// ZIP compression level (0-9, default: 6)
    /// 0 = store only, 9 = smallest output
    #[arg(short = 'z', long, default_value = "6")]
    zip_level: u32,

    #[command(flatten)]
    tools: ToolArgs,
}

#[derive(Args, Debug)]
struct ToolArgs {
    /// Path to the `security` executable
    #[arg(long, env = "XRESIGN_SECURITY", default_value = "security")]
    security_path: PathBuf,

    /// Path to the `PlistBuddy` executable
    #[arg(long, env = "XRESIGN_PLISTBUDDY", default_value = "/usr/libexec/PlistBuddy")]
    plistbuddy_path: PathBuf,

    /// Path to the `codesign` executable
    #[arg(long, env = "XRESIGN_CODESIGN", default_value = "/usr/bin/codesign")]
    codesign_path: PathBuf,
}

impl ToolArgs {
    fn system_tools(&self) -> SystemTools {
        SystemTools::new(ToolPaths {
            security: self.security_path.clone(),
            plist_buddy: self.plistbuddy_path.clone(),
            codesign: self.codesign_path.clone(),
        })
    }
}

impl ResignCmd {
    fn run(self) -> xresign::Result<()> {
        let mut config =
            JobConfig::new(&self.source, self.certificate).compression_level(self.zip_level);
        if let Some(ref entitlements) = self.entitlements {
            config = config.entitlements(entitlements);
        }
        if let Some(ref profile) = self.provision {
            config = config.provisioning_profile(profile);
        }
        if let Some(bundle) = self.bundle {
            config = config.bundle_id(bundle);
        }

        let tools = self.tools.system_tools();
        let log = |message: &str| println!("{}", message);

        let output = Resigner::new(config, &tools).observer(&log).resign()?;
        println!("Signed: {}", output.display());
        Ok(())
    }
}

fn list_identities(args: ToolArgs) -> xresign::Result<()> {
    let identities = args.system_tools().list_identities()?;
    print!("{}", identities);
    Ok(())
}

fn main() {
    let cli = Cli::parse();

    init_logging();

    let result = match cli.command {
        Commands::Resign(cmd) => cmd.run(),
        Commands::Identities(args) => list_identities(args),
    };

    if let Err(e) = result {
        tracing::error!(error = %e, "command failed");
        eprint!("{}", failure_report(&e));
        std::process::exit(1);
    }
}

/// Text printed for a failed command.
///
/// The library's error messages already embed their causes, so only the
/// top-level message is printed.
fn failure_report(error: &xresign::Error) -> String {
    let mut report = format!("Error: {}\n", error);

    let hints = troubleshooting_hints(&error.to_string());
    if !hints.is_empty() {
        report.push_str("\nTroubleshooting:\n");
        for hint in hints {
            report.push_str(&format!("  - {}\n", hint));
        }
    }
    report
}

/// Initialize the tracing subscriber.
fn init_logging() {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("xresign=warn"));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

/// Suggestions for a failure, keyed on words in its message.
fn troubleshooting_hints(message: &str) -> Vec<&'static str> {
    let message = message.to_lowercase();
    let mut hints = Vec::new();

    if message.contains("certificate") || message.contains("codesign") {
        hints.push("Check the identity is installed: `xresign identities`");
        hints.push("Make sure the certificate has not expired or been revoked");
        hints.push("Unlock the keychain holding the private key");
    }
    if message.contains("provision") {
        hints.push("Check the provisioning profile has not expired");
        hints.push("Make sure the profile includes the signing certificate");
    }
    if message.contains("entitlements") {
        hints.push("Check the entitlements file is a valid plist dictionary");
        hints.push("Entitlements must be allowed by the provisioning profile");
    }
    if message.contains("bundle") {
        hints.push("The bundle identifier must match the provisioning profile's App ID");
    }

    hints
}

#[cfg(test)]
mod tests {
    use super::*;
    use xresign::State;

    #[test]
    fn test_hints_for_codesign_failure() {
        let hints = troubleshooting_hints("signing failed: codesign failed: errSecInternalComponent");
        assert!(hints.iter().any(|h| h.contains("xresign identities")));
        assert!(!hints.iter().any(|h| h.contains("App ID")));
    }

    #[test]
    fn test_hints_are_case_insensitive() {
        let hints = troubleshooting_hints("No Provisioning Profile at Payload/MyApp.app");
        assert!(hints.iter().any(|h| h.contains("provisioning profile")));
    }

    #[test]
    fn test_no_hints_for_unrelated_failure() {
        assert!(troubleshooting_hints("extracting failed: I/O error").is_empty());
    }

    #[test]
    fn test_failure_report_prints_each_cause_once() {
        let error = xresign::Error::Failed {
            state: State::Signing,
            source: Box::new(xresign::Error::ExternalTool {
                tool: "codesign".into(),
                message: "errSecInternalComponent".into(),
            }),
        };

        let report = failure_report(&error);
        assert!(report.starts_with(
            "Error: signing failed: codesign failed: errSecInternalComponent\n"
        ));
        assert_eq!(report.matches("errSecInternalComponent").count(), 1);
        assert!(report.contains("Troubleshooting:"));
    }

    #[test]
    fn test_resign_arguments() {
        let cli = Cli::try_parse_from([
            "xresign",
            "resign",
            "-s",
            "MyApp.ipa",
            "-c",
            "Apple Development: Jane",
            "-b",
            "com.acme.app",
            "-z",
            "9",
        ])
        .unwrap();

        let Commands::Resign(cmd) = cli.command else {
            panic!("expected resign");
        };
        assert_eq!(cmd.source, PathBuf::from("MyApp.ipa"));
        assert_eq!(cmd.certificate, "Apple Development: Jane");
        assert_eq!(cmd.bundle.as_deref(), Some("com.acme.app"));
        assert_eq!(cmd.zip_level, 9);
        assert!(cmd.entitlements.is_none());
    }

    #[test]
    fn test_resign_requires_certificate() {
        assert!(Cli::try_parse_from(["xresign", "resign", "-s", "MyApp.ipa"]).is_err());
    }
}
