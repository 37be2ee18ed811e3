//! The resigning pipeline.
//!
//! [`Resigner`] runs one job as a single forward pass through the states of
//! [`State`]. Working files live under `<source dir>/tmp/` and are removed
//! when the run ends, whether it succeeds, fails, or panics.
//!
//! # Layout
//!
//! For a source `dir/MyApp.ipa`:
//!
//! ```text
//! dir/tmp/                          temp root, removed after the run
//! dir/tmp/entitlements.plist        resolved entitlements
//! dir/tmp/app/Payload/MyApp.app/    working copy of the bundle
//! dir/Resigned/MyApp.ipa            output (MyApp.app for bundle input)
//! ```
//!
//! Two concurrent runs on sources in the same directory share `dir/tmp/`
//! and must not be started.

use crate::bundle::{
    discover_components, read_bundle_identifier, Component, ComponentKind, EMBEDDED_PROFILE,
};
use crate::config::SourceKind;
use crate::fs_util::{copy_file, copy_tree};
use crate::ipa::{compress_dir, extract_archive, find_app_root, PAYLOAD_DIR};
use crate::progress::{NullObserver, ProgressObserver};
use crate::resolve::{apply_bundle_identifier, resolve_bundle_identifier, resolve_entitlements};
use crate::tools::{CodesignFlags, CodesignRequest, SigningTools};
use crate::{Error, JobConfig, Result};
use std::any::Any;
use std::cell::Cell;
use std::fmt;
use std::fs;
use std::io;
use std::panic::{self, AssertUnwindSafe};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// Name of the temp root created next to the source.
pub const TEMP_DIR: &str = "tmp";

/// Name of the extraction directory inside the temp root.
pub const WORK_DIR: &str = "app";

/// Name of the output directory created next to the source.
pub const OUTPUT_DIR: &str = "Resigned";

/// Pipeline states, in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum State {
    Validating,
    Preparing,
    Extracting,
    ResolvingProvisioning,
    ResolvingEntitlements,
    ResolvingBundleId,
    Signing,
    Packaging,
    Done,
}

impl fmt::Display for State {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            State::Validating => "validating",
            State::Preparing => "preparing",
            State::Extracting => "extracting",
            State::ResolvingProvisioning => "resolving provisioning profile",
            State::ResolvingEntitlements => "resolving entitlements",
            State::ResolvingBundleId => "resolving bundle identifier",
            State::Signing => "signing",
            State::Packaging => "packaging",
            State::Done => "done",
        };
        f.write_str(name)
    }
}

/// Temp directories owned by one run. Dropping it removes the temp root.
struct RunState {
    temp_root: PathBuf,
    work_dir: PathBuf,
}

impl RunState {
    /// Allocate a fresh temp root, discarding leftovers of an earlier run.
    fn prepare(temp_root: PathBuf) -> Result<Self> {
        match fs::remove_dir_all(&temp_root) {
            Ok(()) => debug!(path = %temp_root.display(), "removed stale temp root"),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }

        let work_dir = temp_root.join(WORK_DIR);
        let state = Self {
            temp_root,
            work_dir,
        };
        fs::create_dir_all(&state.work_dir)?;
        Ok(state)
    }
}

impl Drop for RunState {
    fn drop(&mut self) {
        if let Err(e) = fs::remove_dir_all(&self.temp_root) {
            debug!(path = %self.temp_root.display(), error = %e, "temp root cleanup failed");
        }
    }
}

/// Resigns an `.ipa` package or `.app` bundle.
///
/// # Example
///
/// ```no_run
/// use xresign::{JobConfig, Resigner, SystemTools};
///
/// let tools = SystemTools::default();
/// let log = |message: &str| println!("{message}");
///
/// let output = Resigner::new(JobConfig::new("MyApp.ipa", "Apple Development"), &tools)
///     .observer(&log)
///     .resign()?;
/// println!("written to {}", output.display());
/// # Ok::<(), xresign::Error>(())
/// ```
pub struct Resigner<'a> {
    config: JobConfig,
    tools: &'a dyn SigningTools,
    observer: &'a dyn ProgressObserver,
}

impl<'a> Resigner<'a> {
    pub fn new(config: JobConfig, tools: &'a dyn SigningTools) -> Self {
        Self {
            config,
            tools,
            observer: &NullObserver,
        }
    }

    /// Receive progress messages during [`Resigner::resign`].
    ///
    /// Without one, messages go only to the `tracing` log.
    pub fn observer(mut self, observer: &'a dyn ProgressObserver) -> Self {
        self.observer = observer;
        self
    }

    pub fn config(&self) -> &JobConfig {
        &self.config
    }

    /// Temp root used for a source path: `<source dir>/tmp`.
    pub fn temp_root_for(source: &Path) -> PathBuf {
        source_dir(source).join(TEMP_DIR)
    }

    /// Output directory used for a source path: `<source dir>/Resigned`.
    pub fn output_dir_for(source: &Path) -> PathBuf {
        source_dir(source).join(OUTPUT_DIR)
    }

    /// Run the pipeline and return the path of the resigned package.
    ///
    /// Panics raised inside the run, including in the signing tools or the
    /// observer, are caught and returned as [`Error::PanicRecovered`]. The
    /// temp root is removed before this returns in every case.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Failed`] naming the state that failed and wrapping
    /// the underlying error.
    pub fn resign(&self) -> Result<PathBuf> {
        let state = Cell::new(State::Validating);

        let result = panic::catch_unwind(AssertUnwindSafe(|| self.run(&state)))
            .unwrap_or_else(|payload| {
                Err(Error::PanicRecovered(panic_message(payload.as_ref())).in_state(state.get()))
            });

        if let Err(ref e) = result {
            warn!(state = %state.get(), error = %e, "resign failed");
            let message = format!("ERROR: {}", e);
            // The run already failed; a second fault in the observer is dropped.
            if panic::catch_unwind(AssertUnwindSafe(|| self.notify(&message))).is_err() {
                warn!("progress observer panicked while reporting the failure");
            }
        }

        result
    }

    fn run(&self, state: &Cell<State>) -> Result<PathBuf> {
        let enter = |next: State| {
            debug!(state = %next, "entering state");
            state.set(next);
        };

        enter(State::Validating);
        let source_kind = self
            .config
            .validate()
            .map_err(|e| e.in_state(State::Validating))?;

        self.progress("Start (re)sign the app...");

        enter(State::Preparing);
        let run_state = RunState::prepare(Self::temp_root_for(&self.config.source))
            .map_err(|e| e.in_state(State::Preparing))?;

        enter(State::Extracting);
        let app_root = self
            .extract(source_kind, &run_state)
            .map_err(|e| e.in_state(State::Extracting))?;

        enter(State::ResolvingProvisioning);
        self.install_provisioning_profile(&app_root)
            .map_err(|e| e.in_state(State::ResolvingProvisioning))?;

        enter(State::ResolvingEntitlements);
        let entitlements = self
            .entitlements(&app_root, &run_state)
            .map_err(|e| e.in_state(State::ResolvingEntitlements))?;

        enter(State::ResolvingBundleId);
        self.change_app_bundle_identifier(&app_root)
            .map_err(|e| e.in_state(State::ResolvingBundleId))?;

        enter(State::Signing);
        self.sign_components(&app_root, &entitlements)
            .map_err(|e| e.in_state(State::Signing))?;

        enter(State::Packaging);
        let output = self
            .package(source_kind, &app_root, &run_state)
            .map_err(|e| e.in_state(State::Packaging))?;

        enter(State::Done);
        self.progress("XReSign FINISHED");

        Ok(output)
    }

    /// Populate `<work>/Payload/` and return the single app root inside it.
    fn extract(&self, source_kind: SourceKind, run: &RunState) -> Result<PathBuf> {
        let source = &self.config.source;

        match source_kind {
            SourceKind::Ipa => {
                self.progress("Extracting IPA file...");
                extract_archive(source, &run.work_dir)?;
            }
            SourceKind::AppBundle => {
                self.progress("Copying .app file...");
                let payload_dir = run.work_dir.join(PAYLOAD_DIR);
                fs::create_dir_all(&payload_dir)?;
                let name = source.file_name().ok_or_else(|| {
                    Error::Validation(format!("invalid source path: {}", source.display()))
                })?;
                copy_tree(source, payload_dir.join(name))?;
            }
        }

        let app_root = find_app_root(&run.work_dir)?;
        if !app_root.is_dir() {
            return Err(Error::Structure(format!(
                "{} is not an application bundle",
                app_root.display()
            )));
        }

        info!(app = %app_root.display(), "application root located");
        Ok(app_root)
    }

    fn install_provisioning_profile(&self, app_root: &Path) -> Result<()> {
        match self.config.provisioning_profile {
            Some(ref profile) => {
                self.progress("Copying provisioning profile into application payload");
                copy_file(profile, app_root.join(EMBEDDED_PROFILE))
            }
            None => {
                self.progress("Sign process using existing provisioning profile from payload");
                Ok(())
            }
        }
    }

    fn entitlements(&self, app_root: &Path, run: &RunState) -> Result<PathBuf> {
        match self.config.entitlements {
            Some(ref explicit) => {
                self.progress(&format!("Using provided entitlements: {}", explicit.display()))
            }
            None => self.progress("Extract entitlements from mobileprovision"),
        }

        resolve_entitlements(&self.config, app_root, &run.temp_root, self.tools)
    }

    /// A failure here is fatal: the app identifier must match the profile.
    fn change_app_bundle_identifier(&self, app_root: &Path) -> Result<()> {
        let Some(new_id) = resolve_bundle_identifier(ComponentKind::Application, &self.config, 0)
        else {
            self.progress("Sign using existing bundle identifier from payload");
            return Ok(());
        };

        match read_bundle_identifier(app_root) {
            Ok(Some(old_id)) => self.progress(&format!(
                "Changing bundle identifier from {} to {}",
                old_id, new_id
            )),
            _ => self.progress(&format!("Changing bundle identifier with: {}", new_id)),
        }

        apply_bundle_identifier(self.tools, app_root, &new_id)
    }

    fn sign_components(&self, app_root: &Path, entitlements: &Path) -> Result<()> {
        self.progress(&format!(
            "Get list of components and sign with certificate: {}",
            self.config.identity
        ));

        let components = discover_components(app_root)?;
        debug!(count = components.len(), "components discovered");

        self.progress("Sign plugins, frameworks, dylibs");
        let mut extension_index = 0;
        let mut announced_apps = false;

        for component in &components {
            match component.kind {
                ComponentKind::Extension => {
                    self.change_extension_bundle_identifier(component, extension_index);
                    extension_index += 1;
                }
                ComponentKind::Application if !announced_apps => {
                    self.progress("Sign app");
                    announced_apps = true;
                }
                _ => {}
            }

            self.codesign(component, entitlements)?;
        }

        Ok(())
    }

    /// Best effort: a failure is reported and signing continues.
    fn change_extension_bundle_identifier(&self, component: &Component, extension_index: usize) {
        let Some(new_id) =
            resolve_bundle_identifier(ComponentKind::Extension, &self.config, extension_index)
        else {
            return;
        };

        self.progress(&format!(
            "Changing .appex bundle identifier with: {}",
            new_id
        ));

        if let Err(e) = apply_bundle_identifier(self.tools, &component.path, &new_id) {
            warn!(
                path = %component.path.display(),
                error = %e,
                "failed to change extension bundle identifier"
            );
            self.progress(&format!(
                "Warning: Failed to change bundle ID for {}: {}",
                component.path.display(),
                e
            ));
        }
    }

    fn codesign(&self, component: &Component, entitlements: &Path) -> Result<()> {
        debug!(kind = %component.kind, path = %component.path.display(), "codesign");

        let request = CodesignRequest {
            target: &component.path,
            entitlements,
            identity: &self.config.identity,
            flags: CodesignFlags {
                force: true,
                generate_entitlement_der: true,
            },
        };

        self.tools.codesign(&request).map_err(|e| match e {
            Error::ExternalTool { tool, message } => Error::ExternalTool {
                tool,
                message: format!("failed to sign {}: {}", component.path.display(), message),
            },
            other => other,
        })
    }

    fn package(&self, source_kind: SourceKind, app_root: &Path, run: &RunState) -> Result<PathBuf> {
        let output_dir = Self::output_dir_for(&self.config.source);
        match fs::remove_dir_all(&output_dir) {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }
        fs::create_dir_all(&output_dir)?;

        let app_name = app_root.file_name().ok_or_else(|| {
            Error::Structure(format!("invalid app path: {}", app_root.display()))
        })?;

        let output = match source_kind {
            SourceKind::Ipa => {
                let ipa_name = Path::new(app_name).with_extension("ipa");
                let target = output_dir.join(&ipa_name);
                self.progress(&format!("Creating the signed ipa: {}", ipa_name.display()));
                compress_dir(&run.work_dir, &target, self.config.compression_level)?;
                self.progress(&format!("Resigned IPA saved to: {}", target.display()));
                target
            }
            SourceKind::AppBundle => {
                let target = output_dir.join(app_name);
                self.progress("Moving resigned .app file...");
                copy_tree(app_root, &target)?;
                self.progress(&format!("Resigned .app saved to: {}", target.display()));
                target
            }
        };

        Ok(output)
    }

    fn progress(&self, message: &str) {
        info!("{}", message);
        self.notify(message);
    }

    fn notify(&self, message: &str) {
        self.observer.on_event(message);
    }
}

fn source_dir(source: &Path) -> &Path {
    source.parent().unwrap_or_else(|| Path::new(""))
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
