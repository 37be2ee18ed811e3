//! Re-sign iOS application packages.
//!
//! `xresign` replaces the code signature, provisioning profile, bundle
//! identifier and entitlements of an `.ipa` package or `.app` bundle and of
//! every extension, framework and dynamic library inside it, then writes a
//! new package next to the source under `Resigned/`.
//!
//! Signing itself is delegated to the macOS tooling through
//! [`SigningTools`]; see [`Resigner`] for the pipeline.

pub mod bundle;
pub mod config;
pub mod error;
pub mod fs_util;
pub mod ipa;
pub mod progress;
pub mod resigner;
pub mod resolve;
pub mod tools;

pub use bundle::{discover_components, Component, ComponentKind};
pub use config::{JobConfig, SourceKind};
pub use error::{Error, ErrorKind};
pub use ipa::{compress_dir, extract_archive, CompressionLevel};
pub use progress::{ChannelObserver, NullObserver, ProgressObserver};
pub use resigner::{Resigner, State};
pub use tools::{CodesignFlags, CodesignRequest, SigningTools, SystemTools, ToolPaths};

pub type Result<T> = std::result::Result<T, Error>;
