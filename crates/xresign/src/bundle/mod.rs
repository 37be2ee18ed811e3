//! App bundle inspection.
//!
//! This module provides functionality to:
//! - Walk an application bundle and classify every nested unit that needs
//!   its own signature ([`discover_components`])
//! - Read bundle metadata from `Info.plist`
//!
//! # Signing order
//!
//! Signing an outer bundle seals a manifest that references the signatures
//! of everything inside it, so inner components must be signed first.
//! [`discover_components`] returns extensions, frameworks and dynamic
//! libraries before any application bundle.
//!
//! # Examples
//!
//! ```no_run
//! use xresign::bundle::discover_components;
//!
//! for component in discover_components("Payload/MyApp.app")? {
//!     println!("{} {}", component.kind, component.path.display());
//! }
//! # Ok::<(), xresign::Error>(())
//! ```

pub mod component;
pub mod info;

pub use component::{discover_components, Component, ComponentKind};
pub use info::{read_bundle_identifier, BUNDLE_IDENTIFIER_KEY, EMBEDDED_PROFILE, INFO_PLIST};
