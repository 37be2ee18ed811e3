//! IPA handling module.
//!
//! Provides functionality for extracting IPA archives into a working tree
//! and compressing a working tree back into an IPA.

pub mod archive;
pub mod extract;

pub use archive::{compress_dir, CompressionLevel};
pub use extract::{extract_archive, find_app_root, PAYLOAD_DIR};
