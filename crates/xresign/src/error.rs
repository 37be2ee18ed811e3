//! Error types for resigning operations.
//!
//! This module defines the [`enum@Error`] enum covering every failure class
//! of the resigning pipeline: invalid input, unexpected package layout,
//! filesystem and archive failures, external tool failures, and recovered
//! panics.
//!
//! # See Also
//!
//! - [`crate::Result`] - Convenience type alias using this error
//! - [`ErrorKind`] - Taxonomy class of an error, looking through step wrappers

use crate::resigner::State;
use thiserror::Error;

/// Error type for resigning operations.
///
/// Errors raised inside the pipeline reach the caller wrapped in
/// [`Error::Failed`], which records the pipeline state that was active when
/// the failure occurred. Use [`Error::kind`] to classify an error regardless
/// of wrapping.
///
/// # Examples
///
/// ```no_run
/// use xresign::{ErrorKind, JobConfig, Resigner, SystemTools};
///
/// let tools = SystemTools::default();
/// let config = JobConfig::new("MyApp.ipa", "Apple Development: Jane Doe");
/// match Resigner::new(config, &tools).resign() {
///     Ok(output) => println!("Resigned: {}", output.display()),
///     Err(e) if e.kind() == ErrorKind::ExternalTool => eprintln!("Tool failure: {e}"),
///     Err(e) => eprintln!("Resign failed: {e}"),
/// }
/// ```
#[derive(Debug, Error)]
pub enum Error {
    /// Missing or invalid job configuration.
    ///
    /// Raised before any working state is allocated.
    #[error("Invalid input: {0}")]
    Validation(String),

    /// The extracted package does not have exactly one bundle in `Payload/`.
    #[error("Unexpected package layout: {0}")]
    Structure(String),

    /// Filesystem read, write or copy failed.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// The archive could not be opened or one of its entries is malformed.
    #[error("Archive read error: {0}")]
    ArchiveRead(#[from] zip::result::ZipError),

    /// An invocation of the external signing capability failed.
    ///
    /// Covers spawn failures, non-zero exit status and output that could
    /// not be interpreted.
    #[error("{tool} failed: {message}")]
    ExternalTool {
        /// Name of the operation or executable that failed.
        tool: String,
        /// Captured diagnostic output.
        message: String,
    },

    /// An unexpected panic was caught at the pipeline boundary.
    #[error("panic occurred: {0}")]
    PanicRecovered(String),

    /// A pipeline step failed; `state` names the step.
    #[error("{state} failed: {source}")]
    Failed {
        /// State the pipeline was in when the error occurred.
        state: State,
        /// The triggering error.
        #[source]
        source: Box<Error>,
    },
}

/// Taxonomy class of an [`enum@Error`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Validation,
    Structure,
    Io,
    ExternalTool,
    PanicRecovered,
}

impl Error {
    pub(crate) fn external(tool: impl Into<String>, message: impl Into<String>) -> Self {
        Error::ExternalTool {
            tool: tool.into(),
            message: message.into(),
        }
    }

    /// Wrap this error with the pipeline state it occurred in.
    pub(crate) fn in_state(self, state: State) -> Self {
        match self {
            already @ Error::Failed { .. } => already,
            other => Error::Failed {
                state,
                source: Box::new(other),
            },
        }
    }

    /// Returns the taxonomy class of this error.
    ///
    /// Archive read failures are reported as [`ErrorKind::Io`].
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::Validation(_) => ErrorKind::Validation,
            Error::Structure(_) => ErrorKind::Structure,
            Error::Io(_) | Error::ArchiveRead(_) => ErrorKind::Io,
            Error::ExternalTool { .. } => ErrorKind::ExternalTool,
            Error::PanicRecovered(_) => ErrorKind::PanicRecovered,
            Error::Failed { source, .. } => source.kind(),
        }
    }

    /// Returns the state a wrapped error failed in, if any.
    pub fn state(&self) -> Option<State> {
        match self {
            Error::Failed { state, .. } => Some(*state),
            _ => None,
        }
    }
}
