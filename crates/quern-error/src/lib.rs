//! Error taxonomy for the Quern engine.
//!
//! Every fallible operation across the workspace returns [`Result`]. The
//! variants mirror the engine's abstract error kinds; each component
//! documents which kinds it can produce. Errors travel as return values
//! only — there is no out-of-band unwinding on the engine paths.

use std::path::PathBuf;

/// Workspace-wide result alias.
pub type Result<T> = std::result::Result<T, QuernError>;

/// The error kinds a Quern operation can surface.
#[derive(Debug, thiserror::Error)]
pub enum QuernError {
    /// An iteration or search ran past its last element.
    #[error("end of data")]
    EndOfData,

    /// A caller-supplied argument was rejected (oversize key, bad flag
    /// combination, out-of-range index, mutation of a read-only handle).
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// An allocation or capacity limit was exceeded.
    #[error("no memory: {0}")]
    NoMemory(String),

    /// An OS call failed.
    #[error("syscall error '{op}' ({source})")]
    Syscall {
        /// The operation or path the call was made on behalf of.
        op: String,
        #[source]
        source: std::io::Error,
    },

    /// A persistent file failed validation on open.
    #[error("corrupt file {path}: {detail}")]
    FileCorrupt {
        /// File that failed validation.
        path: PathBuf,
        /// Diagnostic, including any observed magic bytes.
        detail: String,
    },

    /// A named object or key was required to exist and did not.
    #[error("not found: {0}")]
    NotFound(String),

    /// A named object or key was required to be absent and was not.
    #[error("already exists: {0}")]
    AlreadyExists(String),

    /// An internal invariant was violated.
    #[error("internal error: {0}")]
    Internal(String),
}

impl QuernError {
    /// Build an [`QuernError::InvalidArgument`] from any message.
    pub fn invalid_argument(message: impl Into<String>) -> Self {
        Self::InvalidArgument(message.into())
    }

    /// Build an [`QuernError::Internal`] from any message.
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal(message.into())
    }

    /// Wrap an [`std::io::Error`] with the operation it interrupted.
    pub fn syscall(op: impl Into<String>, source: std::io::Error) -> Self {
        Self::Syscall {
            op: op.into(),
            source,
        }
    }

    /// True when the error is the benign end-of-iteration signal.
    #[must_use]
    pub const fn is_end_of_data(&self) -> bool {
        matches!(self, Self::EndOfData)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn syscall_display_carries_operation_and_source() {
        let err = QuernError::syscall(
            "open 'lexicon'",
            std::io::Error::new(std::io::ErrorKind::NotFound, "no such file"),
        );
        assert_eq!(err.to_string(), "syscall error 'open 'lexicon'' (no such file)");
    }

    #[test]
    fn end_of_data_is_distinguishable() {
        assert!(QuernError::EndOfData.is_end_of_data());
        assert!(!QuernError::internal("boom").is_end_of_data());
    }
}
