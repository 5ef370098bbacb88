//! Error taxonomy for the CAS engine and mutator.
//!
//! Every public operation returns [`Result<T>`], whose [`Error`] variants
//! are the abstract error kinds the spec requires callers be able to match
//! on programmatically, rather than an opaque `anyhow::Error`.

use std::fmt;
use std::io;

use crate::digest::Digest;

/// Crate-wide result alias.
pub type Result<T> = std::result::Result<T, Error>;

/// A distinct, programmatically matchable error kind.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// A requested digest or reference does not exist.
    #[error("not found: {0}")]
    NotFound(String),

    /// `Create` targeted a directory that already exists and is non-empty.
    #[error("already exists: {0}")]
    AlreadyExists(String),

    /// The layout marker, or one of the required subdirectories, is
    /// missing, malformed, or of the wrong type.
    #[error("invalid layout: {0}")]
    InvalidLayout(String),

    /// A malformed digest, an invalid reference name, or an operation
    /// that would leave the layers, history, and diff IDs inconsistent.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// A blob's computed digest differs from the key under which it is
    /// stored.
    #[error("digest mismatch: expected {expected}, found {found}")]
    DigestMismatch { expected: Digest, found: Digest },

    /// A write was attempted against a read-only store.
    #[error("store is read-only")]
    ReadOnly,

    /// The ambient cancellation token fired.
    #[error("operation cancelled")]
    Cancelled,

    /// A filesystem or stream failure, with a short description of what
    /// was being attempted.
    #[error("{context}: {source}")]
    Io {
        context: String,
        #[source]
        source: io::Error,
    },
}

impl Error {
    pub fn not_found(what: impl fmt::Display) -> Self {
        Self::NotFound(what.to_string())
    }

    pub fn already_exists(what: impl fmt::Display) -> Self {
        Self::AlreadyExists(what.to_string())
    }

    pub fn invalid_layout(why: impl fmt::Display) -> Self {
        Self::InvalidLayout(why.to_string())
    }

    pub fn invalid_argument(why: impl fmt::Display) -> Self {
        Self::InvalidArgument(why.to_string())
    }

    pub fn io(context: impl fmt::Display, source: io::Error) -> Self {
        if is_read_only_error(&source) {
            return Self::ReadOnly;
        }
        Self::Io {
            context: context.to_string(),
            source,
        }
    }

    /// True for [`Error::NotFound`] — used by the idempotent-delete paths.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_))
    }
}

/// EROFS, checked by raw OS error code since `io::ErrorKind::ReadOnlyFilesystem`
/// is not yet stable.
const EROFS: i32 = 30;

fn is_read_only_error(e: &io::Error) -> bool {
    e.kind() == io::ErrorKind::PermissionDenied || e.raw_os_error() == Some(EROFS)
}

impl From<io::Error> for Error {
    fn from(source: io::Error) -> Self {
        Error::io("io", source)
    }
}

/// Extension trait for attaching a short context string to an [`io::Result`]
/// while converting it into our own typed [`Error`].
pub(crate) trait IoResultExt<T> {
    fn ctx(self, context: impl fmt::Display) -> Result<T>;
}

impl<T> IoResultExt<T> for io::Result<T> {
    fn ctx(self, context: impl fmt::Display) -> Result<T> {
        self.map_err(|e| Error::io(context, e))
    }
}

/// Extension trait for mapping `serde_json` decode failures onto our error
/// taxonomy. Decode failures are treated as a wrapped I/O-adjacent failure:
/// the bytes we read were not what we expected.
pub(crate) trait JsonResultExt<T> {
    fn ctx(self, context: impl fmt::Display) -> Result<T>;
}

impl<T> JsonResultExt<T> for std::result::Result<T, serde_json::Error> {
    fn ctx(self, context: impl fmt::Display) -> Result<T> {
        self.map_err(|e| Error::Io {
            context: context.to_string(),
            source: io::Error::new(io::ErrorKind::InvalidData, e),
        })
    }
}
