//! Error types for war-classpath operations.
//!
//! Every stage of the pipeline returns a typed result. Failures that the
//! original shell-driven flow would only have noticed later (an archive tool
//! that silently did nothing, a missing sidecar file) get their own kinds so
//! callers can tell a degraded output from an empty one.

use std::path::PathBuf;
use thiserror::Error;

/// Result type for war-classpath operations.
pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    /// A file system entry could not be read or written.
    #[error("I/O error at {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Directory traversal failed while indexing.
    #[error("walk error: {0}")]
    Walk(#[from] ignore::Error),

    #[error("failed to extract {}: {reason}", archive.display())]
    ExtractionFailed { archive: PathBuf, reason: String },

    #[error("failed to pack {} into {}: {reason}", dir.display(), archive.display())]
    PackingFailed {
        dir: PathBuf,
        archive: PathBuf,
        reason: String,
    },

    /// The qualified name of a class file could not be determined.
    #[error("cannot resolve class name of {}: {reason}", class_file.display())]
    NameResolutionFailed { class_file: PathBuf, reason: String },

    /// Two different class files map to the same canonical path.
    #[error(
        "class path collision at {}: kept {}, rejected {}",
        destination.display(),
        kept.display(),
        rejected.display()
    )]
    ClassPathCollision {
        destination: PathBuf,
        kept: PathBuf,
        rejected: PathBuf,
    },

    /// A function specifier without a class-qualifying separator.
    #[error("malformed function specifier: {0:?}")]
    MalformedSpecifier(String),

    #[error("manifest error at {}: {source}", path.display())]
    Manifest {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    /// Persistent resolution cache failure.
    #[error("cache error: {0}")]
    Cache(String),

    #[error("configuration error: {0}")]
    Config(String),
}

impl Error {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}

impl From<heed::Error> for Error {
    fn from(err: heed::Error) -> Self {
        Self::Cache(err.to_string())
    }
}

/// Attaches a path to `std::io` results.
pub(crate) trait IoResultExt<T> {
    fn at(self, path: &std::path::Path) -> Result<T>;
}

impl<T> IoResultExt<T> for std::io::Result<T> {
    fn at(self, path: &std::path::Path) -> Result<T> {
        self.map_err(|e| Error::io(path, e))
    }
}
