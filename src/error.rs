use std::path::PathBuf;
use thiserror::Error;

/// Errors that terminate a run.
///
/// Recoverable conditions (byte-mode score saturation during alignment) are
/// handled inside the aligner and never surface here. Worker threads send the
/// first fatal error over the pipeline result channel; the main thread tears
/// down and exits non-zero.
#[derive(Debug, Error)]
pub enum Error {
    #[error("invalid usage: {0}")]
    Usage(String),

    #[error("{}: {source}", path.display())]
    Io {
        path:   PathBuf,
        source: std::io::Error,
    },

    #[error("malformed reads file: {0}")]
    MalformedReads(String),

    #[error("read {id} is {len} nt, beyond the supported maximum of {max}; please report this input to the maintainers")]
    ReadTooLong { id: String, len: usize, max: usize },

    #[error("index file {} is corrupt: {reason}", file.display())]
    IndexIntegrity { file: PathBuf, reason: String },

    #[error("banded alignment buffer exceeded the signed 32-bit bound")]
    BandedOverflow,

    #[error("banded alignment traceback diverged from the recorded score")]
    TracebackDiverged,
}

pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// Attaches a path to a raw IO error.
    #[inline]
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Error::Io {
            path: path.into(),
            source,
        }
    }
}
