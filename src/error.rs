use std::fmt;
use std::io;
use std::sync::Arc;
use thiserror::Error;

/// Errors produced while indexing or reading a gzip stream.
///
/// The enum is `Clone` so the decoder can keep its terminal status sticky
/// and hand the same error back on every read after the first failure; the
/// underlying `io::Error` causes are shared behind `Arc` to make that
/// possible.
#[derive(Error, Debug, Clone)]
pub enum GzseekError {
    #[error("corrupt input before offset {0}")]
    CorruptInput(u64),

    #[error("internal error: {0}")]
    Internal(&'static str),

    #[error("read error at offset {offset}: {cause}")]
    Read { offset: u64, cause: Arc<io::Error> },

    #[error("invalid gzip checksum")]
    Checksum,

    #[error("invalid gzip header: {0}")]
    Header(String),

    #[error("invalid index file: {0}")]
    InvalidIndex(String),

    #[error("IO error: {0}")]
    Io(Arc<io::Error>),

    /// Normal end of the uncompressed stream. Non-fatal at the extract
    /// surface; `build_index` treats it as successful completion.
    #[error("end of stream")]
    Eof,
}

impl GzseekError {
    pub fn header<T: fmt::Display>(msg: T) -> Self {
        GzseekError::Header(msg.to_string())
    }

    pub fn invalid_index<T: fmt::Display>(msg: T) -> Self {
        GzseekError::InvalidIndex(msg.to_string())
    }

    pub(crate) fn read_at(offset: u64, cause: io::Error) -> Self {
        GzseekError::Read {
            offset,
            cause: Arc::new(cause),
        }
    }

    /// True for the normal end-of-stream status.
    pub fn is_eof(&self) -> bool {
        matches!(self, GzseekError::Eof)
    }
}

impl From<io::Error> for GzseekError {
    fn from(err: io::Error) -> Self {
        GzseekError::Io(Arc::new(err))
    }
}

pub type GzseekResult<T> = Result<T, GzseekError>;
