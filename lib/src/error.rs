use std::io;

use thiserror::Error;

/// Classification of an import failure.
///
/// The importer reports only the kind of failure. The detail is logged at the
/// point of detection.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash, Error)]
pub enum ImportError {
    /// Missing or unreadable file, bad magic bytes or an unsupported encoding.
    #[error("file could not be read as a .X file")]
    FileError,
    /// Structural or consistency violation in the file contents.
    #[error("invalid .X data")]
    InvalidData,
    /// An output buffer could not be allocated.
    #[error("out of system memory")]
    OutOfSystemMemory,
    /// Unexpected failure unrelated to the data itself.
    #[error("system failure")]
    SystemFailure,
}

impl From<io::Error> for ImportError {
    fn from(e: io::Error) -> Self {
        log::warn!("Truncated data: {e}");
        ImportError::InvalidData
    }
}

impl From<binrw::Error> for ImportError {
    fn from(e: binrw::Error) -> Self {
        log::warn!("Malformed record: {e}");
        ImportError::InvalidData
    }
}

/// Logs the message and returns [`ImportError::InvalidData`].
#[macro_export]
macro_rules! bail_data {
    ($($arg:tt)+) => {{
        ::log::warn!($($arg)+);
        return Err($crate::error::ImportError::InvalidData);
    }};
}

/// Like `anyhow::ensure!`, but yields [`ImportError::InvalidData`].
#[macro_export]
macro_rules! ensure_data {
    ($cond:expr, $($arg:tt)+) => {
        if !$cond {
            $crate::bail_data!($($arg)+);
        }
    };
}
