use thiserror::Error;

use crate::client::{ClientError, ClientStatus};

/// Which adapter operation an error came from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileErrorKind {
    Open,
    Read,
    Position,
    Write,
    Resize,
}

/// Error surface of the file adapter.
///
/// Every variant names the file it concerns. Errors raised after a call into
/// the storage client also carry the client's status, when it reported one.
#[derive(Error, Debug)]
pub enum FileError {
    #[error("FileOpenError: {message} (calling DavFile::open())")]
    Open {
        name: String,
        message: String,
        status: Option<ClientStatus>,
    },

    #[error("FileReadError: {message} (calling DavFile::{operation}())")]
    Read {
        name: String,
        operation: &'static str,
        message: String,
        status: Option<ClientStatus>,
        /// Bytes (or buffers, for vectored reads) requested by the failing call
        requested: usize,
    },

    #[error("FilePositionError: {message} (calling DavFile::position())")]
    Position {
        name: String,
        message: String,
        status: Option<ClientStatus>,
        offset: i64,
    },

    #[error("FileWriteError: DavFile::write(name='{name}') not implemented")]
    WriteNotImplemented { name: String },

    #[error("FileResizeError: DavFile::resize(name='{name}') not implemented")]
    ResizeNotImplemented { name: String },
}

impl FileError {
    /// Usage error raised by `open` before any remote call
    pub(crate) fn open_usage(name: &str, message: impl Into<String>) -> Self {
        FileError::Open {
            name: name.to_string(),
            message: message.into(),
            status: None,
        }
    }

    pub(crate) fn open_failed(name: &str, err: &ClientError) -> Self {
        FileError::Open {
            name: name.to_string(),
            message: format!(
                "Davix::open(name='{}') failed with error '{}' and error code {}",
                name, err.message, err.status
            ),
            status: Some(err.status),
        }
    }

    pub fn kind(&self) -> FileErrorKind {
        match self {
            FileError::Open { .. } => FileErrorKind::Open,
            FileError::Read { .. } => FileErrorKind::Read,
            FileError::Position { .. } => FileErrorKind::Position,
            FileError::WriteNotImplemented { .. } => FileErrorKind::Write,
            FileError::ResizeNotImplemented { .. } => FileErrorKind::Resize,
        }
    }

    /// Name of the file the failing operation was issued against
    pub fn file_name(&self) -> &str {
        match self {
            FileError::Open { name, .. }
            | FileError::Read { name, .. }
            | FileError::Position { name, .. }
            | FileError::WriteNotImplemented { name }
            | FileError::ResizeNotImplemented { name } => name,
        }
    }

    /// Status reported by the storage client, if the error came from it
    pub fn status(&self) -> Option<ClientStatus> {
        match self {
            FileError::Open { status, .. }
            | FileError::Read { status, .. }
            | FileError::Position { status, .. } => *status,
            FileError::WriteNotImplemented { .. } | FileError::ResizeNotImplemented { .. } => None,
        }
    }
}

/// Result type alias for adapter operations
pub type Result<T> = std::result::Result<T, FileError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_open_failed_carries_client_status() {
        let err = ClientError::new(ClientStatus::Http(404), "not found");
        let e = FileError::open_failed("https://host/f", &err);
        assert_eq!(e.kind(), FileErrorKind::Open);
        assert_eq!(e.status(), Some(ClientStatus::Http(404)));
        assert_eq!(e.file_name(), "https://host/f");
        assert!(e.to_string().contains("not found"));
        assert!(e.to_string().contains("DavFile::open()"));
    }

    #[test]
    fn test_not_implemented_variants_have_no_status() {
        let w = FileError::WriteNotImplemented {
            name: "f".to_string(),
        };
        let r = FileError::ResizeNotImplemented {
            name: "f".to_string(),
        };
        assert_eq!(w.kind(), FileErrorKind::Write);
        assert_eq!(r.kind(), FileErrorKind::Resize);
        assert!(w.status().is_none());
        assert!(r.to_string().contains("not implemented"));
    }
}
