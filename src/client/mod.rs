//! Storage client seam
//!
//! The file adapter talks to remote storage only through the traits in this
//! module. A `StorageClient` opens sessions; a `PosixSession` exposes the
//! POSIX-flavoured calls (read, vectored read, seek, close) against one
//! remote file. Return values follow the POSIX convention of signed counts so
//! that callers can tell end-of-file (zero) apart from failure.

pub mod dav;
pub(crate) mod multipart;

use std::fmt;
use std::sync::atomic::{AtomicU8, Ordering};

use async_trait::async_trait;
use thiserror::Error;

use crate::params::RequestParams;

pub use dav::DavClient;

/// Status attached to every client error
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientStatus {
    /// Remote endpoint answered with this HTTP status
    Http(u16),
    /// Connection could not be established or was dropped
    Connection,
    /// Transport timed out
    Timeout,
    /// Client credential could not be loaded or was rejected
    Authentication,
    /// Request could not be formed (bad URL, unsupported flags, bad offset)
    InvalidArgument,
    /// Response did not match the request (malformed range reply)
    Protocol,
    /// Client was shut down before the call
    Shutdown,
}

impl fmt::Display for ClientStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ClientStatus::Http(code) => write!(f, "HTTP {}", code),
            ClientStatus::Connection => write!(f, "connection error"),
            ClientStatus::Timeout => write!(f, "timeout"),
            ClientStatus::Authentication => write!(f, "authentication error"),
            ClientStatus::InvalidArgument => write!(f, "invalid argument"),
            ClientStatus::Protocol => write!(f, "protocol error"),
            ClientStatus::Shutdown => write!(f, "client shut down"),
        }
    }
}

/// Error reported by the storage client
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{message} ({status})")]
pub struct ClientError {
    pub status: ClientStatus,
    pub message: String,
}

impl ClientError {
    pub fn new(status: ClientStatus, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
        }
    }

    pub fn invalid_argument(message: impl Into<String>) -> Self {
        Self::new(ClientStatus::InvalidArgument, message)
    }

    pub fn protocol(message: impl Into<String>) -> Self {
        Self::new(ClientStatus::Protocol, message)
    }
}

impl From<reqwest::Error> for ClientError {
    fn from(e: reqwest::Error) -> Self {
        let status = if e.is_timeout() {
            ClientStatus::Timeout
        } else if let Some(code) = e.status() {
            ClientStatus::Http(code.as_u16())
        } else if e.is_connect() {
            ClientStatus::Connection
        } else if e.is_builder() {
            ClientStatus::InvalidArgument
        } else {
            ClientStatus::Connection
        };
        ClientError::new(status, e.to_string())
    }
}

/// Access mode requested from the client. Remote files are never writable.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccessMode {
    ReadOnly,
}

/// Seek origin understood by the client
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Whence {
    Set,
    Current,
    End,
}

/// Access pattern hint
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Advice {
    #[default]
    Normal,
    Sequential,
    Random,
}

/// One entry of a vectored read.
///
/// Descriptors without an offset are laid out back to back starting at the
/// session's current position.
#[derive(Debug)]
pub struct ReadDescriptor<'a> {
    pub offset: Option<u64>,
    pub buf: &'a mut [u8],
}

impl<'a> ReadDescriptor<'a> {
    pub fn new(buf: &'a mut [u8]) -> Self {
        Self { offset: None, buf }
    }

    pub fn at(offset: u64, buf: &'a mut [u8]) -> Self {
        Self {
            offset: Some(offset),
            buf,
        }
    }

    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }
}

/// An open remote file
#[async_trait]
pub trait PosixSession: Send {
    /// Record an access pattern hint for `len` bytes at `offset`
    fn advise(&mut self, offset: u64, len: usize, advice: Advice);

    /// Read into `buf` at the current position, advancing it.
    ///
    /// Returns the number of bytes read; zero means end of file.
    async fn read(&mut self, buf: &mut [u8]) -> Result<isize, ClientError>;

    /// Fill every descriptor in one call.
    ///
    /// Returns the number of bytes transferred; zero means every descriptor
    /// lies past end of file.
    async fn pread_vec(&mut self, descriptors: &mut [ReadDescriptor<'_>])
        -> Result<isize, ClientError>;

    /// Move the current position; returns the new absolute offset
    async fn lseek(&mut self, offset: i64, whence: Whence) -> Result<i64, ClientError>;

    /// Release the session
    async fn close(self: Box<Self>) -> Result<(), ClientError>;
}

/// Factory for sessions, shared by every open file
#[async_trait]
pub trait StorageClient: Send + Sync {
    /// Open `url` for the given access mode
    async fn open(
        &self,
        params: &RequestParams,
        url: &str,
        mode: AccessMode,
    ) -> Result<Box<dyn PosixSession>, ClientError>;

    /// Release resources held across sessions
    fn shutdown(&self) {}
}

// =============================================================================
// Client log level
// =============================================================================

/// Verbosity of the client's own diagnostics
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default)]
#[repr(u8)]
pub enum ClientLogLevel {
    #[default]
    Silent = 0,
    Warning = 1,
    Verbose = 2,
    Debug = 3,
    All = 4,
}

impl ClientLogLevel {
    fn from_u8(v: u8) -> Self {
        match v {
            0 => ClientLogLevel::Silent,
            1 => ClientLogLevel::Warning,
            2 => ClientLogLevel::Verbose,
            3 => ClientLogLevel::Debug,
            _ => ClientLogLevel::All,
        }
    }
}

static CLIENT_LOG_LEVEL: AtomicU8 = AtomicU8::new(ClientLogLevel::Silent as u8);

/// Set the process-wide client verbosity
pub fn set_log_level(level: ClientLogLevel) {
    CLIENT_LOG_LEVEL.store(level as u8, Ordering::Relaxed);
}

pub fn log_level() -> ClientLogLevel {
    ClientLogLevel::from_u8(CLIENT_LOG_LEVEL.load(Ordering::Relaxed))
}

/// Whether the client should emit diagnostics at `level`
pub fn log_enabled(level: ClientLogLevel) -> bool {
    level != ClientLogLevel::Silent && log_level() >= level
}
