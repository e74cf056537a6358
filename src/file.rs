//! POSIX-like file adapter over a remote storage session
//!
//! [`DavFile`] gives synchronous, blocking `read`, vectored `readv`,
//! positioned `readv_at` and `position` calls against a file opened through
//! the [`StorageClient`](crate::client::StorageClient) of a [`Context`].
//! Writes and resizes are not supported.
//!
//! ```no_run
//! use std::sync::Arc;
//! use davix_adapter::config::AdapterConfig;
//! use davix_adapter::context::Context;
//! use davix_adapter::file::{DavFile, IoPosBuffer, OpenFlags};
//!
//! # fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let config = Arc::new(AdapterConfig::from_env());
//! let context = Context::global()?.clone();
//! let mut file = DavFile::open(context, config, "davs://eos.example.org/store/f.root", OpenFlags::READ)?;
//!
//! let mut header = [0u8; 64];
//! let mut trailer = [0u8; 64];
//! file.readv_at(&mut [
//!     IoPosBuffer::new(0, &mut header),
//!     IoPosBuffer::new(4096, &mut trailer),
//! ])?;
//! file.close();
//! # Ok(())
//! # }
//! ```

use std::io::IoSliceMut;
use std::sync::Arc;

use bitflags::bitflags;
use tracing::{debug, warn};

use crate::client::{AccessMode, Advice, ClientError, PosixSession, ReadDescriptor, Whence};
use crate::config::AdapterConfig;
use crate::context::Context;
use crate::error::{FileError, Result};
use crate::log_level::configure_client_log_level;
use crate::params::RequestParams;

bitflags! {
    /// Generic open flags
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct OpenFlags: u32 {
        const READ = 1;
        const WRITE = 1 << 1;
        const CREATE = 1 << 2;
        const EXCLUSIVE = 1 << 3;
        const TRUNCATE = 1 << 4;
        const APPEND = 1 << 5;
        const NONBLOCK = 1 << 6;
    }
}

impl Default for OpenFlags {
    fn default() -> Self {
        OpenFlags::READ
    }
}

/// Permission bits used when none are given. Not enforced on remote reads.
pub const DEFAULT_PERMS: u32 = 0o066;

/// Origin for [`DavFile::position`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Relative {
    Set,
    Current,
    End,
}

impl Relative {
    fn to_client(self) -> Whence {
        match self {
            Relative::Set => Whence::Set,
            Relative::Current => Whence::Current,
            Relative::End => Whence::End,
        }
    }
}

/// A C `whence` value that is not `SEEK_SET`, `SEEK_CUR` or `SEEK_END`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InvalidWhence(pub i32);

impl TryFrom<i32> for Relative {
    type Error = InvalidWhence;

    fn try_from(whence: i32) -> std::result::Result<Self, Self::Error> {
        match whence {
            libc::SEEK_SET => Ok(Relative::Set),
            libc::SEEK_CUR => Ok(Relative::Current),
            libc::SEEK_END => Ok(Relative::End),
            other => Err(InvalidWhence(other)),
        }
    }
}

/// Destination buffer bound to an absolute file offset
#[derive(Debug)]
pub struct IoPosBuffer<'a> {
    offset: u64,
    data: &'a mut [u8],
}

impl<'a> IoPosBuffer<'a> {
    pub fn new(offset: u64, data: &'a mut [u8]) -> Self {
        Self { offset, data }
    }

    pub fn offset(&self) -> u64 {
        self.offset
    }

    pub fn size(&self) -> usize {
        self.data.len()
    }

    pub fn data(&self) -> &[u8] {
        &self.data[..]
    }
}

/// Translate generic flags into the access mode the client understands
fn client_access_mode(flags: OpenFlags) -> AccessMode {
    debug_assert!(flags.contains(OpenFlags::READ));
    AccessMode::ReadOnly
}

/// A file on remote storage.
///
/// Holds at most one client session, released exactly once by
/// [`close`](Self::close), [`abort`](Self::abort) or drop.
///
/// All operations block on the context runtime, so they must not be called
/// from async code. Dropping a file inside an async runtime is allowed: the
/// session is then discarded without the client's close call.
pub struct DavFile {
    context: Context,
    config: Arc<AdapterConfig>,
    name: String,
    flags: OpenFlags,
    session: Option<Box<dyn PosixSession>>,
}

impl DavFile {
    /// An adapter with no file open
    pub fn new(context: Context, config: Arc<AdapterConfig>) -> Self {
        Self {
            context,
            config,
            name: String::new(),
            flags: OpenFlags::empty(),
            session: None,
        }
    }

    /// Open `name` with `flags` and the default permissions
    pub fn open(
        context: Context,
        config: Arc<AdapterConfig>,
        name: &str,
        flags: OpenFlags,
    ) -> Result<Self> {
        let mut file = Self::new(context, config);
        file.open_path(name, flags, DEFAULT_PERMS)?;
        Ok(file)
    }

    /// Open `name` on this adapter, closing any file already open.
    ///
    /// `flags` must include [`OpenFlags::READ`]. `perms` is accepted for
    /// interface symmetry and ignored.
    pub fn open_path(&mut self, name: &str, flags: OpenFlags, _perms: u32) -> Result<()> {
        if name.is_empty() {
            return Err(FileError::open_usage(name, "Cannot open a file without name"));
        }
        if !flags.contains(OpenFlags::READ) {
            return Err(FileError::open_usage(
                name,
                format!("Must open file '{}' at least for read", name),
            ));
        }

        if self.session.is_some() {
            debug!("reopening: closing {} before opening {}", self.name, name);
            self.close();
        }

        configure_client_log_level(&self.config);

        let params = RequestParams::for_open(&self.config);
        let client = self
            .context
            .client()
            .map_err(|e| FileError::open_failed(name, &e))?;
        let mode = client_access_mode(flags);

        let session = self
            .context
            .block_on(client.open(&params, name, mode))
            .map_err(|e| FileError::open_failed(name, &e))?;

        debug!("opened {} with flags {:?}", name, flags);
        self.session = Some(session);
        self.name = name.to_string();
        self.flags = flags;
        Ok(())
    }

    /// Open `name` for create + write + truncate (+ exclusive).
    ///
    /// Remote files are read-only and these flags lack
    /// [`OpenFlags::READ`], so this always fails in `open`.
    pub fn create(&mut self, name: &str, exclusive: bool, perms: u32) -> Result<()> {
        let mut flags = OpenFlags::CREATE | OpenFlags::WRITE | OpenFlags::TRUNCATE;
        if exclusive {
            flags |= OpenFlags::EXCLUSIVE;
        }
        self.open_path(name, flags, perms)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn flags(&self) -> OpenFlags {
        self.flags
    }

    pub fn is_open(&self) -> bool {
        self.session.is_some()
    }

    /// Release the session, if any. Client errors are logged, not returned.
    pub fn close(&mut self) {
        self.release("close");
    }

    /// Release the session without flushing. Behaves like [`close`](Self::close).
    pub fn abort(&mut self) {
        self.release("abort");
    }

    fn release(&mut self, operation: &str) {
        let Some(session) = self.session.take() else {
            return;
        };
        if tokio::runtime::Handle::try_current().is_ok() {
            debug!(
                "Davix::{}(name='{}') inside an async runtime; discarding the session",
                operation, self.name
            );
            return;
        }
        if let Err(e) = self.context.block_on(session.close()) {
            warn!(
                "Davix::{}(name='{}') failed with error '{}' and error code {}",
                operation, self.name, e.message, e.status
            );
        }
    }

    fn not_open(name: &str, operation: &'static str, requested: usize) -> FileError {
        FileError::Read {
            name: name.to_string(),
            operation,
            message: format!(
                "Davix::{}(name='{}') called on a file that is not open",
                operation, name
            ),
            status: None,
            requested,
        }
    }

    fn read_failed(
        name: &str,
        operation: &'static str,
        requested: usize,
        result: std::result::Result<isize, ClientError>,
    ) -> FileError {
        let (message, status) = match result {
            Err(e) => (
                format!(
                    "Davix::{}(name='{}', n={}) failed with error '{}' and error code {}",
                    operation, name, requested, e.message, e.status
                ),
                Some(e.status),
            ),
            Ok(s) => (
                format!(
                    "Davix::{}(name='{}', n={}) failed and call returned {}",
                    operation, name, requested, s
                ),
                None,
            ),
        };
        FileError::Read {
            name: name.to_string(),
            operation,
            message,
            status,
            requested,
        }
    }

    /// Read up to `into.len()` bytes at the current position.
    ///
    /// Keeps reading until the buffer is full or the client reports end of
    /// file. Returns the number of bytes read.
    pub fn read(&mut self, into: &mut [u8]) -> Result<usize> {
        let n = into.len();
        let Self {
            context,
            name,
            session,
            ..
        } = self;
        let Some(session) = session.as_mut() else {
            return Err(Self::not_open(name, "read", n));
        };

        session.advise(0, n, Advice::Random);

        let mut done = 0;
        while done < n {
            let remaining = n - done;
            match context.block_on(session.read(&mut into[done..])) {
                Ok(0) => break,
                Ok(s) if s > 0 => done += (s as usize).min(remaining),
                result => return Err(Self::read_failed(name, "read", remaining, result)),
            }
        }
        Ok(done)
    }

    /// Scatter read into `into` from the current position in one client call.
    ///
    /// Returns the total size of the buffers.
    pub fn readv(&mut self, into: &mut [IoSliceMut<'_>]) -> Result<usize> {
        if into.is_empty() {
            return Ok(0);
        }
        let count = into.len();
        if self.session.is_none() {
            return Err(Self::not_open(&self.name, "readv", count));
        }

        let mut total = 0;
        let mut descriptors: Vec<ReadDescriptor<'_>> = into
            .iter_mut()
            .map(|buf| {
                total += buf.len();
                ReadDescriptor::new(&mut buf[..])
            })
            .collect();

        match self.pread_vec(&mut descriptors) {
            Ok(s) if s >= 0 => Ok(total),
            result => Err(Self::read_failed(&self.name, "readv", count, result)),
        }
    }

    /// Scatter read with an explicit offset per buffer, in one client call.
    ///
    /// Returns the total size of the buffers, or zero at end of file.
    pub fn readv_at(&mut self, into: &mut [IoPosBuffer<'_>]) -> Result<usize> {
        if into.is_empty() {
            return Ok(0);
        }
        let count = into.len();
        if self.session.is_none() {
            return Err(Self::not_open(&self.name, "readv", count));
        }

        let mut total = 0;
        let mut descriptors: Vec<ReadDescriptor<'_>> = into
            .iter_mut()
            .map(|buf| {
                total += buf.data.len();
                ReadDescriptor::at(buf.offset, &mut buf.data[..])
            })
            .collect();

        match self.pread_vec(&mut descriptors) {
            Ok(0) => Ok(0),
            Ok(s) if s > 0 => Ok(total),
            result => Err(Self::read_failed(&self.name, "readv", count, result)),
        }
    }

    fn pread_vec(
        &mut self,
        descriptors: &mut [ReadDescriptor<'_>],
    ) -> std::result::Result<isize, ClientError> {
        let Self {
            context, session, ..
        } = self;
        match session.as_mut() {
            Some(session) => context.block_on(session.pread_vec(descriptors)),
            None => Ok(-1),
        }
    }

    /// Move the current position; returns the new absolute offset
    pub fn position(&mut self, offset: i64, whence: Relative) -> Result<i64> {
        let Self {
            context,
            name,
            session,
            ..
        } = self;
        let Some(session) = session.as_mut() else {
            return Err(FileError::Position {
                name: name.clone(),
                message: format!("Davix::lseek(name='{}') called on a file that is not open", name),
                status: None,
                offset,
            });
        };

        let (message, status) = match context.block_on(session.lseek(offset, whence.to_client())) {
            Ok(result) if result >= 0 => return Ok(result),
            Ok(result) => (
                format!(
                    "Davix::lseek(name='{}', offset={}, whence={:?}) failed and call returned {}",
                    name, offset, whence, result
                ),
                None,
            ),
            Err(e) => (
                format!(
                    "Davix::lseek(name='{}', offset={}, whence={:?}) failed with error '{}' and error code {}",
                    name, offset, whence, e.message, e.status
                ),
                Some(e.status),
            ),
        };

        Err(FileError::Position {
            name: name.clone(),
            message,
            status,
            offset,
        })
    }

    /// [`position`](Self::position) with a C `whence` value
    pub fn position_raw(&mut self, offset: i64, whence: i32) -> Result<i64> {
        let whence = Relative::try_from(whence).map_err(|InvalidWhence(w)| FileError::Position {
            name: self.name.clone(),
            message: format!(
                "DavFile::position() called with incorrect 'whence' parameter {}",
                w
            ),
            status: None,
            offset,
        })?;
        self.position(offset, whence)
    }

    /// Always fails: remote files are read-only
    pub fn write(&mut self, _from: &[u8]) -> Result<usize> {
        Err(FileError::WriteNotImplemented {
            name: self.name.clone(),
        })
    }

    /// Always fails: remote files are read-only
    pub fn resize(&mut self, _size: u64) -> Result<()> {
        Err(FileError::ResizeNotImplemented {
            name: self.name.clone(),
        })
    }
}

impl Drop for DavFile {
    fn drop(&mut self) {
        configure_client_log_level(&self.config);
        self.close();
    }
}

impl std::fmt::Debug for DavFile {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DavFile")
            .field("name", &self.name)
            .field("flags", &self.flags)
            .field("open", &self.is_open())
            .finish()
    }
}
