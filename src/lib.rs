//! davix-adapter: POSIX-like reads over remote HTTP/WebDAV grid storage
//!
//! This library opens files on grid storage endpoints (`http`, `https`,
//! `dav`, `davs` URLs) and reads them through a synchronous, file-like
//! interface, authenticating with X.509 proxy or certificate credentials.
//!
//! # Architecture
//!
//! - **File adapter** ([`file::DavFile`]): open / read / vectored read /
//!   positioned vectored read / position / close. Writes and resizes are
//!   rejected.
//! - **Context** ([`context::Context`]): the storage client shared by every
//!   open file, plus the runtime that drives it.
//! - **Storage client** ([`client`]): the session traits the adapter talks
//!   to, and [`client::DavClient`], which implements them with HTTP range
//!   requests.
//! - **Credentials** ([`auth`]): X.509 discovery from proxy, certificate and
//!   key locations, loaded only when a TLS session asks for them.
//! - **Configuration** ([`config`], [`env`], [`log_level`]): settings read
//!   once from the environment or a YAML file.
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use davix_adapter::config::AdapterConfig;
//! use davix_adapter::context::Context;
//! use davix_adapter::file::{DavFile, OpenFlags};
//!
//! # fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let config = Arc::new(AdapterConfig::from_env());
//! let context = Context::global()?.clone();
//!
//! let mut file = DavFile::open(context, config, "https://host/store/data.root", OpenFlags::READ)?;
//! let mut buf = vec![0u8; 1024];
//! let n = file.read(&mut buf)?;
//! println!("read {} bytes", n);
//! # Ok(())
//! # }
//! ```

pub mod auth;
pub mod client;
pub mod config;
pub mod context;
pub mod env;
pub mod error;
pub mod file;
pub mod log_level;
pub mod params;

pub use error::{FileError, FileErrorKind, Result};
