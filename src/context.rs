//! Connection context shared by every open file
//!
//! A [`Context`] owns the storage client and a dedicated tokio runtime used
//! to drive it from synchronous callers. Contexts are cheap to clone; all
//! clones refer to the same client. [`Context::global`] hands out a
//! process-wide instance built on first use.

use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use once_cell::sync::OnceCell;
use parking_lot::RwLock;
use tracing::{debug, info};

use crate::client::{ClientError, ClientStatus, DavClient, StorageClient};

/// Worker threads for the context runtime
const RUNTIME_WORKERS: usize = 2;

static GLOBAL_CONTEXT: OnceCell<Context> = OnceCell::new();

struct Inner {
    client: RwLock<Option<Arc<dyn StorageClient>>>,
    runtime: tokio::runtime::Runtime,
    shut_down: AtomicBool,
}

/// Handle to a storage client shared across files.
///
/// Dropping the last handle shuts the runtime down, which must happen
/// outside async code.
#[derive(Clone)]
pub struct Context {
    inner: Arc<Inner>,
}

impl Context {
    /// Create a context around `client`
    pub fn new(client: Arc<dyn StorageClient>) -> std::io::Result<Self> {
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(RUNTIME_WORKERS)
            .thread_name("davix-context")
            .enable_all()
            .build()?;

        debug!("created storage client context");

        Ok(Self {
            inner: Arc::new(Inner {
                client: RwLock::new(Some(client)),
                runtime,
                shut_down: AtomicBool::new(false),
            }),
        })
    }

    /// Process-wide context backed by [`DavClient`].
    ///
    /// Concurrent first calls construct exactly one instance.
    pub fn global() -> std::io::Result<&'static Context> {
        GLOBAL_CONTEXT.get_or_try_init(|| {
            info!("initialising process-wide storage client context");
            Context::new(Arc::new(DavClient::new()))
        })
    }

    /// The storage client, unless the context has been shut down
    pub fn client(&self) -> Result<Arc<dyn StorageClient>, ClientError> {
        self.inner.client.read().clone().ok_or_else(|| {
            ClientError::new(ClientStatus::Shutdown, "storage client context has been shut down")
        })
    }

    /// Drive `future` to completion on the context runtime.
    ///
    /// Must not be called from inside an async task.
    pub fn block_on<F: Future>(&self, future: F) -> F::Output {
        self.inner.runtime.block_on(future)
    }

    /// Release the storage client. Files opened afterwards fail; sessions
    /// that are already open keep working until closed. Calling this more
    /// than once has no further effect.
    pub fn shutdown(&self) {
        if self.inner.shut_down.swap(true, Ordering::SeqCst) {
            return;
        }
        if let Some(client) = self.inner.client.write().take() {
            info!("shutting down storage client context");
            client.shutdown();
        }
    }

    pub fn is_shut_down(&self) -> bool {
        self.inner.shut_down.load(Ordering::SeqCst)
    }

    /// Whether two handles refer to the same context
    pub fn same_as(&self, other: &Context) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl std::fmt::Debug for Context {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Context")
            .field("shut_down", &self.is_shut_down())
            .finish_non_exhaustive()
    }
}
