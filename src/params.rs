//! Per-open request parameters

use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::auth::{CertificateProvider, X509Resolver};
use crate::config::{AdapterConfig, ClientConfig, DEFAULT_CERT_DIR};

/// Configuration bound to one open call.
///
/// Building parameters performs no I/O. The certificate provider is only
/// consulted once the client sets up a TLS session.
#[derive(Clone)]
pub struct RequestParams {
    cert_provider: Option<Arc<dyn CertificateProvider>>,
    ca_path: PathBuf,
    client: ClientConfig,
}

impl Default for RequestParams {
    fn default() -> Self {
        Self {
            cert_provider: None,
            ca_path: PathBuf::from(DEFAULT_CERT_DIR),
            client: ClientConfig::default(),
        }
    }
}

impl RequestParams {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parameters for opening a file under `config`: X.509 resolution as the
    /// client-certificate provider and the configured CA directory
    pub fn for_open(config: &AdapterConfig) -> Self {
        let mut params = Self::new();
        params.set_client_cert_provider(Arc::new(X509Resolver::new(config.x509.clone())));
        params.set_certificate_authority_path(config.x509.cert_dir_or_default());
        params.client = config.client.clone();
        params
    }

    pub fn set_client_cert_provider(&mut self, provider: Arc<dyn CertificateProvider>) {
        self.cert_provider = Some(provider);
    }

    pub fn set_certificate_authority_path(&mut self, path: impl Into<PathBuf>) {
        self.ca_path = path.into();
    }

    pub fn cert_provider(&self) -> Option<&Arc<dyn CertificateProvider>> {
        self.cert_provider.as_ref()
    }

    pub fn ca_path(&self) -> &Path {
        &self.ca_path
    }

    pub fn client_config(&self) -> &ClientConfig {
        &self.client
    }
}

impl std::fmt::Debug for RequestParams {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RequestParams")
            .field("cert_provider", &self.cert_provider.is_some())
            .field("ca_path", &self.ca_path)
            .field("client", &self.client)
            .finish()
    }
}
