//! HTTP/WebDAV storage client
//!
//! Files are read with ranged `GET` requests. A vectored read becomes one
//! multi-range request per batch of descriptors. Batches are issued
//! concurrently and each may be answered as `multipart/byteranges`, a single
//! `206` range, or the whole file.

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;
use reqwest::header::{HeaderMap, CONTENT_LENGTH, CONTENT_RANGE, CONTENT_TYPE, RANGE};
use reqwest::{StatusCode, Url};
use rustls::client::ResolvesClientCert;
use rustls::pki_types::pem::PemObject;
use rustls::pki_types::CertificateDer;
use rustls::sign::CertifiedKey;
use rustls::{RootCertStore, SignatureScheme};
use tracing::{debug, trace, warn};

use super::multipart::{byteranges_boundary, parse_byteranges, parse_content_range, RangePart};
use super::{
    log_enabled, AccessMode, Advice, ClientError, ClientLogLevel, ClientStatus, PosixSession,
    ReadDescriptor, StorageClient, Whence,
};
use crate::auth::{CertificateProvider, SessionInfo};
use crate::params::RequestParams;

const USER_AGENT: &str = concat!("davix-adapter/", env!("CARGO_PKG_VERSION"));

/// Storage client speaking HTTP range requests
#[derive(Debug, Clone, Default)]
pub struct DavClient {}

impl DavClient {
    pub fn new() -> Self {
        Self::default()
    }
}

/// Map `dav://` and `davs://` onto HTTP schemes
pub(crate) fn normalize_url(url: &str) -> Result<Url, ClientError> {
    let (scheme, rest) = url
        .split_once("://")
        .ok_or_else(|| ClientError::invalid_argument(format!("invalid URL '{}'", url)))?;

    let http_scheme = match scheme.to_ascii_lowercase().as_str() {
        "http" | "dav" => "http",
        "https" | "davs" => "https",
        other => {
            return Err(ClientError::invalid_argument(format!(
                "unsupported URL scheme '{}' in '{}'",
                other, url
            )))
        }
    };

    Url::parse(&format!("{}://{}", http_scheme, rest))
        .map_err(|e| ClientError::invalid_argument(format!("invalid URL '{}': {}", url, e)))
}

fn status_error(operation: &str, url: &Url, status: StatusCode) -> ClientError {
    let reason = match status {
        StatusCode::NOT_FOUND => "file not found",
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => "permission denied",
        _ => status.canonical_reason().unwrap_or("request failed"),
    };
    ClientError::new(
        ClientStatus::Http(status.as_u16()),
        format!("{} {}: {}", operation, url, reason),
    )
}

fn header_str(headers: &HeaderMap, name: reqwest::header::HeaderName) -> Option<String> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
}

fn content_length(headers: &HeaderMap) -> Option<u64> {
    header_str(headers, CONTENT_LENGTH).and_then(|v| v.trim().parse().ok())
}

/// Copy the overlap of a segment starting at `seg_start` into `dst`, which
/// covers the file from `dst_offset`. Returns the number of bytes copied.
pub(crate) fn copy_segment(dst: &mut [u8], dst_offset: u64, seg_start: u64, seg: &[u8]) -> usize {
    let dst_end = dst_offset.saturating_add(dst.len() as u64);
    let seg_end = seg_start.saturating_add(seg.len() as u64);
    let start = dst_offset.max(seg_start);
    let end = dst_end.min(seg_end);
    if start >= end {
        return 0;
    }
    let n = (end - start) as usize;
    let d = (start - dst_offset) as usize;
    let s = (start - seg_start) as usize;
    dst[d..d + n].copy_from_slice(&seg[s..s + n]);
    n
}

/// `bytes=a-b,c-d` for the given (offset, len) pairs. Lengths must be non-zero
/// and each range must pass [`range_end`].
pub(crate) fn range_header(ranges: &[(u64, usize)]) -> String {
    let list: Vec<String> = ranges
        .iter()
        .map(|(offset, len)| format!("{}-{}", offset, offset + *len as u64 - 1))
        .collect();
    format!("bytes={}", list.join(","))
}

/// Trust roots found in the CA directory.
///
/// Files that hold no usable certificate (CRLs, signing policies) are
/// skipped. A missing directory yields an empty store.
fn load_ca_directory(dir: &Path) -> RootCertStore {
    let mut roots = RootCertStore::empty();
    let entries = match std::fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) => {
            debug!("CA directory {:?} not usable: {}", dir, e);
            return roots;
        }
    };

    for entry in entries.flatten() {
        let path = entry.path();
        if !path.is_file() {
            continue;
        }
        let Ok(content) = std::fs::read(&path) else {
            continue;
        };
        for der in CertificateDer::pem_slice_iter(&content).flatten() {
            if let Err(e) = roots.add(der) {
                trace!("skipping certificate in {:?}: {}", path, e);
            }
        }
    }

    debug!("loaded {} trust roots from {:?}", roots.len(), dir);
    roots
}

/// Answers a server's certificate request from a [`CertificateProvider`].
///
/// The provider runs only when the server asks, during the handshake. A
/// credential that cannot be loaded is remembered so the failed request is
/// reported as an authentication error.
pub(crate) struct ClientCertResolver {
    provider: Arc<dyn CertificateProvider>,
    info: SessionInfo,
    failure: Mutex<Option<String>>,
}

impl ClientCertResolver {
    pub(crate) fn new(provider: Arc<dyn CertificateProvider>, info: SessionInfo) -> Self {
        Self {
            provider,
            info,
            failure: Mutex::new(None),
        }
    }

    /// Why the last certificate request went unanswered, if it failed
    pub(crate) fn take_failure(&self) -> Option<String> {
        self.failure.lock().take()
    }

    fn fail(&self, message: String) -> Option<Arc<CertifiedKey>> {
        warn!("{}", message);
        *self.failure.lock() = Some(message);
        None
    }
}

impl std::fmt::Debug for ClientCertResolver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClientCertResolver")
            .field("url", &self.info.url)
            .finish_non_exhaustive()
    }
}

impl ResolvesClientCert for ClientCertResolver {
    fn resolve(
        &self,
        _root_hint_subjects: &[&[u8]],
        _sigschemes: &[SignatureScheme],
    ) -> Option<Arc<CertifiedKey>> {
        if log_enabled(ClientLogLevel::Verbose) {
            debug!("{} requested a client certificate", self.info.url);
        }
        match self.provider.client_certificate(&self.info) {
            Ok(Some(identity)) => match identity.certified_key() {
                Ok(key) => Some(Arc::new(key)),
                Err(e) => self.fail(format!(
                    "client certificate for {} is unusable: {}",
                    self.info.url, e
                )),
            },
            Ok(None) => None,
            Err(e) => self.fail(e.to_string()),
        }
    }

    fn has_certs(&self) -> bool {
        true
    }
}

/// HTTP client plus the certificate hook its TLS configuration uses
#[derive(Clone)]
struct Transport {
    http: reqwest::Client,
    certs: Option<Arc<ClientCertResolver>>,
}

impl Transport {
    /// Map a failed request, preferring a credential failure seen during
    /// the handshake
    fn error(&self, e: reqwest::Error) -> ClientError {
        match self.certs.as_ref().and_then(|c| c.take_failure()) {
            Some(message) => ClientError::new(ClientStatus::Authentication, message),
            None => e.into(),
        }
    }
}

fn build_transport(params: &RequestParams, url: &Url) -> Result<Transport, ClientError> {
    let builder = reqwest::Client::builder()
        .user_agent(USER_AGENT)
        .connect_timeout(params.client_config().connect_timeout);

    if url.scheme() != "https" {
        return Ok(Transport {
            http: builder.build()?,
            certs: None,
        });
    }

    let tls = rustls::ClientConfig::builder_with_provider(Arc::new(
        rustls::crypto::ring::default_provider(),
    ))
    .with_safe_default_protocol_versions()
    .map_err(|e| ClientError::protocol(format!("TLS setup for {} failed: {}", url, e)))?
    .with_root_certificates(load_ca_directory(params.ca_path()));

    let (tls, certs) = match params.cert_provider() {
        Some(provider) => {
            let info = SessionInfo::new(url.as_str(), url.host_str().map(str::to_string));
            let resolver = Arc::new(ClientCertResolver::new(provider.clone(), info));
            (tls.with_client_cert_resolver(resolver.clone()), Some(resolver))
        }
        None => (tls.with_no_client_auth(), None),
    };

    Ok(Transport {
        http: builder.use_preconfigured_tls(tls).build()?,
        certs,
    })
}

/// Byte just past `len` bytes at `offset`
fn range_end(offset: u64, len: usize) -> Result<u64, ClientError> {
    offset.checked_add(len as u64).ok_or_else(|| {
        ClientError::invalid_argument(format!(
            "read of {} bytes at offset {} runs past the largest file offset",
            len, offset
        ))
    })
}

#[async_trait]
impl StorageClient for DavClient {
    async fn open(
        &self,
        params: &RequestParams,
        url: &str,
        mode: AccessMode,
    ) -> Result<Box<dyn PosixSession>, ClientError> {
        let AccessMode::ReadOnly = mode;
        let url = normalize_url(url)?;
        let transport = build_transport(params, &url)?;

        let response = transport
            .http
            .head(url.clone())
            .send()
            .await
            .map_err(|e| transport.error(e))?;
        let status = response.status();
        if !status.is_success() {
            return Err(status_error("HEAD", &url, status));
        }
        let size = content_length(response.headers());

        if log_enabled(ClientLogLevel::Verbose) {
            debug!("opened {} (size {:?})", url, size);
        }

        Ok(Box::new(DavSession {
            transport,
            url,
            offset: 0,
            size,
            advice: Advice::default(),
            max_ranges: params.client_config().max_ranges_per_request.max(1),
        }))
    }
}

/// One open remote file
struct DavSession {
    transport: Transport,
    url: Url,
    offset: u64,
    size: Option<u64>,
    advice: Advice,
    max_ranges: usize,
}

impl DavSession {
    async fn remote_size(&mut self) -> Result<u64, ClientError> {
        if let Some(size) = self.size {
            return Ok(size);
        }
        let response = self
            .transport
            .http
            .head(self.url.clone())
            .send()
            .await
            .map_err(|e| self.transport.error(e))?;
        let status = response.status();
        if !status.is_success() {
            return Err(status_error("HEAD", &self.url, status));
        }
        let size = content_length(response.headers()).ok_or_else(|| {
            ClientError::protocol(format!("{} did not report its size", self.url))
        })?;
        self.size = Some(size);
        Ok(size)
    }
}

/// Segments returned by one multi-range request
struct Fetched {
    segments: Vec<RangePart>,
    size: Option<u64>,
}

/// Issue one `GET` covering all of `ranges`
async fn fetch_ranges(
    transport: &Transport,
    url: &Url,
    ranges: Vec<(u64, usize)>,
) -> Result<Fetched, ClientError> {
    let range = range_header(&ranges);
    if log_enabled(ClientLogLevel::Debug) {
        debug!("GET {} Range: {}", url, range);
    }

    let response = transport
        .http
        .get(url.clone())
        .header(RANGE, range)
        .send()
        .await
        .map_err(|e| transport.error(e))?;
    let status = response.status();
    let content_type = header_str(response.headers(), CONTENT_TYPE);
    let content_range = header_str(response.headers(), CONTENT_RANGE)
        .as_deref()
        .and_then(parse_content_range);

    match status {
        StatusCode::PARTIAL_CONTENT => {
            let body = response.bytes().await?;
            if let Some(boundary) = content_type.as_deref().and_then(byteranges_boundary) {
                return Ok(Fetched {
                    segments: parse_byteranges(&body, &boundary)?,
                    size: None,
                });
            }
            let range = content_range
                .ok_or_else(|| ClientError::protocol("206 response without Content-Range"))?;
            Ok(Fetched {
                segments: vec![RangePart {
                    start: range.first,
                    data: body,
                }],
                size: range.total,
            })
        }
        StatusCode::OK => {
            if log_enabled(ClientLogLevel::Warning) {
                warn!("{} ignored range request, reading whole file", url);
            }
            let body = response.bytes().await?;
            Ok(Fetched {
                size: Some(body.len() as u64),
                segments: vec![RangePart {
                    start: 0,
                    data: body,
                }],
            })
        }
        StatusCode::RANGE_NOT_SATISFIABLE => Ok(Fetched {
            segments: Vec::new(),
            size: None,
        }),
        other => Err(status_error("GET", url, other)),
    }
}

#[async_trait]
impl PosixSession for DavSession {
    fn advise(&mut self, offset: u64, len: usize, advice: Advice) {
        if log_enabled(ClientLogLevel::All) {
            trace!("advise {:?} for {} bytes at {} on {}", advice, len, offset, self.url);
        }
        self.advice = advice;
    }

    async fn read(&mut self, buf: &mut [u8]) -> Result<isize, ClientError> {
        if buf.is_empty() {
            return Ok(0);
        }
        if matches!(self.size, Some(size) if self.offset >= size) {
            return Ok(0);
        }

        let first = self.offset;
        range_end(first, buf.len())?;
        let range = range_header(&[(first, buf.len())]);
        if log_enabled(ClientLogLevel::Debug) {
            debug!("GET {} Range: {} ({:?})", self.url, range, self.advice);
        }

        let response = self
            .transport
            .http
            .get(self.url.clone())
            .header(RANGE, range)
            .send()
            .await
            .map_err(|e| self.transport.error(e))?;
        let status = response.status();
        let content_range = header_str(response.headers(), CONTENT_RANGE)
            .as_deref()
            .and_then(parse_content_range);

        let n = match status {
            StatusCode::PARTIAL_CONTENT => {
                let body: Bytes = response.bytes().await?;
                let start = content_range.map(|r| r.first).unwrap_or(first);
                if let Some(total) = content_range.and_then(|r| r.total) {
                    self.size = Some(total);
                }
                if start > first {
                    return Err(ClientError::protocol(format!(
                        "asked for bytes from {} but {} answered from {}",
                        first, self.url, start
                    )));
                }
                copy_segment(buf, first, start, &body)
            }
            StatusCode::OK => {
                let body = response.bytes().await?;
                self.size = Some(body.len() as u64);
                copy_segment(buf, first, 0, &body)
            }
            StatusCode::RANGE_NOT_SATISFIABLE => 0,
            other => return Err(status_error("GET", &self.url, other)),
        };

        self.offset += n as u64;
        Ok(n as isize)
    }

    async fn pread_vec(
        &mut self,
        descriptors: &mut [ReadDescriptor<'_>],
    ) -> Result<isize, ClientError> {
        let mut cursor = self.offset;
        let mut offsets = Vec::with_capacity(descriptors.len());
        for d in descriptors.iter() {
            let at = d.offset.unwrap_or(cursor);
            let end = range_end(at, d.len())?;
            if d.offset.is_none() {
                cursor = end;
            }
            offsets.push(at);
        }

        let wanted: Vec<usize> = (0..descriptors.len())
            .filter(|&i| !descriptors[i].is_empty())
            .collect();
        let mut filled = vec![0usize; descriptors.len()];

        let requests = wanted.chunks(self.max_ranges).map(|batch| {
            let ranges = batch
                .iter()
                .map(|&i| (offsets[i], descriptors[i].len()))
                .collect();
            fetch_ranges(&self.transport, &self.url, ranges)
        });
        let responses = futures::future::try_join_all(requests).await?;

        for (batch, fetched) in wanted.chunks(self.max_ranges).zip(responses) {
            if fetched.size.is_some() {
                self.size = fetched.size;
            }
            for segment in &fetched.segments {
                for &i in batch {
                    let len = descriptors[i].len();
                    let n = copy_segment(descriptors[i].buf, offsets[i], segment.start, &segment.data);
                    filled[i] = (filled[i] + n).min(len);
                }
            }
        }

        self.offset = cursor;
        Ok(filled.iter().sum::<usize>() as isize)
    }

    async fn lseek(&mut self, offset: i64, whence: Whence) -> Result<i64, ClientError> {
        let base = match whence {
            Whence::Set => 0,
            Whence::Current => self.offset as i64,
            Whence::End => self.remote_size().await? as i64,
        };
        let target = base
            .checked_add(offset)
            .filter(|t| *t >= 0)
            .ok_or_else(|| {
                ClientError::invalid_argument(format!(
                    "seek by {} from {:?} leaves the file",
                    offset, whence
                ))
            })?;
        self.offset = target as u64;
        Ok(target)
    }

    async fn close(self: Box<Self>) -> Result<(), ClientError> {
        if log_enabled(ClientLogLevel::Verbose) {
            debug!("closed {}", self.url);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::{AuthError, X509Resolver};
    use crate::config::X509Settings;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn test_normalize_url_schemes() {
        assert_eq!(
            normalize_url("davs://eos.example.org:443/store/f.root")
                .unwrap()
                .as_str(),
            "https://eos.example.org/store/f.root"
        );
        assert_eq!(
            normalize_url("dav://host:8080/f").unwrap().as_str(),
            "http://host:8080/f"
        );
        assert_eq!(
            normalize_url("https://host/f").unwrap().scheme(),
            "https"
        );
    }

    #[test]
    fn test_normalize_url_rejects_other_schemes() {
        let err = normalize_url("root://host//f").unwrap_err();
        assert_eq!(err.status, ClientStatus::InvalidArgument);
        assert!(normalize_url("not a url").is_err());
    }

    #[test]
    fn test_copy_segment_overlap() {
        let seg: Vec<u8> = (0u8..20).collect();

        let mut dst = [0u8; 4];
        assert_eq!(copy_segment(&mut dst, 5, 0, &seg), 4);
        assert_eq!(dst, [5, 6, 7, 8]);

        // segment starts inside the destination
        let mut dst = [0u8; 4];
        assert_eq!(copy_segment(&mut dst, 8, 10, &seg[..2]), 2);
        assert_eq!(dst, [0, 0, 0, 1]);

        // no overlap
        let mut dst = [9u8; 2];
        assert_eq!(copy_segment(&mut dst, 100, 0, &seg), 0);
        assert_eq!(dst, [9, 9]);

        // a server claiming a segment at the top of the offset space
        assert_eq!(copy_segment(&mut dst, 0, u64::MAX - 1, &seg), 0);
    }

    #[test]
    fn test_range_header() {
        assert_eq!(range_header(&[(0, 10)]), "bytes=0-9");
        assert_eq!(range_header(&[(5, 1), (100, 50)]), "bytes=5-5,100-149");
    }

    #[test]
    fn test_status_error_messages() {
        let url = Url::parse("https://host/f").unwrap();
        let err = status_error("HEAD", &url, StatusCode::NOT_FOUND);
        assert_eq!(err.status, ClientStatus::Http(404));
        assert!(err.message.contains("file not found"));
        let err = status_error("GET", &url, StatusCode::FORBIDDEN);
        assert!(err.message.contains("permission denied"));
    }

    #[test]
    fn test_missing_ca_directory_is_empty() {
        assert!(load_ca_directory(Path::new("/nonexistent/ca/dir")).is_empty());
    }

    #[test]
    fn test_ca_directory_skips_non_certificates() {
        let dir = tempfile::TempDir::new().unwrap();
        std::fs::write(dir.path().join("ca.signing_policy"), "access_id_CA X509").unwrap();
        std::fs::write(
            dir.path().join("bogus.pem"),
            crate::auth::test_pem::CERT,
        )
        .unwrap();
        assert!(load_ca_directory(dir.path()).is_empty());
    }

    #[test]
    fn test_open_rejects_unknown_scheme_without_io() {
        let client = DavClient::new();
        let err = tokio_test::block_on(client.open(
            &RequestParams::new(),
            "gsiftp://host/f",
            AccessMode::ReadOnly,
        ))
        .err()
        .unwrap();
        assert_eq!(err.status, ClientStatus::InvalidArgument);
    }

    fn idle_session(offset: u64) -> DavSession {
        DavSession {
            transport: Transport {
                http: reqwest::Client::new(),
                certs: None,
            },
            url: Url::parse("http://127.0.0.1:1/f").unwrap(),
            offset,
            size: None,
            advice: Advice::default(),
            max_ranges: 64,
        }
    }

    #[test]
    fn test_pread_vec_offset_overflow_rejected_without_io() {
        let mut session = idle_session(0);
        let mut buf = [0u8; 8];
        let mut descriptors = [ReadDescriptor::at(u64::MAX - 1, &mut buf)];
        let err = tokio_test::block_on(session.pread_vec(&mut descriptors)).unwrap_err();
        assert_eq!(err.status, ClientStatus::InvalidArgument);
    }

    #[test]
    fn test_cursor_overflow_rejected_without_io() {
        let mut session = idle_session(u64::MAX - 2);
        let mut a = [0u8; 8];
        let err = tokio_test::block_on(session.pread_vec(&mut [ReadDescriptor::new(&mut a)]))
            .unwrap_err();
        assert_eq!(err.status, ClientStatus::InvalidArgument);
        assert_eq!(session.offset, u64::MAX - 2);

        let err = tokio_test::block_on(session.read(&mut a)).unwrap_err();
        assert_eq!(err.status, ClientStatus::InvalidArgument);
    }

    // =========================================================================
    // client certificates
    // =========================================================================

    #[derive(Default)]
    struct BrokenProvider {
        calls: AtomicUsize,
    }

    impl CertificateProvider for BrokenProvider {
        fn client_certificate(
            &self,
            _info: &SessionInfo,
        ) -> Result<Option<crate::auth::ClientIdentity>, AuthError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Err(AuthError::Parse {
                path: "x509up".into(),
                message: "garbage".to_string(),
            })
        }
    }

    #[test]
    fn test_provider_untouched_when_building_client() {
        let provider = Arc::new(BrokenProvider::default());
        let mut params = RequestParams::new();
        params.set_client_cert_provider(provider.clone());

        let url = Url::parse("https://eos.example.org/store/f.root").unwrap();
        let transport = build_transport(&params, &url).unwrap();
        assert!(transport.certs.is_some());
        assert_eq!(provider.calls.load(Ordering::SeqCst), 0);

        let url = Url::parse("http://eos.example.org/store/f.root").unwrap();
        assert!(build_transport(&params, &url).unwrap().certs.is_none());
    }

    #[test]
    fn test_resolver_records_credential_failure() {
        let provider = Arc::new(BrokenProvider::default());
        let resolver = ClientCertResolver::new(
            provider.clone(),
            SessionInfo::new("https://eos.example.org/f", Some("eos.example.org".into())),
        );

        let key = resolver.resolve(&[], &[SignatureScheme::ECDSA_NISTP256_SHA256]);
        assert!(key.is_none());
        assert_eq!(provider.calls.load(Ordering::SeqCst), 1);
        assert!(resolver.take_failure().unwrap().contains("garbage"));
        assert!(resolver.take_failure().is_none());
    }

    #[tokio::test]
    async fn test_garbage_proxy_does_not_fail_open_before_handshake() {
        let dir = tempfile::TempDir::new().unwrap();
        let proxy = dir.path().join("x509up_u0");
        std::fs::write(&proxy, "garbage").unwrap();

        let settings = X509Settings {
            user_proxy: Some(proxy),
            ..Default::default()
        };
        let resolver = X509Resolver::new(settings).with_default_proxy(dir.path().join("absent"));
        let mut params = RequestParams::new();
        params.set_client_cert_provider(Arc::new(resolver));

        let err = DavClient::new()
            .open(&params, "https://127.0.0.1:1/f", AccessMode::ReadOnly)
            .await
            .err()
            .unwrap();
        assert_eq!(err.status, ClientStatus::Connection);
    }
}
