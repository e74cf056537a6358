//! X.509 credential discovery.
//!
//! Resolution order, first match wins:
//! 1. `X509_USER_PROXY`, used as both certificate and key
//! 2. the default proxy `/tmp/x509up_u<euid>`, if it is readable
//! 3. `X509_USER_CERT`
//!
//! Once a certificate path is known, `X509_USER_KEY` overrides the key path.

use std::fs::File;
use std::path::{Path, PathBuf};

use tracing::{info, warn};

use super::{AuthError, CertificateProvider, ClientIdentity, SessionInfo};
use crate::config::X509Settings;

/// Certificate and key locations, both non-empty
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Credential {
    pub cert_path: PathBuf,
    pub key_path: PathBuf,
}

/// Default proxy location for the effective user
pub fn default_proxy_path() -> PathBuf {
    // SAFETY: geteuid has no preconditions and cannot fail
    let euid = unsafe { libc::geteuid() };
    PathBuf::from(format!("/tmp/x509up_u{}", euid))
}

fn is_readable(path: &Path) -> bool {
    File::open(path).is_ok()
}

/// Resolves and loads the client credential from [`X509Settings`]
#[derive(Debug, Clone)]
pub struct X509Resolver {
    settings: X509Settings,
    default_proxy: PathBuf,
}

impl X509Resolver {
    pub fn new(settings: X509Settings) -> Self {
        Self {
            settings,
            default_proxy: default_proxy_path(),
        }
    }

    /// Look for the default proxy somewhere other than `/tmp`
    pub fn with_default_proxy(mut self, path: impl Into<PathBuf>) -> Self {
        self.default_proxy = path.into();
        self
    }

    /// Find the certificate and key paths without reading them.
    ///
    /// Returns `None`, after logging a warning, when no complete pair exists.
    pub fn resolve(&self) -> Option<Credential> {
        let mut cert = PathBuf::new();
        let mut key = PathBuf::new();
        let mut from_cert_env = false;

        if let Some(proxy) = &self.settings.user_proxy {
            info!("X509_USER_PROXY found in environment. Will use it for authentication");
            cert = proxy.clone();
            key = proxy.clone();
        } else if is_readable(&self.default_proxy) {
            info!(
                "Found proxy in default location {:?}. Will use it for authentication",
                self.default_proxy
            );
            cert = self.default_proxy.clone();
            key = self.default_proxy.clone();
        } else if let Some(user_cert) = &self.settings.user_cert {
            cert = user_cert.clone();
            from_cert_env = true;
        }

        if !cert.as_os_str().is_empty() {
            if let Some(user_key) = &self.settings.user_key {
                key = user_key.clone();
                from_cert_env = true;
            }
        }

        if cert.as_os_str().is_empty() || key.as_os_str().is_empty() {
            warn!(
                "Was not able to find proxy in $X509_USER_PROXY, X509_USER_{{CERT|KEY}} \
                 or default proxy creation location. Will try without authentication"
            );
            return None;
        }

        if from_cert_env {
            info!("X509_USER_{{CERT|KEY}} found in environment. Will use it for authentication");
        }

        Some(Credential {
            cert_path: cert,
            key_path: key,
        })
    }

    /// Resolve and read the credential.
    ///
    /// A missing credential is `Ok(None)`; a credential that cannot be read or
    /// parsed is an error.
    pub fn load(&self) -> Result<Option<ClientIdentity>, AuthError> {
        let Some(credential) = self.resolve() else {
            return Ok(None);
        };

        let read = |path: &Path| {
            std::fs::read(path).map_err(|source| AuthError::Read {
                path: path.to_path_buf(),
                source,
            })
        };

        let cert_pem = read(credential.cert_path.as_path())?;
        let key_pem = if credential.key_path == credential.cert_path {
            cert_pem.clone()
        } else {
            read(credential.key_path.as_path())?
        };

        ClientIdentity::from_pem(&cert_pem, &key_pem, &credential.cert_path).map(Some)
    }
}

impl CertificateProvider for X509Resolver {
    fn client_certificate(&self, info: &SessionInfo) -> Result<Option<ClientIdentity>, AuthError> {
        tracing::debug!("client certificate requested for {}", info.url);
        self.load()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::test_pem;
    use std::io::Write;
    use tempfile::TempDir;

    fn settings(
        proxy: Option<&str>,
        cert: Option<&str>,
        key: Option<&str>,
    ) -> X509Settings {
        X509Settings {
            user_proxy: proxy.map(PathBuf::from),
            user_cert: cert.map(PathBuf::from),
            user_key: key.map(PathBuf::from),
            cert_dir: None,
        }
    }

    /// Resolver whose default proxy location does not exist
    fn resolver(dir: &TempDir, settings: X509Settings) -> X509Resolver {
        X509Resolver::new(settings).with_default_proxy(dir.path().join("x509up_missing"))
    }

    #[test]
    fn test_proxy_used_for_cert_and_key() {
        let dir = TempDir::new().unwrap();
        let cred = resolver(&dir, settings(Some("/p/proxy"), None, None))
            .resolve()
            .unwrap();
        assert_eq!(cred.cert_path, PathBuf::from("/p/proxy"));
        assert_eq!(cred.key_path, PathBuf::from("/p/proxy"));
    }

    #[test]
    fn test_proxy_wins_over_cert_pair() {
        let dir = TempDir::new().unwrap();
        let cred = resolver(
            &dir,
            settings(Some("/p/proxy"), Some("/c/cert.pem"), None),
        )
        .resolve()
        .unwrap();
        assert_eq!(cred.cert_path, PathBuf::from("/p/proxy"));
    }

    #[test]
    fn test_key_overrides_proxy_key() {
        let dir = TempDir::new().unwrap();
        let cred = resolver(&dir, settings(Some("/p/proxy"), None, Some("/k/key.pem")))
            .resolve()
            .unwrap();
        assert_eq!(cred.cert_path, PathBuf::from("/p/proxy"));
        assert_eq!(cred.key_path, PathBuf::from("/k/key.pem"));
    }

    /// Log output written while `f` runs
    fn captured_logs(f: impl FnOnce()) -> String {
        #[derive(Clone, Default)]
        struct Captured(std::sync::Arc<parking_lot::Mutex<Vec<u8>>>);

        impl Write for Captured {
            fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
                self.0.lock().extend_from_slice(buf);
                Ok(buf.len())
            }

            fn flush(&mut self) -> std::io::Result<()> {
                Ok(())
            }
        }

        let captured = Captured::default();
        let writer = captured.clone();
        let subscriber = tracing_subscriber::fmt()
            .with_writer(move || writer.clone())
            .with_ansi(false)
            .finish();
        tracing::subscriber::with_default(subscriber, f);
        let bytes = captured.0.lock().clone();
        String::from_utf8_lossy(&bytes).into_owned()
    }

    #[test]
    fn test_proxy_with_key_logs_both_sources() {
        let dir = TempDir::new().unwrap();
        let logs = captured_logs(|| {
            resolver(&dir, settings(Some("/p/proxy"), None, Some("/k/key.pem")))
                .resolve()
                .unwrap();
        });
        assert!(logs.contains("X509_USER_PROXY found in environment"));
        assert!(logs.contains("X509_USER_{CERT|KEY} found in environment"));
    }

    #[test]
    fn test_proxy_alone_logs_proxy_only() {
        let dir = TempDir::new().unwrap();
        let logs = captured_logs(|| {
            resolver(&dir, settings(Some("/p/proxy"), None, None))
                .resolve()
                .unwrap();
        });
        assert!(logs.contains("X509_USER_PROXY found in environment"));
        assert!(!logs.contains("X509_USER_{CERT|KEY}"));
    }

    #[test]
    fn test_cert_and_key_pair() {
        let dir = TempDir::new().unwrap();
        let cred = resolver(
            &dir,
            settings(None, Some("/c/cert.pem"), Some("/c/key.pem")),
        )
        .resolve()
        .unwrap();
        assert_eq!(cred.cert_path, PathBuf::from("/c/cert.pem"));
        assert_eq!(cred.key_path, PathBuf::from("/c/key.pem"));
    }

    #[test]
    fn test_cert_without_key_fails() {
        let dir = TempDir::new().unwrap();
        assert!(resolver(&dir, settings(None, Some("/c/cert.pem"), None))
            .resolve()
            .is_none());
    }

    #[test]
    fn test_key_without_cert_fails() {
        let dir = TempDir::new().unwrap();
        assert!(resolver(&dir, settings(None, None, Some("/c/key.pem")))
            .resolve()
            .is_none());
    }

    #[test]
    fn test_nothing_configured_fails_cleanly() {
        let dir = TempDir::new().unwrap();
        let r = resolver(&dir, settings(None, None, None));
        assert!(r.resolve().is_none());
        assert!(r.load().unwrap().is_none());
    }

    #[test]
    fn test_empty_proxy_value_fails() {
        let dir = TempDir::new().unwrap();
        let r = resolver(&dir, settings(Some(""), Some("/c/cert.pem"), None));
        assert!(r.resolve().is_none());
    }

    #[test]
    fn test_default_proxy_location() {
        let dir = TempDir::new().unwrap();
        let proxy = dir.path().join("x509up_u1000");
        std::fs::write(&proxy, "proxy").unwrap();

        let r = X509Resolver::new(settings(None, Some("/c/cert.pem"), None))
            .with_default_proxy(&proxy);
        let cred = r.resolve().unwrap();
        assert_eq!(cred.cert_path, proxy);
        assert_eq!(cred.key_path, proxy);
    }

    #[test]
    fn test_default_proxy_path_is_uid_derived() {
        let path = default_proxy_path();
        let s = path.to_string_lossy();
        assert!(s.starts_with("/tmp/x509up_u"), "{}", s);
        assert!(s["/tmp/x509up_u".len()..].parse::<u32>().is_ok());
    }

    #[test]
    fn test_load_proxy_file() {
        let dir = TempDir::new().unwrap();
        let proxy = dir.path().join("proxy.pem");
        let mut f = File::create(&proxy).unwrap();
        write!(f, "{}{}", test_pem::CERT, test_pem::KEY).unwrap();

        let r = resolver(&dir, settings(Some(proxy.to_str().unwrap()), None, None));
        let id = r.load().unwrap().unwrap();
        assert_eq!(id.chain_len(), 1);
    }

    #[test]
    fn test_load_cert_key_pair() {
        let dir = TempDir::new().unwrap();
        let cert = dir.path().join("usercert.pem");
        let key = dir.path().join("userkey.pem");
        std::fs::write(&cert, test_pem::CERT).unwrap();
        std::fs::write(&key, test_pem::KEY).unwrap();

        let r = resolver(
            &dir,
            settings(None, cert.to_str(), key.to_str()),
        );
        let id = r
            .client_certificate(&SessionInfo::new("https://host/f", None))
            .unwrap()
            .unwrap();
        assert!(id.pem().ends_with(test_pem::KEY.as_bytes()));
    }

    #[test]
    fn test_load_garbage_is_error() {
        let dir = TempDir::new().unwrap();
        let proxy = dir.path().join("proxy.pem");
        std::fs::write(&proxy, "not a certificate").unwrap();

        let r = resolver(&dir, settings(Some(proxy.to_str().unwrap()), None, None));
        assert!(matches!(r.load(), Err(AuthError::Parse { .. })));
    }

    #[test]
    fn test_load_missing_file_is_error() {
        let dir = TempDir::new().unwrap();
        let missing = dir.path().join("gone.pem");
        let r = resolver(&dir, settings(Some(missing.to_str().unwrap()), None, None));
        assert!(matches!(r.load(), Err(AuthError::Read { .. })));
    }
}
