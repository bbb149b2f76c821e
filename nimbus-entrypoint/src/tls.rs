//! TLS termination for the entry point.
//!
//! Loads a PEM certificate chain and private key into a
//! `rustls::ServerConfig` and wraps it in an acceptor.

use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use pki_types::CertificateDer;
use rustls::ServerConfig;
use tokio_rustls::TlsAcceptor;

/// Raised while loading certificates or keys.
#[derive(Debug, thiserror::Error)]
pub enum TlsError {
    /// A PEM file could not be opened or parsed.
    #[error("cannot read {path}")]
    Io {
        /// The file being read.
        path: PathBuf,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// The certificate file holds no certificate.
    #[error("no certificate found in {0}")]
    NoCertificate(PathBuf),

    /// The key file holds no private key.
    #[error("no private key found in {0}")]
    NoPrivateKey(PathBuf),

    /// rustls refused the certificate and key.
    #[error(transparent)]
    Rustls(#[from] rustls::Error),
}

fn reader(path: &Path) -> Result<BufReader<File>, TlsError> {
    File::open(path).map(BufReader::new).map_err(io(path))
}

fn io(path: &Path) -> impl FnOnce(std::io::Error) -> TlsError {
    let path = path.to_path_buf();
    move |source| TlsError::Io { path, source }
}

/// Loads a TLS `ServerConfig` from the given certificate and key paths.
///
/// The key may be PKCS#8, PKCS#1 or SEC1; the first one in the file is used.
pub fn load_tls_config(cert_path: &Path, key_path: &Path) -> Result<Arc<ServerConfig>, TlsError> {
    let certs: Vec<CertificateDer<'static>> = rustls_pemfile::certs(&mut reader(cert_path)?)
        .collect::<Result<_, _>>()
        .map_err(io(cert_path))?;
    if certs.is_empty() {
        return Err(TlsError::NoCertificate(cert_path.to_path_buf()));
    }

    let key = rustls_pemfile::private_key(&mut reader(key_path)?)
        .map_err(io(key_path))?
        .ok_or_else(|| TlsError::NoPrivateKey(key_path.to_path_buf()))?;

    // More than one rustls provider is compiled in (reqwest brings `ring`),
    // so the process default cannot be inferred.
    let provider = Arc::new(rustls::crypto::aws_lc_rs::default_provider());
    let mut config = ServerConfig::builder_with_provider(provider)
        .with_safe_default_protocol_versions()?
        .with_no_client_auth()
        .with_single_cert(certs, key)?;

    // The entry point only speaks HTTP/1.1.
    config.alpn_protocols = vec![b"http/1.1".to_vec()];

    Ok(Arc::new(config))
}

/// Build an acceptor from PEM files.
pub fn acceptor(cert_path: &Path, key_path: &Path) -> Result<TlsAcceptor, TlsError> {
    load_tls_config(cert_path, key_path).map(TlsAcceptor::from)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scratch(name: &str, contents: &str) -> PathBuf {
        let path = std::env::temp_dir().join(format!("nimbus-tls-{}-{name}", std::process::id()));
        std::fs::write(&path, contents).unwrap();
        path
    }

    fn testdata(name: &str) -> PathBuf {
        Path::new(env!("CARGO_MANIFEST_DIR")).join("testdata").join(name)
    }

    #[test]
    fn loads_a_self_signed_pair() {
        let config = load_tls_config(&testdata("cert.pem"), &testdata("key.pem")).unwrap();
        assert_eq!(config.alpn_protocols, vec![b"http/1.1".to_vec()]);

        acceptor(&testdata("cert.pem"), &testdata("key.pem")).unwrap();
    }

    #[test]
    fn missing_files_are_io_errors() {
        let err = load_tls_config(Path::new("/no/such/cert.pem"), Path::new("/no/such/key.pem")).unwrap_err();
        assert!(matches!(err, TlsError::Io { ref path, .. } if path == Path::new("/no/such/cert.pem")));
    }

    #[test]
    fn empty_certificate_file_is_rejected() {
        let cert = scratch("empty-cert.pem", "");
        let key = scratch("empty-key.pem", "");
        let err = load_tls_config(&cert, &key).unwrap_err();
        assert!(matches!(err, TlsError::NoCertificate(_)));
    }

    #[test]
    fn missing_key_is_reported() {
        // Syntactically a PEM certificate; rustls never sees it.
        let cert = scratch(
            "cert.pem",
            "-----BEGIN CERTIFICATE-----\nAAAA\n-----END CERTIFICATE-----\n",
        );
        let key = scratch("no-key.pem", "not a key\n");
        let err = load_tls_config(&cert, &key).unwrap_err();
        assert!(matches!(err, TlsError::NoPrivateKey(_)));
    }
}
