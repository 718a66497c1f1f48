// src/rabbitmq/tls.rs

use std::fs::File;
use std::io::BufReader;
use std::path::Path;
use std::sync::Arc;

use tokio_rustls::rustls::crypto::{aws_lc_rs, CryptoProvider};
use tokio_rustls::rustls::{version, CipherSuite, ClientConfig, RootCertStore};
use tracing::{debug, warn};

use super::errors::{ClientError, Result};

/// ECDHE key exchange with AES-GCM only, no ECDSA-authenticated suites.
/// TLS 1.3 suites always use ephemeral key exchange.
pub const ALLOWED_CIPHER_SUITES: &[CipherSuite] = &[
    CipherSuite::TLS13_AES_256_GCM_SHA384,
    CipherSuite::TLS13_AES_128_GCM_SHA256,
    CipherSuite::TLS_ECDHE_RSA_WITH_AES_256_GCM_SHA384,
    CipherSuite::TLS_ECDHE_RSA_WITH_AES_128_GCM_SHA256,
];

pub fn is_secure_url(url: &str) -> bool {
    url.trim_start()
        .get(..8)
        .map_or(false, |scheme| scheme.eq_ignore_ascii_case("amqps://"))
}

/// Build the hardened client context used for `amqps://` connections.
/// Roots come from `ca_cert_path` when given, otherwise from the OS store.
pub fn hardened_client_config(ca_cert_path: Option<&Path>) -> Result<Arc<ClientConfig>> {
    let roots = match ca_cert_path {
        Some(path) => roots_from_pem(path)?,
        None => native_roots()?,
    };

    let base = aws_lc_rs::default_provider();
    let cipher_suites = base
        .cipher_suites
        .iter()
        .copied()
        .filter(|suite| ALLOWED_CIPHER_SUITES.contains(&suite.suite()))
        .collect();
    let provider = CryptoProvider {
        cipher_suites,
        ..base
    };

    let config = ClientConfig::builder_with_provider(Arc::new(provider))
        .with_protocol_versions(&[&version::TLS13, &version::TLS12])
        .map_err(|e| ClientError::Config(format!("Invalid TLS parameters: {}", e)))?
        .with_root_certificates(roots)
        .with_no_client_auth();

    Ok(Arc::new(config))
}

fn roots_from_pem(path: &Path) -> Result<RootCertStore> {
    let file = File::open(path).map_err(|e| {
        ClientError::Config(format!("Failed to open CA file {}: {}", path.display(), e))
    })?;
    let mut reader = BufReader::new(file);

    let mut roots = RootCertStore::empty();
    for cert in rustls_pemfile::certs(&mut reader) {
        let cert = cert.map_err(|e| {
            ClientError::Config(format!("Failed to read CA file {}: {}", path.display(), e))
        })?;
        roots
            .add(cert)
            .map_err(|e| ClientError::Config(format!("Invalid CA certificate: {}", e)))?;
    }

    if roots.is_empty() {
        return Err(ClientError::Config(format!(
            "No certificates found in {}",
            path.display()
        )));
    }
    debug!(ca_file = %path.display(), count = roots.len(), "Loaded CA certificates");
    Ok(roots)
}

fn native_roots() -> Result<RootCertStore> {
    let loaded = rustls_native_certs::load_native_certs();
    for error in &loaded.errors {
        warn!("Skipping unreadable native certificate: {}", error);
    }

    let mut roots = RootCertStore::empty();
    let (added, ignored) = roots.add_parsable_certificates(loaded.certs);
    debug!(added, ignored, "Loaded native root certificates");

    if roots.is_empty() {
        return Err(ClientError::Config(
            "No trusted root certificates available".to_string(),
        ));
    }
    Ok(roots)
}
