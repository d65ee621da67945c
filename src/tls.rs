//! Inbound TLS material: PEM loading for the listener and a self-signed
//! bootstrap for first runs.

use std::path::Path;

use axum_server::tls_rustls::RustlsConfig;

use crate::error::{ProxyError, Result};

pub async fn load_rustls_config(cert_file: &Path, key_file: &Path) -> Result<RustlsConfig> {
    RustlsConfig::from_pem_file(cert_file, key_file)
        .await
        .map_err(|err| ProxyError::Tls(format!("failed to load certificate pair: {err}")))
}

/// Generate a `localhost` self-signed certificate pair when the configured
/// files do not exist yet. Demo convenience only; production deployments
/// supply real PEMs.
pub fn ensure_self_signed(cert_file: &Path, key_file: &Path) -> Result<()> {
    if cert_file.exists() && key_file.exists() {
        return Ok(());
    }
    let rcgen::CertifiedKey { cert, key_pair } =
        rcgen::generate_simple_self_signed(vec!["localhost".to_string()])
            .map_err(|err| ProxyError::Tls(err.to_string()))?;
    for path in [cert_file, key_file] {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
    }
    std::fs::write(cert_file, cert.pem())?;
    std::fs::write(key_file, key_pair.serialize_pem())?;
    tracing::info!(cert = %cert_file.display(), key = %key_file.display(), "generated self-signed certificate");
    Ok(())
}
