//! TLS setup for the platform connector.
//!
//! Native roots are read from the OS store once per process and cached.

use crate::config::{TlsRootConfig, TransportSecurity};
use crate::error::BuildError;
use hyper_rustls::HttpsConnector;
use hyper_util::client::legacy::connect::HttpConnector;
use rustls_pki_types::CertificateDer;
use std::sync::{Arc, OnceLock};

static NATIVE_ROOTS: OnceLock<Vec<CertificateDer<'static>>> = OnceLock::new();

fn load_native_roots() -> Vec<CertificateDer<'static>> {
    let result = rustls_native_certs::load_native_certs();
    for err in &result.errors {
        tracing::warn!(error = %err, "error loading native root certificate");
    }
    if result.certs.is_empty() {
        tracing::warn!("no native root CA certificates found");
    } else {
        tracing::debug!(count = result.certs.len(), "loaded native root certificates");
    }
    result.certs
}

/// Cached native root certificates (may be empty)
pub fn native_root_certs() -> &'static [CertificateDer<'static>] {
    NATIVE_ROOTS.get_or_init(load_native_roots).as_slice()
}

/// The process-wide default crypto provider if one is installed, else aws-lc-rs.
///
/// Never installs a provider globally.
pub fn crypto_provider() -> Arc<rustls::crypto::CryptoProvider> {
    rustls::crypto::CryptoProvider::get_default()
        .cloned()
        .unwrap_or_else(|| Arc::new(rustls::crypto::aws_lc_rs::default_provider()))
}

/// rustls `ClientConfig` trusting the cached native roots.
///
/// # Errors
/// Fails when the OS store yields no usable certificate, so a broken trust
/// store surfaces when the client is built instead of at the first handshake.
pub fn native_roots_client_config() -> Result<rustls::ClientConfig, BuildError> {
    let certs = native_root_certs();
    if certs.is_empty() {
        return Err(BuildError::Tls(
            "no native root CA certificates found in OS certificate store".into(),
        ));
    }

    let mut roots = rustls::RootCertStore::empty();
    let (added, ignored) = roots.add_parsable_certificates(certs.iter().cloned());
    if ignored > 0 {
        tracing::warn!(added, ignored, "some native root certificates could not be parsed");
    }
    if added == 0 {
        return Err(BuildError::Tls(
            format!("none of the {} native root certificates parsed", certs.len()).into(),
        ));
    }

    let config = rustls::ClientConfig::builder_with_provider(crypto_provider())
        .with_safe_default_protocol_versions()
        .map_err(|e| BuildError::Tls(Box::new(e)))?
        .with_root_certificates(roots)
        .with_no_client_auth();
    Ok(config)
}

/// HTTPS connector advertising h2 and http/1.1 via ALPN.
///
/// Plain `http://` is only accepted with `TransportSecurity::AllowInsecureHttp`.
///
/// # Errors
/// Returns `BuildError::Tls` when the root store cannot be set up.
pub fn https_connector(
    roots: TlsRootConfig,
    transport: TransportSecurity,
) -> Result<HttpsConnector<HttpConnector>, BuildError> {
    let allow_http = transport == TransportSecurity::AllowInsecureHttp;

    let builder = match roots {
        TlsRootConfig::WebPki => hyper_rustls::HttpsConnectorBuilder::new()
            .with_provider_and_webpki_roots(crypto_provider())
            .map_err(|e| BuildError::Tls(Box::new(e)))?,
        TlsRootConfig::Native => {
            hyper_rustls::HttpsConnectorBuilder::new().with_tls_config(native_roots_client_config()?)
        }
    };

    let connector = if allow_http {
        builder.https_or_http().enable_all_versions().build()
    } else {
        builder.https_only().enable_all_versions().build()
    };
    Ok(connector)
}
