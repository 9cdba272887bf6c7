//! TLS configuration for the hyper transport.
//!
//! Native root certificates are loaded from the OS store once per process and
//! cached; per-request options (extra CA, client identity, verification
//! opt-out, minimum version) are layered on top when building a
//! `rustls::ClientConfig`.

use crate::config::{TlsVersion, TransportOptions};
use crate::error::FetchError;
use rustls::client::danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier};
use rustls::crypto::CryptoProvider;
use rustls::{DigitallySignedStruct, RootCertStore, SignatureScheme};
use rustls_pki_types::pem::PemObject;
use rustls_pki_types::{CertificateDer, PrivateKeyDer, ServerName, UnixTime};
use secrecy::ExposeSecret;
use std::sync::{Arc, OnceLock};

/// Source of trusted root certificates.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum TlsRootConfig {
    /// Mozilla roots compiled into the binary
    #[default]
    WebPki,
    /// OS certificate store
    Native,
}

static NATIVE_ROOTS_CACHE: OnceLock<Vec<CertificateDer<'static>>> = OnceLock::new();

#[cfg(test)]
static LOAD_COUNT: std::sync::atomic::AtomicUsize = std::sync::atomic::AtomicUsize::new(0);

fn load_native_certs() -> Vec<CertificateDer<'static>> {
    #[cfg(test)]
    LOAD_COUNT.fetch_add(1, std::sync::atomic::Ordering::SeqCst);

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

/// Native root certificates, loaded on first use.
pub fn native_root_certs() -> &'static [CertificateDer<'static>] {
    NATIVE_ROOTS_CACHE.get_or_init(load_native_certs).as_slice()
}

/// Globally installed crypto provider, or aws-lc-rs without installing it.
pub fn get_crypto_provider() -> Arc<CryptoProvider> {
    CryptoProvider::get_default()
        .cloned()
        .unwrap_or_else(|| Arc::new(rustls::crypto::aws_lc_rs::default_provider()))
}

fn root_store(roots: TlsRootConfig, extra_ca: Option<&str>) -> Result<RootCertStore, FetchError> {
    let mut store = RootCertStore::empty();
    match roots {
        TlsRootConfig::WebPki => store.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned()),
        TlsRootConfig::Native => {
            let (added, ignored) = store.add_parsable_certificates(native_root_certs().iter().cloned());
            if ignored > 0 {
                tracing::warn!(added, ignored, "some native root certificates could not be parsed");
            }
        }
    }

    if let Some(pem) = extra_ca {
        for cert in CertificateDer::pem_slice_iter(pem.as_bytes()) {
            let cert = cert.map_err(|e| FetchError::Tls(Box::new(e)))?;
            store.add(cert).map_err(|e| FetchError::Tls(Box::new(e)))?;
        }
    }

    if store.is_empty() {
        return Err(FetchError::Tls("no trusted root CA certificates available".into()));
    }
    Ok(store)
}

/// Build the client TLS configuration for `opts`.
///
/// # Errors
/// Returns `FetchError::Tls` if a PEM input does not parse, the client key
/// does not match its certificate, or no root certificate is available.
pub fn client_config(
    roots: TlsRootConfig,
    opts: &TransportOptions,
) -> Result<rustls::ClientConfig, FetchError> {
    let provider = get_crypto_provider();

    let versions: &[&rustls::SupportedProtocolVersion] = match opts.min_tls_version {
        Some(TlsVersion::Tls13) => &[&rustls::version::TLS13],
        Some(TlsVersion::Tls12) | None => rustls::DEFAULT_VERSIONS,
    };
    let builder = rustls::ClientConfig::builder_with_provider(Arc::clone(&provider))
        .with_protocol_versions(versions)
        .map_err(|e| FetchError::Tls(Box::new(e)))?;

    let builder = if opts.reject_unauthorized == Some(false) {
        tracing::warn!("server certificate verification disabled (rejectUnauthorized = false)");
        builder
            .dangerous()
            .with_custom_certificate_verifier(Arc::new(AcceptAnyServerCert(provider)))
    } else {
        builder.with_root_certificates(root_store(roots, opts.ca.as_deref())?)
    };

    match (&opts.cert, &opts.key) {
        (Some(cert), Some(key)) => {
            let chain = CertificateDer::pem_slice_iter(cert.as_bytes())
                .collect::<Result<Vec<_>, _>>()
                .map_err(|e| FetchError::Tls(Box::new(e)))?;
            let key = PrivateKeyDer::from_pem_slice(key.expose_secret().as_bytes())
                .map_err(|e| FetchError::Tls(Box::new(e)))?;
            builder
                .with_client_auth_cert(chain, key)
                .map_err(|e| FetchError::Tls(Box::new(e)))
        }
        (None, None) => Ok(builder.with_no_client_auth()),
        _ => Err(FetchError::Tls(
            "client certificate and key must be given together".into(),
        )),
    }
}

/// Parse an SNI override.
///
/// # Errors
/// Returns `FetchError::Tls` if `name` is neither a DNS name nor an IP address.
pub fn server_name(name: &str) -> Result<ServerName<'static>, FetchError> {
    ServerName::try_from(name.to_owned()).map_err(|e| FetchError::Tls(Box::new(e)))
}

/// Verifier used when server certificate checks are switched off.
///
/// Handshake signatures are still checked so the peer must hold the key of
/// the certificate it presents.
#[derive(Debug)]
struct AcceptAnyServerCert(Arc<CryptoProvider>);

impl ServerCertVerifier for AcceptAnyServerCert {
    fn verify_server_cert(
        &self,
        _end_entity: &CertificateDer<'_>,
        _intermediates: &[CertificateDer<'_>],
        _server_name: &ServerName<'_>,
        _ocsp_response: &[u8],
        _now: UnixTime,
    ) -> Result<ServerCertVerified, rustls::Error> {
        Ok(ServerCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        rustls::crypto::verify_tls12_signature(
            message,
            cert,
            dss,
            &self.0.signature_verification_algorithms,
        )
    }

    fn verify_tls13_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        rustls::crypto::verify_tls13_signature(
            message,
            cert,
            dss,
            &self.0.signature_verification_algorithms,
        )
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        self.0.signature_verification_algorithms.supported_schemes()
    }
}
