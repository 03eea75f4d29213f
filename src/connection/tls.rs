//! TLS links with post-handshake trust evaluation.
//!
//! AMT devices usually present self-signed certificates, so the handshake
//! accepts whatever chain is offered (handshake signatures are still
//! checked). The captured certificate is then verified against the
//! configured CA store and pin, and the outcome is reduced to a
//! [`TrustLevel`] by [`decide_trust`].

use rustls::client::danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier};
use rustls::client::WebPkiServerVerifier;
use rustls::crypto::{verify_tls12_signature, verify_tls13_signature, CryptoProvider};
use rustls::pki_types::{CertificateDer, PrivateKeyDer, ServerName, UnixTime};
use rustls::{ClientConfig, DigitallySignedStruct, RootCertStore, SignatureScheme};
use std::fs::File;
use std::io::BufReader;
use std::path::Path;
use std::sync::Arc;
use tokio::net::TcpStream;
use tokio_rustls::TlsConnector;
use tracing::{debug, warn};

use super::tcp::StreamChannel;
use super::trust::{cert_fingerprint, check_pin, decide_trust, CaOutcome, TrustLevel};
use super::{ConnectError, ConnectionConfig, Established, TlsSession};

/// Accepts any certificate but still verifies handshake signatures.
#[derive(Debug)]
struct CapturingVerifier {
    provider: Arc<CryptoProvider>,
}

impl ServerCertVerifier for CapturingVerifier {
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
        verify_tls12_signature(
            message,
            cert,
            dss,
            &self.provider.signature_verification_algorithms,
        )
    }

    fn verify_tls13_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        verify_tls13_signature(
            message,
            cert,
            dss,
            &self.provider.signature_verification_algorithms,
        )
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        self.provider
            .signature_verification_algorithms
            .supported_schemes()
    }
}

fn tls_err(context: &str, err: impl std::fmt::Display) -> ConnectError {
    ConnectError::Tls(format!("{}: {}", context, err))
}

fn load_certs(path: &Path) -> Result<Vec<CertificateDer<'static>>, ConnectError> {
    let file = File::open(path).map_err(|e| tls_err(&path.display().to_string(), e))?;
    let certs = rustls_pemfile::certs(&mut BufReader::new(file))
        .collect::<Result<Vec<_>, _>>()
        .map_err(|e| tls_err(&path.display().to_string(), e))?;
    if certs.is_empty() {
        return Err(ConnectError::InvalidConfig(format!(
            "no certificates found in {}",
            path.display()
        )));
    }
    Ok(certs)
}

fn load_key(path: &Path) -> Result<PrivateKeyDer<'static>, ConnectError> {
    let file = File::open(path).map_err(|e| tls_err(&path.display().to_string(), e))?;
    rustls_pemfile::private_key(&mut BufReader::new(file))
        .map_err(|e| tls_err(&path.display().to_string(), e))?
        .ok_or_else(|| ConnectError::InvalidConfig(format!("no private key found in {}", path.display())))
}

fn load_roots(config: &ConnectionConfig) -> Result<RootCertStore, ConnectError> {
    let mut roots = RootCertStore::empty();
    for path in &config.tls_options.ca_certificates {
        for cert in load_certs(path)? {
            roots
                .add(cert)
                .map_err(|e| tls_err("Failed to add CA cert", e))?;
        }
    }
    Ok(roots)
}

fn client_config(config: &ConnectionConfig, provider: Arc<CryptoProvider>) -> Result<ClientConfig, ConnectError> {
    let builder = ClientConfig::builder_with_provider(provider.clone())
        .with_safe_default_protocol_versions()
        .map_err(|e| tls_err("protocol versions", e))?
        .dangerous()
        .with_custom_certificate_verifier(Arc::new(CapturingVerifier { provider }));

    match (&config.tls_options.client_certificate, &config.tls_options.client_key) {
        (Some(cert), Some(key)) => builder
            .with_client_auth_cert(load_certs(cert)?, load_key(key)?)
            .map_err(|e| tls_err("client certificate", e)),
        _ => Ok(builder.with_no_client_auth()),
    }
}

fn verify_ca(
    roots: RootCertStore,
    provider: Arc<CryptoProvider>,
    end_entity: &CertificateDer<'_>,
    intermediates: &[CertificateDer<'_>],
    server_name: &ServerName<'_>,
) -> CaOutcome {
    if roots.is_empty() {
        return CaOutcome::NotConfigured;
    }
    let verifier = match WebPkiServerVerifier::builder_with_provider(Arc::new(roots), provider).build() {
        Ok(v) => v,
        Err(e) => return CaOutcome::Failed(e.to_string()),
    };
    match verifier.verify_server_cert(end_entity, intermediates, server_name, &[], UnixTime::now()) {
        Ok(_) => CaOutcome::Verified,
        Err(e) => CaOutcome::Failed(e.to_string()),
    }
}

/// Run the TLS handshake over `stream` and evaluate trust.
pub async fn connect(stream: TcpStream, config: &ConnectionConfig) -> Result<Established, ConnectError> {
    let provider = Arc::new(rustls::crypto::ring::default_provider());
    let roots = load_roots(config)?;
    let tls_config = client_config(config, provider.clone())?;

    let name = config
        .tls_options
        .server_name
        .clone()
        .unwrap_or_else(|| config.host.clone());
    let server_name = ServerName::try_from(name)
        .map_err(|e| ConnectError::InvalidConfig(format!("Invalid server name: {}", e)))?;

    let connector = TlsConnector::from(Arc::new(tls_config));
    let tls_stream = tokio::time::timeout(config.connect_timeout, connector.connect(server_name.clone(), stream))
        .await
        .map_err(|_| ConnectError::Timeout(config.connect_timeout))?
        .map_err(|e| tls_err("TLS handshake failed", e))?;

    let chain: Vec<CertificateDer<'static>> = tls_stream
        .get_ref()
        .1
        .peer_certificates()
        .map(|certs| certs.iter().map(|c| c.clone().into_owned()).collect())
        .unwrap_or_default();
    let (end_entity, intermediates) = chain
        .split_first()
        .ok_or_else(|| ConnectError::Tls("device presented no certificate".into()))?;

    let ca = verify_ca(roots, provider, end_entity, intermediates, &server_name);
    let pin = check_pin(config.tls_options.fingerprint.as_deref(), end_entity);
    let fingerprint = cert_fingerprint(end_entity);

    let trust = decide_trust(&ca, &pin).map_err(ConnectError::TrustRejected)?;
    match trust {
        TrustLevel::UntrustedAccepted => {
            warn!(host = %config.host, fingerprint = %fingerprint, "accepting unverified device certificate");
        }
        _ => debug!(host = %config.host, trust = %trust, "device certificate trusted"),
    }

    Ok(Established {
        tls: Some(TlsSession {
            trust,
            peer_certificate: Some(end_entity.to_vec()),
            fingerprint: Some(fingerprint),
        }),
        channel: Box::new(StreamChannel::new(tls_stream)),
    })
}
