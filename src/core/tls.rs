use std::fmt;
use std::sync::Arc;

use rustls::client::danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier};
use rustls::client::WebPkiServerVerifier;
use rustls::pki_types::{CertificateDer, ServerName, UnixTime};
use rustls::{CertificateError, ClientConfig, DigitallySignedStruct, RootCertStore, SignatureScheme};
use tokio::net::TcpStream;
use tokio_rustls::TlsConnector;

use crate::proto::error::{Error, Result, TlsHandshakeError};

/// Certificate-verification hook, invoked once per handshake with the
/// webpki pre-verification result and the peer's certificate chain
/// (end-entity first). Returning `false` aborts the handshake with
/// [`TlsHandshakeError::VerificationFailed`].
pub type VerifyHook = Arc<dyn Fn(bool, &[CertificateDer<'_>]) -> bool + Send + Sync>;

/// Opens a TLS session over an established TCP stream.
///
/// Uses `webpki-roots` for Mozilla's root certificates and `ring` as the
/// crypto provider. When a hook is supplied it has the final say over
/// certificate acceptance.
pub(crate) async fn connect(
    host: &str,
    stream: TcpStream,
    hook: Option<VerifyHook>,
) -> Result<tokio_rustls::client::TlsStream<TcpStream>> {
    let config = client_config(hook)?;
    let connector = TlsConnector::from(Arc::new(config));
    let server_name =
        ServerName::try_from(host.to_string()).map_err(|_| Error::InvalidArgument {
            message: format!("invalid TLS server name: {host}"),
        })?;
    connector
        .connect(server_name, stream)
        .await
        .map_err(map_handshake_error)
}

fn client_config(hook: Option<VerifyHook>) -> Result<ClientConfig> {
    let mut roots = RootCertStore::empty();
    roots.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());
    let roots = Arc::new(roots);

    let config = match hook {
        None => ClientConfig::builder()
            .with_root_certificates(roots)
            .with_no_client_auth(),
        Some(hook) => {
            let verifier = HookVerifier::new(roots, hook)?;
            ClientConfig::builder()
                .dangerous()
                .with_custom_certificate_verifier(Arc::new(verifier))
                .with_no_client_auth()
        }
    };
    Ok(config)
}

fn map_handshake_error(e: std::io::Error) -> Error {
    let rejected = e
        .get_ref()
        .and_then(|inner| inner.downcast_ref::<rustls::Error>())
        .is_some_and(|re| matches!(re, rustls::Error::InvalidCertificate(_)));
    if rejected {
        Error::TlsHandshake(TlsHandshakeError::VerificationFailed)
    } else {
        Error::TlsHandshake(TlsHandshakeError::Failed { source: e })
    }
}

/// Server certificate verifier that runs the standard webpki checks and
/// then lets the user hook accept or reject the peer.
pub(crate) struct HookVerifier {
    inner: Arc<WebPkiServerVerifier>,
    hook: VerifyHook,
}

impl HookVerifier {
    pub(crate) fn new(roots: Arc<RootCertStore>, hook: VerifyHook) -> Result<Self> {
        let inner = WebPkiServerVerifier::builder(roots).build().map_err(|e| {
            Error::TlsHandshake(TlsHandshakeError::Failed {
                source: std::io::Error::new(std::io::ErrorKind::InvalidInput, e.to_string()),
            })
        })?;
        Ok(Self { inner, hook })
    }
}

impl fmt::Debug for HookVerifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HookVerifier").finish_non_exhaustive()
    }
}

impl ServerCertVerifier for HookVerifier {
    fn verify_server_cert(
        &self,
        end_entity: &CertificateDer<'_>,
        intermediates: &[CertificateDer<'_>],
        server_name: &ServerName<'_>,
        ocsp_response: &[u8],
        now: UnixTime,
    ) -> std::result::Result<ServerCertVerified, rustls::Error> {
        let preverified = self
            .inner
            .verify_server_cert(end_entity, intermediates, server_name, ocsp_response, now)
            .is_ok();

        let mut chain = Vec::with_capacity(intermediates.len() + 1);
        chain.push(end_entity.clone());
        chain.extend(intermediates.iter().cloned());

        if (self.hook)(preverified, &chain) {
            Ok(ServerCertVerified::assertion())
        } else {
            Err(rustls::Error::InvalidCertificate(
                CertificateError::ApplicationVerificationFailure,
            ))
        }
    }

    fn verify_tls12_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> std::result::Result<HandshakeSignatureValid, rustls::Error> {
        self.inner.verify_tls12_signature(message, cert, dss)
    }

    fn verify_tls13_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> std::result::Result<HandshakeSignatureValid, rustls::Error> {
        self.inner.verify_tls13_signature(message, cert, dss)
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        self.inner.supported_verify_schemes()
    }
}
