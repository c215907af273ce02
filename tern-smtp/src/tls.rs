use std::{
    fmt::{self, Debug, Formatter},
    fs::File,
    io::BufReader,
    path::{Path, PathBuf},
    sync::Arc,
};

use serde::Deserialize;
use tokio_rustls::{
    TlsAcceptor,
    rustls::{
        self, CertificateError, DigitallySignedStruct, DistinguishedName, ServerConfig,
        SignatureScheme, SupportedProtocolVersion,
        client::danger::HandshakeSignatureValid,
        crypto::{CryptoProvider, verify_tls12_signature, verify_tls13_signature},
        pki_types::{CertificateDer, PrivateKeyDer, UnixTime},
        server::danger::{ClientCertVerified, ClientCertVerifier},
    },
};

use crate::error::{TlsError, TlsResult};

/// Where to find an endpoint's certificate chain and private key.
#[derive(Clone, Debug, Deserialize, PartialEq, Eq)]
pub struct TlsContext {
    pub certificate: PathBuf,
    pub key: PathBuf,
}

/// TLS protocol versions an endpoint may negotiate.
#[derive(Clone, Copy, Debug, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum TlsVersion {
    Tls12,
    Tls13,
}

impl TlsVersion {
    const fn supported(self) -> &'static SupportedProtocolVersion {
        match self {
            Self::Tls12 => &rustls::version::TLS12,
            Self::Tls13 => &rustls::version::TLS13,
        }
    }
}

/// Approves or rejects the certificate a client presents during the handshake.
pub trait ClientCertificateValidator: Send + Sync {
    fn validate(
        &self,
        end_entity: &CertificateDer<'_>,
        intermediates: &[CertificateDer<'_>],
    ) -> bool;
}

impl<F> ClientCertificateValidator for F
where
    F: Fn(&CertificateDer<'_>, &[CertificateDer<'_>]) -> bool + Send + Sync,
{
    fn validate(
        &self,
        end_entity: &CertificateDer<'_>,
        intermediates: &[CertificateDer<'_>],
    ) -> bool {
        self(end_entity, intermediates)
    }
}

/// A loaded certificate chain and its private key.
pub struct ServerCertificate {
    chain: Vec<CertificateDer<'static>>,
    key: PrivateKeyDer<'static>,
}

impl ServerCertificate {
    #[must_use]
    pub const fn new(chain: Vec<CertificateDer<'static>>, key: PrivateKeyDer<'static>) -> Self {
        Self { chain, key }
    }

    /// Load the PEM encoded chain and key named by `context`.
    ///
    /// # Errors
    /// Returns a [`TlsError`] if either file cannot be read or holds no usable item.
    pub fn load(context: &TlsContext) -> TlsResult<Self> {
        let chain =
            load_certs(&context.certificate).map_err(|source| TlsError::CertificateLoad {
                path: context.certificate.display().to_string(),
                source,
            })?;

        if chain.is_empty() {
            return Err(TlsError::CertificateLoad {
                path: context.certificate.display().to_string(),
                source: std::io::Error::new(
                    std::io::ErrorKind::InvalidData,
                    "no certificates found",
                ),
            });
        }

        Ok(Self {
            chain,
            key: load_key(&context.key)?,
        })
    }

    #[must_use]
    pub fn chain(&self) -> &[CertificateDer<'static>] {
        &self.chain
    }
}

impl Clone for ServerCertificate {
    fn clone(&self) -> Self {
        Self {
            chain: self.chain.clone(),
            key: self.key.clone_key(),
        }
    }
}

impl Debug for ServerCertificate {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServerCertificate")
            .field("chain", &self.chain.len())
            .finish_non_exhaustive()
    }
}

fn load_certs(path: &Path) -> std::io::Result<Vec<CertificateDer<'static>>> {
    rustls_pemfile::certs(&mut BufReader::new(File::open(path)?)).collect()
}

fn load_key(path: &Path) -> TlsResult<PrivateKeyDer<'static>> {
    let path_str = path.display().to_string();
    let mut reader = BufReader::new(File::open(path).map_err(|e| TlsError::KeyLoad {
        path: path_str.clone(),
        reason: e.to_string(),
    })?);

    rustls_pemfile::private_key(&mut reader)
        .map_err(|e| TlsError::KeyLoad {
            path: path_str.clone(),
            reason: e.to_string(),
        })?
        .ok_or_else(|| TlsError::KeyLoad {
            path: path_str,
            reason: "Unable to determine key file format (expected PKCS1, PKCS8, or SEC1)"
                .to_string(),
        })
}

fn provider() -> Arc<CryptoProvider> {
    CryptoProvider::get_default()
        .cloned()
        .unwrap_or_else(|| Arc::new(rustls::crypto::aws_lc_rs::default_provider()))
}

/// Build a TLS acceptor for `certificate`, restricted to `protocols` (all
/// supported versions when empty). With a validator, clients are asked for a
/// certificate but may decline.
///
/// # Errors
/// Returns a [`TlsError`] if rustls rejects the protocol set or the key.
pub fn acceptor(
    certificate: &ServerCertificate,
    protocols: &[TlsVersion],
    validator: Option<Arc<dyn ClientCertificateValidator>>,
) -> TlsResult<TlsAcceptor> {
    let provider = provider();
    let versions = if protocols.is_empty() {
        rustls::DEFAULT_VERSIONS.to_vec()
    } else {
        protocols.iter().map(|v| v.supported()).collect()
    };

    let builder =
        ServerConfig::builder_with_provider(provider.clone()).with_protocol_versions(&versions)?;

    let builder = match validator {
        Some(validator) => builder.with_client_cert_verifier(Arc::new(ValidatingVerifier {
            validator,
            provider,
        })),
        None => builder.with_no_client_auth(),
    };

    let config = builder.with_single_cert(certificate.chain.clone(), certificate.key.clone_key())?;

    Ok(TlsAcceptor::from(Arc::new(config)))
}

/// Hands client certificates to a [`ClientCertificateValidator`], leaving
/// signature checks to the crypto provider.
struct ValidatingVerifier {
    validator: Arc<dyn ClientCertificateValidator>,
    provider: Arc<CryptoProvider>,
}

impl Debug for ValidatingVerifier {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.debug_struct("ValidatingVerifier").finish_non_exhaustive()
    }
}

impl ClientCertVerifier for ValidatingVerifier {
    fn offer_client_auth(&self) -> bool {
        true
    }

    fn client_auth_mandatory(&self) -> bool {
        false
    }

    fn root_hint_subjects(&self) -> &[DistinguishedName] {
        &[]
    }

    fn verify_client_cert(
        &self,
        end_entity: &CertificateDer<'_>,
        intermediates: &[CertificateDer<'_>],
        _now: UnixTime,
    ) -> Result<ClientCertVerified, rustls::Error> {
        if self.validator.validate(end_entity, intermediates) {
            Ok(ClientCertVerified::assertion())
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

#[cfg(test)]
pub(crate) mod test {
    use std::io::Write;

    use pretty_assertions::assert_eq;
    use tokio_rustls::rustls::pki_types::PrivatePkcs8KeyDer;

    use super::*;

    pub(crate) fn self_signed() -> ServerCertificate {
        let certified = rcgen::generate_simple_self_signed(vec!["localhost".to_string()])
            .expect("certificate generation");
        ServerCertificate::new(
            vec![certified.cert.der().clone()],
            PrivateKeyDer::Pkcs8(PrivatePkcs8KeyDer::from(certified.key_pair.serialize_der())),
        )
    }

    #[test]
    fn versions_deserialize_lowercase() {
        #[derive(Deserialize)]
        struct Wrapper {
            protocols: Vec<TlsVersion>,
        }

        let wrapper: Wrapper =
            toml::from_str(r#"protocols = ["tls12", "tls13"]"#).expect("valid toml");
        assert_eq!(wrapper.protocols, vec![TlsVersion::Tls12, TlsVersion::Tls13]);
    }

    #[test]
    fn acceptor_builds_with_and_without_validator() {
        let certificate = self_signed();
        assert!(acceptor(&certificate, &[], None).is_ok());
        assert!(acceptor(&certificate, &[TlsVersion::Tls13], None).is_ok());

        fn accept_all(_: &CertificateDer<'_>, _: &[CertificateDer<'_>]) -> bool {
            true
        }

        let validator: Arc<dyn ClientCertificateValidator> = Arc::new(accept_all);
        assert!(acceptor(&certificate, &[TlsVersion::Tls12], Some(validator)).is_ok());
    }

    #[test]
    fn load_from_pem_files() {
        let certified = rcgen::generate_simple_self_signed(vec!["localhost".to_string()])
            .expect("certificate generation");

        let dir = tempfile::tempdir().expect("tempdir");
        let cert_path = dir.path().join("cert.pem");
        let key_path = dir.path().join("key.pem");
        File::create(&cert_path)
            .and_then(|mut f| f.write_all(certified.cert.pem().as_bytes()))
            .expect("write certificate");
        File::create(&key_path)
            .and_then(|mut f| f.write_all(certified.key_pair.serialize_pem().as_bytes()))
            .expect("write key");

        let loaded = ServerCertificate::load(&TlsContext {
            certificate: cert_path,
            key: key_path.clone(),
        })
        .expect("load");
        assert_eq!(loaded.chain().len(), 1);

        let missing = ServerCertificate::load(&TlsContext {
            certificate: dir.path().join("missing.pem"),
            key: key_path,
        });
        assert!(matches!(missing, Err(TlsError::CertificateLoad { .. })));
    }
}
