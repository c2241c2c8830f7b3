//! TLS configuration for connections to MySQL-compatible servers.
//!
//! TLS is negotiated in-band: the client sends an SSLRequest packet after the
//! server greeting and upgrades the socket before the handshake response.

use crate::{Error, Result};
use rustls::{ClientConfig, RootCertStore};
use rustls_pemfile::Item;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// TLS mode matching the `tls` DSN parameter.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum TlsMode {
    /// No TLS (`tls=false`)
    #[default]
    Disabled,
    /// TLS when the server supports it, plaintext otherwise (`tls=preferred`)
    Preferred,
    /// TLS required, certificate not verified (`tls=skip-verify`)
    SkipVerify,
    /// TLS required, certificate verified against trusted roots (`tls=true`)
    Verify,
}

impl TlsMode {
    /// Whether the server certificate is accepted without verification
    pub fn skips_verification(&self) -> bool {
        matches!(self, Self::Preferred | Self::SkipVerify)
    }

    /// Whether the connection must fail when the server lacks TLS support
    pub fn is_required(&self) -> bool {
        matches!(self, Self::SkipVerify | Self::Verify)
    }
}

impl std::fmt::Display for TlsMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Disabled => write!(f, "false"),
            Self::Preferred => write!(f, "preferred"),
            Self::SkipVerify => write!(f, "skip-verify"),
            Self::Verify => write!(f, "true"),
        }
    }
}

impl std::str::FromStr for TlsMode {
    type Err = Error;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "false" | "0" => Ok(Self::Disabled),
            "preferred" => Ok(Self::Preferred),
            "skip-verify" => Ok(Self::SkipVerify),
            "true" | "1" => Ok(Self::Verify),
            _ => Err(Error::Config(format!(
                "invalid tls '{}': expected false, preferred, skip-verify, or true",
                s
            ))),
        }
    }
}

/// Client-side TLS settings, compiled into a rustls `ClientConfig`.
///
/// Without a CA file, server certificates are checked against the system
/// roots, or the bundled Mozilla roots when the system has none.
#[derive(Clone)]
pub struct TlsConfig {
    ca_path: Option<PathBuf>,
    server_name: Option<String>,
    insecure: bool,
    client_config: Arc<ClientConfig>,
}

impl TlsConfig {
    /// Start from verified TLS with the system roots
    pub fn builder() -> TlsConfigBuilder {
        TlsConfigBuilder::default()
    }

    /// Settings implied by a DSN `tls` mode; `None` when TLS is off
    pub fn for_mode(mode: TlsMode) -> Result<Option<TlsConfig>> {
        if mode == TlsMode::Disabled {
            return Ok(None);
        }
        Self::builder()
            .insecure(mode.skips_verification())
            .build()
            .map(Some)
    }

    /// Compiled rustls configuration
    pub fn client_config(&self) -> Arc<ClientConfig> {
        self.client_config.clone()
    }

    /// Name to verify and send as SNI instead of the dialed host
    pub fn server_name(&self) -> Option<&str> {
        self.server_name.as_deref()
    }

    /// Whether any server certificate is accepted
    pub fn is_insecure(&self) -> bool {
        self.insecure
    }
}

impl std::fmt::Debug for TlsConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TlsConfig")
            .field("ca_path", &self.ca_path)
            .field("server_name", &self.server_name)
            .field("insecure", &self.insecure)
            .finish_non_exhaustive()
    }
}

/// Builder for [`TlsConfig`]
#[derive(Debug, Clone, Default)]
pub struct TlsConfigBuilder {
    ca_path: Option<PathBuf>,
    server_name: Option<String>,
    insecure: bool,
}

impl TlsConfigBuilder {
    /// Trust only the certificates in this PEM file
    pub fn ca_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.ca_path = Some(path.into());
        self
    }

    /// Verify the certificate against `name` rather than the dialed host
    pub fn server_name(mut self, name: impl Into<String>) -> Self {
        self.server_name = Some(name.into());
        self
    }

    /// Accept any server certificate (`tls=skip-verify`).
    ///
    /// The session is encrypted but open to man-in-the-middle attacks.
    pub fn insecure(mut self, insecure: bool) -> Self {
        self.insecure = insecure;
        self
    }

    /// Compile the configuration.
    ///
    /// # Errors
    ///
    /// `Error::Config` when the CA file cannot be read or holds no certificate.
    pub fn build(self) -> Result<TlsConfig> {
        let client_config = if self.insecure {
            ClientConfig::builder()
                .dangerous()
                .with_custom_certificate_verifier(Arc::new(danger::NoVerifier))
                .with_no_client_auth()
        } else {
            let roots = match &self.ca_path {
                Some(path) => load_ca_file(path)?,
                None => load_system_roots(),
            };
            ClientConfig::builder()
                .with_root_certificates(roots)
                .with_no_client_auth()
        };

        Ok(TlsConfig {
            ca_path: self.ca_path,
            server_name: self.server_name,
            insecure: self.insecure,
            client_config: Arc::new(client_config),
        })
    }
}

fn load_ca_file(path: &Path) -> Result<RootCertStore> {
    let pem = fs::read(path).map_err(|e| {
        Error::Config(format!("cannot read CA file {}: {}", path.display(), e))
    })?;

    let mut roots = RootCertStore::empty();
    for item in rustls_pemfile::read_all(&mut pem.as_slice()) {
        match item {
            Ok(Item::X509Certificate(cert)) => {
                roots.add(cert).map_err(|e| {
                    Error::Config(format!("bad certificate in {}: {}", path.display(), e))
                })?;
            }
            Ok(_) => {}
            Err(e) => {
                return Err(Error::Config(format!(
                    "cannot parse CA file {}: {}",
                    path.display(),
                    e
                )))
            }
        }
    }

    if roots.is_empty() {
        return Err(Error::Config(format!(
            "no certificates in CA file {}",
            path.display()
        )));
    }
    Ok(roots)
}

fn load_system_roots() -> RootCertStore {
    let native = rustls_native_certs::load_native_certs();
    let mut roots = RootCertStore::empty();
    let (added, ignored) = roots.add_parsable_certificates(native.certs);

    if roots.is_empty() {
        tracing::debug!(
            ignored,
            errors = native.errors.len(),
            "no usable system root certificates, using bundled roots"
        );
        roots.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());
    } else {
        tracing::trace!(added, "loaded system root certificates");
    }
    roots
}

/// Validate a host name for SNI and certificate verification.
///
/// A trailing dot is dropped. Letters, digits, `-`, `.` and `:` (IPv6
/// literals) are accepted.
pub fn parse_server_name(hostname: &str) -> Result<String> {
    let name = hostname.trim_end_matches('.');
    let valid = !name.is_empty()
        && name.len() <= 253
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '.' | ':'));
    if !valid {
        return Err(Error::Config(format!("invalid TLS server name '{}'", hostname)));
    }
    Ok(name.to_string())
}

mod danger {
    use rustls::client::danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier};
    use rustls::pki_types::{CertificateDer, ServerName, UnixTime};
    use rustls::{DigitallySignedStruct, Error, SignatureScheme};

    #[derive(Debug)]
    pub struct NoVerifier;

    impl ServerCertVerifier for NoVerifier {
        fn verify_server_cert(
            &self,
            _end_entity: &CertificateDer<'_>,
            _intermediates: &[CertificateDer<'_>],
            _server_name: &ServerName<'_>,
            _ocsp_response: &[u8],
            _now: UnixTime,
        ) -> Result<ServerCertVerified, Error> {
            Ok(ServerCertVerified::assertion())
        }

        fn verify_tls12_signature(
            &self,
            _message: &[u8],
            _cert: &CertificateDer<'_>,
            _dss: &DigitallySignedStruct,
        ) -> Result<HandshakeSignatureValid, Error> {
            Ok(HandshakeSignatureValid::assertion())
        }

        fn verify_tls13_signature(
            &self,
            _message: &[u8],
            _cert: &CertificateDer<'_>,
            _dss: &DigitallySignedStruct,
        ) -> Result<HandshakeSignatureValid, Error> {
            Ok(HandshakeSignatureValid::assertion())
        }

        fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
            rustls::crypto::aws_lc_rs::default_provider()
                .signature_verification_algorithms
                .supported_schemes()
        }
    }
}
