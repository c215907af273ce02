use std::{
    net::{Ipv4Addr, SocketAddr},
    time::Duration,
};

use serde::{Deserialize, Deserializer, de::Error as _};

use crate::{
    error::{TlsError, TlsResult},
    tls::{ServerCertificate, TlsContext, TlsVersion},
};

const DEFAULT_COMMAND_WAIT: Duration = Duration::from_secs(300);

const fn default_command_wait() -> Duration {
    DEFAULT_COMMAND_WAIT
}

/// Seconds, whole or fractional, as a [`Duration`].
fn seconds<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
    let seconds = f64::deserialize(deserializer)?;
    Duration::try_from_secs_f64(seconds).map_err(D::Error::custom)
}

const fn default_socket() -> SocketAddr {
    SocketAddr::new(std::net::IpAddr::V4(Ipv4Addr::LOCALHOST), 25)
}

/// One address the server listens on, and how sessions on it behave.
#[derive(Clone, Debug, Deserialize)]
pub struct EndpointDefinition {
    #[serde(default = "default_socket")]
    socket: SocketAddr,
    /// Upgrade to TLS as soon as the connection is accepted.
    #[serde(default)]
    is_secure: bool,
    #[serde(default)]
    allow_unsecure_authentication: bool,
    #[serde(default)]
    authentication_required: bool,
    #[serde(
        rename = "command_wait_secs",
        default = "default_command_wait",
        deserialize_with = "seconds"
    )]
    command_wait: Duration,
    #[serde(default)]
    protocols: Vec<TlsVersion>,
    #[serde(default)]
    tls: Option<TlsContext>,
    #[serde(skip)]
    certificate: Option<ServerCertificate>,
}

impl Default for EndpointDefinition {
    fn default() -> Self {
        Self {
            socket: default_socket(),
            is_secure: false,
            allow_unsecure_authentication: false,
            authentication_required: false,
            command_wait: DEFAULT_COMMAND_WAIT,
            protocols: Vec::new(),
            tls: None,
            certificate: None,
        }
    }
}

impl EndpointDefinition {
    /// Create a new `EndpointDefinition` builder
    #[must_use]
    pub fn builder() -> Self {
        Self::default()
    }

    #[must_use]
    pub const fn with_socket(mut self, socket: SocketAddr) -> Self {
        self.socket = socket;
        self
    }

    /// Shorthand for a loopback endpoint on `port` (0 picks a free one)
    #[must_use]
    pub const fn with_port(mut self, port: u16) -> Self {
        self.socket = SocketAddr::new(std::net::IpAddr::V4(Ipv4Addr::LOCALHOST), port);
        self
    }

    #[must_use]
    pub const fn with_secure(mut self, is_secure: bool) -> Self {
        self.is_secure = is_secure;
        self
    }

    #[must_use]
    pub const fn with_unsecure_authentication(mut self, allow: bool) -> Self {
        self.allow_unsecure_authentication = allow;
        self
    }

    #[must_use]
    pub const fn with_authentication_required(mut self, required: bool) -> Self {
        self.authentication_required = required;
        self
    }

    #[must_use]
    pub const fn with_command_wait(mut self, wait: Duration) -> Self {
        self.command_wait = wait;
        self
    }

    #[must_use]
    pub fn with_protocols(mut self, protocols: Vec<TlsVersion>) -> Self {
        self.protocols = protocols;
        self
    }

    #[must_use]
    pub fn with_tls(mut self, tls: TlsContext) -> Self {
        self.tls = Some(tls);
        self
    }

    /// Use an already loaded certificate instead of reading PEM files
    #[must_use]
    pub fn with_certificate(mut self, certificate: ServerCertificate) -> Self {
        self.certificate = Some(certificate);
        self
    }

    /// Load the configured certificate, if any, and check the endpoint is usable.
    ///
    /// # Errors
    /// Returns a [`TlsError`] if the certificate cannot be loaded, or the
    /// endpoint is secure without one.
    pub fn init(&mut self) -> TlsResult<()> {
        if self.certificate.is_none() {
            if let Some(tls) = &self.tls {
                self.certificate = Some(ServerCertificate::load(tls)?);
            }
        }

        if self.is_secure && self.certificate.is_none() {
            return Err(TlsError::MissingCertificate(self.socket.to_string()));
        }

        Ok(())
    }

    #[must_use]
    pub const fn socket(&self) -> SocketAddr {
        self.socket
    }

    #[must_use]
    pub const fn is_secure(&self) -> bool {
        self.is_secure
    }

    #[must_use]
    pub const fn allow_unsecure_authentication(&self) -> bool {
        self.allow_unsecure_authentication
    }

    #[must_use]
    pub const fn authentication_required(&self) -> bool {
        self.authentication_required
    }

    #[must_use]
    pub const fn command_wait(&self) -> Duration {
        self.command_wait
    }

    #[must_use]
    pub fn protocols(&self) -> &[TlsVersion] {
        &self.protocols
    }

    #[must_use]
    pub const fn certificate(&self) -> Option<&ServerCertificate> {
        self.certificate.as_ref()
    }

    #[must_use]
    pub const fn has_certificate(&self) -> bool {
        self.certificate.is_some()
    }
}

/// Server-wide settings shared by every session.
#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct ServerOptions {
    /// Host name used in the greeting and in HELO/EHLO replies.
    pub name: String,
    /// Largest message accepted, in bytes. 0 means unlimited.
    pub max_message_size: usize,
    /// Consecutive rejected commands tolerated before disconnecting.
    pub max_retry_count: usize,
    pub max_authentication_attempts: usize,
    pub network_buffer_size: usize,
}

impl Default for ServerOptions {
    fn default() -> Self {
        Self {
            name: std::env::var("HOSTNAME").unwrap_or_else(|_| "localhost".to_string()),
            max_message_size: 0,
            max_retry_count: 5,
            max_authentication_attempts: 3,
            network_buffer_size: 8192,
        }
    }
}

impl ServerOptions {
    /// Create a new `ServerOptions` builder
    #[must_use]
    pub fn builder() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    #[must_use]
    pub const fn with_max_message_size(mut self, size: usize) -> Self {
        self.max_message_size = size;
        self
    }

    #[must_use]
    pub const fn with_max_retry_count(mut self, count: usize) -> Self {
        self.max_retry_count = count;
        self
    }

    #[must_use]
    pub const fn with_max_authentication_attempts(mut self, attempts: usize) -> Self {
        self.max_authentication_attempts = attempts;
        self
    }

    #[must_use]
    pub const fn with_network_buffer_size(mut self, size: usize) -> Self {
        self.network_buffer_size = size;
        self
    }

    /// Returns `true` if `size` is over the configured limit.
    #[must_use]
    pub const fn exceeds_message_size(&self, size: usize) -> bool {
        self.max_message_size > 0 && size > self.max_message_size
    }
}

#[cfg(test)]
mod test {
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn endpoint_from_toml() {
        let endpoint: EndpointDefinition = toml::from_str(
            r#"
            socket = "0.0.0.0:587"
            allow_unsecure_authentication = true
            command_wait_secs = 30
            protocols = ["tls13"]
            "#,
        )
        .expect("valid endpoint");

        assert_eq!(endpoint.socket(), "0.0.0.0:587".parse().expect("socket"));
        assert!(endpoint.allow_unsecure_authentication());
        assert!(!endpoint.authentication_required());
        assert!(!endpoint.is_secure());
        assert_eq!(endpoint.command_wait(), Duration::from_secs(30));
        assert_eq!(endpoint.protocols(), &[TlsVersion::Tls13]);
        assert!(!endpoint.has_certificate());
    }

    #[test]
    fn command_wait_keeps_fractions() {
        let endpoint: EndpointDefinition =
            toml::from_str("command_wait_secs = 0.25").expect("valid endpoint");
        assert_eq!(endpoint.command_wait(), Duration::from_millis(250));

        let endpoint = EndpointDefinition::builder().with_command_wait(Duration::from_millis(500));
        assert_eq!(endpoint.command_wait(), Duration::from_millis(500));

        assert!(toml::from_str::<EndpointDefinition>("command_wait_secs = -1").is_err());
    }

    #[test]
    fn defaults() {
        let endpoint = EndpointDefinition::builder();
        assert_eq!(endpoint.command_wait(), Duration::from_secs(300));

        let options = ServerOptions::builder().with_name("mx.example.com");
        assert_eq!(options.name, "mx.example.com");
        assert_eq!(options.max_retry_count, 5);
        assert_eq!(options.max_authentication_attempts, 3);
        assert!(!options.exceeds_message_size(usize::MAX));
        assert!(options.with_max_message_size(10).exceeds_message_size(11));
    }

    #[test]
    fn secure_endpoint_requires_certificate() {
        let mut endpoint = EndpointDefinition::builder().with_secure(true);
        assert!(matches!(
            endpoint.init(),
            Err(TlsError::MissingCertificate(_))
        ));

        let mut endpoint = EndpointDefinition::builder()
            .with_secure(true)
            .with_certificate(crate::tls::test::self_signed());
        assert!(endpoint.init().is_ok());
        assert!(endpoint.has_certificate());
    }
}
