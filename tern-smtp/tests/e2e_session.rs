//! End-to-end tests over loopback TCP: a real server, a line-based client.
#![allow(clippy::expect_used, clippy::unwrap_used)]

use std::{
    net::SocketAddr,
    sync::{
        Arc,
        atomic::{AtomicUsize, Ordering},
    },
    time::Duration,
};

use pretty_assertions::assert_eq;
use tern_common::error::SessionError;
use tern_smtp::{
    ClientCertificateValidator, EndpointDefinition, MemoryMessageStore, ServerOptions, Services,
    SessionEvent, SmtpServer, command::Mailbox, tls::ServerCertificate,
};
use tokio::{
    io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader},
    net::TcpStream,
    sync::mpsc::{self, UnboundedReceiver, error::TryRecvError},
    task::JoinHandle,
    time::timeout,
};
use tokio_rustls::{
    TlsConnector,
    rustls::{
        ClientConfig, DigitallySignedStruct, SignatureScheme,
        client::danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier},
        crypto::aws_lc_rs,
        pki_types::{CertificateDer, PrivateKeyDer, PrivatePkcs8KeyDer, ServerName, UnixTime},
    },
};
use tokio_util::sync::CancellationToken;

struct Client<S> {
    stream: BufReader<S>,
}

impl<S: AsyncRead + AsyncWrite + Unpin> Client<S> {
    fn new(stream: S) -> Self {
        Self {
            stream: BufReader::new(stream),
        }
    }

    async fn send(&mut self, line: &str) {
        self.stream
            .write_all(format!("{line}\r\n").as_bytes())
            .await
            .expect("send");
        self.stream.flush().await.expect("flush");
    }

    async fn reply(&mut self) -> (u16, Vec<String>) {
        let mut lines = Vec::new();
        loop {
            let mut line = String::new();
            let read = timeout(Duration::from_secs(5), self.stream.read_line(&mut line))
                .await
                .expect("reply in time")
                .expect("reply");
            assert!(read > 0, "connection closed while waiting for a reply");

            let code = line[..3].parse().expect("reply code");
            let last = line.as_bytes()[3] == b' ';
            lines.push(line[4..].trim_end().to_string());

            if last {
                return (code, lines);
            }
        }
    }

    async fn code(&mut self, line: &str) -> u16 {
        self.send(line).await;
        self.reply().await.0
    }

    async fn is_closed(&mut self) -> bool {
        let mut line = String::new();
        matches!(
            timeout(Duration::from_secs(5), self.stream.read_line(&mut line)).await,
            Ok(Ok(0) | Err(_))
        )
    }

    fn into_inner(self) -> S {
        self.stream.into_inner()
    }
}

struct Running {
    addresses: Vec<SocketAddr>,
    cancel: CancellationToken,
    server: JoinHandle<()>,
    events: UnboundedReceiver<SessionEvent>,
}

impl Running {
    async fn stop(self) -> UnboundedReceiver<SessionEvent> {
        self.cancel.cancel();
        timeout(Duration::from_secs(5), self.server)
            .await
            .expect("server stops in time")
            .expect("server task");
        self.events
    }
}

fn loopback() -> EndpointDefinition {
    EndpointDefinition::builder().with_socket("127.0.0.1:0".parse().expect("socket"))
}

async fn start(server: SmtpServer) -> Running {
    let (sender, events) = mpsc::unbounded_channel();
    let bound = server
        .with_options(ServerOptions::builder().with_name("mx.test.local"))
        .with_events(sender)
        .bind()
        .await
        .expect("bind");

    let addresses = bound.local_addrs();
    let cancel = CancellationToken::new();
    let server = tokio::spawn(bound.serve(cancel.clone()));

    Running {
        addresses,
        cancel,
        server,
        events,
    }
}

fn key_material(name: &str) -> (CertificateDer<'static>, PrivateKeyDer<'static>) {
    let rcgen::CertifiedKey { cert, key_pair } =
        rcgen::generate_simple_self_signed(vec![name.to_string()]).expect("certificate");

    (
        cert.der().clone(),
        PrivateKeyDer::Pkcs8(PrivatePkcs8KeyDer::from(key_pair.serialize_der())),
    )
}

fn certificate() -> ServerCertificate {
    let (cert, key) = key_material("localhost");
    ServerCertificate::new(vec![cert], key)
}

/// Counts client certificates it is shown and answers with a fixed verdict.
struct Verdict {
    accept: bool,
    seen: Arc<AtomicUsize>,
}

impl Verdict {
    fn new(accept: bool) -> (Self, Arc<AtomicUsize>) {
        let seen = Arc::new(AtomicUsize::new(0));
        (
            Self {
                accept,
                seen: seen.clone(),
            },
            seen,
        )
    }
}

impl ClientCertificateValidator for Verdict {
    fn validate(&self, _: &CertificateDer<'_>, _: &[CertificateDer<'_>]) -> bool {
        self.seen.fetch_add(1, Ordering::SeqCst);
        self.accept
    }
}

/// Accepts any server certificate.
#[derive(Debug)]
struct NoVerifier;

impl ServerCertVerifier for NoVerifier {
    fn verify_server_cert(
        &self,
        _end_entity: &CertificateDer<'_>,
        _intermediates: &[CertificateDer<'_>],
        _server_name: &ServerName<'_>,
        _ocsp_response: &[u8],
        _now: UnixTime,
    ) -> Result<ServerCertVerified, tokio_rustls::rustls::Error> {
        Ok(ServerCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        _message: &[u8],
        _cert: &CertificateDer<'_>,
        _dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, tokio_rustls::rustls::Error> {
        Ok(HandshakeSignatureValid::assertion())
    }

    fn verify_tls13_signature(
        &self,
        _message: &[u8],
        _cert: &CertificateDer<'_>,
        _dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, tokio_rustls::rustls::Error> {
        Ok(HandshakeSignatureValid::assertion())
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        vec![
            SignatureScheme::RSA_PKCS1_SHA256,
            SignatureScheme::RSA_PSS_SHA256,
            SignatureScheme::ECDSA_NISTP256_SHA256,
            SignatureScheme::ED25519,
        ]
    }
}

fn connector() -> TlsConnector {
    let config = ClientConfig::builder_with_provider(Arc::new(aws_lc_rs::default_provider()))
        .with_safe_default_protocol_versions()
        .expect("protocol versions")
        .dangerous()
        .with_custom_certificate_verifier(Arc::new(NoVerifier))
        .with_no_client_auth();

    TlsConnector::from(Arc::new(config))
}

fn connector_with_client_certificate() -> TlsConnector {
    let (cert, key) = key_material("client.example");
    let config = ClientConfig::builder_with_provider(Arc::new(aws_lc_rs::default_provider()))
        .with_safe_default_protocol_versions()
        .expect("protocol versions")
        .dangerous()
        .with_custom_certificate_verifier(Arc::new(NoVerifier))
        .with_client_auth_cert(vec![cert], key)
        .expect("client certificate");

    TlsConnector::from(Arc::new(config))
}

fn localhost() -> ServerName<'static> {
    ServerName::try_from("localhost").expect("name")
}

async fn connect(address: SocketAddr) -> Client<TcpStream> {
    Client::new(TcpStream::connect(address).await.expect("connect"))
}

#[tokio::test]
async fn delivers_a_message() {
    let store = MemoryMessageStore::new();
    let running = start(
        SmtpServer::builder()
            .with_endpoint(loopback())
            .with_services(Services::builder().with_message_store(store.clone())),
    )
    .await;

    let mut client = connect(running.addresses[0]).await;
    assert_eq!(client.reply().await.0, 220);
    assert_eq!(client.code("EHLO client.example").await, 250);
    assert_eq!(client.code("MAIL FROM:<from@sample.com>").await, 250);
    assert_eq!(client.code("RCPT TO:<to@sample.com>").await, 250);
    assert_eq!(client.code("DATA").await, 354);
    client.send("Subject: two lines").await;
    client.send(".. and a stuffed one").await;
    assert_eq!(client.code(".").await, 250);
    assert_eq!(client.code("QUIT").await, 221);
    assert!(client.is_closed().await);

    let mut events = running.stop().await;
    assert!(matches!(events.recv().await, Some(SessionEvent::Created { .. })));
    assert!(matches!(events.recv().await, Some(SessionEvent::Completed { .. })));

    let messages = store.messages().await;
    assert_eq!(messages.len(), 1);
    assert_eq!(
        &messages[0].content[..],
        b"Subject: two lines\r\n. and a stuffed one\r\n"
    );
    assert_eq!(messages[0].to, vec![Mailbox::new("to", "sample.com")]);
}

#[tokio::test]
async fn starttls_upgrades_once() {
    let running = start(
        SmtpServer::builder().with_endpoint(loopback().with_certificate(certificate())),
    )
    .await;

    let mut client = connect(running.addresses[0]).await;
    assert_eq!(client.reply().await.0, 220);

    client.send("EHLO client.example").await;
    let (code, capabilities) = client.reply().await;
    assert_eq!(code, 250);
    assert!(capabilities.contains(&"STARTTLS".to_string()));
    assert!(!capabilities.iter().any(|line| line.starts_with("AUTH")));

    assert_eq!(client.code("STARTTLS").await, 220);

    let stream = connector()
        .connect(ServerName::try_from("localhost").expect("name"), client.into_inner())
        .await
        .expect("handshake");
    let mut client = Client::new(stream);

    client.send("EHLO client.example").await;
    let (code, capabilities) = client.reply().await;
    assert_eq!(code, 250);
    assert!(!capabilities.contains(&"STARTTLS".to_string()));
    assert!(capabilities.contains(&"AUTH PLAIN LOGIN".to_string()));

    assert_eq!(client.code("STARTTLS").await, 501);
    assert_eq!(client.code("MAIL FROM:<from@sample.com>").await, 250);
    assert_eq!(client.code("QUIT").await, 221);

    running.stop().await;
}

#[tokio::test]
async fn plaintext_pipelined_behind_starttls_is_discarded() {
    let running = start(
        SmtpServer::builder().with_endpoint(loopback().with_certificate(certificate())),
    )
    .await;

    let mut client = connect(running.addresses[0]).await;
    assert_eq!(client.reply().await.0, 220);
    assert_eq!(client.code("EHLO client.example").await, 250);

    // Both commands leave in a single write.
    client.send("STARTTLS\r\nNOOP").await;
    assert_eq!(client.reply().await.0, 220);

    let stream = connector()
        .connect(localhost(), client.into_inner())
        .await
        .expect("handshake");
    let mut client = Client::new(stream);

    client.send("EHLO client.example").await;
    let (code, capabilities) = client.reply().await;
    assert_eq!(code, 250);
    assert_eq!(capabilities[0], "mx.test.local Hello client.example");
    assert!(capabilities.contains(&"AUTH PLAIN LOGIN".to_string()));

    assert_eq!(client.code("QUIT").await, 221);
    assert!(client.is_closed().await);

    let mut events = running.stop().await;
    assert!(matches!(events.recv().await, Some(SessionEvent::Created { .. })));
    assert!(matches!(events.recv().await, Some(SessionEvent::Completed { .. })));
}

#[tokio::test]
async fn starttls_consults_the_certificate_validator() {
    let (validator, seen) = Verdict::new(true);
    let running = start(
        SmtpServer::builder()
            .with_endpoint(loopback().with_certificate(certificate()))
            .with_services(Services::builder().with_certificate_validator(validator)),
    )
    .await;

    let mut client = connect(running.addresses[0]).await;
    assert_eq!(client.reply().await.0, 220);
    assert_eq!(client.code("EHLO client.example").await, 250);
    assert_eq!(client.code("STARTTLS").await, 220);

    let stream = connector_with_client_certificate()
        .connect(localhost(), client.into_inner())
        .await
        .expect("handshake");
    let mut client = Client::new(stream);

    assert_eq!(client.code("EHLO client.example").await, 250);
    assert_eq!(client.code("QUIT").await, 221);
    assert_eq!(seen.load(Ordering::SeqCst), 1);

    let mut events = running.stop().await;
    assert!(matches!(events.recv().await, Some(SessionEvent::Created { .. })));
    assert!(matches!(events.recv().await, Some(SessionEvent::Completed { .. })));
}

#[tokio::test]
async fn rejected_client_certificate_ends_the_session() {
    let (validator, seen) = Verdict::new(false);
    let running = start(
        SmtpServer::builder()
            .with_endpoint(
                loopback()
                    .with_secure(true)
                    .with_certificate(certificate()),
            )
            .with_services(Services::builder().with_certificate_validator(validator)),
    )
    .await;

    let stream = TcpStream::connect(running.addresses[0]).await.expect("connect");
    // TLS 1.3 clients only learn of the rejection on their first read.
    if let Ok(stream) = connector_with_client_certificate()
        .connect(localhost(), stream)
        .await
    {
        assert!(Client::new(stream).is_closed().await);
    }
    assert_eq!(seen.load(Ordering::SeqCst), 1);

    let mut events = running.stop().await;
    assert!(matches!(events.recv().await, Some(SessionEvent::Created { .. })));
    assert!(matches!(
        events.recv().await,
        Some(SessionEvent::Faulted { error, .. }) if matches!(*error, SessionError::Tls(_))
    ));
}

#[tokio::test]
async fn implicit_tls_sessions_are_announced_after_the_handshake() {
    let mut running = start(
        SmtpServer::builder().with_endpoint(
            loopback()
                .with_secure(true)
                .with_certificate(certificate()),
        ),
    )
    .await;

    let stream = TcpStream::connect(running.addresses[0]).await.expect("connect");
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(matches!(running.events.try_recv(), Err(TryRecvError::Empty)));

    let stream = connector()
        .connect(localhost(), stream)
        .await
        .expect("handshake");
    let mut client = Client::new(stream);
    assert_eq!(client.reply().await.0, 220);

    assert!(matches!(
        running.events.recv().await,
        Some(SessionEvent::Created { .. })
    ));
    assert_eq!(client.code("QUIT").await, 221);

    let mut events = running.stop().await;
    assert!(matches!(events.recv().await, Some(SessionEvent::Completed { .. })));
}

#[tokio::test]
async fn implicit_tls_endpoint() {
    let running = start(
        SmtpServer::builder().with_endpoint(
            loopback()
                .with_secure(true)
                .with_certificate(certificate()),
        ),
    )
    .await;

    let stream = TcpStream::connect(running.addresses[0]).await.expect("connect");
    let stream = connector()
        .connect(ServerName::try_from("localhost").expect("name"), stream)
        .await
        .expect("handshake");
    let mut client = Client::new(stream);

    assert_eq!(
        client.reply().await,
        (220, vec!["mx.test.local ESMTP ready".to_string()])
    );
    assert_eq!(client.code("HELO client.example").await, 250);
    assert_eq!(client.code("STARTTLS").await, 501);
    assert_eq!(client.code("QUIT").await, 221);

    running.stop().await;
}

#[tokio::test]
async fn secure_endpoint_without_certificate_fails_to_bind() {
    let result = SmtpServer::builder()
        .with_endpoint(loopback().with_secure(true))
        .bind()
        .await;
    assert!(result.is_err());

    assert!(SmtpServer::builder().bind().await.is_err());
}

#[tokio::test]
async fn shutdown_cancels_idle_sessions() {
    let running = start(
        SmtpServer::builder()
            .with_endpoint(loopback())
            .with_endpoint(loopback()),
    )
    .await;
    assert_eq!(running.addresses.len(), 2);

    let mut first = connect(running.addresses[0]).await;
    let mut second = connect(running.addresses[1]).await;
    assert_eq!(first.reply().await.0, 220);
    assert_eq!(second.reply().await.0, 220);
    assert_eq!(second.code("HELO client.example").await, 250);

    let mut events = running.stop().await;
    assert!(first.is_closed().await);
    assert!(second.is_closed().await);

    let mut cancelled = 0;
    while let Ok(event) = events.try_recv() {
        if matches!(event, SessionEvent::Cancelled { .. }) {
            cancelled += 1;
        }
    }
    assert_eq!(cancelled, 2);
}
