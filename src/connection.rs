//! Shared IMAP connection and TLS helpers
//!
//! Provides the low-level `open()`, `select()` and `close()` functions
//! the IMAP worker strings together for every call. A session is
//! opened per operation and never handed out beyond it.

use crate::config::{ImapConfig, TlsMode};
use crate::error::{Error, Result};
use async_imap::Session;
use async_imap::types::Mailbox as SelectedMailbox;
use rustls::pki_types::ServerName;
use std::fmt;
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;
use tokio_rustls::TlsConnector;
use tokio_util::compat::{Compat, TokioAsyncReadCompatExt};
use tracing::{debug, info, warn};

/// Any byte stream an IMAP session can run over (plain TCP or TLS).
pub trait ImapTransport: AsyncRead + AsyncWrite + Unpin + Send + fmt::Debug {}

impl<T: AsyncRead + AsyncWrite + Unpin + Send + fmt::Debug> ImapTransport for T {}

/// An authenticated IMAP session over whichever transport the
/// configuration asked for.
pub type ImapSession = Session<Compat<Box<dyn ImapTransport>>>;

/// Build a rustls client configuration.
///
/// Verifies against the platform trust store unless the config opts
/// into accepting any certificate (local bridges with self-signed
/// certs).
pub(crate) fn tls_client_config(accept_invalid_certs: bool) -> Result<rustls::ClientConfig> {
    let builder = rustls::ClientConfig::builder_with_provider(Arc::new(
        rustls::crypto::ring::default_provider(),
    ))
    .with_safe_default_protocol_versions()
    .map_err(|e| Error::Connection(format!("TLS setup failed: {e}")))?;

    if accept_invalid_certs {
        return Ok(builder
            .dangerous()
            .with_custom_certificate_verifier(Arc::new(AcceptAnyCertificate))
            .with_no_client_auth());
    }

    let mut roots = rustls::RootCertStore::empty();
    let native = rustls_native_certs::load_native_certs()
        .map_err(|e| Error::Connection(format!("Cannot load trust roots: {e}")))?;
    let (added, ignored) = roots.add_parsable_certificates(native);
    debug!("Loaded {} trust roots ({} ignored)", added, ignored);

    Ok(builder.with_root_certificates(roots).with_no_client_auth())
}

async fn tls_handshake(config: &ImapConfig, tcp: TcpStream) -> Result<Box<dyn ImapTransport>> {
    let connector = TlsConnector::from(Arc::new(tls_client_config(config.accept_invalid_certs)?));
    let server_name = ServerName::try_from(config.host.clone())
        .map_err(|e| Error::Connection(format!("Invalid server name: {e}")))?;

    let tls_stream = connector
        .connect(server_name, tcp)
        .await
        .map_err(|e| Error::Connection(format!("TLS handshake failed: {e}")))?;
    Ok(Box::new(tls_stream))
}

/// Open a fresh, authenticated IMAP session.
///
/// Connects to `config.host:config.port` via TCP, secures the stream
/// according to `config.tls` (implicit TLS, STARTTLS, or none), and
/// logs in. Anything opened before a failure is dropped, which closes
/// the socket.
pub async fn open(config: &ImapConfig) -> Result<ImapSession> {
    let addr = format!("{}:{}", config.host, config.port);
    debug!("Connecting to IMAP server at {} ({:?})", addr, config.tls);

    let tcp_stream = TcpStream::connect(&addr)
        .await
        .map_err(|e| Error::Connection(format!("Cannot reach {addr}: {e}")))?;

    let transport: Box<dyn ImapTransport> = match config.tls {
        TlsMode::Off => Box::new(tcp_stream),
        TlsMode::Implicit => tls_handshake(config, tcp_stream).await?,
        TlsMode::StartTls => {
            let mut client = async_imap::Client::new(tcp_stream.compat());
            client
                .run_command_and_check_ok("STARTTLS", None)
                .await
                .map_err(|e| Error::imap("STARTTLS", e))?;

            let inner = client.into_inner().into_inner();
            tls_handshake(config, inner).await?
        }
    };

    let client = async_imap::Client::new(transport.compat());

    debug!("Authenticating as {}", config.username);
    let session = client
        .login(&config.username, &config.password)
        .await
        .map_err(|(e, _)| login_error(e))?;

    info!("Connected to IMAP server at {}", addr);
    Ok(session)
}

fn login_error(err: async_imap::error::Error) -> Error {
    use async_imap::error::Error as ImapError;

    match err {
        ImapError::No(msg) | ImapError::Bad(msg) => Error::Auth(msg),
        other => Error::imap("LOGIN", other),
    }
}

/// SELECT a mailbox on an existing session.
///
/// A tagged `NO` means the server does not know the mailbox (or will
/// not let us open it), which callers see as `MailboxNotFound`.
pub async fn select(session: &mut ImapSession, mailbox: &str) -> Result<SelectedMailbox> {
    use async_imap::error::Error as ImapError;

    debug!("Selecting {}", mailbox);
    session.select(mailbox).await.map_err(|e| match e {
        ImapError::No(_) => Error::MailboxNotFound(mailbox.to_string()),
        other => Error::imap("SELECT", other),
    })
}

/// LOGOUT and drop the session.
///
/// The outcome of the operation is already decided by the time this
/// runs, so a failing LOGOUT is only logged. Dropping the session
/// closes the transport either way.
pub async fn close(mut session: ImapSession) {
    if let Err(e) = session.logout().await {
        warn!("IMAP logout failed: {}", e);
    }
    debug!("IMAP session closed");
}

/// Certificate verifier that accepts all certificates
/// (for local bridges with self-signed certs).
#[derive(Debug)]
struct AcceptAnyCertificate;

impl rustls::client::danger::ServerCertVerifier for AcceptAnyCertificate {
    fn verify_server_cert(
        &self,
        _end_entity: &rustls::pki_types::CertificateDer<'_>,
        _intermediates: &[rustls::pki_types::CertificateDer<'_>],
        _server_name: &rustls::pki_types::ServerName<'_>,
        _ocsp_response: &[u8],
        _now: rustls::pki_types::UnixTime,
    ) -> std::result::Result<rustls::client::danger::ServerCertVerified, rustls::Error> {
        Ok(rustls::client::danger::ServerCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        _message: &[u8],
        _cert: &rustls::pki_types::CertificateDer<'_>,
        _dss: &rustls::DigitallySignedStruct,
    ) -> std::result::Result<rustls::client::danger::HandshakeSignatureValid, rustls::Error> {
        Ok(rustls::client::danger::HandshakeSignatureValid::assertion())
    }

    fn verify_tls13_signature(
        &self,
        _message: &[u8],
        _cert: &rustls::pki_types::CertificateDer<'_>,
        _dss: &rustls::DigitallySignedStruct,
    ) -> std::result::Result<rustls::client::danger::HandshakeSignatureValid, rustls::Error> {
        Ok(rustls::client::danger::HandshakeSignatureValid::assertion())
    }

    fn supported_verify_schemes(&self) -> Vec<rustls::SignatureScheme> {
        rustls::crypto::ring::default_provider()
            .signature_verification_algorithms
            .supported_schemes()
    }
}
