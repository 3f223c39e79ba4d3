//! In-process fake IMAP server for integration testing
//!
//! ## Connection lifecycle
//!
//! ```text
//!   Client connects via TCP
//!       |
//!   Server sends greeting: "* OK IMAP4rev1 ready\r\n"
//!       |
//!   Client sends STARTTLS, TLS handshake
//!       |
//!   Client sends LOGIN (checked against USERNAME / PASSWORD)
//!       |
//!   Client issues commands: LIST, STATUS, SELECT, UID FETCH, ...
//!       |
//!   Client sends LOGOUT
//! ```
//!
//! Every client command starts with a **tag** that the server echoes
//! in its completion response. Lines prefixed with `*` are untagged
//! data sent before the tagged OK/NO/BAD.
//!
//! The server counts open connections so tests can assert that every
//! session the gateway opens is also closed. `ServerOptions` switches
//! off `UIDPLUS` or makes UID FETCH misbehave.

use super::handlers::{
    FetchFault, FetchItems, StoreArgs, handle_capability, handle_expunge, handle_list,
    handle_login, handle_logout, handle_select, handle_status,
    handle_uid_expunge, handle_uid_fetch, handle_uid_store, parse_uid_set,
};
use super::io::write_line;
use super::mailbox::Mailbox;
use imap_codec::CommandCodec;
use imap_codec::decode::Decoder;
use imap_codec::imap_types::command::CommandBody;
use imap_codec::imap_types::mailbox::Mailbox as ImapMailbox;
use rcgen::generate_simple_self_signed;
use rustls::pki_types::PrivatePkcs8KeyDer;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, BufReader};
use tokio::net::TcpListener;
use tokio_rustls::TlsAcceptor;

/// The only account the fake server accepts.
pub const USERNAME: &str = "testuser";
pub const PASSWORD: &str = "testpass";

/// Behaviour switches for a fake server.
#[derive(Debug, Clone, Copy)]
pub struct ServerOptions {
    /// Advertise `UIDPLUS` and accept `UID EXPUNGE`.
    pub uidplus: bool,
    /// Misbehave on every UID FETCH.
    pub fetch_fault: Option<FetchFault>,
}

impl Default for ServerOptions {
    fn default() -> Self {
        Self {
            uidplus: true,
            fetch_fault: None,
        }
    }
}

/// A fake IMAP server that runs on localhost with an OS-assigned port.
///
/// The server generates a self-signed TLS certificate at startup using
/// `rcgen`, so clients must be configured to accept invalid certs.
pub struct FakeImapServer {
    port: u16,
    mailbox: Arc<Mutex<Mailbox>>,
    open_connections: Arc<AtomicUsize>,
    /// Handle to the background task so it lives as long as the server.
    _handle: tokio::task::JoinHandle<()>,
}

impl FakeImapServer {
    /// Start a new fake IMAP server with the given mailbox state.
    ///
    /// The server runs until the `FakeImapServer` is dropped.
    pub async fn start(mailbox: Mailbox) -> Self {
        Self::start_with(mailbox, ServerOptions::default()).await
    }

    /// Start a server with non-default behaviour.
    pub async fn start_with(mailbox: Mailbox, options: ServerOptions) -> Self {
        // Several tests may race to install the provider; only the
        // first one wins and that is fine.
        let _ = rustls::crypto::ring::default_provider().install_default();

        let listener = TcpListener::bind("127.0.0.1:0")
            .await
            .expect("bind to ephemeral port");
        let port = listener.local_addr().unwrap().port();

        let cert = generate_simple_self_signed(vec!["127.0.0.1".to_string()])
            .expect("generate self-signed cert");
        let cert_der = cert.cert.der().clone();
        let key_der = PrivatePkcs8KeyDer::from(cert.key_pair.serialize_der());

        let tls_config = rustls::ServerConfig::builder()
            .with_no_client_auth()
            .with_single_cert(vec![cert_der], key_der.into())
            .expect("build server TLS config");

        let acceptor = TlsAcceptor::from(Arc::new(tls_config));
        let mailbox = Arc::new(Mutex::new(mailbox));
        let open_connections = Arc::new(AtomicUsize::new(0));

        let shared = mailbox.clone();
        let counter = open_connections.clone();
        let handle = tokio::spawn(async move {
            loop {
                let Ok((stream, _addr)) = listener.accept().await else {
                    break;
                };
                let acceptor = acceptor.clone();
                let mailbox = shared.clone();
                let guard = ConnectionGuard::new(counter.clone());
                tokio::spawn(async move {
                    handle_connection(stream, acceptor, &mailbox, options).await;
                    drop(guard);
                });
            }
        });

        Self {
            port,
            mailbox,
            open_connections,
            _handle: handle,
        }
    }

    /// The port the server is listening on.
    pub const fn port(&self) -> u16 {
        self.port
    }

    /// A copy of the current mailbox state.
    pub fn snapshot(&self) -> Mailbox {
        self.mailbox.lock().unwrap().clone()
    }

    /// Number of client connections currently open.
    pub fn open_connections(&self) -> usize {
        self.open_connections.load(Ordering::SeqCst)
    }

    /// Wait until every client connection has been closed.
    ///
    /// The client may return before the server task has noticed the
    /// socket closing, so this polls for a short while.
    pub async fn wait_until_idle(&self) -> usize {
        for _ in 0..100 {
            if self.open_connections() == 0 {
                return 0;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        self.open_connections()
    }
}

/// Tracks one open connection for as long as it is alive.
struct ConnectionGuard(Arc<AtomicUsize>);

impl ConnectionGuard {
    fn new(counter: Arc<AtomicUsize>) -> Self {
        counter.fetch_add(1, Ordering::SeqCst);
        Self(counter)
    }
}

impl Drop for ConnectionGuard {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Handle a single IMAP client connection: greeting, STARTTLS, then
/// the command loop over TLS.
async fn handle_connection(
    stream: tokio::net::TcpStream,
    acceptor: TlsAcceptor,
    mailbox: &Mutex<Mailbox>,
    options: ServerOptions,
) {
    let mut reader = BufReader::new(stream);

    if write_line(&mut reader, "* OK IMAP4rev1 Fake server ready\r\n")
        .await
        .is_err()
    {
        return;
    }

    let mut line = String::new();
    match reader.read_line(&mut line).await {
        Ok(0) | Err(_) => return,
        Ok(_) => {}
    }

    let mut parts = line.split_whitespace();
    let tag = parts.next().unwrap_or("*");
    if !parts.next().is_some_and(|c| c.eq_ignore_ascii_case("STARTTLS")) {
        let resp = format!("{tag} BAD Expected STARTTLS\r\n");
        let _ = write_line(&mut reader, &resp).await;
        return;
    }

    let resp = format!("{tag} OK Begin TLS negotiation now\r\n");
    if write_line(&mut reader, &resp).await.is_err() {
        return;
    }

    let tcp = reader.into_inner();
    let Ok(tls_stream) = acceptor.accept(tcp).await else {
        return;
    };

    handle_imap_session(tls_stream, mailbox, options).await;
}

/// Extract the folder name from a parsed `imap_types::Mailbox`.
fn mailbox_name(mb: &ImapMailbox<'_>) -> String {
    match mb {
        ImapMailbox::Inbox => "INBOX".to_string(),
        ImapMailbox::Other(other) => {
            let bytes: &[u8] = other.as_ref();
            String::from_utf8_lossy(bytes).into_owned()
        }
    }
}

/// Pull the two LOGIN arguments out of the raw command line.
fn login_args(line: &str) -> (String, String) {
    let mut args = line
        .split_whitespace()
        .skip(2)
        .map(|a| a.trim_matches('"').to_string());
    (args.next().unwrap_or_default(), args.next().unwrap_or_default())
}

/// The UID set of a raw `<tag> UID EXPUNGE <set>` line.
fn uid_expunge_set(line: &str) -> Option<&str> {
    let mut words = line.split_whitespace().skip(1);
    let uid = words.next()?;
    let expunge = words.next()?;
    if uid.eq_ignore_ascii_case("UID") && expunge.eq_ignore_ascii_case("EXPUNGE") {
        words.next()
    } else {
        None
    }
}

/// Run the IMAP command loop over an established stream.
///
/// Uses `imap-codec`'s `CommandCodec` to parse each client command and
/// dispatches on the `CommandBody` variant. Read handlers get a
/// snapshot; write handlers lock the shared mailbox briefly.
async fn handle_imap_session<S: AsyncRead + AsyncWrite + Unpin>(
    stream: S,
    mailbox: &Mutex<Mailbox>,
    options: ServerOptions,
) {
    let mut reader = BufReader::new(stream);
    let mut authenticated = false;
    let mut selected_folder: Option<String> = None;
    let codec = CommandCodec::default();

    loop {
        let mut line = String::new();
        match reader.read_line(&mut line).await {
            Ok(0) | Err(_) => break,
            Ok(_) => {}
        }

        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }

        if let Some(set) = uid_expunge_set(trimmed) {
            let tag = trimmed.split_whitespace().next().unwrap_or("*");
            if authenticated && options.uidplus {
                let max_uid = selected_folder
                    .as_deref()
                    .and_then(|f| mailbox.lock().unwrap().uids(f).into_iter().max())
                    .unwrap_or(0);
                let uids = parse_uid_set(set, max_uid);
                handle_uid_expunge(tag, &uids, mailbox, selected_folder.as_deref(), &mut reader)
                    .await;
            } else {
                let resp = format!("{tag} BAD Unknown command\r\n");
                if write_line(&mut reader, &resp).await.is_err() {
                    break;
                }
            }
            continue;
        }

        let Ok((_, command)) = codec.decode(line.as_bytes()) else {
            let tag = trimmed.split_whitespace().next().unwrap_or("*");
            let resp = format!("{tag} BAD Parse error\r\n");
            if write_line(&mut reader, &resp).await.is_err() {
                break;
            }
            continue;
        };

        let tag = command.tag.inner();

        match command.body {
            CommandBody::Capability => {
                handle_capability(tag, options.uidplus, &mut reader).await;
            }
            CommandBody::Login { .. } => {
                let (user, pass) = login_args(trimmed);
                authenticated = handle_login(tag, &user, &pass, &mut reader).await;
            }
            CommandBody::Logout => {
                handle_logout(tag, &mut reader).await;
                break;
            }
            _ if !authenticated => {
                let resp = format!("{tag} NO Not authenticated\r\n");
                if write_line(&mut reader, &resp).await.is_err() {
                    break;
                }
            }
            CommandBody::List { .. } => {
                let snap = mailbox.lock().unwrap().clone();
                handle_list(tag, &snap, &mut reader).await;
            }
            CommandBody::Status { mailbox: mb, .. } => {
                let snap = mailbox.lock().unwrap().clone();
                handle_status(tag, &mailbox_name(&mb), &snap, &mut reader).await;
            }
            CommandBody::Select { mailbox: mb, .. } => {
                let snap = mailbox.lock().unwrap().clone();
                selected_folder = handle_select(tag, &mailbox_name(&mb), &snap, &mut reader).await;
            }
            CommandBody::Fetch {
                ref sequence_set,
                uid: true,
                ..
            } => {
                let keep_open = handle_uid_fetch(
                    tag,
                    sequence_set,
                    FetchItems::from_line(trimmed),
                    options.fetch_fault,
                    mailbox,
                    selected_folder.as_deref(),
                    &mut reader,
                )
                .await;
                if !keep_open {
                    break;
                }
            }
            CommandBody::Store {
                ref sequence_set,
                ref kind,
                ref response,
                ref flags,
                uid: true,
                ..
            } => {
                let args = StoreArgs {
                    sequence_set,
                    kind,
                    response,
                    flags,
                };
                handle_uid_store(tag, &args, mailbox, selected_folder.as_deref(), &mut reader)
                    .await;
            }
            CommandBody::Expunge => {
                handle_expunge(tag, mailbox, selected_folder.as_deref(), &mut reader).await;
            }
            _ => {
                let resp = format!("{tag} BAD Unknown command\r\n");
                if write_line(&mut reader, &resp).await.is_err() {
                    break;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn login_args_strip_quotes() {
        assert_eq!(
            login_args("A1 LOGIN \"testuser\" \"testpass\""),
            ("testuser".to_string(), "testpass".to_string())
        );
        assert_eq!(
            login_args("A1 LOGIN bare secret"),
            ("bare".to_string(), "secret".to_string())
        );
    }

    #[test]
    fn recognises_uid_expunge_lines() {
        assert_eq!(uid_expunge_set("A7 UID EXPUNGE 2"), Some("2"));
        assert_eq!(uid_expunge_set("a8 uid expunge 1:3"), Some("1:3"));
        assert_eq!(uid_expunge_set("A9 UID FETCH 1:* (FLAGS)"), None);
        assert_eq!(uid_expunge_set("A10 EXPUNGE"), None);
    }
}
