//! Accepts TCP/TLS connections and drives the per-connection SMTP dialog.

pub mod command;
pub mod data;
pub mod session;

use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio::time::timeout;
use tokio_rustls::rustls::ServerConfig;
use tokio_rustls::TlsAcceptor;
use tracing::{debug, error, info, warn};

use crate::config::Config;
use crate::envelope::Envelope;
use crate::id::IdGenerator;
use command::Command;
use data::{read_data, DataResult};
use session::{Outcome, Session, SessionState};

pub(crate) const MAX_MESSAGE_SIZE_DEFAULT: u64 = 26_214_400;

const CMD_TIMEOUT: Duration = Duration::from_secs(4 * 60);
const DATA_TIMEOUT: Duration = Duration::from_secs(10 * 60);
const TLS_HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(4 * 60);

/// Runs the SMTP listeners (plain and, if configured, implicit-TLS) and
/// spawns one task per accepted connection.
pub struct SmtpServer {
    config: Config,
    id_gen: IdGenerator,
    envelope_tx: mpsc::Sender<Envelope>,
    tls_config: Option<Arc<ServerConfig>>,
    live_connections: Arc<AtomicU64>,
}

impl SmtpServer {
    pub fn new(
        config: Config,
        id_gen: IdGenerator,
        envelope_tx: mpsc::Sender<Envelope>,
        tls_config: Option<Arc<ServerConfig>>,
    ) -> Self {
        SmtpServer {
            config,
            id_gen,
            envelope_tx,
            tls_config,
            live_connections: Arc::new(AtomicU64::new(0)),
        }
    }

    pub async fn run(&self) -> Result<()> {
        let plain_addr = format!("{}:{}", self.config.smtp_listen_to, self.config.smtp_port);
        let plain_listener = TcpListener::bind(&plain_addr)
            .await
            .with_context(|| format!("binding plain SMTP listener on {}", plain_addr))?;
        info!(addr = %plain_addr, "plain SMTP listener bound");

        let secure_listener = if self.tls_config.is_some() {
            let secure_addr = format!("{}:{}", self.config.smtp_listen_to, self.config.smtp_secure_port);
            let listener = TcpListener::bind(&secure_addr)
                .await
                .with_context(|| format!("binding implicit-TLS SMTP listener on {}", secure_addr))?;
            info!(addr = %secure_addr, "implicit-TLS SMTP listener bound");
            Some(listener)
        } else {
            None
        };

        let plain_accept = self.accept_loop(plain_listener, false);
        match secure_listener {
            Some(listener) => {
                let secure_accept = self.accept_loop(listener, true);
                tokio::try_join!(plain_accept, secure_accept)?;
            }
            None => {
                plain_accept.await?;
            }
        }
        Ok(())
    }

    async fn accept_loop(&self, listener: TcpListener, implicit_tls: bool) -> Result<()> {
        loop {
            let (stream, peer) = match listener.accept().await {
                Ok(pair) => pair,
                Err(e) => {
                    error!(error = %e, "accept failed");
                    continue;
                }
            };

            if !self.try_reserve_connection_slot() {
                warn!(%peer, "connection refused: max_client_connections reached");
                drop(stream);
                continue;
            }

            let id_gen = self.id_gen.clone();
            let envelope_tx = self.envelope_tx.clone();
            let tls_config = self.tls_config.clone();
            let config = self.config.clone();
            let live_connections = Arc::clone(&self.live_connections);

            tokio::spawn(async move {
                if let Err(e) =
                    handle_connection(stream, peer, implicit_tls, config, id_gen, envelope_tx, tls_config).await
                {
                    debug!(%peer, error = %e, "connection ended with error");
                }
                live_connections.fetch_sub(1, Ordering::SeqCst);
            });
        }
    }

    fn try_reserve_connection_slot(&self) -> bool {
        let max = self.config.max_client_connections;
        let mut current = self.live_connections.load(Ordering::SeqCst);
        loop {
            if current >= max {
                return false;
            }
            match self.live_connections.compare_exchange_weak(
                current,
                current + 1,
                Ordering::SeqCst,
                Ordering::SeqCst,
            ) {
                Ok(_) => return true,
                Err(observed) => current = observed,
            }
        }
    }
}

async fn handle_connection(
    stream: TcpStream,
    peer: SocketAddr,
    implicit_tls: bool,
    config: Config,
    id_gen: IdGenerator,
    envelope_tx: mpsc::Sender<Envelope>,
    tls_config: Option<Arc<ServerConfig>>,
) -> Result<()> {
    stream.set_nodelay(true).ok();

    if implicit_tls {
        let acceptor = TlsAcceptor::from(tls_config.clone().context("implicit TLS requested without TLS config")?);
        let tls_stream = timeout(TLS_HANDSHAKE_TIMEOUT, acceptor.accept(stream))
            .await
            .context("TLS handshake timed out")??;
        run_session(Box::new(tls_stream), peer, true, config, id_gen, envelope_tx, tls_config).await
    } else {
        run_session(Box::new(stream), peer, false, config, id_gen, envelope_tx, tls_config).await
    }
}

/// Type-erased connection stream. Using a trait object (rather than a
/// generic `S`) keeps the STARTTLS self-recursion below from nesting
/// `TlsStream<TlsStream<...>>` types indefinitely, which otherwise defeats
/// the compiler's auto-trait (`Send`) recursion limit.
trait AsyncStream: AsyncRead + AsyncWrite + Unpin + Send {}
impl<T: AsyncRead + AsyncWrite + Unpin + Send> AsyncStream for T {}

/// Boxed because STARTTLS re-enters this function on the upgraded stream
/// with a different concrete `S`, which an `async fn` cannot recurse into
/// without heap-allocating the continuation.
fn run_session(
    stream: Box<dyn AsyncStream>,
    peer: SocketAddr,
    tls_on_accept: bool,
    config: Config,
    id_gen: IdGenerator,
    envelope_tx: mpsc::Sender<Envelope>,
    tls_config: Option<Arc<ServerConfig>>,
) -> std::pin::Pin<Box<dyn std::future::Future<Output = Result<()>> + Send>> {
    Box::pin(run_session_inner(
        stream,
        peer,
        tls_on_accept,
        config,
        id_gen,
        envelope_tx,
        tls_config,
    ))
}

async fn run_session_inner(
    stream: Box<dyn AsyncStream>,
    peer: SocketAddr,
    tls_on_accept: bool,
    config: Config,
    id_gen: IdGenerator,
    envelope_tx: mpsc::Sender<Envelope>,
    tls_config: Option<Arc<ServerConfig>>,
) -> Result<()> {
    let (read_half, mut write_half) = tokio::io::split(stream);
    let mut reader = BufReader::new(read_half);

    let mut session = Session::new(
        &id_gen,
        peer.ip(),
        peer.port(),
        tls_on_accept,
        tls_config.is_some(),
        &config,
    )
    .await;

    write_line(
        &mut write_half,
        &format!("220 {} {}", config.smtp_server_name, config.reply_greeting),
    )
    .await?;

    loop {
        if session.state == SessionState::ReceivingData {
            let result = timeout(DATA_TIMEOUT, read_data(&mut reader, config.max_message_size)).await??;
            match result {
                DataResult::Ok(message) => {
                    let reply = session.finish_data(message, &session.envelope.id.clone());
                    write_line(&mut write_half, &reply).await?;
                    let envelope = session.envelope.clone();
                    if envelope_tx.send(envelope).await.is_err() {
                        warn!(%peer, "envelope channel closed, dropping accepted message");
                    }
                }
                DataResult::TooLarge => {
                    session.state = SessionState::PostData;
                    write_line(&mut write_half, "552 Message size exceeds fixed maximum message size").await?;
                }
            }
            continue;
        }

        let mut line = String::new();
        let bytes_read = timeout(CMD_TIMEOUT, reader_read_line(&mut reader, &mut line)).await??;
        if bytes_read == 0 {
            info!(%peer, "connection closed by peer");
            break;
        }
        let trimmed = line.trim_end_matches(['\r', '\n']);

        let parsed = command::parse(trimmed, config.max_message_size);
        if parsed.is_rejected() {
            write_line(&mut write_half, &parsed.response).await?;
            if session.register_bad_command() {
                break;
            }
            continue;
        }
        let cmd = parsed.cmd.expect("non-rejected parse always yields a command");

        match session.apply(cmd, &parsed.argument, &id_gen).await {
            Outcome::Reply(reply) => {
                write_line(&mut write_half, &reply).await?;
            }
            Outcome::EnterData(reply) => {
                write_line(&mut write_half, &reply).await?;
            }
            Outcome::StartTls(reply) => {
                write_line(&mut write_half, &reply).await?;
                let Some(tls_cfg) = tls_config.clone() else {
                    continue;
                };
                let acceptor = TlsAcceptor::from(tls_cfg);
                let plain = reader.into_inner().unsplit(write_half);
                let tls_stream = timeout(TLS_HANDSHAKE_TIMEOUT, acceptor.accept(plain))
                    .await
                    .context("STARTTLS handshake timed out")??;
                return run_session(
                    Box::new(tls_stream),
                    peer,
                    true,
                    config,
                    id_gen,
                    envelope_tx,
                    None,
                )
                .await;
            }
            Outcome::Close(reply) => {
                write_line(&mut write_half, &reply).await?;
                break;
            }
        }
        if cmd == Command::Quit {
            break;
        }
    }

    Ok(())
}

async fn reader_read_line<R: tokio::io::AsyncBufRead + Unpin>(
    reader: &mut R,
    line: &mut String,
) -> std::io::Result<usize> {
    use tokio::io::AsyncBufReadExt;
    reader.read_line(line).await
}

async fn write_line<W: AsyncWriteExt + Unpin>(writer: &mut W, line: &str) -> Result<()> {
    writer.write_all(line.as_bytes()).await?;
    writer.write_all(b"\r\n").await?;
    writer.flush().await?;
    Ok(())
}

/// Builds a `rustls::ServerConfig` from PEM-encoded certificate and key
/// files. Returns `None` when no TLS paths are configured.
pub fn load_tls_config(cert_path: &str, key_path: &str) -> Result<Option<Arc<ServerConfig>>> {
    if cert_path.is_empty() || key_path.is_empty() {
        return Ok(None);
    }
    let certs = load_certs(cert_path)?;
    let key = load_key(key_path)?;

    let mut server_config = ServerConfig::builder()
        .with_no_client_auth()
        .with_single_cert(certs, key)
        .context("building rustls ServerConfig")?;
    server_config.alpn_protocols = vec![b"smtp".to_vec()];
    Ok(Some(Arc::new(server_config)))
}

fn load_certs(path: &str) -> Result<Vec<tokio_rustls::rustls::pki_types::CertificateDer<'static>>> {
    let file = std::fs::File::open(path).with_context(|| format!("opening certificate file {}", path))?;
    let mut reader = std::io::BufReader::new(file);
    rustls_pemfile::certs(&mut reader)
        .collect::<Result<Vec<_>, _>>()
        .with_context(|| format!("parsing certificate file {}", path))
}

fn load_key(path: &str) -> Result<tokio_rustls::rustls::pki_types::PrivateKeyDer<'static>> {
    let file = std::fs::File::open(path).with_context(|| format!("opening private key file {}", path))?;
    let mut reader = std::io::BufReader::new(file);
    rustls_pemfile::private_key(&mut reader)
        .context("parsing private key file")?
        .context("no private key found in file")
}
