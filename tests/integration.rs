//! Black-box SMTP scenarios driven over real loopback TCP against a
//! `SmtpServer` bound to an ephemeral port, with an in-process storage
//! engine standing in for the durable one.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use honeymail::config::Config;
use honeymail::envelope::Envelope;
use honeymail::id::IdGenerator;
use honeymail::smtp::SmtpServer;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio::time::timeout;

async fn spawn_server() -> (SocketAddr, mpsc::Receiver<Envelope>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener); // just reserving a free port number; SmtpServer binds its own

    let mut config = Config::from_env().unwrap_or_else(|_| test_config());
    config.smtp_listen_to = "127.0.0.1".to_string();
    config.smtp_port = addr.port();
    config.smtp_secure_port = 0;

    let (envelope_tx, envelope_rx) = mpsc::channel(16);
    let id_gen = IdGenerator::spawn(16);
    let server = SmtpServer::new(config, id_gen, envelope_tx, None);

    tokio::spawn(async move {
        let _ = server.run().await;
    });

    // Give the listener a moment to bind before the first connect.
    tokio::time::sleep(Duration::from_millis(50)).await;
    (addr, envelope_rx)
}

fn test_config() -> Config {
    std::env::set_var("HONEYMAIL_PORT", "0");
    Config::from_env().unwrap()
}

struct Client {
    reader: BufReader<tokio::net::tcp::OwnedReadHalf>,
    writer: tokio::net::tcp::OwnedWriteHalf,
}

impl Client {
    async fn connect(addr: SocketAddr) -> Self {
        let stream = TcpStream::connect(addr).await.unwrap();
        let (r, w) = stream.into_split();
        Client {
            reader: BufReader::new(r),
            writer: w,
        }
    }

    async fn read_reply(&mut self) -> String {
        let mut line = String::new();
        timeout(Duration::from_secs(5), self.reader.read_line(&mut line))
            .await
            .expect("timed out waiting for reply")
            .unwrap();
        line
    }

    async fn send(&mut self, line: &str) {
        self.writer.write_all(line.as_bytes()).await.unwrap();
        self.writer.write_all(b"\r\n").await.unwrap();
        self.writer.flush().await.unwrap();
    }
}

#[tokio::test]
async fn happy_path_single_recipient() {
    let (addr, mut rx) = spawn_server().await;
    let mut client = Client::connect(addr).await;

    assert!(client.read_reply().await.starts_with("220"));

    client.send("EHLO mx.example.org").await;
    loop {
        let reply = client.read_reply().await;
        if reply.starts_with("250 ") {
            break;
        }
    }

    client.send("MAIL FROM:<a@x>").await;
    assert!(client.read_reply().await.starts_with("250"));

    client.send("RCPT TO:<b@y>").await;
    assert!(client.read_reply().await.starts_with("250"));

    client.send("DATA").await;
    assert!(client.read_reply().await.starts_with("354"));

    client.send("Subject: hi").await;
    client.send("").await;
    client.send("hello").await;
    client.send(".").await;
    assert!(client.read_reply().await.starts_with("250"));

    client.send("QUIT").await;
    assert!(client.read_reply().await.starts_with("221"));

    let envelope = timeout(Duration::from_secs(5), rx.recv()).await.unwrap().unwrap();
    assert_eq!(envelope.from.address, "a@x");
    assert_eq!(envelope.to.address, "b@y");
    assert!(envelope.forward.is_empty());
}

#[tokio::test]
async fn multiple_recipients_populate_forward_list() {
    let (addr, mut rx) = spawn_server().await;
    let mut client = Client::connect(addr).await;
    client.read_reply().await;

    client.send("HELO x").await;
    client.read_reply().await;
    client.send("MAIL FROM:<a@x>").await;
    client.read_reply().await;
    client.send("RCPT TO:<c@z>").await;
    client.read_reply().await;
    client.send("RCPT TO:<d@z>").await;
    client.read_reply().await;
    client.send("DATA").await;
    client.read_reply().await;
    client.send(".").await;
    client.read_reply().await;

    let envelope = timeout(Duration::from_secs(5), rx.recv()).await.unwrap().unwrap();
    assert_eq!(envelope.to.address, "c@z");
    assert_eq!(envelope.forward.len(), 1);
    assert_eq!(envelope.forward[0].address, "d@z");
}

#[tokio::test]
async fn bad_command_sequence_does_not_advance_state() {
    let (addr, _rx) = spawn_server().await;
    let mut client = Client::connect(addr).await;
    client.read_reply().await;

    client.send("HELO x").await;
    client.read_reply().await;

    client.send("DATA").await;
    assert_eq!(client.read_reply().await.trim(), "503 Bad command sequence");

    client.send("MAIL FROM:<e@w>").await;
    assert!(client.read_reply().await.starts_with("250"));
}

#[tokio::test]
async fn oversize_mail_from_size_parameter_is_refused() {
    let (addr, _rx) = spawn_server().await;
    let mut client = Client::connect(addr).await;
    client.read_reply().await;

    client.send("HELO x").await;
    client.read_reply().await;

    client.send("MAIL FROM:<f@v> SIZE=99999999999").await;
    assert_eq!(client.read_reply().await.trim(), "452 Insufficient storage");
}

#[tokio::test]
async fn five_bad_commands_close_the_connection() {
    let (addr, _rx) = spawn_server().await;
    let mut client = Client::connect(addr).await;
    client.read_reply().await;

    for _ in 0..4 {
        client.send("BOGUS").await;
        assert!(client.read_reply().await.starts_with("500"));
    }
    client.send("BOGUS").await;
    assert!(client.read_reply().await.starts_with("500")); // the fifth bad command's own reply

    // No extra line follows; the server closes right after the fifth reply.
    let closing = client.read_reply().await;
    assert!(closing.is_empty(), "expected EOF, got {:?}", closing);
}
