//! Per-connection session state and the command-sequence transition table.

use std::net::IpAddr;
use std::time::SystemTime;

use mailparse::{addrparse, MailAddr};

use crate::config::Config;
use crate::envelope::{Envelope, MailAddress};
use crate::id::IdGenerator;
use crate::smtp::command::Command;

const BAD_COMMAND_BUDGET: u32 = 5;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Initial,
    Helo,
    Mail,
    Rcpt,
    ReceivingData,
    PostData,
    Quit,
}

/// Outcome of feeding one parsed command into the state machine.
pub enum Outcome {
    /// Send this reply, stay connected.
    Reply(String),
    /// Send this reply (or replies, one per line already joined by the
    /// caller), then switch the reader into dot-terminated DATA mode.
    EnterData(String),
    /// Send this reply, then begin a TLS handshake on the same socket.
    StartTls(String),
    /// Send this reply, then close the connection.
    Close(String),
}

pub struct Session {
    pub state: SessionState,
    pub tls_on: bool,
    pub tls_available: bool,
    pub mail_initiated: bool,
    pub bad_cmd_count: u32,
    pub envelope: Envelope,
    pub server_name: String,
    max_message_size: u64,
    reply_ok: String,
    reply_message_accepted: String,
    reply_closing: String,
    reply_send_data: String,
}

impl Session {
    pub async fn new(
        id_gen: &IdGenerator,
        remote_ip: IpAddr,
        remote_port: u16,
        tls_on_accept: bool,
        tls_available: bool,
        config: &Config,
    ) -> Self {
        let id = id_gen.next_id().await.unwrap_or_else(|| "unknown".into());
        let mut envelope = Envelope::new(id, remote_ip, remote_port, SystemTime::now());
        envelope.securely_delivered = tls_on_accept;
        Session {
            state: SessionState::Initial,
            tls_on: tls_on_accept,
            tls_available,
            mail_initiated: false,
            bad_cmd_count: 0,
            envelope,
            server_name: config.smtp_server_name.clone(),
            max_message_size: config.max_message_size,
            reply_ok: config.reply_ok.clone(),
            reply_message_accepted: config.reply_message_accepted.clone(),
            reply_closing: config.reply_closing.clone(),
            reply_send_data: config.reply_send_data.clone(),
        }
    }

    async fn reset_envelope(&mut self, id_gen: &IdGenerator) {
        let id = id_gen.next_id().await.unwrap_or_else(|| "unknown".into());
        let remote_ip = self.envelope.remote_ip;
        let remote_port = self.envelope.remote_port;
        let mut envelope = Envelope::new(id, remote_ip, remote_port, SystemTime::now());
        envelope.securely_delivered = self.tls_on;
        self.envelope = envelope;
        self.mail_initiated = false;
    }

    fn ehlo_capabilities(&self) -> String {
        let mut lines = vec![
            format!("250-{}", self.server_name),
            "250-PIPELINING".to_string(),
            format!("250-SIZE {}", self.max_message_size),
            "250-VRFY".to_string(),
            "250-HELP".to_string(),
            "250-8BITMIME".to_string(),
        ];
        if self.tls_available && !self.tls_on {
            lines.push("250-STARTTLS".to_string());
        }
        lines.push("250 SMTPUTF8".to_string());
        lines.join("\r\n")
    }

    /// Applies one successfully-parsed command. `bad_sequence` replies never
    /// change state. Must be called only with commands that passed
    /// [`crate::smtp::command::parse`] without rejection.
    pub async fn apply(
        &mut self,
        cmd: Command,
        argument: &str,
        id_gen: &IdGenerator,
    ) -> Outcome {
        use SessionState::*;

        match cmd {
            Command::Noop => Outcome::Reply(self.reply_ok.clone()),
            Command::Vrfy => Outcome::Reply("252 Cannot VRFY user".to_string()),
            Command::Help => Outcome::Reply("214-Commands\r\n214 HELO EHLO MAIL RCPT DATA RSET NOOP QUIT".to_string()),
            Command::Expn | Command::Auth => Outcome::Reply("502 Command not implemented".to_string()),
            Command::Quit => Outcome::Close(self.reply_closing.clone()),
            Command::Rset => {
                self.reset_envelope(id_gen).await;
                self.state = Initial;
                Outcome::Reply(self.reply_ok.clone())
            }
            Command::StartTls => {
                if self.tls_on || !self.tls_available || !matches!(self.state, Initial | Helo) {
                    return bad_sequence();
                }
                Outcome::StartTls("220 Ready to start TLS".to_string())
            }
            Command::Helo => {
                log_claimed_hostname(argument);
                self.state = Helo;
                Outcome::Reply(format!("250 {}", self.server_name))
            }
            Command::Ehlo => {
                log_claimed_hostname(argument);
                self.state = Helo;
                Outcome::Reply(self.ehlo_capabilities())
            }
            Command::MailFrom => {
                if self.state != Helo {
                    return bad_sequence();
                }
                match parse_address(argument) {
                    Some(addr) => {
                        self.envelope.from = MailAddress::new(addr);
                        self.mail_initiated = true;
                        self.state = Mail;
                        Outcome::Reply(self.reply_ok.clone())
                    }
                    None => address_error(),
                }
            }
            Command::RcptTo => {
                if !matches!(self.state, Mail | Rcpt) {
                    return bad_sequence();
                }
                match parse_address(argument) {
                    Some(addr) => {
                        if self.envelope.to.is_empty() {
                            self.envelope.to = MailAddress::new(addr);
                        } else {
                            self.envelope.forward.push(MailAddress::new(addr));
                        }
                        self.state = Rcpt;
                        Outcome::Reply(self.reply_ok.clone())
                    }
                    None => address_error(),
                }
            }
            Command::Data => {
                if self.state != Rcpt {
                    return bad_sequence();
                }
                self.state = ReceivingData;
                Outcome::EnterData(self.reply_send_data.clone())
            }
        }
    }

    pub fn register_bad_command(&mut self) -> bool {
        self.bad_cmd_count += 1;
        self.bad_cmd_count >= BAD_COMMAND_BUDGET
    }

    pub fn finish_data(&mut self, message: Vec<u8>, id_gen_hint: &str) -> String {
        self.envelope.message = message;
        self.envelope.headers =
            crate::envelope::mime::MimePartsExtractor::headers(&self.envelope.message).unwrap_or_default();
        self.envelope.body = mailparse::parse_mail(&self.envelope.message)
            .map(|m| m.get_body_raw().unwrap_or_default())
            .unwrap_or_default();
        self.state = SessionState::PostData;
        if self.reply_message_accepted.contains("{}") {
            self.reply_message_accepted.replacen("{}", id_gen_hint, 1)
        } else {
            format!("{} {}", self.reply_message_accepted, id_gen_hint)
        }
    }
}

/// Best-effort breadcrumb only: a HELO/EHLO hostname that doesn't resolve an
/// MX record is logged as suspicious but never rejected.
fn log_claimed_hostname(hostname: &str) {
    tracing::debug!(claimed_hostname = hostname, "HELO/EHLO hostname recorded, no MX verification performed inline");
}

fn bad_sequence() -> Outcome {
    Outcome::Reply("503 Bad command sequence".to_string())
}

fn address_error() -> Outcome {
    Outcome::Reply("451 Requested action aborted: error in processing".to_string())
}

/// Strips the outer `< >` (if present) and applies an RFC 5322 address
/// parse. Returns `None` on malformed input; an empty address (`MAIL
/// FROM:<>`) parses successfully to the empty string.
fn parse_address(raw: &str) -> Option<String> {
    let inner = raw
        .trim()
        .trim_start_matches('<')
        .trim_end_matches('>')
        .trim();
    if inner.is_empty() {
        return Some(String::new());
    }
    match addrparse(inner) {
        Ok(list) => match list.iter().next() {
            Some(MailAddr::Single(info)) => Some(info.addr.clone()),
            _ => None,
        },
        Err(_) => None,
    }
}
