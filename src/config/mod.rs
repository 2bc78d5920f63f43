//! Manages application configuration loaded from environment variables.
//!
//! This module defines the `Config` struct which holds all runtime settings
//! and provides the `from_env` function to populate this struct. It supports
//! loading variables from a `.env` file via the `dotenv` crate and provides
//! default values for optional settings.

use anyhow::{anyhow, Result};
use serde::{Deserialize, Serialize};
use std::env;
use tracing::info;

/// Holds the application's runtime configuration settings.
///
/// These settings are typically loaded from environment variables via `from_env`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Address the SMTP listeners bind to. (Optional: `HONEYMAIL_LISTEN_TO`, Default: "0.0.0.0")
    pub smtp_listen_to: String,
    /// Plain SMTP port. (Optional: `HONEYMAIL_PORT`, Default: 2525)
    pub smtp_port: u16,
    /// Implicit-TLS SMTP port. (Optional: `HONEYMAIL_SECURE_PORT`, Default: 4650)
    pub smtp_secure_port: u16,
    /// Name the server advertises in its greeting and EHLO response. (Optional: `HONEYMAIL_SERVER_NAME`, Default: "mail.example.com")
    pub smtp_server_name: String,
    /// Domain the honeypot impersonates. (Optional: `HONEYMAIL_DOMAIN`, Default: same as server_name)
    pub smtp_domain: String,

    /// Path to a PEM certificate. Empty disables TLS entirely. (Optional: `HONEYMAIL_TLS_PUBLIC_KEY`)
    pub tls_public_key: String,
    /// Path to the PEM private key matching `tls_public_key`. (Optional: `HONEYMAIL_TLS_PRIVATE_KEY`)
    pub tls_private_key: String,

    /// Live-connection cap enforced by the accept loop. (Optional: `HONEYMAIL_MAX_CLIENT_CONNECTIONS`, Default: 64000)
    pub max_client_connections: u64,
    /// Maximum accepted DATA size in bytes. (Optional: `HONEYMAIL_MAX_MESSAGE_SIZE`, Default: 26214400)
    pub max_message_size: u64,

    /// Filesystem path backing the embedded store. (Optional: `HONEYMAIL_STORAGE_PATH`, Default: "./honeymail-data")
    pub storage_path: String,
    /// Optional path to a MaxMind GeoIP2/GeoLite2 database. Empty disables geo enrichment. (Optional: `HONEYMAIL_GEOIP_DB_PATH`)
    pub geoip_db_path: String,

    /// Endpoint the outbound reporter posts captures to. Empty disables reporting. (Optional: `HONEYMAIL_REPORTER_URL`)
    pub reporter_url: String,
    /// Bounded channel capacity between pipeline stages. (Optional: `HONEYMAIL_CHANNEL_CAPACITY`, Default: 256)
    pub channel_capacity: usize,
    /// Identifier this honeypot reports itself as. (Optional: `HONEYMAIL_SERVICE_NAME`, Default: "smtp")
    pub reporter_service: String,
    /// Credential key sent with every report. (Optional: `HONEYMAIL_REPORTER_KEY`, Default: empty)
    pub reporter_key: String,
    /// Credential secret sent with every report. (Optional: `HONEYMAIL_REPORTER_SECRET`, Default: empty)
    pub reporter_secret: String,
    /// This honeypot's own public IP, reported to the collector. (Optional: `HONEYMAIL_HONEYPOT_IP`, Default: empty)
    pub honeypot_ip: String,
    /// This honeypot's self-reported location. (Optional: `HONEYMAIL_HONEYPOT_LOCATION`, Default: empty)
    pub honeypot_location: String,
    /// This honeypot's hosting provider label. (Optional: `HONEYMAIL_HONEYPOT_PROVIDER`, Default: empty)
    pub honeypot_provider: String,

    /// IP address the liveness endpoint binds to. (Optional: `HONEYMAIL_HEALTH_BIND_ADDRESS`, Default: "0.0.0.0")
    pub health_check_bind_address: String,
    /// Port the liveness endpoint binds to. (Optional: `HONEYMAIL_HEALTH_PORT`, Default: 8080)
    pub health_check_port: u16,

    /// Banner sent on connect, before the server name. (Optional: `HONEYMAIL_REPLY_GREETING`, Default: "ESMTP")
    pub reply_greeting: String,
    /// Reply to a successful `MAIL FROM`/`RCPT TO`/`RSET`/`NOOP`. (Optional: `HONEYMAIL_REPLY_OK`, Default: "250 Okay")
    pub reply_ok: String,
    /// Reply once a `DATA` message has been fully received. (Optional: `HONEYMAIL_REPLY_MESSAGE_ACCEPTED`, Default: "250 Message {} accepted for delivery")
    pub reply_message_accepted: String,
    /// Reply sent right before closing on `QUIT`. (Optional: `HONEYMAIL_REPLY_CLOSING`, Default: "221 Bye")
    pub reply_closing: String,
    /// Reply inviting the dot-terminated message body. (Optional: `HONEYMAIL_REPLY_SEND_DATA`, Default: "354 Send away")
    pub reply_send_data: String,
}

impl Config {
    /// Loads configuration settings from environment variables.
    ///
    /// Reads variables prefixed with `HONEYMAIL_`. Supports loading from a `.env` file
    /// if present. Provides default values for every optional setting, logging
    /// each resolved value so a deployment's effective configuration is visible
    /// in its own startup logs.
    pub fn from_env() -> Result<Self> {
        let _ = dotenv::dotenv();

        let smtp_listen_to = env_or_default("HONEYMAIL_LISTEN_TO", "0.0.0.0");
        let smtp_port = parse_env_or_default("HONEYMAIL_PORT", 2525u16)?;
        let smtp_secure_port = parse_env_or_default("HONEYMAIL_SECURE_PORT", 4650u16)?;
        let smtp_server_name = env_or_default("HONEYMAIL_SERVER_NAME", "mail.example.com");
        let smtp_domain = env::var("HONEYMAIL_DOMAIN").unwrap_or_else(|_| smtp_server_name.clone());

        let tls_public_key = env_or_default("HONEYMAIL_TLS_PUBLIC_KEY", "");
        let tls_private_key = env_or_default("HONEYMAIL_TLS_PRIVATE_KEY", "");

        let max_client_connections = parse_env_or_default("HONEYMAIL_MAX_CLIENT_CONNECTIONS", 64_000u64)?;
        let max_message_size = parse_env_or_default("HONEYMAIL_MAX_MESSAGE_SIZE", 26_214_400u64)?;

        let storage_path = env_or_default("HONEYMAIL_STORAGE_PATH", "./honeymail-data");
        let geoip_db_path = env_or_default("HONEYMAIL_GEOIP_DB_PATH", "");

        let reporter_url = env_or_default("HONEYMAIL_REPORTER_URL", "");
        let channel_capacity = parse_env_or_default("HONEYMAIL_CHANNEL_CAPACITY", 256usize)?;
        let reporter_service = env_or_default("HONEYMAIL_SERVICE_NAME", "smtp");
        let reporter_key = env_or_default("HONEYMAIL_REPORTER_KEY", "");
        let reporter_secret = env_or_default("HONEYMAIL_REPORTER_SECRET", "");
        let honeypot_ip = env_or_default("HONEYMAIL_HONEYPOT_IP", "");
        let honeypot_location = env_or_default("HONEYMAIL_HONEYPOT_LOCATION", "");
        let honeypot_provider = env_or_default("HONEYMAIL_HONEYPOT_PROVIDER", "");

        let health_check_bind_address = env_or_default("HONEYMAIL_HEALTH_BIND_ADDRESS", "0.0.0.0");
        let health_check_port = parse_env_or_default("HONEYMAIL_HEALTH_PORT", 8080u16)?;

        let reply_greeting = env_or_default("HONEYMAIL_REPLY_GREETING", "ESMTP");
        let reply_ok = env_or_default("HONEYMAIL_REPLY_OK", "250 Okay");
        let reply_message_accepted = env_or_default(
            "HONEYMAIL_REPLY_MESSAGE_ACCEPTED",
            "250 Message {} accepted for delivery",
        );
        let reply_closing = env_or_default("HONEYMAIL_REPLY_CLOSING", "221 Bye");
        let reply_send_data = env_or_default("HONEYMAIL_REPLY_SEND_DATA", "354 Send away");

        let config = Config {
            smtp_listen_to,
            smtp_port,
            smtp_secure_port,
            smtp_server_name,
            smtp_domain,
            tls_public_key,
            tls_private_key,
            max_client_connections,
            max_message_size,
            storage_path,
            geoip_db_path,
            reporter_url,
            channel_capacity,
            reporter_service,
            reporter_key,
            reporter_secret,
            honeypot_ip,
            honeypot_location,
            honeypot_provider,
            health_check_bind_address,
            health_check_port,
            reply_greeting,
            reply_ok,
            reply_message_accepted,
            reply_closing,
            reply_send_data,
        };

        info!(
            listen_to = %config.smtp_listen_to,
            port = config.smtp_port,
            secure_port = config.smtp_secure_port,
            tls_enabled = !config.tls_public_key.is_empty(),
            max_client_connections = config.max_client_connections,
            max_message_size = config.max_message_size,
            storage_path = %config.storage_path,
            "loaded configuration"
        );

        Ok(config)
    }
}

fn env_or_default(key: &str, default: &str) -> String {
    env::var(key).unwrap_or_else(|_| default.to_string())
}

fn parse_env_or_default<T>(key: &str, default: T) -> Result<T>
where
    T: std::str::FromStr + ToString,
    T::Err: std::fmt::Display,
{
    match env::var(key) {
        Ok(val) => val
            .parse::<T>()
            .map_err(|e| anyhow!("{} ('{}') is invalid: {}", key, val, e)),
        Err(_) => Ok(default),
    }
}

mod tests;
