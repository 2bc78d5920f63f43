use super::*;
use std::env;
use std::sync::Mutex;

// Environment variables are process-global; serialize tests that touch them.
static ENV_LOCK: Mutex<()> = Mutex::new(());

fn clear_all() {
    for key in [
        "HONEYMAIL_LISTEN_TO",
        "HONEYMAIL_PORT",
        "HONEYMAIL_SECURE_PORT",
        "HONEYMAIL_SERVER_NAME",
        "HONEYMAIL_DOMAIN",
        "HONEYMAIL_TLS_PUBLIC_KEY",
        "HONEYMAIL_TLS_PRIVATE_KEY",
        "HONEYMAIL_MAX_CLIENT_CONNECTIONS",
        "HONEYMAIL_MAX_MESSAGE_SIZE",
        "HONEYMAIL_STORAGE_PATH",
        "HONEYMAIL_GEOIP_DB_PATH",
        "HONEYMAIL_REPORTER_URL",
        "HONEYMAIL_CHANNEL_CAPACITY",
        "HONEYMAIL_SERVICE_NAME",
        "HONEYMAIL_REPORTER_KEY",
        "HONEYMAIL_REPORTER_SECRET",
        "HONEYMAIL_HONEYPOT_IP",
        "HONEYMAIL_HONEYPOT_LOCATION",
        "HONEYMAIL_HONEYPOT_PROVIDER",
        "HONEYMAIL_HEALTH_BIND_ADDRESS",
        "HONEYMAIL_HEALTH_PORT",
        "HONEYMAIL_REPLY_GREETING",
        "HONEYMAIL_REPLY_OK",
        "HONEYMAIL_REPLY_MESSAGE_ACCEPTED",
        "HONEYMAIL_REPLY_CLOSING",
        "HONEYMAIL_REPLY_SEND_DATA",
    ] {
        env::remove_var(key);
    }
}

#[test]
fn defaults_when_nothing_set() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_all();
    let config = Config::from_env().unwrap();
    assert_eq!(config.smtp_port, 2525);
    assert_eq!(config.smtp_secure_port, 4650);
    assert_eq!(config.max_client_connections, 64_000);
    assert_eq!(config.max_message_size, 26_214_400);
    assert_eq!(config.smtp_domain, config.smtp_server_name);
    assert!(config.tls_public_key.is_empty());
    assert_eq!(config.reply_greeting, "ESMTP");
    assert_eq!(config.reply_ok, "250 Okay");
    assert_eq!(config.reply_closing, "221 Bye");
    assert_eq!(config.reply_send_data, "354 Send away");
    clear_all();
}

#[test]
fn overrides_are_honored() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_all();
    env::set_var("HONEYMAIL_PORT", "2626");
    env::set_var("HONEYMAIL_MAX_MESSAGE_SIZE", "1000");
    env::set_var("HONEYMAIL_REPLY_CLOSING", "221 So long");
    let config = Config::from_env().unwrap();
    assert_eq!(config.smtp_port, 2626);
    assert_eq!(config.max_message_size, 1000);
    assert_eq!(config.reply_closing, "221 So long");
    clear_all();
}

#[test]
fn invalid_port_is_an_error() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_all();
    env::set_var("HONEYMAIL_PORT", "not-a-port");
    let result = Config::from_env();
    assert!(result.is_err());
    clear_all();
}

#[test]
fn domain_defaults_to_server_name_when_unset() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_all();
    env::set_var("HONEYMAIL_SERVER_NAME", "mx.honeytrap.test");
    let config = Config::from_env().unwrap();
    assert_eq!(config.smtp_domain, "mx.honeytrap.test");
    clear_all();
}
