//! Posts a summary of each captured envelope to a configured central
//! collector. Uses `hyper`/`hyper-rustls`, the same stack the rest of this
//! crate uses for outbound HTTP, but with a URL-encoded form body instead of
//! JSON: the collector's API is a legacy form endpoint, not a JSON API.

use std::net::IpAddr;

use anyhow::Result;
use base64::Engine;
use bytes::Bytes;
use http_body_util::Full;
use hyper::Request;
use hyper_rustls::HttpsConnectorBuilder;
use hyper_util::{client::legacy::Client, rt::TokioExecutor};
use tracing::{info, warn};

use crate::config::Config;
use crate::envelope::Envelope;
use crate::envelope::codec;

type HttpsConn = hyper_rustls::HttpsConnector<hyper_util::client::legacy::connect::HttpConnector>;
type ReporterHttpClient = Client<HttpsConn, Full<Bytes>>;

/// One envelope queued for the outbound report.
pub struct ReportItem {
    pub remote_ip: IpAddr,
    pub envelope: Envelope,
}

pub struct Reporter {
    config: Config,
    client: ReporterHttpClient,
    user_agent: String,
}

impl Reporter {
    pub fn new(config: Config) -> Self {
        let https = HttpsConnectorBuilder::new()
            .with_native_roots()
            .expect("failed to load native root certificates for the reporter client")
            .https_or_http()
            .enable_http1()
            .build();
        let client: ReporterHttpClient = Client::builder(TokioExecutor::new()).build(https);
        let user_agent = format!("{}/{}", env!("CARGO_PKG_NAME"), env!("CARGO_PKG_VERSION"));
        Reporter {
            config,
            client,
            user_agent,
        }
    }

    pub async fn report(&self, item: ReportItem) -> Result<()> {
        let encoded_envelope = codec::encode(&item.envelope);
        let email_b64 = base64::engine::general_purpose::STANDARD.encode(encoded_envelope);

        let body = form_urlencoded::Serializer::new(String::new())
            .append_pair("ip", &item.remote_ip.to_string())
            .append_pair("service", &self.config.reporter_service)
            .append_pair("type", "email")
            .append_pair("honeypot_ip", &self.config.honeypot_ip)
            .append_pair("honeypot_location", &self.config.honeypot_location)
            .append_pair("honeypot_provider", &self.config.honeypot_provider)
            .append_pair("key", &self.config.reporter_key)
            .append_pair("secret", &self.config.reporter_secret)
            .append_pair("email", &email_b64)
            .finish();

        let request = Request::builder()
            .method(hyper::Method::POST)
            .uri(&self.config.reporter_url)
            .header("content-type", "application/x-www-form-urlencoded")
            .header("user-agent", &self.user_agent)
            .body(Full::new(Bytes::from(body)))?;

        let response = self.client.request(request).await?;
        let status = response.status();
        if status.is_success() {
            info!(status = %status, "report delivered");
        } else {
            warn!(status = %status, url = %self.config.reporter_url, "report rejected by collector");
        }
        Ok(())
    }
}
