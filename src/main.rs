use tracing::error;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    // hickory-resolver and other dependencies still log through the `log`
    // facade; bridge their records into the tracing subscriber above.
    tracing_log::LogTracer::init().ok();

    // Installed once, globally: rustls needs an explicit default crypto
    // provider since 0.23 dropped the implicit ring/aws-lc selection.
    rustls::crypto::aws_lc_rs::default_provider()
        .install_default()
        .ok();

    if let Err(e) = honeymail::run().await {
        error!(error = %e, "application error");
        std::process::exit(1);
    }
}
