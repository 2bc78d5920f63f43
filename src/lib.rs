//! Orchestrates honeymail's startup and component lifecycle.
//!
//! This library crate initializes configuration and concurrently runs the
//! capture pipeline (SMTP listeners, processor, storage, reporter) alongside
//! the liveness endpoint. It ensures that if any essential task terminates
//! unexpectedly, the entire application shuts down rather than limping on
//! half-alive.

pub mod config;
pub mod envelope;
pub mod geo;
pub mod health;
pub mod id;
pub mod pipeline;
pub mod reporter;
pub mod smtp;
pub mod storage;

use std::sync::Arc;

use anyhow::Result;
use tokio::select;
use tracing::{error, info};

use crate::geo::{GeoResolver, MaxMindGeoResolver, NullGeoResolver};
use crate::id::IdGenerator;
use crate::storage::{SledStorage, StorageEngine};

pub async fn run() -> Result<()> {
    info!(
        "starting {} v{} honeypot SMTP server",
        env!("CARGO_PKG_NAME"),
        env!("CARGO_PKG_VERSION")
    );

    let config = match config::Config::from_env() {
        Ok(config) => config,
        Err(e) => {
            error!(error = %e, "failed to load configuration");
            return Err(e);
        }
    };

    let storage: Arc<dyn StorageEngine> =
        Arc::new(SledStorage::open(std::path::Path::new(&config.storage_path))?);

    let geo: Arc<dyn GeoResolver> = if config.geoip_db_path.is_empty() {
        Arc::new(NullGeoResolver)
    } else {
        Arc::new(MaxMindGeoResolver::open(std::path::Path::new(&config.geoip_db_path))?)
    };

    let dns_resolver = match hickory_resolver::TokioAsyncResolver::tokio_from_system_conf() {
        Ok(resolver) => Some(resolver),
        Err(e) => {
            error!(error = %e, "failed to build DNS resolver, geo enrichment will be skipped");
            None
        }
    };

    let pipeline = pipeline::spawn(&config, storage, geo, dns_resolver);

    let tls_config = smtp::load_tls_config(&config.tls_public_key, &config.tls_private_key)?;

    let id_gen = IdGenerator::spawn(config.channel_capacity);
    let smtp_server = Arc::new(smtp::SmtpServer::new(
        config.clone(),
        id_gen,
        pipeline.envelope_tx.clone(),
        tls_config,
    ));

    let health_config = config.clone();
    let health_handle = tokio::spawn(async move { health::run_health_server(health_config).await });

    let smtp_handle = tokio::spawn(async move { smtp_server.run().await });

    select! {
        res = health_handle => {
            error!("health check server task terminated");
            unwrap_task_result(res, "health check server")
        }
        res = smtp_handle => {
            error!("SMTP server task terminated");
            unwrap_task_result(res, "SMTP server")
        }
        res = pipeline.processor_handle => {
            error!("processor stage terminated");
            match res {
                Ok(()) => Err(anyhow::anyhow!("processor stage exited cleanly, which is unexpected")),
                Err(join_error) => Err(anyhow::anyhow!("processor stage task failed: {}", join_error)),
            }
        }
        res = pipeline.storage_handle => {
            error!("storage writer terminated");
            match res {
                Ok(()) => Err(anyhow::anyhow!("storage writer exited cleanly, which is unexpected")),
                Err(join_error) => Err(anyhow::anyhow!("storage writer task failed: {}", join_error)),
            }
        }
    }
}

fn unwrap_task_result(
    res: Result<Result<()>, tokio::task::JoinError>,
    name: &str,
) -> Result<()> {
    match res {
        Ok(Ok(())) => Err(anyhow::anyhow!("{} exited cleanly, which is unexpected", name)),
        Ok(Err(e)) => {
            error!(task = name, error = %e, "task returned an error");
            Err(e)
        }
        Err(join_error) => {
            error!(task = name, error = %join_error, "task panicked or was cancelled");
            Err(anyhow::anyhow!("{} task failed: {}", name, join_error))
        }
    }
}
