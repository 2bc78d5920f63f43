//! Bounded-channel pipeline wiring: accept -> process -> (store, report).

pub mod processor;

use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{error, info};

use crate::config::Config;
use crate::envelope::stats::{DomainResolver, StatsDeriver};
use crate::envelope::Envelope;
use crate::geo::GeoResolver;
use crate::reporter::{ReportItem, Reporter};
use crate::storage::StorageEngine;
use processor::ProcessorStage;

/// Handle to the running pipeline: the sender the SMTP server pushes
/// accepted envelopes into, plus the stage tasks' join handles so the
/// top-level `run()` can notice if one dies.
pub struct Pipeline {
    pub envelope_tx: mpsc::Sender<Envelope>,
    pub processor_handle: JoinHandle<()>,
    pub storage_handle: JoinHandle<()>,
    pub reporter_handle: Option<JoinHandle<()>>,
}

pub fn spawn(
    config: &Config,
    storage: Arc<dyn StorageEngine>,
    geo: Arc<dyn GeoResolver>,
    dns_resolver: Option<hickory_resolver::TokioAsyncResolver>,
) -> Pipeline {
    let (envelope_tx, envelope_rx) = mpsc::channel::<Envelope>(config.channel_capacity);
    let (storage_tx, storage_rx) = mpsc::channel::<Envelope>(config.channel_capacity);

    let (reporter_tx, reporter_handle) = if config.reporter_url.is_empty() {
        (None, None)
    } else {
        let (tx, rx) = mpsc::channel::<ReportItem>(config.channel_capacity);
        let reporter = Reporter::new(config.clone());
        let handle = tokio::spawn(run_reporter(reporter, rx));
        (Some(tx), Some(handle))
    };

    let domain_resolver = DomainResolver::new(dns_resolver, geo);
    let stats_deriver = StatsDeriver::new(domain_resolver);
    let processor = ProcessorStage::new(envelope_rx, storage_tx, reporter_tx, stats_deriver);
    let processor_handle = tokio::spawn(processor.run());

    let storage_handle = tokio::spawn(run_storage_writer(storage, storage_rx));

    Pipeline {
        envelope_tx,
        processor_handle,
        storage_handle,
        reporter_handle,
    }
}

async fn run_storage_writer(storage: Arc<dyn StorageEngine>, mut rx: mpsc::Receiver<Envelope>) {
    while let Some(envelope) = rx.recv().await {
        let id = envelope.id.clone();
        match storage.store(&envelope) {
            Ok(()) => info!(envelope_id = %id, "envelope stored"),
            Err(e) => error!(envelope_id = %id, error = %e, "failed to store envelope, dropping"),
        }
    }
}

async fn run_reporter(reporter: Reporter, mut rx: mpsc::Receiver<ReportItem>) {
    while let Some(item) = rx.recv().await {
        if let Err(e) = reporter.report(item).await {
            tracing::warn!(error = %e, "reporter post failed");
        }
    }
}
