//! Consumes accepted envelopes, derives statistics, and fans the result out
//! to storage and the outbound reporter.
//!
//! The consume loop below never holds a lock across the blocking channel
//! receive; there is in fact no lock here at all, which is the point.

use tokio::sync::mpsc;
use tracing::{debug, info};

use crate::envelope::stats::StatsDeriver;
use crate::envelope::Envelope;
use crate::reporter::ReportItem;

pub struct ProcessorStage {
    envelope_rx: mpsc::Receiver<Envelope>,
    storage_tx: mpsc::Sender<Envelope>,
    reporter_tx: Option<mpsc::Sender<ReportItem>>,
    stats: StatsDeriver,
}

impl ProcessorStage {
    pub fn new(
        envelope_rx: mpsc::Receiver<Envelope>,
        storage_tx: mpsc::Sender<Envelope>,
        reporter_tx: Option<mpsc::Sender<ReportItem>>,
        stats: StatsDeriver,
    ) -> Self {
        ProcessorStage {
            envelope_rx,
            storage_tx,
            reporter_tx,
            stats,
        }
    }

    pub async fn run(mut self) {
        while let Some(mut envelope) = self.envelope_rx.recv().await {
            debug!(envelope_id = %envelope.id, "processing envelope");
            let stats = self.stats.derive(&envelope).await;
            envelope.stats = Some(stats);

            if let Some(reporter_tx) = &self.reporter_tx {
                let item = ReportItem {
                    remote_ip: envelope.remote_ip,
                    envelope: envelope.clone(),
                };
                if reporter_tx.try_send(item).is_err() {
                    debug!(envelope_id = %envelope.id, "reporter channel full or closed, skipping report");
                }
            }

            if self.storage_tx.send(envelope).await.is_err() {
                info!("storage channel closed, processor stage stopping");
                break;
            }
        }
    }
}
