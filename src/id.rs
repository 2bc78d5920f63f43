//! Envelope identifier generation.
//!
//! A single producer task iteratively hashes a seed derived from process-start
//! time with SHA-1 and emits the hex digest of each successor. The hasher
//! accumulates state across iterations rather than being reset, so every
//! emitted id is a function of every id emitted before it.

use sha1::{Digest, Sha1};
use tokio::sync::mpsc;
use tracing::debug;

/// Handle to the id-generator task. Cloning is cheap; all clones share the
/// same receiver via an internal channel, so each `next_id` call consumes
/// one slot from the shared stream.
#[derive(Clone)]
pub struct IdGenerator {
    sender: mpsc::Sender<String>,
    receiver: std::sync::Arc<tokio::sync::Mutex<mpsc::Receiver<String>>>,
}

impl IdGenerator {
    /// Spawns the producer task and returns a handle bound to it.
    pub fn spawn(buffer: usize) -> Self {
        let (tx, rx) = mpsc::channel(buffer);
        let producer_tx = tx.clone();
        tokio::spawn(async move {
            run_producer(producer_tx).await;
        });
        IdGenerator {
            sender: tx,
            receiver: std::sync::Arc::new(tokio::sync::Mutex::new(rx)),
        }
    }

    /// Draws the next unique identifier from the stream.
    ///
    /// Returns `None` only if the producer task has terminated, which does
    /// not happen during normal operation.
    pub async fn next_id(&self) -> Option<String> {
        let mut rx = self.receiver.lock().await;
        rx.recv().await
    }
}

async fn run_producer(tx: mpsc::Sender<String>) {
    let seed = format!("{:?}", std::time::SystemTime::now());
    let mut hasher = Sha1::new();
    hasher.update(seed.as_bytes());
    loop {
        // Feed the running hasher state back into itself before reading out
        // the digest so each emitted id depends on the full history.
        let digest = hasher.clone().finalize();
        let id = hex::encode(digest);
        hasher.update(id.as_bytes());
        if tx.send(id).await.is_err() {
            debug!("id generator: all receivers dropped, stopping");
            return;
        }
    }
}
