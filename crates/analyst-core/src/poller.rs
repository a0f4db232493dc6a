use std::sync::Arc;
use std::time::Duration;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::queue::QueueManager;

/// Start the broker poller. One status request per cycle covers every job
/// with a registered callback; callbacks run on their own tasks so a slow
/// aggregation never delays delivery to other jobs. A failed cycle is
/// logged and the next one retries.
pub fn spawn(
    queue: Arc<QueueManager>,
    interval: Duration,
    cancel: CancellationToken,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            if queue.registry().is_empty() {
                debug!(target: "analyst::poller", "no jobs awaiting status");
            } else {
                match queue.poll_once().await {
                    Ok(tasks) => {
                        debug!(target: "analyst::poller", dispatched = tasks.len(), "poll cycle");
                    }
                    Err(err) => {
                        warn!(target: "analyst::poller", %err, "status poll failed");
                    }
                }
            }
            tokio::select! {
                _ = cancel.cancelled() => {
                    debug!(target: "analyst::poller", "poller cancelled");
                    break;
                }
                _ = sleep(interval) => {}
            }
        }
    })
}
