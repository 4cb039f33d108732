//! Sink worker behind a bounded queue
//!
//! The dispatcher offers each bucket to every worker without awaiting. A
//! worker that falls behind loses buckets at its own queue and never holds
//! up aggregation or the other sinks.

use std::sync::Arc;

use contracts::{BucketSink, TimeBucket};
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::task::JoinHandle;
use tracing::{debug, error, instrument, warn};

use crate::metrics::{MetricsSnapshot, Outcome, SinkMetrics};

/// Result of offering a bucket to a sink
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Offer {
    Queued,
    /// Queue full; counted as dropped
    Dropped,
    /// Worker is gone
    Closed,
}

/// One running sink
pub struct SinkHandle {
    name: String,
    queue: mpsc::Sender<TimeBucket>,
    metrics: Arc<SinkMetrics>,
    worker: JoinHandle<()>,
}

impl SinkHandle {
    pub fn spawn<S: BucketSink + Send + 'static>(sink: S, queue_capacity: usize) -> Self {
        let name = sink.name().to_string();
        let (queue, rx) = mpsc::channel(queue_capacity.max(1));
        let metrics = Arc::new(SinkMetrics::new());
        let worker = tokio::spawn(drain(sink, rx, metrics.clone()));

        Self {
            name,
            queue,
            metrics,
            worker,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn metrics(&self) -> &Arc<SinkMetrics> {
        &self.metrics
    }

    pub fn offer(&self, bucket: TimeBucket) -> Offer {
        let sequence = bucket.sequence;
        match self.queue.try_send(bucket) {
            Ok(()) => {
                let queued = self.queue.max_capacity() - self.queue.capacity();
                self.metrics.set_queue_len(queued);
                Offer::Queued
            }
            Err(TrySendError::Full(_)) => {
                self.metrics.record(Outcome::Dropped, sequence);
                observability::record_message_dropped("sink_queue_full");
                warn!(sink = %self.name, sequence, "sink queue full, bucket dropped");
                Offer::Dropped
            }
            Err(TrySendError::Closed(_)) => {
                error!(sink = %self.name, sequence, "sink worker is gone");
                Offer::Closed
            }
        }
    }

    /// Close the queue, let the worker write what is left, and report
    #[instrument(name = "sink_handle_shutdown", skip(self), fields(sink = %self.name))]
    pub async fn shutdown(self) -> MetricsSnapshot {
        drop(self.queue);
        if let Err(e) = self.worker.await {
            error!(error = ?e, "sink worker panicked");
        }
        self.metrics.snapshot()
    }
}

async fn drain<S: BucketSink>(
    mut sink: S,
    mut rx: mpsc::Receiver<TimeBucket>,
    metrics: Arc<SinkMetrics>,
) {
    let name = sink.name().to_string();
    debug!(sink = %name, "sink worker started");

    while let Some(bucket) = rx.recv().await {
        metrics.set_queue_len(rx.len());
        let outcome = match sink.write(&bucket).await {
            Ok(()) => Outcome::Written,
            Err(e) => {
                error!(sink = %name, sequence = bucket.sequence, error = %e, "bucket write failed");
                Outcome::Failed
            }
        };
        observability::record_bucket_dispatched(&name, outcome == Outcome::Written);
        metrics.record(outcome, bucket.sequence);
    }

    if let Err(e) = sink.flush().await {
        error!(sink = %name, error = %e, "flush failed");
    }
    if let Err(e) = sink.close().await {
        error!(sink = %name, error = %e, "close failed");
    }
    debug!(
        sink = %name,
        written = metrics.write_count(),
        "sink worker stopped"
    );
}
