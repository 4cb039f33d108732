//! Dispatcher - main loop fanning buckets out to sinks

use tokio::sync::{broadcast, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, info, instrument, warn};

use contracts::{SinkConfig, SinkType, TimeBucket};

use crate::error::DispatcherError;
use crate::handle::SinkHandle;
use crate::metrics::MetricsSnapshot;
use crate::sinks::{FileSink, LogSink};

/// Dispatcher configuration
#[derive(Debug, Clone)]
pub struct DispatcherConfig {
    pub sinks: Vec<SinkConfig>,
}

/// Builder for creating a Dispatcher
pub struct DispatcherBuilder {
    config: DispatcherConfig,
    input_rx: broadcast::Receiver<TimeBucket>,
}

impl DispatcherBuilder {
    pub fn new(config: DispatcherConfig, input_rx: broadcast::Receiver<TimeBucket>) -> Self {
        Self { config, input_rx }
    }

    /// Create every sink and its worker
    #[instrument(
        name = "dispatcher_builder_build",
        skip(self),
        fields(sink_count = self.config.sinks.len())
    )]
    pub fn build(self) -> Result<Dispatcher, DispatcherError> {
        let mut handles = Vec::with_capacity(self.config.sinks.len());
        for sink_config in &self.config.sinks {
            handles.push(create_sink_handle(sink_config)?);
        }

        Ok(Dispatcher {
            handles,
            input_rx: self.input_rx,
        })
    }
}

/// Create a SinkHandle from configuration
#[instrument(
    name = "dispatcher_create_sink_handle",
    skip(config),
    fields(sink = %config.name, sink_type = ?config.sink_type)
)]
fn create_sink_handle(config: &SinkConfig) -> Result<SinkHandle, DispatcherError> {
    match config.sink_type {
        SinkType::Log => {
            let sink = LogSink::new(&config.name);
            Ok(SinkHandle::spawn(sink, config.queue_capacity))
        }
        SinkType::File => {
            let sink = FileSink::from_params(&config.name, &config.params)
                .map_err(|e| DispatcherError::sink_creation(&config.name, e.to_string()))?;
            Ok(SinkHandle::spawn(sink, config.queue_capacity))
        }
    }
}

/// Fans published buckets out to sinks
pub struct Dispatcher {
    handles: Vec<SinkHandle>,
    input_rx: broadcast::Receiver<TimeBucket>,
}

/// A dispatcher running in the background
pub struct DispatcherTask {
    shutdown_tx: oneshot::Sender<()>,
    join: JoinHandle<Vec<(String, MetricsSnapshot)>>,
}

impl DispatcherTask {
    /// Drain what is already published, close every sink, and return
    /// per-sink metrics.
    pub async fn stop(self) -> Vec<(String, MetricsSnapshot)> {
        // The loop may already have exited on a closed input
        let _ = self.shutdown_tx.send(());
        match self.join.await {
            Ok(metrics) => metrics,
            Err(e) => {
                warn!(error = ?e, "Dispatcher task failed");
                Vec::new()
            }
        }
    }
}

impl Dispatcher {
    /// Create a dispatcher with custom sink handles (for testing)
    pub fn with_handles(
        handles: Vec<SinkHandle>,
        input_rx: broadcast::Receiver<TimeBucket>,
    ) -> Self {
        Self { handles, input_rx }
    }

    pub fn metrics(&self) -> Vec<(String, MetricsSnapshot)> {
        self.handles
            .iter()
            .map(|h| (h.name().to_string(), h.metrics().snapshot()))
            .collect()
    }

    /// Run until `shutdown` fires or the input closes.
    ///
    /// Returns final per-sink metrics after every worker has drained.
    #[instrument(name = "dispatcher_run", skip_all)]
    pub async fn run(mut self, mut shutdown: oneshot::Receiver<()>) -> Vec<(String, MetricsSnapshot)> {
        info!(sinks = self.handles.len(), "Dispatcher started");

        let mut bucket_count: u64 = 0;

        loop {
            tokio::select! {
                received = self.input_rx.recv() => match received {
                    Ok(bucket) => {
                        bucket_count += 1;
                        self.dispatch_bucket(&bucket);
                        if bucket_count.is_multiple_of(100) {
                            debug!(buckets = bucket_count, "Dispatcher progress");
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        warn!(skipped, "Dispatcher lagged behind, buckets skipped");
                        observability::record_message_dropped("dispatcher_lagged");
                    }
                    Err(broadcast::error::RecvError::Closed) => {
                        info!("Dispatcher input closed");
                        break;
                    }
                },
                _ = &mut shutdown => {
                    while let Ok(bucket) = self.input_rx.try_recv() {
                        bucket_count += 1;
                        self.dispatch_bucket(&bucket);
                    }
                    break;
                }
            }
        }

        info!(buckets = bucket_count, "Dispatcher shutting down");

        let metrics = Self::shutdown_handles(self.handles).await;

        info!("Dispatcher shutdown complete");
        metrics
    }

    /// Spawn the dispatcher as a background task
    pub fn spawn(self) -> DispatcherTask {
        let (shutdown_tx, shutdown_rx) = oneshot::channel();
        let join = tokio::spawn(self.run(shutdown_rx));
        DispatcherTask { shutdown_tx, join }
    }

    fn dispatch_bucket(&self, bucket: &TimeBucket) {
        for handle in &self.handles {
            handle.offer(bucket.clone());
        }
    }

    async fn shutdown_handles(handles: Vec<SinkHandle>) -> Vec<(String, MetricsSnapshot)> {
        let mut metrics = Vec::with_capacity(handles.len());
        for handle in handles {
            let name = handle.name().to_string();
            metrics.push((name, handle.shutdown().await));
        }
        metrics
    }
}

/// Convenience function to create a dispatcher from sink configs
pub fn create_dispatcher(
    sink_configs: Vec<SinkConfig>,
    input_rx: broadcast::Receiver<TimeBucket>,
) -> Result<Dispatcher, DispatcherError> {
    let config = DispatcherConfig {
        sinks: sink_configs,
    };
    DispatcherBuilder::new(config, input_rx).build()
}
