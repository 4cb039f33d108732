//! LogSink - logs a one-line bucket summary via tracing

use contracts::{BucketSink, ContractError, TimeBucket};
use tracing::{info, instrument};

/// Sink that logs bucket summaries
pub struct LogSink {
    name: String,
}

impl LogSink {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }

    fn log_bucket_summary(&self, bucket: &TimeBucket) {
        let mut matched: Vec<&str> = bucket.per_device.keys().map(|id| id.as_str()).collect();
        matched.sort_unstable();

        info!(
            sink = %self.name,
            sequence = bucket.sequence,
            reference_time = bucket.reference_time,
            matched = ?matched,
            missing = ?bucket.missing,
            coverage = bucket.coverage(),
            max_skew_ms = ?bucket.max_skew_ms(),
            "TimeBucket received"
        );
    }
}

impl BucketSink for LogSink {
    fn name(&self) -> &str {
        &self.name
    }

    #[instrument(
        name = "log_sink_write",
        skip(self, bucket),
        fields(sink = %self.name, sequence = bucket.sequence)
    )]
    async fn write(&mut self, bucket: &TimeBucket) -> Result<(), ContractError> {
        self.log_bucket_summary(bucket);
        Ok(())
    }

    async fn flush(&mut self) -> Result<(), ContractError> {
        Ok(())
    }

    #[instrument(name = "log_sink_close", skip(self))]
    async fn close(&mut self) -> Result<(), ContractError> {
        info!(sink = %self.name, "LogSink closed");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_log_sink_write() {
        let mut sink = LogSink::new("test_log");
        let bucket = TimeBucket {
            reference_time: 1_000,
            sequence: 1,
            missing: vec!["phone".into()],
            ..Default::default()
        };

        assert!(sink.write(&bucket).await.is_ok());
        assert!(sink.close().await.is_ok());
    }

    #[tokio::test]
    async fn test_log_sink_name() {
        let sink = LogSink::new("my_logger");
        assert_eq!(sink.name(), "my_logger");
    }
}
