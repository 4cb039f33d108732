//! FileSink - appends buckets to a JSON Lines file

use contracts::{BucketSink, ContractError, TimeBucket};
use serde::Serialize;
use std::collections::HashMap;
use std::fs::{self, File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::PathBuf;
use tracing::{debug, error, instrument};

/// Configuration for FileSink
#[derive(Debug, Clone)]
pub struct FileSinkConfig {
    /// Output file
    pub path: PathBuf,
    /// Append to an existing file instead of truncating it
    pub append: bool,
}

impl FileSinkConfig {
    /// Build from a sink's params map (`path`, optional `append`)
    pub fn from_params(params: &HashMap<String, String>) -> Self {
        let path = params
            .get("path")
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from("./output/buckets.jsonl"));
        let append = params
            .get("append")
            .map(|value| value.eq_ignore_ascii_case("true"))
            .unwrap_or(false);

        Self { path, append }
    }
}

/// One line of output
#[derive(Serialize)]
struct BucketRecord<'a> {
    written_at: String,
    coverage: f64,
    #[serde(flatten)]
    bucket: &'a TimeBucket,
}

/// Sink that writes one JSON object per bucket
pub struct FileSink {
    name: String,
    config: FileSinkConfig,
    writer: BufWriter<File>,
    lines_written: u64,
}

impl FileSink {
    /// Open (or create) the output file
    pub fn new(name: impl Into<String>, config: FileSinkConfig) -> std::io::Result<Self> {
        if let Some(parent) = config.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }

        let file = OpenOptions::new()
            .create(true)
            .write(true)
            .append(config.append)
            .truncate(!config.append)
            .open(&config.path)?;

        Ok(Self {
            name: name.into(),
            config,
            writer: BufWriter::new(file),
            lines_written: 0,
        })
    }

    /// Create from params map (for factory)
    pub fn from_params(
        name: impl Into<String>,
        params: &HashMap<String, String>,
    ) -> std::io::Result<Self> {
        Self::new(name, FileSinkConfig::from_params(params))
    }

    pub fn lines_written(&self) -> u64 {
        self.lines_written
    }

    fn write_line(&mut self, bucket: &TimeBucket) -> std::io::Result<()> {
        let record = BucketRecord {
            written_at: chrono::Utc::now().to_rfc3339(),
            coverage: bucket.coverage(),
            bucket,
        };
        serde_json::to_writer(&mut self.writer, &record)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;
        self.writer.write_all(b"\n")?;
        self.lines_written += 1;
        Ok(())
    }

    fn persist_bucket(&mut self, bucket: &TimeBucket) -> Result<(), ContractError> {
        self.write_line(bucket).map_err(|e| {
            error!(sink = %self.name, sequence = bucket.sequence, error = %e, "Write failed");
            ContractError::sink_write(&self.name, e.to_string())
        })
    }
}

impl BucketSink for FileSink {
    fn name(&self) -> &str {
        &self.name
    }

    #[instrument(
        name = "file_sink_write",
        skip(self, bucket),
        fields(sink = %self.name, sequence = bucket.sequence)
    )]
    async fn write(&mut self, bucket: &TimeBucket) -> Result<(), ContractError> {
        self.persist_bucket(bucket)
    }

    #[instrument(name = "file_sink_flush", skip(self))]
    async fn flush(&mut self) -> Result<(), ContractError> {
        self.writer
            .flush()
            .map_err(|e| ContractError::sink_write(&self.name, e.to_string()))
    }

    #[instrument(name = "file_sink_close", skip(self))]
    async fn close(&mut self) -> Result<(), ContractError> {
        self.flush().await?;
        debug!(
            sink = %self.name,
            path = %self.config.path.display(),
            lines = self.lines_written,
            "FileSink closed"
        );
        Ok(())
    }
}
