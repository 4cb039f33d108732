//! BucketSink trait - Dispatcher output interface
//!
//! Defines the abstract interface for bucket consumers.

use crate::{ContractError, TimeBucket};

/// Bucket output trait
///
/// All sink implementations must implement this trait.
#[trait_variant::make(BucketSink: Send)]
pub trait LocalBucketSink {
    /// Sink name (used for logging/metrics)
    fn name(&self) -> &str;

    /// Write one bucket
    ///
    /// # Errors
    /// Returns write error (should include context)
    async fn write(&mut self, bucket: &TimeBucket) -> Result<(), ContractError>;

    /// Flush buffer (if any)
    async fn flush(&mut self) -> Result<(), ContractError>;

    /// Close sink
    async fn close(&mut self) -> Result<(), ContractError>;
}
