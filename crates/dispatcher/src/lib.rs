//! # Dispatcher
//!
//! Bucket distribution.
//!
//! Responsibilities:
//! - Consume published `TimeBucket`s
//! - Fan out to every configured sink
//! - Isolate slow sinks so they never stall aggregation

pub mod dispatcher;
pub mod error;
pub mod handle;
pub mod metrics;
pub mod sinks;

pub use contracts::{BucketSink, TimeBucket};
pub use dispatcher::{create_dispatcher, Dispatcher, DispatcherBuilder, DispatcherConfig, DispatcherTask};
pub use error::DispatcherError;
pub use handle::{Offer, SinkHandle};
pub use metrics::{MetricsSnapshot, Outcome, SinkMetrics};
pub use sinks::{FileSink, LogSink};
