//! # Sync Engine
//!
//! Clock synchronization and time-aligned aggregation for peer sensors.
//!
//! Responsibilities:
//! - Wall-clock sources and the four-timestamp offset estimator
//! - Bounded per-device sample store
//! - Nearest-sample matching against a reference instant
//! - Periodic bucket assembly and bounded bucket history
//!
//! ## Example
//!
//! ```ignore
//! use sync_engine::{BucketAggregator, BucketHistory, DeviceSampleStore, MeasurementPlan};
//!
//! let store = Arc::new(DeviceSampleStore::new(10));
//! let history = Arc::new(BucketHistory::new(100));
//! let aggregator = BucketAggregator::new(AggregatorConfig::default(), store.clone(), history);
//!
//! store.append(&device, sample);
//! let bucket = aggregator.tick(now, &[device], MeasurementPlan::new(kind, 100));
//! ```

mod aggregator;
mod buffer;
pub mod clock;
mod matcher;
mod store;

pub use aggregator::{BucketAggregator, BucketHistory, MeasurementPlan};
pub use buffer::DeviceBuffer;
pub use clock::{
    ClockEstimate, ClockEstimator, ManualClock, ReferenceClock, RoundPhase, SkewedClock,
    SystemClock, TokioClock, WallClock,
};
pub use matcher::find_nearest;
pub use store::{DeviceBufferStats, DeviceSampleStore};

// Re-export contracts types
pub use contracts::{AggregatorConfig, Sample, TimeBucket};
