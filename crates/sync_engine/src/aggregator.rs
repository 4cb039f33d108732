//! Bucket aggregator and bucket history.
//!
//! Each tick snapshots every active device's buffer, asks the matcher for the
//! sample nearest to a quantized reference instant, and records the result
//! in a bounded history that also fans out to subscribers.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use contracts::{AggregatorConfig, DeviceId, Millis, SensorKind, TimeBucket, Timestamp};
use ringbuf::{traits::*, HeapRb};
use tokio::sync::broadcast;
use tracing::{debug, instrument};

use crate::matcher::find_nearest;
use crate::store::DeviceSampleStore;

const SUBSCRIBER_CAPACITY: usize = 256;

/// Bounded ring of the most recent buckets, oldest evicted first
pub struct BucketHistory {
    ring: Mutex<HeapRb<TimeBucket>>,
    capacity: usize,
    tx: broadcast::Sender<TimeBucket>,
}

impl std::fmt::Debug for BucketHistory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BucketHistory")
            .field("len", &self.len())
            .field("capacity", &self.capacity)
            .finish()
    }
}

impl BucketHistory {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        let (tx, _) = broadcast::channel(SUBSCRIBER_CAPACITY);
        Self {
            ring: Mutex::new(HeapRb::new(capacity)),
            capacity,
            tx,
        }
    }

    /// Record a bucket and publish it to subscribers
    pub fn push(&self, bucket: TimeBucket) {
        self.ring
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push_overwrite(bucket.clone());
        // No subscribers is fine
        let _ = self.tx.send(bucket);
    }

    /// Copy of the history, oldest first
    pub fn snapshot(&self) -> Vec<TimeBucket> {
        self.ring
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .cloned()
            .collect()
    }

    pub fn latest(&self) -> Option<TimeBucket> {
        self.ring
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .last()
            .cloned()
    }

    pub fn len(&self) -> usize {
        self.ring
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .occupied_len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Receive every bucket pushed from now on
    pub fn subscribe(&self) -> broadcast::Receiver<TimeBucket> {
        self.tx.subscribe()
    }
}

/// Parameters of one measurement, fixed between start and stop
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MeasurementPlan {
    pub sensor_kind: SensorKind,
    pub interval_ms: u64,
}

impl MeasurementPlan {
    pub fn new(sensor_kind: SensorKind, interval_ms: u64) -> Self {
        Self {
            sensor_kind,
            interval_ms: interval_ms.max(1),
        }
    }

    /// Aggregator period: twice the sample interval
    pub fn aggregation_period_ms(&self) -> u64 {
        self.interval_ms * 2
    }
}

/// Assembles one [`TimeBucket`] per tick
#[derive(Debug)]
pub struct BucketAggregator {
    config: AggregatorConfig,
    store: Arc<DeviceSampleStore>,
    history: Arc<BucketHistory>,
    sequence: AtomicU64,
}

impl BucketAggregator {
    pub fn new(
        config: AggregatorConfig,
        store: Arc<DeviceSampleStore>,
        history: Arc<BucketHistory>,
    ) -> Self {
        Self {
            config,
            store,
            history,
            sequence: AtomicU64::new(0),
        }
    }

    /// Reference instant for a tick at `now`: `floor((now - interval) / quantum) * quantum`
    pub fn reference_time(&self, now: Timestamp, interval_ms: u64) -> Timestamp {
        let quantum = self.config.quantum_ms.max(1);
        (now - interval_ms as Timestamp).div_euclid(quantum) * quantum
    }

    /// Largest accepted distance from the reference instant
    pub fn threshold(&self, interval_ms: u64) -> Millis {
        self.config.threshold_for(interval_ms)
    }

    /// Run one aggregation pass and append the bucket to history.
    #[instrument(
        level = "debug",
        name = "aggregator_tick",
        skip(self, active_devices),
        fields(devices = active_devices.len())
    )]
    pub fn tick(
        &self,
        now: Timestamp,
        active_devices: &[DeviceId],
        plan: MeasurementPlan,
    ) -> TimeBucket {
        let reference_time = self.reference_time(now, plan.interval_ms);
        let threshold = self.threshold(plan.interval_ms);

        let mut per_device = HashMap::with_capacity(active_devices.len());
        let mut missing = Vec::new();

        for device in active_devices {
            let samples = self.store.snapshot(device);
            match find_nearest(reference_time, &samples, plan.sensor_kind, threshold) {
                Some(sample) => {
                    per_device.insert(device.clone(), sample.reading.clone());
                }
                None => missing.push(device.clone()),
            }
        }

        let bucket = TimeBucket {
            reference_time,
            sequence: self.sequence.fetch_add(1, Ordering::Relaxed) + 1,
            per_device,
            missing,
        };

        debug!(
            reference_time,
            sequence = bucket.sequence,
            matched = bucket.per_device.len(),
            missing = bucket.missing.len(),
            "bucket assembled"
        );
        observability::record_bucket(&bucket);

        self.history.push(bucket.clone());
        bucket
    }

    pub fn history(&self) -> &Arc<BucketHistory> {
        &self.history
    }

    /// Buckets produced so far
    pub fn bucket_count(&self) -> u64 {
        self.sequence.load(Ordering::Relaxed)
    }
}
