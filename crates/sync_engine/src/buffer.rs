//! Per-device bounded FIFO of samples.
//!
//! Uses index-based separation:
//! - HeapRb stores lightweight metadata (timestamp + slab key) in arrival order
//! - Slab stores the actual Sample data
//!
//! Eviction pops the oldest metadata entry and frees its slab slot, so the
//! reading payloads never move while the ring rotates.

use std::fmt;

use contracts::{Sample, Timestamp};
use ringbuf::{traits::*, HeapRb};
use slab::Slab;

#[derive(Debug, Clone, Copy)]
struct SampleMeta {
    timestamp: Timestamp,
    slab_key: usize,
}

/// Bounded per-device buffer, oldest evicted first
pub struct DeviceBuffer {
    index: HeapRb<SampleMeta>,
    storage: Slab<Sample>,
    capacity: usize,
    dropped_count: u64,
    out_of_order_count: u64,
    last_timestamp: Option<Timestamp>,
}

impl fmt::Debug for DeviceBuffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DeviceBuffer")
            .field("len", &self.index.occupied_len())
            .field("capacity", &self.capacity)
            .field("dropped", &self.dropped_count)
            .finish()
    }
}

impl DeviceBuffer {
    /// Create a buffer holding at most `capacity` samples (minimum 1)
    #[inline]
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            index: HeapRb::new(capacity),
            storage: Slab::with_capacity(capacity),
            capacity,
            dropped_count: 0,
            out_of_order_count: 0,
            last_timestamp: None,
        }
    }

    /// Append a sample, evicting the oldest one when full.
    #[inline]
    pub fn push(&mut self, sample: Sample) {
        let timestamp = sample.timestamp();

        if let Some(last) = self.last_timestamp {
            if timestamp < last {
                self.out_of_order_count += 1;
            }
        }
        self.last_timestamp = Some(timestamp);

        if self.index.is_full() {
            if let Some(old_meta) = self.index.try_pop() {
                self.storage.remove(old_meta.slab_key);
            }
            self.dropped_count += 1;
        }

        let slab_key = self.storage.insert(sample);
        let _ = self.index.try_push(SampleMeta {
            timestamp,
            slab_key,
        });
    }

    /// Copy of the contents, oldest first
    pub fn snapshot(&self) -> Vec<Sample> {
        self.index
            .iter()
            .filter_map(|meta| self.storage.get(meta.slab_key))
            .cloned()
            .collect()
    }

    /// Timestamp of the newest sample
    pub fn latest_timestamp(&self) -> Option<Timestamp> {
        self.index.iter().last().map(|meta| meta.timestamp)
    }

    /// Drop every sample; counters are kept
    pub fn clear(&mut self) {
        self.index.clear();
        self.storage.clear();
        self.last_timestamp = None;
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.index.occupied_len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }

    #[inline]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Samples evicted because the buffer was full
    #[inline]
    pub fn dropped_count(&self) -> u64 {
        self.dropped_count
    }

    /// Samples that arrived with a timestamp older than their predecessor
    #[inline]
    pub fn out_of_order_count(&self) -> u64 {
        self.out_of_order_count
    }
}
