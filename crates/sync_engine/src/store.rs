//! Per-device sample store.
//!
//! Maps each device to its own [`DeviceBuffer`]. The map sits behind a
//! read-mostly lock and each buffer behind its own mutex, so appends for
//! different devices never contend and a snapshot of one device never
//! blocks writers of another.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError, RwLock};

use contracts::{DeviceId, Sample};
use tracing::trace;

use crate::buffer::DeviceBuffer;

type SharedBuffer = Arc<Mutex<DeviceBuffer>>;

/// Per-device statistics for diagnostics
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceBufferStats {
    pub device_id: DeviceId,
    pub len: usize,
    pub dropped: u64,
    pub out_of_order: u64,
}

/// DeviceId -> bounded FIFO of Sample
#[derive(Debug)]
pub struct DeviceSampleStore {
    buffers: RwLock<HashMap<DeviceId, SharedBuffer>>,
    capacity: usize,
}

impl DeviceSampleStore {
    pub fn new(capacity: usize) -> Self {
        Self {
            buffers: RwLock::new(HashMap::new()),
            capacity: capacity.max(1),
        }
    }

    /// Append to `device`'s buffer, creating it on first use.
    pub fn append(&self, device: &DeviceId, sample: Sample) {
        let buffer = self.buffer_for(device);
        let mut guard = buffer.lock().unwrap_or_else(PoisonError::into_inner);
        guard.push(sample);
        trace!(device_id = %device, len = guard.len(), "sample appended");
        observability::record_buffer_depth(device.as_str(), guard.len());
    }

    /// Copy of `device`'s buffer in insertion order; empty if unknown
    pub fn snapshot(&self, device: &DeviceId) -> Vec<Sample> {
        self.existing(device)
            .map(|buffer| {
                buffer
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner)
                    .snapshot()
            })
            .unwrap_or_default()
    }

    /// Drop every buffer
    pub fn clear(&self) {
        self.buffers
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }

    /// Drop `device`'s buffer. Returns whether it existed.
    pub fn remove(&self, device: &DeviceId) -> bool {
        self.buffers
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(device)
            .is_some()
    }

    /// Number of samples held for `device`
    pub fn len(&self, device: &DeviceId) -> usize {
        self.existing(device)
            .map(|buffer| buffer.lock().unwrap_or_else(PoisonError::into_inner).len())
            .unwrap_or(0)
    }

    /// Whether no device has a buffer
    pub fn is_empty(&self) -> bool {
        self.buffers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .is_empty()
    }

    /// Devices that currently have a buffer
    pub fn device_ids(&self) -> Vec<DeviceId> {
        let mut ids: Vec<_> = self
            .buffers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .cloned()
            .collect();
        ids.sort();
        ids
    }

    pub fn stats(&self) -> Vec<DeviceBufferStats> {
        let buffers: Vec<(DeviceId, SharedBuffer)> = self
            .buffers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .map(|(id, buffer)| (id.clone(), buffer.clone()))
            .collect();

        let mut stats: Vec<_> = buffers
            .into_iter()
            .map(|(device_id, buffer)| {
                let guard = buffer.lock().unwrap_or_else(PoisonError::into_inner);
                DeviceBufferStats {
                    device_id,
                    len: guard.len(),
                    dropped: guard.dropped_count(),
                    out_of_order: guard.out_of_order_count(),
                }
            })
            .collect();
        stats.sort_by(|a, b| a.device_id.cmp(&b.device_id));
        stats
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    fn existing(&self, device: &DeviceId) -> Option<SharedBuffer> {
        self.buffers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(device)
            .cloned()
    }

    fn buffer_for(&self, device: &DeviceId) -> SharedBuffer {
        if let Some(buffer) = self.existing(device) {
            return buffer;
        }
        self.buffers
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(device.clone())
            .or_insert_with(|| Arc::new(Mutex::new(DeviceBuffer::new(self.capacity))))
            .clone()
    }
}

impl Default for DeviceSampleStore {
    fn default() -> Self {
        Self::new(10)
    }
}
