//! Active parameter snapshots, one per consumer.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use arc_swap::ArcSwap;

use crate::params::Parameters;

/// The snapshot currently in effect for one consumer.
///
/// Readers take a full `Arc<Parameters>` with a single load, so a frame never
/// observes a mix of two snapshots.
#[derive(Debug)]
pub struct ActiveSnapshot {
    current: ArcSwap<Parameters>,
    version: AtomicU64,
}

impl ActiveSnapshot {
    pub fn new(initial: Arc<Parameters>) -> Self {
        Self {
            current: ArcSwap::new(initial),
            version: AtomicU64::new(0),
        }
    }

    /// Installs `next` and returns the new version.
    pub fn install(&self, next: Arc<Parameters>) -> u64 {
        self.current.store(next);
        self.version.fetch_add(1, Ordering::AcqRel).saturating_add(1)
    }

    pub fn load(&self) -> Arc<Parameters> {
        self.current.load_full()
    }

    /// Number of installs since creation.
    pub fn version(&self) -> u64 {
        self.version.load(Ordering::Acquire)
    }
}

/// Snapshots in effect for the frame source and the encoder.
#[derive(Debug)]
pub struct ActiveParameters {
    pub source: ActiveSnapshot,
    pub encoder: ActiveSnapshot,
}

impl ActiveParameters {
    pub fn new(initial: Arc<Parameters>) -> Self {
        Self {
            source: ActiveSnapshot::new(Arc::clone(&initial)),
            encoder: ActiveSnapshot::new(initial),
        }
    }
}
