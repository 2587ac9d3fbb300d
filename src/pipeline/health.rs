//! Pipeline counters

use std::sync::atomic::{AtomicU64, Ordering};

/// Frames between two periodic summaries.
pub const SUMMARY_INTERVAL: u64 = 300;

/// Counters shared by the frame path, the encoder output path and the
/// control loop. Relaxed atomics, read only for reporting.
#[derive(Debug, Default)]
pub struct PipelineHealth {
    frames_processed: AtomicU64,
    frame_drops: AtomicU64,
    sync_failures: AtomicU64,
    overlay_failures: AtomicU64,
    encode_failures: AtomicU64,
    units_emitted: AtomicU64,
    bytes_emitted: AtomicU64,
    reloads_applied: AtomicU64,
    reloads_rejected: AtomicU64,
}

impl PipelineHealth {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records a frame handed to the encoder. Returns the new total.
    pub fn record_frame(&self) -> u64 {
        self.frames_processed.fetch_add(1, Ordering::Relaxed) + 1
    }

    pub fn record_frame_drop(&self) {
        self.frame_drops.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_sync_failure(&self) {
        self.sync_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_overlay_failure(&self) {
        self.overlay_failures.fetch_add(1, Ordering::Relaxed);
        self.record_frame_drop();
    }

    pub fn record_encode_failure(&self) {
        self.encode_failures.fetch_add(1, Ordering::Relaxed);
        self.record_frame_drop();
    }

    pub fn record_unit(&self, size: usize) {
        self.units_emitted.fetch_add(1, Ordering::Relaxed);
        self.bytes_emitted.fetch_add(size as u64, Ordering::Relaxed);
    }

    pub fn record_reload(&self, applied: bool) {
        if applied {
            self.reloads_applied.fetch_add(1, Ordering::Relaxed);
        } else {
            self.reloads_rejected.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn frames_processed(&self) -> u64 {
        self.frames_processed.load(Ordering::Relaxed)
    }

    pub fn frame_drops(&self) -> u64 {
        self.frame_drops.load(Ordering::Relaxed)
    }

    pub fn frame_drop_rate(&self) -> f64 {
        let drops = self.frame_drops();
        let total = self.frames_processed() + drops;
        if total == 0 {
            return 0.0;
        }
        (drops as f64 / total as f64) * 100.0
    }

    pub fn summary(&self) -> HealthSummary {
        HealthSummary {
            frames_processed: self.frames_processed(),
            frame_drops: self.frame_drops(),
            frame_drop_rate: self.frame_drop_rate(),
            sync_failures: self.sync_failures.load(Ordering::Relaxed),
            overlay_failures: self.overlay_failures.load(Ordering::Relaxed),
            encode_failures: self.encode_failures.load(Ordering::Relaxed),
            units_emitted: self.units_emitted.load(Ordering::Relaxed),
            bytes_emitted: self.bytes_emitted.load(Ordering::Relaxed),
            reloads_applied: self.reloads_applied.load(Ordering::Relaxed),
            reloads_rejected: self.reloads_rejected.load(Ordering::Relaxed),
        }
    }
}

/// Snapshot of the counters
#[derive(Debug, Clone, PartialEq)]
pub struct HealthSummary {
    pub frames_processed: u64,
    pub frame_drops: u64,
    pub frame_drop_rate: f64,
    pub sync_failures: u64,
    pub overlay_failures: u64,
    pub encode_failures: u64,
    pub units_emitted: u64,
    pub bytes_emitted: u64,
    pub reloads_applied: u64,
    pub reloads_rejected: u64,
}

impl std::fmt::Display for HealthSummary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "Health: {} frames ({} drops, {:.2}%), {} sync failures, {} overlay failures, {} encode failures, {} units / {} bytes out, reloads {} applied {} rejected",
            self.frames_processed,
            self.frame_drops,
            self.frame_drop_rate,
            self.sync_failures,
            self.overlay_failures,
            self.encode_failures,
            self.units_emitted,
            self.bytes_emitted,
            self.reloads_applied,
            self.reloads_rejected
        )
    }
}
