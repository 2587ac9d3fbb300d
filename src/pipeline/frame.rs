//! Per-frame hand-off: sync bracket, overlay, encode submission.

use std::sync::Arc;

use log::{debug, warn};

use super::health::{PipelineHealth, SUMMARY_INTERVAL};
use super::snapshot::ActiveParameters;
use super::state::Liveness;
use crate::capture::{FrameBuffer, FrameSink, SyncAccess};
use crate::encoder::Encoder;
use crate::overlay::Overlay;

/// Frame callback registered with the frame source.
///
/// Runs on the capture thread. The frame is never kept past `on_frame`.
pub struct FrameOrchestrator {
    overlay: Box<dyn Overlay>,
    encoder: Arc<dyn Encoder>,
    active: Arc<ActiveParameters>,
    health: Arc<PipelineHealth>,
    liveness: Liveness,
}

impl FrameOrchestrator {
    pub fn new(
        overlay: Box<dyn Overlay>,
        encoder: Arc<dyn Encoder>,
        active: Arc<ActiveParameters>,
        health: Arc<PipelineHealth>,
        liveness: Liveness,
    ) -> Self {
        Self {
            overlay,
            encoder,
            active,
            health,
            liveness,
        }
    }

    fn process(&self, mut frame: FrameBuffer<'_>) {
        // one load per frame: the whole frame sees a single snapshot
        let params = self.active.source.load();

        let mut guard = frame.begin_access(SyncAccess::ReadWrite);
        if guard.start_error().is_some() {
            self.health.record_sync_failure();
        }
        let drawn = self.overlay.draw(&mut guard, &params.overlay);
        if let Err(e) = guard.finish() {
            warn!("buffer sync end failed: {e}");
            self.health.record_sync_failure();
        }

        if let Err(e) = drawn {
            warn!("overlay failed, dropping frame: {e:#}");
            self.health.record_overlay_failure();
            return;
        }

        if let Err(e) = self.encoder.encode(&mut frame) {
            warn!("encode submission failed, dropping frame: {e:#}");
            self.health.record_encode_failure();
            return;
        }

        let count = self.health.record_frame();
        if count % SUMMARY_INTERVAL == 0 {
            debug!("{}", self.health.summary());
        }
    }
}

impl FrameSink for FrameOrchestrator {
    fn on_frame(&self, frame: FrameBuffer<'_>) {
        if self.liveness.is_stopped() {
            return;
        }
        self.process(frame);
    }
}
