//! Camera capture module
//!
//! A [`FrameSource`] owns the capture thread and hands every frame to a
//! [`FrameSink`] while it still owns the underlying buffer. The sink must be
//! done with the frame when `on_frame` returns.

use std::sync::Arc;

use anyhow::Result;

use crate::params::Parameters;
use crate::pipeline::types::FrameFormat;

pub mod sync;
pub mod test_pattern;

pub use sync::{BufferSync, DmaBufSync, NoSync, SyncAccess, SyncGuard};
pub use test_pattern::TestPatternSource;

/// One captured frame, borrowed from the source for a single callback.
pub struct FrameBuffer<'a> {
    data: &'a mut [u8],
    sync: &'a dyn BufferSync,
    /// Capture timestamp in microseconds.
    timestamp: u64,
}

impl<'a> FrameBuffer<'a> {
    pub fn new(data: &'a mut [u8], sync: &'a dyn BufferSync, timestamp: u64) -> Self {
        Self {
            data,
            sync,
            timestamp,
        }
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn timestamp(&self) -> u64 {
        self.timestamp
    }

    /// Opens a synchronized CPU access window on the frame contents.
    pub fn begin_access(&mut self, access: SyncAccess) -> SyncGuard<'_> {
        SyncGuard::begin(&mut *self.data, self.sync, access)
    }
}

/// Accepts frames from a source, on the source's capture thread.
pub trait FrameSink: Send + Sync {
    fn on_frame(&self, frame: FrameBuffer<'_>);
}

/// Produces frames asynchronously once started.
///
/// Dropping the source stops capture and joins its thread.
pub trait FrameSource: Send {
    /// Geometry of the frames this source will deliver.
    fn format(&self) -> FrameFormat;

    /// Starts delivering frames to `sink`.
    fn start(&mut self, sink: Arc<dyn FrameSink>) -> Result<()>;

    /// Applies new camera settings without stopping capture.
    ///
    /// On error the previous settings stay in effect.
    fn reload(&self, params: &Parameters) -> Result<()>;
}
