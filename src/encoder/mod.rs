//! Video encoding
//!
//! An [`Encoder`] accepts raw frames on the capture thread and delivers
//! encoded units later, from its own thread(s), to an [`EncodedSink`].

use anyhow::Result;

use crate::capture::FrameBuffer;
use crate::params::Parameters;
use crate::pipeline::types::EncodedUnit;

pub mod ffmpeg;
mod frame_pool;

pub use ffmpeg::FfmpegEncoder;

/// Accepts encoded output. Called concurrently from encoder threads.
pub trait EncodedSink: Send + Sync {
    fn on_encoded(&self, unit: EncodedUnit<'_>);
}

pub trait Encoder: Send + Sync {
    /// Submits a frame for asynchronous encoding.
    ///
    /// The frame is only borrowed for the duration of the call; an encoder
    /// that needs the pixels later must copy them.
    fn encode(&self, frame: &mut FrameBuffer<'_>) -> Result<()>;

    /// Applies new encoder settings without interrupting the stream.
    ///
    /// On error the previous settings stay in effect.
    fn reload(&self, params: &Parameters) -> Result<()>;
}
