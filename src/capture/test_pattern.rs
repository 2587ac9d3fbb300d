//! Synthetic frame source
//!
//! Generates moving luma bars on a native capture thread at the configured
//! frame rate. Used when no camera backend is linked in, and as a stand-in
//! camera for end-to-end runs.

use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use anyhow::{Result, anyhow, bail};
use arc_swap::ArcSwap;
use crossbeam_channel::{Receiver, RecvTimeoutError, Sender};
use log::{debug, info};

use crate::capture::{FrameBuffer, FrameSink, FrameSource, NoSync};
use crate::params::{CameraSettings, FPS_RANGE, Parameters};
use crate::pipeline::types::{ColorSpace, FrameFormat, PixelFormat};

/// Row alignment of the generated buffers.
const STRIDE_ALIGN: u32 = 64;

/// Width of one bar in pixels.
const BAR_WIDTH: usize = 32;

pub struct TestPatternSource {
    format: FrameFormat,
    settings: Arc<ArcSwap<CameraSettings>>,
    /// Dropped to stop the capture thread.
    stop: Option<Sender<()>>,
    thread: Option<JoinHandle<()>>,
}

impl TestPatternSource {
    pub fn new(params: &Parameters) -> Result<Self> {
        let cam = &params.camera;
        if cam.camera_id != 0 {
            bail!("camera {} not found", cam.camera_id);
        }
        let stride = cam
            .width
            .div_ceil(STRIDE_ALIGN)
            .checked_mul(STRIDE_ALIGN)
            .ok_or_else(|| anyhow!("width {} is too large", cam.width))?;
        let color_space = if cam.height >= 720 {
            ColorSpace::Rec709
        } else {
            ColorSpace::Smpte170m
        };

        Ok(Self {
            format: FrameFormat {
                width: cam.width,
                height: cam.height,
                stride,
                pixel_format: PixelFormat::Yuv420,
                color_space,
            },
            settings: Arc::new(ArcSwap::from_pointee(cam.clone())),
            stop: None,
            thread: None,
        })
    }
}

impl FrameSource for TestPatternSource {
    fn format(&self) -> FrameFormat {
        self.format
    }

    fn start(&mut self, sink: Arc<dyn FrameSink>) -> Result<()> {
        if self.thread.is_some() {
            bail!("capture already running");
        }

        let format = self.format;
        let settings = Arc::clone(&self.settings);
        let (stop, stopped) = crossbeam_channel::bounded(0);
        let handle = std::thread::Builder::new()
            .name(String::from("capture"))
            .spawn(move || capture_loop(format, settings, stopped, sink))
            .map_err(|e| anyhow!("failed to spawn capture thread: {e}"))?;
        self.stop = Some(stop);
        self.thread = Some(handle);

        info!(
            "test pattern capture started: {}x{} stride {}",
            format.width, format.height, format.stride
        );
        Ok(())
    }

    fn reload(&self, params: &Parameters) -> Result<()> {
        let current = self.settings.load();
        if params.camera.camera_id != current.camera_id {
            bail!("camera id cannot change while capturing");
        }
        if params.camera.width != current.width || params.camera.height != current.height {
            bail!(
                "resolution change {}x{} -> {}x{} requires a restart",
                current.width,
                current.height,
                params.camera.width,
                params.camera.height
            );
        }
        self.settings.store(Arc::new(params.camera.clone()));
        debug!("test pattern settings reloaded");
        Ok(())
    }
}

impl Drop for TestPatternSource {
    fn drop(&mut self) {
        // disconnects the channel, waking a pacing wait
        drop(self.stop.take());
        if let Some(handle) = self.thread.take() {
            let _ = handle.join();
        }
    }
}

fn capture_loop(
    format: FrameFormat,
    settings: Arc<ArcSwap<CameraSettings>>,
    stopped: Receiver<()>,
    sink: Arc<dyn FrameSink>,
) {
    let mut buffer = vec![0u8; format.frame_size()];
    let started = Instant::now();
    let mut next_deadline = started;
    let mut sequence = 0u64;

    loop {
        let cam = settings.load_full();
        let wait = next_deadline.saturating_duration_since(Instant::now());
        match stopped.recv_timeout(wait) {
            Err(RecvTimeoutError::Timeout) => {}
            Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
        }
        next_deadline += frame_interval(cam.fps);

        fill_pattern(&mut buffer, &format, &cam, sequence);
        let timestamp = started.elapsed().as_micros() as u64;
        sink.on_frame(FrameBuffer::new(&mut buffer, &NoSync, timestamp));
        sequence += 1;
    }

    debug!("capture loop exited after {} frames", sequence);
}

/// Falls back to the slowest accepted rate for values validation would
/// have rejected.
fn frame_interval(fps: f64) -> Duration {
    let fps = if FPS_RANGE.contains(&fps) { fps } else { *FPS_RANGE.start() };
    Duration::from_secs_f64(1.0 / fps)
}

fn fill_pattern(buffer: &mut [u8], format: &FrameFormat, cam: &CameraSettings, sequence: u64) {
    let width = format.width as usize;
    let height = format.height as usize;
    let stride = format.stride as usize;
    let [luma, chroma_u, chroma_v] = format.plane_ranges();

    // brightness is in [-1, 1]
    let offset = (cam.brightness.clamp(-1.0, 1.0) * 96.0) as i32;
    let shift = (sequence as usize * 4) % (2 * BAR_WIDTH);

    let mut row = vec![0u8; width];
    for (x, px) in row.iter_mut().enumerate() {
        let x = if cam.h_flip { width - 1 - x } else { x };
        let bar = ((x + shift) / BAR_WIDTH) % 2;
        *px = if bar == 0 { 64 } else { 192 };
    }

    let plane = &mut buffer[luma];
    for y in 0..height {
        let gy = if cam.v_flip { height - 1 - y } else { y };
        let gradient = (gy * 32 / height) as i32;
        let dst = &mut plane[y * stride..y * stride + width];
        for (d, s) in dst.iter_mut().zip(&row) {
            *d = (*s as i32 + gradient + offset).clamp(16, 235) as u8;
        }
    }

    buffer[chroma_u].fill(128);
    buffer[chroma_v].fill(128);
}
