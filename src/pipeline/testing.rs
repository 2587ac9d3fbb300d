//! Test doubles for the pipeline collaborators.

use std::io::{self, Write};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;

use anyhow::{Result, anyhow, bail};

use crate::capture::{BufferSync, FrameBuffer, FrameSink, FrameSource, NoSync, SyncAccess};
use crate::encoder::{EncodedSink, Encoder};
use crate::overlay::Overlay;
use crate::params::{OverlaySettings, Parameters};
use crate::pipeline::coordinator::Backend;
use crate::pipeline::types::{ColorSpace, EncodedUnit, FrameFormat, PixelFormat};

/// Shared, ordered record of calls across several doubles.
#[derive(Debug, Clone, Default)]
pub struct CallLog(Arc<Mutex<Vec<String>>>);

impl CallLog {
    pub fn push(&self, entry: impl Into<String>) {
        self.0.lock().unwrap().push(entry.into());
    }

    pub fn entries(&self) -> Vec<String> {
        self.0.lock().unwrap().clone()
    }
}

/// Records every sync request.
#[derive(Debug, Default)]
pub struct RecordingSync {
    events: Mutex<Vec<String>>,
    fail_start: bool,
}

impl RecordingSync {
    pub fn failing_start() -> Self {
        Self {
            fail_start: true,
            ..Self::default()
        }
    }

    pub fn events(&self) -> Vec<String> {
        self.events.lock().unwrap().clone()
    }
}

impl BufferSync for RecordingSync {
    fn start(&self, access: SyncAccess) -> io::Result<()> {
        self.events.lock().unwrap().push(format!("start:{access:?}"));
        if self.fail_start {
            return Err(io::Error::from_raw_os_error(25));
        }
        Ok(())
    }

    fn end(&self, access: SyncAccess) -> io::Result<()> {
        self.events.lock().unwrap().push(format!("end:{access:?}"));
        Ok(())
    }
}

#[derive(Debug, Default)]
struct OverlayState {
    failing: bool,
    seen: Vec<OverlaySettings>,
}

/// Stamps [`FakeOverlay::MARK`] into the first byte of each frame.
#[derive(Debug, Clone, Default)]
pub struct FakeOverlay(Arc<Mutex<OverlayState>>);

impl FakeOverlay {
    pub const MARK: u8 = 0xAB;

    pub fn set_failing(&self, failing: bool) {
        self.0.lock().unwrap().failing = failing;
    }

    /// Overlay settings passed to each draw, in order.
    pub fn seen(&self) -> Vec<OverlaySettings> {
        self.0.lock().unwrap().seen.clone()
    }
}

impl Overlay for FakeOverlay {
    fn draw(&self, frame: &mut [u8], settings: &OverlaySettings) -> Result<()> {
        let mut state = self.0.lock().unwrap();
        state.seen.push(settings.clone());
        if state.failing {
            bail!("overlay failure");
        }
        if let Some(first) = frame.first_mut() {
            *first = Self::MARK;
        }
        Ok(())
    }
}

/// What the fake encoder saw of a submitted frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubmittedFrame {
    pub timestamp: u64,
    pub len: usize,
    pub first_byte: u8,
}

#[derive(Default)]
struct EncoderState {
    failing: bool,
    reject_reloads: bool,
    frames: Vec<SubmittedFrame>,
    reloads: Vec<Parameters>,
    log: Option<CallLog>,
    sink: Option<Arc<dyn EncodedSink>>,
}

/// Records frames and emits one `[first byte; 4]` unit per frame to its
/// sink, if it has one.
#[derive(Clone, Default)]
pub struct FakeEncoder(Arc<Mutex<EncoderState>>);

impl FakeEncoder {
    pub fn set_failing(&self, failing: bool) {
        self.0.lock().unwrap().failing = failing;
    }

    pub fn reject_reloads(&self, reject: bool) {
        self.0.lock().unwrap().reject_reloads = reject;
    }

    pub fn set_log(&self, log: CallLog) {
        self.0.lock().unwrap().log = Some(log);
    }

    pub fn set_sink(&self, sink: Arc<dyn EncodedSink>) {
        self.0.lock().unwrap().sink = Some(sink);
    }

    pub fn frames(&self) -> Vec<SubmittedFrame> {
        self.0.lock().unwrap().frames.clone()
    }

    pub fn reloads(&self) -> Vec<Parameters> {
        self.0.lock().unwrap().reloads.clone()
    }
}

impl Encoder for FakeEncoder {
    fn encode(&self, frame: &mut FrameBuffer<'_>) -> Result<()> {
        let timestamp = frame.timestamp();
        let guard = frame.begin_access(SyncAccess::Read);
        let submitted = SubmittedFrame {
            timestamp,
            len: guard.len(),
            first_byte: guard.first().copied().unwrap_or_default(),
        };
        drop(guard);

        let sink = {
            let mut state = self.0.lock().unwrap();
            if state.failing {
                bail!("encoder queue is full");
            }
            state.frames.push(submitted.clone());
            state.sink.clone()
        };
        if let Some(sink) = sink {
            sink.on_encoded(EncodedUnit {
                data: &[submitted.first_byte; 4],
                timestamp,
            });
        }
        Ok(())
    }

    fn reload(&self, params: &Parameters) -> Result<()> {
        let mut state = self.0.lock().unwrap();
        if let Some(log) = &state.log {
            log.push("encoder.reload");
        }
        if state.reject_reloads {
            bail!("rejected");
        }
        state.reloads.push(params.clone());
        Ok(())
    }
}

#[derive(Default)]
struct SourceState {
    reject_reloads: bool,
    fail_start: bool,
    frames_on_start: u64,
    reloads: Vec<Parameters>,
    log: Option<CallLog>,
    started: bool,
    thread: Option<JoinHandle<()>>,
}

/// Frame source that delivers a fixed number of 16-byte frames from its own
/// thread once started.
#[derive(Clone, Default)]
pub struct FakeSource(Arc<Mutex<SourceState>>);

impl FakeSource {
    pub const FRAME_LEN: usize = 16;

    pub fn reject_reloads(&self, reject: bool) {
        self.0.lock().unwrap().reject_reloads = reject;
    }

    pub fn fail_start(&self) {
        self.0.lock().unwrap().fail_start = true;
    }

    pub fn deliver_on_start(&self, frames: u64) {
        self.0.lock().unwrap().frames_on_start = frames;
    }

    pub fn set_log(&self, log: CallLog) {
        self.0.lock().unwrap().log = Some(log);
    }

    pub fn reloads(&self) -> Vec<Parameters> {
        self.0.lock().unwrap().reloads.clone()
    }

    pub fn started(&self) -> bool {
        self.0.lock().unwrap().started
    }

    /// Waits for the delivery thread, if any.
    pub fn join(&self) {
        let thread = self.0.lock().unwrap().thread.take();
        if let Some(thread) = thread {
            thread.join().unwrap();
        }
    }
}

impl FrameSource for FakeSource {
    fn format(&self) -> FrameFormat {
        FrameFormat {
            width: 4,
            height: 2,
            stride: 8,
            pixel_format: PixelFormat::Yuv420,
            color_space: ColorSpace::Smpte170m,
        }
    }

    fn start(&mut self, sink: Arc<dyn FrameSink>) -> Result<()> {
        let mut state = self.0.lock().unwrap();
        if state.fail_start {
            bail!("device busy");
        }
        state.started = true;
        let frames = state.frames_on_start;
        state.thread = Some(std::thread::spawn(move || {
            let mut data = vec![0u8; FakeSource::FRAME_LEN];
            for n in 0..frames {
                data.fill(0);
                sink.on_frame(FrameBuffer::new(&mut data, &NoSync, n * 1000));
            }
        }));
        Ok(())
    }

    fn reload(&self, params: &Parameters) -> Result<()> {
        let mut state = self.0.lock().unwrap();
        if let Some(log) = &state.log {
            log.push("source.reload");
        }
        if state.reject_reloads {
            bail!("resolution change requires a restart");
        }
        state.reloads.push(params.clone());
        Ok(())
    }
}

/// Which collaborator the fake backend fails to build.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailAt {
    Source,
    Overlay,
    Encoder,
}

/// Backend handing out clones of its doubles.
#[derive(Clone, Default)]
pub struct FakeBackend {
    pub source: FakeSource,
    pub overlay: FakeOverlay,
    pub encoder: FakeEncoder,
    pub fail_at: Option<FailAt>,
    pub log: CallLog,
}

impl Backend for FakeBackend {
    fn create_source(&self, _params: &Parameters) -> Result<Box<dyn FrameSource>> {
        self.log.push("create_source");
        if self.fail_at == Some(FailAt::Source) {
            return Err(anyhow!("camera 0 not found"));
        }
        Ok(Box::new(self.source.clone()))
    }

    fn create_overlay(&self, _params: &Parameters, _format: FrameFormat) -> Result<Box<dyn Overlay>> {
        self.log.push("create_overlay");
        if self.fail_at == Some(FailAt::Overlay) {
            return Err(anyhow!("invalid overlay text pattern"));
        }
        Ok(Box::new(self.overlay.clone()))
    }

    fn create_encoder(
        &self,
        _params: &Parameters,
        _format: FrameFormat,
        sink: Arc<dyn EncodedSink>,
    ) -> Result<Arc<dyn Encoder>> {
        self.log.push("create_encoder");
        if self.fail_at == Some(FailAt::Encoder) {
            return Err(anyhow!("no usable H.264 encoder"));
        }
        self.encoder.set_sink(sink);
        Ok(Arc::new(self.encoder.clone()))
    }
}

#[derive(Default)]
struct WriterState {
    data: Vec<u8>,
    failing: bool,
}

/// In-memory outbound pipe. Accepts at most `chunk` bytes per write call
/// when chunked, yielding between calls.
#[derive(Clone, Default)]
pub struct SharedWriter {
    state: Arc<Mutex<WriterState>>,
    chunk: Option<usize>,
}

impl SharedWriter {
    pub fn chunked(chunk: usize) -> Self {
        Self {
            chunk: Some(chunk),
            ..Self::default()
        }
    }

    pub fn contents(&self) -> Vec<u8> {
        self.state.lock().unwrap().data.clone()
    }

    pub fn fail_writes(&self) {
        self.state.lock().unwrap().failing = true;
    }
}

impl Write for SharedWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let n = {
            let mut state = self.state.lock().unwrap();
            if state.failing {
                return Err(io::Error::from(io::ErrorKind::BrokenPipe));
            }
            let n = self.chunk.map_or(buf.len(), |c| c.min(buf.len()));
            state.data.extend_from_slice(&buf[..n]);
            n
        };
        if self.chunk.is_some() {
            std::thread::yield_now();
        }
        Ok(n)
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}
