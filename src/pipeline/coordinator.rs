//! Startup sequencing and lifetime of one pipeline.
//!
//! read initial configuration -> build frame source, overlay and encoder ->
//! start capture -> send ready -> run the control loop. Any failure before
//! ready is reported once on the outbound pipe as an error status.

use std::io::{Read, Write};
use std::sync::Arc;

use anyhow::Result;
use log::{error, info, warn};
use thiserror::Error;

use super::control::ControlLoop;
use super::frame::FrameOrchestrator;
use super::health::PipelineHealth;
use super::output::OutputMux;
use super::reload::ReloadCoordinator;
use super::snapshot::ActiveParameters;
use super::state::Liveness;
use crate::capture::{FrameSource, TestPatternSource};
use crate::encoder::{EncodedSink, Encoder, FfmpegEncoder};
use crate::overlay::{Overlay, TextOverlay};
use crate::params::{Parameters, ParamsError};
use crate::pipeline::types::FrameFormat;
use crate::protocol::{ControlMessage, ProtocolError, Status, read_message};

/// Builds the collaborators of a pipeline.
pub trait Backend {
    fn create_source(&self, params: &Parameters) -> Result<Box<dyn FrameSource>>;

    /// `format` is the geometry reported by the source just created.
    fn create_overlay(&self, params: &Parameters, format: FrameFormat) -> Result<Box<dyn Overlay>>;

    fn create_encoder(
        &self,
        params: &Parameters,
        format: FrameFormat,
        sink: Arc<dyn EncodedSink>,
    ) -> Result<Arc<dyn Encoder>>;
}

/// Test-pattern camera, text overlay and libavcodec H.264.
#[derive(Debug, Default, Clone, Copy)]
pub struct DefaultBackend;

impl Backend for DefaultBackend {
    fn create_source(&self, params: &Parameters) -> Result<Box<dyn FrameSource>> {
        Ok(Box::new(TestPatternSource::new(params)?))
    }

    fn create_overlay(&self, params: &Parameters, format: FrameFormat) -> Result<Box<dyn Overlay>> {
        Ok(Box::new(TextOverlay::new(params, format)?))
    }

    fn create_encoder(
        &self,
        params: &Parameters,
        format: FrameFormat,
        sink: Arc<dyn EncodedSink>,
    ) -> Result<Arc<dyn Encoder>> {
        Ok(Arc::new(FfmpegEncoder::new(params, format, sink)?))
    }
}

/// Unrecoverable failures before the pipeline is ready.
#[derive(Debug, Error)]
pub enum StartupError {
    #[error("read initial configuration: {0}")]
    ConfigRead(#[source] ProtocolError),
    #[error("expected a configuration message, got command {0:?}")]
    NotConfiguration(char),
    #[error("parameters: {0}")]
    Params(#[from] ParamsError),
    #[error("camera create: {0:#}")]
    CameraCreate(anyhow::Error),
    #[error("text create: {0:#}")]
    OverlayCreate(anyhow::Error),
    #[error("encoder create: {0:#}")]
    EncoderCreate(anyhow::Error),
    #[error("camera start: {0:#}")]
    CameraStart(anyhow::Error),
}

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error(transparent)]
    Startup(#[from] StartupError),
    #[error("control pipe: {0}")]
    Control(#[from] ProtocolError),
}

/// One pipeline bound to its two pipes.
pub struct Pipeline<R> {
    conf: R,
    output: Arc<OutputMux>,
    health: Arc<PipelineHealth>,
    liveness: Liveness,
}

impl<R: Read> Pipeline<R> {
    pub fn new(conf: R, video: Box<dyn Write + Send>) -> Self {
        let health = Arc::new(PipelineHealth::new());
        Self {
            conf,
            output: Arc::new(OutputMux::new(video, Arc::clone(&health))),
            health,
            liveness: Liveness::new(),
        }
    }

    pub fn liveness(&self) -> Liveness {
        self.liveness.clone()
    }

    /// Runs until shutdown. Returns an error for a failed startup, after the
    /// error status has been written, or for a broken control pipe.
    pub fn run<B: Backend>(mut self, backend: &B) -> Result<(), PipelineError> {
        let initial = self.read_initial();
        let params = self.fail_on_err(initial)?;
        log::set_max_level(params.log_level);
        let params = Arc::new(params);

        let mut source = self.fail_on_err(
            backend
                .create_source(&params)
                .map_err(StartupError::CameraCreate),
        )?;
        let format = source.format();

        let overlay = self.fail_on_err(
            backend
                .create_overlay(&params, format)
                .map_err(StartupError::OverlayCreate),
        )?;

        let sink: Arc<dyn EncodedSink> = self.output.clone();
        let encoder = self.fail_on_err(
            backend
                .create_encoder(&params, format, sink)
                .map_err(StartupError::EncoderCreate),
        )?;

        let active = Arc::new(ActiveParameters::new(Arc::clone(&params)));
        let orchestrator = Arc::new(FrameOrchestrator::new(
            overlay,
            Arc::clone(&encoder),
            Arc::clone(&active),
            Arc::clone(&self.health),
            self.liveness.clone(),
        ));
        self.fail_on_err(source.start(orchestrator).map_err(StartupError::CameraStart))?;

        if let Err(e) = self.output.status(&Status::Ready) {
            warn!("failed to send ready status: {e}");
        }
        self.liveness.mark_running();
        info!(
            "pipeline ready: {}x{} stride {}",
            format.width, format.height, format.stride
        );

        let result = {
            let reload = ReloadCoordinator::new(source.as_ref(), encoder.as_ref(), &active, &self.health);
            ControlLoop::new(&mut self.conf, self.liveness.clone(), reload).run()
        };

        self.liveness.stop();
        // capture first, so no frame reaches an encoder being torn down
        drop(source);
        drop(encoder);
        info!("{}", self.health.summary());

        result.map_err(PipelineError::from)
    }

    /// Reads the first message, which must carry the initial parameters.
    fn read_initial(&mut self) -> Result<Parameters, StartupError> {
        let body = loop {
            match read_message(&mut self.conf) {
                Ok(body) => break body,
                Err(e) if e.is_recoverable() => warn!("discarding inbound message: {e}"),
                Err(e) => return Err(StartupError::ConfigRead(e)),
            }
        };
        match ControlMessage::decode(body).map_err(StartupError::ConfigRead)? {
            ControlMessage::Reconfigure(payload) => Ok(Parameters::unserialize(&payload)?),
            ControlMessage::Shutdown => Err(StartupError::NotConfiguration('e')),
            ControlMessage::Unknown(tag) => Err(StartupError::NotConfiguration(tag as char)),
        }
    }

    /// Reports a startup failure on the outbound pipe while every
    /// collaborator built so far is still alive.
    fn fail_on_err<T>(&self, result: Result<T, StartupError>) -> Result<T, StartupError> {
        result.map_err(|e| {
            error!("{e}");
            self.liveness.stop();
            if let Err(w) = self.output.status(&Status::Error(e.to_string())) {
                warn!("failed to send error status: {w}");
            }
            e
        })
    }
}
