//! Frame pipeline and control plane
//!
//! Three execution contexts meet here:
//! - the control loop on the main thread, reading the inbound pipe
//! - the frame source's capture thread, running the [`FrameOrchestrator`]
//! - the encoder's worker thread(s), writing through the [`OutputMux`]
//!
//! All shared state lives in one set of `Arc`s built by the [`Pipeline`]
//! at startup; there are no globals.

pub mod control;
pub mod coordinator;
pub mod frame;
pub mod health;
pub mod output;
pub mod reload;
pub mod snapshot;
pub mod state;
pub mod types;

#[cfg(test)]
pub(crate) mod testing;

pub use coordinator::{Backend, DefaultBackend, Pipeline, PipelineError, StartupError};
pub use frame::FrameOrchestrator;
pub use health::PipelineHealth;
pub use output::OutputMux;
pub use state::{Liveness, PipelineState};
