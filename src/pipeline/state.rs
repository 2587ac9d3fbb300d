//! Pipeline liveness

use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;

#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineState {
    /// Collaborators are being built, nothing has been reported yet.
    Starting = 0,
    /// Ready was sent, frames flow.
    Running = 1,
    /// Shutdown received or startup failed. Terminal.
    Stopped = 2,
}

impl PipelineState {
    fn from_u8(v: u8) -> Self {
        match v {
            0 => PipelineState::Starting,
            1 => PipelineState::Running,
            _ => PipelineState::Stopped,
        }
    }
}

impl std::fmt::Display for PipelineState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            PipelineState::Starting => "Starting",
            PipelineState::Running => "Running",
            PipelineState::Stopped => "Stopped",
        };
        f.write_str(s)
    }
}

/// Shared running/stopped flag.
///
/// Cloning yields another handle on the same state. The transition to
/// [`PipelineState::Stopped`] happens exactly once.
#[derive(Debug, Clone)]
pub struct Liveness {
    state: Arc<AtomicU8>,
}

impl Liveness {
    pub fn new() -> Self {
        Self {
            state: Arc::new(AtomicU8::new(PipelineState::Starting as u8)),
        }
    }

    pub fn state(&self) -> PipelineState {
        PipelineState::from_u8(self.state.load(Ordering::Acquire))
    }

    /// Starting -> Running. Returns false if the pipeline already left
    /// the starting state.
    pub fn mark_running(&self) -> bool {
        self.state
            .compare_exchange(
                PipelineState::Starting as u8,
                PipelineState::Running as u8,
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .is_ok()
    }

    /// Moves to Stopped. Returns true for the caller that made the transition.
    pub fn stop(&self) -> bool {
        let previous = self.state.swap(PipelineState::Stopped as u8, Ordering::AcqRel);
        previous != PipelineState::Stopped as u8
    }

    pub fn is_running(&self) -> bool {
        self.state() == PipelineState::Running
    }

    pub fn is_stopped(&self) -> bool {
        self.state() == PipelineState::Stopped
    }
}

impl Default for Liveness {
    fn default() -> Self {
        Self::new()
    }
}
