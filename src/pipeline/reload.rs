//! Hot reload of a running pipeline.

use std::sync::Arc;

use log::{info, warn};

use super::health::PipelineHealth;
use super::snapshot::ActiveParameters;
use crate::capture::FrameSource;
use crate::encoder::Encoder;
use crate::params::Parameters;

/// Which consumers took the new snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReloadReport {
    pub source: bool,
    pub encoder: bool,
}

/// Hands a validated snapshot to the frame source, then to the encoder.
///
/// A consumer that rejects it keeps its previous snapshot. The other one is
/// still reloaded and nothing is rolled back.
pub struct ReloadCoordinator<'p> {
    source: &'p dyn FrameSource,
    encoder: &'p dyn Encoder,
    active: &'p ActiveParameters,
    health: &'p PipelineHealth,
}

impl<'p> ReloadCoordinator<'p> {
    pub fn new(
        source: &'p dyn FrameSource,
        encoder: &'p dyn Encoder,
        active: &'p ActiveParameters,
        health: &'p PipelineHealth,
    ) -> Self {
        Self {
            source,
            encoder,
            active,
            health,
        }
    }

    pub fn apply(&self, params: Parameters) -> ReloadReport {
        let next = Arc::new(params);

        let source = match self.source.reload(&next) {
            Ok(()) => {
                self.active.source.install(Arc::clone(&next));
                true
            }
            Err(e) => {
                warn!("frame source rejected new parameters, keeping previous ones: {e:#}");
                false
            }
        };
        self.health.record_reload(source);

        let encoder = match self.encoder.reload(&next) {
            Ok(()) => {
                self.active.encoder.install(Arc::clone(&next));
                true
            }
            Err(e) => {
                warn!("encoder rejected new parameters, keeping previous ones: {e:#}");
                false
            }
        };
        self.health.record_reload(encoder);

        if source || encoder {
            log::set_max_level(next.log_level);
            info!(
                "parameters reloaded (source v{}, encoder v{})",
                self.active.source.version(),
                self.active.encoder.version()
            );
        }

        ReloadReport { source, encoder }
    }
}
