//! Control-plane loop over the inbound pipe.

use std::io::Read;

use log::{debug, info, warn};

use super::reload::ReloadCoordinator;
use super::state::Liveness;
use crate::params::Parameters;
use crate::protocol::{ControlMessage, ProtocolError, read_message};

pub struct ControlLoop<'p, R> {
    reader: R,
    liveness: Liveness,
    reload: ReloadCoordinator<'p>,
}

impl<'p, R: Read> ControlLoop<'p, R> {
    pub fn new(reader: R, liveness: Liveness, reload: ReloadCoordinator<'p>) -> Self {
        Self {
            reader,
            liveness,
            reload,
        }
    }

    /// Reads and dispatches messages until shutdown.
    ///
    /// The parent closing the pipe counts as a shutdown. Only an I/O error
    /// on the pipe ends the loop with an error.
    pub fn run(&mut self) -> Result<(), ProtocolError> {
        while !self.liveness.is_stopped() {
            self.step()?;
        }
        Ok(())
    }

    /// Handles one inbound message.
    pub fn step(&mut self) -> Result<(), ProtocolError> {
        let body = match read_message(&mut self.reader) {
            Ok(body) => body,
            Err(ProtocolError::Closed) => {
                warn!("configuration pipe closed by parent, shutting down");
                self.liveness.stop();
                return Ok(());
            }
            Err(e) if e.is_recoverable() => {
                warn!("discarding inbound message: {e}");
                return Ok(());
            }
            Err(e) => {
                self.liveness.stop();
                return Err(e);
            }
        };

        // `read_message` never yields an empty body
        match ControlMessage::decode(body)? {
            ControlMessage::Shutdown => {
                info!("shutdown requested");
                self.liveness.stop();
            }
            ControlMessage::Reconfigure(payload) => match Parameters::unserialize(&payload) {
                Ok(params) => {
                    self.reload.apply(params);
                }
                Err(e) => {
                    warn!("skipping reloading parameters since they are invalid: {e}");
                }
            },
            ControlMessage::Unknown(tag) => {
                debug!("ignoring unknown command {:?}", tag as char);
            }
        }
        Ok(())
    }
}
