//! Output multiplexer
//!
//! Every write to the outbound pipe goes through [`OutputMux`], which holds
//! one lock for the whole framed message. Media emitted before the ready
//! status waits for it, so the parent always sees ready (or error) first.

use std::io::{self, Write};
use std::sync::{Arc, Condvar, Mutex, MutexGuard};

use log::{debug, warn};

use super::health::PipelineHealth;
use crate::encoder::EncodedSink;
use crate::pipeline::types::EncodedUnit;
use crate::protocol::{Status, encode_buffer, write_framed};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Gate {
    /// Startup in progress, media waits.
    Closed,
    /// Ready sent.
    Open,
    /// Error sent, media is discarded.
    Failed,
}

struct Outbound {
    writer: Box<dyn Write + Send>,
    gate: Gate,
    write_errors: u64,
}

pub struct OutputMux {
    inner: Mutex<Outbound>,
    opened: Condvar,
    health: Arc<PipelineHealth>,
}

impl OutputMux {
    pub fn new(writer: Box<dyn Write + Send>, health: Arc<PipelineHealth>) -> Self {
        Self {
            inner: Mutex::new(Outbound {
                writer,
                gate: Gate::Closed,
                write_errors: 0,
            }),
            opened: Condvar::new(),
            health,
        }
    }

    fn lock(&self) -> MutexGuard<'_, Outbound> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Writes one media unit as a single framed message.
    ///
    /// Blocks until the ready status has been written. Returns without
    /// writing once an error status was sent.
    pub fn emit(&self, timestamp: u64, data: &[u8]) {
        let message = encode_buffer(timestamp, data);

        let mut out = self.lock();
        while out.gate == Gate::Closed {
            out = self.opened.wait(out).unwrap_or_else(|e| e.into_inner());
        }
        if out.gate == Gate::Failed {
            return;
        }

        match write_framed(&mut out.writer, &message) {
            Ok(()) => self.health.record_unit(data.len()),
            Err(e) => {
                out.write_errors += 1;
                if out.write_errors == 1 {
                    warn!("outbound write failed: {e}");
                } else {
                    debug!("outbound write failed ({} so far): {e}", out.write_errors);
                }
            }
        }
    }

    /// Writes a status message. Ready opens the gate for media, an error
    /// closes it for good.
    pub fn status(&self, status: &Status) -> io::Result<()> {
        let mut out = self.lock();
        let result = write_framed(&mut out.writer, &status.encode());

        out.gate = match status {
            Status::Ready if out.gate == Gate::Closed => Gate::Open,
            Status::Ready => out.gate,
            Status::Error(_) => Gate::Failed,
        };
        drop(out);
        self.opened.notify_all();

        result
    }
}

impl EncodedSink for OutputMux {
    fn on_encoded(&self, unit: EncodedUnit<'_>) {
        self.emit(unit.timestamp, unit.data);
    }
}
