//! In-place text overlay on raw frames.

use anyhow::Result;

use crate::params::OverlaySettings;

mod font;
pub mod text;

pub use text::TextOverlay;

/// Draws on a frame buffer in place.
pub trait Overlay: Send + Sync {
    fn draw(&self, frame: &mut [u8], settings: &OverlaySettings) -> Result<()>;
}
