use anyhow::{Result, bail};
use chrono::format::{Item, StrftimeItems};
use chrono::{DateTime, Local, TimeZone};

use super::Overlay;
use super::font::{GLYPH_HEIGHT, GLYPH_WIDTH, glyph};
use crate::params::{OverlaySettings, Parameters};
use crate::pipeline::types::FrameFormat;

/// Distance of the text box from the top-left corner, in pixels.
const MARGIN: usize = 8;

const TEXT_LUMA: u8 = 235;
const BOX_LUMA: u8 = 16;

/// Timestamped text drawn on the luma plane, top-left.
///
/// The text is a strftime pattern expanded against local time on every
/// frame.
pub struct TextOverlay {
    format: FrameFormat,
    scale: usize,
}

impl TextOverlay {
    pub fn new(params: &Parameters, format: FrameFormat) -> Result<Self> {
        let min_w = 2 * MARGIN + GLYPH_WIDTH;
        let min_h = 2 * MARGIN + GLYPH_HEIGHT;
        if (format.width as usize) < min_w || (format.height as usize) < min_h {
            bail!("frame {}x{} is too small for a text overlay", format.width, format.height);
        }
        if format.stride < format.width {
            bail!("stride {} is smaller than width {}", format.stride, format.width);
        }
        if params.overlay.enabled {
            parse_pattern(&params.overlay.text)?;
        }

        Ok(Self {
            format,
            scale: (format.height as usize / 360).max(1),
        })
    }

    fn render(&self, frame: &mut [u8], text: &str) {
        let width = self.format.width as usize;
        let height = self.format.height as usize;
        let stride = self.format.stride as usize;
        let scale = self.scale;
        let cell_w = (GLYPH_WIDTH + 1) * scale;
        let chars = text.chars().count();

        let box_w = (2 * scale + chars * cell_w).min(width - MARGIN);
        let box_h = ((GLYPH_HEIGHT + 2) * scale).min(height - MARGIN);
        for y in MARGIN..MARGIN + box_h {
            frame[y * stride + MARGIN..y * stride + MARGIN + box_w].fill(BOX_LUMA);
        }

        let x_end = MARGIN + box_w;
        let y_end = MARGIN + box_h;
        for (i, c) in text.chars().enumerate() {
            let gx = MARGIN + scale + i * cell_w;
            if gx >= x_end {
                break;
            }
            for (col, bits) in glyph(c).iter().enumerate() {
                for row in 0..GLYPH_HEIGHT {
                    if bits >> row & 1 == 0 {
                        continue;
                    }
                    let px = gx + col * scale;
                    let py = MARGIN + scale + row * scale;
                    for y in py..(py + scale).min(y_end) {
                        let start = y * stride + px.min(x_end);
                        let end = y * stride + (px + scale).min(x_end);
                        frame[start..end].fill(TEXT_LUMA);
                    }
                }
            }
        }
    }
}

impl Overlay for TextOverlay {
    fn draw(&self, frame: &mut [u8], settings: &OverlaySettings) -> Result<()> {
        if !settings.enabled {
            return Ok(());
        }
        if frame.len() < self.format.frame_size() {
            bail!(
                "frame of {} bytes is smaller than the expected {}",
                frame.len(),
                self.format.frame_size()
            );
        }
        let text = expand(&settings.text, &Local::now())?;
        self.render(frame, &text);
        Ok(())
    }
}

fn parse_pattern(pattern: &str) -> Result<Vec<Item<'_>>> {
    let items: Vec<Item<'_>> = StrftimeItems::new(pattern).collect();
    if items.iter().any(|item| matches!(item, Item::Error)) {
        bail!("invalid overlay text pattern '{pattern}'");
    }
    Ok(items)
}

fn expand<Tz: TimeZone>(pattern: &str, now: &DateTime<Tz>) -> Result<String>
where
    Tz::Offset: std::fmt::Display,
{
    let items = parse_pattern(pattern)?;
    Ok(now.format_with_items(items.iter()).to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::types::{ColorSpace, PixelFormat};
    use chrono::Utc;

    fn format() -> FrameFormat {
        FrameFormat {
            width: 320,
            height: 240,
            stride: 384,
            pixel_format: PixelFormat::Yuv420,
            color_space: ColorSpace::Smpte170m,
        }
    }

    fn settings(text: &str) -> OverlaySettings {
        OverlaySettings {
            enabled: true,
            text: String::from(text),
        }
    }

    #[test]
    fn test_expand_pattern() {
        let at = Utc.with_ymd_and_hms(2024, 3, 9, 14, 5, 0).unwrap();
        assert_eq!(expand("%Y-%m-%d %H:%M - cam", &at).unwrap(), "2024-03-09 14:05 - cam");
        assert!(expand("%Q", &at).is_err());
    }

    #[test]
    fn test_disabled_overlay_leaves_frame_untouched() {
        let overlay = TextOverlay::new(&Parameters::default(), format()).unwrap();
        let mut frame = vec![100u8; format().frame_size()];
        let mut off = settings("HELLO");
        off.enabled = false;
        overlay.draw(&mut frame, &off).unwrap();
        assert!(frame.iter().all(|&b| b == 100));
    }

    #[test]
    fn test_draws_box_and_glyphs() {
        let overlay = TextOverlay::new(&Parameters::default(), format()).unwrap();
        let mut frame = vec![100u8; format().frame_size()];
        overlay.draw(&mut frame, &settings("H")).unwrap();

        let stride = 384;
        // top-left corner of the box
        assert_eq!(frame[MARGIN * stride + MARGIN], BOX_LUMA);
        // first column of 'H' is fully lit
        let col_x = MARGIN + 1;
        for row in 0..GLYPH_HEIGHT {
            assert_eq!(frame[(MARGIN + 1 + row) * stride + col_x], TEXT_LUMA);
        }
        // outside the box nothing changed
        assert_eq!(frame[0], 100);
        assert_eq!(frame[100 * stride + 200], 100);
        // chroma untouched
        let [_, u, _] = format().plane_ranges();
        assert!(frame[u].iter().all(|&b| b == 100));
    }

    #[test]
    fn test_long_text_is_clipped() {
        let overlay = TextOverlay::new(&Parameters::default(), format()).unwrap();
        let mut frame = vec![100u8; format().frame_size()];
        overlay.draw(&mut frame, &settings(&"W".repeat(200))).unwrap();
        let stride = 384;
        // padding beyond the visible width stays untouched
        assert_eq!(frame[(MARGIN + 2) * stride + 330], 100);
    }

    #[test]
    fn test_invalid_pattern_is_a_draw_error() {
        let overlay = TextOverlay::new(&Parameters::default(), format()).unwrap();
        let mut frame = vec![100u8; format().frame_size()];
        assert!(overlay.draw(&mut frame, &settings("%Q")).is_err());
    }

    #[test]
    fn test_short_buffer_is_rejected() {
        let overlay = TextOverlay::new(&Parameters::default(), format()).unwrap();
        let mut frame = vec![0u8; 10];
        assert!(overlay.draw(&mut frame, &settings("x")).is_err());
    }

    #[test]
    fn test_creation_rejects_invalid_initial_pattern() {
        let mut params = Parameters::default();
        params.overlay = settings("%Q");
        assert!(TextOverlay::new(&params, format()).is_err());
    }
}
