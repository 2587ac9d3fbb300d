//! Core types for the pipeline system

/// Pixel layout delivered by the frame source.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PixelFormat {
    /// Planar YUV 4:2:0: a `stride`-wide luma plane followed by two
    /// `stride / 2`-wide chroma planes.
    Yuv420,
}

/// Color space tag reported by the source and forwarded to the encoder.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColorSpace {
    Smpte170m,
    Rec709,
}

impl ColorSpace {
    /// libavcodec name of this color space.
    pub fn ffmpeg_name(self) -> &'static str {
        match self {
            ColorSpace::Smpte170m => "smpte170m",
            ColorSpace::Rec709 => "bt709",
        }
    }
}

/// Frame geometry as reported by a started frame source.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameFormat {
    pub width: u32,
    pub height: u32,
    /// Bytes per luma row, `>= width`.
    pub stride: u32,
    pub pixel_format: PixelFormat,
    pub color_space: ColorSpace,
}

impl FrameFormat {
    /// Total buffer size in bytes.
    pub fn frame_size(&self) -> usize {
        let luma = self.stride as usize * self.height as usize;
        luma + luma / 2
    }

    /// Byte ranges of the Y, U and V planes inside a frame buffer.
    pub fn plane_ranges(&self) -> [std::ops::Range<usize>; 3] {
        let luma = self.stride as usize * self.height as usize;
        let chroma = luma / 4;
        [0..luma, luma..luma + chroma, luma + chroma..luma + 2 * chroma]
    }
}

/// One encoded unit, borrowed from the encoder for the duration of a write.
#[derive(Debug, Clone, Copy)]
pub struct EncodedUnit<'a> {
    pub data: &'a [u8],
    /// Presentation timestamp in microseconds.
    pub timestamp: u64,
}
