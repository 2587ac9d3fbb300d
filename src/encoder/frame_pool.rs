use std::collections::VecDeque;
use std::sync::Mutex;

use ac_ffmpeg::codec::video::{PixelFormat, VideoFrame, VideoFrameMut};
use ac_ffmpeg::time::TimeBase;

/// Codec frames shared between the capture thread, which fills them, and
/// the encoder worker, which recycles them once pushed.
///
/// A recycled frame may still be referenced by the codec; `acquire` skips
/// such frames and allocates when none is free.
pub(crate) struct FramePool {
    free: Mutex<VecDeque<VideoFrame>>,
    capacity: usize,
    width: usize,
    height: usize,
    time_base: TimeBase,
    pixel_format: PixelFormat,
}

impl FramePool {
    pub fn new(
        width: usize,
        height: usize,
        time_base: TimeBase,
        pixel_format: PixelFormat,
        capacity: usize,
    ) -> Self {
        let free = (0..capacity)
            .map(|_| {
                VideoFrameMut::black(pixel_format, width, height)
                    .with_time_base(time_base)
                    .freeze()
            })
            .collect();

        Self {
            free: Mutex::new(free),
            capacity,
            width,
            height,
            time_base,
            pixel_format,
        }
    }

    /// Returns a frame to the pool. Frames beyond twice the capacity are
    /// released instead.
    pub fn recycle(&self, frame: VideoFrame) {
        let mut free = self.free.lock().unwrap_or_else(|e| e.into_inner());
        if free.len() < self.capacity * 2 {
            free.push_back(frame);
        }
    }

    /// A writable frame, reused when possible.
    pub fn acquire(&self) -> VideoFrameMut {
        {
            let mut free = self.free.lock().unwrap_or_else(|e| e.into_inner());
            for _ in 0..free.len() {
                let Some(frame) = free.pop_front() else {
                    break;
                };
                match frame.try_into_mut() {
                    Ok(frame) => return frame,
                    Err(busy) => free.push_back(busy),
                }
            }
        }

        VideoFrameMut::black(self.pixel_format, self.width, self.height).with_time_base(self.time_base)
    }

    #[cfg(test)]
    pub fn free_len(&self) -> usize {
        self.free.lock().unwrap().len()
    }
}
