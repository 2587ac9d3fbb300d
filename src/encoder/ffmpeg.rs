use std::sync::Arc;
use std::thread::JoinHandle;

use ac_ffmpeg::codec::video::{self, VideoEncoder, VideoFrame, VideoFrameMut};
use ac_ffmpeg::codec::Encoder as _;
use ac_ffmpeg::time::{TimeBase, Timestamp};
use anyhow::{Result, anyhow, bail};
use arc_swap::ArcSwap;
use crossbeam_channel::{Receiver, Sender, TrySendError, bounded};
use log::{debug, info, warn};

use super::frame_pool::FramePool;
use super::{EncodedSink, Encoder};
use crate::capture::{FrameBuffer, SyncAccess};
use crate::params::{Codec, EncoderSettings, Parameters};
use crate::pipeline::types::{EncodedUnit, FrameFormat};

/// Frames waiting for the worker. A full queue drops the frame.
const QUEUE_DEPTH: usize = 4;

/// Timestamps travel in microseconds end to end.
const TIME_BASE: TimeBase = TimeBase::new(1, 1_000_000);

/// Candidate codecs, most preferred first.
///
/// - h264_v4l2m2m: the SoC encoder block, when the kernel exposes one
/// - libx264: CPU encoder with full rate control
/// - libopenh264: CPU fallback when x264 is not built in
const HARDWARE_CHAIN: &[&str] = &["h264_v4l2m2m", "libx264", "libopenh264"];
const SOFTWARE_CHAIN: &[&str] = &["libx264", "libopenh264"];

/// Options for `codec` derived from the encoder settings.
fn codec_options(codec: &str, settings: &EncoderSettings) -> Vec<(&'static str, String)> {
    let mut options = vec![
        ("b", settings.bitrate.to_string()),
        ("g", settings.idr_period.to_string()),
        ("bf", String::from("0")),
    ];
    match codec {
        "libx264" => {
            options.extend([
                ("preset", String::from("ultrafast")),
                ("tune", String::from("zerolatency")),
                ("profile", settings.profile.as_str().to_string()),
                ("level", settings.level.as_str().to_string()),
                ("maxrate", settings.bitrate.to_string()),
                ("bufsize", (settings.bitrate * 2).to_string()),
                ("forced-idr", String::from("1")),
                ("threads", String::from("0")),
                ("sliced-threads", String::from("1")),
            ]);
        }
        "libopenh264" => {
            options.extend([
                ("profile", settings.profile.as_str().to_string()),
                ("rc_mode", String::from("bitrate")),
            ]);
        }
        _ => {}
    }
    options
}

fn codec_chain(codec: Codec) -> &'static [&'static str] {
    match codec {
        Codec::Auto => HARDWARE_CHAIN,
        Codec::SoftwareH264 => SOFTWARE_CHAIN,
    }
}

/// Settings and codec of the context currently owned by the worker.
#[derive(Debug, Clone, PartialEq)]
struct ActiveCodec {
    settings: EncoderSettings,
    name: &'static str,
}

/// Codecs to try when reloading with `next`, or `None` when nothing changed.
///
/// The codec in use is kept while the requested chain still allows it, so a
/// reload never moves the stream to another implementation behind the
/// parent's back.
fn reload_chain(active: &ActiveCodec, next: &EncoderSettings) -> Option<Vec<&'static str>> {
    if active.settings == *next {
        return None;
    }
    let chain = codec_chain(next.codec);
    if chain.contains(&active.name) {
        Some(vec![active.name])
    } else {
        Some(chain.to_vec())
    }
}

/// The encoder is sized once; a different resolution needs a new process.
fn check_resolution(format: &FrameFormat, params: &Parameters) -> Result<()> {
    if params.camera.width != format.width || params.camera.height != format.height {
        bail!(
            "resolution change {}x{} -> {}x{} requires a restart",
            format.width,
            format.height,
            params.camera.width,
            params.camera.height
        );
    }
    Ok(())
}

/// Codec context handed between threads.
struct CodecContext {
    encoder: VideoEncoder,
    name: &'static str,
}

// SAFETY: a codec context is owned by exactly one thread at a time: built on
// the caller's thread, then moved to the worker which is its only user.
unsafe impl Send for CodecContext {}

enum Job {
    Frame(VideoFrame),
    Replace(CodecContext),
}

// SAFETY: see `CodecContext`; frames are reference counted by libav and only
// read by the codec after being frozen.
unsafe impl Send for Job {}

/// H.264 encoder on top of libavcodec.
///
/// Frames are copied into pooled codec frames on the submitting thread and
/// encoded on a dedicated worker, which delivers every packet to the sink.
pub struct FfmpegEncoder {
    format: FrameFormat,
    pool: Arc<FramePool>,
    submit: Option<Sender<Job>>,
    worker: Option<JoinHandle<()>>,
    active: ArcSwap<ActiveCodec>,
}

impl FfmpegEncoder {
    pub fn new(params: &Parameters, format: FrameFormat, sink: Arc<dyn EncodedSink>) -> Result<Self> {
        if format.width % 2 != 0 || format.height % 2 != 0 {
            bail!("frame size {}x{} must be even", format.width, format.height);
        }
        let context = build_context(codec_chain(params.encoder.codec), &params.encoder, &format)?;
        let active = ActiveCodec {
            settings: params.encoder.clone(),
            name: context.name,
        };
        info!("Using encoder: {}", active.name);

        let pool = Arc::new(FramePool::new(
            format.width as usize,
            format.height as usize,
            TIME_BASE,
            video::frame::get_pixel_format("yuv420p"),
            QUEUE_DEPTH,
        ));
        let (submit, jobs) = bounded(QUEUE_DEPTH);

        let worker_pool = Arc::clone(&pool);
        let worker = std::thread::Builder::new()
            .name(String::from("encoder"))
            .spawn(move || encode_loop(context, jobs, worker_pool, sink))
            .map_err(|e| anyhow!("failed to spawn encoder thread: {e}"))?;

        Ok(Self {
            format,
            pool,
            submit: Some(submit),
            worker: Some(worker),
            active: ArcSwap::from_pointee(active),
        })
    }

    fn copy_frame(&self, frame: &mut FrameBuffer<'_>, dst: &mut VideoFrameMut) -> Result<()> {
        let expected = self.format.frame_size();
        if frame.len() < expected {
            bail!("frame of {} bytes is smaller than the expected {}", frame.len(), expected);
        }

        let width = self.format.width as usize;
        let height = self.format.height as usize;
        let stride = self.format.stride as usize;
        let ranges = self.format.plane_ranges();

        let src = frame.begin_access(SyncAccess::Read);
        let mut planes = dst.planes_mut();
        for (i, range) in ranges.into_iter().enumerate() {
            let (rows, src_stride, copy_width) = if i == 0 {
                (height, stride, width)
            } else {
                (height / 2, stride / 2, width / 2)
            };
            let plane = planes[i].data_mut();
            let line_size = plane.len() / rows;
            copy_plane(&src[range], src_stride, plane, line_size, rows, copy_width);
        }
        if let Err(e) = src.finish() {
            warn!("frame sync end failed: {}", e);
        }
        Ok(())
    }
}

impl Encoder for FfmpegEncoder {
    fn encode(&self, frame: &mut FrameBuffer<'_>) -> Result<()> {
        let submit = self
            .submit
            .as_ref()
            .ok_or_else(|| anyhow!("encoder is shut down"))?;

        let mut codec_frame = self.pool.acquire();
        self.copy_frame(frame, &mut codec_frame)?;
        let codec_frame = codec_frame
            .with_pts(Timestamp::new(frame.timestamp() as i64, TIME_BASE))
            .freeze();

        match submit.try_send(Job::Frame(codec_frame)) {
            Ok(()) => Ok(()),
            Err(TrySendError::Full(_)) => bail!("encoder queue is full"),
            Err(TrySendError::Disconnected(_)) => bail!("encoder worker has stopped"),
        }
    }

    fn reload(&self, params: &Parameters) -> Result<()> {
        check_resolution(&self.format, params)?;
        let active = self.active.load_full();
        let Some(chain) = reload_chain(&active, &params.encoder) else {
            debug!("encoder settings unchanged, keeping {}", active.name);
            return Ok(());
        };

        let context = build_context(&chain, &params.encoder, &self.format)?;
        let next = ActiveCodec {
            settings: params.encoder.clone(),
            name: context.name,
        };
        let submit = self
            .submit
            .as_ref()
            .ok_or_else(|| anyhow!("encoder is shut down"))?;
        // blocking send: a reload must not be dropped like a frame
        submit
            .send(Job::Replace(context))
            .map_err(|_| anyhow!("encoder worker has stopped"))?;
        self.active.store(Arc::new(next));
        Ok(())
    }
}

impl Drop for FfmpegEncoder {
    fn drop(&mut self) {
        // closing the queue lets the worker drain and exit
        self.submit.take();
        if let Some(worker) = self.worker.take() {
            let _ = worker.join();
        }
    }
}

fn build_context(
    chain: &[&'static str],
    settings: &EncoderSettings,
    format: &FrameFormat,
) -> Result<CodecContext> {
    let pixel_format = video::frame::get_pixel_format("yuv420p");

    for &codec in chain {
        let mut builder = match VideoEncoder::builder(codec) {
            Ok(b) => b,
            Err(e) => {
                debug!("Encoder {} not available, skipping: {}", codec, e);
                continue;
            }
        };
        builder = builder
            .pixel_format(pixel_format)
            .width(format.width as usize)
            .height(format.height as usize)
            .time_base(TIME_BASE)
            .set_option("colorspace", format.color_space.ffmpeg_name())
            .set_option("color_range", "tv");
        for (k, v) in codec_options(codec, settings) {
            builder = builder.set_option(k, v);
        }
        match builder.build() {
            Ok(encoder) => return Ok(CodecContext { encoder, name: codec }),
            Err(e) => {
                debug!("Encoder {} failed to initialize: {}", codec, e);
            }
        }
    }
    bail!("no usable H.264 encoder among {:?}", chain)
}

fn encode_loop(
    mut context: CodecContext,
    jobs: Receiver<Job>,
    pool: Arc<FramePool>,
    sink: Arc<dyn EncodedSink>,
) {
    for job in jobs.iter() {
        match job {
            Job::Frame(frame) => {
                if let Err(e) = context.encoder.push(frame.clone()) {
                    warn!("{}: push failed: {}", context.name, e);
                }
                pool.recycle(frame);
                drain(&mut context, sink.as_ref());
            }
            Job::Replace(next) => {
                finish(&mut context, sink.as_ref());
                info!("encoder reconfigured: {} -> {}", context.name, next.name);
                context = next;
            }
        }
    }
    finish(&mut context, sink.as_ref());
    debug!("encoder worker exited");
}

fn finish(context: &mut CodecContext, sink: &dyn EncodedSink) {
    if let Err(e) = context.encoder.flush() {
        warn!("{}: flush failed: {}", context.name, e);
    }
    drain(context, sink);
}

fn drain(context: &mut CodecContext, sink: &dyn EncodedSink) {
    loop {
        match context.encoder.take() {
            Ok(Some(packet)) => {
                let pts = packet.pts();
                let timestamp = if pts.is_null() { 0 } else { pts.timestamp().max(0) as u64 };
                sink.on_encoded(EncodedUnit {
                    data: packet.data(),
                    timestamp,
                });
            }
            Ok(None) => break,
            Err(e) => {
                warn!("{}: take failed: {}", context.name, e);
                break;
            }
        }
    }
}

/// Copies `rows` rows of `copy_width` bytes between two strided planes.
///
/// Takes a single memcpy when both sides are tightly packed the same way.
fn copy_plane(
    source: &[u8],
    src_stride: usize,
    destination: &mut [u8],
    dst_stride: usize,
    rows: usize,
    copy_width: usize,
) {
    let copy_width = copy_width.min(src_stride).min(dst_stride);

    if src_stride == dst_stride {
        let total = (rows * src_stride).min(source.len()).min(destination.len());
        destination[..total].copy_from_slice(&source[..total]);
        return;
    }

    for r in 0..rows {
        let src_start = r * src_stride;
        let dst_start = r * dst_stride;
        if src_start + copy_width > source.len() || dst_start + copy_width > destination.len() {
            break;
        }
        destination[dst_start..dst_start + copy_width]
            .copy_from_slice(&source[src_start..src_start + copy_width]);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::params::{H264Level, H264Profile};

    fn settings() -> EncoderSettings {
        EncoderSettings {
            codec: Codec::SoftwareH264,
            idr_period: 30,
            bitrate: 2_000_000,
            profile: H264Profile::High,
            level: H264Level::L4_2,
        }
    }

    #[test]
    fn test_x264_options_follow_settings() {
        let options = codec_options("libx264", &settings());
        let get = |k: &str| options.iter().find(|(key, _)| *key == k).map(|(_, v)| v.as_str());
        assert_eq!(get("b"), Some("2000000"));
        assert_eq!(get("g"), Some("30"));
        assert_eq!(get("profile"), Some("high"));
        assert_eq!(get("level"), Some("4.2"));
        assert_eq!(get("bufsize"), Some("4000000"));
    }

    #[test]
    fn test_unknown_codec_gets_generic_options() {
        let options = codec_options("h264_v4l2m2m", &settings());
        assert_eq!(options.len(), 3);
    }

    fn active(name: &'static str) -> ActiveCodec {
        ActiveCodec {
            settings: settings(),
            name,
        }
    }

    fn format(width: u32, height: u32) -> FrameFormat {
        FrameFormat {
            width,
            height,
            stride: width,
            pixel_format: crate::pipeline::types::PixelFormat::Yuv420,
            color_space: crate::pipeline::types::ColorSpace::Smpte170m,
        }
    }

    #[test]
    fn test_unchanged_settings_skip_rebuild() {
        assert_eq!(reload_chain(&active("libx264"), &settings()), None);
    }

    #[test]
    fn test_rebuild_keeps_codec_in_use() {
        let mut next = settings();
        next.bitrate = 4_000_000;
        assert_eq!(reload_chain(&active("libopenh264"), &next), Some(vec!["libopenh264"]));

        let mut hardware = active("h264_v4l2m2m");
        hardware.settings.codec = Codec::Auto;
        let mut next = hardware.settings.clone();
        next.idr_period = 120;
        assert_eq!(reload_chain(&hardware, &next), Some(vec!["h264_v4l2m2m"]));
    }

    #[test]
    fn test_rebuild_leaves_hardware_when_software_is_requested() {
        let mut hardware = active("h264_v4l2m2m");
        hardware.settings.codec = Codec::Auto;
        assert_eq!(reload_chain(&hardware, &settings()), Some(SOFTWARE_CHAIN.to_vec()));
    }

    #[test]
    fn test_reload_rejects_resolution_change() {
        let mut params = Parameters::default();
        params.camera.width = 640;
        params.camera.height = 480;
        assert!(check_resolution(&format(640, 480), &params).is_ok());

        params.camera.height = 360;
        let err = check_resolution(&format(640, 480), &params).unwrap_err();
        assert!(err.to_string().contains("640x480 -> 640x360"));
    }

    #[test]
    fn test_copy_plane_strips_padding() {
        // 2 rows of 3 pixels in a stride of 4
        let source = [1, 2, 3, 0, 4, 5, 6, 0];
        let mut destination = [9u8; 6];
        copy_plane(&source, 4, &mut destination, 3, 2, 3);
        assert_eq!(destination, [1, 2, 3, 4, 5, 6]);
    }

    #[test]
    fn test_copy_plane_same_stride_is_one_copy() {
        let source = [1u8, 2, 3, 4, 5, 6];
        let mut destination = [0u8; 6];
        copy_plane(&source, 3, &mut destination, 3, 2, 3);
        assert_eq!(destination, source);
    }

    #[test]
    fn test_copy_plane_stops_at_short_source() {
        let source = [1u8, 2, 3, 0];
        let mut destination = [0u8; 6];
        copy_plane(&source, 4, &mut destination, 3, 2, 3);
        assert_eq!(destination, [1, 2, 3, 0, 0, 0]);
    }
}
