//! Parameter snapshots
//!
//! A [`Parameters`] value is an immutable description of camera, overlay and
//! encoder settings. It is built once from the body of a configuration
//! message and never mutated afterwards; reloading means replacing the whole
//! snapshot.
//!
//! # Wire format
//!
//! The body is a list of `Key:value` entries separated by single spaces.
//! Numbers are decimal, booleans are `0`/`1`, strings are base64 encoded so
//! they may contain spaces and colons. Unknown keys are ignored.

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use log::LevelFilter;
use thiserror::Error;

/// Largest accepted frame width or height, in pixels.
pub const MAX_DIMENSION: u32 = 8192;
/// Accepted frame rates, in frames per second.
pub const FPS_RANGE: std::ops::RangeInclusive<f64> = 1.0..=120.0;

#[derive(Debug, Error, PartialEq)]
pub enum ParamsError {
    #[error("parameters are not valid utf-8")]
    NotUtf8,
    #[error("malformed entry '{0}'")]
    MalformedEntry(String),
    #[error("invalid value for {key}: {reason}")]
    InvalidValue { key: &'static str, reason: String },
}

/// Camera-side settings, consumed by the frame source.
#[derive(Debug, Clone, PartialEq)]
pub struct CameraSettings {
    pub camera_id: u32,
    pub width: u32,
    pub height: u32,
    pub h_flip: bool,
    pub v_flip: bool,
    pub brightness: f64,
    pub contrast: f64,
    pub saturation: f64,
    pub sharpness: f64,
    pub exposure: String,
    pub awb: String,
    pub denoise: String,
    pub shutter: u32,
    pub gain: f64,
    pub ev: f64,
    pub fps: f64,
}

/// Text overlay settings. `text` is a strftime pattern.
#[derive(Debug, Clone, PartialEq)]
pub struct OverlaySettings {
    pub enabled: bool,
    pub text: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Codec {
    Auto,
    SoftwareH264,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum H264Profile {
    Baseline,
    Main,
    High,
}

impl H264Profile {
    pub fn as_str(self) -> &'static str {
        match self {
            H264Profile::Baseline => "baseline",
            H264Profile::Main => "main",
            H264Profile::High => "high",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum H264Level {
    L4_0,
    L4_1,
    L4_2,
}

impl H264Level {
    pub fn as_str(self) -> &'static str {
        match self {
            H264Level::L4_0 => "4.0",
            H264Level::L4_1 => "4.1",
            H264Level::L4_2 => "4.2",
        }
    }
}

/// Encoder-side settings, consumed by the encoder.
#[derive(Debug, Clone, PartialEq)]
pub struct EncoderSettings {
    pub codec: Codec,
    /// Distance between IDR frames, in frames.
    pub idr_period: u32,
    /// Target bitrate in bits per second.
    pub bitrate: u32,
    pub profile: H264Profile,
    pub level: H264Level,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Parameters {
    pub log_level: LevelFilter,
    pub camera: CameraSettings,
    pub overlay: OverlaySettings,
    pub encoder: EncoderSettings,
}

impl Default for Parameters {
    fn default() -> Self {
        Self {
            log_level: LevelFilter::Info,
            camera: CameraSettings {
                camera_id: 0,
                width: 1920,
                height: 1080,
                h_flip: false,
                v_flip: false,
                brightness: 0.0,
                contrast: 1.0,
                saturation: 1.0,
                sharpness: 1.0,
                exposure: String::from("normal"),
                awb: String::from("auto"),
                denoise: String::from("off"),
                shutter: 0,
                gain: 0.0,
                ev: 0.0,
                fps: 30.0,
            },
            overlay: OverlaySettings {
                enabled: false,
                text: String::from("%Y-%m-%d %H:%M:%S - MediaMTX"),
            },
            encoder: EncoderSettings {
                codec: Codec::Auto,
                idr_period: 60,
                bitrate: 1_000_000,
                profile: H264Profile::Main,
                level: H264Level::L4_1,
            },
        }
    }
}

impl Parameters {
    /// Parses and validates a serialized snapshot.
    pub fn unserialize(buf: &[u8]) -> Result<Self, ParamsError> {
        let text = std::str::from_utf8(buf).map_err(|_| ParamsError::NotUtf8)?;
        let mut params = Parameters::default();

        for entry in text.split(' ').filter(|e| !e.is_empty()) {
            let (key, value) = entry
                .split_once(':')
                .ok_or_else(|| ParamsError::MalformedEntry(entry.to_string()))?;
            params.apply_entry(key, value)?;
        }

        params.validate()?;
        Ok(params)
    }

    fn apply_entry(&mut self, key: &str, value: &str) -> Result<(), ParamsError> {
        let cam = &mut self.camera;
        match key {
            "LogLevel" => self.log_level = parse_log_level(&decode_string("LogLevel", value)?)?,
            "CameraID" => cam.camera_id = parse_number("CameraID", value)?,
            "Width" => cam.width = parse_number("Width", value)?,
            "Height" => cam.height = parse_number("Height", value)?,
            "HFlip" => cam.h_flip = parse_bool("HFlip", value)?,
            "VFlip" => cam.v_flip = parse_bool("VFlip", value)?,
            "Brightness" => cam.brightness = parse_number("Brightness", value)?,
            "Contrast" => cam.contrast = parse_number("Contrast", value)?,
            "Saturation" => cam.saturation = parse_number("Saturation", value)?,
            "Sharpness" => cam.sharpness = parse_number("Sharpness", value)?,
            "Exposure" => cam.exposure = decode_string("Exposure", value)?,
            "AWB" => cam.awb = decode_string("AWB", value)?,
            "Denoise" => cam.denoise = decode_string("Denoise", value)?,
            "Shutter" => cam.shutter = parse_number("Shutter", value)?,
            "Gain" => cam.gain = parse_number("Gain", value)?,
            "EV" => cam.ev = parse_number("EV", value)?,
            "FPS" => cam.fps = parse_number("FPS", value)?,
            "TextOverlayEnable" => self.overlay.enabled = parse_bool("TextOverlayEnable", value)?,
            "TextOverlay" => self.overlay.text = decode_string("TextOverlay", value)?,
            "Codec" => {
                self.encoder.codec = match decode_string("Codec", value)?.as_str() {
                    "auto" => Codec::Auto,
                    "softwareH264" => Codec::SoftwareH264,
                    other => return Err(invalid("Codec", format!("unsupported codec '{other}'"))),
                }
            }
            "IDRPeriod" => self.encoder.idr_period = parse_number("IDRPeriod", value)?,
            "Bitrate" => self.encoder.bitrate = parse_number("Bitrate", value)?,
            "SoftwareH264Profile" => {
                self.encoder.profile = match decode_string("SoftwareH264Profile", value)?.as_str() {
                    "baseline" => H264Profile::Baseline,
                    "main" => H264Profile::Main,
                    "high" => H264Profile::High,
                    other => {
                        return Err(invalid("SoftwareH264Profile", format!("unknown profile '{other}'")));
                    }
                }
            }
            "SoftwareH264Level" => {
                self.encoder.level = match decode_string("SoftwareH264Level", value)?.as_str() {
                    "4.0" => H264Level::L4_0,
                    "4.1" => H264Level::L4_1,
                    "4.2" => H264Level::L4_2,
                    other => {
                        return Err(invalid("SoftwareH264Level", format!("unknown level '{other}'")));
                    }
                }
            }
            _ => {}
        }
        Ok(())
    }

    fn validate(&self) -> Result<(), ParamsError> {
        let cam = &self.camera;
        check_dimension("Width", cam.width)?;
        check_dimension("Height", cam.height)?;
        if !FPS_RANGE.contains(&cam.fps) {
            return Err(invalid(
                "FPS",
                format!("{} is outside {}..={}", cam.fps, FPS_RANGE.start(), FPS_RANGE.end()),
            ));
        }
        if self.encoder.bitrate == 0 {
            return Err(invalid("Bitrate", String::from("must be greater than zero")));
        }
        if self.encoder.idr_period == 0 {
            return Err(invalid("IDRPeriod", String::from("must be greater than zero")));
        }
        Ok(())
    }
}

fn invalid(key: &'static str, reason: String) -> ParamsError {
    ParamsError::InvalidValue { key, reason }
}

fn check_dimension(key: &'static str, value: u32) -> Result<(), ParamsError> {
    if value == 0 || value % 2 != 0 {
        return Err(invalid(key, format!("{value} is not a positive even number")));
    }
    if value > MAX_DIMENSION {
        return Err(invalid(key, format!("{value} is larger than {MAX_DIMENSION}")));
    }
    Ok(())
}

fn parse_number<T: std::str::FromStr>(key: &'static str, value: &str) -> Result<T, ParamsError>
where
    T::Err: std::fmt::Display,
{
    value.parse().map_err(|e: T::Err| invalid(key, e.to_string()))
}

fn parse_bool(key: &'static str, value: &str) -> Result<bool, ParamsError> {
    match value {
        "1" => Ok(true),
        "0" => Ok(false),
        other => Err(invalid(key, format!("'{other}' is not 0 or 1"))),
    }
}

fn decode_string(key: &'static str, value: &str) -> Result<String, ParamsError> {
    let raw = STANDARD
        .decode(value)
        .map_err(|e| invalid(key, e.to_string()))?;
    String::from_utf8(raw).map_err(|_| invalid(key, String::from("not valid utf-8")))
}

fn parse_log_level(level: &str) -> Result<LevelFilter, ParamsError> {
    match level {
        "error" => Ok(LevelFilter::Error),
        "warn" => Ok(LevelFilter::Warn),
        "info" => Ok(LevelFilter::Info),
        "debug" => Ok(LevelFilter::Debug),
        other => Err(invalid("LogLevel", format!("unknown level '{other}'"))),
    }
}

/// Serializes a snapshot back into the wire format. Only used to build
/// configuration messages in tests.
#[cfg(test)]
pub(crate) fn serialize(p: &Parameters) -> Vec<u8> {
    let s = |v: &str| STANDARD.encode(v);
    let b = |v: bool| if v { "1" } else { "0" };
    let level = match p.log_level {
        LevelFilter::Error => "error",
        LevelFilter::Warn => "warn",
        LevelFilter::Debug | LevelFilter::Trace => "debug",
        _ => "info",
    };
    let codec = match p.encoder.codec {
        Codec::Auto => "auto",
        Codec::SoftwareH264 => "softwareH264",
    };
    let c = &p.camera;
    let entries = [
        format!("LogLevel:{}", s(level)),
        format!("CameraID:{}", c.camera_id),
        format!("Width:{}", c.width),
        format!("Height:{}", c.height),
        format!("HFlip:{}", b(c.h_flip)),
        format!("VFlip:{}", b(c.v_flip)),
        format!("Brightness:{}", c.brightness),
        format!("Contrast:{}", c.contrast),
        format!("Saturation:{}", c.saturation),
        format!("Sharpness:{}", c.sharpness),
        format!("Exposure:{}", s(&c.exposure)),
        format!("AWB:{}", s(&c.awb)),
        format!("Denoise:{}", s(&c.denoise)),
        format!("Shutter:{}", c.shutter),
        format!("Gain:{}", c.gain),
        format!("EV:{}", c.ev),
        format!("FPS:{}", c.fps),
        format!("TextOverlayEnable:{}", b(p.overlay.enabled)),
        format!("TextOverlay:{}", s(&p.overlay.text)),
        format!("Codec:{}", s(codec)),
        format!("IDRPeriod:{}", p.encoder.idr_period),
        format!("Bitrate:{}", p.encoder.bitrate),
        format!("SoftwareH264Profile:{}", s(p.encoder.profile.as_str())),
        format!("SoftwareH264Level:{}", s(p.encoder.level.as_str())),
    ];
    entries.join(" ").into_bytes()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_full_snapshot() {
        let mut expected = Parameters::default();
        expected.camera.width = 640;
        expected.camera.height = 480;
        expected.camera.fps = 15.0;
        expected.camera.h_flip = true;
        expected.overlay.enabled = true;
        expected.overlay.text = String::from("cam 1: %H:%M");
        expected.encoder.bitrate = 2_500_000;
        expected.encoder.profile = H264Profile::High;
        expected.log_level = LevelFilter::Debug;

        let parsed = Parameters::unserialize(&serialize(&expected)).unwrap();
        assert_eq!(parsed, expected);
    }

    #[test]
    fn test_unknown_keys_are_ignored() {
        let parsed = Parameters::unserialize(b"Width:320 Height:240 FutureKnob:7").unwrap();
        assert_eq!(parsed.camera.width, 320);
        assert_eq!(parsed.camera.height, 240);
    }

    #[test]
    fn test_empty_body_yields_defaults() {
        assert_eq!(Parameters::unserialize(b"").unwrap(), Parameters::default());
    }

    #[test]
    fn test_malformed_entry() {
        let err = Parameters::unserialize(b"Width640").unwrap_err();
        assert_eq!(err, ParamsError::MalformedEntry(String::from("Width640")));
    }

    #[test]
    fn test_invalid_values() {
        assert!(matches!(
            Parameters::unserialize(b"Width:abc"),
            Err(ParamsError::InvalidValue { key: "Width", .. })
        ));
        assert!(matches!(
            Parameters::unserialize(b"Width:641"),
            Err(ParamsError::InvalidValue { key: "Width", .. })
        ));
        assert!(matches!(
            Parameters::unserialize(b"HFlip:yes"),
            Err(ParamsError::InvalidValue { key: "HFlip", .. })
        ));
        assert!(matches!(
            Parameters::unserialize(b"FPS:0"),
            Err(ParamsError::InvalidValue { key: "FPS", .. })
        ));
        assert!(matches!(
            Parameters::unserialize(b"TextOverlay:***"),
            Err(ParamsError::InvalidValue { key: "TextOverlay", .. })
        ));
    }

    #[test]
    fn test_frame_rate_must_be_in_range() {
        for body in ["FPS:1e-300", "FPS:0.001", "FPS:NaN", "FPS:inf", "FPS:121"] {
            assert!(
                matches!(
                    Parameters::unserialize(body.as_bytes()),
                    Err(ParamsError::InvalidValue { key: "FPS", .. })
                ),
                "{body}"
            );
        }
        assert_eq!(Parameters::unserialize(b"FPS:1").unwrap().camera.fps, 1.0);
        assert_eq!(Parameters::unserialize(b"FPS:120").unwrap().camera.fps, 120.0);
    }

    #[test]
    fn test_dimensions_are_capped() {
        assert!(matches!(
            Parameters::unserialize(b"Width:4294967294 Height:2"),
            Err(ParamsError::InvalidValue { key: "Width", .. })
        ));
        assert!(matches!(
            Parameters::unserialize(b"Width:640 Height:60000"),
            Err(ParamsError::InvalidValue { key: "Height", .. })
        ));
        let max = Parameters::unserialize(b"Width:8192 Height:8192").unwrap();
        assert_eq!((max.camera.width, max.camera.height), (MAX_DIMENSION, MAX_DIMENSION));
    }

    #[test]
    fn test_not_utf8() {
        assert_eq!(
            Parameters::unserialize(&[0xff, 0xfe]).unwrap_err(),
            ParamsError::NotUtf8
        );
    }
}
