//! Codec boundary
//!
//! Real encoders and decoders live outside this crate. This module names the
//! codecs (FFmpeg codec-ID namespace, as carried in the handshake), describes
//! per-codec encoder settings, and defines the traits the push and pull
//! pipelines drive. A raw-video passthrough codec is provided so both roles
//! run end-to-end without an external library.

pub mod decoder;
pub mod encoder;
pub mod nal;

pub use decoder::{create_decoder, RawVideoDecoder, VideoDecoder};
pub use encoder::{create_encoder, RawVideoEncoder, VideoEncoder};

use bytes::Bytes;
use serde::{Deserialize, Serialize};

use crate::error::CodecError;

/// Codec identifiers understood on the wire
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CodecKind {
    RawVideo,
    H264,
    Hevc,
    Av1,
    Aac,
    Opus,
    Unknown(i32),
}

impl CodecKind {
    /// Map a handshake codec id
    pub fn from_id(id: i32) -> Self {
        match id {
            13 => CodecKind::RawVideo,
            27 => CodecKind::H264,
            173 => CodecKind::Hevc,
            226 => CodecKind::Av1,
            86018 => CodecKind::Aac,
            86076 => CodecKind::Opus,
            other => CodecKind::Unknown(other),
        }
    }

    /// Handshake codec id
    pub fn id(&self) -> i32 {
        match self {
            CodecKind::RawVideo => 13,
            CodecKind::H264 => 27,
            CodecKind::Hevc => 173,
            CodecKind::Av1 => 226,
            CodecKind::Aac => 86018,
            CodecKind::Opus => 86076,
            CodecKind::Unknown(id) => *id,
        }
    }

    pub fn is_video(&self) -> bool {
        matches!(
            self,
            CodecKind::RawVideo | CodecKind::H264 | CodecKind::Hevc | CodecKind::Av1
        )
    }

    /// File extension for a recorded elementary stream
    pub fn file_extension(&self) -> &'static str {
        match self {
            CodecKind::H264 => "h264",
            CodecKind::Hevc => "hevc",
            CodecKind::Av1 => "obu",
            CodecKind::RawVideo => "yuv",
            CodecKind::Aac => "aac",
            CodecKind::Opus => "opus",
            CodecKind::Unknown(_) => "bin",
        }
    }
}

impl std::fmt::Display for CodecKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CodecKind::RawVideo => write!(f, "rawvideo"),
            CodecKind::H264 => write!(f, "h264"),
            CodecKind::Hevc => write!(f, "hevc"),
            CodecKind::Av1 => write!(f, "av1"),
            CodecKind::Aac => write!(f, "aac"),
            CodecKind::Opus => write!(f, "opus"),
            CodecKind::Unknown(id) => write!(f, "codec#{}", id),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum H264Profile {
    Baseline,
    Main,
    High,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HevcProfile {
    Main,
    Main10,
}

/// Encoder settings; each codec carries only the fields it uses
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(tag = "codec", rename_all = "lowercase")]
pub enum VideoEncoderSettings {
    H264 {
        profile: H264Profile,
        preset: String,
        tune: String,
        bitrate_kbps: u32,
        keyframe_interval: u32,
    },
    Hevc {
        profile: HevcProfile,
        preset: String,
        bitrate_kbps: u32,
        keyframe_interval: u32,
    },
    Av1 {
        speed: u8,
        bitrate_kbps: u32,
        keyframe_interval: u32,
    },
    #[default]
    RawVideo,
}

impl VideoEncoderSettings {
    /// Low-latency H.264 defaults
    pub fn h264_low_latency(fps: u32) -> Self {
        VideoEncoderSettings::H264 {
            profile: H264Profile::High,
            preset: "ultrafast".to_string(),
            tune: "zerolatency".to_string(),
            bitrate_kbps: 1000,
            keyframe_interval: fps,
        }
    }

    pub fn kind(&self) -> CodecKind {
        match self {
            VideoEncoderSettings::H264 { .. } => CodecKind::H264,
            VideoEncoderSettings::Hevc { .. } => CodecKind::Hevc,
            VideoEncoderSettings::Av1 { .. } => CodecKind::Av1,
            VideoEncoderSettings::RawVideo => CodecKind::RawVideo,
        }
    }

    /// Frames between forced keyframes; every raw frame is a keyframe
    pub fn keyframe_interval(&self) -> u32 {
        match self {
            VideoEncoderSettings::H264 { keyframe_interval, .. }
            | VideoEncoderSettings::Hevc { keyframe_interval, .. }
            | VideoEncoderSettings::Av1 { keyframe_interval, .. } => *keyframe_interval,
            VideoEncoderSettings::RawVideo => 1,
        }
    }
}

/// Planar I420 picture
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VideoFrame {
    pub width: u32,
    pub height: u32,
    /// Presentation timestamp in stream time-base units
    pub pts: i64,
    /// Y plane followed by the U and V planes, tightly packed
    pub data: Bytes,
}

impl VideoFrame {
    /// Bytes needed for an I420 picture of the given size
    pub fn i420_size(width: u32, height: u32) -> usize {
        let luma = width as usize * height as usize;
        let chroma = (width as usize / 2) * (height as usize / 2);
        luma + 2 * chroma
    }

    pub fn new(width: u32, height: u32, pts: i64, data: Bytes) -> Result<Self, CodecError> {
        if width == 0 || height == 0 || width % 2 != 0 || height % 2 != 0 {
            return Err(CodecError::InvalidDimensions { width, height });
        }
        if data.len() != Self::i420_size(width, height) {
            return Err(CodecError::DecodingFailed(format!(
                "{}x{} I420 needs {} bytes, got {}",
                width,
                height,
                Self::i420_size(width, height),
                data.len()
            )));
        }
        Ok(Self {
            width,
            height,
            pts,
            data,
        })
    }

    pub fn luma(&self) -> &[u8] {
        let luma = self.width as usize * self.height as usize;
        &self.data[..luma]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_codec_id_mapping() {
        for kind in [
            CodecKind::RawVideo,
            CodecKind::H264,
            CodecKind::Hevc,
            CodecKind::Av1,
            CodecKind::Aac,
            CodecKind::Opus,
        ] {
            assert_eq!(CodecKind::from_id(kind.id()), kind);
        }
        assert_eq!(CodecKind::from_id(99999), CodecKind::Unknown(99999));
        assert!(CodecKind::H264.is_video());
        assert!(!CodecKind::Aac.is_video());
    }

    #[test]
    fn test_encoder_settings_toml() {
        let settings = VideoEncoderSettings::h264_low_latency(30);
        let text = toml::to_string(&settings).unwrap();
        assert!(text.contains("codec = \"h264\""));

        let parsed: VideoEncoderSettings =
            toml::from_str("codec = \"av1\"\nspeed = 8\nbitrate_kbps = 800\nkeyframe_interval = 60\n").unwrap();
        assert_eq!(parsed.kind(), CodecKind::Av1);
        assert_eq!(parsed.keyframe_interval(), 60);
    }

    #[test]
    fn test_video_frame_size_check() {
        assert_eq!(VideoFrame::i420_size(4, 2), 12);
        assert!(VideoFrame::new(4, 2, 0, Bytes::from(vec![0u8; 12])).is_ok());
        assert!(VideoFrame::new(4, 2, 0, Bytes::from(vec![0u8; 11])).is_err());
        assert!(VideoFrame::new(3, 2, 0, Bytes::from(vec![0u8; 9])).is_err());
    }
}
