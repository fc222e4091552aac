//! Video encoder boundary
//!
//! Turns captured pictures into media packets for the push pipeline.

use bytes::Bytes;

use crate::codec::{CodecKind, VideoEncoderSettings, VideoFrame};
use crate::constants::VIDEO_STREAM_INDEX;
use crate::error::CodecError;
use crate::protocol::MediaPacket;

/// Encoder driven by the push pipeline
///
/// One call may yield zero or more packets (encoders are allowed to buffer).
pub trait VideoEncoder: Send {
    fn kind(&self) -> CodecKind;

    fn encode(&mut self, frame: &VideoFrame) -> Result<Vec<MediaPacket>, CodecError>;

    /// Out-of-band codec configuration carried in the handshake
    fn extradata(&self) -> Bytes {
        Bytes::new()
    }
}

/// Passthrough encoder: every I420 picture becomes one keyframe packet
pub struct RawVideoEncoder {
    width: u32,
    height: u32,
    /// Frames encoded
    frames_encoded: u64,
    /// Total bytes produced
    bytes_produced: u64,
}

impl RawVideoEncoder {
    pub fn new(width: u32, height: u32) -> Result<Self, CodecError> {
        if width == 0 || height == 0 || width % 2 != 0 || height % 2 != 0 {
            return Err(CodecError::EncoderInit(format!(
                "rawvideo needs even, non-zero dimensions, got {}x{}",
                width, height
            )));
        }
        Ok(Self {
            width,
            height,
            frames_encoded: 0,
            bytes_produced: 0,
        })
    }

    /// Get statistics
    pub fn stats(&self) -> EncoderStats {
        EncoderStats {
            frames_encoded: self.frames_encoded,
            bytes_produced: self.bytes_produced,
            average_frame_size: if self.frames_encoded > 0 {
                self.bytes_produced as f32 / self.frames_encoded as f32
            } else {
                0.0
            },
        }
    }
}

impl VideoEncoder for RawVideoEncoder {
    fn kind(&self) -> CodecKind {
        CodecKind::RawVideo
    }

    fn encode(&mut self, frame: &VideoFrame) -> Result<Vec<MediaPacket>, CodecError> {
        if frame.width != self.width || frame.height != self.height {
            return Err(CodecError::EncodingFailed(format!(
                "frame is {}x{}, encoder configured for {}x{}",
                frame.width, frame.height, self.width, self.height
            )));
        }

        let packet = MediaPacket::video(frame.pts, true, frame.data.clone())
            .map_err(|e| CodecError::EncodingFailed(e.to_string()))?;
        debug_assert_eq!(packet.stream_index, VIDEO_STREAM_INDEX);

        self.frames_encoded += 1;
        self.bytes_produced += packet.size() as u64;
        Ok(vec![packet])
    }
}

/// Encoder statistics
#[derive(Debug, Clone)]
pub struct EncoderStats {
    pub frames_encoded: u64,
    pub bytes_produced: u64,
    pub average_frame_size: f32,
}

/// Build an encoder for the configured codec
///
/// Only rawvideo is built in; compressed codecs need an external encoder
/// implementing [`VideoEncoder`].
pub fn create_encoder(
    settings: &VideoEncoderSettings,
    width: u32,
    height: u32,
) -> Result<Box<dyn VideoEncoder>, CodecError> {
    match settings {
        VideoEncoderSettings::RawVideo => Ok(Box::new(RawVideoEncoder::new(width, height)?)),
        other => Err(CodecError::Unsupported(format!(
            "{} requires an external encoder",
            other.kind()
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frame(pts: i64) -> VideoFrame {
        VideoFrame::new(4, 4, pts, Bytes::from(vec![7u8; 24])).unwrap()
    }

    #[test]
    fn test_raw_encoding() {
        let mut encoder = RawVideoEncoder::new(4, 4).unwrap();
        let packets = encoder.encode(&frame(3)).unwrap();

        assert_eq!(packets.len(), 1);
        assert!(packets[0].is_keyframe());
        assert!(packets[0].is_video());
        assert_eq!(packets[0].pts, 3);
        assert_eq!(packets[0].size(), 24);

        let stats = encoder.stats();
        assert_eq!(stats.frames_encoded, 1);
        assert_eq!(stats.bytes_produced, 24);
    }

    #[test]
    fn test_dimension_mismatch() {
        let mut encoder = RawVideoEncoder::new(8, 8).unwrap();
        assert!(encoder.encode(&frame(0)).is_err());
        assert!(RawVideoEncoder::new(5, 4).is_err());
    }

    #[test]
    fn test_compressed_codecs_need_external_encoder() {
        let settings = VideoEncoderSettings::h264_low_latency(30);
        assert!(matches!(
            create_encoder(&settings, 640, 480),
            Err(CodecError::Unsupported(_))
        ));
        assert!(create_encoder(&VideoEncoderSettings::RawVideo, 640, 480).is_ok());
    }
}
