//! Video decoder boundary
//!
//! The playback loop feeds packets in and presents whatever pictures come out.

use crate::codec::{CodecKind, VideoFrame};
use crate::error::CodecError;
use crate::protocol::{MediaPacket, StreamInfo};

/// Decoder driven by the playback loop
pub trait VideoDecoder: Send {
    fn kind(&self) -> CodecKind;

    /// Decode one packet; may yield zero or more pictures
    fn decode(&mut self, packet: &MediaPacket) -> Result<Vec<VideoFrame>, CodecError>;
}

/// Passthrough decoder for rawvideo I420 streams
pub struct RawVideoDecoder {
    width: u32,
    height: u32,
    /// Frames decoded
    frames_decoded: u64,
    /// Packets rejected
    frames_rejected: u64,
}

impl RawVideoDecoder {
    pub fn new(width: u32, height: u32) -> Result<Self, CodecError> {
        if width == 0 || height == 0 || width % 2 != 0 || height % 2 != 0 {
            return Err(CodecError::InvalidDimensions { width, height });
        }
        Ok(Self {
            width,
            height,
            frames_decoded: 0,
            frames_rejected: 0,
        })
    }

    /// Get statistics
    pub fn stats(&self) -> DecoderStats {
        DecoderStats {
            frames_decoded: self.frames_decoded,
            frames_rejected: self.frames_rejected,
        }
    }
}

impl VideoDecoder for RawVideoDecoder {
    fn kind(&self) -> CodecKind {
        CodecKind::RawVideo
    }

    fn decode(&mut self, packet: &MediaPacket) -> Result<Vec<VideoFrame>, CodecError> {
        match VideoFrame::new(self.width, self.height, packet.pts, packet.payload.clone()) {
            Ok(frame) => {
                self.frames_decoded += 1;
                Ok(vec![frame])
            }
            Err(e) => {
                self.frames_rejected += 1;
                Err(e)
            }
        }
    }
}

/// Decoder statistics
#[derive(Debug, Clone)]
pub struct DecoderStats {
    pub frames_decoded: u64,
    pub frames_rejected: u64,
}

/// Build a decoder from a received stream description
pub fn create_decoder(info: &StreamInfo) -> Result<Box<dyn VideoDecoder>, CodecError> {
    match CodecKind::from_id(info.video_codec_id) {
        CodecKind::RawVideo => {
            let width = u32::try_from(info.width).unwrap_or(0);
            let height = u32::try_from(info.height).unwrap_or(0);
            Ok(Box::new(RawVideoDecoder::new(width, height)?))
        }
        other => Err(CodecError::Unsupported(format!(
            "{} requires an external decoder",
            other
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_raw_decoding() {
        let mut decoder = RawVideoDecoder::new(2, 2).unwrap();
        let packet = MediaPacket::video(42, true, vec![1, 2, 3, 4, 5, 6]).unwrap();

        let frames = decoder.decode(&packet).unwrap();
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].pts, 42);
        assert_eq!(frames[0].luma(), &[1, 2, 3, 4]);
        assert_eq!(decoder.stats().frames_decoded, 1);
    }

    #[test]
    fn test_wrong_payload_size() {
        let mut decoder = RawVideoDecoder::new(2, 2).unwrap();
        let packet = MediaPacket::video(0, true, vec![0; 5]).unwrap();

        assert!(decoder.decode(&packet).is_err());
        assert_eq!(decoder.stats().frames_rejected, 1);
    }

    #[test]
    fn test_decoder_from_stream_info() {
        let mut info = StreamInfo {
            video_codec_id: CodecKind::RawVideo.id(),
            width: 320,
            height: 240,
            ..Default::default()
        };
        assert!(create_decoder(&info).is_ok());

        info.video_codec_id = CodecKind::H264.id();
        assert!(matches!(create_decoder(&info), Err(CodecError::Unsupported(_))));

        info.video_codec_id = CodecKind::RawVideo.id();
        info.width = 0;
        assert!(create_decoder(&info).is_err());
    }
}
