//! Media packet framing
//!
//! Frame layout (28-byte header, all fields little-endian):
//!
//! ```text
//! offset  size  field
//!      0     8  pts           i64
//!      8     8  dts           i64
//!     16     4  stream_index  i32
//!     20     4  flags         i32
//!     24     4  size          i32
//!     28  size  payload
//! ```
//!
//! There is no sync marker: a frame that fails to decode leaves the stream
//! unusable.

use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::constants::{AUDIO_STREAM_INDEX, FLAG_KEYFRAME, MAX_PACKET_SIZE, VIDEO_STREAM_INDEX};
use crate::error::ProtocolError;

/// Fixed-size frame header
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PacketHeader {
    pub pts: i64,
    pub dts: i64,
    pub stream_index: i32,
    pub flags: i32,
    pub size: i32,
}

impl PacketHeader {
    /// Header size in bytes
    pub const SIZE: usize = 28;

    /// Serialize the header
    pub fn encode(&self) -> [u8; Self::SIZE] {
        let mut bytes = [0u8; Self::SIZE];
        let mut buf = &mut bytes[..];
        buf.put_i64_le(self.pts);
        buf.put_i64_le(self.dts);
        buf.put_i32_le(self.stream_index);
        buf.put_i32_le(self.flags);
        buf.put_i32_le(self.size);
        bytes
    }

    /// Parse and validate a header
    ///
    /// Fails with `InvalidFrameSize` when the declared payload size is
    /// outside `1..=MAX_PACKET_SIZE`.
    pub fn decode(mut data: &[u8]) -> Result<Self, ProtocolError> {
        if data.remaining() < Self::SIZE {
            return Err(ProtocolError::MalformedFrame(format!(
                "frame header needs {} bytes, got {}",
                Self::SIZE,
                data.remaining()
            )));
        }

        let header = Self {
            pts: data.get_i64_le(),
            dts: data.get_i64_le(),
            stream_index: data.get_i32_le(),
            flags: data.get_i32_le(),
            size: data.get_i32_le(),
        };
        header.payload_len()?;
        Ok(header)
    }

    /// Declared payload length, checked against the sanity ceiling
    pub fn payload_len(&self) -> Result<usize, ProtocolError> {
        if self.size <= 0 || self.size as usize > MAX_PACKET_SIZE {
            return Err(ProtocolError::InvalidFrameSize(self.size as i64));
        }
        Ok(self.size as usize)
    }

    pub fn is_keyframe(&self) -> bool {
        self.flags & FLAG_KEYFRAME != 0
    }
}

/// One encoded access unit with its timing metadata
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MediaPacket {
    /// Presentation timestamp in codec time-base units
    pub pts: i64,
    /// Decode timestamp
    pub dts: i64,
    /// 0 = video, 1 = audio
    pub stream_index: i32,
    /// Bit 0 marks a keyframe
    pub flags: i32,
    /// Raw encoded bytes
    pub payload: Bytes,
}

impl MediaPacket {
    /// Create a packet, rejecting empty or oversized payloads
    pub fn new(
        pts: i64,
        dts: i64,
        stream_index: i32,
        flags: i32,
        payload: impl Into<Bytes>,
    ) -> Result<Self, ProtocolError> {
        let payload = payload.into();
        validate_payload_len(payload.len())?;
        Ok(Self {
            pts,
            dts,
            stream_index,
            flags,
            payload,
        })
    }

    /// Gather several NAL units into a single access unit
    pub fn from_parts(
        pts: i64,
        dts: i64,
        stream_index: i32,
        flags: i32,
        parts: &[&[u8]],
    ) -> Result<Self, ProtocolError> {
        let total: usize = parts.iter().map(|p| p.len()).sum();
        validate_payload_len(total)?;

        let mut payload = BytesMut::with_capacity(total);
        for part in parts {
            payload.extend_from_slice(part);
        }
        Self::new(pts, dts, stream_index, flags, payload.freeze())
    }

    /// Video packet convenience constructor
    pub fn video(pts: i64, keyframe: bool, payload: impl Into<Bytes>) -> Result<Self, ProtocolError> {
        let flags = if keyframe { FLAG_KEYFRAME } else { 0 };
        Self::new(pts, pts, VIDEO_STREAM_INDEX, flags, payload)
    }

    /// Audio packet convenience constructor
    pub fn audio(pts: i64, payload: impl Into<Bytes>) -> Result<Self, ProtocolError> {
        Self::new(pts, pts, AUDIO_STREAM_INDEX, 0, payload)
    }

    /// Payload size in bytes
    pub fn size(&self) -> usize {
        self.payload.len()
    }

    pub fn is_keyframe(&self) -> bool {
        self.flags & FLAG_KEYFRAME != 0
    }

    pub fn is_video(&self) -> bool {
        self.stream_index == VIDEO_STREAM_INDEX
    }

    pub fn is_audio(&self) -> bool {
        self.stream_index == AUDIO_STREAM_INDEX
    }

    /// Header describing this packet
    pub fn header(&self) -> PacketHeader {
        PacketHeader {
            pts: self.pts,
            dts: self.dts,
            stream_index: self.stream_index,
            flags: self.flags,
            size: self.payload.len() as i32,
        }
    }

    /// Rebuild a packet from a decoded header and its payload
    pub fn from_header(header: PacketHeader, payload: Bytes) -> Result<Self, ProtocolError> {
        let expected = header.payload_len()?;
        if payload.len() != expected {
            return Err(ProtocolError::MalformedFrame(format!(
                "header declares {} payload bytes, got {}",
                expected,
                payload.len()
            )));
        }
        Ok(Self {
            pts: header.pts,
            dts: header.dts,
            stream_index: header.stream_index,
            flags: header.flags,
            payload,
        })
    }
}

fn validate_payload_len(len: usize) -> Result<(), ProtocolError> {
    if len == 0 || len > MAX_PACKET_SIZE {
        return Err(ProtocolError::InvalidFrameSize(len as i64));
    }
    Ok(())
}

/// Encode a full frame (header followed by payload)
pub fn encode_frame(packet: &MediaPacket) -> Bytes {
    let mut buf = BytesMut::with_capacity(PacketHeader::SIZE + packet.size());
    buf.put_slice(&packet.header().encode());
    buf.put_slice(&packet.payload);
    buf.freeze()
}

/// Decode a full frame from a buffer
///
/// Consumes exactly one frame from `data` on success.
pub fn decode_frame(data: &mut impl Buf) -> Result<MediaPacket, ProtocolError> {
    if data.remaining() < PacketHeader::SIZE {
        return Err(ProtocolError::MalformedFrame(format!(
            "frame header needs {} bytes, got {}",
            PacketHeader::SIZE,
            data.remaining()
        )));
    }

    let mut header_bytes = [0u8; PacketHeader::SIZE];
    data.copy_to_slice(&mut header_bytes);
    let header = PacketHeader::decode(&header_bytes)?;
    let len = header.payload_len()?;

    if data.remaining() < len {
        return Err(ProtocolError::MalformedFrame(format!(
            "payload needs {} bytes, got {}",
            len,
            data.remaining()
        )));
    }

    let payload = data.copy_to_bytes(len);
    MediaPacket::from_header(header, payload)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_keyframe_frame_layout() {
        let packet = MediaPacket::new(1000, 1000, 0, 1, vec![0xAA, 0xBB, 0xCC, 0xDD]).unwrap();
        let frame = encode_frame(&packet);

        assert_eq!(frame.len(), 32);
        assert_eq!(&frame[0..8], &1000i64.to_le_bytes());
        assert_eq!(&frame[24..28], &[4, 0, 0, 0]);

        let decoded = decode_frame(&mut frame.clone()).unwrap();
        assert_eq!(decoded.flags & 1, 1);
        assert!(decoded.is_keyframe());
        assert_eq!(&decoded.payload[..], &[0xAA, 0xBB, 0xCC, 0xDD]);
    }

    #[test]
    fn test_size_boundaries() {
        let mut header = PacketHeader {
            pts: 0,
            dts: 0,
            stream_index: 0,
            flags: 0,
            size: 0,
        };
        assert_eq!(
            PacketHeader::decode(&header.encode()),
            Err(ProtocolError::InvalidFrameSize(0))
        );

        header.size = 100_000_001;
        assert_eq!(
            PacketHeader::decode(&header.encode()),
            Err(ProtocolError::InvalidFrameSize(100_000_001))
        );

        header.size = -5;
        assert!(PacketHeader::decode(&header.encode()).is_err());

        header.size = 100_000_000;
        assert_eq!(PacketHeader::decode(&header.encode()).unwrap().size, 100_000_000);
    }

    #[test]
    fn test_short_header_is_malformed() {
        let result = PacketHeader::decode(&[0u8; 27]);
        assert!(matches!(result, Err(ProtocolError::MalformedFrame(_))));
    }

    #[test]
    fn test_truncated_payload_is_malformed() {
        let packet = MediaPacket::video(7, false, vec![1, 2, 3, 4, 5]).unwrap();
        let frame = encode_frame(&packet);
        let mut truncated = frame.slice(..frame.len() - 1);
        assert!(matches!(
            decode_frame(&mut truncated),
            Err(ProtocolError::MalformedFrame(_))
        ));
    }

    #[test]
    fn test_empty_payload_rejected() {
        assert_eq!(
            MediaPacket::audio(0, Vec::<u8>::new()),
            Err(ProtocolError::InvalidFrameSize(0))
        );
    }

    #[test]
    fn test_from_parts_gathers_nal_units() {
        let sps: &[u8] = &[0, 0, 0, 1, 0x67, 0x42];
        let pps: &[u8] = &[0, 0, 0, 1, 0x68, 0xce];
        let idr: &[u8] = &[0, 0, 0, 1, 0x65, 0x88, 0x84];

        let packet = MediaPacket::from_parts(3, 3, 0, 1, &[sps, pps, idr]).unwrap();
        assert_eq!(packet.size(), 19);
        assert_eq!(packet.header().size, 19);
        assert_eq!(&packet.payload[12..], idr);
    }

    #[test]
    fn test_consecutive_frames() {
        let first = MediaPacket::video(1, true, vec![9; 10]).unwrap();
        let second = MediaPacket::audio(2, vec![8; 3]).unwrap();

        let mut buf = BytesMut::new();
        buf.extend_from_slice(&encode_frame(&first));
        buf.extend_from_slice(&encode_frame(&second));
        let mut buf = buf.freeze();

        assert_eq!(decode_frame(&mut buf).unwrap(), first);
        assert_eq!(decode_frame(&mut buf).unwrap(), second);
        assert!(!buf.has_remaining());
    }

    proptest! {
        #[test]
        fn prop_header_round_trip(
            pts in any::<i64>(),
            dts in any::<i64>(),
            stream_index in any::<i32>(),
            flags in any::<i32>(),
            size in 1i32..=100_000_000,
        ) {
            let header = PacketHeader { pts, dts, stream_index, flags, size };
            let decoded = PacketHeader::decode(&header.encode()).unwrap();
            prop_assert_eq!(decoded, header);
        }
    }
}
