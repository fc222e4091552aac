//! Stream handshake
//!
//! Every connection starts with exactly one handshake per direction:
//! a little-endian `u32` length followed by that many bytes of compact JSON.
//! Keys that are absent decode as zero / empty.

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use bytes::{Buf, BufMut};
use serde::{Deserialize, Serialize};

use crate::constants::MAX_HANDSHAKE_SIZE;
use crate::error::ProtocolError;

/// Role announced by a client
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StreamMode {
    Push,
    Pull,
}

impl std::fmt::Display for StreamMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StreamMode::Push => write!(f, "push"),
            StreamMode::Pull => write!(f, "pull"),
        }
    }
}

/// Metadata exchanged once at connection start
///
/// Field order is the serialization order. `mode` is absent on the relay's
/// reply to a pull client; the media description fields are only sent in
/// the push -> receiver direction.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreamHandshake {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mode: Option<StreamMode>,

    #[serde(default)]
    pub stream_id: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub video_codec_id: Option<i32>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub audio_codec_id: Option<i32>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fps: Option<i32>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub width: Option<i32>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub height: Option<i32>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sample_rate: Option<i32>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub channels: Option<i32>,

    #[serde(default, skip_serializing_if = "Vec::is_empty", with = "base64_blob")]
    pub video_extradata: Vec<u8>,

    #[serde(default, skip_serializing_if = "Vec::is_empty", with = "base64_blob")]
    pub audio_extradata: Vec<u8>,
}

/// Decoder/encoder configuration derived from a handshake
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StreamInfo {
    pub video_codec_id: i32,
    pub audio_codec_id: i32,
    pub fps: i32,
    pub width: i32,
    pub height: i32,
    pub sample_rate: i32,
    pub channels: i32,
    pub video_extradata: Vec<u8>,
    pub audio_extradata: Vec<u8>,
}

impl StreamHandshake {
    /// Handshake sent by a pull client
    pub fn pull(stream_id: impl Into<String>) -> Self {
        Self {
            mode: Some(StreamMode::Pull),
            stream_id: stream_id.into(),
            ..Default::default()
        }
    }

    /// Handshake sent by a push client, carrying the full stream description
    pub fn push(stream_id: impl Into<String>, info: &StreamInfo) -> Self {
        let mut handshake = Self::describe(stream_id, info);
        handshake.mode = Some(StreamMode::Push);
        handshake
    }

    /// Stream description without a mode, as the relay replies to pullers
    pub fn describe(stream_id: impl Into<String>, info: &StreamInfo) -> Self {
        Self {
            mode: None,
            stream_id: stream_id.into(),
            video_codec_id: Some(info.video_codec_id),
            audio_codec_id: Some(info.audio_codec_id),
            fps: Some(info.fps),
            width: Some(info.width),
            height: Some(info.height),
            sample_rate: Some(info.sample_rate),
            channels: Some(info.channels),
            video_extradata: info.video_extradata.clone(),
            audio_extradata: info.audio_extradata.clone(),
        }
    }

    /// Media description with absent keys defaulted to zero / empty
    pub fn info(&self) -> StreamInfo {
        StreamInfo {
            video_codec_id: self.video_codec_id.unwrap_or(0),
            audio_codec_id: self.audio_codec_id.unwrap_or(0),
            fps: self.fps.unwrap_or(0),
            width: self.width.unwrap_or(0),
            height: self.height.unwrap_or(0),
            sample_rate: self.sample_rate.unwrap_or(0),
            channels: self.channels.unwrap_or(0),
            video_extradata: self.video_extradata.clone(),
            audio_extradata: self.audio_extradata.clone(),
        }
    }

    /// Serialize the JSON payload (no length prefix)
    pub fn to_json(&self) -> Vec<u8> {
        // A struct of strings, integers and byte blobs cannot fail to serialize.
        serde_json::to_vec(self).unwrap_or_default()
    }

    /// Parse a JSON payload (no length prefix)
    pub fn from_json(payload: &[u8]) -> Result<Self, ProtocolError> {
        serde_json::from_slice(payload)
            .map_err(|e| ProtocolError::MalformedFrame(format!("handshake: {}", e)))
    }
}

/// Encode a handshake with its 4-byte little-endian length prefix
pub fn encode_handshake(handshake: &StreamHandshake) -> Vec<u8> {
    let payload = handshake.to_json();
    let mut buf = Vec::with_capacity(4 + payload.len());
    buf.put_u32_le(payload.len() as u32);
    buf.extend_from_slice(&payload);
    buf
}

/// Validate a handshake length prefix
pub fn handshake_length(prefix: [u8; 4]) -> Result<usize, ProtocolError> {
    let length = u32::from_le_bytes(prefix) as usize;
    if length > MAX_HANDSHAKE_SIZE {
        return Err(ProtocolError::MalformedFrame(format!(
            "handshake length {} exceeds {} bytes",
            length, MAX_HANDSHAKE_SIZE
        )));
    }
    Ok(length)
}

/// Decode a length-prefixed handshake
///
/// The buffer must hold exactly the prefix plus the declared payload.
pub fn decode_handshake(mut data: &[u8]) -> Result<StreamHandshake, ProtocolError> {
    if data.remaining() < 4 {
        return Err(ProtocolError::MalformedFrame(
            "handshake shorter than its length prefix".to_string(),
        ));
    }

    let length = handshake_length([data[0], data[1], data[2], data[3]])?;
    data.advance(4);

    if data.remaining() != length {
        return Err(ProtocolError::MalformedFrame(format!(
            "handshake declares {} bytes, {} available",
            length,
            data.remaining()
        )));
    }

    StreamHandshake::from_json(data)
}

mod base64_blob {
    use super::{Engine, STANDARD};
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(blob: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&STANDARD.encode(blob))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let encoded = String::deserialize(deserializer)?;
        if encoded.is_empty() {
            return Ok(Vec::new());
        }
        STANDARD.decode(encoded.as_bytes()).map_err(serde::de::Error::custom)
    }
}
