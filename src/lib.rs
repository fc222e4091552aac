//! # TCP Media Streamer
//!
//! Low-latency live video/audio transport over plain TCP: a push client
//! publishes a stream to a relay, pull clients subscribe to it by name.
//!
//! ## Architecture Overview
//!
//! ```text
//! ┌──────────────────────────────── PUSH CLIENT ────────────────────────────────┐
//! │  ┌──────────────┐   ┌──────────────┐   ┌──────────────┐   ┌──────────────┐  │
//! │  │   Capture    │──▶│ Capture queue│──▶│   Encoder    │──▶│  Data queue  │  │
//! │  │   thread     │   │  (8 frames)  │   │ (codec::*)   │   │ (1024 pkts)  │  │
//! │  └──────────────┘   └──────────────┘   └──────────────┘   └──────┬───────┘  │
//! │                                                                  ▼          │
//! │                              ┌────────────────────────────────────────────┐ │
//! │                              │ Egress task ──▶ Session (write lock) ──▶ TCP│ │
//! │                              └────────────────────────────────────────────┘ │
//! └─────────────────────────────────────────┬───────────────────────────────────┘
//!                                           │ [len|JSON handshake][28B hdr|payload]...
//!                                           ▼
//! ┌──────────────────────────────────── RELAY ──────────────────────────────────┐
//! │  accept ──▶ handshake ──▶ push handler ──▶ stream hub queue ──▶ publisher   │
//! │                       └─▶ pull handler ──▶ client registry ◀───────┘        │
//! │                                            (keyframe gate, writer per client)│
//! └─────────────────────────────────────────┬───────────────────────────────────┘
//!                                           │ frames ▼      ▲ 0x00 keep-alive
//! ┌──────────────────────────────── PULL CLIENT ────────────────────────────────┐
//! │  TCP ──▶ Ingress task ──▶ Receive queue ──▶ Playback loop                   │
//! │          Keep-alive task ─┘(write lock)     (decode ▶ pace ▶ present)       │
//! └─────────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Client roles run on OS threads; the relay runs on tokio.

pub mod capture;
pub mod codec;
pub mod config;
pub mod error;
pub mod network;
pub mod playback;
pub mod protocol;
pub mod queue;
#[cfg(feature = "relay")]
pub mod relay;

pub use error::{Error, Result};

/// Application-wide constants
pub mod constants {
    use std::time::Duration;

    /// Default TCP port of the relay
    pub const DEFAULT_PORT: u16 = 1935;

    /// Default stream name
    pub const DEFAULT_STREAM_ID: &str = "camera_stream";

    /// Largest accepted frame payload
    pub const MAX_PACKET_SIZE: usize = 100_000_000;

    /// Largest accepted handshake payload
    pub const MAX_HANDSHAKE_SIZE: usize = 1 << 20;

    /// Encoded packets buffered between codec and socket
    pub const DATA_QUEUE_CAPACITY: usize = 1024;

    /// Raw frames buffered between capture and encoder
    pub const CAPTURE_QUEUE_CAPACITY: usize = 8;

    /// Packets buffered per stream on the relay
    pub const RELAY_STREAM_QUEUE_CAPACITY: usize = 1024;

    /// Packets buffered per pull client on the relay
    pub const RELAY_CLIENT_QUEUE_CAPACITY: usize = 256;

    /// Interval between liveness probes
    pub const KEEP_ALIVE_INTERVAL: Duration = Duration::from_secs(5);

    /// Liveness probe byte
    pub const KEEP_ALIVE_BYTE: u8 = 0x00;

    pub const VIDEO_STREAM_INDEX: i32 = 0;
    pub const AUDIO_STREAM_INDEX: i32 = 1;

    /// Packet flag bit marking a keyframe
    pub const FLAG_KEYFRAME: i32 = 1;

    /// Frame rate assumed when the stream announces none
    pub const DEFAULT_FPS: u32 = 30;

    /// Idle wait of the playback loop (roughly one 60 Hz refresh)
    pub const RENDER_INTERVAL: Duration = Duration::from_micros(16_667);
}
