//! Application configuration
//!
//! Loaded from a TOML file; every section and key is optional and falls back
//! to the defaults below. Command line arguments override the file.

use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::capture::Pattern;
use crate::codec::VideoEncoderSettings;
use crate::constants::{
    CAPTURE_QUEUE_CAPACITY, DATA_QUEUE_CAPACITY, DEFAULT_FPS, DEFAULT_PORT, DEFAULT_STREAM_ID,
    KEEP_ALIVE_INTERVAL, RELAY_CLIENT_QUEUE_CAPACITY, RELAY_STREAM_QUEUE_CAPACITY, RENDER_INTERVAL,
};
use crate::error::{Error, Result};
use crate::network::WriteFailurePolicy;
use crate::playback::PacingThresholds;

const CONFIG_FILE_NAME: &str = "config.toml";

/// Top-level application configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub network: NetworkConfig,
    pub stream: StreamConfig,
    pub playback: PlaybackConfig,
    pub push: PushConfig,
    pub relay: RelayConfig,
}

/// Connection settings shared by both client roles
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NetworkConfig {
    /// Relay host name or address
    pub host: String,
    pub port: u16,
    /// 0 disables the timeout
    pub connect_timeout_ms: u64,
    pub tcp_nodelay: bool,
    pub send_buffer_size: Option<usize>,
    pub recv_buffer_size: Option<usize>,
    /// 0 disables keep-alive
    pub keep_alive_interval_ms: u64,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: DEFAULT_PORT,
            connect_timeout_ms: 5_000,
            tcp_nodelay: true,
            send_buffer_size: None,
            recv_buffer_size: None,
            keep_alive_interval_ms: KEEP_ALIVE_INTERVAL.as_millis() as u64,
        }
    }
}

impl NetworkConfig {
    pub fn connect_timeout(&self) -> Option<Duration> {
        (self.connect_timeout_ms > 0).then(|| Duration::from_millis(self.connect_timeout_ms))
    }

    pub fn keep_alive_interval(&self) -> Option<Duration> {
        (self.keep_alive_interval_ms > 0).then(|| Duration::from_millis(self.keep_alive_interval_ms))
    }
}

/// Stream selection and buffering
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StreamConfig {
    pub stream_id: String,
    /// Capacity of the data queue between codec and socket
    pub queue_capacity: usize,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            stream_id: DEFAULT_STREAM_ID.to_string(),
            queue_capacity: DATA_QUEUE_CAPACITY,
        }
    }
}

/// Pull-side playback
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PlaybackConfig {
    /// Wait between idle ticks
    pub render_interval_us: u64,
    pub thresholds: PacingThresholds,
}

impl Default for PlaybackConfig {
    fn default() -> Self {
        Self {
            render_interval_us: RENDER_INTERVAL.as_micros() as u64,
            thresholds: PacingThresholds::default(),
        }
    }
}

impl PlaybackConfig {
    pub fn render_interval(&self) -> Duration {
        Duration::from_micros(self.render_interval_us)
    }
}

/// Push-side capture and encoding
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PushConfig {
    pub pattern: Pattern,
    pub width: u32,
    pub height: u32,
    pub fps: u32,
    /// Seed for randomized patterns
    pub seed: u64,
    pub capture_queue_capacity: usize,
    /// Send keep-alive probes alongside frames
    pub keep_alive: bool,
    pub write_failure_policy: WriteFailurePolicy,
    pub encoder: VideoEncoderSettings,
}

impl Default for PushConfig {
    fn default() -> Self {
        Self {
            pattern: Pattern::Checker,
            width: 640,
            height: 480,
            fps: DEFAULT_FPS,
            seed: 0,
            capture_queue_capacity: CAPTURE_QUEUE_CAPACITY,
            keep_alive: false,
            write_failure_policy: WriteFailurePolicy::default(),
            encoder: VideoEncoderSettings::default(),
        }
    }
}

/// Relay server
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RelayConfig {
    pub listen_addr: String,
    /// Packets buffered per stream before the publisher
    pub stream_queue_capacity: usize,
    /// Packets buffered per pull client
    pub client_queue_capacity: usize,
    /// Directory for recorded video; recording is off when unset
    pub record_dir: Option<PathBuf>,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            listen_addr: format!("0.0.0.0:{}", DEFAULT_PORT),
            stream_queue_capacity: RELAY_STREAM_QUEUE_CAPACITY,
            client_queue_capacity: RELAY_CLIENT_QUEUE_CAPACITY,
            record_dir: None,
        }
    }
}

impl AppConfig {
    /// Load configuration from a TOML file
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let contents = fs::read_to_string(path)?;
        let config: AppConfig = toml::from_str(&contents)
            .map_err(|e| Error::Config(format!("{}: {}", path.display(), e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Load from the platform config directory, or defaults if absent
    pub fn load_or_default() -> Result<Self> {
        match Self::default_path() {
            Some(path) if path.exists() => {
                tracing::info!("Loading configuration from {}", path.display());
                Self::load(path)
            }
            _ => Ok(Self::default()),
        }
    }

    /// Save configuration to a TOML file
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let path = path.as_ref();
        let contents = toml::to_string_pretty(self).map_err(|e| Error::Config(e.to_string()))?;
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(path, contents)?;
        Ok(())
    }

    /// `<config dir>/tcp-media-streamer/config.toml`
    pub fn default_path() -> Option<PathBuf> {
        ProjectDirs::from("", "", "tcp-media-streamer").map(|dirs| dirs.config_dir().join(CONFIG_FILE_NAME))
    }

    /// Apply the `[host] [stream_id]` positional arguments
    pub fn apply_args<I, S>(&mut self, args: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut args = args.into_iter();
        if let Some(host) = args.next() {
            self.network.host = host.into();
        }
        if let Some(stream_id) = args.next() {
            self.stream.stream_id = stream_id.into();
        }
    }

    /// Check values that would otherwise fail deep inside a task
    pub fn validate(&self) -> Result<()> {
        if self.network.host.is_empty() {
            return Err(Error::Config("network.host is empty".to_string()));
        }
        if self.stream.stream_id.is_empty() {
            return Err(Error::Config("stream.stream_id is empty".to_string()));
        }
        if self.stream.queue_capacity == 0 || self.push.capture_queue_capacity == 0 {
            return Err(Error::Config("queue capacities must be at least 1".to_string()));
        }
        if self.relay.stream_queue_capacity == 0 || self.relay.client_queue_capacity == 0 {
            return Err(Error::Config("relay queue capacities must be at least 1".to_string()));
        }
        if self.push.width == 0 || self.push.height == 0 || self.push.width % 2 != 0 || self.push.height % 2 != 0 {
            return Err(Error::Config(format!(
                "push resolution {}x{} must be non-zero and even",
                self.push.width, self.push.height
            )));
        }
        self.playback.thresholds.validate().map_err(Error::Config)?;
        Ok(())
    }
}
