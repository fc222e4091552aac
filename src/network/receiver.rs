//! Pull role: ingress task and client
//!
//! The ingress task is the only producer of the receive queue. It reads
//! frames until the connection fails, then closes the queue so the playback
//! side sees end of stream.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use crate::config::AppConfig;
use crate::error::{Error, NetworkError, Result};
use crate::network::keepalive::KeepAlive;
use crate::network::session::Session;
use crate::protocol::StreamHandshake;
use crate::queue::{create_shared_queue, SharedPacketQueue};

/// Reads frames from a session into a queue
pub struct IngressTask {
    session: Arc<Session>,
    queue: SharedPacketQueue,

    /// Whether the task is running
    running: Arc<AtomicBool>,

    thread_handle: Option<JoinHandle<()>>,

    /// Packets received
    packets_received: Arc<AtomicU64>,

    /// Payload bytes received
    bytes_received: Arc<AtomicU64>,
}

impl IngressTask {
    /// Start reading `session` into `queue`
    pub fn spawn(session: Arc<Session>, queue: SharedPacketQueue) -> std::result::Result<Self, NetworkError> {
        let running = Arc::new(AtomicBool::new(true));
        let packets_received = Arc::new(AtomicU64::new(0));
        let bytes_received = Arc::new(AtomicU64::new(0));

        let handle = {
            let session = session.clone();
            let queue = queue.clone();
            let running = running.clone();
            let packets_received = packets_received.clone();
            let bytes_received = bytes_received.clone();

            thread::Builder::new()
                .name(format!("ingress-{}", session.peer_addr()))
                .spawn(move || {
                    tracing::info!("Ingress started from {}", session.peer_addr());

                    while running.load(Ordering::Relaxed) {
                        let packet = match session.read_frame() {
                            Ok(packet) => packet,
                            Err(Error::Network(e)) if e.is_disconnect() => {
                                tracing::info!("Peer {} closed the stream", session.peer_addr());
                                break;
                            }
                            Err(e) => {
                                if session.is_active() {
                                    tracing::error!("Read from {} failed: {}", session.peer_addr(), e);
                                }
                                break;
                            }
                        };

                        packets_received.fetch_add(1, Ordering::Relaxed);
                        bytes_received.fetch_add(packet.size() as u64, Ordering::Relaxed);
                        tracing::debug!(
                            "Packet pts={} dts={} stream={} flags={} size={}",
                            packet.pts,
                            packet.dts,
                            packet.stream_index,
                            packet.flags,
                            packet.size()
                        );

                        if queue.push_blocking(packet).is_err() {
                            tracing::debug!("Receive queue closed, ingress exiting");
                            break;
                        }
                    }

                    session.mark_stopping();
                    queue.close();
                    running.store(false, Ordering::SeqCst);
                    tracing::info!("Ingress from {} stopped", session.peer_addr());
                })?
        };

        Ok(Self {
            session,
            queue,
            running,
            thread_handle: Some(handle),
            packets_received,
            bytes_received,
        })
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    pub fn packets_received(&self) -> u64 {
        self.packets_received.load(Ordering::Relaxed)
    }

    pub fn bytes_received(&self) -> u64 {
        self.bytes_received.load(Ordering::Relaxed)
    }

    /// Stop the task; shuts the socket down to unblock a pending read
    pub fn stop(&mut self) {
        self.running.store(false, Ordering::SeqCst);
        self.session.close();
        self.queue.close();

        if let Some(handle) = self.thread_handle.take() {
            let _ = handle.join();
        }
    }
}

impl Drop for IngressTask {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Connected pull client: handshake done, ingress and keep-alive running
pub struct PullClient {
    session: Arc<Session>,
    handshake: StreamHandshake,
    queue: SharedPacketQueue,
    ingress: IngressTask,
    keep_alive: Option<KeepAlive>,
}

impl PullClient {
    /// Connect to the relay named in `config` and subscribe to its stream
    pub fn connect(config: &AppConfig) -> Result<Self> {
        let network = &config.network;
        let session = Arc::new(Session::connect(&network.host, network.port, network)?);

        session.send_handshake(&StreamHandshake::pull(config.stream.stream_id.as_str()))?;
        let handshake = session.recv_handshake()?;
        let info = handshake.info();
        tracing::info!(
            "Subscribed to '{}': video_codec_id={} {}x{} @ {} fps, extradata={} bytes",
            handshake.stream_id,
            info.video_codec_id,
            info.width,
            info.height,
            info.fps,
            info.video_extradata.len()
        );

        let queue = create_shared_queue(config.stream.queue_capacity);
        let ingress = IngressTask::spawn(session.clone(), queue.clone())?;

        let keep_alive = match network.keep_alive_interval() {
            Some(interval) => Some(KeepAlive::spawn(session.clone(), interval)?),
            None => None,
        };

        Ok(Self {
            session,
            handshake,
            queue,
            ingress,
            keep_alive,
        })
    }

    /// Stream description received from the relay
    pub fn handshake(&self) -> &StreamHandshake {
        &self.handshake
    }

    /// Receive queue fed by the ingress task
    pub fn queue(&self) -> SharedPacketQueue {
        self.queue.clone()
    }

    pub fn session(&self) -> &Arc<Session> {
        &self.session
    }

    pub fn is_running(&self) -> bool {
        self.ingress.is_running()
    }

    /// Get statistics
    pub fn stats(&self) -> PullStats {
        PullStats {
            packets_received: self.ingress.packets_received(),
            bytes_received: self.ingress.bytes_received(),
            queue_len: self.queue.len(),
            queue_fill: self.queue.fill_level(),
            queue_underruns: self.queue.underrun_count(),
            keep_alive_sent: self.keep_alive.as_ref().map(|k| k.sent()).unwrap_or(0),
        }
    }

    /// Stop keep-alive and ingress, close the connection
    pub fn stop(&mut self) {
        if let Some(mut keep_alive) = self.keep_alive.take() {
            keep_alive.stop();
        }
        self.ingress.stop();
    }
}

impl Drop for PullClient {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Pull client statistics
#[derive(Debug, Clone)]
pub struct PullStats {
    pub packets_received: u64,
    pub bytes_received: u64,
    pub queue_len: usize,
    /// Receive queue fill level in `0.0..=1.0`
    pub queue_fill: f32,
    /// Polls of the receive queue that found it empty
    pub queue_underruns: usize,
    pub keep_alive_sent: u64,
}
