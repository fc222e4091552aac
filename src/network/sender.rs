//! Push role: egress task and client
//!
//! The egress task drains the data queue onto the socket, one frame per
//! write unit.

use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crate::config::AppConfig;
use crate::error::{NetworkError, QueueError, Result};
use crate::network::keepalive::KeepAlive;
use crate::network::session::{Session, SessionState};
use crate::protocol::{MediaPacket, StreamHandshake};
use crate::queue::{create_shared_queue, PushError, SharedPacketQueue};

/// What the egress task does when a frame cannot be written
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WriteFailurePolicy {
    /// Close the session and the queue; the producer sees `Closed`
    #[default]
    Teardown,
    /// Drop the packet, warn and keep going
    DropAndContinue,
}

/// Writes queued packets to a session
pub struct EgressTask {
    session: Arc<Session>,
    queue: SharedPacketQueue,
    running: Arc<AtomicBool>,
    thread_handle: Option<JoinHandle<()>>,
    stats: Arc<EgressCounters>,
}

#[derive(Default)]
struct EgressCounters {
    packets_sent: AtomicU64,
    bytes_sent: AtomicU64,
    packets_dropped: AtomicU64,
}

impl EgressTask {
    pub fn spawn(
        session: Arc<Session>,
        queue: SharedPacketQueue,
        policy: WriteFailurePolicy,
    ) -> std::result::Result<Self, NetworkError> {
        let running = Arc::new(AtomicBool::new(true));
        let stats = Arc::new(EgressCounters::default());

        let handle = {
            let session = session.clone();
            let queue = queue.clone();
            let running = running.clone();
            let stats = stats.clone();

            thread::Builder::new()
                .name(format!("egress-{}", session.peer_addr()))
                .spawn(move || {
                    tracing::info!("Egress started to {} ({:?})", session.peer_addr(), policy);

                    while running.load(Ordering::Relaxed) {
                        let packet = match queue.pop_blocking() {
                            Ok(packet) => packet,
                            Err(_) => {
                                tracing::debug!("Data queue closed, egress exiting");
                                break;
                            }
                        };

                        match session.write_frame(&packet) {
                            Ok(()) => {
                                stats.packets_sent.fetch_add(1, Ordering::Relaxed);
                                stats.bytes_sent.fetch_add(packet.size() as u64, Ordering::Relaxed);
                                tracing::debug!(
                                    "Sent pts={} stream={} flags={} size={}",
                                    packet.pts,
                                    packet.stream_index,
                                    packet.flags,
                                    packet.size()
                                );
                            }
                            Err(e) => {
                                stats.packets_dropped.fetch_add(1, Ordering::Relaxed);
                                match policy {
                                    WriteFailurePolicy::Teardown => {
                                        if session.is_active() {
                                            tracing::error!(
                                                "Write to {} failed, closing session: {}",
                                                session.peer_addr(),
                                                e
                                            );
                                        }
                                        session.close();
                                        queue.close();
                                        break;
                                    }
                                    WriteFailurePolicy::DropAndContinue => {
                                        tracing::warn!("Dropped packet pts={}: {}", packet.pts, e);
                                        if session.state() == SessionState::Closed {
                                            break;
                                        }
                                    }
                                }
                            }
                        }
                    }

                    session.mark_stopping();
                    running.store(false, Ordering::SeqCst);
                    tracing::info!("Egress to {} stopped", session.peer_addr());
                })?
        };

        Ok(Self {
            session,
            queue,
            running,
            thread_handle: Some(handle),
            stats,
        })
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    pub fn packets_sent(&self) -> u64 {
        self.stats.packets_sent.load(Ordering::Relaxed)
    }

    pub fn bytes_sent(&self) -> u64 {
        self.stats.bytes_sent.load(Ordering::Relaxed)
    }

    pub fn packets_dropped(&self) -> u64 {
        self.stats.packets_dropped.load(Ordering::Relaxed)
    }

    /// Stop the task; pending packets are discarded
    pub fn stop(&mut self) {
        self.running.store(false, Ordering::SeqCst);
        self.queue.close();
        self.session.close();

        if let Some(handle) = self.thread_handle.take() {
            let _ = handle.join();
        }
    }
}

impl Drop for EgressTask {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Connected push client: handshake sent, egress running
pub struct PushClient {
    session: Arc<Session>,
    queue: SharedPacketQueue,
    egress: EgressTask,
    keep_alive: Option<KeepAlive>,
    packets_queued: AtomicU64,
}

impl PushClient {
    /// Connect to the relay named in `config` and announce `handshake`
    pub fn connect(config: &AppConfig, handshake: StreamHandshake) -> Result<Self> {
        let network = &config.network;
        let session = Arc::new(Session::connect(&network.host, network.port, network)?);

        session.send_handshake(&handshake)?;
        let info = handshake.info();
        tracing::info!(
            "Publishing '{}': video_codec_id={} {}x{} @ {} fps",
            handshake.stream_id,
            info.video_codec_id,
            info.width,
            info.height,
            info.fps
        );

        let queue = create_shared_queue(config.stream.queue_capacity);
        let egress = EgressTask::spawn(session.clone(), queue.clone(), config.push.write_failure_policy)?;

        let keep_alive = match network.keep_alive_interval() {
            Some(interval) if config.push.keep_alive => Some(KeepAlive::spawn(session.clone(), interval)?),
            _ => None,
        };

        Ok(Self {
            session,
            queue,
            egress,
            keep_alive,
            packets_queued: AtomicU64::new(0),
        })
    }

    /// Data queue drained by the egress task
    pub fn queue(&self) -> SharedPacketQueue {
        self.queue.clone()
    }

    pub fn session(&self) -> &Arc<Session> {
        &self.session
    }

    /// Enqueue a packet, waiting for room
    pub fn send(&self, packet: MediaPacket) -> std::result::Result<(), QueueError> {
        self.queue.push_blocking(packet).map_err(QueueError::from)?;
        self.packets_queued.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    /// Enqueue a packet without waiting
    pub fn try_send(&self, packet: MediaPacket) -> std::result::Result<(), PushError<MediaPacket>> {
        self.queue.try_push(packet)?;
        self.packets_queued.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    /// Wait until every queued packet has been written or dropped
    ///
    /// Returns false on timeout or when egress stopped first.
    pub fn flush(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        loop {
            let handled = self.egress.packets_sent() + self.egress.packets_dropped();
            if handled >= self.packets_queued.load(Ordering::Relaxed) {
                return true;
            }
            if !self.egress.is_running() || Instant::now() >= deadline {
                return false;
            }
            thread::sleep(Duration::from_millis(1));
        }
    }

    pub fn is_running(&self) -> bool {
        self.egress.is_running()
    }

    /// Get statistics
    pub fn stats(&self) -> PushStats {
        PushStats {
            packets_queued: self.packets_queued.load(Ordering::Relaxed),
            packets_sent: self.egress.packets_sent(),
            bytes_sent: self.egress.bytes_sent(),
            packets_dropped: self.egress.packets_dropped(),
            queue_len: self.queue.len(),
            queue_fill: self.queue.fill_level(),
            keep_alive_sent: self.keep_alive.as_ref().map(|k| k.sent()).unwrap_or(0),
        }
    }

    pub fn stop(&mut self) {
        if let Some(mut keep_alive) = self.keep_alive.take() {
            keep_alive.stop();
        }
        self.egress.stop();
    }
}

impl Drop for PushClient {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Push client statistics
#[derive(Debug, Clone)]
pub struct PushStats {
    pub packets_queued: u64,
    pub packets_sent: u64,
    pub bytes_sent: u64,
    pub packets_dropped: u64,
    pub queue_len: usize,
    /// Data queue fill level in `0.0..=1.0`
    pub queue_fill: f32,
    pub keep_alive_sent: u64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::NetworkConfig;
    use crate::constants::KEEP_ALIVE_BYTE;
    use crate::network::session::read_exact;
    use crate::protocol::{PacketHeader, StreamInfo, StreamMode};
    use crate::queue::PacketQueue;
    use std::net::{Shutdown, TcpListener, TcpStream};

    fn listener() -> (TcpListener, u16) {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        (listener, port)
    }

    fn test_config(port: u16) -> AppConfig {
        let mut config = AppConfig::default();
        config.network.host = "127.0.0.1".to_string();
        config.network.port = port;
        config
    }

    fn read_packet_after(first: u8, stream: &mut TcpStream) -> MediaPacket {
        let mut header = [0u8; PacketHeader::SIZE];
        header[0] = first;
        read_exact(stream, &mut header[1..]).unwrap();
        let header = PacketHeader::decode(&header).unwrap();

        let mut payload = vec![0u8; header.payload_len().unwrap()];
        read_exact(stream, &mut payload).unwrap();
        MediaPacket::from_header(header, payload.into()).unwrap()
    }

    #[test]
    fn test_egress_writes_in_order() {
        let (listener, port) = listener();
        let session = Arc::new(Session::connect("127.0.0.1", port, &NetworkConfig::default()).unwrap());
        let (accepted, _) = listener.accept().unwrap();
        let peer = Session::from_stream(accepted, &NetworkConfig::default()).unwrap();

        let queue = Arc::new(PacketQueue::new(8));
        let mut egress = EgressTask::spawn(session, queue.clone(), WriteFailurePolicy::Teardown).unwrap();

        for pts in 0..3 {
            queue.push_blocking(MediaPacket::video(pts, pts == 0, vec![1; 16]).unwrap()).unwrap();
        }
        for pts in 0..3 {
            assert_eq!(peer.read_frame().unwrap().pts, pts);
        }

        egress.stop();
        assert_eq!(egress.packets_sent(), 3);
        assert_eq!(egress.bytes_sent(), 48);
    }

    #[test]
    fn test_teardown_on_write_failure() {
        let (listener, port) = listener();
        let session = Arc::new(Session::connect("127.0.0.1", port, &NetworkConfig::default()).unwrap());
        let _accepted = listener.accept().unwrap();

        let queue = Arc::new(PacketQueue::new(8));
        let egress = EgressTask::spawn(session.clone(), queue.clone(), WriteFailurePolicy::Teardown).unwrap();

        // Writes after a local close fail with SessionClosed.
        session.close();
        queue.push_blocking(MediaPacket::video(0, true, vec![1; 4]).unwrap()).unwrap();

        let deadline = Instant::now() + Duration::from_secs(5);
        while egress.is_running() && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(5));
        }

        assert!(!egress.is_running());
        assert!(queue.is_closed());
        assert_eq!(egress.packets_dropped(), 1);
        assert!(matches!(
            queue.push_blocking(MediaPacket::video(1, false, vec![1]).unwrap()),
            Err(PushError::Closed(_))
        ));
    }

    #[test]
    fn test_drop_and_continue_keeps_queue_open() {
        let (listener, port) = listener();
        let session = Arc::new(Session::connect("127.0.0.1", port, &NetworkConfig::default()).unwrap());
        let _accepted = listener.accept().unwrap();

        let queue = Arc::new(PacketQueue::new(8));
        let egress = EgressTask::spawn(session.clone(), queue.clone(), WriteFailurePolicy::DropAndContinue).unwrap();

        // Writes fail but the session stays active.
        session.raw_stream().unwrap().shutdown(Shutdown::Write).unwrap();
        for pts in 0..2 {
            queue.push_blocking(MediaPacket::video(pts, true, vec![1; 4]).unwrap()).unwrap();
        }

        let deadline = Instant::now() + Duration::from_secs(5);
        while egress.packets_dropped() < 2 && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(5));
        }
        assert_eq!(egress.packets_dropped(), 2);
        assert_eq!(egress.packets_sent(), 0);
        assert!(egress.is_running());
        assert!(!queue.is_closed());

        // Once the session is closed the next failure ends the loop.
        session.close();
        queue.push_blocking(MediaPacket::video(2, false, vec![1; 4]).unwrap()).unwrap();
        while egress.is_running() && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(5));
        }

        assert!(!egress.is_running());
        assert_eq!(egress.packets_dropped(), 3);
        assert!(!queue.is_closed());
    }

    #[test]
    fn test_push_client_sends_handshake_first() {
        let (listener, port) = listener();
        let info = StreamInfo {
            video_codec_id: 13,
            fps: 30,
            width: 2,
            height: 2,
            ..Default::default()
        };

        let server = thread::spawn(move || {
            let (accepted, _) = listener.accept().unwrap();
            let session = Session::from_stream(accepted, &NetworkConfig::default()).unwrap();
            let handshake = session.recv_handshake().unwrap();
            let packet = session.read_frame().unwrap();
            (handshake, packet)
        });

        let mut client = PushClient::connect(&test_config(port), StreamHandshake::push("cam", &info)).unwrap();
        client.send(MediaPacket::video(5, true, vec![9; 6]).unwrap()).unwrap();
        assert!(client.flush(Duration::from_secs(5)));

        let (handshake, packet) = server.join().unwrap();
        assert_eq!(handshake.mode, Some(StreamMode::Push));
        assert_eq!(handshake.stream_id, "cam");
        assert_eq!(handshake.info(), info);
        assert_eq!(packet.pts, 5);

        client.stop();
        assert_eq!(client.stats().packets_sent, 1);
        assert!(matches!(
            client.send(MediaPacket::video(6, false, vec![1]).unwrap()),
            Err(QueueError::Closed)
        ));
    }

    #[test]
    fn test_keep_alive_never_splits_frames() {
        const PACKETS: i64 = 400;
        let (listener, port) = listener();

        let server = thread::spawn(move || {
            let (mut stream, _) = listener.accept().unwrap();

            let mut prefix = [0u8; 4];
            read_exact(&mut stream, &mut prefix).unwrap();
            let mut handshake = vec![0u8; u32::from_le_bytes(prefix) as usize];
            read_exact(&mut stream, &mut handshake).unwrap();

            let mut keep_alives = 0u64;
            let mut received = Vec::new();
            while received.len() < PACKETS as usize {
                let mut first = [0u8; 1];
                read_exact(&mut stream, &mut first).unwrap();
                if first[0] == KEEP_ALIVE_BYTE {
                    keep_alives += 1;
                    continue;
                }
                received.push(read_packet_after(first[0], &mut stream));
            }
            (received, keep_alives)
        });

        let mut config = test_config(port);
        config.push.keep_alive = true;
        config.network.keep_alive_interval_ms = 1;

        let client = PushClient::connect(&config, StreamHandshake::push("stress", &StreamInfo::default())).unwrap();
        for i in 0..PACKETS {
            // Low pts byte is never zero so a frame cannot be mistaken for a probe.
            let pts = (i << 8) | 1;
            let payload = vec![(i % 251) as u8 + 1; 512 + (i as usize % 7) * 1024];
            client.send(MediaPacket::video(pts, i % 30 == 0, payload).unwrap()).unwrap();
            if i % 50 == 0 {
                thread::sleep(Duration::from_millis(2));
            }
        }
        assert!(client.flush(Duration::from_secs(10)));

        let (received, keep_alives) = server.join().unwrap();
        assert_eq!(received.len(), PACKETS as usize);
        for (i, packet) in received.iter().enumerate() {
            let i = i as i64;
            assert_eq!(packet.pts, (i << 8) | 1);
            assert_eq!(packet.size(), 512 + (i as usize % 7) * 1024);
            assert!(packet.payload.iter().all(|&b| b == (i % 251) as u8 + 1));
        }
        assert!(keep_alives >= 1);
    }
}
