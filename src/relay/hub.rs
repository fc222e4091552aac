//! Stream hubs
//!
//! One hub per published stream. The push connection feeds the hub queue;
//! a publisher task fans each packet out to every subscribed pull client.
//! Nothing on the fan-out path waits on a slow client: per-client queues
//! drop on overflow.

use dashmap::DashMap;
use parking_lot::RwLock;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use uuid::Uuid;

use crate::protocol::{MediaPacket, StreamInfo};

struct ClientSlot {
    tx: mpsc::Sender<MediaPacket>,
    /// Video is withheld until the client's first keyframe
    found_keyframe: bool,
    dropped: u64,
}

/// Shared state of one stream
pub struct StreamHub {
    id: String,
    info: RwLock<StreamInfo>,
    queue_tx: mpsc::Sender<MediaPacket>,
    clients: DashMap<Uuid, ClientSlot>,
    client_queue_capacity: usize,
    publishing: AtomicBool,
    packets_in: AtomicU64,
    packets_dropped: AtomicU64,
    packets_out: AtomicU64,
}

impl StreamHub {
    /// Create a hub and spawn its publisher task
    ///
    /// Must be called from within a tokio runtime.
    pub fn spawn(id: impl Into<String>, queue_capacity: usize, client_queue_capacity: usize) -> Arc<Self> {
        let (queue_tx, queue_rx) = mpsc::channel(queue_capacity.max(1));
        let hub = Arc::new(Self {
            id: id.into(),
            info: RwLock::new(StreamInfo::default()),
            queue_tx,
            clients: DashMap::new(),
            client_queue_capacity: client_queue_capacity.max(1),
            publishing: AtomicBool::new(false),
            packets_in: AtomicU64::new(0),
            packets_dropped: AtomicU64::new(0),
            packets_out: AtomicU64::new(0),
        });

        tokio::spawn(publisher(hub.id.clone(), Arc::downgrade(&hub), queue_rx));
        hub
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn info(&self) -> StreamInfo {
        self.info.read().clone()
    }

    pub fn set_info(&self, info: StreamInfo) {
        *self.info.write() = info;
    }

    pub fn is_publishing(&self) -> bool {
        self.publishing.load(Ordering::SeqCst)
    }

    pub fn set_publishing(&self, publishing: bool) {
        self.publishing.store(publishing, Ordering::SeqCst);
    }

    /// Hand a packet to the publisher without waiting
    ///
    /// Returns false when the hub queue is full and the packet was dropped.
    pub fn enqueue(&self, packet: MediaPacket) -> bool {
        self.packets_in.fetch_add(1, Ordering::Relaxed);
        match self.queue_tx.try_send(packet) {
            Ok(()) => true,
            Err(TrySendError::Full(packet)) => {
                self.packets_dropped.fetch_add(1, Ordering::Relaxed);
                tracing::warn!("Dropping packet pts={} for stream {}, queue full", packet.pts, self.id);
                false
            }
            Err(TrySendError::Closed(_)) => {
                self.packets_dropped.fetch_add(1, Ordering::Relaxed);
                false
            }
        }
    }

    /// Register a pull client; packets arrive on the returned receiver
    pub fn subscribe(&self) -> (Uuid, mpsc::Receiver<MediaPacket>) {
        let (tx, rx) = mpsc::channel(self.client_queue_capacity);
        let id = Uuid::new_v4();
        self.clients.insert(
            id,
            ClientSlot {
                tx,
                found_keyframe: false,
                dropped: 0,
            },
        );
        tracing::info!("Client {} subscribed to {} ({} clients)", id, self.id, self.clients.len());
        (id, rx)
    }

    pub fn unsubscribe(&self, client: &Uuid) {
        if let Some((_, slot)) = self.clients.remove(client) {
            tracing::info!(
                "Client {} left {} ({} packets dropped for it)",
                client,
                self.id,
                slot.dropped
            );
        }
    }

    pub fn client_count(&self) -> usize {
        self.clients.len()
    }

    /// Deliver one packet to every client
    pub fn dispatch(&self, packet: &MediaPacket) {
        let mut gone = Vec::new();

        for mut entry in self.clients.iter_mut() {
            let slot = entry.value_mut();
            if packet.is_video() && !slot.found_keyframe {
                if !packet.is_keyframe() {
                    continue;
                }
                slot.found_keyframe = true;
            }

            match slot.tx.try_send(packet.clone()) {
                Ok(()) => {
                    self.packets_out.fetch_add(1, Ordering::Relaxed);
                }
                Err(TrySendError::Full(_)) => {
                    slot.dropped += 1;
                    tracing::debug!("Client {} of {} is behind, packet dropped", entry.key(), self.id);
                }
                Err(TrySendError::Closed(_)) => gone.push(*entry.key()),
            }
        }

        for client in gone {
            self.unsubscribe(&client);
        }
    }

    /// Get statistics
    pub fn stats(&self) -> HubStats {
        HubStats {
            packets_in: self.packets_in.load(Ordering::Relaxed),
            packets_dropped: self.packets_dropped.load(Ordering::Relaxed),
            packets_out: self.packets_out.load(Ordering::Relaxed),
            clients: self.clients.len(),
        }
    }
}

/// Holds the hub weakly; the queue closes once the last handle is dropped.
async fn publisher(id: String, hub: Weak<StreamHub>, mut queue_rx: mpsc::Receiver<MediaPacket>) {
    tracing::debug!("Publisher for {} started", id);
    while let Some(packet) = queue_rx.recv().await {
        let Some(hub) = hub.upgrade() else { break };
        hub.dispatch(&packet);
    }
    tracing::debug!("Publisher for {} stopped", id);
}

/// Hub statistics
#[derive(Debug, Clone)]
pub struct HubStats {
    pub packets_in: u64,
    pub packets_dropped: u64,
    pub packets_out: u64,
    pub clients: usize,
}

/// All streams known to the relay, by id
pub struct HubRegistry {
    streams: DashMap<String, Arc<StreamHub>>,
    stream_queue_capacity: usize,
    client_queue_capacity: usize,
}

impl HubRegistry {
    pub fn new(stream_queue_capacity: usize, client_queue_capacity: usize) -> Self {
        Self {
            streams: DashMap::new(),
            stream_queue_capacity,
            client_queue_capacity,
        }
    }

    /// Get or create the hub for a publisher and store its description
    ///
    /// A new publisher on an existing id replaces the description; subscribed
    /// clients stay attached.
    pub fn publish(&self, stream_id: &str, info: StreamInfo) -> Arc<StreamHub> {
        let hub = self
            .streams
            .entry(stream_id.to_string())
            .or_insert_with(|| StreamHub::spawn(stream_id, self.stream_queue_capacity, self.client_queue_capacity))
            .clone();
        hub.set_info(info);
        hub.set_publishing(true);
        hub
    }

    /// Drop the hub of `stream_id` once it has no publisher and no clients
    ///
    /// Returns true when the hub was removed.
    pub fn release(&self, stream_id: &str) -> bool {
        let removed = self
            .streams
            .remove_if(stream_id, |_, hub| !hub.is_publishing() && hub.client_count() == 0)
            .is_some();
        if removed {
            tracing::info!("Stream {} released", stream_id);
        }
        removed
    }

    /// Hub of a published stream that is still in use
    pub fn get(&self, stream_id: &str) -> Option<Arc<StreamHub>> {
        self.streams.get(stream_id).map(|hub| hub.clone())
    }

    pub fn stream_ids(&self) -> Vec<String> {
        self.streams.iter().map(|entry| entry.key().clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.streams.len()
    }

    pub fn is_empty(&self) -> bool {
        self.streams.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn video(pts: i64, keyframe: bool) -> MediaPacket {
        MediaPacket::video(pts, keyframe, vec![pts as u8 + 1; 4]).unwrap()
    }

    #[tokio::test]
    async fn test_keyframe_gating_per_client() {
        let hub = StreamHub::spawn("cam", 16, 16);
        let (_early, mut early_rx) = hub.subscribe();

        hub.dispatch(&video(1, false));
        hub.dispatch(&MediaPacket::audio(2, vec![1]).unwrap());
        hub.dispatch(&video(3, true));

        let (_late, mut late_rx) = hub.subscribe();
        hub.dispatch(&video(4, false));
        hub.dispatch(&video(5, true));
        hub.dispatch(&video(6, false));

        let mut early = Vec::new();
        while let Ok(packet) = early_rx.try_recv() {
            early.push(packet.pts);
        }
        let mut late = Vec::new();
        while let Ok(packet) = late_rx.try_recv() {
            late.push(packet.pts);
        }

        assert_eq!(early, vec![2, 3, 4, 5, 6]);
        assert_eq!(late, vec![5, 6]);
    }

    #[tokio::test]
    async fn test_slow_client_drops_without_blocking() {
        let hub = StreamHub::spawn("cam", 16, 2);
        let (_slow, mut slow_rx) = hub.subscribe();

        for pts in 0..5 {
            hub.dispatch(&video(pts, true));
        }

        assert_eq!(slow_rx.try_recv().unwrap().pts, 0);
        assert_eq!(slow_rx.try_recv().unwrap().pts, 1);
        assert!(slow_rx.try_recv().is_err());
        assert_eq!(hub.stats().packets_out, 2);
    }

    #[tokio::test]
    async fn test_closed_client_is_removed() {
        let hub = StreamHub::spawn("cam", 16, 4);
        let (_client, rx) = hub.subscribe();
        drop(rx);

        hub.dispatch(&video(0, true));
        assert_eq!(hub.client_count(), 0);
    }

    #[tokio::test]
    async fn test_full_hub_queue_drops() {
        let hub = StreamHub::spawn("cam", 1, 4);
        // The publisher task has not run yet on this single-threaded runtime.
        assert!(hub.enqueue(video(0, true)));
        assert!(!hub.enqueue(video(1, true)));
        assert_eq!(hub.stats().packets_dropped, 1);
    }

    #[tokio::test]
    async fn test_publisher_fans_out() {
        let registry = HubRegistry::new(16, 16);
        let hub = registry.publish("cam", StreamInfo { fps: 25, ..Default::default() });
        let (_a, mut a_rx) = hub.subscribe();
        let (_b, mut b_rx) = hub.subscribe();

        hub.enqueue(video(0, true));

        let a = tokio::time::timeout(Duration::from_secs(5), a_rx.recv()).await.unwrap().unwrap();
        let b = tokio::time::timeout(Duration::from_secs(5), b_rx.recv()).await.unwrap().unwrap();
        assert_eq!(a, b);
        assert_eq!(registry.get("cam").unwrap().info().fps, 25);
        assert!(registry.get("other").is_none());
        assert_eq!(registry.stream_ids(), vec!["cam".to_string()]);
    }

    #[tokio::test]
    async fn test_idle_hub_is_released() {
        let registry = HubRegistry::new(16, 16);
        let hub = registry.publish("cam", StreamInfo::default());
        let (client, _rx) = hub.subscribe();

        // Still publishing, then still watched.
        assert!(!registry.release("cam"));
        hub.set_publishing(false);
        assert!(!registry.release("cam"));
        assert_eq!(registry.len(), 1);

        hub.unsubscribe(&client);
        assert!(registry.release("cam"));
        assert!(registry.get("cam").is_none());
        assert!(registry.is_empty());

        // The publisher task does not keep the hub alive.
        let weak = Arc::downgrade(&hub);
        drop(hub);
        assert!(weak.upgrade().is_none());
        assert!(!registry.release("cam"));
    }
}
