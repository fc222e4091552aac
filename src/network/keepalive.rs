//! Keep-alive task
//!
//! Writes a single zero byte on a fixed interval so the remote end keeps
//! the connection open while this side has nothing else to send.

use crossbeam_channel::{bounded, RecvTimeoutError, Sender};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crate::error::NetworkError;
use crate::network::session::Session;

/// Periodic liveness writer for one session
pub struct KeepAlive {
    /// Dropping the sender wakes the thread immediately
    stop_tx: Option<Sender<()>>,

    thread_handle: Option<JoinHandle<()>>,

    /// Probes written so far
    sent: Arc<AtomicU64>,
}

impl KeepAlive {
    /// Start writing probes on `session`, the first one immediately
    pub fn spawn(session: Arc<Session>, interval: Duration) -> Result<Self, NetworkError> {
        let (stop_tx, stop_rx) = bounded::<()>(0);
        let sent = Arc::new(AtomicU64::new(0));
        let sent_for_thread = sent.clone();

        let handle = thread::Builder::new()
            .name(format!("keep-alive-{}", session.peer_addr()))
            .spawn(move || {
                tracing::debug!("Keep-alive started for {}", session.peer_addr());

                while session.is_active() {
                    if let Err(e) = session.write_keep_alive() {
                        if session.is_active() {
                            tracing::warn!("Keep-alive write to {} failed: {}", session.peer_addr(), e);
                            // Dead connection: shutting the socket down ends ingress too.
                            session.close();
                        }
                        break;
                    }
                    sent_for_thread.fetch_add(1, Ordering::Relaxed);

                    match stop_rx.recv_timeout(interval) {
                        Err(RecvTimeoutError::Timeout) => continue,
                        _ => break,
                    }
                }

                tracing::debug!("Keep-alive stopped for {}", session.peer_addr());
            })?;

        Ok(Self {
            stop_tx: Some(stop_tx),
            thread_handle: Some(handle),
            sent,
        })
    }

    /// Number of probes written
    pub fn sent(&self) -> u64 {
        self.sent.load(Ordering::Relaxed)
    }

    pub fn is_running(&self) -> bool {
        self.thread_handle
            .as_ref()
            .map(|handle| !handle.is_finished())
            .unwrap_or(false)
    }

    /// Stop and join the thread
    pub fn stop(&mut self) {
        self.stop_tx.take();

        if let Some(handle) = self.thread_handle.take() {
            let _ = handle.join();
        }
    }
}

impl Drop for KeepAlive {
    fn drop(&mut self) {
        self.stop();
    }
}
