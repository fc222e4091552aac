//! Relay server
//!
//! Fans a pushed stream out to any number of pull clients. Runs on tokio,
//! one task per connection, one publisher per stream and one writer per
//! pull client.

pub mod hub;
pub mod recorder;
pub mod server;

pub use hub::{HubRegistry, HubStats, StreamHub};
pub use recorder::Recorder;
pub use server::{read_frame, read_handshake, write_frame, write_handshake, RelayServer};
