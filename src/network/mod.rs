//! Network subsystem for TCP media transport

pub mod keepalive;
pub mod receiver;
pub mod sender;
pub mod session;

pub use keepalive::KeepAlive;
pub use receiver::{IngressTask, PullClient, PullStats};
pub use sender::{EgressTask, PushClient, PushStats, WriteFailurePolicy};
pub use session::{Session, SessionState};
