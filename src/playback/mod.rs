//! Pull-side playback: pacing, presentation and the tick loop

pub mod pacing;
pub mod player;
pub mod render;

pub use pacing::{effective_delay, frame_period, Framerate, PacingController, PacingMode, PacingThresholds};
pub use player::{Pacer, PlaybackLoop, PlaybackStats, ThreadSleeper, TickOutcome, TickPhase};
pub use render::{FrameRenderer, LogRenderer};
