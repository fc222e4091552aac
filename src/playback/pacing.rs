//! Adaptive playback pacing
//!
//! The pull side paces presentation at the stream's nominal frame period and
//! speeds up when packets pile up in the receive queue, so latency drains
//! back down after a network hiccup. Two thresholds with hysteresis per mode
//! keep the speed from flapping on every frame.

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::constants::DEFAULT_FPS;

/// Queue depths at which the fast modes switch on and off
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PacingThresholds {
    pub fast_on: usize,
    pub fast_off: usize,
    pub super_fast_on: usize,
    pub super_fast_off: usize,
}

impl Default for PacingThresholds {
    fn default() -> Self {
        Self {
            fast_on: 2,
            fast_off: 1,
            super_fast_on: 4,
            super_fast_off: 3,
        }
    }
}

impl PacingThresholds {
    /// Each "off" threshold must sit below its "on" threshold
    pub fn validate(&self) -> Result<(), String> {
        if self.fast_off >= self.fast_on {
            return Err(format!(
                "fast_off ({}) must be below fast_on ({})",
                self.fast_off, self.fast_on
            ));
        }
        if self.super_fast_off >= self.super_fast_on {
            return Err(format!(
                "super_fast_off ({}) must be below super_fast_on ({})",
                self.super_fast_off, self.super_fast_on
            ));
        }
        Ok(())
    }
}

/// Effective playback speed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PacingMode {
    Normal,
    Fast,
    SuperFast,
}

impl PacingMode {
    /// Multiplier applied to the frame period
    pub fn speed_factor(&self) -> f64 {
        match self {
            PacingMode::Normal => 1.0,
            PacingMode::Fast => 0.7,
            PacingMode::SuperFast => 0.35,
        }
    }
}

/// Hysteresis state for one playback session
#[derive(Debug, Clone)]
pub struct PacingController {
    thresholds: PacingThresholds,
    fast: bool,
    super_fast: bool,
}

impl PacingController {
    pub fn new(thresholds: PacingThresholds) -> Self {
        Self {
            thresholds,
            fast: false,
            super_fast: false,
        }
    }

    /// Feed the current queue depth and get the mode for the next frame
    pub fn update(&mut self, depth: usize) -> PacingMode {
        let t = &self.thresholds;

        if !self.super_fast && depth >= t.super_fast_on {
            self.super_fast = true;
        } else if self.super_fast && depth <= t.super_fast_off {
            self.super_fast = false;
        }

        if !self.fast && depth >= t.fast_on && !self.super_fast {
            self.fast = true;
        } else if self.fast && depth <= t.fast_off {
            self.fast = false;
        }

        self.mode()
    }

    /// Current mode; super-fast wins over fast
    pub fn mode(&self) -> PacingMode {
        if self.super_fast {
            PacingMode::SuperFast
        } else if self.fast {
            PacingMode::Fast
        } else {
            PacingMode::Normal
        }
    }
}

impl Default for PacingController {
    fn default() -> Self {
        Self::new(PacingThresholds::default())
    }
}

/// Rational frame rate (`num / den` frames per second)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Framerate {
    pub num: u32,
    pub den: u32,
}

impl Framerate {
    pub fn new(num: u32, den: u32) -> Self {
        Self { num, den }
    }

    /// Whole frames per second as announced in a handshake
    pub fn from_fps(fps: i32) -> Self {
        Self::new(u32::try_from(fps).unwrap_or(0), 1)
    }
}

/// Nominal time between frames
///
/// A zero rate (or zero denominator) falls back to the default frame rate.
pub fn frame_period(rate: Framerate) -> Duration {
    let (num, den) = if rate.num == 0 || rate.den == 0 {
        (DEFAULT_FPS, 1)
    } else {
        (rate.num, rate.den)
    };
    Duration::from_micros(1_000_000 * den as u64 / num as u64)
}

/// Frame period scaled by the mode's speed factor
pub fn effective_delay(period: Duration, mode: PacingMode) -> Duration {
    Duration::from_micros((period.as_micros() as f64 * mode.speed_factor()) as u64)
}
