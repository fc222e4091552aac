//! Presentation boundary
//!
//! Windowing and texture upload live outside this crate; the playback loop
//! only needs somewhere to hand decoded pictures.

use crate::codec::VideoFrame;

/// Sink for decoded pictures
pub trait FrameRenderer {
    /// Show a newly decoded picture
    fn present(&mut self, frame: &VideoFrame);

    /// Show the previous picture again (no new data this tick)
    fn present_last(&mut self);
}

/// Renderer that only records what it would have shown
#[derive(Debug, Default)]
pub struct LogRenderer {
    last: Option<(u32, u32, i64)>,
    presented: u64,
    repeated: u64,
}

impl LogRenderer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Pictures presented for the first time
    pub fn presented(&self) -> u64 {
        self.presented
    }

    /// Re-presentations of the previous picture
    pub fn repeated(&self) -> u64 {
        self.repeated
    }

    /// pts of the picture currently on screen
    pub fn last_pts(&self) -> Option<i64> {
        self.last.map(|(_, _, pts)| pts)
    }
}

impl FrameRenderer for LogRenderer {
    fn present(&mut self, frame: &VideoFrame) {
        self.presented += 1;
        self.last = Some((frame.width, frame.height, frame.pts));
        tracing::debug!("Present {}x{} pts={}", frame.width, frame.height, frame.pts);
    }

    fn present_last(&mut self) {
        self.repeated += 1;
        if let Some((width, height, pts)) = self.last {
            tracing::trace!("Re-present {}x{} pts={}", width, height, pts);
        }
    }
}
