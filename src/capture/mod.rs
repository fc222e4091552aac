//! Capture boundary
//!
//! A capture source lends out picture buffers. Each acquired frame carries a
//! token that must go back to the source exactly once; [`FrameLease`] does
//! that on drop so early returns and error paths cannot leak a buffer.

pub mod pattern;

pub use pattern::{Pattern, PatternSource, PatternState};

use std::ops::Deref;

use crate::codec::VideoFrame;
use crate::error::CaptureError;

/// Identifies a buffer lent out by a capture source
#[derive(Debug, PartialEq, Eq, Hash)]
pub struct FrameToken(u64);

impl FrameToken {
    pub fn new(id: u64) -> Self {
        Self(id)
    }

    pub fn id(&self) -> u64 {
        self.0
    }
}

/// A captured picture together with its ownership token
///
/// Not `Clone`: there is exactly one owner until it is released.
#[derive(Debug)]
pub struct CapturedFrame {
    pub token: FrameToken,
    pub frame: VideoFrame,
}

/// Source of raw pictures (camera, screen, synthetic)
pub trait CaptureSource: Send {
    /// Take the next picture; blocks until one is ready
    fn acquire_frame(&mut self) -> Result<CapturedFrame, CaptureError>;

    /// Give a picture buffer back to the source
    fn release_frame(&mut self, frame: CapturedFrame);

    /// Nominal capture rate
    fn fps(&self) -> u32;
}

/// Scoped acquisition guard
pub struct FrameLease<'a, S: CaptureSource + ?Sized> {
    source: &'a mut S,
    frame: Option<CapturedFrame>,
}

impl<'a, S: CaptureSource + ?Sized> FrameLease<'a, S> {
    /// Acquire a frame from `source`, released when the lease is dropped
    pub fn acquire(source: &'a mut S) -> Result<Self, CaptureError> {
        let frame = source.acquire_frame()?;
        Ok(Self {
            source,
            frame: Some(frame),
        })
    }

    pub fn token(&self) -> Option<&FrameToken> {
        self.frame.as_ref().map(|f| &f.token)
    }
}

impl<S: CaptureSource + ?Sized> Deref for FrameLease<'_, S> {
    type Target = VideoFrame;

    fn deref(&self) -> &VideoFrame {
        match &self.frame {
            Some(captured) => &captured.frame,
            // `frame` is only taken in `drop`.
            None => unreachable!("frame lease used after release"),
        }
    }
}

impl<S: CaptureSource + ?Sized> Drop for FrameLease<'_, S> {
    fn drop(&mut self) {
        if let Some(frame) = self.frame.take() {
            self.source.release_frame(frame);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use std::collections::HashSet;

    #[derive(Default)]
    struct CountingSource {
        next: u64,
        outstanding: HashSet<u64>,
        released: Vec<u64>,
    }

    impl CaptureSource for CountingSource {
        fn acquire_frame(&mut self) -> Result<CapturedFrame, CaptureError> {
            let id = self.next;
            self.next += 1;
            self.outstanding.insert(id);
            Ok(CapturedFrame {
                token: FrameToken::new(id),
                frame: VideoFrame::new(2, 2, id as i64, Bytes::from(vec![0u8; 6])).unwrap(),
            })
        }

        fn release_frame(&mut self, frame: CapturedFrame) {
            assert!(self.outstanding.remove(&frame.token.id()), "double release");
            self.released.push(frame.token.id());
        }

        fn fps(&self) -> u32 {
            30
        }
    }

    fn use_frame_then_fail(source: &mut CountingSource) -> Result<(), CaptureError> {
        let lease = FrameLease::acquire(source)?;
        if lease.pts >= 0 {
            return Err(CaptureError::Failed("encoder rejected frame".to_string()));
        }
        Ok(())
    }

    #[test]
    fn test_lease_releases_on_scope_exit() {
        let mut source = CountingSource::default();
        {
            let lease = FrameLease::acquire(&mut source).unwrap();
            assert_eq!(lease.token().map(|t| t.id()), Some(0));
            assert_eq!(lease.width, 2);
        }
        assert_eq!(source.released, vec![0]);
        assert!(source.outstanding.is_empty());
    }

    #[test]
    fn test_lease_releases_on_error_path() {
        let mut source = CountingSource::default();
        assert!(use_frame_then_fail(&mut source).is_err());
        assert!(use_frame_then_fail(&mut source).is_err());

        assert_eq!(source.released, vec![0, 1]);
        assert!(source.outstanding.is_empty());
    }
}
