//! Synthetic test-pattern capture
//!
//! Generates I420 pictures without a camera. Generators that evolve over
//! time keep their state in a caller-owned [`PatternState`].

use bytes::Bytes;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};

use crate::capture::{CaptureSource, CapturedFrame, FrameToken};
use crate::codec::VideoFrame;
use crate::error::CaptureError;

/// Available test patterns
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Pattern {
    Checker,
    VerticalBars,
    HorizontalBars,
    Gradient,
    Radial,
    GameOfLife,
}

/// Cellular automaton grid at chroma resolution
struct LifeGrid {
    width: usize,
    height: usize,
    alive: Vec<u8>,
    age: Vec<u8>,
    next: Vec<u8>,
}

impl LifeGrid {
    fn seeded(width: usize, height: usize, rng: &mut StdRng) -> Self {
        let cells = width * height;
        let mut alive = vec![0u8; cells];
        let mut age = vec![0u8; cells];
        for i in 0..cells {
            // sparse clusters: one cell in eight starts alive
            if rng.gen_range(0..8) == 0 {
                alive[i] = 1;
                age[i] = 32;
            }
        }
        Self {
            width,
            height,
            alive,
            age,
            next: vec![0u8; cells],
        }
    }

    fn step(&mut self) {
        let (w, h) = (self.width as isize, self.height as isize);
        for y in 0..h {
            for x in 0..w {
                let mut live = 0;
                for dy in -1..=1 {
                    for dx in -1..=1 {
                        if dx == 0 && dy == 0 {
                            continue;
                        }
                        let (nx, ny) = (x + dx, y + dy);
                        if nx >= 0 && nx < w && ny >= 0 && ny < h {
                            live += self.alive[(ny * w + nx) as usize];
                        }
                    }
                }
                let i = (y * w + x) as usize;
                self.next[i] = if self.alive[i] == 1 {
                    (live == 2 || live == 3) as u8
                } else {
                    (live == 3) as u8
                };
            }
        }

        std::mem::swap(&mut self.alive, &mut self.next);
        for (alive, age) in self.alive.iter().zip(self.age.iter_mut()) {
            *age = if *alive == 1 {
                age.saturating_add(5).min(250)
            } else {
                age.saturating_sub(3)
            };
        }
    }

    fn live_cells(&self) -> usize {
        self.alive.iter().filter(|&&a| a == 1).count()
    }
}

/// Mutable generator state, owned by the caller
pub struct PatternState {
    rng: StdRng,
    life: Option<LifeGrid>,
}

impl PatternState {
    pub fn new(seed: u64) -> Self {
        Self {
            rng: StdRng::seed_from_u64(seed),
            life: None,
        }
    }

    /// Live cells of the game-of-life grid, if one has been started
    pub fn live_cells(&self) -> Option<usize> {
        self.life.as_ref().map(|grid| grid.live_cells())
    }
}

fn clamp_u8(v: f32) -> u8 {
    v.round().clamp(0.0, 255.0) as u8
}

/// Render `pattern` for frame `index` into an I420 buffer
///
/// `buf` must hold exactly `VideoFrame::i420_size(width, height)` bytes.
pub fn fill_pattern(
    pattern: Pattern,
    state: &mut PatternState,
    width: usize,
    height: usize,
    index: u64,
    buf: &mut [u8],
) {
    let (cw, ch) = (width / 2, height / 2);
    let (y_plane, chroma) = buf.split_at_mut(width * height);
    let (u_plane, v_plane) = chroma.split_at_mut(cw * ch);

    match pattern {
        Pattern::Checker => {
            // block size drifts over time
            let block = 32 + ((index as usize >> 2) & 31);
            for y in 0..height {
                for x in 0..width {
                    let check = ((x / block) ^ (y / block)) & 1;
                    y_plane[y * width + x] = if check == 1 { 240 } else { 30 };
                }
            }
            u_plane.fill(128);
            v_plane.fill(128);
        }
        Pattern::VerticalBars | Pattern::HorizontalBars => {
            let bands = 8;
            for y in 0..height {
                for x in 0..width {
                    let band = if pattern == Pattern::VerticalBars {
                        (x * bands) / width
                    } else {
                        (y * bands) / height
                    };
                    y_plane[y * width + x] = (band * (255 / (bands - 1))) as u8;
                }
            }
            u_plane.fill(128);
            v_plane.fill(128);
        }
        Pattern::Gradient => {
            let (wd, hd) = ((width.max(2) - 1) as f32, (height.max(2) - 1) as f32);
            for y in 0..height {
                for x in 0..width {
                    let v = 0.5 * (x as f32 / wd + y as f32 / hd);
                    y_plane[y * width + x] = clamp_u8(v * 255.0);
                }
            }
            u_plane.fill(128);
            v_plane.fill(128);
        }
        Pattern::Radial => {
            let t = index as f32 * 0.05;
            let (cx, cy) = ((width as f32 - 1.0) * 0.5, (height as f32 - 1.0) * 0.5);
            for y in 0..height {
                for x in 0..width {
                    let (fx, fy) = (x as f32 - cx, y as f32 - cy);
                    let r = (fx * fx + fy * fy).sqrt();
                    let a = fy.atan2(fx);
                    let v = 0.5
                        + 0.25 * (0.035 * r - 3.0 * a + t).sin()
                        + 0.25 * (0.02 * r + 5.0 * a - 1.7 * t).sin();
                    y_plane[y * width + x] = clamp_u8(v * 255.0);
                }
            }
            let (ccx, ccy) = ((cw as f32 - 1.0) * 0.5, (ch as f32 - 1.0) * 0.5);
            for j in 0..ch {
                for i in 0..cw {
                    let (fx, fy) = (i as f32 - ccx, j as f32 - ccy);
                    let r = (fx * fx + fy * fy).sqrt();
                    let a = fy.atan2(fx);
                    let u_wave = 0.5 + 0.5 * (2.0 * a + 0.0025 * r + 0.7 * t).sin();
                    let v_wave = 0.5 + 0.5 * (3.0 * a - 0.0035 * r - 0.4 * t).cos();
                    u_plane[j * cw + i] = clamp_u8(128.0 + (u_wave - 0.5) * 180.0);
                    v_plane[j * cw + i] = clamp_u8(128.0 + (v_wave - 0.5) * 180.0);
                }
            }
        }
        Pattern::GameOfLife => {
            let reseed = match &state.life {
                Some(grid) => index == 0 || grid.width != cw || grid.height != ch,
                None => true,
            };
            if reseed {
                state.life = Some(LifeGrid::seeded(cw, ch, &mut state.rng));
            } else if let Some(grid) = state.life.as_mut() {
                grid.step();
            }

            let Some(grid) = state.life.as_ref() else {
                return;
            };

            for y in 0..height {
                let sy = (y * ch) / height;
                for x in 0..width {
                    let sx = (x * cw) / width;
                    let val = grid.age[sy * cw + sx] as u32;
                    let shaded = if val < 64 {
                        val * 2
                    } else if val < 128 {
                        64 + (val - 64) * 3 / 2
                    } else {
                        128 + (val - 128) * 2
                    };
                    y_plane[y * width + x] = shaded.min(255) as u8;
                }
            }
            for (i, age) in grid.age.iter().enumerate() {
                u_plane[i] = 128 + age / 6;
                v_plane[i] = 128 + age / 10;
            }
        }
    }
}

/// Capture source producing test patterns
pub struct PatternSource {
    pattern: Pattern,
    state: PatternState,
    width: u32,
    height: u32,
    fps: u32,
    /// Sleep to hold `fps` in real time
    realtime: bool,
    frame_index: u64,
    next_deadline: Option<Instant>,
    /// Buffers returned through `release_frame`
    pool: Vec<Vec<u8>>,
    /// Frames currently lent out
    outstanding: usize,
}

impl PatternSource {
    pub fn new(pattern: Pattern, width: u32, height: u32, fps: u32, seed: u64) -> Self {
        Self {
            pattern,
            state: PatternState::new(seed),
            width,
            height,
            fps: fps.max(1),
            realtime: true,
            frame_index: 0,
            next_deadline: None,
            pool: Vec::new(),
            outstanding: 0,
        }
    }

    /// Produce frames as fast as they are requested
    pub fn unpaced(mut self) -> Self {
        self.realtime = false;
        self
    }

    pub fn outstanding(&self) -> usize {
        self.outstanding
    }

    pub fn pooled_buffers(&self) -> usize {
        self.pool.len()
    }

    fn wait_for_deadline(&mut self) {
        if !self.realtime {
            return;
        }
        let period = Duration::from_secs_f64(1.0 / self.fps as f64);
        let now = Instant::now();
        let deadline = self.next_deadline.unwrap_or(now);
        if deadline > now {
            std::thread::sleep(deadline - now);
        }
        // do not accumulate debt after a stall
        self.next_deadline = Some(deadline.max(now) + period);
    }
}

impl CaptureSource for PatternSource {
    fn acquire_frame(&mut self) -> Result<CapturedFrame, CaptureError> {
        if self.width == 0 || self.height == 0 || self.width % 2 != 0 || self.height % 2 != 0 {
            return Err(CaptureError::Failed(format!(
                "pattern size must be even and non-zero, got {}x{}",
                self.width, self.height
            )));
        }

        self.wait_for_deadline();

        let size = VideoFrame::i420_size(self.width, self.height);
        let mut buf = self.pool.pop().unwrap_or_default();
        buf.resize(size, 0);

        let index = self.frame_index;
        fill_pattern(
            self.pattern,
            &mut self.state,
            self.width as usize,
            self.height as usize,
            index,
            &mut buf,
        );

        let frame = VideoFrame::new(self.width, self.height, index as i64, Bytes::from(buf))
            .map_err(|e| CaptureError::Failed(e.to_string()))?;

        self.frame_index += 1;
        self.outstanding += 1;
        Ok(CapturedFrame {
            token: FrameToken::new(index),
            frame,
        })
    }

    fn release_frame(&mut self, frame: CapturedFrame) {
        self.outstanding = self.outstanding.saturating_sub(1);
        // Reclaims the allocation when no encoder still shares the bytes.
        let buffer: Vec<u8> = frame.frame.data.into();
        if self.pool.len() < 4 {
            self.pool.push(buffer);
        }
    }

    fn fps(&self) -> u32 {
        self.fps
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::FrameLease;

    fn render(pattern: Pattern, state: &mut PatternState, index: u64) -> Vec<u8> {
        let mut buf = vec![0u8; VideoFrame::i420_size(64, 32)];
        fill_pattern(pattern, state, 64, 32, index, &mut buf);
        buf
    }

    #[test]
    fn test_checker_levels() {
        let mut state = PatternState::new(1);
        let buf = render(Pattern::Checker, &mut state, 0);

        assert_eq!(buf[0], 30);
        assert_eq!(buf[32], 240);
        assert!(buf[64 * 32..].iter().all(|&c| c == 128));
    }

    #[test]
    fn test_bars() {
        let mut state = PatternState::new(1);
        let vertical = render(Pattern::VerticalBars, &mut state, 0);
        assert_eq!(vertical[0], 0);
        assert_eq!(vertical[63], 7 * 36);

        let horizontal = render(Pattern::HorizontalBars, &mut state, 0);
        assert_eq!(horizontal[0], horizontal[63]);
        assert_eq!(horizontal[31 * 64], 7 * 36);
    }

    #[test]
    fn test_game_of_life_state_is_caller_owned() {
        let mut a = PatternState::new(7);
        let mut b = PatternState::new(7);
        let mut c = PatternState::new(8);

        let first_a = render(Pattern::GameOfLife, &mut a, 0);
        let first_b = render(Pattern::GameOfLife, &mut b, 0);
        let first_c = render(Pattern::GameOfLife, &mut c, 0);
        assert_eq!(first_a, first_b);
        assert_ne!(first_a, first_c);

        assert!(a.live_cells().is_some());
        let next_a = render(Pattern::GameOfLife, &mut a, 1);
        assert_ne!(first_a, next_a);
        // b has not advanced
        assert_eq!(render(Pattern::GameOfLife, &mut b, 1), next_a);
    }

    #[test]
    fn test_pattern_source_reuses_buffers() {
        let mut source = PatternSource::new(Pattern::Gradient, 16, 8, 30, 0).unpaced();

        {
            let lease = FrameLease::acquire(&mut source).unwrap();
            assert_eq!(lease.pts, 0);
            assert_eq!(lease.data.len(), VideoFrame::i420_size(16, 8));
        }
        assert_eq!(source.outstanding(), 0);
        assert_eq!(source.pooled_buffers(), 1);

        let lease = FrameLease::acquire(&mut source).unwrap();
        assert_eq!(lease.pts, 1);
    }

    #[test]
    fn test_odd_size_rejected() {
        let mut source = PatternSource::new(Pattern::Checker, 15, 8, 30, 0).unpaced();
        assert!(source.acquire_frame().is_err());
    }
}
