//! Playback loop
//!
//! One tick takes at most one packet off the receive queue, decodes it and
//! presents the resulting pictures at the paced rate. The tick never blocks
//! on the queue: with nothing to show it re-presents the last picture.

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use crate::codec::VideoDecoder;
use crate::config::PlaybackConfig;
use crate::error::QueueError;
use crate::playback::pacing::{effective_delay, frame_period, Framerate, PacingController, PacingMode};
use crate::playback::render::FrameRenderer;
use crate::queue::SharedPacketQueue;

/// Time source used to pace presentation
pub trait Pacer {
    fn sleep(&mut self, duration: Duration);
}

/// Real-time pacer
#[derive(Debug, Default, Clone, Copy)]
pub struct ThreadSleeper;

impl Pacer for ThreadSleeper {
    fn sleep(&mut self, duration: Duration) {
        if !duration.is_zero() {
            std::thread::sleep(duration);
        }
    }
}

/// Where the loop is within a tick
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickPhase {
    Idle,
    Decoding,
    Pacing,
    Presenting,
}

/// Result of one tick
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickOutcome {
    /// Queue was empty; previous picture shown again
    Idle,
    /// Packet was not video; previous picture shown again
    SkippedNonVideo,
    /// Decoder rejected the packet
    DecodeError,
    /// This many pictures were presented
    Presented(usize),
    /// Queue closed, nothing more will arrive
    EndOfStream,
}

/// Playback statistics
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PlaybackStats {
    pub ticks: u64,
    pub frames_presented: u64,
    pub idle_ticks: u64,
    pub skipped_packets: u64,
    pub decode_errors: u64,
    pub fast_frames: u64,
    pub super_fast_frames: u64,
}

/// Decode, pace and present packets from a receive queue
pub struct PlaybackLoop<R: FrameRenderer, P: Pacer> {
    queue: SharedPacketQueue,
    decoder: Box<dyn VideoDecoder>,
    renderer: R,
    pacer: P,
    controller: PacingController,
    frame_period: Duration,
    render_interval: Duration,
    phase: TickPhase,
    stats: PlaybackStats,
}

impl<R: FrameRenderer, P: Pacer> PlaybackLoop<R, P> {
    pub fn new(
        queue: SharedPacketQueue,
        decoder: Box<dyn VideoDecoder>,
        renderer: R,
        pacer: P,
        framerate: Framerate,
        config: &PlaybackConfig,
    ) -> Self {
        let frame_period = frame_period(framerate);
        tracing::info!(
            "Playback at {}/{} fps ({} us per frame), decoder {}",
            framerate.num,
            framerate.den,
            frame_period.as_micros(),
            decoder.kind()
        );

        Self {
            queue,
            decoder,
            renderer,
            pacer,
            controller: PacingController::new(config.thresholds),
            frame_period,
            render_interval: config.render_interval(),
            phase: TickPhase::Idle,
            stats: PlaybackStats::default(),
        }
    }

    pub fn phase(&self) -> TickPhase {
        self.phase
    }

    pub fn pacing_mode(&self) -> PacingMode {
        self.controller.mode()
    }

    pub fn renderer(&self) -> &R {
        &self.renderer
    }

    pub fn pacer(&self) -> &P {
        &self.pacer
    }

    pub fn stats(&self) -> &PlaybackStats {
        &self.stats
    }

    /// Run one iteration
    pub fn tick(&mut self) -> TickOutcome {
        self.phase = TickPhase::Idle;
        self.stats.ticks += 1;

        let packet = match self.queue.try_pop() {
            Ok(packet) => packet,
            Err(QueueError::Empty) => {
                self.renderer.present_last();
                self.stats.idle_ticks += 1;
                return TickOutcome::Idle;
            }
            Err(_) => return TickOutcome::EndOfStream,
        };

        if !packet.is_video() {
            self.renderer.present_last();
            self.stats.skipped_packets += 1;
            return TickOutcome::SkippedNonVideo;
        }

        self.phase = TickPhase::Decoding;
        let frames = match self.decoder.decode(&packet) {
            Ok(frames) => frames,
            Err(e) => {
                tracing::warn!("Decode of pts={} failed: {}", packet.pts, e);
                self.stats.decode_errors += 1;
                self.phase = TickPhase::Idle;
                return TickOutcome::DecodeError;
            }
        };

        let mut presented = 0;
        for frame in &frames {
            self.phase = TickPhase::Pacing;
            let depth = self.queue.len();
            let mode = self.controller.update(depth);
            match mode {
                PacingMode::Fast => self.stats.fast_frames += 1,
                PacingMode::SuperFast => self.stats.super_fast_frames += 1,
                PacingMode::Normal => {}
            }

            let delay = effective_delay(self.frame_period, mode);
            tracing::debug!(
                "Frame pts={} packet pts={} size={} keyframe={} | sleeping {} us, queue {} ({:?})",
                frame.pts,
                packet.pts,
                packet.size(),
                packet.is_keyframe(),
                delay.as_micros(),
                depth,
                mode
            );
            self.pacer.sleep(delay);

            self.phase = TickPhase::Presenting;
            self.renderer.present(frame);
            presented += 1;
            self.stats.frames_presented += 1;
        }

        self.phase = TickPhase::Idle;
        TickOutcome::Presented(presented)
    }

    /// Tick until `stop` is set or the stream ends
    pub fn run(&mut self, stop: &AtomicBool) -> PlaybackStats {
        while !stop.load(Ordering::Relaxed) {
            match self.tick() {
                TickOutcome::EndOfStream => {
                    tracing::info!("End of stream");
                    break;
                }
                TickOutcome::Presented(n) if n > 0 => {}
                _ => self.pacer.sleep(self.render_interval),
            }
        }
        self.stats.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::{CodecKind, RawVideoDecoder, VideoFrame};
    use crate::error::CodecError;
    use crate::protocol::MediaPacket;
    use crate::queue::create_shared_queue;
    use bytes::Bytes;
    use std::sync::Arc;

    #[derive(Default)]
    struct RecordingSleeper {
        sleeps: Vec<Duration>,
    }

    impl Pacer for RecordingSleeper {
        fn sleep(&mut self, duration: Duration) {
            self.sleeps.push(duration);
        }
    }

    #[derive(Default)]
    struct RecordingRenderer {
        presented: Vec<i64>,
        repeats: usize,
    }

    impl FrameRenderer for RecordingRenderer {
        fn present(&mut self, frame: &VideoFrame) {
            self.presented.push(frame.pts);
        }

        fn present_last(&mut self) {
            self.repeats += 1;
        }
    }

    /// Emits two pictures per packet, or fails on pts < 0
    struct DoublingDecoder;

    impl VideoDecoder for DoublingDecoder {
        fn kind(&self) -> CodecKind {
            CodecKind::H264
        }

        fn decode(&mut self, packet: &MediaPacket) -> Result<Vec<VideoFrame>, CodecError> {
            if packet.pts < 0 {
                return Err(CodecError::DecodingFailed("corrupt slice".to_string()));
            }
            let picture = |pts| VideoFrame::new(2, 2, pts, Bytes::from(vec![0u8; 6]));
            Ok(vec![picture(packet.pts)?, picture(packet.pts + 1)?])
        }
    }

    fn raw_packet(pts: i64) -> MediaPacket {
        MediaPacket::video(pts, true, vec![16u8; 6]).unwrap()
    }

    fn player(
        queue: SharedPacketQueue,
        decoder: Box<dyn VideoDecoder>,
    ) -> PlaybackLoop<RecordingRenderer, RecordingSleeper> {
        PlaybackLoop::new(
            queue,
            decoder,
            RecordingRenderer::default(),
            RecordingSleeper::default(),
            Framerate::new(30, 1),
            &PlaybackConfig::default(),
        )
    }

    #[test]
    fn test_empty_queue_repeats_without_sleep() {
        let queue = create_shared_queue(8);
        let mut playback = player(queue, Box::new(RawVideoDecoder::new(2, 2).unwrap()));

        assert_eq!(playback.tick(), TickOutcome::Idle);
        assert_eq!(playback.renderer().repeats, 1);
        assert!(playback.pacer().sleeps.is_empty());
        assert_eq!(playback.phase(), TickPhase::Idle);
    }

    #[test]
    fn test_audio_packet_is_skipped() {
        let queue = create_shared_queue(8);
        queue.push_blocking(MediaPacket::audio(0, vec![1, 2, 3]).unwrap()).unwrap();
        let mut playback = player(queue, Box::new(RawVideoDecoder::new(2, 2).unwrap()));

        assert_eq!(playback.tick(), TickOutcome::SkippedNonVideo);
        assert_eq!(playback.renderer().repeats, 1);
        assert!(playback.pacer().sleeps.is_empty());
        assert_eq!(playback.stats().skipped_packets, 1);
    }

    #[test]
    fn test_video_packet_paced_at_normal_speed() {
        let queue = create_shared_queue(8);
        queue.push_blocking(raw_packet(3000)).unwrap();
        let mut playback = player(queue, Box::new(RawVideoDecoder::new(2, 2).unwrap()));

        assert_eq!(playback.tick(), TickOutcome::Presented(1));
        assert_eq!(playback.renderer().presented, vec![3000]);
        assert_eq!(playback.pacer().sleeps, vec![Duration::from_micros(33_333)]);
    }

    #[test]
    fn test_backlog_speeds_up_playback() {
        let queue = create_shared_queue(16);
        for pts in 0..6 {
            queue.push_blocking(raw_packet(pts)).unwrap();
        }
        let mut playback = player(queue, Box::new(RawVideoDecoder::new(2, 2).unwrap()));

        // Depth seen after each pop: 5, 4, 3, 2, 1, 0
        for _ in 0..6 {
            assert_eq!(playback.tick(), TickOutcome::Presented(1));
        }

        let expected: Vec<Duration> = [11_666, 11_666, 23_333, 23_333, 33_333, 33_333]
            .iter()
            .map(|&us| Duration::from_micros(us))
            .collect();
        assert_eq!(playback.pacer().sleeps, expected);
        assert_eq!(playback.stats().super_fast_frames, 2);
        assert_eq!(playback.stats().fast_frames, 2);
        assert_eq!(playback.pacing_mode(), PacingMode::Normal);
    }

    #[test]
    fn test_multiple_pictures_per_packet() {
        let queue = create_shared_queue(8);
        queue.push_blocking(raw_packet(10)).unwrap();
        let mut playback = player(queue, Box::new(DoublingDecoder));

        assert_eq!(playback.tick(), TickOutcome::Presented(2));
        assert_eq!(playback.renderer().presented, vec![10, 11]);
        assert_eq!(playback.pacer().sleeps.len(), 2);
    }

    #[test]
    fn test_decode_error_ends_tick() {
        let queue = create_shared_queue(8);
        queue.push_blocking(raw_packet(-1)).unwrap();
        queue.push_blocking(raw_packet(1)).unwrap();
        let mut playback = player(queue, Box::new(DoublingDecoder));

        assert_eq!(playback.tick(), TickOutcome::DecodeError);
        assert!(playback.renderer().presented.is_empty());
        assert_eq!(playback.tick(), TickOutcome::Presented(2));
        assert_eq!(playback.stats().decode_errors, 1);
    }

    #[test]
    fn test_closed_queue_is_end_of_stream() {
        let queue = create_shared_queue(8);
        queue.close();
        let mut playback = player(queue, Box::new(RawVideoDecoder::new(2, 2).unwrap()));

        assert_eq!(playback.tick(), TickOutcome::EndOfStream);
    }

    #[test]
    fn test_run_until_end_of_stream() {
        let queue = create_shared_queue(8);
        queue.push_blocking(raw_packet(0)).unwrap();
        let mut playback = player(queue.clone(), Box::new(RawVideoDecoder::new(2, 2).unwrap()));

        // One presented tick, then an idle tick, then end of stream.
        assert_eq!(playback.tick(), TickOutcome::Presented(1));
        assert_eq!(playback.tick(), TickOutcome::Idle);
        queue.close();

        let stop = AtomicBool::new(false);
        let stats = playback.run(&stop);
        assert_eq!(stats.frames_presented, 1);
        assert_eq!(stats.idle_ticks, 1);
        assert_eq!(stats.ticks, 3);
    }

    struct StoppingSleeper {
        stop: Arc<AtomicBool>,
        sleeps: Vec<Duration>,
        limit: usize,
    }

    impl Pacer for StoppingSleeper {
        fn sleep(&mut self, duration: Duration) {
            self.sleeps.push(duration);
            if self.sleeps.len() >= self.limit {
                self.stop.store(true, Ordering::SeqCst);
            }
        }
    }

    #[test]
    fn test_run_waits_between_idle_ticks() {
        let stop = Arc::new(AtomicBool::new(false));
        let sleeper = StoppingSleeper {
            stop: stop.clone(),
            sleeps: Vec::new(),
            limit: 3,
        };
        let mut playback = PlaybackLoop::new(
            create_shared_queue(8),
            Box::new(RawVideoDecoder::new(2, 2).unwrap()),
            RecordingRenderer::default(),
            sleeper,
            Framerate::new(30, 1),
            &PlaybackConfig::default(),
        );

        let stats = playback.run(&stop);
        assert_eq!(stats.ticks, 3);
        assert_eq!(stats.idle_ticks, 3);
        assert_eq!(playback.pacer().sleeps, vec![Duration::from_micros(16_667); 3]);
        assert_eq!(playback.renderer().repeats, 3);
    }
}
