//! Push client
//!
//! Generates a test pattern, encodes it and publishes it to the relay.
//!
//! Usage: `push [host] [stream_id]`

use anyhow::{Context, Result};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use tcp_media_streamer::{
    capture::{FrameLease, PatternSource},
    codec::{create_encoder, VideoFrame},
    config::AppConfig,
    error::QueueError,
    network::PushClient,
    protocol::{StreamHandshake, StreamInfo},
    queue::PacketQueue,
};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let args: Vec<String> = std::env::args().skip(1).collect();
    if args.len() > 2 {
        println!("USAGE: push [host] [stream_id]");
        return Ok(());
    }

    let mut config = AppConfig::load_or_default()?;
    config.apply_args(args);
    config.validate()?;

    tracing::info!(
        "Starting push client: {}:{} stream '{}'",
        config.network.host,
        config.network.port,
        config.stream.stream_id
    );

    let running = Arc::new(AtomicBool::new(true));
    let mut pipeline = tokio::task::spawn_blocking({
        let running = running.clone();
        move || run_pipeline(&config, &running)
    });

    tokio::select! {
        result = &mut pipeline => return result?,
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("Interrupted, shutting down");
            running.store(false, Ordering::SeqCst);
        }
    }

    pipeline.await?
}

fn run_pipeline(config: &AppConfig, running: &Arc<AtomicBool>) -> Result<()> {
    let push = &config.push;
    let mut encoder = create_encoder(&push.encoder, push.width, push.height).context("encoder setup")?;

    let info = StreamInfo {
        video_codec_id: encoder.kind().id(),
        fps: push.fps as i32,
        width: push.width as i32,
        height: push.height as i32,
        video_extradata: encoder.extradata().to_vec(),
        ..Default::default()
    };
    let mut client = PushClient::connect(config, StreamHandshake::push(config.stream.stream_id.as_str(), &info))?;

    // Capture thread -> capture queue -> encoder (this thread) -> data queue -> egress
    let capture_queue = Arc::new(PacketQueue::<VideoFrame>::new(push.capture_queue_capacity));
    let capture_handle = {
        let capture_queue = capture_queue.clone();
        let running = running.clone();
        let mut source = PatternSource::new(push.pattern, push.width, push.height, push.fps, push.seed);

        thread::Builder::new().name("capture".into()).spawn(move || {
            while running.load(Ordering::Relaxed) {
                let frame = match FrameLease::acquire(&mut source) {
                    Ok(lease) => (*lease).clone(),
                    Err(e) => {
                        tracing::error!("Capture failed: {}", e);
                        break;
                    }
                };
                if capture_queue.push_blocking(frame).is_err() {
                    break;
                }
            }
            capture_queue.close();
        })?
    };

    let started = Instant::now();
    let mut frames = 0u64;
    let mut last_report = Instant::now();

    while running.load(Ordering::Relaxed) && client.is_running() {
        let frame = match capture_queue.pop_timeout(Duration::from_millis(100)) {
            Ok(frame) => frame,
            Err(QueueError::Empty) => continue,
            Err(_) => break,
        };

        let packets = match encoder.encode(&frame) {
            Ok(packets) => packets,
            Err(e) => {
                tracing::warn!("Encoding failed: {}", e);
                continue;
            }
        };

        for packet in packets {
            if let Err(e) = client.send(packet) {
                tracing::error!("Data queue rejected packet: {}", e);
                running.store(false, Ordering::SeqCst);
                break;
            }
        }
        frames += 1;

        if last_report.elapsed() >= Duration::from_secs(5) {
            let stats = client.stats();
            tracing::info!(
                "Stats: {} frames in {:.1}s, {} packets sent, {:.1} KB sent, {} dropped, queue {} ({:.0}% full)",
                frames,
                started.elapsed().as_secs_f64(),
                stats.packets_sent,
                stats.bytes_sent as f64 / 1024.0,
                stats.packets_dropped,
                stats.queue_len,
                stats.queue_fill * 100.0
            );
            last_report = Instant::now();
        }
    }

    running.store(false, Ordering::SeqCst);
    capture_queue.close();
    let _ = capture_handle.join();

    client.flush(Duration::from_secs(2));
    client.stop();
    tracing::info!("Push client stopped after {} frames", frames);
    Ok(())
}
