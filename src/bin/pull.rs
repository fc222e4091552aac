//! Pull client
//!
//! Subscribes to a stream on the relay, decodes it and presents it at the
//! adaptive playback rate.
//!
//! Usage: `pull [host] [stream_id]`

use anyhow::{Context, Result};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use tcp_media_streamer::{
    codec::create_decoder,
    config::AppConfig,
    network::PullClient,
    playback::{Framerate, LogRenderer, PlaybackLoop, ThreadSleeper},
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
        println!("USAGE: pull [host] [stream_id]");
        return Ok(());
    }

    let mut config = AppConfig::load_or_default()?;
    config.apply_args(args);
    config.validate()?;

    tracing::info!(
        "Starting pull client: {}:{} stream '{}'",
        config.network.host,
        config.network.port,
        config.stream.stream_id
    );

    let stop = Arc::new(AtomicBool::new(false));
    let mut playback = tokio::task::spawn_blocking({
        let stop = stop.clone();
        move || run_playback(&config, &stop)
    });

    tokio::select! {
        result = &mut playback => return result?,
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("Interrupted, shutting down");
            stop.store(true, Ordering::SeqCst);
        }
    }

    playback.await?
}

fn run_playback(config: &AppConfig, stop: &AtomicBool) -> Result<()> {
    let mut client = PullClient::connect(config)?;
    let info = client.handshake().info();
    let decoder = create_decoder(&info).context("decoder setup")?;

    let mut playback = PlaybackLoop::new(
        client.queue(),
        decoder,
        LogRenderer::new(),
        ThreadSleeper,
        Framerate::from_fps(info.fps),
        &config.playback,
    );
    let stats = playback.run(stop);

    let network = client.stats();
    client.stop();

    tracing::info!(
        "Playback finished: {} frames presented, {} idle ticks, {} fast / {} super-fast, {} decode errors; {} packets ({:.1} KB) received, {} queue underruns, queue {:.0}% full",
        stats.frames_presented,
        stats.idle_ticks,
        stats.fast_frames,
        stats.super_fast_frames,
        stats.decode_errors,
        network.packets_received,
        network.bytes_received as f64 / 1024.0,
        network.queue_underruns,
        network.queue_fill * 100.0
    );
    Ok(())
}
