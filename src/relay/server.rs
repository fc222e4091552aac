//! Relay TCP server
//!
//! Accepts push and pull connections on one port. The first bytes of every
//! connection are its handshake; the `mode` key decides the role.

use std::future::Future;
use std::io::ErrorKind;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};

use bytes::Bytes;

use crate::codec::{nal, CodecKind};
use crate::config::RelayConfig;
use crate::error::{Error, ProtocolError, Result};
use crate::protocol::{encode_handshake, handshake_length, MediaPacket, PacketHeader, StreamHandshake, StreamInfo, StreamMode};
use crate::relay::hub::HubRegistry;
use crate::relay::recorder::Recorder;

/// Relay listening socket plus the stream registry
pub struct RelayServer {
    listener: TcpListener,
    registry: Arc<HubRegistry>,
    record_dir: Option<PathBuf>,
}

impl RelayServer {
    pub async fn bind(config: &RelayConfig) -> Result<Self> {
        let listener = TcpListener::bind(&config.listen_addr).await?;
        tracing::info!("Relay listening on {}", listener.local_addr()?);
        if let Some(dir) = &config.record_dir {
            tracing::info!("Recording pushed streams to {}", dir.display());
        }

        Ok(Self {
            listener,
            registry: Arc::new(HubRegistry::new(
                config.stream_queue_capacity,
                config.client_queue_capacity,
            )),
            record_dir: config.record_dir.clone(),
        })
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    pub fn registry(&self) -> Arc<HubRegistry> {
        self.registry.clone()
    }

    /// Serve until the process exits
    pub async fn run(self) -> Result<()> {
        self.run_until(std::future::pending()).await
    }

    /// Serve until `shutdown` completes
    pub async fn run_until<F: Future<Output = ()>>(self, shutdown: F) -> Result<()> {
        tokio::pin!(shutdown);

        loop {
            tokio::select! {
                _ = &mut shutdown => {
                    tracing::info!("Relay shutting down");
                    return Ok(());
                }
                accepted = self.listener.accept() => {
                    let (stream, peer) = match accepted {
                        Ok(accepted) => accepted,
                        Err(e) => {
                            tracing::warn!("Accept failed: {}", e);
                            continue;
                        }
                    };
                    if let Err(e) = stream.set_nodelay(true) {
                        tracing::debug!("TCP_NODELAY on {} failed: {}", peer, e);
                    }

                    let registry = self.registry.clone();
                    let record_dir = self.record_dir.clone();
                    tokio::spawn(async move {
                        if let Err(e) = serve(stream, peer, registry, record_dir).await {
                            tracing::warn!("Connection {} dropped: {}", peer, e);
                        }
                    });
                }
            }
        }
    }
}

async fn serve(
    mut stream: TcpStream,
    peer: SocketAddr,
    registry: Arc<HubRegistry>,
    record_dir: Option<PathBuf>,
) -> Result<()> {
    let handshake = read_handshake(&mut stream).await?;

    match handshake.mode {
        Some(StreamMode::Push) => handle_push(stream, peer, handshake, &registry, record_dir.as_deref()).await,
        Some(StreamMode::Pull) => handle_pull(stream, peer, handshake, &registry).await,
        None => {
            tracing::warn!("Handshake from {} has no mode", peer);
            Ok(())
        }
    }
}

/// Stream description of a push handshake; codec and geometry keys are required
fn push_description(handshake: &StreamHandshake) -> Result<StreamInfo> {
    if handshake.stream_id.is_empty() {
        return Err(missing("stream_id"));
    }
    let required = [
        ("video_codec_id", handshake.video_codec_id),
        ("audio_codec_id", handshake.audio_codec_id),
        ("fps", handshake.fps),
        ("width", handshake.width),
        ("height", handshake.height),
    ];
    for (key, value) in required {
        if value.is_none() {
            return Err(missing(key));
        }
    }
    Ok(handshake.info())
}

fn missing(key: &str) -> Error {
    ProtocolError::MalformedFrame(format!("push handshake missing {}", key)).into()
}

async fn handle_push(
    stream: TcpStream,
    peer: SocketAddr,
    handshake: StreamHandshake,
    registry: &HubRegistry,
    record_dir: Option<&Path>,
) -> Result<()> {
    let info = push_description(&handshake)?;
    let stream_id = handshake.stream_id;
    let codec = CodecKind::from_id(info.video_codec_id);

    let mut recorder = match record_dir {
        Some(dir) => Some(Recorder::create(dir, &stream_id, codec).await?),
        None => None,
    };

    tracing::info!(
        "Push client {} connected, stream={} video_codec_id={} audio_codec_id={} fps={} video_extradata={} bytes audio_extradata={} bytes",
        peer,
        stream_id,
        info.video_codec_id,
        info.audio_codec_id,
        info.fps,
        info.video_extradata.len(),
        info.audio_extradata.len()
    );
    let hub = registry.publish(&stream_id, info);

    let mut reader = BufReader::new(stream);
    loop {
        let packet = match read_frame(&mut reader).await {
            Ok(packet) => packet,
            Err(e) if is_disconnect(&e) => {
                tracing::info!("Push client disconnected, stream={}", stream_id);
                break;
            }
            Err(e) => {
                tracing::warn!("Disconnecting push client {}: {}", peer, e);
                break;
            }
        };

        tracing::debug!(
            "Packet pts={} dts={} stream={} flags={} size={}",
            packet.pts,
            packet.dts,
            packet.stream_index,
            packet.flags,
            packet.size()
        );

        if keyframe_flag_mismatch(codec, &packet) {
            tracing::warn!(
                "Stream {} packet pts={} keyframe flag is {} but its NAL units disagree",
                stream_id,
                packet.pts,
                packet.is_keyframe()
            );
        }

        if packet.is_video() {
            if let Some(recorder) = recorder.as_mut() {
                if let Err(e) = recorder.write(&packet.payload).await {
                    tracing::error!("Cannot record packet for {}: {}", stream_id, e);
                }
            }
        }

        hub.enqueue(packet);
    }

    hub.set_publishing(false);
    registry.release(&stream_id);
    if let Some(recorder) = recorder {
        let bytes = recorder.finish().await?;
        tracing::info!("Recorded {} bytes of {}", bytes, stream_id);
    }
    Ok(())
}

async fn handle_pull(stream: TcpStream, peer: SocketAddr, handshake: StreamHandshake, registry: &HubRegistry) -> Result<()> {
    let Some(hub) = registry.get(&handshake.stream_id) else {
        tracing::warn!("Pull client {} requested unknown stream: {}", peer, handshake.stream_id);
        return Ok(());
    };

    let (reader, mut writer) = stream.into_split();
    let info = hub.info();
    write_handshake(&mut writer, &StreamHandshake::describe(hub.id(), &info)).await?;
    tracing::info!(
        "Pull client {} connected, stream={} video_codec_id={} fps={}",
        peer,
        hub.id(),
        info.video_codec_id,
        info.fps
    );

    let (client_id, mut packets) = hub.subscribe();
    let mut writer_task = tokio::spawn(async move {
        while let Some(packet) = packets.recv().await {
            write_frame(&mut writer, &packet).await?;
        }
        Ok::<(), Error>(())
    });

    tokio::select! {
        result = &mut writer_task => {
            match result {
                Ok(Err(e)) => tracing::debug!("Write to pull client {} failed: {}", peer, e),
                Err(e) => tracing::error!("Writer for {} panicked: {}", peer, e),
                Ok(Ok(())) => {}
            }
        }
        keep_alives = drain(reader) => {
            tracing::debug!("Pull client {} sent {} keep-alive bytes", peer, keep_alives);
        }
    }

    hub.unsubscribe(&client_id);
    writer_task.abort();
    tracing::info!("Pull client disconnected, stream={}", hub.id());
    registry.release(hub.id());
    Ok(())
}

/// Whether an Annex-B video packet's flag bit contradicts its NAL types
fn keyframe_flag_mismatch(codec: CodecKind, packet: &MediaPacket) -> bool {
    if !packet.is_video() || !matches!(codec, CodecKind::H264 | CodecKind::Hevc) {
        return false;
    }
    if nal::split_annex_b(&packet.payload).next().is_none() {
        return false;
    }
    packet.is_keyframe() != nal::is_keyframe(codec, &packet.payload)
}

/// Discard inbound bytes until EOF or error
async fn drain<R: AsyncRead + Unpin>(mut reader: R) -> u64 {
    let mut buf = [0u8; 64];
    let mut total = 0;
    loop {
        match reader.read(&mut buf).await {
            Ok(0) | Err(_) => return total,
            Ok(n) => total += n as u64,
        }
    }
}

fn is_disconnect(error: &Error) -> bool {
    match error {
        Error::Io(e) => matches!(
            e.kind(),
            ErrorKind::UnexpectedEof | ErrorKind::ConnectionReset | ErrorKind::ConnectionAborted | ErrorKind::BrokenPipe
        ),
        _ => false,
    }
}

/// Read a length-prefixed handshake
pub async fn read_handshake<R: AsyncRead + Unpin>(reader: &mut R) -> Result<StreamHandshake> {
    let mut prefix = [0u8; 4];
    reader.read_exact(&mut prefix).await?;
    let length = handshake_length(prefix)?;

    let mut payload = vec![0u8; length];
    reader.read_exact(&mut payload).await?;
    Ok(StreamHandshake::from_json(&payload)?)
}

pub async fn write_handshake<W: AsyncWrite + Unpin>(writer: &mut W, handshake: &StreamHandshake) -> Result<()> {
    writer.write_all(&encode_handshake(handshake)).await?;
    Ok(())
}

/// Read one frame; a bad size is fatal for the connection
pub async fn read_frame<R: AsyncRead + Unpin>(reader: &mut R) -> Result<MediaPacket> {
    let mut header = [0u8; PacketHeader::SIZE];
    reader.read_exact(&mut header).await?;
    let header = PacketHeader::decode(&header)?;

    let mut payload = vec![0u8; header.payload_len()?];
    reader.read_exact(&mut payload).await?;
    Ok(MediaPacket::from_header(header, Bytes::from(payload))?)
}

pub async fn write_frame<W: AsyncWrite + Unpin>(writer: &mut W, packet: &MediaPacket) -> Result<()> {
    writer.write_all(&packet.header().encode()).await?;
    writer.write_all(&packet.payload).await?;
    Ok(())
}
