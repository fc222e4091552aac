//! Connection session
//!
//! Owns one TCP connection: handshake exchange, framed reads and framed
//! writes. Reads come from a single task; writes may come from the data task
//! and the keep-alive task at once, so every write goes out under one lock as
//! an indivisible unit.

use parking_lot::Mutex;
use socket2::SockRef;
use std::io::{ErrorKind, Read, Write};
use std::net::{Shutdown, SocketAddr, TcpStream, ToSocketAddrs};
use std::sync::atomic::{AtomicU8, Ordering};

use bytes::Bytes;

use crate::config::NetworkConfig;
use crate::constants::KEEP_ALIVE_BYTE;
use crate::error::{Error, NetworkError};
use crate::protocol::{encode_handshake, handshake_length, MediaPacket, PacketHeader, StreamHandshake};

/// Lifecycle of a session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum SessionState {
    Active = 0,
    Stopping = 1,
    Closed = 2,
}

impl SessionState {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => SessionState::Active,
            1 => SessionState::Stopping,
            _ => SessionState::Closed,
        }
    }
}

/// One TCP connection speaking the framing protocol
pub struct Session {
    reader: Mutex<TcpStream>,
    writer: Mutex<TcpStream>,
    peer: SocketAddr,
    state: AtomicU8,
}

impl Session {
    /// Resolve `host` and connect
    ///
    /// No retry: a failed connect is fatal for the caller's session.
    pub fn connect(host: &str, port: u16, config: &NetworkConfig) -> Result<Self, NetworkError> {
        let addrs: Vec<SocketAddr> = (host, port)
            .to_socket_addrs()
            .map_err(|e| NetworkError::Unreachable(format!("{}: {}", host, e)))?
            .collect();

        if addrs.is_empty() {
            return Err(NetworkError::Unreachable(format!("{}: no addresses", host)));
        }

        let mut last_error = None;
        for addr in &addrs {
            let attempt = match config.connect_timeout() {
                Some(timeout) => TcpStream::connect_timeout(addr, timeout),
                None => TcpStream::connect(addr),
            };
            match attempt {
                Ok(stream) => {
                    tracing::info!("Connected to {} ({})", addr, host);
                    return Self::from_stream(stream, config).map_err(NetworkError::from);
                }
                Err(e) => {
                    tracing::debug!("Connect to {} failed: {}", addr, e);
                    last_error = Some(e);
                }
            }
        }

        Err(NetworkError::ConnectFailed(format!(
            "{}:{}: {}",
            host,
            port,
            last_error.map(|e| e.to_string()).unwrap_or_default()
        )))
    }

    /// Wrap an already connected stream (accepted socket or test pair)
    pub fn from_stream(stream: TcpStream, config: &NetworkConfig) -> std::io::Result<Self> {
        let socket = SockRef::from(&stream);
        socket.set_nodelay(config.tcp_nodelay)?;
        if let Some(size) = config.send_buffer_size {
            socket.set_send_buffer_size(size)?;
        }
        if let Some(size) = config.recv_buffer_size {
            socket.set_recv_buffer_size(size)?;
        }

        let peer = stream.peer_addr()?;
        let reader = stream.try_clone()?;
        Ok(Self {
            reader: Mutex::new(reader),
            writer: Mutex::new(stream),
            peer,
            state: AtomicU8::new(SessionState::Active as u8),
        })
    }

    pub fn peer_addr(&self) -> SocketAddr {
        self.peer
    }

    pub fn state(&self) -> SessionState {
        SessionState::from_u8(self.state.load(Ordering::Acquire))
    }

    pub fn is_active(&self) -> bool {
        self.state() == SessionState::Active
    }

    /// Ask the session's tasks to wind down
    pub fn mark_stopping(&self) {
        let _ = self.state.compare_exchange(
            SessionState::Active as u8,
            SessionState::Stopping as u8,
            Ordering::AcqRel,
            Ordering::Acquire,
        );
    }

    /// Shut the socket down both ways; unblocks a pending read
    ///
    /// Idempotent.
    pub fn close(&self) {
        let previous = self.state.swap(SessionState::Closed as u8, Ordering::AcqRel);
        if previous == SessionState::Closed as u8 {
            return;
        }
        // The reader clone shares the socket, so one shutdown covers both.
        if let Err(e) = SockRef::from(&*self.writer.lock()).shutdown(Shutdown::Both) {
            tracing::debug!("Shutdown of {} failed: {}", self.peer, e);
        }
        tracing::info!("Session with {} closed", self.peer);
    }

    /// Send the length-prefixed handshake
    pub fn send_handshake(&self, handshake: &StreamHandshake) -> Result<(), NetworkError> {
        let buf = encode_handshake(handshake);
        self.write_unit(&[&buf])?;
        tracing::debug!(
            "Sent handshake to {}: {}",
            self.peer,
            String::from_utf8_lossy(&buf[4..])
        );
        Ok(())
    }

    /// Receive the peer's handshake
    pub fn recv_handshake(&self) -> Result<StreamHandshake, Error> {
        let mut reader = self.reader.lock();

        let mut prefix = [0u8; 4];
        read_exact(&mut *reader, &mut prefix)?;
        let length = handshake_length(prefix)?;

        let mut payload = vec![0u8; length];
        read_exact(&mut *reader, &mut payload)?;
        drop(reader);

        tracing::debug!(
            "Received handshake from {}: {}",
            self.peer,
            String::from_utf8_lossy(&payload)
        );
        Ok(StreamHandshake::from_json(&payload)?)
    }

    /// Write one frame (header and payload as a single unit)
    pub fn write_frame(&self, packet: &MediaPacket) -> Result<(), NetworkError> {
        let header = packet.header().encode();
        self.write_unit(&[&header, &packet.payload])
    }

    /// Read one frame
    ///
    /// Any error leaves the stream at an unknown offset; the session is dead.
    pub fn read_frame(&self) -> Result<MediaPacket, Error> {
        let mut reader = self.reader.lock();

        let mut header_bytes = [0u8; PacketHeader::SIZE];
        read_exact(&mut *reader, &mut header_bytes)?;
        let header = PacketHeader::decode(&header_bytes)?;
        let len = header.payload_len()?;

        let mut payload = vec![0u8; len];
        read_exact(&mut *reader, &mut payload)?;
        drop(reader);

        Ok(MediaPacket::from_header(header, Bytes::from(payload))?)
    }

    /// Write the single-byte liveness probe
    pub fn write_keep_alive(&self) -> Result<(), NetworkError> {
        self.write_unit(&[&[KEEP_ALIVE_BYTE]])
    }

    /// Independent handle on the underlying socket
    #[cfg(test)]
    pub(crate) fn raw_stream(&self) -> std::io::Result<TcpStream> {
        self.writer.lock().try_clone()
    }

    fn write_unit(&self, parts: &[&[u8]]) -> Result<(), NetworkError> {
        if self.state() == SessionState::Closed {
            return Err(NetworkError::SessionClosed);
        }
        let mut writer = self.writer.lock();
        for part in parts {
            write_exact(&mut *writer, part)?;
        }
        Ok(())
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        self.close();
    }
}

/// Read exactly `buf.len()` bytes or fail
pub fn read_exact(reader: &mut impl Read, buf: &mut [u8]) -> Result<(), NetworkError> {
    let mut received = 0;
    while received < buf.len() {
        match reader.read(&mut buf[received..]) {
            Ok(0) => {
                return Err(NetworkError::ShortRead {
                    expected: buf.len(),
                    received,
                })
            }
            Ok(n) => received += n,
            Err(e) if e.kind() == ErrorKind::Interrupted => continue,
            Err(e) => return Err(NetworkError::Io(e)),
        }
    }
    Ok(())
}

/// Write exactly `buf.len()` bytes or fail
pub fn write_exact(writer: &mut impl Write, buf: &[u8]) -> Result<(), NetworkError> {
    let mut written = 0;
    while written < buf.len() {
        match writer.write(&buf[written..]) {
            Ok(0) => return Err(NetworkError::ShortWrite(buf.len() - written)),
            Ok(n) => written += n,
            Err(e) if e.kind() == ErrorKind::Interrupted => continue,
            Err(e) => return Err(NetworkError::Io(e)),
        }
    }
    Ok(())
}
