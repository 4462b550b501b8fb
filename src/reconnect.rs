//! The GProxy reconnect sidechannel listener.
//!
//! Each accepted socket gets ten seconds to produce one well-formed
//! `RECONNECT` frame; a per-socket task does that read and hands the result
//! (or the malformed verdict) back to the reactor, which matches it against
//! the running games and either lets the player absorb the socket or writes
//! a `REJECT` and closes.

use std::net::SocketAddr;
use std::time::Duration;

use arbiter_protocol::encode::encode_packet;
use arbiter_protocol::{gproxy, PacketDecoder};
use bytes::BytesMut;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tracing::{debug, info, warn};

use crate::net::Listener;

const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(10);

/// What one accepted socket produced.
pub struct ReconnectAttempt {
    pub stream: TcpStream,
    pub addr: SocketAddr,
    /// `None` means the peer sent something other than a valid RECONNECT
    /// frame and must be rejected as invalid.
    pub request: Option<gproxy::Reconnect>,
}

pub struct ReconnectListener {
    pub enabled: bool,
    port: u16,
    bind_address: String,
    listener: Option<Listener>,
    attempts_tx: flume::Sender<ReconnectAttempt>,
    attempts_rx: flume::Receiver<ReconnectAttempt>,
}

impl ReconnectListener {
    pub fn new(enabled: bool, bind_address: String, port: u16) -> Self {
        let (attempts_tx, attempts_rx) = flume::unbounded();

        Self {
            enabled,
            port,
            bind_address,
            listener: None,
            attempts_tx,
            attempts_rx,
        }
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    /// Ensures the listener is bound; a bind failure disables reconnects.
    pub fn ensure_listening(&mut self) {
        if !self.enabled || self.listener.is_some() {
            return;
        }

        match Listener::bind(&self.bind_address, self.port, "reconnect") {
            Ok(listener) => {
                info!("listening for GProxy++ reconnects on port {}", self.port);
                self.listener = Some(listener);
            }
            Err(e) => {
                warn!("{e}, GProxy++ reconnects disabled");
                self.enabled = false;
            }
        }
    }

    /// Accepts sockets and spawns their handshake tasks.
    pub fn update(&mut self) {
        let Some(listener) = &self.listener else {
            return;
        };

        while let Some((stream, addr)) = listener.try_accept() {
            let attempts = self.attempts_tx.clone();

            tokio::spawn(async move {
                let attempt = read_reconnect_frame(stream, addr).await;

                if let Some(attempt) = attempt {
                    let _ = attempts.send(attempt);
                }
            });
        }
    }

    /// Handshakes completed since the last tick.
    pub fn try_next_attempt(&self) -> Option<ReconnectAttempt> {
        self.attempts_rx.try_recv().ok()
    }
}

/// Writes a `REJECT` frame and lets the socket close.
pub fn reject(mut stream: TcpStream, reason: u32) {
    tokio::spawn(async move {
        if let Ok(bytes) = encode_packet(&gproxy::Reject { reason }) {
            let _ = stream.write_all(&bytes).await;
            let _ = stream.shutdown().await;
        }
    });
}

async fn read_reconnect_frame(mut stream: TcpStream, addr: SocketAddr) -> Option<ReconnectAttempt> {
    let mut dec = PacketDecoder::new();
    let mut buf = BytesMut::new();

    let result = tokio::time::timeout(HANDSHAKE_TIMEOUT, async {
        loop {
            match dec.try_next_packet() {
                Ok(Some(frame)) => {
                    let request = frame.decode::<gproxy::Reconnect>().ok();
                    return Some(request);
                }
                Ok(None) => {
                    buf.reserve(16);
                    match stream.read_buf(&mut buf).await {
                        Ok(0) => return None,
                        Ok(_) => dec.queue_bytes(buf.split()),
                        Err(_) => return None,
                    }
                }
                // Bad header byte or garbage length: reject as invalid.
                Err(_) => return Some(None),
            }
        }
    })
    .await;

    match result {
        Ok(Some(request)) => Some(ReconnectAttempt {
            stream,
            addr,
            request,
        }),
        Ok(None) => None,
        Err(_) => {
            debug!("reconnect socket from {addr} timed out before sending a frame");
            None
        }
    }
}
