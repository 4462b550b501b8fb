//! Socket plumbing.
//!
//! Every accepted socket is split into a reader task and a writer task; the
//! reactor talks to the pair through channels and never blocks on I/O. Game
//! code only sees the [`PlayerConnection`] trait, which the test suite also
//! implements over in-memory buffers.

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::time::Instant;

use anyhow::bail;
use arbiter_protocol::PacketDecoder;
use bytes::{Bytes, BytesMut};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::error::Error;

const READ_BUF_SIZE: usize = 4096;

/// Upper bound on bytes queued towards one peer before sends start failing.
const OUTGOING_BYTE_LIMIT: usize = 8 * 1024 * 1024;

/// A frame received from a peer, timestamped at decode time.
#[derive(Clone, Debug)]
pub struct ReceivedPacket {
    pub timestamp: Instant,
    pub id: u8,
    pub body: Bytes,
}

/// The reactor-facing side of one player's socket.
pub trait PlayerConnection: Send {
    /// Queues framed bytes towards the peer. Fails when the peer is gone or
    /// the outgoing buffer limit is hit.
    fn try_send(&mut self, bytes: BytesMut) -> anyhow::Result<()>;

    /// Takes the next decoded frame, if one has arrived.
    fn try_recv(&mut self) -> anyhow::Result<Option<ReceivedPacket>>;

    /// The peer's address as seen by the listener.
    fn ip(&self) -> IpAddr;
}

mod byte_channel {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    use bytes::BytesMut;

    pub(super) enum TrySendError {
        Full,
        Disconnected,
    }

    /// An spsc byte pipe with a soft cap on queued bytes. The writer task
    /// credits bytes back as it drains them.
    pub(super) fn byte_channel(limit: usize) -> (ByteSender, ByteReceiver) {
        let (tx, rx) = flume::unbounded();
        let queued = Arc::new(AtomicUsize::new(0));

        (
            ByteSender {
                tx,
                queued: queued.clone(),
                limit,
            },
            ByteReceiver { rx, queued },
        )
    }

    pub(super) struct ByteSender {
        tx: flume::Sender<BytesMut>,
        queued: Arc<AtomicUsize>,
        limit: usize,
    }

    impl ByteSender {
        pub(super) fn try_send(&self, bytes: BytesMut) -> Result<(), TrySendError> {
            if self.queued.load(Ordering::Relaxed) + bytes.len() > self.limit {
                return Err(TrySendError::Full);
            }

            self.queued.fetch_add(bytes.len(), Ordering::Relaxed);
            self.tx.send(bytes).map_err(|_| TrySendError::Disconnected)
        }

        pub(super) fn limit(&self) -> usize {
            self.limit
        }
    }

    pub(super) struct ByteReceiver {
        rx: flume::Receiver<BytesMut>,
        queued: Arc<AtomicUsize>,
    }

    impl ByteReceiver {
        pub(super) async fn recv(&mut self) -> Option<BytesMut> {
            let bytes = self.rx.recv_async().await.ok()?;
            self.queued.fetch_sub(bytes.len(), Ordering::Relaxed);
            Some(bytes)
        }
    }
}

use byte_channel::{byte_channel, ByteSender, TrySendError};

/// A socket-backed [`PlayerConnection`]: a reader task decoding frames into
/// an unbounded channel and a writer task draining a byte channel.
pub struct TcpPlayerConnection {
    send: ByteSender,
    recv: flume::Receiver<ReceivedPacket>,
    ip: IpAddr,
    reader_task: JoinHandle<()>,
    writer_task: JoinHandle<()>,
}

impl TcpPlayerConnection {
    /// Splits `stream` into its I/O tasks. Must be called from within the
    /// runtime.
    pub fn spawn(stream: TcpStream, addr: SocketAddr) -> Self {
        if let Err(e) = stream.set_nodelay(true) {
            debug!("failed to set TCP_NODELAY: {e}");
        }

        let (mut reader, mut writer) = stream.into_split();
        let (incoming_tx, incoming_rx) = flume::unbounded();

        let reader_task = tokio::spawn(async move {
            let mut dec = PacketDecoder::new();
            let mut buf = BytesMut::new();

            loop {
                match dec.try_next_packet() {
                    Ok(Some(frame)) => {
                        let packet = ReceivedPacket {
                            timestamp: Instant::now(),
                            id: frame.id,
                            body: frame.body.freeze(),
                        };

                        if incoming_tx.send(packet).is_err() {
                            break;
                        }
                    }
                    Ok(None) => {
                        // Incomplete frame. Need more data.
                        buf.reserve(READ_BUF_SIZE);

                        match reader.read_buf(&mut buf).await {
                            Ok(0) => break, // Reader is at EOF.
                            Ok(_) => {}
                            Err(e) => {
                                debug!("error reading data from stream: {e}");
                                break;
                            }
                        }

                        dec.queue_bytes(buf.split());
                    }
                    Err(e) => {
                        warn!("error decoding frame: {e:#}");
                        break;
                    }
                }
            }
        });

        let (outgoing_tx, mut outgoing_rx) = byte_channel(OUTGOING_BYTE_LIMIT);

        let writer_task = tokio::spawn(async move {
            while let Some(bytes) = outgoing_rx.recv().await {
                if let Err(e) = writer.write_all(&bytes).await {
                    debug!("error writing data to stream: {e}");
                    break;
                }
            }
        });

        Self {
            send: outgoing_tx,
            recv: incoming_rx,
            ip: addr.ip(),
            reader_task,
            writer_task,
        }
    }
}

impl PlayerConnection for TcpPlayerConnection {
    fn try_send(&mut self, bytes: BytesMut) -> anyhow::Result<()> {
        match self.send.try_send(bytes) {
            Ok(()) => Ok(()),
            Err(TrySendError::Full) => bail!(
                "reached outgoing limit of {} bytes",
                self.send.limit()
            ),
            Err(TrySendError::Disconnected) => bail!("client disconnected"),
        }
    }

    fn try_recv(&mut self) -> anyhow::Result<Option<ReceivedPacket>> {
        match self.recv.try_recv() {
            Ok(packet) => Ok(Some(packet)),
            Err(flume::TryRecvError::Empty) => Ok(None),
            Err(flume::TryRecvError::Disconnected) => bail!("client disconnected"),
        }
    }

    fn ip(&self) -> IpAddr {
        self.ip
    }
}

impl Drop for TcpPlayerConnection {
    fn drop(&mut self) {
        self.writer_task.abort();
        self.reader_task.abort();
    }
}

/// A TCP accept task feeding the reactor through a channel.
pub struct Listener {
    port: u16,
    rx: flume::Receiver<(TcpStream, SocketAddr)>,
    task: JoinHandle<()>,
}

impl Listener {
    /// Binds synchronously (so the reactor learns about failures
    /// immediately) and spawns the accept task.
    pub fn bind(bind_address: &str, port: u16, what: &'static str) -> Result<Self, Error> {
        let ip: IpAddr = if bind_address.is_empty() {
            Ipv4Addr::UNSPECIFIED.into()
        } else {
            bind_address
                .parse()
                .map_err(|_| Error::ConfigInvalid(format!("bad bind address [{bind_address}]")))?
        };

        let std_listener = std::net::TcpListener::bind((ip, port)).map_err(|source| {
            Error::ListenerBindFailed { what, port, source }
        })?;

        std_listener
            .set_nonblocking(true)
            .map_err(|source| Error::ListenerBindFailed { what, port, source })?;

        let listener = TcpListener::from_std(std_listener)
            .map_err(|source| Error::ListenerBindFailed { what, port, source })?;

        let (tx, rx) = flume::bounded(64);

        let task = tokio::spawn(async move {
            loop {
                match listener.accept().await {
                    Ok(pair) => {
                        if tx.send_async(pair).await.is_err() {
                            return;
                        }
                    }
                    Err(e) => {
                        warn!("failed to accept incoming connection: {e}");
                    }
                }
            }
        });

        Ok(Self { port, rx, task })
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    /// Takes one accepted connection, if any.
    pub fn try_accept(&self) -> Option<(TcpStream, SocketAddr)> {
        self.rx.try_recv().ok()
    }
}

impl Drop for Listener {
    fn drop(&mut self) {
        self.task.abort();
    }
}

/// An un-framed socket pairing for the status broadcaster: raw inbound
/// chunks, raw outbound bytes.
pub struct RawConnection {
    send: ByteSender,
    recv: flume::Receiver<Bytes>,
    reader_task: JoinHandle<()>,
    writer_task: JoinHandle<()>,
    closed: bool,
}

impl RawConnection {
    pub fn spawn(stream: TcpStream) -> Self {
        let (mut reader, mut writer) = stream.into_split();
        let (incoming_tx, incoming_rx) = flume::unbounded();

        let reader_task = tokio::spawn(async move {
            let mut buf = BytesMut::new();

            loop {
                buf.reserve(READ_BUF_SIZE);

                match reader.read_buf(&mut buf).await {
                    Ok(0) => break,
                    Ok(_) => {
                        if incoming_tx.send(buf.split().freeze()).is_err() {
                            break;
                        }
                    }
                    Err(_) => break,
                }
            }
        });

        let (outgoing_tx, mut outgoing_rx) = byte_channel(OUTGOING_BYTE_LIMIT);

        let writer_task = tokio::spawn(async move {
            while let Some(bytes) = outgoing_rx.recv().await {
                if writer.write_all(&bytes).await.is_err() {
                    break;
                }
            }
        });

        Self {
            send: outgoing_tx,
            recv: incoming_rx,
            reader_task,
            writer_task,
            closed: false,
        }
    }

    pub fn try_send(&mut self, bytes: &[u8]) {
        if self
            .send
            .try_send(BytesMut::from(bytes))
            .is_err()
        {
            self.closed = true;
        }
    }

    pub fn try_recv(&mut self) -> Option<Bytes> {
        match self.recv.try_recv() {
            Ok(bytes) => Some(bytes),
            Err(flume::TryRecvError::Empty) => None,
            Err(flume::TryRecvError::Disconnected) => {
                self.closed = true;
                None
            }
        }
    }

    pub fn closed(&self) -> bool {
        self.closed
    }
}

impl Drop for RawConnection {
    fn drop(&mut self) {
        self.writer_task.abort();
        self.reader_task.abort();
    }
}

/// True for RFC 1918 and loopback addresses; used by the LAN-admin policy.
pub fn is_lan_ip(ip: IpAddr) -> bool {
    match ip {
        IpAddr::V4(v4) => v4.is_private() || v4.is_loopback() || v4.is_link_local(),
        IpAddr::V6(v6) => v6.is_loopback(),
    }
}

/// True when `ip` is one of the host machine's own addresses.
pub fn is_local_ip(ip: IpAddr, local_addresses: &[Ipv4Addr]) -> bool {
    match ip {
        IpAddr::V4(v4) => local_addresses.contains(&v4),
        IpAddr::V6(_) => false,
    }
}

/// Best-effort enumeration of the machine's own IPv4 addresses, used to
/// treat locally connected players as LAN.
pub fn local_addresses() -> Vec<Ipv4Addr> {
    // A connected UDP socket reveals the address the OS would route from.
    // Portable, no interface enumeration needed.
    let mut found = vec![Ipv4Addr::LOCALHOST];

    if let Ok(socket) = std::net::UdpSocket::bind("0.0.0.0:0") {
        if socket.connect("255.255.255.255:6112").is_ok() {
            if let Ok(SocketAddr::V4(local)) = socket.local_addr() {
                found.push(*local.ip());
            }
        }
    }

    found.dedup();
    found
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lan_detection() {
        assert!(is_lan_ip("192.168.1.15".parse().unwrap()));
        assert!(is_lan_ip("10.0.0.3".parse().unwrap()));
        assert!(is_lan_ip("127.0.0.1".parse().unwrap()));
        assert!(!is_lan_ip("8.8.8.8".parse().unwrap()));
    }

    #[test]
    fn local_ip_matches_list() {
        let locals = vec![Ipv4Addr::new(203, 0, 113, 9)];
        assert!(is_local_ip("203.0.113.9".parse().unwrap(), &locals));
        assert!(!is_local_ip("203.0.113.10".parse().unwrap(), &locals));
    }
}
