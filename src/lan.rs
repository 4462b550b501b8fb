//! UDP game discovery.
//!
//! Lobbies are advertised to the local network with `W3GS_GAMEINFO`
//! datagrams aimed at the configured broadcast target, plus create/decreate
//! notices on lifecycle edges. `!sendlan` reuses the same socket for
//! targeted announcements.

use std::net::{Ipv4Addr, SocketAddr};

use arbiter_protocol::encode::encode_packet;
use arbiter_protocol::{Encode, Packet};
use tracing::{debug, warn};

pub const LAN_PORT: u16 = 6112;

pub struct LanBroadcaster {
    socket: Option<tokio::net::UdpSocket>,
    target: SocketAddr,
}

impl LanBroadcaster {
    /// Binds the broadcast socket. A bind failure disables LAN discovery
    /// rather than taking the process down.
    pub fn new(broadcast_target: &str, dont_route: bool) -> Self {
        let target_ip: Ipv4Addr = broadcast_target.parse().unwrap_or(Ipv4Addr::BROADCAST);
        let target = SocketAddr::from((target_ip, LAN_PORT));

        let socket = match bind_broadcast_socket(dont_route) {
            Ok(socket) => Some(socket),
            Err(e) => {
                warn!("failed to bind UDP broadcast socket, LAN discovery disabled: {e}");
                None
            }
        };

        Self { socket, target }
    }

    /// A broadcaster with no socket; used by the tests.
    pub fn disabled() -> Self {
        Self {
            socket: None,
            target: SocketAddr::from((Ipv4Addr::BROADCAST, LAN_PORT)),
        }
    }

    pub fn broadcast<P>(&self, pkt: &P)
    where
        P: Packet + Encode,
    {
        self.send_to(self.target, pkt);
    }

    pub fn send_to<P>(&self, target: SocketAddr, pkt: &P)
    where
        P: Packet + Encode,
    {
        let Some(socket) = &self.socket else {
            return;
        };

        let bytes = match encode_packet(pkt) {
            Ok(bytes) => bytes,
            Err(e) => {
                warn!("failed to encode '{}' datagram: {e:#}", P::NAME);
                return;
            }
        };

        if let Err(e) = socket.try_send_to(&bytes, target) {
            debug!("failed to send '{}' to {target}: {e}", P::NAME);
        }
    }
}

fn bind_broadcast_socket(dont_route: bool) -> std::io::Result<tokio::net::UdpSocket> {
    let socket = socket2::Socket::new(
        socket2::Domain::IPV4,
        socket2::Type::DGRAM,
        Some(socket2::Protocol::UDP),
    )?;

    socket.set_broadcast(true)?;
    socket.bind(&SocketAddr::from((Ipv4Addr::UNSPECIFIED, 0)).into())?;
    socket.set_nonblocking(true)?;

    if dont_route {
        // SO_DONTROUTE: keep discovery datagrams on-link.
        set_dontroute(&socket)?;
    }

    tokio::net::UdpSocket::from_std(socket.into())
}

#[cfg(unix)]
fn set_dontroute(socket: &socket2::Socket) -> std::io::Result<()> {
    use std::os::fd::AsRawFd;

    // socket2 exposes no SO_DONTROUTE setter; set the raw option.
    let on: libc::c_int = 1;
    let rc = unsafe {
        libc::setsockopt(
            socket.as_raw_fd(),
            libc::SOL_SOCKET,
            libc::SO_DONTROUTE,
            std::ptr::addr_of!(on).cast(),
            std::mem::size_of::<libc::c_int>() as libc::socklen_t,
        )
    };

    if rc == 0 {
        Ok(())
    } else {
        Err(std::io::Error::last_os_error())
    }
}

#[cfg(not(unix))]
fn set_dontroute(_socket: &socket2::Socket) -> std::io::Result<()> {
    Ok(())
}
