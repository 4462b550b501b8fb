//! In-game player state.
//!
//! A `Player` owns its connection (socket-backed in production, in-memory in
//! tests) and everything the game tracks about the person behind it: pings,
//! download progress, sync counters, the GProxy resume buffer and the
//! leave bookkeeping that later becomes a database row.

use std::collections::VecDeque;
use std::net::{IpAddr, Ipv4Addr};
use std::time::Instant;

use arbiter_protocol::{Encode, Packet, PacketEncoder};
use bytes::BytesMut;
use tracing::debug;

use crate::net::{PlayerConnection, ReceivedPacket};

/// Cap on buffered outgoing frames kept for GProxy resume.
const GPROXY_MAX_RESEND_BYTES: usize = 262_144;

/// Ping samples kept for averaging.
const MAX_PING_SAMPLES: usize = 4;

pub struct Player {
    pub pid: u8,
    pub name: String,
    pub ip: IpAddr,
    /// Realm the client claimed to come from when joining; empty for LAN.
    pub joined_realm: String,

    pub spoofed: bool,
    pub spoofed_realm: String,
    pub reserved: bool,
    pub muted: bool,
    pub authenticated: bool,
    pub kick_vote: bool,

    pub delete_me: bool,
    pub left_reason: String,
    pub left_code: u32,
    /// Socket gone, but a GProxy client may still come back.
    pub disconnected: bool,
    /// The game reacted to the disconnect (chat notice, leave staging).
    pub(crate) disconnect_handled: bool,

    // map transfer
    pub download_allowed: bool,
    pub download_started: bool,
    pub download_finished: bool,
    pub last_map_part_sent: u32,
    pub last_map_part_acked: u32,
    pub started_download_at: Option<Instant>,

    // loading
    pub finished_loading: bool,
    pub(crate) loading_started_at: Option<Instant>,
    pub(crate) loading_time_ms: u64,

    // reliable reconnect
    pub gproxy: bool,
    pub reconnect_key: u32,
    gproxy_buffer: VecDeque<BytesMut>,
    gproxy_buffer_bytes: usize,
    /// Frames sent since the session began; the resume sequence space.
    pub total_frames_sent: u32,

    // in-game sync
    pub sync_counter: u32,
    pub(crate) checksums: VecDeque<u32>,
    pub lagging: bool,
    pub(crate) started_lagging_at: Option<Instant>,

    pub(crate) stats_sent_at: Option<Instant>,
    pub(crate) stats_dota_sent_at: Option<Instant>,
    pub(crate) joined_at: Instant,

    pings: Vec<u32>,
    conn: Box<dyn PlayerConnection>,
    enc: PacketEncoder,
}

impl Player {
    pub fn new(conn: Box<dyn PlayerConnection>, pid: u8, name: String, reserved: bool) -> Self {
        let ip = conn.ip();

        Self {
            pid,
            name,
            ip,
            joined_realm: String::new(),
            spoofed: false,
            spoofed_realm: String::new(),
            reserved,
            muted: false,
            authenticated: false,
            kick_vote: false,
            delete_me: false,
            left_reason: String::new(),
            left_code: arbiter_protocol::packets::leave_code::LOBBY,
            disconnected: false,
            disconnect_handled: false,
            download_allowed: false,
            download_started: false,
            download_finished: false,
            last_map_part_sent: 0,
            last_map_part_acked: 0,
            started_download_at: None,
            finished_loading: false,
            loading_started_at: None,
            loading_time_ms: 0,
            gproxy: false,
            reconnect_key: 0,
            gproxy_buffer: VecDeque::new(),
            gproxy_buffer_bytes: 0,
            total_frames_sent: 0,
            sync_counter: 0,
            checksums: VecDeque::new(),
            lagging: false,
            started_lagging_at: None,
            stats_sent_at: None,
            stats_dota_sent_at: None,
            joined_at: Instant::now(),
            pings: Vec::new(),
            conn,
            enc: PacketEncoder::new(),
        }
    }

    /// The address in dotted form, for ban records and country lookups.
    pub fn ip_string(&self) -> String {
        self.ip.to_string()
    }

    /// The address as a host-order integer, for the ip-to-country index.
    pub fn ip_u32(&self) -> u32 {
        match self.ip {
            IpAddr::V4(v4) => u32::from(v4),
            IpAddr::V6(_) => u32::from(Ipv4Addr::UNSPECIFIED),
        }
    }

    /// Sends one game frame, routing it through the resume buffer when the
    /// peer negotiated GProxy.
    pub fn send_packet<P>(&mut self, pkt: &P)
    where
        P: Packet + Encode,
    {
        if let Err(e) = self.enc.append_packet(pkt) {
            debug!("[{}] failed to encode '{}': {e:#}", self.name, P::NAME);
            return;
        }

        let bytes = self.enc.take();
        self.send_frame(bytes);
    }

    /// Sends pre-framed bytes as one game frame.
    pub fn send_frame(&mut self, bytes: BytesMut) {
        self.total_frames_sent = self.total_frames_sent.wrapping_add(1);

        if self.gproxy {
            self.gproxy_buffer_bytes += bytes.len();
            self.gproxy_buffer.push_back(bytes.clone());

            while self.gproxy_buffer_bytes > GPROXY_MAX_RESEND_BYTES {
                if let Some(dropped) = self.gproxy_buffer.pop_front() {
                    self.gproxy_buffer_bytes -= dropped.len();
                } else {
                    break;
                }
            }
        }

        if self.disconnected {
            return;
        }

        if self.conn.try_send(bytes).is_err() {
            self.disconnected = true;
        }
    }

    /// Sends a control frame that must not enter the resume sequence space
    /// (the GProxy handshake itself).
    pub fn send_control_packet<P>(&mut self, pkt: &P)
    where
        P: Packet + Encode,
    {
        if let Err(e) = self.enc.append_packet(pkt) {
            debug!("[{}] failed to encode '{}': {e:#}", self.name, P::NAME);
            return;
        }

        let bytes = self.enc.take();

        if !self.disconnected && self.conn.try_send(bytes).is_err() {
            self.disconnected = true;
        }
    }

    /// Drains every frame the connection has produced. A dead socket sets
    /// [`disconnected`](Self::disconnected) for the game to notice.
    pub fn pull_packets(&mut self) -> Vec<ReceivedPacket> {
        let mut packets = Vec::new();

        if self.disconnected {
            return packets;
        }

        loop {
            match self.conn.try_recv() {
                Ok(Some(packet)) => packets.push(packet),
                Ok(None) => return packets,
                Err(_) => {
                    self.disconnected = true;
                    return packets;
                }
            }
        }
    }

    pub fn mark_left(&mut self, reason: String, code: u32) {
        self.delete_me = true;
        self.left_reason = reason;
        self.left_code = code;
    }

    // ---- pings -----------------------------------------------------------

    pub fn add_ping(&mut self, ms: u32) {
        self.pings.push(ms);

        if self.pings.len() > MAX_PING_SAMPLES {
            self.pings.remove(0);
        }
    }

    pub fn num_pings(&self) -> usize {
        self.pings.len()
    }

    /// Average round trip. Without `lc_pings` the value is halved, matching
    /// what the game client displays.
    pub fn ping(&self, lc_pings: bool) -> u32 {
        if self.pings.is_empty() {
            return 0;
        }

        let avg = self.pings.iter().sum::<u32>() / self.pings.len() as u32;

        if lc_pings {
            avg
        } else {
            avg / 2
        }
    }

    // ---- reliable reconnect ---------------------------------------------

    /// Enables buffering for this session.
    pub fn enable_gproxy(&mut self, reconnect_key: u32) {
        self.gproxy = true;
        self.reconnect_key = reconnect_key;
    }

    /// Sequence number of the newest frame no longer in the buffer.
    fn acked_prefix(&self) -> u32 {
        self.total_frames_sent - self.gproxy_buffer.len() as u32
    }

    /// Client acknowledged everything up to `last_packet`; drop those frames.
    pub fn gproxy_ack(&mut self, last_packet: u32) {
        while self.acked_prefix() < last_packet {
            match self.gproxy_buffer.pop_front() {
                Some(frame) => self.gproxy_buffer_bytes -= frame.len(),
                None => break,
            }
        }
    }

    /// Absorbs a fresh socket and replays every buffered frame the client
    /// has not seen. Frames the client claims beyond our buffer are simply
    /// not replayed.
    pub fn absorb_connection(&mut self, mut conn: Box<dyn PlayerConnection>, last_packet: u32) {
        let prefix = self.acked_prefix();

        for (i, frame) in self.gproxy_buffer.iter().enumerate() {
            let seq = prefix + i as u32 + 1;

            if seq > last_packet && conn.try_send(frame.clone()).is_err() {
                break;
            }
        }

        self.conn = conn;
        self.disconnected = false;
        self.disconnect_handled = false;
    }

    /// Frames currently held for resume; used by the lag bookkeeping.
    pub fn gproxy_buffered(&self) -> usize {
        self.gproxy_buffer.len()
    }
}

impl std::fmt::Debug for Player {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Player")
            .field("pid", &self.pid)
            .field("name", &self.name)
            .field("spoofed", &self.spoofed)
            .field("delete_me", &self.delete_me)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tests::util::MockConnection;

    fn buffered_player() -> (Player, MockConnection) {
        let conn = MockConnection::new();
        let mut player = Player::new(Box::new(conn.clone()), 2, "Varlock".to_owned(), false);
        player.enable_gproxy(0xDEADBEEF);
        (player, conn)
    }

    #[test]
    fn ping_averaging() {
        let conn = MockConnection::new();
        let mut player = Player::new(Box::new(conn.clone()), 2, "P".to_owned(), false);

        player.add_ping(100);
        player.add_ping(200);
        assert_eq!(player.ping(true), 150);
        assert_eq!(player.ping(false), 75);

        for ms in [10, 10, 10, 10, 10] {
            player.add_ping(ms);
        }
        // Only the last four samples count.
        assert_eq!(player.ping(true), 10);
    }

    #[test]
    fn ack_trims_resume_buffer() {
        let (mut player, _conn) = buffered_player();

        for i in 0..5u32 {
            player.send_frame(BytesMut::from(&i.to_le_bytes()[..]));
        }

        assert_eq!(player.gproxy_buffered(), 5);

        player.gproxy_ack(3);
        assert_eq!(player.gproxy_buffered(), 2);

        // Repeating the same ack is a no-op.
        player.gproxy_ack(3);
        assert_eq!(player.gproxy_buffered(), 2);
    }

    #[test]
    fn absorb_replays_only_unseen_frames() {
        let (mut player, _old) = buffered_player();

        for i in 1..=6u32 {
            player.send_frame(BytesMut::from(&i.to_le_bytes()[..]));
        }

        let replacement = MockConnection::new();
        player.absorb_connection(Box::new(replacement.clone()), 4);

        let sent = replacement.take_sent();
        assert_eq!(sent.len(), 8); // frames 5 and 6, four bytes each
        assert_eq!(&sent[..4], &5u32.to_le_bytes());
        assert_eq!(&sent[4..], &6u32.to_le_bytes());
        assert!(!player.disconnected);
    }

    #[test]
    fn identical_resume_requests_replay_identically() {
        let (mut player, _old) = buffered_player();

        for i in 1..=4u32 {
            player.send_frame(BytesMut::from(&i.to_le_bytes()[..]));
        }

        let first = MockConnection::new();
        player.absorb_connection(Box::new(first.clone()), 2);
        let first_sent = first.take_sent();

        let second = MockConnection::new();
        player.absorb_connection(Box::new(second.clone()), 2);
        let second_sent = second.take_sent();

        assert_eq!(first_sent, second_sent);
    }
}
