//! Test fixtures: an in-memory player connection and a host context over
//! in-memory databases, so games can be driven without sockets.

use std::collections::VecDeque;
use std::io::Write;
use std::net::{IpAddr, Ipv4Addr};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use arbiter_lang::Language;
use arbiter_protocol::encode::encode_packet;
use arbiter_protocol::packets::c2s;
use arbiter_protocol::{Encode, Packet, PacketDecoder, PacketFrame, RawBytes, HEADER_SIZE};
use bytes::{Bytes, BytesMut};

use crate::config::BotConfig;
use crate::db::{Callable, Database, IpToCountry};
use crate::game::Game;
use crate::host::{HostCtx, HostSettings};
use crate::lan::LanBroadcaster;
use crate::map::Map;
use crate::net::{PlayerConnection, ReceivedPacket};
use crate::realm::Realm;

/// An in-memory connection. Safe to clone; clones share the same buffers.
#[derive(Clone)]
pub(crate) struct MockConnection {
    inner: Arc<Mutex<MockConnectionInner>>,
}

struct MockConnectionInner {
    recv: VecDeque<ReceivedPacket>,
    sent: BytesMut,
    ip: IpAddr,
    dead: bool,
}

impl MockConnection {
    pub(crate) fn new() -> Self {
        Self::with_ip(IpAddr::V4(Ipv4Addr::new(127, 0, 0, 1)))
    }

    pub(crate) fn with_ip(ip: IpAddr) -> Self {
        Self {
            inner: Arc::new(Mutex::new(MockConnectionInner {
                recv: VecDeque::new(),
                sent: BytesMut::new(),
                ip,
                dead: false,
            })),
        }
    }

    /// Injects a frame as if the client sent it.
    pub(crate) fn inject<P>(&self, pkt: &P)
    where
        P: Packet + Encode,
    {
        let bytes = encode_packet(pkt).expect("failed to encode injected packet");

        self.inner
            .lock()
            .unwrap()
            .recv
            .push_back(ReceivedPacket {
                timestamp: Instant::now(),
                id: P::ID,
                body: Bytes::copy_from_slice(&bytes[HEADER_SIZE..]),
            });
    }

    /// Everything the host sent since the last call, raw.
    pub(crate) fn take_sent(&self) -> BytesMut {
        self.inner.lock().unwrap().sent.split()
    }

    /// Everything the host sent since the last call, reframed.
    pub(crate) fn collect_sent(&self) -> Vec<PacketFrame> {
        let mut dec = PacketDecoder::new();
        dec.queue_bytes(self.take_sent());

        let mut frames = vec![];

        while let Some(frame) = dec.try_next_packet().expect("bad frame from host") {
            frames.push(frame);
        }

        frames
    }

    /// Simulates the socket dying.
    pub(crate) fn kill(&self) {
        self.inner.lock().unwrap().dead = true;
    }
}

impl PlayerConnection for MockConnection {
    fn try_send(&mut self, bytes: BytesMut) -> anyhow::Result<()> {
        let mut inner = self.inner.lock().unwrap();

        if inner.dead {
            anyhow::bail!("client disconnected");
        }

        inner.sent.unsplit(bytes);
        Ok(())
    }

    fn try_recv(&mut self) -> anyhow::Result<Option<ReceivedPacket>> {
        let mut inner = self.inner.lock().unwrap();

        if inner.dead {
            anyhow::bail!("client disconnected");
        }

        Ok(inner.recv.pop_front())
    }

    fn ip(&self) -> IpAddr {
        self.inner.lock().unwrap().ip
    }
}

/// Owns everything a [`HostCtx`] borrows.
pub(crate) struct TestCtx {
    pub(crate) cfg: BotConfig,
    pub(crate) settings: HostSettings,
    pub(crate) lang: Language,
    pub(crate) db: Database,
    pub(crate) db_local: Database,
    pub(crate) ip_to_country: IpToCountry,
    pub(crate) realms: Vec<Realm>,
    pub(crate) udp: LanBroadcaster,
    pub(crate) host_counter: u32,
    pub(crate) local_addresses: Vec<Ipv4Addr>,
    pub(crate) orphans: Vec<Callable<u32>>,
}

impl TestCtx {
    pub(crate) fn new() -> Self {
        Self::with_config(BotConfig::default())
    }

    pub(crate) fn with_config(cfg: BotConfig) -> Self {
        Self {
            settings: HostSettings::from_config(&cfg),
            cfg,
            lang: Language::default(),
            db: Database::open_in_memory("primary").unwrap(),
            db_local: Database::open_in_memory("local").unwrap(),
            ip_to_country: IpToCountry::default(),
            realms: Vec::new(),
            udp: LanBroadcaster::disabled(),
            host_counter: 1,
            local_addresses: vec![],
            orphans: Vec::new(),
        }
    }

    pub(crate) fn ctx(&mut self) -> HostCtx<'_> {
        HostCtx {
            cfg: &self.cfg,
            settings: &mut self.settings,
            lang: &self.lang,
            db: &self.db,
            db_local: &self.db_local,
            ip_to_country: &self.ip_to_country,
            realms: &mut self.realms,
            udp: &self.udp,
            host_counter: &mut self.host_counter,
            local_addresses: &self.local_addresses,
            reconnect_enabled: true,
            reconnect_port: 6114,
            orphan_callables: &mut self.orphans,
        }
    }
}

pub(crate) fn test_map() -> Map {
    let toml = r#"
        map_path = 'Maps\Download\DotA v6.83d.w3x'
        map_size = 7233127
        map_info = 1124145
        map_crc = 3835746533
        map_sha1 = [
            133, 26, 94, 172, 16, 29, 66, 12, 202, 96,
            13, 50, 8, 44, 180, 205, 92, 9, 99, 121,
        ]
        map_options = 96
        map_num_players = 10
        map_num_teams = 2
        slots = [
            { team = 0, colour = 0 },
            { team = 0, colour = 1 },
            { team = 0, colour = 2 },
            { team = 0, colour = 3 },
            { team = 0, colour = 4 },
            { team = 1, colour = 6 },
            { team = 1, colour = 7 },
            { team = 1, colour = 8 },
            { team = 1, colour = 9 },
            { team = 1, colour = 10 },
        ]
    "#;

    // Tests run concurrently; every call gets its own file.
    let mut file = tempfile::NamedTempFile::new().unwrap();
    file.write_all(toml.as_bytes()).unwrap();

    let map = Map::load(file.path()).unwrap();
    assert!(map.valid());
    map
}

pub(crate) fn make_game(harness: &TestCtx) -> Game {
    Game::new(
        std::sync::Arc::new(test_map()),
        &harness.cfg,
        1,
        crate::realm::GAME_PUBLIC,
        "Test Game".to_owned(),
        "Owner".to_owned(),
        "Creator".to_owned(),
        String::new(),
        None,
    )
}

/// Joins a named player through the real handshake path and returns its
/// connection. Panics if the join was rejected.
pub(crate) fn join_player(game: &mut Game, harness: &mut TestCtx, name: &str) -> MockConnection {
    let conn = MockConnection::new();

    conn.inject(&c2s::ReqJoin {
        host_counter: game.host_counter,
        entry_key: 0,
        unknown: 0,
        listen_port: 6112,
        peer_key: 0,
        name,
        remainder: RawBytes(&[]),
    });

    game.add_joiner(Box::new(conn.clone()));
    game.update(&mut harness.ctx());

    assert!(
        game.player_from_name(name).is_some(),
        "player {name} failed to join"
    );

    conn
}

/// Rewinds a game timer so the next update fires a timed action without
/// sleeping.
pub(crate) fn rewind(instant: &mut Instant, by: Duration) {
    *instant = Instant::now() - by;
}
