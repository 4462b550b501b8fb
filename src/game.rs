//! One hosted game, from lobby to teardown.
//!
//! A `Game` owns its lobby listener, its players and its slot table, and is
//! driven by [`Game::update`] from the host reactor every tick. All protocol
//! events funnel through the `event_*` methods; the phase machine is
//! `lobby → counting_down → loading → loaded → over`, with `lobby` the only
//! re-enterable state (countdown abort).

pub mod player;
pub mod slot;

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::{Duration, Instant};

use arbiter_protocol::packets::{c2s, leave_code, reject_join, s2c, MAP_PART_SIZE};
use arbiter_protocol::slot::{SlotData, SlotInfo, DOWNLOAD_STATUS_NONE, SLOT_STATUS_OCCUPIED};
use arbiter_protocol::{gproxy, AddrBlob, Decode, Packet, RawBytes};
use bytes::Bytes;
use rand::Rng;
use tracing::{info, warn};

use crate::command;
use crate::config::BotConfig;
use crate::db::{Callable, DbBan, DbGamePlayer, DotaPlayerSummary, GamePlayerSummary};
use crate::host::HostCtx;
use crate::map::{Map, MAPGAMETYPE_PRIVATEGAME, MAPGAMETYPE_UNKNOWN0, MAPOPT_CUSTOM_FORCES};
use crate::net::{Listener, PlayerConnection, ReceivedPacket, TcpPlayerConnection};
use crate::realm::{GameAd, GAME_PRIVATE};
use crate::stats::Stats;
use player::Player;

const BROADCAST_INTERVAL: Duration = Duration::from_secs(5);
const PING_INTERVAL: Duration = Duration::from_secs(5);
const REFRESH_INTERVAL: Duration = Duration::from_secs(30);
const AUTOSTART_INTERVAL: Duration = Duration::from_secs(10);
const RECENT_LEAVE_WINDOW: Duration = Duration::from_millis(2000);
const JOIN_HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(10);
const VOTEKICK_TIMEOUT: Duration = Duration::from_secs(60);
const LAG_DROP_AFTER: Duration = Duration::from_secs(60);
const GAME_OVER_DELAY: Duration = Duration::from_secs(60);
const SAVE_DRAIN_TIMEOUT: Duration = Duration::from_secs(30);
const COUNTDOWN_TICKS: u32 = 5;

/// Max chat payload per relayed line; longer lines are split.
const CHAT_SPLIT: usize = 220;

/// Max action bytes per tick frame before continuation frames are used.
const ACTION_FRAME_LIMIT: usize = 1452;

#[derive(Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Debug)]
pub enum Phase {
    Lobby,
    CountingDown,
    Loading,
    Loaded,
    Over,
}

/// One action waiting for the next latency tick.
#[derive(Clone, Debug)]
pub(crate) struct QueuedAction {
    pub pid: u8,
    pub data: Vec<u8>,
}

/// A socket that has not yet produced its `REQJOIN`.
struct Joiner {
    conn: Box<dyn PlayerConnection>,
    deadline: Instant,
}

pub(crate) struct PendingBanAdd {
    pub admin: String,
    pub server: String,
    pub victim: String,
    pub ip: String,
    pub callable: Callable<bool>,
}

pub(crate) struct PendingBanRemove {
    pub requester: String,
    pub victim: String,
    pub callable: Callable<bool>,
}

pub(crate) struct PendingBanCheck {
    pub server: String,
    pub victim: String,
    pub callable: Callable<Option<DbBan>>,
}

pub(crate) struct PendingSummaryCheck {
    /// Whisper target, or empty for a broadcast reply.
    pub whisper_to: String,
    pub subject: String,
    pub callable: Callable<Option<GamePlayerSummary>>,
}

pub(crate) struct PendingDotaCheck {
    pub whisper_to: String,
    pub subject: String,
    pub callable: Callable<Option<DotaPlayerSummary>>,
}

pub struct Game {
    pub map: Arc<Map>,
    pub game_name: String,
    pub last_game_name: String,
    pub host_counter: u32,
    /// [`GAME_PUBLIC`](crate::realm::GAME_PUBLIC) or [`GAME_PRIVATE`].
    pub game_state: u32,
    pub owner_name: String,
    pub creator_name: String,
    pub creator_server: String,
    pub host_port: u16,
    pub phase: Phase,
    pub exiting: bool,

    pub slots: Vec<SlotData>,
    pub(crate) players: Vec<Player>,
    joiners: Vec<Joiner>,
    listener: Option<Listener>,

    pub virtual_host_name: String,
    pub(crate) virtual_host_pid: u8,
    pub fake_player_pid: u8,
    pub(crate) random_seed: u32,
    pub(crate) entry_key: u32,
    join_counter: u32,

    pub latency: u32,
    pub sync_limit: u32,
    pub(crate) sync_counter: u32,
    pub game_ticks: u64,
    pub(crate) actions: VecDeque<QueuedAction>,
    pub(crate) lagging: bool,

    pub(crate) creation_time: Instant,
    pub(crate) last_action_sent: Instant,
    pub(crate) last_ping_time: Instant,
    pub(crate) last_refresh_time: Instant,
    pub(crate) last_broadcast_time: Instant,
    pub(crate) last_autostart_check: Instant,
    pub(crate) last_player_leave: Instant,
    pub(crate) last_countdown_tick: Instant,
    pub(crate) last_announce_time: Instant,
    pub(crate) last_download_reset: Instant,
    download_bytes_this_second: usize,

    pub(crate) countdown_counter: u32,
    pub(crate) normal_countdown_started_at: Option<Instant>,
    pub(crate) using_start: bool,
    pub auto_start_players: u32,
    pub(crate) started_loading_at: Option<Instant>,
    pub(crate) game_over_time: Option<Instant>,
    save_started_at: Option<Instant>,

    pub locked: bool,
    pub mute_all: bool,
    pub auto_save: bool,
    pub refresh_messages: bool,
    pub hcl_command_string: String,
    pub(crate) hcl_override: bool,
    pub(crate) announce: Option<(u32, String)>,

    pub(crate) kick_vote_player: String,
    pub(crate) started_kick_vote_time: Option<Instant>,

    pub(crate) tmp_root_admins: Vec<String>,
    pub(crate) reserved_names: Vec<String>,
    pub(crate) observer_slots: Vec<u8>,

    pub(crate) matchmaking: bool,
    pub(crate) minimum_score: f64,
    pub(crate) maximum_score: f64,

    pub(crate) db_bans: Vec<DbBan>,
    pub(crate) db_ban_last: Option<DbBan>,
    pub(crate) db_game_players: Vec<DbGamePlayer>,
    pub(crate) stats: Option<Box<dyn Stats>>,
    pub(crate) callable_game_add: Option<Callable<u32>>,
    pub(crate) pending_ban_adds: Vec<PendingBanAdd>,
    pub(crate) pending_ban_removes: Vec<PendingBanRemove>,
    pub(crate) pending_ban_checks: Vec<PendingBanCheck>,
    pub(crate) pending_summary_checks: Vec<PendingSummaryCheck>,
    pub(crate) pending_dota_checks: Vec<PendingDotaCheck>,

    map_data: Option<Arc<Vec<u8>>>,
}

impl Game {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        map: Arc<Map>,
        cfg: &BotConfig,
        host_counter: u32,
        game_state: u32,
        game_name: String,
        owner_name: String,
        creator_name: String,
        creator_server: String,
        listener: Option<Listener>,
    ) -> Self {
        let mut rng = rand::thread_rng();
        let now = Instant::now();

        let mut game = Self {
            slots: map.slots.clone(),
            stats: crate::stats::for_map_type(&map.map_type),
            map,
            game_name,
            last_game_name: String::new(),
            host_counter,
            game_state,
            owner_name,
            creator_name,
            creator_server,
            host_port: cfg.bot_hostport,
            phase: Phase::Lobby,
            exiting: false,
            players: Vec::new(),
            joiners: Vec::new(),
            listener,
            virtual_host_name: cfg.bot_virtualhostname.clone(),
            virtual_host_pid: 255,
            fake_player_pid: 255,
            random_seed: rng.gen(),
            entry_key: rng.gen(),
            join_counter: 1,
            latency: cfg.bot_latency.clamp(20, 500),
            sync_limit: cfg.bot_synclimit,
            sync_counter: 0,
            game_ticks: 0,
            actions: VecDeque::new(),
            lagging: false,
            creation_time: now,
            last_action_sent: now,
            last_ping_time: now,
            last_refresh_time: now,
            last_broadcast_time: now,
            last_autostart_check: now,
            last_player_leave: now,
            last_countdown_tick: now,
            last_announce_time: now,
            last_download_reset: now,
            download_bytes_this_second: 0,
            countdown_counter: 0,
            normal_countdown_started_at: None,
            using_start: false,
            auto_start_players: 0,
            started_loading_at: None,
            game_over_time: None,
            save_started_at: None,
            locked: cfg.bot_autolock,
            mute_all: false,
            auto_save: cfg.bot_autosave,
            refresh_messages: cfg.bot_refreshmessages,
            hcl_command_string: String::new(),
            hcl_override: false,
            announce: None,
            kick_vote_player: String::new(),
            started_kick_vote_time: None,
            tmp_root_admins: Vec::new(),
            reserved_names: Vec::new(),
            observer_slots: cfg.observer_slots(),
            matchmaking: false,
            minimum_score: 0.0,
            maximum_score: 0.0,
            db_bans: Vec::new(),
            db_ban_last: None,
            db_game_players: Vec::new(),
            callable_game_add: None,
            pending_ban_adds: Vec::new(),
            pending_ban_removes: Vec::new(),
            pending_ban_checks: Vec::new(),
            pending_summary_checks: Vec::new(),
            pending_dota_checks: Vec::new(),
            map_data: None,
        };

        // The virtual host claims the first PID so the lobby advertises as
        // occupied even while empty.
        game.virtual_host_pid = game.new_pid();

        game.auto_set_hcl();
        game
    }

    /// Adopts the map's default HCL string unless an admin overrode it.
    pub fn auto_set_hcl(&mut self) {
        if self.hcl_override || self.map.default_hcl.is_empty() {
            return;
        }

        if slot::hcl_fits(&self.map.default_hcl, &self.slots)
            || self.map.default_hcl.len() <= self.slots.len()
        {
            self.hcl_command_string = self.map.default_hcl.clone();
        }
    }

    // ---- lookups ---------------------------------------------------------

    pub fn in_lobby(&self) -> bool {
        matches!(self.phase, Phase::Lobby | Phase::CountingDown)
    }

    pub fn loaded(&self) -> bool {
        self.phase == Phase::Loaded
    }

    pub fn loading_or_loaded(&self) -> bool {
        matches!(self.phase, Phase::Loading | Phase::Loaded)
    }

    pub fn phase_name(&self) -> &'static str {
        match self.phase {
            Phase::Lobby => "lobby",
            Phase::CountingDown => "counting_down",
            Phase::Loading => "loading",
            Phase::Loaded => "loaded",
            Phase::Over => "over",
        }
    }

    pub fn description(&self) -> String {
        format!(
            "{} : {} : {}/{}",
            self.game_name,
            self.owner_name,
            self.num_human_players(),
            self.slots.len(),
        )
    }

    pub fn num_occupied_slots(&self) -> usize {
        slot::num_occupied(&self.slots)
    }

    pub fn num_human_players(&self) -> usize {
        self.players.iter().filter(|p| !p.delete_me).count()
    }

    pub fn player_from_pid(&self, pid: u8) -> Option<&Player> {
        self.players.iter().find(|p| p.pid == pid && !p.delete_me)
    }

    pub(crate) fn player_mut_from_pid(&mut self, pid: u8) -> Option<&mut Player> {
        self.players
            .iter_mut()
            .find(|p| p.pid == pid && !p.delete_me)
    }

    pub fn player_from_name(&self, name: &str) -> Option<&Player> {
        self.players
            .iter()
            .find(|p| !p.delete_me && p.name.eq_ignore_ascii_case(name))
    }

    /// Case-insensitive substring match; an exact match wins outright.
    /// Returns the number of matches and the last one.
    pub fn player_from_name_partial(&self, pattern: &str) -> (usize, Option<u8>) {
        let needle = pattern.to_lowercase();
        let mut matches = 0;
        let mut last = None;

        for p in self.players.iter().filter(|p| !p.delete_me) {
            let name = p.name.to_lowercase();

            if name.contains(&needle) {
                matches += 1;
                last = Some(p.pid);

                if name == needle {
                    return (1, last);
                }
            }
        }

        (matches, last)
    }

    pub fn sid_from_pid(&self, pid: u8) -> Option<usize> {
        self.slots
            .iter()
            .position(|s| s.pid == pid && s.status == SLOT_STATUS_OCCUPIED && s.computer == 0)
    }

    fn new_pid(&self) -> u8 {
        (1..=12u8)
            .find(|pid| {
                *pid != self.virtual_host_pid
                    && *pid != self.fake_player_pid
                    && !self.players.iter().any(|p| p.pid == *pid)
            })
            .unwrap_or(12)
    }

    /// PID chat and synthetic actions originate from: the virtual host while
    /// it exists, the fake player after it, else the lowest player.
    pub fn host_pid(&self) -> u8 {
        if self.virtual_host_pid != 255 {
            self.virtual_host_pid
        } else if self.fake_player_pid != 255 {
            self.fake_player_pid
        } else {
            self.players.first().map_or(255, |p| p.pid)
        }
    }

    pub fn is_owner(&self, name: &str) -> bool {
        self.owner_name.eq_ignore_ascii_case(name)
    }

    pub fn is_reserved(&self, name: &str) -> bool {
        self.reserved_names
            .iter()
            .any(|r| r.eq_ignore_ascii_case(name))
    }

    pub fn add_to_reserved(&mut self, name: &str) {
        if !self.is_reserved(name) {
            self.reserved_names.push(name.to_owned());
        }

        if let Some(player) = self
            .players
            .iter_mut()
            .find(|p| p.name.eq_ignore_ascii_case(name))
        {
            player.reserved = true;
        }
    }

    pub fn is_tmp_root_admin(&self, name: &str) -> bool {
        self.tmp_root_admins
            .iter()
            .any(|r| r.eq_ignore_ascii_case(name))
    }

    /// The human occupying the lowest slot index ("blue").
    pub fn blue_player_pid(&self) -> Option<u8> {
        self.slots
            .iter()
            .find(|s| s.is_human())
            .map(|s| s.pid)
            .filter(|pid| self.player_from_pid(*pid).is_some())
    }

    // ---- chat ------------------------------------------------------------

    pub fn send_chat_to_pid(&mut self, pid: u8, message: &str) {
        let from_pid = self.host_pid();
        let in_game = self.loading_or_loaded();

        let Some(player) = self.player_mut_from_pid(pid) else {
            return;
        };

        for line in split_chat(message) {
            let payload = if in_game {
                s2c::ChatFromHostPayload::MessageExtra(0, &line)
            } else {
                s2c::ChatFromHostPayload::Message(&line)
            };

            player.send_packet(&s2c::ChatFromHost {
                from_pid,
                to_pids: vec![pid],
                payload,
            });
        }
    }

    pub fn send_all_chat(&mut self, message: &str) {
        let from_pid = self.host_pid();
        let in_game = self.loading_or_loaded();
        let pids: Vec<u8> = self
            .players
            .iter()
            .filter(|p| !p.delete_me)
            .map(|p| p.pid)
            .collect();

        info!("[GAME: {}] {message}", self.game_name);

        for line in split_chat(message) {
            for player in self.players.iter_mut().filter(|p| !p.delete_me) {
                if in_game {
                    player.send_packet(&s2c::ChatFromHost {
                        from_pid,
                        to_pids: pids.clone(),
                        payload: s2c::ChatFromHostPayload::MessageExtra(0, &line),
                    });
                } else {
                    player.send_packet(&s2c::ChatFromHost {
                        from_pid,
                        to_pids: pids.clone(),
                        payload: s2c::ChatFromHostPayload::Message(&line),
                    });
                }
            }
        }
    }

    // ---- slot table broadcast -------------------------------------------

    pub fn slot_info(&self) -> SlotInfo {
        SlotInfo {
            slots: self.slots.clone(),
            random_seed: self.random_seed,
            layout_style: self.map.layout_style(),
            player_slots: self.map.slots.len() as u8,
        }
    }

    pub fn send_all_slot_info(&mut self) {
        if !self.in_lobby() {
            return;
        }

        let info = self.slot_info();

        for player in self.players.iter_mut().filter(|p| !p.delete_me) {
            player.send_packet(&s2c::SlotInfoPacket {
                slot_info: info.clone(),
            });
        }
    }

    // ---- virtual host and fake player -----------------------------------

    fn create_virtual_host(&mut self) {
        if self.virtual_host_pid != 255 {
            return;
        }

        self.virtual_host_pid = self.new_pid();
        self.join_counter += 1;

        let name = self.virtual_host_name.clone();
        let pkt = s2c::PlayerInfo {
            join_counter: self.join_counter,
            pid: self.virtual_host_pid,
            name: &name,
            external: AddrBlob::default(),
            internal: AddrBlob::default(),
        };

        let encoded = arbiter_protocol::encode::encode_packet(&pkt);

        if let Ok(bytes) = encoded {
            for player in self.players.iter_mut().filter(|p| !p.delete_me) {
                player.send_frame(bytes[..].into());
            }
        }
    }

    pub(crate) fn delete_virtual_host(&mut self) {
        if self.virtual_host_pid == 255 {
            return;
        }

        let pkt = s2c::PlayerLeft {
            pid: self.virtual_host_pid,
            reason: leave_code::LOBBY,
        };

        for player in self.players.iter_mut().filter(|p| !p.delete_me) {
            player.send_packet(&pkt);
        }

        self.virtual_host_pid = 255;
    }

    pub fn create_fake_player(&mut self) {
        if self.fake_player_pid != 255 {
            return;
        }

        let Some(sid) = slot::find_open_slot(&self.slots) else {
            return;
        };

        // The synthetic player needs a PID; evict the virtual host only when
        // the lobby is otherwise full.
        if self.num_human_players() + 1 >= 12 {
            self.delete_virtual_host();
        }

        self.fake_player_pid = self.new_pid();
        self.join_counter += 1;

        let slot = &mut self.slots[sid];
        slot.pid = self.fake_player_pid;
        slot.download_status = 100;
        slot.status = SLOT_STATUS_OCCUPIED;
        slot.computer = 0;

        let pkt = s2c::PlayerInfo {
            join_counter: self.join_counter,
            pid: self.fake_player_pid,
            name: "FakePlayer",
            external: AddrBlob::default(),
            internal: AddrBlob::default(),
        };

        if let Ok(bytes) = arbiter_protocol::encode::encode_packet(&pkt) {
            for player in self.players.iter_mut().filter(|p| !p.delete_me) {
                player.send_frame(bytes[..].into());
            }
        }

        self.send_all_slot_info();
    }

    pub fn delete_fake_player(&mut self) {
        if self.fake_player_pid == 255 {
            return;
        }

        if let Some(sid) = self
            .slots
            .iter()
            .position(|s| s.pid == self.fake_player_pid && s.status == SLOT_STATUS_OCCUPIED)
        {
            slot::open_slot(&mut self.slots, sid);
        }

        let pkt = s2c::PlayerLeft {
            pid: self.fake_player_pid,
            reason: leave_code::LOBBY,
        };

        for player in self.players.iter_mut().filter(|p| !p.delete_me) {
            player.send_packet(&pkt);
        }

        self.fake_player_pid = 255;
        self.send_all_slot_info();
    }

    // ---- slot commands (used by the dispatcher) -------------------------

    pub fn open_slot(&mut self, sid: usize, kick_occupant: bool) {
        if sid >= self.slots.len() {
            return;
        }

        if kick_occupant && self.slots[sid].is_human() {
            let pid = self.slots[sid].pid;

            if let Some(player) = self.player_mut_from_pid(pid) {
                player.mark_left("was kicked when opening a slot".to_owned(), leave_code::LOBBY);
            }
        }

        slot::open_slot(&mut self.slots, sid);
        self.send_all_slot_info();
    }

    pub fn close_slot(&mut self, sid: usize, kick_occupant: bool) {
        if sid >= self.slots.len() {
            return;
        }

        if kick_occupant && self.slots[sid].is_human() {
            let pid = self.slots[sid].pid;

            if let Some(player) = self.player_mut_from_pid(pid) {
                player.mark_left("was kicked when closing a slot".to_owned(), leave_code::LOBBY);
            }
        }

        slot::close_slot(&mut self.slots, sid);
        self.send_all_slot_info();
    }

    pub fn open_all_slots(&mut self) {
        for slot in &mut self.slots {
            if slot.status == arbiter_protocol::slot::SLOT_STATUS_CLOSED {
                slot.status = arbiter_protocol::slot::SLOT_STATUS_OPEN;
            }
        }

        self.send_all_slot_info();
    }

    pub fn close_all_slots(&mut self) {
        for slot in &mut self.slots {
            if slot.status == arbiter_protocol::slot::SLOT_STATUS_OPEN {
                slot.status = arbiter_protocol::slot::SLOT_STATUS_CLOSED;
            }
        }

        self.send_all_slot_info();
    }

    pub fn computer_slot(&mut self, sid: usize, skill: u8, kick_occupant: bool) {
        if sid >= self.slots.len() {
            return;
        }

        if kick_occupant && self.slots[sid].is_human() {
            let pid = self.slots[sid].pid;

            if let Some(player) = self.player_mut_from_pid(pid) {
                player
                    .mark_left("was kicked when creating a computer in a slot".to_owned(), leave_code::LOBBY);
            }
        }

        slot::computer_slot(&mut self.slots, sid, skill);
        self.send_all_slot_info();
    }

    pub fn shuffle_slots(&mut self) {
        let custom_forces = self.map.options & MAPOPT_CUSTOM_FORCES != 0;
        slot::shuffle_slots(&mut self.slots, custom_forces);
        self.send_all_slot_info();
    }

    pub fn swap_slots(&mut self, sid1: usize, sid2: usize) {
        let custom_forces = self.map.options & MAPOPT_CUSTOM_FORCES != 0;
        slot::swap_slots(&mut self.slots, sid1, sid2, custom_forces);
        self.send_all_slot_info();
    }

    pub fn colour_slot(&mut self, sid: usize, colour: u8) {
        if slot::colour_slot(&mut self.slots, sid, colour) {
            self.send_all_slot_info();
        }
    }

    // ---- events ----------------------------------------------------------

    /// A new connection was accepted on the lobby listener.
    pub(crate) fn add_joiner(&mut self, conn: Box<dyn PlayerConnection>) {
        self.joiners.push(Joiner {
            conn,
            deadline: Instant::now() + JOIN_HANDSHAKE_TIMEOUT,
        });
    }

    fn event_player_joined(
        &mut self,
        ctx: &mut HostCtx<'_>,
        mut conn: Box<dyn PlayerConnection>,
        req: &c2s::ReqJoin<'_>,
    ) {
        let reject = |conn: &mut Box<dyn PlayerConnection>, reason: u32| {
            let pkt = s2c::RejectJoin { reason };

            if let Ok(bytes) = arbiter_protocol::encode::encode_packet(&pkt) {
                let _ = conn.try_send(bytes[..].into());
            }
        };

        if self.phase != Phase::Lobby {
            reject(&mut conn, reject_join::STARTED);
            return;
        }

        let name = req.name;

        if name.is_empty()
            || name.chars().count() > 15
            || name.eq_ignore_ascii_case(&self.virtual_host_name)
            || self.player_from_name(name).is_some()
        {
            info!(
                "[GAME: {}] rejecting join from [{name}] (invalid or duplicate name)",
                self.game_name
            );
            reject(&mut conn, reject_join::FULL);
            return;
        }

        // Bans are per realm but checked against every table we hold.
        let banned = ctx
            .realms
            .iter()
            .any(|realm| realm.is_banned(name).is_some());

        if banned {
            self.send_all_chat(&format!("[{name}] is banned and was rejected"));
            reject(&mut conn, reject_join::FULL);
            return;
        }

        let reserved = self.is_reserved(name)
            || (ctx.cfg.bot_reserveadmins
                && ctx
                    .realms
                    .iter()
                    .any(|r| r.is_admin(name) || r.is_root_admin(name)));

        // The 12th human evicts the virtual host to free its PID.
        if self.num_human_players() + 1 >= 12 {
            self.delete_virtual_host();
        }

        let Some(sid) = slot::find_open_slot(&self.slots) else {
            reject(&mut conn, reject_join::FULL);
            return;
        };

        let pid = self.new_pid();
        let mut player = Player::new(conn, pid, name.to_owned(), reserved);

        // LAN players have no realm to spoof check on.
        if crate::net::is_lan_ip(player.ip)
            || crate::net::is_local_ip(player.ip, ctx.local_addresses)
            || ctx.cfg.bot_spoofchecks == 0
        {
            player.spoofed = true;
        }

        let slot = &mut self.slots[sid];
        slot.pid = pid;
        slot.download_status = DOWNLOAD_STATUS_NONE;
        slot.status = SLOT_STATUS_OCCUPIED;
        slot.computer = 0;

        info!(
            "[GAME: {}] player [{name}|{}] joined the game in slot {sid}",
            self.game_name,
            player.ip_string(),
        );

        // Tell the joiner about the lobby.
        let external = match player.ip {
            std::net::IpAddr::V4(v4) => AddrBlob {
                port: req.listen_port,
                ip: v4.octets(),
            },
            std::net::IpAddr::V6(_) => AddrBlob::default(),
        };

        player.send_packet(&s2c::SlotInfoJoin {
            slot_info: self.slot_info(),
            pid,
            external,
        });

        // Announce existing occupants (including synthetic ones) to the
        // joiner.
        self.join_counter += 1;
        let join_counter = self.join_counter;

        if self.virtual_host_pid != 255 {
            player.send_packet(&s2c::PlayerInfo {
                join_counter,
                pid: self.virtual_host_pid,
                name: &self.virtual_host_name,
                external: AddrBlob::default(),
                internal: AddrBlob::default(),
            });
        }

        if self.fake_player_pid != 255 {
            player.send_packet(&s2c::PlayerInfo {
                join_counter,
                pid: self.fake_player_pid,
                name: "FakePlayer",
                external: AddrBlob::default(),
                internal: AddrBlob::default(),
            });
        }

        for existing in self.players.iter_mut().filter(|p| !p.delete_me) {
            let existing_name = existing.name.clone();
            player.send_packet(&s2c::PlayerInfo {
                join_counter,
                pid: existing.pid,
                name: &existing_name,
                external: AddrBlob::default(),
                internal: AddrBlob::default(),
            });

            // And the joiner to them.
            existing.send_packet(&s2c::PlayerInfo {
                join_counter,
                pid,
                name,
                external,
                internal: AddrBlob::default(),
            });
        }

        player.send_packet(&s2c::MapCheck {
            unknown: 1,
            map_path: &self.map.path,
            map_size: self.map.size,
            map_info: self.map.info,
            map_crc: self.map.crc,
            map_sha1: self.map.sha1,
        });

        let needs_spoof_check = !player.spoofed;
        self.players.push(player);
        self.send_all_slot_info();

        if needs_spoof_check {
            let line = ctx.lang.tr("please_spoof_check", &[]);
            self.send_chat_to_pid(pid, &line);
        }
    }

    fn event_player_left(&mut self, ctx: &HostCtx<'_>, pid: u8, _reason: u32) {
        let in_lobby = !self.loading_or_loaded();

        if let Some(player) = self.player_mut_from_pid(pid) {
            let reason = ctx.lang.tr("has_left_voluntarily", &[]);
            let code = if in_lobby {
                leave_code::LOBBY
            } else {
                leave_code::LOST
            };
            player.mark_left(reason, code);
        }
    }

    fn event_player_disconnected(&mut self, ctx: &HostCtx<'_>, pid: u8) {
        let loaded = self.loaded();
        let is_loading_phase = self.phase == Phase::Loading;

        let Some(player) = self.player_mut_from_pid(pid) else {
            return;
        };

        if loaded && player.gproxy {
            // Keep the seat; the reconnect sidechannel may bring them back.
            player.disconnected = true;
            let name = player.name.clone();
            let line = ctx.lang.tr("player_lost_connection_but_reconnecting", &[&name]);
            self.send_all_chat(&line);
            return;
        }

        let reason = ctx.lang.tr("has_lost_connection_closed_by_remote_host", &[]);
        let code = if loaded || is_loading_phase {
            leave_code::DISCONNECT
        } else {
            leave_code::LOBBY
        };
        player.mark_left(reason, code);
    }

    fn event_player_loaded(&mut self, pid: u8) {
        let Some(started) = self.started_loading_at else {
            return;
        };

        if let Some(player) = self.player_mut_from_pid(pid) {
            if player.finished_loading {
                return;
            }

            player.finished_loading = true;
            player.loading_time_ms = started.elapsed().as_millis() as u64;
        }

        let pkt = s2c::PlayerLoaded { pid };

        for player in self.players.iter_mut().filter(|p| !p.delete_me) {
            player.send_packet(&pkt);
        }
    }

    fn event_player_action(&mut self, ctx: &mut HostCtx<'_>, pid: u8, action: &c2s::OutgoingAction<'_>) {
        if !self.loaded() {
            return;
        }

        let data = action.action.0.to_vec();

        // A player saving the game pauses everyone; announce it.
        if data.first() == Some(&0x06) {
            let name = self
                .player_from_pid(pid)
                .map(|p| p.name.clone())
                .unwrap_or_default();
            let line = ctx.lang.tr("player_is_saving_the_game", &[&name]);
            self.send_all_chat(&line);
        }

        let game_over = self
            .stats
            .as_mut()
            .is_some_and(|stats| stats.process_action(pid, &data));

        if game_over && self.game_over_time.is_none() {
            info!(
                "[GAME: {}] gameover timer started (stats class reported game over)",
                self.game_name
            );
            self.game_over_time = Some(Instant::now());
            let line = ctx.lang.tr("game_over_timer_started", &[]);
            self.send_all_chat(&line);
        }

        self.actions.push_back(QueuedAction { pid, data });
    }

    fn event_player_keepalive(&mut self, pid: u8, checksum: u32) {
        if let Some(player) = self.player_mut_from_pid(pid) {
            player.checksums.push_back(checksum);
            player.sync_counter += 1;
        }
    }

    fn event_player_pong(&mut self, ctx: &HostCtx<'_>, pid: u8, pong: u32) {
        let uptime_ms = self.creation_time.elapsed().as_millis() as u32;
        let in_lobby = self.phase == Phase::Lobby;
        let autokick = ctx.cfg.bot_autokickping;
        let lc = ctx.cfg.bot_lcpings;

        let Some(player) = self.player_mut_from_pid(pid) else {
            return;
        };

        player.add_ping(uptime_ms.saturating_sub(pong));

        if in_lobby
            && !player.reserved
            && player.num_pings() >= 3
            && player.ping(lc) > autokick
        {
            let ping = player.ping(lc);
            player.mark_left(
                format!("was autokicked for excessive ping {ping} > {autokick}"),
                leave_code::LOBBY,
            );
        }
    }

    fn event_player_chat(&mut self, ctx: &mut HostCtx<'_>, pid: u8, pkt: &c2s::ChatToHost<'_>) {
        if pkt.from_pid != pid {
            return;
        }

        match &pkt.payload {
            c2s::ChatToHostPayload::Message(message) => {
                self.relay_or_dispatch(ctx, pid, &pkt.to_pids, None, message);
            }
            c2s::ChatToHostPayload::MessageExtra(extra, message) => {
                self.relay_or_dispatch(ctx, pid, &pkt.to_pids, Some(*extra), message);
            }
            c2s::ChatToHostPayload::TeamChange(team) => {
                self.event_player_change_team(pid, *team);
            }
            c2s::ChatToHostPayload::ColourChange(colour) => {
                if self.phase == Phase::Lobby && !self.locked {
                    if let Some(sid) = self.sid_from_pid(pid) {
                        self.colour_slot(sid, *colour);
                    }
                }
            }
            c2s::ChatToHostPayload::RaceChange(race) => {
                self.event_player_change_race(pid, *race);
            }
            c2s::ChatToHostPayload::HandicapChange(handicap) => {
                self.event_player_change_handicap(pid, *handicap);
            }
        }
    }

    fn relay_or_dispatch(
        &mut self,
        ctx: &mut HostCtx<'_>,
        pid: u8,
        to_pids: &[u8],
        extra: Option<u32>,
        message: &str,
    ) {
        let trigger = ctx.cfg.command_trigger();
        let mut hide = false;

        if let Some(rest) = message.strip_prefix(trigger) {
            let (cmd, payload) = match rest.split_once(' ') {
                Some((cmd, payload)) => (cmd, payload.trim_start()),
                None => (rest, ""),
            };

            if !cmd.is_empty() {
                hide = command::dispatch(self, ctx, pid, &cmd.to_lowercase(), payload);
            }
        }

        if hide {
            return;
        }

        let Some(sender) = self.player_from_pid(pid) else {
            return;
        };

        if sender.muted {
            return;
        }

        // Global mute silences public in-game chat only.
        if self.mute_all && extra == Some(0) {
            return;
        }

        let lines = split_chat(message);

        for line in lines {
            let payload = match extra {
                Some(extra) => s2c::ChatFromHostPayload::MessageExtra(extra, &line),
                None => s2c::ChatFromHostPayload::Message(&line),
            };

            let pkt = s2c::ChatFromHost {
                from_pid: pid,
                to_pids: to_pids.to_vec(),
                payload,
            };

            for player in self
                .players
                .iter_mut()
                .filter(|p| !p.delete_me && to_pids.contains(&p.pid))
            {
                player.send_packet(&pkt);
            }
        }
    }

    fn event_player_change_team(&mut self, pid: u8, team: u8) {
        if self.phase != Phase::Lobby || self.locked {
            return;
        }

        if self.map.options & MAPOPT_CUSTOM_FORCES != 0 {
            // Move to an open slot on the requested team.
            let Some(current) = self.sid_from_pid(pid) else {
                return;
            };

            let target = self
                .slots
                .iter()
                .position(|s| s.is_open() && s.team == team);

            if let Some(target) = target {
                self.swap_slots(current, target);
            }

            return;
        }

        if team > 12 {
            return;
        }

        if team == 12 && self.map.observers < 2 {
            return;
        }

        if let Some(sid) = self.sid_from_pid(pid) {
            self.slots[sid].team = team;
            self.send_all_slot_info();
        }
    }

    fn event_player_change_race(&mut self, pid: u8, race: u8) {
        use arbiter_protocol::slot::{
            SLOT_RACE_HUMAN, SLOT_RACE_NIGHTELF, SLOT_RACE_ORC, SLOT_RACE_RANDOM,
            SLOT_RACE_SELECTABLE, SLOT_RACE_UNDEAD,
        };

        if self.phase != Phase::Lobby || self.locked {
            return;
        }

        if self.map.options & crate::map::MAPOPT_FIXED_PLAYER_SETTINGS != 0
            || self.map.flags & crate::map::MAPFLAG_RANDOM_RACES != 0
        {
            return;
        }

        let race = race
            & (SLOT_RACE_HUMAN
                | SLOT_RACE_ORC
                | SLOT_RACE_NIGHTELF
                | SLOT_RACE_UNDEAD
                | SLOT_RACE_RANDOM);

        if race.count_ones() != 1 {
            return;
        }

        if let Some(sid) = self.sid_from_pid(pid) {
            self.slots[sid].race = race | SLOT_RACE_SELECTABLE;
            self.send_all_slot_info();
        }
    }

    fn event_player_change_handicap(&mut self, pid: u8, handicap: u8) {
        if self.phase != Phase::Lobby || self.locked {
            return;
        }

        if !matches!(handicap, 50 | 60 | 70 | 80 | 90 | 100) {
            return;
        }

        if let Some(sid) = self.sid_from_pid(pid) {
            self.slots[sid].handicap = handicap;
            self.send_all_slot_info();
        }
    }

    fn event_player_map_size(&mut self, ctx: &HostCtx<'_>, pid: u8, pkt: &c2s::MapSize) {
        if self.phase != Phase::Lobby {
            return;
        }

        let map_size = self.map.size;
        let allowed = ctx.settings.allow_downloads;
        let host_pid = self.host_pid();

        let Some(sid) = self.sid_from_pid(pid) else {
            return;
        };

        enum Outcome {
            Finished,
            Progress(u8),
            None,
        }

        let mut outcome = Outcome::None;

        {
            let Some(player) = self.player_mut_from_pid(pid) else {
                return;
            };

            if pkt.size_flag == 1 && pkt.map_size == map_size {
                player.download_finished = true;
                outcome = Outcome::Finished;
            } else if allowed == 0 {
                player.mark_left(
                    "doesn't have the map and map downloads are disabled".to_owned(),
                    leave_code::LOBBY,
                );
            } else if !player.download_started && allowed == 1 {
                player.download_allowed = true;
                player.download_started = true;
                player.started_download_at = Some(Instant::now());
                player.last_map_part_acked = pkt.map_size;
                player.send_packet(&s2c::StartDownload {
                    unknown: 1,
                    from_pid: host_pid,
                });
            } else if player.download_started && pkt.size_flag == 3 {
                player.last_map_part_acked = pkt.map_size;
                let percent = (u64::from(pkt.map_size) * 100 / u64::from(map_size.max(1))) as u8;
                outcome = Outcome::Progress(percent);
            }
        }

        match outcome {
            Outcome::Finished => {
                self.slots[sid].download_status = 100;
                self.send_all_slot_info();
            }
            Outcome::Progress(percent) => {
                self.slots[sid].download_status = percent;
            }
            Outcome::None => {}
        }
    }

    fn event_gproxy_init(&mut self, ctx: &HostCtx<'_>, pid: u8) {
        if !ctx.reconnect_enabled {
            return;
        }

        let port = ctx.reconnect_port;
        let key: u32 = rand::thread_rng().gen();
        let game_name = self.game_name.clone();

        if let Some(player) = self.player_mut_from_pid(pid) {
            player.enable_gproxy(key);
            player.send_control_packet(&gproxy::InitResponse {
                reconnect_port: port,
                pid,
                reconnect_key: key,
                num_empty_actions: 5,
            });

            info!(
                "[GAME: {game_name}] player [{}] is using GProxy++",
                player.name
            );
        }
    }

    /// Whether this game owns a resumable GProxy session for `pid` + `key`.
    pub fn has_gproxy_session(&self, pid: u8, reconnect_key: u32) -> bool {
        self.loaded()
            && self.players.iter().any(|p| {
                p.pid == pid && !p.delete_me && p.gproxy && p.reconnect_key == reconnect_key
            })
    }

    /// Called by the host when the reconnect sidechannel produced a matching
    /// request. Returns true when this game owned the session.
    pub fn event_gproxy_reconnect(
        &mut self,
        pid: u8,
        reconnect_key: u32,
        last_packet: u32,
        conn: Box<dyn PlayerConnection>,
    ) -> bool {
        if !self.loaded() {
            return false;
        }

        let Some(player) = self
            .players
            .iter_mut()
            .find(|p| p.pid == pid && !p.delete_me && p.gproxy && p.reconnect_key == reconnect_key)
        else {
            return false;
        };

        player.absorb_connection(conn, last_packet);
        let total = player.total_frames_sent;
        player.send_control_packet(&gproxy::Ack { last_packet: total });
        let name = player.name.clone();

        info!("[GAME: {}] player [{name}] reconnected with GProxy++", self.game_name);
        self.send_all_chat(&format!("Player [{name}] reconnected with GProxy++!"));
        true
    }

    /// A realm confirmed this player's identity.
    pub fn event_spoof_check(&mut self, ctx: &HostCtx<'_>, user: &str, realm_server: &str) {
        let Some(player) = self
            .players
            .iter_mut()
            .find(|p| !p.delete_me && p.name.eq_ignore_ascii_case(user))
        else {
            return;
        };

        player.spoofed = true;
        player.spoofed_realm = realm_server.to_owned();

        let line = ctx.lang.tr("spoof_check_accepted", &[user, realm_server]);
        self.send_all_chat(&line);
    }

    // ---- countdown and start --------------------------------------------

    /// Starts the countdown. `force` skips the start checks.
    pub fn start_countdown(&mut self, ctx: &mut HostCtx<'_>, force: bool) {
        if self.phase != Phase::Lobby {
            return;
        }

        if !force {
            if self.last_player_leave.elapsed() < RECENT_LEAVE_WINDOW {
                let line = ctx.lang.tr("count_down_aborted_someone_left_recently", &[]);
                self.send_all_chat(&line);
                return;
            }

            let downloading = self
                .players
                .iter()
                .filter(|p| !p.delete_me && p.download_started && !p.download_finished)
                .count();

            if downloading > 0 {
                self.send_all_chat(&format!(
                    "Unable to start countdown, {downloading} players are still downloading the map"
                ));
                return;
            }
        }

        self.phase = Phase::CountingDown;
        self.countdown_counter = COUNTDOWN_TICKS;
        self.last_countdown_tick = Instant::now();

        let line = ctx.lang.tr("count_down_started", &[]);
        self.send_all_chat(&line);

        if ctx.settings.use_normal_countdown {
            self.normal_countdown_started_at = Some(Instant::now());

            for player in self.players.iter_mut().filter(|p| !p.delete_me) {
                player.send_packet(&s2c::CountdownStart);
            }
        }
    }

    pub fn abort_countdown(&mut self, ctx: &HostCtx<'_>) {
        if self.phase != Phase::CountingDown {
            return;
        }

        self.phase = Phase::Lobby;
        self.auto_start_players = 0;
        self.using_start = false;
        self.normal_countdown_started_at = None;

        let line = ctx.lang.tr("count_down_aborted", &[]);
        self.send_all_chat(&line);
    }

    fn event_game_started(&mut self, ctx: &mut HostCtx<'_>) {
        info!(
            "[GAME: {}] started loading with {} players",
            self.game_name,
            self.num_human_players()
        );

        // Encode the HCL string into the slot handicaps.
        if !self.hcl_command_string.is_empty() {
            if slot::encode_hcl(&self.hcl_command_string.clone(), &mut self.slots) {
                let line = ctx.lang.tr("setting_hcl", &[&self.hcl_command_string.clone()]);
                self.send_all_chat(&line);
            } else {
                let line = ctx.lang.tr("unable_to_set_hcl_too_long", &[]);
                self.send_all_chat(&line);
            }
        }

        self.delete_virtual_host();
        self.send_all_slot_info();

        let normal = ctx.settings.use_normal_countdown;

        for player in self.players.iter_mut().filter(|p| !p.delete_me) {
            if !normal {
                player.send_packet(&s2c::CountdownStart);
            }

            player.send_packet(&s2c::CountdownEnd);
            player.loading_started_at = Some(Instant::now());
        }

        self.phase = Phase::Loading;
        self.started_loading_at = Some(Instant::now());
        self.normal_countdown_started_at = None;
        self.listener = None;

        // Stage a potential ban for everyone present, so leavers can still
        // be banned after they are gone.
        for player in &self.players {
            self.db_bans.push(DbBan {
                server: player.joined_realm.clone(),
                name: player.name.clone(),
                ip: player.ip_string(),
                ..Default::default()
            });
        }

        if self.auto_save {
            let host_pid = self.host_pid();
            let mut data = vec![0x06];
            data.extend_from_slice(b"arbiter.w3z");
            data.push(0);
            self.actions.push_back(QueuedAction { pid: host_pid, data });
        }
    }

    fn event_game_loaded(&mut self, ctx: &HostCtx<'_>) {
        info!("[GAME: {}] finished loading", self.game_name);

        self.phase = Phase::Loaded;
        self.last_action_sent = Instant::now();
        self.last_ping_time = Instant::now();

        let _ = ctx;
    }

    // ---- in-game engine --------------------------------------------------

    /// Drains the action queue into one latency tick, splitting into
    /// continuation frames when the batch is too large for one frame.
    fn send_all_actions(&mut self) {
        let interval = self.latency as u16;
        let mut frames: Vec<Vec<s2c::ActionBlock>> = vec![Vec::new()];
        let mut frame_bytes = 0usize;

        while let Some(action) = self.actions.pop_front() {
            let block_len = 3 + action.data.len();

            if frame_bytes + block_len > ACTION_FRAME_LIMIT && !frames.last().unwrap().is_empty() {
                frames.push(Vec::new());
                frame_bytes = 0;
            }

            frame_bytes += block_len;
            frames.last_mut().unwrap().push(s2c::ActionBlock {
                pid: action.pid,
                action: action.data,
            });
        }

        let last = frames.pop().unwrap_or_default();

        // Oversized batches go out as continuation frames first, then the
        // tick-bearing frame.
        for actions in frames {
            let pkt = s2c::IncomingAction2 { actions };

            for player in self.players.iter_mut().filter(|p| !p.delete_me) {
                player.send_packet(&pkt);
            }
        }

        let pkt = s2c::IncomingAction {
            send_interval: interval,
            actions: last,
        };

        for player in self.players.iter_mut().filter(|p| !p.delete_me) {
            player.send_packet(&pkt);
        }

        self.game_ticks += u64::from(self.latency);
        self.sync_counter += 1;
        self.last_action_sent = Instant::now();

        if let Some(stats) = &mut self.stats {
            stats.set_game_ticks(self.game_ticks);
        }
    }

    fn update_lag_screen(&mut self, ctx: &HostCtx<'_>) {
        let sync_counter = self.sync_counter;
        let sync_limit = self.sync_limit;

        if !self.lagging {
            let mut laggers = Vec::new();

            for player in self.players.iter_mut().filter(|p| !p.delete_me) {
                let behind = sync_counter.saturating_sub(player.sync_counter);

                if behind > sync_limit {
                    player.lagging = true;
                    player.started_lagging_at = Some(Instant::now());
                    laggers.push(s2c::LagPlayer {
                        pid: player.pid,
                        lag_ms: behind * self.latency,
                    });
                }
            }

            if !laggers.is_empty() {
                self.lagging = true;
                let pkt = s2c::StartLag { laggers };

                for player in self.players.iter_mut().filter(|p| !p.delete_me) {
                    player.send_packet(&pkt);
                }
            }

            return;
        }

        // Wait out the laggers; recover or drop them.
        let mut recovered = Vec::new();

        for player in self.players.iter_mut().filter(|p| !p.delete_me && p.lagging) {
            let behind = sync_counter.saturating_sub(player.sync_counter);

            if behind == 0 && !player.disconnected {
                player.lagging = false;
                recovered.push((player.pid, player.started_lagging_at));
            } else if player
                .started_lagging_at
                .is_some_and(|t| t.elapsed() >= LAG_DROP_AFTER)
            {
                let reason = ctx.lang.tr("lagged_out_dropped_by_admin", &[]);
                player.mark_left(reason, leave_code::LOST);
            }
        }

        for (pid, since) in recovered {
            let lag_ms = since.map_or(0, |t| t.elapsed().as_millis() as u32);
            let pkt = s2c::StopLag { pid, lag_ms };

            for player in self.players.iter_mut().filter(|p| !p.delete_me) {
                player.send_packet(&pkt);
            }
        }

        if !self.players.iter().any(|p| !p.delete_me && p.lagging) {
            self.lagging = false;
            // Don't punish everyone for the wait.
            self.last_action_sent = Instant::now();
        }
    }

    fn check_desync(&mut self, ctx: &mut HostCtx<'_>) {
        loop {
            let alive: Vec<usize> = self
                .players
                .iter()
                .enumerate()
                .filter(|(_, p)| !p.delete_me)
                .map(|(i, _)| i)
                .collect();

            if alive.is_empty() || alive.iter().any(|&i| self.players[i].checksums.is_empty()) {
                return;
            }

            let checksums: Vec<(u8, u32)> = alive
                .iter()
                .map(|&i| {
                    let p = &mut self.players[i];
                    (p.pid, p.checksums.pop_front().unwrap())
                })
                .collect();

            let first = checksums[0].1;

            if checksums.iter().all(|&(_, c)| c == first) {
                continue;
            }

            warn!("[GAME: {}] desync detected", self.game_name);
            let line = ctx.lang.tr("desync_detected", &[]);
            self.send_all_chat(&line);

            if !ctx.settings.desync_kick {
                continue;
            }

            // Keep the majority, drop the rest.
            let mut counts: Vec<(u32, usize)> = Vec::new();

            for &(_, checksum) in &checksums {
                match counts.iter_mut().find(|(c, _)| *c == checksum) {
                    Some((_, n)) => *n += 1,
                    None => counts.push((checksum, 1)),
                }
            }

            let majority = counts
                .iter()
                .max_by_key(|(_, n)| *n)
                .map(|(c, _)| *c)
                .unwrap_or(first);

            for (pid, checksum) in checksums {
                if checksum != majority {
                    let reason = ctx.lang.tr("was_dropped_desync", &[]);

                    if let Some(player) = self.player_mut_from_pid(pid) {
                        player.mark_left(reason, leave_code::LOST);
                    }
                }
            }
        }
    }

    /// Marks every remaining player as disconnected with `reason`.
    pub fn stop_players(&mut self, reason: &str) {
        for player in self.players.iter_mut().filter(|p| !p.delete_me) {
            player.mark_left(reason.to_owned(), leave_code::LOST);
        }
    }

    /// Drops exactly the lag-screen players.
    pub fn stop_laggers(&mut self, reason: &str) {
        for player in self
            .players
            .iter_mut()
            .filter(|p| !p.delete_me && p.lagging)
        {
            player.mark_left(reason.to_owned(), leave_code::LOST);
        }
    }

    // ---- votekick --------------------------------------------------------

    pub(crate) fn votes_needed(&self, percentage: u32) -> u32 {
        let humans = self.num_human_players() as u32;
        ((humans.saturating_sub(1)) * percentage).div_ceil(100)
    }

    pub(crate) fn count_kick_votes(&self) -> u32 {
        self.players
            .iter()
            .filter(|p| !p.delete_me && p.kick_vote && !p.name.eq_ignore_ascii_case(&self.kick_vote_player))
            .count() as u32
    }

    pub(crate) fn conclude_votekick(&mut self, ctx: &mut HostCtx<'_>) {
        let votes = self.count_kick_votes();
        let needed = self.votes_needed(ctx.cfg.bot_votekickpercentage);

        if votes < needed {
            return;
        }

        let victim_name = self.kick_vote_player.clone();
        let in_lobby = !self.loading_or_loaded();
        let humans = self.num_human_players();
        let reason = ctx.lang.tr("was_kicked_by_vote", &[]);

        let found = {
            let victim = self
                .players
                .iter_mut()
                .find(|p| !p.delete_me && p.name.eq_ignore_ascii_case(&victim_name));

            match victim {
                Some(victim) => {
                    let code = if in_lobby {
                        leave_code::LOBBY
                    } else {
                        leave_code::LOST
                    };
                    victim.mark_left(reason, code);
                    true
                }
                None => false,
            }
        };

        if found {
            info!(
                "[GAME: {}] votekick against player [{victim_name}] passed with \
                 {votes}/{humans} votes",
                self.game_name
            );

            let line = ctx.lang.tr("vote_kick_passed", &[&victim_name]);
            self.send_all_chat(&line);
        } else {
            let line = ctx.lang.tr("error_vote_kicking_player", &[&victim_name]);
            self.send_all_chat(&line);
        }

        self.kick_vote_player.clear();
        self.started_kick_vote_time = None;
    }

    // ---- advertisement ---------------------------------------------------

    pub fn game_ad(&self) -> GameAd {
        let mut game_type = MAPGAMETYPE_UNKNOWN0;

        if self.game_state == GAME_PRIVATE {
            game_type |= MAPGAMETYPE_PRIVATEGAME;
        }

        GameAd {
            state: self.game_state,
            game_name: self.game_name.clone(),
            uptime_seconds: self.creation_time.elapsed().as_secs() as u32,
            game_type,
            stat_string: self.map.stat_string(&self.virtual_host_name),
            host_counter: self.host_counter,
        }
    }

    fn broadcast_game_info(&mut self, ctx: &HostCtx<'_>) {
        let product = if ctx.cfg.bot_tft {
            s2c::PRODUCT_TFT
        } else {
            s2c::PRODUCT_ROC
        };

        let stat_string = self.map.stat_string(&self.virtual_host_name);

        // Always 12/12; the client derives PID capacity from these numbers
        // and anything accurate confuses it (the virtual host skews the
        // count by one).
        let pkt = s2c::GameInfo {
            product,
            version: ctx.cfg.lan_war3version,
            host_counter: self.host_counter,
            entry_key: self.entry_key,
            game_name: &self.game_name,
            stat_string: &stat_string,
            slots_total: 12,
            game_type: self.map.game_flags(),
            unknown: 1,
            slots_open: 12,
            uptime: self.creation_time.elapsed().as_secs() as u32,
            port: self.host_port,
        };

        ctx.udp.broadcast(&pkt);
    }

    // ---- the per-tick update --------------------------------------------

    /// Milliseconds until this game needs a timed action, for the reactor's
    /// block computation.
    pub fn next_timed_action_ms(&self) -> Option<u64> {
        if self.phase != Phase::Loaded || self.lagging {
            return None;
        }

        let since = self.last_action_sent.elapsed().as_millis() as u64;
        Some(u64::from(self.latency).saturating_sub(since))
    }

    /// One reactor tick. Returns true when the game is finished and should
    /// be dropped.
    pub fn update(&mut self, ctx: &mut HostCtx<'_>) -> bool {
        self.pump_callables(ctx);

        // Accept and handshake joiners.
        if self.phase == Phase::Lobby {
            let mut accepted = Vec::new();

            if let Some(listener) = &self.listener {
                while let Some(pair) = listener.try_accept() {
                    accepted.push(pair);
                }
            }

            for (stream, addr) in accepted {
                let conn = TcpPlayerConnection::spawn(stream, addr);
                self.add_joiner(Box::new(conn));
            }

            self.pump_joiners(ctx);
        }

        self.pump_players(ctx);
        self.reap_left_players(ctx);

        match self.phase {
            Phase::Lobby => self.update_lobby(ctx),
            Phase::CountingDown => self.update_countdown(ctx),
            Phase::Loading => self.update_loading(ctx),
            Phase::Loaded => self.update_loaded(ctx),
            Phase::Over => {}
        }

        // Votekick expiry.
        if let Some(started) = self.started_kick_vote_time {
            if started.elapsed() >= VOTEKICK_TIMEOUT {
                let line = ctx.lang.tr("vote_kick_expired", &[&self.kick_vote_player.clone()]);
                self.send_all_chat(&line);
                self.kick_vote_player.clear();
                self.started_kick_vote_time = None;
            }
        }

        self.check_finished(ctx)
    }

    fn pump_callables(&mut self, ctx: &mut HostCtx<'_>) {
        let mut i = 0;
        while i < self.pending_ban_adds.len() {
            if self.pending_ban_adds[i].callable.ready() {
                let pending = self.pending_ban_adds.remove(i);
                let ok = pending.callable.into_result();

                if ok {
                    for realm in ctx.realms.iter_mut() {
                        if realm.server() == pending.server {
                            realm.add_ban(DbBan {
                                server: pending.server.clone(),
                                name: pending.victim.clone(),
                                ip: pending.ip.clone(),
                                game_name: self.game_name.clone(),
                                admin: pending.admin.clone(),
                                ..Default::default()
                            });
                        }
                    }

                    let line = ctx.lang.tr(
                        "player_was_banned_by_player",
                        &[&pending.server, &pending.victim, &pending.admin],
                    );
                    self.send_all_chat(&line);
                }
            } else {
                i += 1;
            }
        }

        let mut i = 0;
        while i < self.pending_ban_removes.len() {
            if self.pending_ban_removes[i].callable.ready() {
                let pending = self.pending_ban_removes.remove(i);
                let ok = pending.callable.into_result();

                if ok {
                    for realm in ctx.realms.iter_mut() {
                        realm.remove_ban(&pending.victim);
                    }
                }

                let key = if ok { "unbanned_user" } else { "error_unbanning_user" };
                let line = ctx.lang.tr(key, &[&pending.victim]);

                if let Some(pid) = self
                    .player_from_name(&pending.requester)
                    .map(|p| p.pid)
                {
                    self.send_chat_to_pid(pid, &line);
                }
            } else {
                i += 1;
            }
        }

        let mut i = 0;
        while i < self.pending_ban_checks.len() {
            if self.pending_ban_checks[i].callable.ready() {
                let pending = self.pending_ban_checks.remove(i);

                let line = match pending.callable.into_result() {
                    Some(ban) => ctx.lang.tr(
                        "user_was_banned_on_by_because",
                        &[&pending.server, &pending.victim, &ban.date, &ban.admin, &ban.reason],
                    ),
                    None => ctx
                        .lang
                        .tr("user_is_not_banned", &[&pending.server, &pending.victim]),
                };

                self.send_all_chat(&line);
            } else {
                i += 1;
            }
        }

        let mut i = 0;
        while i < self.pending_summary_checks.len() {
            if self.pending_summary_checks[i].callable.ready() {
                let pending = self.pending_summary_checks.remove(i);

                let line = match pending.callable.into_result() {
                    Some(summary) => ctx.lang.tr(
                        "has_played_games_with_this_bot",
                        &[
                            &pending.subject,
                            &summary.first_game,
                            &summary.last_game,
                            &summary.total_games.to_string(),
                            &format!("{:.2}", summary.avg_loading_time_ms as f64 / 1000.0),
                            &summary.avg_left_percent.to_string(),
                        ],
                    ),
                    None => ctx
                        .lang
                        .tr("hasnt_played_games_with_this_bot", &[&pending.subject]),
                };

                if pending.whisper_to.is_empty() {
                    self.send_all_chat(&line);
                } else if let Some(pid) =
                    self.player_from_name(&pending.whisper_to).map(|p| p.pid)
                {
                    self.send_chat_to_pid(pid, &line);
                }
            } else {
                i += 1;
            }
        }

        let mut i = 0;
        while i < self.pending_dota_checks.len() {
            if self.pending_dota_checks[i].callable.ready() {
                let pending = self.pending_dota_checks.remove(i);

                let line = match pending.callable.into_result() {
                    Some(summary) => ctx.lang.tr(
                        "has_played_dota_games_with_this_bot",
                        &[
                            &pending.subject,
                            &summary.total_games.to_string(),
                            &summary.wins.to_string(),
                            &summary.losses.to_string(),
                            &summary.kills.to_string(),
                            &summary.deaths.to_string(),
                            &summary.assists.to_string(),
                        ],
                    ),
                    None => ctx
                        .lang
                        .tr("hasnt_played_dota_games_with_this_bot", &[&pending.subject]),
                };

                if pending.whisper_to.is_empty() {
                    self.send_all_chat(&line);
                } else if let Some(pid) =
                    self.player_from_name(&pending.whisper_to).map(|p| p.pid)
                {
                    self.send_chat_to_pid(pid, &line);
                }
            } else {
                i += 1;
            }
        }
    }

    fn pump_joiners(&mut self, ctx: &mut HostCtx<'_>) {
        let mut joiners = std::mem::take(&mut self.joiners);

        joiners.retain_mut(|joiner| {
            if joiner.deadline <= Instant::now() {
                return false;
            }

            loop {
                match joiner.conn.try_recv() {
                    Ok(Some(packet)) if packet.id == c2s::ReqJoin::ID => {
                        let body = packet.body.clone();
                        let mut r = &body[..];

                        match c2s::ReqJoin::decode(&mut r) {
                            Ok(req) => {
                                let conn = std::mem::replace(
                                    &mut joiner.conn,
                                    Box::new(ClosedConnection),
                                );
                                self.event_player_joined(ctx, conn, &req);
                            }
                            Err(e) => {
                                warn!("[GAME: {}] bad join request: {e:#}", self.game_name);
                            }
                        }

                        return false;
                    }
                    Ok(Some(_)) => continue, // Ignore pre-join noise.
                    Ok(None) => return true,
                    Err(_) => return false,
                }
            }
        });

        // New joiners may have been added while processing; keep them.
        joiners.append(&mut self.joiners);
        self.joiners = joiners;
    }

    fn pump_players(&mut self, ctx: &mut HostCtx<'_>) {
        let mut inbox: Vec<(u8, ReceivedPacket)> = Vec::new();
        let mut dropped: Vec<u8> = Vec::new();

        for player in self.players.iter_mut().filter(|p| !p.delete_me) {
            let pid = player.pid;
            inbox.extend(player.pull_packets().into_iter().map(|p| (pid, p)));

            if player.disconnected && !player.disconnect_handled {
                player.disconnect_handled = true;
                dropped.push(pid);
            }
        }

        for (pid, packet) in inbox {
            self.dispatch_packet(ctx, pid, &packet);
        }

        for pid in dropped {
            self.event_player_disconnected(ctx, pid);
        }
    }

    fn dispatch_packet(&mut self, ctx: &mut HostCtx<'_>, pid: u8, packet: &ReceivedPacket) {
        let body: &Bytes = &packet.body;
        let mut r = &body[..];

        let result: anyhow::Result<()> = match packet.id {
            id if id == c2s::LeaveGame::ID => c2s::LeaveGame::decode(&mut r).map(|pkt| {
                self.event_player_left(ctx, pid, pkt.reason);
            }),
            id if id == c2s::GameLoadedSelf::ID => {
                c2s::GameLoadedSelf::decode(&mut r).map(|_| self.event_player_loaded(pid))
            }
            id if id == c2s::OutgoingAction::ID => {
                c2s::OutgoingAction::decode(&mut r).map(|pkt| {
                    self.event_player_action(ctx, pid, &pkt);
                })
            }
            id if id == c2s::OutgoingKeepalive::ID => c2s::OutgoingKeepalive::decode(&mut r)
                .map(|pkt| self.event_player_keepalive(pid, pkt.checksum)),
            id if id == c2s::ChatToHost::ID => c2s::ChatToHost::decode(&mut r).map(|pkt| {
                self.event_player_chat(ctx, pid, &pkt);
            }),
            id if id == c2s::MapSize::ID => c2s::MapSize::decode(&mut r).map(|pkt| {
                self.event_player_map_size(ctx, pid, &pkt);
            }),
            id if id == c2s::PongToHost::ID => {
                c2s::PongToHost::decode(&mut r).map(|pkt| self.event_player_pong(ctx, pid, pkt.pong))
            }
            id if id == gproxy::InitRequest::ID => {
                gproxy::InitRequest::decode(&mut r).map(|_| self.event_gproxy_init(ctx, pid))
            }
            id if id == gproxy::Ack::ID => gproxy::Ack::decode(&mut r).map(|pkt| {
                if let Some(player) = self.player_mut_from_pid(pid) {
                    player.gproxy_ack(pkt.last_packet);
                }
            }),
            _ => Ok(()), // Unknown frames from clients are tolerated.
        };

        if let Err(e) = result {
            // A malformed frame detaches the offender, never the reactor.
            warn!("[GAME: {}] bad frame from PID {pid}: {e:#}", self.game_name);

            if let Some(player) = self.player_mut_from_pid(pid) {
                player.mark_left(
                    "was dropped for sending malformed data".to_owned(),
                    leave_code::DISCONNECT,
                );
            }
        }
    }

    fn reap_left_players(&mut self, ctx: &mut HostCtx<'_>) {
        loop {
            let Some(index) = self.players.iter().position(|p| p.delete_me) else {
                return;
            };

            let player = self.players.remove(index);
            self.event_player_deleted(ctx, player);
        }
    }

    fn event_player_deleted(&mut self, ctx: &mut HostCtx<'_>, player: Player) {
        info!(
            "[GAME: {}] deleting player [{}]: {}",
            self.game_name, player.name, player.left_reason
        );

        self.last_player_leave = Instant::now();

        // Relay the departure.
        let pkt = s2c::PlayerLeft {
            pid: player.pid,
            reason: player.left_code,
        };

        for other in self.players.iter_mut().filter(|p| !p.delete_me) {
            other.send_packet(&pkt);
        }

        let chat = format!("{} {}", player.name, player.left_reason);
        self.send_all_chat(&chat);

        if self.loading_or_loaded() {
            // Stage the database row.
            let (team, colour) = self
                .sid_from_pid(player.pid)
                .map(|sid| (self.slots[sid].team, self.slots[sid].colour))
                .unwrap_or((255, 255));

            self.db_game_players.push(DbGamePlayer {
                name: player.name.clone(),
                ip: player.ip_string(),
                spoofed: player.spoofed,
                spoofed_realm: player.spoofed_realm.clone(),
                reserved: player.reserved,
                loading_time_ms: player.loading_time_ms,
                left_seconds: self.game_ticks / 1000,
                left_reason: player.left_reason.clone(),
                team,
                colour,
            });

            // Remember the leaver for !banlast.
            if let Some(ban) = self
                .db_bans
                .iter()
                .find(|b| b.name.eq_ignore_ascii_case(&player.name))
            {
                self.db_ban_last = Some(ban.clone());
            }

            if let Some(sid) = self.sid_from_pid(player.pid) {
                slot::open_slot(&mut self.slots, sid);
            }
        } else {
            // Countdown aborts when someone leaves during it.
            if self.phase == Phase::CountingDown {
                self.abort_countdown(ctx);
            }

            if let Some(sid) = self.sid_from_pid(player.pid) {
                slot::open_slot(&mut self.slots, sid);
            }

            self.send_all_slot_info();
        }

        // A leaver's pending vote is gone; the target leaving cancels the
        // whole vote.
        if player.name.eq_ignore_ascii_case(&self.kick_vote_player) {
            let line = ctx.lang.tr("vote_kick_cancelled", &[&self.kick_vote_player.clone()]);
            self.send_all_chat(&line);
            self.kick_vote_player.clear();
            self.started_kick_vote_time = None;
        }

        if self.lagging && !self.players.iter().any(|p| !p.delete_me && p.lagging) {
            self.lagging = false;
            self.last_action_sent = Instant::now();
        }
    }

    fn update_lobby(&mut self, ctx: &mut HostCtx<'_>) {
        // Keep the lobby visible.
        if self.last_broadcast_time.elapsed() >= BROADCAST_INTERVAL {
            self.last_broadcast_time = Instant::now();
            self.broadcast_game_info(ctx);
        }

        if self.last_refresh_time.elapsed() >= REFRESH_INTERVAL {
            self.last_refresh_time = Instant::now();
            let ad = self.game_ad();

            for realm in ctx.realms.iter_mut() {
                realm.queue_game_refresh(ad.clone());
            }

            if self.refresh_messages {
                let line = ctx.lang.tr("gamerefreshed", &[]);
                self.send_all_chat(&line);
            }
        }

        if self.last_ping_time.elapsed() >= PING_INTERVAL {
            self.last_ping_time = Instant::now();
            let tick = self.creation_time.elapsed().as_millis() as u32;

            for player in self.players.iter_mut().filter(|p| !p.delete_me) {
                player.send_packet(&s2c::PingFromHost { tick });
            }
        }

        if let Some((interval, message)) = self.announce.clone() {
            if self.last_announce_time.elapsed() >= Duration::from_secs(u64::from(interval)) {
                self.last_announce_time = Instant::now();
                self.send_all_chat(&message);
            }
        }

        // Virtual host bookkeeping: present while there is room.
        if self.num_human_players() < 12 && !self.players.is_empty() {
            self.create_virtual_host();
        }

        self.service_map_downloads(ctx);

        // Autostart.
        if self.auto_start_players > 0
            && self.last_autostart_check.elapsed() >= AUTOSTART_INTERVAL
        {
            self.last_autostart_check = Instant::now();

            let humans = self.num_human_players() as u32;

            let unspoofed: Vec<String> = self
                .players
                .iter()
                .filter(|p| !p.delete_me && !p.spoofed)
                .map(|p| p.name.clone())
                .collect();

            if humans < self.auto_start_players {
                let line = ctx.lang.tr(
                    "waiting_for_players_before_auto_start",
                    &[&(self.auto_start_players - humans).to_string()],
                );
                self.send_all_chat(&line);
            } else if ctx.cfg.bot_requirespoofchecks && !unspoofed.is_empty() {
                let line = ctx
                    .lang
                    .tr("players_not_yet_spoof_checked", &[&unspoofed.join(", ")]);
                self.send_all_chat(&line);
            } else {
                self.start_countdown(ctx, false);
            }
        }

        // An abandoned lobby eventually gives up its seat.
        if self.players.is_empty()
            && self.creation_time.elapsed()
                >= Duration::from_secs(u64::from(ctx.cfg.bot_lobbytimelimit) * 60)
        {
            info!(
                "[GAME: {}] is over (lobby time limit hit with no players)",
                self.game_name
            );
            self.exiting = true;
        }
    }

    fn update_countdown(&mut self, ctx: &mut HostCtx<'_>) {
        if let Some(started) = self.normal_countdown_started_at {
            if started.elapsed() >= Duration::from_secs(u64::from(COUNTDOWN_TICKS)) {
                self.event_game_started(ctx);
            }

            return;
        }

        // A zeroed counter (`!startn`) starts without waiting for a tick.
        if self.countdown_counter == 0 {
            self.event_game_started(ctx);
            return;
        }

        if self.last_countdown_tick.elapsed() >= Duration::from_secs(1) {
            self.last_countdown_tick = Instant::now();
            let count = self.countdown_counter;
            self.send_all_chat(&format!("{count}. . ."));
            self.countdown_counter -= 1;
        }
    }

    fn update_loading(&mut self, ctx: &mut HostCtx<'_>) {
        let all_loaded = self
            .players
            .iter()
            .filter(|p| !p.delete_me)
            .all(|p| p.finished_loading);

        if all_loaded && self.num_human_players() > 0 {
            self.event_game_loaded(ctx);
        }
    }

    fn update_loaded(&mut self, ctx: &mut HostCtx<'_>) {
        self.update_lag_screen(ctx);
        self.check_desync(ctx);

        if !self.lagging && self.last_action_sent.elapsed().as_millis() as u64 >= u64::from(self.latency)
        {
            self.send_all_actions();
        }

        if self.last_ping_time.elapsed() >= PING_INTERVAL {
            self.last_ping_time = Instant::now();
            let tick = self.creation_time.elapsed().as_millis() as u32;

            for player in self.players.iter_mut().filter(|p| !p.delete_me && !p.disconnected) {
                player.send_packet(&s2c::PingFromHost { tick });
            }
        }

        if let Some(over) = self.game_over_time {
            if over.elapsed() >= GAME_OVER_DELAY
                && self.players.iter().any(|p| !p.delete_me)
            {
                info!(
                    "[GAME: {}] is over (gameover timer finished)",
                    self.game_name
                );
                self.stop_players("was disconnected (gameover timer finished)");
            }
        }
    }

    fn service_map_downloads(&mut self, ctx: &HostCtx<'_>) {
        if self.last_download_reset.elapsed() >= Duration::from_secs(1) {
            self.last_download_reset = Instant::now();
            self.download_bytes_this_second = 0;
        }

        let downloading: Vec<u8> = self
            .players
            .iter()
            .filter(|p| !p.delete_me && p.download_started && !p.download_finished)
            .take(ctx.cfg.bot_maxdownloaders.max(1) as usize)
            .map(|p| p.pid)
            .collect();

        if downloading.is_empty() {
            return;
        }

        // Load the archive lazily; refuse transfers without a local copy.
        if self.map_data.is_none() {
            let Some(path) = self.map.local_path.clone() else {
                for pid in downloading {
                    if let Some(player) = self.player_mut_from_pid(pid) {
                        player.mark_left(
                            "doesn't have the map and there is no local copy of the map to send"
                                .to_owned(),
                            leave_code::LOBBY,
                        );
                    }
                }
                return;
            };

            match std::fs::read(&path) {
                Ok(data) => self.map_data = Some(Arc::new(data)),
                Err(e) => {
                    warn!(
                        "[GAME: {}] failed to read map file [{}]: {e}",
                        self.game_name,
                        path.display()
                    );
                    return;
                }
            }
        }

        let data = self.map_data.clone().unwrap();
        let host_pid = self.host_pid();
        let speed_limit = ctx.cfg.bot_maxdownloadspeed.max(1) as usize * 1024;

        let mut sent_now = 0usize;

        'downloaders: for pid in downloading {
            // Keep a sliding window of unacked chunks in flight.
            const WINDOW: u32 = 50;

            let Some(idx) = self
                .players
                .iter()
                .position(|p| p.pid == pid && !p.delete_me)
            else {
                continue;
            };

            let player = &mut self.players[idx];

            while player.last_map_part_sent
                < player.last_map_part_acked + MAP_PART_SIZE as u32 * WINDOW
                && (player.last_map_part_sent as usize) < data.len()
            {
                if self.download_bytes_this_second + sent_now >= speed_limit {
                    break 'downloaders;
                }

                let start = player.last_map_part_sent as usize;
                let end = (start + MAP_PART_SIZE).min(data.len());

                player.send_packet(&s2c::MapPart {
                    to_pid: pid,
                    from_pid: host_pid,
                    unknown: 1,
                    chunk_position: start as u32,
                    data: RawBytes(&data[start..end]),
                });

                player.last_map_part_sent = end as u32;
                sent_now += end - start;
            }
        }

        self.download_bytes_this_second += sent_now;
    }

    /// End-of-life checks. Saving the finished game is allowed a bounded
    /// drain so the player rows are written with the real game id.
    fn check_finished(&mut self, ctx: &mut HostCtx<'_>) -> bool {
        if self.phase == Phase::Lobby || self.phase == Phase::CountingDown {
            return self.exiting;
        }

        let everyone_gone = !self.players.iter().any(|p| !p.delete_me);

        if !everyone_gone && !self.exiting {
            return false;
        }

        // Begin the save once.
        if self.callable_game_add.is_none() {
            info!("[GAME: {}] saving game data to database", self.game_name);

            self.save_started_at = Some(Instant::now());
            self.callable_game_add = Some(ctx.db.game_add(
                ctx.realms.first().map(|r| r.server().to_owned()).unwrap_or_default(),
                self.map.path.clone(),
                self.game_name.clone(),
                self.owner_name.clone(),
                self.game_ticks / 1000,
                self.game_state,
                self.creator_name.clone(),
                self.creator_server.clone(),
            ));
            self.phase = Phase::Over;
        }

        let ready = self
            .callable_game_add
            .as_mut()
            .is_some_and(Callable::ready);

        if ready {
            let game_id = self.callable_game_add.take().unwrap().into_result();

            if game_id > 0 {
                info!(
                    "[GAME: {}] saving player/stats data to database (game id {game_id})",
                    self.game_name
                );

                for row in self.db_game_players.drain(..) {
                    ctx.orphan_callables
                        .push(ctx.db.game_player_add(game_id, row));
                }

                if let Some(stats) = &mut self.stats {
                    ctx.orphan_callables.append(&mut stats.save(ctx.db, game_id));
                }
            } else {
                warn!(
                    "[GAME: {}] unable to save player/stats data to database",
                    self.game_name
                );
            }

            return true;
        }

        if self
            .save_started_at
            .is_some_and(|t| t.elapsed() >= SAVE_DRAIN_TIMEOUT)
        {
            warn!(
                "[GAME: {}] game is being deleted before all game data was saved, \
                 game data has been lost",
                self.game_name
            );
            return true;
        }

        false
    }
}

/// Splits a chat line the way the client tolerates.
fn split_chat(message: &str) -> Vec<String> {
    if message.len() <= CHAT_SPLIT {
        return vec![message.to_owned()];
    }

    let mut out = Vec::new();
    let mut current = String::new();

    for word in message.split(' ') {
        if current.len() + word.len() + 1 > CHAT_SPLIT && !current.is_empty() {
            out.push(std::mem::take(&mut current));
        }

        if !current.is_empty() {
            current.push(' ');
        }

        current.push_str(word);
    }

    if !current.is_empty() {
        out.push(current);
    }

    out
}

/// Stand-in connection for a joiner whose socket was just moved into a
/// [`Player`].
struct ClosedConnection;

impl PlayerConnection for ClosedConnection {
    fn try_send(&mut self, _bytes: bytes::BytesMut) -> anyhow::Result<()> {
        anyhow::bail!("connection closed")
    }

    fn try_recv(&mut self) -> anyhow::Result<Option<ReceivedPacket>> {
        anyhow::bail!("connection closed")
    }

    fn ip(&self) -> std::net::IpAddr {
        std::net::IpAddr::V4(std::net::Ipv4Addr::UNSPECIFIED)
    }
}
