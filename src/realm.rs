//! Realm (chat/matchmaking server) connections.
//!
//! Each realm is a long-lived TCP client used for two things: advertising
//! the current lobby and relaying admin chat. The wire details live in
//! [`proto`]; the connect/retry lifecycle, the outbound command queue and
//! the admin and ban tables live here. One tokio task owns
//! the socket; the reactor talks to it over channels and drains lifecycle
//! events every tick.

pub mod proto;

use std::time::{Duration, Instant};

use bytes::BytesMut;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::config::RealmConfig;
use crate::db::{Callable, Database, DbBan};

pub const GAME_PUBLIC: u32 = 16;
pub const GAME_PRIVATE: u32 = 17;

const CONNECT_TIMEOUT: Duration = Duration::from_secs(15);
const KEEPALIVE_INTERVAL: Duration = Duration::from_secs(60);
const ADMIN_REFRESH_INTERVAL: Duration = Duration::from_secs(300);

/// Lifecycle and chat notifications surfaced to the reactor.
#[derive(Clone, Debug)]
pub enum RealmEvent {
    Connecting,
    Connected,
    ConnectTimedOut,
    Disconnected,
    LoggedIn,
    Chat { user: String, message: String },
    Whisper { user: String, message: String },
}

enum RealmCommand {
    Send(BytesMut),
    Disconnect,
}

/// The current lobby's advertisement, refreshed periodically while a lobby
/// exists.
#[derive(Clone, Debug)]
pub struct GameAd {
    pub state: u32,
    pub game_name: String,
    pub uptime_seconds: u32,
    pub game_type: u32,
    pub stat_string: Vec<u8>,
    pub host_counter: u32,
}

pub struct Realm {
    pub cfg: RealmConfig,

    admins: Vec<String>,
    bans: Vec<DbBan>,

    events_rx: flume::Receiver<RealmEvent>,
    events_tx: flume::Sender<RealmEvent>,
    cmds_tx: flume::Sender<RealmCommand>,
    cmds_rx: flume::Receiver<RealmCommand>,

    task: Option<JoinHandle<()>>,
    pub connected: bool,
    pub logged_in: bool,
    last_connection_attempt: Option<Instant>,
    reconnect_wait: Duration,

    admin_list_callable: Option<Callable<Vec<String>>>,
    ban_list_callable: Option<Callable<Vec<DbBan>>>,
    last_admin_refresh: Option<Instant>,

    advertised: Option<GameAd>,
    last_refresh_time: Instant,
}

impl Realm {
    pub fn new(cfg: RealmConfig, reconnect_wait_seconds: u32) -> Self {
        let (events_tx, events_rx) = flume::unbounded();
        let (cmds_tx, cmds_rx) = flume::unbounded();

        Self {
            cfg,
            admins: Vec::new(),
            bans: Vec::new(),
            events_rx,
            events_tx,
            cmds_tx,
            cmds_rx,
            task: None,
            connected: false,
            logged_in: false,
            last_connection_attempt: None,
            reconnect_wait: Duration::from_secs(u64::from(reconnect_wait_seconds)),
            admin_list_callable: None,
            ban_list_callable: None,
            last_admin_refresh: None,
            advertised: None,
            last_refresh_time: Instant::now(),
        }
    }

    pub fn server(&self) -> &str {
        &self.cfg.server
    }

    /// Drives the connection lifecycle and refreshes the admin/ban tables.
    /// Returns drained events for the host to act on.
    pub fn update(&mut self, db: &Database) -> Vec<RealmEvent> {
        // (Re)connect once the wait period has passed.
        let due = self
            .last_connection_attempt
            .map_or(true, |t| t.elapsed() >= self.reconnect_wait);

        if self.task.as_ref().map_or(true, JoinHandle::is_finished) && due {
            self.last_connection_attempt = Some(Instant::now());
            self.connected = false;
            self.logged_in = false;
            self.spawn_connection();
        }

        // Keep the admin and ban tables fresh.
        let refresh_due = self
            .last_admin_refresh
            .map_or(true, |t| t.elapsed() >= ADMIN_REFRESH_INTERVAL);

        if refresh_due && self.admin_list_callable.is_none() && self.ban_list_callable.is_none() {
            self.last_admin_refresh = Some(Instant::now());
            self.admin_list_callable = Some(db.admin_list(self.cfg.server.clone()));
            self.ban_list_callable = Some(db.ban_list(self.cfg.server.clone()));
        }

        if let Some(mut callable) = self.admin_list_callable.take() {
            if callable.ready() {
                self.admins = callable.into_result();
            } else {
                self.admin_list_callable = Some(callable);
            }
        }

        if let Some(mut callable) = self.ban_list_callable.take() {
            if callable.ready() {
                self.bans = callable.into_result();
            } else {
                self.ban_list_callable = Some(callable);
            }
        }

        // Periodic lobby refresh while advertising a public game.
        if let Some(ad) = self.advertised.clone() {
            if self.logged_in
                && ad.state == GAME_PUBLIC
                && self.last_refresh_time.elapsed() >= Duration::from_secs(30)
            {
                self.last_refresh_time = Instant::now();
                self.send_advertisement(&ad);
            }
        }

        let mut events = Vec::new();

        while let Ok(event) = self.events_rx.try_recv() {
            match &event {
                RealmEvent::Connected => self.connected = true,
                RealmEvent::LoggedIn => {
                    self.logged_in = true;

                    // Re-advertise after a reconnect so the lobby stays
                    // listed.
                    if let Some(ad) = self.advertised.clone() {
                        self.send_advertisement(&ad);
                    }
                }
                RealmEvent::Disconnected | RealmEvent::ConnectTimedOut => {
                    self.connected = false;
                    self.logged_in = false;
                }
                _ => {}
            }

            events.push(event);
        }

        events
    }

    fn spawn_connection(&mut self) {
        let cfg = self.cfg.clone();
        let events = self.events_tx.clone();
        let cmds = self.cmds_rx.clone();

        self.task = Some(tokio::spawn(async move {
            run_connection(cfg, events, cmds).await;
        }));
    }

    pub fn shutdown(&mut self) {
        let _ = self.cmds_tx.send(RealmCommand::Disconnect);

        if let Some(task) = self.task.take() {
            task.abort();
        }
    }

    // ---- admin and ban tables -------------------------------------------

    pub fn is_admin(&self, name: &str) -> bool {
        self.admins.iter().any(|a| a.eq_ignore_ascii_case(name))
    }

    pub fn is_root_admin(&self, name: &str) -> bool {
        self.cfg
            .root_admins
            .iter()
            .any(|a| a.eq_ignore_ascii_case(name))
    }

    pub fn add_admin(&mut self, name: String) {
        if !self.is_admin(&name) {
            self.admins.push(name);
        }
    }

    pub fn is_banned(&self, name: &str) -> Option<&DbBan> {
        self.bans.iter().find(|b| b.name.eq_ignore_ascii_case(name))
    }

    pub fn add_ban(&mut self, ban: DbBan) {
        self.bans.push(ban);
    }

    pub fn remove_ban(&mut self, name: &str) {
        self.bans.retain(|b| !b.name.eq_ignore_ascii_case(name));
    }

    // ---- outbound queue --------------------------------------------------

    fn send_frame(&self, frame: BytesMut) {
        let _ = self.cmds_tx.send(RealmCommand::Send(frame));
    }

    /// Queues a chat line or a whisper to `user`.
    pub fn queue_chat_command(&self, message: &str, user: Option<&str>, whisper: bool) {
        let line = match (user, whisper) {
            (Some(user), true) => format!("/w {user} {message}"),
            _ => message.to_owned(),
        };

        self.send_frame(proto::compose_chat_command(&line));
    }

    pub fn queue_game_create(&mut self, ad: GameAd) {
        self.send_advertisement(&ad);
        self.advertised = Some(ad);
        self.last_refresh_time = Instant::now();
    }

    pub fn queue_game_refresh(&mut self, ad: GameAd) {
        self.advertised = Some(ad);
    }

    pub fn unqueue_game_refreshes(&mut self) {
        self.advertised = None;
    }

    pub fn queue_game_uncreate(&mut self) {
        self.advertised = None;
        self.send_frame(proto::compose_stop_adv());
    }

    pub fn queue_enter_chat(&self) {
        self.send_frame(proto::compose_enter_chat());
        self.send_frame(proto::compose_join_channel(&self.cfg.first_channel));
    }

    fn send_advertisement(&self, ad: &GameAd) {
        self.send_frame(proto::compose_start_adv(
            ad.state,
            ad.uptime_seconds,
            ad.game_type,
            &ad.game_name,
            &ad.stat_string,
            ad.host_counter,
        ));
    }
}

impl std::fmt::Debug for Realm {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Realm")
            .field("server", &self.cfg.server)
            .field("connected", &self.connected)
            .field("logged_in", &self.logged_in)
            .finish_non_exhaustive()
    }
}

async fn run_connection(
    cfg: RealmConfig,
    events: flume::Sender<RealmEvent>,
    cmds: flume::Receiver<RealmCommand>,
) {
    let _ = events.send(RealmEvent::Connecting);
    info!("[BNET: {}] connecting to server on port {}", cfg.server, cfg.server_port);

    let connect = TcpStream::connect((cfg.server.as_str(), cfg.server_port));

    let stream = match tokio::time::timeout(CONNECT_TIMEOUT, connect).await {
        Ok(Ok(stream)) => stream,
        Ok(Err(e)) => {
            warn!("[BNET: {}] failed to connect: {e}", cfg.server);
            let _ = events.send(RealmEvent::Disconnected);
            return;
        }
        Err(_) => {
            warn!("[BNET: {}] connect timed out", cfg.server);
            let _ = events.send(RealmEvent::ConnectTimedOut);
            return;
        }
    };

    let _ = events.send(RealmEvent::Connected);
    info!("[BNET: {}] connected", cfg.server);

    let (mut reader, mut writer) = stream.into_split();

    // Plain login. Full account authentication is outside this component.
    let logon = proto::compose_logon(&cfg.username, &cfg.password);
    if writer.write_all(&logon).await.is_err() {
        let _ = events.send(RealmEvent::Disconnected);
        return;
    }

    let _ = events.send(RealmEvent::LoggedIn);
    info!("[BNET: {}] logged in as [{}]", cfg.server, cfg.username);

    let enter = proto::compose_enter_chat();
    let _ = writer.write_all(&enter).await;
    let join = proto::compose_join_channel(&cfg.first_channel);
    let _ = writer.write_all(&join).await;

    let mut dec = proto::FrameDecoder::default();
    let mut buf = BytesMut::new();
    let mut keepalive = tokio::time::interval(KEEPALIVE_INTERVAL);

    loop {
        tokio::select! {
            cmd = cmds.recv_async() => match cmd {
                Ok(RealmCommand::Send(frame)) => {
                    if writer.write_all(&frame).await.is_err() {
                        break;
                    }
                }
                Ok(RealmCommand::Disconnect) | Err(_) => break,
            },
            _ = keepalive.tick() => {
                if writer.write_all(&proto::compose_null()).await.is_err() {
                    break;
                }
            }
            read = reader.read_buf(&mut buf) => {
                match read {
                    Ok(0) | Err(_) => break,
                    Ok(_) => {}
                }

                dec.queue_bytes(buf.split());

                loop {
                    match dec.try_next_frame() {
                        Ok(Some(frame)) => handle_frame(&cfg.server, frame, &events),
                        Ok(None) => break,
                        Err(e) => {
                            debug!("[BNET: {}] bad frame: {e:#}", cfg.server);
                            let _ = events.send(RealmEvent::Disconnected);
                            return;
                        }
                    }
                }
            }
        }
    }

    info!("[BNET: {}] disconnected", cfg.server);
    let _ = events.send(RealmEvent::Disconnected);
}

fn handle_frame(server: &str, frame: proto::Frame, events: &flume::Sender<RealmEvent>) {
    if frame.id != proto::SID_CHATEVENT {
        return;
    }

    let event = match proto::parse_chat_event(&frame.body) {
        Ok(event) => event,
        Err(e) => {
            debug!("[BNET: {server}] bad chat event: {e:#}");
            return;
        }
    };

    let relayed = match event.event {
        proto::EID_TALK | proto::EID_BROADCAST | proto::EID_EMOTE => RealmEvent::Chat {
            user: event.user,
            message: event.message,
        },
        proto::EID_WHISPER => RealmEvent::Whisper {
            user: event.user,
            message: event.message,
        },
        _ => return,
    };

    let _ = events.send(relayed);
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_realm() -> Realm {
        Realm::new(
            RealmConfig {
                server: "useast.example.net".to_owned(),
                root_admins: vec!["Root".to_owned()],
                ..Default::default()
            },
            3,
        )
    }

    #[test]
    fn admin_checks_are_case_insensitive() {
        let mut realm = test_realm();
        realm.add_admin("Varlock".to_owned());

        assert!(realm.is_admin("varlock"));
        assert!(realm.is_admin("VARLOCK"));
        assert!(!realm.is_admin("other"));
        assert!(realm.is_root_admin("root"));
        assert!(!realm.is_root_admin("varlock"));
    }

    #[test]
    fn ban_table_add_remove() {
        let mut realm = test_realm();
        realm.add_ban(DbBan {
            name: "Griefer".to_owned(),
            ..Default::default()
        });

        assert!(realm.is_banned("griefer").is_some());
        realm.remove_ban("GRIEFER");
        assert!(realm.is_banned("griefer").is_none());
    }
}
