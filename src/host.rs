//! The host reactor.
//!
//! One `Host` owns everything: realm connections, the current lobby, the
//! running games, the reconnect and status listeners, the UDP broadcaster
//! and the database handles. [`Host::update`] is called in a tight loop from
//! `main` and is the only place any of that state is mutated.

use std::net::Ipv4Addr;
use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};

use arbiter_lang::Language;
use tracing::{error, info, warn};

use crate::config::BotConfig;
use crate::db::{Callable, Database, IpToCountry};
use crate::game::{Game, Phase};
use crate::lan::LanBroadcaster;
use crate::map::Map;
use crate::net::{Listener, TcpPlayerConnection};
use crate::realm::{Realm, RealmEvent, GAME_PRIVATE, GAME_PUBLIC};
use crate::reconnect::{self, ReconnectListener};
use crate::status::StatusBroadcaster;

/// How long exit-nice waits for outstanding database work.
const EXIT_NICE_DRAIN: Duration = Duration::from_secs(60);

/// Runtime toggles the admin commands flip; initialized from the config.
pub struct HostSettings {
    pub enabled: bool,
    pub desync_kick: bool,
    pub use_normal_countdown: bool,
    pub hide_admin_commands: bool,
    pub local_admin_messages: bool,
    pub allow_downloads: u32,
}

impl HostSettings {
    pub fn from_config(cfg: &BotConfig) -> Self {
        Self {
            enabled: true,
            desync_kick: cfg.bot_desynckick,
            use_normal_countdown: cfg.bot_usenormalcountdown,
            hide_admin_commands: cfg.bot_hideadmincommands,
            local_admin_messages: cfg.bot_localadminmessages,
            allow_downloads: cfg.bot_allowdownloads,
        }
    }
}

/// The borrowed context a game gets for one tick: the host's services
/// without the host's game list.
pub struct HostCtx<'a> {
    pub cfg: &'a BotConfig,
    pub settings: &'a mut HostSettings,
    pub lang: &'a Language,
    pub db: &'a Database,
    pub db_local: &'a Database,
    pub ip_to_country: &'a IpToCountry,
    pub realms: &'a mut Vec<Realm>,
    pub udp: &'a LanBroadcaster,
    pub host_counter: &'a mut u32,
    pub local_addresses: &'a [Ipv4Addr],
    pub reconnect_enabled: bool,
    pub reconnect_port: u16,
    /// Fire-and-forget database work the host polls to completion.
    pub orphan_callables: &'a mut Vec<Callable<u32>>,
}

struct AutoHost {
    game_name: String,
    owner: String,
    server: String,
    max_games: u32,
    start_players: u32,
    last_time: Instant,
    matchmaking: bool,
    minimum_score: f64,
    maximum_score: f64,
}

pub struct Host {
    cfg: BotConfig,
    settings: HostSettings,
    lang: Language,
    db: Database,
    db_local: Database,
    ip_to_country: IpToCountry,
    realms: Vec<Realm>,
    current_game: Option<Game>,
    games: Vec<Game>,
    udp: LanBroadcaster,
    reconnect: ReconnectListener,
    status: StatusBroadcaster,
    map: Arc<Map>,
    host_counter: u32,
    exiting: bool,
    exiting_nice: bool,
    all_games_finished: bool,
    all_games_finished_time: Option<Instant>,
    auto_host: AutoHost,
    orphan_callables: Vec<Callable<u32>>,
    local_addresses: Vec<Ipv4Addr>,
    start_time: Instant,
}

impl Host {
    pub fn new(cfg: BotConfig) -> anyhow::Result<Self> {
        info!("opening primary database");
        let db = Database::open(Path::new(&cfg.db_file), "primary")?;

        info!("opening secondary (local) database");
        let db_local = Database::open(Path::new(&cfg.db_local_file), "local")?;

        let lang = match Language::load(&cfg.bot_language) {
            Ok(lang) => lang,
            Err(_) => {
                info!(
                    "language file [{}] not loaded, using built-in defaults",
                    cfg.bot_language
                );
                Language::default()
            }
        };

        let ip_to_country = match IpToCountry::load_csv(Path::new("ip-to-country.csv")) {
            Ok(index) => {
                info!("loaded [ip-to-country.csv] with {} ranges", index.len());

                // Persist a copy through the local handle.
                if !index.is_empty() {
                    drop(db_local.from_add_bulk(index.rows()));
                }

                index
            }
            Err(_) => {
                warn!("unable to read file [ip-to-country.csv], iptocountry data not loaded");
                IpToCountry::default()
            }
        };

        let local_addresses = crate::net::local_addresses();

        for (i, address) in local_addresses.iter().enumerate() {
            info!("local IP address #{} is [{address}]", i + 1);
        }

        let mut realms = Vec::new();

        for realm_cfg in &cfg.realms {
            if realm_cfg.server.is_empty() {
                continue;
            }

            if realm_cfg.username.is_empty() || realm_cfg.password.is_empty() {
                warn!(
                    "missing username or password for server [{}], skipping this realm",
                    realm_cfg.server
                );
                continue;
            }

            info!("found realm connection for server [{}]", realm_cfg.server);
            realms.push(Realm::new(realm_cfg.clone(), cfg.bot_reconnectwaittime));
        }

        if realms.is_empty() {
            warn!("no realm connections found in config file");
        }

        let map_path = Path::new(&cfg.bot_mapcfgpath).join(format!("{}.toml", cfg.bot_defaultmap));
        let map = match Map::load(&map_path) {
            Ok(map) => map,
            Err(e) => {
                warn!("{e}; hosting is disabled until a valid map is configured");
                Map::placeholder(map_path)
            }
        };

        let udp = LanBroadcaster::new(&cfg.udp_broadcasttarget, cfg.udp_dontroute);

        let reconnect = ReconnectListener::new(
            cfg.bot_reconnect,
            cfg.bot_bindaddress.clone(),
            cfg.bot_reconnectport,
        );

        let status = StatusBroadcaster::new(
            cfg.bot_tcpstatus,
            cfg.bot_bindaddress.clone(),
            cfg.bot_statusport,
        );

        let auto_host = AutoHost {
            game_name: cfg.autohost_gamename.clone(),
            owner: cfg.autohost_owner.clone(),
            server: String::new(),
            max_games: cfg.autohost_maxgames,
            start_players: cfg.autohost_startplayers,
            last_time: Instant::now(),
            matchmaking: false,
            minimum_score: 0.0,
            maximum_score: 0.0,
        };

        Ok(Self {
            settings: HostSettings::from_config(&cfg),
            cfg,
            lang,
            db,
            db_local,
            ip_to_country,
            realms,
            current_game: None,
            games: Vec::new(),
            udp,
            reconnect,
            status,
            map: Arc::new(map),
            host_counter: 1,
            exiting: false,
            exiting_nice: false,
            all_games_finished: false,
            all_games_finished_time: None,
            auto_host,
            orphan_callables: Vec::new(),
            local_addresses,
            start_time: Instant::now(),
        })
    }

    /// Ask for a graceful shutdown: drop the lobby, let running games
    /// finish, drain database work.
    pub fn request_exit_nice(&mut self) {
        self.exiting_nice = true;
    }

    pub fn uptime(&self) -> Duration {
        self.start_time.elapsed()
    }

    /// Applies the reloadable configuration subset over the running host.
    pub fn set_configs(&mut self, mut cfg: BotConfig) {
        cfg.sanitize();
        self.settings = HostSettings::from_config(&cfg);
        self.cfg = cfg;
    }

    /// The effective block timeout: `max_block`, shortened when a running
    /// game needs an earlier timed action, but never below 1 ms so a
    /// confused game cannot spin the process.
    pub fn next_block(&self, max_block: Duration) -> Duration {
        let mut block = max_block;

        for game in &self.games {
            if let Some(ms) = game.next_timed_action_ms() {
                block = block.min(Duration::from_millis(ms));
            }
        }

        block.max(Duration::from_millis(1))
    }

    /// One reactor pass followed by the blocking wait. Returns true when the
    /// process should exit. Called in a tight loop from `main`.
    pub async fn update(&mut self, max_block: Duration) -> bool {
        if self.tick() {
            return true;
        }

        tokio::time::sleep(self.next_block(max_block)).await;
        false
    }

    /// The non-blocking part of [`update`](Self::update): dispatch I/O and
    /// timer work to every owner, reap finished callables and games.
    pub fn tick(&mut self) -> bool {
        // A database error is fatal; there is no recovering the contract.
        if self.db.has_error() {
            error!("database error - {}", self.db.error().unwrap_or_default());
            return true;
        }

        if self.db_local.has_error() {
            error!(
                "local database error - {}",
                self.db_local.error().unwrap_or_default()
            );
            return true;
        }

        if self.exiting_nice {
            self.update_exit_nice();
        }

        // Reap finished fire-and-forget callables.
        self.orphan_callables.retain_mut(|c| !c.ready());

        // Keep the optional listeners bound; failures disable the feature.
        self.status.ensure_listening();
        self.reconnect.ensure_listening();

        // Current game: update and promote/delete.
        if let Some(mut game) = self.current_game.take() {
            let done = {
                let mut ctx = Self::ctx(
                    &self.cfg,
                    &mut self.settings,
                    &self.lang,
                    &self.db,
                    &self.db_local,
                    &self.ip_to_country,
                    &mut self.realms,
                    &self.udp,
                    &mut self.host_counter,
                    &self.local_addresses,
                    &self.reconnect,
                    &mut self.orphan_callables,
                );
                game.update(&mut ctx)
            };

            if done {
                info!("deleting current game [{}]", game.game_name);

                for realm in &mut self.realms {
                    realm.queue_game_uncreate();
                    realm.queue_enter_chat();
                }

                self.udp.broadcast(&arbiter_protocol::packets::s2c::DecreateGame {
                    host_counter: game.host_counter,
                });

                self.status.push_game(None);
            } else if game.phase >= Phase::Loading {
                // The lobby became a running game.
                info!("game [{}] started", game.game_name);

                for realm in &mut self.realms {
                    realm.queue_game_uncreate();
                    realm.queue_enter_chat();
                }

                self.udp.broadcast(&arbiter_protocol::packets::s2c::DecreateGame {
                    host_counter: game.host_counter,
                });

                self.games.push(game);
                self.status.push_game(self.games.last());
            } else {
                self.current_game = Some(game);
            }
        }

        // Running games.
        let mut games = std::mem::take(&mut self.games);

        games.retain_mut(|game| {
            let done = {
                let mut ctx = Self::ctx(
                    &self.cfg,
                    &mut self.settings,
                    &self.lang,
                    &self.db,
                    &self.db_local,
                    &self.ip_to_country,
                    &mut self.realms,
                    &self.udp,
                    &mut self.host_counter,
                    &self.local_addresses,
                    &self.reconnect,
                    &mut self.orphan_callables,
                );
                game.update(&mut ctx)
            };

            if done {
                info!("deleting game [{}]", game.game_name);
            }

            !done
        });

        self.games = games;

        // Realms: lifecycle, admin table refresh, chat events.
        let mut realm_events = Vec::new();

        for (index, realm) in self.realms.iter_mut().enumerate() {
            for event in realm.update(&self.db) {
                realm_events.push((index, event));
            }
        }

        for (index, event) in realm_events {
            self.handle_realm_event(index, event);
        }

        // The reconnect sidechannel.
        self.reconnect.update();

        while let Some(attempt) = self.reconnect.try_next_attempt() {
            self.resolve_reconnect(attempt);
        }

        // The status broadcaster.
        let snapshot = self.current_game.as_ref().or(self.games.first());
        self.status.update(snapshot);

        // Auto-host.
        self.update_auto_host();

        self.exiting
    }

    #[allow(clippy::too_many_arguments)]
    fn ctx<'a>(
        cfg: &'a BotConfig,
        settings: &'a mut HostSettings,
        lang: &'a Language,
        db: &'a Database,
        db_local: &'a Database,
        ip_to_country: &'a IpToCountry,
        realms: &'a mut Vec<Realm>,
        udp: &'a LanBroadcaster,
        host_counter: &'a mut u32,
        local_addresses: &'a [Ipv4Addr],
        reconnect: &'a ReconnectListener,
        orphan_callables: &'a mut Vec<Callable<u32>>,
    ) -> HostCtx<'a> {
        HostCtx {
            cfg,
            settings,
            lang,
            db,
            db_local,
            ip_to_country,
            realms,
            udp,
            host_counter,
            local_addresses,
            reconnect_enabled: reconnect.enabled,
            reconnect_port: reconnect.port(),
            orphan_callables,
        }
    }

    fn update_exit_nice(&mut self) {
        if !self.realms.is_empty() {
            info!("deleting all realm connections in preparation for exiting nicely");

            for realm in &mut self.realms {
                realm.shutdown();
            }

            self.realms.clear();
        }

        if let Some(game) = self.current_game.take() {
            info!(
                "deleting current game [{}] in preparation for exiting nicely",
                game.game_name
            );
        }

        if self.games.is_empty() {
            let outstanding = self.db.outstanding() + self.db_local.outstanding();

            if !self.all_games_finished {
                info!("all games finished, waiting 60 seconds for database work to finish");
                info!("there are {outstanding} queries in progress");
                self.all_games_finished = true;
                self.all_games_finished_time = Some(Instant::now());
            } else if outstanding == 0 && self.orphan_callables.is_empty() {
                info!("all database work finished, exiting nicely");
                self.exiting = true;
            } else if self
                .all_games_finished_time
                .is_some_and(|t| t.elapsed() >= EXIT_NICE_DRAIN)
            {
                info!("waited 60 seconds for database work to finish, exiting anyway");
                info!("{outstanding} queries still in progress will be abandoned");
                self.exiting = true;
            }
        }
    }

    fn handle_realm_event(&mut self, realm_index: usize, event: RealmEvent) {
        let Some(realm) = self.realms.get(realm_index) else {
            return;
        };

        let server = realm.server().to_owned();

        match event {
            RealmEvent::Connecting => self.lobby_chat("connecting_to_bnet", &[&server]),
            RealmEvent::Connected => self.lobby_chat("connected_to_bnet", &[&server]),
            RealmEvent::Disconnected => self.lobby_chat("disconnected_from_bnet", &[&server]),
            RealmEvent::LoggedIn => self.lobby_chat("logged_in_to_bnet", &[&server]),
            RealmEvent::ConnectTimedOut => {
                let wait = self.cfg.bot_reconnectwaittime.to_string();
                self.lobby_chat("connecting_to_bnet_timed_out", &[&server, &wait]);
            }
            RealmEvent::Whisper { user, message } => {
                // A whisper of "sc" / "spoofcheck" verifies the sender's
                // identity on this realm.
                let text = message.trim().to_lowercase();

                if text == "sc" || text == "spoofcheck" || text == "s" {
                    if let Some(game) = &mut self.current_game {
                        let ctx = Self::ctx(
                            &self.cfg,
                            &mut self.settings,
                            &self.lang,
                            &self.db,
                            &self.db_local,
                            &self.ip_to_country,
                            &mut self.realms,
                            &self.udp,
                            &mut self.host_counter,
                            &self.local_addresses,
                            &self.reconnect,
                            &mut self.orphan_callables,
                        );
                        game.event_spoof_check(&ctx, &user, &server);
                    }
                }
            }
            RealmEvent::Chat { .. } => {
                // Channel chat is realm-side noise; admin commands arrive
                // through the game connection.
            }
        }
    }

    fn lobby_chat(&mut self, key: &str, args: &[&str]) {
        let line = self.lang.tr(key, args);

        if let Some(game) = &mut self.current_game {
            if self.settings.local_admin_messages {
                game.send_all_chat(&line);
            }
        }
    }

    fn resolve_reconnect(&mut self, attempt: reconnect::ReconnectAttempt) {
        let Some(request) = attempt.request else {
            reconnect::reject(attempt.stream, arbiter_protocol::gproxy::REJECT_INVALID);
            return;
        };

        // Scan every running, loaded game for the session.
        let owner = self
            .games
            .iter_mut()
            .find(|g| g.has_gproxy_session(request.pid, request.reconnect_key));

        match owner {
            Some(game) => {
                let conn = TcpPlayerConnection::spawn(attempt.stream, attempt.addr);
                game.event_gproxy_reconnect(
                    request.pid,
                    request.reconnect_key,
                    request.last_packet,
                    Box::new(conn),
                );
            }
            None => {
                reconnect::reject(attempt.stream, arbiter_protocol::gproxy::REJECT_NOT_FOUND);
            }
        }
    }

    /// Creates a new lobby, or explains over chat why it cannot.
    #[allow(clippy::too_many_arguments)]
    pub fn create_game(
        &mut self,
        map: Arc<Map>,
        game_state: u32,
        game_name: String,
        owner_name: String,
        creator_name: String,
        creator_server: String,
        whisper: bool,
    ) {
        let refusal = if !self.settings.enabled {
            Some("unable_to_create_game_disabled")
        } else if game_name.len() > 31 {
            Some("unable_to_create_game_name_too_long")
        } else if !map.valid() {
            Some("unable_to_create_game_invalid_map")
        } else if self.current_game.is_some() {
            Some("unable_to_create_game_another_game_in_lobby")
        } else if self.games.len() >= self.cfg.bot_maxgames as usize {
            Some("unable_to_create_game_max_games_reached")
        } else {
            None
        };

        if let Some(key) = refusal {
            let detail = match key {
                "unable_to_create_game_another_game_in_lobby" => self
                    .current_game
                    .as_ref()
                    .map(|g| g.description())
                    .unwrap_or_default(),
                "unable_to_create_game_max_games_reached" => self.cfg.bot_maxgames.to_string(),
                _ => String::new(),
            };

            let line = self.lang.tr(key, &[&game_name, &detail]);

            for realm in &self.realms {
                if realm.server() == creator_server {
                    realm.queue_chat_command(&line, Some(&creator_name), whisper);
                }
            }

            return;
        }

        info!("creating game [{game_name}]");

        let listener = match Listener::bind(&self.cfg.bot_bindaddress, self.cfg.bot_hostport, "game")
        {
            Ok(listener) => Some(listener),
            Err(e) => {
                error!("{e}");
                return;
            }
        };

        self.host_counter += 1;

        let game = Game::new(
            map,
            &self.cfg,
            self.host_counter,
            game_state,
            game_name.clone(),
            owner_name.clone(),
            creator_name.clone(),
            creator_server.clone(),
            listener,
        );

        let ad = game.game_ad();
        let key = if game_state == GAME_PRIVATE {
            "creating_private_game"
        } else {
            "creating_public_game"
        };

        for realm in &mut self.realms {
            // The creator gets a whisper; everyone else sees a chat line.
            if whisper && realm.server() == creator_server {
                let line = self.lang.tr(key, &[&game_name, &owner_name]);
                realm.queue_chat_command(&line, Some(&creator_name), true);
            } else {
                let line = self.lang.tr(key, &[&game_name, &owner_name]);
                realm.queue_chat_command(&line, None, false);
            }

            realm.queue_game_create(ad.clone());

            // Private games are not refreshed, so the realm can rejoin chat
            // right away.
            if game_state == GAME_PRIVATE {
                realm.queue_enter_chat();
            }
        }

        self.udp.broadcast(&arbiter_protocol::packets::s2c::CreateGame {
            product: if self.cfg.bot_tft {
                arbiter_protocol::packets::s2c::PRODUCT_TFT
            } else {
                arbiter_protocol::packets::s2c::PRODUCT_ROC
            },
            version: self.cfg.lan_war3version,
            host_counter: self.host_counter,
        });

        self.current_game = Some(game);
        let snapshot = self.current_game.as_ref();
        self.status.push_game(snapshot);
    }

    fn update_auto_host(&mut self) {
        if self.auto_host.game_name.is_empty()
            || self.auto_host.max_games == 0
            || self.auto_host.start_players == 0
            || self.auto_host.last_time.elapsed()
                < Duration::from_secs(u64::from(self.cfg.bot_rehostdelay))
        {
            return;
        }

        self.auto_host.last_time = Instant::now();

        // Mirror the create_game checks here and fail silently; a recurring
        // failure would otherwise spam chat every rehost interval.
        if self.exiting_nice
            || !self.settings.enabled
            || self.current_game.is_some()
            || self.games.len() >= self.cfg.bot_maxgames as usize
            || self.games.len() >= self.auto_host.max_games as usize
        {
            return;
        }

        if !self.map.valid() {
            info!(
                "stopped auto hosting, map config file [{}] is invalid",
                self.map.cfg_file.display()
            );
            self.clear_auto_host();
            return;
        }

        let game_name = self
            .map
            .game_name_with_random_mode()
            .unwrap_or_else(|| self.auto_host.game_name.clone());

        if game_name.len() > 31 {
            info!(
                "stopped auto hosting, next game name [{game_name}] is too long \
                 (the maximum is 31 characters)"
            );
            self.clear_auto_host();
            return;
        }

        let owner = self.auto_host.owner.clone();
        let server = self.auto_host.server.clone();

        self.create_game(
            self.map.clone(),
            GAME_PUBLIC,
            game_name,
            owner.clone(),
            owner,
            server,
            false,
        );

        if let Some(game) = &mut self.current_game {
            game.auto_start_players = self.auto_host.start_players;

            if self.auto_host.matchmaking {
                if self.map.matchmaking_category.is_empty() {
                    info!("autohostmm - map_matchmakingcategory not found, matchmaking disabled");
                } else if self.map.options & crate::map::MAPOPT_FIXED_PLAYER_SETTINGS == 0 {
                    info!(
                        "autohostmm - matchmaking can only be used with fixed player settings, \
                         matchmaking disabled"
                    );
                } else {
                    game.matchmaking = true;
                    game.minimum_score = self.auto_host.minimum_score;
                    game.maximum_score = self.auto_host.maximum_score;
                }
            }
        }
    }

    fn clear_auto_host(&mut self) {
        self.auto_host.game_name.clear();
        self.auto_host.owner.clear();
        self.auto_host.server.clear();
        self.auto_host.max_games = 0;
        self.auto_host.start_players = 0;
        self.auto_host.matchmaking = false;
        self.auto_host.minimum_score = 0.0;
        self.auto_host.maximum_score = 0.0;
    }
}

