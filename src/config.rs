//! Bot configuration.
//!
//! Two TOML files are read at startup: `default.toml` (always, if present)
//! and the file named on the command line (default `arbiter.toml`), merged
//! over it key by key. A subset of values is reloadable at runtime via
//! [`Host::set_configs`].
//!
//! [`Host::set_configs`]: crate::host::Host::set_configs

use std::path::Path;

use serde::Deserialize;

use crate::error::Error;

/// One chat/matchmaking realm connection.
#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct RealmConfig {
    pub server: String,
    pub server_alias: String,
    pub server_port: u16,
    pub username: String,
    pub password: String,
    pub first_channel: String,
    pub root_admins: Vec<String>,
    pub command_trigger: String,
    pub public_commands: bool,
}

impl Default for RealmConfig {
    fn default() -> Self {
        Self {
            server: String::new(),
            server_alias: String::new(),
            server_port: 6112,
            username: String::new(),
            password: String::new(),
            first_channel: "The Void".to_owned(),
            root_admins: vec![],
            command_trigger: "!".to_owned(),
            public_commands: true,
        }
    }
}

#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct BotConfig {
    // game listener
    pub bot_hostport: u16,
    pub bot_bindaddress: String,

    // GProxy reconnect sidechannel
    pub bot_reconnect: bool,
    pub bot_reconnectport: u16,
    pub bot_reconnectwaittime: u32,

    // hosting policy
    pub bot_maxgames: u32,
    pub bot_commandtrigger: String,
    pub bot_virtualhostname: String,
    pub bot_lobbytimelimit: u32,
    pub bot_rehostdelay: u32,
    pub bot_defaultmap: String,
    pub bot_mapcfgpath: String,

    // in-game timing
    pub bot_latency: u32,
    pub bot_synclimit: u32,
    pub bot_autokickping: u32,
    pub bot_lcpings: bool,

    // votekick
    pub bot_votekickallowed: bool,
    pub bot_votekickpercentage: u32,

    pub bot_desynckick: bool,
    pub bot_usenormalcountdown: bool,
    pub bot_observer_slots: String,
    pub bot_addcompsallowed: bool,
    pub bot_tmprootpassword: String,
    pub bot_hideadmincommands: bool,
    pub bot_refreshmessages: bool,
    pub bot_localadminmessages: bool,
    pub bot_autolock: bool,
    pub bot_autosave: bool,

    // spoof checking and reservations
    pub bot_spoofchecks: u32,
    pub bot_requirespoofchecks: bool,
    pub bot_reserveadmins: bool,

    // map downloads
    pub bot_allowdownloads: u32,
    pub bot_maxdownloaders: u32,
    pub bot_maxdownloadspeed: u32,
    pub bot_pingduringdownloads: bool,

    // LAN admin policy: 0 = off, 1 = admins, 2 = root admins, 3 = both
    pub lan_admins: u32,
    pub lan_rootadmins: Vec<String>,
    pub lan_getrootadmins: bool,

    // product
    pub bot_tft: bool,
    pub lan_war3version: u32,

    // UDP broadcast
    pub udp_broadcasttarget: String,
    pub udp_dontroute: bool,

    // status broadcaster
    pub bot_tcpstatus: bool,
    pub bot_statusport: u16,

    // auto-host
    pub autohost_maxgames: u32,
    pub autohost_startplayers: u32,
    pub autohost_gamename: String,
    pub autohost_owner: String,

    // databases
    pub db_file: String,
    pub db_local_file: String,
    pub bot_language: String,

    #[serde(rename = "realm")]
    pub realms: Vec<RealmConfig>,
}

impl Default for BotConfig {
    fn default() -> Self {
        Self {
            bot_hostport: 6112,
            bot_bindaddress: String::new(),
            bot_reconnect: true,
            bot_reconnectport: 6114,
            bot_reconnectwaittime: 3,
            bot_maxgames: 5,
            bot_commandtrigger: "!".to_owned(),
            bot_virtualhostname: "|cFF4080C0Arbiter".to_owned(),
            bot_lobbytimelimit: 10,
            bot_rehostdelay: 15,
            bot_defaultmap: "map".to_owned(),
            bot_mapcfgpath: "maps".to_owned(),
            bot_latency: 100,
            bot_synclimit: 50,
            bot_autokickping: 400,
            bot_lcpings: true,
            bot_votekickallowed: true,
            bot_votekickpercentage: 100,
            bot_desynckick: false,
            bot_usenormalcountdown: false,
            bot_observer_slots: "5 11".to_owned(),
            bot_addcompsallowed: false,
            bot_tmprootpassword: "777777777777".to_owned(),
            bot_hideadmincommands: false,
            bot_refreshmessages: false,
            bot_localadminmessages: true,
            bot_autolock: false,
            bot_autosave: false,
            bot_spoofchecks: 2,
            bot_requirespoofchecks: false,
            bot_reserveadmins: true,
            bot_allowdownloads: 0,
            bot_maxdownloaders: 3,
            bot_maxdownloadspeed: 100,
            bot_pingduringdownloads: false,
            lan_admins: 0,
            lan_rootadmins: vec![],
            lan_getrootadmins: true,
            bot_tft: true,
            lan_war3version: crate::LAN_WAR3_VERSION,
            udp_broadcasttarget: "255.255.255.255".to_owned(),
            udp_dontroute: false,
            bot_tcpstatus: true,
            bot_statusport: 6150,
            autohost_maxgames: 0,
            autohost_startplayers: 0,
            autohost_gamename: String::new(),
            autohost_owner: String::new(),
            db_file: "arbiter.dbs".to_owned(),
            db_local_file: "arbiter-local.dbs".to_owned(),
            bot_language: "language.toml".to_owned(),
            realms: vec![],
        }
    }
}

impl BotConfig {
    /// Reads `default.toml` (if it exists) and `path` (if it exists), merging
    /// the latter over the former. A missing user file is not an error; the
    /// built-in defaults already make a runnable LAN-only bot.
    pub fn load(path: &Path) -> Result<Self, Error> {
        let mut merged = toml::Table::new();

        for candidate in [Path::new("default.toml"), path] {
            if !candidate.exists() {
                continue;
            }

            let text = std::fs::read_to_string(candidate)
                .map_err(|e| Error::ConfigInvalid(format!("{}: {e}", candidate.display())))?;
            let table: toml::Table = toml::from_str(&text)
                .map_err(|e| Error::ConfigInvalid(format!("{}: {e}", candidate.display())))?;

            merge_tables(&mut merged, table);
        }

        let mut cfg: Self = toml::Value::Table(merged)
            .try_into()
            .map_err(|e| Error::ConfigInvalid(e.to_string()))?;

        cfg.sanitize();
        Ok(cfg)
    }

    /// Clamps the values the original clamps with a console warning.
    pub fn sanitize(&mut self) {
        if self.bot_commandtrigger.is_empty() {
            self.bot_commandtrigger = "!".to_owned();
        }

        if self.bot_virtualhostname.chars().count() > 15 {
            tracing::warn!(
                "bot_virtualhostname is longer than 15 characters, using default virtual host name"
            );
            self.bot_virtualhostname = "|cFF4080C0Arbiter".to_owned();
        }

        if self.bot_votekickpercentage > 100 {
            tracing::warn!("bot_votekickpercentage is greater than 100, using 100 instead");
            self.bot_votekickpercentage = 100;
        }
    }

    pub fn command_trigger(&self) -> char {
        self.bot_commandtrigger.chars().next().unwrap_or('!')
    }

    /// The slot indices (0-based) configured as observer seats.
    pub fn observer_slots(&self) -> Vec<u8> {
        self.bot_observer_slots
            .split_whitespace()
            .filter_map(|s| s.parse().ok())
            .collect()
    }
}

fn merge_tables(base: &mut toml::Table, overlay: toml::Table) {
    for (key, value) in overlay {
        let value = match (base.remove(&key), value) {
            (Some(toml::Value::Table(mut existing)), toml::Value::Table(overlay)) => {
                merge_tables(&mut existing, overlay);
                toml::Value::Table(existing)
            }
            (_, value) => value,
        };

        base.insert(key, value);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_sane() {
        let cfg = BotConfig::default();
        assert_eq!(cfg.bot_hostport, 6112);
        assert_eq!(cfg.bot_latency, 100);
        assert_eq!(cfg.command_trigger(), '!');
        assert_eq!(cfg.observer_slots(), vec![5, 11]);
    }

    #[test]
    fn sanitize_clamps_votekick_percentage() {
        let mut cfg = BotConfig {
            bot_votekickpercentage: 250,
            ..Default::default()
        };
        cfg.sanitize();
        assert_eq!(cfg.bot_votekickpercentage, 100);
    }

    #[test]
    fn sanitize_rejects_long_virtual_host_name() {
        let mut cfg = BotConfig {
            bot_virtualhostname: "x".repeat(20),
            ..Default::default()
        };
        cfg.sanitize();
        assert_eq!(cfg.bot_virtualhostname, "|cFF4080C0Arbiter");
    }

    #[test]
    fn overlay_wins_in_merge() {
        let mut base: toml::Table = toml::from_str("bot_latency = 100\nbot_maxgames = 5").unwrap();
        let overlay: toml::Table = toml::from_str("bot_latency = 80").unwrap();

        merge_tables(&mut base, overlay);

        assert_eq!(base["bot_latency"], toml::Value::Integer(80));
        assert_eq!(base["bot_maxgames"], toml::Value::Integer(5));
    }
}
