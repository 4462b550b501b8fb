//! Map descriptors.
//!
//! The bot never opens the map archive itself; maps are described by TOML
//! files carrying the values a hosted lobby needs (path, size, checksums,
//! flags and the slot template). Reading the archive to produce such a
//! descriptor is an offline concern.

use std::path::{Path, PathBuf};

use arbiter_protocol::slot::{SlotData, SLOT_RACE_RANDOM, SLOT_RACE_SELECTABLE};
use arbiter_protocol::stat_string;
use serde::Deserialize;

use crate::error::Error;

pub const MAPOPT_MELEE: u32 = 1 << 2;
pub const MAPOPT_FIXED_PLAYER_SETTINGS: u32 = 1 << 5;
pub const MAPOPT_CUSTOM_FORCES: u32 = 1 << 6;

pub const MAPFLAG_TEAMS_TOGETHER: u32 = 1 << 0;
pub const MAPFLAG_FIXED_TEAMS: u32 = 1 << 1;
pub const MAPFLAG_UNIT_SHARE: u32 = 1 << 2;
pub const MAPFLAG_RANDOM_HERO: u32 = 1 << 3;
pub const MAPFLAG_RANDOM_RACES: u32 = 1 << 4;

pub const MAPGAMETYPE_UNKNOWN0: u32 = 1;
pub const MAPGAMETYPE_SAVEDGAME: u32 = 1 << 9;
pub const MAPGAMETYPE_PRIVATEGAME: u32 = 1 << 11;

#[derive(Clone, Debug, Deserialize)]
struct SlotTemplate {
    team: u8,
    colour: u8,
    #[serde(default)]
    race: Option<String>,
}

#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
struct MapFile {
    map_path: String,
    map_local_path: String,
    map_size: u32,
    map_info: u32,
    map_crc: u32,
    map_sha1: Vec<u8>,
    map_options: u32,
    map_flags: u32,
    map_speed: u8,
    map_visibility: u8,
    map_observers: u8,
    map_num_players: u8,
    map_num_teams: u8,
    map_type: String,
    map_matchmaking_category: String,
    map_default_hcl: String,
    map_gamenames: Vec<String>,
    slots: Vec<SlotTemplate>,
}

impl Default for MapFile {
    fn default() -> Self {
        Self {
            map_path: String::new(),
            map_local_path: String::new(),
            map_size: 0,
            map_info: 0,
            map_crc: 0,
            map_sha1: vec![],
            map_options: 0,
            map_flags: MAPFLAG_TEAMS_TOGETHER | MAPFLAG_FIXED_TEAMS,
            map_speed: 3,
            map_visibility: 4,
            map_observers: 1,
            map_num_players: 0,
            map_num_teams: 0,
            map_type: String::new(),
            map_matchmaking_category: String::new(),
            map_default_hcl: String::new(),
            map_gamenames: vec![],
            slots: vec![],
        }
    }
}

/// A loaded, validated map descriptor. Read-only once loaded; games share it
/// by `Arc`.
#[derive(Clone, Debug)]
pub struct Map {
    pub cfg_file: PathBuf,
    /// The path the client sees, e.g. `Maps\Download\DotA v6.83d.w3x`.
    pub path: String,
    /// Where the archive lives on disk, for serving map downloads. Optional;
    /// without it downloads are refused.
    pub local_path: Option<PathBuf>,
    pub size: u32,
    pub info: u32,
    pub crc: u32,
    pub sha1: [u8; 20],
    pub options: u32,
    pub flags: u32,
    pub speed: u8,
    pub visibility: u8,
    pub observers: u8,
    pub num_players: u8,
    pub num_teams: u8,
    pub map_type: String,
    pub matchmaking_category: String,
    pub default_hcl: String,
    /// Alternative game names for auto-host mode rotation.
    pub game_names: Vec<String>,
    pub slots: Vec<SlotData>,
    valid: bool,
}

impl Map {
    /// An invalid placeholder descriptor. Keeps the process alive (realm
    /// chat still works) when no hostable map is configured.
    pub fn placeholder(cfg_file: PathBuf) -> Self {
        Self::from_file(cfg_file, MapFile::default())
    }

    pub fn load(path: &Path) -> Result<Self, Error> {
        let text =
            std::fs::read_to_string(path).map_err(|_| Error::MapInvalid(path.to_owned()))?;
        let file: MapFile =
            toml::from_str(&text).map_err(|_| Error::MapInvalid(path.to_owned()))?;

        Ok(Self::from_file(path.to_owned(), file))
    }

    fn from_file(cfg_file: PathBuf, file: MapFile) -> Self {
        let slots = file
            .slots
            .iter()
            .map(|s| {
                let race = match s.race.as_deref() {
                    Some("human") => arbiter_protocol::slot::SLOT_RACE_HUMAN,
                    Some("orc") => arbiter_protocol::slot::SLOT_RACE_ORC,
                    Some("nightelf") => arbiter_protocol::slot::SLOT_RACE_NIGHTELF,
                    Some("undead") => arbiter_protocol::slot::SLOT_RACE_UNDEAD,
                    _ => SLOT_RACE_RANDOM,
                };

                let selectable = if file.map_options & MAPOPT_FIXED_PLAYER_SETTINGS == 0 {
                    SLOT_RACE_SELECTABLE
                } else {
                    0
                };

                SlotData::open(s.team, s.colour, race | selectable)
            })
            .collect::<Vec<_>>();

        let mut sha1 = [0u8; 20];
        let sha1_ok = file.map_sha1.len() == 20;
        if sha1_ok {
            sha1.copy_from_slice(&file.map_sha1);
        }

        let valid = !file.map_path.is_empty()
            && file.map_size > 0
            && sha1_ok
            && !slots.is_empty()
            && slots.len() <= arbiter_protocol::slot::MAX_SLOTS;

        let local_path = if file.map_local_path.is_empty() {
            None
        } else {
            Some(PathBuf::from(file.map_local_path))
        };

        Self {
            cfg_file,
            path: file.map_path,
            local_path,
            size: file.map_size,
            info: file.map_info,
            crc: file.map_crc,
            sha1,
            options: file.map_options,
            flags: file.map_flags,
            speed: file.map_speed,
            visibility: file.map_visibility,
            observers: file.map_observers,
            num_players: file.map_num_players,
            num_teams: file.map_num_teams,
            map_type: file.map_type,
            matchmaking_category: file.map_matchmaking_category,
            default_hcl: file.map_default_hcl,
            game_names: file.map_gamenames,
            slots,
            valid,
        }
    }

    pub fn valid(&self) -> bool {
        self.valid
    }

    /// The game flags word broadcast in `GAMEINFO`: speed, visibility,
    /// observer and fixed-teams bits packed the way the game expects.
    pub fn game_flags(&self) -> u32 {
        let mut flags: u32 = match self.speed {
            1 => 0x00000000,
            2 => 0x00000001,
            _ => 0x00000002,
        };

        match self.visibility {
            1 => flags |= 0x00000100,
            2 => flags |= 0x00000200,
            3 => flags |= 0x00000400,
            _ => flags |= 0x00000800,
        }

        match self.observers {
            2 => flags |= 0x00002000,
            3 => flags |= 0x00003000,
            4 => flags |= 0x00006000,
            _ => {}
        }

        if self.flags & MAPFLAG_TEAMS_TOGETHER != 0 {
            flags |= 0x00004000;
        }
        if self.flags & MAPFLAG_FIXED_TEAMS != 0 {
            flags |= 0x00060000;
        }
        if self.flags & MAPFLAG_UNIT_SHARE != 0 {
            flags |= 0x01000000;
        }
        if self.flags & MAPFLAG_RANDOM_HERO != 0 {
            flags |= 0x02000000;
        }
        if self.flags & MAPFLAG_RANDOM_RACES != 0 {
            flags |= 0x04000000;
        }

        flags
    }

    /// Slot layout style byte for the slot-info block.
    pub fn layout_style(&self) -> u8 {
        if self.options & MAPOPT_CUSTOM_FORCES == 0 {
            0
        } else if self.options & MAPOPT_FIXED_PLAYER_SETTINGS == 0 {
            1
        } else {
            3
        }
    }

    /// Picks a random alternative game name, if the descriptor carries any.
    pub fn game_name_with_random_mode(&self) -> Option<String> {
        use rand::seq::SliceRandom;

        self.game_names
            .choose(&mut rand::thread_rng())
            .cloned()
    }

    /// The encoded stat string for `GAMEINFO` broadcasts.
    ///
    /// The map dimensions are pinned to 1984x1984; GProxy reads fixed offsets
    /// out of this block.
    pub fn stat_string(&self, host_name: &str) -> Vec<u8> {
        let mut raw = Vec::with_capacity(64 + self.path.len() + host_name.len());

        raw.extend_from_slice(&self.game_flags().to_le_bytes());
        raw.push(0);
        raw.extend_from_slice(&[0xC0, 0x07, 0xC0, 0x07]);
        raw.extend_from_slice(&self.crc.to_le_bytes());
        raw.extend_from_slice(self.path.as_bytes());
        raw.push(0);
        raw.extend_from_slice(host_name.as_bytes());
        raw.push(0);
        raw.push(0);
        raw.extend_from_slice(&self.sha1);

        stat_string::encode(&raw)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn descriptor() -> MapFile {
        toml::from_str(
            r#"
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
            map_type = "dota"
            slots = [
                { team = 0, colour = 0 },
                { team = 0, colour = 1 },
                { team = 1, colour = 6 },
                { team = 1, colour = 7 },
            ]
            "#,
        )
        .unwrap()
    }

    #[test]
    fn valid_descriptor_loads() {
        let map = Map::from_file(PathBuf::from("dota.toml"), descriptor());
        assert!(map.valid());
        assert_eq!(map.slots.len(), 4);
        assert_eq!(map.layout_style(), 1);
    }

    #[test]
    fn missing_sha1_invalidates() {
        let mut file = descriptor();
        file.map_sha1 = vec![1, 2, 3];
        assert!(!Map::from_file(PathBuf::from("x.toml"), file).valid());
    }

    #[test]
    fn stat_string_is_nul_free() {
        let map = Map::from_file(PathBuf::from("dota.toml"), descriptor());
        assert!(map.stat_string("arbiter").iter().all(|&b| b != 0));
    }

    #[test]
    fn fixed_player_settings_slots_are_not_selectable() {
        let mut file = descriptor();
        file.map_options = MAPOPT_CUSTOM_FORCES | MAPOPT_FIXED_PLAYER_SETTINGS;
        let map = Map::from_file(PathBuf::from("x.toml"), file);
        assert_eq!(map.layout_style(), 3);
        assert!(map
            .slots
            .iter()
            .all(|s| s.race & SLOT_RACE_SELECTABLE == 0));
    }
}
