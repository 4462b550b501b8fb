//! Per-map statistics plugins.
//!
//! A stats plugin watches the relayed action stream and tells the game when
//! the map has declared a result; full parsing engines live outside the
//! core. The DotA recognizer below understands just enough of the map's
//! `dr.x` sync block to latch the winner and a handful of counters.

use crate::db::{Callable, Database};

/// Hook given a chance to inspect every relayed action.
pub trait Stats: Send {
    /// Returns true once the map has reported game over. Called for every
    /// action; must stay cheap.
    fn process_action(&mut self, pid: u8, action: &[u8]) -> bool;

    /// The game clock, fed in after every latency tick so durations can be
    /// recorded.
    fn set_game_ticks(&mut self, _ticks: u64) {}

    /// Persists whatever was collected, keyed by the stored game's row id.
    /// The returned callables are reaped by the host.
    fn save(&mut self, db: &Database, game_id: u32) -> Vec<Callable<u32>>;
}

/// Builds the plugin for a map descriptor, if its `map_type` has one.
pub fn for_map_type(map_type: &str) -> Option<Box<dyn Stats>> {
    match map_type {
        "dota" => Some(Box::new(DotaStats::new())),
        _ => None,
    }
}

const MAX_DOTA_COLOUR: usize = 12;

/// Recognizes the DotA map's game-over broadcast and per-player counters.
///
/// The map emits key/value sync data as actions containing the marker string
/// `dr.x` followed by NUL-terminated category and key strings and a 4-byte
/// value. `Global`/`Winner` ends the game; `Data`/`Kills<n>` style keys feed
/// the counters.
pub struct DotaStats {
    winner: u32,
    game_over: bool,
    kills: [u32; MAX_DOTA_COLOUR],
    deaths: [u32; MAX_DOTA_COLOUR],
    assists: [u32; MAX_DOTA_COLOUR],
    creep_kills: [u32; MAX_DOTA_COLOUR],
    creep_denies: [u32; MAX_DOTA_COLOUR],
    game_ticks: u64,
}

impl DotaStats {
    pub fn new() -> Self {
        Self {
            winner: 0,
            game_over: false,
            kills: [0; MAX_DOTA_COLOUR],
            deaths: [0; MAX_DOTA_COLOUR],
            assists: [0; MAX_DOTA_COLOUR],
            creep_kills: [0; MAX_DOTA_COLOUR],
            creep_denies: [0; MAX_DOTA_COLOUR],
            game_ticks: 0,
        }
    }

    pub fn winner(&self) -> u32 {
        self.winner
    }

    fn process_sync(&mut self, category: &[u8], key: &[u8], value: u32) {
        if category.eq_ignore_ascii_case(b"Global") && key.eq_ignore_ascii_case(b"Winner") {
            self.winner = value;
            self.game_over = true;
            return;
        }

        if !category.eq_ignore_ascii_case(b"Data") {
            return;
        }

        let (counter, colour) = match key.iter().position(|b| b.is_ascii_digit()) {
            Some(split) => key.split_at(split),
            None => return,
        };

        let Ok(colour) = std::str::from_utf8(colour)
            .unwrap_or("")
            .parse::<usize>()
        else {
            return;
        };

        if colour >= MAX_DOTA_COLOUR {
            return;
        }

        match counter {
            b"Hero" => self.kills[colour] = self.kills[colour].saturating_add(value),
            b"Death" => self.deaths[colour] = self.deaths[colour].saturating_add(value),
            b"Assist" => self.assists[colour] = self.assists[colour].saturating_add(value),
            b"CSK" => self.creep_kills[colour] = value,
            b"CSD" => self.creep_denies[colour] = value,
            _ => {}
        }
    }
}

impl Default for DotaStats {
    fn default() -> Self {
        Self::new()
    }
}

impl Stats for DotaStats {
    fn set_game_ticks(&mut self, ticks: u64) {
        self.game_ticks = ticks;
    }

    fn process_action(&mut self, _pid: u8, action: &[u8]) -> bool {
        // Scan for the map's sync marker. Actions can carry several blocks.
        let mut rest = action;

        while let Some(pos) = rest.windows(4).position(|w| w == b"dr.x") {
            let Some(after) = rest.get(pos + 5..) else {
                break;
            };
            rest = after;

            let Some(cat_end) = rest.iter().position(|&b| b == 0) else {
                break;
            };
            let category = &rest[..cat_end];
            rest = &rest[cat_end + 1..];

            let Some(key_end) = rest.iter().position(|&b| b == 0) else {
                break;
            };
            let key = &rest[..key_end];
            rest = &rest[key_end + 1..];

            if rest.len() < 4 {
                break;
            }
            let value = u32::from_le_bytes(rest[..4].try_into().unwrap());
            rest = &rest[4..];

            self.process_sync(category, key, value);
        }

        self.game_over
    }

    fn save(&mut self, db: &Database, game_id: u32) -> Vec<Callable<u32>> {
        let seconds = self.game_ticks / 1000;
        let mut callables = vec![db.dota_game_add(
            game_id,
            self.winner,
            (seconds / 60) as u32,
            (seconds % 60) as u32,
        )];

        for colour in 0..MAX_DOTA_COLOUR {
            let touched = self.kills[colour]
                + self.deaths[colour]
                + self.assists[colour]
                + self.creep_kills[colour]
                + self.creep_denies[colour];

            if touched > 0 {
                callables.push(db.dota_player_add(
                    game_id,
                    colour as u32,
                    self.kills[colour],
                    self.deaths[colour],
                    self.assists[colour],
                    self.creep_kills[colour],
                    self.creep_denies[colour],
                ));
            }
        }

        callables
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sync_action(category: &[u8], key: &[u8], value: u32) -> Vec<u8> {
        let mut action = vec![0x6B];
        action.extend_from_slice(b"dr.x");
        action.push(0);
        action.extend_from_slice(category);
        action.push(0);
        action.extend_from_slice(key);
        action.push(0);
        action.extend_from_slice(&value.to_le_bytes());
        action
    }

    #[test]
    fn winner_latches_game_over() {
        let mut stats = DotaStats::new();

        assert!(!stats.process_action(2, &sync_action(b"Data", b"Hero1", 3)));
        assert!(stats.process_action(2, &sync_action(b"Global", b"Winner", 1)));
        assert_eq!(stats.winner(), 1);
        assert_eq!(stats.kills[1], 3);
    }

    #[test]
    fn unrelated_actions_are_ignored() {
        let mut stats = DotaStats::new();
        assert!(!stats.process_action(2, &[0x12, 0x34, 0x56]));
        assert!(!stats.process_action(2, b"no marker here"));
    }

    #[test]
    fn out_of_range_colour_is_dropped() {
        let mut stats = DotaStats::new();
        stats.process_action(2, &sync_action(b"Data", b"Hero13", 5));
        assert!(stats.kills.iter().all(|&k| k == 0));
    }
}
