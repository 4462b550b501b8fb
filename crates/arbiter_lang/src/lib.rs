#![doc = include_str!("../README.md")]

use std::collections::HashMap;
use std::path::Path;

/// The built-in templates. Overrides are matched by key.
const DEFAULTS: &[(&str, &str)] = &[
    ("unable_to_create_game_disabled", "Unable to create game [{1}], creating games is disabled"),
    ("unable_to_create_game_name_too_long", "Unable to create game [{1}], the game name is too long (the maximum is 31 characters)"),
    ("unable_to_create_game_invalid_map", "Unable to create game [{1}], the currently loaded map config file is invalid"),
    ("unable_to_create_game_another_game_in_lobby", "Unable to create game [{1}], there is already a game in the lobby ({2})"),
    ("unable_to_create_game_max_games_reached", "Unable to create game [{1}], the maximum number of games has been reached ({2})"),
    ("creating_private_game", "Creating private game [{1}] started by [{2}]"),
    ("creating_public_game", "Creating public game [{1}] started by [{2}]"),
    ("connecting_to_bnet", "Connecting to server [{1}]"),
    ("connected_to_bnet", "Connected to server [{1}]"),
    ("disconnected_from_bnet", "Disconnected from server [{1}]"),
    ("logged_in_to_bnet", "Logged in to server [{1}]"),
    ("connecting_to_bnet_timed_out", "Connecting to server [{1}] timed out, waiting {2} seconds to try again"),
    ("count_down_started", "Countdown started"),
    ("count_down_aborted", "Countdown aborted!"),
    ("count_down_aborted_someone_left_recently", "Countdown aborted because someone left the game less than two seconds ago!"),
    ("game_is_starting", "The game is starting, please wait"),
    ("unable_to_ban_no_matches_found", "Unable to ban player [{1}]. No matches found"),
    ("unable_to_ban_found_more_than_one_match", "Unable to ban player [{1}]. Found more than one match"),
    ("player_was_banned_by_player", "Player [{2}] was banned by player [{3}] on server [{1}]"),
    ("user_was_banned_on_by_because", "User [{2}] was banned on server [{1}] on {3} by [{4}] because [{5}]"),
    ("user_is_not_banned", "User [{2}] is not banned on server [{1}]"),
    ("unbanned_user", "Unbanned user [{1}]"),
    ("error_unbanning_user", "Error unbanning user [{1}]"),
    ("announce_message_enabled", "Announce message enabled"),
    ("announce_message_disabled", "Announce message disabled"),
    ("auto_save_enabled", "Auto save enabled"),
    ("auto_save_disabled", "Auto save disabled"),
    ("auto_start_disabled", "Auto start disabled"),
    ("auto_start_enabled", "Auto start enabled with {1} players"),
    ("checked_player", "Checked player [{1}]. Ping: {2}, From: {3}, Admin: {4}, Owner: {5}, Spoof checked: {6}, Realm: {7}, Reserved: {8}"),
    ("unable_to_check_player_no_matches_found", "Unable to check player [{1}]. No matches found"),
    ("unable_to_check_player_found_more_than_one_match", "Unable to check player [{1}]. Found more than one match"),
    ("clearing_hcl", "Clearing HCL command string"),
    ("setting_hcl", "Setting HCL command string to [{1}]"),
    ("unable_to_set_hcl_invalid", "Unable to set HCL command string because it contains invalid characters"),
    ("unable_to_set_hcl_too_long", "Unable to set HCL command string because it's too long"),
    ("the_hcl_is", "The HCL command string is [{1}]"),
    ("unable_to_start_download_no_matches_found", "Unable to start download for player [{1}]. No matches found"),
    ("unable_to_start_download_found_more_than_one_match", "Unable to start download for player [{1}]. Found more than one match"),
    ("kicking_players_with_pings_greater_than", "Kicking {1} players with pings greater than {2}"),
    ("latency_is", "The game latency is {1} milliseconds"),
    ("setting_latency_to", "Setting game latency to {1} milliseconds"),
    ("setting_latency_to_minimum", "Setting game latency to the minimum of {1} milliseconds"),
    ("setting_latency_to_maximum", "Setting game latency to the maximum of {1} milliseconds"),
    ("sync_limit_is", "The sync limit is {1} packets"),
    ("setting_sync_limit_to", "Setting sync limit to {1} packets"),
    ("setting_sync_limit_to_minimum", "Setting sync limit to the minimum of {1} packets"),
    ("setting_sync_limit_to_maximum", "Setting sync limit to the maximum of {1} packets"),
    ("game_locked", "Game locked. Only the game owner and root admins can run game commands"),
    ("game_unlocked", "Game unlocked"),
    ("the_game_is_locked", "The game is locked"),
    ("local_admin_messages_enabled", "Local admin messages enabled"),
    ("local_admin_messages_disabled", "Local admin messages disabled"),
    ("muted_player", "Player [{1}] was muted by player [{2}]"),
    ("unmuted_player", "Player [{1}] was unmuted by player [{2}]"),
    ("unable_to_mute_no_matches_found", "Unable to mute/unmute player [{1}]. No matches found"),
    ("unable_to_mute_found_more_than_one_match", "Unable to mute/unmute player [{1}]. Found more than one match"),
    ("global_chat_muted", "Global chat muted (allied and private chat is unaffected)"),
    ("global_chat_unmuted", "Global chat unmuted"),
    ("setting_game_owner_to", "Setting game owner to [{1}]"),
    ("unable_to_set_game_owner", "Unable to set game owner because you are not the owner and the owner [{1}] is in the game"),
    ("shuffling_players", "Shuffling players"),
    ("trying_to_rehost_as_private_game", "Trying to rehost as private game [{1}]. Please wait, this will take several seconds"),
    ("trying_to_rehost_as_public_game", "Trying to rehost as public game [{1}]. Please wait, this will take several seconds"),
    ("rehost_was_successful", "Rehost was successful"),
    ("unable_to_rehost", "Unable to rehost the game, the game name is probably taken"),
    ("refresh_messages_enabled", "Refresh messages enabled"),
    ("refresh_messages_disabled", "Refresh messages disabled"),
    ("gamerefreshed", "Game refreshed"),
    ("added_player_to_the_hold_list", "Added player [{1}] to the hold list"),
    ("unable_to_kick_no_matches_found", "Unable to kick player [{1}]. No matches found"),
    ("unable_to_kick_found_more_than_one_match", "Unable to kick player [{1}]. Found more than one match"),
    ("was_kicked_by_player", "was kicked by player [{1}]"),
    ("was_kicked_by_vote", "was kicked by vote"),
    ("was_kicked_for_excessive_ping", "was kicked for excessive ping {1} > {2}"),
    ("has_left_voluntarily", "has left the game voluntarily"),
    ("has_lost_connection_closed_by_remote_host", "has lost the connection (connection closed by remote host)"),
    ("has_lost_connection_timed_out", "has lost the connection (timed out)"),
    ("lagged_out_dropped_by_admin", "lagged out (dropped by admin)"),
    ("lagged_out_dropped_by_vote", "lagged out (dropped by vote)"),
    ("was_disconnected_admin_ended_game", "was disconnected (admin ended game)"),
    ("was_dropped_desync", "was dropped due to desync"),
    ("started_vote_kick", "[{2}] voted to kick [{1}]. {3} more votes are needed to pass"),
    ("type_yes_to_vote", "Type {1}yes to vote"),
    ("vote_kick_passed", "A votekick against player [{1}] has passed"),
    ("error_vote_kicking_player", "Error votekicking player [{1}]"),
    ("vote_kick_accepted_need_more_votes", "[{2}] voted to kick [{1}]. {3} more votes are needed to pass"),
    ("vote_kick_cancelled", "A votekick against player [{1}] has been cancelled"),
    ("vote_kick_expired", "A votekick against player [{1}] has expired"),
    ("unable_to_vote_kick_already_in_progress", "Unable to start votekick. Another votekick is in progress"),
    ("unable_to_vote_kick_not_enough_players", "Unable to start votekick. There aren't enough players in the game for a votekick"),
    ("unable_to_vote_kick_no_matches_found", "Unable to votekick player [{1}]. No matches found"),
    ("unable_to_vote_kick_player_is_reserved", "Unable to votekick player [{1}]. That player is reserved and cannot be votekicked"),
    ("unable_to_vote_kick_found_more_than_one_match", "Unable to votekick player [{1}]. Found more than one match"),
    ("has_played_games_with_this_bot", "[{1}] has played {4} games with this bot. First game: {2}. Last game: {3}. Average loading time: {5} seconds. Average stay: {6} percent"),
    ("hasnt_played_games_with_this_bot", "[{1}] hasn't played any games with this bot"),
    ("has_played_dota_games_with_this_bot", "[{1}] has played {2} DotA games with this bot (W/L: {3}/{4}). Hero K/D/A: {5}/{6}/{7}"),
    ("hasnt_played_dota_games_with_this_bot", "[{1}] hasn't played any DotA games with this bot"),
    ("version_admin", "Version: Arbiter {1} (admin)"),
    ("version_notadmin", "Version: Arbiter {1}"),
    ("spoof_check_accepted", "Spoof check accepted for [{1}] on server [{2}]"),
    ("spoof_possible_is_not_in_game", "Name spoof detected! The real [{1}] is not in this game"),
    ("please_spoof_check", "Please spoofcheck by whispering the bot"),
    ("desync_detected", "Warning! Desync detected!"),
    ("player_is_saving_the_game", "Player [{1}] is saving the game"),
    ("game_over_timer_started", "Game over timer started (stats class reported game over)"),
    ("waiting_for_players_before_auto_start", "Waiting for {1} more players before the game will automatically start"),
    ("players_not_yet_spoof_checked", "Players not yet spoof checked: {1}"),
    ("was_unrecoverably_dropped_from_gproxy", "was unrecoverably dropped from GProxy++"),
    ("player_lost_connection_but_reconnecting", "Player [{1}] has lost the connection but is using GProxy++ and may reconnect"),
    ("player_reconnected_with_gproxy", "Player [{1}] reconnected with GProxy++!"),
];

/// The chat-line template table.
///
/// Missing keys fall back to the built-in English defaults, so a partial
/// override file is fine and an empty [`Language::default`] is fully usable.
#[derive(Clone, Default, Debug)]
pub struct Language {
    overrides: HashMap<String, String>,
}

impl Language {
    /// Loads overrides from a TOML file of `key = "template"` pairs.
    pub fn load(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let text = std::fs::read_to_string(path)?;
        let table: HashMap<String, String> = toml::from_str(&text)?;

        Ok(Self { overrides: table })
    }

    fn template<'a>(&'a self, key: &'a str) -> &'a str {
        if let Some(t) = self.overrides.get(key) {
            return t;
        }

        DEFAULTS
            .iter()
            .find(|(k, _)| *k == key)
            .map(|(_, t)| *t)
            .unwrap_or(key)
    }

    /// Renders the template for `key`, substituting `{1}`, `{2}`, …
    /// positionally with `args`.
    pub fn tr(&self, key: &str, args: &[&str]) -> String {
        let mut out = self.template(key).to_owned();

        for (i, arg) in args.iter().enumerate() {
            out = out.replace(&format!("{{{}}}", i + 1), arg);
        }

        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn substitutes_positionally() {
        let lang = Language::default();
        assert_eq!(
            lang.tr("player_was_banned_by_player", &["useast", "Varlock", "Admin"]),
            "Player [Varlock] was banned by player [Admin] on server [useast]"
        );
    }

    #[test]
    fn unknown_key_falls_back_to_key() {
        let lang = Language::default();
        assert_eq!(lang.tr("no_such_key", &[]), "no_such_key");
    }

    #[test]
    fn overrides_win() {
        let mut lang = Language::default();
        lang.overrides
            .insert("game_locked".into(), "locked: {1}".into());
        assert_eq!(lang.tr("game_locked", &["yes"]), "locked: yes");
    }

    #[test]
    fn defaults_have_unique_keys() {
        let mut seen = std::collections::HashSet::new();
        for (key, _) in DEFAULTS {
            assert!(seen.insert(key), "duplicate key {key}");
        }
    }
}
