//! Command dispatch: capabilities, gates and effects.

use std::time::Duration;

use pretty_assertions::assert_eq;

use super::util::{join_player, make_game, rewind, TestCtx};
use crate::command::dispatch;
use crate::game::{Game, Phase};
use crate::host::HostSettings;
use crate::realm::GAME_PUBLIC;

/// A harness whose LAN policy grants root admin to local players.
fn root_harness() -> TestCtx {
    let mut harness = TestCtx::new();
    harness.cfg.lan_admins = 2;
    harness.cfg.lan_getrootadmins = false;
    harness.settings = HostSettings::from_config(&harness.cfg);
    harness
}

fn lobby_with(harness: &mut TestCtx, names: &[&str]) -> Game {
    let mut game = make_game(harness);

    for name in names {
        join_player(&mut game, harness, name);
    }

    game
}

#[test]
fn rehost_with_long_name_changes_nothing() {
    let mut harness = root_harness();
    let mut game = lobby_with(&mut harness, &["Rooter"]);

    let counter_before = game.host_counter;
    let name_before = game.game_name.clone();
    let state_before = game.game_state;

    dispatch(
        &mut game,
        &mut harness.ctx(),
        2,
        "priv",
        "this_is_a_name_longer_than_thirty_one",
    );

    assert_eq!(game.host_counter, counter_before);
    assert_eq!(game.game_name, name_before);
    assert_eq!(game.game_state, state_before);
    assert_eq!(game.game_state, GAME_PUBLIC);
}

#[test]
fn unknown_commands_are_noops() {
    let mut harness = root_harness();
    let mut game = lobby_with(&mut harness, &["Rooter"]);

    let hide = dispatch(&mut game, &mut harness.ctx(), 2, "nosuchcommand", "x");
    assert!(!hide);
}

#[test]
fn latency_is_clamped() {
    let mut harness = root_harness();
    let mut game = lobby_with(&mut harness, &["Rooter"]);

    dispatch(&mut game, &mut harness.ctx(), 2, "latency", "5");
    assert_eq!(game.latency, 20);

    dispatch(&mut game, &mut harness.ctx(), 2, "latency", "9999");
    assert_eq!(game.latency, 500);

    dispatch(&mut game, &mut harness.ctx(), 2, "latency", "80");
    assert_eq!(game.latency, 80);
}

#[test]
fn synclimit_is_clamped() {
    let mut harness = root_harness();
    let mut game = lobby_with(&mut harness, &["Rooter"]);

    dispatch(&mut game, &mut harness.ctx(), 2, "synclimit", "3");
    assert_eq!(game.sync_limit, 10);

    dispatch(&mut game, &mut harness.ctx(), 2, "synclimit", "99999");
    assert_eq!(game.sync_limit, 10000);
}

#[test]
fn handicap_accepts_admin_override_range() {
    let mut harness = root_harness();
    let mut game = lobby_with(&mut harness, &["Rooter"]);

    // 42 is outside the map ABI set but inside the admin override range.
    dispatch(&mut game, &mut harness.ctx(), 2, "handicap", "1 42");
    assert_eq!(game.slots[0].handicap, 42);

    dispatch(&mut game, &mut harness.ctx(), 2, "handicap", "1 0");
    assert_eq!(game.slots[0].handicap, 42, "zero is rejected");
}

#[test]
fn hcl_rejects_bad_charset_and_remembers_override() {
    let mut harness = root_harness();
    let mut game = lobby_with(&mut harness, &["Rooter"]);

    dispatch(&mut game, &mut harness.ctx(), 2, "hcl", "AP");
    assert!(game.hcl_command_string.is_empty(), "uppercase is invalid");

    dispatch(&mut game, &mut harness.ctx(), 2, "hcl", "ap");
    assert_eq!(game.hcl_command_string, "ap");
    assert!(game.hcl_override);

    dispatch(&mut game, &mut harness.ctx(), 2, "clearhcl", "");
    assert!(game.hcl_command_string.is_empty());
}

#[test]
fn lock_gates_non_owner_admins() {
    let mut harness = root_harness();
    let mut game = lobby_with(&mut harness, &["Rooter", "Second"]);

    dispatch(&mut game, &mut harness.ctx(), 2, "lock", "");
    assert!(game.locked);

    // "Second" (pid 3) is neither root, owner nor blue; the LAN policy makes
    // them root here, so narrow it first.
    harness.cfg.lan_admins = 0;
    harness.settings = HostSettings::from_config(&harness.cfg);

    // Owner override still applies.
    game.owner_name = "Second".to_owned();
    if let Some(p) = game.player_mut_from_pid(3) {
        p.spoofed = true;
    }

    dispatch(&mut game, &mut harness.ctx(), 3, "unlock", "");
    assert!(!game.locked);
}

#[test]
fn swap_blocks_observer_seats_for_non_root() {
    let mut harness = TestCtx::new();
    // Admin (not root) via LAN policy.
    harness.cfg.lan_admins = 1;
    harness.cfg.lan_getrootadmins = false;
    // Slot 6 (0-based 5) is an observer seat by default config ("5 11").
    harness.settings = HostSettings::from_config(&harness.cfg);

    let mut game = lobby_with(&mut harness, &["Admin", "Other"]);

    let before = game.slots.clone();
    dispatch(&mut game, &mut harness.ctx(), 2, "swap", "1 6");
    assert_eq!(game.slots, before, "swap into an observer seat is refused");

    dispatch(&mut game, &mut harness.ctx(), 2, "swap", "1 3");
    assert_ne!(game.slots, before, "ordinary swaps still work");
}

#[test]
fn swap_for_root_ignores_observer_rules() {
    let mut harness = root_harness();
    let mut game = lobby_with(&mut harness, &["Rooter", "Other"]);

    let before = game.slots.clone();
    dispatch(&mut game, &mut harness.ctx(), 2, "swap", "1 6");
    assert_ne!(game.slots, before);
}

#[test]
fn desync_toggle_accepts_any_case() {
    let mut harness = root_harness();
    let mut game = lobby_with(&mut harness, &["Rooter"]);

    dispatch(&mut game, &mut harness.ctx(), 2, "desync", "ON");
    assert!(harness.settings.desync_kick);

    dispatch(&mut game, &mut harness.ctx(), 2, "desync", "oFF");
    assert!(!harness.settings.desync_kick);

    dispatch(&mut game, &mut harness.ctx(), 2, "desync", "maybe");
    assert!(!harness.settings.desync_kick, "junk input only prints usage");
}

#[test]
fn tmp_root_password_grants_root() {
    let mut harness = TestCtx::new();
    let mut game = lobby_with(&mut harness, &["Guest", "Other"]);

    // Wrong password first.
    dispatch(&mut game, &mut harness.ctx(), 3, "p", "wrong");
    assert!(!game.is_tmp_root_admin("Other"));

    let password = harness.cfg.bot_tmprootpassword.clone();
    dispatch(&mut game, &mut harness.ctx(), 3, "p", &password);
    assert!(game.is_tmp_root_admin("Other"));
    assert!(game.player_from_name("Other").unwrap().reserved);

    // The grant carries root capability: !unhost works now.
    dispatch(&mut game, &mut harness.ctx(), 3, "unhost", "");
    assert!(game.exiting);
}

#[test]
fn unhost_requires_root() {
    let mut harness = TestCtx::new();
    let mut game = lobby_with(&mut harness, &["Bluey"]);

    // Blue is an admin but not a root admin.
    dispatch(&mut game, &mut harness.ctx(), 2, "unhost", "");
    assert!(!game.exiting);
}

#[test]
fn comp_gated_on_config_for_non_root() {
    let mut harness = TestCtx::new();
    let mut game = lobby_with(&mut harness, &["Bluey"]);

    dispatch(&mut game, &mut harness.ctx(), 2, "comp", "6 2");
    assert!(!game.slots[5].is_computer(), "blue may not add computers");

    harness.cfg.bot_addcompsallowed = true;
    dispatch(&mut game, &mut harness.ctx(), 2, "comp", "6 2");
    assert!(game.slots[5].is_computer());
    assert_eq!(game.slots[5].computer_type, 2);
}

#[test]
fn fakeplayer_toggles_and_occupies_one_slot() {
    let mut harness = root_harness();
    let mut game = lobby_with(&mut harness, &["Rooter"]);

    dispatch(&mut game, &mut harness.ctx(), 2, "fakeplayer", "");
    assert_ne!(game.fake_player_pid, 255);

    let fake_slots = game
        .slots
        .iter()
        .filter(|s| s.pid == game.fake_player_pid && s.is_occupied())
        .count();
    assert_eq!(fake_slots, 1);

    dispatch(&mut game, &mut harness.ctx(), 2, "fakeplayer", "");
    assert_eq!(game.fake_player_pid, 255);
}

#[test]
fn start_sets_autostart_to_current_humans() {
    let mut harness = root_harness();
    let mut game = lobby_with(&mut harness, &["Rooter", "Other", "Third"]);

    rewind(&mut game.last_player_leave, Duration::from_secs(3));
    dispatch(&mut game, &mut harness.ctx(), 2, "start", "");

    assert_eq!(game.auto_start_players, 3);
    assert!(game.using_start);
    assert_eq!(game.phase, Phase::Lobby);
}

#[test]
fn start_force_begins_countdown_for_root_only() {
    let mut harness = root_harness();
    let mut game = lobby_with(&mut harness, &["Rooter", "Other"]);

    rewind(&mut game.last_player_leave, Duration::from_secs(3));
    dispatch(&mut game, &mut harness.ctx(), 2, "start", "force");
    assert_eq!(game.phase, Phase::CountingDown);
}

#[test]
fn startn_jumps_to_zero_counter() {
    let mut harness = root_harness();
    let mut game = lobby_with(&mut harness, &["Rooter", "Other"]);

    rewind(&mut game.last_player_leave, Duration::from_secs(3));
    dispatch(&mut game, &mut harness.ctx(), 2, "startn", "");

    assert_eq!(game.phase, Phase::CountingDown);
    assert_eq!(game.countdown_counter, 0);

    // The very next tick starts loading.
    game.update(&mut harness.ctx());
    assert_eq!(game.phase, Phase::Loading);
}

#[test]
fn owner_command_reassigns_ownership() {
    let mut harness = root_harness();
    let mut game = lobby_with(&mut harness, &["Rooter", "Other"]);

    dispatch(&mut game, &mut harness.ctx(), 2, "owner", "Other");
    assert_eq!(game.owner_name, "Other");

    dispatch(&mut game, &mut harness.ctx(), 2, "owner", "");
    assert_eq!(game.owner_name, "Rooter");
}
