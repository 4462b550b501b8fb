//! The lobby-to-loaded lifecycle and its invariants.

use std::time::Duration;

use arbiter_protocol::packets::c2s;
use arbiter_protocol::slot::OBSERVER_TEAM;
use arbiter_protocol::Packet;
use pretty_assertions::assert_eq;

use super::util::{join_player, make_game, rewind, MockConnection, TestCtx};
use crate::game::Phase;

/// Drives the countdown to completion by rewinding the tick clock.
fn run_countdown(game: &mut crate::game::Game, harness: &mut TestCtx) {
    for _ in 0..8 {
        rewind(&mut game.last_countdown_tick, Duration::from_secs(2));
        game.update(&mut harness.ctx());

        if game.phase != Phase::CountingDown {
            return;
        }
    }

    panic!("countdown never completed (phase {:?})", game.phase);
}

#[test]
fn create_public_autostart_at_two() {
    let mut harness = TestCtx::new();
    let mut game = make_game(&harness);
    game.auto_start_players = 2;

    let p1 = join_player(&mut game, &mut harness, "PlayerOne");
    let p2 = join_player(&mut game, &mut harness, "PlayerTwo");

    // The virtual host holds PID 1.
    assert_eq!(game.player_from_name("PlayerOne").unwrap().pid, 2);
    assert_eq!(game.player_from_name("PlayerTwo").unwrap().pid, 3);
    assert_eq!(game.num_occupied_slots(), 2);

    // No start before the two-second no-leaver window has passed.
    rewind(&mut game.last_autostart_check, Duration::from_secs(11));
    game.update(&mut harness.ctx());
    assert_eq!(game.phase, Phase::Lobby);

    rewind(&mut game.last_player_leave, Duration::from_secs(3));
    rewind(&mut game.last_autostart_check, Duration::from_secs(11));
    game.update(&mut harness.ctx());
    assert_eq!(game.phase, Phase::CountingDown);

    run_countdown(&mut game, &mut harness);
    assert_eq!(game.phase, Phase::Loading);

    p1.inject(&c2s::GameLoadedSelf);
    p2.inject(&c2s::GameLoadedSelf);
    game.update(&mut harness.ctx());

    assert_eq!(game.phase, Phase::Loaded);
    assert_eq!(game.game_ticks, 0);
}

#[test]
fn countdown_abort_returns_to_lobby() {
    let mut harness = TestCtx::new();
    let mut game = make_game(&harness);

    join_player(&mut game, &mut harness, "PlayerOne");
    join_player(&mut game, &mut harness, "PlayerTwo");

    rewind(&mut game.last_player_leave, Duration::from_secs(3));
    game.start_countdown(&mut harness.ctx(), false);
    assert_eq!(game.phase, Phase::CountingDown);

    // Blue (lowest occupied slot) can abort without any realm admin status.
    let hid = crate::command::dispatch(&mut game, &mut harness.ctx(), 2, "abort", "");
    let _ = hid;

    assert_eq!(game.phase, Phase::Lobby);
    assert_eq!(game.auto_start_players, 0);
}

#[test]
fn leaver_during_countdown_aborts() {
    let mut harness = TestCtx::new();
    let mut game = make_game(&harness);

    join_player(&mut game, &mut harness, "PlayerOne");
    let p2 = join_player(&mut game, &mut harness, "PlayerTwo");

    rewind(&mut game.last_player_leave, Duration::from_secs(3));
    game.start_countdown(&mut harness.ctx(), false);
    assert_eq!(game.phase, Phase::CountingDown);

    p2.inject(&c2s::LeaveGame {
        reason: arbiter_protocol::packets::leave_code::LOBBY,
    });
    game.update(&mut harness.ctx());

    assert_eq!(game.phase, Phase::Lobby);
    assert!(game.player_from_name("PlayerTwo").is_none());
}

#[test]
fn lobby_timeout_with_no_players() {
    let mut harness = TestCtx::new();
    let mut game = make_game(&harness);

    rewind(
        &mut game.creation_time,
        Duration::from_secs(u64::from(harness.cfg.bot_lobbytimelimit) * 60 + 5),
    );

    let done = game.update(&mut harness.ctx());
    assert!(game.exiting);
    assert!(done);
}

#[test]
fn lobby_with_players_does_not_time_out() {
    let mut harness = TestCtx::new();
    let mut game = make_game(&harness);

    join_player(&mut game, &mut harness, "PlayerOne");

    rewind(
        &mut game.creation_time,
        Duration::from_secs(u64::from(harness.cfg.bot_lobbytimelimit) * 60 + 5),
    );

    let done = game.update(&mut harness.ctx());
    assert!(!done);
    assert!(!game.exiting);
}

#[test]
fn slot_integrity_invariants_hold_after_joins_and_swaps() {
    let mut harness = TestCtx::new();
    let mut game = make_game(&harness);

    for name in ["One", "Two", "Three", "Four"] {
        join_player(&mut game, &mut harness, name);
    }

    game.swap_slots(0, 7);
    game.shuffle_slots();

    assert!(game.slots.len() <= 12);

    let occupied: Vec<_> = game.slots.iter().filter(|s| s.is_occupied()).collect();

    let mut pids: Vec<u8> = occupied
        .iter()
        .filter(|s| s.is_human())
        .map(|s| s.pid)
        .collect();
    pids.sort_unstable();
    pids.dedup();
    assert_eq!(pids.len(), 4, "PIDs must be unique among occupied slots");

    let mut colours: Vec<u8> = occupied
        .iter()
        .filter(|s| s.team != OBSERVER_TEAM)
        .map(|s| s.colour)
        .collect();
    colours.sort_unstable();
    let before = colours.len();
    colours.dedup();
    assert_eq!(colours.len(), before, "colours must be unique");
}

#[test]
fn host_counter_increases_across_rehosts() {
    let mut harness = TestCtx::new();
    harness.cfg.lan_admins = 2;
    harness.cfg.lan_getrootadmins = false;
    harness.settings = crate::host::HostSettings::from_config(&harness.cfg);

    let mut game = make_game(&harness);
    join_player(&mut game, &mut harness, "Rooter");

    let first = game.host_counter;

    crate::command::dispatch(&mut game, &mut harness.ctx(), 2, "pub", "second try");
    let second = game.host_counter;
    assert!(second > first);

    crate::command::dispatch(&mut game, &mut harness.ctx(), 2, "priv", "third try");
    let third = game.host_counter;
    assert!(third > second);
    assert_eq!(game.game_name, "third try");
    assert_eq!(game.last_game_name, "second try");
}

#[test]
fn dead_socket_detaches_only_the_offender() {
    let mut harness = TestCtx::new();
    let mut game = make_game(&harness);

    let p1 = join_player(&mut game, &mut harness, "PlayerOne");
    join_player(&mut game, &mut harness, "PlayerTwo");

    p1.kill();
    game.update(&mut harness.ctx());
    game.update(&mut harness.ctx());

    assert!(game.player_from_name("PlayerOne").is_none());
    assert!(game.player_from_name("PlayerTwo").is_some());

    let done = game.update(&mut harness.ctx());
    assert!(!done, "a lobby survives losing a player");
}

#[test]
fn full_lobby_rejects_joiner() {
    let mut harness = TestCtx::new();
    let mut game = make_game(&harness);

    // Ten slots on this map; fill them all.
    for i in 0..10 {
        join_player(&mut game, &mut harness, &format!("Player{i}"));
    }

    // The eleventh join finds no open slot and is rejected.
    let conn = MockConnection::new();
    conn.inject(&c2s::ReqJoin {
        host_counter: game.host_counter,
        entry_key: 0,
        unknown: 0,
        listen_port: 6112,
        peer_key: 0,
        name: "Overflow",
        remainder: arbiter_protocol::RawBytes(&[]),
    });
    game.add_joiner(Box::new(conn.clone()));
    game.update(&mut harness.ctx());

    assert!(game.player_from_name("Overflow").is_none());

    let frames = conn.collect_sent();
    assert!(
        frames
            .iter()
            .any(|f| f.id == arbiter_protocol::packets::s2c::RejectJoin::ID),
        "overflow joiner must be rejected"
    );
}
