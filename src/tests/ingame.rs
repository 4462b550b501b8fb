//! The loaded-phase engine: action relay, sync checking, desync handling.

use std::time::Duration;

use arbiter_protocol::packets::{c2s, s2c};
use arbiter_protocol::{Packet, RawBytes};
use pretty_assertions::assert_eq;

use super::util::{join_player, make_game, rewind, MockConnection, TestCtx};
use crate::game::{Game, Phase};

/// A loaded four-player game plus the players' connections.
fn loaded_game(harness: &mut TestCtx, names: &[&str]) -> (Game, Vec<MockConnection>) {
    let mut game = make_game(harness);
    let mut conns = vec![];

    for name in names {
        conns.push(join_player(&mut game, harness, name));
    }

    rewind(&mut game.last_player_leave, Duration::from_secs(3));
    game.start_countdown(&mut harness.ctx(), true);
    game.countdown_counter = 0;
    game.update(&mut harness.ctx());
    assert_eq!(game.phase, Phase::Loading);

    for conn in &conns {
        conn.inject(&c2s::GameLoadedSelf);
        // Drop the lobby-era traffic so tests see only in-game frames.
        conn.take_sent();
    }

    game.update(&mut harness.ctx());
    assert_eq!(game.phase, Phase::Loaded);

    for conn in &conns {
        conn.take_sent();
    }

    (game, conns)
}

fn fire_latency_tick(game: &mut Game, harness: &mut TestCtx) {
    rewind(&mut game.last_action_sent, Duration::from_millis(600));
    game.update(&mut harness.ctx());
}

#[test]
fn actions_relay_in_arrival_order() {
    let mut harness = TestCtx::new();
    let (mut game, conns) = loaded_game(&mut harness, &["P1", "P2"]);

    conns[0].inject(&c2s::OutgoingAction {
        crc: 0,
        action: RawBytes(&[0xAA, 0x01]),
    });
    conns[0].inject(&c2s::OutgoingAction {
        crc: 0,
        action: RawBytes(&[0xBB, 0x02]),
    });

    fire_latency_tick(&mut game, &mut harness);

    // Both peers observe the first action before the second.
    for conn in &conns {
        let frames = conns_action_frames(conn);
        let blocks: Vec<&s2c::ActionBlock> = frames.iter().flat_map(|f| &f.actions).collect();

        assert_eq!(blocks.len(), 2);
        assert_eq!(blocks[0].action, vec![0xAA, 0x01]);
        assert_eq!(blocks[1].action, vec![0xBB, 0x02]);
    }

    assert_eq!(game.game_ticks, u64::from(game.latency));
}

fn conns_action_frames(conn: &MockConnection) -> Vec<s2c::IncomingAction> {
    conn.collect_sent()
        .iter()
        .filter(|f| f.id == s2c::IncomingAction::ID)
        .map(|f| f.decode::<s2c::IncomingAction>().unwrap())
        .collect()
}

#[test]
fn empty_ticks_still_advance_the_clock() {
    let mut harness = TestCtx::new();
    let (mut game, conns) = loaded_game(&mut harness, &["P1", "P2"]);

    fire_latency_tick(&mut game, &mut harness);
    fire_latency_tick(&mut game, &mut harness);

    let frames = conns_action_frames(&conns[0]);
    assert_eq!(frames.len(), 2);
    assert!(frames.iter().all(|f| f.actions.is_empty()));
    assert_eq!(game.game_ticks, 2 * u64::from(game.latency));
}

#[test]
fn oversized_batches_split_into_continuation_frames() {
    let mut harness = TestCtx::new();
    let (mut game, conns) = loaded_game(&mut harness, &["P1", "P2"]);

    let big = vec![0x42u8; 900];

    for _ in 0..3 {
        conns[0].inject(&c2s::OutgoingAction {
            crc: 0,
            action: RawBytes(&big),
        });
    }

    fire_latency_tick(&mut game, &mut harness);

    let frames = conns[0].collect_sent();
    let continuations = frames
        .iter()
        .filter(|f| f.id == s2c::IncomingAction2::ID)
        .count();
    let finals = frames
        .iter()
        .filter(|f| f.id == s2c::IncomingAction::ID)
        .count();

    assert!(continuations >= 1, "large batches need continuation frames");
    assert_eq!(finals, 1, "exactly one frame carries the tick");
}

#[test]
fn desync_kick_drops_the_minority() {
    let mut harness = TestCtx::new();
    harness.settings.desync_kick = true;

    let (mut game, conns) = loaded_game(&mut harness, &["P1", "P2", "P3", "P4"]);

    for (i, conn) in conns.iter().enumerate() {
        let checksum = if i == 3 { 0xBBBB_BBBB } else { 0xAAAA_AAAA };
        conn.inject(&c2s::OutgoingKeepalive {
            unknown: 0,
            checksum,
        });
    }

    game.update(&mut harness.ctx());
    game.update(&mut harness.ctx());

    assert!(game.player_from_name("P4").is_none(), "minority is dropped");

    for name in ["P1", "P2", "P3"] {
        assert!(game.player_from_name(name).is_some());
    }
}

#[test]
fn desync_without_kick_only_warns() {
    let mut harness = TestCtx::new();
    harness.settings.desync_kick = false;

    let (mut game, conns) = loaded_game(&mut harness, &["P1", "P2", "P3", "P4"]);

    for (i, conn) in conns.iter().enumerate() {
        let checksum = if i == 3 { 0xBBBB_BBBB } else { 0xAAAA_AAAA };
        conn.inject(&c2s::OutgoingKeepalive {
            unknown: 0,
            checksum,
        });
    }

    game.update(&mut harness.ctx());
    game.update(&mut harness.ctx());

    for name in ["P1", "P2", "P3", "P4"] {
        assert!(game.player_from_name(name).is_some(), "{name} must remain");
    }
}

#[test]
fn matching_checksums_raise_no_alarm() {
    let mut harness = TestCtx::new();
    harness.settings.desync_kick = true;

    let (mut game, conns) = loaded_game(&mut harness, &["P1", "P2"]);

    for conn in &conns {
        conn.inject(&c2s::OutgoingKeepalive {
            unknown: 0,
            checksum: 0x1234_5678,
        });
    }

    game.update(&mut harness.ctx());
    game.update(&mut harness.ctx());

    assert_eq!(game.num_human_players(), 2);
}

#[test]
fn lagging_player_pauses_the_relay() {
    let mut harness = TestCtx::new();
    let (mut game, conns) = loaded_game(&mut harness, &["P1", "P2"]);

    // Let the host race far ahead of P2's acknowledgments.
    for _ in 0..(game.sync_limit + 2) {
        conns[0].inject(&c2s::OutgoingKeepalive {
            unknown: 0,
            checksum: 0,
        });
        fire_latency_tick(&mut game, &mut harness);
    }

    assert!(game.lagging);
    assert!(game.player_from_name("P2").unwrap().lagging);

    // P1 (not on the lag screen) was told about it.
    let frames = conns[0].collect_sent();
    assert!(frames.iter().any(|f| f.id == s2c::StartLag::ID));

    let ticks_while_lagging = game.game_ticks;
    fire_latency_tick(&mut game, &mut harness);
    assert_eq!(game.game_ticks, ticks_while_lagging, "relay pauses during lag");
}

#[test]
fn fppause_injects_the_pause_action() {
    let mut harness = TestCtx::new();
    harness.cfg.lan_admins = 2;
    harness.cfg.lan_getrootadmins = false;
    harness.settings = crate::host::HostSettings::from_config(&harness.cfg);

    let mut game = make_game(&harness);
    let rooter = join_player(&mut game, &mut harness, "Rooter");
    join_player(&mut game, &mut harness, "Other");

    crate::command::dispatch(&mut game, &mut harness.ctx(), 2, "fakeplayer", "");
    let fake_pid = game.fake_player_pid;
    assert_ne!(fake_pid, 255);

    rewind(&mut game.last_player_leave, Duration::from_secs(3));
    game.start_countdown(&mut harness.ctx(), true);
    game.countdown_counter = 0;
    game.update(&mut harness.ctx());

    rooter.inject(&c2s::GameLoadedSelf);
    if let Some(p) = game.player_mut_from_pid(3) {
        p.finished_loading = true;
    }
    game.update(&mut harness.ctx());
    assert!(game.loaded());

    crate::command::dispatch(&mut game, &mut harness.ctx(), 2, "fppause", "");

    rooter.take_sent();
    fire_latency_tick(&mut game, &mut harness);

    let frames = conns_action_frames(&rooter);
    let blocks: Vec<&s2c::ActionBlock> = frames.iter().flat_map(|f| &f.actions).collect();

    assert_eq!(blocks.len(), 1);
    assert_eq!(blocks[0].pid, fake_pid);
    assert_eq!(blocks[0].action, vec![0x01]);
}
