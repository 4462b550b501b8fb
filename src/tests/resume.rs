//! The GProxy reconnect sidechannel: negotiation, buffering, resume.

use std::time::Duration;

use arbiter_protocol::packets::c2s;
use arbiter_protocol::{gproxy, Packet};
use pretty_assertions::assert_eq;

use super::util::{join_player, make_game, rewind, MockConnection, TestCtx};
use crate::game::{Game, Phase};

fn loaded_gproxy_game(harness: &mut TestCtx) -> (Game, MockConnection, MockConnection) {
    let mut game = make_game(harness);

    let p1 = join_player(&mut game, harness, "Stayer");
    let p2 = join_player(&mut game, harness, "Dropper");

    // Dropper negotiates GProxy on the main connection.
    p2.inject(&gproxy::InitRequest { version: 1 });
    game.update(&mut harness.ctx());

    assert!(game.player_from_name("Dropper").unwrap().gproxy);

    rewind(&mut game.last_player_leave, Duration::from_secs(3));
    game.start_countdown(&mut harness.ctx(), true);
    game.countdown_counter = 0;
    game.update(&mut harness.ctx());

    p1.inject(&c2s::GameLoadedSelf);
    p2.inject(&c2s::GameLoadedSelf);
    game.update(&mut harness.ctx());
    assert_eq!(game.phase, Phase::Loaded);

    (game, p1, p2)
}

fn fire_ticks(game: &mut Game, harness: &mut TestCtx, n: usize) {
    for _ in 0..n {
        rewind(&mut game.last_action_sent, Duration::from_millis(600));
        game.update(&mut harness.ctx());
    }
}

#[test]
fn init_response_carries_session_coordinates() {
    let mut harness = TestCtx::new();
    let mut game = make_game(&harness);

    let conn = join_player(&mut game, &mut harness, "Player");
    conn.take_sent();

    conn.inject(&gproxy::InitRequest { version: 1 });
    game.update(&mut harness.ctx());

    let frames = conn.collect_sent();
    let response = frames
        .iter()
        .find(|f| f.id == gproxy::InitResponse::ID)
        .expect("an InitResponse must be sent")
        .decode::<gproxy::InitResponse>()
        .unwrap();

    let player = game.player_from_name("Player").unwrap();
    assert_eq!(response.pid, player.pid);
    assert_eq!(response.reconnect_key, player.reconnect_key);
    assert_eq!(response.reconnect_port, 6114);
}

#[test]
fn dropped_gproxy_player_keeps_their_seat() {
    let mut harness = TestCtx::new();
    let (mut game, _p1, p2) = loaded_gproxy_game(&mut harness);

    p2.kill();
    game.update(&mut harness.ctx());
    game.update(&mut harness.ctx());

    let dropper = game.player_from_name("Dropper").expect("seat is kept");
    assert!(dropper.disconnected);
    assert!(!dropper.delete_me);
}

#[test]
fn resume_replays_only_unseen_frames_with_ack() {
    let mut harness = TestCtx::new();
    let (mut game, _p1, p2) = loaded_gproxy_game(&mut harness);

    fire_ticks(&mut game, &mut harness, 10);

    p2.kill();
    game.update(&mut harness.ctx());

    // The host keeps ticking while the client is gone.
    fire_ticks(&mut game, &mut harness, 5);

    let dropper = game.player_from_name("Dropper").unwrap();
    let pid = dropper.pid;
    let key = dropper.reconnect_key;
    let total = dropper.total_frames_sent;
    let seen = total - 5;

    assert!(game.has_gproxy_session(pid, key));
    assert!(!game.has_gproxy_session(pid, key ^ 1), "wrong key never matches");

    let replacement = MockConnection::new();
    let matched =
        game.event_gproxy_reconnect(pid, key, seen, Box::new(replacement.clone()));
    assert!(matched);

    let frames = replacement.collect_sent();

    // Five missed game frames, then the ACK confirming the resume.
    let acks: Vec<_> = frames.iter().filter(|f| f.id == gproxy::Ack::ID).collect();
    assert_eq!(acks.len(), 1);
    assert_eq!(
        acks[0].decode::<gproxy::Ack>().unwrap().last_packet,
        game.player_from_name("Dropper").unwrap().total_frames_sent,
    );

    let game_frames = frames.iter().filter(|f| f.id != gproxy::Ack::ID).count();
    assert!(game_frames >= 5);
    assert!(!game.player_from_name("Dropper").unwrap().disconnected);
}

#[test]
fn repeated_resume_requests_are_idempotent() {
    let mut harness = TestCtx::new();
    let (mut game, _p1, p2) = loaded_gproxy_game(&mut harness);

    fire_ticks(&mut game, &mut harness, 8);
    p2.kill();
    game.update(&mut harness.ctx());
    fire_ticks(&mut game, &mut harness, 4);

    let (pid, key, total) = {
        let p = game.player_from_name("Dropper").unwrap();
        (p.pid, p.reconnect_key, p.total_frames_sent)
    };
    let seen = total - 4;

    let first = MockConnection::new();
    assert!(game.event_gproxy_reconnect(pid, key, seen, Box::new(first.clone())));
    let first_frames: Vec<_> = first
        .collect_sent()
        .into_iter()
        .filter(|f| f.id != gproxy::Ack::ID)
        .map(|f| f.body)
        .collect();

    // The client reconnects again with the same acknowledgment.
    let second = MockConnection::new();
    assert!(game.event_gproxy_reconnect(pid, key, seen, Box::new(second.clone())));
    let second_frames: Vec<_> = second
        .collect_sent()
        .into_iter()
        .filter(|f| f.id != gproxy::Ack::ID)
        .map(|f| f.body)
        .collect();

    // Chat about the reconnect itself lands in the buffer between attempts,
    // so the second replay starts with the first one's tail.
    assert!(second_frames.len() >= first_frames.len());

    for (a, b) in first_frames.iter().zip(&second_frames) {
        assert_eq!(a, b, "identical acknowledgments replay identical prefixes");
    }
}

#[test]
fn advancing_ack_stops_replaying_old_frames() {
    let mut harness = TestCtx::new();
    let (mut game, _p1, p2) = loaded_gproxy_game(&mut harness);

    fire_ticks(&mut game, &mut harness, 6);
    p2.kill();
    game.update(&mut harness.ctx());
    fire_ticks(&mut game, &mut harness, 6);

    let (pid, key, total) = {
        let p = game.player_from_name("Dropper").unwrap();
        (p.pid, p.reconnect_key, p.total_frames_sent)
    };

    let up_to_date = MockConnection::new();
    assert!(game.event_gproxy_reconnect(pid, key, total, Box::new(up_to_date.clone())));

    // The ACK leads: nothing is replayed before it for a caught-up client.
    let frames = up_to_date.collect_sent();
    let ack_pos = frames
        .iter()
        .position(|f| f.id == gproxy::Ack::ID)
        .expect("ACK must be sent");
    assert_eq!(ack_pos, 0, "a fully caught-up client gets no replay");
}

#[test]
fn lobby_sessions_are_not_resumable() {
    let mut harness = TestCtx::new();
    let mut game = make_game(&harness);

    let conn = join_player(&mut game, &mut harness, "Player");
    conn.inject(&gproxy::InitRequest { version: 1 });
    game.update(&mut harness.ctx());

    let player = game.player_from_name("Player").unwrap();
    let (pid, key) = (player.pid, player.reconnect_key);

    // The sidechannel only matches loaded games.
    assert!(!game.has_gproxy_session(pid, key));
}
