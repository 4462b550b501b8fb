//! Votekick arithmetic and lifecycle.

use std::time::Duration;

use arbiter_protocol::packets::leave_code;
use pretty_assertions::assert_eq;

use super::util::{join_player, make_game, rewind, TestCtx};
use crate::command::dispatch;
use crate::game::Game;

fn five_player_lobby(harness: &mut TestCtx) -> Game {
    let mut game = make_game(harness);

    for name in ["P1", "P2", "P3", "P4", "P5"] {
        join_player(&mut game, harness, name);
    }

    game
}

#[test]
fn vote_passes_at_ceiling() {
    let mut harness = TestCtx::new();
    let mut game = five_player_lobby(&mut harness);

    // PIDs 2..=6 for P1..=P5.
    dispatch(&mut game, &mut harness.ctx(), 2, "votekick", "P5");
    assert_eq!(game.kick_vote_player, "P5");

    // ceil((5-1) * 100 / 100) = 4 votes; P1's counts already.
    assert_eq!(game.votes_needed(100), 4);
    assert_eq!(game.count_kick_votes(), 1);

    dispatch(&mut game, &mut harness.ctx(), 3, "yes", "");
    dispatch(&mut game, &mut harness.ctx(), 4, "yes", "");
    assert!(game.player_from_name("P5").is_some(), "three votes are not enough");

    dispatch(&mut game, &mut harness.ctx(), 5, "yes", "");

    let victim = game.players.iter().find(|p| p.name == "P5").unwrap();
    assert!(victim.delete_me);
    assert_eq!(victim.left_code, leave_code::LOBBY);
    assert!(game.kick_vote_player.is_empty());
}

#[test]
fn target_vote_is_not_counted() {
    let mut harness = TestCtx::new();
    let mut game = five_player_lobby(&mut harness);

    dispatch(&mut game, &mut harness.ctx(), 2, "votekick", "P5");

    // The target's flag is set for bookkeeping but never counted, and their
    // own `!yes` changes nothing.
    assert!(game.player_from_name("P5").unwrap().kick_vote);
    assert_eq!(game.count_kick_votes(), 1);

    dispatch(&mut game, &mut harness.ctx(), 6, "yes", "");
    assert_eq!(game.count_kick_votes(), 1);
}

#[test]
fn duplicate_votes_are_ignored() {
    let mut harness = TestCtx::new();
    let mut game = five_player_lobby(&mut harness);

    dispatch(&mut game, &mut harness.ctx(), 2, "votekick", "P5");
    dispatch(&mut game, &mut harness.ctx(), 3, "yes", "");
    dispatch(&mut game, &mut harness.ctx(), 3, "yes", "");
    assert_eq!(game.count_kick_votes(), 2);
}

#[test]
fn lower_percentage_lowers_the_bar() {
    let mut harness = TestCtx::new();
    harness.cfg.bot_votekickpercentage = 60;

    let mut game = five_player_lobby(&mut harness);

    // ceil(4 * 60 / 100) = 3.
    assert_eq!(game.votes_needed(60), 3);

    dispatch(&mut game, &mut harness.ctx(), 2, "votekick", "P5");
    dispatch(&mut game, &mut harness.ctx(), 3, "yes", "");
    dispatch(&mut game, &mut harness.ctx(), 4, "yes", "");

    let victim = game.players.iter().find(|p| p.name == "P5").unwrap();
    assert!(victim.delete_me);
}

#[test]
fn too_few_players_refuses_vote() {
    let mut harness = TestCtx::new();
    let mut game = make_game(&harness);

    join_player(&mut game, &mut harness, "P1");
    join_player(&mut game, &mut harness, "P2");

    dispatch(&mut game, &mut harness.ctx(), 2, "votekick", "P2");
    assert!(game.kick_vote_player.is_empty());
}

#[test]
fn reserved_target_refuses_vote() {
    let mut harness = TestCtx::new();
    let mut game = five_player_lobby(&mut harness);

    game.add_to_reserved("P5");
    dispatch(&mut game, &mut harness.ctx(), 2, "votekick", "P5");
    assert!(game.kick_vote_player.is_empty());
}

#[test]
fn vote_expires_after_a_minute() {
    let mut harness = TestCtx::new();
    let mut game = five_player_lobby(&mut harness);

    dispatch(&mut game, &mut harness.ctx(), 2, "votekick", "P5");
    assert!(!game.kick_vote_player.is_empty());

    rewind(
        game.started_kick_vote_time.as_mut().unwrap(),
        Duration::from_secs(61),
    );
    game.update(&mut harness.ctx());

    assert!(game.kick_vote_player.is_empty());
    assert!(game.player_from_name("P5").is_some());
}

#[test]
fn target_leaving_cancels_vote() {
    let mut harness = TestCtx::new();
    let mut game = five_player_lobby(&mut harness);

    dispatch(&mut game, &mut harness.ctx(), 2, "votekick", "P5");

    if let Some(p) = game.player_mut_from_pid(6) {
        p.mark_left("left".to_owned(), leave_code::LOBBY);
    }
    game.update(&mut harness.ctx());

    assert!(game.kick_vote_player.is_empty());
}
