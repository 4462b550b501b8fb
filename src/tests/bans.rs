//! Ban workflow: substring matching, callable lifecycle, banlast.

use pretty_assertions::assert_eq;

use super::util::{join_player, make_game, TestCtx};
use crate::command::dispatch;
use crate::host::HostSettings;

fn root_harness() -> TestCtx {
    let mut harness = TestCtx::new();
    harness.cfg.lan_admins = 2;
    harness.cfg.lan_getrootadmins = false;
    harness.settings = HostSettings::from_config(&harness.cfg);
    // Ban commands need at least one realm to exist.
    harness
        .realms
        .push(crate::realm::Realm::new(Default::default(), 3));
    harness
}

#[test]
fn ambiguous_substring_adds_no_ban() {
    let mut harness = root_harness();
    let mut game = make_game(&harness);

    for name in ["Varlock", "Varlock2", "Other"] {
        join_player(&mut game, &mut harness, name);
    }

    dispatch(&mut game, &mut harness.ctx(), 2, "ban", "var griefing");
    assert_eq!(game.pending_ban_adds.len(), 0);
}

#[test]
fn unique_substring_adds_exactly_one_ban() {
    let mut harness = root_harness();
    let mut game = make_game(&harness);

    for name in ["Varlock", "Other", "Third"] {
        join_player(&mut game, &mut harness, name);
    }

    dispatch(&mut game, &mut harness.ctx(), 2, "ban", "lock griefing");
    assert_eq!(game.pending_ban_adds.len(), 1);
    assert_eq!(game.pending_ban_adds[0].victim, "Varlock");
    assert_eq!(game.pending_ban_adds[0].admin, "Varlock");
}

#[test]
fn exact_match_beats_ambiguity() {
    let mut harness = root_harness();
    let mut game = make_game(&harness);

    for name in ["Varlock", "Varlock2"] {
        join_player(&mut game, &mut harness, name);
    }

    dispatch(&mut game, &mut harness.ctx(), 2, "ban", "varlock afk");
    assert_eq!(game.pending_ban_adds.len(), 1);
    assert_eq!(game.pending_ban_adds[0].victim, "Varlock");
}

#[test]
fn no_match_adds_nothing() {
    let mut harness = root_harness();
    let mut game = make_game(&harness);
    join_player(&mut game, &mut harness, "Varlock");

    dispatch(&mut game, &mut harness.ctx(), 2, "ban", "nobody reason");
    assert_eq!(game.pending_ban_adds.len(), 0);
}

#[test]
fn loaded_game_bans_match_leavers() {
    let mut harness = root_harness();
    let mut game = make_game(&harness);

    let rooter = join_player(&mut game, &mut harness, "Rooter");
    join_player(&mut game, &mut harness, "Leaver");

    // Start the game so the potential-ban table is staged.
    crate::tests::util::rewind(
        &mut game.last_player_leave,
        std::time::Duration::from_secs(3),
    );
    game.start_countdown(&mut harness.ctx(), true);
    game.countdown_counter = 0;
    game.update(&mut harness.ctx());
    assert!(game.loading_or_loaded());
    assert_eq!(game.db_bans.len(), 2);

    // The leaver quits mid-load; the admin can still ban them by name.
    if let Some(p) = game.player_mut_from_pid(3) {
        p.mark_left("left".to_owned(), arbiter_protocol::packets::leave_code::LOST);
    }
    rooter.inject(&arbiter_protocol::packets::c2s::GameLoadedSelf);
    game.update(&mut harness.ctx());
    game.update(&mut harness.ctx());
    assert!(game.player_from_name("Leaver").is_none());
    assert!(game.loaded());

    dispatch(&mut game, &mut harness.ctx(), 2, "ban", "leaver ragequit");
    assert_eq!(game.pending_ban_adds.len(), 1);
    assert_eq!(game.pending_ban_adds[0].victim, "Leaver");

    // The same leaver is also the !banlast target.
    assert_eq!(
        game.db_ban_last.as_ref().map(|b| b.name.as_str()),
        Some("Leaver")
    );

    dispatch(&mut game, &mut harness.ctx(), 2, "banlast", "afk");
    assert_eq!(game.pending_ban_adds.len(), 2);
}

#[test]
fn ban_callable_completion_notifies_and_clears() {
    let mut harness = root_harness();
    let mut game = make_game(&harness);

    for name in ["Rooter", "Target"] {
        join_player(&mut game, &mut harness, name);
    }

    dispatch(&mut game, &mut harness.ctx(), 2, "ban", "target spoiling");
    assert_eq!(game.pending_ban_adds.len(), 1);

    // Let the worker finish, then pump.
    for _ in 0..200 {
        game.update(&mut harness.ctx());

        if game.pending_ban_adds.is_empty() {
            return;
        }

        std::thread::sleep(std::time::Duration::from_millis(5));
    }

    panic!("ban-add callable never completed");
}
