//! Admin and player command dispatch.
//!
//! Chat starting with the command trigger lands here as
//! `(player, command, payload)`. The dispatcher computes the caller's
//! capabilities once, gates the admin table on them, and always considers
//! the player table. Unknown commands are no-ops.

use arbiter_protocol::packets::{leave_code, s2c};
use arbiter_protocol::slot::{
    SLOT_RACE_HUMAN, SLOT_RACE_NIGHTELF, SLOT_RACE_ORC, SLOT_RACE_RANDOM, SLOT_RACE_SELECTABLE,
    SLOT_RACE_UNDEAD, SLOT_STATUS_CLOSED, SLOT_STATUS_OCCUPIED, SLOT_STATUS_OPEN,
};
use tracing::info;

use crate::game::{slot, Game, PendingBanAdd, PendingBanCheck, PendingBanRemove, PendingDotaCheck,
    PendingSummaryCheck, Phase, QueuedAction};
use crate::host::HostCtx;
use crate::map::{MAPFLAG_RANDOM_RACES, MAPOPT_FIXED_PLAYER_SETTINGS};
use crate::net::{is_lan_ip, is_local_ip};
use crate::realm::{GAME_PRIVATE, GAME_PUBLIC};

/// Everything the handlers need to know about who is asking.
pub struct Caller {
    pub name: String,
    pub pid: u8,
    pub spoofed: bool,
    pub admin: bool,
    pub root_admin: bool,
    pub owner: bool,
    pub blue: bool,
}

struct CommandSpec {
    names: &'static [&'static str],
    handler: fn(&mut Game, &mut HostCtx<'_>, &Caller, &str) -> bool,
}

/// Runs `command` for the player behind `pid`. Returns whether the chat line
/// that carried it should be hidden from the lobby.
pub fn dispatch(
    game: &mut Game,
    ctx: &mut HostCtx<'_>,
    pid: u8,
    command: &str,
    payload: &str,
) -> bool {
    let Some(player) = game.player_from_pid(pid) else {
        return false;
    };

    let name = player.name.clone();
    let ip = player.ip;
    let mut spoofed = player.spoofed;
    let spoofed_realm = player.spoofed_realm.clone();

    let lan = is_lan_ip(ip) || is_local_ip(ip, ctx.local_addresses);
    let lan_listed = ctx
        .cfg
        .lan_rootadmins
        .iter()
        .any(|a| a.eq_ignore_ascii_case(&name));

    let mut admin = ctx
        .realms
        .iter()
        .any(|r| r.server() == spoofed_realm && r.is_admin(&name));

    if lan && ctx.cfg.lan_admins != 0 && matches!(ctx.cfg.lan_admins, 1 | 3) {
        let qualified = !ctx.cfg.lan_getrootadmins
            || lan_listed
            || ctx.realms.iter().any(|r| r.is_admin(&name));

        if qualified {
            admin = true;
        }
    }

    let mut root_admin = ctx
        .realms
        .iter()
        .any(|r| r.server() == spoofed_realm && r.is_root_admin(&name));

    if lan && ctx.cfg.lan_admins == 2 && (!ctx.cfg.lan_getrootadmins || lan_listed) {
        root_admin = true;
    }

    if lan && ctx.cfg.lan_admins == 3 && ctx.cfg.lan_getrootadmins && lan_listed {
        root_admin = true;
    }

    // The human in the lowest slot is treated as a spoofed admin.
    let blue = game.blue_player_pid() == Some(pid);

    if blue {
        admin = true;
        spoofed = true;
    }

    if game.is_tmp_root_admin(&name) {
        root_admin = true;
        spoofed = true;
    }

    let caller = Caller {
        owner: game.is_owner(&name),
        name,
        pid,
        spoofed,
        admin,
        root_admin,
        blue,
    };

    let mut hide = false;

    if caller.spoofed && (caller.admin || caller.root_admin || caller.owner) {
        info!(
            "[GAME: {}] admin [{}] sent command [{command}] with payload [{payload}]",
            game.game_name, caller.name
        );

        if !game.locked || caller.root_admin || caller.owner {
            if let Some(spec) = ADMIN_COMMANDS
                .iter()
                .find(|spec| spec.names.contains(&command))
            {
                hide = (spec.handler)(game, ctx, &caller, payload);
            }
        } else {
            info!(
                "[GAME: {}] admin command ignored, the game is locked",
                game.game_name
            );
            let line = ctx.lang.tr("the_game_is_locked", &[]);
            game.send_chat_to_pid(pid, &line);
        }
    } else if !caller.spoofed && (caller.admin || caller.root_admin) {
        info!(
            "[GAME: {}] non-spoofchecked user [{}] sent command [{command}]",
            game.game_name, caller.name
        );
        game.send_all_chat(&format!(
            "non-spoofchecked user [{}] sent command [{command}]. Wait please.",
            caller.name
        ));
    }

    if let Some(spec) = PLAYER_COMMANDS
        .iter()
        .find(|spec| spec.names.contains(&command))
    {
        hide |= (spec.handler)(game, ctx, &caller, payload);
    }

    hide
}

// ---- helpers -------------------------------------------------------------

fn default_hide(ctx: &HostCtx<'_>) -> bool {
    ctx.settings.hide_admin_commands
}

fn split_victim_reason(payload: &str) -> (&str, &str) {
    match payload.split_once(' ') {
        Some((victim, reason)) => (victim, reason.trim_start()),
        None => (payload, ""),
    }
}

fn parse_slot_list(payload: &str) -> Vec<usize> {
    payload
        .split_whitespace()
        .filter_map(|n| n.parse::<usize>().ok())
        .filter_map(|n| n.checked_sub(1))
        .collect()
}

/// Reports on one player for `!check` and `!checkme`.
fn checked_player_line(game: &Game, ctx: &HostCtx<'_>, pid: u8) -> Option<String> {
    let player = game.player_from_pid(pid)?;

    let ping = if player.num_pings() > 0 {
        format!("{}ms", player.ping(ctx.cfg.bot_lcpings))
    } else {
        "N/A".to_owned()
    };

    let from = ctx.ip_to_country.check(player.ip_u32()).to_owned();

    let target_admin = ctx.realms.iter().any(|r| {
        r.server() == player.spoofed_realm
            && (r.is_admin(&player.name) || r.is_root_admin(&player.name))
    });

    let realm = if player.spoofed_realm.is_empty() {
        "N/A".to_owned()
    } else {
        player.spoofed_realm.clone()
    };

    Some(ctx.lang.tr(
        "checked_player",
        &[
            &player.name,
            &ping,
            &from,
            yes_no(target_admin),
            yes_no(game.is_owner(&player.name)),
            yes_no(player.spoofed),
            &realm,
            yes_no(player.reserved),
        ],
    ))
}

fn yes_no(v: bool) -> &'static str {
    if v {
        "Yes"
    } else {
        "No"
    }
}

/// Sorted-by-ping report used by `!ping` and `!pingkick`.
fn ping_report(game: &Game, ctx: &HostCtx<'_>) -> String {
    let mut players: Vec<_> = game
        .players
        .iter()
        .filter(|p| !p.delete_me)
        .collect();
    players.sort_by_key(|p| std::cmp::Reverse(p.ping(ctx.cfg.bot_lcpings)));

    players
        .iter()
        .map(|p| {
            if p.num_pings() > 0 {
                format!("{}: {}ms", p.name, p.ping(ctx.cfg.bot_lcpings))
            } else {
                format!("{}: N/A", p.name)
            }
        })
        .collect::<Vec<_>>()
        .join(", ")
}

// ---- admin command handlers ----------------------------------------------

fn cmd_abort(game: &mut Game, ctx: &mut HostCtx<'_>, _caller: &Caller, _payload: &str) -> bool {
    if game.phase == Phase::CountingDown {
        game.abort_countdown(ctx);
    }

    default_hide(ctx)
}

fn cmd_ban(game: &mut Game, ctx: &mut HostCtx<'_>, caller: &Caller, payload: &str) -> bool {
    if payload.is_empty() || ctx.realms.is_empty() {
        return default_hide(ctx);
    }

    let (victim, reason) = split_victim_reason(payload);

    if game.loading_or_loaded() {
        // Match against the staged ban records so leavers can be banned.
        let needle = victim.to_lowercase();
        let mut matches = 0;
        let mut found = None;

        for ban in &game.db_bans {
            let name = ban.name.to_lowercase();

            if name.contains(&needle) {
                matches += 1;
                found = Some(ban.clone());

                if name == needle {
                    matches = 1;
                    break;
                }
            }
        }

        match (matches, found) {
            (0, _) => {
                let line = ctx.lang.tr("unable_to_ban_no_matches_found", &[victim]);
                game.send_all_chat(&line);
            }
            (1, Some(ban)) => {
                let callable = ctx.db.ban_add(
                    ban.server.clone(),
                    ban.name.clone(),
                    ban.ip.clone(),
                    game.game_name.clone(),
                    caller.name.clone(),
                    reason.to_owned(),
                );
                game.pending_ban_adds.push(PendingBanAdd {
                    admin: caller.name.clone(),
                    server: ban.server,
                    victim: ban.name,
                    ip: ban.ip,
                    callable,
                });
            }
            _ => {
                let line = ctx
                    .lang
                    .tr("unable_to_ban_found_more_than_one_match", &[victim]);
                game.send_all_chat(&line);
            }
        }
    } else {
        let (matches, pid) = game.player_from_name_partial(victim);
        let target = pid
            .and_then(|pid| game.player_from_pid(pid))
            .map(|t| (t.joined_realm.clone(), t.name.clone(), t.ip_string()));

        match (matches, target) {
            (0, _) => {
                let line = ctx.lang.tr("unable_to_ban_no_matches_found", &[victim]);
                game.send_all_chat(&line);
            }
            (1, Some((server, target_name, ip))) => {
                let callable = ctx.db.ban_add(
                    server.clone(),
                    target_name.clone(),
                    ip.clone(),
                    game.game_name.clone(),
                    caller.name.clone(),
                    reason.to_owned(),
                );
                game.pending_ban_adds.push(PendingBanAdd {
                    admin: caller.name.clone(),
                    server,
                    victim: target_name,
                    ip,
                    callable,
                });
            }
            _ => {
                let line = ctx
                    .lang
                    .tr("unable_to_ban_found_more_than_one_match", &[victim]);
                game.send_all_chat(&line);
            }
        }
    }

    default_hide(ctx)
}

fn cmd_unban(game: &mut Game, ctx: &mut HostCtx<'_>, caller: &Caller, payload: &str) -> bool {
    if !payload.is_empty() {
        game.pending_ban_removes.push(PendingBanRemove {
            requester: caller.name.clone(),
            victim: payload.to_owned(),
            callable: ctx.db.ban_remove(payload.to_owned()),
        });
    }

    default_hide(ctx)
}

fn cmd_announce(game: &mut Game, ctx: &mut HostCtx<'_>, caller: &Caller, payload: &str) -> bool {
    if game.phase != Phase::Lobby || !caller.root_admin {
        return false;
    }

    if payload.is_empty() || payload == "off" {
        let line = ctx.lang.tr("announce_message_disabled", &[]);
        game.send_all_chat(&line);
        game.announce = None;
        return default_hide(ctx);
    }

    let (interval, message) = split_victim_reason(payload);

    match interval.parse::<u32>() {
        Ok(interval) if interval > 0 && !message.is_empty() => {
            let line = ctx.lang.tr("announce_message_enabled", &[]);
            game.send_all_chat(&line);
            game.announce = Some((interval, message.to_owned()));
        }
        _ => info!("[GAME: {}] bad input to announce command", game.game_name),
    }

    default_hide(ctx)
}

fn cmd_autosave(game: &mut Game, ctx: &mut HostCtx<'_>, _caller: &Caller, payload: &str) -> bool {
    match payload {
        "on" => {
            let line = ctx.lang.tr("auto_save_enabled", &[]);
            game.send_all_chat(&line);
            game.auto_save = true;
        }
        "off" => {
            let line = ctx.lang.tr("auto_save_disabled", &[]);
            game.send_all_chat(&line);
            game.auto_save = false;
        }
        _ => {}
    }

    default_hide(ctx)
}

fn cmd_autostart(game: &mut Game, ctx: &mut HostCtx<'_>, caller: &Caller, payload: &str) -> bool {
    if game.phase != Phase::Lobby || !caller.root_admin {
        return false;
    }

    if payload.is_empty() || payload == "off" {
        let line = ctx.lang.tr("auto_start_disabled", &[]);
        game.send_all_chat(&line);
        game.auto_start_players = 0;
        game.using_start = false;
    } else if let Ok(players) = payload.parse::<u32>() {
        if players > 0 {
            let line = ctx.lang.tr("auto_start_enabled", &[&players.to_string()]);
            game.send_all_chat(&line);
            game.auto_start_players = players;
        }
    }

    default_hide(ctx)
}

fn cmd_banlast(game: &mut Game, ctx: &mut HostCtx<'_>, caller: &Caller, payload: &str) -> bool {
    if !game.loaded() || ctx.realms.is_empty() || !caller.root_admin {
        return false;
    }

    if let Some(ban) = game.db_ban_last.clone() {
        let callable = ctx.db.ban_add(
            ban.server.clone(),
            ban.name.clone(),
            ban.ip.clone(),
            game.game_name.clone(),
            caller.name.clone(),
            payload.to_owned(),
        );
        game.pending_ban_adds.push(PendingBanAdd {
            admin: caller.name.clone(),
            server: ban.server,
            victim: ban.name,
            ip: ban.ip,
            callable,
        });
    }

    default_hide(ctx)
}

fn cmd_check(game: &mut Game, ctx: &mut HostCtx<'_>, caller: &Caller, payload: &str) -> bool {
    if payload.is_empty() {
        if let Some(line) = checked_player_line(game, ctx, caller.pid) {
            game.send_all_chat(&line);
        }

        return default_hide(ctx);
    }

    let (matches, pid) = game.player_from_name_partial(payload);

    match (matches, pid) {
        (0, _) => {
            let line = ctx
                .lang
                .tr("unable_to_check_player_no_matches_found", &[payload]);
            game.send_all_chat(&line);
        }
        (1, Some(pid)) => {
            if let Some(line) = checked_player_line(game, ctx, pid) {
                game.send_all_chat(&line);
            }
        }
        _ => {
            let line = ctx
                .lang
                .tr("unable_to_check_player_found_more_than_one_match", &[payload]);
            game.send_all_chat(&line);
        }
    }

    default_hide(ctx)
}

fn cmd_checkban(game: &mut Game, ctx: &mut HostCtx<'_>, _caller: &Caller, payload: &str) -> bool {
    if payload.is_empty() || ctx.realms.is_empty() {
        return false;
    }

    for realm in ctx.realms.iter() {
        game.pending_ban_checks.push(PendingBanCheck {
            server: realm.server().to_owned(),
            victim: payload.to_owned(),
            callable: ctx.db.ban_check(realm.server().to_owned(), payload.to_owned()),
        });
    }

    default_hide(ctx)
}

fn cmd_clearhcl(game: &mut Game, ctx: &mut HostCtx<'_>, _caller: &Caller, _payload: &str) -> bool {
    if game.phase == Phase::Lobby {
        game.hcl_command_string.clear();
        let line = ctx.lang.tr("clearing_hcl", &[]);
        game.send_all_chat(&line);
    }

    default_hide(ctx)
}

fn cmd_close(game: &mut Game, ctx: &mut HostCtx<'_>, caller: &Caller, payload: &str) -> bool {
    if payload.is_empty() || game.loading_or_loaded() || !caller.root_admin {
        return false;
    }

    for sid in parse_slot_list(payload) {
        game.close_slot(sid, true);
    }

    default_hide(ctx)
}

fn cmd_closeall(game: &mut Game, ctx: &mut HostCtx<'_>, caller: &Caller, _payload: &str) -> bool {
    if !game.loading_or_loaded() && caller.root_admin {
        game.close_all_slots();
    }

    default_hide(ctx)
}

fn cmd_open(game: &mut Game, ctx: &mut HostCtx<'_>, caller: &Caller, payload: &str) -> bool {
    if payload.is_empty() || game.loading_or_loaded() || !caller.root_admin {
        return false;
    }

    for sid in parse_slot_list(payload) {
        game.open_slot(sid, true);
    }

    default_hide(ctx)
}

fn cmd_openall(game: &mut Game, ctx: &mut HostCtx<'_>, caller: &Caller, _payload: &str) -> bool {
    if !game.loading_or_loaded() && caller.root_admin {
        game.open_all_slots();
    }

    default_hide(ctx)
}

fn cmd_comp(game: &mut Game, ctx: &mut HostCtx<'_>, caller: &Caller, payload: &str) -> bool {
    if payload.is_empty()
        || game.loading_or_loaded()
        || !(caller.root_admin || ctx.cfg.bot_addcompsallowed)
    {
        return false;
    }

    let mut parts = payload.split_whitespace();
    let slot = parts.next().and_then(|n| n.parse::<usize>().ok());
    let skill = parts
        .next()
        .and_then(|n| n.parse::<u8>().ok())
        .unwrap_or(1);

    match slot.and_then(|n| n.checked_sub(1)) {
        Some(sid) => game.computer_slot(sid, skill, true),
        None => info!("[GAME: {}] bad input to comp command", game.game_name),
    }

    default_hide(ctx)
}

fn cmd_colour(game: &mut Game, ctx: &mut HostCtx<'_>, _caller: &Caller, payload: &str) -> bool {
    if payload.is_empty() || game.loading_or_loaded() {
        return false;
    }

    let mut parts = payload.split_whitespace();
    let slot = parts.next().and_then(|n| n.parse::<usize>().ok());
    let colour = parts.next().and_then(|n| n.parse::<u8>().ok());

    if let (Some(slot), Some(colour)) = (slot, colour) {
        if colour < 12 {
            if let Some(sid) = slot.checked_sub(1) {
                game.colour_slot(sid, colour);
            }
        }
    }

    default_hide(ctx)
}

fn cmd_handicap(game: &mut Game, ctx: &mut HostCtx<'_>, _caller: &Caller, payload: &str) -> bool {
    if payload.is_empty() || game.loading_or_loaded() {
        return false;
    }

    let mut parts = payload.split_whitespace();
    let slot = parts.next().and_then(|n| n.parse::<usize>().ok());
    let handicap = parts.next().and_then(|n| n.parse::<u16>().ok());

    // Admin override: any value in 1..=255 is accepted. Outside the map
    // ABI's {50..100} set the behavior is whatever the map does with it.
    if let (Some(slot), Some(handicap @ 1..=255)) = (slot, handicap) {
        if let Some(sid) = slot.checked_sub(1) {
            if sid < game.slots.len() {
                game.slots[sid].handicap = handicap as u8;
                game.send_all_slot_info();
            }
        }
    }

    default_hide(ctx)
}

fn cmd_comprace(game: &mut Game, ctx: &mut HostCtx<'_>, _caller: &Caller, payload: &str) -> bool {
    if payload.is_empty() || game.loading_or_loaded() {
        return false;
    }

    if game.map.options & MAPOPT_FIXED_PLAYER_SETTINGS != 0
        || game.map.flags & MAPFLAG_RANDOM_RACES != 0
    {
        return default_hide(ctx);
    }

    let (slot, race) = split_victim_reason(payload);

    let race = match race.to_lowercase().as_str() {
        "human" => SLOT_RACE_HUMAN,
        "orc" => SLOT_RACE_ORC,
        "night elf" | "nightelf" => SLOT_RACE_NIGHTELF,
        "undead" => SLOT_RACE_UNDEAD,
        "random" => SLOT_RACE_RANDOM,
        other => {
            info!(
                "[GAME: {}] unknown race [{other}] sent to comprace command",
                game.game_name
            );
            return default_hide(ctx);
        }
    };

    if let Some(sid) = slot.parse::<usize>().ok().and_then(|n| n.checked_sub(1)) {
        if game.slots.get(sid).is_some_and(|s| s.is_computer()) {
            game.slots[sid].race = race | SLOT_RACE_SELECTABLE;
            game.send_all_slot_info();
        }
    }

    default_hide(ctx)
}

fn cmd_compteam(game: &mut Game, ctx: &mut HostCtx<'_>, _caller: &Caller, payload: &str) -> bool {
    if payload.is_empty() || game.loading_or_loaded() {
        return false;
    }

    if game.map.options & MAPOPT_FIXED_PLAYER_SETTINGS != 0 {
        return default_hide(ctx);
    }

    let mut parts = payload.split_whitespace();
    let slot = parts.next().and_then(|n| n.parse::<usize>().ok());
    let team = parts.next().and_then(|n| n.parse::<u8>().ok());

    if let (Some(slot), Some(team @ 1..=12)) = (slot, team) {
        if let Some(sid) = slot.checked_sub(1) {
            if game.slots.get(sid).is_some_and(|s| s.is_computer()) {
                game.slots[sid].team = team - 1;
                game.send_all_slot_info();
            }
        }
    }

    default_hide(ctx)
}

fn cmd_dbstatus(game: &mut Game, ctx: &mut HostCtx<'_>, _caller: &Caller, _payload: &str) -> bool {
    let line = format!("{} / {}", ctx.db.status(), ctx.db_local.status());
    game.send_all_chat(&line);
    default_hide(ctx)
}

fn cmd_download(game: &mut Game, ctx: &mut HostCtx<'_>, _caller: &Caller, payload: &str) -> bool {
    if payload.is_empty() || game.loading_or_loaded() {
        return false;
    }

    let (matches, pid) = game.player_from_name_partial(payload);

    match (matches, pid) {
        (0, _) => {
            let line = ctx
                .lang
                .tr("unable_to_start_download_no_matches_found", &[payload]);
            game.send_all_chat(&line);
        }
        (1, Some(pid)) => {
            let host_pid = game.host_pid();
            let sid = game.sid_from_pid(pid);
            let incomplete =
                sid.is_some_and(|sid| game.slots[sid].download_status != 100);

            if let Some(player) = game.player_mut_from_pid(pid) {
                if !player.download_started && !player.download_finished && incomplete {
                    info!("map download started for player [{}]", player.name);
                    player.download_allowed = true;
                    player.download_started = true;
                    player.started_download_at = Some(std::time::Instant::now());
                    player.send_packet(&s2c::StartDownload {
                        unknown: 1,
                        from_pid: host_pid,
                    });
                }
            }
        }
        _ => {
            let line = ctx.lang.tr(
                "unable_to_start_download_found_more_than_one_match",
                &[payload],
            );
            game.send_all_chat(&line);
        }
    }

    default_hide(ctx)
}

fn cmd_drop(game: &mut Game, ctx: &mut HostCtx<'_>, _caller: &Caller, _payload: &str) -> bool {
    if game.loaded() {
        let reason = ctx.lang.tr("lagged_out_dropped_by_admin", &[]);
        game.stop_laggers(&reason);
    }

    default_hide(ctx)
}

fn cmd_end(game: &mut Game, ctx: &mut HostCtx<'_>, _caller: &Caller, _payload: &str) -> bool {
    if game.loaded() {
        info!("[GAME: {}] is over (admin ended game)", game.game_name);
        let reason = ctx.lang.tr("was_disconnected_admin_ended_game", &[]);
        game.stop_players(&reason);
    }

    default_hide(ctx)
}

fn cmd_fakeplayer(game: &mut Game, ctx: &mut HostCtx<'_>, caller: &Caller, _payload: &str) -> bool {
    if game.phase != Phase::Lobby || !caller.root_admin {
        return false;
    }

    if game.fake_player_pid == 255 {
        game.create_fake_player();
    } else {
        game.delete_fake_player();
    }

    default_hide(ctx)
}

fn cmd_fppause(game: &mut Game, ctx: &mut HostCtx<'_>, caller: &Caller, _payload: &str) -> bool {
    if game.fake_player_pid != 255 && game.loaded() && caller.root_admin {
        let pid = game.fake_player_pid;
        game.actions.push_back(QueuedAction {
            pid,
            data: vec![0x01],
        });
    }

    default_hide(ctx)
}

fn cmd_fpresume(game: &mut Game, ctx: &mut HostCtx<'_>, caller: &Caller, _payload: &str) -> bool {
    if game.fake_player_pid != 255 && game.loaded() && caller.root_admin {
        let pid = game.fake_player_pid;
        game.actions.push_back(QueuedAction {
            pid,
            data: vec![0x02],
        });
    }

    default_hide(ctx)
}

fn cmd_from(game: &mut Game, ctx: &mut HostCtx<'_>, _caller: &Caller, _payload: &str) -> bool {
    let froms = game
        .players
        .iter()
        .filter(|p| !p.delete_me)
        .map(|p| format!("{}: ({})", p.name, ctx.ip_to_country.check(p.ip_u32())))
        .collect::<Vec<_>>()
        .join(", ");

    if !froms.is_empty() {
        game.send_all_chat(&froms);
    }

    default_hide(ctx)
}

fn cmd_hcl(game: &mut Game, ctx: &mut HostCtx<'_>, _caller: &Caller, payload: &str) -> bool {
    if game.phase != Phase::Lobby {
        return false;
    }

    if payload.is_empty() {
        let line = ctx.lang.tr("the_hcl_is", &[&game.hcl_command_string.clone()]);
        game.send_all_chat(&line);
        return default_hide(ctx);
    }

    if payload.len() > game.slots.len() {
        let line = ctx.lang.tr("unable_to_set_hcl_too_long", &[]);
        game.send_all_chat(&line);
    } else if payload.chars().all(|c| slot::HCL_CHARS.contains(c)) {
        game.hcl_command_string = payload.to_owned();
        game.hcl_override = true;
        let line = ctx.lang.tr("setting_hcl", &[payload]);
        game.send_all_chat(&line);
    } else {
        let line = ctx.lang.tr("unable_to_set_hcl_invalid", &[]);
        game.send_all_chat(&line);
    }

    default_hide(ctx)
}

fn cmd_hold(game: &mut Game, ctx: &mut HostCtx<'_>, caller: &Caller, payload: &str) -> bool {
    if payload.is_empty() || game.loading_or_loaded() || !caller.root_admin {
        return false;
    }

    for name in payload.split_whitespace() {
        let line = ctx.lang.tr("added_player_to_the_hold_list", &[name]);
        game.send_all_chat(&line);
        game.add_to_reserved(name);
    }

    default_hide(ctx)
}

fn cmd_kick(game: &mut Game, ctx: &mut HostCtx<'_>, caller: &Caller, payload: &str) -> bool {
    if payload.is_empty() || !caller.root_admin {
        return false;
    }

    let (matches, pid) = game.player_from_name_partial(payload);

    match (matches, pid) {
        (0, _) => {
            let line = ctx.lang.tr("unable_to_kick_no_matches_found", &[payload]);
            game.send_all_chat(&line);
        }
        (1, Some(pid)) => {
            let in_lobby = !game.loading_or_loaded();
            let reason = ctx.lang.tr("was_kicked_by_player", &[&caller.name]);

            if let Some(target) = game.player_mut_from_pid(pid) {
                let code = if in_lobby {
                    leave_code::LOBBY
                } else {
                    leave_code::LOST
                };
                target.mark_left(reason, code);
            }
        }
        _ => {
            let line = ctx
                .lang
                .tr("unable_to_kick_found_more_than_one_match", &[payload]);
            game.send_all_chat(&line);
        }
    }

    default_hide(ctx)
}

fn cmd_latency(game: &mut Game, ctx: &mut HostCtx<'_>, _caller: &Caller, payload: &str) -> bool {
    if payload.is_empty() {
        let line = ctx.lang.tr("latency_is", &[&game.latency.to_string()]);
        game.send_all_chat(&line);
        return default_hide(ctx);
    }

    let requested = payload.parse::<u32>().unwrap_or(0);

    if requested <= 20 {
        game.latency = 20;
        let line = ctx.lang.tr("setting_latency_to_minimum", &["20"]);
        game.send_all_chat(&line);
    } else if requested >= 500 {
        game.latency = 500;
        let line = ctx.lang.tr("setting_latency_to_maximum", &["500"]);
        game.send_all_chat(&line);
    } else {
        game.latency = requested;
        let line = ctx.lang.tr("setting_latency_to", &[&requested.to_string()]);
        game.send_all_chat(&line);
    }

    default_hide(ctx)
}

fn cmd_lock(game: &mut Game, ctx: &mut HostCtx<'_>, caller: &Caller, _payload: &str) -> bool {
    if caller.root_admin {
        let line = ctx.lang.tr("game_locked", &[]);
        game.send_all_chat(&line);
        game.locked = true;
    }

    default_hide(ctx)
}

fn cmd_unlock(game: &mut Game, ctx: &mut HostCtx<'_>, caller: &Caller, _payload: &str) -> bool {
    if caller.root_admin || caller.owner {
        let line = ctx.lang.tr("game_unlocked", &[]);
        game.send_all_chat(&line);
        game.locked = false;
    }

    default_hide(ctx)
}

fn cmd_messages(game: &mut Game, ctx: &mut HostCtx<'_>, _caller: &Caller, payload: &str) -> bool {
    match payload {
        "on" => {
            let line = ctx.lang.tr("local_admin_messages_enabled", &[]);
            game.send_all_chat(&line);
            ctx.settings.local_admin_messages = true;
        }
        "off" => {
            let line = ctx.lang.tr("local_admin_messages_disabled", &[]);
            game.send_all_chat(&line);
            ctx.settings.local_admin_messages = false;
        }
        _ => {}
    }

    default_hide(ctx)
}

fn cmd_mute(game: &mut Game, ctx: &mut HostCtx<'_>, caller: &Caller, payload: &str) -> bool {
    set_muted(game, ctx, caller, payload, true)
}

fn cmd_unmute(game: &mut Game, ctx: &mut HostCtx<'_>, caller: &Caller, payload: &str) -> bool {
    set_muted(game, ctx, caller, payload, false)
}

fn set_muted(
    game: &mut Game,
    ctx: &mut HostCtx<'_>,
    caller: &Caller,
    payload: &str,
    muted: bool,
) -> bool {
    let (matches, pid) = game.player_from_name_partial(payload);

    match (matches, pid) {
        (0, _) => {
            let line = ctx.lang.tr("unable_to_mute_no_matches_found", &[payload]);
            game.send_all_chat(&line);
        }
        (1, Some(pid)) => {
            let target_name = game
                .player_from_pid(pid)
                .map(|p| p.name.clone())
                .unwrap_or_default();
            let key = if muted { "muted_player" } else { "unmuted_player" };
            let line = ctx.lang.tr(key, &[&target_name, &caller.name]);
            game.send_all_chat(&line);

            if let Some(target) = game.player_mut_from_pid(pid) {
                target.muted = muted;
            }
        }
        _ => {
            let line = ctx
                .lang
                .tr("unable_to_mute_found_more_than_one_match", &[payload]);
            game.send_all_chat(&line);
        }
    }

    default_hide(ctx)
}

fn cmd_muteall(game: &mut Game, ctx: &mut HostCtx<'_>, _caller: &Caller, _payload: &str) -> bool {
    if game.loaded() {
        let line = ctx.lang.tr("global_chat_muted", &[]);
        game.send_all_chat(&line);
        game.mute_all = true;
    }

    default_hide(ctx)
}

fn cmd_unmuteall(game: &mut Game, ctx: &mut HostCtx<'_>, _caller: &Caller, _payload: &str) -> bool {
    if game.loaded() {
        let line = ctx.lang.tr("global_chat_unmuted", &[]);
        game.send_all_chat(&line);
        game.mute_all = false;
    }

    default_hide(ctx)
}

fn cmd_owner(game: &mut Game, ctx: &mut HostCtx<'_>, caller: &Caller, payload: &str) -> bool {
    if !caller.root_admin {
        return false;
    }

    let owner_present = game.player_from_name(&game.owner_name.clone()).is_some();

    if caller.root_admin || caller.owner || !owner_present {
        let new_owner = if payload.is_empty() {
            caller.name.clone()
        } else {
            payload.to_owned()
        };

        let line = ctx.lang.tr("setting_game_owner_to", &[&new_owner]);
        game.send_all_chat(&line);
        game.owner_name = new_owner;
    } else {
        let line = ctx
            .lang
            .tr("unable_to_set_game_owner", &[&game.owner_name.clone()]);
        game.send_all_chat(&line);
    }

    default_hide(ctx)
}

fn cmd_pingkick(game: &mut Game, ctx: &mut HostCtx<'_>, _caller: &Caller, payload: &str) -> bool {
    let kick_ping = if !game.loading_or_loaded() && !payload.is_empty() {
        payload.parse::<u32>().unwrap_or(0)
    } else {
        0
    };

    let report = ping_report(game, ctx);

    if !report.is_empty() {
        game.send_all_chat(&report);
    }

    if kick_ping == 0 {
        return default_hide(ctx);
    }

    let lc = ctx.cfg.bot_lcpings;
    let mut kicked = 0u32;

    for player in game.players.iter_mut().filter(|p| {
        !p.delete_me && !p.reserved && p.num_pings() > 0 && p.ping(ctx.cfg.bot_lcpings) > kick_ping
    }) {
        let ping = player.ping(lc);
        player.mark_left(
            format!("was kicked for excessive ping {ping} > {kick_ping}"),
            leave_code::LOBBY,
        );
        kicked += 1;
    }

    if kicked > 0 {
        let line = ctx.lang.tr(
            "kicking_players_with_pings_greater_than",
            &[&kicked.to_string(), &kick_ping.to_string()],
        );
        game.send_all_chat(&line);
    }

    default_hide(ctx)
}

fn cmd_priv(game: &mut Game, ctx: &mut HostCtx<'_>, caller: &Caller, payload: &str) -> bool {
    rehost(game, ctx, caller, payload, GAME_PRIVATE)
}

fn cmd_pub(game: &mut Game, ctx: &mut HostCtx<'_>, caller: &Caller, payload: &str) -> bool {
    rehost(game, ctx, caller, payload, GAME_PUBLIC)
}

fn rehost(
    game: &mut Game,
    ctx: &mut HostCtx<'_>,
    caller: &Caller,
    payload: &str,
    state: u32,
) -> bool {
    let allowed = !payload.is_empty()
        && game.phase == Phase::Lobby
        && (!caller.blue || caller.root_admin);

    if !allowed {
        // Untranslated on purpose; long-standing in-joke.
        let cmd = if state == GAME_PRIVATE { "!priv" } else { "!pub" };
        game.send_all_chat(&format!("anus sebe {cmd}"));
        return false;
    }

    if payload.len() >= 31 {
        let line = ctx
            .lang
            .tr("unable_to_create_game_name_too_long", &[payload]);
        game.send_all_chat(&line);
        game.auto_set_hcl();
        return default_hide(ctx);
    }

    let kind = if state == GAME_PRIVATE {
        "trying_to_rehost_as_private_game"
    } else {
        "trying_to_rehost_as_public_game"
    };

    info!(
        "[GAME: {}] trying to rehost as {} game [{payload}]",
        game.game_name,
        if state == GAME_PRIVATE { "private" } else { "public" },
    );

    let line = ctx.lang.tr(kind, &[payload]);
    game.send_all_chat(&line);

    game.game_state = state;
    game.last_game_name = std::mem::replace(&mut game.game_name, payload.to_owned());
    *ctx.host_counter += 1;
    game.host_counter = *ctx.host_counter;

    let ad = game.game_ad();

    for realm in ctx.realms.iter_mut() {
        // Assume the next successful refresh means the rehost worked.
        realm.unqueue_game_refreshes();
        realm.queue_game_uncreate();
        realm.queue_enter_chat();

        // Private games are not refreshed; the create message goes out now.
        if state == GAME_PRIVATE {
            realm.queue_game_create(ad.clone());
        }
    }

    game.creation_time = std::time::Instant::now();
    game.last_refresh_time = std::time::Instant::now();
    game.auto_set_hcl();

    default_hide(ctx)
}

fn cmd_refresh(game: &mut Game, ctx: &mut HostCtx<'_>, _caller: &Caller, payload: &str) -> bool {
    if game.phase != Phase::Lobby {
        return false;
    }

    match payload {
        "on" => {
            let line = ctx.lang.tr("refresh_messages_enabled", &[]);
            game.send_all_chat(&line);
            game.refresh_messages = true;
        }
        "off" => {
            let line = ctx.lang.tr("refresh_messages_disabled", &[]);
            game.send_all_chat(&line);
            game.refresh_messages = false;
        }
        _ => {}
    }

    default_hide(ctx)
}

fn cmd_say(_game: &mut Game, ctx: &mut HostCtx<'_>, caller: &Caller, payload: &str) -> bool {
    if payload.is_empty() {
        return true;
    }

    // Slash commands to the realm are for root admins only.
    if payload.contains('/') && !caller.root_admin {
        return true;
    }

    for realm in ctx.realms.iter() {
        realm.queue_chat_command(payload, None, false);
    }

    true
}

fn cmd_sendlan(game: &mut Game, ctx: &mut HostCtx<'_>, _caller: &Caller, payload: &str) -> bool {
    if payload.is_empty() || game.phase != Phase::Lobby {
        return false;
    }

    let mut parts = payload.split_whitespace();
    let Some(ip) = parts.next().and_then(|s| s.parse::<std::net::IpAddr>().ok()) else {
        info!("[GAME: {}] bad inputs to sendlan command", game.game_name);
        return default_hide(ctx);
    };
    let port = parts
        .next()
        .and_then(|s| s.parse::<u16>().ok())
        .unwrap_or(crate::lan::LAN_PORT);

    // 12 for both totals: the client needs one spare PID for the virtual
    // host, and assumes the host itself fills a seat. Accurate numbers make
    // it think the lobby is full.
    let stat_string = game.map.stat_string(&game.virtual_host_name);
    let product = if ctx.cfg.bot_tft {
        s2c::PRODUCT_TFT
    } else {
        s2c::PRODUCT_ROC
    };

    let pkt = s2c::GameInfo {
        product,
        version: ctx.cfg.lan_war3version,
        host_counter: game.host_counter,
        entry_key: game.entry_key,
        game_name: &game.game_name,
        stat_string: &stat_string,
        slots_total: 12,
        game_type: game.map.game_flags(),
        unknown: 1,
        slots_open: 12,
        uptime: game.creation_time.elapsed().as_secs() as u32,
        port: game.host_port,
    };

    ctx.udp.send_to(std::net::SocketAddr::new(ip, port), &pkt);
    default_hide(ctx)
}

fn cmd_sp(game: &mut Game, ctx: &mut HostCtx<'_>, _caller: &Caller, _payload: &str) -> bool {
    if game.phase == Phase::Lobby {
        let line = ctx.lang.tr("shuffling_players", &[]);
        game.send_all_chat(&line);
        game.shuffle_slots();
    }

    default_hide(ctx)
}

fn cmd_start(game: &mut Game, ctx: &mut HostCtx<'_>, caller: &Caller, payload: &str) -> bool {
    if game.phase != Phase::Lobby {
        return false;
    }

    if game.num_human_players() > 1 {
        if payload.is_empty() {
            if game.last_player_leave.elapsed().as_millis() >= 2000 {
                let humans = game.num_human_players() as u32;

                if humans > 0 {
                    let line = ctx.lang.tr("auto_start_enabled", &[&humans.to_string()]);
                    game.send_all_chat(&line);
                    game.auto_start_players = humans;
                    game.using_start = true;
                }
            } else {
                let line = ctx.lang.tr("count_down_aborted_someone_left_recently", &[]);
                game.send_all_chat(&line);
            }
        } else if payload == "force" && caller.root_admin {
            game.start_countdown(ctx, true);
        }
    } else if payload == "force" && caller.root_admin {
        game.start_countdown(ctx, true);
    } else {
        game.send_all_chat("Need one more player for start");
    }

    default_hide(ctx)
}

fn cmd_startn(game: &mut Game, ctx: &mut HostCtx<'_>, caller: &Caller, _payload: &str) -> bool {
    if game.phase != Phase::Lobby {
        return false;
    }

    if game.num_human_players() < 2 {
        game.send_all_chat("Need one more player for start");
        return default_hide(ctx);
    }

    if !caller.root_admin {
        game.send_all_chat("Need root rights for !startn");
        return default_hide(ctx);
    }

    // Straight to zero: the countdown fires on the next tick.
    game.start_countdown(ctx, true);
    game.countdown_counter = 0;
    default_hide(ctx)
}

fn cmd_swap(game: &mut Game, ctx: &mut HostCtx<'_>, caller: &Caller, payload: &str) -> bool {
    if payload.is_empty() || game.loading_or_loaded() {
        return false;
    }

    let mut parts = payload.split_whitespace();
    let one = parts.next().and_then(|n| n.parse::<usize>().ok());
    let two = parts.next().and_then(|n| n.parse::<usize>().ok());

    let (Some(one @ 1..=12), Some(two @ 1..=12)) = (one, two) else {
        info!("[GAME: {}] bad input to swap command", game.game_name);
        return default_hide(ctx);
    };

    let (sid1, sid2) = (one - 1, two - 1);

    if sid1 >= game.slots.len() || sid2 >= game.slots.len() {
        info!("[GAME: {}] bad input to swap command", game.game_name);
        return default_hide(ctx);
    }

    // Root admins may swap freely; everyone else is kept away from the
    // configured observer seats.
    if !caller.root_admin {
        let observers = &game.observer_slots;
        let status1 = game.slots[sid1].status;
        let status2 = game.slots[sid2].status;

        let touches_observer = |sid: usize| observers.contains(&(sid as u8));

        let forbidden = (status1 == SLOT_STATUS_OCCUPIED
            && status2 == SLOT_STATUS_OCCUPIED
            && (touches_observer(sid1) || touches_observer(sid2)))
            || (status1 == SLOT_STATUS_OCCUPIED
                && status2 == SLOT_STATUS_OPEN
                && touches_observer(sid2))
            || (status2 == SLOT_STATUS_OCCUPIED
                && status1 == SLOT_STATUS_OPEN
                && touches_observer(sid1));

        if forbidden {
            game.send_all_chat("Forbidden swap (obs <> slot)");
            return default_hide(ctx);
        }
    }

    game.swap_slots(sid1, sid2);
    default_hide(ctx)
}

fn cmd_desync(game: &mut Game, ctx: &mut HostCtx<'_>, caller: &Caller, payload: &str) -> bool {
    match payload.to_lowercase().as_str() {
        "on" => {
            ctx.settings.desync_kick = true;
            game.send_all_chat("Desync kick enabled");
        }
        "off" => {
            ctx.settings.desync_kick = false;
            game.send_all_chat("Desync kick disabled");
        }
        _ => {
            game.send_chat_to_pid(caller.pid, "usage: !desync <on | off>");
        }
    }

    default_hide(ctx)
}

fn cmd_synclimit(game: &mut Game, ctx: &mut HostCtx<'_>, _caller: &Caller, payload: &str) -> bool {
    if payload.is_empty() {
        let line = ctx.lang.tr("sync_limit_is", &[&game.sync_limit.to_string()]);
        game.send_all_chat(&line);
        return default_hide(ctx);
    }

    let requested = payload.parse::<u32>().unwrap_or(0);

    if requested <= 10 {
        game.sync_limit = 10;
        let line = ctx.lang.tr("setting_sync_limit_to_minimum", &["10"]);
        game.send_all_chat(&line);
    } else if requested >= 10000 {
        game.sync_limit = 10000;
        let line = ctx.lang.tr("setting_sync_limit_to_maximum", &["10000"]);
        game.send_all_chat(&line);
    } else {
        game.sync_limit = requested;
        let line = ctx.lang.tr("setting_sync_limit_to", &[&requested.to_string()]);
        game.send_all_chat(&line);
    }

    default_hide(ctx)
}

fn cmd_unhost(game: &mut Game, ctx: &mut HostCtx<'_>, caller: &Caller, _payload: &str) -> bool {
    if game.phase == Phase::Lobby && caller.root_admin {
        game.exiting = true;
    }

    default_hide(ctx)
}

fn cmd_virtualhost(game: &mut Game, ctx: &mut HostCtx<'_>, caller: &Caller, payload: &str) -> bool {
    if payload.is_empty()
        || payload.chars().count() > 15
        || game.phase != Phase::Lobby
        || !caller.root_admin
    {
        return false;
    }

    game.delete_virtual_host();
    game.virtual_host_name = payload.to_owned();
    default_hide(ctx)
}

fn cmd_votecancel(game: &mut Game, ctx: &mut HostCtx<'_>, _caller: &Caller, _payload: &str) -> bool {
    if !game.kick_vote_player.is_empty() {
        let line = ctx
            .lang
            .tr("vote_kick_cancelled", &[&game.kick_vote_player.clone()]);
        game.send_all_chat(&line);
        game.kick_vote_player.clear();
        game.started_kick_vote_time = None;
    }

    default_hide(ctx)
}

fn cmd_whisper(_game: &mut Game, ctx: &mut HostCtx<'_>, _caller: &Caller, payload: &str) -> bool {
    if let Some((name, message)) = payload.split_once(' ') {
        for realm in ctx.realms.iter() {
            realm.queue_chat_command(message, Some(name), true);
        }
    }

    true
}

fn cmd_normalcountdown(
    game: &mut Game,
    ctx: &mut HostCtx<'_>,
    _caller: &Caller,
    payload: &str,
) -> bool {
    match payload {
        "on" => {
            ctx.settings.use_normal_countdown = true;
            game.send_all_chat("Normal WC3 countdown enabled");
        }
        "off" => {
            ctx.settings.use_normal_countdown = false;
            game.send_all_chat("Normal WC3 countdown disabled");
        }
        _ => {}
    }

    default_hide(ctx)
}

// ---- player command handlers ---------------------------------------------

fn cmd_tmp_root(game: &mut Game, ctx: &mut HostCtx<'_>, caller: &Caller, payload: &str) -> bool {
    if payload.is_empty() {
        return true;
    }

    if game.is_tmp_root_admin(&caller.name) {
        let admins = game.tmp_root_admins.join(", ");
        game.send_chat_to_pid(caller.pid, "Allready tmp root admin.");
        game.send_chat_to_pid(caller.pid, &format!("Tmp root admins: {admins}"));
    } else if payload == ctx.cfg.bot_tmprootpassword {
        game.tmp_root_admins.push(caller.name.clone());
        game.add_to_reserved(&caller.name.clone());
        let admins = game.tmp_root_admins.join(", ");
        game.send_chat_to_pid(caller.pid, "Success.");
        game.send_chat_to_pid(caller.pid, &format!("Tmp root admins: {admins}"));
    } else {
        game.send_chat_to_pid(caller.pid, "Wrong pass.");
    }

    true
}

fn cmd_checkme(game: &mut Game, ctx: &mut HostCtx<'_>, caller: &Caller, _payload: &str) -> bool {
    if let Some(line) = checked_player_line(game, ctx, caller.pid) {
        game.send_chat_to_pid(caller.pid, &line);
    }

    false
}

fn cmd_ping(game: &mut Game, ctx: &mut HostCtx<'_>, _caller: &Caller, _payload: &str) -> bool {
    let report = ping_report(game, ctx);

    if !report.is_empty() {
        game.send_all_chat(&report);
    }

    true
}

fn cmd_desynccheck(game: &mut Game, ctx: &mut HostCtx<'_>, caller: &Caller, _payload: &str) -> bool {
    let state = if ctx.settings.desync_kick {
        "ON (will kick on desync)"
    } else {
        "OFF (will not kick on desync)"
    };

    game.send_chat_to_pid(caller.pid, &format!("Desync kick: {state}"));
    true
}

fn cmd_handicapcheck(
    game: &mut Game,
    _ctx: &mut HostCtx<'_>,
    caller: &Caller,
    _payload: &str,
) -> bool {
    let lines: Vec<String> = game
        .slots
        .iter()
        .enumerate()
        .map(|(i, slot)| {
            let occupant = match slot.status {
                SLOT_STATUS_OCCUPIED if slot.computer == 1 => "COMP".to_owned(),
                SLOT_STATUS_OCCUPIED => game
                    .player_from_pid(slot.pid)
                    .map(|p| p.name.clone())
                    .unwrap_or_else(|| "?".to_owned()),
                SLOT_STATUS_CLOSED => "CLOSED".to_owned(),
                _ => "OPEN".to_owned(),
            };

            format!("{}. {}: [{}]", i + 1, occupant, slot.handicap)
        })
        .collect();

    for line in lines {
        game.send_chat_to_pid(caller.pid, &line);
    }

    true
}

fn cmd_stats(game: &mut Game, ctx: &mut HostCtx<'_>, caller: &Caller, payload: &str) -> bool {
    let rate_limited = game
        .player_from_pid(caller.pid)
        .and_then(|p| p.stats_sent_at)
        .is_some_and(|t| t.elapsed().as_secs() < 5);

    if rate_limited {
        return false;
    }

    let subject = if payload.is_empty() {
        caller.name.clone()
    } else {
        payload.to_owned()
    };

    let whisper_to = if caller.spoofed && (caller.admin || caller.root_admin || caller.owner) {
        String::new()
    } else {
        caller.name.clone()
    };

    game.pending_summary_checks.push(PendingSummaryCheck {
        whisper_to,
        subject: subject.clone(),
        callable: ctx.db.game_player_summary_check(subject),
    });

    if let Some(player) = game.player_mut_from_pid(caller.pid) {
        player.stats_sent_at = Some(std::time::Instant::now());
    }

    false
}

fn cmd_statsdota(game: &mut Game, ctx: &mut HostCtx<'_>, caller: &Caller, payload: &str) -> bool {
    let rate_limited = game
        .player_from_pid(caller.pid)
        .and_then(|p| p.stats_dota_sent_at)
        .is_some_and(|t| t.elapsed().as_secs() < 5);

    if rate_limited {
        return false;
    }

    let subject = if payload.is_empty() {
        caller.name.clone()
    } else {
        payload.to_owned()
    };

    let whisper_to = if caller.spoofed && (caller.admin || caller.root_admin || caller.owner) {
        String::new()
    } else {
        caller.name.clone()
    };

    game.pending_dota_checks.push(PendingDotaCheck {
        whisper_to,
        subject: subject.clone(),
        callable: ctx.db.dota_player_summary_check(subject),
    });

    if let Some(player) = game.player_mut_from_pid(caller.pid) {
        player.stats_dota_sent_at = Some(std::time::Instant::now());
    }

    false
}

fn cmd_version(game: &mut Game, ctx: &mut HostCtx<'_>, caller: &Caller, _payload: &str) -> bool {
    let key = if caller.spoofed && (caller.admin || caller.root_admin || caller.owner) {
        "version_admin"
    } else {
        "version_notadmin"
    };

    let line = ctx.lang.tr(key, &[crate::VERSION]);
    game.send_chat_to_pid(caller.pid, &line);
    false
}

fn cmd_votekick(game: &mut Game, ctx: &mut HostCtx<'_>, caller: &Caller, payload: &str) -> bool {
    if !ctx.cfg.bot_votekickallowed || payload.is_empty() {
        return false;
    }

    if !game.kick_vote_player.is_empty() {
        let line = ctx.lang.tr("unable_to_vote_kick_already_in_progress", &[]);
        game.send_chat_to_pid(caller.pid, &line);
        return false;
    }

    if game.num_human_players() < 3 {
        let line = ctx.lang.tr("unable_to_vote_kick_not_enough_players", &[]);
        game.send_chat_to_pid(caller.pid, &line);
        return false;
    }

    let (matches, pid) = game.player_from_name_partial(payload);

    match (matches, pid) {
        (0, _) => {
            let line = ctx
                .lang
                .tr("unable_to_vote_kick_no_matches_found", &[payload]);
            game.send_chat_to_pid(caller.pid, &line);
        }
        (1, Some(target_pid)) => {
            let target_name = game
                .player_from_pid(target_pid)
                .map(|p| p.name.clone())
                .unwrap_or_default();
            let target_reserved = game
                .player_from_pid(target_pid)
                .is_some_and(|p| p.reserved);

            if target_reserved {
                let line = ctx
                    .lang
                    .tr("unable_to_vote_kick_player_is_reserved", &[&target_name]);
                game.send_chat_to_pid(caller.pid, &line);
                return false;
            }

            game.kick_vote_player = target_name.clone();
            game.started_kick_vote_time = Some(std::time::Instant::now());

            for player in game.players.iter_mut() {
                player.kick_vote = false;
            }

            // The target cannot vote; the flag is set for bookkeeping but
            // never counted.
            if let Some(target) = game.player_mut_from_pid(target_pid) {
                target.kick_vote = true;
            }

            if let Some(voter) = game.player_mut_from_pid(caller.pid) {
                voter.kick_vote = true;
            }

            info!(
                "[GAME: {}] votekick against player [{target_name}] started by player [{}]",
                game.game_name, caller.name
            );

            let needed = game.votes_needed(ctx.cfg.bot_votekickpercentage);
            let line = ctx.lang.tr(
                "started_vote_kick",
                &[
                    &target_name,
                    &caller.name,
                    &needed.saturating_sub(1).to_string(),
                ],
            );
            game.send_all_chat(&line);

            let trigger = ctx.cfg.bot_commandtrigger.clone();
            let line = ctx.lang.tr("type_yes_to_vote", &[&trigger]);
            game.send_all_chat(&line);
        }
        _ => {
            let line = ctx
                .lang
                .tr("unable_to_vote_kick_found_more_than_one_match", &[payload]);
            game.send_chat_to_pid(caller.pid, &line);
        }
    }

    false
}

fn cmd_yes(game: &mut Game, ctx: &mut HostCtx<'_>, caller: &Caller, _payload: &str) -> bool {
    if game.kick_vote_player.is_empty()
        || caller.name.eq_ignore_ascii_case(&game.kick_vote_player)
    {
        return false;
    }

    let already_voted = game
        .player_from_pid(caller.pid)
        .is_some_and(|p| p.kick_vote);

    if already_voted {
        return false;
    }

    if let Some(voter) = game.player_mut_from_pid(caller.pid) {
        voter.kick_vote = true;
    }

    let votes = game.count_kick_votes();
    let needed = game.votes_needed(ctx.cfg.bot_votekickpercentage);

    if votes >= needed {
        game.conclude_votekick(ctx);
    } else {
        let line = ctx.lang.tr(
            "vote_kick_accepted_need_more_votes",
            &[
                &game.kick_vote_player.clone(),
                &caller.name,
                &(needed - votes).to_string(),
            ],
        );
        game.send_all_chat(&line);
    }

    false
}

fn cmd_dots(game: &mut Game, _ctx: &mut HostCtx<'_>, caller: &Caller, _payload: &str) -> bool {
    if let Some(player) = game.player_mut_from_pid(caller.pid) {
        player.authenticated = true;
    }

    info!("[GAME: {}] [{}] has been authenticated", game.game_name, caller.name);
    game.send_all_chat(&format!("[{}] has been authenticated", caller.name));
    true
}

fn cmd_checkauth(game: &mut Game, _ctx: &mut HostCtx<'_>, caller: &Caller, _payload: &str) -> bool {
    let authenticated = game
        .player_from_pid(caller.pid)
        .is_some_and(|p| p.authenticated);

    game.send_chat_to_pid(
        caller.pid,
        &format!("[{}] {}", caller.name, authenticated),
    );
    true
}

// ---- tables --------------------------------------------------------------

static ADMIN_COMMANDS: &[CommandSpec] = &[
    CommandSpec { names: &["abort", "a"], handler: cmd_abort },
    CommandSpec { names: &["addban", "ban"], handler: cmd_ban },
    CommandSpec { names: &["delban", "unban"], handler: cmd_unban },
    CommandSpec { names: &["announce"], handler: cmd_announce },
    CommandSpec { names: &["autosave"], handler: cmd_autosave },
    CommandSpec { names: &["autostart"], handler: cmd_autostart },
    CommandSpec { names: &["banlast"], handler: cmd_banlast },
    CommandSpec { names: &["check"], handler: cmd_check },
    CommandSpec { names: &["checkban"], handler: cmd_checkban },
    CommandSpec { names: &["clearhcl"], handler: cmd_clearhcl },
    CommandSpec { names: &["close"], handler: cmd_close },
    CommandSpec { names: &["closeall"], handler: cmd_closeall },
    CommandSpec { names: &["open"], handler: cmd_open },
    CommandSpec { names: &["openall"], handler: cmd_openall },
    CommandSpec { names: &["comp"], handler: cmd_comp },
    CommandSpec { names: &["colour"], handler: cmd_colour },
    CommandSpec { names: &["handicap"], handler: cmd_handicap },
    CommandSpec { names: &["comprace"], handler: cmd_comprace },
    CommandSpec { names: &["compteam"], handler: cmd_compteam },
    CommandSpec { names: &["dbstatus"], handler: cmd_dbstatus },
    CommandSpec { names: &["download", "dl"], handler: cmd_download },
    CommandSpec { names: &["drop"], handler: cmd_drop },
    CommandSpec { names: &["end"], handler: cmd_end },
    CommandSpec { names: &["fakeplayer"], handler: cmd_fakeplayer },
    CommandSpec { names: &["fppause"], handler: cmd_fppause },
    CommandSpec { names: &["fpresume"], handler: cmd_fpresume },
    CommandSpec { names: &["from"], handler: cmd_from },
    CommandSpec { names: &["hcl"], handler: cmd_hcl },
    CommandSpec { names: &["hold"], handler: cmd_hold },
    CommandSpec { names: &["kick"], handler: cmd_kick },
    CommandSpec { names: &["latency"], handler: cmd_latency },
    CommandSpec { names: &["lock"], handler: cmd_lock },
    CommandSpec { names: &["unlock"], handler: cmd_unlock },
    CommandSpec { names: &["messages"], handler: cmd_messages },
    CommandSpec { names: &["mute"], handler: cmd_mute },
    CommandSpec { names: &["unmute"], handler: cmd_unmute },
    CommandSpec { names: &["muteall"], handler: cmd_muteall },
    CommandSpec { names: &["unmuteall"], handler: cmd_unmuteall },
    CommandSpec { names: &["owner"], handler: cmd_owner },
    CommandSpec { names: &["pingk", "pingkick"], handler: cmd_pingkick },
    CommandSpec { names: &["priv"], handler: cmd_priv },
    CommandSpec { names: &["pub"], handler: cmd_pub },
    CommandSpec { names: &["refresh"], handler: cmd_refresh },
    CommandSpec { names: &["say", "s"], handler: cmd_say },
    CommandSpec { names: &["sendlan"], handler: cmd_sendlan },
    CommandSpec { names: &["sp"], handler: cmd_sp },
    CommandSpec { names: &["start"], handler: cmd_start },
    CommandSpec { names: &["startn"], handler: cmd_startn },
    CommandSpec { names: &["swap"], handler: cmd_swap },
    CommandSpec { names: &["desync"], handler: cmd_desync },
    CommandSpec { names: &["synclimit"], handler: cmd_synclimit },
    CommandSpec { names: &["unhost"], handler: cmd_unhost },
    CommandSpec { names: &["virtualhost"], handler: cmd_virtualhost },
    CommandSpec { names: &["votecancel"], handler: cmd_votecancel },
    CommandSpec { names: &["w"], handler: cmd_whisper },
    CommandSpec { names: &["normalcountdown"], handler: cmd_normalcountdown },
];

static PLAYER_COMMANDS: &[CommandSpec] = &[
    CommandSpec { names: &["p"], handler: cmd_tmp_root },
    CommandSpec { names: &["checkme"], handler: cmd_checkme },
    CommandSpec { names: &["ping"], handler: cmd_ping },
    CommandSpec {
        names: &["desynccheck", "checkdesync", "cd", "dc"],
        handler: cmd_desynccheck,
    },
    CommandSpec {
        names: &["handicapcheck", "handicapc", "hc", "checkhandicap", "ch"],
        handler: cmd_handicapcheck,
    },
    CommandSpec { names: &["stats"], handler: cmd_stats },
    CommandSpec { names: &["statsdota"], handler: cmd_statsdota },
    CommandSpec { names: &["version"], handler: cmd_version },
    CommandSpec { names: &["votekick"], handler: cmd_votekick },
    CommandSpec { names: &["yes"], handler: cmd_yes },
    CommandSpec { names: &["dots"], handler: cmd_dots },
    CommandSpec { names: &["ca"], handler: cmd_checkauth },
];
