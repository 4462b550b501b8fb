//! The database façade.
//!
//! Queries run on a dedicated worker thread per database handle; the reactor
//! submits work and gets back a [`Callable`]: a typed handle polled with
//! [`Callable::ready`] and consumed exactly once. Worker-side SQL failures
//! latch an error string which the reactor treats as fatal on its next tick.

use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use rusqlite::Connection;
use tracing::{error, info};

/// A handle to background work. Poll [`ready`], then consume the result
/// exactly once with [`into_result`].
///
/// Dropping an unfinished callable is allowed: the worker finishes the query
/// and the result is discarded. That is the "orphaned callable" shutdown
/// path; nobody joins on worker threads mid-flight.
///
/// [`ready`]: Self::ready
/// [`into_result`]: Self::into_result
pub struct Callable<T> {
    rx: flume::Receiver<T>,
    result: Option<T>,
}

impl<T> Callable<T> {
    pub fn ready(&mut self) -> bool {
        if self.result.is_some() {
            return true;
        }

        match self.rx.try_recv() {
            Ok(value) => {
                self.result = Some(value);
                true
            }
            Err(_) => false,
        }
    }

    /// # Panics
    ///
    /// Panics if called before [`ready`](Self::ready) returned true.
    pub fn into_result(mut self) -> T {
        self.ready();
        self.result.expect("callable consumed before it was ready")
    }
}

/// A staged or stored ban record.
#[derive(Clone, Default, Debug)]
pub struct DbBan {
    pub server: String,
    pub name: String,
    pub ip: String,
    pub date: String,
    pub game_name: String,
    pub admin: String,
    pub reason: String,
}

/// Everything needed to persist one player's participation in a game.
#[derive(Clone, Default, Debug)]
pub struct DbGamePlayer {
    pub name: String,
    pub ip: String,
    pub spoofed: bool,
    pub spoofed_realm: String,
    pub reserved: bool,
    pub loading_time_ms: u64,
    pub left_seconds: u64,
    pub left_reason: String,
    pub team: u8,
    pub colour: u8,
}

#[derive(Clone, Default, Debug)]
pub struct GamePlayerSummary {
    pub first_game: String,
    pub last_game: String,
    pub total_games: u32,
    pub avg_loading_time_ms: u32,
    pub avg_left_percent: u32,
}

#[derive(Clone, Default, Debug)]
pub struct DotaPlayerSummary {
    pub total_games: u32,
    pub wins: u32,
    pub losses: u32,
    pub kills: u32,
    pub deaths: u32,
    pub assists: u32,
}

type Job = Box<dyn FnOnce(&mut Connection) + Send>;

/// One SQLite handle behind one worker thread.
pub struct Database {
    tx: flume::Sender<Job>,
    outstanding: Arc<AtomicUsize>,
    completed: Arc<AtomicUsize>,
    error: Arc<Mutex<Option<String>>>,
    label: &'static str,
}

impl Database {
    pub fn open(path: &Path, label: &'static str) -> anyhow::Result<Self> {
        let conn = Connection::open(path)?;
        Ok(Self::with_connection(conn, label))
    }

    /// An in-memory database; used by the tests and usable as a throwaway
    /// local store.
    pub fn open_in_memory(label: &'static str) -> anyhow::Result<Self> {
        let conn = Connection::open_in_memory()?;
        Ok(Self::with_connection(conn, label))
    }

    fn with_connection(mut conn: Connection, label: &'static str) -> Self {
        let (tx, rx) = flume::unbounded::<Job>();
        let outstanding = Arc::new(AtomicUsize::new(0));
        let completed = Arc::new(AtomicUsize::new(0));
        let error = Arc::new(Mutex::new(None));

        if let Err(e) = init_schema(&conn) {
            *error.lock() = Some(e.to_string());
        }

        let worker_outstanding = outstanding.clone();
        let worker_completed = completed.clone();

        std::thread::Builder::new()
            .name(format!("db-{label}"))
            .spawn(move || {
                for job in rx.iter() {
                    job(&mut conn);
                    worker_outstanding.fetch_sub(1, Ordering::SeqCst);
                    worker_completed.fetch_add(1, Ordering::SeqCst);
                }
            })
            .expect("failed to spawn database worker");

        info!("[DB: {label}] database opened");

        Self {
            tx,
            outstanding,
            completed,
            error,
            label,
        }
    }

    pub fn has_error(&self) -> bool {
        self.error.lock().is_some()
    }

    pub fn error(&self) -> Option<String> {
        self.error.lock().clone()
    }

    /// Queries still queued or running.
    pub fn outstanding(&self) -> usize {
        self.outstanding.load(Ordering::SeqCst)
    }

    /// One line for `!dbstatus`.
    pub fn status(&self) -> String {
        format!(
            "[{}] queries completed: {}, in flight: {}, error: {}",
            self.label,
            self.completed.load(Ordering::SeqCst),
            self.outstanding(),
            self.error().unwrap_or_else(|| "none".to_owned()),
        )
    }

    fn submit<T, F>(&self, fallback: T, f: F) -> Callable<T>
    where
        T: Send + 'static,
        F: FnOnce(&mut Connection) -> rusqlite::Result<T> + Send + 'static,
    {
        let (tx, rx) = flume::bounded(1);
        let latch = self.error.clone();
        let label = self.label;

        self.outstanding.fetch_add(1, Ordering::SeqCst);

        let job: Job = Box::new(move |conn| {
            let value = match f(conn) {
                Ok(value) => value,
                Err(e) => {
                    error!("[DB: {label}] query failed: {e}");
                    *latch.lock() = Some(e.to_string());
                    fallback
                }
            };

            let _ = tx.send(value);
        });

        if self.tx.send(job).is_err() {
            // Worker gone; the error latch will already be set or the
            // process is tearing down.
            self.outstanding.fetch_sub(1, Ordering::SeqCst);
        }

        Callable { rx, result: None }
    }

    pub fn admin_list(&self, server: String) -> Callable<Vec<String>> {
        self.submit(vec![], move |conn| {
            let mut stmt = conn.prepare("SELECT name FROM admins WHERE server = ?1")?;
            let rows = stmt.query_map([&server], |row| row.get(0))?;
            rows.collect()
        })
    }

    pub fn admin_add(&self, server: String, name: String) -> Callable<bool> {
        self.submit(false, move |conn| {
            conn.execute(
                "INSERT INTO admins ( name, server ) VALUES ( ?1, ?2 )",
                (&name.to_lowercase(), &server),
            )?;
            Ok(true)
        })
    }

    pub fn ban_list(&self, server: String) -> Callable<Vec<DbBan>> {
        self.submit(vec![], move |conn| {
            let mut stmt = conn.prepare(
                "SELECT server, name, ip, date, gamename, admin, reason FROM bans \
                 WHERE server = ?1",
            )?;
            let rows = stmt.query_map([&server], |row| {
                Ok(DbBan {
                    server: row.get(0)?,
                    name: row.get(1)?,
                    ip: row.get(2)?,
                    date: row.get(3)?,
                    game_name: row.get(4)?,
                    admin: row.get(5)?,
                    reason: row.get(6)?,
                })
            })?;
            rows.collect()
        })
    }

    pub fn ban_add(
        &self,
        server: String,
        user: String,
        ip: String,
        game_name: String,
        admin: String,
        reason: String,
    ) -> Callable<bool> {
        self.submit(false, move |conn| {
            conn.execute(
                "INSERT INTO bans ( server, name, ip, date, gamename, admin, reason ) \
                 VALUES ( ?1, ?2, ?3, date('now'), ?4, ?5, ?6 )",
                (&server, &user.to_lowercase(), &ip, &game_name, &admin, &reason),
            )?;
            Ok(true)
        })
    }

    pub fn ban_remove(&self, user: String) -> Callable<bool> {
        self.submit(false, move |conn| {
            let n = conn.execute(
                "DELETE FROM bans WHERE name = ?1",
                [&user.to_lowercase()],
            )?;
            Ok(n > 0)
        })
    }

    pub fn ban_check(&self, server: String, user: String) -> Callable<Option<DbBan>> {
        self.submit(None, move |conn| {
            let mut stmt = conn.prepare(
                "SELECT server, name, ip, date, gamename, admin, reason FROM bans \
                 WHERE server = ?1 AND name = ?2",
            )?;

            let mut rows = stmt.query_map((&server, &user.to_lowercase()), |row| {
                Ok(DbBan {
                    server: row.get(0)?,
                    name: row.get(1)?,
                    ip: row.get(2)?,
                    date: row.get(3)?,
                    game_name: row.get(4)?,
                    admin: row.get(5)?,
                    reason: row.get(6)?,
                })
            })?;

            rows.next().transpose()
        })
    }

    #[allow(clippy::too_many_arguments)]
    pub fn game_add(
        &self,
        server: String,
        map: String,
        game_name: String,
        owner_name: String,
        duration_seconds: u64,
        game_state: u32,
        creator_name: String,
        creator_server: String,
    ) -> Callable<u32> {
        self.submit(0, move |conn| {
            conn.execute(
                "INSERT INTO games ( server, map, datetime, gamename, ownername, duration, \
                 gamestate, creatorname, creatorserver ) \
                 VALUES ( ?1, ?2, datetime('now'), ?3, ?4, ?5, ?6, ?7, ?8 )",
                (
                    &server,
                    &map,
                    &game_name,
                    &owner_name,
                    duration_seconds,
                    game_state,
                    &creator_name,
                    &creator_server,
                ),
            )?;
            Ok(conn.last_insert_rowid() as u32)
        })
    }

    pub fn game_player_add(&self, game_id: u32, player: DbGamePlayer) -> Callable<u32> {
        self.submit(0, move |conn| {
            conn.execute(
                "INSERT INTO gameplayers ( gameid, name, ip, spoofed, reserved, loadingtime, \
                 left, leftreason, team, colour, spoofedrealm ) \
                 VALUES ( ?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11 )",
                (
                    game_id,
                    &player.name.to_lowercase(),
                    &player.ip,
                    player.spoofed,
                    player.reserved,
                    player.loading_time_ms,
                    player.left_seconds,
                    &player.left_reason,
                    player.team,
                    player.colour,
                    &player.spoofed_realm,
                ),
            )?;
            Ok(conn.last_insert_rowid() as u32)
        })
    }

    pub fn game_player_summary_check(&self, name: String) -> Callable<Option<GamePlayerSummary>> {
        self.submit(None, move |conn| {
            let mut stmt = conn.prepare(
                "SELECT MIN(g.datetime), MAX(g.datetime), COUNT(*), AVG(gp.loadingtime), \
                 AVG(CASE WHEN g.duration > 0 THEN gp.left * 100.0 / g.duration ELSE 100 END) \
                 FROM gameplayers gp JOIN games g ON g.id = gp.gameid WHERE gp.name = ?1",
            )?;

            let summary = stmt.query_row([&name.to_lowercase()], |row| {
                let total: u32 = row.get(2)?;
                Ok(if total == 0 {
                    None
                } else {
                    Some(GamePlayerSummary {
                        first_game: row.get(0)?,
                        last_game: row.get(1)?,
                        total_games: total,
                        avg_loading_time_ms: row.get::<_, f64>(3)? as u32,
                        avg_left_percent: row.get::<_, f64>(4)? as u32,
                    })
                })
            })?;

            Ok(summary)
        })
    }

    pub fn dota_game_add(
        &self,
        game_id: u32,
        winner: u32,
        minutes: u32,
        seconds: u32,
    ) -> Callable<u32> {
        self.submit(0, move |conn| {
            conn.execute(
                "INSERT INTO dotagames ( gameid, winner, min, sec ) VALUES ( ?1, ?2, ?3, ?4 )",
                (game_id, winner, minutes, seconds),
            )?;
            Ok(conn.last_insert_rowid() as u32)
        })
    }

    #[allow(clippy::too_many_arguments)]
    pub fn dota_player_add(
        &self,
        game_id: u32,
        colour: u32,
        kills: u32,
        deaths: u32,
        assists: u32,
        creep_kills: u32,
        creep_denies: u32,
    ) -> Callable<u32> {
        self.submit(0, move |conn| {
            conn.execute(
                "INSERT INTO dotaplayers ( gameid, colour, kills, deaths, assists, creepkills, \
                 creepdenies ) VALUES ( ?1, ?2, ?3, ?4, ?5, ?6, ?7 )",
                (game_id, colour, kills, deaths, assists, creep_kills, creep_denies),
            )?;
            Ok(conn.last_insert_rowid() as u32)
        })
    }

    pub fn dota_player_summary_check(&self, name: String) -> Callable<Option<DotaPlayerSummary>> {
        self.submit(None, move |conn| {
            let mut stmt = conn.prepare(
                "SELECT COUNT(*), \
                 SUM(CASE WHEN dg.winner != 0 THEN 1 ELSE 0 END), \
                 SUM(dp.kills), SUM(dp.deaths), SUM(dp.assists) \
                 FROM dotaplayers dp \
                 JOIN dotagames dg ON dg.gameid = dp.gameid \
                 JOIN gameplayers gp ON gp.gameid = dp.gameid AND gp.colour = dp.colour \
                 WHERE gp.name = ?1",
            )?;

            let summary = stmt.query_row([&name.to_lowercase()], |row| {
                let total: u32 = row.get(0)?;
                Ok(if total == 0 {
                    None
                } else {
                    let wins: u32 = row.get::<_, Option<u32>>(1)?.unwrap_or(0);
                    Some(DotaPlayerSummary {
                        total_games: total,
                        wins,
                        losses: total - wins,
                        kills: row.get::<_, Option<u32>>(2)?.unwrap_or(0),
                        deaths: row.get::<_, Option<u32>>(3)?.unwrap_or(0),
                        assists: row.get::<_, Option<u32>>(4)?.unwrap_or(0),
                    })
                })
            })?;

            Ok(summary)
        })
    }

    /// Bulk-inserts ip-to-country rows inside one transaction.
    pub fn from_add_bulk(&self, rows: Vec<(u32, u32, String)>) -> Callable<u32> {
        self.submit(0, move |conn| {
            let tx = conn.transaction()?;
            let mut count = 0u32;

            {
                let mut stmt = tx.prepare(
                    "INSERT INTO iptocountry ( ip1, ip2, country ) VALUES ( ?1, ?2, ?3 )",
                )?;

                for (ip1, ip2, country) in &rows {
                    stmt.execute((ip1, ip2, country))?;
                    count += 1;
                }
            }

            tx.commit()?;
            Ok(count)
        })
    }
}

fn init_schema(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS admins (
            id INTEGER PRIMARY KEY,
            name TEXT NOT NULL,
            server TEXT NOT NULL DEFAULT ''
        );
        CREATE TABLE IF NOT EXISTS bans (
            id INTEGER PRIMARY KEY,
            server TEXT NOT NULL,
            name TEXT NOT NULL,
            ip TEXT,
            date TEXT NOT NULL,
            gamename TEXT,
            admin TEXT NOT NULL,
            reason TEXT
        );
        CREATE TABLE IF NOT EXISTS games (
            id INTEGER PRIMARY KEY,
            server TEXT NOT NULL,
            map TEXT NOT NULL,
            datetime TEXT NOT NULL,
            gamename TEXT NOT NULL,
            ownername TEXT NOT NULL,
            duration INTEGER NOT NULL,
            gamestate INTEGER NOT NULL DEFAULT 0,
            creatorname TEXT NOT NULL DEFAULT '',
            creatorserver TEXT NOT NULL DEFAULT ''
        );
        CREATE TABLE IF NOT EXISTS gameplayers (
            id INTEGER PRIMARY KEY,
            gameid INTEGER NOT NULL,
            name TEXT NOT NULL,
            ip TEXT NOT NULL,
            spoofed INTEGER NOT NULL,
            reserved INTEGER NOT NULL,
            loadingtime INTEGER NOT NULL,
            left INTEGER NOT NULL,
            leftreason TEXT NOT NULL,
            team INTEGER NOT NULL,
            colour INTEGER NOT NULL,
            spoofedrealm TEXT NOT NULL DEFAULT ''
        );
        CREATE TABLE IF NOT EXISTS dotagames (
            id INTEGER PRIMARY KEY,
            gameid INTEGER NOT NULL,
            winner INTEGER NOT NULL,
            min INTEGER NOT NULL DEFAULT 0,
            sec INTEGER NOT NULL DEFAULT 0
        );
        CREATE TABLE IF NOT EXISTS dotaplayers (
            id INTEGER PRIMARY KEY,
            gameid INTEGER NOT NULL,
            colour INTEGER NOT NULL,
            kills INTEGER NOT NULL,
            deaths INTEGER NOT NULL,
            assists INTEGER NOT NULL,
            creepkills INTEGER NOT NULL,
            creepdenies INTEGER NOT NULL
        );
        CREATE TABLE IF NOT EXISTS iptocountry (
            ip1 INTEGER NOT NULL,
            ip2 INTEGER NOT NULL,
            country TEXT NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_bans_name ON bans ( name );
        CREATE INDEX IF NOT EXISTS idx_gameplayers_name ON gameplayers ( name );
        CREATE INDEX IF NOT EXISTS idx_iptocountry ON iptocountry ( ip1, ip2 );",
    )
}

/// An in-memory ip-to-country index, so `!check` and `!from` answer without a
/// database round trip. Loaded once at startup from `ip-to-country.csv`.
#[derive(Default)]
pub struct IpToCountry {
    /// Sorted, non-overlapping `(start, end, country)` ranges.
    ranges: Vec<(u32, u32, String)>,
}

impl IpToCountry {
    pub fn load_csv(path: &Path) -> std::io::Result<Self> {
        let text = std::fs::read_to_string(path)?;
        let mut ranges = Vec::new();

        for line in text.lines() {
            let mut fields = line.split(',').map(|f| f.trim_matches(['"', ' ']));

            let (Some(ip1), Some(ip2), Some(country)) =
                (fields.next(), fields.next(), fields.next())
            else {
                continue;
            };

            let (Ok(ip1), Ok(ip2)) = (ip1.parse(), ip2.parse()) else {
                continue;
            };

            ranges.push((ip1, ip2, country.to_owned()));
        }

        ranges.sort_by_key(|r| r.0);
        Ok(Self { ranges })
    }

    pub fn len(&self) -> usize {
        self.ranges.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ranges.is_empty()
    }

    /// Country code for a host-order IPv4 address, or `"??"`.
    pub fn check(&self, ip: u32) -> &str {
        let idx = self.ranges.partition_point(|r| r.0 <= ip);

        match idx.checked_sub(1).and_then(|i| self.ranges.get(i)) {
            Some((_, end, country)) if ip <= *end => country,
            _ => "??",
        }
    }

    /// Rows for persisting into the local database.
    pub fn rows(&self) -> Vec<(u32, u32, String)> {
        self.ranges.clone()
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    fn wait<T>(mut callable: Callable<T>) -> T {
        for _ in 0..200 {
            if callable.ready() {
                return callable.into_result();
            }
            std::thread::sleep(Duration::from_millis(5));
        }
        panic!("callable never became ready");
    }

    #[test]
    fn game_add_returns_row_id() {
        let db = Database::open_in_memory("test").unwrap();

        let id = wait(db.game_add(
            "useast".into(),
            "dota.w3x".into(),
            "gn".into(),
            "owner".into(),
            1200,
            16,
            "creator".into(),
            "useast".into(),
        ));
        assert_eq!(id, 1);

        let id2 = wait(db.game_add(
            "useast".into(),
            "dota.w3x".into(),
            "gn2".into(),
            "owner".into(),
            900,
            16,
            "creator".into(),
            "useast".into(),
        ));
        assert_eq!(id2, 2);
        assert!(!db.has_error());
    }

    #[test]
    fn ban_lifecycle() {
        let db = Database::open_in_memory("test").unwrap();

        assert!(wait(db.ban_add(
            "useast".into(),
            "Varlock".into(),
            "1.2.3.4".into(),
            "gn".into(),
            "Admin".into(),
            "griefing".into(),
        )));

        let ban = wait(db.ban_check("useast".into(), "varlock".into()));
        assert_eq!(ban.unwrap().reason, "griefing");

        assert!(wait(db.ban_remove("VARLOCK".into())));
        assert!(wait(db.ban_check("useast".into(), "varlock".into())).is_none());
    }

    #[test]
    fn callable_is_not_ready_immediately_under_load() {
        let db = Database::open_in_memory("test").unwrap();
        // Regardless of timing, outstanding() reaches zero after the drain.
        let c = db.admin_list("useast".into());
        let names = wait(c);
        assert!(names.is_empty());
        assert_eq!(db.outstanding(), 0);
    }

    #[test]
    fn ip_to_country_lookup() {
        let index = IpToCountry {
            ranges: vec![(100, 200, "DE".into()), (300, 400, "SE".into())],
        };

        assert_eq!(index.check(150), "DE");
        assert_eq!(index.check(300), "SE");
        assert_eq!(index.check(250), "??");
        assert_eq!(index.check(50), "??");
        assert_eq!(index.check(401), "??");
    }
}
