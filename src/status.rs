//! The status broadcaster.
//!
//! A small unauthenticated TCP service for dashboards: observers send the
//! ASCII tags `GAME` or `SLOT` and get back one record per line,
//! `|`-separated. Game creation and destruction push an unsolicited `GAME`
//! record to every connected observer.

use arbiter_protocol::slot::{SLOT_STATUS_CLOSED, SLOT_STATUS_OPEN};
use tracing::{info, warn};

use crate::game::Game;
use crate::net::{Listener, RawConnection};

pub struct StatusBroadcaster {
    pub enabled: bool,
    port: u16,
    bind_address: String,
    listener: Option<Listener>,
    clients: Vec<RawConnection>,
}

impl StatusBroadcaster {
    pub fn new(enabled: bool, bind_address: String, port: u16) -> Self {
        Self {
            enabled,
            port,
            bind_address,
            listener: None,
            clients: Vec::new(),
        }
    }

    /// Ensures the listener is bound; a bind failure disables the feature.
    pub fn ensure_listening(&mut self) {
        if !self.enabled || self.listener.is_some() {
            return;
        }

        match Listener::bind(&self.bind_address, self.port, "status") {
            Ok(listener) => {
                info!("listening for status observers on port {}", self.port);
                self.listener = Some(listener);
            }
            Err(e) => {
                warn!("{e}, status broadcaster disabled");
                self.enabled = false;
            }
        }
    }

    /// Accepts observers and answers their GAME/SLOT requests against the
    /// current snapshot.
    pub fn update(&mut self, game: Option<&Game>) {
        let Some(listener) = &self.listener else {
            return;
        };

        while let Some((stream, _addr)) = listener.try_accept() {
            let mut client = RawConnection::spawn(stream);
            // New observers get the game record straight away.
            client.try_send(game_record(game).as_bytes());
            self.clients.push(client);
        }

        for client in &mut self.clients {
            while let Some(request) = client.try_recv() {
                if request.windows(4).any(|w| w == b"GAME") {
                    client.try_send(game_record(game).as_bytes());
                }

                if request.windows(4).any(|w| w == b"SLOT") {
                    client.try_send(slot_records(game).as_bytes());
                }
            }
        }

        self.clients.retain(|c| !c.closed());
    }

    /// Unsolicited push on game create/destroy.
    pub fn push_game(&mut self, game: Option<&Game>) {
        let record = game_record(game);

        for client in &mut self.clients {
            client.try_send(record.as_bytes());
        }

        self.clients.retain(|c| !c.closed());
    }
}

fn game_record(game: Option<&Game>) -> String {
    match game {
        Some(game) => format!(
            "GAME|{}|{}|{}/{}|{}\n",
            game.game_name,
            game.phase_name(),
            game.num_occupied_slots(),
            game.slots.len(),
            game.map.path,
        ),
        None => "GAME|-\n".to_owned(),
    }
}

fn slot_records(game: Option<&Game>) -> String {
    let Some(game) = game else {
        return "SLOT|-\n".to_owned();
    };

    let mut out = String::new();

    for (index, slot) in game.slots.iter().enumerate() {
        let occupant = if slot.status == SLOT_STATUS_OPEN {
            "OPEN".to_owned()
        } else if slot.status == SLOT_STATUS_CLOSED {
            "CLOSED".to_owned()
        } else if slot.computer == 1 {
            "COMP".to_owned()
        } else {
            game.player_from_pid(slot.pid)
                .map(|p| p.name.clone())
                .unwrap_or_else(|| "?".to_owned())
        };

        out.push_str(&format!(
            "SLOT|{}|{}|{}|{}|{}|{}|{}\n",
            index + 1,
            occupant,
            slot.pid,
            slot.team,
            slot.colour,
            slot.handicap,
            slot.download_status,
        ));
    }

    out
}
