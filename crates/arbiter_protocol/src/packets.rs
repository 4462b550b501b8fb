//! All of the game protocol's packets.
//!
//! Packets are grouped by direction: [`c2s`] for client-to-host and [`s2c`]
//! for host-to-client (including the UDP discovery datagrams). Layouts are
//! hand-written because the protocol predates any schema: bodies are packed
//! little-endian structs with NUL-terminated strings.

pub mod c2s;
pub mod s2c;

/// Reasons sent with `W3GS_REJECTJOIN`.
pub mod reject_join {
    pub const FULL: u32 = 0x09;
    pub const STARTED: u32 = 0x0A;
    pub const WRONG_PASSWORD: u32 = 0x1B;
}

/// Codes carried by `W3GS_PLAYERLEFT` and `W3GS_LEAVEGAME`.
pub mod leave_code {
    pub const DISCONNECT: u32 = 0x01;
    pub const LOST: u32 = 0x07;
    pub const LOST_BUILDINGS: u32 = 0x08;
    pub const WON: u32 = 0x09;
    pub const DRAW: u32 = 0x0A;
    pub const OBSERVER: u32 = 0x0B;
    pub const LOBBY: u32 = 0x0D;
}

/// Flag bytes carried by the chat packets.
pub mod chat_flag {
    pub const MESSAGE: u8 = 0x10;
    pub const TEAM_CHANGE: u8 = 0x11;
    pub const COLOUR_CHANGE: u8 = 0x12;
    pub const RACE_CHANGE: u8 = 0x13;
    pub const HANDICAP_CHANGE: u8 = 0x14;
    pub const MESSAGE_EXTRA: u8 = 0x20;
}

/// Map transfer chunks carry at most this many payload bytes.
pub const MAP_PART_SIZE: usize = 1442;
