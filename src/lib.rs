#![doc = include_str!("../README.md")]

pub mod command;
pub mod config;
pub mod db;
pub mod error;
pub mod game;
pub mod host;
pub mod lan;
pub mod map;
pub mod net;
pub mod realm;
pub mod reconnect;
pub mod stats;
pub mod status;

#[cfg(test)]
mod tests;

pub use arbiter_lang::Language;

/// Reported by `!version`.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// The Warcraft III patch level advertised to LAN clients.
pub const LAN_WAR3_VERSION: u32 = 24;
