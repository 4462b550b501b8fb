pub(crate) mod util;

mod bans;
mod commands;
mod ingame;
mod lifecycle;
mod resume;
mod votekick;
