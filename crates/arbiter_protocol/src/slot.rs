//! The wire layout of game slots as they appear in `W3GS_SLOTINFO` and
//! `W3GS_SLOTINFOJOIN`.

use std::io::Write;

use anyhow::ensure;
use byteorder::{ReadBytesExt, WriteBytesExt, LE};

use crate::{Decode, Encode};

pub const SLOT_STATUS_OPEN: u8 = 0;
pub const SLOT_STATUS_CLOSED: u8 = 1;
pub const SLOT_STATUS_OCCUPIED: u8 = 2;

pub const SLOT_RACE_HUMAN: u8 = 0x01;
pub const SLOT_RACE_ORC: u8 = 0x02;
pub const SLOT_RACE_NIGHTELF: u8 = 0x04;
pub const SLOT_RACE_UNDEAD: u8 = 0x08;
pub const SLOT_RACE_RANDOM: u8 = 0x20;
pub const SLOT_RACE_SELECTABLE: u8 = 0x40;

pub const SLOT_COMP_EASY: u8 = 0;
pub const SLOT_COMP_NORMAL: u8 = 1;
pub const SLOT_COMP_HARD: u8 = 2;

/// Team number used for observers/referees.
pub const OBSERVER_TEAM: u8 = 12;

/// Download status value meaning "not applicable".
pub const DOWNLOAD_STATUS_NONE: u8 = 255;

pub const MAX_SLOTS: usize = 12;

/// One slot as it travels on the wire: nine bytes.
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub struct SlotData {
    /// Player ID when occupied by a human, 0 otherwise.
    pub pid: u8,
    /// 0-100, or 255 when not applicable.
    pub download_status: u8,
    /// One of the `SLOT_STATUS_*` constants.
    pub status: u8,
    /// 1 when a computer player occupies the slot.
    pub computer: u8,
    /// 0-11, or 12 for observers.
    pub team: u8,
    pub colour: u8,
    /// `SLOT_RACE_*` bitset.
    pub race: u8,
    /// `SLOT_COMP_*` difficulty for computer slots.
    pub computer_type: u8,
    /// 50..=100 by protocol; also the HCL carrier byte at game start.
    pub handicap: u8,
}

impl SlotData {
    pub fn open(team: u8, colour: u8, race: u8) -> Self {
        Self {
            pid: 0,
            download_status: DOWNLOAD_STATUS_NONE,
            status: SLOT_STATUS_OPEN,
            computer: 0,
            team,
            colour,
            race,
            computer_type: SLOT_COMP_NORMAL,
            handicap: 100,
        }
    }

    pub fn is_open(&self) -> bool {
        self.status == SLOT_STATUS_OPEN
    }

    pub fn is_occupied(&self) -> bool {
        self.status == SLOT_STATUS_OCCUPIED
    }

    pub fn is_computer(&self) -> bool {
        self.status == SLOT_STATUS_OCCUPIED && self.computer == 1
    }

    pub fn is_human(&self) -> bool {
        self.status == SLOT_STATUS_OCCUPIED && self.computer == 0 && self.pid != 0
    }
}

impl Encode for SlotData {
    fn encode(&self, mut w: impl Write) -> anyhow::Result<()> {
        w.write_u8(self.pid)?;
        w.write_u8(self.download_status)?;
        w.write_u8(self.status)?;
        w.write_u8(self.computer)?;
        w.write_u8(self.team)?;
        w.write_u8(self.colour)?;
        w.write_u8(self.race)?;
        w.write_u8(self.computer_type)?;
        Ok(w.write_u8(self.handicap)?)
    }
}

impl Decode<'_> for SlotData {
    fn decode(r: &mut &[u8]) -> anyhow::Result<Self> {
        Ok(Self {
            pid: r.read_u8()?,
            download_status: r.read_u8()?,
            status: r.read_u8()?,
            computer: r.read_u8()?,
            team: r.read_u8()?,
            colour: r.read_u8()?,
            race: r.read_u8()?,
            computer_type: r.read_u8()?,
            handicap: r.read_u8()?,
        })
    }
}

/// The slot-info block: a length-prefixed slot table plus the random seed and
/// layout description sent with `W3GS_SLOTINFO` and `W3GS_SLOTINFOJOIN`.
#[derive(Clone, PartialEq, Eq, Debug)]
pub struct SlotInfo {
    pub slots: Vec<SlotData>,
    pub random_seed: u32,
    /// 0 = melee, 1 = custom forces, 3 = custom forces + fixed player settings.
    pub layout_style: u8,
    pub player_slots: u8,
}

impl Encode for SlotInfo {
    fn encode(&self, mut w: impl Write) -> anyhow::Result<()> {
        ensure!(self.slots.len() <= MAX_SLOTS, "too many slots");

        let inner_len = 1 + self.slots.len() * 9 + 4 + 1 + 1;
        w.write_u16::<LE>(inner_len as u16)?;
        w.write_u8(self.slots.len() as u8)?;

        for slot in &self.slots {
            slot.encode(&mut w)?;
        }

        w.write_u32::<LE>(self.random_seed)?;
        w.write_u8(self.layout_style)?;
        Ok(w.write_u8(self.player_slots)?)
    }
}

impl Decode<'_> for SlotInfo {
    fn decode(r: &mut &[u8]) -> anyhow::Result<Self> {
        let inner_len = r.read_u16::<LE>()? as usize;
        let num_slots = r.read_u8()? as usize;

        ensure!(num_slots <= MAX_SLOTS, "too many slots ({num_slots})");
        ensure!(
            inner_len == 1 + num_slots * 9 + 4 + 1 + 1,
            "slot info length of {inner_len} does not match {num_slots} slots"
        );

        let mut slots = Vec::with_capacity(num_slots);

        for _ in 0..num_slots {
            slots.push(SlotData::decode(r)?);
        }

        Ok(Self {
            slots,
            random_seed: r.read_u32::<LE>()?,
            layout_style: r.read_u8()?,
            player_slots: r.read_u8()?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn slot_info_round_trip() {
        let info = SlotInfo {
            slots: vec![
                SlotData {
                    pid: 2,
                    download_status: 100,
                    status: SLOT_STATUS_OCCUPIED,
                    computer: 0,
                    team: 0,
                    colour: 0,
                    race: SLOT_RACE_NIGHTELF | SLOT_RACE_SELECTABLE,
                    computer_type: SLOT_COMP_NORMAL,
                    handicap: 100,
                },
                SlotData::open(1, 1, SLOT_RACE_RANDOM | SLOT_RACE_SELECTABLE),
            ],
            random_seed: 0xDEADBEEF,
            layout_style: 3,
            player_slots: 10,
        };

        let mut buf = vec![];
        info.encode(&mut buf).unwrap();

        let mut r = &buf[..];
        assert_eq!(SlotInfo::decode(&mut r).unwrap(), info);
        assert!(r.is_empty());
    }

    #[test]
    fn slot_info_length_mismatch_is_rejected() {
        let info = SlotInfo {
            slots: vec![SlotData::open(0, 0, SLOT_RACE_RANDOM)],
            random_seed: 0,
            layout_style: 0,
            player_slots: 1,
        };

        let mut buf = vec![];
        info.encode(&mut buf).unwrap();

        // Claim two slots while only carrying one.
        buf[2] = 2;

        let mut r = &buf[..];
        assert!(SlotInfo::decode(&mut r).is_err());
    }
}
