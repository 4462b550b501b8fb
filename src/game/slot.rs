//! Slot table operations and the HCL handicap encoding.

use arbiter_protocol::slot::{
    SlotData, SLOT_STATUS_CLOSED, SLOT_STATUS_OCCUPIED, SLOT_STATUS_OPEN,
};
use rand::seq::SliceRandom;

/// Characters a HCL command string may contain.
pub const HCL_CHARS: &str = "abcdefghijklmnopqrstuvwxyz0123456789 -=,.";

/// The handicap values the map ABI reserves; HCL encoding must avoid mapping
/// onto them.
const LEGAL_HANDICAPS: [u8; 6] = [50, 60, 70, 80, 90, 100];

/// First open slot, if any.
pub fn find_open_slot(slots: &[SlotData]) -> Option<usize> {
    slots.iter().position(|s| s.status == SLOT_STATUS_OPEN)
}

pub fn num_occupied(slots: &[SlotData]) -> usize {
    slots.iter().filter(|s| s.is_occupied()).count()
}

pub fn num_open(slots: &[SlotData]) -> usize {
    slots.iter().filter(|s| s.is_open()).count()
}

/// Whether `hcl` can ride on this slot table's handicaps.
pub fn hcl_fits(hcl: &str, slots: &[SlotData]) -> bool {
    hcl.len() <= num_occupied(slots) && hcl.chars().all(|c| HCL_CHARS.contains(c))
}

/// Encodes the HCL command string into the handicap bytes of the occupied
/// slots, one character per slot. The encoding pairs the slot's current
/// (legal) handicap with the character index and maps the pair into the
/// byte range not used by legal handicaps, so the map's trigger code can
/// recover both.
///
/// Returns false (leaving the slots untouched) if the string does not fit.
pub fn encode_hcl(hcl: &str, slots: &mut [SlotData]) -> bool {
    if !hcl_fits(hcl, slots) {
        return false;
    }

    // All byte values that are not legal handicaps, in order.
    let encoding_map: Vec<u8> = (1..=255u8)
        .filter(|b| !LEGAL_HANDICAPS.contains(b))
        .collect();

    let mut occupied = slots.iter_mut().filter(|s| s.is_occupied());

    for c in hcl.chars() {
        // hcl_fits guarantees enough occupied slots and a valid character.
        let slot = occupied.next().expect("occupied slot for HCL character");
        let char_index = HCL_CHARS.find(c).expect("HCL character") as usize;
        let handicap_index = ((slot.handicap.saturating_sub(50)) / 10) as usize;

        slot.handicap = encoding_map[handicap_index + char_index * 6];
    }

    true
}

/// Randomly permutes the players among the occupied slots. With custom
/// forces the team/colour/race/handicap stay put (they belong to the seat);
/// otherwise whole slots move.
pub fn shuffle_slots(slots: &mut [SlotData], custom_forces: bool) {
    let mut rng = rand::thread_rng();
    let occupied: Vec<usize> = slots
        .iter()
        .enumerate()
        .filter(|(_, s)| s.is_occupied())
        .map(|(i, _)| i)
        .collect();

    let mut shuffled = occupied.clone();
    shuffled.shuffle(&mut rng);

    let originals: Vec<SlotData> = occupied.iter().map(|&i| slots[i]).collect();

    for (&target, original) in shuffled.iter().zip(originals) {
        if custom_forces {
            let seat = slots[target];
            slots[target] = SlotData {
                team: seat.team,
                colour: seat.colour,
                race: seat.race,
                handicap: seat.handicap,
                ..original
            };
        } else {
            slots[target] = original;
        }
    }
}

/// Swaps two slots. With custom forces the seat-bound attributes stay with
/// the seat.
pub fn swap_slots(slots: &mut [SlotData], sid1: usize, sid2: usize, custom_forces: bool) {
    if sid1 >= slots.len() || sid2 >= slots.len() || sid1 == sid2 {
        return;
    }

    let one = slots[sid1];
    let two = slots[sid2];

    if custom_forces {
        slots[sid1] = SlotData {
            team: one.team,
            colour: one.colour,
            race: one.race,
            ..two
        };
        slots[sid2] = SlotData {
            team: two.team,
            colour: two.colour,
            race: two.race,
            ..one
        };
    } else {
        slots[sid1] = two;
        slots[sid2] = one;
    }
}

/// Recolours a slot. If the colour is held by an unoccupied slot the two
/// trade colours; if it is held by an occupied slot nothing happens.
/// Returns whether anything changed.
pub fn colour_slot(slots: &mut [SlotData], sid: usize, colour: u8) -> bool {
    if sid >= slots.len() || colour >= 12 || slots[sid].colour == colour {
        return false;
    }

    let taken_by = slots.iter().position(|s| s.colour == colour);

    match taken_by {
        Some(other) if slots[other].status == SLOT_STATUS_OCCUPIED => false,
        Some(other) => {
            slots[other].colour = slots[sid].colour;
            slots[sid].colour = colour;
            true
        }
        None => {
            slots[sid].colour = colour;
            true
        }
    }
}

/// Closes a slot regardless of its current state.
pub fn close_slot(slots: &mut [SlotData], sid: usize) {
    if let Some(slot) = slots.get_mut(sid) {
        slot.pid = 0;
        slot.download_status = arbiter_protocol::slot::DOWNLOAD_STATUS_NONE;
        slot.status = SLOT_STATUS_CLOSED;
        slot.computer = 0;
    }
}

/// Opens a slot regardless of its current state.
pub fn open_slot(slots: &mut [SlotData], sid: usize) {
    if let Some(slot) = slots.get_mut(sid) {
        slot.pid = 0;
        slot.download_status = arbiter_protocol::slot::DOWNLOAD_STATUS_NONE;
        slot.status = SLOT_STATUS_OPEN;
        slot.computer = 0;
    }
}

/// Fills a slot with a computer player of the given difficulty.
pub fn computer_slot(slots: &mut [SlotData], sid: usize, skill: u8) {
    if let Some(slot) = slots.get_mut(sid) {
        slot.pid = 0;
        slot.download_status = 100;
        slot.status = SLOT_STATUS_OCCUPIED;
        slot.computer = 1;
        slot.computer_type = skill.min(2);
    }
}

#[cfg(test)]
mod tests {
    use arbiter_protocol::slot::SLOT_RACE_RANDOM;
    use pretty_assertions::assert_eq;

    use super::*;

    fn table() -> Vec<SlotData> {
        let mut slots: Vec<SlotData> = (0..4)
            .map(|i| SlotData::open(i / 2, i, SLOT_RACE_RANDOM))
            .collect();

        // Occupy slots 0 and 2.
        for (sid, pid) in [(0usize, 2u8), (2, 3)] {
            slots[sid].pid = pid;
            slots[sid].status = SLOT_STATUS_OCCUPIED;
            slots[sid].download_status = 100;
        }

        slots
    }

    #[test]
    fn hcl_fit_rules() {
        let slots = table();
        assert!(hcl_fits("ap", &slots));
        assert!(!hcl_fits("apem", &slots)); // four chars, two occupied slots
        assert!(!hcl_fits("A", &slots)); // uppercase is not in the charset
    }

    #[test]
    fn hcl_encoding_avoids_legal_handicaps_and_is_deterministic() {
        let mut slots = table();
        assert!(encode_hcl("ap", &mut slots));

        let encoded: Vec<u8> = slots
            .iter()
            .filter(|s| s.is_occupied())
            .map(|s| s.handicap)
            .collect();

        assert_eq!(encoded.len(), 2);
        assert!(encoded.iter().all(|h| !LEGAL_HANDICAPS.contains(h)));

        let mut again = table();
        assert!(encode_hcl("ap", &mut again));
        let encoded_again: Vec<u8> = again
            .iter()
            .filter(|s| s.is_occupied())
            .map(|s| s.handicap)
            .collect();

        assert_eq!(encoded, encoded_again);
    }

    #[test]
    fn hcl_too_long_leaves_slots_untouched() {
        let mut slots = table();
        let before = slots.clone();
        assert!(!encode_hcl("toolong", &mut slots));
        assert_eq!(slots, before);
    }

    #[test]
    fn swap_with_custom_forces_keeps_seat_attributes() {
        let mut slots = table();
        slots[0].handicap = 90;

        swap_slots(&mut slots, 0, 1, true);

        // The player moved, the seat's team/colour stayed.
        assert_eq!(slots[1].pid, 2);
        assert_eq!(slots[1].team, 0);
        assert_eq!(slots[1].colour, 1);
        assert_eq!(slots[0].status, SLOT_STATUS_OPEN);
    }

    #[test]
    fn colour_swap_rules() {
        let mut slots = table();

        // Colour 1 belongs to open slot 1: trade.
        assert!(colour_slot(&mut slots, 0, 1));
        assert_eq!(slots[0].colour, 1);
        assert_eq!(slots[1].colour, 0);

        // Colour 2 belongs to occupied slot 2: refused.
        assert!(!colour_slot(&mut slots, 0, 2));
        assert_eq!(slots[0].colour, 1);
    }

    #[test]
    fn shuffle_preserves_occupancy_count() {
        let mut slots = table();

        for _ in 0..10 {
            shuffle_slots(&mut slots, false);
            assert_eq!(num_occupied(&slots), 2);

            let mut pids: Vec<u8> = slots
                .iter()
                .filter(|s| s.is_occupied())
                .map(|s| s.pid)
                .collect();
            pids.sort_unstable();
            assert_eq!(pids, vec![2, 3]);
        }
    }
}
