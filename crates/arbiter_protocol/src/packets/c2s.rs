//! Packets sent by a game client to the host.

use std::io::Write;

use anyhow::bail;
use byteorder::{ReadBytesExt, WriteBytesExt, LE};

use crate::packets::chat_flag;
use crate::{Decode, Encode, Packet, PacketSide, RawBytes};

/// `W3GS_REQJOIN`: a client asking for a lobby seat.
#[derive(Clone, PartialEq, Eq, Debug)]
pub struct ReqJoin<'a> {
    pub host_counter: u32,
    pub entry_key: u32,
    pub unknown: u8,
    pub listen_port: u16,
    pub peer_key: u32,
    pub name: &'a str,
    /// Trailing peer data (internal address blob); opaque to the host.
    pub remainder: RawBytes<'a>,
}

impl Packet for ReqJoin<'_> {
    const ID: u8 = 0x1E;
    const NAME: &'static str = "ReqJoin";
    const SIDE: PacketSide = PacketSide::Serverbound;
}

impl Encode for ReqJoin<'_> {
    fn encode(&self, mut w: impl Write) -> anyhow::Result<()> {
        w.write_u32::<LE>(self.host_counter)?;
        w.write_u32::<LE>(self.entry_key)?;
        w.write_u8(self.unknown)?;
        w.write_u16::<LE>(self.listen_port)?;
        w.write_u32::<LE>(self.peer_key)?;
        self.name.encode(&mut w)?;
        self.remainder.encode(w)
    }
}

impl<'a> Decode<'a> for ReqJoin<'a> {
    fn decode(r: &mut &'a [u8]) -> anyhow::Result<Self> {
        Ok(Self {
            host_counter: r.read_u32::<LE>()?,
            entry_key: r.read_u32::<LE>()?,
            unknown: r.read_u8()?,
            listen_port: r.read_u16::<LE>()?,
            peer_key: r.read_u32::<LE>()?,
            name: <&str>::decode(r)?,
            remainder: RawBytes::decode(r)?,
        })
    }
}

/// `W3GS_LEAVEGAME`.
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub struct LeaveGame {
    pub reason: u32,
}

impl Packet for LeaveGame {
    const ID: u8 = 0x21;
    const NAME: &'static str = "LeaveGame";
    const SIDE: PacketSide = PacketSide::Serverbound;
}

impl Encode for LeaveGame {
    fn encode(&self, mut w: impl Write) -> anyhow::Result<()> {
        Ok(w.write_u32::<LE>(self.reason)?)
    }
}

impl Decode<'_> for LeaveGame {
    fn decode(r: &mut &[u8]) -> anyhow::Result<Self> {
        Ok(Self {
            reason: r.read_u32::<LE>()?,
        })
    }
}

/// `W3GS_GAMELOADED_SELF`: the sender finished loading the map.
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub struct GameLoadedSelf;

impl Packet for GameLoadedSelf {
    const ID: u8 = 0x23;
    const NAME: &'static str = "GameLoadedSelf";
    const SIDE: PacketSide = PacketSide::Serverbound;
}

impl Encode for GameLoadedSelf {
    fn encode(&self, _w: impl Write) -> anyhow::Result<()> {
        Ok(())
    }
}

impl Decode<'_> for GameLoadedSelf {
    fn decode(_r: &mut &[u8]) -> anyhow::Result<Self> {
        Ok(Self)
    }
}

/// `W3GS_OUTGOING_ACTION`: an in-game action to relay to every peer.
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub struct OutgoingAction<'a> {
    pub crc: u32,
    pub action: RawBytes<'a>,
}

impl Packet for OutgoingAction<'_> {
    const ID: u8 = 0x26;
    const NAME: &'static str = "OutgoingAction";
    const SIDE: PacketSide = PacketSide::Serverbound;
}

impl Encode for OutgoingAction<'_> {
    fn encode(&self, mut w: impl Write) -> anyhow::Result<()> {
        w.write_u32::<LE>(self.crc)?;
        self.action.encode(w)
    }
}

impl<'a> Decode<'a> for OutgoingAction<'a> {
    fn decode(r: &mut &'a [u8]) -> anyhow::Result<Self> {
        Ok(Self {
            crc: r.read_u32::<LE>()?,
            action: RawBytes::decode(r)?,
        })
    }
}

/// `W3GS_OUTGOING_KEEPALIVE`: the per-tick sync checksum.
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub struct OutgoingKeepalive {
    pub unknown: u8,
    pub checksum: u32,
}

impl Packet for OutgoingKeepalive {
    const ID: u8 = 0x27;
    const NAME: &'static str = "OutgoingKeepalive";
    const SIDE: PacketSide = PacketSide::Serverbound;
}

impl Encode for OutgoingKeepalive {
    fn encode(&self, mut w: impl Write) -> anyhow::Result<()> {
        w.write_u8(self.unknown)?;
        Ok(w.write_u32::<LE>(self.checksum)?)
    }
}

impl Decode<'_> for OutgoingKeepalive {
    fn decode(r: &mut &[u8]) -> anyhow::Result<Self> {
        Ok(Self {
            unknown: r.read_u8()?,
            checksum: r.read_u32::<LE>()?,
        })
    }
}

/// The payload variants of `W3GS_CHAT_TO_HOST`, selected by the flag byte.
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub enum ChatToHostPayload<'a> {
    Message(&'a str),
    TeamChange(u8),
    ColourChange(u8),
    RaceChange(u8),
    HandicapChange(u8),
    /// In-game chat carries an extra flags word (0 = all, 1 = allies, 2 =
    /// observers, 3+ = private).
    MessageExtra(u32, &'a str),
}

/// `W3GS_CHAT_TO_HOST`: chat or a lobby settings change.
#[derive(Clone, PartialEq, Eq, Debug)]
pub struct ChatToHost<'a> {
    pub to_pids: Vec<u8>,
    pub from_pid: u8,
    pub payload: ChatToHostPayload<'a>,
}

impl Packet for ChatToHost<'_> {
    const ID: u8 = 0x28;
    const NAME: &'static str = "ChatToHost";
    const SIDE: PacketSide = PacketSide::Serverbound;
}

impl Encode for ChatToHost<'_> {
    fn encode(&self, mut w: impl Write) -> anyhow::Result<()> {
        w.write_u8(self.to_pids.len() as u8)?;
        w.write_all(&self.to_pids)?;
        w.write_u8(self.from_pid)?;

        match self.payload {
            ChatToHostPayload::Message(msg) => {
                w.write_u8(chat_flag::MESSAGE)?;
                msg.encode(w)
            }
            ChatToHostPayload::TeamChange(team) => {
                w.write_u8(chat_flag::TEAM_CHANGE)?;
                Ok(w.write_u8(team)?)
            }
            ChatToHostPayload::ColourChange(colour) => {
                w.write_u8(chat_flag::COLOUR_CHANGE)?;
                Ok(w.write_u8(colour)?)
            }
            ChatToHostPayload::RaceChange(race) => {
                w.write_u8(chat_flag::RACE_CHANGE)?;
                Ok(w.write_u8(race)?)
            }
            ChatToHostPayload::HandicapChange(handicap) => {
                w.write_u8(chat_flag::HANDICAP_CHANGE)?;
                Ok(w.write_u8(handicap)?)
            }
            ChatToHostPayload::MessageExtra(extra, msg) => {
                w.write_u8(chat_flag::MESSAGE_EXTRA)?;
                w.write_u32::<LE>(extra)?;
                msg.encode(w)
            }
        }
    }
}

impl<'a> Decode<'a> for ChatToHost<'a> {
    fn decode(r: &mut &'a [u8]) -> anyhow::Result<Self> {
        let total = r.read_u8()? as usize;
        let mut to_pids = Vec::with_capacity(total);

        for _ in 0..total {
            to_pids.push(r.read_u8()?);
        }

        let from_pid = r.read_u8()?;
        let flag = r.read_u8()?;

        let payload = match flag {
            chat_flag::MESSAGE => ChatToHostPayload::Message(<&str>::decode(r)?),
            chat_flag::TEAM_CHANGE => ChatToHostPayload::TeamChange(r.read_u8()?),
            chat_flag::COLOUR_CHANGE => ChatToHostPayload::ColourChange(r.read_u8()?),
            chat_flag::RACE_CHANGE => ChatToHostPayload::RaceChange(r.read_u8()?),
            chat_flag::HANDICAP_CHANGE => ChatToHostPayload::HandicapChange(r.read_u8()?),
            chat_flag::MESSAGE_EXTRA => {
                ChatToHostPayload::MessageExtra(r.read_u32::<LE>()?, <&str>::decode(r)?)
            }
            other => bail!("unknown chat-to-host flag {other:#04x}"),
        };

        Ok(Self {
            to_pids,
            from_pid,
            payload,
        })
    }
}

/// `W3GS_MAPSIZE`: how much of the map the client has.
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub struct MapSize {
    pub unknown: u32,
    pub size_flag: u8,
    pub map_size: u32,
}

impl Packet for MapSize {
    const ID: u8 = 0x42;
    const NAME: &'static str = "MapSize";
    const SIDE: PacketSide = PacketSide::Serverbound;
}

impl Encode for MapSize {
    fn encode(&self, mut w: impl Write) -> anyhow::Result<()> {
        w.write_u32::<LE>(self.unknown)?;
        w.write_u8(self.size_flag)?;
        Ok(w.write_u32::<LE>(self.map_size)?)
    }
}

impl Decode<'_> for MapSize {
    fn decode(r: &mut &[u8]) -> anyhow::Result<Self> {
        Ok(Self {
            unknown: r.read_u32::<LE>()?,
            size_flag: r.read_u8()?,
            map_size: r.read_u32::<LE>()?,
        })
    }
}

/// `W3GS_PONG_TO_HOST`: echo of a [`PingFromHost`] tick value.
///
/// [`PingFromHost`]: crate::packets::s2c::PingFromHost
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub struct PongToHost {
    pub pong: u32,
}

impl Packet for PongToHost {
    const ID: u8 = 0x46;
    const NAME: &'static str = "PongToHost";
    const SIDE: PacketSide = PacketSide::Serverbound;
}

impl Encode for PongToHost {
    fn encode(&self, mut w: impl Write) -> anyhow::Result<()> {
        Ok(w.write_u32::<LE>(self.pong)?)
    }
}

impl Decode<'_> for PongToHost {
    fn decode(r: &mut &[u8]) -> anyhow::Result<Self> {
        Ok(Self {
            pong: r.read_u32::<LE>()?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::encode::encode_packet;
    use crate::PacketDecoder;

    #[test]
    fn req_join_round_trip() {
        let pkt = ReqJoin {
            host_counter: 7,
            entry_key: 0,
            unknown: 0,
            listen_port: 6112,
            peer_key: 42,
            name: "Varlock",
            remainder: RawBytes(&[1, 2, 3, 4]),
        };

        let bytes = encode_packet(&pkt).unwrap();

        let mut dec = PacketDecoder::new();
        dec.queue_slice(&bytes);

        let frame = dec.try_next_packet().unwrap().unwrap();
        assert_eq!(frame.decode::<ReqJoin>().unwrap(), pkt);
    }

    #[test]
    fn chat_to_host_variants() {
        let lobby = ChatToHost {
            to_pids: vec![1, 3],
            from_pid: 2,
            payload: ChatToHostPayload::Message("!ping"),
        };

        let ingame = ChatToHost {
            to_pids: vec![1],
            from_pid: 2,
            payload: ChatToHostPayload::MessageExtra(0, "gg"),
        };

        let team = ChatToHost {
            to_pids: vec![1],
            from_pid: 4,
            payload: ChatToHostPayload::TeamChange(2),
        };

        for pkt in [lobby, ingame, team] {
            let bytes = encode_packet(&pkt).unwrap();

            let mut dec = PacketDecoder::new();
            dec.queue_slice(&bytes);

            let frame = dec.try_next_packet().unwrap().unwrap();
            assert_eq!(frame.decode::<ChatToHost>().unwrap(), pkt);
        }
    }

    #[test]
    fn chat_to_host_rejects_unknown_flag() {
        // count 0, from pid 2, bogus flag.
        let body = [0u8, 2, 0x7F];
        let mut dec = PacketDecoder::new();
        dec.queue_slice(&[0xF7, ChatToHost::ID, 7, 0]);
        dec.queue_slice(&body);

        let frame = dec.try_next_packet().unwrap().unwrap();
        assert!(frame.decode::<ChatToHost>().is_err());
    }
}
