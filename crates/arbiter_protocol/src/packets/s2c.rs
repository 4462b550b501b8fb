//! Packets sent by the host to game clients, including the UDP discovery
//! datagrams broadcast to the local network.

use std::io::Write;

use anyhow::{bail, ensure};
use byteorder::{ReadBytesExt, WriteBytesExt, LE};

use crate::packets::{chat_flag, MAP_PART_SIZE};
use crate::slot::SlotInfo;
use crate::{AddrBlob, Decode, Encode, Packet, PacketSide, RawBytes};

/// `W3GS_PING_FROM_HOST`: echo request carrying the host's tick clock.
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub struct PingFromHost {
    pub tick: u32,
}

impl Packet for PingFromHost {
    const ID: u8 = 0x01;
    const NAME: &'static str = "PingFromHost";
    const SIDE: PacketSide = PacketSide::Clientbound;
}

impl Encode for PingFromHost {
    fn encode(&self, mut w: impl Write) -> anyhow::Result<()> {
        Ok(w.write_u32::<LE>(self.tick)?)
    }
}

impl Decode<'_> for PingFromHost {
    fn decode(r: &mut &[u8]) -> anyhow::Result<Self> {
        Ok(Self {
            tick: r.read_u32::<LE>()?,
        })
    }
}

/// `W3GS_SLOTINFOJOIN`: the join acknowledgment, carrying the slot table,
/// the assigned PID and the client's external address as the host sees it.
#[derive(Clone, PartialEq, Eq, Debug)]
pub struct SlotInfoJoin {
    pub slot_info: SlotInfo,
    pub pid: u8,
    pub external: AddrBlob,
}

impl Packet for SlotInfoJoin {
    const ID: u8 = 0x04;
    const NAME: &'static str = "SlotInfoJoin";
    const SIDE: PacketSide = PacketSide::Clientbound;
}

impl Encode for SlotInfoJoin {
    fn encode(&self, mut w: impl Write) -> anyhow::Result<()> {
        self.slot_info.encode(&mut w)?;
        w.write_u8(self.pid)?;
        self.external.encode(w)
    }
}

impl Decode<'_> for SlotInfoJoin {
    fn decode(r: &mut &[u8]) -> anyhow::Result<Self> {
        Ok(Self {
            slot_info: SlotInfo::decode(r)?,
            pid: r.read_u8()?,
            external: AddrBlob::decode(r)?,
        })
    }
}

/// `W3GS_REJECTJOIN`.
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub struct RejectJoin {
    pub reason: u32,
}

impl Packet for RejectJoin {
    const ID: u8 = 0x05;
    const NAME: &'static str = "RejectJoin";
    const SIDE: PacketSide = PacketSide::Clientbound;
}

impl Encode for RejectJoin {
    fn encode(&self, mut w: impl Write) -> anyhow::Result<()> {
        Ok(w.write_u32::<LE>(self.reason)?)
    }
}

impl Decode<'_> for RejectJoin {
    fn decode(r: &mut &[u8]) -> anyhow::Result<Self> {
        Ok(Self {
            reason: r.read_u32::<LE>()?,
        })
    }
}

/// `W3GS_PLAYERINFO`: announces one occupant to another.
#[derive(Clone, PartialEq, Eq, Debug)]
pub struct PlayerInfo<'a> {
    pub join_counter: u32,
    pub pid: u8,
    pub name: &'a str,
    pub external: AddrBlob,
    pub internal: AddrBlob,
}

impl Packet for PlayerInfo<'_> {
    const ID: u8 = 0x06;
    const NAME: &'static str = "PlayerInfo";
    const SIDE: PacketSide = PacketSide::Clientbound;
}

impl Encode for PlayerInfo<'_> {
    fn encode(&self, mut w: impl Write) -> anyhow::Result<()> {
        w.write_u32::<LE>(self.join_counter)?;
        w.write_u8(self.pid)?;
        self.name.encode(&mut w)?;
        w.write_u16::<LE>(1)?;
        self.external.encode(&mut w)?;
        self.internal.encode(w)
    }
}

impl<'a> Decode<'a> for PlayerInfo<'a> {
    fn decode(r: &mut &'a [u8]) -> anyhow::Result<Self> {
        let join_counter = r.read_u32::<LE>()?;
        let pid = r.read_u8()?;
        let name = <&str>::decode(r)?;
        let _unknown = r.read_u16::<LE>()?;

        Ok(Self {
            join_counter,
            pid,
            name,
            external: AddrBlob::decode(r)?,
            internal: AddrBlob::decode(r)?,
        })
    }
}

/// `W3GS_PLAYERLEFT`.
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub struct PlayerLeft {
    pub pid: u8,
    pub reason: u32,
}

impl Packet for PlayerLeft {
    const ID: u8 = 0x07;
    const NAME: &'static str = "PlayerLeft";
    const SIDE: PacketSide = PacketSide::Clientbound;
}

impl Encode for PlayerLeft {
    fn encode(&self, mut w: impl Write) -> anyhow::Result<()> {
        w.write_u8(self.pid)?;
        Ok(w.write_u32::<LE>(self.reason)?)
    }
}

impl Decode<'_> for PlayerLeft {
    fn decode(r: &mut &[u8]) -> anyhow::Result<Self> {
        Ok(Self {
            pid: r.read_u8()?,
            reason: r.read_u32::<LE>()?,
        })
    }
}

/// `W3GS_PLAYERLOADED`: relays another player's finished load.
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub struct PlayerLoaded {
    pub pid: u8,
}

impl Packet for PlayerLoaded {
    const ID: u8 = 0x08;
    const NAME: &'static str = "PlayerLoaded";
    const SIDE: PacketSide = PacketSide::Clientbound;
}

impl Encode for PlayerLoaded {
    fn encode(&self, mut w: impl Write) -> anyhow::Result<()> {
        Ok(w.write_u8(self.pid)?)
    }
}

impl Decode<'_> for PlayerLoaded {
    fn decode(r: &mut &[u8]) -> anyhow::Result<Self> {
        Ok(Self { pid: r.read_u8()? })
    }
}

/// `W3GS_SLOTINFO`: a fresh copy of the slot table.
#[derive(Clone, PartialEq, Eq, Debug)]
pub struct SlotInfoPacket {
    pub slot_info: SlotInfo,
}

impl Packet for SlotInfoPacket {
    const ID: u8 = 0x09;
    const NAME: &'static str = "SlotInfo";
    const SIDE: PacketSide = PacketSide::Clientbound;
}

impl Encode for SlotInfoPacket {
    fn encode(&self, w: impl Write) -> anyhow::Result<()> {
        self.slot_info.encode(w)
    }
}

impl Decode<'_> for SlotInfoPacket {
    fn decode(r: &mut &[u8]) -> anyhow::Result<Self> {
        Ok(Self {
            slot_info: SlotInfo::decode(r)?,
        })
    }
}

/// `W3GS_COUNTDOWN_START`.
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub struct CountdownStart;

impl Packet for CountdownStart {
    const ID: u8 = 0x0A;
    const NAME: &'static str = "CountdownStart";
    const SIDE: PacketSide = PacketSide::Clientbound;
}

impl Encode for CountdownStart {
    fn encode(&self, _w: impl Write) -> anyhow::Result<()> {
        Ok(())
    }
}

impl Decode<'_> for CountdownStart {
    fn decode(_r: &mut &[u8]) -> anyhow::Result<Self> {
        Ok(Self)
    }
}

/// `W3GS_COUNTDOWN_END`: the signal to load the map.
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub struct CountdownEnd;

impl Packet for CountdownEnd {
    const ID: u8 = 0x0B;
    const NAME: &'static str = "CountdownEnd";
    const SIDE: PacketSide = PacketSide::Clientbound;
}

impl Encode for CountdownEnd {
    fn encode(&self, _w: impl Write) -> anyhow::Result<()> {
        Ok(())
    }
}

impl Decode<'_> for CountdownEnd {
    fn decode(_r: &mut &[u8]) -> anyhow::Result<Self> {
        Ok(Self)
    }
}

/// One player's contribution to a latency tick.
#[derive(Clone, PartialEq, Eq, Debug)]
pub struct ActionBlock {
    pub pid: u8,
    pub action: Vec<u8>,
}

impl Encode for ActionBlock {
    fn encode(&self, mut w: impl Write) -> anyhow::Result<()> {
        w.write_u8(self.pid)?;
        w.write_u16::<LE>(self.action.len() as u16)?;
        Ok(w.write_all(&self.action)?)
    }
}

impl Decode<'_> for ActionBlock {
    fn decode(r: &mut &[u8]) -> anyhow::Result<Self> {
        let pid = r.read_u8()?;
        let len = r.read_u16::<LE>()? as usize;

        ensure!(r.len() >= len, "action block is truncated");
        let (action, rest) = r.split_at(len);
        *r = rest;

        Ok(Self {
            pid,
            action: action.to_vec(),
        })
    }
}

/// `W3GS_INCOMING_ACTION`: one latency tick, carrying the tick interval and
/// the batched actions, guarded by a truncated CRC32 when any are present.
#[derive(Clone, PartialEq, Eq, Debug)]
pub struct IncomingAction {
    pub send_interval: u16,
    pub actions: Vec<ActionBlock>,
}

impl IncomingAction {
    fn encode_body(&self, mut w: impl Write) -> anyhow::Result<()> {
        w.write_u16::<LE>(self.send_interval)?;

        if !self.actions.is_empty() {
            let mut sub = Vec::new();

            for block in &self.actions {
                block.encode(&mut sub)?;
            }

            w.write_u16::<LE>(crc32fast::hash(&sub) as u16)?;
            w.write_all(&sub)?;
        }

        Ok(())
    }

    fn decode_body(r: &mut &[u8]) -> anyhow::Result<Self> {
        let send_interval = r.read_u16::<LE>()?;
        let mut actions = Vec::new();

        if !r.is_empty() {
            let crc = r.read_u16::<LE>()?;
            let sub = *r;

            ensure!(
                crc == crc32fast::hash(sub) as u16,
                "action batch checksum mismatch"
            );

            while !r.is_empty() {
                actions.push(ActionBlock::decode(r)?);
            }
        }

        Ok(Self {
            send_interval,
            actions,
        })
    }
}

impl Packet for IncomingAction {
    const ID: u8 = 0x0C;
    const NAME: &'static str = "IncomingAction";
    const SIDE: PacketSide = PacketSide::Clientbound;
}

impl Encode for IncomingAction {
    fn encode(&self, w: impl Write) -> anyhow::Result<()> {
        self.encode_body(w)
    }
}

impl Decode<'_> for IncomingAction {
    fn decode(r: &mut &[u8]) -> anyhow::Result<Self> {
        Self::decode_body(r)
    }
}

/// `W3GS_INCOMING_ACTION2`: continuation frame for oversized action
/// batches. Carries no tick interval; the clock advances only with the
/// final [`IncomingAction`].
#[derive(Clone, PartialEq, Eq, Debug)]
pub struct IncomingAction2 {
    pub actions: Vec<ActionBlock>,
}

impl Packet for IncomingAction2 {
    const ID: u8 = 0x48;
    const NAME: &'static str = "IncomingAction2";
    const SIDE: PacketSide = PacketSide::Clientbound;
}

impl Encode for IncomingAction2 {
    fn encode(&self, mut w: impl Write) -> anyhow::Result<()> {
        let mut sub = Vec::new();

        for block in &self.actions {
            block.encode(&mut sub)?;
        }

        w.write_u16::<LE>(crc32fast::hash(&sub) as u16)?;
        Ok(w.write_all(&sub)?)
    }
}

impl Decode<'_> for IncomingAction2 {
    fn decode(r: &mut &[u8]) -> anyhow::Result<Self> {
        let crc = r.read_u16::<LE>()?;
        let sub = *r;

        ensure!(
            crc == crc32fast::hash(sub) as u16,
            "action batch checksum mismatch"
        );

        let mut actions = Vec::new();

        while !r.is_empty() {
            actions.push(ActionBlock::decode(r)?);
        }

        Ok(Self { actions })
    }
}

/// The payload variants of `W3GS_CHAT_FROM_HOST`.
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub enum ChatFromHostPayload<'a> {
    Message(&'a str),
    MessageExtra(u32, &'a str),
}

/// `W3GS_CHAT_FROM_HOST`: chat relayed to clients.
#[derive(Clone, PartialEq, Eq, Debug)]
pub struct ChatFromHost<'a> {
    pub from_pid: u8,
    pub to_pids: Vec<u8>,
    pub payload: ChatFromHostPayload<'a>,
}

impl Packet for ChatFromHost<'_> {
    const ID: u8 = 0x0F;
    const NAME: &'static str = "ChatFromHost";
    const SIDE: PacketSide = PacketSide::Clientbound;
}

impl Encode for ChatFromHost<'_> {
    fn encode(&self, mut w: impl Write) -> anyhow::Result<()> {
        w.write_u8(self.to_pids.len() as u8)?;
        w.write_all(&self.to_pids)?;
        w.write_u8(self.from_pid)?;

        match self.payload {
            ChatFromHostPayload::Message(msg) => {
                w.write_u8(chat_flag::MESSAGE)?;
                msg.encode(w)
            }
            ChatFromHostPayload::MessageExtra(extra, msg) => {
                w.write_u8(chat_flag::MESSAGE_EXTRA)?;
                w.write_u32::<LE>(extra)?;
                msg.encode(w)
            }
        }
    }
}

impl<'a> Decode<'a> for ChatFromHost<'a> {
    fn decode(r: &mut &'a [u8]) -> anyhow::Result<Self> {
        let total = r.read_u8()? as usize;
        let mut to_pids = Vec::with_capacity(total);

        for _ in 0..total {
            to_pids.push(r.read_u8()?);
        }

        let from_pid = r.read_u8()?;
        let flag = r.read_u8()?;

        let payload = match flag {
            chat_flag::MESSAGE => ChatFromHostPayload::Message(<&str>::decode(r)?),
            chat_flag::MESSAGE_EXTRA => {
                ChatFromHostPayload::MessageExtra(r.read_u32::<LE>()?, <&str>::decode(r)?)
            }
            other => bail!("unknown chat-from-host flag {other:#04x}"),
        };

        Ok(Self {
            from_pid,
            to_pids,
            payload,
        })
    }
}

/// One lagging player as listed in [`StartLag`].
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub struct LagPlayer {
    pub pid: u8,
    pub lag_ms: u32,
}

/// `W3GS_START_LAG`: puts the listed players on the lag screen.
#[derive(Clone, PartialEq, Eq, Debug)]
pub struct StartLag {
    pub laggers: Vec<LagPlayer>,
}

impl Packet for StartLag {
    const ID: u8 = 0x10;
    const NAME: &'static str = "StartLag";
    const SIDE: PacketSide = PacketSide::Clientbound;
}

impl Encode for StartLag {
    fn encode(&self, mut w: impl Write) -> anyhow::Result<()> {
        w.write_u8(self.laggers.len() as u8)?;

        for lagger in &self.laggers {
            w.write_u8(lagger.pid)?;
            w.write_u32::<LE>(lagger.lag_ms)?;
        }

        Ok(())
    }
}

impl Decode<'_> for StartLag {
    fn decode(r: &mut &[u8]) -> anyhow::Result<Self> {
        let count = r.read_u8()? as usize;
        let mut laggers = Vec::with_capacity(count);

        for _ in 0..count {
            laggers.push(LagPlayer {
                pid: r.read_u8()?,
                lag_ms: r.read_u32::<LE>()?,
            });
        }

        Ok(Self { laggers })
    }
}

/// `W3GS_STOP_LAG`: removes one player from the lag screen.
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub struct StopLag {
    pub pid: u8,
    pub lag_ms: u32,
}

impl Packet for StopLag {
    const ID: u8 = 0x11;
    const NAME: &'static str = "StopLag";
    const SIDE: PacketSide = PacketSide::Clientbound;
}

impl Encode for StopLag {
    fn encode(&self, mut w: impl Write) -> anyhow::Result<()> {
        w.write_u8(self.pid)?;
        Ok(w.write_u32::<LE>(self.lag_ms)?)
    }
}

impl Decode<'_> for StopLag {
    fn decode(r: &mut &[u8]) -> anyhow::Result<Self> {
        Ok(Self {
            pid: r.read_u8()?,
            lag_ms: r.read_u32::<LE>()?,
        })
    }
}

/// Product identifiers carried by the discovery datagrams.
pub const PRODUCT_TFT: [u8; 4] = *b"PX3W";
pub const PRODUCT_ROC: [u8; 4] = *b"3RAW";

/// `W3GS_GAMEINFO`: the UDP lobby advertisement. The stat string field is
/// already encoded with [`stat_string::encode`].
///
/// [`stat_string::encode`]: crate::stat_string::encode
#[derive(Clone, PartialEq, Eq, Debug)]
pub struct GameInfo<'a> {
    pub product: [u8; 4],
    pub version: u32,
    pub host_counter: u32,
    pub entry_key: u32,
    pub game_name: &'a str,
    pub stat_string: &'a [u8],
    pub slots_total: u32,
    pub game_type: u32,
    pub unknown: u32,
    pub slots_open: u32,
    pub uptime: u32,
    pub port: u16,
}

impl Packet for GameInfo<'_> {
    const ID: u8 = 0x30;
    const NAME: &'static str = "GameInfo";
    const SIDE: PacketSide = PacketSide::Clientbound;
}

impl Encode for GameInfo<'_> {
    fn encode(&self, mut w: impl Write) -> anyhow::Result<()> {
        w.write_all(&self.product)?;
        w.write_u32::<LE>(self.version)?;
        w.write_u32::<LE>(self.host_counter)?;
        w.write_u32::<LE>(self.entry_key)?;
        self.game_name.encode(&mut w)?;
        w.write_u8(0)?;
        w.write_all(self.stat_string)?;
        w.write_u8(0)?;
        w.write_u32::<LE>(self.slots_total)?;
        w.write_u32::<LE>(self.game_type)?;
        w.write_u32::<LE>(self.unknown)?;
        w.write_u32::<LE>(self.slots_open)?;
        w.write_u32::<LE>(self.uptime)?;
        Ok(w.write_u16::<LE>(self.port)?)
    }
}

impl<'a> Decode<'a> for GameInfo<'a> {
    fn decode(r: &mut &'a [u8]) -> anyhow::Result<Self> {
        let product = <[u8; 4]>::decode(r)?;
        let version = r.read_u32::<LE>()?;
        let host_counter = r.read_u32::<LE>()?;
        let entry_key = r.read_u32::<LE>()?;
        let game_name = <&str>::decode(r)?;
        let _empty = r.read_u8()?;

        let Some(nul) = r.iter().position(|&b| b == 0) else {
            bail!("stat string is missing its NUL terminator");
        };
        let stat_string = &r[..nul];
        *r = &r[nul + 1..];

        Ok(Self {
            product,
            version,
            host_counter,
            entry_key,
            game_name,
            stat_string,
            slots_total: r.read_u32::<LE>()?,
            game_type: r.read_u32::<LE>()?,
            unknown: r.read_u32::<LE>()?,
            slots_open: r.read_u32::<LE>()?,
            uptime: r.read_u32::<LE>()?,
            port: r.read_u16::<LE>()?,
        })
    }
}

/// `W3GS_CREATEGAME`: UDP announcement that a lobby now exists.
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub struct CreateGame {
    pub product: [u8; 4],
    pub version: u32,
    pub host_counter: u32,
}

impl Packet for CreateGame {
    const ID: u8 = 0x31;
    const NAME: &'static str = "CreateGame";
    const SIDE: PacketSide = PacketSide::Clientbound;
}

impl Encode for CreateGame {
    fn encode(&self, mut w: impl Write) -> anyhow::Result<()> {
        w.write_all(&self.product)?;
        w.write_u32::<LE>(self.version)?;
        Ok(w.write_u32::<LE>(self.host_counter)?)
    }
}

impl Decode<'_> for CreateGame {
    fn decode(r: &mut &[u8]) -> anyhow::Result<Self> {
        Ok(Self {
            product: <[u8; 4]>::decode(r)?,
            version: r.read_u32::<LE>()?,
            host_counter: r.read_u32::<LE>()?,
        })
    }
}

/// `W3GS_REFRESHGAME`: UDP lobby occupancy refresh.
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub struct RefreshGame {
    pub host_counter: u32,
    pub players: u32,
    pub player_slots: u32,
}

impl Packet for RefreshGame {
    const ID: u8 = 0x32;
    const NAME: &'static str = "RefreshGame";
    const SIDE: PacketSide = PacketSide::Clientbound;
}

impl Encode for RefreshGame {
    fn encode(&self, mut w: impl Write) -> anyhow::Result<()> {
        w.write_u32::<LE>(self.host_counter)?;
        w.write_u32::<LE>(self.players)?;
        Ok(w.write_u32::<LE>(self.player_slots)?)
    }
}

impl Decode<'_> for RefreshGame {
    fn decode(r: &mut &[u8]) -> anyhow::Result<Self> {
        Ok(Self {
            host_counter: r.read_u32::<LE>()?,
            players: r.read_u32::<LE>()?,
            player_slots: r.read_u32::<LE>()?,
        })
    }
}

/// `W3GS_DECREATEGAME`: UDP announcement that the lobby is gone.
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub struct DecreateGame {
    pub host_counter: u32,
}

impl Packet for DecreateGame {
    const ID: u8 = 0x33;
    const NAME: &'static str = "DecreateGame";
    const SIDE: PacketSide = PacketSide::Clientbound;
}

impl Encode for DecreateGame {
    fn encode(&self, mut w: impl Write) -> anyhow::Result<()> {
        Ok(w.write_u32::<LE>(self.host_counter)?)
    }
}

impl Decode<'_> for DecreateGame {
    fn decode(r: &mut &[u8]) -> anyhow::Result<Self> {
        Ok(Self {
            host_counter: r.read_u32::<LE>()?,
        })
    }
}

/// `W3GS_MAPCHECK`: asks a joiner whether they have the map.
#[derive(Clone, PartialEq, Eq, Debug)]
pub struct MapCheck<'a> {
    pub unknown: u32,
    pub map_path: &'a str,
    pub map_size: u32,
    pub map_info: u32,
    pub map_crc: u32,
    pub map_sha1: [u8; 20],
}

impl Packet for MapCheck<'_> {
    const ID: u8 = 0x3D;
    const NAME: &'static str = "MapCheck";
    const SIDE: PacketSide = PacketSide::Clientbound;
}

impl Encode for MapCheck<'_> {
    fn encode(&self, mut w: impl Write) -> anyhow::Result<()> {
        w.write_u32::<LE>(self.unknown)?;
        self.map_path.encode(&mut w)?;
        w.write_u32::<LE>(self.map_size)?;
        w.write_u32::<LE>(self.map_info)?;
        w.write_u32::<LE>(self.map_crc)?;
        Ok(w.write_all(&self.map_sha1)?)
    }
}

impl<'a> Decode<'a> for MapCheck<'a> {
    fn decode(r: &mut &'a [u8]) -> anyhow::Result<Self> {
        Ok(Self {
            unknown: r.read_u32::<LE>()?,
            map_path: <&str>::decode(r)?,
            map_size: r.read_u32::<LE>()?,
            map_info: r.read_u32::<LE>()?,
            map_crc: r.read_u32::<LE>()?,
            map_sha1: <[u8; 20]>::decode(r)?,
        })
    }
}

/// `W3GS_STARTDOWNLOAD`: permission to start pulling the map from the host.
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub struct StartDownload {
    pub unknown: u32,
    pub from_pid: u8,
}

impl Packet for StartDownload {
    const ID: u8 = 0x3F;
    const NAME: &'static str = "StartDownload";
    const SIDE: PacketSide = PacketSide::Clientbound;
}

impl Encode for StartDownload {
    fn encode(&self, mut w: impl Write) -> anyhow::Result<()> {
        w.write_u32::<LE>(self.unknown)?;
        Ok(w.write_u8(self.from_pid)?)
    }
}

impl Decode<'_> for StartDownload {
    fn decode(r: &mut &[u8]) -> anyhow::Result<Self> {
        Ok(Self {
            unknown: r.read_u32::<LE>()?,
            from_pid: r.read_u8()?,
        })
    }
}

/// `W3GS_MAPPART`: one chunk of map data.
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub struct MapPart<'a> {
    pub to_pid: u8,
    pub from_pid: u8,
    pub unknown: u32,
    pub chunk_position: u32,
    pub data: RawBytes<'a>,
}

impl Packet for MapPart<'_> {
    const ID: u8 = 0x43;
    const NAME: &'static str = "MapPart";
    const SIDE: PacketSide = PacketSide::Clientbound;
}

impl Encode for MapPart<'_> {
    fn encode(&self, mut w: impl Write) -> anyhow::Result<()> {
        ensure!(
            self.data.0.len() <= MAP_PART_SIZE,
            "map chunk exceeds {MAP_PART_SIZE} bytes"
        );

        w.write_u8(self.to_pid)?;
        w.write_u8(self.from_pid)?;
        w.write_u32::<LE>(self.unknown)?;
        w.write_u32::<LE>(self.chunk_position)?;
        w.write_u32::<LE>(crc32fast::hash(self.data.0))?;
        self.data.encode(w)
    }
}

impl<'a> Decode<'a> for MapPart<'a> {
    fn decode(r: &mut &'a [u8]) -> anyhow::Result<Self> {
        let to_pid = r.read_u8()?;
        let from_pid = r.read_u8()?;
        let unknown = r.read_u32::<LE>()?;
        let chunk_position = r.read_u32::<LE>()?;
        let crc = r.read_u32::<LE>()?;
        let data = RawBytes::decode(r)?;

        ensure!(crc == crc32fast::hash(data.0), "map chunk checksum mismatch");

        Ok(Self {
            to_pid,
            from_pid,
            unknown,
            chunk_position,
            data,
        })
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::encode::encode_packet;
    use crate::slot::SlotData;
    use crate::PacketDecoder;

    fn round_trip<'a, P>(pkt: &P, buf: &'a mut Vec<u8>) -> P
    where
        P: Packet + Encode + Decode<'a> + Clone,
    {
        *buf = encode_packet(pkt).unwrap();

        let mut r = &buf[crate::HEADER_SIZE..];
        let out = P::decode(&mut r).unwrap();
        assert!(r.is_empty(), "{} leftover bytes", r.len());
        out
    }

    #[test]
    fn incoming_action_round_trip() {
        let pkt = IncomingAction {
            send_interval: 100,
            actions: vec![
                ActionBlock {
                    pid: 2,
                    action: vec![0x12, 0x34],
                },
                ActionBlock {
                    pid: 3,
                    action: vec![0x01],
                },
            ],
        };

        let mut buf = vec![];
        assert_eq!(round_trip(&pkt, &mut buf), pkt);
    }

    #[test]
    fn empty_tick_has_no_checksum() {
        let pkt = IncomingAction {
            send_interval: 100,
            actions: vec![],
        };

        let bytes = encode_packet(&pkt).unwrap();
        // Header + the two-byte interval only.
        assert_eq!(bytes.len(), 6);
    }

    #[test]
    fn corrupted_action_batch_is_rejected() {
        let pkt = IncomingAction {
            send_interval: 100,
            actions: vec![ActionBlock {
                pid: 2,
                action: vec![0x12, 0x34],
            }],
        };

        let mut bytes = encode_packet(&pkt).unwrap();
        *bytes.last_mut().unwrap() ^= 0xFF;

        let mut dec = PacketDecoder::new();
        dec.queue_slice(&bytes);
        let frame = dec.try_next_packet().unwrap().unwrap();
        assert!(frame.decode::<IncomingAction>().is_err());
    }

    #[test]
    fn slot_info_join_round_trip() {
        let pkt = SlotInfoJoin {
            slot_info: SlotInfo {
                slots: vec![SlotData::open(0, 0, crate::slot::SLOT_RACE_RANDOM)],
                random_seed: 99,
                layout_style: 0,
                player_slots: 1,
            },
            pid: 2,
            external: AddrBlob {
                port: 6112,
                ip: [10, 0, 0, 2],
            },
        };

        let mut buf = vec![];
        assert_eq!(round_trip(&pkt, &mut buf), pkt);
    }

    #[test]
    fn game_info_round_trip() {
        let stat = crate::stat_string::encode(&[1, 2, 3, 250, 251, 252, 253, 254]);
        let pkt = GameInfo {
            product: PRODUCT_TFT,
            version: 24,
            host_counter: 5,
            entry_key: 0,
            game_name: "DotA #5",
            stat_string: &stat,
            slots_total: 12,
            game_type: 1,
            unknown: 1,
            slots_open: 12,
            uptime: 30,
            port: 6112,
        };

        let mut buf = vec![];
        assert_eq!(round_trip(&pkt, &mut buf), pkt);
    }

    #[test]
    fn map_part_enforces_chunk_size() {
        let data = vec![0u8; MAP_PART_SIZE + 1];
        let pkt = MapPart {
            to_pid: 2,
            from_pid: 1,
            unknown: 1,
            chunk_position: 0,
            data: RawBytes(&data),
        };

        assert!(encode_packet(&pkt).is_err());
    }
}
