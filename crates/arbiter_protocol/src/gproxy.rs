//! The GProxy reliable-reconnect sidechannel.
//!
//! Frames share the game protocol's `{0xF7, opcode, u16 length}` header and
//! travel on two paths: the `Init`/`Ack` exchange rides the main game
//! connection to negotiate buffering, and `Reconnect`/`Ack`/`Reject` ride a
//! short-lived socket on the dedicated reconnect port.

use std::io::Write;

use byteorder::{ReadBytesExt, WriteBytesExt, LE};

use crate::{Decode, Encode, Packet, PacketSide};

pub const REJECT_NOT_FOUND: u32 = 1;
pub const REJECT_INVALID: u32 = 2;

/// Opcode 0x01, client to host: "I speak GProxy", with the client's protocol
/// version.
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub struct InitRequest {
    pub version: u32,
}

impl Packet for InitRequest {
    const ID: u8 = 0x01;
    const NAME: &'static str = "GproxyInitRequest";
    const SIDE: PacketSide = PacketSide::Serverbound;
}

impl Encode for InitRequest {
    fn encode(&self, mut w: impl Write) -> anyhow::Result<()> {
        Ok(w.write_u32::<LE>(self.version)?)
    }
}

impl Decode<'_> for InitRequest {
    fn decode(r: &mut &[u8]) -> anyhow::Result<Self> {
        Ok(Self {
            version: r.read_u32::<LE>()?,
        })
    }
}

/// Opcode 0x01, host to client: reconnect coordinates for this session.
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub struct InitResponse {
    pub reconnect_port: u16,
    pub pid: u8,
    pub reconnect_key: u32,
    /// Empty latency ticks the client may synthesize while disconnected.
    pub num_empty_actions: u32,
}

impl Packet for InitResponse {
    const ID: u8 = 0x01;
    const NAME: &'static str = "GproxyInitResponse";
    const SIDE: PacketSide = PacketSide::Clientbound;
}

impl Encode for InitResponse {
    fn encode(&self, mut w: impl Write) -> anyhow::Result<()> {
        w.write_u16::<LE>(self.reconnect_port)?;
        w.write_u8(self.pid)?;
        w.write_u32::<LE>(self.reconnect_key)?;
        Ok(w.write_u32::<LE>(self.num_empty_actions)?)
    }
}

impl Decode<'_> for InitResponse {
    fn decode(r: &mut &[u8]) -> anyhow::Result<Self> {
        Ok(Self {
            reconnect_port: r.read_u16::<LE>()?,
            pid: r.read_u8()?,
            reconnect_key: r.read_u32::<LE>()?,
            num_empty_actions: r.read_u32::<LE>()?,
        })
    }
}

/// Opcode 0x02: a dropped client asking to resume its session. The frame is
/// exactly 13 bytes on the wire.
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub struct Reconnect {
    pub pid: u8,
    pub reconnect_key: u32,
    /// Sequence number of the last host frame the client saw.
    pub last_packet: u32,
}

impl Packet for Reconnect {
    const ID: u8 = 0x02;
    const NAME: &'static str = "GproxyReconnect";
    const SIDE: PacketSide = PacketSide::Serverbound;
}

impl Encode for Reconnect {
    fn encode(&self, mut w: impl Write) -> anyhow::Result<()> {
        w.write_u8(self.pid)?;
        w.write_u32::<LE>(self.reconnect_key)?;
        Ok(w.write_u32::<LE>(self.last_packet)?)
    }
}

impl Decode<'_> for Reconnect {
    fn decode(r: &mut &[u8]) -> anyhow::Result<Self> {
        Ok(Self {
            pid: r.read_u8()?,
            reconnect_key: r.read_u32::<LE>()?,
            last_packet: r.read_u32::<LE>()?,
        })
    }
}

/// Opcode 0x03: acknowledges receipt of frames up to `last_packet`. Sent by
/// both sides: the client to trim the host's resume buffer, the host to
/// confirm a completed resume.
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub struct Ack {
    pub last_packet: u32,
}

impl Packet for Ack {
    const ID: u8 = 0x03;
    const NAME: &'static str = "GproxyAck";
    const SIDE: PacketSide = PacketSide::Serverbound;
}

impl Encode for Ack {
    fn encode(&self, mut w: impl Write) -> anyhow::Result<()> {
        Ok(w.write_u32::<LE>(self.last_packet)?)
    }
}

impl Decode<'_> for Ack {
    fn decode(r: &mut &[u8]) -> anyhow::Result<Self> {
        Ok(Self {
            last_packet: r.read_u32::<LE>()?,
        })
    }
}

/// Opcode 0x04: the host refusing a reconnect attempt.
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub struct Reject {
    pub reason: u32,
}

impl Packet for Reject {
    const ID: u8 = 0x04;
    const NAME: &'static str = "GproxyReject";
    const SIDE: PacketSide = PacketSide::Clientbound;
}

impl Encode for Reject {
    fn encode(&self, mut w: impl Write) -> anyhow::Result<()> {
        Ok(w.write_u32::<LE>(self.reason)?)
    }
}

impl Decode<'_> for Reject {
    fn decode(r: &mut &[u8]) -> anyhow::Result<Self> {
        Ok(Self {
            reason: r.read_u32::<LE>()?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::encode::encode_packet;
    use crate::{PacketDecoder, HEADER_SIZE};

    #[test]
    fn reconnect_frame_is_thirteen_bytes() {
        let bytes = encode_packet(&Reconnect {
            pid: 4,
            reconnect_key: 0xDEADBEEF,
            last_packet: 490,
        })
        .unwrap();

        assert_eq!(bytes.len(), 13);
        assert_eq!(bytes.len() - HEADER_SIZE, 9);
    }

    #[test]
    fn reconnect_round_trip() {
        let pkt = Reconnect {
            pid: 4,
            reconnect_key: 0xDEADBEEF,
            last_packet: 490,
        };

        let bytes = encode_packet(&pkt).unwrap();

        let mut dec = PacketDecoder::new();
        dec.queue_slice(&bytes);

        let frame = dec.try_next_packet().unwrap().unwrap();
        assert_eq!(frame.decode::<Reconnect>().unwrap(), pkt);
    }
}
