use anyhow::ensure;
use bytes::{BufMut, BytesMut};
use tracing::warn;

use crate::{Encode, Packet, HEADER_CONSTANT, HEADER_SIZE, MAX_PACKET_SIZE};

/// Writes frames into an internal buffer which is drained with [`take`].
///
/// The frame length field is back-patched after the body is written, so
/// packet bodies never need to know their own size up front.
///
/// [`take`]: Self::take
#[derive(Default)]
pub struct PacketEncoder {
    buf: BytesMut,
}

impl PacketEncoder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn append_packet<P>(&mut self, pkt: &P) -> anyhow::Result<()>
    where
        P: Packet + Encode,
    {
        let start_len = self.buf.len();

        self.buf.put_u8(HEADER_CONSTANT);
        self.buf.put_u8(P::ID);
        self.buf.put_u16_le(0);

        pkt.encode((&mut self.buf).writer())?;

        let frame_len = self.buf.len() - start_len;

        ensure!(
            frame_len <= MAX_PACKET_SIZE,
            "packet '{}' exceeds maximum frame length",
            P::NAME
        );

        self.buf[start_len + 2..start_len + HEADER_SIZE]
            .copy_from_slice(&(frame_len as u16).to_le_bytes());

        Ok(())
    }

    /// Copies an already-framed packet verbatim.
    pub fn append_frame_bytes(&mut self, bytes: &[u8]) {
        self.buf.extend_from_slice(bytes);
    }

    pub fn take(&mut self) -> BytesMut {
        self.buf.split()
    }

    pub fn clear(&mut self) {
        self.buf.clear();
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }
}

/// Types that can have packets written to them.
pub trait WritePacket {
    /// Writes a packet to this object. Encoding errors are typically logged
    /// and discarded.
    fn write_packet<P>(&mut self, packet: &P)
    where
        P: Packet + Encode,
    {
        if let Err(e) = self.write_packet_fallible(packet) {
            warn!("failed to write packet '{}': {e:#}", P::NAME);
        }
    }

    /// Writes a packet to this object. The result of encoding the packet is
    /// returned.
    fn write_packet_fallible<P>(&mut self, packet: &P) -> anyhow::Result<()>
    where
        P: Packet + Encode;

    /// Copies raw frame data directly into this object.
    fn write_packet_bytes(&mut self, bytes: &[u8]);
}

impl<W: WritePacket> WritePacket for &mut W {
    fn write_packet_fallible<P>(&mut self, packet: &P) -> anyhow::Result<()>
    where
        P: Packet + Encode,
    {
        (*self).write_packet_fallible(packet)
    }

    fn write_packet_bytes(&mut self, bytes: &[u8]) {
        (*self).write_packet_bytes(bytes)
    }
}

impl WritePacket for PacketEncoder {
    fn write_packet_fallible<P>(&mut self, packet: &P) -> anyhow::Result<()>
    where
        P: Packet + Encode,
    {
        self.append_packet(packet)
    }

    fn write_packet_bytes(&mut self, bytes: &[u8]) {
        self.append_frame_bytes(bytes)
    }
}

/// Frames a single packet into a plain byte vector.
pub fn encode_packet<P>(pkt: &P) -> anyhow::Result<Vec<u8>>
where
    P: Packet + Encode,
{
    let mut enc = PacketEncoder::new();
    enc.append_packet(pkt)?;
    Ok(enc.take().to_vec())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::decode::PacketDecoder;
    use crate::packets::s2c::{PingFromHost, PlayerLeft};

    #[test]
    fn frame_length_is_patched() {
        let bytes = encode_packet(&PlayerLeft {
            pid: 4,
            reason: 0x0D,
        })
        .unwrap();

        assert_eq!(bytes[0], HEADER_CONSTANT);
        assert_eq!(bytes[1], PlayerLeft::ID);
        assert_eq!(u16::from_le_bytes([bytes[2], bytes[3]]) as usize, bytes.len());
    }

    #[test]
    fn encoder_output_decodes() {
        let mut enc = PacketEncoder::new();
        enc.append_packet(&PingFromHost { tick: 123456 }).unwrap();
        enc.append_packet(&PlayerLeft { pid: 2, reason: 1 }).unwrap();

        let mut dec = PacketDecoder::new();
        dec.queue_bytes(enc.take());

        let ping: PingFromHost = dec.try_next_packet().unwrap().unwrap().decode().unwrap();
        assert_eq!(ping.tick, 123456);

        let left: PlayerLeft = dec.try_next_packet().unwrap().unwrap().decode().unwrap();
        assert_eq!((left.pid, left.reason), (2, 1));
    }
}
