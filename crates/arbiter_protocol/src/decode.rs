use anyhow::{ensure, Context};
use bytes::{Buf, BytesMut};

use crate::{Decode, Packet, HEADER_CONSTANT, HEADER_SIZE};

/// Reassembles frames from a byte stream.
///
/// Bytes read off the socket are queued with [`queue_bytes`] and complete
/// frames are pulled out with [`try_next_packet`]; partial frames stay
/// buffered until more data arrives.
///
/// [`queue_bytes`]: Self::queue_bytes
/// [`try_next_packet`]: Self::try_next_packet
#[derive(Default)]
pub struct PacketDecoder {
    buf: BytesMut,
}

impl PacketDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn try_next_packet(&mut self) -> anyhow::Result<Option<PacketFrame>> {
        if self.buf.len() < HEADER_SIZE {
            return Ok(None);
        }

        ensure!(
            self.buf[0] == HEADER_CONSTANT,
            "invalid frame header byte {:#04x}",
            self.buf[0]
        );

        let id = self.buf[1];
        let frame_len = u16::from_le_bytes([self.buf[2], self.buf[3]]) as usize;

        ensure!(
            frame_len >= HEADER_SIZE,
            "frame length of {frame_len} is smaller than the frame header"
        );

        if self.buf.len() < frame_len {
            // Not enough data arrived yet.
            return Ok(None);
        }

        self.buf.advance(HEADER_SIZE);
        let body = self.buf.split_to(frame_len - HEADER_SIZE);

        Ok(Some(PacketFrame { id, body }))
    }

    pub fn queue_bytes(&mut self, bytes: BytesMut) {
        self.buf.unsplit(bytes);
    }

    pub fn queue_slice(&mut self, bytes: &[u8]) {
        self.buf.extend_from_slice(bytes);
    }

    pub fn take_capacity(&mut self) -> BytesMut {
        self.buf.split_off(self.buf.len())
    }

    pub fn reserve(&mut self, additional: usize) {
        self.buf.reserve(additional);
    }
}

/// A frame as it came off the stream: the ID byte and the undecoded body.
#[derive(Clone, Debug)]
pub struct PacketFrame {
    /// The ID of the decoded packet.
    pub id: u8,
    /// The contents of the packet after the frame header.
    pub body: BytesMut,
}

impl PacketFrame {
    /// Attempts to decode this packet as type `P`. An error is returned if
    /// the packet ID does not match, the body of the packet failed to decode,
    /// or some input was missed.
    pub fn decode<'a, P>(&'a self) -> anyhow::Result<P>
    where
        P: Packet + Decode<'a>,
    {
        ensure!(
            P::ID == self.id,
            "packet ID mismatch while decoding '{}': expected {:#04x}, got {:#04x}",
            P::NAME,
            P::ID,
            self.id
        );

        let mut r = &self.body[..];

        let pkt = P::decode(&mut r).with_context(|| format!("decoding '{}'", P::NAME))?;

        ensure!(
            r.is_empty(),
            "missed {} bytes while decoding '{}'",
            r.len(),
            P::NAME
        );

        Ok(pkt)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::packets::c2s::LeaveGame;

    #[test]
    fn partial_frames_wait_for_more_data() {
        let mut dec = PacketDecoder::new();

        // Header constant, LEAVEGAME, length 8, then half of the reason.
        dec.queue_slice(&[0xF7, 0x21, 8, 0, 0x07, 0x00]);
        assert!(dec.try_next_packet().unwrap().is_none());

        dec.queue_slice(&[0x00, 0x00]);
        let frame = dec.try_next_packet().unwrap().unwrap();
        assert_eq!(frame.id, 0x21);
        assert_eq!(frame.decode::<LeaveGame>().unwrap().reason, 0x07);
    }

    #[test]
    fn rejects_bad_header_byte() {
        let mut dec = PacketDecoder::new();
        dec.queue_slice(&[0xFE, 0x01, 4, 0]);
        assert!(dec.try_next_packet().is_err());
    }

    #[test]
    fn rejects_undersized_length() {
        let mut dec = PacketDecoder::new();
        dec.queue_slice(&[0xF7, 0x01, 2, 0]);
        assert!(dec.try_next_packet().is_err());
    }

    #[test]
    fn splits_coalesced_frames() {
        let mut dec = PacketDecoder::new();
        dec.queue_slice(&[0xF7, 0x23, 4, 0, 0xF7, 0x23, 4, 0]);

        assert_eq!(dec.try_next_packet().unwrap().unwrap().id, 0x23);
        assert_eq!(dec.try_next_packet().unwrap().unwrap().id, 0x23);
        assert!(dec.try_next_packet().unwrap().is_none());
    }
}
