#![doc = include_str!("../README.md")]
#![deny(
    rustdoc::broken_intra_doc_links,
    rustdoc::private_intra_doc_links,
    rustdoc::missing_crate_level_docs,
    rustdoc::invalid_codeblock_attributes,
    rustdoc::invalid_rust_codeblocks,
    rustdoc::bare_urls,
    rustdoc::invalid_html_tags
)]
#![warn(
    trivial_casts,
    trivial_numeric_casts,
    unused_lifetimes,
    unused_import_braces,
    unreachable_pub,
    clippy::dbg_macro
)]

pub mod decode;
pub mod encode;
pub mod gproxy;
pub mod packets;
pub mod slot;
pub mod stat_string;

use std::io::Write;

use anyhow::{bail, ensure};
use byteorder::{ReadBytesExt, WriteBytesExt, LE};
pub use decode::{PacketDecoder, PacketFrame};
pub use encode::{PacketEncoder, WritePacket};
pub use slot::{SlotData, SlotInfo};

/// The leading byte of every frame, shared by the game protocol and the
/// GProxy reconnect sidechannel.
pub const HEADER_CONSTANT: u8 = 0xF7;

/// Frame header size: constant, packet ID, little-endian length.
pub const HEADER_SIZE: usize = 4;

/// The frame length field is a `u16` and covers the header itself.
pub const MAX_PACKET_SIZE: usize = u16::MAX as usize;

/// The `Encode` trait allows objects to be written to the wire. It is the
/// inverse of [`Decode`].
///
/// Implementations write the packet *body* only; the frame header is the
/// encoder's business.
pub trait Encode {
    /// Writes this object to the provided writer.
    ///
    /// If this type also implements [`Decode`] then successful calls to this
    /// function returning `Ok(())` must always successfully decode using the
    /// data that was written to the writer. The exact number of bytes that
    /// were originally written must be consumed during the decoding.
    fn encode(&self, w: impl Write) -> anyhow::Result<()>;
}

/// The `Decode` trait allows objects to be read from the wire. It is the
/// inverse of [`Encode`].
///
/// `Decode` is parameterized by a lifetime. This allows the decoded value to
/// borrow data from the byte slice it was read from, which matters for the
/// NUL-terminated strings and raw action payloads this protocol is full of.
pub trait Decode<'a>: Sized {
    /// Reads this object from the provided byte slice.
    ///
    /// Implementations of `Decode` are expected to shrink the slice from the
    /// front as bytes are read.
    fn decode(r: &mut &'a [u8]) -> anyhow::Result<Self>;
}

/// Types considered to be wire packets.
///
/// In serialized form, a packet sits inside a frame carrying its leading ID
/// byte. The implementations of [`Encode`] and [`Decode`] on `Self` only
/// encode/decode the packet body.
pub trait Packet: std::fmt::Debug {
    /// The ID byte of this packet.
    const ID: u8;
    /// The name of this packet for debugging purposes.
    const NAME: &'static str;
    /// The side this packet is intended for.
    const SIDE: PacketSide;
}

/// The side a packet is intended for.
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub enum PacketSide {
    /// Host -> Client
    Clientbound,
    /// Client -> Host
    Serverbound,
}

impl Encode for u8 {
    fn encode(&self, mut w: impl Write) -> anyhow::Result<()> {
        Ok(w.write_u8(*self)?)
    }
}

impl Decode<'_> for u8 {
    fn decode(r: &mut &[u8]) -> anyhow::Result<Self> {
        Ok(r.read_u8()?)
    }
}

impl Encode for bool {
    fn encode(&self, mut w: impl Write) -> anyhow::Result<()> {
        Ok(w.write_u8(u8::from(*self))?)
    }
}

impl Decode<'_> for bool {
    fn decode(r: &mut &[u8]) -> anyhow::Result<Self> {
        let n = r.read_u8()?;
        ensure!(n <= 1, "boolean byte is not 0 or 1 (got {n})");
        Ok(n == 1)
    }
}

impl Encode for u16 {
    fn encode(&self, mut w: impl Write) -> anyhow::Result<()> {
        Ok(w.write_u16::<LE>(*self)?)
    }
}

impl Decode<'_> for u16 {
    fn decode(r: &mut &[u8]) -> anyhow::Result<Self> {
        Ok(r.read_u16::<LE>()?)
    }
}

impl Encode for u32 {
    fn encode(&self, mut w: impl Write) -> anyhow::Result<()> {
        Ok(w.write_u32::<LE>(*self)?)
    }
}

impl Decode<'_> for u32 {
    fn decode(r: &mut &[u8]) -> anyhow::Result<Self> {
        Ok(r.read_u32::<LE>()?)
    }
}

impl<const N: usize> Encode for [u8; N] {
    fn encode(&self, mut w: impl Write) -> anyhow::Result<()> {
        Ok(w.write_all(self)?)
    }
}

impl<const N: usize> Decode<'_> for [u8; N] {
    fn decode(r: &mut &[u8]) -> anyhow::Result<Self> {
        ensure!(r.len() >= N, "unexpected end of input while reading [u8; {N}]");
        let (head, rest) = r.split_at(N);
        *r = rest;
        Ok(head.try_into().unwrap())
    }
}

/// Strings travel NUL-terminated on the wire.
impl Encode for &str {
    fn encode(&self, mut w: impl Write) -> anyhow::Result<()> {
        ensure!(
            !self.bytes().any(|b| b == 0),
            "string contains an interior NUL byte"
        );
        w.write_all(self.as_bytes())?;
        Ok(w.write_u8(0)?)
    }
}

impl<'a> Decode<'a> for &'a str {
    fn decode(r: &mut &'a [u8]) -> anyhow::Result<Self> {
        let Some(nul) = r.iter().position(|&b| b == 0) else {
            bail!("string is missing its NUL terminator");
        };

        let s = std::str::from_utf8(&r[..nul])?;
        *r = &r[nul + 1..];
        Ok(s)
    }
}

impl Encode for String {
    fn encode(&self, w: impl Write) -> anyhow::Result<()> {
        self.as_str().encode(w)
    }
}

impl Decode<'_> for String {
    fn decode(r: &mut &[u8]) -> anyhow::Result<Self> {
        Ok(<&str>::decode(r)?.to_owned())
    }
}

/// Raw bytes taking up the remainder of a packet body, borrowed from the
/// frame. Used for opaque action payloads.
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub struct RawBytes<'a>(pub &'a [u8]);

impl Encode for RawBytes<'_> {
    fn encode(&self, mut w: impl Write) -> anyhow::Result<()> {
        Ok(w.write_all(self.0)?)
    }
}

impl<'a> Decode<'a> for RawBytes<'a> {
    fn decode(r: &mut &'a [u8]) -> anyhow::Result<Self> {
        Ok(Self(std::mem::take(r)))
    }
}

/// The 16-byte "sockaddr" blob Warcraft III embeds in join and player-info
/// packets: address family 2, big-endian port, the IPv4 octets, and eight
/// bytes of padding.
#[derive(Copy, Clone, PartialEq, Eq, Default, Debug)]
pub struct AddrBlob {
    pub port: u16,
    pub ip: [u8; 4],
}

impl Encode for AddrBlob {
    fn encode(&self, mut w: impl Write) -> anyhow::Result<()> {
        w.write_u16::<LE>(2)?;
        w.write_u16::<byteorder::BE>(self.port)?;
        w.write_all(&self.ip)?;
        Ok(w.write_all(&[0; 8])?)
    }
}

impl Decode<'_> for AddrBlob {
    fn decode(r: &mut &[u8]) -> anyhow::Result<Self> {
        let _family = r.read_u16::<LE>()?;
        let port = r.read_u16::<byteorder::BE>()?;
        let ip = <[u8; 4]>::decode(r)?;
        let _padding = <[u8; 8]>::decode(r)?;
        Ok(Self { port, ip })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn str_round_trip() {
        let mut buf = vec![];
        "Varlock".encode(&mut buf).unwrap();
        assert_eq!(buf, b"Varlock\0");

        let mut r = &buf[..];
        assert_eq!(<&str>::decode(&mut r).unwrap(), "Varlock");
        assert!(r.is_empty());
    }

    #[test]
    fn str_rejects_interior_nul() {
        let mut buf = vec![];
        assert!("bad\0name".encode(&mut buf).is_err());
    }

    #[test]
    fn str_requires_terminator() {
        let mut r: &[u8] = b"unterminated";
        assert!(<&str>::decode(&mut r).is_err());
    }

    #[test]
    fn addr_blob_round_trip() {
        let addr = AddrBlob {
            port: 6112,
            ip: [192, 168, 1, 10],
        };

        let mut buf = vec![];
        addr.encode(&mut buf).unwrap();
        assert_eq!(buf.len(), 16);

        let mut r = &buf[..];
        assert_eq!(AddrBlob::decode(&mut r).unwrap(), addr);
        assert!(r.is_empty());
    }
}
