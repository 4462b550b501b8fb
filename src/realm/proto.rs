//! Minimal realm wire encoding.
//!
//! The realm link uses `{0xFF, id, u16 length}` frames. Only the handful of
//! messages the boundary needs are encoded here; authentication beyond the
//! plain login exchange is deliberately not implemented.

use anyhow::ensure;
use byteorder::{ReadBytesExt, LE};
use bytes::{Buf, BufMut, BytesMut};

pub const HEADER_CONSTANT: u8 = 0xFF;
pub const HEADER_SIZE: usize = 4;

pub const SID_NULL: u8 = 0x00;
pub const SID_STOPADV: u8 = 0x02;
pub const SID_ENTERCHAT: u8 = 0x0A;
pub const SID_JOINCHANNEL: u8 = 0x0C;
pub const SID_CHATCOMMAND: u8 = 0x0E;
pub const SID_CHATEVENT: u8 = 0x0F;
pub const SID_STARTADVEX3: u8 = 0x1C;
pub const SID_LOGON: u8 = 0x29;

pub const EID_SHOWUSER: u32 = 0x01;
pub const EID_TALK: u32 = 0x05;
pub const EID_BROADCAST: u32 = 0x06;
pub const EID_CHANNEL: u32 = 0x07;
pub const EID_WHISPER: u32 = 0x04;
pub const EID_INFO: u32 = 0x12;
pub const EID_ERROR: u32 = 0x13;
pub const EID_EMOTE: u32 = 0x17;

/// One decoded realm frame.
#[derive(Clone, Debug)]
pub struct Frame {
    pub id: u8,
    pub body: BytesMut,
}

/// Frame reassembly, same scheme as the game side but with the realm's
/// header byte.
#[derive(Default)]
pub struct FrameDecoder {
    buf: BytesMut,
}

impl FrameDecoder {
    pub fn queue_bytes(&mut self, bytes: BytesMut) {
        self.buf.unsplit(bytes);
    }

    pub fn try_next_frame(&mut self) -> anyhow::Result<Option<Frame>> {
        if self.buf.len() < HEADER_SIZE {
            return Ok(None);
        }

        ensure!(
            self.buf[0] == HEADER_CONSTANT,
            "invalid realm frame header byte {:#04x}",
            self.buf[0]
        );

        let id = self.buf[1];
        let frame_len = u16::from_le_bytes([self.buf[2], self.buf[3]]) as usize;

        ensure!(
            frame_len >= HEADER_SIZE,
            "realm frame length of {frame_len} is smaller than the frame header"
        );

        if self.buf.len() < frame_len {
            return Ok(None);
        }

        self.buf.advance(HEADER_SIZE);
        let body = self.buf.split_to(frame_len - HEADER_SIZE);

        Ok(Some(Frame { id, body }))
    }
}

pub fn frame(id: u8, body: &[u8]) -> BytesMut {
    let mut out = BytesMut::with_capacity(HEADER_SIZE + body.len());
    out.put_u8(HEADER_CONSTANT);
    out.put_u8(id);
    out.put_u16_le((HEADER_SIZE + body.len()) as u16);
    out.extend_from_slice(body);
    out
}

pub fn compose_null() -> BytesMut {
    frame(SID_NULL, &[])
}

pub fn compose_logon(username: &str, password: &str) -> BytesMut {
    let mut body = Vec::new();
    body.extend_from_slice(username.as_bytes());
    body.push(0);
    body.extend_from_slice(password.as_bytes());
    body.push(0);
    frame(SID_LOGON, &body)
}

pub fn compose_enter_chat() -> BytesMut {
    // Account name and statstring, both left for the server to fill in.
    frame(SID_ENTERCHAT, &[0, 0])
}

pub fn compose_join_channel(channel: &str) -> BytesMut {
    let mut body = Vec::new();
    body.extend_from_slice(&2u32.to_le_bytes());
    body.extend_from_slice(channel.as_bytes());
    body.push(0);
    frame(SID_JOINCHANNEL, &body)
}

pub fn compose_chat_command(message: &str) -> BytesMut {
    let mut body = Vec::new();
    body.extend_from_slice(message.as_bytes());
    body.push(0);
    frame(SID_CHATCOMMAND, &body)
}

pub fn compose_stop_adv() -> BytesMut {
    frame(SID_STOPADV, &[])
}

/// The game advertisement. `state` is the public/private word, `stat_string`
/// is already encoded.
pub fn compose_start_adv(
    state: u32,
    uptime_seconds: u32,
    game_type: u32,
    game_name: &str,
    stat_string: &[u8],
    host_counter: u32,
) -> BytesMut {
    let mut body = Vec::new();
    body.extend_from_slice(&state.to_le_bytes());
    body.extend_from_slice(&uptime_seconds.to_le_bytes());
    body.extend_from_slice(&game_type.to_le_bytes());
    body.extend_from_slice(&[0xFF, 0x03, 0x00, 0x00]); // unknown, always 1023
    body.extend_from_slice(&[0x00, 0x00, 0x00, 0x00]); // ladder
    body.extend_from_slice(game_name.as_bytes());
    body.push(0);
    body.push(0); // password
    body.push(b'0' + (host_counter % 10) as u8); // free slot marker
    body.extend_from_slice(format!("{host_counter:08x}").as_bytes());
    body.extend_from_slice(stat_string);
    body.push(0);
    frame(SID_STARTADVEX3, &body)
}

/// A parsed `SID_CHATEVENT`.
#[derive(Clone, Debug)]
pub struct ChatEvent {
    pub event: u32,
    pub user: String,
    pub message: String,
}

pub fn parse_chat_event(mut body: &[u8]) -> anyhow::Result<ChatEvent> {
    let r = &mut body;
    let event = r.read_u32::<LE>()?;
    let _flags = r.read_u32::<LE>()?;
    let _ping = r.read_u32::<LE>()?;
    let _ip = r.read_u32::<LE>()?;
    let _account = r.read_u32::<LE>()?;
    let _registration = r.read_u32::<LE>()?;

    let user = read_cstring(r)?;
    let message = read_cstring(r)?;

    Ok(ChatEvent {
        event,
        user,
        message,
    })
}

fn read_cstring(r: &mut &[u8]) -> anyhow::Result<String> {
    let nul = r
        .iter()
        .position(|&b| b == 0)
        .ok_or_else(|| anyhow::anyhow!("missing NUL terminator"))?;

    let s = String::from_utf8_lossy(&r[..nul]).into_owned();
    *r = &r[nul + 1..];
    Ok(s)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn frame_round_trip() {
        let mut dec = FrameDecoder::default();
        dec.queue_bytes(compose_chat_command("/join The Void"));

        let frame = dec.try_next_frame().unwrap().unwrap();
        assert_eq!(frame.id, SID_CHATCOMMAND);
        assert_eq!(&frame.body[..], b"/join The Void\0");
    }

    #[test]
    fn chat_event_parses() {
        let mut body = Vec::new();
        body.extend_from_slice(&EID_WHISPER.to_le_bytes());
        body.extend_from_slice(&[0; 20]);
        body.extend_from_slice(b"Varlock\0sc\0");

        let event = parse_chat_event(&body).unwrap();
        assert_eq!(event.event, EID_WHISPER);
        assert_eq!(event.user, "Varlock");
        assert_eq!(event.message, "sc");
    }
}
