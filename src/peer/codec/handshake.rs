use std::io::{self, Cursor};

use bytes::{Buf, BufMut, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

use crate::{PeerId, Sha1Hash};

pub const PROTOCOL_STRING: &str = "BitTorrent protocol";

/// The 68-byte message both sides send at the beginning of a session.
///
/// ```txt
/// <prot len><protocol string><reserved><info_hash><peer_id>
/// | 1 byte  |   19 bytes     | 8 bytes | 20 bytes | 20 bytes|
/// ```
///
/// The reply's info hash must equal ours byte for byte, or we are talking
/// to a peer from another swarm and the session fails closed.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Handshake {
    /// Currently all zero; where extension support would be announced.
    pub reserved: [u8; 8],
    /// Identifies the torrent this session is about.
    pub info_hash: Sha1Hash,
    /// The remote end's arbitrary 20-byte identity.
    pub peer_id: PeerId,
}

impl Handshake {
    pub fn new(info_hash: Sha1Hash, peer_id: PeerId) -> Self {
        Handshake {
            reserved: [0; 8],
            info_hash,
            peer_id,
        }
    }
}

pub struct HandshakeCodec;

impl Encoder<Handshake> for HandshakeCodec {
    type Error = io::Error;

    fn encode(&mut self, handshake: Handshake, buf: &mut BytesMut) -> io::Result<()> {
        let prot = PROTOCOL_STRING.as_bytes();
        buf.reserve(1 + prot.len() + 8 + 20 + 20);
        buf.put_u8(prot.len() as u8);
        buf.extend_from_slice(prot);
        buf.extend_from_slice(&handshake.reserved);
        buf.extend_from_slice(&handshake.info_hash);
        buf.extend_from_slice(&handshake.peer_id);
        Ok(())
    }
}

impl Decoder for HandshakeCodec {
    type Item = Handshake;
    type Error = io::Error;

    fn decode(&mut self, buf: &mut BytesMut) -> io::Result<Option<Handshake>> {
        if buf.is_empty() {
            return Ok(None);
        }

        // peek at the length prefix without consuming it; the rest of the
        // message may not have arrived yet
        let mut peek = Cursor::new(&buf[..]);
        let prot_len = peek.get_u8() as usize;
        if prot_len != PROTOCOL_STRING.len() {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                r#"handshake must start with the string "BitTorrent protocol""#,
            ));
        }
        if buf.remaining() < 1 + prot_len + 8 + 20 + 20 {
            return Ok(None);
        }
        buf.advance(1);

        let mut prot = [0; 19];
        buf.copy_to_slice(&mut prot);
        if prot != *PROTOCOL_STRING.as_bytes() {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                "unknown protocol string in handshake",
            ));
        }

        let mut reserved = [0; 8];
        buf.copy_to_slice(&mut reserved);
        let mut info_hash = [0; 20];
        buf.copy_to_slice(&mut info_hash);
        let mut peer_id = [0; 20];
        buf.copy_to_slice(&mut peer_id);

        Ok(Some(Handshake {
            reserved,
            info_hash,
            peer_id,
        }))
    }
}
