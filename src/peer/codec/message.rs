use std::io::{self, Cursor};

use bytes::{Buf, BufMut, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

use crate::blockinfo::BlockInfo;
use crate::{Bitfield, PieceIndex};

/// The largest frame we accept from a peer. A block message is at most
/// 16 KiB of data plus its header; bitfields of realistic torrents fit
/// comfortably. Anything bigger is a protocol violation.
const MAX_FRAME_LEN: u32 = 0x80000;

/// The ID of a message, included as a prefix in all messages except
/// keep-alive, which is a zero-length frame with no id at all.
#[repr(u8)]
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum MessageId {
    Choke = 0,
    Unchoke = 1,
    Interested = 2,
    NotInterested = 3,
    Have = 4,
    Bitfield = 5,
    Request = 6,
    Block = 7,
    Cancel = 8,
    Port = 9,
}

impl TryFrom<u8> for MessageId {
    type Error = io::Error;

    fn try_from(id: u8) -> Result<Self, Self::Error> {
        use MessageId::*;
        match id {
            0 => Ok(Choke),
            1 => Ok(Unchoke),
            2 => Ok(Interested),
            3 => Ok(NotInterested),
            4 => Ok(Have),
            5 => Ok(Bitfield),
            6 => Ok(Request),
            7 => Ok(Block),
            8 => Ok(Cancel),
            9 => Ok(Port),
            id => Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!("unknown message id {id}"),
            )),
        }
    }
}

/// One framed message of the peer wire protocol.
///
/// Serialized as a 4-byte big-endian length prefix (payload length plus
/// one for the id, or zero for keep-alive), the id byte, then the payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Message {
    KeepAlive,
    Choke,
    Unchoke,
    Interested,
    NotInterested,
    Have {
        piece_index: PieceIndex,
    },
    Bitfield(Bitfield),
    Request(BlockInfo),
    Block {
        piece_index: PieceIndex,
        offset: u32,
        data: Vec<u8>,
    },
    Cancel(BlockInfo),
    Port(u16),
}

impl Message {
    /// Returns the ID of the message, if it has one (keep alive doesn't).
    pub fn id(&self) -> Option<MessageId> {
        match self {
            Message::KeepAlive => None,
            Message::Choke => Some(MessageId::Choke),
            Message::Unchoke => Some(MessageId::Unchoke),
            Message::Interested => Some(MessageId::Interested),
            Message::NotInterested => Some(MessageId::NotInterested),
            Message::Have { .. } => Some(MessageId::Have),
            Message::Bitfield(_) => Some(MessageId::Bitfield),
            Message::Request(_) => Some(MessageId::Request),
            Message::Block { .. } => Some(MessageId::Block),
            Message::Cancel(_) => Some(MessageId::Cancel),
            Message::Port(_) => Some(MessageId::Port),
        }
    }
}

fn encode_block_info(block: &BlockInfo, buf: &mut BytesMut) -> io::Result<()> {
    let piece_index: u32 = block
        .piece_index
        .try_into()
        .map_err(|e| io::Error::new(io::ErrorKind::InvalidInput, e))?;
    buf.put_u32(piece_index);
    buf.put_u32(block.offset);
    buf.put_u32(block.len);
    Ok(())
}

pub struct MessageCodec;

impl Encoder<Message> for MessageCodec {
    type Error = io::Error;

    fn encode(&mut self, msg: Message, buf: &mut BytesMut) -> io::Result<()> {
        let id = match msg.id() {
            Some(id) => id,
            None => {
                // keep-alive is a bare zero length prefix
                buf.put_u32(0);
                return Ok(());
            }
        };

        match msg {
            Message::Choke
            | Message::Unchoke
            | Message::Interested
            | Message::NotInterested => {
                buf.put_u32(1);
                buf.put_u8(id as u8);
            }
            Message::Have { piece_index } => {
                let piece_index: u32 = piece_index
                    .try_into()
                    .map_err(|e| io::Error::new(io::ErrorKind::InvalidInput, e))?;
                buf.put_u32(1 + 4);
                buf.put_u8(id as u8);
                buf.put_u32(piece_index);
            }
            Message::Bitfield(bitfield) => {
                let bytes = bitfield.into_vec();
                buf.put_u32(1 + bytes.len() as u32);
                buf.put_u8(id as u8);
                buf.extend_from_slice(&bytes);
            }
            Message::Request(block) | Message::Cancel(block) => {
                buf.put_u32(1 + 12);
                buf.put_u8(id as u8);
                encode_block_info(&block, buf)?;
            }
            Message::Block {
                piece_index,
                offset,
                data,
            } => {
                let piece_index: u32 = piece_index
                    .try_into()
                    .map_err(|e| io::Error::new(io::ErrorKind::InvalidInput, e))?;
                buf.put_u32(1 + 8 + data.len() as u32);
                buf.put_u8(id as u8);
                buf.put_u32(piece_index);
                buf.put_u32(offset);
                buf.extend_from_slice(&data);
            }
            Message::Port(port) => {
                buf.put_u32(1 + 2);
                buf.put_u8(id as u8);
                buf.put_u16(port);
            }
            Message::KeepAlive => unreachable!("handled above"),
        }
        Ok(())
    }
}

impl Decoder for MessageCodec {
    type Item = Message;
    type Error = io::Error;

    fn decode(&mut self, buf: &mut BytesMut) -> io::Result<Option<Message>> {
        if buf.len() < 4 {
            return Ok(None);
        }

        // peek the length prefix; the frame may still be in flight
        let mut peek = Cursor::new(&buf[..]);
        let frame_len = peek.get_u32();
        if frame_len > MAX_FRAME_LEN {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!("frame of {frame_len} bytes exceeds the protocol maximum"),
            ));
        }
        if frame_len == 0 {
            buf.advance(4);
            return Ok(Some(Message::KeepAlive));
        }
        if buf.len() < 4 + frame_len as usize {
            buf.reserve(4 + frame_len as usize - buf.len());
            return Ok(None);
        }
        buf.advance(4);

        let id = MessageId::try_from(buf.get_u8())?;
        let payload_len = frame_len as usize - 1;

        let msg = match id {
            MessageId::Choke => Message::Choke,
            MessageId::Unchoke => Message::Unchoke,
            MessageId::Interested => Message::Interested,
            MessageId::NotInterested => Message::NotInterested,
            MessageId::Have => {
                expect_payload(id, payload_len, 4)?;
                Message::Have {
                    piece_index: buf.get_u32() as PieceIndex,
                }
            }
            MessageId::Bitfield => {
                let bytes = buf.split_to(payload_len).to_vec();
                Message::Bitfield(Bitfield::from_vec(bytes))
            }
            MessageId::Request | MessageId::Cancel => {
                expect_payload(id, payload_len, 12)?;
                let block = BlockInfo {
                    piece_index: buf.get_u32() as PieceIndex,
                    offset: buf.get_u32(),
                    len: buf.get_u32(),
                };
                if id == MessageId::Request {
                    Message::Request(block)
                } else {
                    Message::Cancel(block)
                }
            }
            MessageId::Block => {
                if payload_len < 8 {
                    return Err(io::Error::new(
                        io::ErrorKind::InvalidData,
                        "block message shorter than its 8 byte header",
                    ));
                }
                let piece_index = buf.get_u32() as PieceIndex;
                let offset = buf.get_u32();
                let data = buf.split_to(payload_len - 8).to_vec();
                Message::Block {
                    piece_index,
                    offset,
                    data,
                }
            }
            MessageId::Port => {
                expect_payload(id, payload_len, 2)?;
                Message::Port(buf.get_u16())
            }
        };
        Ok(Some(msg))
    }
}

fn expect_payload(id: MessageId, got: usize, want: usize) -> io::Result<()> {
    if got != want {
        return Err(io::Error::new(
            io::ErrorKind::InvalidData,
            format!("{id:?} message with payload of {got} bytes, expected {want}"),
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn round_trip(msg: Message) -> Message {
        let mut wire = BytesMut::new();
        MessageCodec.encode(msg, &mut wire).unwrap();
        let decoded = MessageCodec.decode(&mut wire).unwrap().unwrap();
        assert!(wire.is_empty());
        decoded
    }

    #[test]
    fn keep_alive_is_a_zero_length_frame() {
        let mut wire = BytesMut::new();
        MessageCodec.encode(Message::KeepAlive, &mut wire).unwrap();
        assert_eq!(&wire[..], [0, 0, 0, 0]);
        assert_eq!(round_trip(Message::KeepAlive), Message::KeepAlive);
    }

    #[test]
    fn flag_messages_round_trip() {
        for msg in [
            Message::Choke,
            Message::Unchoke,
            Message::Interested,
            Message::NotInterested,
        ] {
            assert_eq!(round_trip(msg.clone()), msg);
        }
    }

    #[test]
    fn request_is_twelve_big_endian_payload_bytes() {
        let block = BlockInfo {
            piece_index: 2,
            offset: 0x4000,
            len: 0x4000,
        };
        let mut wire = BytesMut::new();
        MessageCodec.encode(Message::Request(block), &mut wire).unwrap();
        assert_eq!(
            &wire[..],
            [
                0, 0, 0, 13, // length: id + 12
                6, // request
                0, 0, 0, 2, // piece index
                0, 0, 0x40, 0, // offset
                0, 0, 0x40, 0, // length
            ]
        );
    }

    #[test]
    fn block_message_round_trips() {
        let msg = Message::Block {
            piece_index: 9,
            offset: 0x8000,
            data: vec![0xcd; 100],
        };
        assert_eq!(round_trip(msg.clone()), msg);
    }

    #[test]
    fn have_and_port_round_trip() {
        assert_eq!(
            round_trip(Message::Have { piece_index: 77 }),
            Message::Have { piece_index: 77 }
        );
        assert_eq!(round_trip(Message::Port(6881)), Message::Port(6881));
    }

    #[test]
    fn bitfield_round_trips() {
        let bitfield = Bitfield::from_vec(vec![0b1010_0001, 0b0100_0000]);
        assert_eq!(
            round_trip(Message::Bitfield(bitfield.clone())),
            Message::Bitfield(bitfield)
        );
    }

    #[test]
    fn unknown_id_is_fatal() {
        let mut wire = BytesMut::new();
        wire.put_u32(1);
        wire.put_u8(11);
        let err = MessageCodec.decode(&mut wire).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidData);
    }

    #[test]
    fn partial_frame_waits_for_more_bytes() {
        let mut full = BytesMut::new();
        MessageCodec
            .encode(
                Message::Block {
                    piece_index: 0,
                    offset: 0,
                    data: vec![0xee; 64],
                },
                &mut full,
            )
            .unwrap();

        let mut partial = BytesMut::from(&full[..10]);
        assert!(MessageCodec.decode(&mut partial).unwrap().is_none());
        partial.extend_from_slice(&full[10..]);
        assert!(MessageCodec.decode(&mut partial).unwrap().is_some());
    }
}
