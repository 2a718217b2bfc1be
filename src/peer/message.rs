use crate::error::{BittorrentError, Result};
use bytes::{Buf, BufMut, Bytes, BytesMut};

/// Largest frame accepted from a peer: a 16 KiB block with headroom for
/// peers that honour bigger requests, plus the 13 byte Piece header.
pub const MAX_MESSAGE_LEN: usize = 1024 * 1024 + 13;

/// Information about a block within a piece
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BlockInfo {
    /// Piece index
    pub piece_index: u32,
    /// Byte offset within the piece
    pub offset: u32,
    /// Length of the block
    pub length: u32,
}

impl BlockInfo {
    pub fn new(piece_index: u32, offset: u32, length: u32) -> Self {
        Self {
            piece_index,
            offset,
            length,
        }
    }
}

/// Messages exchanged between peers
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PeerMessage {
    /// Keep-alive message (no payload)
    KeepAlive,
    /// Choke the peer
    Choke,
    /// Unchoke the peer
    Unchoke,
    /// Indicate interest
    Interested,
    /// Indicate lack of interest
    NotInterested,
    /// Indicate possession of a piece
    Have { piece_index: u32 },
    /// Bitfield of available pieces, bit-packed MSB first
    Bitfield { bitfield: Bytes },
    /// Request a block
    Request { block: BlockInfo },
    /// Send a block
    Piece {
        piece_index: u32,
        offset: u32,
        data: Bytes,
    },
    /// Cancel a block request
    Cancel { block: BlockInfo },
    /// A message id this client does not speak (port, extensions, ...)
    Unknown { id: u8 },
}

impl PeerMessage {
    /// Message type IDs
    const CHOKE: u8 = 0;
    const UNCHOKE: u8 = 1;
    const INTERESTED: u8 = 2;
    const NOT_INTERESTED: u8 = 3;
    const HAVE: u8 = 4;
    const BITFIELD: u8 = 5;
    const REQUEST: u8 = 6;
    const PIECE: u8 = 7;
    const CANCEL: u8 = 8;

    /// Serialize message to bytes
    /// Format: <length prefix><message ID><payload>
    pub fn to_bytes(&self) -> Bytes {
        let mut buf = BytesMut::new();

        match self {
            PeerMessage::KeepAlive => {
                buf.put_u32(0);
            }
            PeerMessage::Choke => {
                buf.put_u32(1);
                buf.put_u8(Self::CHOKE);
            }
            PeerMessage::Unchoke => {
                buf.put_u32(1);
                buf.put_u8(Self::UNCHOKE);
            }
            PeerMessage::Interested => {
                buf.put_u32(1);
                buf.put_u8(Self::INTERESTED);
            }
            PeerMessage::NotInterested => {
                buf.put_u32(1);
                buf.put_u8(Self::NOT_INTERESTED);
            }
            PeerMessage::Have { piece_index } => {
                buf.put_u32(5);
                buf.put_u8(Self::HAVE);
                buf.put_u32(*piece_index);
            }
            PeerMessage::Bitfield { bitfield } => {
                buf.put_u32((1 + bitfield.len()) as u32);
                buf.put_u8(Self::BITFIELD);
                buf.put_slice(bitfield);
            }
            PeerMessage::Request { block } => {
                buf.put_u32(13);
                buf.put_u8(Self::REQUEST);
                put_block(&mut buf, block);
            }
            PeerMessage::Piece {
                piece_index,
                offset,
                data,
            } => {
                buf.put_u32((9 + data.len()) as u32);
                buf.put_u8(Self::PIECE);
                buf.put_u32(*piece_index);
                buf.put_u32(*offset);
                buf.put_slice(data);
            }
            PeerMessage::Cancel { block } => {
                buf.put_u32(13);
                buf.put_u8(Self::CANCEL);
                put_block(&mut buf, block);
            }
            PeerMessage::Unknown { id } => {
                buf.put_u32(1);
                buf.put_u8(*id);
            }
        }

        buf.freeze()
    }

    /// Deserialize a frame body (everything after the length prefix).
    ///
    /// An empty body is a keep-alive. Fixed-size messages must carry exactly
    /// their payload size; anything else is a protocol violation.
    pub fn from_frame(mut frame: Bytes) -> Result<Self> {
        if frame.is_empty() {
            return Ok(PeerMessage::KeepAlive);
        }

        let message_id = frame.get_u8();
        let payload_len = frame.len();

        let expect = |len: usize, name: &str| -> Result<()> {
            if payload_len != len {
                return Err(BittorrentError::ProtocolError(format!(
                    "{} payload must be {} bytes, got {}",
                    name, len, payload_len
                )));
            }
            Ok(())
        };

        match message_id {
            Self::CHOKE => {
                expect(0, "Choke")?;
                Ok(PeerMessage::Choke)
            }
            Self::UNCHOKE => {
                expect(0, "Unchoke")?;
                Ok(PeerMessage::Unchoke)
            }
            Self::INTERESTED => {
                expect(0, "Interested")?;
                Ok(PeerMessage::Interested)
            }
            Self::NOT_INTERESTED => {
                expect(0, "NotInterested")?;
                Ok(PeerMessage::NotInterested)
            }
            Self::HAVE => {
                expect(4, "Have")?;
                Ok(PeerMessage::Have {
                    piece_index: frame.get_u32(),
                })
            }
            Self::BITFIELD => Ok(PeerMessage::Bitfield { bitfield: frame }),
            Self::REQUEST => {
                expect(12, "Request")?;
                Ok(PeerMessage::Request {
                    block: get_block(&mut frame),
                })
            }
            Self::PIECE => {
                if payload_len < 8 {
                    return Err(BittorrentError::ProtocolError(format!(
                        "Piece payload must be at least 8 bytes, got {}",
                        payload_len
                    )));
                }
                let piece_index = frame.get_u32();
                let offset = frame.get_u32();
                Ok(PeerMessage::Piece {
                    piece_index,
                    offset,
                    data: frame,
                })
            }
            Self::CANCEL => {
                expect(12, "Cancel")?;
                Ok(PeerMessage::Cancel {
                    block: get_block(&mut frame),
                })
            }
            id => Ok(PeerMessage::Unknown { id }),
        }
    }
}

fn put_block(buf: &mut BytesMut, block: &BlockInfo) {
    buf.put_u32(block.piece_index);
    buf.put_u32(block.offset);
    buf.put_u32(block.length);
}

fn get_block(frame: &mut Bytes) -> BlockInfo {
    let piece_index = frame.get_u32();
    let offset = frame.get_u32();
    let length = frame.get_u32();
    BlockInfo::new(piece_index, offset, length)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn body(message: &PeerMessage) -> Bytes {
        message.to_bytes().slice(4..)
    }

    #[test]
    fn test_request_wire_format() {
        let message = PeerMessage::Request {
            block: BlockInfo::new(1, 16384, 16384),
        };
        let bytes = message.to_bytes();
        assert_eq!(
            &bytes[..],
            &[0, 0, 0, 13, 6, 0, 0, 0, 1, 0, 0, 0x40, 0, 0, 0, 0x40, 0]
        );
        assert_eq!(PeerMessage::from_frame(body(&message)).unwrap(), message);
    }

    #[test]
    fn test_keep_alive() {
        assert_eq!(&PeerMessage::KeepAlive.to_bytes()[..], &[0, 0, 0, 0]);
        assert_eq!(
            PeerMessage::from_frame(Bytes::new()).unwrap(),
            PeerMessage::KeepAlive
        );
    }

    #[test]
    fn test_piece_keeps_block_data() {
        let message = PeerMessage::Piece {
            piece_index: 3,
            offset: 0,
            data: Bytes::from_static(b"hello"),
        };
        assert_eq!(PeerMessage::from_frame(body(&message)).unwrap(), message);
    }

    #[test]
    fn test_fixed_length_violations() {
        let cases: [&[u8]; 7] = [
            &[0, 1],
            &[1, 0, 0],
            &[2, 9],
            &[3, 0],
            &[4, 0, 0, 1],
            &[6, 0, 0, 0, 1, 0, 0, 0, 0, 0, 0, 0],
            &[8, 0, 0, 0, 1, 0, 0, 0, 0, 0, 0, 0, 0, 0],
        ];
        for case in cases {
            let result = PeerMessage::from_frame(Bytes::copy_from_slice(case));
            assert!(
                matches!(result, Err(BittorrentError::ProtocolError(_))),
                "frame {:?} should be rejected",
                case
            );
        }

        let short_piece = Bytes::from_static(&[7, 0, 0, 0, 1, 0, 0]);
        assert!(PeerMessage::from_frame(short_piece).is_err());
    }

    #[test]
    fn test_unknown_message_is_not_an_error() {
        let frame = Bytes::from_static(&[20, 0, 1, 2]);
        assert_eq!(
            PeerMessage::from_frame(frame).unwrap(),
            PeerMessage::Unknown { id: 20 }
        );
    }
}
