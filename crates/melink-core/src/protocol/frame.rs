//! Frame encoding/decoding
//!
//! Implements the binary frame format with Fletcher-16 checksums.
//!
//! Frame format (multi-byte fields little-endian unless noted):
//! - 2 bytes: sync marker `'M' 'E'`
//! - 2 bytes: payload length
//! - 1 byte: message type (0x00 request, 0x0F response/push)
//! - 1 byte: message class
//! - 1 byte: command
//! - N bytes: payload
//! - 2 bytes: Fletcher-16 of type+class+command+payload, high byte first
//!
//! Decoding is incremental: input arrives as an unbounded byte stream, so
//! the decoder scans for the sync marker one byte at a time and drops
//! corrupted frames without ever failing the stream.

use bytes::{Buf, BufMut, BytesMut};
use tokio_util::codec::{Decoder, Encoder};
use tracing::{debug, trace};

/// Frame sync marker
pub const SYNC: [u8; 2] = [b'M', b'E'];

/// Message type for client-originated requests
pub const MSG_REQUEST: u8 = 0x00;

/// Message type for device responses and unsolicited pushes
pub const MSG_RESPONSE: u8 = 0x0F;

/// Anti-corruption ceiling on the checksummed message content
/// (type + class + command + payload). Declared lengths at or above
/// this are treated as line noise, not as frames.
pub const MAX_CONTENT_SIZE: usize = 4096;

/// One protocol message, independent of framing
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    /// Message type (0x00 request, 0x0F response/push)
    pub msg_type: u8,
    /// Message class
    pub class: u8,
    /// Command within the class
    pub command: u8,
    /// Command-specific payload
    pub payload: Vec<u8>,
}

impl Message {
    /// Create a client request
    pub fn request(class: u8, command: u8, payload: Vec<u8>) -> Self {
        Self {
            msg_type: MSG_REQUEST,
            class,
            command,
            payload,
        }
    }

    /// Create a device-side response or push
    pub fn push(class: u8, command: u8, payload: Vec<u8>) -> Self {
        Self {
            msg_type: MSG_RESPONSE,
            class,
            command,
            payload,
        }
    }

    /// Correlation key identifying the logical command, regardless of
    /// direction
    pub fn correlation_key(&self) -> u16 {
        (self.class as u16) << 8 | self.command as u16
    }

    /// Size of the checksummed region (type + class + command + payload)
    pub fn content_len(&self) -> usize {
        3 + self.payload.len()
    }
}

/// Compute the Fletcher-16 checksum of a byte slice
pub fn fletcher16(data: &[u8]) -> u16 {
    let mut a: u16 = 0;
    let mut b: u16 = 0;
    for &t in data {
        a = (a + t as u16) % 255;
        b = (b + a) % 255;
    }
    (b << 8) | a
}

/// Encode a message into one complete wire frame
pub fn encode_frame(message: &Message) -> Vec<u8> {
    let mut buf = BytesMut::with_capacity(6 + message.content_len() + 2);
    let mut codec = FrameCodec::default();
    // Encoding into a fresh BytesMut only fails for oversize content,
    // which callers guard against via MAX_CONTENT_SIZE
    codec
        .encode(message.clone(), &mut buf)
        .map(|_| buf.to_vec())
        .unwrap_or_default()
}

/// Codec for the ME frame format, usable with `FramedRead`/`FramedWrite`
#[derive(Debug, Default)]
pub struct FrameCodec;

impl Decoder for FrameCodec {
    type Item = Message;
    type Error = std::io::Error;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Message>, Self::Error> {
        loop {
            if src.len() < 2 {
                return Ok(None);
            }

            // Resynchronize byte-at-a-time until the sync marker lines up
            if src[0] != SYNC[0] || src[1] != SYNC[1] {
                src.advance(1);
                continue;
            }

            if src.len() < 4 {
                return Ok(None);
            }

            let payload_len = u16::from_le_bytes([src[2], src[3]]) as usize;
            let content_len = 3 + payload_len;
            if content_len >= MAX_CONTENT_SIZE {
                trace!(payload_len, "oversize length field, resyncing");
                src.advance(1);
                continue;
            }

            let total = 4 + content_len + 2;
            if src.len() < total {
                return Ok(None);
            }

            let content = &src[4..4 + content_len];
            let expected = fletcher16(content);
            let received = u16::from_be_bytes([src[4 + content_len], src[5 + content_len]]);
            if received != expected {
                debug!(expected, received, "checksum mismatch, frame dropped");
                src.advance(1);
                continue;
            }

            let message = Message {
                msg_type: content[0],
                class: content[1],
                command: content[2],
                payload: content[3..].to_vec(),
            };
            src.advance(total);
            return Ok(Some(message));
        }
    }
}

impl Encoder<Message> for FrameCodec {
    type Error = std::io::Error;

    fn encode(&mut self, message: Message, dst: &mut BytesMut) -> Result<(), Self::Error> {
        let content_len = message.content_len();
        if content_len >= MAX_CONTENT_SIZE {
            return Err(std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                format!("message content of {content_len} bytes exceeds frame ceiling"),
            ));
        }

        dst.reserve(4 + content_len + 2);
        let base = dst.len();
        dst.put_slice(&SYNC);
        dst.put_u16_le(message.payload.len() as u16);
        dst.put_u8(message.msg_type);
        dst.put_u8(message.class);
        dst.put_u8(message.command);
        dst.put_slice(&message.payload);

        let checksum = fletcher16(&dst[base + 4..]);
        dst.put_u16(checksum);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn decode_all(bytes: &[u8]) -> Vec<Message> {
        let mut codec = FrameCodec::default();
        let mut buf = BytesMut::from(bytes);
        let mut out = Vec::new();
        while let Ok(Some(msg)) = codec.decode(&mut buf) {
            out.push(msg);
        }
        out
    }

    #[test]
    fn fletcher16_known_vectors() {
        assert_eq!(fletcher16(&[0x00, 0x04, 0x00]), 0x0804);
        assert_eq!(fletcher16(&[0x0F, 0x04, 0x00]), 0x3513);
    }

    #[test]
    fn fletcher16_deterministic() {
        let content = [0x0F, 0x04, 0x00];
        assert_eq!(fletcher16(&content), fletcher16(&content));
    }

    #[test]
    fn fletcher16_single_bit_flip_changes_result() {
        for content in [[0x00u8, 0x04, 0x00], [0x0F, 0x04, 0x00]] {
            let original = fletcher16(&content);
            for byte in 0..content.len() {
                for bit in 0..8 {
                    let mut flipped = content;
                    flipped[byte] ^= 1 << bit;
                    assert_ne!(fletcher16(&flipped), original, "flip {byte}:{bit}");
                }
            }
        }
    }

    #[test]
    fn encode_get_info_request_golden() {
        let frame = encode_frame(&Message::request(0x04, 0x00, vec![]));
        assert_eq!(
            frame,
            vec![0x4D, 0x45, 0x00, 0x00, 0x00, 0x04, 0x00, 0x08, 0x04]
        );
    }

    #[test]
    fn decode_inverts_encode() {
        let original = Message::request(0x04, 0x00, vec![]);
        let decoded = decode_all(&encode_frame(&original));
        assert_eq!(decoded, vec![original]);

        let with_payload = Message::push(0x01, 0x01, vec![0x10, 0x27, 0xFF]);
        let decoded = decode_all(&encode_frame(&with_payload));
        assert_eq!(decoded, vec![with_payload]);
    }

    #[test]
    fn resync_skips_leading_garbage() {
        let valid = Message::request(0x04, 0x00, vec![]);
        let mut stream = vec![0x00, 0x4D, 0x13, 0x37, 0x45];
        stream.extend_from_slice(&encode_frame(&valid));
        assert_eq!(decode_all(&stream), vec![valid]);
    }

    #[test]
    fn corrupted_checksum_frame_is_skipped() {
        let first = Message::request(0x04, 0x00, vec![]);
        let second = Message::request(0x01, 0x01, vec![0x05, 0x00]);
        let third = Message::request(0x02, 0x01, vec![0x07, 0x00]);

        let mut stream = encode_frame(&first);
        let mut corrupted = encode_frame(&second);
        let last = corrupted.len() - 1;
        corrupted[last] ^= 0xFF;
        stream.extend_from_slice(&corrupted);
        stream.extend_from_slice(&encode_frame(&third));

        assert_eq!(decode_all(&stream), vec![first, third]);
    }

    #[test]
    fn oversize_length_field_does_not_stall_decoder() {
        let valid = Message::request(0x04, 0x00, vec![]);
        // Sync marker followed by a length that would exceed the ceiling
        let mut stream = vec![b'M', b'E', 0xFF, 0xFF];
        stream.extend_from_slice(&encode_frame(&valid));
        assert_eq!(decode_all(&stream), vec![valid]);
    }

    #[test]
    fn partial_frame_waits_for_more_data() {
        let valid = Message::request(0x01, 0x01, vec![1, 2, 3, 4]);
        let frame = encode_frame(&valid);

        let mut codec = FrameCodec::default();
        let mut buf = BytesMut::new();
        buf.extend_from_slice(&frame[..5]);
        assert!(codec.decode(&mut buf).expect("no error").is_none());
        buf.extend_from_slice(&frame[5..]);
        assert_eq!(codec.decode(&mut buf).expect("no error"), Some(valid));
    }

    #[test]
    fn encode_rejects_oversize_content() {
        let mut codec = FrameCodec::default();
        let mut buf = BytesMut::new();
        let oversized = Message::request(0x01, 0x00, vec![0; MAX_CONTENT_SIZE]);
        assert!(codec.encode(oversized, &mut buf).is_err());
    }
}
