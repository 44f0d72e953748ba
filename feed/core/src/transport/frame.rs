//! WebSocket Frame Codec
//!
//! Byte-exact RFC 6455 framing for the streaming connection. This module
//! knows nothing about feeds; it turns bytes into frames and back.
//!
//! # Frame Format
//!
//! ```text
//! +-+-+-+-+-------+-+-------------+-------------------------------+
//! |F|R|R|R| opcode|M| Payload len |    Extended payload length    |
//! |I|S|S|S|  (4)  |A|     (7)     |             (16/64)           |
//! |N|V|V|V|       |S|             |   (if payload len==126/127)   |
//! +-+-+-+-+-------+-+-------------+-------------------------------+
//! |     Masking-key (0 or 4 bytes)      |     Payload Data ...    |
//! +-------------------------------------+-------------------------+
//! ```
//!
//! Extended lengths are big-endian. Client-originated frames are always
//! masked with a fresh random key.
//!
//! # Incremental Decoding
//!
//! [`decode_header`] and [`decode_payload`] return `Ok(None)` when the buffer
//! does not yet hold enough bytes. [`FrameDecoder`] keeps the buffered bytes
//! and a parsed header between calls so nothing is lost across partial reads.

use rand::Rng;
use thiserror::Error;

/// Default maximum accepted payload size (16 MiB)
pub const DEFAULT_MAX_PAYLOAD: u64 = 16 * 1024 * 1024;

/// Largest payload length encoded inline in the second header byte
const MAX_INLINE_LEN: u64 = 125;

/// Largest payload length encoded with the 16-bit extended length
const MAX_EXTENDED16_LEN: u64 = u16::MAX as u64;

/// Minimum buffer capacity for decoder
const MIN_BUFFER_CAPACITY: usize = 4096;

const FIN_BIT: u8 = 0x80;
const MASK_BIT: u8 = 0x80;

/// Errors produced while decoding frames
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum FrameError {
    /// Declared payload is larger than the decoder accepts
    #[error("frame payload of {declared} bytes exceeds maximum {max}")]
    PayloadTooLarge {
        /// Declared payload length
        declared: u64,
        /// Configured maximum
        max: u64,
    },

    /// Reserved bits were set without a negotiated extension
    #[error("reserved header bits set: {0:#04x}")]
    ReservedBits(u8),

    /// 64-bit length with the most significant bit set
    #[error("invalid extended payload length")]
    InvalidLength,
}

/// Frame opcode
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Opcode {
    /// Continuation of a fragmented message
    Continuation,
    /// UTF-8 text payload
    Text,
    /// Binary payload
    Binary,
    /// Connection close
    Close,
    /// Ping (peer liveness probe)
    Ping,
    /// Pong (answer to a ping)
    Pong,
    /// Any opcode RFC 6455 reserves for future use
    Reserved(u8),
}

impl Opcode {
    /// Decode the low nibble of the first header byte
    #[must_use]
    pub fn from_u8(value: u8) -> Self {
        match value & 0x0f {
            0x0 => Self::Continuation,
            0x1 => Self::Text,
            0x2 => Self::Binary,
            0x8 => Self::Close,
            0x9 => Self::Ping,
            0xA => Self::Pong,
            other => Self::Reserved(other),
        }
    }

    /// Wire value of this opcode
    #[must_use]
    pub fn as_u8(self) -> u8 {
        match self {
            Self::Continuation => 0x0,
            Self::Text => 0x1,
            Self::Binary => 0x2,
            Self::Close => 0x8,
            Self::Ping => 0x9,
            Self::Pong => 0xA,
            Self::Reserved(other) => other & 0x0f,
        }
    }

    /// Whether this is a control frame (close, ping, pong)
    #[must_use]
    pub fn is_control(self) -> bool {
        matches!(self, Self::Close | Self::Ping | Self::Pong)
    }
}

/// A decoded frame header
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct FrameHeader {
    /// Final fragment flag
    pub fin: bool,
    /// Frame opcode
    pub opcode: Opcode,
    /// Whether the payload is masked
    pub masked: bool,
    /// Masking key, present when `masked`
    pub mask_key: Option<[u8; 4]>,
    /// Declared payload length
    pub payload_len: u64,
    /// Bytes consumed by the header (including extended length and mask key)
    pub header_len: usize,
}

/// A complete frame with its payload already unmasked
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Frame {
    /// Final fragment flag
    pub fin: bool,
    /// Frame opcode
    pub opcode: Opcode,
    /// Unmasked payload bytes
    pub payload: Vec<u8>,
}

impl Frame {
    /// Payload interpreted as UTF-8 text
    pub fn text(&self) -> Result<&str, std::str::Utf8Error> {
        std::str::from_utf8(&self.payload)
    }
}

/// XOR `data` in place with the repeating 4-byte key
///
/// Applying the same key twice restores the original bytes.
#[inline]
pub fn apply_mask(key: [u8; 4], data: &mut [u8]) {
    for (i, byte) in data.iter_mut().enumerate() {
        *byte ^= key[i % 4];
    }
}

/// Return a masked copy of `data`
#[must_use]
pub fn mask(key: [u8; 4], data: &[u8]) -> Vec<u8> {
    let mut out = data.to_vec();
    apply_mask(key, &mut out);
    out
}

/// Generate a fresh random masking key
#[must_use]
pub fn random_mask_key() -> [u8; 4] {
    rand::thread_rng().gen()
}

/// Try to decode a frame header from the start of `buf`
///
/// Returns:
/// - `Ok(Some(header))` once the whole header (and mask key) is buffered
/// - `Ok(None)` if more data is needed
/// - `Err(...)` if the header is invalid
pub fn decode_header(buf: &[u8]) -> Result<Option<FrameHeader>, FrameError> {
    if buf.len() < 2 {
        return Ok(None);
    }

    let first = buf[0];
    let second = buf[1];

    let reserved = first & 0x70;
    if reserved != 0 {
        return Err(FrameError::ReservedBits(reserved));
    }

    let fin = first & FIN_BIT != 0;
    let opcode = Opcode::from_u8(first);
    let masked = second & MASK_BIT != 0;

    let (payload_len, mut pos) = match second & 0x7f {
        126 => {
            if buf.len() < 4 {
                return Ok(None);
            }
            (u64::from(u16::from_be_bytes([buf[2], buf[3]])), 4)
        }
        127 => {
            if buf.len() < 10 {
                return Ok(None);
            }
            let mut len_bytes = [0u8; 8];
            len_bytes.copy_from_slice(&buf[2..10]);
            let len = u64::from_be_bytes(len_bytes);
            if len & (1 << 63) != 0 {
                return Err(FrameError::InvalidLength);
            }
            (len, 10)
        }
        short => (u64::from(short), 2),
    };

    let mask_key = if masked {
        if buf.len() < pos + 4 {
            return Ok(None);
        }
        let key = [buf[pos], buf[pos + 1], buf[pos + 2], buf[pos + 3]];
        pos += 4;
        Some(key)
    } else {
        None
    };

    Ok(Some(FrameHeader {
        fin,
        opcode,
        masked,
        mask_key,
        payload_len,
        header_len: pos,
    }))
}

/// Try to extract a payload of `len` bytes from the start of `buf`
///
/// When `mask_key` is present every byte is XORed with `mask_key[i % 4]`.
/// Returns `Ok(None)` until `len` bytes are buffered.
pub fn decode_payload(
    buf: &[u8],
    len: u64,
    mask_key: Option<[u8; 4]>,
) -> Result<Option<Vec<u8>>, FrameError> {
    let len = usize::try_from(len).map_err(|_| FrameError::InvalidLength)?;
    if buf.len() < len {
        return Ok(None);
    }

    let mut payload = buf[..len].to_vec();
    if let Some(key) = mask_key {
        apply_mask(key, &mut payload);
    }
    Ok(Some(payload))
}

/// Encode a client frame with a fresh random masking key
///
/// FIN and MASK are always set; the shortest length class is chosen.
#[must_use]
pub fn encode(opcode: Opcode, payload: &[u8]) -> Vec<u8> {
    encode_with_mask(opcode, payload, random_mask_key())
}

/// Encode a client frame with the given masking key
#[must_use]
pub fn encode_with_mask(opcode: Opcode, payload: &[u8], key: [u8; 4]) -> Vec<u8> {
    let len = payload.len() as u64;
    let mut buf = Vec::with_capacity(14 + payload.len());

    buf.push(FIN_BIT | opcode.as_u8());

    if len <= MAX_INLINE_LEN {
        buf.push(MASK_BIT | len as u8);
    } else if len <= MAX_EXTENDED16_LEN {
        buf.push(MASK_BIT | 126);
        buf.extend_from_slice(&(len as u16).to_be_bytes());
    } else {
        buf.push(MASK_BIT | 127);
        buf.extend_from_slice(&len.to_be_bytes());
    }

    buf.extend_from_slice(&key);

    let start = buf.len();
    buf.extend_from_slice(payload);
    apply_mask(key, &mut buf[start..]);
    buf
}

/// Decoder state machine for streaming frame parsing
///
/// Buffers incoming bytes and yields complete frames. A parsed header is
/// kept while its payload is still arriving.
#[derive(Debug)]
pub struct FrameDecoder {
    buffer: Vec<u8>,
    /// Position where we've consumed up to
    read_pos: usize,
    /// Header of the frame whose payload is still incomplete
    pending: Option<FrameHeader>,
    max_payload: u64,
}

impl Default for FrameDecoder {
    fn default() -> Self {
        Self::new()
    }
}

impl FrameDecoder {
    /// Create a new decoder with the default payload limit
    #[must_use]
    pub fn new() -> Self {
        Self::with_max_payload(DEFAULT_MAX_PAYLOAD)
    }

    /// Create a decoder that rejects payloads larger than `max_payload`
    #[must_use]
    pub fn with_max_payload(max_payload: u64) -> Self {
        Self {
            buffer: Vec::with_capacity(MIN_BUFFER_CAPACITY),
            read_pos: 0,
            pending: None,
            max_payload,
        }
    }

    /// Append bytes to the buffer
    pub fn push(&mut self, data: &[u8]) {
        // Compact buffer if we've consumed a lot
        if self.read_pos > self.buffer.len() / 2 && self.read_pos > MIN_BUFFER_CAPACITY {
            self.buffer.drain(..self.read_pos);
            self.read_pos = 0;
        }
        self.buffer.extend_from_slice(data);
    }

    /// Get the number of bytes available in the buffer
    #[must_use]
    pub fn available(&self) -> usize {
        self.buffer.len() - self.read_pos
    }

    /// Whether a header has been parsed but its payload is still incomplete
    #[must_use]
    pub fn has_partial_frame(&self) -> bool {
        self.pending.is_some()
    }

    /// Try to decode the next frame
    ///
    /// Returns:
    /// - `Ok(Some(frame))` if a complete frame was decoded
    /// - `Ok(None)` if more data is needed
    /// - `Err(...)` if the frame is invalid
    pub fn decode(&mut self) -> Result<Option<Frame>, FrameError> {
        let header = match self.pending {
            Some(header) => header,
            None => {
                let Some(header) = decode_header(&self.buffer[self.read_pos..])? else {
                    return Ok(None);
                };
                if header.payload_len > self.max_payload {
                    return Err(FrameError::PayloadTooLarge {
                        declared: header.payload_len,
                        max: self.max_payload,
                    });
                }
                self.read_pos += header.header_len;
                self.pending = Some(header);
                header
            }
        };

        let Some(payload) = decode_payload(
            &self.buffer[self.read_pos..],
            header.payload_len,
            header.mask_key,
        )?
        else {
            return Ok(None);
        };

        self.read_pos += payload.len();
        self.pending = None;

        Ok(Some(Frame {
            fin: header.fin,
            opcode: header.opcode,
            payload,
        }))
    }

    /// Clear the buffer and any partially decoded header
    pub fn clear(&mut self) {
        self.buffer.clear();
        self.read_pos = 0;
        self.pending = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const KEY: [u8; 4] = [0x37, 0xfa, 0x21, 0x3d];

    fn unmasked(opcode: Opcode, payload: &[u8]) -> Vec<u8> {
        // Server-style frame: FIN set, no mask
        let mut buf = vec![FIN_BIT | opcode.as_u8()];
        let len = payload.len();
        if len <= 125 {
            buf.push(len as u8);
        } else if len <= 65535 {
            buf.push(126);
            buf.extend_from_slice(&(len as u16).to_be_bytes());
        } else {
            buf.push(127);
            buf.extend_from_slice(&(len as u64).to_be_bytes());
        }
        buf.extend_from_slice(payload);
        buf
    }

    #[test]
    fn test_length_classes_roundtrip() {
        for len in [0usize, 1, 125, 126, 65535, 65536, 1 << 20] {
            let payload: Vec<u8> = (0..len).map(|i| (i % 251) as u8).collect();
            let encoded = encode(Opcode::Text, &payload);

            let header = decode_header(&encoded).unwrap().unwrap();
            assert_eq!(header.opcode, Opcode::Text, "len {len}");
            assert!(header.fin);
            assert!(header.masked);
            assert_eq!(header.payload_len, len as u64);

            let expected_header = match len {
                0..=125 => 2,
                126..=65535 => 4,
                _ => 10,
            } + 4;
            assert_eq!(header.header_len, expected_header, "len {len}");

            let decoded =
                decode_payload(&encoded[header.header_len..], header.payload_len, header.mask_key)
                    .unwrap()
                    .unwrap();
            assert_eq!(decoded, payload, "len {len}");
        }
    }

    #[test]
    fn test_length_class_boundaries() {
        assert_eq!(encode_with_mask(Opcode::Text, &[0; 125], KEY)[1], 0x80 | 125);
        assert_eq!(encode_with_mask(Opcode::Text, &[0; 126], KEY)[1], 0x80 | 126);
        assert_eq!(encode_with_mask(Opcode::Text, &[0; 65535], KEY)[1], 0x80 | 126);
        assert_eq!(encode_with_mask(Opcode::Text, &[0; 65536], KEY)[1], 0x80 | 127);
    }

    #[test]
    fn test_mask_is_involution() {
        let payloads: [&[u8]; 4] = [b"", b"a", b"hello websocket", &[0xff; 33]];
        for payload in payloads {
            for key in [[0, 0, 0, 0], KEY, [0xff, 0x00, 0xaa, 0x55]] {
                assert_eq!(mask(key, &mask(key, payload)), payload);
            }
        }
    }

    #[test]
    fn test_encode_sets_fin_and_mask() {
        let encoded = encode_with_mask(Opcode::Pong, b"", KEY);
        assert_eq!(encoded, vec![0x8A, 0x80, KEY[0], KEY[1], KEY[2], KEY[3]]);
    }

    #[test]
    fn test_encode_masks_payload() {
        let encoded = encode_with_mask(Opcode::Text, b"Hi", KEY);
        assert_eq!(&encoded[2..6], &KEY);
        assert_eq!(encoded[6], b'H' ^ KEY[0]);
        assert_eq!(encoded[7], b'i' ^ KEY[1]);
    }

    #[test]
    fn test_decode_header_needs_more_data() {
        assert_eq!(decode_header(&[]).unwrap(), None);
        assert_eq!(decode_header(&[0x81]).unwrap(), None);
        // 16-bit length announced but missing
        assert_eq!(decode_header(&[0x81, 126, 0x01]).unwrap(), None);
        // 64-bit length announced but missing
        assert_eq!(decode_header(&[0x81, 127, 0, 0, 0]).unwrap(), None);
        // Mask announced but key incomplete
        assert_eq!(decode_header(&[0x81, 0x85, 1, 2]).unwrap(), None);
    }

    #[test]
    fn test_decode_header_rejects_reserved_bits() {
        let result = decode_header(&[0xC1, 0x00]);
        assert!(matches!(result, Err(FrameError::ReservedBits(0x40))));
    }

    #[test]
    fn test_decoder_byte_by_byte() {
        let frame = unmasked(Opcode::Text, b"{\"event\":\"update\"}");
        let mut decoder = FrameDecoder::new();

        for (i, byte) in frame.iter().enumerate() {
            decoder.push(&[*byte]);
            let decoded = decoder.decode().unwrap();
            if i + 1 < frame.len() {
                assert!(decoded.is_none(), "frame completed early at byte {i}");
            } else {
                let decoded = decoded.unwrap();
                assert_eq!(decoded.opcode, Opcode::Text);
                assert_eq!(decoded.text().unwrap(), "{\"event\":\"update\"}");
            }
        }
    }

    #[test]
    fn test_decoder_keeps_header_across_partial_payload() {
        let payload = vec![b'x'; 300];
        let frame = unmasked(Opcode::Text, &payload);
        let mut decoder = FrameDecoder::new();

        decoder.push(&frame[..10]);
        assert!(decoder.decode().unwrap().is_none());
        assert!(decoder.has_partial_frame());

        decoder.push(&frame[10..]);
        let decoded = decoder.decode().unwrap().unwrap();
        assert_eq!(decoded.payload, payload);
        assert!(!decoder.has_partial_frame());
    }

    #[test]
    fn test_decoder_multiple_frames_in_one_push() {
        let mut bytes = unmasked(Opcode::Ping, b"");
        bytes.extend(unmasked(Opcode::Text, b"one"));
        bytes.extend(unmasked(Opcode::Text, b"two"));

        let mut decoder = FrameDecoder::new();
        decoder.push(&bytes);

        assert_eq!(decoder.decode().unwrap().unwrap().opcode, Opcode::Ping);
        assert_eq!(decoder.decode().unwrap().unwrap().payload, b"one");
        assert_eq!(decoder.decode().unwrap().unwrap().payload, b"two");
        assert!(decoder.decode().unwrap().is_none());
        assert_eq!(decoder.available(), 0);
    }

    #[test]
    fn test_decoder_unmasks_client_frames() {
        let encoded = encode_with_mask(Opcode::Text, b"masked text", KEY);
        let mut decoder = FrameDecoder::new();
        decoder.push(&encoded);
        assert_eq!(decoder.decode().unwrap().unwrap().payload, b"masked text");
    }

    #[test]
    fn test_decoder_rejects_oversized_payload() {
        let mut decoder = FrameDecoder::with_max_payload(16);
        decoder.push(&unmasked(Opcode::Text, &[0u8; 17]));
        assert!(matches!(
            decoder.decode(),
            Err(FrameError::PayloadTooLarge { declared: 17, max: 16 })
        ));
    }

    #[test]
    fn test_non_fin_continuation_is_reported() {
        let mut decoder = FrameDecoder::new();
        decoder.push(&[0x01, 0x02, b'a', b'b']);
        decoder.push(&[0x80, 0x01, b'c']);

        let first = decoder.decode().unwrap().unwrap();
        assert!(!first.fin);
        assert_eq!(first.opcode, Opcode::Text);

        let second = decoder.decode().unwrap().unwrap();
        assert!(second.fin);
        assert_eq!(second.opcode, Opcode::Continuation);
    }

    #[test]
    fn test_opcode_mapping() {
        for op in [
            Opcode::Continuation,
            Opcode::Text,
            Opcode::Binary,
            Opcode::Close,
            Opcode::Ping,
            Opcode::Pong,
        ] {
            assert_eq!(Opcode::from_u8(op.as_u8()), op);
        }
        assert_eq!(Opcode::from_u8(0x3), Opcode::Reserved(0x3));
        assert!(Opcode::Ping.is_control());
        assert!(!Opcode::Text.is_control());
    }
}
