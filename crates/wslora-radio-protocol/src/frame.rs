//! Frame encoding/decoding utilities.
//!
//! Every message travels inside a frame delimited by [`START`] and
//! protected by a CRC-16 trailer:
//!
//! ```text
//! +-------+------------------------------------------------------+
//! | START | escape( type | len_lo | len_hi | payload | crc_le )  |
//! +-------+------------------------------------------------------+
//! ```
//!
//! Inside the escaped region a literal `0xAA` is sent as `0x7D 0x8A` and a
//! literal `0x7D` as `0x7D 0x5D`. The CRC is computed over the unescaped
//! `type | length | payload` bytes and is escaped like any other data.

use bytes::{Buf, BytesMut};

use crate::constants::{ESCAPE, ESCAPE_ESCAPE, ESCAPE_START, MAX_PAYLOAD_SIZE, START};
use crate::error::ProtocolError;

/// A raw protocol frame: one type byte and an opaque payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    /// Message type code (see the `MSG_*` constants).
    pub frame_type: u8,
    /// Message payload, at most [`MAX_PAYLOAD_SIZE`] bytes.
    pub payload: Vec<u8>,
}

impl Frame {
    /// Create a frame from a type code and payload bytes.
    pub fn new(frame_type: u8, payload: Vec<u8>) -> Self {
        Frame { frame_type, payload }
    }
}

/// Update a CRC-16 (polynomial x^16 + x^12 + x^3 + x + 1, init 0) over
/// `data`, starting from `crc`.
pub fn crc16(crc: u16, data: &[u8]) -> u16 {
    let mut crc = crc;
    for &b in data {
        let a = (crc >> 8) ^ u16::from(b);
        crc = (a << 2) ^ (a << 1) ^ a ^ (crc << 8);
    }
    crc
}

/// Byte-stuff `data` so that neither [`START`] nor [`ESCAPE`] appears in
/// the clear.
pub fn escape(data: &[u8]) -> Vec<u8> {
    let mut escaped = Vec::with_capacity(data.len());
    for &b in data {
        match b {
            START => {
                escaped.push(ESCAPE);
                escaped.push(ESCAPE_START);
            }
            ESCAPE => {
                escaped.push(ESCAPE);
                escaped.push(ESCAPE_ESCAPE);
            }
            _ => escaped.push(b),
        }
    }
    escaped
}

/// Reverse [`escape`]. Fails on a truncated pair or an escape followed by
/// anything other than the two legal escape codes.
pub fn unescape(data: &[u8]) -> Result<Vec<u8>, ProtocolError> {
    let mut unescaped = Vec::with_capacity(data.len());
    let mut iter = data.iter();
    while let Some(&b) = iter.next() {
        if b != ESCAPE {
            unescaped.push(b);
            continue;
        }
        match iter.next() {
            Some(&ESCAPE_START) => unescaped.push(START),
            Some(&ESCAPE_ESCAPE) => unescaped.push(ESCAPE),
            Some(&other) => return Err(ProtocolError::InvalidEscape(other)),
            None => return Err(ProtocolError::TruncatedEscape),
        }
    }
    Ok(unescaped)
}

/// Serialize a frame to its on-wire byte form.
pub fn encode_frame(frame: &Frame) -> Result<Vec<u8>, ProtocolError> {
    if frame.payload.len() > MAX_PAYLOAD_SIZE {
        return Err(ProtocolError::PayloadTooLong {
            max: MAX_PAYLOAD_SIZE,
            actual: frame.payload.len(),
        });
    }

    let mut body = Vec::with_capacity(frame.payload.len() + 5);
    body.push(frame.frame_type);
    body.extend_from_slice(&(frame.payload.len() as u16).to_le_bytes());
    body.extend_from_slice(&frame.payload);

    let crc = crc16(0, &body);
    body.extend_from_slice(&crc.to_le_bytes());

    let mut wire = Vec::with_capacity(body.len() + 1);
    wire.push(START);
    wire.extend_from_slice(&escape(&body));
    Ok(wire)
}

/// An incremental frame parser.
///
/// Bytes are fed in as they arrive with [`push`](Self::push) and complete
/// frames are pulled out with [`decode`](Self::decode). Garbage before a
/// start byte is discarded; an incomplete frame stays buffered until more
/// bytes arrive, so read timeouts are the caller's concern, not the
/// decoder's.
#[derive(Debug, Default)]
pub struct FrameDecoder {
    /// Buffer for accumulating incoming raw (still escaped) data.
    buffer: BytesMut,
}

impl FrameDecoder {
    /// Create a new frame decoder.
    pub fn new() -> Self {
        FrameDecoder {
            buffer: BytesMut::with_capacity(512),
        }
    }

    /// Add received data to the buffer.
    pub fn push(&mut self, data: &[u8]) {
        self.buffer.extend_from_slice(data);
    }

    /// Try to decode a complete frame from the buffer.
    ///
    /// Returns `Ok(Some(frame))` when a complete, CRC-valid frame is
    /// available, `Ok(None)` when more data is needed, and `Err` on a
    /// format error. After an error the offending bytes have been
    /// discarded and the decoder resynchronizes on the next start byte.
    pub fn decode(&mut self) -> Result<Option<Frame>, ProtocolError> {
        // Skip anything before the start-of-frame delimiter.
        while !self.buffer.is_empty() && self.buffer[0] != START {
            self.buffer.advance(1);
        }
        if self.buffer.is_empty() {
            return Ok(None);
        }

        // Unescape the region after START until the body (type, length,
        // payload, CRC) is complete. `raw` tracks consumed escaped bytes.
        let mut body: Vec<u8> = Vec::new();
        let mut raw = 1usize;
        let mut needed = 5usize;

        while body.len() < needed {
            if raw >= self.buffer.len() {
                return Ok(None);
            }
            let b = self.buffer[raw];
            if b == ESCAPE {
                if raw + 1 >= self.buffer.len() {
                    // Second half of the escape pair not here yet.
                    return Ok(None);
                }
                let follow = self.buffer[raw + 1];
                let literal = match follow {
                    ESCAPE_START => START,
                    ESCAPE_ESCAPE => ESCAPE,
                    other => {
                        self.buffer.advance(raw + 2);
                        return Err(ProtocolError::InvalidEscape(other));
                    }
                };
                body.push(literal);
                raw += 2;
            } else {
                body.push(b);
                raw += 1;
            }

            if body.len() == 3 {
                let len = u16::from_le_bytes([body[1], body[2]]) as usize;
                needed = 3 + len + 2;
            }
        }

        // The frame is complete either way; consume it before judging it.
        self.buffer.advance(raw);

        let actual = u16::from_le_bytes([body[needed - 2], body[needed - 1]]);
        let expected = crc16(0, &body[..needed - 2]);
        if expected != actual {
            return Err(ProtocolError::CrcMismatch { expected, actual });
        }

        Ok(Some(Frame {
            frame_type: body[0],
            payload: body[3..needed - 2].to_vec(),
        }))
    }

    /// Get the number of buffered bytes.
    pub fn buffered_len(&self) -> usize {
        self.buffer.len()
    }

    /// Clear the buffer.
    pub fn clear(&mut self) {
        self.buffer.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn decode_one(wire: &[u8]) -> Result<Option<Frame>, ProtocolError> {
        let mut decoder = FrameDecoder::new();
        decoder.push(wire);
        decoder.decode()
    }

    #[test]
    fn test_crc16_known_values() {
        assert_eq!(crc16(0, &[]), 0);
        // Incremental updates must equal the one-shot computation.
        let data = [0x91u8, 0x05, 0x00, 0x01, 0x02, 0x03, 0x04, 0x05];
        let mut incremental = 0u16;
        for b in data {
            incremental = crc16(incremental, &[b]);
        }
        assert_eq!(incremental, crc16(0, &data));
    }

    #[test]
    fn test_escape_unescape_roundtrip() {
        let data = [0x00, START, 0x12, ESCAPE, ESCAPE, START, 0xFF];
        let escaped = escape(&data);
        assert!(!escaped.iter().any(|&b| b == START));
        assert_eq!(unescape(&escaped).unwrap(), data);
    }

    #[test]
    fn test_unescape_rejects_bad_follow_byte() {
        assert_eq!(
            unescape(&[ESCAPE, 0x42]),
            Err(ProtocolError::InvalidEscape(0x42))
        );
        assert_eq!(unescape(&[0x01, ESCAPE]), Err(ProtocolError::TruncatedEscape));
    }

    #[test]
    fn test_frame_roundtrip() {
        // 37-byte payload with escape-sensitive bytes sprinkled in.
        let payload: Vec<u8> = (0..37u8)
            .map(|i| match i % 5 {
                0 => START,
                1 => ESCAPE,
                _ => i.wrapping_mul(7).wrapping_add(13),
            })
            .collect();
        let frame = Frame::new(0x91, payload);

        let wire = encode_frame(&frame).unwrap();
        let decoded = decode_one(&wire).unwrap().expect("complete frame");
        assert_eq!(decoded, frame);
    }

    #[test]
    fn test_empty_and_long_payloads_roundtrip() {
        for len in [0usize, 255] {
            let frame = Frame::new(0x0A, vec![0x55; len]);
            let wire = encode_frame(&frame).unwrap();
            let decoded = decode_one(&wire).unwrap().expect("complete frame");
            assert_eq!(decoded, frame);
        }
    }

    #[test]
    fn test_decoder_skips_garbage_before_start() {
        let frame = Frame::new(0x81, vec![1, 2, 3]);
        let mut wire = vec![0x00, 0x13, 0x37];
        wire.extend_from_slice(&encode_frame(&frame).unwrap());

        let decoded = decode_one(&wire).unwrap().expect("complete frame");
        assert_eq!(decoded, frame);
    }

    #[test]
    fn test_decoder_handles_split_input() {
        let frame = Frame::new(0x92, vec![0xAA, 0x7D, 0x01, 0x02]);
        let wire = encode_frame(&frame).unwrap();

        let mut decoder = FrameDecoder::new();
        for chunk in wire.chunks(3) {
            decoder.push(chunk);
        }
        // Feeding byte by byte must never produce a frame early.
        let mut byte_decoder = FrameDecoder::new();
        for &b in &wire[..wire.len() - 1] {
            byte_decoder.push(&[b]);
            assert_eq!(byte_decoder.decode().unwrap(), None);
        }
        byte_decoder.push(&wire[wire.len() - 1..]);

        assert_eq!(decoder.decode().unwrap(), Some(frame.clone()));
        assert_eq!(byte_decoder.decode().unwrap(), Some(frame));
    }

    #[test]
    fn test_decoder_truncated_frame_waits_for_more() {
        // Declared length exceeds what was actually sent: the decoder must
        // keep waiting rather than produce anything.
        let frame = Frame::new(0x91, vec![9; 40]);
        let wire = encode_frame(&frame).unwrap();
        let mut decoder = FrameDecoder::new();
        decoder.push(&wire[..wire.len() / 2]);
        assert_eq!(decoder.decode().unwrap(), None);
        assert_eq!(decoder.decode().unwrap(), None);
    }

    #[test]
    fn test_decoder_crc_mismatch_then_resync() {
        let good = Frame::new(0x85, vec![2, 3, 0x14, 3]);
        let mut corrupted = encode_frame(&good).unwrap();
        // Flip a payload bit; the byte is not escape-sensitive.
        corrupted[5] ^= 0x01;

        let mut decoder = FrameDecoder::new();
        decoder.push(&corrupted);
        decoder.push(&encode_frame(&good).unwrap());

        assert!(matches!(
            decoder.decode(),
            Err(ProtocolError::CrcMismatch { .. })
        ));
        // The following intact frame still decodes.
        assert_eq!(decoder.decode().unwrap(), Some(good));
    }

    #[test]
    fn test_decoder_bad_escape_resyncs() {
        let mut decoder = FrameDecoder::new();
        decoder.push(&[START, ESCAPE, 0x42]);
        assert_eq!(decoder.decode(), Err(ProtocolError::InvalidEscape(0x42)));

        let frame = Frame::new(0x90, vec![]);
        decoder.push(&encode_frame(&frame).unwrap());
        assert_eq!(decoder.decode().unwrap(), Some(frame));
    }

    #[test]
    fn test_encode_rejects_oversized_payload() {
        let frame = Frame::new(0x0A, vec![0; MAX_PAYLOAD_SIZE + 1]);
        assert!(matches!(
            encode_frame(&frame),
            Err(ProtocolError::PayloadTooLong { .. })
        ));
    }
}
