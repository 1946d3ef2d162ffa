//! Protocol error types.

use thiserror::Error;

/// Errors that can occur while framing or decoding dongle messages.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    /// An escape byte was followed by something other than the two legal
    /// escape codes.
    #[error("invalid escape sequence: 0x7D followed by 0x{0:02X}")]
    InvalidEscape(u8),

    /// The byte stream ended in the middle of an escape sequence.
    #[error("truncated escape sequence")]
    TruncatedEscape,

    /// The CRC trailer did not match the frame contents.
    #[error("CRC mismatch: expected 0x{expected:04X}, got 0x{actual:04X}")]
    CrcMismatch {
        /// CRC computed over the received frame body.
        expected: u16,
        /// CRC carried in the frame trailer.
        actual: u16,
    },

    /// A frame payload exceeds the 16-bit length field.
    #[error("frame payload too long: maximum {max} bytes, got {actual}")]
    PayloadTooLong {
        /// Maximum allowed length.
        max: usize,
        /// Actual payload length.
        actual: usize,
    },

    /// A decoded frame did not carry the message type that was expected.
    #[error("unexpected message type: expected 0x{expected:02X}, got 0x{actual:02X}")]
    UnexpectedType {
        /// Message type required by the caller.
        expected: u8,
        /// Message type found in the frame.
        actual: u8,
    },

    /// A decoded frame's payload length does not match the message variant.
    #[error("invalid payload size for message 0x{message_type:02X}: expected {expected}, got {actual}")]
    PayloadSize {
        /// Message type code of the frame.
        message_type: u8,
        /// Payload width the variant requires.
        expected: usize,
        /// Payload width found in the frame.
        actual: usize,
    },

    /// The frame type byte is not part of the protocol.
    #[error("unknown message type: 0x{0:02X}")]
    UnknownType(u8),
}
