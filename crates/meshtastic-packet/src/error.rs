//! Packet error types.

use thiserror::Error;

/// Errors that can occur when encoding or decoding mesh packets.
#[derive(Error, Debug)]
pub enum PacketError {
    /// The raw bytes are shorter than the mandatory header.
    #[error("packet too short: expected at least {expected} bytes, got {actual}")]
    TooShort {
        /// Minimum length required.
        expected: usize,
        /// Actual length received.
        actual: usize,
    },

    /// The channel hash in the header does not belong to this channel.
    ///
    /// This is the normal outcome of probing a packet against a channel
    /// it was not sent on; callers try the next channel.
    #[error("channel hash mismatch: expected 0x{expected:02X}, got 0x{actual:02X}")]
    ChannelMismatch {
        /// Hash of the channel attempting the decode.
        expected: u8,
        /// Hash carried in the packet header.
        actual: u8,
    },

    /// The decrypted payload is not a valid `Data` protobuf.
    #[error("payload decode failed: {0}")]
    PayloadDecode(#[from] prost::DecodeError),
}
