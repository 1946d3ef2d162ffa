//! Error types for the node daemon.

use thiserror::Error;

/// Result type alias for node operations.
pub type Result<T> = std::result::Result<T, NodeError>;

/// Main error type for the node daemon.
#[derive(Error, Debug)]
pub enum NodeError {
    /// Serial protocol framing or codec failure.
    #[error("protocol error: {0}")]
    Protocol(#[from] wslora_radio_protocol::ProtocolError),

    /// Mesh packet codec failure.
    #[error("packet error: {0}")]
    Packet(#[from] meshtastic_packet::PacketError),

    /// Serial port failure.
    #[error("serial port error: {0}")]
    Serial(#[from] serialport::Error),

    /// Underlying I/O failure.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// A read or a request wait ran out of time.
    #[error("timeout")]
    Timeout,

    /// The dongle refused a transmission because it is busy.
    #[error("radio is busy")]
    RadioBusy,

    /// The configured TX power has no PA table entry.
    #[error("unsupported TX power {0} dBm (supported: 14, 17, 20, 22)")]
    UnsupportedPower(i32),

    /// The dongle echoed a different frequency than requested.
    #[error("frequency mismatch: requested {requested} Hz, device reports {echoed} Hz")]
    FrequencyMismatch {
        /// Frequency the node asked for.
        requested: u32,
        /// Frequency the dongle echoed back.
        echoed: u32,
    },

    /// An outbound message referenced a channel the node does not have.
    #[error("node does not have channel id {0}")]
    UnknownChannel(u32),

    /// The node configuration is invalid.
    #[error("configuration error: {0}")]
    Config(String),

    /// The message bus refused an operation.
    #[error("bus error: {0}")]
    Bus(String),

    /// The client or node has shut down.
    #[error("connection closed")]
    Closed,
}
