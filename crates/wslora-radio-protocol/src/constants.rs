//! Protocol constants
//!
//! These constants define the framing bytes, message type codes, and the
//! device-specific LoRa parameter encodings used by the Waveshare SX1262
//! USB dongle serial protocol.

// ============================================================================
// Framing
// ============================================================================

/// Start-of-frame delimiter.
pub const START: u8 = 0xAA;
/// Escape introducer inside the framed region.
pub const ESCAPE: u8 = 0x7D;
/// Escaped form of a literal start byte (`ESCAPE ESCAPE_START`).
pub const ESCAPE_START: u8 = 0x8A;
/// Escaped form of a literal escape byte (`ESCAPE ESCAPE_ESCAPE`).
pub const ESCAPE_ESCAPE: u8 = 0x5D;

/// Serial line rate the dongle enumerates at (8N1).
pub const DEFAULT_BAUD_RATE: u32 = 115_200;

/// Maximum frame payload size (the length field is 16 bits).
pub const MAX_PAYLOAD_SIZE: usize = u16::MAX as usize;

// ============================================================================
// Request Codes (host → dongle)
// ============================================================================

/// Query firmware version.
pub const MSG_GET_VERSION: u8 = 0x01;
/// Set LoRa modulation parameters (SF, BW, CR, low data rate).
pub const MSG_SET_LORA_PARAMS: u8 = 0x02;
/// Set LoRa packet parameters (preamble, header mode, sync word, CRC, IQ).
pub const MSG_SET_LORA_PACKET: u8 = 0x03;
/// Set receiver parameters (RX boost).
pub const MSG_SET_RX_PARAMS: u8 = 0x04;
/// Set transmitter PA parameters (duty cycle, HP max, power, ramp).
pub const MSG_SET_TX_PARAMS: u8 = 0x05;
/// Set carrier frequency in Hz.
pub const MSG_SET_FREQUENCY: u8 = 0x06;
/// Set the RX/TX fallback mode.
pub const MSG_SET_FALLBACK_MODE: u8 = 0x07;
/// Read the instantaneous RSSI.
pub const MSG_GET_RSSI: u8 = 0x08;
/// Switch to RX mode (timeout 0 = continuous).
pub const MSG_SET_RX: u8 = 0x09;
/// Transmit a packet.
pub const MSG_SET_TX: u8 = 0x0A;
/// Enter standby mode.
pub const MSG_SET_STANDBY: u8 = 0x0B;

// ============================================================================
// Response Codes (dongle → host)
// ============================================================================

/// Firmware version.
pub const MSG_VERSION: u8 = 0x81;
/// LoRa modulation parameters echo.
pub const MSG_LORA_PARAMS: u8 = 0x82;
/// LoRa packet parameters echo.
pub const MSG_LORA_PACKET: u8 = 0x83;
/// Receiver parameters echo.
pub const MSG_RX_PARAMS: u8 = 0x84;
/// Transmitter parameters echo.
pub const MSG_TX_PARAMS: u8 = 0x85;
/// Carrier frequency echo.
pub const MSG_FREQUENCY: u8 = 0x86;
/// Fallback mode echo.
pub const MSG_FALLBACK_MODE: u8 = 0x87;
/// Instantaneous RSSI reading.
pub const MSG_RSSI: u8 = 0x88;
/// RX mode acknowledgement.
pub const MSG_RX: u8 = 0x89;
/// Transmit acknowledgement (carries the busy flag).
pub const MSG_TX: u8 = 0x8A;
/// Standby acknowledgement.
pub const MSG_STANDBY: u8 = 0x8B;

// ============================================================================
// Event Codes (dongle → host, unsolicited)
// ============================================================================

/// RX or TX timed out.
pub const MSG_TIMEOUT: u8 = 0x90;
/// A packet was received over the air.
pub const MSG_PACKET_RECEIVED: u8 = 0x91;
/// A packet finished transmitting.
pub const MSG_PACKET_TRANSMITTED: u8 = 0x92;
/// Periodic RSSI sample while in RX.
pub const MSG_CONTINUOUS_RSSI: u8 = 0x93;
/// Free-form log text from the dongle firmware.
pub const MSG_LOGGING: u8 = 0x9F;

// ============================================================================
// Power Ramp Times
// ============================================================================

/// 10 µs PA ramp.
pub const POWER_RAMP_10: u8 = 0x00;
/// 20 µs PA ramp.
pub const POWER_RAMP_20: u8 = 0x01;
/// 40 µs PA ramp.
pub const POWER_RAMP_40: u8 = 0x02;
/// 80 µs PA ramp.
pub const POWER_RAMP_80: u8 = 0x03;
/// 200 µs PA ramp.
pub const POWER_RAMP_200: u8 = 0x04;
/// 800 µs PA ramp.
pub const POWER_RAMP_800: u8 = 0x05;
/// 1700 µs PA ramp.
pub const POWER_RAMP_1700: u8 = 0x06;
/// 3400 µs PA ramp.
pub const POWER_RAMP_3400: u8 = 0x07;
