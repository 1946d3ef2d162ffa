//! Typed API messages exchanged with the dongle.
//!
//! Requests encode into [`Frame`]s with the low-range type codes; the
//! dongle answers with the matching high-range code, and pushes
//! [`Event`]s with the `0x90..=0x9F` codes on its own initiative. All
//! multi-byte integers are little-endian; booleans are one byte, `0x00`
//! or `0x01`.

use crate::constants::*;
use crate::error::ProtocolError;
use crate::frame::Frame;

// ============================================================================
// LoRa parameter value types
// ============================================================================

/// A LoRa spreading factor, SF5 through SF12, passed to the device as its
/// numeric value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SpreadingFactor(u8);

impl SpreadingFactor {
    /// Construct from the numeric spreading factor. Values outside 5..=12
    /// are not representable on the device.
    pub fn new(sf: u8) -> Option<Self> {
        (5..=12).contains(&sf).then_some(SpreadingFactor(sf))
    }

    /// The on-wire byte (identical to the numeric SF).
    pub fn as_byte(self) -> u8 {
        self.0
    }
}

/// LoRa channel bandwidth. The discriminants are the device-specific
/// register encodings, which are not ordered by width.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Bandwidth {
    /// 7.81 kHz
    Khz7 = 0,
    /// 10.42 kHz
    Khz10 = 8,
    /// 15.63 kHz
    Khz15 = 1,
    /// 20.83 kHz
    Khz20 = 9,
    /// 31.25 kHz
    Khz31 = 2,
    /// 41.67 kHz
    Khz41 = 10,
    /// 62.5 kHz
    Khz62 = 3,
    /// 125 kHz
    Khz125 = 4,
    /// 250 kHz
    Khz250 = 5,
    /// 500 kHz
    Khz500 = 6,
}

impl Bandwidth {
    /// Map a configured bandwidth in kHz (rounded down, as in the
    /// configuration file) to the device encoding.
    pub fn from_khz(khz: u32) -> Option<Self> {
        match khz {
            7 => Some(Bandwidth::Khz7),
            10 => Some(Bandwidth::Khz10),
            15 => Some(Bandwidth::Khz15),
            20 => Some(Bandwidth::Khz20),
            31 => Some(Bandwidth::Khz31),
            41 => Some(Bandwidth::Khz41),
            62 => Some(Bandwidth::Khz62),
            125 => Some(Bandwidth::Khz125),
            250 => Some(Bandwidth::Khz250),
            500 => Some(Bandwidth::Khz500),
            _ => None,
        }
    }

    /// The on-wire byte.
    pub fn as_byte(self) -> u8 {
        self as u8
    }
}

/// LoRa forward error correction coding rate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum CodingRate {
    /// 4/5
    Cr4_5 = 0x01,
    /// 4/6
    Cr4_6 = 0x02,
    /// 4/7
    Cr4_7 = 0x03,
    /// 4/8
    Cr4_8 = 0x04,
}

impl CodingRate {
    /// Parse the "4/x" notation used in configuration files.
    pub fn from_ratio(s: &str) -> Option<Self> {
        match s {
            "4/5" => Some(CodingRate::Cr4_5),
            "4/6" => Some(CodingRate::Cr4_6),
            "4/7" => Some(CodingRate::Cr4_7),
            "4/8" => Some(CodingRate::Cr4_8),
            _ => None,
        }
    }

    /// The on-wire byte.
    pub fn as_byte(self) -> u8 {
        self as u8
    }
}

/// The radio state the device falls back to after completing RX or TX.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum FallbackMode {
    /// Standby with the 13 MHz RC oscillator.
    StandbyRc = 0x20,
    /// Standby with the crystal oscillator running.
    StandbyXosc = 0x30,
    /// Standby with the crystal oscillator, then re-enter RX.
    StandbyXoscRx = 0x31,
    /// Frequency synthesis mode.
    Fs = 0x40,
}

/// Standby sub-mode for the explicit standby request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum StandbyMode {
    /// RC oscillator.
    Rc = 0x00,
    /// Crystal oscillator.
    Xosc = 0x01,
}

/// LoRa modulation parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LoRaParams {
    /// Spreading factor.
    pub spreading_factor: SpreadingFactor,
    /// Channel bandwidth.
    pub bandwidth: Bandwidth,
    /// Coding rate.
    pub coding_rate: CodingRate,
    /// Low data rate optimization.
    pub low_data_rate: bool,
}

/// LoRa packet parameters.
///
/// Implemented in the codec for completeness; the dongle's power-on
/// defaults match the Meshtastic air format, so startup does not set them.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PacketParams {
    /// Preamble length in symbols.
    pub preamble_length: u16,
    /// Implicit (fixed-length) header mode.
    pub implicit_header: bool,
    /// Sync word.
    pub sync_word: u8,
    /// Append/verify the payload CRC.
    pub crc_on: bool,
    /// Invert the IQ signals.
    pub invert_iq: bool,
}

/// PA configuration for the transmitter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TxParams {
    /// PA duty cycle register value.
    pub duty_cycle: u8,
    /// HP max register value.
    pub hp_max: u8,
    /// Output power register value.
    pub power: u8,
    /// PA ramp time (one of the `POWER_RAMP_*` constants).
    pub ramp_time: u8,
}

// ============================================================================
// Requests
// ============================================================================

/// Requests that can be sent to the dongle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Request {
    /// Query the firmware version.
    GetVersion,

    /// Set LoRa modulation parameters.
    SetLoRaParams(LoRaParams),

    /// Set LoRa packet parameters.
    SetPacketParams(PacketParams),

    /// Set receiver parameters.
    SetRxParams {
        /// Enable the RX boosted-gain mode.
        rx_boost: bool,
    },

    /// Set transmitter PA parameters.
    SetTxParams(TxParams),

    /// Set the carrier frequency.
    SetFrequency {
        /// Frequency in Hz.
        frequency_hz: u32,
    },

    /// Set the RX/TX fallback mode.
    SetFallbackMode(FallbackMode),

    /// Read the instantaneous RSSI.
    GetRssi,

    /// Switch to RX mode.
    SetRx {
        /// RX timeout in milliseconds; 0 means continuous receive.
        timeout_ms: u32,
        /// Enable the unsolicited RSSI sample stream.
        continuous_rssi: bool,
    },

    /// Transmit a packet.
    Transmit {
        /// TX timeout in milliseconds.
        timeout_ms: u32,
        /// Raw packet bytes.
        data: Vec<u8>,
    },

    /// Enter standby.
    SetStandby(StandbyMode),
}

fn bool_byte(b: bool) -> u8 {
    u8::from(b)
}

impl Request {
    /// Get the request type code.
    pub fn code(&self) -> u8 {
        match self {
            Request::GetVersion => MSG_GET_VERSION,
            Request::SetLoRaParams(_) => MSG_SET_LORA_PARAMS,
            Request::SetPacketParams(_) => MSG_SET_LORA_PACKET,
            Request::SetRxParams { .. } => MSG_SET_RX_PARAMS,
            Request::SetTxParams(_) => MSG_SET_TX_PARAMS,
            Request::SetFrequency { .. } => MSG_SET_FREQUENCY,
            Request::SetFallbackMode(_) => MSG_SET_FALLBACK_MODE,
            Request::GetRssi => MSG_GET_RSSI,
            Request::SetRx { .. } => MSG_SET_RX,
            Request::Transmit { .. } => MSG_SET_TX,
            Request::SetStandby(_) => MSG_SET_STANDBY,
        }
    }

    /// The type code of the response the dongle pairs with this request.
    pub fn response_code(&self) -> u8 {
        self.code() | 0x80
    }

    /// Encode the request into a frame.
    pub fn encode(&self) -> Frame {
        let payload = match self {
            Request::GetVersion | Request::GetRssi => Vec::new(),

            Request::SetLoRaParams(params) => vec![
                params.spreading_factor.as_byte(),
                params.bandwidth.as_byte(),
                params.coding_rate.as_byte(),
                bool_byte(params.low_data_rate),
            ],

            Request::SetPacketParams(params) => {
                let mut buf = Vec::with_capacity(6);
                buf.extend_from_slice(&params.preamble_length.to_le_bytes());
                buf.push(bool_byte(params.implicit_header));
                buf.push(params.sync_word);
                buf.push(bool_byte(params.crc_on));
                buf.push(bool_byte(params.invert_iq));
                buf
            }

            Request::SetRxParams { rx_boost } => vec![bool_byte(*rx_boost)],

            Request::SetTxParams(params) => vec![
                params.duty_cycle,
                params.hp_max,
                params.power,
                params.ramp_time,
            ],

            Request::SetFrequency { frequency_hz } => frequency_hz.to_le_bytes().to_vec(),

            Request::SetFallbackMode(mode) => vec![*mode as u8],

            Request::SetRx {
                timeout_ms,
                continuous_rssi,
            } => {
                let mut buf = Vec::with_capacity(5);
                buf.extend_from_slice(&timeout_ms.to_le_bytes());
                buf.push(bool_byte(*continuous_rssi));
                buf
            }

            Request::Transmit { timeout_ms, data } => {
                let mut buf = Vec::with_capacity(4 + data.len());
                buf.extend_from_slice(&timeout_ms.to_le_bytes());
                buf.extend_from_slice(data);
                buf
            }

            Request::SetStandby(mode) => vec![*mode as u8],
        };

        Frame::new(self.code(), payload)
    }
}

// ============================================================================
// Responses
// ============================================================================

/// Responses received from the dongle. Parameter-setting responses echo
/// the raw device bytes back.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Response {
    /// Firmware version.
    Version {
        /// Major version.
        major: u8,
        /// Minor version.
        minor: u8,
        /// Patch version.
        patch: u8,
    },

    /// LoRa modulation parameters echo.
    LoRaParams {
        /// Spreading factor byte.
        spreading_factor: u8,
        /// Bandwidth encoding byte.
        bandwidth: u8,
        /// Coding rate byte.
        coding_rate: u8,
        /// Low data rate optimization.
        low_data_rate: bool,
    },

    /// LoRa packet parameters echo.
    PacketParams(PacketParams),

    /// Receiver parameters echo.
    RxParams {
        /// RX boosted-gain mode.
        rx_boost: bool,
    },

    /// Transmitter parameters echo.
    TxParams(TxParams),

    /// Carrier frequency echo.
    Frequency {
        /// Frequency in Hz.
        frequency_hz: u32,
    },

    /// Fallback mode echo.
    FallbackMode {
        /// Raw mode byte.
        mode: u8,
    },

    /// Instantaneous RSSI reading.
    Rssi {
        /// Signal strength in dBm.
        rssi_dbm: i16,
    },

    /// RX mode acknowledgement.
    Rx {
        /// Echoed timeout.
        timeout_ms: u32,
        /// Echoed continuous RSSI flag.
        continuous_rssi: bool,
    },

    /// Transmit acknowledgement.
    Tx {
        /// The device refused the transmission because it is busy.
        busy: bool,
    },

    /// Standby acknowledgement.
    Standby {
        /// Raw mode byte.
        mode: u8,
    },
}

fn expect_len(frame: &Frame, expected: usize) -> Result<(), ProtocolError> {
    if frame.payload.len() != expected {
        return Err(ProtocolError::PayloadSize {
            message_type: frame.frame_type,
            expected,
            actual: frame.payload.len(),
        });
    }
    Ok(())
}

fn le_u16(bytes: &[u8]) -> u16 {
    u16::from_le_bytes([bytes[0], bytes[1]])
}

fn le_u32(bytes: &[u8]) -> u32 {
    u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]])
}

impl Response {
    /// Whether `code` is in the response range.
    pub fn is_response_code(code: u8) -> bool {
        (MSG_VERSION..=MSG_STANDBY).contains(&code)
    }

    /// Decode a response frame.
    pub fn decode(frame: &Frame) -> Result<Response, ProtocolError> {
        let p = &frame.payload;
        match frame.frame_type {
            MSG_VERSION => {
                expect_len(frame, 3)?;
                Ok(Response::Version {
                    major: p[0],
                    minor: p[1],
                    patch: p[2],
                })
            }
            MSG_LORA_PARAMS => {
                expect_len(frame, 4)?;
                Ok(Response::LoRaParams {
                    spreading_factor: p[0],
                    bandwidth: p[1],
                    coding_rate: p[2],
                    low_data_rate: p[3] != 0x00,
                })
            }
            MSG_LORA_PACKET => {
                expect_len(frame, 6)?;
                Ok(Response::PacketParams(PacketParams {
                    preamble_length: le_u16(&p[0..2]),
                    implicit_header: p[2] != 0x00,
                    sync_word: p[3],
                    crc_on: p[4] != 0x00,
                    invert_iq: p[5] != 0x00,
                }))
            }
            MSG_RX_PARAMS => {
                expect_len(frame, 1)?;
                Ok(Response::RxParams {
                    rx_boost: p[0] != 0x00,
                })
            }
            MSG_TX_PARAMS => {
                expect_len(frame, 4)?;
                Ok(Response::TxParams(TxParams {
                    duty_cycle: p[0],
                    hp_max: p[1],
                    power: p[2],
                    ramp_time: p[3],
                }))
            }
            MSG_FREQUENCY => {
                expect_len(frame, 4)?;
                Ok(Response::Frequency {
                    frequency_hz: le_u32(p),
                })
            }
            MSG_FALLBACK_MODE => {
                expect_len(frame, 1)?;
                Ok(Response::FallbackMode { mode: p[0] })
            }
            MSG_RSSI => {
                expect_len(frame, 2)?;
                Ok(Response::Rssi {
                    rssi_dbm: le_u16(p) as i16,
                })
            }
            MSG_RX => {
                expect_len(frame, 5)?;
                Ok(Response::Rx {
                    timeout_ms: le_u32(&p[0..4]),
                    continuous_rssi: p[4] != 0x00,
                })
            }
            MSG_TX => {
                expect_len(frame, 1)?;
                Ok(Response::Tx { busy: p[0] != 0x00 })
            }
            MSG_STANDBY => {
                expect_len(frame, 1)?;
                Ok(Response::Standby { mode: p[0] })
            }
            other => Err(ProtocolError::UnknownType(other)),
        }
    }
}

// ============================================================================
// Unsolicited events
// ============================================================================

/// Unsolicited messages pushed by the dongle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    /// The current RX or TX operation timed out.
    RxTxTimeout,

    /// A packet was received over the air.
    PacketReceived {
        /// RSSI of the whole packet in dBm.
        packet_rssi_dbm: i8,
        /// SNR in dB.
        snr_db: i8,
        /// RSSI of the LoRa signal after despreading, in dBm.
        signal_rssi_dbm: i8,
        /// Raw packet bytes.
        data: Vec<u8>,
    },

    /// A packet finished transmitting.
    PacketTransmitted {
        /// Time on air in milliseconds.
        time_on_air_ms: u32,
    },

    /// Periodic RSSI sample while the receiver is open.
    ContinuousRssi {
        /// Signal strength in dBm.
        rssi_dbm: i16,
    },

    /// Log text from the dongle firmware.
    Log(String),
}

impl Event {
    /// Whether `code` is in the unsolicited range.
    pub fn is_event_code(code: u8) -> bool {
        (0x90..=0x9F).contains(&code)
    }

    /// Decode an unsolicited frame.
    pub fn decode(frame: &Frame) -> Result<Event, ProtocolError> {
        let p = &frame.payload;
        match frame.frame_type {
            MSG_TIMEOUT => {
                expect_len(frame, 0)?;
                Ok(Event::RxTxTimeout)
            }
            MSG_PACKET_RECEIVED => {
                if p.len() < 3 {
                    return Err(ProtocolError::PayloadSize {
                        message_type: frame.frame_type,
                        expected: 3,
                        actual: p.len(),
                    });
                }
                Ok(Event::PacketReceived {
                    packet_rssi_dbm: p[0] as i8,
                    snr_db: p[1] as i8,
                    signal_rssi_dbm: p[2] as i8,
                    data: p[3..].to_vec(),
                })
            }
            MSG_PACKET_TRANSMITTED => {
                expect_len(frame, 4)?;
                Ok(Event::PacketTransmitted {
                    time_on_air_ms: le_u32(p),
                })
            }
            MSG_CONTINUOUS_RSSI => {
                expect_len(frame, 2)?;
                Ok(Event::ContinuousRssi {
                    rssi_dbm: le_u16(p) as i16,
                })
            }
            MSG_LOGGING => Ok(Event::Log(String::from_utf8_lossy(p).into_owned())),
            other => Err(ProtocolError::UnknownType(other)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_codes_pair_with_responses() {
        let requests = [
            Request::GetVersion,
            Request::SetFrequency { frequency_hz: 0 },
            Request::GetRssi,
            Request::SetStandby(StandbyMode::Xosc),
        ];
        for req in requests {
            assert_eq!(req.response_code(), req.code() | 0x80);
            assert!(Response::is_response_code(req.response_code()));
            assert!(!Event::is_event_code(req.response_code()));
        }
    }

    #[test]
    fn test_set_frequency_layout() {
        let frame = Request::SetFrequency {
            frequency_hz: 869_525_000,
        }
        .encode();
        assert_eq!(frame.frame_type, MSG_SET_FREQUENCY);
        assert_eq!(frame.payload, 869_525_000u32.to_le_bytes());
    }

    #[test]
    fn test_set_lora_params_layout() {
        let params = LoRaParams {
            spreading_factor: SpreadingFactor::new(11).unwrap(),
            bandwidth: Bandwidth::Khz250,
            coding_rate: CodingRate::Cr4_8,
            low_data_rate: false,
        };
        let frame = Request::SetLoRaParams(params).encode();
        assert_eq!(frame.frame_type, MSG_SET_LORA_PARAMS);
        assert_eq!(frame.payload, vec![0x0B, 5, 4, 0x00]);
    }

    #[test]
    fn test_set_rx_layout() {
        let frame = Request::SetRx {
            timeout_ms: 0,
            continuous_rssi: true,
        }
        .encode();
        assert_eq!(frame.frame_type, MSG_SET_RX);
        assert_eq!(frame.payload, vec![0, 0, 0, 0, 0x01]);
    }

    #[test]
    fn test_transmit_layout() {
        let frame = Request::Transmit {
            timeout_ms: 5000,
            data: vec![0xDE, 0xAD],
        }
        .encode();
        assert_eq!(frame.frame_type, MSG_SET_TX);
        let mut expected = 5000u32.to_le_bytes().to_vec();
        expected.extend_from_slice(&[0xDE, 0xAD]);
        assert_eq!(frame.payload, expected);
    }

    #[test]
    fn test_decode_version_response() {
        let frame = Frame::new(MSG_VERSION, vec![1, 4, 2]);
        assert_eq!(
            Response::decode(&frame).unwrap(),
            Response::Version {
                major: 1,
                minor: 4,
                patch: 2
            }
        );
    }

    #[test]
    fn test_decode_rejects_wrong_payload_size() {
        let frame = Frame::new(MSG_VERSION, vec![1, 4]);
        assert!(matches!(
            Response::decode(&frame),
            Err(ProtocolError::PayloadSize {
                message_type: MSG_VERSION,
                expected: 3,
                actual: 2
            })
        ));
    }

    #[test]
    fn test_decode_rejects_unknown_type() {
        let frame = Frame::new(0x7F, vec![]);
        assert!(matches!(
            Response::decode(&frame),
            Err(ProtocolError::UnknownType(0x7F))
        ));
    }

    #[test]
    fn test_decode_negative_rssi() {
        let frame = Frame::new(MSG_RSSI, (-93i16).to_le_bytes().to_vec());
        assert_eq!(
            Response::decode(&frame).unwrap(),
            Response::Rssi { rssi_dbm: -93 }
        );

        let frame = Frame::new(MSG_CONTINUOUS_RSSI, (-121i16).to_le_bytes().to_vec());
        assert_eq!(
            Event::decode(&frame).unwrap(),
            Event::ContinuousRssi { rssi_dbm: -121 }
        );
    }

    #[test]
    fn test_decode_packet_received() {
        let mut payload = vec![0xA8, 0x05, 0xB0]; // -88 dBm, 5 dB, -80 dBm
        payload.extend_from_slice(&[0x11, 0x22, 0x33]);
        let frame = Frame::new(MSG_PACKET_RECEIVED, payload);

        assert_eq!(
            Event::decode(&frame).unwrap(),
            Event::PacketReceived {
                packet_rssi_dbm: -88,
                snr_db: 5,
                signal_rssi_dbm: -80,
                data: vec![0x11, 0x22, 0x33],
            }
        );

        // Metadata-only payload is legal (empty packet).
        let frame = Frame::new(MSG_PACKET_RECEIVED, vec![0, 0, 0]);
        assert!(matches!(
            Event::decode(&frame).unwrap(),
            Event::PacketReceived { data, .. } if data.is_empty()
        ));

        // Shorter than the metadata is not.
        let frame = Frame::new(MSG_PACKET_RECEIVED, vec![0, 0]);
        assert!(matches!(
            Event::decode(&frame),
            Err(ProtocolError::PayloadSize { .. })
        ));
    }

    #[test]
    fn test_decode_tx_busy() {
        let frame = Frame::new(MSG_TX, vec![0x01]);
        assert_eq!(Response::decode(&frame).unwrap(), Response::Tx { busy: true });
    }

    #[test]
    fn test_bandwidth_mapping() {
        assert_eq!(Bandwidth::from_khz(125), Some(Bandwidth::Khz125));
        assert_eq!(Bandwidth::Khz125.as_byte(), 4);
        assert_eq!(Bandwidth::from_khz(500), Some(Bandwidth::Khz500));
        assert_eq!(Bandwidth::Khz500.as_byte(), 6);
        assert_eq!(Bandwidth::from_khz(7), Some(Bandwidth::Khz7));
        assert_eq!(Bandwidth::Khz7.as_byte(), 0);
        assert_eq!(Bandwidth::from_khz(123), None);
    }

    #[test]
    fn test_spreading_factor_bounds() {
        assert!(SpreadingFactor::new(4).is_none());
        assert!(SpreadingFactor::new(13).is_none());
        assert_eq!(SpreadingFactor::new(12).unwrap().as_byte(), 0x0C);
    }

    #[test]
    fn test_coding_rate_parse() {
        assert_eq!(CodingRate::from_ratio("4/5"), Some(CodingRate::Cr4_5));
        assert_eq!(CodingRate::from_ratio("4/8"), Some(CodingRate::Cr4_8));
        assert_eq!(CodingRate::from_ratio("5/6"), None);
    }
}
