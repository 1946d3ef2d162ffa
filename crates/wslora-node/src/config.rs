//! Node configuration.
//!
//! The node is configured from a YAML file. Domain scalars (hex node id,
//! MAC address, base64 key, human-readable durations, the LoRa parameter
//! vocabulary) get their own deserializers so an invalid file fails at
//! load time with a message naming the field. The TX power is the one
//! deliberate exception: the PA table lookup happens during radio
//! startup, so an unsupported power fails `start()`, not `load()`.

use std::fmt;
use std::path::Path;
use std::time::Duration;

use base64::Engine;
use meshtastic_packet::{DEFAULT_PSK, KEY_SIZE};
use serde::de::{self, Deserializer, Visitor};
use serde::{Deserialize, Serialize};
use wslora_radio_protocol::{Bandwidth, CodingRate, SpreadingFactor};

use crate::error::{NodeError, Result};

// ============================================================================
// Domain scalar types
// ============================================================================

/// A mesh node id. Hex in YAML and JSON, a plain u32 on the air.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct NodeId(pub u32);

impl NodeId {
    /// The numeric node id.
    pub fn as_u32(self) -> u32 {
        self.0
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:x}", self.0)
    }
}

impl Serialize for NodeId {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(&format!("{:08x}", self.0))
    }
}

impl<'de> Deserialize<'de> for NodeId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        struct NodeIdVisitor;

        impl Visitor<'_> for NodeIdVisitor {
            type Value = NodeId;

            fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str("a hexadecimal node id")
            }

            fn visit_str<E: de::Error>(self, v: &str) -> std::result::Result<NodeId, E> {
                u32::from_str_radix(v.trim_start_matches('!'), 16)
                    .map(NodeId)
                    .map_err(|_| E::custom(format!("invalid node id '{v}'")))
            }
        }

        deserializer.deserialize_str(NodeIdVisitor)
    }
}

/// A six-byte MAC address, written `aa:bb:cc:dd:ee:ff`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MacAddress(pub [u8; 6]);

impl MacAddress {
    /// The raw bytes.
    pub fn as_bytes(&self) -> &[u8; 6] {
        &self.0
    }
}

impl fmt::Display for MacAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let [a, b, c, d, e, g] = self.0;
        write!(f, "{a:02x}:{b:02x}:{c:02x}:{d:02x}:{e:02x}:{g:02x}")
    }
}

impl<'de> Deserialize<'de> for MacAddress {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        struct MacVisitor;

        impl Visitor<'_> for MacVisitor {
            type Value = MacAddress;

            fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str("a MAC address like aa:bb:cc:dd:ee:ff")
            }

            fn visit_str<E: de::Error>(self, v: &str) -> std::result::Result<MacAddress, E> {
                let mut bytes = [0u8; 6];
                let mut count = 0;
                for chunk in v.split(':') {
                    if count == 6 {
                        return Err(E::custom("mac address length is invalid"));
                    }
                    bytes[count] = u8::from_str_radix(chunk, 16)
                        .map_err(|_| E::custom(format!("invalid mac address chunk '{chunk}'")))?;
                    count += 1;
                }
                if count != 6 {
                    return Err(E::custom("mac address length is invalid"));
                }
                Ok(MacAddress(bytes))
            }
        }

        deserializer.deserialize_str(MacVisitor)
    }
}

/// Key material, base64 in the configuration file.
#[derive(Clone, PartialEq, Eq, Default)]
pub struct CryptoKey(pub Vec<u8>);

impl CryptoKey {
    /// The raw bytes.
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }
}

impl fmt::Debug for CryptoKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "CryptoKey([REDACTED; {}])", self.0.len())
    }
}

impl<'de> Deserialize<'de> for CryptoKey {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        struct KeyVisitor;

        impl Visitor<'_> for KeyVisitor {
            type Value = CryptoKey;

            fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str("a base64 key")
            }

            fn visit_str<E: de::Error>(self, v: &str) -> std::result::Result<CryptoKey, E> {
                base64::engine::general_purpose::STANDARD
                    .decode(v)
                    .map(CryptoKey)
                    .map_err(|e| E::custom(format!("invalid base64 key: {e}")))
            }
        }

        deserializer.deserialize_str(KeyVisitor)
    }
}

/// A duration written like `500ms`, `10s`, `1m30s`, or `2h`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DurationValue(pub Duration);

impl From<DurationValue> for Duration {
    fn from(v: DurationValue) -> Duration {
        v.0
    }
}

fn parse_duration(s: &str) -> Option<Duration> {
    let mut rest = s.trim();
    if rest.is_empty() {
        return None;
    }

    let mut total = Duration::ZERO;
    while !rest.is_empty() {
        let digits_end = rest.find(|c: char| !c.is_ascii_digit() && c != '.')?;
        if digits_end == 0 {
            return None;
        }
        let (number, tail) = rest.split_at(digits_end);
        let value: f64 = number.parse().ok()?;

        let (unit_len, unit) = if tail.starts_with("ms") {
            (2, Duration::from_millis(1))
        } else {
            match tail.as_bytes()[0] {
                b's' => (1, Duration::from_secs(1)),
                b'm' => (1, Duration::from_secs(60)),
                b'h' => (1, Duration::from_secs(3600)),
                _ => return None,
            }
        };

        total += unit.mul_f64(value);
        rest = &tail[unit_len..];
    }

    Some(total)
}

impl<'de> Deserialize<'de> for DurationValue {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        struct DurationVisitor;

        impl Visitor<'_> for DurationVisitor {
            type Value = DurationValue;

            fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str("a duration like 10s or 1m30s")
            }

            fn visit_str<E: de::Error>(self, v: &str) -> std::result::Result<DurationValue, E> {
                parse_duration(v)
                    .map(DurationValue)
                    .ok_or_else(|| E::custom(format!("invalid duration '{v}'")))
            }
        }

        deserializer.deserialize_str(DurationVisitor)
    }
}

// ============================================================================
// Radio settings
// ============================================================================

fn de_spreading_factor<'de, D: Deserializer<'de>>(
    deserializer: D,
) -> std::result::Result<SpreadingFactor, D::Error> {
    let sf = u8::deserialize(deserializer)?;
    SpreadingFactor::new(sf)
        .ok_or_else(|| de::Error::custom(format!("unsupported LoRa spreading factor {sf}")))
}

fn de_bandwidth<'de, D: Deserializer<'de>>(
    deserializer: D,
) -> std::result::Result<Bandwidth, D::Error> {
    let khz = u32::deserialize(deserializer)?;
    Bandwidth::from_khz(khz)
        .ok_or_else(|| de::Error::custom(format!("unsupported LoRa bandwidth {khz}")))
}

fn de_coding_rate<'de, D: Deserializer<'de>>(
    deserializer: D,
) -> std::result::Result<CodingRate, D::Error> {
    let s = String::deserialize(deserializer)?;
    CodingRate::from_ratio(&s)
        .ok_or_else(|| de::Error::custom(format!("unknown LoRa coding rate '{s}'")))
}

/// Radio parameters handed to the driver at startup.
#[derive(Debug, Clone, Copy, Deserialize)]
pub struct RadioSettings {
    /// Carrier frequency in Hz.
    #[serde(rename = "frequency")]
    pub frequency_hz: u32,
    /// Output power in dBm. Validated against the PA table at startup.
    #[serde(rename = "power")]
    pub power_dbm: i32,
    /// Spreading factor, 5..=12.
    #[serde(deserialize_with = "de_spreading_factor")]
    pub spreading_factor: SpreadingFactor,
    /// Bandwidth in kHz (rounded down).
    #[serde(deserialize_with = "de_bandwidth")]
    pub bandwidth: Bandwidth,
    /// Coding rate, `4/5` through `4/8`.
    #[serde(deserialize_with = "de_coding_rate")]
    pub coding_rate: CodingRate,
}

// ============================================================================
// Sections
// ============================================================================

/// One configured mesh channel.
#[derive(Debug, Clone, Deserialize)]
pub struct ChannelConfig {
    /// Channel id, referenced by applications.
    pub id: u32,
    /// Channel name; part of the channel hash.
    pub name: String,
    /// Channel key. The single byte 0x01 is shorthand for the default
    /// Meshtastic PSK.
    pub encryption_key: CryptoKey,
}

impl ChannelConfig {
    /// Resolve the configured key material to an AES-128 key.
    pub fn key_bytes(&self) -> Result<[u8; KEY_SIZE]> {
        let raw = self.encryption_key.as_bytes();
        if raw == [0x01] {
            return Ok(DEFAULT_PSK);
        }
        raw.try_into().map_err(|_| {
            NodeError::Config(format!(
                "channel '{}': key must be {KEY_SIZE} bytes, got {}",
                self.name,
                raw.len()
            ))
        })
    }
}

fn default_jitter() -> DurationValue {
    DurationValue(Duration::from_millis(250))
}

/// Forwarding and retransmission policy.
#[derive(Debug, Clone, Deserialize)]
pub struct RetransmitConfig {
    /// Re-transmit packets not addressed to this node.
    #[serde(default)]
    pub forward: bool,
    /// Extra transmissions of locally originated packets, as delays
    /// after the first transmission.
    #[serde(default)]
    pub period: Vec<DurationValue>,
    /// Upper bound of the uniform random delay added to every scheduled
    /// retransmission.
    #[serde(default = "default_jitter")]
    pub jitter: DurationValue,
}

impl Default for RetransmitConfig {
    fn default() -> Self {
        RetransmitConfig {
            forward: false,
            period: Vec::new(),
            jitter: default_jitter(),
        }
    }
}

fn default_beacon_period() -> DurationValue {
    DurationValue(Duration::from_secs(60))
}

/// Node-info beacon application settings.
#[derive(Debug, Clone, Deserialize)]
pub struct NodeInfoConfig {
    /// Channel to beacon on.
    #[serde(default)]
    pub channel: u32,
    /// Beacon repetition period.
    #[serde(default = "default_beacon_period")]
    pub publish_period: DurationValue,
}

/// Position beacon application settings.
#[derive(Debug, Clone, Deserialize)]
pub struct PositionConfig {
    /// Channel to beacon on.
    #[serde(default)]
    pub channel: u32,
    /// Beacon repetition period.
    #[serde(default = "default_beacon_period")]
    pub publish_period: DurationValue,
    /// Latitude in degrees.
    pub latitude: f64,
    /// Longitude in degrees.
    pub longitude: f64,
    /// Altitude in metres.
    #[serde(default)]
    pub altitude: f64,
}

/// Telemetry application settings.
#[derive(Debug, Clone, Deserialize)]
pub struct TelemetryConfig {
    /// Device metrics beacon; absent means disabled.
    #[serde(default)]
    pub device_metrics: Option<DeviceMetricsConfig>,
}

/// Device metrics beacon settings.
#[derive(Debug, Clone, Deserialize)]
pub struct DeviceMetricsConfig {
    /// Channel to beacon on.
    #[serde(default)]
    pub channel: u32,
    /// Beacon repetition period.
    #[serde(default = "default_beacon_period")]
    pub publish_period: DurationValue,
}

/// The whole node configuration file.
#[derive(Debug, Clone, Deserialize)]
pub struct NodeConfig {
    /// Our node id.
    pub id: NodeId,
    /// Short display name (up to four characters by convention).
    pub short_name: String,
    /// Full node name.
    pub long_name: String,
    /// MAC address advertised in node info.
    pub mac_address: MacAddress,
    /// Hardware model number advertised in node info.
    #[serde(default)]
    pub hw_model: u32,
    /// Public key advertised in node info.
    #[serde(default)]
    pub public_key: CryptoKey,
    /// NATS server URL.
    pub nats_url: String,
    /// Prefix for every bus subject this node uses.
    pub nats_subject_prefix: String,
    /// Radio parameters.
    pub radio: RadioSettings,
    /// Channels in addition to the built-in default channel.
    #[serde(default)]
    pub channels: Vec<ChannelConfig>,
    /// Forwarding and retransmission policy.
    #[serde(default)]
    pub retransmit: Option<RetransmitConfig>,
    /// Node-info application; absent means disabled.
    #[serde(default)]
    pub node_info: Option<NodeInfoConfig>,
    /// Position application; absent means disabled.
    #[serde(default)]
    pub position: Option<PositionConfig>,
    /// Telemetry application; absent means disabled.
    #[serde(default)]
    pub telemetry: Option<TelemetryConfig>,
}

impl NodeConfig {
    /// Load and validate a configuration file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::parse(&text)
    }

    /// Parse a configuration document.
    pub fn parse(text: &str) -> Result<Self> {
        serde_yaml::from_str(text).map_err(|e| NodeError::Config(e.to_string()))
    }
}
