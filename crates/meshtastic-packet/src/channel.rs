//! Channel-bound packet encoding and decoding.
//!
//! A [`Channel`] couples a name and an AES-128 key with the single-byte
//! XOR hash that packets carry at header offset 13. Decoding probes the
//! hash first, so trying a packet against every configured channel is
//! cheap: only the owning channel ever runs AES and protobuf parsing.

use prost::Message;

use crate::crypto::{apply_keystream, packet_nonce, KEY_SIZE};
use crate::error::PacketError;
use crate::header::{PacketFlags, PacketHeader, BROADCAST_ADDR, CHANNEL_HASH_OFFSET, HEADER_LEN};
use crate::proto::Data;

/// Name of the well-known default Meshtastic channel.
pub const DEFAULT_CHANNEL_NAME: &str = "LongFast";

/// The well-known default channel PSK (`AQ==` expands to this key).
pub const DEFAULT_PSK: [u8; KEY_SIZE] = [
    0xd4, 0xf1, 0xbb, 0x3a, 0x20, 0x29, 0x07, 0x59, 0xf0, 0xbc, 0xff, 0xab, 0xcf, 0x4e, 0x69,
    0x01,
];

/// A decoded mesh packet.
///
/// `rx_rssi_dbm` and `rx_snr_db` are transport metadata filled in on the
/// receive path; they are not part of the on-air encoding.
#[derive(Debug, Clone, PartialEq)]
pub struct MeshPacket {
    /// Destination node id.
    pub to: u32,
    /// Source node id.
    pub from: u32,
    /// Packet id.
    pub id: u32,
    /// Id of the channel the packet was decoded on or will be sent on.
    pub channel_id: u32,
    /// Remaining hops.
    pub hop_limit: u8,
    /// Hops the packet started with.
    pub hop_start: u8,
    /// Sender requests an acknowledgement.
    pub want_ack: bool,
    /// Packet entered the mesh via MQTT.
    pub via_mqtt: bool,
    /// Receive RSSI in dBm (receive path only).
    pub rx_rssi_dbm: i32,
    /// Receive SNR in dB (receive path only).
    pub rx_snr_db: f32,
    /// Decrypted payload envelope.
    pub data: Data,
}

impl MeshPacket {
    /// Whether the packet is addressed to every node.
    pub fn is_broadcast(&self) -> bool {
        self.to == BROADCAST_ADDR
    }
}

/// Derive the XOR channel hash over `name ∥ key`.
pub fn channel_hash(name: &str, key: &[u8; KEY_SIZE]) -> u8 {
    name.bytes().chain(key.iter().copied()).fold(0, |acc, b| acc ^ b)
}

/// A mesh channel: id, name, key, and the precomputed hash.
#[derive(Clone)]
pub struct Channel {
    id: u32,
    name: String,
    key: [u8; KEY_SIZE],
    hash: u8,
}

impl Channel {
    /// Create a channel; the hash is derived once here.
    pub fn new(id: u32, name: impl Into<String>, key: [u8; KEY_SIZE]) -> Self {
        let name = name.into();
        let hash = channel_hash(&name, &key);
        Channel { id, name, key, hash }
    }

    /// The default `LongFast` channel with the well-known PSK.
    pub fn default_channel() -> Self {
        Channel::new(0, DEFAULT_CHANNEL_NAME, DEFAULT_PSK)
    }

    /// Channel id.
    pub fn id(&self) -> u32 {
        self.id
    }

    /// Channel name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The single-byte channel hash carried at header offset 13.
    pub fn hash(&self) -> u8 {
        self.hash
    }

    /// Decode a raw on-air packet received on this channel.
    ///
    /// Returns [`PacketError::ChannelMismatch`] — without running any
    /// crypto — when the packet belongs to a different channel.
    pub fn decode(&self, raw: &[u8]) -> Result<MeshPacket, PacketError> {
        if raw.len() < HEADER_LEN {
            return Err(PacketError::TooShort {
                expected: HEADER_LEN,
                actual: raw.len(),
            });
        }

        let actual = raw[CHANNEL_HASH_OFFSET];
        if actual != self.hash {
            return Err(PacketError::ChannelMismatch {
                expected: self.hash,
                actual,
            });
        }

        let header = PacketHeader::parse(raw)?;

        let mut plaintext = raw[HEADER_LEN..].to_vec();
        let nonce = packet_nonce(header.id, header.from);
        apply_keystream(&self.key, &nonce, &mut plaintext);

        let data = Data::decode(&plaintext[..])?;

        Ok(MeshPacket {
            to: header.to,
            from: header.from,
            id: header.id,
            channel_id: self.id,
            hop_limit: header.flags.hop_limit,
            hop_start: header.flags.hop_start,
            want_ack: header.flags.want_ack,
            via_mqtt: header.flags.via_mqtt,
            rx_rssi_dbm: 0,
            rx_snr_db: 0.0,
            data,
        })
    }

    /// Encode a packet for transmission on this channel.
    pub fn encode(&self, packet: &MeshPacket) -> Vec<u8> {
        let mut ciphertext = packet.data.encode_to_vec();
        let nonce = packet_nonce(packet.id, packet.from);
        apply_keystream(&self.key, &nonce, &mut ciphertext);

        let header = PacketHeader {
            to: packet.to,
            from: packet.from,
            id: packet.id,
            flags: PacketFlags {
                hop_limit: packet.hop_limit,
                want_ack: packet.want_ack,
                via_mqtt: packet.via_mqtt,
                hop_start: packet.hop_start,
            },
            channel_hash: self.hash,
        };

        let mut out = Vec::with_capacity(HEADER_LEN + ciphertext.len());
        header.write(&mut out);
        out.extend_from_slice(&ciphertext);
        out
    }
}

impl std::fmt::Debug for Channel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Channel")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("hash", &format_args!("0x{:02X}", self.hash))
            .field("key", &"[REDACTED]")
            .finish()
    }
}
