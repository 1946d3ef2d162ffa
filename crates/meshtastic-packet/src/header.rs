//! On-air packet header layout.

use crate::error::PacketError;

/// Length of the clear mesh packet header.
pub const HEADER_LEN: usize = 16;

/// The broadcast destination address.
pub const BROADCAST_ADDR: u32 = 0xFFFF_FFFF;

/// Byte offset of the flags byte within the header.
pub const FLAGS_OFFSET: usize = 12;

/// Byte offset of the channel hash within the header.
pub const CHANNEL_HASH_OFFSET: usize = 13;

/// The routing bits packed into header byte 12.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PacketFlags {
    /// Remaining hops, 0..=7.
    pub hop_limit: u8,
    /// Sender requests an acknowledgement.
    pub want_ack: bool,
    /// Packet entered the mesh through an MQTT gateway.
    pub via_mqtt: bool,
    /// Hop limit the packet started with, 0..=7.
    pub hop_start: u8,
}

impl PacketFlags {
    /// Unpack a flags byte.
    pub fn from_byte(b: u8) -> Self {
        PacketFlags {
            hop_limit: b & 0x07,
            want_ack: b & 0x08 != 0,
            via_mqtt: b & 0x10 != 0,
            hop_start: (b >> 5) & 0x07,
        }
    }

    /// Pack into a flags byte.
    pub fn to_byte(self) -> u8 {
        (self.hop_limit & 0x07)
            | if self.want_ack { 0x08 } else { 0 }
            | if self.via_mqtt { 0x10 } else { 0 }
            | ((self.hop_start & 0x07) << 5)
    }
}

/// The clear 16-byte header preceding the ciphertext.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PacketHeader {
    /// Destination node id.
    pub to: u32,
    /// Source node id.
    pub from: u32,
    /// Packet id.
    pub id: u32,
    /// Routing flags.
    pub flags: PacketFlags,
    /// Channel hash.
    pub channel_hash: u8,
}

impl PacketHeader {
    /// Parse the header from the front of a raw packet.
    pub fn parse(data: &[u8]) -> Result<Self, PacketError> {
        if data.len() < HEADER_LEN {
            return Err(PacketError::TooShort {
                expected: HEADER_LEN,
                actual: data.len(),
            });
        }

        Ok(PacketHeader {
            to: u32::from_le_bytes([data[0], data[1], data[2], data[3]]),
            from: u32::from_le_bytes([data[4], data[5], data[6], data[7]]),
            id: u32::from_le_bytes([data[8], data[9], data[10], data[11]]),
            flags: PacketFlags::from_byte(data[FLAGS_OFFSET]),
            channel_hash: data[CHANNEL_HASH_OFFSET],
        })
    }

    /// Append the 16 header bytes (reserved bytes written as zero).
    pub fn write(&self, out: &mut Vec<u8>) {
        out.extend_from_slice(&self.to.to_le_bytes());
        out.extend_from_slice(&self.from.to_le_bytes());
        out.extend_from_slice(&self.id.to_le_bytes());
        out.push(self.flags.to_byte());
        out.push(self.channel_hash);
        out.extend_from_slice(&[0x00, 0x00]);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_flags_byte_composition() {
        let flags = PacketFlags {
            hop_limit: 7,
            want_ack: false,
            via_mqtt: false,
            hop_start: 7,
        };
        assert_eq!(flags.to_byte(), 0xE7);
        assert_eq!(PacketFlags::from_byte(0xE7), flags);

        let flags = PacketFlags {
            hop_limit: 3,
            want_ack: true,
            via_mqtt: true,
            hop_start: 5,
        };
        assert_eq!(flags.to_byte(), 0xBB);
        assert_eq!(PacketFlags::from_byte(0xBB), flags);
    }

    #[test]
    fn test_flags_masks_out_of_range_hops() {
        let flags = PacketFlags {
            hop_limit: 0x1F,
            want_ack: false,
            via_mqtt: false,
            hop_start: 0x0F,
        };
        let b = flags.to_byte();
        assert_eq!(PacketFlags::from_byte(b).hop_limit, 7);
        assert_eq!(PacketFlags::from_byte(b).hop_start, 7);
    }

    #[test]
    fn test_header_roundtrip() {
        let header = PacketHeader {
            to: BROADCAST_ADDR,
            from: 0x1122_3344,
            id: 0xFB3E_B15F,
            flags: PacketFlags::from_byte(0xE7),
            channel_hash: 0x08,
        };

        let mut bytes = Vec::new();
        header.write(&mut bytes);
        assert_eq!(bytes.len(), HEADER_LEN);
        assert_eq!(&bytes[14..16], &[0, 0]);
        assert_eq!(PacketHeader::parse(&bytes).unwrap(), header);
    }

    #[test]
    fn test_parse_rejects_short_input() {
        assert!(matches!(
            PacketHeader::parse(&[0u8; 15]),
            Err(PacketError::TooShort {
                expected: 16,
                actual: 15
            })
        ));
    }
}
