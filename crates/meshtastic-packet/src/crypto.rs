//! Payload encryption.
//!
//! Meshtastic channel payloads are AES-128-CTR encrypted. The 16-byte
//! nonce binds the keystream to the packet:
//!
//! ```text
//! Bytes 0..8:   packet id as a little-endian u64
//! Bytes 8..12:  source node id as a little-endian u32
//! Bytes 12..16: zero
//! ```
//!
//! CTR mode is its own inverse, so the same transform both encrypts and
//! decrypts.

use aes::Aes128;
use ctr::cipher::{KeyIvInit, StreamCipher};
use ctr::Ctr128BE;

/// Size of a channel key in bytes (AES-128).
pub const KEY_SIZE: usize = 16;

type Aes128Ctr = Ctr128BE<Aes128>;

/// Build the CTR nonce for a packet.
pub fn packet_nonce(packet_id: u32, from: u32) -> [u8; 16] {
    let mut nonce = [0u8; 16];
    nonce[0..8].copy_from_slice(&u64::from(packet_id).to_le_bytes());
    nonce[8..12].copy_from_slice(&from.to_le_bytes());
    nonce
}

/// Apply the AES-128-CTR keystream for (`key`, `nonce`) to `buf` in place.
pub fn apply_keystream(key: &[u8; KEY_SIZE], nonce: &[u8; 16], buf: &mut [u8]) {
    let mut cipher = Aes128Ctr::new(key.into(), nonce.into());
    cipher.apply_keystream(buf);
}
