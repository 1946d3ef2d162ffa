//! Waveshare SX1262 USB LoRa dongle serial protocol.
//!
//! This crate provides types and codecs for talking to the Waveshare USB
//! LoRa dongle over its framed serial protocol. It is sans-I/O: framing and
//! message codecs operate on byte buffers, and the owning application feeds
//! them from whatever transport it has (a serial port in production, plain
//! vectors in tests).
//!
//! # Protocol Overview
//!
//! Every exchange is a [`Frame`] — a type byte plus a length-prefixed
//! payload — delimited by a start byte, byte-stuffed, and protected by a
//! CRC-16 trailer. On top of the framing, messages fall into three groups:
//!
//! - **Requests** (host → dongle): type codes `0x01..=0x0B`
//! - **Responses** (dongle → host): the matching `0x81..=0x8B` code
//! - **Events** (dongle → host, unsolicited): type codes `0x90..=0x9F`
//!
//! # Example
//!
//! ```rust,ignore
//! use wslora_radio_protocol::{encode_frame, FrameDecoder, Request, Response};
//!
//! // Build a request frame
//! let frame = Request::SetFrequency { frequency_hz: 869_525_000 }.encode();
//! let wire = encode_frame(&frame);
//!
//! // Parse a response frame
//! let mut decoder = FrameDecoder::new();
//! decoder.push(&received);
//! if let Some(frame) = decoder.decode()? {
//!     let response = Response::decode(&frame)?;
//! }
//! ```

mod constants;
mod error;
mod frame;
mod messages;

pub use constants::*;
pub use error::*;
pub use frame::*;
pub use messages::*;
