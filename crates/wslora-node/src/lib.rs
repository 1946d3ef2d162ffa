//! Meshtastic mesh node daemon for the Waveshare SX1262 USB LoRa dongle.
//!
//! The node terminates the radio link on the host: it drives the dongle
//! over its framed serial protocol, decodes inbound mesh packets, forwards
//! traffic that is not addressed to it, and bridges application payloads
//! (text messages, node info, position, telemetry) to a NATS message bus.
//!
//! ## Task layout
//!
//! ```text
//! serial reader thread ──frames──▶ ApiClient ──events──▶ RadioDriver task
//!                                       ▲                     │ inbound
//!                                       │ requests            ▼
//!                               Node router task ◀──── channel decode
//!                                   │        ▲
//!                        bus publish│        │ bus subscribe
//!                                   ▼        │
//!                              applications (own timer loops)
//! ```

pub mod api_client;
pub mod apps;
pub mod bus;
pub mod config;
pub mod error;
pub mod event_loop;
pub mod node;
pub mod radio;
pub mod serial_link;

pub use error::{NodeError, Result};
pub use node::Node;
