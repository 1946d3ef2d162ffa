//! Mesh applications.
//!
//! An application binds one mesh port number to the bus: inbound packets
//! on its port are handed to [`Application::handle_incoming`], and the
//! application emits mesh traffic through the send-only [`MessageSink`]
//! capability. Beaconing applications run their own timer loop and never
//! touch the radio driver's scheduling.

use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use meshtastic_packet::{proto::PortNum, MeshPacket};

use crate::bus::MessageBus;
use crate::error::Result;
use crate::event_loop::EventLoop;

pub mod node_info;
pub mod position;
pub mod telemetry;
pub mod text;

pub use node_info::NodeInfoApplication;
pub use position::PositionApplication;
pub use telemetry::TelemetryApplication;
pub use text::TextApplication;

/// Send-only capability handed to applications.
#[async_trait]
pub trait MessageSink: Send + Sync {
    /// Encode and enqueue an application payload as a mesh packet.
    async fn send_application_message(
        &self,
        channel_id: u32,
        destination: u32,
        port_num: PortNum,
        payload: Vec<u8>,
    ) -> Result<()>;
}

/// A mesh application hosted by the node.
#[async_trait]
pub trait Application: Send + Sync {
    /// The mesh port number this application consumes.
    fn port_num(&self) -> PortNum;

    /// Attach to the bus and start any background work.
    async fn start(&self, bus: Arc<dyn MessageBus>, sink: Arc<dyn MessageSink>) -> Result<()>;

    /// Stop background work. Must be safe to call more than once.
    async fn stop(&self);

    /// Handle a decoded packet addressed to this application's port.
    async fn handle_incoming(&self, packet: &MeshPacket) -> Result<()>;
}

/// Run `action` once after `first_in`, then every `period`, on the given
/// timer loop. The action must be quick; spawn a task for real work.
pub(crate) fn schedule_repeating(
    event_loop: EventLoop,
    first_in: Duration,
    period: Duration,
    action: Arc<dyn Fn() + Send + Sync>,
) {
    let deadline = Instant::now() + first_in;
    let el = event_loop.clone();
    event_loop.post(
        move || {
            action();
            schedule_repeating(el, period, period, action);
        },
        deadline,
    );
}

/// Current Unix time in whole seconds.
pub(crate) fn unix_time_secs() -> u32 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs() as u32)
        .unwrap_or(0)
}
