//! Text messenger application.
//!
//! Bridges [`PortNum::TextMessageApp`] traffic to the bus: inbound texts
//! are published as JSON on `<prefix>.in.text_message`, and JSON messages
//! on `<prefix>.out.text_message` are sent into the mesh.

use std::sync::{Arc, OnceLock};

use async_trait::async_trait;
use meshtastic_packet::{proto::PortNum, MeshPacket};
use serde::{Deserialize, Serialize};
use tokio::task::JoinHandle;
use tracing::{error, info};

use crate::apps::{Application, MessageSink};
use crate::bus::MessageBus;
use crate::error::Result;

/// JSON shape published for every received text.
#[derive(Debug, Serialize)]
struct IncomingTextMessage<'a> {
    channel: u32,
    from: u32,
    text: &'a str,
    rssi: i32,
    snr: f32,
}

/// JSON shape accepted on the outgoing subject.
#[derive(Debug, Deserialize)]
struct OutgoingTextMessage {
    channel: u32,
    to: u32,
    text: String,
}

struct Running {
    bus: Arc<dyn MessageBus>,
    subscriber: JoinHandle<()>,
}

/// The text messenger.
pub struct TextApplication {
    incoming_subject: String,
    outgoing_subject: String,
    state: OnceLock<Running>,
}

impl TextApplication {
    /// Create the application for a bus subject prefix.
    pub fn new(subject_prefix: &str) -> Self {
        TextApplication {
            incoming_subject: format!("{subject_prefix}.in.text_message"),
            outgoing_subject: format!("{subject_prefix}.out.text_message"),
            state: OnceLock::new(),
        }
    }
}

#[async_trait]
impl Application for TextApplication {
    fn port_num(&self) -> PortNum {
        PortNum::TextMessageApp
    }

    async fn start(&self, bus: Arc<dyn MessageBus>, sink: Arc<dyn MessageSink>) -> Result<()> {
        let mut outgoing = bus.subscribe(&self.outgoing_subject).await?;

        let subscriber = tokio::spawn(async move {
            while let Some(message) = outgoing.recv().await {
                let parsed: OutgoingTextMessage = match serde_json::from_slice(&message.payload) {
                    Ok(parsed) => parsed,
                    Err(e) => {
                        error!(error = %e, "failed to unmarshal text message");
                        continue;
                    }
                };

                let result = sink
                    .send_application_message(
                        parsed.channel,
                        parsed.to,
                        PortNum::TextMessageApp,
                        parsed.text.into_bytes(),
                    )
                    .await;
                if let Err(e) = result {
                    error!(error = %e, "failed to send text message");
                }
            }
        });

        let _ = self.state.set(Running { bus, subscriber });
        info!("started text application");
        Ok(())
    }

    async fn stop(&self) {
        if let Some(running) = self.state.get() {
            running.subscriber.abort();
        }
    }

    async fn handle_incoming(&self, packet: &MeshPacket) -> Result<()> {
        let Some(running) = self.state.get() else {
            return Ok(());
        };

        let text = String::from_utf8_lossy(&packet.data.payload);
        let message = IncomingTextMessage {
            channel: packet.channel_id,
            from: packet.from,
            text: &text,
            rssi: packet.rx_rssi_dbm,
            snr: packet.rx_snr_db,
        };

        let json = serde_json::to_vec(&message)
            .map_err(|e| crate::error::NodeError::Bus(e.to_string()))?;
        running.bus.publish(&self.incoming_subject, json).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::apps::testing::MockSink;
    use crate::bus::testing::MemoryBus;
    use meshtastic_packet::proto::Data;
    use std::time::Duration;

    fn text_packet(text: &str) -> MeshPacket {
        MeshPacket {
            to: 0xFFFF_FFFF,
            from: 0x1122_3344,
            id: 7,
            channel_id: 0,
            hop_limit: 7,
            hop_start: 7,
            want_ack: false,
            via_mqtt: false,
            rx_rssi_dbm: -92,
            rx_snr_db: 5.5,
            data: Data::new(PortNum::TextMessageApp, text.as_bytes().to_vec()),
        }
    }

    #[tokio::test]
    async fn test_incoming_text_is_published_as_json() {
        let bus = Arc::new(MemoryBus::new());
        let sink = Arc::new(MockSink::new());
        let app = TextApplication::new("mesh.node1");

        app.start(bus.clone(), sink).await.unwrap();
        app.handle_incoming(&text_packet("hi there")).await.unwrap();

        let published = bus.published();
        assert_eq!(published.len(), 1);
        assert_eq!(published[0].subject, "mesh.node1.in.text_message");

        let value: serde_json::Value = serde_json::from_slice(&published[0].payload).unwrap();
        assert_eq!(value["channel"], 0);
        assert_eq!(value["from"], 0x1122_3344u32);
        assert_eq!(value["text"], "hi there");
        assert_eq!(value["rssi"], -92);

        app.stop().await;
    }

    #[tokio::test]
    async fn test_outgoing_json_reaches_the_sink() {
        let bus = Arc::new(MemoryBus::new());
        let sink = Arc::new(MockSink::new());
        let app = TextApplication::new("mesh.node1");

        app.start(bus.clone(), sink.clone()).await.unwrap();

        bus.inject(
            "mesh.node1.out.text_message",
            br#"{"channel": 0, "to": 4294967295, "text": "ping"}"#.to_vec(),
        )
        .await;

        // Give the subscriber task a moment to run.
        tokio::time::sleep(Duration::from_millis(50)).await;

        let sent = sink.sent();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].channel_id, 0);
        assert_eq!(sent[0].destination, 0xFFFF_FFFF);
        assert_eq!(sent[0].port_num, PortNum::TextMessageApp);
        assert_eq!(sent[0].payload, b"ping");

        app.stop().await;
    }

    #[tokio::test]
    async fn test_malformed_outgoing_json_is_skipped() {
        let bus = Arc::new(MemoryBus::new());
        let sink = Arc::new(MockSink::new());
        let app = TextApplication::new("mesh.node1");

        app.start(bus.clone(), sink.clone()).await.unwrap();
        bus.inject("mesh.node1.out.text_message", b"not json".to_vec()).await;
        tokio::time::sleep(Duration::from_millis(50)).await;

        assert!(sink.sent().is_empty());
        app.stop().await;
    }
}
