//! Position beacon application.
//!
//! Periodically broadcasts the configured position on
//! [`PortNum::PositionApp`] and publishes received positions on
//! `<prefix>.in.position`, annotated with transport metadata.

use std::sync::{Arc, Mutex, OnceLock};
use std::time::Duration;

use async_trait::async_trait;
use meshtastic_packet::proto::{LocationSource, PortNum, Position};
use meshtastic_packet::{MeshPacket, BROADCAST_ADDR};
use prost::Message;
use rand::Rng;
use serde_json::json;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::apps::{schedule_repeating, unix_time_secs, Application, MessageSink};
use crate::bus::MessageBus;
use crate::config::{NodeConfig, PositionConfig};
use crate::error::Result;
use crate::event_loop::EventLoop;

struct Running {
    bus: Arc<dyn MessageBus>,
    loop_task: Mutex<Option<JoinHandle<()>>>,
}

/// The position beacon.
pub struct PositionApplication {
    latitude: f64,
    longitude: f64,
    altitude: f64,
    channel: u32,
    period: Duration,
    incoming_subject: String,
    event_loop: EventLoop,
    state: OnceLock<Running>,
}

impl PositionApplication {
    /// Create the application from its configuration section.
    pub fn new(config: &NodeConfig, settings: &PositionConfig) -> Self {
        PositionApplication {
            latitude: settings.latitude,
            longitude: settings.longitude,
            altitude: settings.altitude,
            channel: settings.channel,
            period: settings.publish_period.into(),
            incoming_subject: format!("{}.in.position", config.nats_subject_prefix),
            event_loop: EventLoop::new(),
            state: OnceLock::new(),
        }
    }
}

fn build_position(latitude: f64, longitude: f64, altitude: f64) -> Position {
    Position {
        latitude_i: Some((latitude * 1e7) as i32),
        longitude_i: Some((longitude * 1e7) as i32),
        altitude: Some(altitude as i32),
        time: unix_time_secs(),
        location_source: LocationSource::LocManual as i32,
    }
}

#[async_trait]
impl Application for PositionApplication {
    fn port_num(&self) -> PortNum {
        PortNum::PositionApp
    }

    async fn start(&self, bus: Arc<dyn MessageBus>, sink: Arc<dyn MessageSink>) -> Result<()> {
        let loop_task = {
            let el = self.event_loop.clone();
            tokio::spawn(async move { el.run().await })
        };

        let channel = self.channel;
        let latitude = self.latitude;
        let longitude = self.longitude;
        let altitude = self.altitude;
        let action: Arc<dyn Fn() + Send + Sync> = Arc::new(move || {
            let sink = sink.clone();
            let position = build_position(latitude, longitude, altitude);
            tokio::spawn(async move {
                let result = sink
                    .send_application_message(
                        channel,
                        BROADCAST_ADDR,
                        PortNum::PositionApp,
                        position.encode_to_vec(),
                    )
                    .await;
                if let Err(e) = result {
                    warn!(error = %e, "failed to send node position");
                }
            });
        });

        // Spread first beacons of a rebooting fleet over 10..30 s.
        let first_in =
            Duration::from_secs(10 + u64::from(rand::thread_rng().gen_range(0..20u32)));
        schedule_repeating(self.event_loop.clone(), first_in, self.period, action);

        let _ = self.state.set(Running {
            bus,
            loop_task: Mutex::new(Some(loop_task)),
        });
        info!(
            channel = self.channel,
            period = ?self.period,
            "started node position application"
        );
        Ok(())
    }

    async fn stop(&self) {
        self.event_loop.quit();
        if let Some(running) = self.state.get() {
            let task = running.loop_task.lock().unwrap().take();
            if let Some(task) = task {
                let _ = task.await;
            }
        }
    }

    async fn handle_incoming(&self, packet: &MeshPacket) -> Result<()> {
        let Some(running) = self.state.get() else {
            return Ok(());
        };

        let position = Position::decode(&packet.data.payload[..])
            .map_err(meshtastic_packet::PacketError::PayloadDecode)?;

        let message = json!({
            "latitude_i": position.latitude_i,
            "longitude_i": position.longitude_i,
            "altitude": position.altitude,
            "time": position.time,
            "channel": packet.channel_id,
            "from": crate::config::NodeId(packet.from),
            "rssi": packet.rx_rssi_dbm,
            "snr": packet.rx_snr_db,
            "hops": packet.hop_start.saturating_sub(packet.hop_limit),
        });

        running
            .bus
            .publish(&self.incoming_subject, message.to_string().into_bytes())
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::apps::testing::MockSink;
    use crate::bus::testing::MemoryBus;
    use crate::config::DurationValue;
    use meshtastic_packet::proto::Data;

    fn test_app() -> PositionApplication {
        let config = crate::config::NodeConfig::parse(
            r#"
id: "11223344"
short_name: WSL
long_name: Waveshare bridge
mac_address: "de:ad:be:ef:00:01"
nats_url: "nats://127.0.0.1:4222"
nats_subject_prefix: "mesh.node1"
radio:
  frequency: 869525000
  power: 22
  spreading_factor: 11
  bandwidth: 250
  coding_rate: "4/8"
"#,
        )
        .unwrap();
        let settings = PositionConfig {
            channel: 0,
            publish_period: DurationValue(Duration::from_secs(60)),
            latitude: 52.37,
            longitude: 4.89,
            altitude: 2.0,
        };
        PositionApplication::new(&config, &settings)
    }

    #[test]
    fn test_position_scaling() {
        let app = test_app();
        let position = build_position(app.latitude, app.longitude, app.altitude);
        assert_eq!(position.latitude_i, Some(523_700_000));
        assert_eq!(position.longitude_i, Some(48_900_000));
        assert_eq!(position.altitude, Some(2));
        assert_eq!(position.location_source, LocationSource::LocManual as i32);
    }

    #[tokio::test]
    async fn test_incoming_position_is_annotated() {
        let app = test_app();
        let bus = Arc::new(MemoryBus::new());
        app.start(bus.clone(), Arc::new(MockSink::new())).await.unwrap();

        let position = Position {
            latitude_i: Some(1),
            longitude_i: Some(2),
            altitude: Some(3),
            time: 4,
            location_source: LocationSource::LocInternal as i32,
        };
        let packet = MeshPacket {
            to: BROADCAST_ADDR,
            from: 0x0102_0304,
            id: 9,
            channel_id: 0,
            hop_limit: 4,
            hop_start: 7,
            want_ack: false,
            via_mqtt: false,
            rx_rssi_dbm: -101,
            rx_snr_db: -3.5,
            data: Data::new(PortNum::PositionApp, position.encode_to_vec()),
        };

        app.handle_incoming(&packet).await.unwrap();

        let published = bus.published();
        assert_eq!(published.len(), 1);
        assert_eq!(published[0].subject, "mesh.node1.in.position");
        let value: serde_json::Value = serde_json::from_slice(&published[0].payload).unwrap();
        assert_eq!(value["latitude_i"], 1);
        assert_eq!(value["hops"], 3);
        assert_eq!(value["from"], "01020304");

        app.stop().await;
    }
}
