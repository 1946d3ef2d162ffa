//! Telemetry application.
//!
//! Periodically broadcasts device metrics on [`PortNum::TelemetryApp`]
//! and publishes received device metrics on
//! `<prefix>.in.telemetry.device_metrics`.

use std::sync::{Arc, Mutex, OnceLock};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use meshtastic_packet::proto::{telemetry, DeviceMetrics, PortNum, Telemetry};
use meshtastic_packet::{MeshPacket, BROADCAST_ADDR};
use prost::Message;
use rand::Rng;
use serde_json::json;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::apps::{schedule_repeating, unix_time_secs, Application, MessageSink};
use crate::bus::MessageBus;
use crate::config::{DeviceMetricsConfig, NodeConfig};
use crate::error::Result;
use crate::event_loop::EventLoop;

/// Battery level reported when running from external power.
const EXTERNAL_POWER_BATTERY_LEVEL: u32 = 101;

struct Running {
    bus: Arc<dyn MessageBus>,
    loop_task: Mutex<Option<JoinHandle<()>>>,
}

/// The device-metrics telemetry beacon.
pub struct TelemetryApplication {
    channel: u32,
    period: Duration,
    incoming_subject: String,
    event_loop: EventLoop,
    state: OnceLock<Running>,
}

impl TelemetryApplication {
    /// Create the application from its configuration section.
    pub fn new(config: &NodeConfig, settings: &DeviceMetricsConfig) -> Self {
        TelemetryApplication {
            channel: settings.channel,
            period: settings.publish_period.into(),
            incoming_subject: format!("{}.in.telemetry", config.nats_subject_prefix),
            event_loop: EventLoop::new(),
            state: OnceLock::new(),
        }
    }
}

fn build_device_metrics(started_at: Instant) -> Telemetry {
    Telemetry {
        time: unix_time_secs(),
        variant: Some(telemetry::Variant::DeviceMetrics(DeviceMetrics {
            battery_level: Some(EXTERNAL_POWER_BATTERY_LEVEL),
            voltage: Some(5.0),
            channel_utilization: Some(0.0),
            air_util_tx: Some(0.0),
            uptime_seconds: Some(started_at.elapsed().as_secs() as u32),
        })),
    }
}

#[async_trait]
impl Application for TelemetryApplication {
    fn port_num(&self) -> PortNum {
        PortNum::TelemetryApp
    }

    async fn start(&self, bus: Arc<dyn MessageBus>, sink: Arc<dyn MessageSink>) -> Result<()> {
        let loop_task = {
            let el = self.event_loop.clone();
            tokio::spawn(async move { el.run().await })
        };

        let channel = self.channel;
        let started_at = Instant::now();
        let action: Arc<dyn Fn() + Send + Sync> = Arc::new(move || {
            let sink = sink.clone();
            let payload = build_device_metrics(started_at).encode_to_vec();
            tokio::spawn(async move {
                let result = sink
                    .send_application_message(
                        channel,
                        BROADCAST_ADDR,
                        PortNum::TelemetryApp,
                        payload,
                    )
                    .await;
                if let Err(e) = result {
                    warn!(error = %e, "failed to send device metrics");
                }
            });
        });

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
            "started telemetry application"
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

        let telemetry = Telemetry::decode(&packet.data.payload[..])
            .map_err(meshtastic_packet::PacketError::PayloadDecode)?;

        let Some(telemetry::Variant::DeviceMetrics(metrics)) = telemetry.variant else {
            return Ok(());
        };

        let message = json!({
            "channel": packet.channel_id,
            "from": crate::config::NodeId(packet.from),
            "rssi": packet.rx_rssi_dbm,
            "snr": packet.rx_snr_db,
            "battery_level": metrics.battery_level,
            "voltage": metrics.voltage,
            "channel_utilization": metrics.channel_utilization,
            "air_util_tx": metrics.air_util_tx,
            "uptime": metrics.uptime_seconds,
        });

        running
            .bus
            .publish(
                &format!("{}.device_metrics", self.incoming_subject),
                message.to_string().into_bytes(),
            )
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

    fn test_app() -> TelemetryApplication {
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
        let settings = DeviceMetricsConfig {
            channel: 0,
            publish_period: DurationValue(Duration::from_secs(300)),
        };
        TelemetryApplication::new(&config, &settings)
    }

    #[test]
    fn test_device_metrics_payload() {
        let telemetry = build_device_metrics(Instant::now());
        let Some(telemetry::Variant::DeviceMetrics(metrics)) = telemetry.variant else {
            panic!("expected device metrics variant");
        };
        assert_eq!(metrics.battery_level, Some(EXTERNAL_POWER_BATTERY_LEVEL));
        assert_eq!(metrics.voltage, Some(5.0));
        assert_eq!(metrics.uptime_seconds, Some(0));
    }

    #[tokio::test]
    async fn test_incoming_device_metrics_are_published() {
        let app = test_app();
        let bus = Arc::new(MemoryBus::new());
        app.start(bus.clone(), Arc::new(MockSink::new())).await.unwrap();

        let telemetry = Telemetry {
            time: 1_700_000_000,
            variant: Some(telemetry::Variant::DeviceMetrics(DeviceMetrics {
                battery_level: Some(84),
                voltage: Some(3.9),
                channel_utilization: Some(4.5),
                air_util_tx: Some(0.4),
                uptime_seconds: Some(1234),
            })),
        };
        let packet = MeshPacket {
            to: BROADCAST_ADDR,
            from: 0x0A0B_0C0D,
            id: 2,
            channel_id: 0,
            hop_limit: 7,
            hop_start: 7,
            want_ack: false,
            via_mqtt: false,
            rx_rssi_dbm: -95,
            rx_snr_db: 2.0,
            data: Data::new(PortNum::TelemetryApp, telemetry.encode_to_vec()),
        };

        app.handle_incoming(&packet).await.unwrap();

        let published = bus.published();
        assert_eq!(published.len(), 1);
        assert_eq!(published[0].subject, "mesh.node1.in.telemetry.device_metrics");
        let value: serde_json::Value = serde_json::from_slice(&published[0].payload).unwrap();
        assert_eq!(value["battery_level"], 84);
        assert_eq!(value["uptime"], 1234);
        assert_eq!(value["from"], "0a0b0c0d");

        app.stop().await;
    }

    #[tokio::test]
    async fn test_non_device_metrics_telemetry_is_ignored() {
        let app = test_app();
        let bus = Arc::new(MemoryBus::new());
        app.start(bus.clone(), Arc::new(MockSink::new())).await.unwrap();

        let telemetry = Telemetry {
            time: 1_700_000_000,
            variant: None,
        };
        let packet = MeshPacket {
            to: BROADCAST_ADDR,
            from: 1,
            id: 3,
            channel_id: 0,
            hop_limit: 7,
            hop_start: 7,
            want_ack: false,
            via_mqtt: false,
            rx_rssi_dbm: 0,
            rx_snr_db: 0.0,
            data: Data::new(PortNum::TelemetryApp, telemetry.encode_to_vec()),
        };

        app.handle_incoming(&packet).await.unwrap();
        assert!(bus.published().is_empty());

        app.stop().await;
    }
}
