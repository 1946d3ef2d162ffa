//! Node-info beacon application.
//!
//! Periodically broadcasts our [`User`] identity on the configured
//! channel and publishes received identities on `<prefix>.in.node_info`.

use std::sync::{Arc, Mutex, OnceLock};
use std::time::Duration;

use async_trait::async_trait;
use meshtastic_packet::proto::{PortNum, Role, User};
use meshtastic_packet::{MeshPacket, BROADCAST_ADDR};
use prost::Message;
use serde_json::json;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::apps::{schedule_repeating, Application, MessageSink};
use crate::bus::MessageBus;
use crate::config::{NodeConfig, NodeInfoConfig};
use crate::error::Result;
use crate::event_loop::EventLoop;

/// Delay before the first beacon after startup.
const INITIAL_DELAY: Duration = Duration::from_secs(10);

struct Running {
    bus: Arc<dyn MessageBus>,
    loop_task: Mutex<Option<JoinHandle<()>>>,
}

/// The node-info beacon.
pub struct NodeInfoApplication {
    user: User,
    channel: u32,
    period: Duration,
    incoming_subject: String,
    event_loop: EventLoop,
    state: OnceLock<Running>,
}

impl NodeInfoApplication {
    /// Create the application from the node identity and its section.
    pub fn new(config: &NodeConfig, settings: &NodeInfoConfig) -> Self {
        let user = User {
            id: format!("!{:x}", config.id.as_u32()),
            long_name: config.long_name.clone(),
            short_name: config.short_name.clone(),
            macaddr: config.mac_address.as_bytes().to_vec(),
            hw_model: config.hw_model as i32,
            is_licensed: false,
            role: Role::Client as i32,
            public_key: config.public_key.as_bytes().to_vec(),
        };

        NodeInfoApplication {
            user,
            channel: settings.channel,
            period: settings.publish_period.into(),
            incoming_subject: format!("{}.in.node_info", config.nats_subject_prefix),
            event_loop: EventLoop::new(),
            state: OnceLock::new(),
        }
    }
}

#[async_trait]
impl Application for NodeInfoApplication {
    fn port_num(&self) -> PortNum {
        PortNum::NodeinfoApp
    }

    async fn start(&self, bus: Arc<dyn MessageBus>, sink: Arc<dyn MessageSink>) -> Result<()> {
        let loop_task = {
            let el = self.event_loop.clone();
            tokio::spawn(async move { el.run().await })
        };

        let user_bytes = self.user.encode_to_vec();
        let channel = self.channel;
        let action: Arc<dyn Fn() + Send + Sync> = Arc::new(move || {
            let sink = sink.clone();
            let payload = user_bytes.clone();
            tokio::spawn(async move {
                let result = sink
                    .send_application_message(
                        channel,
                        BROADCAST_ADDR,
                        PortNum::NodeinfoApp,
                        payload,
                    )
                    .await;
                if let Err(e) = result {
                    warn!(error = %e, "failed to send node info");
                }
            });
        });
        schedule_repeating(self.event_loop.clone(), INITIAL_DELAY, self.period, action);

        let _ = self.state.set(Running {
            bus,
            loop_task: Mutex::new(Some(loop_task)),
        });
        info!(
            channel = self.channel,
            period = ?self.period,
            "started node info application"
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

        let user = User::decode(&packet.data.payload[..])
            .map_err(meshtastic_packet::PacketError::PayloadDecode)?;

        let message = json!({
            "id": user.id,
            "long_name": user.long_name,
            "short_name": user.short_name,
            "hw_model": user.hw_model,
            "from": crate::config::NodeId(packet.from),
            "rssi": packet.rx_rssi_dbm,
            "snr": packet.rx_snr_db,
        });

        running
            .bus
            .publish(&self.incoming_subject, message.to_string().into_bytes())
            .await
    }
}
