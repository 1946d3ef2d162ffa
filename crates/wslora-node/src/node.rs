//! The mesh node: channel demux, application dispatch, forwarding.
//!
//! A [`Node`] owns one radio driver, the channel list, the registered
//! applications, the packet-id generator, a timer loop, and the bus
//! connection. `start()` acquires the serial port, configures the radio,
//! launches the worker tasks, and starts the applications; `stop()`
//! tears everything down in reverse order and is idempotent.

use std::sync::Arc;
use std::sync::Mutex as StdMutex;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use meshtastic_packet::proto::{Data, PortNum};
use meshtastic_packet::{
    Channel, MeshPacket, PacketError, PacketFlags, PacketIdGenerator, FLAGS_OFFSET, HEADER_LEN,
};
use rand::Rng;
use serde_json::json;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, warn};

use crate::api_client::ApiClient;
use crate::apps::{Application, MessageSink};
use crate::bus::{MessageBus, NatsBus};
use crate::config::{NodeConfig, RetransmitConfig};
use crate::error::{NodeError, Result};
use crate::event_loop::EventLoop;
use crate::radio::{RadioDriver, ReceivedPacket};

/// Base delay before re-transmitting a forwarded packet.
const FORWARD_DELAY: Duration = Duration::from_secs(1);

/// Initial hop budget for locally originated packets.
const DEFAULT_HOP_LIMIT: u8 = 7;

fn hex_string(data: &[u8]) -> String {
    data.iter().map(|b| format!("{b:02x}")).collect()
}

fn random_jitter(upper: Duration) -> Duration {
    let upper_ms = upper.as_millis() as u64;
    if upper_ms == 0 {
        return Duration::ZERO;
    }
    Duration::from_millis(rand::thread_rng().gen_range(0..upper_ms))
}

fn unix_time_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

// ============================================================================
// Send-only sink handed to applications
// ============================================================================

struct NodeSink {
    node_id: u32,
    channels: Arc<Vec<Channel>>,
    outbound_tx: mpsc::Sender<Vec<u8>>,
    packet_ids: StdMutex<PacketIdGenerator>,
    event_loop: EventLoop,
    retransmit: RetransmitConfig,
}

#[async_trait]
impl MessageSink for NodeSink {
    async fn send_application_message(
        &self,
        channel_id: u32,
        destination: u32,
        port_num: PortNum,
        payload: Vec<u8>,
    ) -> Result<()> {
        let channel = self
            .channels
            .iter()
            .find(|c| c.id() == channel_id)
            .ok_or(NodeError::UnknownChannel(channel_id))?;

        let id = self.packet_ids.lock().unwrap().next_id();
        let packet = MeshPacket {
            to: destination,
            from: self.node_id,
            id,
            channel_id,
            hop_limit: DEFAULT_HOP_LIMIT,
            hop_start: DEFAULT_HOP_LIMIT,
            want_ack: false,
            via_mqtt: false,
            rx_rssi_dbm: 0,
            rx_snr_db: 0.0,
            data: Data::new(port_num, payload),
        };

        let raw = channel.encode(&packet);
        debug!(
            to = format_args!("{destination:x}"),
            id = format_args!("{id:x}"),
            port = ?port_num,
            len = raw.len(),
            "sending application message"
        );

        self.outbound_tx
            .send(raw.clone())
            .await
            .map_err(|_| NodeError::Closed)?;

        // Schedule the configured repeat transmissions of the identical
        // ciphertext.
        for delay in &self.retransmit.period {
            let at = Instant::now() + Duration::from(*delay) + random_jitter(self.retransmit.jitter.0);
            let tx = self.outbound_tx.clone();
            let data = raw.clone();
            self.event_loop.post(
                move || {
                    if tx.try_send(data).is_err() {
                        warn!("outbound queue unavailable, dropping retransmission");
                    }
                },
                at,
            );
        }

        Ok(())
    }
}

// ============================================================================
// Inbound router
// ============================================================================

struct Router {
    node_id: u32,
    channels: Arc<Vec<Channel>>,
    applications: Arc<Vec<Arc<dyn Application>>>,
    forward: bool,
    jitter: Duration,
    outbound_tx: mpsc::Sender<Vec<u8>>,
    event_loop: EventLoop,
}

impl Router {
    /// Route one deduplicated packet from the radio.
    async fn handle_inbound(&self, received: ReceivedPacket) {
        debug!(raw = %hex_string(&received.data), "received packet");

        let mut handled = false;
        let mut for_this_node = false;

        for channel in self.channels.iter() {
            match channel.decode(&received.data) {
                Ok(mut packet) => {
                    packet.rx_rssi_dbm = i32::from(received.rssi_dbm);
                    packet.rx_snr_db = f32::from(received.snr_db);
                    for_this_node = packet.to == self.node_id;
                    self.dispatch(&packet).await;
                    handled = true;
                    break;
                }
                Err(PacketError::ChannelMismatch { .. }) => continue,
                Err(e) => {
                    debug!(channel = channel.name(), error = %e, "channel failed to decode packet");
                    continue;
                }
            }
        }

        if !handled {
            debug!(raw = %hex_string(&received.data), "packet not decodable on any channel");
            metrics::counter!("wslora.node.packets_unhandled").increment(1);
        }

        if !for_this_node && self.forward {
            self.schedule_forward(&received.data);
        }
    }

    async fn dispatch(&self, packet: &MeshPacket) {
        debug!(
            from = format_args!("{:x}", packet.from),
            to = format_args!("{:x}", packet.to),
            port = ?packet.data.port(),
            rssi_dbm = packet.rx_rssi_dbm,
            snr_db = packet.rx_snr_db,
            "packet decoded"
        );
        metrics::counter!("wslora.node.packets_decoded").increment(1);

        for app in self.applications.iter() {
            if app.port_num() != packet.data.port() {
                continue;
            }
            if let Err(e) = app.handle_incoming(packet).await {
                error!(port = ?packet.data.port(), error = %e, "application failed to handle packet");
            }
        }
    }

    /// Queue a store-and-forward retransmission of somebody else's
    /// packet: same ciphertext, hop limit decremented.
    fn schedule_forward(&self, raw: &[u8]) {
        if raw.len() < HEADER_LEN {
            return;
        }

        let flags = PacketFlags::from_byte(raw[FLAGS_OFFSET]);
        if flags.hop_limit == 0 {
            debug!("hop limit exhausted, not forwarding");
            return;
        }

        let mut data = raw.to_vec();
        data[FLAGS_OFFSET] = PacketFlags {
            hop_limit: flags.hop_limit - 1,
            ..flags
        }
        .to_byte();

        debug!(hop_limit = flags.hop_limit - 1, "scheduling retransmission");
        metrics::counter!("wslora.node.packets_forwarded").increment(1);

        let at = Instant::now() + FORWARD_DELAY + random_jitter(self.jitter);
        let tx = self.outbound_tx.clone();
        self.event_loop.post(
            move || {
                if tx.try_send(data).is_err() {
                    warn!("outbound queue unavailable, dropping forwarded packet");
                }
            },
            at,
        );
    }
}

// ============================================================================
// Node
// ============================================================================

struct Running {
    api: Arc<ApiClient>,
    shutdown: watch::Sender<bool>,
    tasks: Vec<JoinHandle<()>>,
}

/// A mesh node bound to one radio and one bus connection.
pub struct Node {
    port_name: String,
    config: NodeConfig,
    channels: Arc<Vec<Channel>>,
    retransmit: RetransmitConfig,
    applications: Vec<Arc<dyn Application>>,
    event_loop: EventLoop,
    running: Option<Running>,
}

impl Node {
    /// Build a node from its configuration. The default `LongFast`
    /// channel is always present; configured channels follow it.
    pub fn new(port_name: &str, config: NodeConfig) -> Result<Self> {
        let mut channels = vec![Channel::default_channel()];
        for ch in &config.channels {
            channels.push(Channel::new(ch.id, &ch.name, ch.key_bytes()?));
        }

        let retransmit = config.retransmit.clone().unwrap_or_default();

        Ok(Node {
            port_name: port_name.to_string(),
            config,
            channels: Arc::new(channels),
            retransmit,
            applications: Vec::new(),
            event_loop: EventLoop::new(),
            running: None,
        })
    }

    /// Register an application. Must be called before [`start`](Self::start).
    pub fn add_application(&mut self, app: Arc<dyn Application>) {
        self.applications.push(app);
    }

    /// Acquire the serial port, configure the radio, connect the bus,
    /// launch the worker tasks, and start the applications.
    pub async fn start(&mut self) -> Result<()> {
        if self.running.is_some() {
            return Err(NodeError::Config("node already started".to_string()));
        }

        let (shutdown_tx, _) = watch::channel(false);
        let (events_tx, events_rx) = mpsc::channel(32);

        let api = Arc::new(ApiClient::open(
            &self.port_name,
            events_tx,
            shutdown_tx.clone(),
        )?);

        let driver = match RadioDriver::start(
            api.clone(),
            self.config.radio,
            events_rx,
            shutdown_tx.subscribe(),
        )
        .await
        {
            Ok(driver) => driver,
            Err(e) => {
                let _ = shutdown_tx.send(true);
                api.join_reader();
                return Err(e);
            }
        };

        let bus: Arc<dyn MessageBus> = match NatsBus::connect(&self.config.nats_url).await {
            Ok(bus) => Arc::new(bus),
            Err(e) => {
                let _ = shutdown_tx.send(true);
                let _ = driver.task.await;
                api.join_reader();
                return Err(e);
            }
        };

        let sink = Arc::new(NodeSink {
            node_id: self.config.id.as_u32(),
            channels: self.channels.clone(),
            outbound_tx: driver.outbound_tx.clone(),
            packet_ids: StdMutex::new(PacketIdGenerator::new()),
            event_loop: self.event_loop.clone(),
            retransmit: self.retransmit.clone(),
        });

        let applications: Arc<Vec<Arc<dyn Application>>> =
            Arc::new(self.applications.clone());

        let router = Router {
            node_id: self.config.id.as_u32(),
            channels: self.channels.clone(),
            applications: applications.clone(),
            forward: self.retransmit.forward,
            jitter: self.retransmit.jitter.0,
            outbound_tx: driver.outbound_tx.clone(),
            event_loop: self.event_loop.clone(),
        };

        let mut tasks = Vec::new();

        // Timer loop.
        tasks.push(tokio::spawn({
            let el = self.event_loop.clone();
            async move { el.run().await }
        }));

        // Inbound routing.
        let mut inbound_rx = driver.inbound_rx;
        let mut inbound_shutdown = shutdown_tx.subscribe();
        tasks.push(tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = inbound_shutdown.changed() => {
                        if *inbound_shutdown.borrow() {
                            break;
                        }
                    }
                    packet = inbound_rx.recv() => match packet {
                        Some(packet) => router.handle_inbound(packet).await,
                        None => break,
                    },
                }
            }
        }));

        // RSSI bridge.
        let mut rssi_rx = driver.rssi_rx;
        let mut rssi_shutdown = shutdown_tx.subscribe();
        let rssi_bus = bus.clone();
        let rssi_subject = format!("{}.rssi", self.config.nats_subject_prefix);
        tasks.push(tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = rssi_shutdown.changed() => {
                        if *rssi_shutdown.borrow() {
                            break;
                        }
                    }
                    changed = rssi_rx.changed() => {
                        if changed.is_err() {
                            break;
                        }
                        let rssi = *rssi_rx.borrow_and_update();
                        let message = json!({
                            "timestamp": unix_time_millis(),
                            "rssi": rssi,
                        });
                        let result = rssi_bus
                            .publish(&rssi_subject, message.to_string().into_bytes())
                            .await;
                        if let Err(e) = result {
                            warn!(error = %e, "failed to publish RSSI sample");
                        }
                    }
                }
            }
        }));

        // Radio driver worker.
        tasks.push(driver.task);

        self.running = Some(Running {
            api,
            shutdown: shutdown_tx,
            tasks,
        });

        // Applications last, so everything they need is live.
        for app in applications.iter() {
            if let Err(e) = app.start(bus.clone(), sink.clone()).await {
                let _ = self.stop().await;
                return Err(e);
            }
        }

        Ok(())
    }

    /// Stop applications, the timer loop, and the worker tasks, then
    /// release the serial port. Safe to call again after success.
    pub async fn stop(&mut self) -> Result<()> {
        let Some(running) = self.running.take() else {
            return Ok(());
        };

        for app in &self.applications {
            app.stop().await;
        }

        self.event_loop.quit();
        let _ = running.shutdown.send(true);

        for task in running.tasks {
            let _ = task.await;
        }

        running.api.join_reader();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use meshtastic_packet::BROADCAST_ADDR;

    /// The captured broadcast from the default channel used across the
    /// codec tests; flags byte 0xE7 (hop_limit 7, hop_start 7).
    const CAPTURED_TEXT_PACKET: &[u8] = &[
        0xff, 0xff, 0xff, 0xff, 0x44, 0x33, 0x22, 0x11, 0x5f, 0xb1, 0x3e, 0xfb, 0xe7, 0x08,
        0x00, 0x00, 0x7d, 0x7f, 0xa9, 0x49, 0x1a, 0xd1, 0x39, 0xf4, 0xf9, 0xf3, 0x57, 0x5b,
        0x83, 0x05, 0x4d, 0xa6, 0xdb, 0x2c, 0x25, 0xa8, 0x82, 0x25, 0x5f, 0xa4, 0x7e, 0x91,
        0x9f, 0xff, 0x39,
    ];

    fn test_router(
        node_id: u32,
        forward: bool,
    ) -> (Router, mpsc::Receiver<Vec<u8>>, EventLoop, JoinHandle<()>) {
        let (outbound_tx, outbound_rx) = mpsc::channel(16);
        let event_loop = EventLoop::new();
        let loop_task = tokio::spawn({
            let el = event_loop.clone();
            async move { el.run().await }
        });

        let router = Router {
            node_id,
            channels: Arc::new(vec![Channel::default_channel()]),
            applications: Arc::new(Vec::new()),
            forward,
            jitter: Duration::ZERO,
            outbound_tx,
            event_loop: event_loop.clone(),
        };
        (router, outbound_rx, event_loop, loop_task)
    }

    fn received(data: Vec<u8>) -> ReceivedPacket {
        ReceivedPacket {
            data,
            rssi_dbm: -90,
            snr_db: 4,
            signal_rssi_dbm: -85,
        }
    }

    #[tokio::test]
    async fn test_forward_decrements_hop_limit_only() {
        let (router, mut outbound_rx, event_loop, loop_task) =
            test_router(0x1122_3344, true);

        router
            .handle_inbound(received(CAPTURED_TEXT_PACKET.to_vec()))
            .await;

        let forwarded =
            tokio::time::timeout(Duration::from_secs(3), outbound_rx.recv())
                .await
                .expect("a retransmission should be scheduled")
                .unwrap();

        assert_eq!(forwarded.len(), CAPTURED_TEXT_PACKET.len());
        assert_eq!(forwarded[FLAGS_OFFSET], 0xE6); // hop_limit 7 -> 6
        for (i, (a, b)) in forwarded.iter().zip(CAPTURED_TEXT_PACKET).enumerate() {
            if i != FLAGS_OFFSET {
                assert_eq!(a, b, "byte {i} must be untouched");
            }
        }

        event_loop.quit();
        let _ = loop_task.await;
    }

    #[tokio::test]
    async fn test_no_forward_when_hop_limit_exhausted() {
        let (router, mut outbound_rx, event_loop, loop_task) =
            test_router(0x1122_3344, true);

        let mut data = CAPTURED_TEXT_PACKET.to_vec();
        data[FLAGS_OFFSET] = 0xE0; // hop_limit 0, hop_start 7
        router.handle_inbound(received(data)).await;

        tokio::time::sleep(Duration::from_millis(1500)).await;
        assert!(outbound_rx.try_recv().is_err());

        event_loop.quit();
        let _ = loop_task.await;
    }

    #[tokio::test]
    async fn test_no_forward_of_own_traffic() {
        // Node id equals the packet destination: the packet is for us.
        let (router, mut outbound_rx, event_loop, loop_task) =
            test_router(BROADCAST_ADDR, true);

        router
            .handle_inbound(received(CAPTURED_TEXT_PACKET.to_vec()))
            .await;

        tokio::time::sleep(Duration::from_millis(1500)).await;
        assert!(outbound_rx.try_recv().is_err());

        event_loop.quit();
        let _ = loop_task.await;
    }

    #[tokio::test]
    async fn test_forwarding_disabled_by_config() {
        let (router, mut outbound_rx, event_loop, loop_task) =
            test_router(0x1122_3344, false);

        router
            .handle_inbound(received(CAPTURED_TEXT_PACKET.to_vec()))
            .await;

        tokio::time::sleep(Duration::from_millis(1500)).await;
        assert!(outbound_rx.try_recv().is_err());

        event_loop.quit();
        let _ = loop_task.await;
    }

    #[tokio::test]
    async fn test_short_garbage_does_not_panic() {
        let (router, mut outbound_rx, event_loop, loop_task) =
            test_router(0x1122_3344, true);

        router.handle_inbound(received(vec![0xAA, 0x01, 0x02])).await;

        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(outbound_rx.try_recv().is_err());

        event_loop.quit();
        let _ = loop_task.await;
    }

    #[tokio::test]
    async fn test_sink_rejects_unknown_channel() {
        let (outbound_tx, _outbound_rx) = mpsc::channel(16);
        let sink = NodeSink {
            node_id: 0x1122_3344,
            channels: Arc::new(vec![Channel::default_channel()]),
            outbound_tx,
            packet_ids: StdMutex::new(PacketIdGenerator::new()),
            event_loop: EventLoop::new(),
            retransmit: RetransmitConfig::default(),
        };

        let result = sink
            .send_application_message(42, BROADCAST_ADDR, PortNum::TextMessageApp, vec![1])
            .await;
        assert!(matches!(result, Err(NodeError::UnknownChannel(42))));
    }

    #[tokio::test]
    async fn test_sink_encodes_a_decodable_packet() {
        let (outbound_tx, mut outbound_rx) = mpsc::channel(16);
        let sink = NodeSink {
            node_id: 0x1122_3344,
            channels: Arc::new(vec![Channel::default_channel()]),
            outbound_tx,
            packet_ids: StdMutex::new(PacketIdGenerator::new()),
            event_loop: EventLoop::new(),
            retransmit: RetransmitConfig::default(),
        };

        sink.send_application_message(0, BROADCAST_ADDR, PortNum::TextMessageApp, b"hey".to_vec())
            .await
            .unwrap();

        let raw = outbound_rx.recv().await.unwrap();
        let packet = Channel::default_channel().decode(&raw).unwrap();
        assert_eq!(packet.from, 0x1122_3344);
        assert_eq!(packet.to, BROADCAST_ADDR);
        assert_eq!(packet.hop_limit, DEFAULT_HOP_LIMIT);
        assert_eq!(packet.hop_start, DEFAULT_HOP_LIMIT);
        assert!(!packet.want_ack);
        assert_eq!(packet.data.payload, b"hey");
        assert_ne!(packet.id, 0);
    }
}
