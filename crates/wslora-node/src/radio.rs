//! Radio driver: configuration, RX/TX state machine, deduplication.
//!
//! The driver brings the dongle into a configured receiving state and then
//! runs a single worker task that pumps unsolicited events and serializes
//! outbound transmissions. The dongle's RX⇄TX fallback policy keeps the
//! receiver open between our explicit mode switches.
//!
//! ## State machine
//!
//! ```text
//!            startup complete
//!   Idle ───────────────────────▶ Rx ◀─────────────┐
//!                                  │                │ PacketTransmitted
//!                 outbound dequeue │                │ or RxTxTimeout
//!                                  ▼                │
//!                              TxPending ───────────┘
//!
//!   any state ──Close──▶ Standby
//! ```

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::{Duration, Instant};

use meshtastic_packet::PacketHeader;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use wslora_radio_protocol::{
    Event, FallbackMode, LoRaParams, Request, Response, StandbyMode, TxParams, POWER_RAMP_80,
};

use crate::api_client::{ApiClient, DEFAULT_REQUEST_TIMEOUT};
use crate::config::RadioSettings;
use crate::error::{NodeError, Result};

/// How long a (to, from, id) triple suppresses duplicates.
pub const SEEN_WINDOW: Duration = Duration::from_secs(30);

/// Capacity of the outbound packet queue.
pub const OUTBOUND_QUEUE_CAPACITY: usize = 16;

/// Airtime budget the dongle enforces per transmission, in milliseconds.
/// The request wait uses the same bound.
pub const TX_TIMEOUT_MS: u32 = 5000;

/// Look up the PA table entry for a configured output power.
pub fn tx_params_for_power(power_dbm: i32) -> Result<TxParams> {
    let (duty_cycle, hp_max, power) = match power_dbm {
        14 => (0x02, 0x02, 0x0E),
        17 => (0x02, 0x03, 0x11),
        20 => (0x03, 0x05, 0x14),
        22 => (0x04, 0x07, 0x16),
        other => return Err(NodeError::UnsupportedPower(other)),
    };
    Ok(TxParams {
        duty_cycle,
        hp_max,
        power,
        ramp_time: POWER_RAMP_80,
    })
}

/// A raw packet delivered by the dongle, with receive metadata.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReceivedPacket {
    /// Raw on-air bytes (header + ciphertext).
    pub data: Vec<u8>,
    /// RSSI of the whole packet in dBm.
    pub rssi_dbm: i8,
    /// SNR in dB.
    pub snr_db: i8,
    /// RSSI of the despread signal in dBm.
    pub signal_rssi_dbm: i8,
}

/// Driver states.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RadioState {
    /// Before startup completes.
    Idle,
    /// Receiver open.
    Rx,
    /// A transmission has been issued and not yet concluded.
    TxPending,
    /// Shut down.
    Standby,
}

// ============================================================================
// Seen-packet cache
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct SeenRecord {
    to: u32,
    from: u32,
    id: u32,
    received_at: Instant,
}

/// Sliding-window duplicate suppression keyed on (to, from, id).
///
/// Confined to the radio driver task; size is bounded by the packet
/// arrival rate times the window.
#[derive(Debug)]
pub struct SeenPacketCache {
    window: Duration,
    records: VecDeque<SeenRecord>,
}

impl SeenPacketCache {
    /// Create a cache with the given suppression window.
    pub fn new(window: Duration) -> Self {
        SeenPacketCache {
            window,
            records: VecDeque::new(),
        }
    }

    /// Record an observation of (to, from, id) at `now`.
    ///
    /// Returns `true` when the triple was already observed within the
    /// window (a duplicate). Otherwise appends a record and returns
    /// `false`. Expired records are purged on every call.
    pub fn observe(&mut self, to: u32, from: u32, id: u32, now: Instant) -> bool {
        while let Some(front) = self.records.front() {
            if now.duration_since(front.received_at) > self.window {
                self.records.pop_front();
            } else {
                break;
            }
        }

        let duplicate = self
            .records
            .iter()
            .any(|r| r.to == to && r.from == from && r.id == id);

        if !duplicate {
            self.records.push_back(SeenRecord {
                to,
                from,
                id,
                received_at: now,
            });
        }

        duplicate
    }

    /// Number of live records.
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// Whether the cache is empty.
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

// ============================================================================
// Driver
// ============================================================================

/// Handles returned by [`RadioDriver::start`].
pub struct RadioDriver {
    /// Enqueue raw packets for transmission. Bounded.
    pub outbound_tx: mpsc::Sender<Vec<u8>>,
    /// Deduplicated inbound packets.
    pub inbound_rx: mpsc::Receiver<ReceivedPacket>,
    /// Latest RSSI sample; most recent value wins.
    pub rssi_rx: watch::Receiver<i16>,
    /// The worker task.
    pub task: JoinHandle<()>,
}

impl RadioDriver {
    /// Configure the radio and start the driver worker.
    ///
    /// On a configuration failure the dongle is put back into standby
    /// best-effort and the error is returned.
    pub async fn start(
        api: Arc<ApiClient>,
        settings: RadioSettings,
        events_rx: mpsc::Receiver<Event>,
        shutdown_rx: watch::Receiver<bool>,
    ) -> Result<RadioDriver> {
        if let Err(e) = configure(&api, &settings).await {
            let _ = api
                .send_request(
                    Request::SetStandby(StandbyMode::Xosc),
                    Duration::from_millis(500),
                )
                .await;
            return Err(e);
        }

        info!(
            frequency_hz = settings.frequency_hz,
            power_dbm = settings.power_dbm,
            "radio configured, receiver open"
        );

        let (outbound_tx, outbound_rx) = mpsc::channel(OUTBOUND_QUEUE_CAPACITY);
        let (inbound_tx, inbound_rx) = mpsc::channel(OUTBOUND_QUEUE_CAPACITY);
        let (rssi_tx, rssi_rx) = watch::channel(0i16);

        let worker = Worker {
            api,
            state: RadioState::Idle,
            seen: SeenPacketCache::new(SEEN_WINDOW),
            inbound_tx,
            rssi_tx,
            time_on_air_ms: 0,
        };
        let task = tokio::spawn(worker.run(events_rx, outbound_rx, shutdown_rx));

        Ok(RadioDriver {
            outbound_tx,
            inbound_rx,
            rssi_rx,
            task,
        })
    }
}

/// Run the startup sequence from §"startup" of the dongle protocol: set
/// the fallback mode, the frequency (verifying the echo), the PA table
/// entry, the modulation parameters, then open the receiver.
async fn configure(api: &ApiClient, settings: &RadioSettings) -> Result<()> {
    api.send_request(
        Request::SetFallbackMode(FallbackMode::StandbyXoscRx),
        DEFAULT_REQUEST_TIMEOUT,
    )
    .await?;

    let response = api
        .send_request(
            Request::SetFrequency {
                frequency_hz: settings.frequency_hz,
            },
            DEFAULT_REQUEST_TIMEOUT,
        )
        .await?;
    if let Response::Frequency { frequency_hz } = response {
        if frequency_hz != settings.frequency_hz {
            return Err(NodeError::FrequencyMismatch {
                requested: settings.frequency_hz,
                echoed: frequency_hz,
            });
        }
    }

    let tx_params = tx_params_for_power(settings.power_dbm)?;
    api.send_request(Request::SetTxParams(tx_params), DEFAULT_REQUEST_TIMEOUT)
        .await?;

    api.send_request(
        Request::SetLoRaParams(LoRaParams {
            spreading_factor: settings.spreading_factor,
            bandwidth: settings.bandwidth,
            coding_rate: settings.coding_rate,
            low_data_rate: false,
        }),
        DEFAULT_REQUEST_TIMEOUT,
    )
    .await?;

    api.send_request(
        Request::SetRx {
            timeout_ms: 0,
            continuous_rssi: true,
        },
        DEFAULT_REQUEST_TIMEOUT,
    )
    .await?;

    Ok(())
}

struct Worker {
    api: Arc<ApiClient>,
    state: RadioState,
    seen: SeenPacketCache,
    inbound_tx: mpsc::Sender<ReceivedPacket>,
    rssi_tx: watch::Sender<i16>,
    time_on_air_ms: u64,
}

impl Worker {
    async fn run(
        mut self,
        mut events_rx: mpsc::Receiver<Event>,
        mut outbound_rx: mpsc::Receiver<Vec<u8>>,
        mut shutdown_rx: watch::Receiver<bool>,
    ) {
        self.state = RadioState::Rx;

        let mut outbound_open = true;
        loop {
            tokio::select! {
                _ = shutdown_rx.changed() => {
                    if *shutdown_rx.borrow() {
                        break;
                    }
                }

                event = events_rx.recv() => match event {
                    Some(event) => self.handle_event(event).await,
                    None => break,
                },

                data = outbound_rx.recv(), if outbound_open && self.state == RadioState::Rx => {
                    match data {
                        Some(data) => self.transmit(data).await,
                        None => outbound_open = false,
                    }
                }
            }
        }

        // Best-effort standby on the way out; the reader may already be
        // gone, so do not wait for the echo.
        self.state = RadioState::Standby;
        let _ = self.api.send_and_forget(Request::SetStandby(StandbyMode::Xosc));
        debug!(
            time_on_air_ms = self.time_on_air_ms,
            "radio driver stopped"
        );
    }

    async fn handle_event(&mut self, event: Event) {
        match event {
            Event::PacketReceived {
                packet_rssi_dbm,
                snr_db,
                signal_rssi_dbm,
                data,
            } => {
                metrics::counter!("wslora.radio.packets_received").increment(1);

                let duplicate = match PacketHeader::parse(&data) {
                    Ok(header) => {
                        self.seen
                            .observe(header.to, header.from, header.id, Instant::now())
                    }
                    // Shorter than a mesh header; let the router log it.
                    Err(_) => false,
                };

                if duplicate {
                    debug!(len = data.len(), "suppressing duplicate packet");
                    metrics::counter!("wslora.radio.packets_deduplicated").increment(1);
                } else {
                    let _ = self
                        .inbound_tx
                        .send(ReceivedPacket {
                            data,
                            rssi_dbm: packet_rssi_dbm,
                            snr_db,
                            signal_rssi_dbm,
                        })
                        .await;
                }

                self.state = RadioState::Rx;
                self.switch_to_rx().await;
            }

            Event::PacketTransmitted { time_on_air_ms } => {
                self.time_on_air_ms += u64::from(time_on_air_ms);
                metrics::counter!("wslora.radio.packets_transmitted").increment(1);
                metrics::counter!("wslora.radio.time_on_air_ms")
                    .increment(u64::from(time_on_air_ms));
                debug!(time_on_air_ms, "packet transmitted");
                self.state = RadioState::Rx;
                self.switch_to_rx().await;
            }

            Event::RxTxTimeout => {
                // RX is open-ended, so a timeout always concerns a
                // transmission.
                warn!("transmit timed out");
                self.state = RadioState::Rx;
                self.switch_to_rx().await;
            }

            Event::ContinuousRssi { rssi_dbm } => {
                metrics::gauge!("wslora.radio.rssi_dbm").set(f64::from(rssi_dbm));
                self.rssi_tx.send_replace(rssi_dbm);
            }

            Event::Log(text) => {
                debug!(dongle_log = %text.trim_end(), "dongle");
            }
        }
    }

    async fn transmit(&mut self, data: Vec<u8>) {
        // Pre-seed the cache so our own transmission, echoed back by a
        // neighbour, is not forwarded again.
        if let Ok(header) = PacketHeader::parse(&data) {
            self.seen
                .observe(header.to, header.from, header.id, Instant::now());
        }

        self.state = RadioState::TxPending;
        let result = self
            .api
            .send_request(
                Request::Transmit {
                    timeout_ms: TX_TIMEOUT_MS,
                    data,
                },
                Duration::from_millis(u64::from(TX_TIMEOUT_MS)),
            )
            .await;

        match result {
            Ok(Response::Tx { busy: false }) => {
                // Stay in TxPending until PacketTransmitted or RxTxTimeout.
            }
            Ok(Response::Tx { busy: true }) => {
                warn!("transmit refused: {}", NodeError::RadioBusy);
                metrics::counter!("wslora.radio.tx_busy").increment(1);
                self.state = RadioState::Rx;
            }
            Ok(_) => {
                self.state = RadioState::Rx;
                self.switch_to_rx().await;
            }
            Err(e) => {
                warn!(error = %e, "transmit request failed");
                self.state = RadioState::Rx;
                self.switch_to_rx().await;
            }
        }
    }

    async fn switch_to_rx(&self) {
        let result = self
            .api
            .send_request(
                Request::SetRx {
                    timeout_ms: 0,
                    continuous_rssi: true,
                },
                DEFAULT_REQUEST_TIMEOUT,
            )
            .await;
        if let Err(e) = result {
            warn!(error = %e, "failed to re-open receiver");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tx_params_table() {
        let cases = [
            (14, 0x02, 0x02, 0x0E),
            (17, 0x02, 0x03, 0x11),
            (20, 0x03, 0x05, 0x14),
            (22, 0x04, 0x07, 0x16),
        ];
        for (dbm, duty_cycle, hp_max, power) in cases {
            let params = tx_params_for_power(dbm).unwrap();
            assert_eq!(params.duty_cycle, duty_cycle);
            assert_eq!(params.hp_max, hp_max);
            assert_eq!(params.power, power);
            assert_eq!(params.ramp_time, POWER_RAMP_80);
        }
    }

    #[test]
    fn test_tx_params_rejects_unsupported_power() {
        assert!(matches!(
            tx_params_for_power(18),
            Err(NodeError::UnsupportedPower(18))
        ));
        assert!(matches!(
            tx_params_for_power(0),
            Err(NodeError::UnsupportedPower(0))
        ));
    }

    #[test]
    fn test_seen_cache_suppresses_within_window() {
        let mut cache = SeenPacketCache::new(SEEN_WINDOW);
        let t0 = Instant::now();

        assert!(!cache.observe(0xFFFF_FFFF, 1, 100, t0));
        assert!(cache.observe(0xFFFF_FFFF, 1, 100, t0 + Duration::from_secs(5)));
        assert!(cache.observe(0xFFFF_FFFF, 1, 100, t0 + Duration::from_secs(29)));
        assert_eq!(cache.len(), 1);

        // A different triple is not a duplicate.
        assert!(!cache.observe(0xFFFF_FFFF, 1, 101, t0));
        assert!(!cache.observe(0xFFFF_FFFF, 2, 100, t0));
        assert_eq!(cache.len(), 3);
    }

    #[test]
    fn test_seen_cache_expires_after_window() {
        let mut cache = SeenPacketCache::new(SEEN_WINDOW);
        let t0 = Instant::now();

        assert!(!cache.observe(1, 2, 3, t0));
        let later = t0 + SEEN_WINDOW + Duration::from_secs(1);
        assert!(!cache.observe(1, 2, 3, later));
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn test_seen_cache_purges_old_records() {
        let mut cache = SeenPacketCache::new(SEEN_WINDOW);
        let t0 = Instant::now();

        for id in 0..100 {
            cache.observe(1, 2, id, t0);
        }
        assert_eq!(cache.len(), 100);

        cache.observe(1, 2, 1000, t0 + SEEN_WINDOW + Duration::from_secs(1));
        assert_eq!(cache.len(), 1);
    }
}
