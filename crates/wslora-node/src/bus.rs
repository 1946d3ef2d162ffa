//! Message bus interface.
//!
//! The node and its applications only see the [`MessageBus`] trait: a
//! publish/subscribe pair on string subjects with opaque byte payloads.
//! Production wires in [`NatsBus`]; tests use the in-memory bus from
//! [`testing`].

use async_trait::async_trait;
use futures::StreamExt;
use tokio::sync::mpsc;
use tracing::debug;

use crate::error::{NodeError, Result};

/// A message delivered on a subscribed subject.
#[derive(Debug, Clone)]
pub struct BusMessage {
    /// Subject the message arrived on.
    pub subject: String,
    /// Raw payload bytes.
    pub payload: Vec<u8>,
}

/// Publish/subscribe access to the external message bus.
#[async_trait]
pub trait MessageBus: Send + Sync {
    /// Publish `payload` on `subject`.
    async fn publish(&self, subject: &str, payload: Vec<u8>) -> Result<()>;

    /// Subscribe to `subject`. Messages arrive on the returned channel
    /// until the bus connection or the subscription is dropped.
    async fn subscribe(&self, subject: &str) -> Result<mpsc::Receiver<BusMessage>>;
}

/// NATS-backed bus.
pub struct NatsBus {
    client: async_nats::Client,
}

impl NatsBus {
    /// Connect to a NATS server.
    pub async fn connect(url: &str) -> Result<Self> {
        let client = async_nats::connect(url)
            .await
            .map_err(|e| NodeError::Bus(e.to_string()))?;
        Ok(NatsBus { client })
    }
}

#[async_trait]
impl MessageBus for NatsBus {
    async fn publish(&self, subject: &str, payload: Vec<u8>) -> Result<()> {
        self.client
            .publish(subject.to_string(), payload.into())
            .await
            .map_err(|e| NodeError::Bus(e.to_string()))
    }

    async fn subscribe(&self, subject: &str) -> Result<mpsc::Receiver<BusMessage>> {
        let mut subscriber = self
            .client
            .subscribe(subject.to_string())
            .await
            .map_err(|e| NodeError::Bus(e.to_string()))?;

        let (tx, rx) = mpsc::channel(16);
        tokio::spawn(async move {
            while let Some(message) = subscriber.next().await {
                let bus_message = BusMessage {
                    subject: message.subject.to_string(),
                    payload: message.payload.to_vec(),
                };
                if tx.send(bus_message).await.is_err() {
                    debug!("bus subscription consumer dropped");
                    break;
                }
            }
        });

        Ok(rx)
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use std::collections::HashMap;
    use std::sync::Mutex;

    use super::*;

    /// In-memory bus for tests: records published messages and routes
    /// exact-subject subscriptions.
    #[derive(Default)]
    pub struct MemoryBus {
        published: Mutex<Vec<BusMessage>>,
        subscribers: Mutex<HashMap<String, Vec<mpsc::Sender<BusMessage>>>>,
    }

    impl MemoryBus {
        pub fn new() -> Self {
            Self::default()
        }

        /// Messages published so far.
        pub fn published(&self) -> Vec<BusMessage> {
            self.published.lock().unwrap().clone()
        }

        /// Inject a message to exact-subject subscribers, as if some
        /// other bus participant had published it.
        pub async fn inject(&self, subject: &str, payload: Vec<u8>) {
            let targets = {
                let subscribers = self.subscribers.lock().unwrap();
                subscribers.get(subject).cloned().unwrap_or_default()
            };
            for tx in targets {
                let _ = tx
                    .send(BusMessage {
                        subject: subject.to_string(),
                        payload: payload.clone(),
                    })
                    .await;
            }
        }
    }

    #[async_trait]
    impl MessageBus for MemoryBus {
        async fn publish(&self, subject: &str, payload: Vec<u8>) -> Result<()> {
            self.published.lock().unwrap().push(BusMessage {
                subject: subject.to_string(),
                payload,
            });
            Ok(())
        }

        async fn subscribe(&self, subject: &str) -> Result<mpsc::Receiver<BusMessage>> {
            let (tx, rx) = mpsc::channel(16);
            self.subscribers
                .lock()
                .unwrap()
                .entry(subject.to_string())
                .or_default()
                .push(tx);
            Ok(rx)
        }
    }
}
