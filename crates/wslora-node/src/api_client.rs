//! Request/response API client over the serial link.
//!
//! One dedicated OS thread blocks on the serial port and routes every
//! decoded frame: unsolicited frames go to the event channel, response
//! frames go to the single pending request. At most one request is in
//! flight at any time; concurrent callers are serialized on an async
//! mutex, so correlating responses by type code alone is sound.

use std::sync::Mutex as StdMutex;
use std::thread::JoinHandle;
use std::time::Duration;

use tokio::sync::{mpsc, watch, Mutex};
use tracing::{debug, error, warn};
use wslora_radio_protocol::{Event, Frame, Request, Response};

use crate::error::{NodeError, Result};
use crate::serial_link::{SerialLink, SerialWriter};

/// Default bound for a request/response exchange.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(1);

/// Client for the dongle's request/response API plus its unsolicited
/// event stream.
pub struct ApiClient {
    writer: StdMutex<SerialWriter>,
    request_lock: Mutex<()>,
    response_rx: Mutex<mpsc::Receiver<Frame>>,
    reader: StdMutex<Option<JoinHandle<()>>>,
}

impl ApiClient {
    /// Open the serial port and start the reader thread.
    ///
    /// Unsolicited messages are delivered on `events_tx`. A fatal I/O
    /// error on the port trips `shutdown` and terminates the reader; the
    /// reader also exits once `shutdown` is set by anyone else.
    pub fn open(
        port_name: &str,
        events_tx: mpsc::Sender<Event>,
        shutdown: watch::Sender<bool>,
    ) -> Result<ApiClient> {
        let mut link = SerialLink::open(port_name)?;
        let writer = link.writer()?;

        let (response_tx, response_rx) = mpsc::channel(4);
        let shutdown_rx = shutdown.subscribe();

        let reader = std::thread::Builder::new()
            .name("serial-reader".to_string())
            .spawn(move || {
                reader_main(&mut link, &events_tx, &response_tx, &shutdown, &shutdown_rx);
            })
            .map_err(NodeError::Io)?;

        Ok(ApiClient {
            writer: StdMutex::new(writer),
            request_lock: Mutex::new(()),
            response_rx: Mutex::new(response_rx),
            reader: StdMutex::new(Some(reader)),
        })
    }

    /// Send a request and wait up to `timeout` for its paired response.
    ///
    /// Response frames carrying any other type code are logged and
    /// skipped; they belong to nobody once their own request has timed
    /// out.
    pub async fn send_request(&self, request: Request, timeout: Duration) -> Result<Response> {
        let _in_flight = self.request_lock.lock().await;
        let mut response_rx = self.response_rx.lock().await;

        // Drop responses left over from a request that timed out earlier.
        while response_rx.try_recv().is_ok() {}

        let frame = request.encode();
        self.writer.lock().unwrap().send_frame(&frame)?;

        let expected = request.response_code();
        let deadline = tokio::time::Instant::now() + timeout;

        loop {
            let frame = tokio::time::timeout_at(deadline, response_rx.recv())
                .await
                .map_err(|_| NodeError::Timeout)?
                .ok_or(NodeError::Closed)?;

            if frame.frame_type != expected {
                let mismatch = wslora_radio_protocol::ProtocolError::UnexpectedType {
                    expected,
                    actual: frame.frame_type,
                };
                warn!(error = %mismatch, "discarding stray response frame");
                continue;
            }

            return Ok(Response::decode(&frame)?);
        }
    }

    /// Send a frame without waiting for any response.
    ///
    /// Used for the best-effort standby on the shutdown path, where the
    /// reader may already be gone.
    pub fn send_and_forget(&self, request: Request) -> Result<()> {
        self.writer.lock().unwrap().send_frame(&request.encode())
    }

    /// Wait for the reader thread to exit. Call after tripping shutdown.
    pub fn join_reader(&self) {
        if let Some(handle) = self.reader.lock().unwrap().take() {
            let _ = handle.join();
        }
    }
}

fn reader_main(
    link: &mut SerialLink,
    events_tx: &mpsc::Sender<Event>,
    response_tx: &mpsc::Sender<Frame>,
    shutdown: &watch::Sender<bool>,
    shutdown_rx: &watch::Receiver<bool>,
) {
    loop {
        if *shutdown_rx.borrow() {
            return;
        }

        match link.recv_frame() {
            Ok(frame) => {
                let code = frame.frame_type;
                if Event::is_event_code(code) {
                    match Event::decode(&frame) {
                        Ok(event) => {
                            if events_tx.blocking_send(event).is_err() {
                                // Event consumer is gone; the node is
                                // tearing down.
                                return;
                            }
                        }
                        Err(e) => debug!(error = %e, "dropping malformed event frame"),
                    }
                } else if Response::is_response_code(code) {
                    if response_tx.try_send(frame).is_err() {
                        debug!(
                            code = format_args!("0x{code:02X}"),
                            "dropping response with no pending request"
                        );
                    }
                } else {
                    debug!(
                        code = format_args!("0x{code:02X}"),
                        "dropping frame with unknown type"
                    );
                }
            }

            // No complete frame within the read timeout; keep reading.
            Err(NodeError::Timeout) => continue,

            // Malformed frame: log, resynchronize, continue.
            Err(NodeError::Protocol(e)) => debug!(error = %e, "dropping malformed frame"),

            // Port is gone: take the whole node down.
            Err(e) => {
                error!(error = %e, "serial port failed, shutting down");
                let _ = shutdown.send(true);
                return;
            }
        }
    }
}
