//! Per-connection gateway between the transport and the dispatcher.
//!
//! A [`ConnectionAdapter`] decodes incoming frames, hands requests to the
//! dispatcher, and encodes every response it is given onto a
//! [`ResponseSink`]. It has no say over execution order.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

use tracing::{debug, warn};

use crate::dispatch::{Admission, ConnectionId, Dispatcher, ResponseTarget};
use crate::protocol::{Codec, CommandResponse, ErrorCode, ErrorObject, protocol_error_object};

const CONNECTION_TARGET: &str = concat!(env!("CARGO_PKG_NAME"), "::connection");

/// Outbound byte channel for one connection.
#[cfg_attr(test, mockall::automock)]
pub trait ResponseSink: Send + Sync {
    /// Queues an encoded frame for writing. Returns false once the
    /// connection can no longer accept frames.
    fn send(&self, frame: Vec<u8>) -> bool;

    /// Flushes queued frames and closes the outbound side.
    fn close(&self);
}

/// Whether the transport should keep reading after a frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flow {
    /// Keep the connection open.
    Continue,
    /// Close the connection; a best-effort error has already been queued.
    Close,
}

/// Gateway owning one client connection.
pub struct ConnectionAdapter {
    id: ConnectionId,
    codec: Codec,
    dispatcher: Dispatcher,
    sink: Box<dyn ResponseSink>,
    closed: AtomicBool,
}

impl ConnectionAdapter {
    /// Creates an adapter and attaches it to the dispatcher.
    pub fn open(dispatcher: Dispatcher, codec: Codec, sink: Box<dyn ResponseSink>) -> Arc<Self> {
        let adapter = Arc::new(Self {
            id: ConnectionId::next(),
            codec,
            dispatcher,
            sink,
            closed: AtomicBool::new(false),
        });
        let target: Arc<dyn ResponseTarget> = adapter.clone();
        let weak: Weak<dyn ResponseTarget> = Arc::downgrade(&target);
        adapter.dispatcher.attach(adapter.id, weak);
        debug!(target: CONNECTION_TARGET, connection = %adapter.id, "connection opened");
        adapter
    }

    /// Identifier the dispatcher knows this connection by.
    pub fn id(&self) -> ConnectionId {
        self.id
    }

    /// Handles one received frame.
    ///
    /// Frames whose request id cannot be recovered are answered with a
    /// `null`-id error and end the connection. Every other failure is
    /// answered against its id and the connection stays open.
    pub fn on_request_bytes(&self, bytes: &[u8]) -> Flow {
        let entries = match self.codec.decode(bytes) {
            Ok(entries) => entries,
            Err(error) => {
                warn!(
                    target: CONNECTION_TARGET,
                    connection = %self.id,
                    %error,
                    "unrecoverable request frame"
                );
                self.send(&CommandResponse::uncorrelated(protocol_error_object(&error)));
                return Flow::Close;
            }
        };

        for entry in entries {
            match entry {
                Ok(request) => {
                    let id = request.id().clone();
                    match self.dispatcher.enqueue(self.id, request) {
                        Ok(Admission::Queued(_)) => {}
                        Ok(Admission::Completed(response)) => self.send(&response),
                        Err(error) => {
                            self.send(&CommandResponse::failure(id, error.to_error_object()));
                        }
                    }
                }
                Err(rejected) => {
                    debug!(
                        target: CONNECTION_TARGET,
                        connection = %self.id,
                        request_id = %rejected.id,
                        error = %rejected.error,
                        "malformed request envelope"
                    );
                    self.send(&CommandResponse::failure(
                        rejected.id,
                        protocol_error_object(&rejected.error),
                    ));
                }
            }
        }
        Flow::Continue
    }

    /// Rejects a frame that exceeded the transport's size limit.
    pub fn on_oversized_frame(&self, limit: usize) {
        warn!(
            target: CONNECTION_TARGET,
            connection = %self.id,
            limit,
            "request frame exceeds size limit"
        );
        let error = ErrorObject::new(ErrorCode::InvalidRequest).with_data(serde_json::json!({
            "reason": format!("request frame exceeds {limit} bytes"),
        }));
        self.send(&CommandResponse::uncorrelated(error));
    }

    /// Cancels outstanding work and closes the outbound side. Idempotent.
    pub fn on_close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        let cancelled = self.dispatcher.cancel(self.id);
        self.sink.close();
        debug!(
            target: CONNECTION_TARGET,
            connection = %self.id,
            cancelled,
            "connection closed"
        );
    }

    /// Returns true once [`ConnectionAdapter::on_close`] has run.
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    fn send(&self, response: &CommandResponse) {
        if self.is_closed() {
            return;
        }
        if !self.sink.send(self.codec.encode(response)) {
            debug!(
                target: CONNECTION_TARGET,
                connection = %self.id,
                "outbound channel closed; response dropped"
            );
        }
    }
}

impl ResponseTarget for ConnectionAdapter {
    fn deliver(&self, response: CommandResponse) {
        self.send(&response);
    }
}

impl std::fmt::Debug for ConnectionAdapter {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        formatter
            .debug_struct("ConnectionAdapter")
            .field("id", &self.id)
            .field("closed", &self.is_closed())
            .finish_non_exhaustive()
    }
}
