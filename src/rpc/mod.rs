//! JSON-RPC correlation layer.
//!
//! Sends requests through a [Transport], matches responses to the calls waiting for
//! them, expires calls nobody answered and surfaces inbound requests.

pub(crate) mod config;
mod pending_calls;
pub mod transport;

use std::time::{Duration, Instant};

use tracing::{debug, trace};

use crate::common::messages::{Message, MessageType, RequestSpecific, ResponseSpecific};
use crate::common::Contact;
use crate::{Error, RpcError};

pub use crate::common::messages;
pub use config::{
    Config, ALPHA, DEFAULT_REQUEST_TIMEOUT, T_EXPIRE, T_REFRESH, T_REPLICATE, T_REPUBLISH,
};
pub use pending_calls::{PendingCall, PendingCalls};
pub use transport::memory::{MemoryNetwork, MemoryTransport};
pub use transport::{Transport, UdpTransport};

#[derive(Debug)]
/// Something the owner of an [Rpc] has to act on.
pub enum RpcEvent<C> {
    /// A well formed request from a peer, answer it with [Rpc::response].
    Request { id: String, request: RequestSpecific },
    /// A call completed, either with the peer's response or with the reason it failed.
    Completion {
        id: String,
        to: Contact,
        context: C,
        result: Result<ResponseSpecific, RpcError>,
    },
    /// Bytes from `from` that do not decode as a message.
    Dropped { from: String, reason: String },
}

#[derive(Debug)]
/// Correlates requests and responses exchanged through a [Transport].
///
/// `C` is the context attached to each call and handed back on its completion.
pub struct Rpc<C> {
    transport: Box<dyn Transport>,
    contact: Contact,
    pending: PendingCalls<C>,
    /// Completions produced outside of [Rpc::tick], such as failed sends.
    completions: Vec<RpcEvent<C>>,
    request_timeout: Duration,
    sweep_interval: Duration,
    last_sweep: Instant,
}

impl<C> Rpc<C> {
    /// Create an Rpc over `transport`, sweeping stale calls every `sweep_interval`.
    pub fn new(
        transport: Box<dyn Transport>,
        request_timeout: Duration,
        sweep_interval: Duration,
    ) -> Result<Self, Error> {
        let contact = Contact::new(transport.local_address())?;

        Ok(Rpc {
            transport,
            contact,
            pending: PendingCalls::new(),
            completions: Vec::new(),
            request_timeout,
            sweep_interval,
            last_sweep: Instant::now(),
        })
    }

    // === Getters ===

    /// This node's own contact, as advertised to peers.
    pub fn contact(&self) -> &Contact {
        &self.contact
    }

    pub fn pending_calls(&self) -> &PendingCalls<C> {
        &self.pending
    }

    // === Public Methods ===

    /// Send a request and return its correlation id.
    ///
    /// With a `context` the call is tracked until a response, a transport failure or
    /// the timeout completes it. Without one the request is fire-and-forget and any
    /// response is dropped.
    pub fn request(&mut self, to: &Contact, request: RequestSpecific, context: Option<C>) -> String {
        let message = Message::request(request);
        let id = message.id.clone();

        trace!(context = "socket_message_sending", ?message, to = %to);

        if let Some(context) = context {
            self.pending.insert(
                id.clone(),
                PendingCall {
                    to: to.clone(),
                    issued_at: Instant::now(),
                    context,
                },
            );
        }

        if let Err(error) = self.send(to, &message) {
            debug!(?error, to = %to, "Error sending request message");

            if let Some(call) = self.pending.remove(&id) {
                self.completions.push(RpcEvent::Completion {
                    id: id.clone(),
                    to: call.to,
                    context: call.context,
                    result: Err(RpcError::Unreachable(error.to_string())),
                });
            }
        }

        id
    }

    /// Answer the request with correlation id `id`.
    pub fn response(&mut self, to: &Contact, id: &str, response: ResponseSpecific) {
        let message = Message::response(id, response);

        trace!(context = "socket_message_sending", ?message, to = %to);

        if let Err(error) = self.send(to, &message) {
            debug!(?error, to = %to, "Error sending response message");
        }
    }

    /// Drain completed calls, sweep stale calls when due, and handle at most one
    /// inbound message.
    pub fn tick(&mut self) -> Vec<RpcEvent<C>> {
        let mut events = std::mem::take(&mut self.completions);

        let now = Instant::now();
        if now.saturating_duration_since(self.last_sweep) >= self.sweep_interval {
            self.last_sweep = now;
            events.extend(self.expire_stale_calls_at(now));
        }

        if let Some((bytes, from)) = self.transport.recv() {
            if let Some(event) = self.on_bytes_received(&bytes, &from) {
                events.push(event);
            }
        }

        events
    }

    /// Parse inbound bytes into a request event or the completion of a pending call.
    ///
    /// Malformed messages become [RpcEvent::Dropped], responses nobody is waiting for
    /// are ignored.
    pub fn on_bytes_received(&mut self, bytes: &[u8], from: &str) -> Option<RpcEvent<C>> {
        let message = match Message::from_bytes(bytes) {
            Ok(message) => message,
            Err(error) => {
                trace!(
                    context = "socket_error",
                    ?error,
                    ?from,
                    message = ?String::from_utf8_lossy(bytes),
                    "Received invalid message."
                );
                return Some(RpcEvent::Dropped {
                    from: from.to_string(),
                    reason: error.to_string(),
                });
            }
        };

        match message.message_type {
            MessageType::Request(request) => {
                trace!(
                    context = "socket_message_receiving",
                    id = ?message.id,
                    ?request,
                    ?from,
                    "Received request message"
                );

                Some(RpcEvent::Request {
                    id: message.id,
                    request,
                })
            }
            MessageType::Response(response) => {
                let Some(call) = self.pending.remove(&message.id) else {
                    trace!(
                        context = "socket_validation",
                        id = ?message.id,
                        ?from,
                        "Unexpected response id"
                    );
                    return None;
                };

                trace!(
                    context = "socket_message_receiving",
                    id = ?message.id,
                    ?response,
                    ?from,
                    "Received response message"
                );

                Some(RpcEvent::Completion {
                    id: message.id,
                    to: call.to,
                    context: call.context,
                    result: Ok(response),
                })
            }
        }
    }

    /// Complete every call older than the request timeout, as of `now`, with
    /// [RpcError::Timeout].
    pub fn expire_stale_calls_at(&mut self, now: Instant) -> Vec<RpcEvent<C>> {
        let expired = self.pending.expire_at(now, self.request_timeout);

        if !expired.is_empty() {
            debug!(count = expired.len(), "Expired pending calls");
        }

        expired
            .into_iter()
            .map(|(id, call)| RpcEvent::Completion {
                id,
                to: call.to,
                context: call.context,
                result: Err(RpcError::Timeout),
            })
            .collect()
    }

    // === Private Methods ===

    fn send(&mut self, to: &Contact, message: &Message) -> Result<(), Error> {
        let bytes = message.to_bytes()?;
        self.transport.send(&bytes, to)?;

        Ok(())
    }
}
