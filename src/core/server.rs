//! Handlers answering inbound requests, and the hooks gating them.

use std::collections::{HashMap, HashSet};
use std::fmt::Debug;

use serde_json::{Map, Value};
use tracing::debug;

use crate::common::messages::{
    ItemPayload, Method, RequestSpecific, ResponseSpecific, ERROR_CODE_INTERNAL,
};
use crate::common::{Contact, Id, RoutingTable};
use crate::storage::Storage;
use crate::Error;

/// Decides whether a key/value pair may be stored or trusted from a lookup.
pub trait Validator: Debug + Send {
    fn validate(&self, key: &str, value: &str) -> bool;
}

#[derive(Debug, Clone, Copy, Default)]
/// [Validator] accepting everything.
pub struct AcceptAll;

impl Validator for AcceptAll {
    fn validate(&self, _key: &str, _value: &str) -> bool {
        true
    }
}

/// Decides whether requests from a contact are handled at all.
///
/// Filtered requests are dropped before their sender is added to the routing table.
pub trait ContactFilter: Debug + Send {
    fn allow(&self, contact: &Contact) -> bool;
}

#[derive(Debug, Clone, Default)]
/// Drop requests from the listed node ids.
pub struct Blacklist {
    ids: HashSet<Id>,
}

impl Blacklist {
    pub fn new<I: IntoIterator<Item = Id>>(ids: I) -> Self {
        Self {
            ids: ids.into_iter().collect(),
        }
    }

    pub fn insert(&mut self, id: Id) {
        self.ids.insert(id);
    }
}

impl ContactFilter for Blacklist {
    fn allow(&self, contact: &Contact) -> bool {
        !self.ids.contains(contact.id())
    }
}

#[derive(Debug, Clone, Default)]
/// Only handle requests from the listed node ids.
pub struct Whitelist {
    ids: HashSet<Id>,
}

impl Whitelist {
    pub fn new<I: IntoIterator<Item = Id>>(ids: I) -> Self {
        Self {
            ids: ids.into_iter().collect(),
        }
    }

    pub fn insert(&mut self, id: Id) {
        self.ids.insert(id);
    }
}

impl ContactFilter for Whitelist {
    fn allow(&self, contact: &Contact) -> bool {
        self.ids.contains(contact.id())
    }
}

/// Handler for a request method beyond PING, STORE, FIND_NODE and FIND_VALUE.
///
/// Register it with [crate::NodeBuilder::protocol].
pub trait ProtocolHandler: Debug + Send {
    /// Answer the `params` fields sent by `requester`, other than `contact`, `key` and
    /// `item`.
    ///
    /// The returned fields are sent back in `result` next to this node's contact, an
    /// error is sent back as a JSON-RPC error object.
    fn handle(
        &mut self,
        requester: &Contact,
        params: &Map<String, Value>,
    ) -> Result<Map<String, Value>, String>;
}

/// State a handler may read or write while answering a request.
pub struct ServerContext<'a> {
    /// This node, sent back as `result.contact`.
    pub contact: &'a Contact,
    pub routing_table: &'a RoutingTable,
    pub storage: &'a mut dyn Storage,
    pub validator: &'a dyn Validator,
    /// Size of `nodes` results.
    pub k: usize,
}

type Handler = for<'a, 'b, 'c> fn(&'a mut ServerContext<'b>, &'c RequestSpecific) -> ResponseSpecific;

/// Dispatches requests to the handler registered for their [Method], or to a
/// [ProtocolHandler] registered for their method name.
pub struct Server {
    handlers: HashMap<Method, Handler>,
    protocol: HashMap<String, Box<dyn ProtocolHandler>>,
}

impl Debug for Server {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Server")
            .field("methods", &self.handlers.keys().collect::<Vec<_>>())
            .field("protocol", &self.protocol.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl Default for Server {
    fn default() -> Self {
        Self::new()
    }
}

impl Server {
    pub fn new() -> Self {
        let mut handlers: HashMap<Method, Handler> = HashMap::new();

        handlers.insert(Method::Ping, handle_ping);
        handlers.insert(Method::Store, handle_store);
        handlers.insert(Method::FindNode, handle_find_node);
        handlers.insert(Method::FindValue, handle_find_value);

        Self {
            handlers,
            protocol: HashMap::new(),
        }
    }

    /// Serve requests for `method` with `handler`.
    ///
    /// Built in methods can not be replaced.
    pub fn register(
        &mut self,
        method: &str,
        handler: Box<dyn ProtocolHandler>,
    ) -> Result<(), Error> {
        if method.parse::<Method>().is_ok() {
            return Err(Error::InvalidArgument(format!(
                "{} is a built in method",
                method
            )));
        }

        debug!(?method, "Registered protocol extension");

        self.protocol.insert(method.to_string(), handler);

        Ok(())
    }

    /// Answer `request`, or return [Error::ProtocolViolation] for unknown methods.
    pub fn handle_request(
        &mut self,
        context: &mut ServerContext<'_>,
        request: &RequestSpecific,
    ) -> Result<ResponseSpecific, Error> {
        let method = match request.method() {
            Ok(method) => method,
            Err(error) => {
                let handler = self.protocol.get_mut(&request.method).ok_or(error)?;

                return Ok(handle_extension(context, handler.as_mut(), request));
            }
        };

        let handler = self.handlers.get(&method).ok_or_else(|| {
            Error::ProtocolViolation(format!("no handler registered for {}", method))
        })?;

        Ok(handler(context, request))
    }
}

fn handle_extension(
    context: &mut ServerContext<'_>,
    handler: &mut dyn ProtocolHandler,
    request: &RequestSpecific,
) -> ResponseSpecific {
    let response = ResponseSpecific::new(context.contact.clone());

    match handler.handle(&request.requester, &request.extra) {
        Ok(fields) => response.with_extra(fields),
        Err(message) => {
            debug!(method = ?request.method, from = %request.requester, ?message, "Protocol extension failed");

            response.with_error(ERROR_CODE_INTERNAL, &message)
        }
    }
}

fn handle_ping(context: &mut ServerContext<'_>, _request: &RequestSpecific) -> ResponseSpecific {
    ResponseSpecific::new(context.contact.clone())
}

fn handle_store(context: &mut ServerContext<'_>, request: &RequestSpecific) -> ResponseSpecific {
    let response = ResponseSpecific::new(context.contact.clone());

    let item = match &request.item {
        Some(ItemPayload::Valid(item)) => item,
        Some(ItemPayload::Malformed(reason)) => {
            return response.with_error(ERROR_CODE_INTERNAL, reason);
        }
        None => return response.with_error(ERROR_CODE_INTERNAL, "Missing item"),
    };

    if !context.validator.validate(item.key(), item.value()) {
        debug!(key = item.key(), from = %request.requester, "Rejected STORE");

        return response.with_error(
            ERROR_CODE_INTERNAL,
            &Error::ValidationRejected(item.key().to_string()).to_string(),
        );
    }

    match context.storage.put(item.key(), item.clone()) {
        Ok(()) => response,
        Err(error) => response.with_error(ERROR_CODE_INTERNAL, &error.to_string()),
    }
}

fn handle_find_node(context: &mut ServerContext<'_>, request: &RequestSpecific) -> ResponseSpecific {
    let response = ResponseSpecific::new(context.contact.clone());

    let Some(key) = &request.key else {
        return response.with_error(ERROR_CODE_INTERNAL, "Missing key");
    };

    response.with_nodes(nearest_to_key(context, key, &request.requester))
}

fn handle_find_value(
    context: &mut ServerContext<'_>,
    request: &RequestSpecific,
) -> ResponseSpecific {
    let response = ResponseSpecific::new(context.contact.clone());

    let Some(key) = &request.key else {
        return response.with_error(ERROR_CODE_INTERNAL, "Missing key");
    };

    match context.storage.get(key) {
        Ok(Some(item)) => response.with_item(item),
        Ok(None) => response.with_nodes(nearest_to_key(context, key, &request.requester)),
        Err(error) => response.with_error(ERROR_CODE_INTERNAL, &error.to_string()),
    }
}

fn nearest_to_key(context: &ServerContext<'_>, key: &str, requester: &Contact) -> Vec<Contact> {
    context
        .routing_table
        .nearest_contacts(&Id::from_key(key), context.k, Some(requester.id()))
}
