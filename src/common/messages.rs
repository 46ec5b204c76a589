//! Serialize and deserialize JSON-RPC messages.

mod internal;

use std::fmt::{self, Display, Formatter};
use std::str::FromStr;

use serde_json::{Map, Value};

use crate::common::{Address, Contact, Id, Item};
use crate::Error;

use internal::{
    JsonContact, JsonItem, JsonRpcError, JsonRpcMessage, JsonRpcParams, JsonRpcResult,
    JSONRPC_VERSION,
};

/// JSON-RPC "Internal error", used for rejected requests.
pub const ERROR_CODE_INTERNAL: i64 = -32603;

/// `params` fields with a meaning of their own, never carried in [RequestSpecific::extra].
const RESERVED_PARAMS: [&str; 3] = ["contact", "key", "item"];
/// `result` fields with a meaning of their own, never carried in [ResponseSpecific::extra].
const RESERVED_RESULT: [&str; 3] = ["contact", "nodes", "item"];

#[derive(Debug, PartialEq, Clone)]
pub struct Message {
    /// Correlation id linking a request to its response.
    pub id: String,
    pub message_type: MessageType,
}

#[derive(Debug, PartialEq, Clone)]
pub enum MessageType {
    Request(RequestSpecific),

    Response(ResponseSpecific),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Method {
    Ping,
    Store,
    FindNode,
    FindValue,
}

impl Method {
    pub fn as_str(&self) -> &'static str {
        match self {
            Method::Ping => "PING",
            Method::Store => "STORE",
            Method::FindNode => "FIND_NODE",
            Method::FindValue => "FIND_VALUE",
        }
    }
}

impl Display for Method {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for Method {
    type Err = Error;

    fn from_str(s: &str) -> Result<Method, Error> {
        match s {
            "PING" => Ok(Method::Ping),
            "STORE" => Ok(Method::Store),
            "FIND_NODE" => Ok(Method::FindNode),
            "FIND_VALUE" => Ok(Method::FindValue),
            _ => Err(Error::ProtocolViolation(format!("unknown method {:?}", s))),
        }
    }
}

#[derive(Debug, PartialEq, Clone)]
/// An item as received on the wire, kept even when malformed so handlers can
/// decide what to do with the sender.
pub enum ItemPayload {
    Valid(Item),
    Malformed(String),
}

impl ItemPayload {
    pub fn valid(&self) -> Option<&Item> {
        match self {
            ItemPayload::Valid(item) => Some(item),
            ItemPayload::Malformed(_) => None,
        }
    }
}

#[derive(Debug, PartialEq, Clone)]
pub struct RequestSpecific {
    /// Method name as sent, see [RequestSpecific::method].
    pub method: String,
    pub requester: Contact,
    pub key: Option<String>,
    pub item: Option<ItemPayload>,
    /// Any other `params` fields, used by protocol extension methods.
    pub extra: Map<String, Value>,
}

impl RequestSpecific {
    pub fn new(method: Method, requester: Contact) -> Self {
        Self::named(method.as_str(), requester)
    }

    /// A request for any method name, including protocol extensions.
    pub fn named(method: &str, requester: Contact) -> Self {
        RequestSpecific {
            method: method.to_string(),
            requester,
            key: None,
            item: None,
            extra: Map::new(),
        }
    }

    /// Extra `params` fields. `contact`, `key` and `item` are dropped.
    pub fn with_params(mut self, mut params: Map<String, Value>) -> Self {
        for reserved in RESERVED_PARAMS {
            params.remove(reserved);
        }
        self.extra = params;
        self
    }

    pub fn with_key(mut self, key: &str) -> Self {
        self.key = Some(key.to_string());
        self
    }

    pub fn with_item(mut self, item: Item) -> Self {
        self.item = Some(ItemPayload::Valid(item));
        self
    }

    /// Returns [Error::ProtocolViolation] for method names this node doesn't know.
    pub fn method(&self) -> Result<Method, Error> {
        self.method.parse()
    }
}

#[derive(Debug, PartialEq, Clone)]
pub struct ResponseSpecific {
    pub responder: Option<Contact>,
    pub nodes: Option<Vec<Contact>>,
    pub item: Option<ItemPayload>,
    pub error: Option<ErrorSpecific>,
    /// Any other `result` fields, as answered by protocol extension methods.
    pub extra: Map<String, Value>,
}

impl ResponseSpecific {
    pub fn new(responder: Contact) -> Self {
        ResponseSpecific {
            responder: Some(responder),
            nodes: None,
            item: None,
            error: None,
            extra: Map::new(),
        }
    }

    /// Extra `result` fields. `contact`, `nodes` and `item` are dropped.
    pub fn with_extra(mut self, mut fields: Map<String, Value>) -> Self {
        for reserved in RESERVED_RESULT {
            fields.remove(reserved);
        }
        self.extra = fields;
        self
    }

    pub fn with_nodes(mut self, nodes: Vec<Contact>) -> Self {
        self.nodes = Some(nodes);
        self
    }

    pub fn with_item(mut self, item: Item) -> Self {
        self.item = Some(ItemPayload::Valid(item));
        self
    }

    pub fn with_error(mut self, code: i64, message: &str) -> Self {
        self.error = Some(ErrorSpecific {
            code,
            message: message.to_string(),
        });
        self
    }
}

#[derive(Debug, PartialEq, Clone)]
pub struct ErrorSpecific {
    pub code: i64,
    pub message: String,
}

impl Message {
    /// A request with a fresh random correlation id.
    pub fn request(request: RequestSpecific) -> Message {
        Message {
            id: Id::random().to_string(),
            message_type: MessageType::Request(request),
        }
    }

    /// A response to the request with correlation id `id`.
    pub fn response(id: &str, response: ResponseSpecific) -> Message {
        Message {
            id: id.to_string(),
            message_type: MessageType::Response(response),
        }
    }

    /// The contact that sent this message, if it carried one.
    pub fn sender(&self) -> Option<&Contact> {
        match &self.message_type {
            MessageType::Request(request) => Some(&request.requester),
            MessageType::Response(response) => response.responder.as_ref(),
        }
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>, Error> {
        Ok(self.clone().into_json_message().to_bytes()?)
    }

    pub fn from_bytes<T: AsRef<[u8]>>(bytes: T) -> Result<Message, Error> {
        Message::from_json_message(JsonRpcMessage::from_bytes(bytes.as_ref())?)
    }

    fn into_json_message(self) -> JsonRpcMessage {
        let mut message = JsonRpcMessage {
            jsonrpc: JSONRPC_VERSION.to_string(),
            id: Some(self.id),
            method: None,
            params: None,
            result: None,
            error: None,
        };

        match self.message_type {
            MessageType::Request(request) => {
                message.method = Some(request.method);
                message.params = Some(JsonRpcParams {
                    contact: contact_to_json(&request.requester),
                    key: request.key,
                    item: request.item.and_then(|item| item.valid().map(item_to_json)),
                    extra: request.extra,
                });
            }
            MessageType::Response(response) => {
                message.result = Some(JsonRpcResult {
                    contact: response.responder.as_ref().map(contact_to_json),
                    nodes: response
                        .nodes
                        .map(|nodes| nodes.iter().map(contact_to_json).collect()),
                    item: response.item.and_then(|item| item.valid().map(item_to_json)),
                    extra: response.extra,
                });
                message.error = response.error.map(|error| JsonRpcError {
                    code: error.code,
                    message: error.message,
                });
            }
        }

        message
    }

    fn from_json_message(message: JsonRpcMessage) -> Result<Message, Error> {
        let JsonRpcMessage {
            id,
            method,
            params,
            result,
            error,
            ..
        } = message;

        let id = id.ok_or_else(|| Error::InvalidArgument("message without an id".into()))?;

        if let (Some(method), Some(params)) = (method, params) {
            return Ok(Message {
                id,
                message_type: MessageType::Request(RequestSpecific {
                    method,
                    requester: contact_from_json(params.contact)?,
                    key: params.key,
                    item: params.item.map(item_from_json),
                    extra: params.extra,
                }),
            });
        }

        if result.is_none() && error.is_none() {
            return Err(Error::InvalidArgument(
                "message is neither a request nor a response".into(),
            ));
        }

        let result = result.unwrap_or_default();

        let responder = match result.contact {
            Some(contact) => Some(contact_from_json(contact)?),
            None => None,
        };

        Ok(Message {
            id,
            message_type: MessageType::Response(ResponseSpecific {
                responder,
                // Skip garbage entries instead of rejecting the whole response.
                nodes: result.nodes.map(|nodes| {
                    nodes
                        .into_iter()
                        .filter_map(|contact| contact_from_json(contact).ok())
                        .collect()
                }),
                item: result.item.map(item_from_json),
                error: error.map(|error| ErrorSpecific {
                    code: error.code,
                    message: error.message,
                }),
                extra: result.extra,
            }),
        })
    }
}

fn contact_to_json(contact: &Contact) -> JsonContact {
    let (address, port, nick) = match contact.address() {
        Address::AddressPort { address, port } => (Some(address.clone()), Some(*port), None),
        Address::Nickname(nick) => (None, None, Some(nick.clone())),
    };

    JsonContact {
        address,
        port,
        nick,
        node_id: Some(contact.id().to_string()),
        last_seen: contact.last_seen(),
    }
}

fn contact_from_json(contact: JsonContact) -> Result<Contact, Error> {
    let address = match (contact.address, contact.port, contact.nick) {
        (Some(address), Some(port), _) => Address::AddressPort { address, port },
        (_, _, Some(nick)) => Address::Nickname(nick),
        _ => {
            return Err(Error::InvalidContact(
                "contact has neither address/port nor nick".into(),
            ))
        }
    };

    let mut result = match contact.node_id {
        Some(node_id) => Contact::with_hex_id(address, &node_id)?,
        None => Contact::new(address)?,
    };
    result.set_last_seen(contact.last_seen);

    Ok(result)
}

fn item_to_json(item: &Item) -> JsonItem {
    JsonItem {
        key: item.key().to_string(),
        value: item.value().to_string(),
        publisher: item.publisher().to_string(),
        timestamp: item.timestamp(),
    }
}

fn item_from_json(item: JsonItem) -> ItemPayload {
    match Item::from_parts(item.key, item.value, &item.publisher, item.timestamp) {
        Ok(item) => ItemPayload::Valid(item),
        Err(error) => ItemPayload::Malformed(error.to_string()),
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn contact() -> Contact {
        Contact::address_port("127.0.0.1", 1337).unwrap()
    }

    #[test]
    fn request_wire_shape() {
        let message = Message::request(
            RequestSpecific::new(Method::FindNode, contact()).with_key("beep"),
        );

        let json: serde_json::Value = serde_json::from_slice(&message.to_bytes().unwrap()).unwrap();

        assert_eq!(json["jsonrpc"], "2.0");
        assert_eq!(json["id"].as_str().unwrap().len(), 40);
        assert_eq!(json["method"], "FIND_NODE");
        assert_eq!(json["params"]["key"], "beep");
        assert_eq!(json["params"]["contact"]["address"], "127.0.0.1");
        assert_eq!(json["params"]["contact"]["port"], 1337);
        assert_eq!(
            json["params"]["contact"]["nodeID"],
            "bf24aef44a702a0662793b129859d859969a1c4e"
        );
        assert!(json.get("result").is_none());
    }

    #[test]
    fn response_with_nodes_and_error() {
        let nodes = vec![Contact::nickname("a").unwrap(), Contact::nickname("b").unwrap()];
        let message = Message::response(
            "abc",
            ResponseSpecific::new(contact())
                .with_nodes(nodes.clone())
                .with_error(ERROR_CODE_INTERNAL, "nope"),
        );

        let parsed = Message::from_bytes(message.to_bytes().unwrap()).unwrap();

        let MessageType::Response(response) = parsed.message_type else {
            panic!("expected a response");
        };

        assert_eq!(parsed.id, "abc");
        assert_eq!(response.responder, Some(contact()));
        assert_eq!(response.nodes, Some(nodes));
        assert_eq!(response.error.unwrap().code, ERROR_CODE_INTERNAL);
    }

    #[test]
    fn parse_foreign_request_without_node_id() {
        let bytes = br#"{"jsonrpc":"2.0","id":"1","method":"PING","params":{"contact":{"address":"127.0.0.1","port":1337,"lastSeen":5}}}"#;

        let message = Message::from_bytes(bytes).unwrap();
        let MessageType::Request(request) = message.message_type else {
            panic!("expected a request");
        };

        assert_eq!(request.method().unwrap(), Method::Ping);
        assert_eq!(request.requester, contact());
        assert_eq!(request.requester.last_seen(), 5);
    }

    #[test]
    fn unknown_method_still_parses() {
        let bytes = br#"{"id":"1","method":"SHOUT","params":{"contact":{"nick":"beep"}}}"#;

        let message = Message::from_bytes(bytes).unwrap();
        let MessageType::Request(request) = message.message_type else {
            panic!("expected a request");
        };

        assert!(matches!(request.method(), Err(Error::ProtocolViolation(_))));
        assert_eq!(request.requester, Contact::nickname("beep").unwrap());
    }

    #[test]
    fn extension_fields_round_trip() {
        let mut params = Map::new();
        params.insert("text".to_string(), Value::from("hi"));
        params.insert("key".to_string(), Value::from("ignored"));

        let message = Message::request(
            RequestSpecific::named("ECHO", contact()).with_params(params),
        );

        let json: serde_json::Value = serde_json::from_slice(&message.to_bytes().unwrap()).unwrap();
        assert_eq!(json["method"], "ECHO");
        assert_eq!(json["params"]["text"], "hi");
        assert!(json["params"].get("key").is_none());

        let MessageType::Request(request) = Message::from_bytes(message.to_bytes().unwrap())
            .unwrap()
            .message_type
        else {
            panic!("expected a request");
        };
        assert_eq!(request.extra.get("text"), Some(&Value::from("hi")));
        assert!(request.extra.get("contact").is_none());

        let mut fields = Map::new();
        fields.insert("text".to_string(), Value::from("hi"));
        fields.insert("contact".to_string(), Value::from("spoofed"));

        let bytes = Message::response("1", ResponseSpecific::new(contact()).with_extra(fields))
            .to_bytes()
            .unwrap();
        let MessageType::Response(response) = Message::from_bytes(bytes).unwrap().message_type
        else {
            panic!("expected a response");
        };

        assert_eq!(response.responder, Some(contact()));
        assert_eq!(response.extra.get("text"), Some(&Value::from("hi")));
        assert_eq!(response.extra.len(), 1);
    }

    #[test]
    fn future_item_timestamp_is_clamped() {
        let ahead = crate::common::now_millis() + 2_000;
        let bytes = format!(
            r#"{{"id":"1","method":"STORE","params":{{"contact":{{"nick":"a"}},"item":{{"key":"beep","value":"boop","publisher":"{}","timestamp":{}}}}}}}"#,
            Id::random(),
            ahead
        );

        let MessageType::Request(request) = Message::from_bytes(bytes).unwrap().message_type else {
            panic!("expected a request");
        };

        let Some(ItemPayload::Valid(item)) = request.item else {
            panic!("expected a valid item");
        };
        assert!(item.timestamp() < ahead);
    }

    #[test]
    fn reject_garbage() {
        assert!(Message::from_bytes(b"not json").is_err());
        assert!(Message::from_bytes(br#"{"id":"1"}"#).is_err());
        assert!(Message::from_bytes(br#"{"method":"PING","params":{"contact":{"nick":"a"}}}"#).is_err());
        assert!(matches!(
            Message::from_bytes(br#"{"id":"1","method":"PING","params":{"contact":{"port":1}}}"#),
            Err(Error::InvalidContact(_))
        ));
    }

    #[test]
    fn garbage_nodes_and_items_are_isolated() {
        let bytes = br#"{"id":"1","result":{"contact":{"nick":"a"},"nodes":[{"nick":"b"},{"port":3},{"nick":"c","nodeID":"xyz"}],"item":{"key":"k","value":"v","publisher":"nope","timestamp":0}}}"#;

        let message = Message::from_bytes(bytes).unwrap();
        let MessageType::Response(response) = message.message_type else {
            panic!("expected a response");
        };

        assert_eq!(response.nodes.unwrap(), vec![Contact::nickname("b").unwrap()]);
        assert!(matches!(response.item, Some(ItemPayload::Malformed(_))));
    }
}
