//! Main Crate Error

#[derive(thiserror::Error, Debug)]
/// Kadmesh crate error enum.
pub enum Error {
    /// Malformed identifier, key, item or message shape.
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// A contact is missing its address fields or carries a malformed node id.
    #[error("Invalid contact: {0}")]
    InvalidContact(String),

    /// The routing table had no contacts to seed a lookup with.
    #[error("Not connected to any peers")]
    NotConnected,

    /// The validator refused a key/value pair.
    #[error("Failed to validate key/value pair for {0}")]
    ValidationRejected(String),

    /// A request named a method this node does not serve.
    #[error("Protocol violation: {0}")]
    ProtocolViolation(String),

    /// A value lookup terminated without any peer returning the value.
    #[error("Failed to find value for key: {0}")]
    ValueNotFound(String),

    /// The storage adapter failed.
    #[error("Storage error: {0}")]
    Storage(String),

    #[error(transparent)]
    /// A single request to a peer failed.
    Rpc(#[from] RpcError),

    #[error(transparent)]
    /// Transparent [std::io::Error]
    IO(#[from] std::io::Error),

    #[error(transparent)]
    /// Transparent [serde_json::Error]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    /// Transparent [NodeWasShutdown]
    Shutdown(#[from] NodeWasShutdown),
}

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
/// Terminal failure of a single outgoing request.
pub enum RpcError {
    /// No response arrived within the request timeout.
    #[error("Request timed out")]
    Timeout,

    /// The transport could not deliver the request.
    #[error("Peer unreachable: {0}")]
    Unreachable(String),

    /// The peer answered with a JSON-RPC error object.
    #[error("Remote error {code}: {message}")]
    Remote {
        /// JSON-RPC error code
        code: i64,
        /// Error message sent by the peer
        message: String,
    },
}

#[derive(thiserror::Error, Debug)]
/// Put errors
pub enum PutError {
    /// Validating the item or locating the storing nodes failed before any STORE was sent.
    #[error(transparent)]
    Lookup(#[from] Error),

    /// Every STORE request failed, the most common failure is returned.
    #[error("No node accepted the item: {0}")]
    NoStoringNodes(RpcError),
}

#[derive(thiserror::Error, Debug, Clone, Copy, PartialEq, Eq)]
#[error("Node actor thread was shutdown")]
/// The node's actor thread is no longer running.
pub struct NodeWasShutdown;
