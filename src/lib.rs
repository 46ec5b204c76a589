#![doc = include_str!("../README.md")]
//! ## Feature flags
#![doc = document_features::document_features!()]
//!

// Public modules
mod actor;
mod common;
mod core;
mod error;
mod node;

#[cfg(feature = "async")]
pub mod async_node;
pub mod rpc;
pub mod storage;

pub use crate::actor::Info;
pub use crate::common::{
    Address, Bucket, Contact, Id, Item, PendingEviction, RoutingTable, UpdateOutcome, ID_SIZE,
    MAX_BUCKET_SIZE_K, MAX_DISTANCE,
};
pub use crate::core::lookup::{Lookup, LookupKind, LookupOutcome, LookupStep};
pub use crate::core::server::{
    AcceptAll, Blacklist, ContactFilter, ProtocolHandler, Validator, Whitelist,
};
pub use crate::rpc::Config;
pub use error::{Error, NodeWasShutdown, PutError, RpcError};
pub use node::{Node, NodeBuilder, Testnet};
