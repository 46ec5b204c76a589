//! Core DHT logic - pure computation with no direct I/O.
//!
//! Contains the lookup and store drivers (`lookup`, `store_query`), the `server`
//! request handlers, and the timers of periodic `maintenance`.
//! All I/O orchestration lives in `actor/`, which calls into this module.

pub(crate) mod lookup;
pub(crate) mod maintenance;
pub(crate) mod server;
pub(crate) mod store_query;
