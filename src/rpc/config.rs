use std::collections::HashMap;
use std::time::Duration;

use crate::common::MAX_BUCKET_SIZE_K;
use crate::core::server::{AcceptAll, ContactFilter, ProtocolHandler, Validator};
use crate::storage::Storage;

use super::transport::Transport;

/// Maximum concurrent requests per lookup round.
pub const ALPHA: usize = 3;
/// Default request timeout before abandoning a call to a non-responding node.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(5);
/// Interval between refreshes of the routing table's buckets.
pub const T_REFRESH: Duration = Duration::from_secs(3600);
/// Interval between replication sweeps over stored items.
pub const T_REPLICATE: Duration = Duration::from_secs(3600);
/// Age after which a node republishes its own items.
pub const T_REPUBLISH: Duration = Duration::from_secs(86400);
/// Age after which stored items are deleted.
///
/// Slightly longer than [T_REPUBLISH] so a republish always lands before expiry.
pub const T_EXPIRE: Duration = Duration::from_secs(86405);

#[derive(Debug)]
/// Node configurations
pub struct Config {
    /// Maximum concurrent requests per lookup round.
    ///
    /// Defaults to [ALPHA]
    pub alpha: usize,
    /// Bucket capacity and size of nearest contacts results.
    ///
    /// Defaults to [MAX_BUCKET_SIZE_K]
    pub k: usize,
    /// Time to wait for a response before completing a call with a timeout.
    ///
    /// Stale calls are swept every `request_timeout + 5ms`, so a call may wait up to
    /// one sweep interval past this deadline.
    ///
    /// Defaults to [DEFAULT_REQUEST_TIMEOUT]
    pub request_timeout: Duration,
    /// Defaults to [T_REFRESH]
    pub t_refresh: Duration,
    /// Defaults to [T_REPLICATE]
    pub t_replicate: Duration,
    /// Defaults to [T_REPUBLISH]
    pub t_republish: Duration,
    /// Defaults to [T_EXPIRE]
    pub t_expire: Duration,
    /// Transport to send and receive messages through.
    ///
    /// Defaults to None, where a [super::transport::UdpTransport] bound to
    /// `0.0.0.0:0` is used. That transport advertises `127.0.0.1`, so peers on other
    /// hosts can only reach a node given a transport built with
    /// [super::transport::UdpTransport::with_public_address].
    pub transport: Option<Box<dyn Transport>>,
    /// Defaults to None, where a [crate::storage::MemoryStorage] is used.
    pub storage: Option<Box<dyn Storage>>,
    /// Validator for stored and looked up key/value pairs.
    ///
    /// Defaults to [AcceptAll]
    pub validator: Box<dyn Validator>,
    /// Filter for inbound requests.
    ///
    /// Defaults to None, accepting requests from everyone.
    pub filter: Option<Box<dyn ContactFilter>>,
    /// Handlers for methods beyond the built in ones, by method name.
    ///
    /// Defaults to empty.
    pub protocol: HashMap<String, Box<dyn ProtocolHandler>>,
}

impl Config {
    /// Interval of the pending calls expiry sweep.
    pub fn sweep_interval(&self) -> Duration {
        self.request_timeout + Duration::from_millis(5)
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            alpha: ALPHA,
            k: MAX_BUCKET_SIZE_K,
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
            t_refresh: T_REFRESH,
            t_replicate: T_REPLICATE,
            t_republish: T_REPUBLISH,
            t_expire: T_EXPIRE,
            transport: None,
            storage: None,
            validator: Box::new(AcceptAll),
            filter: None,
            protocol: HashMap::new(),
        }
    }
}
