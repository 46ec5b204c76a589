//! Kadmesh node.

use std::thread;
use std::time::Duration;

use flume::Sender;
use serde_json::{Map, Value};
use tracing::debug;

use crate::actor::{Actor, ActorMessage, Info};
use crate::common::{Contact, Id};
use crate::core::server::{ContactFilter, ProtocolHandler, Validator};
use crate::rpc::{Config, MemoryNetwork, Transport};
use crate::storage::Storage;
use crate::{Error, NodeWasShutdown, PutError};

#[derive(Debug, Clone)]
/// Kademlia node handle.
///
/// Cloning is cheap, every clone talks to the same actor thread. The thread stops once
/// [Node::shutdown] is called or every clone was dropped.
pub struct Node(pub(crate) Sender<ActorMessage>);

#[derive(Debug, Default)]
/// A builder for a [Node].
pub struct NodeBuilder(Config);

impl NodeBuilder {
    /// Maximum concurrent requests per lookup round.
    pub fn alpha(mut self, alpha: usize) -> Self {
        self.0.alpha = alpha;

        self
    }

    /// Bucket capacity and size of nearest contacts results.
    pub fn k(mut self, k: usize) -> Self {
        self.0.k = k;

        self
    }

    /// Time to wait for a response before a request fails with a timeout.
    pub fn request_timeout(mut self, request_timeout: Duration) -> Self {
        self.0.request_timeout = request_timeout;

        self
    }

    /// Interval between bucket refreshes.
    pub fn refresh_interval(mut self, interval: Duration) -> Self {
        self.0.t_refresh = interval;

        self
    }

    /// Interval between replication sweeps over stored items.
    pub fn replicate_interval(mut self, interval: Duration) -> Self {
        self.0.t_replicate = interval;

        self
    }

    /// Age after which this node republishes its own items.
    pub fn republish_after(mut self, age: Duration) -> Self {
        self.0.t_republish = age;

        self
    }

    /// Age after which stored items are deleted.
    pub fn expire_after(mut self, age: Duration) -> Self {
        self.0.t_expire = age;

        self
    }

    /// Transport to send and receive messages through.
    ///
    /// Defaults to a [crate::rpc::UdpTransport] bound to `0.0.0.0:0`.
    pub fn transport(mut self, transport: Box<dyn Transport>) -> Self {
        self.0.transport = Some(transport);

        self
    }

    /// Defaults to [crate::storage::MemoryStorage].
    pub fn storage(mut self, storage: Box<dyn Storage>) -> Self {
        self.0.storage = Some(storage);

        self
    }

    pub fn validator(mut self, validator: Box<dyn Validator>) -> Self {
        self.0.validator = validator;

        self
    }

    /// Drop requests from contacts the filter does not allow.
    pub fn filter(mut self, filter: Box<dyn ContactFilter>) -> Self {
        self.0.filter = Some(filter);

        self
    }

    /// Answer requests for `method` with `handler`.
    ///
    /// [NodeBuilder::build] fails with [Error::InvalidArgument] if `method` is one of
    /// PING, STORE, FIND_NODE or FIND_VALUE.
    pub fn protocol(mut self, method: &str, handler: Box<dyn ProtocolHandler>) -> Self {
        self.0.protocol.insert(method.to_string(), handler);

        self
    }

    /// Create a [Node] and start its actor thread.
    pub fn build(self) -> Result<Node, Error> {
        Node::new(self.0)
    }
}

impl Node {
    /// Create a new node with the default configuration, listening on UDP.
    ///
    /// The node binds `0.0.0.0` on a random port and advertises `127.0.0.1`, so only
    /// peers on the same host can reach it. Pass a transport built with
    /// [crate::rpc::UdpTransport::with_public_address] to [NodeBuilder::transport] to
    /// join a network spanning hosts.
    pub fn client() -> Result<Self, Error> {
        Node::builder().build()
    }

    /// Returns a builder to edit settings before creating a node.
    pub fn builder() -> NodeBuilder {
        NodeBuilder::default()
    }

    /// Create a new node from a [Config].
    ///
    /// Fails if the transport can not be bound.
    pub fn new(config: Config) -> Result<Self, Error> {
        let (sender, receiver) = flume::unbounded();

        let mut actor = Actor::new(config, receiver)?;

        thread::Builder::new()
            .name("kadmesh".to_string())
            .spawn(move || while actor.tick().is_ok() {})?;

        Ok(Node(sender))
    }

    // === Getters ===

    /// Information and statistics about this node.
    pub fn info(&self) -> Result<Info, NodeWasShutdown> {
        let (sender, receiver) = flume::bounded::<Info>(1);

        self.0
            .send(ActorMessage::Info(sender))
            .map_err(|_| NodeWasShutdown)?;

        receiver.recv().map_err(|_| NodeWasShutdown)
    }

    // === Public Methods ===

    /// Shutdown the actor thread loop.
    pub fn shutdown(&mut self) {
        let (sender, receiver) = flume::bounded::<()>(1);

        let _ = self.0.send(ActorMessage::Shutdown(sender));
        let _ = receiver.recv();
    }

    /// Join the network through `seed`: look up this node's own id, then refresh
    /// buckets in the background.
    pub fn connect(&self, seed: Contact) -> Result<(), Error> {
        let (sender, receiver) = flume::bounded::<Result<(), Error>>(1);

        self.0
            .send(ActorMessage::Connect(seed, sender))
            .map_err(|_| NodeWasShutdown)?;

        receiver.recv().map_err(|_| NodeWasShutdown)?
    }

    /// Store `value` under `key` at the nodes nearest to the key.
    ///
    /// Returns the number of nodes that acknowledged the STORE.
    pub fn put(&self, key: &str, value: &str) -> Result<usize, PutError> {
        let (sender, receiver) = flume::bounded::<Result<usize, PutError>>(1);

        self.0
            .send(ActorMessage::Put(key.to_string(), value.to_string(), sender))
            .map_err(|_| Error::from(NodeWasShutdown))?;

        receiver
            .recv()
            .map_err(|_| Error::from(NodeWasShutdown))?
    }

    /// Get the value stored under `key`, from local storage or through a lookup.
    pub fn get(&self, key: &str) -> Result<String, Error> {
        let (sender, receiver) = flume::bounded::<Result<String, Error>>(1);

        self.0
            .send(ActorMessage::Get(key.to_string(), sender))
            .map_err(|_| NodeWasShutdown)?;

        receiver.recv().map_err(|_| NodeWasShutdown)?
    }

    /// Find the contacts nearest to `target`.
    pub fn find_node(&self, target: Id) -> Result<Vec<Contact>, Error> {
        let (sender, receiver) = flume::bounded::<Result<Vec<Contact>, Error>>(1);

        self.0
            .send(ActorMessage::FindNode(target, sender))
            .map_err(|_| NodeWasShutdown)?;

        receiver.recv().map_err(|_| NodeWasShutdown)?
    }

    /// Send a request for protocol extension `method` to `to`, with `params` as extra
    /// fields next to the requester's contact.
    ///
    /// Returns the fields of the result other than `contact`. A JSON-RPC error object
    /// in the response fails with [crate::RpcError::Remote].
    pub fn call(
        &self,
        to: Contact,
        method: &str,
        params: Map<String, Value>,
    ) -> Result<Map<String, Value>, Error> {
        let (sender, receiver) = flume::bounded::<Result<Map<String, Value>, Error>>(1);

        self.0
            .send(ActorMessage::Call(to, method.to_string(), params, sender))
            .map_err(|_| NodeWasShutdown)?;

        receiver.recv().map_err(|_| NodeWasShutdown)?
    }
}

/// Create a testnet of nodes on a [MemoryNetwork], each connected to its predecessor.
#[derive(Debug)]
pub struct Testnet {
    pub network: MemoryNetwork,
    pub nodes: Vec<Node>,
}

impl Testnet {
    pub fn new(count: usize) -> Result<Testnet, Error> {
        let network = MemoryNetwork::new();
        let mut nodes: Vec<Node> = Vec::with_capacity(count);

        for i in 0..count {
            let transport = network.nickname(&format!("node-{}", i))?;
            let node = Node::builder().transport(Box::new(transport)).build()?;

            if let Some(previous) = nodes.last() {
                let seed = previous.info()?.contact().clone();
                node.connect(seed)?;
            }

            nodes.push(node);
        }

        debug!(count, "Testnet ready");

        Ok(Testnet { network, nodes })
    }

    /// A new node on this testnet's network, connected to its first node.
    pub fn node(&self, nick: &str) -> Result<Node, Error> {
        let transport = self.network.nickname(nick)?;
        let node = Node::builder().transport(Box::new(transport)).build()?;

        if let Some(first) = self.nodes.first() {
            node.connect(first.info()?.contact().clone())?;
        }

        Ok(node)
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::common::Address;

    #[derive(Debug)]
    struct RejectAll;

    impl Validator for RejectAll {
        fn validate(&self, _key: &str, _value: &str) -> bool {
            false
        }
    }

    fn lonely_node(network: &MemoryNetwork, nick: &str) -> Node {
        Node::builder()
            .transport(Box::new(network.nickname(nick).unwrap()))
            .build()
            .unwrap()
    }

    #[test]
    fn shutdown() {
        let network = MemoryNetwork::new();
        let mut node = lonely_node(&network, "a");

        let clone = node.clone();

        node.shutdown();

        assert!(matches!(clone.info(), Err(NodeWasShutdown)));
        assert!(matches!(clone.get("beep"), Err(Error::Shutdown(_))));
    }

    #[test]
    fn info() {
        let network = MemoryNetwork::new();
        let node = lonely_node(&network, "a");

        let info = node.info().unwrap();

        assert_eq!(info.contact().address(), &Address::Nickname("a".to_string()));
        assert_eq!(info.id(), &Address::Nickname("a".to_string()).default_id());
        assert_eq!(info.routing_table_size(), 0);
        assert_eq!(info.stored_items(), 0);
    }

    #[test]
    fn not_connected() {
        let network = MemoryNetwork::new();
        let node = lonely_node(&network, "a");

        assert!(matches!(node.get("beep"), Err(Error::NotConnected)));
        assert!(matches!(
            node.find_node(Id::random()),
            Err(Error::NotConnected)
        ));
        assert!(matches!(
            node.put("beep", "boop"),
            Err(PutError::Lookup(Error::NotConnected))
        ));
    }

    #[test]
    fn rejected_put() {
        let network = MemoryNetwork::new();
        let node = Node::builder()
            .transport(Box::new(network.nickname("a").unwrap()))
            .validator(Box::new(RejectAll))
            .build()
            .unwrap();

        assert!(matches!(
            node.put("beep", "boop"),
            Err(PutError::Lookup(Error::ValidationRejected(_)))
        ));
    }

    #[test]
    fn connect_populates_both_routing_tables() {
        let testnet = Testnet::new(2).unwrap();

        let a = testnet.nodes[0].info().unwrap();
        let b = testnet.nodes[1].info().unwrap();

        assert_eq!(a.routing_table_size(), 1);
        assert_eq!(b.routing_table_size(), 1);
    }

    #[test]
    fn put_get() {
        let testnet = Testnet::new(5).unwrap();

        let stored_at = testnet.nodes[0].put("beep", "boop").unwrap();
        assert!(stored_at > 0);

        for node in &testnet.nodes {
            assert_eq!(node.get("beep").unwrap(), "boop");
        }
    }

    #[test]
    fn publisher_keeps_a_copy() {
        let testnet = Testnet::new(2).unwrap();
        let publisher = &testnet.nodes[0];

        publisher.put("beep", "boop").unwrap();

        assert_eq!(publisher.info().unwrap().stored_items(), 1);
    }

    #[test]
    fn get_missing_value() {
        let testnet = Testnet::new(3).unwrap();

        assert!(matches!(
            testnet.nodes[1].get("nothing here"),
            Err(Error::ValueNotFound(_))
        ));
    }

    #[test]
    fn find_node() {
        let testnet = Testnet::new(4).unwrap();

        let target = *testnet.nodes[3].info().unwrap().id();
        let nodes = testnet.nodes[0].find_node(target).unwrap();

        assert!(nodes.iter().any(|contact| contact.id() == &target));
    }
}
