//! Actor implementation - I/O orchestration layer of a node.
//!
//! The [Actor] owns the routing table, the [Rpc] layer, storage and every running
//! lookup, and is driven by [Actor::tick] from the node's thread.

mod handle_request;
mod handle_response;
mod info;

use std::collections::{HashMap, VecDeque};

use flume::{Receiver, RecvError, Sender, TryRecvError};
use serde_json::{Map, Value};
use tracing::{debug, error, info, trace};

use crate::common::messages::{Method, RequestSpecific};
use crate::common::{Contact, Id, Item, PendingEviction, RoutingTable, UpdateOutcome, MAX_DISTANCE};
use crate::core::lookup::{Lookup, LookupKind, LookupOutcome, LookupStep};
use crate::core::maintenance::{ItemAction, Maintenance};
use crate::core::server::{ContactFilter, Server, Validator};
use crate::core::store_query::StoreQuery;
use crate::rpc::{Config, Rpc, RpcEvent, UdpTransport};
use crate::storage::{MemoryStorage, Storage};
use crate::{Error, PutError};

pub use info::Info;

/// What a pending call's completion is routed back to.
#[derive(Debug)]
pub(crate) enum Waiter {
    /// A FIND_NODE or FIND_VALUE query of a lookup.
    Lookup(u64),
    /// PING to the head of a full bucket.
    Eviction(PendingEviction),
    /// STORE request of a store query.
    Store(u64),
    /// Request of a protocol extension method, made through [crate::Node::call].
    Call(Sender<Result<Map<String, Value>, Error>>),
}

/// What to do once a lookup terminates.
#[derive(Debug)]
enum LookupPurpose {
    /// Bootstrapping lookup of our own id, bucket refresh follows.
    Connect(Sender<Result<(), Error>>),
    /// One bucket of a refresh, the next bucket follows.
    Refresh,
    FindNode(Sender<Result<Vec<Contact>, Error>>),
    Get(Sender<Result<String, Error>>),
    /// Locate the nodes to STORE `item` at.
    ///
    /// Replication and republishing have nobody waiting for the result.
    Put {
        item: Item,
        sender: Option<Sender<Result<usize, PutError>>>,
    },
}

#[derive(Debug)]
/// Internal Actor called in the node's thread loop.
pub struct Actor {
    receiver: Receiver<ActorMessage>,

    alpha: usize,
    k: usize,

    rpc: Rpc<Waiter>,
    routing_table: RoutingTable,
    server: Server,
    storage: Box<dyn Storage>,
    validator: Box<dyn Validator>,
    filter: Option<Box<dyn ContactFilter>>,
    maintenance: Maintenance,

    next_query_id: u64,
    lookups: HashMap<u64, (Lookup, LookupPurpose)>,
    store_queries: HashMap<u64, (StoreQuery, Option<Sender<Result<usize, PutError>>>)>,

    /// Bucket indices left to refresh, one lookup at a time.
    refresh_queue: VecDeque<usize>,
    refreshing: bool,

    /// Inbound messages that failed to decode.
    dropped_messages: usize,
}

impl Actor {
    /// Creates a new Actor. Does not perform any network I/O until [Actor::tick] is called.
    pub(crate) fn new(config: Config, receiver: Receiver<ActorMessage>) -> Result<Self, Error> {
        let maintenance = Maintenance::new(&config);
        let sweep_interval = config.sweep_interval();

        let mut server = Server::new();
        for (method, handler) in config.protocol {
            server.register(&method, handler)?;
        }

        let transport = match config.transport {
            Some(transport) => transport,
            None => Box::new(UdpTransport::bind("0.0.0.0:0")?),
        };

        let rpc = Rpc::new(transport, config.request_timeout, sweep_interval)?;
        let routing_table = RoutingTable::new(*rpc.contact().id(), config.k);

        info!(contact = %rpc.contact(), id = %rpc.contact().id(), "Kadmesh node listening");

        Ok(Actor {
            receiver,

            alpha: config.alpha,
            k: config.k,

            rpc,
            routing_table,
            server,
            storage: config
                .storage
                .unwrap_or_else(|| Box::new(MemoryStorage::new())),
            validator: config.validator,
            filter: config.filter,
            maintenance,

            next_query_id: 0,
            lookups: HashMap::new(),
            store_queries: HashMap::new(),

            refresh_queue: VecDeque::new(),
            refreshing: false,

            dropped_messages: 0,
        })
    }

    // === Getters ===

    /// Returns the node's Id
    pub fn id(&self) -> &Id {
        self.routing_table.id()
    }

    /// This node's contact, as advertised to peers.
    pub fn contact(&self) -> &Contact {
        self.rpc.contact()
    }

    pub fn routing_table(&self) -> &RoutingTable {
        &self.routing_table
    }

    /// Returns a summary of this node's state.
    pub fn info(&self) -> Info {
        Info::from(self)
    }

    // === Public Methods ===

    /// Handle at most one message from the node handles, advance the RPC layer and run
    /// periodic maintenance.
    ///
    /// Returns an error once every node handle was dropped or shutdown was requested.
    pub fn tick(&mut self) -> Result<(), RecvError> {
        match self.receiver.try_recv() {
            Ok(ActorMessage::Shutdown(sender)) => {
                debug!("Kadmesh actor shutdown requested");
                let _ = sender.send(());
                return Err(RecvError::Disconnected);
            }
            Ok(actor_message) => self.handle_actor_message(actor_message),
            Err(TryRecvError::Disconnected) => {
                // Node was dropped, kill this thread.
                debug!("Kadmesh actor thread was shutdown after Drop.");
                return Err(RecvError::Disconnected);
            }
            Err(TryRecvError::Empty) => {
                // No op
            }
        }

        for event in self.rpc.tick() {
            match event {
                RpcEvent::Request { id, request } => self.handle_request(id, request),
                RpcEvent::Completion {
                    id,
                    to,
                    context,
                    result,
                } => self.handle_completion(&id, &to, context, result),
                RpcEvent::Dropped { from, reason } => {
                    debug!(?from, ?reason, "Dropped undecodable message");

                    self.dropped_messages += 1;
                }
            }
        }

        self.periodic_maintenance();

        Ok(())
    }

    // === Private Methods ===

    fn handle_actor_message(&mut self, actor_message: ActorMessage) {
        match actor_message {
            ActorMessage::Info(sender) => {
                let _ = sender.send(self.info());
            }
            ActorMessage::Connect(seed, sender) => {
                debug!(%seed, "Entering overlay network");

                self.observe(seed);

                let key = self.id().to_string();
                self.start_lookup(LookupKind::Node, &key, LookupPurpose::Connect(sender));
            }
            ActorMessage::FindNode(target, sender) => {
                self.start_lookup(
                    LookupKind::Node,
                    &target.to_string(),
                    LookupPurpose::FindNode(sender),
                );
            }
            ActorMessage::Put(key, value, sender) => {
                if !self.validator.validate(&key, &value) {
                    debug!(?key, "Failed to validate key/value pair");

                    let _ = sender.send(Err(Error::ValidationRejected(key).into()));
                    return;
                }

                let item = Item::new(&key, &value, *self.id());

                // Our own copy is what gets republished.
                if let Err(error) = self.storage.put(&key, item.clone()) {
                    error!(?error, ?key, "Failed to store published item locally");
                }

                self.start_lookup(
                    LookupKind::Node,
                    &key,
                    LookupPurpose::Put {
                        item,
                        sender: Some(sender),
                    },
                );
            }
            ActorMessage::Call(to, method, params, sender) => {
                let request = RequestSpecific::named(&method, self.contact().clone())
                    .with_params(params);

                self.rpc.request(&to, request, Some(Waiter::Call(sender)));
            }
            ActorMessage::Get(key, sender) => match self.storage.get(&key) {
                Ok(Some(item)) => {
                    let _ = sender.send(Ok(item.value().to_string()));
                }
                Ok(None) => {
                    self.start_lookup(LookupKind::Value, &key, LookupPurpose::Get(sender));
                }
                Err(error) => {
                    error!(?error, ?key, "Failed to read local storage");

                    self.start_lookup(LookupKind::Value, &key, LookupPurpose::Get(sender));
                }
            },
            // Handled in tick()
            ActorMessage::Shutdown(_) => {}
        }
    }

    /// Feed a contact seen in traffic to the routing table, pinging the head of its
    /// bucket if the bucket is full.
    fn observe(&mut self, contact: Contact) {
        if let UpdateOutcome::PingHead(pending) = self.routing_table.update_contact(contact) {
            trace!(
                head = %pending.head,
                candidate = %pending.candidate,
                "Pinging head of full bucket"
            );

            let head = pending.head.clone();
            let request = RequestSpecific::new(Method::Ping, self.contact().clone());

            self.rpc.request(&head, request, Some(Waiter::Eviction(pending)));
        }
    }

    fn next_query_id(&mut self) -> u64 {
        self.next_query_id = self.next_query_id.wrapping_add(1);
        self.next_query_id
    }

    /// Seed a lookup with the nearest known contacts and send its first round.
    fn start_lookup(&mut self, kind: LookupKind, key: &str, purpose: LookupPurpose) {
        let target = Id::from_key(key);
        let seeds = self
            .routing_table
            .nearest_contacts(&target, self.alpha, Some(self.id()));

        match Lookup::new(kind, key, *self.id(), seeds, self.alpha, self.k) {
            Ok(mut lookup) => {
                let query_id = self.next_query_id();

                let contacts = lookup.start();
                self.send_lookup_queries(query_id, &mut lookup, contacts);

                self.lookups.insert(query_id, (lookup, purpose));
            }
            Err(error) => {
                debug!(?error, ?key, "Could not start lookup");

                self.lookup_done(key, purpose, Err(error));
            }
        }
    }

    fn send_lookup_queries(&mut self, query_id: u64, lookup: &mut Lookup, contacts: Vec<Contact>) {
        for contact in contacts {
            let request =
                RequestSpecific::new(lookup.method(), self.contact().clone()).with_key(lookup.key());

            let id = self
                .rpc
                .request(&contact, request, Some(Waiter::Lookup(query_id)));

            lookup.add_inflight(id);
        }
    }

    /// Advance a lookup whose round just completed.
    fn next_lookup_round(&mut self, query_id: u64, mut lookup: Lookup, purpose: LookupPurpose) {
        match lookup.next_round() {
            LookupStep::Query(contacts) => {
                self.send_lookup_queries(query_id, &mut lookup, contacts);
                self.lookups.insert(query_id, (lookup, purpose));
            }
            LookupStep::Done(outcome) => {
                let key = lookup.key().to_string();
                self.lookup_done(&key, purpose, Ok(outcome));
            }
        }
    }

    fn lookup_done(&mut self, key: &str, purpose: LookupPurpose, result: Result<LookupOutcome, Error>) {
        match purpose {
            LookupPurpose::Connect(sender) => {
                if result.is_ok() {
                    info!(
                        table_size = self.routing_table.size(),
                        "Connected to the overlay network"
                    );

                    self.refresh_buckets();
                }

                let _ = sender.send(result.map(|_| ()));
            }
            LookupPurpose::Refresh => self.refresh_next(),
            LookupPurpose::FindNode(sender) => {
                let _ = sender.send(result.map(LookupOutcome::into_nodes));
            }
            LookupPurpose::Get(sender) => {
                let result = match result {
                    Ok(LookupOutcome::Value { item, cache_at }) => {
                        if let Some(contact) = cache_at {
                            debug!(?key, to = %contact, "Caching value toward self");

                            let request = RequestSpecific::new(Method::Store, self.contact().clone())
                                .with_item(item.clone());
                            self.rpc.request(&contact, request, None);
                        }

                        Ok(item.value().to_string())
                    }
                    Ok(LookupOutcome::Nodes(_)) => Err(Error::ValueNotFound(key.to_string())),
                    Err(error) => Err(error),
                };

                let _ = sender.send(result);
            }
            LookupPurpose::Put { item, sender } => match result {
                Ok(outcome) => {
                    let mut contacts = outcome.into_nodes();

                    if contacts.is_empty() {
                        debug!(?key, "Lookup found no contacts, storing at nearest known");

                        contacts = self.routing_table.nearest_contacts(
                            &item.target(),
                            self.k,
                            Some(self.id()),
                        );
                    }

                    self.start_store(item, contacts, sender);
                }
                Err(error) => {
                    if let Some(sender) = sender {
                        let _ = sender.send(Err(error.into()));
                    }
                }
            },
        }
    }

    /// STORE `item` at every one of `contacts`.
    fn start_store(
        &mut self,
        item: Item,
        contacts: Vec<Contact>,
        sender: Option<Sender<Result<usize, PutError>>>,
    ) {
        if contacts.is_empty() {
            if let Some(sender) = sender {
                let _ = sender.send(Err(Error::NotConnected.into()));
            }
            return;
        }

        debug!(key = item.key(), count = contacts.len(), "Sending STORE requests");

        let query_id = self.next_query_id();
        let mut query = StoreQuery::new(item);

        for contact in contacts {
            let request = RequestSpecific::new(Method::Store, self.contact().clone())
                .with_item(query.item().clone());

            let id = self
                .rpc
                .request(&contact, request, Some(Waiter::Store(query_id)));

            query.add_inflight(id);
        }

        self.store_queries.insert(query_id, (query, sender));
    }

    /// Queue a refresh lookup for every bucket index from the lowest populated one upward.
    fn refresh_buckets(&mut self) {
        let Some(lowest) = self.routing_table.lowest_populated_index() else {
            return;
        };

        debug!(lowest, "Refreshing buckets");

        self.refresh_queue = (lowest..MAX_DISTANCE).collect();

        if !self.refreshing {
            self.refresh_next();
        }
    }

    fn refresh_next(&mut self) {
        self.refreshing = false;

        while let Some(index) = self.refresh_queue.pop_front() {
            let target = match self.id().random_in_bucket(index) {
                Ok(target) => target,
                Err(error) => {
                    debug!(?error, index, "Skipping bucket refresh");
                    continue;
                }
            };

            if self.routing_table.is_empty() {
                self.refresh_queue.clear();
                return;
            }

            self.refreshing = true;
            self.start_lookup(LookupKind::Node, &target.to_string(), LookupPurpose::Refresh);

            return;
        }
    }

    fn periodic_maintenance(&mut self) {
        let decisions = self.maintenance.decisions();

        if decisions.should_refresh {
            self.refresh_buckets();
        }

        if decisions.should_replicate || decisions.should_expire {
            self.sweep_items(decisions.should_replicate);
        }
    }

    /// Expire old items, and replicate or republish the rest if `replicate` is set.
    fn sweep_items(&mut self, replicate: bool) {
        let self_id = *self.id();
        let now = crate::common::now_millis();

        let items: Vec<(String, Item)> = self.storage.scan().collect();

        debug!(count = items.len(), replicate, "Sweeping stored items");

        for (key, item) in items {
            match self.maintenance.item_action_at(&item, &self_id, now) {
                ItemAction::Expire => {
                    if let Err(error) = self.storage.del(&key) {
                        error!(?error, ?key, "Failed to expire item");
                    }
                }
                ItemAction::Replicate if replicate => {
                    self.start_lookup(
                        LookupKind::Node,
                        &key,
                        LookupPurpose::Put { item, sender: None },
                    );
                }
                ItemAction::Republish if replicate => {
                    let item = item.republished(self_id);

                    if let Err(error) = self.storage.put(&key, item.clone()) {
                        error!(?error, ?key, "Failed to republish item");
                        continue;
                    }

                    self.start_lookup(
                        LookupKind::Node,
                        &key,
                        LookupPurpose::Put { item, sender: None },
                    );
                }
                _ => {}
            }
        }
    }
}

#[derive(Debug)]
pub(crate) enum ActorMessage {
    Connect(Contact, Sender<Result<(), Error>>),
    Put(String, String, Sender<Result<usize, PutError>>),
    Get(String, Sender<Result<String, Error>>),
    FindNode(Id, Sender<Result<Vec<Contact>, Error>>),
    Call(
        Contact,
        String,
        Map<String, Value>,
        Sender<Result<Map<String, Value>, Error>>,
    ),
    Info(Sender<Info>),
    Shutdown(Sender<()>),
}
