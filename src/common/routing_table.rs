//! Kademlia routing table

use std::collections::{BTreeMap, HashSet};
use std::slice::Iter;

use tracing::debug;

use crate::common::{Contact, Id, MAX_DISTANCE};

/// K = the default maximum size of a k-bucket.
pub const MAX_BUCKET_SIZE_K: usize = 20;

#[derive(Debug, Clone)]
/// Kademlia routing table, one [Bucket] per distance range from this node's [Id].
pub struct RoutingTable {
    id: Id,
    k: usize,
    buckets: BTreeMap<usize, Bucket>,
    /// Bucket indices whose head contact is being pinged.
    pending_evictions: HashSet<usize>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
/// What [RoutingTable::update_contact] did with an observed contact.
pub enum UpdateOutcome {
    /// The contact was known and moved to the tail of its bucket.
    Promoted,
    /// The contact was appended to a bucket with room.
    Added,
    /// The contact is this node.
    Ignored,
    /// The bucket is full and already waiting on a head ping, the contact was dropped.
    Dropped,
    /// The bucket is full, ping [PendingEviction::head] and report back through
    /// [RoutingTable::apply_ping_result].
    PingHead(PendingEviction),
}

#[derive(Debug, Clone, PartialEq, Eq)]
/// A full bucket waiting to learn whether its least recently seen contact is alive.
pub struct PendingEviction {
    pub bucket_index: usize,
    /// Least recently seen contact of the bucket.
    pub head: Contact,
    /// Contact that takes the head's place if it turns out unreachable.
    pub candidate: Contact,
}

impl RoutingTable {
    /// Create a new [RoutingTable] with a given id and bucket size.
    pub fn new(id: Id, k: usize) -> Self {
        RoutingTable {
            id,
            k,
            buckets: BTreeMap::new(),
            pending_evictions: HashSet::new(),
        }
    }

    // === Getters ===

    /// Returns the [Id] of this node, where the distance is measured from.
    pub fn id(&self) -> &Id {
        &self.id
    }

    pub fn bucket(&self, index: usize) -> Option<&Bucket> {
        self.buckets.get(&index)
    }

    /// Returns `true` if this routing table is empty.
    pub fn is_empty(&self) -> bool {
        self.buckets.values().all(|bucket| bucket.is_empty())
    }

    /// Return the number of contacts in this routing table.
    pub fn size(&self) -> usize {
        self.buckets.values().map(|bucket| bucket.size()).sum()
    }

    /// Returns an iterator over the contacts in this routing table, closest buckets first.
    pub fn contacts(&self) -> impl Iterator<Item = &Contact> {
        self.buckets.values().flat_map(|bucket| bucket.iter())
    }

    /// The lowest bucket index holding at least one contact.
    pub fn lowest_populated_index(&self) -> Option<usize> {
        self.buckets
            .iter()
            .find(|(_, bucket)| !bucket.is_empty())
            .map(|(index, _)| *index)
    }

    pub fn contains(&self, id: &Id) -> bool {
        self.buckets
            .get(&self.id.bucket_index(id))
            .map(|bucket| bucket.has_contact(id))
            .unwrap_or(false)
    }

    // === Public Methods ===

    /// Up to `limit` known contacts nearest to `key`, ordered by distance to `key`,
    /// never including `exclude`.
    ///
    /// Starts at the bucket `key` falls in, then walks outward one bucket up and one
    /// bucket down at a time until `limit` contacts were collected or both ends are
    /// exhausted.
    pub fn nearest_contacts(&self, key: &Id, limit: usize, exclude: Option<&Id>) -> Vec<Contact> {
        let mut contacts = Vec::with_capacity(limit);

        let collect = |index: usize, contacts: &mut Vec<Contact>| {
            if let Some(bucket) = self.buckets.get(&index) {
                contacts.extend(
                    bucket
                        .iter()
                        .filter(|contact| Some(contact.id()) != exclude)
                        .cloned(),
                );
            }
        };

        let start = self.id.bucket_index(key);
        collect(start, &mut contacts);

        let mut ascending = start + 1;
        let mut descending = start.checked_sub(1);

        while contacts.len() < limit && (ascending < MAX_DISTANCE || descending.is_some()) {
            if ascending < MAX_DISTANCE {
                collect(ascending, &mut contacts);
                ascending += 1;
            }

            if contacts.len() >= limit {
                break;
            }

            if let Some(index) = descending {
                collect(index, &mut contacts);
                descending = index.checked_sub(1);
            }
        }

        contacts.sort_by_key(|contact| contact.id().xor(key));
        contacts.truncate(limit);

        contacts
    }

    /// Record that `contact` was observed in traffic.
    ///
    /// Known contacts are promoted to the tail of their bucket, new contacts are
    /// appended if there is room. A full bucket never drops a contact on its own, it
    /// asks the caller to ping its head instead.
    pub fn update_contact(&mut self, mut contact: Contact) -> UpdateOutcome {
        contact.touch();

        let index = self.id.bucket_index(contact.id());

        if index >= MAX_DISTANCE {
            return UpdateOutcome::Ignored;
        }

        let k = self.k;
        let bucket = self
            .buckets
            .entry(index)
            .or_insert_with(|| Bucket::new(k));

        if bucket.has_contact(contact.id()) {
            bucket.remove_contact(contact.id());
            bucket.add_contact(contact);

            return UpdateOutcome::Promoted;
        }

        if bucket.size() < k {
            bucket.add_contact(contact);

            return UpdateOutcome::Added;
        }

        if self.pending_evictions.contains(&index) {
            debug!(?index, candidate = ?contact.id(), "Bucket full and head ping in flight");

            return UpdateOutcome::Dropped;
        }

        match bucket.contact(0) {
            Some(head) => {
                let pending = PendingEviction {
                    bucket_index: index,
                    head: head.clone(),
                    candidate: contact,
                };

                self.pending_evictions.insert(index);

                UpdateOutcome::PingHead(pending)
            }
            None => UpdateOutcome::Dropped,
        }
    }

    /// Settle a [PendingEviction]: a live head stays and the candidate is dropped, a dead
    /// head is evicted and the candidate appended.
    ///
    /// Returns `true` if the candidate was added.
    pub fn apply_ping_result(&mut self, pending: PendingEviction, head_alive: bool) -> bool {
        self.pending_evictions.remove(&pending.bucket_index);

        if head_alive {
            return false;
        }

        let k = self.k;
        let Some(bucket) = self.buckets.get_mut(&pending.bucket_index) else {
            return false;
        };

        bucket.remove_contact(pending.head.id());

        debug!(
            evicted = ?pending.head.id(),
            added = ?pending.candidate.id(),
            "Evicted unresponsive bucket head"
        );

        if bucket.has_contact(pending.candidate.id()) || bucket.size() >= k {
            return false;
        }

        bucket.add_contact(pending.candidate)
    }
}

/// Bounded list of contacts for one distance range, least recently seen first.
#[derive(Debug, Clone)]
pub struct Bucket {
    contacts: Vec<Contact>,
    capacity: usize,
}

impl Bucket {
    pub fn new(capacity: usize) -> Self {
        Bucket {
            contacts: Vec::with_capacity(capacity),
            capacity,
        }
    }

    // === Getters ===

    pub fn size(&self) -> usize {
        self.contacts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.contacts.is_empty()
    }

    /// A copy of the contacts, head first.
    pub fn contact_list(&self) -> Vec<Contact> {
        self.contacts.clone()
    }

    pub fn contact(&self, index: usize) -> Option<&Contact> {
        self.contacts.get(index)
    }

    pub fn has_contact(&self, id: &Id) -> bool {
        self.index_of(id).is_some()
    }

    pub fn index_of(&self, id: &Id) -> Option<usize> {
        self.contacts.iter().position(|contact| contact.id() == id)
    }

    pub fn iter(&self) -> Iter<'_, Contact> {
        self.contacts.iter()
    }

    // === Public Methods ===

    /// Append `contact` at the tail, returns `true` if it was added.
    ///
    /// A contact that is already present is left where it is, remove it first to
    /// promote it.
    pub fn add_contact(&mut self, contact: Contact) -> bool {
        if self.has_contact(contact.id()) || self.contacts.len() >= self.capacity {
            return false;
        }

        self.contacts.push(contact);

        true
    }

    /// Remove the contact with `id`, returns `true` if it was present.
    pub fn remove_contact(&mut self, id: &Id) -> bool {
        match self.index_of(id) {
            Some(index) => {
                self.contacts.remove(index);
                true
            }
            None => false,
        }
    }
}

impl Default for Bucket {
    fn default() -> Self {
        Self::new(MAX_BUCKET_SIZE_K)
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::common::Address;

    fn contact_with_id(id: Id) -> Contact {
        Contact::with_id(Address::Nickname(id.to_string()), id).unwrap()
    }

    fn contact_in_bucket(table: &RoutingTable, index: usize) -> Contact {
        contact_with_id(table.id().random_in_bucket(index).unwrap())
    }

    #[test]
    fn table_is_empty() {
        let mut table = RoutingTable::new(Id::random(), MAX_BUCKET_SIZE_K);
        assert!(table.is_empty());

        table.update_contact(contact_with_id(Id::random()));
        assert!(!table.is_empty());
    }

    #[test]
    fn bucket_never_duplicates_or_overflows() {
        let mut bucket = Bucket::new(3);

        let a = contact_with_id(Id::random());
        let b = contact_with_id(Id::random());

        assert!(bucket.add_contact(a.clone()));
        assert!(bucket.add_contact(b.clone()));
        assert!(!bucket.add_contact(a.clone()));
        assert!(bucket.add_contact(contact_with_id(Id::random())));
        assert!(!bucket.add_contact(contact_with_id(Id::random())));

        assert_eq!(bucket.size(), 3);

        // Re-adding does not move an existing contact.
        assert_eq!(bucket.index_of(a.id()), Some(0));

        assert!(bucket.remove_contact(a.id()));
        assert!(!bucket.remove_contact(a.id()));
        assert_eq!(bucket.index_of(b.id()), Some(0));
        assert!(bucket.contact(5).is_none());
    }

    #[test]
    fn contact_list_is_a_copy() {
        let mut bucket = Bucket::default();
        bucket.add_contact(contact_with_id(Id::random()));

        let mut list = bucket.contact_list();
        list.clear();

        assert_eq!(bucket.size(), 1);
    }

    #[test]
    fn should_not_add_self() {
        let id = Id::random();
        let mut table = RoutingTable::new(id, MAX_BUCKET_SIZE_K);

        assert_eq!(
            table.update_contact(contact_with_id(id)),
            UpdateOutcome::Ignored
        );
        assert!(table.is_empty());
    }

    #[test]
    fn update_promotes_known_contact() {
        let mut table = RoutingTable::new(Id::random(), MAX_BUCKET_SIZE_K);

        let first = contact_in_bucket(&table, 159);
        let second = contact_in_bucket(&table, 159);

        assert_eq!(table.update_contact(first.clone()), UpdateOutcome::Added);
        assert_eq!(table.update_contact(second.clone()), UpdateOutcome::Added);
        assert_eq!(table.update_contact(first.clone()), UpdateOutcome::Promoted);

        let bucket = table.bucket(159).unwrap();
        assert_eq!(bucket.index_of(second.id()), Some(0));
        assert_eq!(bucket.index_of(first.id()), Some(1));
    }

    #[test]
    fn full_bucket_pings_head_once() {
        let mut table = RoutingTable::new(Id::random(), 2);

        let head = contact_in_bucket(&table, 150);
        table.update_contact(head.clone());
        table.update_contact(contact_in_bucket(&table, 150));

        let candidate = contact_in_bucket(&table, 150);

        match table.update_contact(candidate.clone()) {
            UpdateOutcome::PingHead(pending) => {
                assert_eq!(pending.head, head);
                assert_eq!(pending.candidate, candidate);
                assert_eq!(pending.bucket_index, 150);
            }
            outcome => panic!("unexpected outcome {:?}", outcome),
        }

        assert_eq!(
            table.update_contact(contact_in_bucket(&table, 150)),
            UpdateOutcome::Dropped
        );

        // Other buckets are unaffected by the pending eviction.
        assert_eq!(
            table.update_contact(contact_in_bucket(&table, 100)),
            UpdateOutcome::Added
        );
    }

    #[test]
    fn live_head_is_kept() {
        let mut table = RoutingTable::new(Id::random(), 1);

        let head = contact_in_bucket(&table, 10);
        table.update_contact(head.clone());

        let UpdateOutcome::PingHead(pending) = table.update_contact(contact_in_bucket(&table, 10))
        else {
            panic!("expected a head ping");
        };
        let candidate = pending.candidate.clone();

        assert!(!table.apply_ping_result(pending, true));

        assert!(table.contains(head.id()));
        assert!(!table.contains(candidate.id()));
    }

    #[test]
    fn dead_head_is_evicted() {
        let mut table = RoutingTable::new(Id::random(), 1);

        let head = contact_in_bucket(&table, 10);
        table.update_contact(head.clone());

        let UpdateOutcome::PingHead(pending) = table.update_contact(contact_in_bucket(&table, 10))
        else {
            panic!("expected a head ping");
        };
        let candidate = pending.candidate.clone();

        assert!(table.apply_ping_result(pending, false));

        assert!(!table.contains(head.id()));
        assert!(table.contains(candidate.id()));

        // The bucket accepts a new eviction round afterwards.
        assert!(matches!(
            table.update_contact(contact_in_bucket(&table, 10)),
            UpdateOutcome::PingHead(_)
        ));
    }

    #[test]
    fn nearest_contacts_excludes_and_limits() {
        let mut table = RoutingTable::new(Id::random(), MAX_BUCKET_SIZE_K);

        for index in (100..160).step_by(3) {
            for _ in 0..4 {
                table.update_contact(contact_in_bucket(&table, index));
            }
        }

        let target = Id::random();
        let excluded = table.contacts().next().unwrap().id().to_owned();

        let nearest = table.nearest_contacts(&target, 20, Some(&excluded));

        assert_eq!(nearest.len(), 20);
        assert!(nearest.iter().all(|contact| contact.id() != &excluded));

        for pair in nearest.windows(2) {
            assert!(pair[0].id().xor(&target) <= pair[1].id().xor(&target));
        }
    }

    #[test]
    fn nearest_contacts_sparse_table() {
        let mut table = RoutingTable::new(Id::random(), MAX_BUCKET_SIZE_K);

        table.update_contact(contact_in_bucket(&table, 0));
        table.update_contact(contact_in_bucket(&table, 159));

        let nearest = table.nearest_contacts(table.id(), 20, None);

        assert_eq!(nearest.len(), 2);
        assert_eq!(table.id().bucket_index(nearest[0].id()), 0);
        assert_eq!(table.lowest_populated_index(), Some(0));
    }
}
