//! Iterative FIND_NODE / FIND_VALUE lookups.

use std::collections::HashSet;

use tracing::{debug, trace};

use crate::common::messages::{ItemPayload, Method, ResponseSpecific};
use crate::common::{Contact, Id, Item};
use crate::core::server::Validator;
use crate::{Error, RpcError};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LookupKind {
    /// Find the contacts nearest to a key.
    Node,
    /// Find the value stored under a key.
    Value,
}

#[derive(Debug, Clone, PartialEq)]
pub enum LookupOutcome {
    /// The shortlist the lookup converged on.
    Nodes(Vec<Contact>),
    /// A validated value, and the nearest peer to us that lacked it.
    Value {
        item: Item,
        cache_at: Option<Contact>,
    },
}

impl LookupOutcome {
    /// Contacts of a [LookupOutcome::Nodes], empty for a found value.
    pub fn into_nodes(self) -> Vec<Contact> {
        match self {
            LookupOutcome::Nodes(nodes) => nodes,
            LookupOutcome::Value { .. } => Vec::new(),
        }
    }
}

#[derive(Debug)]
pub enum LookupStep {
    /// Query these contacts, then feed every completion back.
    Query(Vec<Contact>),
    Done(LookupOutcome),
}

#[derive(Debug)]
/// State of one iterative lookup.
///
/// Lookups advance in rounds: every contact queried in a round has to respond or
/// fail before [Lookup::next_round] decides whether to stop or which contacts to
/// query next.
pub struct Lookup {
    kind: LookupKind,
    key: String,
    target: Id,
    self_id: Id,
    alpha: usize,
    k: usize,

    /// Candidates in the order they were learned about, unique by id.
    shortlist: Vec<Contact>,
    /// Contacts already queried.
    contacted: HashSet<Id>,
    /// Contacts that failed or returned bad data, never queried again.
    failed: HashSet<Id>,
    closest: Contact,
    /// Closest contact as of the end of the previous round.
    previous_closest: Option<Id>,
    found: Option<Item>,
    contacts_without_value: Vec<Contact>,
    /// Correlation ids of the current round's queries.
    inflight: HashSet<String>,
}

impl Lookup {
    /// Start a lookup for `key` from `seeds`, the nearest contacts we know about.
    ///
    /// Fails with [Error::NotConnected] if there are no seeds.
    pub fn new(
        kind: LookupKind,
        key: &str,
        self_id: Id,
        seeds: Vec<Contact>,
        alpha: usize,
        k: usize,
    ) -> Result<Self, Error> {
        let target = Id::from_key(key);

        let closest = seeds
            .iter()
            .min_by_key(|contact| contact.id().xor(&target))
            .cloned()
            .ok_or(Error::NotConnected)?;

        trace!(?kind, ?key, ?target, seeds = seeds.len(), "New lookup");

        Ok(Lookup {
            kind,
            key: key.to_string(),
            target,
            self_id,
            alpha,
            k,

            shortlist: seeds,
            contacted: HashSet::new(),
            failed: HashSet::new(),
            closest,
            previous_closest: None,
            found: None,
            contacts_without_value: Vec::new(),
            inflight: HashSet::new(),
        })
    }

    // === Getters ===

    pub fn kind(&self) -> LookupKind {
        self.kind
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn target(&self) -> &Id {
        &self.target
    }

    /// The request method this lookup queries peers with.
    pub fn method(&self) -> Method {
        match self.kind {
            LookupKind::Node => Method::FindNode,
            LookupKind::Value => Method::FindValue,
        }
    }

    pub fn shortlist(&self) -> &[Contact] {
        &self.shortlist
    }

    pub fn closest(&self) -> &Contact {
        &self.closest
    }

    /// Returns `true` if the correlation id belongs to this lookup's current round.
    pub fn is_inflight(&self, id: &str) -> bool {
        self.inflight.contains(id)
    }

    /// Returns `true` once every query of the current round completed.
    pub fn round_complete(&self) -> bool {
        self.inflight.is_empty()
    }

    // === Public Methods ===

    /// First round: every seed.
    pub fn start(&mut self) -> Vec<Contact> {
        let contacts: Vec<Contact> = self
            .shortlist
            .iter()
            .filter(|contact| !self.contacted.contains(contact.id()))
            .cloned()
            .collect();

        for contact in &contacts {
            self.contacted.insert(*contact.id());
        }

        contacts
    }

    /// Register the correlation id of a query sent in the current round.
    pub fn add_inflight(&mut self, id: String) {
        self.inflight.insert(id);
    }

    /// Handle the response to query `id` sent to `to`.
    pub fn on_response(
        &mut self,
        id: &str,
        to: &Contact,
        response: ResponseSpecific,
        validator: &dyn Validator,
    ) {
        if !self.inflight.remove(id) {
            return;
        }

        if let Some(error) = response.error {
            self.on_failure(
                to,
                RpcError::Remote {
                    code: error.code,
                    message: error.message,
                },
            );
            return;
        }

        let responder = response.responder.unwrap_or_else(|| to.clone());
        self.contacted.insert(*responder.id());

        if responder.id().xor(&self.target) < self.closest.id().xor(&self.target) {
            self.closest = responder.clone();
        }

        match (self.kind, response.item) {
            (LookupKind::Value, Some(ItemPayload::Valid(item)))
                if item.key() == self.key && validator.validate(item.key(), item.value()) =>
            {
                debug!(key = ?self.key, from = %responder, "Lookup found value");

                if self.found.is_none() {
                    self.found = Some(item);
                }
            }
            (LookupKind::Value, Some(payload)) => {
                debug!(key = ?self.key, from = %responder, ?payload, "Lookup got untrusted value");

                self.drop_contact(to);
                self.drop_contact(&responder);
            }
            (LookupKind::Value, None) => {
                self.contacts_without_value.push(responder);
                self.merge(response.nodes.unwrap_or_default());
            }
            (LookupKind::Node, _) => {
                self.merge(response.nodes.unwrap_or_default());
            }
        }
    }

    /// Handle a failed query `id` to `to`.
    pub fn on_error(&mut self, id: &str, to: &Contact, error: RpcError) {
        if self.inflight.remove(id) {
            self.on_failure(to, error);
        }
    }

    /// Decide, after a complete round, whether the lookup is done or whom to query next.
    pub fn next_round(&mut self) -> LookupStep {
        if let Some(item) = self.found.take() {
            let self_id = self.self_id;
            let cache_at = self
                .contacts_without_value
                .iter()
                .min_by_key(|contact| contact.id().xor(&self_id))
                .cloned();

            return LookupStep::Done(LookupOutcome::Value { item, cache_at });
        }

        let unchanged = self.previous_closest.as_ref() == Some(self.closest.id());
        self.previous_closest = Some(*self.closest.id());

        if unchanged || self.shortlist.len() >= self.k {
            return self.done();
        }

        let remaining: Vec<Contact> = self
            .shortlist
            .iter()
            .filter(|contact| !self.contacted.contains(contact.id()))
            .take(self.alpha)
            .cloned()
            .collect();

        if remaining.is_empty() {
            return self.done();
        }

        for contact in &remaining {
            self.contacted.insert(*contact.id());
        }

        LookupStep::Query(remaining)
    }

    // === Private Methods ===

    fn done(&self) -> LookupStep {
        debug!(
            key = ?self.key,
            shortlist = self.shortlist.len(),
            "Lookup done"
        );

        LookupStep::Done(LookupOutcome::Nodes(self.shortlist.clone()))
    }

    fn on_failure(&mut self, to: &Contact, error: RpcError) {
        trace!(key = ?self.key, to = %to, ?error, "Lookup query failed");

        self.drop_contact(to);
    }

    fn drop_contact(&mut self, contact: &Contact) {
        self.failed.insert(*contact.id());
        self.shortlist.retain(|candidate| candidate.id() != contact.id());
    }

    /// Append unseen contacts to the shortlist, first seen wins.
    fn merge(&mut self, contacts: Vec<Contact>) {
        for contact in contacts {
            if contact.id() == &self.self_id
                || self.failed.contains(contact.id())
                || self.shortlist.contains(&contact)
            {
                continue;
            }

            self.shortlist.push(contact);
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::core::server::AcceptAll;

    #[derive(Debug)]
    struct RejectAll;

    impl Validator for RejectAll {
        fn validate(&self, _key: &str, _value: &str) -> bool {
            false
        }
    }

    fn contact(nick: &str) -> Contact {
        Contact::nickname(nick).unwrap()
    }

    fn nodes(responder: &Contact, nodes: &[&Contact]) -> ResponseSpecific {
        ResponseSpecific::new(responder.clone())
            .with_nodes(nodes.iter().map(|contact| (*contact).clone()).collect())
    }

    /// Send every contact of a round a query, returning (correlation id, contact).
    fn send(lookup: &mut Lookup, contacts: Vec<Contact>) -> Vec<(String, Contact)> {
        contacts
            .into_iter()
            .map(|contact| {
                let id = Id::random().to_string();
                lookup.add_inflight(id.clone());
                (id, contact)
            })
            .collect()
    }

    #[test]
    fn no_seeds() {
        let result = Lookup::new(LookupKind::Node, "beep", Id::random(), vec![], 3, 20);

        assert!(matches!(result, Err(Error::NotConnected)));
    }

    #[test]
    fn node_lookup_follows_returned_contacts() {
        let (a, b, c) = (contact("a"), contact("b"), contact("c"));
        let mut lookup =
            Lookup::new(LookupKind::Node, "beep", Id::random(), vec![a.clone()], 3, 20).unwrap();

        let seeds = lookup.start();
        let round = send(&mut lookup, seeds);
        assert_eq!(round.len(), 1);

        lookup.on_response(&round[0].0, &a, nodes(&a, &[&b, &c, &a]), &AcceptAll);
        assert!(lookup.round_complete());

        let LookupStep::Query(next) = lookup.next_round() else {
            panic!("expected a second round");
        };
        assert_eq!(next, vec![b.clone(), c.clone()]);

        let round = send(&mut lookup, next);
        lookup.on_response(&round[0].0, &b, nodes(&b, &[&a]), &AcceptAll);
        assert!(!lookup.round_complete());
        lookup.on_response(&round[1].0, &c, nodes(&c, &[]), &AcceptAll);

        let LookupStep::Done(LookupOutcome::Nodes(result)) = lookup.next_round() else {
            panic!("expected the lookup to finish");
        };

        assert_eq!(result, vec![a, b, c]);
    }

    #[test]
    fn failed_contacts_are_dropped_for_good() {
        let (a, b, c) = (contact("a"), contact("b"), contact("c"));
        let mut lookup =
            Lookup::new(LookupKind::Node, "beep", Id::random(), vec![a.clone(), b.clone()], 3, 20)
                .unwrap();

        let seeds = lookup.start();
        let round = send(&mut lookup, seeds);
        lookup.on_error(&round[1].0, &b, RpcError::Timeout);
        lookup.on_response(&round[0].0, &a, nodes(&a, &[&b, &c]), &AcceptAll);

        assert_eq!(lookup.shortlist(), &[a, c]);
    }

    #[test]
    fn every_query_failing_terminates_empty() {
        let a = contact("a");
        let mut lookup =
            Lookup::new(LookupKind::Node, "beep", Id::random(), vec![a.clone()], 3, 20).unwrap();

        let seeds = lookup.start();
        let round = send(&mut lookup, seeds);
        lookup.on_error(&round[0].0, &a, RpcError::Timeout);

        assert!(matches!(
            lookup.next_round(),
            LookupStep::Done(LookupOutcome::Nodes(nodes)) if nodes.is_empty()
        ));
    }

    #[test]
    fn full_shortlist_terminates() {
        let (a, b, c) = (contact("a"), contact("b"), contact("c"));
        let mut lookup =
            Lookup::new(LookupKind::Node, "beep", Id::random(), vec![a.clone()], 3, 2).unwrap();

        let seeds = lookup.start();
        let round = send(&mut lookup, seeds);
        lookup.on_response(&round[0].0, &a, nodes(&a, &[&b, &c]), &AcceptAll);

        assert!(matches!(
            lookup.next_round(),
            LookupStep::Done(LookupOutcome::Nodes(nodes)) if nodes.len() == 3
        ));
    }

    #[test]
    fn value_found_caches_at_closest_to_self() {
        let self_id = Id::random();
        let (a, b, c) = (contact("a"), contact("b"), contact("c"));
        let item = Item::new("beep", "boop", *b.id());

        let mut lookup = Lookup::new(
            LookupKind::Value,
            "beep",
            self_id,
            vec![a.clone(), b.clone(), c.clone()],
            3,
            20,
        )
        .unwrap();

        let seeds = lookup.start();
        let round = send(&mut lookup, seeds);
        lookup.on_response(&round[0].0, &a, nodes(&a, &[]), &AcceptAll);
        lookup.on_response(
            &round[1].0,
            &b,
            ResponseSpecific::new(b.clone()).with_item(item.clone()),
            &AcceptAll,
        );
        lookup.on_response(&round[2].0, &c, nodes(&c, &[]), &AcceptAll);

        let expected_cache = if a.id().xor(&self_id) < c.id().xor(&self_id) {
            a
        } else {
            c
        };

        let LookupStep::Done(LookupOutcome::Value {
            item: found,
            cache_at,
        }) = lookup.next_round()
        else {
            panic!("expected a value");
        };

        assert_eq!(found, item);
        assert_eq!(cache_at, Some(expected_cache));
    }

    #[test]
    fn rejected_value_drops_responder() {
        let (a, b) = (contact("a"), contact("b"));
        let item = Item::new("beep", "boop", *a.id());

        let mut lookup = Lookup::new(
            LookupKind::Value,
            "beep",
            Id::random(),
            vec![a.clone()],
            3,
            20,
        )
        .unwrap();

        let seeds = lookup.start();
        let round = send(&mut lookup, seeds);
        lookup.on_response(
            &round[0].0,
            &a,
            ResponseSpecific::new(a.clone())
                .with_item(item)
                .with_nodes(vec![b.clone()]),
            &RejectAll,
        );

        assert!(lookup.shortlist().is_empty());
        assert!(matches!(
            lookup.next_round(),
            LookupStep::Done(LookupOutcome::Nodes(nodes)) if nodes.is_empty()
        ));
    }

    #[test]
    fn value_for_another_key_is_untrusted() {
        let a = contact("a");
        let item = Item::new("other", "boop", *a.id());

        let mut lookup =
            Lookup::new(LookupKind::Value, "beep", Id::random(), vec![a.clone()], 3, 20).unwrap();

        let seeds = lookup.start();
        let round = send(&mut lookup, seeds);
        lookup.on_response(
            &round[0].0,
            &a,
            ResponseSpecific::new(a.clone()).with_item(item),
            &AcceptAll,
        );

        assert!(lookup.shortlist().is_empty());
    }

    #[test]
    fn unknown_correlation_ids_are_ignored() {
        let a = contact("a");
        let mut lookup =
            Lookup::new(LookupKind::Node, "beep", Id::random(), vec![a.clone()], 3, 20).unwrap();

        let seeds = lookup.start();
        let round = send(&mut lookup, seeds);
        lookup.on_error("unknown", &a, RpcError::Timeout);

        assert!(!lookup.round_complete());
        assert!(lookup.is_inflight(&round[0].0));
        assert_eq!(lookup.shortlist(), &[a]);
    }
}
