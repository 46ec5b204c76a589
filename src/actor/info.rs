use crate::common::{Contact, Id};

use super::Actor;

/// Information and statistics about this node.
#[derive(Debug, Clone)]
pub struct Info {
    id: Id,
    contact: Contact,
    routing_table_size: usize,
    stored_items: usize,
    dropped_messages: usize,
}

impl Info {
    /// This node's [Id]
    pub fn id(&self) -> &Id {
        &self.id
    }

    /// The [Contact] peers reach this node at.
    pub fn contact(&self) -> &Contact {
        &self.contact
    }

    /// Number of contacts in the routing table.
    pub fn routing_table_size(&self) -> usize {
        self.routing_table_size
    }

    /// Number of items held in local storage.
    pub fn stored_items(&self) -> usize {
        self.stored_items
    }

    /// Number of inbound messages dropped because they did not decode.
    pub fn dropped_messages(&self) -> usize {
        self.dropped_messages
    }
}

impl From<&Actor> for Info {
    fn from(actor: &Actor) -> Self {
        Self {
            id: *actor.id(),
            contact: actor.contact().clone(),
            routing_table_size: actor.routing_table().size(),
            stored_items: actor.storage.scan().count(),
            dropped_messages: actor.dropped_messages,
        }
    }
}
