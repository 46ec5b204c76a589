//! Records stored in the DHT.

use crate::common::{now_millis, Id};
use crate::Error;

#[derive(Clone, Debug, PartialEq, Eq)]
/// A stored key/value record and who published it.
pub struct Item {
    key: String,
    value: String,
    publisher: Id,
    /// Milliseconds since the unix epoch.
    timestamp: u64,
}

impl Item {
    /// Create an item published now.
    pub fn new(key: &str, value: &str, publisher: Id) -> Item {
        Item {
            key: key.to_string(),
            value: value.to_string(),
            publisher,
            timestamp: now_millis(),
        }
    }

    /// Rebuild an item received from a peer.
    ///
    /// Rejects malformed publishers. A timestamp ahead of the local clock, as peers
    /// with a skewed clock send, is clamped to now.
    pub fn from_parts(
        key: String,
        value: String,
        publisher: &str,
        timestamp: u64,
    ) -> Result<Item, Error> {
        let publisher = publisher
            .parse::<Id>()
            .map_err(|_| Error::InvalidArgument(format!("invalid publisher {:?}", publisher)))?;

        Ok(Item {
            key,
            value,
            publisher,
            timestamp: timestamp.min(now_millis()),
        })
    }

    // === Getters ===

    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn value(&self) -> &str {
        &self.value
    }

    pub fn publisher(&self) -> &Id {
        &self.publisher
    }

    pub fn timestamp(&self) -> u64 {
        self.timestamp
    }

    /// Position of this item's key in the identifier space.
    pub fn target(&self) -> Id {
        Id::from_key(&self.key)
    }

    /// Milliseconds elapsed since publication, as of `now`.
    pub fn age_at(&self, now: u64) -> u64 {
        now.saturating_sub(self.timestamp)
    }

    // === Public Methods ===

    /// The same record published again by `publisher` with a fresh timestamp.
    pub fn republished(&self, publisher: Id) -> Item {
        Item::new(&self.key, &self.value, publisher)
    }
}
