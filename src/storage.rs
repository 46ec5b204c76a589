//! Storage adapters for items held by a node.

use std::collections::BTreeMap;
use std::fmt::Debug;

use crate::common::Item;
use crate::Error;

/// Persistence for the items a node is responsible for.
///
/// Owned by the node's actor thread, so implementations need no internal locking.
pub trait Storage: Debug + Send {
    fn get(&self, key: &str) -> Result<Option<Item>, Error>;

    fn put(&mut self, key: &str, item: Item) -> Result<(), Error>;

    fn del(&mut self, key: &str) -> Result<(), Error>;

    /// Lazily iterate over every stored `(key, item)` pair.
    fn scan(&self) -> Box<dyn Iterator<Item = (String, Item)> + '_>;
}

#[derive(Debug, Default, Clone)]
/// In memory [Storage], the default.
pub struct MemoryStorage {
    items: BTreeMap<String, Item>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}

impl Storage for MemoryStorage {
    fn get(&self, key: &str) -> Result<Option<Item>, Error> {
        Ok(self.items.get(key).cloned())
    }

    fn put(&mut self, key: &str, item: Item) -> Result<(), Error> {
        self.items.insert(key.to_string(), item);

        Ok(())
    }

    fn del(&mut self, key: &str) -> Result<(), Error> {
        self.items.remove(key);

        Ok(())
    }

    fn scan(&self) -> Box<dyn Iterator<Item = (String, Item)> + '_> {
        Box::new(
            self.items
                .iter()
                .map(|(key, item)| (key.clone(), item.clone())),
        )
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::common::Id;

    #[test]
    fn put_get_del_scan() {
        let mut storage = MemoryStorage::new();
        let item = Item::new("beep", "boop", Id::random());

        storage.put("beep", item.clone()).unwrap();
        storage
            .put("other", Item::new("other", "value", Id::random()))
            .unwrap();

        assert_eq!(storage.get("beep").unwrap(), Some(item));
        assert_eq!(storage.scan().count(), 2);

        storage.del("beep").unwrap();

        assert_eq!(storage.get("beep").unwrap(), None);
        assert_eq!(storage.len(), 1);
    }
}
