use std::collections::HashSet;

use tracing::debug;

use crate::common::messages::ResponseSpecific;
use crate::common::Item;
use crate::{PutError, RpcError};

#[derive(Debug)]
/// Once a lookup found the nodes nearest to an item's key, STOREs the item at all of
/// them, keeping track of acknowledging nodes and errors.
pub struct StoreQuery {
    item: Item,
    /// Nodes that confirmed success
    stored_at: usize,
    inflight_requests: HashSet<String>,
    /// Errors by count, most common first.
    errors: Vec<(usize, RpcError)>,
}

impl StoreQuery {
    pub fn new(item: Item) -> Self {
        Self {
            item,
            stored_at: 0,
            inflight_requests: HashSet::new(),
            errors: Vec::new(),
        }
    }

    // === Getters ===

    pub fn item(&self) -> &Item {
        &self.item
    }

    /// Returns `true` once every STORE got a response or failed.
    pub fn is_done(&self) -> bool {
        self.inflight_requests.is_empty()
    }

    // === Public Methods ===

    pub fn add_inflight(&mut self, id: String) {
        self.inflight_requests.insert(id);
    }

    pub fn on_response(&mut self, id: &str, response: ResponseSpecific) {
        if !self.inflight_requests.remove(id) {
            return;
        }

        match response.error {
            Some(error) => self.error(RpcError::Remote {
                code: error.code,
                message: error.message,
            }),
            None => {
                debug!(key = self.item.key(), "StoreQuery got success response");
                self.stored_at += 1;
            }
        }
    }

    pub fn on_error(&mut self, id: &str, error: RpcError) {
        if self.inflight_requests.remove(id) {
            self.error(error);
        }
    }

    /// Succeeds with the number of nodes that stored the item, if any did.
    pub fn result(&self) -> Result<usize, PutError> {
        if self.stored_at > 0 {
            return Ok(self.stored_at);
        }

        let most_common_error = self.errors.first().map(|(_, error)| error.clone());

        debug!(key = self.item.key(), ?most_common_error, "StoreQuery failed");

        Err(PutError::NoStoringNodes(
            most_common_error.unwrap_or(RpcError::Timeout),
        ))
    }

    // === Private Methods ===

    fn error(&mut self, error: RpcError) {
        debug!(key = self.item.key(), ?error, "StoreQuery got error");

        if let Some(pos) = self.errors.iter().position(|(_, err)| *err == error) {
            self.errors[pos].0 += 1;

            // Keep the highest count first.
            let mut i = pos;
            while i > 0 && self.errors[i].0 > self.errors[i - 1].0 {
                self.errors.swap(i, i - 1);
                i -= 1;
            }
        } else {
            self.errors.push((1, error));
        }
    }
}
