use tracing::debug;

use crate::common::messages::ResponseSpecific;
use crate::common::Contact;
use crate::RpcError;

use super::{Actor, Waiter};

impl Actor {
    /// Handle a completed call: observe the responder, then hand the result to
    /// whoever waits for it.
    pub(super) fn handle_completion(
        &mut self,
        id: &str,
        to: &Contact,
        waiter: Waiter,
        result: Result<ResponseSpecific, RpcError>,
    ) {
        if let Ok(ResponseSpecific {
            responder: Some(responder),
            ..
        }) = &result
        {
            self.observe(responder.clone());
        }

        match waiter {
            Waiter::Lookup(query_id) => self.lookup_completion(query_id, id, to, result),
            Waiter::Store(query_id) => self.store_completion(query_id, id, result),
            Waiter::Eviction(pending) => {
                // Any answer, even an error object, proves the head is alive.
                let head_alive = result.is_ok();

                debug!(head = %pending.head, head_alive, "Bucket head ping completed");

                self.routing_table.apply_ping_result(pending, head_alive);
            }
            Waiter::Call(sender) => {
                let result = match result {
                    Ok(ResponseSpecific {
                        error: Some(error), ..
                    }) => Err(RpcError::Remote {
                        code: error.code,
                        message: error.message,
                    }
                    .into()),
                    Ok(response) => Ok(response.extra),
                    Err(error) => Err(error.into()),
                };

                let _ = sender.send(result);
            }
        }
    }

    fn lookup_completion(
        &mut self,
        query_id: u64,
        id: &str,
        to: &Contact,
        result: Result<ResponseSpecific, RpcError>,
    ) {
        let Some((mut lookup, purpose)) = self.lookups.remove(&query_id) else {
            return;
        };

        match result {
            Ok(response) => lookup.on_response(id, to, response, self.validator.as_ref()),
            Err(error) => lookup.on_error(id, to, error),
        }

        if lookup.round_complete() {
            self.next_lookup_round(query_id, lookup, purpose);
        } else {
            self.lookups.insert(query_id, (lookup, purpose));
        }
    }

    fn store_completion(
        &mut self,
        query_id: u64,
        id: &str,
        result: Result<ResponseSpecific, RpcError>,
    ) {
        let Some((query, _)) = self.store_queries.get_mut(&query_id) else {
            return;
        };

        match result {
            Ok(response) => query.on_response(id, response),
            Err(error) => query.on_error(id, error),
        }

        if !query.is_done() {
            return;
        }

        let Some((query, sender)) = self.store_queries.remove(&query_id) else {
            return;
        };

        let result = query.result();

        match sender {
            Some(sender) => {
                let _ = sender.send(result);
            }
            None => {
                if let Err(error) = result {
                    debug!(key = query.item().key(), ?error, "Failed to replicate item");
                }
            }
        }
    }
}
