use tracing::debug;

use crate::common::messages::RequestSpecific;
use crate::core::server::ServerContext;

use super::Actor;

impl Actor {
    /// Handle an inbound request: drop it if the requester is filtered, otherwise
    /// observe the requester and answer through the server's handler table.
    pub(super) fn handle_request(&mut self, id: String, request: RequestSpecific) {
        let requester = request.requester.clone();

        if let Some(filter) = &self.filter {
            if !filter.allow(&requester) {
                debug!(from = %requester, method = ?request.method, "Dropped filtered request");
                return;
            }
        }

        // Unknown methods still mark the requester as seen.
        self.observe(requester.clone());

        let mut context = ServerContext {
            contact: self.rpc.contact(),
            routing_table: &self.routing_table,
            storage: self.storage.as_mut(),
            validator: self.validator.as_ref(),
            k: self.k,
        };

        match self.server.handle_request(&mut context, &request) {
            Ok(response) => self.rpc.response(&requester, &id, response),
            Err(error) => {
                debug!(?error, from = %requester, "Dropped request");
            }
        }
    }
}
