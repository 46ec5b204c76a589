//! AsyncNode node.

use serde_json::{Map, Value};

use crate::actor::{ActorMessage, Info};
use crate::common::{Contact, Id};
use crate::node::Node;
use crate::{Error, NodeWasShutdown, PutError};

impl Node {
    /// Return an async version of the node handle.
    pub fn as_async(self) -> AsyncNode {
        AsyncNode(self)
    }
}

#[derive(Debug, Clone)]
/// Async version of the [Node] handle.
pub struct AsyncNode(Node);

impl AsyncNode {
    // === Getters ===

    /// Information and statistics about this node.
    pub async fn info(&self) -> Result<Info, NodeWasShutdown> {
        let (sender, receiver) = flume::bounded::<Info>(1);

        self.0
             .0
            .send(ActorMessage::Info(sender))
            .map_err(|_| NodeWasShutdown)?;

        receiver.recv_async().await.map_err(|_| NodeWasShutdown)
    }

    // === Public Methods ===

    /// Shutdown the actor thread loop.
    pub async fn shutdown(&mut self) {
        let (sender, receiver) = flume::bounded::<()>(1);

        let _ = self.0 .0.send(ActorMessage::Shutdown(sender));
        let _ = receiver.recv_async().await;
    }

    /// Async version of [Node::connect]
    pub async fn connect(&self, seed: Contact) -> Result<(), Error> {
        let (sender, receiver) = flume::bounded::<Result<(), Error>>(1);

        self.0
             .0
            .send(ActorMessage::Connect(seed, sender))
            .map_err(|_| NodeWasShutdown)?;

        receiver.recv_async().await.map_err(|_| NodeWasShutdown)?
    }

    /// Async version of [Node::put]
    pub async fn put(&self, key: &str, value: &str) -> Result<usize, PutError> {
        let (sender, receiver) = flume::bounded::<Result<usize, PutError>>(1);

        self.0
             .0
            .send(ActorMessage::Put(key.to_string(), value.to_string(), sender))
            .map_err(|_| Error::from(NodeWasShutdown))?;

        receiver
            .recv_async()
            .await
            .map_err(|_| Error::from(NodeWasShutdown))?
    }

    /// Async version of [Node::get]
    pub async fn get(&self, key: &str) -> Result<String, Error> {
        let (sender, receiver) = flume::bounded::<Result<String, Error>>(1);

        self.0
             .0
            .send(ActorMessage::Get(key.to_string(), sender))
            .map_err(|_| NodeWasShutdown)?;

        receiver.recv_async().await.map_err(|_| NodeWasShutdown)?
    }

    /// Async version of [Node::find_node]
    pub async fn find_node(&self, target: Id) -> Result<Vec<Contact>, Error> {
        let (sender, receiver) = flume::bounded::<Result<Vec<Contact>, Error>>(1);

        self.0
             .0
            .send(ActorMessage::FindNode(target, sender))
            .map_err(|_| NodeWasShutdown)?;

        receiver.recv_async().await.map_err(|_| NodeWasShutdown)?
    }

    /// Async version of [Node::call]
    pub async fn call(
        &self,
        to: Contact,
        method: &str,
        params: Map<String, Value>,
    ) -> Result<Map<String, Value>, Error> {
        let (sender, receiver) = flume::bounded::<Result<Map<String, Value>, Error>>(1);

        self.0
             .0
            .send(ActorMessage::Call(to, method.to_string(), params, sender))
            .map_err(|_| NodeWasShutdown)?;

        receiver.recv_async().await.map_err(|_| NodeWasShutdown)?
    }
}
