//! In process transport, peers exchange messages over flume channels.

use std::collections::HashMap;
use std::io;
use std::sync::{Arc, Mutex, MutexGuard};

use flume::{Receiver, Sender};

use crate::common::{Address, Contact};

use super::{Transport, MAX_THREAD_BLOCK_DURATION};

type Frame = (Vec<u8>, String);

#[derive(Debug, Clone, Default)]
/// A hub connecting [MemoryTransport]s by address.
pub struct MemoryNetwork {
    peers: Arc<Mutex<HashMap<String, Sender<Frame>>>>,
}

impl MemoryNetwork {
    pub fn new() -> Self {
        Self::default()
    }

    /// Attach a new transport at `address`.
    pub fn transport(&self, address: Address) -> io::Result<MemoryTransport> {
        let (sender, receiver) = flume::unbounded();

        let mut peers = self.peers();

        let key = address.to_string();
        if peers.contains_key(&key) {
            return Err(io::Error::new(
                io::ErrorKind::AddrInUse,
                format!("{} is already attached", key),
            ));
        }
        peers.insert(key, sender);

        Ok(MemoryTransport {
            address,
            network: self.clone(),
            receiver,
        })
    }

    /// Attach a new transport with a nickname address.
    pub fn nickname(&self, nick: &str) -> io::Result<MemoryTransport> {
        self.transport(Address::Nickname(nick.to_string()))
    }

    /// Detach `address`, later sends to it fail as unreachable.
    pub fn disconnect(&self, address: &Address) {
        self.peers().remove(&address.to_string());
    }

    pub fn len(&self) -> usize {
        self.peers().len()
    }

    pub fn is_empty(&self) -> bool {
        self.peers().is_empty()
    }

    fn peers(&self) -> MutexGuard<'_, HashMap<String, Sender<Frame>>> {
        self.peers
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[derive(Debug)]
/// A [Transport] attached to a [MemoryNetwork], detached again on drop.
pub struct MemoryTransport {
    address: Address,
    network: MemoryNetwork,
    receiver: Receiver<Frame>,
}

impl Transport for MemoryTransport {
    fn local_address(&self) -> Address {
        self.address.clone()
    }

    fn send(&mut self, bytes: &[u8], to: &Contact) -> io::Result<()> {
        let key = to.address().to_string();

        let sender = self.network.peers().get(&key).cloned().ok_or_else(|| {
            io::Error::new(io::ErrorKind::NotConnected, format!("{} is not attached", key))
        })?;

        sender
            .send((bytes.to_vec(), self.address.to_string()))
            .map_err(|_| io::Error::new(io::ErrorKind::NotConnected, format!("{} is gone", key)))
    }

    fn recv(&mut self) -> Option<(Vec<u8>, String)> {
        self.receiver.recv_timeout(MAX_THREAD_BLOCK_DURATION).ok()
    }
}

impl Drop for MemoryTransport {
    fn drop(&mut self) {
        self.network.disconnect(&self.address);
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn send_between_transports() {
        let network = MemoryNetwork::new();

        let mut a = network.nickname("a").unwrap();
        let mut b = network.nickname("b").unwrap();

        a.send(b"hello", &Contact::new(b.local_address()).unwrap())
            .unwrap();

        assert_eq!(b.recv(), Some((b"hello".to_vec(), "a".to_string())));
        assert_eq!(a.recv(), None);
    }

    #[test]
    fn unknown_and_dropped_peers_are_unreachable() {
        let network = MemoryNetwork::new();

        let mut a = network.nickname("a").unwrap();
        let b = network.nickname("b").unwrap();
        let to_b = Contact::new(b.local_address()).unwrap();

        assert!(network.nickname("a").is_err());

        drop(b);

        assert_eq!(network.len(), 1);
        assert_eq!(
            a.send(b"hello", &to_b).unwrap_err().kind(),
            io::ErrorKind::NotConnected
        );
    }
}
