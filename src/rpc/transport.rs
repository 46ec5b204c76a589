//! Byte transports the RPC layer sends and receives messages through.

pub mod memory;

use std::fmt::Debug;
use std::io;
use std::net::{IpAddr, Ipv4Addr, SocketAddr, ToSocketAddrs, UdpSocket};
use std::time::Duration;

use tracing::{trace, warn};

use crate::common::{Address, Contact};

/// Largest datagram [UdpTransport] accepts.
pub const MTU: usize = 65_507;

/// The maximum duration to block waiting for inbound bytes when there are none.
/// Lower values increase CPU usage but reduce latency.
pub const MAX_THREAD_BLOCK_DURATION: Duration = Duration::from_millis(10);

/// Moves serialized messages between peers.
pub trait Transport: Debug + Send {
    /// The address other peers reach this node at.
    fn local_address(&self) -> Address;

    /// Send `bytes` to `to` without waiting for any reply.
    ///
    /// An error means the peer is known to be unreachable.
    fn send(&mut self, bytes: &[u8], to: &Contact) -> io::Result<()>;

    /// Next inbound message and a description of where it came from.
    ///
    /// Blocks at most [MAX_THREAD_BLOCK_DURATION] when nothing is pending.
    fn recv(&mut self) -> Option<(Vec<u8>, String)>;
}

#[derive(Debug)]
/// One JSON message per UDP datagram.
pub struct UdpTransport {
    socket: UdpSocket,
    public_address: String,
    port: u16,
}

impl UdpTransport {
    /// Bind to `address`.
    ///
    /// # Reachability
    ///
    /// When bound to an unspecified ip such as `0.0.0.0`, peers are told to reach this
    /// node on `127.0.0.1`, so only nodes on the same host can answer it. Call
    /// [UdpTransport::with_public_address] with an address routable from the other
    /// hosts to join a network spanning them.
    pub fn bind<A: ToSocketAddrs>(address: A) -> io::Result<Self> {
        let socket = UdpSocket::bind(address)?;
        socket.set_read_timeout(Some(MAX_THREAD_BLOCK_DURATION))?;

        let local_addr = socket.local_addr()?;

        let ip = if local_addr.ip().is_unspecified() {
            warn!(
                %local_addr,
                "Advertising the loopback address, set a public address to reach other hosts"
            );

            IpAddr::V4(Ipv4Addr::LOCALHOST)
        } else {
            local_addr.ip()
        };

        Ok(UdpTransport {
            socket,
            public_address: ip.to_string(),
            port: local_addr.port(),
        })
    }

    /// Advertise `address`, with the bound port, to peers.
    pub fn with_public_address(mut self, address: &str) -> Self {
        self.public_address = address.to_string();
        self
    }

    /// Returns the address the socket is bound to.
    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.socket.local_addr()
    }
}

impl Transport for UdpTransport {
    fn local_address(&self) -> Address {
        Address::AddressPort {
            address: self.public_address.clone(),
            port: self.port,
        }
    }

    fn send(&mut self, bytes: &[u8], to: &Contact) -> io::Result<()> {
        let Address::AddressPort { address, port } = to.address() else {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("UDP can not reach nickname contact {}", to),
            ));
        };

        let destination = (address.as_str(), *port)
            .to_socket_addrs()?
            .next()
            .ok_or_else(|| {
                io::Error::new(
                    io::ErrorKind::AddrNotAvailable,
                    format!("could not resolve {}", to),
                )
            })?;

        self.socket.send_to(bytes, destination)?;

        Ok(())
    }

    fn recv(&mut self) -> Option<(Vec<u8>, String)> {
        let mut buf = vec![0_u8; MTU];

        match self.socket.recv_from(&mut buf) {
            Ok((amt, from)) => {
                buf.truncate(amt);
                Some((buf, from.to_string()))
            }
            Err(ref e)
                if e.kind() == io::ErrorKind::WouldBlock || e.kind() == io::ErrorKind::TimedOut =>
            {
                None
            }
            Err(e) => {
                trace!(context = "socket_error", ?e, "recv_from failed unexpectedly");
                None
            }
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn udp_send_and_receive() {
        let mut a = UdpTransport::bind("127.0.0.1:0").unwrap();
        let mut b = UdpTransport::bind("127.0.0.1:0").unwrap();

        let to = Contact::new(b.local_address()).unwrap();

        a.send(b"hello", &to).unwrap();

        let mut received = None;
        for _ in 0..100 {
            received = b.recv();
            if received.is_some() {
                break;
            }
        }

        let (bytes, from) = received.unwrap();

        assert_eq!(bytes, b"hello");
        assert_eq!(from, a.local_addr().unwrap().to_string());
    }

    #[test]
    fn udp_rejects_nickname_contacts() {
        let mut a = UdpTransport::bind("127.0.0.1:0").unwrap();

        let result = a.send(b"hello", &Contact::nickname("beep").unwrap());

        assert_eq!(result.unwrap_err().kind(), io::ErrorKind::InvalidInput);
    }

    #[test]
    fn unspecified_bind_advertises_loopback() {
        let transport = UdpTransport::bind("0.0.0.0:0").unwrap();

        let Address::AddressPort { address, port } = transport.local_address() else {
            panic!("expected an address/port");
        };

        assert_eq!(address, "127.0.0.1");
        assert_ne!(port, 0);
    }

    #[test]
    fn public_address_is_advertised() {
        let transport = UdpTransport::bind("0.0.0.0:0")
            .unwrap()
            .with_public_address("203.0.113.7");
        let bound_port = transport.local_addr().unwrap().port();

        assert_eq!(
            transport.local_address(),
            Address::AddressPort {
                address: "203.0.113.7".to_string(),
                port: bound_port,
            }
        );
    }
}
