//! Struct and implementation of the Contact entry in the Kademlia routing table
use std::{
    fmt::{self, Debug, Display, Formatter},
    hash::{Hash, Hasher},
};

use crate::common::{now_millis, Id};
use crate::Error;

#[derive(Clone, PartialEq, Eq, Hash)]
/// Transport specific addressing of a [Contact].
pub enum Address {
    /// Host and port, used by datagram and stream transports.
    AddressPort { address: String, port: u16 },
    /// Opaque peer nickname, used by signalled transports such as WebRTC.
    Nickname(String),
}

impl Address {
    /// The identifier a contact gets when none was supplied: SHA-1 of [Address::to_string].
    pub fn default_id(&self) -> Id {
        Id::hash(self.to_string().as_bytes())
    }

    fn validate(&self) -> Result<(), Error> {
        match self {
            Address::AddressPort { address, .. } if address.is_empty() => Err(
                Error::InvalidContact("missing address for address/port contact".to_string()),
            ),
            Address::Nickname(nick) if nick.is_empty() => Err(Error::InvalidContact(
                "missing nick for nickname contact".to_string(),
            )),
            _ => Ok(()),
        }
    }
}

impl Display for Address {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            Address::AddressPort { address, port } => write!(f, "{}:{}", address, port),
            Address::Nickname(nick) => write!(f, "{}", nick),
        }
    }
}

impl Debug for Address {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "Address({})", self)
    }
}

#[derive(Clone)]
/// A peer's routable address, its identifier and when it was last seen.
///
/// Contacts compare equal when their identifiers are equal.
pub struct Contact {
    id: Id,
    address: Address,
    last_seen: u64,
}

impl Debug for Contact {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.debug_struct("Contact")
            .field("id", &self.id)
            .field("address", &self.address)
            .field("last_seen", &self.last_seen)
            .finish()
    }
}

impl Contact {
    /// Create a contact with the default identifier derived from `address`.
    pub fn new(address: Address) -> Result<Contact, Error> {
        address.validate()?;

        Ok(Contact {
            id: address.default_id(),
            address,
            last_seen: now_millis(),
        })
    }

    /// Create a contact with an explicit identifier.
    pub fn with_id(address: Address, id: Id) -> Result<Contact, Error> {
        address.validate()?;

        Ok(Contact {
            id,
            address,
            last_seen: now_millis(),
        })
    }

    /// Create a contact with an explicit identifier given in hex, as it appears on the wire.
    pub fn with_hex_id(address: Address, id: &str) -> Result<Contact, Error> {
        let id = id
            .parse::<Id>()
            .map_err(|_| Error::InvalidContact(format!("invalid nodeID {:?}", id)))?;

        Contact::with_id(address, id)
    }

    pub fn address_port(address: &str, port: u16) -> Result<Contact, Error> {
        Contact::new(Address::AddressPort {
            address: address.to_string(),
            port,
        })
    }

    pub fn nickname(nick: &str) -> Result<Contact, Error> {
        Contact::new(Address::Nickname(nick.to_string()))
    }

    // === Getters ===

    pub fn id(&self) -> &Id {
        &self.id
    }

    pub fn address(&self) -> &Address {
        &self.address
    }

    /// Milliseconds since the unix epoch when this contact was last observed.
    pub fn last_seen(&self) -> u64 {
        self.last_seen
    }

    // === Public Methods ===

    /// Mark this contact as seen now.
    pub fn touch(&mut self) {
        self.last_seen = now_millis();
    }

    pub(crate) fn set_last_seen(&mut self, last_seen: u64) {
        self.last_seen = last_seen;
    }
}

impl PartialEq for Contact {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for Contact {}

impl Hash for Contact {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.id.hash(state);
    }
}

impl Display for Contact {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.address)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn default_id_is_hash_of_display_string() {
        let contact = Contact::address_port("127.0.0.1", 1337).unwrap();

        assert_eq!(
            contact.id().to_string(),
            "bf24aef44a702a0662793b129859d859969a1c4e"
        );
        assert_eq!(contact.to_string(), "127.0.0.1:1337");
    }

    #[test]
    fn nickname_id() {
        let contact = Contact::nickname("beep").unwrap();

        assert_eq!(*contact.id(), Id::from_key("beep"));
    }

    #[test]
    fn missing_address_fields() {
        assert!(matches!(
            Contact::address_port("", 80),
            Err(Error::InvalidContact(_))
        ));
        assert!(matches!(
            Contact::nickname(""),
            Err(Error::InvalidContact(_))
        ));
    }

    #[test]
    fn invalid_explicit_id() {
        let address = Address::Nickname("beep".to_string());

        assert!(matches!(
            Contact::with_hex_id(address.clone(), "not-an-id"),
            Err(Error::InvalidContact(_))
        ));
        assert!(Contact::with_hex_id(address, &Id::random().to_string()).is_ok());
    }

    #[test]
    fn equality_by_id() {
        let id = Id::random();

        let a = Contact::with_id(Address::Nickname("a".to_string()), id).unwrap();
        let b = Contact::with_id(
            Address::AddressPort {
                address: "10.0.0.1".to_string(),
                port: 9,
            },
            id,
        )
        .unwrap();

        assert_eq!(a, b);
        assert_ne!(a, Contact::nickname("a").unwrap());
    }

    #[test]
    fn touch() {
        let mut contact = Contact::nickname("beep").unwrap();
        contact.set_last_seen(0);

        contact.touch();

        assert!(contact.last_seen() > 0);
    }
}
