//! Kademlia node Id or a lookup target
use rand::Rng;
use sha1_smol::Sha1;
use std::{
    fmt::{self, Debug, Display, Formatter},
    str::FromStr,
};

use crate::Error;

/// The size of node IDs in bytes.
pub const ID_SIZE: usize = 20;
/// B, the number of bits in an [Id], which is also the number of possible buckets.
///
/// [Id::bucket_index] returns this value for identical ids.
pub const MAX_DISTANCE: usize = ID_SIZE * 8;

#[derive(Clone, Copy, PartialEq, Ord, PartialOrd, Eq, Hash)]
/// Kademlia node Id or a lookup target
///
/// The derived ordering is the unsigned big-endian comparison of the bytes, which makes
/// the XOR result of [Id::xor] directly comparable as a distance.
pub struct Id([u8; ID_SIZE]);

impl Id {
    pub fn random() -> Id {
        let mut rng = rand::thread_rng();
        let random_bytes: [u8; ID_SIZE] = rng.gen();

        Id(random_bytes)
    }

    /// Create a new Id from some bytes. Returns Err if `bytes` is not of length
    /// [ID_SIZE].
    pub fn from_bytes<T: AsRef<[u8]>>(bytes: T) -> Result<Id, Error> {
        let bytes = bytes.as_ref();
        if bytes.len() != ID_SIZE {
            return Err(Error::InvalidArgument(format!(
                "expected {} bytes for an Id, got {}",
                ID_SIZE,
                bytes.len()
            )));
        }

        let mut tmp: [u8; ID_SIZE] = [0; ID_SIZE];
        tmp.copy_from_slice(bytes);

        Ok(Id(tmp))
    }

    /// SHA-1 digest of `data`.
    pub fn hash(data: &[u8]) -> Id {
        let mut hasher = Sha1::new();
        hasher.update(data);

        Id(hasher.digest().bytes())
    }

    /// Map a lookup or storage key into the identifier space.
    ///
    /// Keys that are already 40 character hex ids map to themselves, anything else
    /// maps to its SHA-1 digest.
    pub fn from_key(key: &str) -> Id {
        Id::from_str(key).unwrap_or_else(|_| Id::hash(key.as_bytes()))
    }

    pub fn as_bytes(&self) -> &[u8; ID_SIZE] {
        &self.0
    }

    /// XOR distance between this Id and `other`, compare results with `Ord`.
    pub fn xor(&self, other: &Id) -> Id {
        let mut result = [0_u8; ID_SIZE];

        for (i, (a, b)) in self.0.iter().zip(other.0.iter()).enumerate() {
            result[i] = a ^ b;
        }

        Id(result)
    }

    /// Index of the k-bucket `other` belongs to in a routing table owned by `self`.
    ///
    /// That is the position of the most significant set bit of the XOR distance,
    /// counted from the least significant end: an id differing only in the last bit
    /// lands in bucket `0`, an id differing in the first bit lands in bucket `159`.
    ///
    /// Identical ids return [MAX_DISTANCE], which no bucket ever holds.
    pub fn bucket_index(&self, other: &Id) -> usize {
        for (i, (a, b)) in self.0.iter().zip(other.0.iter()).enumerate() {
            let xor = a ^ b;

            if xor != 0 {
                // bits consumed by equal bytes + leading zeros of the first differing byte
                let leading_zeros = i * 8 + xor.leading_zeros() as usize;

                return MAX_DISTANCE - leading_zeros - 1;
            }
        }

        MAX_DISTANCE
    }

    /// Random Id whose [Id::bucket_index] from `self` is exactly `index`.
    pub fn random_in_bucket(&self, index: usize) -> Result<Id, Error> {
        if index >= MAX_DISTANCE {
            return Err(Error::InvalidArgument(format!(
                "bucket index {} is out of range 0..{}",
                index, MAX_DISTANCE
            )));
        }

        let mut distance: [u8; ID_SIZE] = rand::thread_rng().gen();

        let byte = ID_SIZE - 1 - index / 8;
        let bit = 1_u8 << (index % 8);

        for b in distance.iter_mut().take(byte) {
            *b = 0;
        }
        distance[byte] = bit | (distance[byte] & (bit - 1));

        Ok(self.xor(&Id(distance)))
    }

    /// An Id with only bit `index` set, counted from the least significant end.
    pub fn power_of_two(index: usize) -> Result<Id, Error> {
        if index >= MAX_DISTANCE {
            return Err(Error::InvalidArgument(format!(
                "bit index {} is out of range 0..{}",
                index, MAX_DISTANCE
            )));
        }

        let mut bytes = [0_u8; ID_SIZE];
        bytes[ID_SIZE - 1 - index / 8] = 1 << (index % 8);

        Ok(Id(bytes))
    }

    pub fn is_zero(&self) -> bool {
        self.0.iter().all(|b| *b == 0)
    }
}

impl Display for Id {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        for byte in self.0 {
            write!(f, "{:02x}", byte)?;
        }

        Ok(())
    }
}

impl Debug for Id {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "Id({})", self)
    }
}

impl FromStr for Id {
    type Err = Error;

    fn from_str(s: &str) -> Result<Id, Error> {
        if s.len() != ID_SIZE * 2 {
            return Err(Error::InvalidArgument(format!(
                "expected {} hex characters for an Id, got {}",
                ID_SIZE * 2,
                s.len()
            )));
        }

        if !s.bytes().all(|b| b.is_ascii_hexdigit()) {
            return Err(Error::InvalidArgument(format!(
                "invalid hex encoding in {:?}",
                s
            )));
        }

        let mut bytes = [0_u8; ID_SIZE];

        for (byte, pair) in bytes.iter_mut().zip(s.as_bytes().chunks(2)) {
            *byte = (hex_value(pair[0]) << 4) | hex_value(pair[1]);
        }

        Ok(Id(bytes))
    }
}

fn hex_value(digit: u8) -> u8 {
    match digit {
        b'0'..=b'9' => digit - b'0',
        b'a'..=b'f' => digit - b'a' + 10,
        _ => digit - b'A' + 10,
    }
}

impl From<[u8; ID_SIZE]> for Id {
    fn from(bytes: [u8; ID_SIZE]) -> Id {
        Id(bytes)
    }
}
