use poc_primitives::{BitLength, PublicKey};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Errors happening when parsing the string form of a [`SpaceId`].
#[derive(Debug, Error, Clone, Eq, PartialEq)]
pub enum SpaceIdParseError {
    /// Not of the `ordinal-pubkey-bitlength` shape
    #[error("malformed space id {0:?}")]
    Malformed(String),
    /// Ordinal part is not an integer
    #[error("invalid ordinal in space id: {0}")]
    InvalidOrdinal(String),
    /// Public key part is not 32 hex-encoded bytes
    #[error("invalid public key in space id: {0}")]
    InvalidPublicKey(String),
    /// Bit length part is not usable
    #[error("invalid bit length in space id: {0}")]
    InvalidBitLength(String),
}

/// Canonical identity of one work space.
///
/// Two ids are equal iff ordinal, public key and bit length all match. The
/// string form `"{ordinal}-{public_key_hex}-{bit_length}"` is stable and used
/// as the primary key everywhere a work space is indexed.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Serialize, Deserialize)]
pub struct SpaceId {
    ordinal: u32,
    public_key: PublicKey,
    bit_length: BitLength,
}

impl SpaceId {
    /// Creates a new id from its parts.
    pub fn new(ordinal: u32, public_key: PublicKey, bit_length: BitLength) -> Self {
        Self {
            ordinal,
            public_key,
            bit_length,
        }
    }

    /// Ordinal the wallet assigned to the public key.
    pub fn ordinal(&self) -> u32 {
        self.ordinal
    }

    /// Public key the plot is bound to.
    pub fn public_key(&self) -> PublicKey {
        self.public_key
    }

    /// Bit length of the plot.
    pub fn bit_length(&self) -> BitLength {
        self.bit_length
    }
}

impl fmt::Display for SpaceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}-{}", self.ordinal, self.public_key, self.bit_length)
    }
}

impl FromStr for SpaceId {
    type Err = SpaceIdParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut parts = s.splitn(3, '-');
        let (ordinal, public_key, bit_length) = match (parts.next(), parts.next(), parts.next()) {
            (Some(ordinal), Some(public_key), Some(bit_length)) => {
                (ordinal, public_key, bit_length)
            }
            _ => {
                return Err(SpaceIdParseError::Malformed(s.to_string()));
            }
        };

        let ordinal = ordinal
            .parse::<u32>()
            .map_err(|_| SpaceIdParseError::InvalidOrdinal(ordinal.to_string()))?;

        let mut public_key_bytes = [0u8; PublicKey::SIZE];
        hex::decode_to_slice(public_key, &mut public_key_bytes)
            .map_err(|_| SpaceIdParseError::InvalidPublicKey(public_key.to_string()))?;

        let bit_length = bit_length
            .parse::<u8>()
            .ok()
            .and_then(|raw| BitLength::new(raw).ok())
            .ok_or_else(|| SpaceIdParseError::InvalidBitLength(bit_length.to_string()))?;

        Ok(Self {
            ordinal,
            public_key: PublicKey::from(public_key_bytes),
            bit_length,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bit_length(raw: u8) -> BitLength {
        BitLength::new(raw).unwrap()
    }

    #[test]
    fn string_form_round_trips() {
        let id = SpaceId::new(7, PublicKey::from([0xaa; 32]), bit_length(26));
        let s = id.to_string();
        assert_eq!(s.parse::<SpaceId>().unwrap(), id);
    }

    #[test]
    fn equality_is_field_wise() {
        let public_key = PublicKey::from([1; 32]);
        let id = SpaceId::new(0, public_key, bit_length(24));
        assert_ne!(id, SpaceId::new(1, public_key, bit_length(24)));
        assert_ne!(id, SpaceId::new(0, PublicKey::from([2; 32]), bit_length(24)));
        assert_ne!(id, SpaceId::new(0, public_key, bit_length(26)));
    }

    #[test]
    fn rejects_malformed_strings() {
        assert!(matches!(
            "".parse::<SpaceId>(),
            Err(SpaceIdParseError::Malformed(_))
        ));
        assert!(matches!(
            "x-aabb".parse::<SpaceId>(),
            Err(SpaceIdParseError::Malformed(_))
        ));
        assert!(matches!(
            "one-aa-24".parse::<SpaceId>(),
            Err(SpaceIdParseError::InvalidOrdinal(_))
        ));
        assert!(matches!(
            "1-zz-24".parse::<SpaceId>(),
            Err(SpaceIdParseError::InvalidPublicKey(_))
        ));
        let key_hex = hex::encode([3u8; 32]);
        assert!(matches!(
            format!("1-{key_hex}-25").parse::<SpaceId>(),
            Err(SpaceIdParseError::InvalidBitLength(_))
        ));
    }
}
