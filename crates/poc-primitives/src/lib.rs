//! Core primitives for proof-of-capacity space management.
//!
//! A *plot* is a precomputed lookup table over a public key: `2^bit_length`
//! entries, each holding a pair of `bit_length`-wide words. A 32-byte
//! [`Challenge`] selects an entry, and the pair found there forms a [`Proof`]
//! of the committed space. Everything in this crate is a plain value type so
//! it can cross thread and process boundaries freely.

#![warn(rust_2018_idioms, missing_docs, missing_debug_implementations)]

use derive_more::{From, Into};
use parity_scale_codec::{Decode, Encode};
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

#[cfg(test)]
mod tests;

/// Signing context used for proof and reward signatures produced with plot keys.
pub const POC_SIGNING_CONTEXT: &[u8] = b"poc_space";

/// Bit lengths plots can be created with.
///
/// Anything outside of this set is rejected at the type level via
/// [`BitLength::new`].
pub const USABLE_BIT_LENGTHS: [BitLength; 3] =
    [BitLength(24), BitLength(26), BitLength(28)];

/// Disk footprint of the smallest usable plot, in bytes.
pub const MIN_DISK_SIZE: u64 = BitLength(24).disk_size();

/// Requested bit length is outside of [`USABLE_BIT_LENGTHS`].
#[derive(Debug, Error, Copy, Clone, Eq, PartialEq)]
#[error("bit length {0} is not usable")]
pub struct UnusableBitLength(pub u8);

/// Size parameter of a plot, determines its disk footprint and proof quality.
#[derive(
    Debug,
    Copy,
    Clone,
    Eq,
    PartialEq,
    Ord,
    PartialOrd,
    Hash,
    Into,
    Encode,
    Decode,
    Serialize,
    Deserialize,
)]
#[serde(transparent)]
pub struct BitLength(u8);

impl fmt::Display for BitLength {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl TryFrom<u8> for BitLength {
    type Error = UnusableBitLength;

    fn try_from(bit_length: u8) -> Result<Self, Self::Error> {
        Self::new(bit_length)
    }
}

impl BitLength {
    /// Smallest usable bit length.
    pub const MIN_USABLE: Self = Self(24);

    /// Creates a bit length, rejecting values outside of [`USABLE_BIT_LENGTHS`].
    pub const fn new(bit_length: u8) -> Result<Self, UnusableBitLength> {
        match bit_length {
            24 | 26 | 28 => Ok(Self(bit_length)),
            _ => Err(UnusableBitLength(bit_length)),
        }
    }

    /// Raw bit length value.
    pub const fn get(self) -> u8 {
        self.0
    }

    /// On-disk size of a plot with this bit length, in bytes.
    ///
    /// `2^bit_length` entries of two `bit_length`-wide words each.
    pub const fn disk_size(self) -> u64 {
        ((self.0 as u64) << self.0) / 4
    }
}

/// Byte length of a challenge.
pub const CHALLENGE_LENGTH: usize = 32;

/// Fixed-width hash used as the lookup input for a proof.
#[derive(
    Default,
    Copy,
    Clone,
    Eq,
    PartialEq,
    Ord,
    PartialOrd,
    Hash,
    From,
    Into,
    Encode,
    Decode,
    Serialize,
    Deserialize,
)]
pub struct Challenge(#[serde(with = "hex")] [u8; CHALLENGE_LENGTH]);

impl fmt::Display for Challenge {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", hex::encode(self.0))
    }
}

impl fmt::Debug for Challenge {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", hex::encode(self.0))
    }
}

impl AsRef<[u8]> for Challenge {
    #[inline]
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

/// Public key a plot is bound to.
#[derive(
    Default,
    Copy,
    Clone,
    Eq,
    PartialEq,
    Ord,
    PartialOrd,
    Hash,
    From,
    Into,
    Encode,
    Decode,
    Serialize,
    Deserialize,
)]
pub struct PublicKey(#[serde(with = "hex")] [u8; 32]);

impl fmt::Display for PublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", hex::encode(self.0))
    }
}

impl fmt::Debug for PublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", hex::encode(self.0))
    }
}

impl AsRef<[u8]> for PublicKey {
    #[inline]
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

impl From<schnorrkel::PublicKey> for PublicKey {
    #[inline]
    fn from(public_key: schnorrkel::PublicKey) -> Self {
        Self(public_key.to_bytes())
    }
}

impl PublicKey {
    /// Public key size in bytes.
    pub const SIZE: usize = 32;
}

/// The lookup result extracted from a plot for a given challenge.
#[derive(
    Debug, Copy, Clone, Eq, PartialEq, Hash, Encode, Decode, Serialize, Deserialize,
)]
pub struct Proof {
    /// First word of the matched entry.
    pub x: u64,
    /// Second word of the matched entry.
    pub x_prime: u64,
    /// Bit length of the plot the proof was extracted from.
    pub bit_length: BitLength,
}
