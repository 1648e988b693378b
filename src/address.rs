use std::fmt;
use std::str::FromStr;

use hkdf::Hkdf;
use rand::TryRngCore;
use rand::rngs::OsRng;
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::trytes::tryte_char;
use crate::{ChatKeyMaterial, Error};

/// Length of an address in tryte symbols.
pub const ADDRESS_LEN: usize = 81;

/// Length of a transaction hash in tryte symbols.
pub const TRANSACTION_HASH_LEN: usize = 81;

const DERIVATION_SALT: &[u8] = b"Tanglegram-Address-v1";

/// Secret seed an identity's addresses derive from. Never leaves the device.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct Seed([u8; 32]);

impl Seed {
    /// Generate a fresh random seed.
    pub fn generate() -> Result<Self, Error> {
        let mut bytes = [0u8; 32];
        OsRng.try_fill_bytes(&mut bytes).map_err(|_| Error::Random)?;
        Ok(Self(bytes))
    }

    pub(crate) fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }
}

impl From<[u8; 32]> for Seed {
    fn from(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }
}

/// An 81-tryte ledger address.
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct Address(String);

impl Address {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// A fresh random address, used for newly allocated chat channels.
    pub fn random() -> Result<Self, Error> {
        let mut material = [0u8; 32];
        OsRng
            .try_fill_bytes(&mut material)
            .map_err(|_| Error::Random)?;
        let address = derive_tryte_string(&material, b"random-address", ADDRESS_LEN)?;
        Ok(Self(address))
    }
}

impl FromStr for Address {
    type Err = Error;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        validate_trytes(value, ADDRESS_LEN, "address")?;
        Ok(Self(value.to_string()))
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Debug for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Address").field(&self.0).finish()
    }
}

impl Serialize for Address {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(&self.0)
    }
}

impl<'de> Deserialize<'de> for Address {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let value = String::deserialize(deserializer)?;
        value
            .parse()
            .map_err(|err: Error| serde::de::Error::custom(err.to_string()))
    }
}

/// Hash identifying a single ledger transaction.
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct TransactionHash(String);

impl TransactionHash {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl FromStr for TransactionHash {
    type Err = Error;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        validate_trytes(value, TRANSACTION_HASH_LEN, "transaction hash")?;
        Ok(Self(value.to_string()))
    }
}

impl fmt::Display for TransactionHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Debug for TransactionHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("TransactionHash").field(&self.0).finish()
    }
}

fn validate_trytes(value: &str, expected_len: usize, what: &str) -> Result<(), Error> {
    if value.len() != expected_len {
        return Err(Error::MalformedPayload(format!(
            "{what} must be {expected_len} trytes, got {}",
            value.len()
        )));
    }
    if !value.chars().all(|c| c == '9' || c.is_ascii_uppercase()) {
        return Err(Error::MalformedPayload(format!(
            "{what} contains invalid tryte symbols"
        )));
    }
    Ok(())
}

/// Expand key material into a tryte string of the given length.
pub(crate) fn derive_tryte_string(
    material: &[u8],
    info: &[u8],
    len: usize,
) -> Result<String, Error> {
    let hkdf = Hkdf::<Sha256>::new(Some(DERIVATION_SALT), material);
    let mut okm = vec![0u8; len];
    hkdf.expand(info, &mut okm)
        .map_err(|_| Error::Crypto("HKDF expansion failed".to_string()))?;

    Ok(okm.iter().map(|byte| tryte_char(byte % 27)).collect())
}

fn address_from_material(material: &[u8], info: &[u8]) -> Result<Address, Error> {
    Ok(Address(derive_tryte_string(material, info, ADDRESS_LEN)?))
}

/// Derive `count` consecutive addresses from a seed starting at `start_index`.
///
/// Index 0 hosts the public-key announcement, index 1 the contact-request
/// inbox. The derivation is deterministic: the same seed and index always
/// yield the same address.
pub fn derive_addresses(seed: &Seed, start_index: u64, count: usize) -> Result<Vec<Address>, Error> {
    let mut addresses = Vec::with_capacity(count);
    for offset in 0..count {
        let index = start_index + offset as u64;
        let mut info = b"seed-address".to_vec();
        info.extend_from_slice(&index.to_be_bytes());
        addresses.push(address_from_material(seed.as_bytes(), &info)?);
    }
    Ok(addresses)
}

/// Next candidate public-key address after a collision at `previous`.
///
/// Only the seed holder can compute the successor, but the result is stable:
/// re-running the rotation from the same state lands on the same address.
pub fn next_public_key_address(seed: &Seed, previous: &Address) -> Result<Address, Error> {
    let mut info = b"public-key-rotation".to_vec();
    info.extend_from_slice(previous.as_str().as_bytes());
    address_from_material(seed.as_bytes(), &info)
}

/// Next chat address after `rotation_index` rotations.
///
/// Derived from the shared chat key and the previous address, so both parties
/// compute an identical successor without communicating it.
pub fn next_chat_address(
    material: &ChatKeyMaterial,
    previous: &Address,
    rotation_index: u32,
) -> Result<Address, Error> {
    let mut info = b"chat-rotation".to_vec();
    info.extend_from_slice(previous.as_str().as_bytes());
    info.extend_from_slice(&rotation_index.to_be_bytes());

    let mut ikm = Vec::with_capacity(48);
    ikm.extend_from_slice(material.key());
    ikm.extend_from_slice(material.salt());
    let address = address_from_material(&ikm, &info);
    ikm.zeroize();

    address
}
