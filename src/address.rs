// =============================================================================
// LOTTERYNET - Addresses (P2PKH, base58check)
// =============================================================================
//
// pubkey -> SHA256 -> RIPEMD160 -> version + hash + checksum -> base58
//
// =============================================================================

use std::fmt;
use std::str::FromStr;

use secp256k1::PublicKey;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use sha2::{Digest, Sha256};

use crate::script::{hash160, Script};
use crate::ADDRESS_VERSION;

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum AddressError {
    /// Not valid base58
    Encoding(String),
    /// Decoded payload is not version + 20 bytes + checksum
    Length(usize),
    /// Checksum does not match
    Checksum,
    /// Unexpected version byte
    Version(u8),
}

impl fmt::Display for AddressError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AddressError::Encoding(msg) => write!(f, "Invalid base58: {}", msg),
            AddressError::Length(len) => write!(f, "Invalid address length: {} bytes", len),
            AddressError::Checksum => write!(f, "Invalid address checksum"),
            AddressError::Version(v) => write!(f, "Unexpected address version 0x{:02x}", v),
        }
    }
}

impl std::error::Error for AddressError {}

/// Pay-to-public-key-hash address
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct Address {
    pubkey_hash: [u8; 20],
}

impl Address {
    pub fn from_pubkey_hash(pubkey_hash: [u8; 20]) -> Self {
        Address { pubkey_hash }
    }

    /// Derive from a compressed public key
    pub fn from_pubkey(pubkey: &PublicKey) -> Self {
        Address {
            pubkey_hash: hash160(&pubkey.serialize()),
        }
    }

    pub fn pubkey_hash(&self) -> &[u8; 20] {
        &self.pubkey_hash
    }

    /// Standard output script paying to this address
    pub fn script_pubkey(&self) -> Script {
        Script::p2pkh(&self.pubkey_hash)
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut payload = vec![ADDRESS_VERSION];
        payload.extend_from_slice(&self.pubkey_hash);

        let checksum = Sha256::digest(Sha256::digest(&payload));
        payload.extend_from_slice(&checksum[..4]);

        write!(f, "{}", bs58::encode(payload).into_string())
    }
}

impl FromStr for Address {
    type Err = AddressError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let decoded = bs58::decode(s.trim())
            .into_vec()
            .map_err(|e| AddressError::Encoding(e.to_string()))?;

        if decoded.len() != 25 {
            return Err(AddressError::Length(decoded.len()));
        }

        let (payload, checksum) = decoded.split_at(21);
        let expected = Sha256::digest(Sha256::digest(payload));
        if &expected[..4] != checksum {
            return Err(AddressError::Checksum);
        }

        if payload[0] != ADDRESS_VERSION {
            return Err(AddressError::Version(payload[0]));
        }

        let mut pubkey_hash = [0u8; 20];
        pubkey_hash.copy_from_slice(&payload[1..]);
        Ok(Address { pubkey_hash })
    }
}

impl Serialize for Address {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        self.to_string().serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for Address {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}
