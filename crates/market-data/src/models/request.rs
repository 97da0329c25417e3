use std::fmt;

use serde::{Deserialize, Serialize};

/// Numeric chain identifier (1 = Ethereum mainnet, 137 = Polygon, ...).
pub type ChainId = u64;

/// Deterministic fingerprint of a logical request.
///
/// Two requests that should share a cache entry must return the same key,
/// so implementations normalize identifiers (case, surrounding whitespace)
/// before rendering them.
pub trait CacheKey {
    fn cache_key(&self) -> String;
}

/// Request for data about one token on one chain.
///
/// The address is trimmed and lower-cased on construction, so equality,
/// hashing and the cache key are all insensitive to checksum casing.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TokenRequest {
    address: String,
    chain_id: ChainId,
}

impl TokenRequest {
    pub fn new(address: impl AsRef<str>, chain_id: ChainId) -> Self {
        Self {
            address: address.as_ref().trim().to_lowercase(),
            chain_id,
        }
    }

    pub fn address(&self) -> &str {
        &self.address
    }

    pub fn chain_id(&self) -> ChainId {
        self.chain_id
    }
}

impl CacheKey for TokenRequest {
    fn cache_key(&self) -> String {
        format!("{}:{}", self.address, self.chain_id)
    }
}

impl fmt::Display for TokenRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.address, self.chain_id)
    }
}
