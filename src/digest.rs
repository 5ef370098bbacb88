//! Digests: `(algorithm, hex)` pairs addressing a blob's content.

use std::fmt;
use std::io::{self, Write};
use std::str::FromStr;

use openssl::hash::{Hasher, MessageDigest};

use crate::error::{Error, Result};

/// The algorithm the store itself uses for all content-addressed paths.
/// References may embed digests of any algorithm this reader understands
/// (see [`Digest::algorithm_digest`]), but `blobs/<algo>/` is always this
/// one algorithm.
pub const DEFAULT_ALGORITHM: &str = "sha256";

/// A parsed `<algo>:<hex>` digest.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Digest {
    algorithm: String,
    hex: String,
}

impl Digest {
    /// Build a digest from already-known parts, validating that `hex` is
    /// lowercase hex of the length expected for `algorithm`.
    pub fn new(algorithm: impl Into<String>, hex: impl Into<String>) -> Result<Self> {
        let algorithm = algorithm.into();
        let hex = hex.into();
        let expected_len = Self::algorithm_digest(&algorithm)
            .map(|md| md.size() * 2)
            .ok_or_else(|| {
                Error::invalid_argument(format!("unsupported digest algorithm {algorithm}"))
            })?;
        if hex.len() != expected_len || !hex.bytes().all(|b| b.is_ascii_hexdigit()) {
            return Err(Error::invalid_argument(format!(
                "malformed {algorithm} digest {hex}"
            )));
        }
        if hex.bytes().any(|b| b.is_ascii_uppercase()) {
            return Err(Error::invalid_argument(format!(
                "digest hex must be lowercase: {hex}"
            )));
        }
        Ok(Self { algorithm, hex })
    }

    /// Parse the canonical textual form `"<algo>:<hex>"`.
    pub fn parse(s: &str) -> Result<Self> {
        let (algo, hex) = s
            .split_once(':')
            .ok_or_else(|| Error::invalid_argument(format!("malformed digest {s}")))?;
        Self::new(algo, hex)
    }

    pub fn algorithm(&self) -> &str {
        &self.algorithm
    }

    pub fn hex(&self) -> &str {
        &self.hex
    }

    /// Compute the digest of `bytes` under [`DEFAULT_ALGORITHM`].
    pub fn of(bytes: &[u8]) -> Result<Self> {
        let mut hasher = DigestHasher::new(DEFAULT_ALGORITHM)?;
        hasher.write_all(bytes).map_err(|e| Error::io("hashing", e))?;
        hasher.finish()
    }

    fn algorithm_digest(algorithm: &str) -> Option<MessageDigest> {
        match algorithm {
            "sha256" => Some(MessageDigest::sha256()),
            "sha512" => Some(MessageDigest::sha512()),
            _ => None,
        }
    }
}

impl fmt::Display for Digest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.algorithm, self.hex)
    }
}

impl FromStr for Digest {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

impl serde::Serialize for Digest {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> serde::Deserialize<'de> for Digest {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Digest::parse(&s).map_err(serde::de::Error::custom)
    }
}

/// Streaming hasher that yields a [`Digest`] once complete; used by
/// [`crate::engine::BlobWriter`] to tee bytes through a hash while they are
/// written to a scratch file.
pub(crate) struct DigestHasher {
    algorithm: String,
    hasher: Hasher,
}

impl DigestHasher {
    pub(crate) fn new(algorithm: &str) -> Result<Self> {
        let md = Digest::algorithm_digest(algorithm)
            .ok_or_else(|| Error::invalid_argument(format!("unsupported digest algorithm {algorithm}")))?;
        Ok(Self {
            algorithm: algorithm.to_string(),
            hasher: Hasher::new(md).map_err(|e| Error::io("initializing hasher", io::Error::other(e)))?,
        })
    }

    pub(crate) fn finish(mut self) -> Result<Digest> {
        let bytes = self
            .hasher
            .finish()
            .map_err(|e| Error::io("finalizing hash", io::Error::other(e)))?;
        Digest::new(self.algorithm.clone(), hex::encode(bytes))
    }
}

impl Write for DigestHasher {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.hasher.update(buf)?;
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}
