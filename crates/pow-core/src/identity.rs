//! # Identifiers
//!
//! Newtype wrappers for Powergate identifiers. A `JobId` cannot be passed
//! where a `ProfileId` is expected, and a `Cid` is never a bare string.
//!
//! ## Content ids
//!
//! A [`Cid`] is an opaque byte string compared by bytes. Its canonical text
//! form is multibase base-32: the prefix `b` followed by RFC 4648 lower-case
//! base-32 without padding. Content ids minted by this system are CIDv1 with
//! a sha2-256 multihash:
//!
//! ```text
//! 0x01 | varint(codec) | 0x12 0x20 | sha256(data)
//! ```

use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use sha2::{Digest, Sha256};
use uuid::Uuid;

use crate::error::ValidationError;

const BASE32_ALPHABET: &[u8; 32] = b"abcdefghijklmnopqrstuvwxyz234567";
const MULTIBASE_BASE32: char = 'b';
const CID_V1: u8 = 0x01;
const SHA2_256: u8 = 0x12;
const SHA2_256_LEN: u8 = 0x20;

// ─── UUID newtypes ───────────────────────────────────────────────────

/// Unique identifier of a storage profile (tenant).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ProfileId(pub Uuid);

/// Unique identifier of a storage job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobId(pub Uuid);

impl ProfileId {
    /// Generate a new random profile identifier.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Access the inner UUID.
    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for ProfileId {
    fn default() -> Self {
        Self::new()
    }
}

impl JobId {
    /// Generate a new random job identifier.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Access the inner UUID.
    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for JobId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for ProfileId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::fmt::Display for JobId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for ProfileId {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s)
            .map(Self)
            .map_err(|_| ValidationError::InvalidId(s.to_string()))
    }
}

impl FromStr for JobId {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s)
            .map(Self)
            .map_err(|_| ValidationError::InvalidId(s.to_string()))
    }
}

// ─── Content ids ─────────────────────────────────────────────────────

/// Content codec recorded in a minted CIDv1.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Codec {
    /// Opaque bytes.
    Raw,
    /// A JSON document, used for folder manifests.
    DagJson,
}

impl Codec {
    fn code(&self) -> u64 {
        match self {
            Self::Raw => 0x55,
            Self::DagJson => 0x0129,
        }
    }

    /// Name used in query strings.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Raw => "raw",
            Self::DagJson => "dag-json",
        }
    }
}

impl FromStr for Codec {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "raw" => Ok(Self::Raw),
            "dag-json" => Ok(Self::DagJson),
            other => Err(ValidationError::InvalidId(format!("codec {other}"))),
        }
    }
}

/// Content identifier.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Cid(Vec<u8>);

impl Cid {
    /// Wrap raw cid bytes. Empty input is rejected.
    pub fn from_bytes(bytes: Vec<u8>) -> Result<Self, ValidationError> {
        if bytes.is_empty() {
            return Err(ValidationError::InvalidCid(String::new()));
        }
        Ok(Self(bytes))
    }

    /// Mint the CIDv1 of `data` under `codec` with a sha2-256 multihash.
    pub fn for_content(codec: Codec, data: &[u8]) -> Self {
        let digest = Sha256::digest(data);
        let mut bytes = Vec::with_capacity(4 + digest.len());
        bytes.push(CID_V1);
        write_varint(&mut bytes, codec.code());
        bytes.push(SHA2_256);
        bytes.push(SHA2_256_LEN);
        bytes.extend_from_slice(&digest);
        Self(bytes)
    }

    /// Raw cid bytes.
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    /// Canonical base-32 text form.
    pub fn to_base32(&self) -> String {
        let mut out = String::with_capacity(1 + (self.0.len() * 8).div_ceil(5));
        out.push(MULTIBASE_BASE32);
        out.push_str(&base32_encode(&self.0));
        out
    }
}

impl std::fmt::Display for Cid {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.to_base32())
    }
}

impl std::fmt::Debug for Cid {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Cid({})", self.to_base32())
    }
}

impl FromStr for Cid {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || ValidationError::InvalidCid(s.to_string());
        let body = s.strip_prefix(MULTIBASE_BASE32).ok_or_else(invalid)?;
        if body.is_empty() {
            return Err(invalid());
        }
        let bytes = base32_decode(body).ok_or_else(invalid)?;
        if bytes.is_empty() {
            return Err(invalid());
        }
        Ok(Self(bytes))
    }
}

impl Serialize for Cid {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_base32())
    }
}

impl<'de> Deserialize<'de> for Cid {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}

fn write_varint(out: &mut Vec<u8>, mut value: u64) {
    while value >= 0x80 {
        out.push((value as u8) | 0x80);
        value >>= 7;
    }
    out.push(value as u8);
}

fn base32_encode(data: &[u8]) -> String {
    let mut out = String::with_capacity((data.len() * 8).div_ceil(5));
    let mut buffer: u32 = 0;
    let mut bits = 0u32;
    for &byte in data {
        buffer = (buffer << 8) | u32::from(byte);
        bits += 8;
        while bits >= 5 {
            bits -= 5;
            out.push(BASE32_ALPHABET[((buffer >> bits) & 0x1f) as usize] as char);
        }
    }
    if bits > 0 {
        out.push(BASE32_ALPHABET[((buffer << (5 - bits)) & 0x1f) as usize] as char);
    }
    out
}

fn base32_decode(text: &str) -> Option<Vec<u8>> {
    let mut out = Vec::with_capacity(text.len() * 5 / 8);
    let mut buffer: u32 = 0;
    let mut bits = 0u32;
    for ch in text.bytes() {
        let value = BASE32_ALPHABET.iter().position(|&a| a == ch)? as u32;
        buffer = (buffer << 5) | value;
        bits += 5;
        if bits >= 8 {
            bits -= 8;
            out.push(((buffer >> bits) & 0xff) as u8);
        }
    }
    // Leftover bits must be zero padding, otherwise the text is not canonical.
    if bits >= 5 || (buffer & ((1 << bits) - 1)) != 0 {
        return None;
    }
    Some(out)
}
