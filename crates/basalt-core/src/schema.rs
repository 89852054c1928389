//! Schema fingerprints recorded on events.

use crate::error::CoreError;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;

/// Description of one entity in the application's object model.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntityDescription {
    pub name: String,
    pub properties: Vec<String>,
}

impl EntityDescription {
    pub fn new(name: impl Into<String>, properties: impl IntoIterator<Item = impl Into<String>>) -> Self {
        EntityDescription {
            name: name.into(),
            properties: properties.into_iter().map(Into::into).collect(),
        }
    }
}

/// SHA-256 digest identifying the object model an event was written with.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, PartialOrd, Ord)]
pub struct SchemaFingerprint([u8; 32]);

impl SchemaFingerprint {
    pub fn from_bytes(bytes: [u8; 32]) -> Self {
        SchemaFingerprint(bytes)
    }

    /// Fingerprint a model. Entity and property order do not matter.
    pub fn of(entities: &[EntityDescription]) -> Self {
        let mut sorted: Vec<(&str, Vec<&str>)> = entities
            .iter()
            .map(|e| {
                let mut props: Vec<&str> = e.properties.iter().map(String::as_str).collect();
                props.sort_unstable();
                (e.name.as_str(), props)
            })
            .collect();
        sorted.sort_unstable();

        let mut hasher = Sha256::new();
        for (name, props) in sorted {
            hasher.update(name.as_bytes());
            hasher.update([0u8]);
            for prop in props {
                hasher.update(prop.as_bytes());
                hasher.update([1u8]);
            }
            hasher.update([2u8]);
        }
        let digest = hasher.finalize();
        let mut bytes = [0u8; 32];
        bytes.copy_from_slice(&digest);
        SchemaFingerprint(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    pub fn to_hex(&self) -> String {
        self.0.iter().map(|b| format!("{:02x}", b)).collect()
    }

    pub fn from_hex(s: &str) -> Result<Self, CoreError> {
        if s.len() != 64 {
            return Err(CoreError::InvalidFingerprint(s.to_string()));
        }
        let mut bytes = [0u8; 32];
        for (i, chunk) in s.as_bytes().chunks(2).enumerate() {
            let pair = std::str::from_utf8(chunk).map_err(|_| CoreError::InvalidFingerprint(s.to_string()))?;
            bytes[i] = u8::from_str_radix(pair, 16).map_err(|_| CoreError::InvalidFingerprint(s.to_string()))?;
        }
        Ok(SchemaFingerprint(bytes))
    }

    /// Truncated display (first 8 chars).
    pub fn short(&self) -> String {
        self.to_hex()[..8].to_string()
    }
}

impl fmt::Debug for SchemaFingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SchemaFingerprint({}...)", self.short())
    }
}

impl fmt::Display for SchemaFingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

impl Default for SchemaFingerprint {
    fn default() -> Self {
        SchemaFingerprint([0u8; 32])
    }
}
