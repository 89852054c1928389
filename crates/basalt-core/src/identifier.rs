//! Device and object identities.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Identifies one participating device (one local copy of the log).
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DeviceId(pub String);

impl DeviceId {
    pub fn new(id: impl Into<String>) -> Self {
        DeviceId(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for DeviceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for DeviceId {
    fn from(s: &str) -> Self {
        DeviceId(s.to_string())
    }
}

/// Stable, store-independent identity of one logical object.
///
/// Shared across devices and immutable once created. Change records refer
/// to it; the store garbage-collects it once nothing does.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct GlobalIdentifier {
    /// Name of the entity the object belongs to.
    pub entity: String,
    /// Application-provided key, unique within the entity.
    pub key: String,
}

impl GlobalIdentifier {
    pub fn new(entity: impl Into<String>, key: impl Into<String>) -> Self {
        GlobalIdentifier {
            entity: entity.into(),
            key: key.into(),
        }
    }
}

impl fmt::Display for GlobalIdentifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.entity, self.key)
    }
}
