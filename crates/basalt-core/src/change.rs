//! Change records: one device's recorded mutation of one object.

use crate::error::CoreError;
use crate::identifier::GlobalIdentifier;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

/// Kind of mutation a change record describes.
///
/// Persisted as a numeric code. Decoding an unknown code fails, which is
/// how a corrupt log entry surfaces to the rebaser.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub enum ChangeType {
    Insert,
    Update,
    Delete,
}

impl ChangeType {
    pub fn code(self) -> u8 {
        match self {
            ChangeType::Insert => 0,
            ChangeType::Update => 1,
            ChangeType::Delete => 2,
        }
    }
}

impl TryFrom<u8> for ChangeType {
    type Error = CoreError;

    fn try_from(code: u8) -> Result<Self, Self::Error> {
        match code {
            0 => Ok(ChangeType::Insert),
            1 => Ok(ChangeType::Update),
            2 => Ok(ChangeType::Delete),
            other => Err(CoreError::UnknownChangeType(other)),
        }
    }
}

impl From<ChangeType> for u8 {
    fn from(t: ChangeType) -> u8 {
        t.code()
    }
}

/// Serialized value of one changed property.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum PropertyValue {
    /// A plain attribute.
    Attribute(serde_json::Value),
    /// Target of a to-one relationship; `None` clears it.
    ToOne(Option<GlobalIdentifier>),
    /// Membership delta of a to-many relationship.
    ToMany {
        added: BTreeSet<GlobalIdentifier>,
        removed: BTreeSet<GlobalIdentifier>,
    },
}

impl PropertyValue {
    /// Combine this (newer) value with an older value for the same key.
    ///
    /// Attributes and to-one targets: newer wins. To-many deltas are
    /// composed so that members added earlier survive a later delta that
    /// does not remove them.
    fn merged_over(self, older: &PropertyValue) -> PropertyValue {
        match (self, older) {
            (
                PropertyValue::ToMany { added, removed },
                PropertyValue::ToMany {
                    added: old_added,
                    removed: old_removed,
                },
            ) => {
                let mut merged_added: BTreeSet<_> = old_added.difference(&removed).cloned().collect();
                merged_added.extend(added.iter().cloned());
                let mut merged_removed: BTreeSet<_> = old_removed.difference(&added).cloned().collect();
                merged_removed.extend(removed);
                PropertyValue::ToMany {
                    added: merged_added,
                    removed: merged_removed,
                }
            }
            (newer, _) => newer,
        }
    }

    /// Drop the parts of the value that only make sense as a delta.
    fn into_snapshot(self) -> PropertyValue {
        match self {
            PropertyValue::ToMany { added, .. } => PropertyValue::ToMany {
                added,
                removed: BTreeSet::new(),
            },
            other => other,
        }
    }
}

/// One device's mutation of one object.
///
/// A change record always belongs to exactly one event, which owns it; the
/// record itself only references its object's global identifier.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ChangeRecord {
    pub global_identifier: GlobalIdentifier,
    pub change_type: ChangeType,
    #[serde(default)]
    pub properties: BTreeMap<String, PropertyValue>,
}

impl ChangeRecord {
    pub fn new(global_identifier: GlobalIdentifier, change_type: ChangeType) -> Self {
        ChangeRecord {
            global_identifier,
            change_type,
            properties: BTreeMap::new(),
        }
    }

    pub fn insert(global_identifier: GlobalIdentifier) -> Self {
        Self::new(global_identifier, ChangeType::Insert)
    }

    pub fn update(global_identifier: GlobalIdentifier) -> Self {
        Self::new(global_identifier, ChangeType::Update)
    }

    pub fn delete(global_identifier: GlobalIdentifier) -> Self {
        Self::new(global_identifier, ChangeType::Delete)
    }

    pub fn with_property(mut self, name: impl Into<String>, value: PropertyValue) -> Self {
        self.properties.insert(name.into(), value);
        self
    }

    pub fn with_attribute(self, name: impl Into<String>, value: impl Into<serde_json::Value>) -> Self {
        self.with_property(name, PropertyValue::Attribute(value.into()))
    }

    /// Get the attribute value stored under `name`, if it is an attribute.
    pub fn attribute(&self, name: &str) -> Option<&serde_json::Value> {
        match self.properties.get(name) {
            Some(PropertyValue::Attribute(value)) => Some(value),
            _ => None,
        }
    }

    /// Merge this (newer) record's values over an older record for the same
    /// object. Per key the newer value wins; the older record only supplies
    /// keys the newer one omits.
    pub fn merged_over(mut self, older: &ChangeRecord) -> ChangeRecord {
        for (name, old_value) in &older.properties {
            let merged = match self.properties.remove(name) {
                Some(new_value) => new_value.merged_over(old_value),
                None => old_value.clone(),
            };
            self.properties.insert(name.clone(), merged);
        }
        self
    }

    /// Turn the record into a baseline entry: typed `Insert`, absolute values.
    pub fn into_snapshot(self) -> ChangeRecord {
        ChangeRecord {
            global_identifier: self.global_identifier,
            change_type: ChangeType::Insert,
            properties: self
                .properties
                .into_iter()
                .map(|(name, value)| (name, value.into_snapshot()))
                .collect(),
        }
    }
}
