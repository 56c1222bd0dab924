//! Sheet data: the field values a resource exposes per capability.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::Oid;
use crate::schema::{CapabilityId, FieldKind};

/// Value of one sheet field.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldValue {
    Value(serde_json::Value),
    Reference(Option<Oid>),
    References(Vec<Oid>),
}

/// Field name → value for one capability.
pub type SheetData = BTreeMap<String, FieldValue>;

/// Capability → sheet data for one resource.
pub type Appstructs = BTreeMap<CapabilityId, SheetData>;

impl FieldValue {
    /// Shape `targets` the way a field of `kind` stores them.
    #[must_use]
    pub fn from_targets(kind: FieldKind, targets: Vec<Oid>) -> Self {
        match kind {
            FieldKind::Reference => Self::Reference(targets.first().copied()),
            _ => Self::References(targets),
        }
    }

    /// Referenced oids, in field order. Plain values reference nothing.
    #[must_use]
    pub fn references(&self) -> Vec<Oid> {
        match self {
            Self::Value(_) => Vec::new(),
            Self::Reference(target) => target.iter().copied().collect(),
            Self::References(targets) => targets.clone(),
        }
    }

    /// Replace every occurrence of `old` with `new`. Returns `true` if
    /// anything changed.
    pub fn replace_reference(&mut self, old: Oid, new: Oid) -> bool {
        match self {
            Self::Value(_) => false,
            Self::Reference(target) => {
                if *target == Some(old) {
                    *target = Some(new);
                    true
                } else {
                    false
                }
            }
            Self::References(targets) => {
                let mut changed = false;
                for target in targets.iter_mut().filter(|t| **t == old) {
                    *target = new;
                    changed = true;
                }
                changed
            }
        }
    }
}
