//! Reference types: directed edge classifications tied to a source
//! capability field.

#![allow(clippy::module_name_repetitions, clippy::cast_possible_truncation)]

use std::collections::HashSet;
use std::fmt;

use super::capability::CapabilityId;

/// Index of a reference type in its [`Registry`](super::Registry).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ReftypeId(u32);

impl ReftypeId {
    pub(crate) const fn from_index(index: usize) -> Self {
        Self(index as u32)
    }

    #[must_use]
    pub const fn index(self) -> usize {
        self.0 as usize
    }
}

/// Key under which an object map files an edge family.
///
/// Data written by older schemas may carry raw string keys; queries skip
/// them instead of failing.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ReftypeKey {
    Registered(ReftypeId),
    Legacy(String),
}

impl From<ReftypeId> for ReftypeKey {
    fn from(id: ReftypeId) -> Self {
        Self::Registered(id)
    }
}

impl fmt::Display for ReftypeKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Registered(id) => write!(f, "reftype#{}", id.index()),
            Self::Legacy(raw) => write!(f, "legacy:{raw}"),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ReferenceType {
    pub id: ReftypeId,
    pub name: String,
    /// `None` only for the root marker.
    pub extends: Option<ReftypeId>,
    pub source_capability: CapabilityId,
    pub source_field: String,
    pub target_capability: CapabilityId,
    pub(crate) ancestors: HashSet<ReftypeId>,
}

impl ReferenceType {
    #[must_use]
    pub fn is_or_extends(&self, other: ReftypeId) -> bool {
        self.ancestors.contains(&other)
    }
}

/// One `(capability, field, reftype)` triple produced by `get_reftypes`.
#[derive(Debug, Clone, Copy)]
pub struct ReftypeMatch<'r> {
    pub capability: CapabilityId,
    pub field: &'r str,
    pub reftype: &'r ReferenceType,
}
