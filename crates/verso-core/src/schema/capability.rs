//! Capabilities (sheets): named field sets a resource may expose.

#![allow(clippy::module_name_repetitions, clippy::cast_possible_truncation)]

use std::collections::HashSet;

use serde::{Deserialize, Serialize};

use super::reftype::ReftypeId;

/// Index of a capability in its [`Registry`](super::Registry).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CapabilityId(u32);

impl CapabilityId {
    pub(crate) const fn from_index(index: usize) -> Self {
        Self(index as u32)
    }

    #[must_use]
    pub const fn index(self) -> usize {
        self.0 as usize
    }
}

/// How a field stores its value.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FieldKind {
    /// Plain data, kept on the resource.
    #[default]
    Value,
    /// At most one target.
    Reference,
    /// Ordered sequence of targets; order is significant on read-back.
    List,
    /// Unordered targets.
    Set,
}

impl FieldKind {
    #[must_use]
    pub const fn is_reference(self) -> bool {
        !matches!(self, Self::Value)
    }

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Value => "value",
            Self::Reference => "reference",
            Self::List => "list",
            Self::Set => "set",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldSpec {
    pub name: String,
    pub kind: FieldKind,
    /// Set for reference-valued fields only.
    pub reftype: Option<ReftypeId>,
    pub readonly: bool,
}

/// A registered capability with its cached ancestor closure.
#[derive(Debug, Clone)]
pub struct Capability {
    pub id: CapabilityId,
    pub name: String,
    /// Direct supertypes.
    pub extends: Vec<CapabilityId>,
    pub readonly: bool,
    pub fields: Vec<FieldSpec>,
    /// Every capability this one is-or-extends, including itself.
    pub(crate) ancestors: HashSet<CapabilityId>,
}

impl Capability {
    /// `true` if this capability is `other` or (transitively) extends it.
    #[must_use]
    pub fn is_or_extends(&self, other: CapabilityId) -> bool {
        self.ancestors.contains(&other)
    }

    #[must_use]
    pub fn field(&self, name: &str) -> Option<&FieldSpec> {
        self.fields.iter().find(|f| f.name == name)
    }

    /// Ancestor closure, including the capability itself. Unordered.
    pub fn ancestors(&self) -> impl Iterator<Item = CapabilityId> + '_ {
        self.ancestors.iter().copied()
    }
}
