//! Reference store: typed directed edges between resource identities.
//!
//! The store records edges in a host-provided [`ObjectMap`] and interprets
//! them through the schema [`Registry`]. It never owns resources; every edge
//! is an `(oid, oid)` pair filed under a [`ReftypeKey`].
//!
//! # Queries
//!
//! [`ReferenceStore::get_references`] and
//! [`ReferenceStore::get_back_references`] return lazy iterators that are
//! recomputed on every call, so writes made earlier in the same transaction
//! are always visible. A store without an object map (a resource not yet
//! attached to a tree) answers every query with an empty sequence.
//!
//! # Writes
//!
//! [`ReferenceStore::set_references`] is a full replace of one edge family
//! from one source, so retrying it is harmless. Targets that no longer
//! resolve are dropped silently: bulk migrations routinely leave dangling
//! references behind.

#![allow(clippy::module_name_repetitions, clippy::must_use_candidate)]

mod memory;

use std::collections::HashSet;
use std::sync::Arc;

pub use memory::MemoryObjectMap;

use crate::Oid;
use crate::error::GraphError;
use crate::schema::{CapabilityId, Registry, ReftypeId, ReftypeKey, ReftypeMatch};

// ---------------------------------------------------------------------------
// ObjectMap
// ---------------------------------------------------------------------------

/// The host's object-identity index.
///
/// Implementations resolve oids to registered objects and store edges per
/// reference type key. Target order for one `(source, key)` pair must be the
/// order of `connect` calls.
pub trait ObjectMap {
    /// `true` if `oid` resolves to a live object.
    fn contains(&self, oid: Oid) -> bool;

    /// Capabilities declared by the object, or `None` if it is unknown.
    fn capabilities(&self, oid: Oid) -> Option<&[CapabilityId]>;

    fn targets(&self, source: Oid, reftype: &ReftypeKey) -> Vec<Oid>;

    fn sources(&self, target: Oid, reftype: &ReftypeKey) -> Vec<Oid>;

    /// Every key that has been used to file an edge.
    fn reftypes(&self) -> Vec<ReftypeKey>;

    /// Add an edge; connecting an existing edge again is a no-op.
    fn connect(&mut self, source: Oid, target: Oid, reftype: ReftypeKey);

    fn disconnect(&mut self, source: Oid, target: Oid, reftype: &ReftypeKey);
}

// ---------------------------------------------------------------------------
// Reference
// ---------------------------------------------------------------------------

/// One concrete edge, described through the reference type that filed it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Reference<'a> {
    pub source: Oid,
    pub capability: CapabilityId,
    pub field: &'a str,
    pub reftype: ReftypeId,
    pub target: Oid,
}

/// Targets added and removed by one [`ReferenceStore::set_references`] call.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReferenceChange {
    pub source: Option<Oid>,
    pub reftype: Option<ReftypeId>,
    pub added: Vec<Oid>,
    pub removed: Vec<Oid>,
}

impl ReferenceChange {
    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.removed.is_empty()
    }
}

// ---------------------------------------------------------------------------
// ReferenceStore
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct ReferenceStore<M: ObjectMap = MemoryObjectMap> {
    registry: Arc<Registry>,
    index: Option<M>,
}

impl<M: ObjectMap> ReferenceStore<M> {
    pub const fn new(registry: Arc<Registry>, index: M) -> Self {
        Self {
            registry,
            index: Some(index),
        }
    }

    /// A store with no backing index: queries are empty, writes are no-ops.
    pub const fn detached(registry: Arc<Registry>) -> Self {
        Self {
            registry,
            index: None,
        }
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    pub const fn registry_handle(&self) -> &Arc<Registry> {
        &self.registry
    }

    pub const fn index(&self) -> Option<&M> {
        self.index.as_ref()
    }

    pub const fn index_mut(&mut self) -> Option<&mut M> {
        self.index.as_mut()
    }

    pub const fn is_attached(&self) -> bool {
        self.index.is_some()
    }

    /// `true` if `oid` resolves and declares a capability that is-or-extends
    /// `capability`.
    pub fn provides(&self, oid: Oid, capability: CapabilityId) -> bool {
        self.index
            .as_ref()
            .and_then(|index| index.capabilities(oid))
            .is_some_and(|declared| self.registry.provides(declared, capability))
    }

    /// Reference types present in the index that extend `base_reftype` and
    /// whose source capability extends `base_capability`.
    ///
    /// Order is the index's key order; callers must not rely on it.
    pub fn get_reftypes(
        &self,
        base_capability: CapabilityId,
        base_reftype: ReftypeId,
    ) -> impl Iterator<Item = ReftypeMatch<'_>> + '_ {
        let keys = self
            .index
            .as_ref()
            .map(|index| index.reftypes())
            .unwrap_or_default();
        let registry: &Registry = &self.registry;
        keys.into_iter()
            .filter_map(move |key| registry.match_reftype(&key, base_capability, base_reftype))
    }

    /// Outgoing edges of `source`, restricted by capability and reference
    /// type family.
    pub fn get_references(
        &self,
        source: Oid,
        base_capability: CapabilityId,
        base_reftype: ReftypeId,
    ) -> impl Iterator<Item = Reference<'_>> + '_ {
        self.get_reftypes(base_capability, base_reftype)
            .flat_map(move |m| {
                self.edges(|index, key| index.targets(source, key), m.reftype.id)
                    .into_iter()
                    .map(move |target| Reference {
                        source,
                        capability: m.capability,
                        field: m.field,
                        reftype: m.reftype.id,
                        target,
                    })
            })
    }

    /// Incoming edges of `target`; the capability filter applies to the
    /// source side.
    pub fn get_back_references(
        &self,
        target: Oid,
        base_capability: CapabilityId,
        base_reftype: ReftypeId,
    ) -> impl Iterator<Item = Reference<'_>> + '_ {
        self.get_reftypes(base_capability, base_reftype)
            .flat_map(move |m| {
                self.edges(|index, key| index.sources(target, key), m.reftype.id)
                    .into_iter()
                    .map(move |source| Reference {
                        source,
                        capability: m.capability,
                        field: m.field,
                        reftype: m.reftype.id,
                        target,
                    })
            })
    }

    /// Raw targets of one exact reference type (no subtype expansion).
    pub fn targets(&self, source: Oid, reftype: ReftypeId) -> Vec<Oid> {
        self.edges(|index, key| index.targets(source, key), reftype)
    }

    /// Replace every `reftype` edge from `source` with edges to `targets`.
    ///
    /// Iteration order of `targets` is the stored order. Duplicates collapse
    /// and targets that do not resolve are skipped.
    ///
    /// # Errors
    ///
    /// These indicate a bug in the caller, not a runtime condition:
    ///
    /// - [`GraphError::InvalidReftype`] if `reftype` is not a proper subtype
    ///   of the root marker;
    /// - [`GraphError::CapabilityMismatch`] if `source` does not provide the
    ///   reference type's source capability, or a resolvable target does not
    ///   provide its target capability.
    pub fn set_references(
        &mut self,
        source: Oid,
        targets: impl IntoIterator<Item = Oid>,
        reftype: ReftypeId,
    ) -> Result<ReferenceChange, GraphError> {
        let registry = Arc::clone(&self.registry);
        let root = registry.builtins().sheet_reference;
        let declared = registry.reftype(reftype);
        if declared.id == root || !declared.is_or_extends(root) {
            return Err(GraphError::InvalidReftype {
                reftype: declared.name.clone(),
                base: registry.reftype(root).name.clone(),
            });
        }

        if self.index.is_none() {
            tracing::debug!(%source, reftype = %declared.name, "set_references on detached store ignored");
            return Ok(ReferenceChange::default());
        }

        if !self.provides(source, declared.source_capability) {
            return Err(GraphError::CapabilityMismatch {
                oid: source,
                capability: registry.capability(declared.source_capability).name.clone(),
            });
        }

        let mut wanted: Vec<Oid> = Vec::new();
        let mut seen = HashSet::new();
        for target in targets {
            if !seen.insert(target) {
                continue;
            }
            let resolves = self.index.as_ref().is_some_and(|index| index.contains(target));
            if !resolves {
                tracing::debug!(%source, %target, reftype = %declared.name, "dropping unresolved reference target");
                continue;
            }
            if !self.provides(target, declared.target_capability) {
                return Err(GraphError::CapabilityMismatch {
                    oid: target,
                    capability: registry.capability(declared.target_capability).name.clone(),
                });
            }
            wanted.push(target);
        }

        let key = ReftypeKey::Registered(reftype);
        let Some(index) = self.index.as_mut() else {
            return Ok(ReferenceChange::default());
        };
        let previous = index.targets(source, &key);
        for &old in &previous {
            index.disconnect(source, old, &key);
        }
        for &target in &wanted {
            index.connect(source, target, key.clone());
        }

        Ok(ReferenceChange {
            source: Some(source),
            reftype: Some(reftype),
            added: wanted
                .iter()
                .copied()
                .filter(|t| !previous.contains(t))
                .collect(),
            removed: previous
                .iter()
                .copied()
                .filter(|t| !wanted.contains(t))
                .collect(),
        })
    }

    fn edges(&self, lookup: impl Fn(&M, &ReftypeKey) -> Vec<Oid>, reftype: ReftypeId) -> Vec<Oid> {
        self.index
            .as_ref()
            .map(|index| lookup(index, &ReftypeKey::Registered(reftype)))
            .unwrap_or_default()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
