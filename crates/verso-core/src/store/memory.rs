//! In-memory [`ObjectMap`] used by [`Pool`](crate::pool::Pool) and tests.

use std::collections::HashMap;

use super::ObjectMap;
use crate::Oid;
use crate::schema::{CapabilityId, ReftypeKey};

/// Hash-indexed object map with forward and reverse edge lists.
///
/// Target lists keep connection order, which is what makes ordered
/// reference fields read back in the order they were written.
#[derive(Debug, Clone, Default)]
pub struct MemoryObjectMap {
    objects: HashMap<Oid, Vec<CapabilityId>>,
    forward: HashMap<(Oid, ReftypeKey), Vec<Oid>>,
    backward: HashMap<(Oid, ReftypeKey), Vec<Oid>>,
    /// Every key ever connected, in first-seen order.
    reftypes: Vec<ReftypeKey>,
}

impl MemoryObjectMap {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Make `oid` resolvable, declaring the capabilities it provides.
    pub fn register(&mut self, oid: Oid, capabilities: Vec<CapabilityId>) {
        self.objects.insert(oid, capabilities);
    }

    /// Forget `oid` and every edge that starts or ends at it.
    ///
    /// Returns `false` if the object was not registered.
    pub fn unregister(&mut self, oid: Oid) -> bool {
        if self.objects.remove(&oid).is_none() {
            return false;
        }

        for key in self.reftypes.clone() {
            if let Some(targets) = self.forward.remove(&(oid, key.clone())) {
                for target in targets {
                    if let Some(sources) = self.backward.get_mut(&(target, key.clone())) {
                        sources.retain(|s| *s != oid);
                    }
                }
            }
            if let Some(sources) = self.backward.remove(&(oid, key.clone())) {
                for source in sources {
                    if let Some(targets) = self.forward.get_mut(&(source, key.clone())) {
                        targets.retain(|t| *t != oid);
                    }
                }
            }
        }
        true
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.objects.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.objects.is_empty()
    }

    /// Total number of stored edges across all reference types.
    #[must_use]
    pub fn edge_count(&self) -> usize {
        self.forward.values().map(Vec::len).sum()
    }
}

impl ObjectMap for MemoryObjectMap {
    fn contains(&self, oid: Oid) -> bool {
        self.objects.contains_key(&oid)
    }

    fn capabilities(&self, oid: Oid) -> Option<&[CapabilityId]> {
        self.objects.get(&oid).map(Vec::as_slice)
    }

    fn targets(&self, source: Oid, reftype: &ReftypeKey) -> Vec<Oid> {
        self.forward
            .get(&(source, reftype.clone()))
            .cloned()
            .unwrap_or_default()
    }

    fn sources(&self, target: Oid, reftype: &ReftypeKey) -> Vec<Oid> {
        self.backward
            .get(&(target, reftype.clone()))
            .cloned()
            .unwrap_or_default()
    }

    fn reftypes(&self) -> Vec<ReftypeKey> {
        self.reftypes.clone()
    }

    fn connect(&mut self, source: Oid, target: Oid, reftype: ReftypeKey) {
        if !self.reftypes.contains(&reftype) {
            self.reftypes.push(reftype.clone());
        }

        let targets = self.forward.entry((source, reftype.clone())).or_default();
        if targets.contains(&target) {
            return;
        }
        targets.push(target);
        self.backward.entry((target, reftype)).or_default().push(source);
    }

    fn disconnect(&mut self, source: Oid, target: Oid, reftype: &ReftypeKey) {
        if let Some(targets) = self.forward.get_mut(&(source, reftype.clone())) {
            targets.retain(|t| *t != target);
        }
        if let Some(sources) = self.backward.get_mut(&(target, reftype.clone())) {
            sources.retain(|s| *s != source);
        }
    }
}
