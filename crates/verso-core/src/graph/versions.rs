//! The `follows` relation between versions.

use std::collections::{HashSet, VecDeque};

use crate::Oid;
use crate::store::{ObjectMap, ReferenceStore};

impl<M: ObjectMap> ReferenceStore<M> {
    /// Direct predecessors of `version`.
    pub fn get_follows(&self, version: Oid) -> impl Iterator<Item = Oid> + '_ {
        let b = *self.registry().builtins();
        self.get_references(version, b.versionable, b.follows)
            .map(|r| r.target)
    }

    /// Direct successors of `version`: every version whose `follows` names it.
    pub fn get_followed_by(&self, version: Oid) -> impl Iterator<Item = Oid> + '_ {
        let b = *self.registry().builtins();
        self.get_back_references(version, b.versionable, b.follows)
            .map(|r| r.source)
    }

    /// All transitive predecessors of `version`, nearest first. `version`
    /// itself is not included.
    pub fn version_ancestors(&self, version: Oid) -> Vec<Oid> {
        let mut visited = HashSet::from([version]);
        let mut queue = VecDeque::from([version]);
        let mut ancestors = Vec::new();

        while let Some(current) = queue.pop_front() {
            for predecessor in self.get_follows(current) {
                if visited.insert(predecessor) {
                    ancestors.push(predecessor);
                    queue.push_back(predecessor);
                }
            }
        }
        ancestors
    }
}
