//! Structural reachability over the `sheet_to_sheet` family.
//!
//! A resource is "in the subtree" of an ancestor when it can be reached by
//! following outgoing structural references from that ancestor. Version
//! history (`follows`) is not structural and is never walked here.

use std::collections::{HashSet, VecDeque};

use crate::Oid;
use crate::schema::ReftypeId;
use crate::store::{ObjectMap, ReferenceStore};

impl<M: ObjectMap> ReferenceStore<M> {
    /// `true` if `descendant` is reachable from any of `ancestors` through
    /// structural references. Every resource is in its own subtree.
    ///
    /// Cycles are tolerated. The visited set is shared across all
    /// ancestors, so a region explored from one ancestor is not walked
    /// again from the next.
    pub fn is_in_subtree(&self, descendant: Oid, ancestors: &[Oid]) -> bool {
        self.is_in_subtree_with(
            descendant,
            ancestors,
            self.registry().builtins().sheet_to_sheet,
        )
    }

    /// [`is_in_subtree`](Self::is_in_subtree) over an arbitrary reference
    /// type family.
    pub fn is_in_subtree_with(
        &self,
        descendant: Oid,
        ancestors: &[Oid],
        base_reftype: ReftypeId,
    ) -> bool {
        let resource = self.registry().builtins().resource;
        let mut visited = HashSet::new();

        for &ancestor in ancestors {
            let mut stack = vec![ancestor];
            while let Some(candidate) = stack.pop() {
                if candidate == descendant {
                    return true;
                }
                if !visited.insert(candidate) {
                    continue;
                }
                stack.extend(
                    self.get_references(candidate, resource, base_reftype)
                        .map(|r| r.target)
                        .filter(|t| !visited.contains(t)),
                );
            }
        }
        false
    }

    /// Every resource structurally reachable from `root`, `root` first, in
    /// breadth-first order.
    pub fn subtree(&self, root: Oid) -> Vec<Oid> {
        let builtins = self.registry().builtins();
        let (resource, family) = (builtins.resource, builtins.sheet_to_sheet);

        let mut visited = HashSet::new();
        let mut queue = VecDeque::new();
        let mut order = Vec::new();
        visited.insert(root);
        queue.push_back(root);

        while let Some(current) = queue.pop_front() {
            order.push(current);
            for reference in self.get_references(current, resource, family) {
                if visited.insert(reference.target) {
                    queue.push_back(reference.target);
                }
            }
        }
        order
    }
}

#[cfg(test)]
mod tests {
    use crate::Oid;
    use crate::graph::tests::document_store;
    use crate::store::ReferenceStore;

    fn link(store: &mut ReferenceStore, source: u64, targets: &[u64]) {
        let elements = store
            .registry()
            .reftype_id("document_elements")
            .expect("reftype");
        store
            .set_references(
                Oid::new(source),
                targets.iter().copied().map(Oid::new),
                elements,
            )
            .expect("link");
    }

    #[test]
    fn reflexive_even_without_edges() {
        let store = document_store();
        assert!(store.is_in_subtree(Oid::new(4), &[Oid::new(4)]));
        assert!(!store.is_in_subtree(Oid::new(4), &[]));
    }

    #[test]
    fn transitive_reachability() {
        let mut store = document_store();
        link(&mut store, 1, &[2]);
        link(&mut store, 2, &[3]);
        link(&mut store, 3, &[4]);

        assert!(store.is_in_subtree(Oid::new(4), &[Oid::new(1)]));
        assert!(!store.is_in_subtree(Oid::new(1), &[Oid::new(4)]));
        assert!(store.is_in_subtree(Oid::new(4), &[Oid::new(9), Oid::new(2)]));
    }

    #[test]
    fn cycles_terminate() {
        let mut store = document_store();
        link(&mut store, 1, &[2]);
        link(&mut store, 2, &[3]);
        link(&mut store, 3, &[1]);

        assert!(!store.is_in_subtree(Oid::new(9), &[Oid::new(1), Oid::new(2)]));
        assert!(store.is_in_subtree(Oid::new(1), &[Oid::new(3)]));
    }

    #[test]
    fn version_history_is_not_structural() {
        let mut store = document_store();
        let follows = store.registry().builtins().follows;
        let versionable = store.registry().builtins().versionable;
        let index = store.index_mut().expect("attached");
        index.register(Oid::new(20), vec![versionable]);
        index.register(Oid::new(21), vec![versionable]);
        store
            .set_references(Oid::new(21), [Oid::new(20)], follows)
            .expect("follows");

        assert!(!store.is_in_subtree(Oid::new(20), &[Oid::new(21)]));
        assert!(store.is_in_subtree_with(
            Oid::new(20),
            &[Oid::new(21)],
            store.registry().builtins().sheet_reference
        ));
    }

    #[test]
    fn subtree_is_breadth_first_and_deduplicated() {
        let mut store = document_store();
        link(&mut store, 1, &[2, 4]);
        link(&mut store, 2, &[3, 4]);
        link(&mut store, 3, &[1, 5]);

        let order = store.subtree(Oid::new(1));
        assert_eq!(
            order,
            vec![Oid::new(1), Oid::new(2), Oid::new(4), Oid::new(3), Oid::new(5)]
        );
    }
}
