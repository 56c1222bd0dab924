//! Version chain maintenance: `follows` validation and FIRST/LAST tags.
//!
//! Every item owns two tag resources, `FIRST` and `LAST`, whose `elements`
//! field (`tag_elements` edges) points at versions. `FIRST` is written once
//! when the item gets its first version. `LAST` tracks the current heads:
//! a single version for linear items, the set of branch tips for forkable
//! ones.
//!
//! Validation runs before a version is registered; tag maintenance runs
//! right after, before any propagation triggered by the new version.

use std::collections::HashSet;

use crate::Oid;
use crate::error::GraphError;
use crate::store::{ObjectMap, ReferenceStore};

/// The tag resources of one item. Either may be missing for items created
/// outside the normal pathway.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ItemTags {
    pub first: Option<Oid>,
    pub last: Option<Oid>,
}

/// Versions currently tagged by `tag`, in tag order.
pub fn tagged<M: ObjectMap>(store: &ReferenceStore<M>, tag: Option<Oid>) -> Vec<Oid> {
    tag.map(|tag| store.targets(tag, store.registry().builtins().tag_elements))
        .unwrap_or_default()
}

/// Check the predecessors of a version about to be created.
///
/// `tags` is `None` for versions that do not live inside an item; those
/// only need predecessors that are existing versionable resources.
///
/// # Errors
///
/// [`GraphError::InvalidFollows`] naming `path` when:
///
/// - the item has no versions yet and `follows` is not empty;
/// - the item has versions and `follows` is empty;
/// - a non-forkable version does not follow exactly the current LAST version;
/// - a forkable version follows something that is not a version of this item;
/// - a version outside an item follows something that is not a version.
pub fn validate_follows<M: ObjectMap>(
    store: &ReferenceStore<M>,
    tags: Option<ItemTags>,
    follows: &[Oid],
    forkable: bool,
    path: &str,
) -> Result<(), GraphError> {
    let invalid = |reason| GraphError::InvalidFollows {
        path: path.to_string(),
        reason,
    };
    let versionable = store.registry().builtins().versionable;

    let Some(last_tag) = tags.and_then(|t| t.last) else {
        if tags.is_some() {
            tracing::warn!(path, "item has no LAST tag; validating follows as a free version");
        }
        if follows.iter().any(|&p| !store.provides(p, versionable)) {
            return Err(invalid("predecessor is not an existing version"));
        }
        return Ok(());
    };

    let heads = tagged(store, Some(last_tag));
    if heads.is_empty() {
        if follows.is_empty() {
            return Ok(());
        }
        return Err(invalid("the first version of an item cannot follow anything"));
    }
    if follows.is_empty() {
        return Err(invalid("a new version must follow an existing version of the item"));
    }

    if !forkable {
        if follows.len() != 1 {
            return Err(invalid("non-forkable versions follow exactly one predecessor"));
        }
        if !heads.contains(&follows[0]) {
            return Err(invalid("predecessor is not the LAST version of the item"));
        }
        return Ok(());
    }

    let mut versions: HashSet<Oid> = heads.iter().copied().collect();
    for &head in &heads {
        versions.extend(store.version_ancestors(head));
    }
    if follows.iter().any(|p| !versions.contains(p)) {
        return Err(invalid("predecessor is not a version of this item"));
    }
    Ok(())
}

/// Update FIRST and LAST after `version` has been created.
///
/// FIRST is set only while empty. LAST becomes `{version}` for linear
/// items; for forkable items the predecessors leave the head set and the
/// new version joins it. A missing tag is skipped with a warning.
///
/// # Errors
///
/// Propagates [`ReferenceStore::set_references`] failures, which only occur
/// when the tags are not `tag` resources.
pub fn update_tags<M: ObjectMap>(
    store: &mut ReferenceStore<M>,
    tags: ItemTags,
    version: Oid,
    follows: &[Oid],
    forkable: bool,
) -> Result<(), GraphError> {
    let tag_elements = store.registry().builtins().tag_elements;

    match tags.first {
        Some(first) if store.targets(first, tag_elements).is_empty() => {
            store.set_references(first, [version], tag_elements)?;
            tracing::debug!(%version, "FIRST tag set");
        }
        Some(_) => {}
        None => tracing::warn!(%version, "item has no FIRST tag"),
    }

    let Some(last) = tags.last else {
        tracing::warn!(%version, "item has no LAST tag");
        return Ok(());
    };
    let heads = if forkable {
        let mut heads: Vec<Oid> = store
            .targets(last, tag_elements)
            .into_iter()
            .filter(|head| !follows.contains(head))
            .collect();
        heads.push(version);
        heads
    } else {
        vec![version]
    };
    tracing::debug!(%version, heads = heads.len(), "LAST tag updated");
    store.set_references(last, heads, tag_elements)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::schema::{CapabilityId, Registry};
    use crate::store::MemoryObjectMap;

    const FIRST: Oid = Oid::new(1);
    const LAST: Oid = Oid::new(2);

    fn store_with(kind: fn(&crate::schema::Builtins) -> CapabilityId) -> ReferenceStore {
        let registry = Registry::builder().build().expect("schema");
        let b = *registry.builtins();
        let mut index = MemoryObjectMap::new();
        index.register(FIRST, vec![b.tag]);
        index.register(LAST, vec![b.tag]);
        for raw in 10..=14 {
            index.register(Oid::new(raw), vec![kind(&b)]);
        }
        ReferenceStore::new(Arc::new(registry), index)
    }

    fn tags() -> ItemTags {
        ItemTags {
            first: Some(FIRST),
            last: Some(LAST),
        }
    }

    fn add(store: &mut ReferenceStore, version: u64, follows: &[u64], forkable: bool) {
        let follows: Vec<Oid> = follows.iter().copied().map(Oid::new).collect();
        let version = Oid::new(version);
        validate_follows(store, Some(tags()), &follows, forkable, "/item").expect("valid follows");
        let follows_type = store.registry().builtins().follows;
        store
            .set_references(version, follows.iter().copied(), follows_type)
            .expect("follows");
        update_tags(store, tags(), version, &follows, forkable).expect("tags");
    }

    #[test]
    fn linear_chain_moves_last() {
        let mut store = store_with(|b| b.versionable);
        add(&mut store, 10, &[], false);
        assert_eq!(tagged(&store, Some(FIRST)), vec![Oid::new(10)]);
        assert_eq!(tagged(&store, Some(LAST)), vec![Oid::new(10)]);

        add(&mut store, 11, &[10], false);
        assert_eq!(tagged(&store, Some(FIRST)), vec![Oid::new(10)]);
        assert_eq!(tagged(&store, Some(LAST)), vec![Oid::new(11)]);
    }

    #[test]
    fn linear_chain_rejects_stale_predecessor_and_merges() {
        let mut store = store_with(|b| b.versionable);
        add(&mut store, 10, &[], false);
        add(&mut store, 11, &[10], false);

        let err = validate_follows(&store, Some(tags()), &[Oid::new(10)], false, "/item")
            .expect_err("10 is no longer LAST");
        assert!(matches!(err, GraphError::InvalidFollows { ref path, .. } if path == "/item"));

        let err = validate_follows(
            &store,
            Some(tags()),
            &[Oid::new(10), Oid::new(11)],
            false,
            "/item",
        )
        .expect_err("merge");
        assert!(matches!(err, GraphError::InvalidFollows { .. }));

        assert!(validate_follows(&store, Some(tags()), &[], false, "/item").is_err());
    }

    #[test]
    fn first_version_cannot_follow() {
        let store = store_with(|b| b.versionable);
        assert!(validate_follows(&store, Some(tags()), &[Oid::new(12)], false, "/item").is_err());
    }

    #[test]
    fn forkable_heads_accumulate_branches() {
        let mut store = store_with(|b| b.forkable);
        add(&mut store, 10, &[], true);
        add(&mut store, 11, &[10], true);
        add(&mut store, 12, &[10], true);
        assert_eq!(tagged(&store, Some(LAST)), vec![Oid::new(11), Oid::new(12)]);

        add(&mut store, 13, &[11, 12], true);
        assert_eq!(tagged(&store, Some(LAST)), vec![Oid::new(13)]);
        assert_eq!(tagged(&store, Some(FIRST)), vec![Oid::new(10)]);
    }

    #[test]
    fn forkable_predecessor_must_belong_to_item() {
        let mut store = store_with(|b| b.forkable);
        add(&mut store, 10, &[], true);
        let err = validate_follows(&store, Some(tags()), &[Oid::new(14)], true, "/item")
            .expect_err("14 is not in this item");
        assert!(matches!(err, GraphError::InvalidFollows { .. }));
    }

    #[test]
    fn free_versions_need_existing_predecessors() {
        let store = store_with(|b| b.versionable);
        assert!(validate_follows(&store, None, &[Oid::new(10)], false, "/v").is_ok());
        assert!(validate_follows(&store, None, &[Oid::new(99)], false, "/v").is_err());
        assert!(validate_follows(&store, None, &[FIRST], false, "/v").is_err());
    }

    #[test]
    fn missing_tags_are_skipped() {
        let mut store = store_with(|b| b.versionable);
        update_tags(&mut store, ItemTags::default(), Oid::new(10), &[], false)
            .expect("missing tags are a no-op");
        assert!(tagged(&store, Some(LAST)).is_empty());
    }
}
