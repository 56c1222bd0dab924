//! Auto-update propagation of new versions to referencing resources.
//!
//! When `new` is created following `old`, every resource that structurally
//! references `old` through a field of an auto-update capability is moved
//! over to `new`. Versionable referrers get a new version of their own
//! (which propagates further through the pool's event queue); everything
//! else is edited in place.

use std::sync::Arc;

use crate::Oid;
use crate::error::GraphError;
use crate::pool::{NewResource, Pool};
use crate::schema::{CapabilityId, FieldKind, names};
use crate::sheet::FieldValue;

/// One back reference of the old version, detached from the store borrow.
#[derive(Debug, Clone)]
struct Referrer {
    source: Oid,
    capability: CapabilityId,
    field: String,
}

/// Move every eligible referrer of `old` over to `new`.
///
/// A referrer is eligible when the capability owning the field extends
/// `auto_update_marker`, neither that capability nor the field is
/// read-only, and (when `root_versions` is non-empty) the referrer lies in
/// the subtree of one of the roots.
///
/// # Errors
///
/// [`GraphError::NoForkAllowed`] when a non-forkable referrer is no longer
/// the LAST version of its item and LAST holds something else in the
/// referring field, so updating it would branch history. An older version
/// that agrees with LAST is skipped.
/// Creation errors from the pool are passed through.
pub(crate) fn propagate(
    pool: &mut Pool,
    old: Oid,
    new: Oid,
    root_versions: &[Oid],
) -> Result<(), GraphError> {
    let registry = Arc::clone(pool.registry_handle());
    let b = *registry.builtins();

    let referrers: Vec<Referrer> = pool
        .store()
        .get_back_references(old, b.resource, b.sheet_to_sheet)
        .map(|r| Referrer {
            source: r.source,
            capability: r.capability,
            field: r.field.to_string(),
        })
        .collect();

    for referrer in referrers {
        let capability = registry.capability(referrer.capability);
        if !capability.is_or_extends(b.auto_update) {
            continue;
        }
        let field_readonly = capability
            .field(&referrer.field)
            .is_none_or(|f| f.readonly);
        if capability.readonly || field_readonly {
            tracing::debug!(
                source = %referrer.source,
                capability = %capability.name,
                field = %referrer.field,
                "read-only referrer not updated"
            );
            continue;
        }
        if !root_versions.is_empty() && !pool.store().is_in_subtree(referrer.source, root_versions) {
            tracing::debug!(source = %referrer.source, "referrer outside root_versions skipped");
            continue;
        }

        let target = pool.changelog().latest(referrer.source);
        let versionable = pool.store().provides(target, b.versionable);
        if pool.changelog().created(target) || !versionable {
            pool.replace_in_place(target, referrer.capability, &referrer.field, old, new)?;
            continue;
        }

        let stale_heads = pool
            .item_of(target)
            .filter(|_| !pool.store().provides(target, b.forkable))
            .map(|item| pool.last(item))
            .filter(|heads| !heads.contains(&target));
        if let Some(heads) = stale_heads {
            if superseded(pool, &referrer, target, &heads, old, new) {
                tracing::debug!(
                    source = %target,
                    field = %referrer.field,
                    "older version matches LAST, left to LAST's own update"
                );
                continue;
            }
            return Err(GraphError::NoForkAllowed {
                path: pool.path(target).unwrap_or_default(),
                capability: capability.name.clone(),
                field: referrer.field.clone(),
                old,
                new,
            });
        }

        let mut sheets = pool.snapshot(target)?;
        if let Some(value) = sheets
            .get_mut(&referrer.capability)
            .and_then(|sheet| sheet.get_mut(&referrer.field))
        {
            value.replace_reference(old, new);
        }
        sheets
            .entry(b.versionable)
            .or_default()
            .insert(names::FOLLOWS_FIELD.to_string(), FieldValue::References(vec![target]));

        let (parent, capabilities) = pool
            .resource(target)
            .map(|r| (r.parent, r.capabilities.clone()))
            .ok_or(GraphError::ResourceNotFound(target))?;
        let request = NewResource {
            parent,
            capabilities,
            sheets,
            root_versions: root_versions.to_vec(),
            ..NewResource::default()
        };
        let version = pool.materialize(request)?;
        tracing::info!(
            source = %target,
            %version,
            %old,
            %new,
            field = %referrer.field,
            "auto-update created new version"
        );
    }
    Ok(())
}

/// `true` if a LAST head holds what `target` holds in the referring field,
/// either as is (LAST is updated through its own back reference) or with
/// `old` already swapped for `new` (LAST was updated earlier in this
/// transaction).
fn superseded(
    pool: &Pool,
    referrer: &Referrer,
    target: Oid,
    heads: &[Oid],
    old: Oid,
    new: Oid,
) -> bool {
    let registry = pool.registry();
    let Some(spec) = registry
        .capability(referrer.capability)
        .field(&referrer.field)
    else {
        return false;
    };
    let Some(reftype) = spec.reftype else {
        return false;
    };
    let kind = spec.kind;
    let read = |oid: Oid| {
        let mut targets = pool.store().targets(oid, reftype);
        if kind == FieldKind::Set {
            targets.sort_unstable();
        }
        targets
    };

    let current = read(target);
    let mut updated = FieldValue::from_targets(kind, current.clone());
    updated.replace_reference(old, new);
    let mut updated = updated.references();
    if kind == FieldKind::Set {
        updated.sort_unstable();
    }

    heads.iter().any(|&head| {
        let value = read(head);
        value == current || value == updated
    })
}
