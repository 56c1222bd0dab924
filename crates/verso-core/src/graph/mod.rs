//! Graph-level queries over the reference store.
//!
//! These are higher-level traversals built from
//! [`ReferenceStore::get_references`] and
//! [`ReferenceStore::get_back_references`]. Nothing here caches: every call
//! re-derives its answer from the store.
//!
//! ## Submodules
//!
//! - [`subtree`]: structural reachability (`is_in_subtree`, `subtree`).
//! - [`versions`]: the `follows` predecessor chain.

#![allow(clippy::must_use_candidate, clippy::module_name_repetitions)]

pub mod subtree;
pub mod versions;

use std::collections::BTreeMap;

use crate::Oid;
use crate::error::GraphError;
use crate::schema::CapabilityId;
use crate::sheet::SheetData;
use crate::store::{ObjectMap, ReferenceChange, ReferenceStore};

/// Field name → referenced oids.
///
/// Fields without references are absent, never present with an empty list.
pub type FieldReferences = BTreeMap<String, Vec<Oid>>;

impl<M: ObjectMap> ReferenceStore<M> {
    /// Outgoing references of `source` declared by `capability` or any of
    /// its subtypes, grouped by field.
    pub fn get_references_for_capability(
        &self,
        source: Oid,
        capability: CapabilityId,
    ) -> FieldReferences {
        let base = self.registry().builtins().sheet_reference;
        let mut grouped = FieldReferences::new();
        for reference in self.get_references(source, capability, base) {
            grouped
                .entry(reference.field.to_string())
                .or_default()
                .push(reference.target);
        }
        grouped
    }

    /// Incoming references of `target` whose source field belongs to
    /// `capability` or any of its subtypes, grouped by that field.
    pub fn get_back_references_for_capability(
        &self,
        target: Oid,
        capability: CapabilityId,
    ) -> FieldReferences {
        let base = self.registry().builtins().sheet_reference;
        let mut grouped = FieldReferences::new();
        for reference in self.get_back_references(target, capability, base) {
            grouped
                .entry(reference.field.to_string())
                .or_default()
                .push(reference.source);
        }
        grouped
    }

    /// Write every reference-valued field present in `data`.
    ///
    /// Plain value fields are ignored; they live on the resource, not in
    /// the store. Each written field is a full replace.
    ///
    /// # Errors
    ///
    /// [`GraphError::UnknownField`] if `data` names a field `capability`
    /// does not declare, plus anything [`ReferenceStore::set_references`]
    /// returns.
    pub fn set_references_for_capability(
        &mut self,
        source: Oid,
        capability: CapabilityId,
        data: &SheetData,
    ) -> Result<Vec<ReferenceChange>, GraphError> {
        let registry = std::sync::Arc::clone(self.registry_handle());
        let declared = registry.capability(capability);

        let mut changes = Vec::new();
        for (field, value) in data {
            let spec = declared
                .field(field)
                .ok_or_else(|| GraphError::UnknownField {
                    capability: declared.name.clone(),
                    field: field.clone(),
                })?;
            let Some(reftype) = spec.reftype else {
                continue;
            };
            let change = self.set_references(source, value.references(), reftype)?;
            if !change.is_empty() {
                changes.push(change);
            }
        }
        Ok(changes)
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::config::{CapabilityConfig, FieldConfig, ReftypeConfig};
    use crate::schema::{FieldKind, Registry};
    use crate::sheet::FieldValue;
    use crate::store::MemoryObjectMap;

    /// `document` (elements: list, cover: reference) and `comment`
    /// (refers_to: reference) over a handful of plain resources.
    pub(crate) fn document_registry() -> Registry {
        Registry::builder()
            .capability(CapabilityConfig {
                name: "document".into(),
                extends: vec![],
                readonly: false,
                fields: vec![
                    FieldConfig {
                        name: "elements".into(),
                        kind: FieldKind::List,
                        reftype: Some("document_elements".into()),
                        readonly: false,
                    },
                    FieldConfig {
                        name: "cover".into(),
                        kind: FieldKind::Reference,
                        reftype: Some("document_cover".into()),
                        readonly: false,
                    },
                    FieldConfig {
                        name: "title".into(),
                        kind: FieldKind::Value,
                        reftype: None,
                        readonly: false,
                    },
                ],
            })
            .capability(CapabilityConfig {
                name: "comment".into(),
                extends: vec![],
                readonly: false,
                fields: vec![FieldConfig {
                    name: "refers_to".into(),
                    kind: FieldKind::Reference,
                    reftype: Some("comment_refers_to".into()),
                    readonly: false,
                }],
            })
            .reftype(ReftypeConfig {
                name: "document_elements".into(),
                extends: None,
                source: "document".into(),
                field: "elements".into(),
                target: "resource".into(),
            })
            .reftype(ReftypeConfig {
                name: "document_cover".into(),
                extends: None,
                source: "document".into(),
                field: "cover".into(),
                target: "resource".into(),
            })
            .reftype(ReftypeConfig {
                name: "comment_refers_to".into(),
                extends: None,
                source: "comment".into(),
                field: "refers_to".into(),
                target: "resource".into(),
            })
            .build()
            .expect("document schema")
    }

    /// Store where oids 1..=3 are documents-and-comments and 4..=9 plain.
    pub(crate) fn document_store() -> ReferenceStore {
        let registry = document_registry();
        let document = registry.capability_id("document").expect("document");
        let comment = registry.capability_id("comment").expect("comment");
        let resource = registry.builtins().resource;

        let mut index = MemoryObjectMap::new();
        for raw in 1..=3 {
            index.register(Oid::new(raw), vec![document, comment]);
        }
        for raw in 4..=9 {
            index.register(Oid::new(raw), vec![resource]);
        }
        ReferenceStore::new(Arc::new(registry), index)
    }

    fn sheet(entries: &[(&str, FieldValue)]) -> SheetData {
        entries
            .iter()
            .map(|(k, v)| ((*k).to_string(), v.clone()))
            .collect()
    }

    #[test]
    fn grouped_references_omit_empty_fields() {
        let mut store = document_store();
        let document = store.registry().capability_id("document").expect("document");

        let data = sheet(&[
            (
                "elements",
                FieldValue::References(vec![Oid::new(5), Oid::new(4)]),
            ),
            ("cover", FieldValue::Reference(None)),
            ("title", FieldValue::Value(serde_json::json!("Budget 2027"))),
        ]);
        store
            .set_references_for_capability(Oid::new(1), document, &data)
            .expect("write");

        let grouped = store.get_references_for_capability(Oid::new(1), document);
        assert_eq!(grouped.len(), 1);
        assert_eq!(grouped["elements"], vec![Oid::new(5), Oid::new(4)]);
        assert!(!grouped.contains_key("cover"));
        assert!(!grouped.contains_key("title"));
    }

    #[test]
    fn grouping_is_restricted_to_the_capability() {
        let mut store = document_store();
        let registry = Arc::clone(store.registry_handle());
        let document = registry.capability_id("document").expect("document");
        let comment = registry.capability_id("comment").expect("comment");

        store
            .set_references_for_capability(
                Oid::new(1),
                comment,
                &sheet(&[("refers_to", FieldValue::Reference(Some(Oid::new(6))))]),
            )
            .expect("write comment");
        store
            .set_references_for_capability(
                Oid::new(1),
                document,
                &sheet(&[("cover", FieldValue::Reference(Some(Oid::new(7))))]),
            )
            .expect("write document");

        let for_document = store.get_references_for_capability(Oid::new(1), document);
        assert_eq!(for_document.keys().collect::<Vec<_>>(), vec!["cover"]);

        let for_all = store.get_references_for_capability(Oid::new(1), registry.builtins().resource);
        assert_eq!(for_all.len(), 2);
    }

    #[test]
    fn back_references_group_by_source_field() {
        let mut store = document_store();
        let registry = Arc::clone(store.registry_handle());
        let document = registry.capability_id("document").expect("document");

        for source in [Oid::new(1), Oid::new(2)] {
            store
                .set_references_for_capability(
                    source,
                    document,
                    &sheet(&[("elements", FieldValue::References(vec![Oid::new(8)]))]),
                )
                .expect("write");
        }

        let back = store.get_back_references_for_capability(Oid::new(8), document);
        assert_eq!(back["elements"], vec![Oid::new(1), Oid::new(2)]);
        assert!(store
            .get_back_references_for_capability(Oid::new(9), document)
            .is_empty());
    }

    #[test]
    fn unknown_field_is_rejected() {
        let mut store = document_store();
        let document = store.registry().capability_id("document").expect("document");
        let err = store
            .set_references_for_capability(
                Oid::new(1),
                document,
                &sheet(&[("attachments", FieldValue::References(vec![]))]),
            )
            .expect_err("unknown field");
        assert_eq!(
            err,
            GraphError::UnknownField {
                capability: "document".into(),
                field: "attachments".into()
            }
        );
    }
}
