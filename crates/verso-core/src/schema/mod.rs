//! Capability and reference type registry.
//!
//! The registry is built once from declarations (the built-in schema plus a
//! project [`SchemaConfig`]) and is immutable afterwards. Capabilities and
//! reference types live in integer-indexed arenas; names map to ids, and
//! every entry carries its ancestor closure so "is-or-extends" checks are a
//! set lookup rather than a hierarchy walk.
//!
//! # Built-in schema
//!
//! | capability           | fields                          |
//! |----------------------|---------------------------------|
//! | `resource`           | (root of every capability)      |
//! | `versionable`        | `follows` → `follows`           |
//! | `forkable`           | extends `versionable`           |
//! | `item`               |                                 |
//! | `tag`                | `elements` → `tag_elements`     |
//! | `auto_update_marker` |                                 |
//!
//! Reference types: `sheet_reference` (root marker), `sheet_to_sheet`
//! (structural family), `follows` (extends the root only, so version history
//! is never structural) and `tag_elements` (structural).

#![allow(clippy::module_name_repetitions, clippy::must_use_candidate)]

mod capability;
mod reftype;

use std::collections::{HashMap, HashSet, VecDeque};

pub use capability::{Capability, CapabilityId, FieldKind, FieldSpec};
pub use reftype::{ReferenceType, ReftypeId, ReftypeKey, ReftypeMatch};

use crate::config::{CapabilityConfig, FieldConfig, ReftypeConfig, SchemaConfig};
use crate::error::{GraphError, SchemaError};

/// Reserved names of the built-in schema.
pub mod names {
    pub const RESOURCE: &str = "resource";
    pub const VERSIONABLE: &str = "versionable";
    pub const FORKABLE: &str = "forkable";
    pub const ITEM: &str = "item";
    pub const TAG: &str = "tag";
    pub const AUTO_UPDATE_MARKER: &str = "auto_update_marker";

    pub const SHEET_REFERENCE: &str = "sheet_reference";
    pub const SHEET_TO_SHEET: &str = "sheet_to_sheet";
    pub const FOLLOWS: &str = "follows";
    pub const TAG_ELEMENTS: &str = "tag_elements";

    pub const FOLLOWS_FIELD: &str = "follows";
    pub const ELEMENTS_FIELD: &str = "elements";

    pub const FIRST_TAG: &str = "FIRST";
    pub const LAST_TAG: &str = "LAST";
}

/// Ids of the built-in entries, resolved once at build time.
#[derive(Debug, Clone, Copy)]
pub struct Builtins {
    pub resource: CapabilityId,
    pub versionable: CapabilityId,
    pub forkable: CapabilityId,
    pub item: CapabilityId,
    pub tag: CapabilityId,
    pub auto_update: CapabilityId,
    pub sheet_reference: ReftypeId,
    pub sheet_to_sheet: ReftypeId,
    pub follows: ReftypeId,
    pub tag_elements: ReftypeId,
}

// ---------------------------------------------------------------------------
// Registry
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct Registry {
    capabilities: Vec<Capability>,
    capability_index: HashMap<String, CapabilityId>,
    reftypes: Vec<ReferenceType>,
    reftype_index: HashMap<String, ReftypeId>,
    builtins: Builtins,
}

impl Registry {
    pub fn builder() -> RegistryBuilder {
        RegistryBuilder::new()
    }

    /// Build a registry from the built-in schema plus the declarations in
    /// `config`.
    ///
    /// # Errors
    ///
    /// Returns a [`SchemaError`] for duplicate or unknown names, inheritance
    /// cycles and inconsistent field/reference type declarations.
    pub fn from_config(config: &SchemaConfig) -> Result<Self, SchemaError> {
        let mut builder = RegistryBuilder::new();
        for capability in &config.capabilities {
            builder = builder.capability(capability.clone());
        }
        for reftype in &config.reftypes {
            builder = builder.reftype(reftype.clone());
        }
        builder.build()
    }

    pub const fn builtins(&self) -> &Builtins {
        &self.builtins
    }

    /// # Panics
    ///
    /// Panics if `id` was issued by a different registry.
    pub fn capability(&self, id: CapabilityId) -> &Capability {
        &self.capabilities[id.index()]
    }

    /// # Panics
    ///
    /// Panics if `id` was issued by a different registry.
    pub fn reftype(&self, id: ReftypeId) -> &ReferenceType {
        &self.reftypes[id.index()]
    }

    pub fn capability_id(&self, name: &str) -> Option<CapabilityId> {
        self.capability_index.get(name).copied()
    }

    pub fn reftype_id(&self, name: &str) -> Option<ReftypeId> {
        self.reftype_index.get(name).copied()
    }

    /// Look up a capability by name.
    ///
    /// # Errors
    ///
    /// Returns [`GraphError::UnknownCapability`] if no capability has that name.
    pub fn require_capability(&self, name: &str) -> Result<CapabilityId, GraphError> {
        self.capability_id(name)
            .ok_or_else(|| GraphError::UnknownCapability(name.to_string()))
    }

    pub fn capabilities(&self) -> impl Iterator<Item = &Capability> {
        self.capabilities.iter()
    }

    pub fn reftypes(&self) -> impl Iterator<Item = &ReferenceType> {
        self.reftypes.iter()
    }

    pub fn capability_extends(&self, capability: CapabilityId, base: CapabilityId) -> bool {
        self.capabilities
            .get(capability.index())
            .is_some_and(|c| c.is_or_extends(base))
    }

    pub fn reftype_extends(&self, reftype: ReftypeId, base: ReftypeId) -> bool {
        self.reftypes
            .get(reftype.index())
            .is_some_and(|r| r.is_or_extends(base))
    }

    /// `true` if any of the `declared` capabilities is-or-extends `capability`.
    pub fn provides(&self, declared: &[CapabilityId], capability: CapabilityId) -> bool {
        declared
            .iter()
            .any(|&c| self.capability_extends(c, capability))
    }

    /// Filter one object-map key against a base capability and base
    /// reference type.
    ///
    /// Legacy string keys and the root marker itself never match; only
    /// proper subtypes of `sheet_reference` do.
    pub fn match_reftype(
        &self,
        key: &ReftypeKey,
        base_capability: CapabilityId,
        base_reftype: ReftypeId,
    ) -> Option<ReftypeMatch<'_>> {
        let ReftypeKey::Registered(id) = key else {
            return None;
        };
        let reftype = self.reftypes.get(id.index())?;
        if reftype.id == self.builtins.sheet_reference
            || !reftype.is_or_extends(self.builtins.sheet_reference)
        {
            return None;
        }
        if !reftype.is_or_extends(base_reftype) {
            return None;
        }
        if !self.capability_extends(reftype.source_capability, base_capability) {
            return None;
        }
        Some(ReftypeMatch {
            capability: reftype.source_capability,
            field: &reftype.source_field,
            reftype,
        })
    }

    /// All registered reference types extending `base_reftype` whose source
    /// capability extends `base_capability`. Order is unspecified.
    pub fn get_reftypes(
        &self,
        base_capability: CapabilityId,
        base_reftype: ReftypeId,
    ) -> impl Iterator<Item = ReftypeMatch<'_>> {
        self.reftypes.iter().filter_map(move |r| {
            self.match_reftype(&ReftypeKey::Registered(r.id), base_capability, base_reftype)
        })
    }
}

// ---------------------------------------------------------------------------
// RegistryBuilder
// ---------------------------------------------------------------------------

/// Collects declarations and validates them into a [`Registry`].
///
/// The built-in schema is pre-declared; user declarations are appended in
/// the order given, which fixes their ids.
#[derive(Debug, Clone)]
pub struct RegistryBuilder {
    capabilities: Vec<CapabilityConfig>,
    reftypes: Vec<ReftypeConfig>,
}

impl Default for RegistryBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl RegistryBuilder {
    pub fn new() -> Self {
        let (capabilities, reftypes) = builtin_declarations();
        Self {
            capabilities,
            reftypes,
        }
    }

    #[must_use]
    pub fn capability(mut self, declaration: CapabilityConfig) -> Self {
        self.capabilities.push(declaration);
        self
    }

    #[must_use]
    pub fn reftype(mut self, declaration: ReftypeConfig) -> Self {
        self.reftypes.push(declaration);
        self
    }

    /// Validate all declarations and freeze them into a [`Registry`].
    ///
    /// # Errors
    ///
    /// See [`Registry::from_config`].
    pub fn build(self) -> Result<Registry, SchemaError> {
        // 1. Capability names → ids.
        let mut capability_index = HashMap::with_capacity(self.capabilities.len());
        for (index, decl) in self.capabilities.iter().enumerate() {
            if capability_index
                .insert(decl.name.clone(), CapabilityId::from_index(index))
                .is_some()
            {
                return Err(SchemaError::DuplicateCapability(decl.name.clone()));
            }
        }
        let lookup_capability = |name: &str, referenced_by: &str| {
            capability_index
                .get(name)
                .copied()
                .ok_or_else(|| SchemaError::UnknownCapability {
                    name: name.to_string(),
                    referenced_by: referenced_by.to_string(),
                })
        };
        let resource = lookup_capability(names::RESOURCE, "built-in schema")?;

        // 2. Reference type names → ids.
        let mut reftype_index = HashMap::with_capacity(self.reftypes.len());
        for (index, decl) in self.reftypes.iter().enumerate() {
            if reftype_index
                .insert(decl.name.clone(), ReftypeId::from_index(index))
                .is_some()
            {
                return Err(SchemaError::DuplicateReftype(decl.name.clone()));
            }
        }
        let lookup_reftype = |name: &str, referenced_by: &str| {
            reftype_index
                .get(name)
                .copied()
                .ok_or_else(|| SchemaError::UnknownReftype {
                    name: name.to_string(),
                    referenced_by: referenced_by.to_string(),
                })
        };

        // 3. Capability supertypes; anything without one extends `resource`.
        let mut capability_parents: Vec<Vec<usize>> = Vec::with_capacity(self.capabilities.len());
        for decl in &self.capabilities {
            let mut parents = Vec::with_capacity(decl.extends.len());
            for parent in &decl.extends {
                parents.push(lookup_capability(parent, &decl.name)?.index());
            }
            if parents.is_empty() && decl.name != names::RESOURCE {
                parents.push(resource.index());
            }
            capability_parents.push(parents);
        }
        if let Some(node) = find_cycle(&capability_parents) {
            return Err(SchemaError::CapabilityCycle(
                self.capabilities[node].name.clone(),
            ));
        }

        // 4. Reference type supertypes; the root marker has none and
        //    everything else defaults to the structural family.
        let mut reftype_parents: Vec<Vec<usize>> = Vec::with_capacity(self.reftypes.len());
        for decl in &self.reftypes {
            let parent = match (&decl.extends, decl.name.as_str()) {
                (_, names::SHEET_REFERENCE) => None,
                (Some(parent), _) => Some(lookup_reftype(parent, &decl.name)?),
                (None, _) => Some(lookup_reftype(names::SHEET_TO_SHEET, &decl.name)?),
            };
            reftype_parents.push(parent.map(ReftypeId::index).into_iter().collect());
        }
        if let Some(node) = find_cycle(&reftype_parents) {
            return Err(SchemaError::ReftypeCycle(self.reftypes[node].name.clone()));
        }

        let mut reftypes = Vec::with_capacity(self.reftypes.len());
        for (index, decl) in self.reftypes.iter().enumerate() {
            reftypes.push(ReferenceType {
                id: ReftypeId::from_index(index),
                name: decl.name.clone(),
                extends: reftype_parents[index].first().copied().map(ReftypeId::from_index),
                source_capability: lookup_capability(&decl.source, &decl.name)?,
                source_field: decl.field.clone(),
                target_capability: lookup_capability(&decl.target, &decl.name)?,
                ancestors: closure(index, &reftype_parents)
                    .into_iter()
                    .map(ReftypeId::from_index)
                    .collect(),
            });
        }

        // 5. Capabilities with resolved fields.
        let mut capabilities = Vec::with_capacity(self.capabilities.len());
        for (index, decl) in self.capabilities.iter().enumerate() {
            let id = CapabilityId::from_index(index);
            let mut fields = Vec::with_capacity(decl.fields.len());
            for field in &decl.fields {
                fields.push(resolve_field(decl, field, id, &reftypes, &lookup_reftype)?);
            }
            capabilities.push(Capability {
                id,
                name: decl.name.clone(),
                extends: capability_parents[index]
                    .iter()
                    .copied()
                    .map(CapabilityId::from_index)
                    .collect(),
                readonly: decl.readonly,
                fields,
                ancestors: closure(index, &capability_parents)
                    .into_iter()
                    .map(CapabilityId::from_index)
                    .collect(),
            });
        }

        // 6. A reference type naming a source field must be backed by it.
        for reftype in &reftypes {
            if reftype.source_field.is_empty() {
                continue;
            }
            let source = &capabilities[reftype.source_capability.index()];
            let backed = source
                .field(&reftype.source_field)
                .is_some_and(|f| f.reftype == Some(reftype.id));
            if !backed {
                return Err(SchemaError::InvalidField {
                    capability: source.name.clone(),
                    field: reftype.source_field.clone(),
                    reason: format!(
                        "reference type '{}' uses this field as its source but the field does not name it",
                        reftype.name
                    ),
                });
            }
        }

        let cap = |name: &str| lookup_capability(name, "built-in schema");
        let rt = |name: &str| lookup_reftype(name, "built-in schema");
        let builtins = Builtins {
            resource,
            versionable: cap(names::VERSIONABLE)?,
            forkable: cap(names::FORKABLE)?,
            item: cap(names::ITEM)?,
            tag: cap(names::TAG)?,
            auto_update: cap(names::AUTO_UPDATE_MARKER)?,
            sheet_reference: rt(names::SHEET_REFERENCE)?,
            sheet_to_sheet: rt(names::SHEET_TO_SHEET)?,
            follows: rt(names::FOLLOWS)?,
            tag_elements: rt(names::TAG_ELEMENTS)?,
        };

        tracing::debug!(
            capabilities = capabilities.len(),
            reftypes = reftypes.len(),
            "schema registry built"
        );

        Ok(Registry {
            capabilities,
            capability_index,
            reftypes,
            reftype_index,
            builtins,
        })
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn resolve_field(
    capability: &CapabilityConfig,
    field: &FieldConfig,
    id: CapabilityId,
    reftypes: &[ReferenceType],
    lookup_reftype: &impl Fn(&str, &str) -> Result<ReftypeId, SchemaError>,
) -> Result<FieldSpec, SchemaError> {
    let invalid = |reason: String| SchemaError::InvalidField {
        capability: capability.name.clone(),
        field: field.name.clone(),
        reason,
    };

    let reftype = match (field.kind.is_reference(), &field.reftype) {
        (false, None) => None,
        (false, Some(_)) => {
            return Err(invalid("value fields cannot name a reference type".into()));
        }
        (true, None) => {
            return Err(invalid(format!(
                "{} fields must name a reference type",
                field.kind.as_str()
            )));
        }
        (true, Some(name)) => {
            let reftype_id = lookup_reftype(name, &capability.name)?;
            let reftype = &reftypes[reftype_id.index()];
            if reftype.source_capability != id || reftype.source_field != field.name {
                return Err(invalid(format!(
                    "reference type '{name}' does not declare this field as its source"
                )));
            }
            Some(reftype_id)
        }
    };

    Ok(FieldSpec {
        name: field.name.clone(),
        kind: field.kind,
        reftype,
        readonly: field.readonly,
    })
}

/// Return a node on a cycle of the `parents` relation, if any.
///
/// Iterative three-color DFS so deep hierarchies cannot exhaust the stack.
fn find_cycle(parents: &[Vec<usize>]) -> Option<usize> {
    const UNVISITED: u8 = 0;
    const ON_STACK: u8 = 1;
    const DONE: u8 = 2;

    let mut color = vec![UNVISITED; parents.len()];
    for start in 0..parents.len() {
        if color[start] != UNVISITED {
            continue;
        }
        let mut stack: Vec<(usize, usize)> = vec![(start, 0)];
        color[start] = ON_STACK;

        while let Some((node, next)) = stack.last_mut() {
            let node = *node;
            if let Some(&parent) = parents[node].get(*next) {
                *next += 1;
                match color[parent] {
                    ON_STACK => return Some(parent),
                    UNVISITED => {
                        color[parent] = ON_STACK;
                        stack.push((parent, 0));
                    }
                    _ => {}
                }
            } else {
                color[node] = DONE;
                stack.pop();
            }
        }
    }
    None
}

/// Reflexive-transitive closure of `parents` from `start`.
fn closure(start: usize, parents: &[Vec<usize>]) -> HashSet<usize> {
    let mut visited = HashSet::new();
    let mut queue = VecDeque::new();
    visited.insert(start);
    queue.push_back(start);

    while let Some(current) = queue.pop_front() {
        for &parent in &parents[current] {
            if visited.insert(parent) {
                queue.push_back(parent);
            }
        }
    }

    visited
}

fn builtin_declarations() -> (Vec<CapabilityConfig>, Vec<ReftypeConfig>) {
    fn capability(name: &str, extends: &[&str], fields: Vec<FieldConfig>) -> CapabilityConfig {
        CapabilityConfig {
            name: name.to_string(),
            extends: extends.iter().map(ToString::to_string).collect(),
            readonly: false,
            fields,
        }
    }

    fn list_field(name: &str, reftype: &str) -> FieldConfig {
        FieldConfig {
            name: name.to_string(),
            kind: FieldKind::List,
            reftype: Some(reftype.to_string()),
            readonly: false,
        }
    }

    fn reftype(name: &str, extends: &str, source: &str, field: &str, target: &str) -> ReftypeConfig {
        ReftypeConfig {
            name: name.to_string(),
            extends: Some(extends.to_string()),
            source: source.to_string(),
            field: field.to_string(),
            target: target.to_string(),
        }
    }

    let capabilities = vec![
        capability(names::RESOURCE, &[], vec![]),
        capability(
            names::VERSIONABLE,
            &[],
            vec![list_field(names::FOLLOWS_FIELD, names::FOLLOWS)],
        ),
        capability(names::FORKABLE, &[names::VERSIONABLE], vec![]),
        capability(names::ITEM, &[], vec![]),
        capability(
            names::TAG,
            &[],
            vec![list_field(names::ELEMENTS_FIELD, names::TAG_ELEMENTS)],
        ),
        capability(names::AUTO_UPDATE_MARKER, &[], vec![]),
    ];

    let reftypes = vec![
        reftype(
            names::SHEET_REFERENCE,
            names::SHEET_REFERENCE,
            names::RESOURCE,
            "",
            names::RESOURCE,
        ),
        reftype(
            names::SHEET_TO_SHEET,
            names::SHEET_REFERENCE,
            names::RESOURCE,
            "",
            names::RESOURCE,
        ),
        reftype(
            names::FOLLOWS,
            names::SHEET_REFERENCE,
            names::VERSIONABLE,
            names::FOLLOWS_FIELD,
            names::VERSIONABLE,
        ),
        reftype(
            names::TAG_ELEMENTS,
            names::SHEET_TO_SHEET,
            names::TAG,
            names::ELEMENTS_FIELD,
            names::VERSIONABLE,
        ),
    ];

    (capabilities, reftypes)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
