//! In-memory host for the reference graph.
//!
//! [`Pool`] is the smallest content system the graph needs: a tree of named
//! resources, value sheet data, and the creation pathway that wires the
//! version chain and auto-update propagation together. It is not a
//! persistence engine.
//!
//! # Creation pathway
//!
//! [`Pool::create`] validates the request, registers the resource in the
//! object map, writes reference fields through the
//! [`ReferenceStore`], creates `FIRST`/`LAST` for items, updates the tags
//! of the enclosing item and then drains the event queue, which runs
//! propagation for every new version (including versions that propagation
//! itself creates).
//!
//! # Transactions
//!
//! Every public mutation is atomic: on error the pool is restored to a
//! checkpoint taken before the call. [`Pool::transaction`] groups several
//! mutations into one unit that shares a single [`Changelog`], which is how
//! propagation knows a resource already got a new version in this request.

#![allow(clippy::module_name_repetitions, clippy::must_use_candidate)]

use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet, VecDeque};
use std::sync::Arc;

use crate::Oid;
use crate::autoupdate;
use crate::config::{PropagationConfig, SchemaConfig};
use crate::error::{GraphError, SchemaError};
use crate::event::{GraphEvent, Notification};
use crate::schema::{CapabilityId, Registry, names};
use crate::sheet::{Appstructs, FieldValue, SheetData};
use crate::store::{MemoryObjectMap, ReferenceChange, ReferenceStore};
use crate::version::{self, ItemTags};

// ---------------------------------------------------------------------------
// Resource
// ---------------------------------------------------------------------------

/// A resource in the pool's tree.
#[derive(Debug, Clone, PartialEq)]
pub struct Resource {
    pub oid: Oid,
    pub name: String,
    pub parent: Option<Oid>,
    /// Declared capabilities; inherited ones are implied.
    pub capabilities: Vec<CapabilityId>,
    /// Value fields per capability. Reference fields live in the store.
    pub values: Appstructs,
    pub children: BTreeMap<String, Oid>,
}

/// Request for [`Pool::create`].
#[derive(Debug, Clone, Default, PartialEq)]
pub struct NewResource {
    pub parent: Option<Oid>,
    /// Generated (`VERSION_0000000`, `RESOURCE_0000000`, ...) when absent.
    pub name: Option<String>,
    pub capabilities: Vec<CapabilityId>,
    pub sheets: Appstructs,
    /// Shorthand for the `versionable.follows` field; overrides it.
    pub follows: Option<Vec<Oid>>,
    pub root_versions: Vec<Oid>,
}

impl NewResource {
    pub fn new(capabilities: impl IntoIterator<Item = CapabilityId>) -> Self {
        Self {
            capabilities: capabilities.into_iter().collect(),
            ..Self::default()
        }
    }

    #[must_use]
    pub const fn parent(mut self, parent: Oid) -> Self {
        self.parent = Some(parent);
        self
    }

    #[must_use]
    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    #[must_use]
    pub fn field(
        mut self,
        capability: CapabilityId,
        field: impl Into<String>,
        value: FieldValue,
    ) -> Self {
        self.sheets
            .entry(capability)
            .or_default()
            .insert(field.into(), value);
        self
    }

    #[must_use]
    pub fn follows(mut self, predecessors: impl IntoIterator<Item = Oid>) -> Self {
        self.follows = Some(predecessors.into_iter().collect());
        self
    }

    #[must_use]
    pub fn root_versions(mut self, roots: impl IntoIterator<Item = Oid>) -> Self {
        self.root_versions = roots.into_iter().collect();
        self
    }
}

// ---------------------------------------------------------------------------
// Changelog
// ---------------------------------------------------------------------------

/// Versions created in the current transaction.
#[derive(Debug, Clone, Default)]
pub struct Changelog {
    created: HashSet<Oid>,
    successors: HashMap<Oid, Oid>,
}

impl Changelog {
    pub fn is_empty(&self) -> bool {
        self.created.is_empty()
    }

    pub fn created(&self, oid: Oid) -> bool {
        self.created.contains(&oid)
    }

    /// Version created in this transaction that follows `oid`, if any.
    pub fn successor(&self, oid: Oid) -> Option<Oid> {
        self.successors.get(&oid).copied()
    }

    /// Follow successors from `oid` to the newest version of this
    /// transaction; `oid` itself when it has none.
    pub fn latest(&self, oid: Oid) -> Oid {
        let mut seen = HashSet::new();
        let mut current = oid;
        while let Some(next) = self.successor(current) {
            if !seen.insert(current) {
                break;
            }
            current = next;
        }
        current
    }

    fn record(&mut self, version: Oid, follows: &[Oid]) {
        self.created.insert(version);
        for &predecessor in follows {
            self.successors.insert(predecessor, version);
        }
    }

    fn clear(&mut self) {
        self.created.clear();
        self.successors.clear();
    }
}

// ---------------------------------------------------------------------------
// Pool
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct Pool {
    store: ReferenceStore<MemoryObjectMap>,
    resources: HashMap<Oid, Resource>,
    roots: BTreeMap<String, Oid>,
    next_oid: u64,
    propagation: PropagationConfig,
    changelog: Changelog,
    queue: VecDeque<GraphEvent>,
    notifications: Vec<Notification>,
    depth: usize,
}

impl Pool {
    pub fn new(registry: Arc<Registry>) -> Self {
        Self {
            store: ReferenceStore::new(registry, MemoryObjectMap::new()),
            resources: HashMap::new(),
            roots: BTreeMap::new(),
            next_oid: 1,
            propagation: PropagationConfig::default(),
            changelog: Changelog::default(),
            queue: VecDeque::new(),
            notifications: Vec::new(),
            depth: 0,
        }
    }

    /// Build the registry from `config` and apply its propagation settings.
    ///
    /// # Errors
    ///
    /// Returns the [`SchemaError`] from [`Registry::from_config`].
    pub fn from_config(config: &SchemaConfig) -> Result<Self, SchemaError> {
        let registry = Registry::from_config(config)?;
        Ok(Self::new(Arc::new(registry)).with_propagation(config.propagation.clone()))
    }

    #[must_use]
    pub fn with_propagation(mut self, propagation: PropagationConfig) -> Self {
        self.propagation = propagation;
        self
    }

    pub fn registry(&self) -> &Registry {
        self.store.registry()
    }

    pub const fn registry_handle(&self) -> &Arc<Registry> {
        self.store.registry_handle()
    }

    pub const fn store(&self) -> &ReferenceStore<MemoryObjectMap> {
        &self.store
    }

    pub const fn changelog(&self) -> &Changelog {
        &self.changelog
    }

    pub const fn in_transaction(&self) -> bool {
        self.depth > 0
    }

    pub fn len(&self) -> usize {
        self.resources.len()
    }

    pub fn is_empty(&self) -> bool {
        self.resources.is_empty()
    }

    pub fn resource(&self, oid: Oid) -> Option<&Resource> {
        self.resources.get(&oid)
    }

    /// All resources, ordered by oid.
    pub fn resources(&self) -> Vec<&Resource> {
        let mut all: Vec<&Resource> = self.resources.values().collect();
        all.sort_by_key(|r| r.oid);
        all
    }

    fn require(&self, oid: Oid) -> Result<&Resource, GraphError> {
        self.resources
            .get(&oid)
            .ok_or(GraphError::ResourceNotFound(oid))
    }

    // -----------------------------------------------------------------------
    // Tree
    // -----------------------------------------------------------------------

    pub fn child(&self, parent: Oid, name: &str) -> Option<Oid> {
        self.resources.get(&parent)?.children.get(name).copied()
    }

    fn children_of(&self, parent: Option<Oid>) -> Option<&BTreeMap<String, Oid>> {
        match parent {
            None => Some(&self.roots),
            Some(parent) => self.resources.get(&parent).map(|r| &r.children),
        }
    }

    /// Absolute path: `/` followed by the names from the top-level resource
    /// down to `oid`.
    pub fn path(&self, oid: Oid) -> Option<String> {
        let mut segments = Vec::new();
        let mut current = Some(oid);
        while let Some(id) = current {
            let resource = self.resources.get(&id)?;
            segments.push(resource.name.as_str());
            current = resource.parent;
        }
        segments.reverse();
        Some(format!("/{}", segments.join("/")))
    }

    pub fn find(&self, path: &str) -> Option<Oid> {
        let mut segments = path.split('/').filter(|s| !s.is_empty());
        let mut current = *self.roots.get(segments.next()?)?;
        for segment in segments {
            current = self.child(current, segment)?;
        }
        Some(current)
    }

    fn child_path(&self, parent: Option<Oid>, name: &str) -> String {
        match parent.and_then(|p| self.path(p)) {
            Some(parent) => format!("{parent}/{name}"),
            None => format!("/{name}"),
        }
    }

    fn generated_name(&self, parent: Option<Oid>, versionable: bool) -> String {
        let prefix = if versionable { "VERSION_" } else { "RESOURCE_" };
        let taken = self.children_of(parent);
        let mut n = taken.map_or(0, |c| c.keys().filter(|k| k.starts_with(prefix)).count());
        loop {
            let candidate = format!("{prefix}{n:07}");
            if !taken.is_some_and(|c| c.contains_key(&candidate)) {
                return candidate;
            }
            n += 1;
        }
    }

    // -----------------------------------------------------------------------
    // Items
    // -----------------------------------------------------------------------

    /// The item a version lives in: its parent, when that parent is an item.
    pub fn item_of(&self, oid: Oid) -> Option<Oid> {
        let item = self.store.registry().builtins().item;
        self.resources
            .get(&oid)?
            .parent
            .filter(|&parent| self.store.provides(parent, item))
    }

    pub fn item_tags(&self, item: Oid) -> ItemTags {
        ItemTags {
            first: self.child(item, names::FIRST_TAG),
            last: self.child(item, names::LAST_TAG),
        }
    }

    pub fn first(&self, item: Oid) -> Vec<Oid> {
        version::tagged(&self.store, self.item_tags(item).first)
    }

    pub fn last(&self, item: Oid) -> Vec<Oid> {
        version::tagged(&self.store, self.item_tags(item).last)
    }

    // -----------------------------------------------------------------------
    // Mutations
    // -----------------------------------------------------------------------

    /// Run `f` as one atomic unit.
    ///
    /// Nested calls join the outermost transaction: only the outermost call
    /// takes a checkpoint, and the changelog lives for it alone. A nested
    /// failure is undone when its error reaches the outermost call, so
    /// callers must not swallow it inside `f`.
    ///
    /// # Errors
    ///
    /// Whatever `f` returns; the outermost call rolls the pool back first.
    pub fn transaction<T>(
        &mut self,
        f: impl FnOnce(&mut Self) -> Result<T, GraphError>,
    ) -> Result<T, GraphError> {
        let checkpoint = (self.depth == 0).then(|| {
            self.changelog.clear();
            self.clone()
        });
        self.depth += 1;
        let result = f(self);
        self.depth -= 1;

        let Some(checkpoint) = checkpoint else {
            return result;
        };
        match result {
            Ok(value) => {
                self.changelog.clear();
                Ok(value)
            }
            Err(err) => {
                tracing::debug!(error = %err, "rolling back pool");
                *self = checkpoint;
                Err(err)
            }
        }
    }

    /// Create a resource and run everything its creation triggers.
    ///
    /// # Errors
    ///
    /// - [`GraphError::ResourceNotFound`] for a missing parent;
    /// - [`GraphError::InvalidName`] / [`GraphError::DuplicateName`];
    /// - [`GraphError::CapabilityMismatch`] / [`GraphError::UnknownField`]
    ///   for sheet data the resource does not declare;
    /// - [`GraphError::InvalidFollows`] for a bad predecessor list;
    /// - [`GraphError::NoForkAllowed`] from propagation.
    pub fn create(&mut self, new: NewResource) -> Result<Oid, GraphError> {
        self.transaction(|pool| {
            let oid = pool.materialize(new)?;
            pool.drain()?;
            Ok(oid)
        })
    }

    /// Edit one capability's sheet in place.
    ///
    /// # Errors
    ///
    /// [`GraphError::ReadOnly`] if the capability or any written field is
    /// read-only, plus the lookup errors of [`Pool::create`].
    pub fn update_sheet(
        &mut self,
        oid: Oid,
        capability: CapabilityId,
        data: &SheetData,
    ) -> Result<(), GraphError> {
        self.transaction(|pool| pool.write_sheet(oid, capability, data))
    }

    /// Remove `oid` and everything below it. Returns the removed oids.
    ///
    /// # Errors
    ///
    /// [`GraphError::ResourceNotFound`] if `oid` is unknown.
    pub fn remove(&mut self, oid: Oid) -> Result<Vec<Oid>, GraphError> {
        let resource = self.require(oid)?;
        let (parent, name) = (resource.parent, resource.name.clone());

        let mut removed = Vec::new();
        let mut stack = vec![oid];
        while let Some(current) = stack.pop() {
            if let Some(resource) = self.resources.remove(&current) {
                stack.extend(resource.children.values().copied());
                if let Some(index) = self.store.index_mut() {
                    index.unregister(current);
                }
                removed.push(current);
            }
        }

        match parent {
            Some(parent) => {
                if let Some(parent) = self.resources.get_mut(&parent) {
                    parent.children.remove(&name);
                }
            }
            None => {
                self.roots.remove(&name);
            }
        }
        tracing::debug!(%oid, removed = removed.len(), "resource removed");
        Ok(removed)
    }

    pub fn take_notifications(&mut self) -> Vec<Notification> {
        std::mem::take(&mut self.notifications)
    }

    // -----------------------------------------------------------------------
    // Sheets
    // -----------------------------------------------------------------------

    /// Current sheet data of `oid` for every capability it provides,
    /// skipping read-only capabilities. Reference fields are read back from
    /// the store by their exact reference type.
    ///
    /// # Errors
    ///
    /// [`GraphError::ResourceNotFound`] if `oid` is unknown.
    pub fn snapshot(&self, oid: Oid) -> Result<Appstructs, GraphError> {
        let resource = self.require(oid)?;
        let registry = self.store.registry();

        let provided: BTreeSet<CapabilityId> = resource
            .capabilities
            .iter()
            .flat_map(|&c| registry.capability(c).ancestors())
            .collect();

        let mut appstructs = Appstructs::new();
        for id in provided {
            let capability = registry.capability(id);
            if capability.readonly || capability.fields.is_empty() {
                continue;
            }
            let mut sheet = SheetData::new();
            for field in &capability.fields {
                if let Some(reftype) = field.reftype {
                    let targets = self.store.targets(oid, reftype);
                    sheet.insert(field.name.clone(), FieldValue::from_targets(field.kind, targets));
                } else if let Some(value) =
                    resource.values.get(&id).and_then(|s| s.get(&field.name))
                {
                    sheet.insert(field.name.clone(), value.clone());
                }
            }
            appstructs.insert(id, sheet);
        }
        Ok(appstructs)
    }

    fn write_sheet(
        &mut self,
        oid: Oid,
        capability: CapabilityId,
        data: &SheetData,
    ) -> Result<(), GraphError> {
        let registry = Arc::clone(self.store.registry_handle());
        let declared = registry.capability(capability);
        if !registry.provides(&self.require(oid)?.capabilities, capability) {
            return Err(GraphError::CapabilityMismatch {
                oid,
                capability: declared.name.clone(),
            });
        }
        if declared.readonly {
            return Err(GraphError::ReadOnly {
                capability: declared.name.clone(),
                field: None,
            });
        }
        for name in data.keys() {
            let field = declared.field(name).ok_or_else(|| GraphError::UnknownField {
                capability: declared.name.clone(),
                field: name.clone(),
            })?;
            if field.readonly {
                return Err(GraphError::ReadOnly {
                    capability: declared.name.clone(),
                    field: Some(name.clone()),
                });
            }
        }

        let changes = self
            .store
            .set_references_for_capability(oid, capability, data)?;
        self.publish_changes(&changes);
        self.store_values(oid, capability, data);
        self.notifications.push(Notification::SheetModified {
            oid,
            capability: declared.name.clone(),
        });
        Ok(())
    }

    /// Swap `old` for `new` in one reference field of an existing resource,
    /// bypassing read-only checks. Returns `false` if nothing changed.
    pub(crate) fn replace_in_place(
        &mut self,
        oid: Oid,
        capability: CapabilityId,
        field: &str,
        old: Oid,
        new: Oid,
    ) -> Result<bool, GraphError> {
        let registry = Arc::clone(self.store.registry_handle());
        let declared = registry.capability(capability);
        let spec = declared.field(field).ok_or_else(|| GraphError::UnknownField {
            capability: declared.name.clone(),
            field: field.to_string(),
        })?;
        let Some(reftype) = spec.reftype else {
            return Ok(false);
        };

        let mut value = FieldValue::from_targets(spec.kind, self.store.targets(oid, reftype));
        if !value.replace_reference(old, new) {
            return Ok(false);
        }
        let change = self.store.set_references(oid, value.references(), reftype)?;
        self.publish_changes(std::slice::from_ref(&change));
        self.notifications.push(Notification::SheetModified {
            oid,
            capability: declared.name.clone(),
        });
        Ok(true)
    }

    fn store_values(&mut self, oid: Oid, capability: CapabilityId, data: &SheetData) {
        let plain: Vec<(String, FieldValue)> = data
            .iter()
            .filter(|(_, value)| matches!(value, FieldValue::Value(_)))
            .map(|(name, value)| (name.clone(), value.clone()))
            .collect();
        if plain.is_empty() {
            return;
        }
        if let Some(resource) = self.resources.get_mut(&oid) {
            resource.values.entry(capability).or_default().extend(plain);
        }
    }

    fn publish_changes(&mut self, changes: &[ReferenceChange]) {
        for change in changes {
            let (Some(source), Some(reftype)) = (change.source, change.reftype) else {
                continue;
            };
            let reftype = self.store.registry().reftype(reftype).name.clone();
            for &target in change.added.iter().chain(&change.removed) {
                self.notifications.push(Notification::BackReferenceModified {
                    target,
                    source,
                    reftype: reftype.clone(),
                });
            }
        }
    }

    // -----------------------------------------------------------------------
    // Creation pathway
    // -----------------------------------------------------------------------

    /// Create one resource without draining the event queue.
    pub(crate) fn materialize(&mut self, new: NewResource) -> Result<Oid, GraphError> {
        let registry = Arc::clone(self.store.registry_handle());
        let b = *registry.builtins();
        let NewResource {
            parent,
            name,
            mut capabilities,
            mut sheets,
            follows,
            root_versions,
        } = new;

        if capabilities.is_empty() {
            capabilities.push(b.resource);
        }
        if let Some(parent) = parent {
            self.require(parent)?;
        }
        let versionable = registry.provides(&capabilities, b.versionable);
        let forkable = registry.provides(&capabilities, b.forkable);

        let name = match name {
            Some(name) if name.is_empty() || name.contains('/') => {
                return Err(GraphError::InvalidName(name));
            }
            Some(name) => name,
            None => self.generated_name(parent, versionable),
        };
        if self.children_of(parent).is_some_and(|c| c.contains_key(&name)) {
            return Err(GraphError::DuplicateName {
                parent: parent
                    .and_then(|p| self.path(p))
                    .unwrap_or_else(|| "/".to_string()),
                name,
            });
        }

        let oid = Oid::new(self.next_oid);
        self.next_oid += 1;

        if let Some(follows) = follows {
            sheets
                .entry(b.versionable)
                .or_default()
                .insert(names::FOLLOWS_FIELD.to_string(), FieldValue::References(follows));
        }
        for (&capability, data) in &sheets {
            let declared = registry.capability(capability);
            if !registry.provides(&capabilities, capability) {
                return Err(GraphError::CapabilityMismatch {
                    oid,
                    capability: declared.name.clone(),
                });
            }
            if let Some(field) = data.keys().find(|f| declared.field(f).is_none()) {
                return Err(GraphError::UnknownField {
                    capability: declared.name.clone(),
                    field: field.clone(),
                });
            }
        }

        let path = self.child_path(parent, &name);
        let item = parent.filter(|&p| self.store.provides(p, b.item));
        let predecessors = sheets
            .get(&b.versionable)
            .and_then(|sheet| sheet.get(names::FOLLOWS_FIELD))
            .map(FieldValue::references)
            .unwrap_or_default();
        if versionable {
            let tags = item.map(|item| self.item_tags(item));
            version::validate_follows(&self.store, tags, &predecessors, forkable, &path)?;
        }

        // Register, then write sheets.
        if let Some(index) = self.store.index_mut() {
            index.register(oid, capabilities.clone());
        }
        self.resources.insert(
            oid,
            Resource {
                oid,
                name: name.clone(),
                parent,
                capabilities: capabilities.clone(),
                values: Appstructs::new(),
                children: BTreeMap::new(),
            },
        );
        match parent {
            Some(parent) => {
                if let Some(parent) = self.resources.get_mut(&parent) {
                    parent.children.insert(name, oid);
                }
            }
            None => {
                self.roots.insert(name, oid);
            }
        }

        for (&capability, data) in &sheets {
            let changes = self
                .store
                .set_references_for_capability(oid, capability, data)?;
            self.publish_changes(&changes);
            self.store_values(oid, capability, data);
        }
        tracing::debug!(%oid, path = %path, "resource created");
        self.notifications.push(Notification::ResourceCreated {
            oid,
            path: path.clone(),
        });

        if registry.provides(&capabilities, b.item) {
            for tag in [names::FIRST_TAG, names::LAST_TAG] {
                self.materialize(NewResource::new([b.tag]).parent(oid).named(tag))?;
            }
        }

        if versionable {
            self.changelog.record(oid, &predecessors);
            if let Some(item) = item {
                let tags = self.item_tags(item);
                version::update_tags(&mut self.store, tags, oid, &predecessors, forkable)?;
            }
            self.notifications.push(Notification::VersionCreated {
                item,
                version: oid,
                follows: predecessors.clone(),
            });
            self.queue.push_back(GraphEvent::VersionCreated {
                item,
                version: oid,
                follows: predecessors,
                root_versions,
            });
        }
        Ok(oid)
    }

    fn drain(&mut self) -> Result<(), GraphError> {
        while let Some(event) = self.queue.pop_front() {
            self.dispatch(event)?;
        }
        Ok(())
    }

    fn dispatch(&mut self, event: GraphEvent) -> Result<(), GraphError> {
        match event {
            GraphEvent::VersionCreated {
                version,
                follows,
                root_versions,
                ..
            } => {
                if !self.propagation.enabled {
                    tracing::trace!(%version, "propagation disabled");
                    return Ok(());
                }
                for old in follows {
                    autoupdate::propagate(self, old, version, &root_versions)?;
                }
                Ok(())
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
