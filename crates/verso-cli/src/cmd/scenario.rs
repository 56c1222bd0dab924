//! `verso scenario` — replay a JSON script of resource operations against an
//! in-memory pool and report the resulting tree.
//!
//! ```json
//! { "steps": [
//!     { "create": "doc", "capabilities": ["proposal"] },
//!     { "create": "v0", "parent": "doc", "capabilities": ["paragraph"],
//!       "sheets": { "paragraph": { "text": "Hello" } } },
//!     { "batch": [
//!         { "create": "v1", "parent": "doc", "capabilities": ["paragraph"],
//!           "follows": ["v0"] }
//!     ] },
//!     { "update": "v1", "capability": "paragraph", "sheet": { "text": "Hi" } }
//! ] }
//! ```
//!
//! Labels name resources created earlier in the script. Reference fields
//! take a label (or `null`), list and set fields take an array of labels,
//! value fields take any JSON. A `batch` runs as one transaction.
//!
//! The script is planned before anything runs, so unknown labels,
//! capabilities and fields are reported without touching the pool.

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::io::Write;
use std::path::PathBuf;

use anyhow::Context as _;
use clap::Args;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use verso_core::config::SchemaConfig;
use verso_core::event::Notification;
use verso_core::pool::{NewResource, Pool};
use verso_core::schema::{CapabilityId, FieldKind, Registry};
use verso_core::sheet::{FieldValue, SheetData};
use verso_core::{GraphError, Oid};

use crate::output::{CliError, OutputMode, pretty_kv, pretty_section, render_error, render_mode};

/// Arguments for `verso scenario`.
#[derive(Args, Debug)]
pub struct ScenarioArgs {
    /// Schema TOML file.
    pub schema: PathBuf,

    /// JSON scenario script.
    pub script: PathBuf,
}

// ---------------------------------------------------------------------------
// Script format
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct Script {
    steps: Vec<Step>,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum Step {
    Create(CreateStep),
    Update(UpdateStep),
    Batch(BatchStep),
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct CreateStep {
    create: String,
    #[serde(default)]
    parent: Option<String>,
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    capabilities: Vec<String>,
    #[serde(default)]
    follows: Option<Vec<String>>,
    #[serde(default)]
    sheets: BTreeMap<String, BTreeMap<String, Value>>,
    #[serde(default)]
    root_versions: Vec<String>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct UpdateStep {
    update: String,
    capability: String,
    sheet: BTreeMap<String, Value>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct BatchStep {
    batch: Vec<Step>,
}

// ---------------------------------------------------------------------------
// Planning
// ---------------------------------------------------------------------------

/// A label resolved to its creation slot: the n-th resource the script
/// creates.
type Slot = usize;

#[derive(Debug)]
enum Op {
    Create(PlannedResource),
    Update {
        target: Slot,
        capability: CapabilityId,
        sheet: Vec<(String, PlannedValue)>,
    },
    Batch(Vec<Op>),
}

#[derive(Debug)]
struct PlannedResource {
    parent: Option<Slot>,
    name: Option<String>,
    capabilities: Vec<CapabilityId>,
    sheets: Vec<(CapabilityId, String, PlannedValue)>,
    follows: Option<Vec<Slot>>,
    root_versions: Vec<Slot>,
}

#[derive(Debug)]
enum PlannedValue {
    Value(Value),
    Reference(Option<Slot>),
    References(Vec<Slot>),
}

#[derive(Debug)]
enum PlanError {
    Graph(GraphError),
    Script(String),
}

impl From<GraphError> for PlanError {
    fn from(err: GraphError) -> Self {
        Self::Graph(err)
    }
}

impl fmt::Display for PlanError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Graph(err) => write!(f, "{err}"),
            Self::Script(message) => f.write_str(message),
        }
    }
}

struct Planner<'r> {
    registry: &'r Registry,
    labels: HashMap<String, Slot>,
    order: Vec<String>,
}

impl<'r> Planner<'r> {
    fn new(registry: &'r Registry) -> Self {
        Self {
            registry,
            labels: HashMap::new(),
            order: Vec::new(),
        }
    }

    fn plan(&mut self, steps: &[Step]) -> Result<Vec<Op>, PlanError> {
        steps.iter().map(|step| self.plan_step(step)).collect()
    }

    fn plan_step(&mut self, step: &Step) -> Result<Op, PlanError> {
        match step {
            Step::Create(create) => self.plan_create(create),
            Step::Update(update) => {
                let target = self.slot(&update.update)?;
                let capability = self.registry.require_capability(&update.capability)?;
                let sheet = update
                    .sheet
                    .iter()
                    .map(|(field, value)| {
                        Ok((field.clone(), self.plan_value(capability, field, value)?))
                    })
                    .collect::<Result<_, PlanError>>()?;
                Ok(Op::Update {
                    target,
                    capability,
                    sheet,
                })
            }
            Step::Batch(batch) => Ok(Op::Batch(self.plan(&batch.batch)?)),
        }
    }

    fn plan_create(&mut self, create: &CreateStep) -> Result<Op, PlanError> {
        if self.labels.contains_key(&create.create) {
            return Err(PlanError::Script(format!(
                "label '{}' is defined twice",
                create.create
            )));
        }

        let parent = create.parent.as_deref().map(|l| self.slot(l)).transpose()?;
        let capabilities = create
            .capabilities
            .iter()
            .map(|name| self.registry.require_capability(name))
            .collect::<Result<Vec<_>, _>>()?;

        let mut sheets = Vec::new();
        for (capability_name, fields) in &create.sheets {
            let capability = self.registry.require_capability(capability_name)?;
            for (field, value) in fields {
                sheets.push((
                    capability,
                    field.clone(),
                    self.plan_value(capability, field, value)?,
                ));
            }
        }

        let follows = create
            .follows
            .as_ref()
            .map(|labels| self.slots(labels))
            .transpose()?;
        let root_versions = self.slots(&create.root_versions)?;

        self.labels.insert(create.create.clone(), self.order.len());
        self.order.push(create.create.clone());

        Ok(Op::Create(PlannedResource {
            parent,
            name: create.name.clone(),
            capabilities,
            sheets,
            follows,
            root_versions,
        }))
    }

    fn plan_value(
        &self,
        capability: CapabilityId,
        field: &str,
        value: &Value,
    ) -> Result<PlannedValue, PlanError> {
        let spec = self.registry.capability(capability);
        let Some(kind) = spec.field(field).map(|f| f.kind) else {
            return Err(GraphError::UnknownField {
                capability: spec.name.clone(),
                field: field.to_string(),
            }
            .into());
        };

        match (kind, value) {
            (FieldKind::Value, _) => Ok(PlannedValue::Value(value.clone())),
            (FieldKind::Reference, Value::Null) => Ok(PlannedValue::Reference(None)),
            (FieldKind::Reference, Value::String(label)) => {
                Ok(PlannedValue::Reference(Some(self.slot(label)?)))
            }
            (FieldKind::List | FieldKind::Set, Value::Array(items)) => {
                let labels = items
                    .iter()
                    .map(|item| {
                        item.as_str().map(str::to_string).ok_or_else(|| {
                            PlanError::Script(format!(
                                "{}.{field} expects an array of labels",
                                spec.name
                            ))
                        })
                    })
                    .collect::<Result<Vec<_>, _>>()?;
                Ok(PlannedValue::References(self.slots(&labels)?))
            }
            (kind, _) => Err(PlanError::Script(format!(
                "{}.{field} is a {} field and cannot hold {value}",
                spec.name,
                kind.as_str()
            ))),
        }
    }

    fn slot(&self, label: &str) -> Result<Slot, PlanError> {
        self.labels.get(label).copied().ok_or_else(|| {
            PlanError::Script(format!("label '{label}' is used before it is created"))
        })
    }

    fn slots(&self, labels: &[String]) -> Result<Vec<Slot>, PlanError> {
        labels.iter().map(|l| self.slot(l)).collect()
    }
}

// ---------------------------------------------------------------------------
// Execution
// ---------------------------------------------------------------------------

/// Run `ops` against `pool`, appending created oids to `created` in slot
/// order.
fn execute(pool: &mut Pool, ops: &[Op], created: &mut Vec<Oid>) -> Result<(), GraphError> {
    for op in ops {
        match op {
            Op::Create(planned) => {
                let oid = pool.create(resolve_resource(planned, created))?;
                created.push(oid);
            }
            Op::Update {
                target,
                capability,
                sheet,
            } => {
                let data: SheetData = sheet
                    .iter()
                    .map(|(field, value)| (field.clone(), resolve_value(value, created)))
                    .collect();
                pool.update_sheet(created[*target], *capability, &data)?;
            }
            Op::Batch(batch) => {
                let mark = created.len();
                let result = pool.transaction(|pool| execute(pool, batch, created));
                if result.is_err() {
                    created.truncate(mark);
                }
                result?;
            }
        }
    }
    Ok(())
}

fn resolve_resource(planned: &PlannedResource, created: &[Oid]) -> NewResource {
    let mut new = NewResource::new(planned.capabilities.iter().copied())
        .root_versions(planned.root_versions.iter().map(|&s| created[s]));
    if let Some(parent) = planned.parent {
        new = new.parent(created[parent]);
    }
    if let Some(name) = &planned.name {
        new = new.named(name.clone());
    }
    if let Some(follows) = &planned.follows {
        new = new.follows(follows.iter().map(|&s| created[s]));
    }
    for (capability, field, value) in &planned.sheets {
        new = new.field(*capability, field.clone(), resolve_value(value, created));
    }
    new
}

fn resolve_value(value: &PlannedValue, created: &[Oid]) -> FieldValue {
    match value {
        PlannedValue::Value(json) => FieldValue::Value(json.clone()),
        PlannedValue::Reference(slot) => FieldValue::Reference(slot.map(|s| created[s])),
        PlannedValue::References(slots) => {
            FieldValue::References(slots.iter().map(|&s| created[s]).collect())
        }
    }
}

// ---------------------------------------------------------------------------
// Report
// ---------------------------------------------------------------------------

#[derive(Debug, Serialize)]
struct ScenarioReport {
    steps: usize,
    resources: Vec<ResourceRow>,
    items: Vec<ItemRow>,
    notifications: Vec<Notification>,
}

#[derive(Debug, Serialize)]
struct ResourceRow {
    #[serde(skip_serializing_if = "Option::is_none")]
    label: Option<String>,
    oid: Oid,
    path: String,
    capabilities: Vec<String>,
}

#[derive(Debug, Serialize)]
struct ItemRow {
    path: String,
    first: Vec<String>,
    last: Vec<String>,
}

fn build_report(
    pool: &mut Pool,
    steps: usize,
    labels: &[String],
    created: &[Oid],
) -> ScenarioReport {
    let by_oid: HashMap<Oid, &String> = created.iter().copied().zip(labels).collect();
    let registry = pool.registry();
    let item = registry.builtins().item;
    let path_of = |oid: Oid| pool.path(oid).unwrap_or_else(|| oid.to_string());

    let mut resources = Vec::new();
    let mut items = Vec::new();
    for resource in pool.resources() {
        let path = path_of(resource.oid);
        if registry.provides(&resource.capabilities, item) {
            items.push(ItemRow {
                path: path.clone(),
                first: pool.first(resource.oid).into_iter().map(path_of).collect(),
                last: pool.last(resource.oid).into_iter().map(path_of).collect(),
            });
        }
        resources.push(ResourceRow {
            label: by_oid.get(&resource.oid).map(|l| (*l).clone()),
            oid: resource.oid,
            path,
            capabilities: resource
                .capabilities
                .iter()
                .map(|&c| registry.capability(c).name.clone())
                .collect(),
        });
    }

    ScenarioReport {
        steps,
        resources,
        items,
        notifications: pool.take_notifications(),
    }
}

fn render_text(report: &ScenarioReport, w: &mut dyn Write) -> std::io::Result<()> {
    for row in &report.resources {
        writeln!(
            w,
            "{}  {}  {}",
            row.oid,
            row.path,
            row.capabilities.join(",")
        )?;
    }
    for item in &report.items {
        writeln!(
            w,
            "item {}  first={}  last={}",
            item.path,
            item.first.join(","),
            item.last.join(",")
        )?;
    }
    Ok(())
}

fn render_pretty(report: &ScenarioReport, w: &mut dyn Write) -> std::io::Result<()> {
    pretty_section(
        w,
        &format!(
            "Scenario: {} steps, {} resources",
            report.steps,
            report.resources.len()
        ),
    )?;
    for row in &report.resources {
        let label = row.label.as_deref().map_or_else(String::new, |l| format!(" ({l})"));
        writeln!(w, "{:>5}  {}{label}", row.oid, row.path)?;
    }
    for item in &report.items {
        writeln!(w)?;
        pretty_section(w, &format!("Item {}", item.path))?;
        pretty_kv(w, "FIRST", item.first.join(", "))?;
        pretty_kv(w, "LAST", item.last.join(", "))?;
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Command
// ---------------------------------------------------------------------------

fn load_script(path: &std::path::Path) -> anyhow::Result<Script> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read script {}", path.display()))?;
    serde_json::from_str(&content)
        .with_context(|| format!("failed to parse script {}", path.display()))
}

fn pool_for(config: &SchemaConfig, registry: Registry) -> Pool {
    Pool::new(std::sync::Arc::new(registry)).with_propagation(config.propagation.clone())
}

/// Execute `verso scenario`.
pub fn run_scenario(args: &ScenarioArgs, output: OutputMode) -> anyhow::Result<()> {
    let (config, registry) = super::load_registry(&args.schema, output)?;
    let script = match load_script(&args.script) {
        Ok(script) => script,
        Err(err) => {
            render_error(output, &CliError::new(format!("{err:#}")))?;
            anyhow::bail!("invalid scenario script");
        }
    };

    let mut planner = Planner::new(&registry);
    let ops = match planner.plan(&script.steps) {
        Ok(ops) => ops,
        Err(err) => {
            let cli_error = match &err {
                PlanError::Graph(graph) => CliError::from(graph),
                PlanError::Script(message) => CliError::new(message.clone()),
            };
            render_error(output, &cli_error)?;
            anyhow::bail!("{err}");
        }
    };
    let labels = planner.order;

    let mut pool = pool_for(&config, registry);
    let mut created = Vec::with_capacity(labels.len());
    if let Err(err) = execute(&mut pool, &ops, &mut created) {
        tracing::debug!(error = %err, created = created.len(), "scenario aborted");
        render_error(output, &CliError::from(&err))?;
        anyhow::bail!("{err}");
    }
    tracing::info!(
        steps = script.steps.len(),
        resources = pool.len(),
        "scenario finished"
    );

    let report = build_report(&mut pool, script.steps.len(), &labels, &created);
    render_mode(output, &report, render_text, render_pretty)
}
