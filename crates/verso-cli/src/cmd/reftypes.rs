//! `verso reftypes` — list reference types matching a capability/base filter.

use std::io::Write;
use std::path::PathBuf;

use clap::Args;
use serde::Serialize;
use verso_core::GraphError;
use verso_core::schema::Registry;

use crate::output::{CliError, OutputMode, pretty_section, render_error, render_mode};

/// Arguments for `verso reftypes`.
#[derive(Args, Debug)]
pub struct ReftypesArgs {
    /// Schema TOML file.
    pub schema: PathBuf,

    /// Only reference types whose source capability extends this one.
    #[arg(long)]
    pub capability: Option<String>,

    /// Only reference types extending this base type.
    #[arg(long)]
    pub base: Option<String>,
}

#[derive(Debug, Serialize)]
struct ReftypeRow {
    name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    extends: Option<String>,
    source: String,
    field: String,
    target: String,
}

/// Execute `verso reftypes`.
pub fn run_reftypes(args: &ReftypesArgs, output: OutputMode) -> anyhow::Result<()> {
    let (_, registry) = super::load_registry(&args.schema, output)?;

    match reftype_rows(&registry, args.capability.as_deref(), args.base.as_deref()) {
        Ok(rows) => render_mode(output, &rows, render_text, render_pretty),
        Err(err) => {
            render_error(output, &CliError::from(&err))?;
            anyhow::bail!("{err}");
        }
    }
}

fn reftype_rows(
    registry: &Registry,
    capability: Option<&str>,
    base: Option<&str>,
) -> Result<Vec<ReftypeRow>, GraphError> {
    let builtins = registry.builtins();
    let base_capability = capability
        .map(|name| registry.require_capability(name))
        .transpose()?
        .unwrap_or(builtins.resource);
    let base_reftype = base
        .map(|name| {
            registry
                .reftype_id(name)
                .ok_or_else(|| GraphError::InvalidReftype {
                    reftype: name.to_string(),
                    base: registry.reftype(builtins.sheet_reference).name.clone(),
                })
        })
        .transpose()?
        .unwrap_or(builtins.sheet_reference);

    let mut rows: Vec<ReftypeRow> = registry
        .get_reftypes(base_capability, base_reftype)
        .map(|m| ReftypeRow {
            name: m.reftype.name.clone(),
            extends: m.reftype.extends.map(|id| registry.reftype(id).name.clone()),
            source: registry.capability(m.capability).name.clone(),
            field: m.field.to_string(),
            target: registry.capability(m.reftype.target_capability).name.clone(),
        })
        .collect();
    rows.sort_by(|a, b| a.name.cmp(&b.name));
    Ok(rows)
}

fn render_text(rows: &Vec<ReftypeRow>, w: &mut dyn Write) -> std::io::Result<()> {
    for row in rows {
        writeln!(
            w,
            "{}  {}.{} -> {}",
            row.name, row.source, row.field, row.target
        )?;
    }
    Ok(())
}

fn render_pretty(rows: &Vec<ReftypeRow>, w: &mut dyn Write) -> std::io::Result<()> {
    pretty_section(w, &format!("Reference types ({})", rows.len()))?;
    if rows.is_empty() {
        writeln!(w, "(none)")?;
    }
    for row in rows {
        let parent = row.extends.as_deref().unwrap_or("-");
        writeln!(
            w,
            "{:<24} {}.{} → {}  [extends {parent}]",
            row.name, row.source, row.field, row.target
        )?;
    }
    Ok(())
}
