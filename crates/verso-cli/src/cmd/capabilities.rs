//! `verso capabilities` — list capabilities with ancestors and fields.

use std::io::Write;
use std::path::PathBuf;

use clap::Args;
use serde::Serialize;
use verso_core::schema::Registry;

use crate::output::{OutputMode, pretty_kv, pretty_rule, render_mode};

/// Arguments for `verso capabilities`.
#[derive(Args, Debug)]
pub struct CapabilitiesArgs {
    /// Schema TOML file.
    pub schema: PathBuf,
}

#[derive(Debug, Serialize)]
struct CapabilityRow {
    name: String,
    extends: Vec<String>,
    ancestors: Vec<String>,
    readonly: bool,
    fields: Vec<FieldRow>,
}

#[derive(Debug, Serialize)]
struct FieldRow {
    name: String,
    kind: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    reftype: Option<String>,
    readonly: bool,
}

/// Execute `verso capabilities`.
pub fn run_capabilities(args: &CapabilitiesArgs, output: OutputMode) -> anyhow::Result<()> {
    let (_, registry) = super::load_registry(&args.schema, output)?;
    let rows = capability_rows(&registry);
    render_mode(output, &rows, render_text, render_pretty)
}

fn capability_rows(registry: &Registry) -> Vec<CapabilityRow> {
    registry
        .capabilities()
        .map(|capability| {
            let mut ancestors: Vec<String> = capability
                .ancestors()
                .filter(|&id| id != capability.id)
                .map(|id| registry.capability(id).name.clone())
                .collect();
            ancestors.sort();

            CapabilityRow {
                name: capability.name.clone(),
                extends: capability
                    .extends
                    .iter()
                    .map(|&id| registry.capability(id).name.clone())
                    .collect(),
                ancestors,
                readonly: capability.readonly,
                fields: capability
                    .fields
                    .iter()
                    .map(|field| FieldRow {
                        name: field.name.clone(),
                        kind: field.kind.as_str(),
                        reftype: field.reftype.map(|id| registry.reftype(id).name.clone()),
                        readonly: field.readonly,
                    })
                    .collect(),
            }
        })
        .collect()
}

fn render_text(rows: &Vec<CapabilityRow>, w: &mut dyn Write) -> std::io::Result<()> {
    writeln!(w, "name  extends  fields")?;
    for row in rows {
        let fields: Vec<&str> = row.fields.iter().map(|f| f.name.as_str()).collect();
        writeln!(
            w,
            "{}  {}  {}",
            row.name,
            if row.extends.is_empty() { "-".to_string() } else { row.extends.join(",") },
            if fields.is_empty() { "-".to_string() } else { fields.join(",") },
        )?;
    }
    Ok(())
}

fn render_pretty(rows: &Vec<CapabilityRow>, w: &mut dyn Write) -> std::io::Result<()> {
    writeln!(w, "Capabilities ({})", rows.len())?;
    for row in rows {
        pretty_rule(w)?;
        let title = if row.readonly {
            format!("{} (read-only)", row.name)
        } else {
            row.name.clone()
        };
        writeln!(w, "{title}")?;
        if !row.ancestors.is_empty() {
            pretty_kv(w, "ancestors", row.ancestors.join(", "))?;
        }
        for field in &row.fields {
            let mut line = field.kind.to_string();
            if let Some(reftype) = &field.reftype {
                line.push_str(&format!(" → {reftype}"));
            }
            if field.readonly {
                line.push_str(" (read-only)");
            }
            pretty_kv(w, &format!("  {}", field.name), line)?;
        }
    }
    Ok(())
}
