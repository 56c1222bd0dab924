//! `verso check` — validate a schema file.

use std::io::Write;
use std::path::PathBuf;

use clap::Args;
use serde::Serialize;

use crate::output::{OutputMode, pretty_kv, pretty_section, render_mode};

/// Arguments for `verso check`.
#[derive(Args, Debug)]
pub struct CheckArgs {
    /// Schema TOML file.
    pub schema: PathBuf,
}

#[derive(Debug, Serialize)]
struct CheckOutput {
    ok: bool,
    schema: String,
    capabilities: usize,
    reftypes: usize,
    propagation: bool,
}

/// Execute `verso check`.
pub fn run_check(args: &CheckArgs, output: OutputMode) -> anyhow::Result<()> {
    let (config, registry) = super::load_registry(&args.schema, output)?;

    let report = CheckOutput {
        ok: true,
        schema: args.schema.display().to_string(),
        capabilities: registry.capabilities().count(),
        reftypes: registry.reftypes().count(),
        propagation: config.propagation.enabled,
    };
    tracing::debug!(schema = %report.schema, "schema is valid");

    render_mode(output, &report, render_text, render_pretty)
}

fn render_text(report: &CheckOutput, w: &mut dyn Write) -> std::io::Result<()> {
    writeln!(
        w,
        "ok  capabilities={}  reftypes={}  propagation={}",
        report.capabilities, report.reftypes, report.propagation
    )
}

fn render_pretty(report: &CheckOutput, w: &mut dyn Write) -> std::io::Result<()> {
    pretty_section(w, &format!("Schema {}", report.schema))?;
    pretty_kv(w, "capabilities", report.capabilities.to_string())?;
    pretty_kv(w, "reftypes", report.reftypes.to_string())?;
    pretty_kv(
        w,
        "propagation",
        if report.propagation { "enabled" } else { "disabled" },
    )?;
    writeln!(w, "✓ schema is valid")
}
