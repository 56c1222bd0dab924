//! Rendering shared by every `verso` command.
//!
//! Each command builds one serializable report and hands it to
//! [`render_mode`] together with a text and a pretty renderer. Failures go
//! through [`render_error`] so stderr carries the same `E####` codes in
//! every mode.
//!
//! The mode comes from `--format` (or `--json`), then `FORMAT`, and falls
//! back to pretty on a terminal and text when piped.

use clap::ValueEnum;
use serde::Serialize;
use std::io::{self, IsTerminal, Write};
use verso_core::{ErrorCode, GraphError, SchemaError};

const RULE_WIDTH: usize = 72;

pub fn pretty_rule(w: &mut dyn Write) -> io::Result<()> {
    writeln!(w, "{}", "-".repeat(RULE_WIDTH))
}

/// Heading line underlined by [`pretty_rule`].
pub fn pretty_section(w: &mut dyn Write, heading: &str) -> io::Result<()> {
    writeln!(w, "{heading}")?;
    pretty_rule(w)
}

pub fn pretty_kv(w: &mut dyn Write, key: &str, value: impl AsRef<str>) -> io::Result<()> {
    writeln!(w, "{:<14} {}", format!("{key}:"), value.as_ref())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum OutputMode {
    /// Headed sections for a terminal.
    Pretty,
    /// One line per record, for pipes and scripts.
    Text,
    /// Pretty-printed JSON reports.
    Json,
}

impl OutputMode {
    fn from_env(value: &str) -> Option<Self> {
        Self::from_str(value, true).ok()
    }
}

fn pick_mode(flag: Option<OutputMode>, json: bool, env: Option<&str>, tty: bool) -> OutputMode {
    flag.or_else(|| json.then_some(OutputMode::Json))
        .or_else(|| env.and_then(OutputMode::from_env))
        .unwrap_or(if tty { OutputMode::Pretty } else { OutputMode::Text })
}

/// Mode for this invocation, given the parsed `--format` and `--json` flags.
pub fn resolve_output_mode(flag: Option<OutputMode>, json: bool) -> OutputMode {
    let env = std::env::var("FORMAT").ok();
    pick_mode(flag, json, env.as_deref(), io::stdout().is_terminal())
}

/// Write `report` to stdout in `mode`.
pub fn render_mode<T: Serialize>(
    mode: OutputMode,
    report: &T,
    text: impl FnOnce(&T, &mut dyn Write) -> io::Result<()>,
    pretty: impl FnOnce(&T, &mut dyn Write) -> io::Result<()>,
) -> anyhow::Result<()> {
    let mut out = io::stdout().lock();
    match mode {
        OutputMode::Json => {
            serde_json::to_writer_pretty(&mut out, report)?;
            writeln!(out)?;
        }
        OutputMode::Text => text(report, &mut out)?,
        OutputMode::Pretty => pretty(report, &mut out)?,
    }
    Ok(())
}

/// Error report written to stderr. Library errors carry their stable code
/// and the code's hint; script and I/O problems have neither.
#[derive(Debug, Serialize)]
pub struct CliError {
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_code: Option<&'static str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hint: Option<&'static str>,
}

impl CliError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            error_code: None,
            hint: None,
        }
    }

    pub fn from_code(message: impl Into<String>, code: ErrorCode) -> Self {
        Self {
            message: message.into(),
            error_code: Some(code.code()),
            hint: code.hint(),
        }
    }
}

impl From<&GraphError> for CliError {
    fn from(err: &GraphError) -> Self {
        Self::from_code(err.to_string(), err.code())
    }
}

impl From<&SchemaError> for CliError {
    fn from(err: &SchemaError) -> Self {
        Self::from_code(err.to_string(), err.code())
    }
}

pub fn render_error(mode: OutputMode, error: &CliError) -> anyhow::Result<()> {
    let mut out = io::stderr().lock();
    if mode == OutputMode::Json {
        serde_json::to_writer_pretty(&mut out, &serde_json::json!({ "error": error }))?;
        writeln!(out)?;
        return Ok(());
    }
    let tag = error
        .error_code
        .map_or_else(|| "error".to_string(), |code| format!("error[{code}]"));
    writeln!(out, "{tag}: {}", error.message)?;
    if let Some(hint) = error.hint {
        writeln!(out, "  hint: {hint}")?;
    }
    Ok(())
}
