use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::schema::FieldKind;

/// Project schema: capability and reference type declarations plus runtime
/// switches. Built-in capabilities and reference types are always present
/// and must not be redeclared here.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SchemaConfig {
    #[serde(default)]
    pub propagation: PropagationConfig,
    #[serde(default, rename = "capability")]
    pub capabilities: Vec<CapabilityConfig>,
    #[serde(default, rename = "reftype")]
    pub reftypes: Vec<ReftypeConfig>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PropagationConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
}

impl Default for PropagationConfig {
    fn default() -> Self {
        Self {
            enabled: default_true(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CapabilityConfig {
    pub name: String,
    #[serde(default)]
    pub extends: Vec<String>,
    #[serde(default)]
    pub readonly: bool,
    #[serde(default, rename = "field")]
    pub fields: Vec<FieldConfig>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldConfig {
    pub name: String,
    #[serde(default)]
    pub kind: FieldKind,
    #[serde(default)]
    pub reftype: Option<String>,
    #[serde(default)]
    pub readonly: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReftypeConfig {
    pub name: String,
    /// Supertype; `sheet_to_sheet` when omitted.
    #[serde(default)]
    pub extends: Option<String>,
    pub source: String,
    pub field: String,
    pub target: String,
}

/// Load a schema from an explicit path.
pub fn load_schema_config(path: &Path) -> Result<SchemaConfig> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read {}", path.display()))?;

    parse_schema_config(&content).with_context(|| format!("Failed to parse {}", path.display()))
}

/// Load `<project_root>/.verso/schema.toml`, falling back to the built-in
/// schema when the file does not exist.
pub fn load_project_schema(project_root: &Path) -> Result<SchemaConfig> {
    let path = project_root.join(".verso/schema.toml");
    if !path.exists() {
        return Ok(SchemaConfig::default());
    }
    load_schema_config(&path)
}

pub fn parse_schema_config(content: &str) -> Result<SchemaConfig> {
    Ok(toml::from_str::<SchemaConfig>(content)?)
}

const fn default_true() -> bool {
    true
}
