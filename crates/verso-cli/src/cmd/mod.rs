pub mod capabilities;
pub mod check;
pub mod reftypes;
pub mod scenario;

use std::path::Path;

use verso_core::ErrorCode;
use verso_core::config::{SchemaConfig, load_schema_config};
use verso_core::schema::Registry;

use crate::output::{CliError, OutputMode, render_error};

/// Load and build a schema, rendering failures with their error code.
pub fn load_registry(path: &Path, output: OutputMode) -> anyhow::Result<(SchemaConfig, Registry)> {
    let config = match load_schema_config(path) {
        Ok(config) => config,
        Err(err) => {
            render_error(
                output,
                &CliError::from_code(format!("{err:#}"), ErrorCode::SchemaParseError),
            )?;
            anyhow::bail!("failed to load schema");
        }
    };

    match Registry::from_config(&config) {
        Ok(registry) => Ok((config, registry)),
        Err(err) => {
            render_error(output, &CliError::from(&err))?;
            anyhow::bail!("invalid schema");
        }
    }
}
