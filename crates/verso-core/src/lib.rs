//! verso-core library.
//!
//! A versioned resource reference graph: typed directed edges between
//! resources keyed by identity, a `follows` predecessor chain for version
//! history, FIRST/LAST tag maintenance per item, and propagation of new
//! versions to the resources that reference them.
//!
//! # Layout
//!
//! - [`schema`]: capabilities (sheets) and reference types, built once.
//! - [`sheet`]: field values exchanged with the store and the pool.
//! - [`store`]: the reference store over a host [`store::ObjectMap`].
//! - [`graph`]: grouped, subtree and version-chain queries on the store.
//! - [`version`]: follows validation and FIRST/LAST tag maintenance.
//! - [`autoupdate`]: back-reference propagation of new versions.
//! - [`pool`]: in-memory host: resource creation pathway and transactions.
//! - [`event`]: queued work and published notifications.
//! - [`config`]: the TOML schema file.
//!
//! # Conventions
//!
//! - **Errors**: [`GraphError`] / [`SchemaError`] for library operations,
//!   `anyhow::Result` at file and configuration boundaries.
//! - **Logging**: Use `tracing` macros (`info!`, `warn!`, `debug!`, `trace!`).

pub mod autoupdate;
pub mod config;
pub mod error;
pub mod event;
pub mod graph;
pub mod pool;
pub mod schema;
pub mod sheet;
pub mod store;
pub mod version;

use std::fmt;

use serde::{Deserialize, Serialize};

pub use error::{ErrorCode, GraphError, SchemaError};

/// Stable integer identity of a resource.
///
/// The graph only ever stores oids; resources themselves are owned by the
/// host content system.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Oid(u64);

impl Oid {
    #[must_use]
    pub const fn new(raw: u64) -> Self {
        Self(raw)
    }

    #[must_use]
    pub const fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for Oid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}
