//! Error types and machine-readable error codes.
//!
//! [`SchemaError`] covers registry construction; [`GraphError`] covers
//! runtime graph and pool operations. Both map onto a stable [`ErrorCode`]
//! so callers (the CLI, a REST layer) can branch without parsing messages.

use std::fmt;

use crate::Oid;

/// Machine-readable error codes for agent-friendly decision making.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCode {
    SchemaParseError,
    UnknownCapability,
    UnknownReftype,
    SchemaInvalid,
    ResourceNotFound,
    InvalidFollows,
    ForkNotAllowed,
    CapabilityMismatch,
    ReadOnlyField,
    DuplicateName,
    UnknownField,
    InvalidName,
    InternalUnexpected,
}

impl ErrorCode {
    /// Stable code identifier (`E####`) for machine parsing.
    #[must_use]
    pub const fn code(self) -> &'static str {
        match self {
            Self::SchemaParseError => "E1001",
            Self::UnknownCapability => "E1002",
            Self::UnknownReftype => "E1003",
            Self::SchemaInvalid => "E1004",
            Self::ResourceNotFound => "E2001",
            Self::InvalidFollows => "E2002",
            Self::ForkNotAllowed => "E2003",
            Self::CapabilityMismatch => "E2004",
            Self::ReadOnlyField => "E2005",
            Self::DuplicateName => "E2006",
            Self::UnknownField => "E2007",
            Self::InvalidName => "E2008",
            Self::InternalUnexpected => "E9001",
        }
    }

    /// Short human-facing summary for logs and terminal output.
    #[must_use]
    pub const fn message(self) -> &'static str {
        match self {
            Self::SchemaParseError => "Schema file parse error",
            Self::UnknownCapability => "Unknown capability",
            Self::UnknownReftype => "Unknown reference type",
            Self::SchemaInvalid => "Invalid schema declaration",
            Self::ResourceNotFound => "Resource not found",
            Self::InvalidFollows => "Invalid version predecessors",
            Self::ForkNotAllowed => "No fork allowed",
            Self::CapabilityMismatch => "Resource does not provide capability",
            Self::ReadOnlyField => "Read-only sheet or field",
            Self::DuplicateName => "Duplicate resource name",
            Self::UnknownField => "Unknown sheet field",
            Self::InvalidName => "Invalid resource name",
            Self::InternalUnexpected => "Internal unexpected error",
        }
    }

    /// Optional remediation hint that can be surfaced to operators and agents.
    #[must_use]
    pub const fn hint(self) -> Option<&'static str> {
        match self {
            Self::SchemaParseError => Some("Fix syntax in the schema TOML file and retry."),
            Self::UnknownCapability | Self::UnknownReftype => {
                Some("Declare the name in the schema before referring to it.")
            }
            Self::SchemaInvalid => Some("Run `verso check` on the schema for details."),
            Self::ResourceNotFound | Self::DuplicateName | Self::UnknownField => None,
            Self::InvalidName => Some("Names must be non-empty and must not contain '/'."),
            Self::InvalidFollows => {
                Some("Point `follows` at the current LAST version of the item.")
            }
            Self::ForkNotAllowed => Some(
                "Retry with explicit root_versions so only the intended subtree is updated.",
            ),
            Self::CapabilityMismatch => Some("Check the capabilities declared on the resource."),
            Self::ReadOnlyField => Some("Create a new version instead of editing in place."),
            Self::InternalUnexpected => Some("Retry once. If persistent, report a bug with logs."),
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.code())
    }
}

/// Errors raised while building a [`Registry`](crate::schema::Registry).
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SchemaError {
    #[error("capability '{0}' is declared more than once")]
    DuplicateCapability(String),

    #[error("reference type '{0}' is declared more than once")]
    DuplicateReftype(String),

    #[error("unknown capability '{name}' (referenced by '{referenced_by}')")]
    UnknownCapability { name: String, referenced_by: String },

    #[error("unknown reference type '{name}' (referenced by '{referenced_by}')")]
    UnknownReftype { name: String, referenced_by: String },

    #[error("capability inheritance cycle through '{0}'")]
    CapabilityCycle(String),

    #[error("reference type inheritance cycle through '{0}'")]
    ReftypeCycle(String),

    #[error("field '{capability}.{field}': {reason}")]
    InvalidField {
        capability: String,
        field: String,
        reason: String,
    },
}

impl SchemaError {
    /// The machine-readable code for this error.
    #[must_use]
    pub const fn code(&self) -> ErrorCode {
        match self {
            Self::UnknownCapability { .. } => ErrorCode::UnknownCapability,
            Self::UnknownReftype { .. } => ErrorCode::UnknownReftype,
            Self::DuplicateCapability(_)
            | Self::DuplicateReftype(_)
            | Self::CapabilityCycle(_)
            | Self::ReftypeCycle(_)
            | Self::InvalidField { .. } => ErrorCode::SchemaInvalid,
        }
    }
}

/// Errors raised by the reference store, version chain and pool.
///
/// Everything except [`GraphError::NoForkAllowed`] indicates a bug in the
/// calling component or malformed input; the fork conflict is the one
/// condition meant to reach an end user.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum GraphError {
    #[error("resource not found: {0}")]
    ResourceNotFound(Oid),

    #[error("unknown capability '{0}'")]
    UnknownCapability(String),

    #[error("capability '{capability}' has no field '{field}'")]
    UnknownField { capability: String, field: String },

    #[error("resource {oid} does not provide capability '{capability}'")]
    CapabilityMismatch { oid: Oid, capability: String },

    #[error("reference type '{reftype}' does not extend '{base}'")]
    InvalidReftype { reftype: String, base: String },

    #[error("invalid follows for version in '{path}': {reason}")]
    InvalidFollows { path: String, reason: &'static str },

    #[error(
        "no fork allowed: auto-updating '{path}' ({capability}.{field}) from {old} to {new} \
         would branch off a version that is not LAST"
    )]
    NoForkAllowed {
        path: String,
        capability: String,
        field: String,
        old: Oid,
        new: Oid,
    },

    #[error("'{capability}{}' is read-only", .field.as_deref().map(|f| format!(".{f}")).unwrap_or_default())]
    ReadOnly {
        capability: String,
        field: Option<String>,
    },

    #[error("'{parent}' already contains a child named '{name}'")]
    DuplicateName { parent: String, name: String },

    #[error("invalid resource name '{0}'")]
    InvalidName(String),

    #[error(transparent)]
    Schema(#[from] SchemaError),
}

impl GraphError {
    /// The machine-readable code for this error.
    #[must_use]
    pub const fn code(&self) -> ErrorCode {
        match self {
            Self::ResourceNotFound(_) => ErrorCode::ResourceNotFound,
            Self::UnknownCapability(_) => ErrorCode::UnknownCapability,
            Self::UnknownField { .. } => ErrorCode::UnknownField,
            Self::CapabilityMismatch { .. } => ErrorCode::CapabilityMismatch,
            Self::InvalidReftype { .. } => ErrorCode::UnknownReftype,
            Self::InvalidFollows { .. } => ErrorCode::InvalidFollows,
            Self::NoForkAllowed { .. } => ErrorCode::ForkNotAllowed,
            Self::ReadOnly { .. } => ErrorCode::ReadOnlyField,
            Self::DuplicateName { .. } => ErrorCode::DuplicateName,
            Self::InvalidName(_) => ErrorCode::InvalidName,
            Self::Schema(e) => e.code(),
        }
    }

    /// Returns `true` for conditions a client can fix by changing the request
    /// (surfaced as a 400-class error by an HTTP layer).
    #[must_use]
    pub const fn is_client_error(&self) -> bool {
        matches!(self, Self::NoForkAllowed { .. })
    }
}
