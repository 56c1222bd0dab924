//! Pool events.
//!
//! [`GraphEvent`] is the internal work item drained by the pool after each
//! creation; [`Notification`] is what the pool publishes to its host.

use serde::{Deserialize, Serialize};

use crate::Oid;

/// Work queued by the creation pathway.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GraphEvent {
    /// A versionable resource was created. Each entry of `follows` paired
    /// with `version` is one propagation step.
    VersionCreated {
        item: Option<Oid>,
        version: Oid,
        follows: Vec<Oid>,
        /// Limits propagation to the subtrees of these resources when
        /// non-empty. Inherited by every version the propagation creates.
        root_versions: Vec<Oid>,
    },
}

/// Change published by the pool, in the order it happened.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Notification {
    ResourceCreated {
        oid: Oid,
        path: String,
    },
    VersionCreated {
        item: Option<Oid>,
        version: Oid,
        follows: Vec<Oid>,
    },
    SheetModified {
        oid: Oid,
        capability: String,
    },
    /// `source` started or stopped referencing `target`.
    BackReferenceModified {
        target: Oid,
        source: Oid,
        reftype: String,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn notifications_serialize_with_kind_tag() {
        let note = Notification::BackReferenceModified {
            target: Oid::new(4),
            source: Oid::new(9),
            reftype: "paragraph_elements".into(),
        };
        let json = serde_json::to_value(&note).expect("serialize");
        assert_eq!(
            json,
            serde_json::json!({
                "kind": "back_reference_modified",
                "target": 4,
                "source": 9,
                "reftype": "paragraph_elements"
            })
        );
    }
}
