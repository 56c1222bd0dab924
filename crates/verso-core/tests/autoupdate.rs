//! Propagation of new versions to referencing resources.

use verso_core::Oid;
use verso_core::config::parse_schema_config;
use verso_core::error::{ErrorCode, GraphError};
use verso_core::pool::{NewResource, Pool};
use verso_core::schema::CapabilityId;
use verso_core::sheet::{FieldValue, SheetData};

const SCHEMA: &str = r#"
[[capability]]
name = "proposal"
extends = ["item"]

[[capability]]
name = "paragraph"
extends = ["versionable", "auto_update_marker"]

[[capability.field]]
name = "elements"
kind = "list"
reftype = "paragraph_elements"

[[capability.field]]
name = "text"

[[capability]]
name = "frozen"
extends = ["versionable", "auto_update_marker"]

[[capability.field]]
name = "elements"
kind = "list"
reftype = "frozen_elements"
readonly = true

[[reftype]]
name = "paragraph_elements"
source = "paragraph"
field = "elements"
target = "versionable"

[[reftype]]
name = "frozen_elements"
source = "frozen"
field = "elements"
target = "versionable"
"#;

struct World {
    pool: Pool,
    proposal: CapabilityId,
    paragraph: CapabilityId,
    frozen: CapabilityId,
    versionable: CapabilityId,
}

fn world_from(schema: &str) -> World {
    let config = parse_schema_config(schema).expect("schema parses");
    let pool = Pool::from_config(&config).expect("schema builds");
    let registry = pool.registry();
    World {
        proposal: registry.capability_id("proposal").expect("proposal"),
        paragraph: registry.capability_id("paragraph").expect("paragraph"),
        frozen: registry.capability_id("frozen").expect("frozen"),
        versionable: registry.builtins().versionable,
        pool,
    }
}

fn world() -> World {
    world_from(SCHEMA)
}

fn item(pool: &mut Pool, proposal: CapabilityId, name: &str) -> Oid {
    pool.create(NewResource::new([proposal]).named(name))
        .expect("item")
}

/// A version of `kind` in `parent` whose `elements` are `elements`.
fn referrer(
    pool: &mut Pool,
    kind: CapabilityId,
    parent: Oid,
    follows: &[Oid],
    elements: &[Oid],
) -> Result<Oid, GraphError> {
    pool.create(
        NewResource::new([kind])
            .parent(parent)
            .follows(follows.iter().copied())
            .field(kind, "elements", FieldValue::References(elements.to_vec())),
    )
}

fn elements(pool: &Pool, oid: Oid, kind: CapabilityId) -> FieldValue {
    pool.snapshot(oid).expect("snapshot")[&kind]["elements"].clone()
}

#[test]
fn new_version_of_referrer_points_at_new_target() {
    let World {
        mut pool,
        proposal,
        paragraph,
        versionable,
        ..
    } = world();
    let doc = item(&mut pool, proposal, "doc");
    let body = item(&mut pool, proposal, "body");

    let v1 = pool
        .create(NewResource::new([versionable]).parent(body))
        .expect("v1");
    let a0 = referrer(&mut pool, paragraph, doc, &[], &[]).expect("a0");
    let a1 = referrer(&mut pool, paragraph, doc, &[a0], &[v1]).expect("a1");

    let v2 = pool
        .create(NewResource::new([versionable]).parent(body).follows([v1]))
        .expect("v2");

    let heads = pool.last(doc);
    assert_eq!(heads.len(), 1);
    let a2 = heads[0];
    assert_ne!(a2, a1);
    assert_eq!(elements(&pool, a2, paragraph), FieldValue::References(vec![v2]));
    assert_eq!(pool.store().get_follows(a2).collect::<Vec<_>>(), vec![a1]);

    // History is untouched.
    assert_eq!(elements(&pool, a1, paragraph), FieldValue::References(vec![v1]));
    assert_eq!(pool.first(doc), vec![a0]);
}

#[test]
fn new_version_keeps_untouched_sheet_data() {
    let World {
        mut pool,
        proposal,
        paragraph,
        versionable,
        ..
    } = world();
    let doc = item(&mut pool, proposal, "doc");
    let other = pool.create(NewResource::new([versionable])).expect("other");
    let v1 = pool.create(NewResource::new([versionable])).expect("v1");
    let a0 = pool
        .create(
            NewResource::new([paragraph])
                .parent(doc)
                .field(paragraph, "elements", FieldValue::References(vec![other, v1]))
                .field(paragraph, "text", FieldValue::Value(serde_json::json!("Bike lanes"))),
        )
        .expect("a0");

    pool.create(NewResource::new([versionable]).follows([v1]))
        .expect("v2");
    let a1 = pool.last(doc)[0];
    assert_ne!(a1, a0);

    let snapshot = pool.snapshot(a1).expect("snapshot");
    let v2 = pool.store().get_followed_by(v1).next().expect("v2 follows v1");
    assert_eq!(
        snapshot[&paragraph]["elements"],
        FieldValue::References(vec![other, v2])
    );
    assert_eq!(
        snapshot[&paragraph]["text"],
        FieldValue::Value(serde_json::json!("Bike lanes"))
    );
}

#[test]
fn read_only_field_is_not_updated() {
    let World {
        mut pool,
        proposal,
        frozen,
        versionable,
        ..
    } = world();
    let doc = item(&mut pool, proposal, "doc");
    let v1 = pool.create(NewResource::new([versionable])).expect("v1");
    let a0 = referrer(&mut pool, frozen, doc, &[], &[v1]).expect("a0");
    let before = pool.len();

    pool.create(NewResource::new([versionable]).follows([v1]))
        .expect("v2");

    assert_eq!(pool.len(), before + 1);
    assert_eq!(pool.last(doc), vec![a0]);
    assert_eq!(elements(&pool, a0, frozen), FieldValue::References(vec![v1]));
}

#[test]
fn stale_referrer_diverging_from_last_is_a_fork_conflict() {
    let World {
        mut pool,
        proposal,
        paragraph,
        versionable,
        ..
    } = world();
    let doc = item(&mut pool, proposal, "doc");
    let v1 = pool.create(NewResource::new([versionable])).expect("v1");
    let w1 = pool.create(NewResource::new([versionable])).expect("w1");
    let a0 = referrer(&mut pool, paragraph, doc, &[], &[v1]).expect("a0");
    let a1 = referrer(&mut pool, paragraph, doc, &[a0], &[w1]).expect("a1");
    let before = pool.len();

    let err = pool
        .create(NewResource::new([versionable]).follows([v1]))
        .expect_err("a0 still references v1 but LAST moved on to w1");

    assert!(err.is_client_error());
    assert_eq!(err.code(), ErrorCode::ForkNotAllowed);
    match err {
        GraphError::NoForkAllowed {
            path,
            capability,
            field,
            old,
            ..
        } => {
            assert_eq!(path, "/doc/VERSION_0000000");
            assert_eq!(capability, "paragraph");
            assert_eq!(field, "elements");
            assert_eq!(old, v1);
        }
        other => panic!("unexpected error: {other}"),
    }

    // Rolled back: no v2, no new paragraph version.
    assert_eq!(pool.len(), before);
    assert_eq!(pool.last(doc), vec![a1]);
    assert_eq!(pool.store().get_followed_by(v1).count(), 0);
}

#[test]
fn older_versions_agreeing_with_last_are_left_alone() {
    let World {
        mut pool,
        proposal,
        paragraph,
        versionable,
        ..
    } = world();
    let doc = item(&mut pool, proposal, "doc");
    let v1 = pool.create(NewResource::new([versionable])).expect("v1");
    let a0 = referrer(&mut pool, paragraph, doc, &[], &[v1]).expect("a0");
    let a1 = referrer(&mut pool, paragraph, doc, &[a0], &[v1]).expect("a1");
    let before = pool.len();

    let v2 = pool
        .create(NewResource::new([versionable]).follows([v1]))
        .expect("history that agrees with LAST is not a fork");

    // v2 plus exactly one paragraph version.
    assert_eq!(pool.len(), before + 2);
    let heads = pool.last(doc);
    assert_eq!(heads.len(), 1);
    let a2 = heads[0];
    assert_eq!(pool.store().get_follows(a2).collect::<Vec<_>>(), vec![a1]);
    assert_eq!(elements(&pool, a2, paragraph), FieldValue::References(vec![v2]));

    assert_eq!(elements(&pool, a0, paragraph), FieldValue::References(vec![v1]));
    assert_eq!(elements(&pool, a1, paragraph), FieldValue::References(vec![v1]));
    assert_eq!(pool.store().get_followed_by(a0).collect::<Vec<_>>(), vec![a1]);
    assert_eq!(pool.store().get_followed_by(a1).collect::<Vec<_>>(), vec![a2]);
}

#[test]
fn older_version_seen_after_last_was_updated_is_left_alone() {
    let World {
        mut pool,
        proposal,
        paragraph,
        versionable,
        ..
    } = world();
    let doc = item(&mut pool, proposal, "doc");
    let v1 = pool.create(NewResource::new([versionable])).expect("v1");
    let a0 = referrer(&mut pool, paragraph, doc, &[], &[]).expect("a0");
    let a1 = referrer(&mut pool, paragraph, doc, &[a0], &[v1]).expect("a1");

    // a0 starts referencing v1 after a1 did, so a1 is reached first.
    let mut data = SheetData::new();
    data.insert("elements".into(), FieldValue::References(vec![v1]));
    pool.update_sheet(a0, paragraph, &data).expect("edit a0");

    let v2 = pool
        .create(NewResource::new([versionable]).follows([v1]))
        .expect("a0 agrees with the updated LAST");

    let a2 = pool.last(doc)[0];
    assert_eq!(pool.store().get_follows(a2).collect::<Vec<_>>(), vec![a1]);
    assert_eq!(elements(&pool, a2, paragraph), FieldValue::References(vec![v2]));
    assert_eq!(elements(&pool, a0, paragraph), FieldValue::References(vec![v1]));
    assert_eq!(pool.store().get_followed_by(a1).count(), 1);
}

#[test]
fn root_versions_limit_propagation() {
    let World {
        mut pool,
        proposal,
        paragraph,
        versionable,
        ..
    } = world();
    let doc = item(&mut pool, proposal, "doc");
    let v1 = pool.create(NewResource::new([versionable])).expect("v1");
    let a0 = referrer(&mut pool, paragraph, doc, &[], &[v1]).expect("a0");
    let a1 = referrer(&mut pool, paragraph, doc, &[a0], &[v1]).expect("a1");

    let v2 = pool
        .create(
            NewResource::new([versionable])
                .follows([v1])
                .root_versions([a1]),
        )
        .expect("only a1's subtree is updated");

    let a2 = pool.last(doc)[0];
    assert_ne!(a2, a1);
    assert_eq!(elements(&pool, a2, paragraph), FieldValue::References(vec![v2]));
    assert_eq!(elements(&pool, a0, paragraph), FieldValue::References(vec![v1]));
}

#[test]
fn updates_cascade_through_referrers() {
    let World {
        mut pool,
        proposal,
        paragraph,
        versionable,
        ..
    } = world();
    let paragraphs = item(&mut pool, proposal, "paragraphs");
    let documents = item(&mut pool, proposal, "documents");
    let v1 = pool.create(NewResource::new([versionable])).expect("v1");
    let p0 = referrer(&mut pool, paragraph, paragraphs, &[], &[v1]).expect("p0");
    let d0 = referrer(&mut pool, paragraph, documents, &[], &[p0]).expect("d0");

    let v2 = pool
        .create(NewResource::new([versionable]).follows([v1]))
        .expect("v2");

    let p1 = pool.last(paragraphs)[0];
    let d1 = pool.last(documents)[0];
    assert_ne!(p1, p0);
    assert_ne!(d1, d0);
    assert_eq!(elements(&pool, p1, paragraph), FieldValue::References(vec![v2]));
    assert_eq!(elements(&pool, d1, paragraph), FieldValue::References(vec![p1]));
    assert_eq!(pool.store().get_follows(d1).collect::<Vec<_>>(), vec![d0]);
}

#[test]
fn one_transaction_creates_one_successor_per_referrer() {
    let World {
        mut pool,
        proposal,
        paragraph,
        versionable,
        ..
    } = world();
    let doc = item(&mut pool, proposal, "doc");
    let v1 = pool.create(NewResource::new([versionable])).expect("v1");
    let w1 = pool.create(NewResource::new([versionable])).expect("w1");
    let a0 = referrer(&mut pool, paragraph, doc, &[], &[v1, w1]).expect("a0");

    let (v2, w2) = pool
        .transaction(|pool| {
            let v2 = pool.create(NewResource::new([versionable]).follows([v1]))?;
            let w2 = pool.create(NewResource::new([versionable]).follows([w1]))?;
            Ok((v2, w2))
        })
        .expect("batch");

    let heads = pool.last(doc);
    assert_eq!(heads.len(), 1);
    let a1 = heads[0];
    assert_eq!(pool.store().get_follows(a1).collect::<Vec<_>>(), vec![a0]);
    assert_eq!(elements(&pool, a1, paragraph), FieldValue::References(vec![v2, w2]));
    assert_eq!(pool.store().get_followed_by(a0).count(), 1);
}

#[test]
fn separate_requests_conflict_where_a_batch_does_not() {
    let World {
        mut pool,
        proposal,
        paragraph,
        versionable,
        ..
    } = world();
    let doc = item(&mut pool, proposal, "doc");
    let v1 = pool.create(NewResource::new([versionable])).expect("v1");
    let w1 = pool.create(NewResource::new([versionable])).expect("w1");
    referrer(&mut pool, paragraph, doc, &[], &[v1, w1]).expect("a0");

    pool.create(NewResource::new([versionable]).follows([v1]))
        .expect("v2");
    let err = pool
        .create(NewResource::new([versionable]).follows([w1]))
        .expect_err("a0 references w1 but a1 is LAST now");
    assert!(matches!(err, GraphError::NoForkAllowed { .. }));
}

#[test]
fn disabled_propagation_leaves_referrers_alone() {
    let schema = format!("[propagation]\nenabled = false\n{SCHEMA}");
    let World {
        mut pool,
        proposal,
        paragraph,
        versionable,
        ..
    } = world_from(&schema);
    let doc = item(&mut pool, proposal, "doc");
    let v1 = pool.create(NewResource::new([versionable])).expect("v1");
    let a0 = referrer(&mut pool, paragraph, doc, &[], &[v1]).expect("a0");

    pool.create(NewResource::new([versionable]).follows([v1]))
        .expect("v2");

    assert_eq!(pool.last(doc), vec![a0]);
    assert_eq!(elements(&pool, a0, paragraph), FieldValue::References(vec![v1]));
}
