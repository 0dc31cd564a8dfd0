use rewind_core::{doc, CollectionId, Namespace, Value};
use rewind_engine::{sync_rollback, CollectionCopy, RollbackConfig, RollbackError};
use rewind_harness::builders::*;
use rewind_harness::{LogCapture, MockSource, TestNode};
use rewind_storage::Storage;

type TestResult = Result<(), Box<dyn std::error::Error>>;

fn run(node: &mut TestNode, source: &MockSource) -> Result<(), RollbackError> {
    let local = node.local_oplog()?;
    sync_rollback(&mut node.storage, &local, source, None, &RollbackConfig::default())
}

fn source_at_common_point() -> MockSource {
    MockSource::new(oplog(vec![noop(1)]))
}

fn ns(full: &str) -> Namespace {
    Namespace::parse(full).expect("valid namespace")
}

// ============================================================================
// Indexes (7 tests)
// ============================================================================

#[test]
fn rolled_back_index_create_drops_index() -> TestResult {
    let mut node = TestNode::new()?;
    let uuid = node.create_collection("test.t")?;
    node.create_index(uuid, doc! { "a" => 1 }, "a_1")?;
    assert_eq!(node.index_count(uuid)?, 2);
    node.append_oplog(&[noop(1), create_index(2, "test.t", uuid, doc! { "a" => 1 }, "a_1")])?;
    let source = source_at_common_point();
    let logs = LogCapture::new();

    logs.run(|| run(&mut node, &source))?;

    assert_eq!(node.index_count(uuid)?, 1);
    assert_eq!(
        logs.count_containing("Dropped index in rollback: collection = test.t, index = a_1"),
        1
    );
    Ok(())
}

#[test]
fn repeated_index_create_is_dropped_once() -> TestResult {
    let mut node = TestNode::new()?;
    let uuid = node.create_collection("test.t")?;
    node.create_index(uuid, doc! { "a" => 1 }, "a_1")?;
    node.append_oplog(&[
        noop(1),
        create_index(2, "test.t", uuid, doc! { "a" => 1 }, "a_1"),
        create_index(3, "test.t", uuid, doc! { "a" => 1 }, "a_1"),
    ])?;
    let source = source_at_common_point();
    let logs = LogCapture::new();

    logs.run(|| run(&mut node, &source))?;

    assert_eq!(node.index_count(uuid)?, 1);
    assert_eq!(logs.count_containing("Dropped index in rollback"), 1);
    Ok(())
}

#[test]
fn rolled_back_index_create_missing_from_catalog_is_skipped() -> TestResult {
    let mut node = TestNode::new()?;
    let uuid = node.create_collection("test.t")?;
    node.append_oplog(&[noop(1), create_index(2, "test.t", uuid, doc! { "a" => 1 }, "a_1")])?;
    let source = source_at_common_point();
    let logs = LogCapture::new();

    logs.run(|| run(&mut node, &source))?;

    assert_eq!(node.index_count(uuid)?, 1);
    assert_eq!(logs.count_containing("Rollback failed to drop index a_1 in test.t"), 1);
    Ok(())
}

#[test]
fn rolled_back_index_drop_recreates_index() -> TestResult {
    let mut node = TestNode::new()?;
    let uuid = node.create_collection("test.t")?;
    node.append_oplog(&[noop(1), drop_index(2, "test.t", uuid, doc! { "a" => 1 }, "a_1")])?;
    let source = source_at_common_point();
    let logs = LogCapture::new();

    logs.run(|| run(&mut node, &source))?;

    assert_eq!(node.index_count(uuid)?, 2);
    let spec = node.index_spec(uuid, "a_1")?.ok_or("a_1 not recreated")?;
    assert_eq!(spec.get("key"), Some(&Value::from(doc! { "a" => 1 })));
    assert_eq!(
        logs.count_containing("Created index in rollback: collection = test.t, index = a_1"),
        1
    );
    Ok(())
}

#[test]
fn two_rolled_back_index_drops_recreate_both() -> TestResult {
    let mut node = TestNode::new()?;
    let uuid = node.create_collection("test.t")?;
    node.append_oplog(&[
        noop(1),
        drop_index(2, "test.t", uuid, doc! { "a" => 1 }, "a_1"),
        drop_index(3, "test.t", uuid, doc! { "b" => 1 }, "b_1"),
    ])?;
    let source = source_at_common_point();

    run(&mut node, &source)?;

    assert_eq!(node.index_count(uuid)?, 3);
    Ok(())
}

#[test]
fn index_created_and_dropped_in_tail_cancels_out() -> TestResult {
    let mut node = TestNode::new()?;
    let uuid = node.create_collection("test.t")?;
    node.append_oplog(&[
        noop(1),
        create_index(2, "test.t", uuid, doc! { "a" => 1 }, "a_1"),
        drop_index(3, "test.t", uuid, doc! { "a" => 1 }, "a_1"),
    ])?;
    let source = source_at_common_point();
    let logs = LogCapture::new();

    logs.run(|| run(&mut node, &source))?;

    assert_eq!(node.index_count(uuid)?, 1);
    assert!(!logs.contains("Dropped index in rollback"));
    assert!(!logs.contains("Created index in rollback"));
    Ok(())
}

#[test]
fn index_dropped_then_recreated_with_new_spec_is_restored() -> TestResult {
    let mut node = TestNode::new()?;
    let uuid = node.create_collection("test.t")?;
    node.create_index(uuid, doc! { "b" => 1 }, "a_1")?;
    node.append_oplog(&[
        noop(1),
        drop_index(2, "test.t", uuid, doc! { "a" => 1 }, "a_1"),
        create_index(3, "test.t", uuid, doc! { "b" => 1 }, "a_1"),
    ])?;
    let source = source_at_common_point();
    let logs = LogCapture::new();

    logs.run(|| run(&mut node, &source))?;

    assert_eq!(node.index_count(uuid)?, 2);
    let spec = node.index_spec(uuid, "a_1")?.ok_or("a_1 missing")?;
    assert_eq!(spec.get("key"), Some(&Value::from(doc! { "a" => 1 })));
    assert_eq!(logs.count_containing("Dropped index in rollback"), 1);
    assert_eq!(logs.count_containing("Created index in rollback"), 1);
    Ok(())
}

// ============================================================================
// Collection create, drop and rename (10 tests)
// ============================================================================

#[test]
fn rolled_back_create_sets_collection_aside() -> TestResult {
    let mut node = TestNode::new()?;
    let uuid = node.create_collection("test.t")?;
    node.insert(uuid, doc! { "_id" => 0 })?;
    node.append_oplog(&[
        noop(1),
        create(2, "test", "t", uuid),
        insert(3, "test.t", uuid, doc! { "_id" => 0 }),
    ])?;
    let source = source_at_common_point();

    run(&mut node, &source)?;

    assert!(!node.exists(&ns("test.t"))?);
    let pending = node.namespace_of(uuid)?;
    assert_eq!(pending, ns("test.t").make_drop_pending(op_time(1)));
    let reaper: Vec<Namespace> = node
        .storage
        .list_drop_pending()?
        .into_iter()
        .map(|record| record.ns)
        .collect();
    assert_eq!(reaper, vec![pending]);
    assert!(source.searched_ids().is_empty());
    Ok(())
}

#[test]
fn collection_set_aside_by_interrupted_attempt_is_registered_with_reaper() -> TestResult {
    let mut node = TestNode::new()?;
    let uuid = node.create_collection("test.t")?;
    let pending = ns("test.t").make_drop_pending(op_time(1));
    // An earlier attempt renamed the collection but never registered it.
    node.storage.rename_collection(uuid, &pending)?;
    assert!(node.storage.list_drop_pending()?.is_empty());
    node.append_oplog(&[noop(1), create(2, "test", "t", uuid)])?;
    let source = source_at_common_point();

    run(&mut node, &source)?;

    assert_eq!(node.namespace_of(uuid)?, pending);
    let reaper = node.storage.list_drop_pending()?;
    assert_eq!(reaper.len(), 1);
    assert_eq!(reaper[0].ns, pending);
    assert_eq!(reaper[0].drop_optime, op_time(1));
    Ok(())
}

#[test]
fn rolled_back_drop_restores_collection_in_place() -> TestResult {
    let mut node = TestNode::new()?;
    let (uuid, _pending) = node.create_drop_pending("test.t", op_time(2))?;
    node.insert(uuid, doc! { "_id" => 5 })?;
    node.append_oplog(&[noop(1), drop(2, "test", "t", uuid)])?;
    let source = source_at_common_point();

    run(&mut node, &source)?;

    assert_eq!(node.uuid_at("test.t")?, Some(uuid));
    assert_eq!(node.storage.document_count(uuid)?, 1);
    assert!(node.storage.list_drop_pending()?.is_empty());
    assert!(source.copied.borrow().is_empty());
    Ok(())
}

#[test]
fn reaped_collection_is_copied_from_source() -> TestResult {
    let mut node = TestNode::new()?;
    let uuid = CollectionId::new();
    node.append_oplog(&[noop(1), drop(2, "test", "t", uuid)])?;
    let copy = CollectionCopy {
        options: doc! {},
        indexes: vec![
            index_spec("test.t", doc! { "_id" => 1 }, "_id_"),
            index_spec("test.t", doc! { "a" => 1 }, "a_1"),
        ],
        documents: vec![doc! { "_id" => 1, "a" => 2 }],
    };
    let source = source_at_common_point().with_copy(ns("test.t"), copy);

    run(&mut node, &source)?;

    assert_eq!(source.copied.borrow().as_slice(), &[ns("test.t")]);
    assert_eq!(node.uuid_at("test.t")?, Some(uuid));
    assert_eq!(node.index_count(uuid)?, 2);
    assert_eq!(node.storage.document_count(uuid)?, 1);
    Ok(())
}

#[test]
fn rolled_back_rename_moves_collection_back() -> TestResult {
    let mut node = TestNode::new()?;
    let uuid = node.create_collection("test.y")?;
    node.append_oplog(&[noop(1), rename(2, "test.x", "test.y", uuid)])?;
    let source = source_at_common_point();

    run(&mut node, &source)?;

    assert_eq!(node.uuid_at("test.x")?, Some(uuid));
    assert!(!node.exists(&ns("test.y"))?);
    Ok(())
}

#[test]
fn rolled_back_rename_with_drop_target_restores_both() -> TestResult {
    let mut node = TestNode::new()?;
    let renamed = node.create_collection("test.y")?;
    let (dropped, _) = node.create_drop_pending("test.y", op_time(2))?;
    node.append_oplog(&[
        noop(1),
        rename_with(2, "test.x", "test.y", renamed, Some(dropped), None),
    ])?;
    let source = source_at_common_point();

    run(&mut node, &source)?;

    assert_eq!(node.uuid_at("test.x")?, Some(renamed));
    assert_eq!(node.uuid_at("test.y")?, Some(dropped));
    Ok(())
}

#[test]
fn collections_renamed_to_each_other_are_swapped_back() -> TestResult {
    let mut node = TestNode::new()?;
    // Before the tail: u1 at test.x, u2 at test.y. The tail swapped them.
    let u1 = node.create_collection("test.y")?;
    let u2 = node.create_collection("test.x")?;
    node.append_oplog(&[
        noop(1),
        rename(2, "test.x", "test.tmp", u1),
        rename(3, "test.y", "test.x", u2),
        rename(4, "test.tmp", "test.y", u1),
    ])?;
    let source = source_at_common_point();

    run(&mut node, &source)?;

    assert_eq!(node.uuid_at("test.x")?, Some(u1));
    assert_eq!(node.uuid_at("test.y")?, Some(u2));
    assert!(!node.exists(&ns("test.tmp"))?);
    Ok(())
}

#[test]
fn three_way_rename_cycle_is_undone() -> TestResult {
    let mut node = TestNode::new()?;
    // Before the tail: u1 at test.a, u2 at test.b, u3 at test.c.
    let u1 = node.create_collection("test.b")?;
    let u2 = node.create_collection("test.c")?;
    let u3 = node.create_collection("test.a")?;
    node.append_oplog(&[
        noop(1),
        rename(2, "test.c", "test.d", u3),
        rename(3, "test.b", "test.c", u2),
        rename(4, "test.a", "test.b", u1),
        rename(5, "test.d", "test.a", u3),
    ])?;
    let source = source_at_common_point();

    run(&mut node, &source)?;

    assert_eq!(node.uuid_at("test.a")?, Some(u1));
    assert_eq!(node.uuid_at("test.b")?, Some(u2));
    assert_eq!(node.uuid_at("test.c")?, Some(u3));
    assert!(!node.exists(&ns("test.d"))?);
    Ok(())
}

#[test]
fn rename_onto_previously_dropped_namespace_is_undone() -> TestResult {
    let mut node = TestNode::new()?;
    let (dropped, _) = node.create_drop_pending("test.y", op_time(2))?;
    let renamed = node.create_collection("test.y")?;
    node.append_oplog(&[
        noop(1),
        drop(2, "test", "y", dropped),
        rename(3, "test.x", "test.y", renamed),
    ])?;
    let source = source_at_common_point();

    run(&mut node, &source)?;

    assert_eq!(node.uuid_at("test.x")?, Some(renamed));
    assert_eq!(node.uuid_at("test.y")?, Some(dropped));
    Ok(())
}

#[test]
fn rename_then_create_with_old_name_is_undone() -> TestResult {
    let mut node = TestNode::new()?;
    let renamed = node.create_collection("test.y")?;
    let created = node.create_collection("test.x")?;
    node.append_oplog(&[
        noop(1),
        rename(2, "test.x", "test.y", renamed),
        create(3, "test", "x", created),
    ])?;
    let source = source_at_common_point();

    run(&mut node, &source)?;

    assert_eq!(node.uuid_at("test.x")?, Some(renamed));
    assert!(node.namespace_of(created)?.is_drop_pending());
    Ok(())
}

// ============================================================================
// Cross-database rename (2 tests)
// ============================================================================

#[test]
fn cross_database_rename_is_undone() -> TestResult {
    let mut node = TestNode::new()?;
    let (source_coll, _) = node.create_drop_pending("a.x", op_time(2))?;
    let copy = node.create_collection("b.y")?;
    node.append_oplog(&[
        noop(1),
        rename_with(2, "a.x", "b.y", copy, None, Some(source_coll)),
    ])?;
    let source = source_at_common_point();

    run(&mut node, &source)?;

    assert_eq!(node.uuid_at("a.x")?, Some(source_coll));
    assert!(!node.exists(&ns("b.y"))?);
    assert!(node.namespace_of(copy)?.is_drop_pending());
    Ok(())
}

#[test]
fn writes_after_cross_database_rename_are_not_refetched() -> TestResult {
    let mut node = TestNode::new()?;
    let (source_coll, _) = node.create_drop_pending("a.x", op_time(2))?;
    let copy = node.create_collection("b.y")?;
    node.insert(copy, doc! { "_id" => 1 })?;
    node.append_oplog(&[
        noop(1),
        rename_with(2, "a.x", "b.y", copy, None, Some(source_coll)),
        insert(3, "b.y", copy, doc! { "_id" => 1 }),
    ])?;
    let source = source_at_common_point();

    run(&mut node, &source)?;

    assert!(source.searched_ids().is_empty());
    assert!(!node.exists(&ns("b.y"))?);
    Ok(())
}

// ============================================================================
// collMod and dropDatabase (5 tests)
// ============================================================================

#[test]
fn rolled_back_coll_mod_resyncs_options() -> TestResult {
    let mut node = TestNode::new()?;
    let uuid = node.create_collection_with("test.t", doc! { "validationLevel" => "strict" })?;
    node.append_oplog(&[
        noop(1),
        coll_mod(2, "test", "t", uuid, doc! { "validationLevel" => "strict" }),
    ])?;
    let source = source_at_common_point().with_collection_info(
        uuid,
        Some(doc! { "options" => doc! { "validationLevel" => "moderate" } }),
    );

    run(&mut node, &source)?;

    assert_eq!(source.collection_info_calls.get(), 1);
    let options = node
        .storage
        .collection_by_uuid(uuid)?
        .ok_or("collection missing")?
        .options;
    assert_eq!(options, doc! { "validationLevel" => "moderate" });
    Ok(())
}

#[test]
fn coll_mod_resync_keeps_options_this_node_does_not_interpret() -> TestResult {
    let mut node = TestNode::new()?;
    let uuid = node.create_collection_with("test.t", doc! { "validationLevel" => "strict" })?;
    node.append_oplog(&[
        noop(1),
        coll_mod(2, "test", "t", uuid, doc! { "validationLevel" => "strict" }),
    ])?;
    let remote_options = doc! {
        "validationLevel" => "moderate",
        "storageEngine" => doc! { "wiredTiger" => doc! { "configString" => "block_compressor=zlib" } },
        "indexOptionDefaults" => doc! { "storageEngine" => doc! {} },
    };
    let source = source_at_common_point()
        .with_collection_info(uuid, Some(doc! { "options" => remote_options.clone() }));

    run(&mut node, &source)?;

    let options = node
        .storage
        .collection_by_uuid(uuid)?
        .ok_or("collection missing")?
        .options;
    assert_eq!(options, remote_options);
    Ok(())
}

#[test]
fn coll_mod_with_source_rolling_back_is_unrecoverable() -> TestResult {
    let mut node = TestNode::new()?;
    let uuid = node.create_collection("test.t")?;
    node.append_oplog(&[noop(1), coll_mod(2, "test", "t", uuid, doc! { "validationLevel" => "off" })])?;
    let source = source_at_common_point().with_rollback_id_after_collection_info(1);

    let err = run(&mut node, &source).unwrap_err();

    assert!(err.is_unrecoverable());
    assert!(err.to_string().contains("rollback id on sync source changed"), "{err}");
    Ok(())
}

#[test]
fn coll_mod_with_unparseable_options_is_unrecoverable() -> TestResult {
    let mut node = TestNode::new()?;
    let uuid = node.create_collection("test.t")?;
    node.append_oplog(&[noop(1), coll_mod(2, "test", "t", uuid, doc! { "validationLevel" => "off" })])?;
    let source = source_at_common_point()
        .with_collection_info(uuid, Some(doc! { "options" => doc! { "capped" => "yes" } }));

    let err = run(&mut node, &source).unwrap_err();

    assert!(err.is_unrecoverable());
    assert!(err.to_string().contains("Failed to parse options"), "{err}");
    Ok(())
}

#[test]
fn rolled_back_drop_database_succeeds() -> TestResult {
    let mut node = TestNode::new()?;
    node.append_oplog(&[noop(1), drop_database(2, "test")])?;
    let source = source_at_common_point();
    let logs = LogCapture::new();

    logs.run(|| run(&mut node, &source))?;

    assert!(logs.contains("Rollback of dropDatabase on test"));
    Ok(())
}
