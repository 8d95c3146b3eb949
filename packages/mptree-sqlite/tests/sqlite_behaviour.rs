use std::cell::RefCell;
use std::rc::Rc;

use mptree_core::{Error, PathCodec, TreeHandle, TreeOptions};
use mptree_sqlite::{in_memory_tree, SqliteBackend};
use mptree_test_support::faults::{FailAfter, NoTransactions};
use mptree_test_support::{assert_consistent, named, names, snapshot, NAME_COLUMN_DEF};

fn prepared(options: &TreeOptions) -> SqliteBackend {
    let backend = SqliteBackend::open_in_memory().unwrap();
    backend.create_table(options, &[NAME_COLUMN_DEF]).unwrap();
    backend
}

#[test]
fn failed_shift_rolls_back_every_row() {
    let options = TreeOptions::default();
    let (backend, switch) = FailAfter::new(prepared(&options));
    let tree = TreeHandle::open(backend, options).unwrap();
    assert!(tree.supports_transactions());

    let root = tree.root().clone();
    root.add_children(&tree, vec![named("a"), named("b"), named("c")])
        .unwrap();
    let before = snapshot(&tree);

    switch.arm(1);
    let err = root
        .add_children_at_left(&tree, vec![named("x")])
        .unwrap_err();
    switch.disarm();

    assert!(matches!(err, Error::Storage(_)), "{err:?}");
    assert_eq!(snapshot(&tree), before);
    assert_eq!(names(&root.children(&tree).unwrap()), ["a", "b", "c"]);
}

#[test]
fn failed_cascade_delete_keeps_the_subtree() {
    let options = TreeOptions::default();
    let (backend, switch) = FailAfter::new(prepared(&options));
    let tree = TreeHandle::open(backend, options).unwrap();

    let root = tree.root().clone();
    let a = root.add_child(&tree, named("a")).unwrap();
    a.add_children(&tree, vec![named("a1"), named("a2")]).unwrap();
    let before = snapshot(&tree);

    switch.arm(0);
    assert!(a.delete(&tree, true).is_err());
    switch.disarm();
    assert_eq!(snapshot(&tree), before);
}

#[test]
fn failed_multi_append_leaves_no_partial_siblings() {
    let options = TreeOptions::default();
    let (backend, switch) = FailAfter::new(prepared(&options));
    let tree = TreeHandle::open(backend, options).unwrap();

    let root = tree.root().clone();
    root.add_child(&tree, named("a")).unwrap();
    let before = snapshot(&tree);

    switch.arm(1);
    let err = root
        .add_children(&tree, vec![named("x"), named("y"), named("z")])
        .unwrap_err();
    switch.disarm();

    assert!(matches!(err, Error::Storage(_)), "{err:?}");
    assert_eq!(snapshot(&tree), before);
    assert_eq!(names(&root.children(&tree).unwrap()), ["a"]);
}

#[test]
fn failed_insert_after_shift_restores_shifted_siblings() {
    let options = TreeOptions::default();
    let (backend, switch) = FailAfter::new(prepared(&options));
    let tree = TreeHandle::open(backend, options).unwrap();

    let root = tree.root().clone();
    let kids = root
        .add_children(&tree, vec![named("a"), named("b")])
        .unwrap();
    kids[1].add_child(&tree, named("b1")).unwrap();
    let before = snapshot(&tree);

    // Three shifts (b1, b, a) succeed, then the first insert fails.
    switch.arm(3);
    let err = root
        .add_children_at_left(&tree, vec![named("x"), named("y")])
        .unwrap_err();
    switch.disarm();

    assert!(matches!(err, Error::Storage(_)), "{err:?}");
    assert_eq!(snapshot(&tree), before);
    assert_eq!(names(&root.children(&tree).unwrap()), ["a", "b"]);
}

#[test]
fn without_transactions_a_failure_leaves_a_partial_shift() {
    let options = TreeOptions::default();
    let (backend, switch) = FailAfter::new(NoTransactions(prepared(&options)));
    let tree = TreeHandle::open(backend, options).unwrap();
    assert!(!tree.supports_transactions());

    let root = tree.root().clone();
    let kids = root
        .add_children(&tree, vec![named("a"), named("b"), named("c")])
        .unwrap();

    switch.arm(1);
    assert!(root
        .add_children_at_left(&tree, vec![named("x")])
        .is_err());
    switch.disarm();

    // Shifts run right to left, so only the last sibling moved before the failure.
    assert_eq!(tree.get(kids[2].id()).unwrap().path(), "0001.0004");
    assert_eq!(tree.get(kids[1].id()).unwrap().path(), "0001.0002");
    assert_eq!(tree.get(kids[0].id()).unwrap().path(), "0001.0001");
}

#[test]
fn without_transactions_operations_still_succeed() {
    let options = TreeOptions::default();
    let tree = TreeHandle::open(NoTransactions(prepared(&options)), options).unwrap();
    let root = tree.root().clone();
    let kids = root
        .add_children(&tree, vec![named("a"), named("b")])
        .unwrap();
    root.add_children_at(&tree, 1, vec![named("x")]).unwrap();
    let mut b = tree.get(kids[1].id()).unwrap();
    assert_eq!(b.move_to(&tree, &kids[0]).unwrap(), 1);
    assert_eq!(names(&root.children(&tree).unwrap()), ["a", "x"]);
    assert_consistent(&tree);
}

#[test]
fn sibling_capacity_is_enforced_before_writing() {
    let options = TreeOptions::default().codec(PathCodec::new(1, '.').unwrap());
    let tree = TreeHandle::open(prepared(&options), options).unwrap();
    let root = tree.root().clone();
    assert_eq!(root.path(), "1");

    let nine: Vec<_> = (1..=9).map(|i| named(&i.to_string())).collect();
    let kids = root.add_children(&tree, nine).unwrap();
    assert_eq!(kids.last().unwrap().path(), "1.9");
    let before = snapshot(&tree);

    let err = root.add_child(&tree, named("10")).unwrap_err();
    assert!(matches!(err, Error::InvalidOperation(_)), "{err:?}");
    let err = root
        .add_children_at_left(&tree, vec![named("0")])
        .unwrap_err();
    assert!(matches!(err, Error::InvalidOperation(_)), "{err:?}");

    let mut leaf = kids[0].add_child(&tree, named("leaf")).unwrap();
    let err = leaf.move_to(&tree, &root).unwrap_err();
    assert!(matches!(err, Error::InvalidOperation(_)), "{err:?}");
    assert_eq!(leaf.path(), "1.1.1");

    let mut after = snapshot(&tree);
    after.retain(|(id, _)| id != leaf.id());
    assert_eq!(after, before);
}

#[test]
fn deleted_rightmost_position_is_reissued() {
    let tree = in_memory_tree(TreeOptions::default(), &[NAME_COLUMN_DEF]).unwrap();
    let root = tree.root().clone();
    let kids = root
        .add_children(&tree, vec![named("a"), named("b")])
        .unwrap();
    let b_path = kids[1].path().to_string();
    kids[1].clone().delete(&tree, false).unwrap();

    let again = root.add_child(&tree, named("b2")).unwrap();
    assert_eq!(again.path(), b_path);
    assert_ne!(again.id(), kids[1].id());
}

#[test]
fn custom_names_and_separator() {
    let options = TreeOptions::new("outline items")
        .id_column("item id")
        .path_column("lineage")
        .codec(PathCodec::new(3, '/').unwrap());
    let tree = TreeHandle::open(prepared(&options), options).unwrap();
    let root = tree.root().clone();
    assert_eq!(root.path(), "001");

    let a = root.add_child(&tree, named("a")).unwrap();
    let a1 = a.add_child(&tree, named("a1")).unwrap();
    assert_eq!(a1.path(), "001/001/001");
    assert_eq!(names(&root.descendants(&tree).unwrap()), ["a", "a1"]);
    assert!(a1.get("item id").is_none());
    assert_consistent(&tree);
}

#[test]
fn open_requires_root_when_creation_is_disabled() {
    let options = TreeOptions::default().auto_create_root(false);
    let err = TreeHandle::open(prepared(&options), options).unwrap_err();
    assert!(matches!(err, Error::Configuration(_)), "{err:?}");
}

#[test]
fn open_reports_missing_table_and_columns() {
    let backend = SqliteBackend::open_in_memory().unwrap();
    let err = TreeHandle::open(backend, TreeOptions::default()).unwrap_err();
    let Error::Configuration(message) = err else {
        panic!("expected a configuration error, got {err:?}");
    };
    assert!(message.contains("tree_nodes"), "{message}");

    let backend = SqliteBackend::open_in_memory().unwrap();
    backend
        .execute_batch("CREATE TABLE tree_nodes (id INTEGER PRIMARY KEY, lineage TEXT)")
        .unwrap();
    let err = TreeHandle::open(backend, TreeOptions::default()).unwrap_err();
    let Error::Configuration(message) = err else {
        panic!("expected a configuration error, got {err:?}");
    };
    assert!(message.contains("\"path\""), "{message}");
}

#[test]
fn open_rejects_invalid_options() {
    let options = TreeOptions::default().id_column("path");
    let err = TreeHandle::open(SqliteBackend::open_in_memory().unwrap(), options).unwrap_err();
    assert!(matches!(err, Error::Configuration(_)), "{err:?}");
}

#[test]
fn malformed_stored_path_is_reported() {
    let options = TreeOptions::default();
    let backend = prepared(&options);
    backend
        .execute_batch("INSERT INTO tree_nodes (path) VALUES ('0001'), ('0001.x')")
        .unwrap();
    let tree = TreeHandle::open(backend, options).unwrap();
    let err = tree.root().descendants(&tree).unwrap_err();
    assert!(matches!(err, Error::MalformedPath { .. }), "{err:?}");
}

#[test]
fn handles_for_two_tables_share_one_connection() {
    let first = TreeOptions::new("first");
    let second = TreeOptions::new("second");
    let backend = prepared(&first);
    backend.create_table(&second, &[NAME_COLUMN_DEF]).unwrap();

    let conn = Rc::new(RefCell::new(backend));
    let a = TreeHandle::open_shared(Rc::clone(&conn), first).unwrap();
    let b = TreeHandle::open_shared(conn, second).unwrap();
    assert!(a.shares_connection_with(&b));
    assert!(!a.shares_statements_with(&b));

    a.root().add_child(&a, named("only in first")).unwrap();
    assert_eq!(a.node_count().unwrap(), 2);
    assert_eq!(b.node_count().unwrap(), 1);
}

#[test]
fn file_backed_tree_survives_reopen() {
    let dir = tempfile::tempdir().unwrap();
    let file = dir.path().join("tree.db");
    let options = TreeOptions::default();

    let added_path = {
        let backend = SqliteBackend::open(&file).unwrap();
        backend.create_table(&options, &[NAME_COLUMN_DEF]).unwrap();
        let tree = TreeHandle::open(backend, options.clone()).unwrap();
        let a = tree.root().add_child(&tree, named("a")).unwrap();
        a.path().to_string()
    };

    let tree = TreeHandle::open(SqliteBackend::open(&file).unwrap(), options).unwrap();
    assert_eq!(tree.node_count().unwrap(), 2);
    assert_eq!(names(&[tree.get_by_path(&added_path).unwrap()]), ["a"]);
}
