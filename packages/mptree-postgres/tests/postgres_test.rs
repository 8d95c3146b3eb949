use mptree_core::{metadata, Error, TreeHandle, TreeOptions, Value};
use mptree_postgres::{create_table, verify_path_collation, PostgresBackend};
use mptree_test_support::{conformance_suite, named, names, snapshot, NAME_COLUMN_DEF};
use postgres::Client;
use uuid::Uuid;

/// Connect to `MPTREE_POSTGRES_URL`; `None` when no database is set.
fn connect() -> Option<PostgresBackend> {
    let url = std::env::var("MPTREE_POSTGRES_URL").ok()?;
    PostgresBackend::connect(&url).ok()
}

fn fresh_options() -> TreeOptions {
    TreeOptions::new(format!("mptree_test_{}", Uuid::new_v4().simple()))
}

fn open_fresh() -> Option<TreeHandle<PostgresBackend>> {
    let mut backend = connect()?;
    let options = fresh_options();
    create_table(backend.client(), &options, &[NAME_COLUMN_DEF]).unwrap();
    Some(TreeHandle::open(backend, options).unwrap())
}

conformance_suite!(open_fresh);

#[test]
fn postgres_reports_transaction_support() {
    let Some(tree) = open_fresh() else {
        return;
    };
    assert!(tree.supports_transactions());
}

#[test]
fn postgres_orders_paths_bytewise() {
    let Some(tree) = open_fresh() else {
        return;
    };
    let root = tree.root().clone();
    let kids = root
        .add_children(&tree, vec![named("a"), named("b")])
        .unwrap();
    kids[0].add_child(&tree, named("a1")).unwrap();

    // Under a linguistic collation "0001.0001.0001" could sort after "0001.0002".
    let order: Vec<String> = snapshot(&tree).into_iter().map(|(_, path)| path).collect();
    assert_eq!(order, ["0001", "0001.0001", "0001.0001.0001", "0001.0002"]);
    assert_eq!(names(&root.descendants(&tree).unwrap()), ["a", "a1", "b"]);
}

#[test]
fn postgres_reports_missing_table() {
    let Some(backend) = connect() else {
        return;
    };
    let options = TreeOptions::new(format!("missing_{}", Uuid::new_v4().simple()));
    let err = TreeHandle::open(backend, options).unwrap_err();
    assert!(matches!(err, Error::Configuration(_)), "{err:?}");
}

#[test]
fn postgres_round_trips_typed_columns() {
    let Some(mut backend) = connect() else {
        return;
    };
    let options = fresh_options();
    let table = format!("\"{}\"", options.table);
    backend
        .client()
        .batch_execute(&format!(
            "CREATE TABLE {table} (\
             id UUID PRIMARY KEY DEFAULT gen_random_uuid(), \
             path TEXT COLLATE \"C\" NOT NULL UNIQUE, \
             due TIMESTAMPTZ, day DATE, doc JSONB, amount NUMERIC(10, 2), tags TEXT[])"
        ))
        .unwrap();
    let tree = TreeHandle::open(backend, options).unwrap();
    let root = tree.root().clone();
    assert!(matches!(root.id().value(), Value::Text(id) if Uuid::parse_str(id).is_ok()));

    let child = root
        .add_child(
            &tree,
            metadata([
                ("due", Value::from("2024-05-06T07:08:09Z")),
                ("day", Value::from("2024-05-06")),
                ("doc", Value::from(r#"{"done":false}"#)),
                ("amount", Value::from("-12.50")),
            ]),
        )
        .unwrap();
    let fetched = tree.get(child.id()).unwrap();
    assert_eq!(fetched.get("due"), Some(&Value::from("2024-05-06T07:08:09Z")));
    assert_eq!(fetched.get("day"), Some(&Value::from("2024-05-06")));
    assert_eq!(fetched.get("doc"), Some(&Value::from(r#"{"done":false}"#)));
    assert_eq!(fetched.get("amount"), Some(&Value::from("-12.50")));
    assert_eq!(fetched.get("tags"), Some(&Value::Null));
    assert_eq!(root.children(&tree).unwrap().len(), 1);
}

#[test]
fn postgres_accepts_c_collated_path_columns() {
    let Some(mut backend) = connect() else {
        return;
    };
    let options = fresh_options();
    create_table(backend.client(), &options, &[]).unwrap();
    verify_path_collation(backend.client(), &options).unwrap();
}

#[test]
fn postgres_rejects_linguistic_path_collation() {
    let Some(mut backend) = connect() else {
        return;
    };
    let client: &mut Client = backend.client();
    let has_und = client
        .query_opt("SELECT 1 FROM pg_collation WHERE collname = 'und-x-icu'", &[])
        .unwrap()
        .is_some();
    if !has_und {
        return;
    }
    let options = fresh_options();
    client
        .batch_execute(&format!(
            "CREATE TABLE \"{}\" (id BIGSERIAL PRIMARY KEY, \
             path TEXT COLLATE \"und-x-icu\" NOT NULL UNIQUE)",
            options.table
        ))
        .unwrap();
    let err = verify_path_collation(client, &options).unwrap_err();
    assert!(matches!(err, Error::Configuration(_)), "{err:?}");

    let missing = fresh_options();
    let err = verify_path_collation(client, &missing).unwrap_err();
    assert!(matches!(err, Error::Configuration(_)), "{err:?}");
}
