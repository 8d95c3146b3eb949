//! Shared test support for backend conformance suites.
//!
//! Every backend crate runs [`conformance_suite!`] against a factory that opens a fresh tree
//! over an empty table with a nullable `name TEXT` metadata column.

pub mod conformance;
pub mod faults;

use mptree_core::{metadata, Backend, Metadata, Node, NodeId, TreeHandle, Value};

/// What a conformance factory returns: a tree, optionally paired with a guard (a temp
/// directory, say) that must outlive it.
pub trait Fixture {
    type Backend: Backend;

    fn tree(&self) -> TreeHandle<Self::Backend>;
}

impl<B: Backend> Fixture for TreeHandle<B> {
    type Backend = B;

    fn tree(&self) -> TreeHandle<B> {
        self.clone()
    }
}

impl<B: Backend, G> Fixture for (TreeHandle<B>, G) {
    type Backend = B;

    fn tree(&self) -> TreeHandle<B> {
        self.0.clone()
    }
}

pub const NAME_COLUMN: &str = "name";
pub const NAME_COLUMN_DEF: &str = "\"name\" TEXT";

pub fn named(name: &str) -> Metadata {
    metadata([(NAME_COLUMN, name)])
}

pub fn name_of(node: &Node) -> String {
    match node.get(NAME_COLUMN) {
        Some(Value::Text(s)) => s.clone(),
        _ => String::new(),
    }
}

pub fn names(nodes: &[Node]) -> Vec<String> {
    nodes.iter().map(name_of).collect()
}

/// Every row as `(id, path)`, root first then document order.
pub fn snapshot<B: Backend>(tree: &TreeHandle<B>) -> Vec<(NodeId, String)> {
    let root = tree.root();
    let mut rows = vec![(root.id().clone(), root.path().to_string())];
    rows.extend(
        root.descendants(tree)
            .expect("list descendants")
            .into_iter()
            .map(|n| (n.id().clone(), n.path().to_string())),
    );
    rows
}

/// Check the structural invariants over the whole table.
pub fn assert_consistent<B: Backend>(tree: &TreeHandle<B>) {
    let codec = tree.codec();
    let all = tree.root().descendants(tree).expect("list descendants");
    assert_eq!(
        tree.node_count().expect("count rows"),
        all.len() as u64 + 1,
        "every row must sit under the root"
    );
    for pair in all.windows(2) {
        assert_eq!(
            codec.compare(pair[0].path(), pair[1].path()),
            std::cmp::Ordering::Less,
            "descendants must come back in strict path order"
        );
    }
    for node in &all {
        codec.decode(node.path()).expect("paths decode");
        let parent = node
            .parent(tree)
            .expect("parent lookup")
            .expect("non-root rows have a parent");
        assert!(parent.is_ancestor_of(node, codec));
    }
}
