//! Backend-generic checks. Each takes a tree opened over an empty table with the default
//! codec and a `name` metadata column.

use std::cmp::Ordering;

use mptree_core::{
    metadata, Backend, Comparison, Error, Node, NodeId, Predicate, Result, TreeHandle,
};

use crate::{assert_consistent, name_of, named, names, snapshot};

/// Expand to one `#[test]` per conformance check. `$open` is called once per test and returns
/// an `Option` of a [`crate::Fixture`]; `None` skips the test (e.g. no database configured).
/// The fixture is dropped only after the check returns.
#[macro_export]
macro_rules! conformance_suite {
    ($open:expr) => {
        $crate::conformance_suite!(@tests $open;
            creates_root_on_empty_table,
            appends_children_in_order,
            insert_at_left_shifts_siblings,
            insert_in_middle_carries_subtrees,
            mixed_inserts_keep_sibling_order,
            moves_subtree_preserving_structure,
            rejects_move_into_own_subtree,
            root_cannot_be_moved_or_deleted,
            delete_without_cascade_rejects_non_leaf,
            cascade_delete_removes_only_subtree,
            traversal_is_document_ordered_and_restartable,
            relatives_follow_the_path_structure,
            stale_views_are_rejected,
            deleted_view_reads_fail_after_path_reuse,
            views_follow_rows_that_were_re_pathed,
            find_filters_metadata_within_scope,
            clone_shares_connection_and_statements,
            lookups_report_not_found,
            metadata_cannot_set_structural_columns,
        );
    };
    (@tests $open:expr; $($name:ident),* $(,)?) => {
        $(
            #[test]
            fn $name() {
                let Some(fixture) = ($open)() else {
                    return;
                };
                $crate::conformance::$name($crate::Fixture::tree(&fixture));
            }
        )*
    };
}

fn children_named<B: Backend>(tree: &TreeHandle<B>, parent: &Node, kids: &[&str]) -> Vec<Node> {
    parent
        .add_children(tree, kids.iter().map(|k| named(k)).collect())
        .expect("add children")
}

pub fn creates_root_on_empty_table<B: Backend>(tree: TreeHandle<B>) {
    let root = tree.root().clone();
    assert_eq!(tree.node_count().unwrap(), 1);
    assert_eq!(root.path(), tree.codec().root_path());
    assert!(root.is_root(tree.codec()));
    assert_eq!(root.parent(&tree).unwrap(), None);
    assert!(root.siblings(&tree).unwrap().is_empty());
    assert!(root.ancestors(&tree).unwrap().is_empty());

    let reopened = TreeHandle::open_shared(tree.connection(), tree.options().clone()).unwrap();
    assert_eq!(reopened.root().id(), root.id());
    assert_eq!(reopened.node_count().unwrap(), 1);
}

pub fn appends_children_in_order<B: Backend>(tree: TreeHandle<B>) {
    let root = tree.root().clone();
    let added = children_named(&tree, &root, &["a", "b", "c"]);
    assert_eq!(tree.node_count().unwrap(), 4);

    let paths: Vec<&str> = added.iter().map(|n| n.path()).collect();
    assert_eq!(paths, ["0001.0001", "0001.0002", "0001.0003"]);
    for path in &paths {
        assert_eq!(tree.codec().compare(root.path(), path), Ordering::Less);
    }
    assert_eq!(names(&added), ["a", "b", "c"]);
    assert_eq!(names(&root.children(&tree).unwrap()), ["a", "b", "c"]);

    let d = root.add_child(&tree, named("d")).unwrap();
    assert_eq!(d.path(), "0001.0004");
    assert_eq!(root.child_count(&tree).unwrap(), 4);
    assert_consistent(&tree);
}

pub fn insert_at_left_shifts_siblings<B: Backend>(tree: TreeHandle<B>) {
    let root = tree.root().clone();
    let existing = children_named(&tree, &root, &["a", "b"]);
    let before = snapshot(&tree);

    let added = root
        .add_children_at_left(&tree, vec![named("first")])
        .unwrap();
    assert_eq!(added.len(), 1);
    assert_eq!(added[0].path(), "0001.0001");

    let after = snapshot(&tree);
    let changed = after.iter().filter(|row| !before.contains(row)).count();
    assert_eq!(changed, 3, "one insert plus two re-pathed siblings");

    assert_eq!(names(&root.children(&tree).unwrap()), ["first", "a", "b"]);
    for (node, expected) in existing.iter().zip(["0001.0002", "0001.0003"]) {
        assert_eq!(tree.get(node.id()).unwrap().path(), expected);
    }
    assert_consistent(&tree);
}

pub fn insert_in_middle_carries_subtrees<B: Backend>(tree: TreeHandle<B>) {
    let root = tree.root().clone();
    let kids = children_named(&tree, &root, &["a", "b", "c"]);
    let b1 = kids[1].add_child(&tree, named("b1")).unwrap();
    b1.add_child(&tree, named("b1x")).unwrap();
    let c1 = kids[2].add_child(&tree, named("c1")).unwrap();

    let added = root
        .add_children_at(&tree, 1, vec![named("x"), named("y")])
        .unwrap();
    assert_eq!(
        added.iter().map(|n| n.path()).collect::<Vec<_>>(),
        ["0001.0002", "0001.0003"]
    );
    assert_eq!(
        names(&root.children(&tree).unwrap()),
        ["a", "x", "y", "b", "c"]
    );

    let b_now = tree.get(kids[1].id()).unwrap();
    assert_eq!(b_now.path(), "0001.0004");
    assert_eq!(names(&b_now.descendants(&tree).unwrap()), ["b1", "b1x"]);
    assert_eq!(tree.get(c1.id()).unwrap().path(), "0001.0005.0001");

    let tail = root.add_children_at(&tree, 99, vec![named("z")]).unwrap();
    assert_eq!(tail[0].path(), "0001.0006");
    assert_consistent(&tree);
}

pub fn mixed_inserts_keep_sibling_order<B: Backend>(tree: TreeHandle<B>) {
    let root = tree.root().clone();
    let p = root.add_child(&tree, named("p")).unwrap();

    children_named(&tree, &p, &["1", "2"]);
    p.add_children_at_left(&tree, vec![named("0")]).unwrap();
    children_named(&tree, &p, &["3"]);
    p.add_children_at(&tree, 2, vec![named("1.5")]).unwrap();
    p.add_children_at_left(&tree, vec![named("-1"), named("-0.5")])
        .unwrap();

    let kids = p.children(&tree).unwrap();
    assert_eq!(names(&kids), ["-1", "-0.5", "0", "1", "1.5", "2", "3"]);
    for pair in kids.windows(2) {
        assert_eq!(
            tree.codec().compare(pair[0].path(), pair[1].path()),
            Ordering::Less
        );
    }
    assert_consistent(&tree);
}

pub fn moves_subtree_preserving_structure<B: Backend>(tree: TreeHandle<B>) {
    let root = tree.root().clone();
    let top = children_named(&tree, &root, &["src", "dst"]);
    let (src, dst) = (&top[0], &top[1]);
    let mut m = src.add_child(&tree, named("m")).unwrap();
    let m_kids = children_named(&tree, &m, &["m1", "m2"]);
    children_named(&tree, &m_kids[0], &["m1a", "m1b"]);
    dst.add_child(&tree, named("d1")).unwrap();

    let old_path = m.path().to_string();
    let old_descendants = m.descendants(&tree).unwrap();
    assert_eq!(old_descendants.len(), 4);
    let before = snapshot(&tree);

    let rewritten = m.move_to(&tree, dst).unwrap();
    assert_eq!(rewritten, 5);
    assert_eq!(m.path(), format!("{}.0002", dst.path()));

    for old in &old_descendants {
        let now = tree.get(old.id()).unwrap();
        let suffix = &old.path()[old_path.len()..];
        assert_eq!(now.path(), format!("{}{suffix}", m.path()));
        assert_eq!(name_of(&now), name_of(old));
    }

    let after = snapshot(&tree);
    let changed = after.iter().filter(|row| !before.contains(row)).count();
    assert_eq!(changed, 5);
    assert!(src.children(&tree).unwrap().is_empty());
    assert_eq!(
        names(&m.descendants(&tree).unwrap()),
        names(&old_descendants)
    );
    assert_eq!(names(&dst.children(&tree).unwrap()), ["d1", "m"]);
    assert_consistent(&tree);
}

pub fn rejects_move_into_own_subtree<B: Backend>(tree: TreeHandle<B>) {
    let root = tree.root().clone();
    let m = root.add_child(&tree, named("m")).unwrap();
    let m1 = m.add_child(&tree, named("m1")).unwrap();
    let m1a = m1.add_child(&tree, named("m1a")).unwrap();
    let before = snapshot(&tree);

    for target in [&m1a, &m1, &m] {
        let mut moving = m.clone();
        let err = moving.move_to(&tree, target).unwrap_err();
        assert!(matches!(err, Error::InvalidOperation(_)), "{err:?}");
        assert_eq!(moving.path(), m.path());
    }
    assert_eq!(snapshot(&tree), before);
}

pub fn root_cannot_be_moved_or_deleted<B: Backend>(tree: TreeHandle<B>) {
    let root = tree.root().clone();
    let child = root.add_child(&tree, named("c")).unwrap();

    let err = root.clone().move_to(&tree, &child).unwrap_err();
    assert!(matches!(err, Error::InvalidOperation(_)), "{err:?}");
    let err = root.delete(&tree, true).unwrap_err();
    assert!(matches!(err, Error::InvalidOperation(_)), "{err:?}");
    assert_eq!(tree.node_count().unwrap(), 2);
}

pub fn delete_without_cascade_rejects_non_leaf<B: Backend>(tree: TreeHandle<B>) {
    let root = tree.root().clone();
    let p = root.add_child(&tree, named("p")).unwrap();
    let leaf = p.add_child(&tree, named("leaf")).unwrap();
    let before = snapshot(&tree);

    let err = p.clone().delete(&tree, false).unwrap_err();
    assert!(matches!(err, Error::InvalidOperation(_)), "{err:?}");
    assert_eq!(snapshot(&tree), before);

    assert_eq!(leaf.delete(&tree, false).unwrap(), 1);
    assert_eq!(p.delete(&tree, false).unwrap(), 1);
    assert_eq!(tree.node_count().unwrap(), 1);
}

pub fn cascade_delete_removes_only_subtree<B: Backend>(tree: TreeHandle<B>) {
    let root = tree.root().clone();
    let top = children_named(&tree, &root, &["a", "b"]);
    let a_kids = children_named(&tree, &top[0], &["a1", "a2"]);
    let a1x = a_kids[0].add_child(&tree, named("a1x")).unwrap();
    let b1 = top[1].add_child(&tree, named("b1")).unwrap();
    assert_eq!(tree.node_count().unwrap(), 7);

    let removed = top[0].clone().delete(&tree, true).unwrap();
    assert_eq!(removed, 4);
    assert_eq!(tree.node_count().unwrap(), 3);
    assert!(matches!(tree.get(a1x.id()), Err(Error::NotFound(_))));
    assert_eq!(tree.get(b1.id()).unwrap().path(), b1.path());
    assert_eq!(tree.get(top[1].id()).unwrap().path(), top[1].path());
    assert_consistent(&tree);
}

pub fn traversal_is_document_ordered_and_restartable<B: Backend>(tree: TreeHandle<B>) {
    let root = tree.root().clone();
    let top = children_named(&tree, &root, &["a", "b", "c"]);
    let a_kids = children_named(&tree, &top[0], &["a1", "a2"]);
    a_kids[0].add_child(&tree, named("a1x")).unwrap();
    top[1].add_child(&tree, named("b1")).unwrap();

    let mut walk = root.traverse(&tree).unwrap().with_page_size(2);
    let first: Vec<Node> = walk.by_ref().collect::<Result<_>>().unwrap();
    assert_eq!(names(&first), ["a", "a1", "a1x", "a2", "b", "b1", "c"]);
    assert_eq!(first, root.descendants(&tree).unwrap());
    assert!(walk.next().is_none(), "traversal is finite");

    walk.restart();
    let second: Vec<Node> = walk.collect::<Result<_>>().unwrap();
    assert_eq!(second, first);

    let mut seen = Vec::new();
    let visited = top[0]
        .walk(&tree, |n| {
            seen.push(name_of(n));
            Ok(())
        })
        .unwrap();
    assert_eq!(visited, 3);
    assert_eq!(seen, ["a1", "a1x", "a2"]);

    let mut calls = 0;
    let err = root
        .walk(&tree, |_| {
            calls += 1;
            if calls == 2 {
                return Err(Error::InvalidOperation("stop".into()));
            }
            Ok(())
        })
        .unwrap_err();
    assert!(matches!(err, Error::InvalidOperation(_)));
    assert_eq!(calls, 2);
}

pub fn relatives_follow_the_path_structure<B: Backend>(tree: TreeHandle<B>) {
    let root = tree.root().clone();
    let top = children_named(&tree, &root, &["a", "b"]);
    let a_kids = children_named(&tree, &top[0], &["a1", "a2"]);
    let leaves = children_named(&tree, &a_kids[0], &["a1x", "a1y"]);

    let ancestors = leaves[0].ancestors(&tree).unwrap();
    assert_eq!(ancestors.len(), 3);
    assert_eq!(ancestors[0].id(), root.id());
    assert_eq!(names(&ancestors[1..]), ["a", "a1"]);

    let parent = leaves[0].parent(&tree).unwrap().unwrap();
    assert_eq!(parent.id(), a_kids[0].id());
    assert_eq!(names(&leaves[0].siblings(&tree).unwrap()), ["a1y"]);
    assert_eq!(names(&top[0].siblings(&tree).unwrap()), ["b"]);
    assert_eq!(names(&top[0].children(&tree).unwrap()), ["a1", "a2"]);
    assert_eq!(top[0].descendant_count(&tree).unwrap(), 4);
    assert_eq!(leaves[0].position_sequence(tree.codec()).unwrap(), vec![1, 1, 1, 1]);
    assert_eq!(leaves[1].depth(tree.codec()), 4);
    assert!(top[0].is_ancestor_of(&leaves[1], tree.codec()));
    assert!(!top[1].is_ancestor_of(&leaves[1], tree.codec()));
}

pub fn stale_views_are_rejected<B: Backend>(tree: TreeHandle<B>) {
    let root = tree.root().clone();
    let p = root.add_child(&tree, named("p")).unwrap();
    let c = p.add_child(&tree, named("c")).unwrap();
    p.delete(&tree, true).unwrap();

    let mut stale = c.clone();
    assert!(matches!(stale.refresh(&tree), Err(Error::StaleNode(_))));
    assert!(matches!(
        c.clone().move_to(&tree, &root),
        Err(Error::StaleNode(_))
    ));
    assert!(matches!(
        c.add_child(&tree, named("x")),
        Err(Error::StaleNode(_))
    ));
    assert!(matches!(c.delete(&tree, false), Err(Error::StaleNode(_))));
    assert_eq!(tree.node_count().unwrap(), 1);
}

pub fn deleted_view_reads_fail_after_path_reuse<B: Backend>(tree: TreeHandle<B>) {
    let root = tree.root().clone();
    let top = children_named(&tree, &root, &["a", "b"]);
    let b = top[1].clone();
    b.add_child(&tree, named("b1")).unwrap();
    top[1].clone().delete(&tree, true).unwrap();

    // Appending after the delete issues b's old path to a new row.
    let reused = root.add_child(&tree, named("b2")).unwrap();
    assert_eq!(reused.path(), b.path());
    reused.add_child(&tree, named("b2-child")).unwrap();

    assert!(matches!(b.parent(&tree), Err(Error::StaleNode(_))));
    assert!(matches!(b.children(&tree), Err(Error::StaleNode(_))));
    assert!(matches!(b.child_count(&tree), Err(Error::StaleNode(_))));
    assert!(matches!(b.siblings(&tree), Err(Error::StaleNode(_))));
    assert!(matches!(b.descendants(&tree), Err(Error::StaleNode(_))));
    assert!(matches!(b.descendant_count(&tree), Err(Error::StaleNode(_))));
    assert!(matches!(b.ancestors(&tree), Err(Error::StaleNode(_))));
    assert!(matches!(b.traverse(&tree), Err(Error::StaleNode(_))));
    assert!(matches!(b.walk(&tree, |_| Ok(())), Err(Error::StaleNode(_))));
    assert!(matches!(
        b.find(&tree, &Predicate::eq("name", "b2-child")),
        Err(Error::StaleNode(_))
    ));

    assert_eq!(names(&reused.children(&tree).unwrap()), ["b2-child"]);
}

pub fn views_follow_rows_that_were_re_pathed<B: Backend>(tree: TreeHandle<B>) {
    let root = tree.root().clone();
    let top = children_named(&tree, &root, &["a", "b"]);
    let b = &top[1];
    let b1 = b.add_child(&tree, named("b1")).unwrap();

    root.add_children_at_left(&tree, vec![named("z")]).unwrap();
    // `b` still carries 0001.0002, which now belongs to "a".
    let b2 = b.add_child(&tree, named("b2")).unwrap();
    assert_eq!(b2.path(), "0001.0003.0002");

    let b_now = tree.get(b.id()).unwrap();
    assert_eq!(names(&b_now.children(&tree).unwrap()), ["b1", "b2"]);
    // Reads through the old view follow the row, not the path it last saw.
    assert_eq!(names(&b.children(&tree).unwrap()), ["b1", "b2"]);
    assert_eq!(names(&b.siblings(&tree).unwrap()), ["z", "a"]);
    assert_eq!(b.descendant_count(&tree).unwrap(), 2);

    let mut b1_view = b1.clone();
    b1_view.refresh(&tree).unwrap();
    assert_eq!(b1_view.path(), "0001.0003.0001");
    assert_consistent(&tree);
}

pub fn find_filters_metadata_within_scope<B: Backend>(tree: TreeHandle<B>) {
    let root = tree.root().clone();
    let top = children_named(&tree, &root, &["a", "b"]);
    children_named(&tree, &top[0], &["target", "other"]);
    children_named(&tree, &top[1], &["target"]);

    let target = Predicate::eq("name", "target");
    let everywhere = root.find(&tree, &target).unwrap();
    assert_eq!(everywhere.len(), 2);
    assert_eq!(
        tree.codec().compare(everywhere[0].path(), everywhere[1].path()),
        Ordering::Less
    );

    let under_a = top[0].find(&tree, &target).unwrap();
    assert_eq!(under_a.len(), 1);
    assert!(top[0].is_ancestor_of(&under_a[0], tree.codec()));

    let unnamed = tree.find(&Predicate::is_null("name")).unwrap();
    assert_eq!(unnamed.len(), 1);
    assert_eq!(unnamed[0].id(), root.id());

    let not_target = Predicate::And(vec![
        Predicate::not(Predicate::eq("name", "target")),
        Predicate::compare("name", Comparison::Like, "o%"),
    ]);
    assert_eq!(names(&root.find(&tree, &not_target).unwrap()), ["other"]);
}

pub fn clone_shares_connection_and_statements<B: Backend>(tree: TreeHandle<B>) {
    let copy = tree.clone();
    assert!(copy.shares_connection_with(&tree));
    assert!(copy.shares_statements_with(&tree));
    assert_eq!(copy.supports_transactions(), tree.supports_transactions());
    assert_eq!(copy.root().id(), tree.root().id());

    let added = copy.root().add_child(&copy, named("via-clone")).unwrap();
    assert_eq!(tree.get(added.id()).unwrap().path(), added.path());
}

pub fn lookups_report_not_found<B: Backend>(tree: TreeHandle<B>) {
    let root = tree.root().clone();
    let a = root.add_child(&tree, named("a")).unwrap();

    assert!(matches!(
        tree.get(&NodeId::from(987_654_321i64)),
        Err(Error::NotFound(_))
    ));
    assert!(matches!(
        tree.get_by_path("0001.0042"),
        Err(Error::NotFound(_))
    ));
    assert!(matches!(
        tree.get_by_path("not-a-path"),
        Err(Error::MalformedPath { .. })
    ));
    assert_eq!(tree.get_by_path(a.path()).unwrap().id(), a.id());
    assert_eq!(tree.get(a.id()).unwrap(), a);
}

pub fn metadata_cannot_set_structural_columns<B: Backend>(tree: TreeHandle<B>) {
    let root = tree.root().clone();
    for column in ["id", "path"] {
        let err = root
            .add_child(&tree, metadata([(column, "0001.0009")]))
            .unwrap_err();
        assert!(matches!(err, Error::InvalidOperation(_)), "{err:?}");
    }
    assert_eq!(tree.node_count().unwrap(), 1);
}
