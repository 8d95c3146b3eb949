use crate::backend::Backend;
use crate::cache::QueryKey;
use crate::codec::{PathCodec, Position};
use crate::error::{Error, Result};
use crate::filter::FilterBuilder;
use crate::queries::MAX_PATH_ALIAS;
use crate::traverse::Traversal;
use crate::tree::TreeHandle;
use crate::value::{Metadata, NodeId, Value};

/// View of one persisted row: its id, its path, and its metadata columns.
///
/// Views are cheap to rebuild and hold no link to other nodes; every relative is a query.
/// Relative reads and mutations first re-read the row by id, so a view whose path changed
/// underneath (an ancestor moved, a sibling was inserted to the left) still acts on the
/// current row, and a view whose row is gone fails with [`Error::StaleNode`] even if its old
/// path has since been issued to another row. The accessors (`path`, `depth`, ...) report
/// the path captured when the view was built.
#[derive(Clone, Debug, PartialEq)]
pub struct Node {
    id: NodeId,
    path: String,
    metadata: Metadata,
}

impl Node {
    pub(crate) fn new(id: NodeId, path: String, metadata: Metadata) -> Self {
        Self { id, path, metadata }
    }

    pub fn id(&self) -> &NodeId {
        &self.id
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn metadata(&self) -> &Metadata {
        &self.metadata
    }

    pub fn get(&self, column: &str) -> Option<&Value> {
        self.metadata.get(column)
    }

    pub fn depth(&self, codec: &PathCodec) -> usize {
        codec.depth(&self.path)
    }

    pub fn is_root(&self, codec: &PathCodec) -> bool {
        codec.parent_path(&self.path).is_none()
    }

    pub fn position_sequence(&self, codec: &PathCodec) -> Result<Vec<Position>> {
        codec.decode(&self.path)
    }

    pub fn is_ancestor_of(&self, other: &Node, codec: &PathCodec) -> bool {
        codec.is_prefix_of(&self.path, &other.path)
    }

    /// Re-read this row by id.
    pub fn refresh<B: Backend>(&mut self, tree: &TreeHandle<B>) -> Result<()> {
        *self = self.reload(tree)?;
        Ok(())
    }

    fn reload<B: Backend>(&self, tree: &TreeHandle<B>) -> Result<Node> {
        tree.select_one(&QueryKey::SelectById, &[self.id.0.clone()])?
            .ok_or_else(|| {
                Error::StaleNode(format!(
                    "row {} (last seen at {:?}) no longer exists",
                    self.id, self.path
                ))
            })
    }

    fn current_path<B: Backend>(&self, tree: &TreeHandle<B>) -> Result<String> {
        Ok(self.reload(tree)?.path)
    }

    pub fn parent<B: Backend>(&self, tree: &TreeHandle<B>) -> Result<Option<Node>> {
        let path = self.current_path(tree)?;
        let Some(parent_path) = tree.codec().parent_path(&path) else {
            return Ok(None);
        };
        tree.select_one(&QueryKey::SelectByPath, &[text(parent_path)])?
            .map(Some)
            .ok_or_else(|| {
                Error::NotFound(format!(
                    "parent {parent_path:?} of {path:?} is missing (orphaned row)"
                ))
            })
    }

    pub fn children<B: Backend>(&self, tree: &TreeHandle<B>) -> Result<Vec<Node>> {
        let path = self.current_path(tree)?;
        tree.select_nodes(&QueryKey::SelectChildren, &children_params(tree.codec(), &path))
    }

    pub fn child_count<B: Backend>(&self, tree: &TreeHandle<B>) -> Result<u64> {
        let path = self.current_path(tree)?;
        tree.count(&QueryKey::CountChildren, &children_params(tree.codec(), &path))
    }

    /// Other children of this node's parent, in order. Empty for the root.
    pub fn siblings<B: Backend>(&self, tree: &TreeHandle<B>) -> Result<Vec<Node>> {
        let path = self.current_path(tree)?;
        let Some(parent_path) = tree.codec().parent_path(&path) else {
            return Ok(Vec::new());
        };
        let mut nodes =
            tree.select_nodes(&QueryKey::SelectChildren, &children_params(tree.codec(), parent_path))?;
        nodes.retain(|n| n.id != self.id);
        Ok(nodes)
    }

    pub fn descendants<B: Backend>(&self, tree: &TreeHandle<B>) -> Result<Vec<Node>> {
        let path = self.current_path(tree)?;
        tree.select_nodes(&QueryKey::SelectDescendants, &subtree_params(tree.codec(), &path))
    }

    pub fn descendant_count<B: Backend>(&self, tree: &TreeHandle<B>) -> Result<u64> {
        let path = self.current_path(tree)?;
        tree.count(&QueryKey::CountDescendants, &subtree_params(tree.codec(), &path))
    }

    /// Root-first lineage of this node.
    pub fn ancestors<B: Backend>(&self, tree: &TreeHandle<B>) -> Result<Vec<Node>> {
        let codec = tree.codec();
        let path = self.current_path(tree)?;
        let paths = codec.ancestor_paths(&path);
        if paths.is_empty() {
            return Ok(Vec::new());
        }
        let params: Vec<Value> = paths.into_iter().map(Value::Text).collect();
        let mut nodes = tree.select_nodes(&QueryKey::SelectAncestors(params.len()), &params)?;
        nodes.retain(|n| codec.is_prefix_of(&n.path, &path));
        Ok(nodes)
    }

    pub fn add_child<B: Backend>(&self, tree: &TreeHandle<B>, metadata: Metadata) -> Result<Node> {
        let mut added = self.add_children(tree, vec![metadata])?;
        added
            .pop()
            .ok_or_else(|| Error::Storage("insert produced no row".into()))
    }

    /// Append rows as the rightmost children, in the given order.
    pub fn add_children<B: Backend>(
        &self,
        tree: &TreeHandle<B>,
        children: Vec<Metadata>,
    ) -> Result<Vec<Node>> {
        match children.len() {
            0 => Ok(Vec::new()),
            1 => self.append_children(tree, &children),
            _ => tree.transaction("add_children", || self.append_children(tree, &children)),
        }
    }

    pub fn add_children_at_left<B: Backend>(
        &self,
        tree: &TreeHandle<B>,
        children: Vec<Metadata>,
    ) -> Result<Vec<Node>> {
        self.add_children_at(tree, 0, children)
    }

    /// Insert rows before the existing child at `index` (0-based, in current child order).
    /// An index past the last child appends.
    ///
    /// Every sibling at or after `index`, with its whole subtree, is re-pathed `children.len()`
    /// positions to the right inside one transaction.
    pub fn add_children_at<B: Backend>(
        &self,
        tree: &TreeHandle<B>,
        index: usize,
        children: Vec<Metadata>,
    ) -> Result<Vec<Node>> {
        if children.is_empty() {
            return Ok(Vec::new());
        }
        tree.transaction("add_children_at", || {
            let codec = tree.codec();
            let parent = self.current_path(tree)?;
            let existing =
                tree.select_nodes(&QueryKey::SelectChildren, &children_params(codec, &parent))?;
            let (Some(anchor), Some(last)) = (existing.get(index), existing.last()) else {
                return self.append_under(tree, &parent, &children);
            };

            let shift = children.len() as Position;
            let start = codec.last_position(&anchor.path)?;
            let end = codec.last_position(&last.path)?;
            if end + shift > codec.max_position() {
                return Err(capacity_error(codec, &parent));
            }

            // Descending path order: each row's target slot was vacated by an earlier update.
            let level = codec.depth(&parent) + 1;
            let (_, upper) = codec.subtree_bounds(&parent);
            let targets = tree.query_rows(
                &QueryKey::SelectShiftTargets,
                &[text(&anchor.path), Value::Text(upper)],
            )?;
            let shifted = targets.len();
            for row in targets {
                let (id, path) = tree.id_and_path(row)?;
                let moved = codec.shift(&path, level, shift)?;
                tree.execute(&QueryKey::UpdatePathById, &[Value::Text(moved), id])?;
            }
            tracing::debug!(parent = %parent, shifted, inserted = children.len(), "inserted children");

            children
                .iter()
                .enumerate()
                .map(|(i, meta)| {
                    let path = codec.child_path(&parent, start + i as Position)?;
                    tree.insert_row(&path, meta)
                })
                .collect()
        })
    }

    fn append_children<B: Backend>(
        &self,
        tree: &TreeHandle<B>,
        children: &[Metadata],
    ) -> Result<Vec<Node>> {
        let parent = self.current_path(tree)?;
        self.append_under(tree, &parent, children)
    }

    fn append_under<B: Backend>(
        &self,
        tree: &TreeHandle<B>,
        parent: &str,
        children: &[Metadata],
    ) -> Result<Vec<Node>> {
        let codec = tree.codec();
        let first = next_position(tree, parent)?;
        if first - 1 + children.len() as Position > codec.max_position() {
            return Err(capacity_error(codec, parent));
        }
        children
            .iter()
            .enumerate()
            .map(|(i, meta)| {
                let path = codec.child_path(parent, first + i as Position)?;
                tree.insert_row(&path, meta)
            })
            .collect()
    }

    /// Re-parent this node (and its subtree) as the last child of `new_parent`.
    ///
    /// Returns the number of rows rewritten: this node plus its descendants.
    pub fn move_to<B: Backend>(&mut self, tree: &TreeHandle<B>, new_parent: &Node) -> Result<u64> {
        let codec = tree.codec();
        let (new_path, rewritten) = tree.transaction("move_to", || {
            let old = self.current_path(tree)?;
            if codec.parent_path(&old).is_none() {
                return Err(Error::InvalidOperation("the root cannot be moved".into()));
            }
            let target = new_parent.current_path(tree)?;
            if target == old || codec.is_prefix_of(&old, &target) {
                return Err(Error::InvalidOperation(format!(
                    "cannot move {old:?} under its own subtree ({target:?})"
                )));
            }

            let new_path = codec.child_path(&target, next_position(tree, &target)?)?;
            let (lower, upper) = codec.subtree_bounds(&old);
            let suffix_start = old.len() as i64 + 1;
            let rewritten = tree.execute(
                &QueryKey::RebaseSubtree,
                &[
                    text(&new_path),
                    Value::Integer(suffix_start),
                    Value::Text(old.clone()),
                    Value::Text(lower),
                    Value::Text(upper),
                ],
            )?;
            tracing::debug!(from = %old, to = %new_path, rewritten, "moved subtree");
            Ok((new_path, rewritten))
        })?;
        self.path = new_path;
        Ok(rewritten)
    }

    /// Delete this node. With `cascade` the whole subtree goes; without it a node that still
    /// has children is rejected. Returns the number of rows removed.
    pub fn delete<B: Backend>(self, tree: &TreeHandle<B>, cascade: bool) -> Result<u64> {
        tree.transaction("delete", || {
            let codec = tree.codec();
            let path = self.current_path(tree)?;
            if codec.parent_path(&path).is_none() {
                return Err(Error::InvalidOperation("the root cannot be deleted".into()));
            }
            let params = subtree_params(codec, &path);
            if !cascade {
                let below = tree.count(&QueryKey::CountDescendants, &params)?;
                if below > 0 {
                    return Err(Error::InvalidOperation(format!(
                        "{path:?} has {below} descendants; delete with cascade to remove them"
                    )));
                }
                return tree.execute(&QueryKey::DeleteById, &[self.id.0.clone()]);
            }
            let mut all = Vec::with_capacity(3);
            all.push(Value::Text(path.clone()));
            all.extend(params);
            let removed = tree.execute(&QueryKey::DeleteSubtree, &all)?;
            tracing::debug!(path = %path, removed, "deleted subtree");
            Ok(removed)
        })
    }

    /// Lazy document-order iterator over this node's descendants, rooted at the row's
    /// current path.
    pub fn traverse<'t, B: Backend>(&self, tree: &'t TreeHandle<B>) -> Result<Traversal<'t, B>> {
        let path = self.current_path(tree)?;
        Ok(Traversal::new(tree, &path))
    }

    /// Visit every descendant in document order; stops at the first visitor error.
    pub fn walk<B: Backend>(
        &self,
        tree: &TreeHandle<B>,
        mut visitor: impl FnMut(&Node) -> Result<()>,
    ) -> Result<usize> {
        let mut visited = 0;
        for node in self.traverse(tree)? {
            visitor(&node?)?;
            visited += 1;
        }
        Ok(visited)
    }

    /// Descendants matching `filter`, in document order.
    pub fn find<B: Backend>(
        &self,
        tree: &TreeHandle<B>,
        filter: &dyn FilterBuilder,
    ) -> Result<Vec<Node>> {
        let path = self.current_path(tree)?;
        let fragment = filter.to_sql(tree.dialect(), 3)?;
        let mut params = subtree_params(tree.codec(), &path);
        params.extend(fragment.params);
        let key = QueryKey::Find {
            subtree: true,
            predicate: fragment.sql,
        };
        tree.select_nodes(&key, &params)
    }
}

fn text(s: &str) -> Value {
    Value::Text(s.to_string())
}

fn subtree_params(codec: &PathCodec, path: &str) -> Vec<Value> {
    let (lower, upper) = codec.subtree_bounds(path);
    vec![Value::Text(lower), Value::Text(upper)]
}

fn children_params(codec: &PathCodec, parent: &str) -> Vec<Value> {
    let mut params = subtree_params(codec, parent);
    params.push(Value::Integer(codec.child_path_len(parent) as i64));
    params
}

fn next_position<B: Backend>(tree: &TreeHandle<B>, parent: &str) -> Result<Position> {
    let rows = tree.query_rows(&QueryKey::MaxChildPath, &children_params(tree.codec(), parent))?;
    let max = rows
        .first()
        .and_then(|row| row.get(MAX_PATH_ALIAS).or_else(|| row.get_index(0)));
    match max {
        None | Some(Value::Null) => Ok(1),
        Some(Value::Text(path)) => Ok(tree.codec().last_position(path)? + 1),
        Some(other) => Err(Error::Storage(format!("MAX(path) returned {other}"))),
    }
}

fn capacity_error(codec: &PathCodec, parent: &str) -> Error {
    Error::InvalidOperation(format!(
        "{parent:?} cannot hold more than {} children at width {}",
        codec.max_position(),
        codec.width()
    ))
}
