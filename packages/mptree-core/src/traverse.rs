use std::collections::VecDeque;

use crate::backend::Backend;
use crate::cache::QueryKey;
use crate::error::Result;
use crate::node::Node;
use crate::tree::TreeHandle;
use crate::value::Value;

pub const DEFAULT_PAGE_SIZE: usize = 256;

/// Lazy, restartable iterator over a subtree in document (path) order.
///
/// Rows are fetched in keyset pages (`path > last_seen ORDER BY path LIMIT n`), so the
/// iterator is finite and never materializes the whole subtree. Mutations made while
/// iterating are visible to later pages.
pub struct Traversal<'t, B: Backend> {
    tree: &'t TreeHandle<B>,
    start: String,
    cursor: String,
    upper: String,
    page_size: usize,
    buffer: VecDeque<Node>,
    exhausted: bool,
}

impl<'t, B: Backend> Traversal<'t, B> {
    pub(crate) fn new(tree: &'t TreeHandle<B>, path: &str) -> Self {
        let (lower, upper) = tree.codec().subtree_bounds(path);
        Self {
            tree,
            start: lower.clone(),
            cursor: lower,
            upper,
            page_size: DEFAULT_PAGE_SIZE,
            buffer: VecDeque::new(),
            exhausted: false,
        }
    }

    pub fn with_page_size(mut self, page_size: usize) -> Self {
        self.page_size = page_size.max(1);
        self
    }

    /// Rewind to the first descendant.
    pub fn restart(&mut self) {
        self.cursor = self.start.clone();
        self.buffer.clear();
        self.exhausted = false;
    }

    fn fetch_page(&mut self) -> Result<()> {
        let page = self.tree.select_nodes(
            &QueryKey::SelectSubtreePage,
            &[
                Value::Text(self.cursor.clone()),
                Value::Text(self.upper.clone()),
                Value::Integer(self.page_size as i64),
            ],
        )?;
        if page.len() < self.page_size {
            self.exhausted = true;
        }
        if let Some(last) = page.last() {
            self.cursor = last.path().to_string();
        }
        self.buffer.extend(page);
        Ok(())
    }
}

impl<B: Backend> Iterator for Traversal<'_, B> {
    type Item = Result<Node>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.buffer.is_empty() && !self.exhausted {
            if let Err(e) = self.fetch_page() {
                self.exhausted = true;
                return Some(Err(e));
            }
        }
        self.buffer.pop_front().map(Ok)
    }
}
