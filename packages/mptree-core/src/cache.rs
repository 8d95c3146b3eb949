use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;

use crate::error::Result;

/// Logical operations whose SQL text is generated once per handle.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum QueryKey {
    SelectById,
    SelectByPath,
    SelectChildren,
    SelectDescendants,
    SelectAncestors(usize),
    SelectSubtreePage,
    MaxChildPath,
    CountChildren,
    CountDescendants,
    CountAll,
    /// Insert carrying the given (sorted) metadata columns.
    Insert(Vec<String>),
    UpdatePathById,
    RebaseSubtree,
    SelectShiftTargets,
    DeleteById,
    DeleteSubtree,
    Find { subtree: bool, predicate: String },
}

/// Two memo tables scoped to one tree handle: logical key → SQL text, and SQL text →
/// prepared statement.
///
/// Cloning duplicates the text table and shares the statement table, because prepared
/// statements belong to the connection that clones share.
pub struct QueryCache<S> {
    texts: HashMap<QueryKey, Rc<str>>,
    statements: Rc<RefCell<HashMap<Rc<str>, S>>>,
}

impl<S> Default for QueryCache<S> {
    fn default() -> Self {
        Self {
            texts: HashMap::new(),
            statements: Rc::new(RefCell::new(HashMap::new())),
        }
    }
}

impl<S> Clone for QueryCache<S> {
    fn clone(&self) -> Self {
        Self {
            texts: self.texts.clone(),
            statements: Rc::clone(&self.statements),
        }
    }
}

impl<S: Clone> QueryCache<S> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn text(&mut self, key: &QueryKey, build: impl FnOnce() -> String) -> Rc<str> {
        if let Some(sql) = self.texts.get(key) {
            return Rc::clone(sql);
        }
        let sql: Rc<str> = build().into();
        tracing::debug!(?key, sql = %sql, "generated query text");
        self.texts.insert(key.clone(), Rc::clone(&sql));
        sql
    }

    pub fn statement(
        &self,
        sql: &Rc<str>,
        prepare: impl FnOnce(&str) -> Result<S>,
    ) -> Result<S> {
        if let Some(stmt) = self.statements.borrow().get(sql) {
            return Ok(stmt.clone());
        }
        let stmt = prepare(sql)?;
        tracing::debug!(sql = %sql, "prepared statement");
        self.statements
            .borrow_mut()
            .insert(Rc::clone(sql), stmt.clone());
        Ok(stmt)
    }

    pub fn text_count(&self) -> usize {
        self.texts.len()
    }

    pub fn statement_count(&self) -> usize {
        self.statements.borrow().len()
    }

    pub fn shares_statements_with(&self, other: &QueryCache<S>) -> bool {
        Rc::ptr_eq(&self.statements, &other.statements)
    }
}
