use std::cell::Cell;
use std::rc::Rc;

use mptree_core::{Backend, Dialect, Error, Result, Row, Value};

/// Backend wrapper that cannot start transactions.
pub struct NoTransactions<B>(pub B);

impl<B: Backend> Backend for NoTransactions<B> {
    type Statement = B::Statement;

    fn dialect(&self) -> Dialect {
        self.0.dialect()
    }

    fn prepare(&mut self, sql: &str) -> Result<Self::Statement> {
        self.0.prepare(sql)
    }

    fn execute(&mut self, stmt: &Self::Statement, params: &[Value]) -> Result<u64> {
        self.0.execute(stmt, params)
    }

    fn query(&mut self, stmt: &Self::Statement, params: &[Value]) -> Result<Vec<Row>> {
        self.0.query(stmt, params)
    }

    fn begin(&mut self) -> Result<()> {
        Err(Error::Storage("transactions are not supported".into()))
    }

    fn commit(&mut self) -> Result<()> {
        Err(Error::Storage("transactions are not supported".into()))
    }

    fn rollback(&mut self) -> Result<()> {
        Err(Error::Storage("transactions are not supported".into()))
    }
}

/// Shared trigger for [`FailAfter`]: once armed with `n`, the wrapped backend lets `n` more
/// writes through and fails every one after that. A write is any `INSERT`, `UPDATE` or
/// `DELETE`, whether it runs through `execute` or (as `INSERT ... RETURNING`) through `query`.
#[derive(Clone, Default)]
pub struct FaultSwitch(Rc<Cell<Option<usize>>>);

impl FaultSwitch {
    pub fn arm(&self, successes: usize) {
        self.0.set(Some(successes));
    }

    pub fn disarm(&self) {
        self.0.set(None);
    }

    fn check(&self) -> Result<()> {
        match self.0.get() {
            None => Ok(()),
            Some(0) => Err(Error::Storage("injected failure".into())),
            Some(n) => {
                self.0.set(Some(n - 1));
                Ok(())
            }
        }
    }
}

/// Statement handle of [`FailAfter`]: the inner handle plus whether it writes.
#[derive(Clone)]
pub struct FaultStatement<S> {
    inner: S,
    writes: bool,
}

fn is_write(sql: &str) -> bool {
    let verb = sql
        .split_whitespace()
        .next()
        .map(str::to_ascii_uppercase)
        .unwrap_or_default();
    matches!(verb.as_str(), "INSERT" | "UPDATE" | "DELETE")
}

pub struct FailAfter<B> {
    inner: B,
    switch: FaultSwitch,
}

impl<B> FailAfter<B> {
    pub fn new(inner: B) -> (Self, FaultSwitch) {
        let switch = FaultSwitch::default();
        (
            Self {
                inner,
                switch: switch.clone(),
            },
            switch,
        )
    }

    fn guard<S>(&self, stmt: &FaultStatement<S>) -> Result<()> {
        if stmt.writes {
            self.switch.check()
        } else {
            Ok(())
        }
    }
}

impl<B: Backend> Backend for FailAfter<B> {
    type Statement = FaultStatement<B::Statement>;

    fn dialect(&self) -> Dialect {
        self.inner.dialect()
    }

    fn prepare(&mut self, sql: &str) -> Result<Self::Statement> {
        Ok(FaultStatement {
            inner: self.inner.prepare(sql)?,
            writes: is_write(sql),
        })
    }

    fn execute(&mut self, stmt: &Self::Statement, params: &[Value]) -> Result<u64> {
        self.guard(stmt)?;
        self.inner.execute(&stmt.inner, params)
    }

    fn query(&mut self, stmt: &Self::Statement, params: &[Value]) -> Result<Vec<Row>> {
        self.guard(stmt)?;
        self.inner.query(&stmt.inner, params)
    }

    fn begin(&mut self) -> Result<()> {
        self.inner.begin()
    }

    fn commit(&mut self) -> Result<()> {
        self.inner.commit()
    }

    fn rollback(&mut self) -> Result<()> {
        self.inner.rollback()
    }
}
