use std::cell::RefCell;

use crate::backend::Backend;
use crate::error::{Error, Result};

/// Runs multi-statement units of work atomically when the backend can.
///
/// Capability is detected once (begin + rollback) and fixed for the handle's lifetime.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TransactionRunner {
    supported: bool,
}

impl TransactionRunner {
    pub fn new(supported: bool) -> Self {
        Self { supported }
    }

    pub fn detect<B: Backend>(conn: &mut B) -> Self {
        let supported = match conn.begin() {
            Ok(()) => match conn.rollback() {
                Ok(()) => true,
                Err(e) => {
                    tracing::warn!(error = %e, "transaction check could not roll back");
                    false
                }
            },
            Err(e) => {
                tracing::debug!(error = %e, "backend cannot start transactions");
                false
            }
        };
        Self { supported }
    }

    pub fn supported(&self) -> bool {
        self.supported
    }

    /// Run `work` inside a transaction: commit on success, roll back and return the original
    /// error on failure. Without transaction support `work` runs directly and a partial
    /// result on failure is possible.
    ///
    /// `work` must not hold a borrow of `conn` across its own statements; the runner borrows
    /// it only to begin, commit, or roll back.
    pub fn run<B, T>(
        &self,
        conn: &RefCell<B>,
        operation: &str,
        work: impl FnOnce() -> Result<T>,
    ) -> Result<T>
    where
        B: Backend,
    {
        if !self.supported {
            tracing::warn!(
                operation,
                "backend has no transactions; multi-row change is not atomic"
            );
            return work();
        }

        conn.borrow_mut().begin()?;
        match work() {
            Ok(value) => {
                let mut c = conn.borrow_mut();
                if let Err(e) = c.commit() {
                    if let Err(rollback_err) = c.rollback() {
                        tracing::warn!(operation, error = %rollback_err, "rollback after failed commit also failed");
                    }
                    return Err(Error::Transaction(format!("commit of {operation} failed: {e}")));
                }
                Ok(value)
            }
            Err(e) => {
                if let Err(rollback_err) = conn.borrow_mut().rollback() {
                    tracing::warn!(operation, error = %rollback_err, "rollback failed; returning original error");
                }
                Err(e)
            }
        }
    }
}
