use crate::backend::Dialect;
use crate::config::quote_ident;
use crate::error::{Error, Result};
use crate::value::Value;

/// Boolean SQL expression plus its bound parameters.
#[derive(Clone, Debug, PartialEq)]
pub struct SqlFragment {
    pub sql: String,
    pub params: Vec<Value>,
}

/// Query-builder collaborator used by the `find` family.
///
/// Implementations render a predicate over metadata columns; placeholders must be numbered
/// from `first_param` using `dialect`. Path scoping is added by the caller.
pub trait FilterBuilder {
    fn to_sql(&self, dialect: &Dialect, first_param: usize) -> Result<SqlFragment>;
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Comparison {
    Eq,
    NotEq,
    Lt,
    LtEq,
    Gt,
    GtEq,
    Like,
}

impl Comparison {
    fn operator(self) -> &'static str {
        match self {
            Comparison::Eq => "=",
            Comparison::NotEq => "<>",
            Comparison::Lt => "<",
            Comparison::LtEq => "<=",
            Comparison::Gt => ">",
            Comparison::GtEq => ">=",
            Comparison::Like => "LIKE",
        }
    }
}

/// Small built-in predicate tree over metadata columns.
#[derive(Clone, Debug, PartialEq)]
pub enum Predicate {
    Compare(String, Comparison, Value),
    IsNull(String),
    Not(Box<Predicate>),
    And(Vec<Predicate>),
    Or(Vec<Predicate>),
}

impl Predicate {
    pub fn eq(column: impl Into<String>, value: impl Into<Value>) -> Self {
        Predicate::Compare(column.into(), Comparison::Eq, value.into())
    }

    pub fn compare(column: impl Into<String>, op: Comparison, value: impl Into<Value>) -> Self {
        Predicate::Compare(column.into(), op, value.into())
    }

    pub fn is_null(column: impl Into<String>) -> Self {
        Predicate::IsNull(column.into())
    }

    pub fn not(inner: Predicate) -> Self {
        Predicate::Not(Box::new(inner))
    }

    fn render(&self, dialect: &Dialect, next: &mut usize, out: &mut SqlFragment) -> Result<()> {
        match self {
            Predicate::Compare(column, op, value) => {
                if value.is_null() {
                    return Err(Error::InvalidOperation(format!(
                        "comparison against NULL on {column:?}; use Predicate::is_null"
                    )));
                }
                out.sql.push_str(&format!(
                    "{} {} {}",
                    quote_ident(column),
                    op.operator(),
                    dialect.placeholder(*next)
                ));
                out.params.push(value.clone());
                *next += 1;
            }
            Predicate::IsNull(column) => {
                out.sql.push_str(&format!("{} IS NULL", quote_ident(column)));
            }
            Predicate::Not(inner) => {
                out.sql.push_str("NOT (");
                inner.render(dialect, next, out)?;
                out.sql.push(')');
            }
            Predicate::And(parts) | Predicate::Or(parts) => {
                if parts.is_empty() {
                    // Empty conjunction is true, empty disjunction is false.
                    let literal = if matches!(self, Predicate::And(_)) { "1 = 1" } else { "1 = 0" };
                    out.sql.push_str(literal);
                    return Ok(());
                }
                let joiner = if matches!(self, Predicate::And(_)) { " AND " } else { " OR " };
                for (i, part) in parts.iter().enumerate() {
                    if i > 0 {
                        out.sql.push_str(joiner);
                    }
                    out.sql.push('(');
                    part.render(dialect, next, out)?;
                    out.sql.push(')');
                }
            }
        }
        Ok(())
    }
}

impl FilterBuilder for Predicate {
    fn to_sql(&self, dialect: &Dialect, first_param: usize) -> Result<SqlFragment> {
        let mut out = SqlFragment {
            sql: String::new(),
            params: Vec::new(),
        };
        let mut next = first_param;
        self.render(dialect, &mut next, &mut out)?;
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn renders_numbered_placeholders_from_offset() {
        let p = Predicate::And(vec![
            Predicate::eq("kind", "folder"),
            Predicate::Or(vec![
                Predicate::compare("size", Comparison::Gt, 10i64),
                Predicate::is_null("size"),
            ]),
        ]);
        let frag = p.to_sql(&Dialect::POSTGRES, 3).unwrap();
        assert_eq!(
            frag.sql,
            "(\"kind\" = $3) AND ((\"size\" > $4) OR (\"size\" IS NULL))"
        );
        assert_eq!(frag.params, vec![Value::from("folder"), Value::Integer(10)]);

        let frag = Predicate::not(Predicate::eq("a", 1i64))
            .to_sql(&Dialect::SQLITE, 1)
            .unwrap();
        assert_eq!(frag.sql, "NOT (\"a\" = ?1)");
    }

    #[test]
    fn null_comparison_is_rejected() {
        let err = Predicate::eq("a", Value::Null)
            .to_sql(&Dialect::SQLITE, 1)
            .unwrap_err();
        assert!(matches!(err, Error::InvalidOperation(_)));
    }

    #[test]
    fn empty_groups_render_constants() {
        assert_eq!(Predicate::And(vec![]).to_sql(&Dialect::SQLITE, 1).unwrap().sql, "1 = 1");
        assert_eq!(Predicate::Or(vec![]).to_sql(&Dialect::SQLITE, 1).unwrap().sql, "1 = 0");
    }
}
