use crate::backend::Dialect;
use crate::cache::QueryKey;
use crate::config::{quote_ident, TreeOptions};

/// Generates the SQL text for each [`QueryKey`] against one table.
#[derive(Clone, Debug)]
pub struct QueryBuilder {
    table: String,
    id: String,
    path: String,
    /// Path column as used in comparisons and ordering (with collation when needed).
    path_cmp: String,
    dialect: Dialect,
}

pub const COUNT_ALIAS: &str = "n";
pub const MAX_PATH_ALIAS: &str = "max_path";

impl QueryBuilder {
    pub fn new(options: &TreeOptions, dialect: Dialect) -> Self {
        let path = quote_ident(&options.path_column);
        let path_cmp = match dialect.path_collation {
            Some(collation) => format!("{path} COLLATE {collation}"),
            None => path.clone(),
        };
        Self {
            table: quote_ident(&options.table),
            id: quote_ident(&options.id_column),
            path,
            path_cmp,
            dialect,
        }
    }

    pub fn dialect(&self) -> &Dialect {
        &self.dialect
    }

    fn ph(&self, index: usize) -> String {
        self.dialect.placeholder(index)
    }

    fn range(&self, lo: usize, hi: usize) -> String {
        format!(
            "{p} > {} AND {p} < {}",
            self.ph(lo),
            self.ph(hi),
            p = self.path_cmp
        )
    }

    fn children_cond(&self) -> String {
        format!("{} AND LENGTH({}) = {}", self.range(1, 2), self.path, self.ph(3))
    }

    /// Read a single column (or `*`) to validate the schema.
    pub fn column_check(&self, column: Option<&str>) -> String {
        let select = column.map(quote_ident).unwrap_or_else(|| "*".to_string());
        format!("SELECT {select} FROM {} LIMIT 1", self.table)
    }

    pub fn build(&self, key: &QueryKey) -> String {
        let (t, id, path, p) = (&self.table, &self.id, &self.path, &self.path_cmp);
        match key {
            QueryKey::SelectById => format!("SELECT * FROM {t} WHERE {id} = {}", self.ph(1)),
            QueryKey::SelectByPath => format!("SELECT * FROM {t} WHERE {p} = {}", self.ph(1)),
            QueryKey::SelectChildren => format!(
                "SELECT * FROM {t} WHERE {} ORDER BY {p}",
                self.children_cond()
            ),
            QueryKey::SelectDescendants => format!(
                "SELECT * FROM {t} WHERE {} ORDER BY {p}",
                self.range(1, 2)
            ),
            QueryKey::SelectAncestors(n) => {
                let list: Vec<String> = (1..=*n).map(|i| self.ph(i)).collect();
                format!(
                    "SELECT * FROM {t} WHERE {p} IN ({}) ORDER BY {p}",
                    list.join(", ")
                )
            }
            QueryKey::SelectSubtreePage => format!(
                "SELECT * FROM {t} WHERE {} ORDER BY {p} LIMIT {}",
                self.range(1, 2),
                self.ph(3)
            ),
            QueryKey::MaxChildPath => format!(
                "SELECT MAX({p}) AS {MAX_PATH_ALIAS} FROM {t} WHERE {}",
                self.children_cond()
            ),
            QueryKey::CountChildren => format!(
                "SELECT COUNT(*) AS {COUNT_ALIAS} FROM {t} WHERE {}",
                self.children_cond()
            ),
            QueryKey::CountDescendants => format!(
                "SELECT COUNT(*) AS {COUNT_ALIAS} FROM {t} WHERE {}",
                self.range(1, 2)
            ),
            QueryKey::CountAll => format!("SELECT COUNT(*) AS {COUNT_ALIAS} FROM {t}"),
            QueryKey::Insert(columns) => {
                let mut names = vec![path.clone()];
                names.extend(columns.iter().map(|c| quote_ident(c)));
                let values: Vec<String> = (1..=names.len()).map(|i| self.ph(i)).collect();
                format!(
                    "INSERT INTO {t} ({}) VALUES ({}) RETURNING *",
                    names.join(", "),
                    values.join(", ")
                )
            }
            QueryKey::UpdatePathById => format!(
                "UPDATE {t} SET {path} = {} WHERE {id} = {}",
                self.ph(1),
                self.ph(2)
            ),
            QueryKey::RebaseSubtree => format!(
                "UPDATE {t} SET {path} = CAST({} AS TEXT) || SUBSTR({path}, CAST({} AS INTEGER)) \
                 WHERE {p} = {} OR ({p} > {} AND {p} < {})",
                self.ph(1),
                self.ph(2),
                self.ph(3),
                self.ph(4),
                self.ph(5)
            ),
            QueryKey::SelectShiftTargets => format!(
                "SELECT {id}, {path} FROM {t} WHERE {p} >= {} AND {p} < {} ORDER BY {p} DESC",
                self.ph(1),
                self.ph(2)
            ),
            QueryKey::DeleteById => format!("DELETE FROM {t} WHERE {id} = {}", self.ph(1)),
            QueryKey::DeleteSubtree => format!(
                "DELETE FROM {t} WHERE {p} = {} OR ({})",
                self.ph(1),
                self.range(2, 3)
            ),
            QueryKey::Find { subtree: true, predicate } => format!(
                "SELECT * FROM {t} WHERE {} AND ({predicate}) ORDER BY {p}",
                self.range(1, 2)
            ),
            QueryKey::Find { subtree: false, predicate } => {
                format!("SELECT * FROM {t} WHERE ({predicate}) ORDER BY {p}")
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sqlite_children_query_uses_range_and_length() {
        let qb = QueryBuilder::new(&TreeOptions::default(), Dialect::SQLITE);
        assert_eq!(
            qb.build(&QueryKey::SelectChildren),
            "SELECT * FROM \"tree_nodes\" WHERE \"path\" > ?1 AND \"path\" < ?2 \
             AND LENGTH(\"path\") = ?3 ORDER BY \"path\""
        );
    }

    #[test]
    fn postgres_collates_path_comparisons_only() {
        let qb = QueryBuilder::new(&TreeOptions::new("nodes"), Dialect::POSTGRES);
        assert_eq!(
            qb.build(&QueryKey::UpdatePathById),
            "UPDATE \"nodes\" SET \"path\" = $1 WHERE \"id\" = $2"
        );
        assert_eq!(
            qb.build(&QueryKey::SelectAncestors(2)),
            "SELECT * FROM \"nodes\" WHERE \"path\" COLLATE \"C\" IN ($1, $2) \
             ORDER BY \"path\" COLLATE \"C\""
        );
    }

    #[test]
    fn insert_lists_path_then_metadata_columns() {
        let qb = QueryBuilder::new(&TreeOptions::default(), Dialect::SQLITE);
        assert_eq!(
            qb.build(&QueryKey::Insert(vec!["name".into(), "rank".into()])),
            "INSERT INTO \"tree_nodes\" (\"path\", \"name\", \"rank\") VALUES (?1, ?2, ?3) RETURNING *"
        );
    }
}
