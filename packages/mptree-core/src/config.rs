use crate::codec::PathCodec;
use crate::error::{Error, Result};

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

pub const DEFAULT_TABLE: &str = "tree_nodes";
pub const DEFAULT_ID_COLUMN: &str = "id";
pub const DEFAULT_PATH_COLUMN: &str = "path";

/// Naming and behaviour options recognized when opening a [`crate::TreeHandle`].
#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize), serde(default))]
pub struct TreeOptions {
    pub table: String,
    pub id_column: String,
    pub path_column: String,
    pub codec: PathCodec,
    pub auto_create_root: bool,
}

impl Default for TreeOptions {
    fn default() -> Self {
        Self {
            table: DEFAULT_TABLE.to_string(),
            id_column: DEFAULT_ID_COLUMN.to_string(),
            path_column: DEFAULT_PATH_COLUMN.to_string(),
            codec: PathCodec::default(),
            auto_create_root: true,
        }
    }
}

impl TreeOptions {
    pub fn new(table: impl Into<String>) -> Self {
        Self {
            table: table.into(),
            ..Self::default()
        }
    }

    pub fn id_column(mut self, column: impl Into<String>) -> Self {
        self.id_column = column.into();
        self
    }

    pub fn path_column(mut self, column: impl Into<String>) -> Self {
        self.path_column = column.into();
        self
    }

    pub fn codec(mut self, codec: PathCodec) -> Self {
        self.codec = codec;
        self
    }

    pub fn auto_create_root(mut self, enabled: bool) -> Self {
        self.auto_create_root = enabled;
        self
    }

    #[cfg(feature = "serde")]
    pub fn from_json(json: &str) -> Result<Self> {
        serde_json::from_str(json).map_err(|e| Error::Configuration(e.to_string()))
    }

    pub fn validate(&self) -> Result<()> {
        for (what, name) in [
            ("table", &self.table),
            ("id column", &self.id_column),
            ("path column", &self.path_column),
        ] {
            if name.is_empty() {
                return Err(Error::Configuration(format!("{what} name is empty")));
            }
            if name.contains('\0') {
                return Err(Error::Configuration(format!(
                    "{what} name {name:?} contains NUL"
                )));
            }
        }
        if self.id_column == self.path_column {
            return Err(Error::Configuration(format!(
                "id and path columns must differ, both are {:?}",
                self.id_column
            )));
        }
        Ok(())
    }
}

/// Double-quote an identifier, doubling embedded quotes.
pub fn quote_ident(name: &str) -> String {
    let mut out = String::with_capacity(name.len() + 2);
    out.push('"');
    for ch in name.chars() {
        if ch == '"' {
            out.push('"');
        }
        out.push(ch);
    }
    out.push('"');
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_conventional() {
        let opts = TreeOptions::default();
        assert_eq!(opts.table, "tree_nodes");
        assert_eq!(opts.id_column, "id");
        assert_eq!(opts.path_column, "path");
        assert!(opts.auto_create_root);
        opts.validate().unwrap();
    }

    #[test]
    fn validate_rejects_unusable_names() {
        assert!(TreeOptions::new("").validate().is_err());
        assert!(TreeOptions::new("t").path_column("id").validate().is_err());
        assert!(TreeOptions::new("t").id_column("a\0b").validate().is_err());
    }

    #[test]
    fn quoting_escapes_embedded_quotes() {
        assert_eq!(quote_ident("path"), "\"path\"");
        assert_eq!(quote_ident("we\"ird"), "\"we\"\"ird\"");
    }
}
