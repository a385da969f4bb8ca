//! The three naming domains of a column. Physical and logical names are
//! plain strings held by the pool's records; SQL names are three-part
//! values reconstructed from the pool's own catalog.
//!
//! A few real combinations, for flavor:
//!
//! ```text
//! logical: M5system_auth_user    physical: 4        SQL: (unset)
//! logical: tmp_701               physical: 07/701   SQL: sys.supplier.s_phone
//! logical: sql_catalog_nme       physical: 05/557   SQL: (unset)
//! ```
//!
//! Columns the server never named keep the default `tmp_<octal index>`
//! logical name. SQL-less columns are common; they are the server's own
//! bookkeeping.

use std::fmt;

/// Schema used when a name does not specify one. "Schema-less" SQL columns
/// actually live in `sys`, as do the system tables themselves.
pub const DEFAULT_SCHEMA: &str = "sys";

/// A schema.table.column triple.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SqlName {
    pub schema: String,
    pub table: String,
    pub column: String,
}

impl SqlName {
    /// An empty schema resolves to [`DEFAULT_SCHEMA`].
    pub fn new<S, T, C>(schema: S, table: T, column: C) -> SqlName
    where
        S: Into<String>,
        T: Into<String>,
        C: Into<String>,
    {
        let schema = schema.into();
        SqlName {
            schema: if schema.is_empty() { DEFAULT_SCHEMA.to_owned() } else { schema },
            table: table.into(),
            column: column.into(),
        }
    }

    pub fn with_default_schema<T, C>(table: T, column: C) -> SqlName
    where
        T: Into<String>,
        C: Into<String>,
    {
        SqlName::new(DEFAULT_SCHEMA, table, column)
    }

    /// The single-string form the pool's catalog stores. Not injective:
    /// schemas and tables may themselves contain underscores.
    pub fn mangled(&self) -> String {
        format!("{}_{}_{}", self.schema, self.table, self.column)
    }
}

impl fmt::Display for SqlName {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}.{}.{}", self.schema, self.table, self.column)
    }
}
