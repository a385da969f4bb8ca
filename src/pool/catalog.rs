//! Reconstructs schema.table.column names from the catalog the pool keeps
//! about itself. The catalog stores mangled single-string names, and the
//! mangling is not injective, so the mapping is rebuilt by walking the SQL
//! system tables the catalog points at.

use slog::Logger;
use std::collections::{HashMap, HashSet};

use crate::pool::column::{Column, Value};
use crate::pool::names::SqlName;
use crate::pool::{Pool, PoolError, PoolResult};

/// Logical name of the catalog column holding mangled SQL names.
const CATALOG_NAMES: &str = "sql_catalog_nme";
/// Logical name of the catalog column holding the matching pool indices.
const CATALOG_INDICES: &str = "sql_catalog_bid";

/// The bidirectional SQL-name index: a sparse array keyed by pool index and
/// an injective map keyed by name.
#[derive(Debug, Default)]
pub struct SqlNameIndex {
    by_index: Vec<Option<SqlName>>,
    by_name: HashMap<SqlName, usize>,
}

impl SqlNameIndex {
    pub fn lookup(&self, name: &SqlName) -> Option<usize> { self.by_name.get(name).copied() }

    pub fn name_of(&self, index: usize) -> Option<&SqlName> {
        self.by_index.get(index).and_then(|slot| slot.as_ref())
    }

    pub fn len(&self) -> usize { self.by_name.len() }

    pub fn is_empty(&self) -> bool { self.by_name.is_empty() }

    pub(crate) fn build(pool: &Pool, logger: &Logger) -> PoolResult<SqlNameIndex> {
        let catalog = mangled_name_map(pool)?;
        if catalog.is_empty() {
            return Err(PoolError::InconsistentCatalog(
                "the pool's SQL catalog map is empty".to_owned(),
            ));
        }

        // sys.schemas
        let schema_ids = lookup_column(pool, &catalog, SqlName::new("sys", "schemas", "id"))?;
        let schema_names =
            lookup_column(pool, &catalog, SqlName::new("sys", "schemas", "name"))?;
        require_paired(&schema_ids, &schema_names)?;
        let mut schema_name_by_id = HashMap::new();
        let mut schemas_to_skip = HashSet::new();
        for pos in 0..schema_ids.length() {
            let id = int_at(&schema_ids, pos)?;
            let name = str_at(&schema_names, pos)?;
            if name == "tmp" {
                // session-local schema; its tables are never persisted
                schemas_to_skip.insert(id);
            }
            if let Some(previous) = schema_name_by_id.insert(id, name.to_owned()) {
                return Err(PoolError::InconsistentCatalog(format!(
                    "schema id {} is named both \"{}\" and \"{}\"",
                    id, previous, name
                )));
            }
        }

        // sys._tables
        let table_ids = lookup_column(pool, &catalog, SqlName::new("sys", "_tables", "id"))?;
        let table_names = lookup_column(pool, &catalog, SqlName::new("sys", "_tables", "name"))?;
        let table_schemas =
            lookup_column(pool, &catalog, SqlName::new("sys", "_tables", "schema_id"))?;
        let table_queries =
            lookup_column(pool, &catalog, SqlName::new("sys", "_tables", "query"))?;
        require_paired(&table_ids, &table_names)?;
        require_paired(&table_ids, &table_schemas)?;
        require_paired(&table_ids, &table_queries)?;
        let mut table_by_id: HashMap<i64, (String, String)> = HashMap::new();
        for pos in 0..table_ids.length() {
            let id = int_at(&table_ids, pos)?;
            let name = str_at(&table_names, pos)?;
            let schema_id = int_at(&table_schemas, pos)?;
            if let Some(query) = table_queries.str_at(pos)? {
                if !query.is_empty() {
                    // a view; nothing is persisted for it
                    continue;
                }
            }
            if schemas_to_skip.contains(&schema_id) {
                continue;
            }
            let schema_name = schema_name_by_id.get(&schema_id).ok_or_else(|| {
                PoolError::InconsistentCatalog(format!(
                    "table \"{}\" references schema id {} which has no name",
                    name, schema_id
                ))
            })?;
            if table_by_id.insert(id, (name.to_owned(), schema_name.clone())).is_some() {
                return Err(PoolError::InconsistentCatalog(format!(
                    "duplicate table id {} in sys._tables",
                    id
                )));
            }
        }

        // sys._columns rows name the columns; the catalog maps them to slots
        let column_names =
            lookup_column(pool, &catalog, SqlName::new("sys", "_columns", "name"))?;
        let column_tables =
            lookup_column(pool, &catalog, SqlName::new("sys", "_columns", "table_id"))?;
        require_paired(&column_names, &column_tables)?;

        let mut index = SqlNameIndex {
            by_index: (0..pool.size()).map(|_| None).collect(),
            by_name: HashMap::new(),
        };
        for pos in 0..column_names.length() {
            let column_name = str_at(&column_names, pos)?;
            let table_id = int_at(&column_tables, pos)?;
            let (table_name, schema_name) = match table_by_id.get(&table_id) {
                Some(entry) => entry,
                // a table we skipped above, or one of the server's own
                None => continue,
            };
            let full_name = SqlName::new(schema_name.clone(), table_name.clone(), column_name);
            match catalog.get(&full_name.mangled()) {
                Some(&slot) => {
                    index.by_index[slot] = Some(full_name.clone());
                    index.by_name.insert(full_name, slot);
                }
                None => {
                    warn!(logger, "SQL column has no pool storage"; "column" => %full_name);
                }
            }
        }
        Ok(index)
    }
}

/// Stage one: the mangled-name → pool-index map from the two catalog
/// columns, filtering out entries that point at invalid slots.
fn mangled_name_map(pool: &Pool) -> PoolResult<HashMap<String, usize>> {
    let names = catalog_column(pool, CATALOG_NAMES)?;
    let indices = catalog_column(pool, CATALOG_INDICES)?;
    if names.length() != indices.length() {
        return Err(PoolError::InconsistentCatalog(format!(
            "'{}' (pool index {}, length {}) and '{}' (pool index {}, length {}) \
             have differing lengths",
            CATALOG_NAMES,
            names.index(),
            names.length(),
            CATALOG_INDICES,
            indices.index(),
            indices.length()
        )));
    }

    let mut map: HashMap<String, usize> = HashMap::new();
    for pos in 0..names.length() {
        let mangled = match names.str_at(pos)? {
            Some(s) => s.to_owned(),
            None => continue,
        };
        let slot = int_at(&indices, pos)?;
        if slot <= 0 || slot as usize >= pool.size() {
            continue;
        }
        let slot = slot as usize;
        let column = pool.at(slot)?;
        if !column.is_valid() {
            continue;
        }
        match map.get(&mangled).copied() {
            None => {
                map.insert(mangled, slot);
            }
            Some(existing) => {
                // duplicates do occur; only a row-less side may give way
                let existing_empty = pool.at(existing)?.is_empty();
                let new_empty = column.is_empty();
                match (existing_empty, new_empty) {
                    (true, true) => {}
                    (true, false) => {
                        map.insert(mangled, slot);
                    }
                    (false, _) => {
                        return Err(PoolError::InconsistentCatalog(format!(
                            "columns at pool indices {} and {} share the mangled SQL name \"{}\"",
                            slot, existing, mangled
                        )));
                    }
                }
            }
        }
    }
    Ok(map)
}

fn lookup_column<'p>(
    pool: &'p Pool,
    catalog: &HashMap<String, usize>,
    name: SqlName,
) -> PoolResult<Column<'p>> {
    let index = *catalog.get(&name.mangled()).ok_or_else(|| {
        PoolError::InconsistentCatalog(format!(
            "column \"{}\" is missing from the pool's SQL catalog",
            name
        ))
    })?;
    pool.at(index)
}

fn catalog_column<'p>(pool: &'p Pool, logical: &str) -> PoolResult<Column<'p>> {
    let index = pool.find_by_logical_name(logical).ok_or_else(|| {
        PoolError::InconsistentCatalog(format!(
            "the pool has no '{}' catalog column",
            logical
        ))
    })?;
    pool.at(index)
}

fn require_paired(a: &Column, b: &Column) -> PoolResult<()> {
    if a.length() != b.length() {
        return Err(PoolError::InconsistentCatalog(format!(
            "system-table columns {} and {} are not of the same length",
            describe(a),
            describe(b)
        )));
    }
    Ok(())
}

fn describe(column: &Column) -> String {
    match column.logical_name() {
        Some(name) => format!("\"{}\" (pool index {})", name, column.index()),
        None => format!("pool index {}", column.index()),
    }
}

fn int_at(column: &Column, pos: u64) -> PoolResult<i64> {
    match column.value(pos)? {
        Value::Int(v) => Ok(v),
        Value::Oid(v) => Ok(v as i64),
        other => Err(PoolError::InconsistentCatalog(format!(
            "expected an integer at element {} of {}, found {}",
            pos,
            describe(column),
            other
        ))),
    }
}

fn str_at<'p>(column: &Column<'p>, pos: u64) -> PoolResult<&'p str> {
    column.str_at(pos)?.ok_or_else(|| {
        PoolError::InconsistentCatalog(format!(
            "unexpected nil at element {} of {}",
            pos,
            describe(column)
        ))
    })
}
