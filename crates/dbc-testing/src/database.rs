//! Shared table storage behind `memory://` URLs.

use std::collections::HashMap;

use dbc_core::{Column, Error, Result, ResultSet, Value};
use parking_lot::Mutex;

use crate::sql::Statement;

#[derive(Debug, Clone, Default)]
pub(crate) struct Table {
    columns: Vec<String>,
    rows: Vec<Vec<Value>>,
}

pub(crate) type Tables = HashMap<String, Table>;

/// A named in-memory database shared by every connection opened on the same
/// `memory://<name>` URL.
#[derive(Debug, Default)]
pub struct MemoryDatabase {
    tables: Mutex<Tables>,
}

impl MemoryDatabase {
    /// Committed row count of a table, `None` if the table does not exist.
    pub fn row_count(&self, table: &str) -> Option<usize> {
        self.tables
            .lock()
            .get(&table.to_lowercase())
            .map(|t| t.rows.len())
    }

    /// Names of all committed tables, sorted.
    pub fn table_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.tables.lock().keys().cloned().collect();
        names.sort();
        names
    }

    /// Apply a batch of write statements atomically, returning the total
    /// affected row count.
    pub(crate) fn apply(&self, writes: &[Statement]) -> Result<u64> {
        let mut tables = self.tables.lock();
        let mut staged = tables.clone();
        let mut affected = 0;
        for write in writes {
            affected += apply_write(&mut staged, write)?;
        }
        *tables = staged;
        Ok(affected)
    }

    /// Snapshot of the committed tables.
    pub(crate) fn snapshot(&self) -> Tables {
        self.tables.lock().clone()
    }
}

/// Apply one write to a set of tables, returning the affected row count.
pub(crate) fn apply_write(tables: &mut Tables, write: &Statement) -> Result<u64> {
    match write {
        Statement::CreateTable {
            table,
            columns,
            if_not_exists,
        } => {
            if tables.contains_key(table) {
                if *if_not_exists {
                    return Ok(0);
                }
                return Err(Error::Query(format!("table {table} already exists")));
            }
            tables.insert(
                table.clone(),
                Table {
                    columns: columns.clone(),
                    rows: Vec::new(),
                },
            );
            Ok(0)
        }
        Statement::Insert { table, values } => {
            let target = tables
                .get_mut(table)
                .ok_or_else(|| Error::Query(format!("no such table: {table}")))?;
            if values.len() != target.columns.len() {
                return Err(Error::Query(format!(
                    "table {table} has {} columns but {} values were supplied",
                    target.columns.len(),
                    values.len()
                )));
            }
            target.rows.push(values.clone());
            Ok(1)
        }
        Statement::Delete { table } => {
            let target = tables
                .get_mut(table)
                .ok_or_else(|| Error::Query(format!("no such table: {table}")))?;
            let removed = target.rows.len() as u64;
            target.rows.clear();
            Ok(removed)
        }
        other => Err(Error::Query(format!("not a write statement: {other:?}"))),
    }
}

/// Evaluate a row-returning statement against a set of tables.
pub(crate) fn evaluate(tables: &Tables, query: &Statement) -> Result<ResultSet> {
    match query {
        Statement::SelectOne => Ok(ResultSet::new(
            vec![Column::new("1", 0, "INT")],
            vec![vec![Value::Int(1)]],
        )),
        Statement::SelectAll { table } => {
            let source = lookup(tables, table)?;
            let columns = source
                .columns
                .iter()
                .enumerate()
                .map(|(i, name)| Column::new(name.clone(), i, "ANY"))
                .collect();
            Ok(ResultSet::new(columns, source.rows.clone()))
        }
        Statement::Count { table } => {
            let source = lookup(tables, table)?;
            Ok(ResultSet::new(
                vec![Column::new("count", 0, "INT")],
                vec![vec![Value::Int(source.rows.len() as i64)]],
            ))
        }
        other => Err(Error::Query(format!("statement returns no rows: {other:?}"))),
    }
}

fn lookup<'a>(tables: &'a Tables, table: &str) -> Result<&'a Table> {
    tables
        .get(table)
        .ok_or_else(|| Error::Query(format!("no such table: {table}")))
}
