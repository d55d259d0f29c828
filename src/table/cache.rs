//! Immutable per-peer table snapshots.
//!
//! A [`TableCache`] is built once per refresh and published by swapping an
//! `Arc`; it is never mutated afterwards. Unchanged tables are shared between
//! consecutive snapshots.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use thiserror::Error;

use super::schema::{Column, PEER_KEY, PEER_NAME, TableName};
use super::value::Value;

/// Errors raised while turning a backend payload into rows.
#[derive(Debug, Error)]
pub enum TableError {
    /// Payload is not a JSON array of rows.
    #[error("invalid payload for table {table}: {source}")]
    Json {
        table: TableName,
        #[source]
        source: serde_json::Error,
    },

    /// A row or cell does not fit the table schema.
    #[error("invalid payload for table {table}: {reason}")]
    Shape { table: TableName, reason: String },
}

/// One row, holding a value for every column of its table in schema order.
#[derive(Debug, Clone, PartialEq)]
pub struct Row(Vec<Value>);

impl Row {
    /// Wrap values given in schema order.
    pub fn new(values: Vec<Value>) -> Self {
        Self(values)
    }

    /// Value at a schema index.
    pub fn get(&self, index: usize) -> Option<&Value> {
        self.0.get(index)
    }

    /// All values in schema order.
    pub fn values(&self) -> &[Value] {
        &self.0
    }
}

/// Rows of one table.
#[derive(Debug, Clone)]
pub struct Table {
    pub name: TableName,
    pub rows: Vec<Row>,
}

impl Table {
    /// Create a table from rows already in schema order.
    pub fn new(name: TableName, rows: Vec<Row>) -> Self {
        Self { name, rows }
    }

    /// Columns fetched from a backend, i.e. every column that is not stamped locally.
    pub fn fetched_columns(name: TableName) -> Vec<&'static Column> {
        name.columns().iter().filter(|c| !c.is_virtual()).collect()
    }

    /// Parse a JSON array-of-arrays payload whose cells follow
    /// [`Table::fetched_columns`] order, stamping the peer columns.
    pub fn from_payload(
        name: TableName,
        peer_key: &str,
        peer_name: &str,
        payload: &[u8],
    ) -> Result<Self, TableError> {
        let raw: Vec<Vec<serde_json::Value>> = serde_json::from_slice(payload)
            .map_err(|source| TableError::Json { table: name, source })?;
        let fetched = Self::fetched_columns(name).len();

        let mut rows = Vec::with_capacity(raw.len());
        for (row_no, cells) in raw.into_iter().enumerate() {
            if cells.len() != fetched {
                return Err(TableError::Shape {
                    table: name,
                    reason: format!(
                        "row {} has {} cells, expected {}",
                        row_no,
                        cells.len(),
                        fetched
                    ),
                });
            }

            let mut cells = cells.into_iter();
            let mut values = Vec::with_capacity(name.columns().len());
            for column in name.columns() {
                let value = match column.name {
                    PEER_KEY => Value::String(peer_key.to_string()),
                    PEER_NAME => Value::String(peer_name.to_string()),
                    _ => {
                        let cell = cells.next().unwrap_or(serde_json::Value::Null);
                        Value::from_json(column.kind, &cell).ok_or_else(|| TableError::Shape {
                            table: name,
                            reason: format!(
                                "row {} column {}: cannot read {} as {}",
                                row_no, column.name, cell, column.kind
                            ),
                        })?
                    }
                };
                values.push(value);
            }
            rows.push(Row::new(values));
        }

        Ok(Self { name, rows })
    }

    /// Merge changed rows into a copy of this table, matching rows by primary key.
    ///
    /// Rows present in `delta` replace their counterpart in place; rows with
    /// unseen keys are appended. Tables without a primary key are replaced.
    pub fn merge_delta(&self, delta: Table) -> Table {
        let key_idx: Vec<usize> = self
            .name
            .primary_key()
            .iter()
            .filter_map(|key| self.name.column(key).map(|(idx, _)| idx))
            .collect();
        if key_idx.is_empty() {
            return delta;
        }

        let key_of = |row: &Row| -> Vec<String> {
            key_idx
                .iter()
                .map(|&i| row.get(i).map(|v| v.text().into_owned()).unwrap_or_default())
                .collect()
        };

        let mut changed: HashMap<Vec<String>, Row> = HashMap::with_capacity(delta.rows.len());
        let mut order = Vec::with_capacity(delta.rows.len());
        for row in delta.rows {
            let key = key_of(&row);
            if changed.insert(key.clone(), row).is_none() {
                order.push(key);
            }
        }

        let mut rows = Vec::with_capacity(self.rows.len());
        for row in &self.rows {
            match changed.remove(&key_of(row)) {
                Some(updated) => rows.push(updated),
                None => rows.push(row.clone()),
            }
        }
        rows.extend(order.into_iter().filter_map(|key| changed.remove(&key)));

        Table {
            name: self.name,
            rows,
        }
    }
}

/// Snapshot of every table of one peer at one refresh instant.
#[derive(Debug, Clone)]
pub struct TableCache {
    tables: HashMap<TableName, Arc<Table>>,
    refreshed_at: Option<DateTime<Utc>>,
}

impl TableCache {
    /// Cache of a peer that has never been refreshed.
    pub fn empty() -> Self {
        Self {
            tables: HashMap::new(),
            refreshed_at: None,
        }
    }

    /// Build a snapshot from freshly fetched tables.
    pub fn new(tables: impl IntoIterator<Item = Table>, refreshed_at: DateTime<Utc>) -> Self {
        Self {
            tables: tables
                .into_iter()
                .map(|table| (table.name, Arc::new(table)))
                .collect(),
            refreshed_at: Some(refreshed_at),
        }
    }

    /// Derive a new snapshot replacing the given tables and sharing the rest.
    pub fn with_tables(
        &self,
        tables: impl IntoIterator<Item = Table>,
        refreshed_at: DateTime<Utc>,
    ) -> Self {
        let mut next = self.tables.clone();
        for table in tables {
            next.insert(table.name, Arc::new(table));
        }
        Self {
            tables: next,
            refreshed_at: Some(refreshed_at),
        }
    }

    pub fn table(&self, name: TableName) -> Option<&Arc<Table>> {
        self.tables.get(&name)
    }

    pub fn refreshed_at(&self) -> Option<DateTime<Utc>> {
        self.refreshed_at
    }

    pub fn is_empty(&self) -> bool {
        self.tables.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn host_payload(rows: &[(&str, i64)]) -> Vec<u8> {
        let rows: Vec<serde_json::Value> = rows
            .iter()
            .map(|(name, last_check)| {
                serde_json::json!([name, name, "127.0.0.1", 0, "OK", last_check, 0.1, ["linux"], [], {}])
            })
            .collect();
        serde_json::to_vec(&rows).unwrap()
    }

    #[test]
    fn test_from_payload_stamps_peer_columns() {
        let table =
            Table::from_payload(TableName::Hosts, "id0", "site", &host_payload(&[("web", 10)]))
                .unwrap();
        assert_eq!(table.rows.len(), 1);

        let (key_idx, _) = TableName::Hosts.column(PEER_KEY).unwrap();
        let (name_idx, _) = TableName::Hosts.column("name").unwrap();
        assert_eq!(table.rows[0].get(key_idx), Some(&Value::String("id0".into())));
        assert_eq!(table.rows[0].get(name_idx), Some(&Value::String("web".into())));
        assert_eq!(table.rows[0].values().len(), TableName::Hosts.columns().len());
    }

    #[test]
    fn test_from_payload_rejects_bad_shape() {
        let err = Table::from_payload(TableName::Hosts, "id0", "site", b"[[\"web\"]]").unwrap_err();
        assert!(err.to_string().contains("expected 10"));

        let err = Table::from_payload(TableName::Hosts, "id0", "site", b"not json").unwrap_err();
        assert!(matches!(err, TableError::Json { .. }));
    }

    #[test]
    fn test_merge_delta_replaces_and_appends() {
        let full = Table::from_payload(
            TableName::Hosts,
            "id0",
            "site",
            &host_payload(&[("a", 1), ("b", 1), ("c", 1)]),
        )
        .unwrap();
        let delta = Table::from_payload(
            TableName::Hosts,
            "id0",
            "site",
            &host_payload(&[("b", 5), ("d", 5)]),
        )
        .unwrap();

        let merged = full.merge_delta(delta);
        let (name_idx, _) = TableName::Hosts.column("name").unwrap();
        let (check_idx, _) = TableName::Hosts.column("last_check").unwrap();
        let names: Vec<String> = merged
            .rows
            .iter()
            .map(|r| r.get(name_idx).unwrap().text().into_owned())
            .collect();
        assert_eq!(names, vec!["a", "b", "c", "d"]);
        assert_eq!(merged.rows[1].get(check_idx), Some(&Value::Time(5)));
        assert_eq!(merged.rows[0].get(check_idx), Some(&Value::Time(1)));
    }

    #[test]
    fn test_with_tables_shares_unchanged() {
        let hosts = Table::new(TableName::Hosts, vec![]);
        let status = Table::new(TableName::Status, vec![]);
        let first = TableCache::new([hosts, status], Utc::now());

        let next = first.with_tables([Table::new(TableName::Hosts, vec![])], Utc::now());
        assert!(Arc::ptr_eq(
            first.table(TableName::Status).unwrap(),
            next.table(TableName::Status).unwrap()
        ));
        assert!(!Arc::ptr_eq(
            first.table(TableName::Hosts).unwrap(),
            next.table(TableName::Hosts).unwrap()
        ));
    }
}
