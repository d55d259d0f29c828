//! Query execution across peers.
//!
//! A request takes one snapshot of the peer list, then one snapshot of each
//! targeted peer's cache. Everything after that works on those immutable
//! snapshots, so concurrent refreshes and reloads never change a running query.

use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::task::JoinSet;

use crate::peer::{PeerConnection, PeerSetManager, PeerState};
use crate::query::request::{Command, Query, Request, SortDirection, SortKey};
use crate::query::{ExecuteError, RequestError};
use crate::table::{Row, Table, TableName, Value};

/// Rows and metadata produced by one request.
#[derive(Debug, Clone, Default)]
pub struct QueryResult {
    /// Names of the result columns, in output order.
    pub columns: Vec<String>,
    pub rows: Vec<Vec<Value>>,
    /// Matching rows before offset and limit.
    pub total: usize,
    /// Targeted peers that contributed no rows, with the reason.
    pub failed: BTreeMap<String, String>,
    pub duration: Duration,
}

/// Executes parsed requests against the current peer set.
#[derive(Debug, Clone)]
pub struct QueryExecutor {
    peers: Arc<PeerSetManager>,
}

impl QueryExecutor {
    pub fn new(peers: Arc<PeerSetManager>) -> Self {
        Self { peers }
    }

    pub fn peers(&self) -> &Arc<PeerSetManager> {
        &self.peers
    }

    pub async fn execute(&self, request: &Request) -> Result<QueryResult, ExecuteError> {
        match request {
            Request::Get(query) => Ok(self.query(query)?),
            Request::Command(command) => self.command(command).await,
        }
    }

    /// Run a `GET` request.
    pub fn query(&self, query: &Query) -> Result<QueryResult, RequestError> {
        let started = Instant::now();
        let peers = self.peers.peers();
        let targets = resolve_targets(&peers, &query.backends)?;

        let mut failed = BTreeMap::new();
        let tables: Vec<Arc<Table>> = match query.table {
            TableName::Backends => {
                let rows = targets.iter().map(|p| p.status().to_row()).collect();
                vec![Arc::new(Table::new(TableName::Backends, rows))]
            }
            TableName::Columns => vec![Arc::new(columns_table())],
            name => targets
                .iter()
                .filter_map(|peer| match peer.snapshot() {
                    Some(cache) => cache.table(name).cloned(),
                    None => {
                        failed.insert(peer.key().to_string(), unavailable_reason(peer));
                        None
                    }
                })
                .collect(),
        };

        let mut matched: Vec<&Row> = tables
            .iter()
            .flat_map(|table| table.rows.iter())
            .filter(|row| query.matches(row))
            .collect();

        let mut result = if query.stats.is_empty() {
            sort_rows(&mut matched, &query.sort);
            let indexes: Vec<usize> = query
                .output_columns()
                .iter()
                .filter_map(|c| query.table.column(c.name).map(|(idx, _)| idx))
                .collect();
            QueryResult {
                columns: query
                    .output_columns()
                    .iter()
                    .map(|c| c.name.to_string())
                    .collect(),
                total: matched.len(),
                rows: matched
                    .iter()
                    .skip(query.offset)
                    .take(query.limit.unwrap_or(usize::MAX))
                    .map(|row| project(row, &indexes))
                    .collect(),
                ..Default::default()
            }
        } else {
            let values = query
                .stats
                .iter()
                .map(|spec| spec.compute(matched.iter().copied()))
                .collect();
            QueryResult {
                columns: (1..=query.stats.len()).map(|n| format!("stats_{n}")).collect(),
                rows: vec![values],
                total: 1,
                ..Default::default()
            }
        };

        result.failed = failed;
        result.duration = started.elapsed();
        tracing::debug!(
            table = %query.table,
            peers = targets.len(),
            rows = result.rows.len(),
            failed = result.failed.len(),
            "Query executed"
        );
        Ok(result)
    }

    /// Forward a `COMMAND` to every targeted peer.
    ///
    /// Peers are contacted concurrently; the command fails if any targeted
    /// peer rejects it.
    pub async fn command(&self, command: &Command) -> Result<QueryResult, ExecuteError> {
        let started = Instant::now();
        let peers = self.peers.peers();
        let targets = resolve_targets(&peers, &command.backends)?;
        if targets.is_empty() {
            return Err(ExecuteError::Command("no backend configured".to_string()));
        }

        let line = command.line();
        let mut tasks = JoinSet::new();
        for peer in targets {
            let line = line.clone();
            tasks.spawn(async move {
                let result = peer.send_command(&line).await;
                (peer.key().to_string(), result)
            });
        }

        let mut failures = BTreeMap::new();
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((_, Ok(()))) => {}
                Ok((key, Err(e))) => {
                    failures.insert(key, e.to_string());
                }
                Err(e) => {
                    failures.insert("task".to_string(), e.to_string());
                }
            }
        }

        if !failures.is_empty() {
            let reasons: Vec<String> = failures
                .iter()
                .map(|(key, reason)| format!("{key}: {reason}"))
                .collect();
            return Err(ExecuteError::Command(reasons.join("; ")));
        }
        Ok(QueryResult {
            duration: started.elapsed(),
            ..Default::default()
        })
    }
}

/// Peers named by `Backends:`, or every peer when none is named.
fn resolve_targets(
    peers: &[Arc<PeerConnection>],
    backends: &[String],
) -> Result<Vec<Arc<PeerConnection>>, RequestError> {
    if backends.is_empty() {
        return Ok(peers.to_vec());
    }
    for key in backends {
        if !peers.iter().any(|p| p.key() == key) {
            return Err(RequestError::UnknownBackend(key.clone()));
        }
    }
    Ok(peers
        .iter()
        .filter(|p| backends.iter().any(|key| key == p.key()))
        .cloned()
        .collect())
}

fn unavailable_reason(peer: &PeerConnection) -> String {
    let status = peer.status();
    match (status.state, status.health.last_error) {
        (PeerState::Down, Some(error)) => error,
        (state, _) => format!("peer is {state}"),
    }
}

/// Rows of the `columns` table, one per declared column.
fn columns_table() -> Table {
    let rows = TableName::ALL
        .iter()
        .flat_map(|table| table.columns())
        .map(|column| {
            Row::new(vec![
                Value::String(column.table.to_string()),
                Value::String(column.name.to_string()),
                Value::String(column.kind.to_string()),
                Value::String(column.description.to_string()),
            ])
        })
        .collect();
    Table::new(TableName::Columns, rows)
}

/// Stable sort by the keys in declaration order.
fn sort_rows(rows: &mut [&Row], keys: &[SortKey]) {
    if keys.is_empty() {
        return;
    }
    rows.sort_by(|a, b| {
        keys.iter()
            .map(|key| {
                let ordering = match (a.get(key.index), b.get(key.index)) {
                    (Some(x), Some(y)) => x.compare(y),
                    (x, y) => x.is_some().cmp(&y.is_some()),
                };
                match key.direction {
                    SortDirection::Asc => ordering,
                    SortDirection::Desc => ordering.reverse(),
                }
            })
            .find(|ordering| *ordering != Ordering::Equal)
            .unwrap_or(Ordering::Equal)
    });
}

fn project(row: &Row, indexes: &[usize]) -> Vec<Value> {
    indexes
        .iter()
        .map(|&idx| row.get(idx).cloned().unwrap_or_else(|| Value::String(String::new())))
        .collect()
}
