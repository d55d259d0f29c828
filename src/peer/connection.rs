//! Peer connection lifecycle.
//!
//! Each [`PeerConnection`] owns one refresh task. The task fetches every
//! peer-scoped table from its [`PeerSource`], builds a new [`TableCache`] and
//! publishes it with a single pointer swap. Readers load the current snapshot
//! without locking and keep it alive for as long as they hold the `Arc`.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use arc_swap::ArcSwap;
use chrono::{DateTime, Utc};
use strum_macros::{AsRefStr, Display, EnumString};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::config::{PeerConfig, RefreshSettings};
use crate::peer::{PeerError, PeerSource};
use crate::table::{Row, Table, TableCache, TableName, Value};

/// Default timeout for waiting on a stopping refresh task (5 seconds).
pub const DEFAULT_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(5);

// =============================================================================
// Health
// =============================================================================

/// Connection health as reported in the `backends` table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, EnumString, Display, AsRefStr)]
#[strum(serialize_all = "lowercase")]
pub enum PeerState {
    /// Latest refresh succeeded.
    Up,
    /// Reachable, but the last successful refresh is older than the stale threshold.
    Stale,
    /// Latest refresh failed.
    Down,
    /// Never refreshed successfully.
    Pending,
}

impl PeerState {
    /// Numeric code of the `status` column.
    pub fn code(self) -> i64 {
        match self {
            Self::Up => 0,
            Self::Stale => 1,
            Self::Down => 2,
            Self::Pending => 3,
        }
    }
}

/// Outcome of the refresh attempts so far.
///
/// `state` only ever holds `Pending`, `Up` or `Down`; staleness is derived
/// from `last_update` when read.
#[derive(Debug, Clone)]
pub struct PeerHealth {
    pub state: PeerState,
    pub last_error: Option<String>,
    /// Start of the last successful refresh.
    pub last_update: Option<DateTime<Utc>>,
    /// Completion of the last successful refresh.
    pub last_online: Option<DateTime<Utc>>,
    pub response_time: Option<Duration>,
    /// Consecutive failed refreshes.
    pub failures: u32,
    /// Refresh attempts, successful or not.
    pub attempts: u64,
}

impl Default for PeerHealth {
    fn default() -> Self {
        Self {
            state: PeerState::Pending,
            last_error: None,
            last_update: None,
            last_online: None,
            response_time: None,
            failures: 0,
            attempts: 0,
        }
    }
}

impl PeerHealth {
    fn state_at(&self, now: DateTime<Utc>, stale_threshold: Duration) -> PeerState {
        let overdue = self
            .last_update
            .and_then(|at| (now - at).to_std().ok())
            .is_some_and(|age| age > stale_threshold);
        match self.state {
            PeerState::Up if overdue => PeerState::Stale,
            state => state,
        }
    }
}

/// Point-in-time view of a peer, one row of the `backends` table.
#[derive(Debug, Clone)]
pub struct PeerStatus {
    pub key: String,
    pub name: String,
    pub addr: String,
    pub state: PeerState,
    pub paused: bool,
    pub health: PeerHealth,
    pub bytes_send: u64,
    pub bytes_received: u64,
    pub queries: u64,
}

impl PeerStatus {
    /// Render as a `backends` row in schema order.
    pub fn to_row(&self) -> Row {
        let time = |at: Option<DateTime<Utc>>| Value::Time(at.map_or(0, |t| t.timestamp()));
        let values = TableName::Backends
            .columns()
            .iter()
            .map(|column| match column.name {
                "peer_key" => Value::String(self.key.clone()),
                "peer_name" => Value::String(self.name.clone()),
                "addr" => Value::String(self.addr.clone()),
                "status" => Value::Int(self.state.code()),
                "state" => Value::String(self.state.to_string()),
                "paused" => Value::Int(i64::from(self.paused)),
                "bytes_send" => Value::Int(saturating_i64(self.bytes_send)),
                "bytes_received" => Value::Int(saturating_i64(self.bytes_received)),
                "queries" => Value::Int(saturating_i64(self.queries)),
                "last_error" => Value::String(self.health.last_error.clone().unwrap_or_default()),
                "last_update" => time(self.health.last_update),
                "last_online" => time(self.health.last_online),
                "response_time" => {
                    Value::Float(self.health.response_time.map_or(0.0, |d| d.as_secs_f64()))
                }
                _ => Value::zero(column.kind),
            })
            .collect();
        Row::new(values)
    }
}

fn saturating_i64(n: u64) -> i64 {
    i64::try_from(n).unwrap_or(i64::MAX)
}

// =============================================================================
// Peer Connection
// =============================================================================

struct Inner {
    config: PeerConfig,
    /// Timing in effect; replaced on reload without restarting the task.
    settings: watch::Sender<RefreshSettings>,
    source: Arc<dyn PeerSource>,
    cache: ArcSwap<TableCache>,
    health: watch::Sender<PeerHealth>,
    /// `Some(state)` while paused, holding the state reported until resumed.
    paused: watch::Sender<Option<PeerState>>,
    bytes_send: AtomicU64,
    bytes_received: AtomicU64,
    queries: AtomicU64,
    cancel: CancellationToken,
}

/// One configured backend with its refresh task and published snapshot.
pub struct PeerConnection {
    inner: Arc<Inner>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl std::fmt::Debug for PeerConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PeerConnection")
            .field("key", &self.inner.config.key)
            .field("addr", &self.inner.config.addr)
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

impl PeerConnection {
    /// Create a `Pending` connection. The refresh task starts with [`PeerConnection::start`].
    pub fn new(config: PeerConfig, settings: RefreshSettings, source: Arc<dyn PeerSource>) -> Self {
        let (health, _) = watch::channel(PeerHealth::default());
        let (paused, _) = watch::channel(None);
        let (settings, _) = watch::channel(settings);
        Self {
            inner: Arc::new(Inner {
                config,
                settings,
                source,
                cache: ArcSwap::from_pointee(TableCache::empty()),
                health,
                paused,
                bytes_send: AtomicU64::new(0),
                bytes_received: AtomicU64::new(0),
                queries: AtomicU64::new(0),
                cancel: CancellationToken::new(),
            }),
            task: Mutex::new(None),
        }
    }

    /// Spawn the refresh task. Calling it again has no effect.
    pub fn start(&self) {
        let mut task = self.lock_task();
        if task.is_some() || self.inner.cancel.is_cancelled() {
            return;
        }
        let inner = Arc::clone(&self.inner);
        *task = Some(tokio::spawn(async move { inner.run().await }));
        tracing::info!(peer = %self.inner.config.key, addr = %self.inner.config.addr, "Peer started");
    }

    pub fn key(&self) -> &str {
        &self.inner.config.key
    }

    pub fn config(&self) -> &PeerConfig {
        &self.inner.config
    }

    /// Current health, frozen while paused.
    pub fn state(&self) -> PeerState {
        if let Some(frozen) = *self.inner.paused.borrow() {
            return frozen;
        }
        self.inner
            .health
            .borrow()
            .state_at(Utc::now(), self.inner.settings().stale_threshold)
    }

    pub fn settings(&self) -> RefreshSettings {
        self.inner.settings()
    }

    /// Apply new timing to the running task. Returns whether anything changed.
    ///
    /// The next refresh starts right away when the settings differ; the
    /// connection and cache are kept.
    pub fn update_settings(&self, settings: RefreshSettings) -> bool {
        let changed = self.inner.settings.send_if_modified(|current| {
            if *current == settings {
                return false;
            }
            *current = settings;
            true
        });
        if changed {
            tracing::debug!(peer = %self.key(), ?settings, "Peer settings updated");
        }
        changed
    }

    pub fn is_paused(&self) -> bool {
        self.inner.paused.borrow().is_some()
    }

    /// Watch refresh outcomes.
    pub fn subscribe(&self) -> watch::Receiver<PeerHealth> {
        self.inner.health.subscribe()
    }

    /// Current snapshot, whatever the health.
    pub fn cache(&self) -> Arc<TableCache> {
        self.inner.cache.load_full()
    }

    /// Snapshot to serve queries from, or `None` if the peer is not up.
    pub fn snapshot(&self) -> Option<Arc<TableCache>> {
        (self.state() == PeerState::Up).then(|| self.cache())
    }

    pub fn status(&self) -> PeerStatus {
        let config = &self.inner.config;
        PeerStatus {
            key: config.key.clone(),
            name: config.display_name().to_string(),
            addr: config.addr.clone(),
            state: self.state(),
            paused: self.is_paused(),
            health: self.inner.health.borrow().clone(),
            bytes_send: self.inner.bytes_send.load(Ordering::Relaxed),
            bytes_received: self.inner.bytes_received.load(Ordering::Relaxed),
            queries: self.inner.queries.load(Ordering::Relaxed),
        }
    }

    /// Suspend refreshing and freeze the reported health.
    pub fn pause(&self) {
        let state = self.state();
        let changed = self.inner.paused.send_if_modified(|paused| {
            if paused.is_some() {
                return false;
            }
            *paused = Some(state);
            true
        });
        if changed {
            tracing::info!(peer = %self.key(), state = %state, "Peer paused");
        }
    }

    pub fn resume(&self) {
        let changed = self.inner.paused.send_if_modified(|paused| paused.take().is_some());
        if changed {
            tracing::info!(peer = %self.key(), "Peer resumed");
        }
    }

    /// Forward a command line to the backend.
    ///
    /// # Errors
    /// Fails without contacting the backend when the peer is paused, down or
    /// stopping; otherwise reports the backend's failure.
    pub async fn send_command(&self, line: &str) -> Result<(), PeerError> {
        let inner = &self.inner;
        let key = &inner.config.key;
        if inner.cancel.is_cancelled() {
            return Err(PeerError::ShuttingDown(key.clone()));
        }
        if self.is_paused() {
            return Err(PeerError::Paused(key.clone()));
        }
        if self.state() == PeerState::Down {
            return Err(PeerError::Unavailable {
                key: key.clone(),
                reason: inner.health.borrow().last_error.clone().unwrap_or_default(),
            });
        }

        inner.queries.fetch_add(1, Ordering::Relaxed);
        inner
            .bytes_send
            .fetch_add(line.len() as u64, Ordering::Relaxed);
        let timeout = inner.settings().connect_timeout;
        tokio::select! {
            _ = inner.cancel.cancelled() => Err(PeerError::ShuttingDown(key.clone())),
            result = tokio::time::timeout(timeout, inner.source.send_command(line)) => {
                let result = result.map_err(|_| PeerError::Timeout {
                    addr: inner.config.addr.clone(),
                    timeout,
                })?;
                match &result {
                    Ok(()) => tracing::debug!(peer = %key, command = %line, "Command forwarded"),
                    Err(e) => tracing::warn!(peer = %key, error = %e, "Command failed"),
                }
                result
            }
        }
    }

    /// Cancel the refresh task without waiting for it.
    pub fn stop(&self) {
        self.inner.cancel.cancel();
    }

    /// Cancel the refresh task and wait for it to finish.
    pub async fn shutdown(&self) {
        self.shutdown_with_timeout(DEFAULT_SHUTDOWN_TIMEOUT).await
    }

    pub async fn shutdown_with_timeout(&self, timeout: Duration) {
        self.stop();
        let task = self.lock_task().take();
        if let Some(task) = task
            && tokio::time::timeout(timeout, task).await.is_err()
        {
            tracing::warn!(peer = %self.key(), "Peer shutdown timed out");
            return;
        }
        tracing::info!(peer = %self.key(), "Peer stopped");
    }

    fn lock_task(&self) -> std::sync::MutexGuard<'_, Option<JoinHandle<()>>> {
        self.task.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl Drop for PeerConnection {
    fn drop(&mut self) {
        self.inner.cancel.cancel();
    }
}

// =============================================================================
// Refresh Loop
// =============================================================================

impl Inner {
    fn settings(&self) -> RefreshSettings {
        *self.settings.borrow()
    }

    async fn run(self: Arc<Self>) {
        let key = self.config.key.clone();
        let mut last_full: Option<Instant> = None;
        let mut settings_rx = self.settings.subscribe();

        loop {
            if !self.wait_unpaused().await {
                break;
            }

            let settings = *settings_rx.borrow_and_update();
            let full = last_full.is_none_or(|at| at.elapsed() >= settings.full_refresh_interval)
                || self.health.borrow().state != PeerState::Up;
            let started_at = Utc::now();
            let started = Instant::now();

            let result = tokio::select! {
                _ = self.cancel.cancelled() => break,
                result = self.refresh(full, started_at) => result,
            };

            // A refresh that finished after pausing is discarded.
            if self.paused.borrow().is_some() {
                continue;
            }

            let delay = match result {
                Ok(cache) => {
                    self.cache.store(Arc::new(cache));
                    if full {
                        last_full = Some(started);
                    }
                    let elapsed = started.elapsed();
                    let recovered = self.health.borrow().state != PeerState::Up;
                    self.health.send_modify(|h| {
                        h.state = PeerState::Up;
                        h.last_error = None;
                        h.last_update = Some(started_at);
                        h.last_online = Some(Utc::now());
                        h.response_time = Some(elapsed);
                        h.failures = 0;
                        h.attempts += 1;
                    });
                    if recovered {
                        tracing::info!(peer = %key, "Peer is up");
                    }
                    tracing::debug!(
                        peer = %key,
                        full,
                        duration_ms = elapsed.as_millis() as u64,
                        "Refresh succeeded"
                    );
                    settings.refresh_interval
                }
                Err(e) => {
                    let was_down = self.health.borrow().state == PeerState::Down;
                    self.health.send_modify(|h| {
                        h.state = PeerState::Down;
                        h.last_error = Some(e.to_string());
                        h.failures = h.failures.saturating_add(1);
                        h.attempts += 1;
                    });
                    let failures = self.health.borrow().failures;
                    let delay = settings.backoff(failures);
                    if was_down {
                        tracing::debug!(peer = %key, error = %e, failures, retry_in = ?delay, "Refresh failed");
                    } else {
                        tracing::warn!(peer = %key, error = %e, retry_in = ?delay, "Peer is down");
                    }
                    delay
                }
            };

            tokio::select! {
                _ = self.cancel.cancelled() => break,
                _ = tokio::time::sleep(delay) => {}
                _ = settings_rx.changed() => {}
            }
        }

        tracing::debug!(peer = %key, "Refresh loop finished");
    }

    /// Wait until not paused. Returns `false` once cancelled.
    async fn wait_unpaused(&self) -> bool {
        let mut paused = self.paused.subscribe();
        tokio::select! {
            _ = self.cancel.cancelled() => false,
            result = paused.wait_for(Option::is_none) => result.is_ok(),
        }
    }

    /// Fetch tables and build the next snapshot.
    ///
    /// A delta refresh fetches `hosts` and `services` rows changed since the
    /// current snapshot and merges them into it; `status` is always fetched whole.
    async fn refresh(&self, full: bool, started_at: DateTime<Utc>) -> Result<TableCache, PeerError> {
        let current = self.cache.load_full();
        let since = if full { None } else { current.refreshed_at() };

        let mut tables = Vec::with_capacity(TableName::PEER_SCOPED.len());
        for name in TableName::PEER_SCOPED {
            let delta_since = since.filter(|_| name.change_column().is_some());
            let body = self
                .fetch(&table_request(name, delta_since.map(|at| at.timestamp())))
                .await?;
            let table = Table::from_payload(
                name,
                &self.config.key,
                self.config.display_name(),
                &body,
            )?;
            let table = match (delta_since, current.table(name)) {
                (Some(_), Some(previous)) => previous.merge_delta(table),
                _ => table,
            };
            tables.push(table);
        }

        Ok(if since.is_some() {
            current.with_tables(tables, started_at)
        } else {
            TableCache::new(tables, started_at)
        })
    }

    async fn fetch(&self, request: &str) -> Result<Vec<u8>, PeerError> {
        self.queries.fetch_add(1, Ordering::Relaxed);
        self.bytes_send
            .fetch_add(request.len() as u64, Ordering::Relaxed);
        let body = self.source.query(request).await?;
        self.bytes_received
            .fetch_add(body.len() as u64, Ordering::Relaxed);
        Ok(body)
    }
}

/// Request text fetching the backend columns of `table`, optionally limited
/// to rows changed at or after `since` (unix seconds).
pub fn table_request(table: TableName, since: Option<i64>) -> String {
    let columns: Vec<&str> = Table::fetched_columns(table)
        .iter()
        .map(|c| c.name)
        .collect();
    let mut request = format!("GET {}\nColumns: {}\n", table, columns.join(" "));
    if let (Some(ts), Some(column)) = (since, table.change_column()) {
        request.push_str(&format!("Filter: {column} >= {ts}\n"));
    }
    request.push_str("OutputFormat: json\nResponseHeader: fixed16\n\n");
    request
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::peer::StaticSource;

    fn settings() -> RefreshSettings {
        RefreshSettings {
            refresh_interval: Duration::from_millis(20),
            full_refresh_interval: Duration::from_secs(60),
            stale_threshold: Duration::from_secs(30),
            connect_timeout: Duration::from_secs(1),
            max_backoff: Duration::from_millis(100),
        }
    }

    fn hosts_source() -> Arc<StaticSource> {
        Arc::new(StaticSource::new().with_rows(
            TableName::Hosts,
            vec![serde_json::json!({"name": "web1", "state": 0, "last_check": 100})],
        ))
    }

    async fn wait_attempts(peer: &PeerConnection, attempts: u64) -> PeerHealth {
        let mut rx = peer.subscribe();
        let health = tokio::time::timeout(
            Duration::from_secs(5),
            rx.wait_for(|h| h.attempts >= attempts),
        )
        .await
        .expect("refresh attempt timed out")
        .unwrap()
        .clone();
        health
    }

    #[test]
    fn test_table_request() {
        let request = table_request(TableName::Status, Some(5));
        assert!(request.starts_with("GET status\nColumns: program_start "));
        assert!(!request.contains("Filter:"));
        assert!(!request.contains("peer_key"));

        let request = table_request(TableName::Hosts, Some(1700000000));
        assert!(request.contains("Filter: last_check >= 1700000000\n"));
        assert!(request.ends_with("OutputFormat: json\nResponseHeader: fixed16\n\n"));
    }

    #[test]
    fn test_stale_derivation() {
        let now = Utc::now();
        let health = PeerHealth {
            state: PeerState::Up,
            last_update: Some(now - chrono::Duration::seconds(60)),
            ..Default::default()
        };
        assert_eq!(health.state_at(now, Duration::from_secs(30)), PeerState::Stale);
        assert_eq!(health.state_at(now, Duration::from_secs(120)), PeerState::Up);

        let health = PeerHealth {
            state: PeerState::Down,
            ..health
        };
        assert_eq!(health.state_at(now, Duration::from_secs(30)), PeerState::Down);
    }

    #[tokio::test]
    async fn test_refresh_publishes_snapshot() {
        let peer = PeerConnection::new(PeerConfig::new("mockid0", "static"), settings(), hosts_source());
        assert_eq!(peer.state(), PeerState::Pending);
        assert!(peer.snapshot().is_none());

        peer.start();
        let health = wait_attempts(&peer, 1).await;
        assert_eq!(health.state, PeerState::Up);
        assert_eq!(peer.state(), PeerState::Up);

        let snapshot = peer.snapshot().unwrap();
        let hosts = snapshot.table(TableName::Hosts).unwrap();
        assert_eq!(hosts.rows.len(), 1);
        let (idx, _) = TableName::Hosts.column("peer_key").unwrap();
        assert_eq!(hosts.rows[0].get(idx), Some(&Value::String("mockid0".into())));

        let status = peer.status();
        assert!(status.bytes_send > 0);
        assert!(status.bytes_received > 0);
        assert!(status.queries >= 3);
        peer.shutdown().await;
    }

    #[tokio::test]
    async fn test_failure_marks_down_and_recovers() {
        let source = hosts_source();
        source.set_failure(Some("connection refused"));
        let peer = PeerConnection::new(PeerConfig::new("id0", "static"), settings(), source.clone());
        peer.start();

        let health = wait_attempts(&peer, 1).await;
        assert_eq!(health.state, PeerState::Down);
        assert!(health.last_error.unwrap().contains("connection refused"));
        assert!(peer.snapshot().is_none());

        let err = peer.send_command("COMMAND [1] TEST").await.unwrap_err();
        assert!(matches!(err, PeerError::Unavailable { .. }));
        assert!(source.commands().is_empty());

        source.set_failure(None);
        let mut rx = peer.subscribe();
        tokio::time::timeout(Duration::from_secs(5), rx.wait_for(|h| h.state == PeerState::Up))
            .await
            .expect("peer did not recover")
            .unwrap();
        assert!(peer.snapshot().is_some());
        peer.shutdown().await;
    }

    #[tokio::test]
    async fn test_delta_refresh_merges_rows() {
        let source = hosts_source();
        let peer = PeerConnection::new(PeerConfig::new("id0", "static"), settings(), source.clone());
        peer.start();
        wait_attempts(&peer, 1).await;

        source.set_rows(
            TableName::Hosts,
            vec![serde_json::json!({"name": "web2", "state": 1, "last_check": 200})],
        );
        // Skip a refresh that may have been in flight while the rows changed.
        let attempts = peer.subscribe().borrow().attempts;
        wait_attempts(&peer, attempts + 2).await;

        // The static source ignores the delta filter; web2 is appended, web1 kept.
        let hosts = peer.cache().table(TableName::Hosts).unwrap().clone();
        let (idx, _) = TableName::Hosts.column("name").unwrap();
        let names: Vec<String> = hosts.rows.iter().map(|r| r.get(idx).unwrap().to_string()).collect();
        assert_eq!(names, vec!["web1", "web2"]);
        peer.shutdown().await;
    }

    #[tokio::test]
    async fn test_pause_freezes_state_and_rejects_commands() {
        let source = hosts_source();
        let peer = PeerConnection::new(PeerConfig::new("id0", "static"), settings(), source.clone());
        peer.start();
        wait_attempts(&peer, 1).await;

        peer.pause();
        assert!(peer.is_paused());
        source.set_failure(Some("gone"));
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(peer.state(), PeerState::Up);
        assert!(peer.status().paused);

        let err = peer.send_command("COMMAND [1] TEST").await.unwrap_err();
        assert!(matches!(err, PeerError::Paused(_)));

        peer.resume();
        let mut rx = peer.subscribe();
        tokio::time::timeout(Duration::from_secs(5), rx.wait_for(|h| h.state == PeerState::Down))
            .await
            .expect("refresh did not resume")
            .unwrap();
        peer.shutdown().await;
    }

    #[tokio::test]
    async fn test_updated_stale_threshold_applies_without_restart() {
        let peer = PeerConnection::new(PeerConfig::new("id0", "static"), settings(), hosts_source());
        peer.start();
        wait_attempts(&peer, 1).await;
        let cache = peer.cache();

        let tighter = RefreshSettings {
            refresh_interval: Duration::from_secs(60),
            stale_threshold: Duration::from_millis(1),
            max_backoff: Duration::from_secs(60),
            ..settings()
        };
        assert!(peer.update_settings(tighter));
        assert!(!peer.update_settings(tighter));
        assert_eq!(peer.settings(), tighter);

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(peer.state(), PeerState::Stale);
        assert!(peer.snapshot().is_none());
        assert!(peer.cache().table(TableName::Hosts).is_some());
        assert!(cache.table(TableName::Hosts).is_some());
        peer.shutdown().await;
    }

    #[tokio::test]
    async fn test_command_forwarding_and_shutdown() {
        let source = hosts_source();
        let peer = PeerConnection::new(PeerConfig::new("id0", "static"), settings(), source.clone());
        peer.start();
        wait_attempts(&peer, 1).await;

        peer.send_command("COMMAND [123456] TEST").await.unwrap();
        assert_eq!(source.commands(), vec!["COMMAND [123456] TEST"]);

        peer.shutdown().await;
        let err = peer.send_command("COMMAND [123457] TEST").await.unwrap_err();
        assert!(matches!(err, PeerError::ShuttingDown(_)));
    }

    #[test]
    fn test_status_row_matches_schema() {
        let peer = PeerConnection::new(
            PeerConfig::new("mockid0", "127.0.0.1:6557").with_name("Site A"),
            settings(),
            hosts_source(),
        );
        let row = peer.status().to_row();
        assert_eq!(row.values().len(), TableName::Backends.columns().len());
        let get = |name: &str| row.get(TableName::Backends.column(name).unwrap().0).unwrap().clone();
        assert_eq!(get("peer_key"), Value::String("mockid0".into()));
        assert_eq!(get("peer_name"), Value::String("Site A".into()));
        assert_eq!(get("status"), Value::Int(3));
        assert_eq!(get("state"), Value::String("pending".into()));
    }
}
