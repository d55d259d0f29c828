//! Backend sources.
//!
//! A [`PeerSource`] is anything that answers table requests with a JSON
//! array-of-arrays body and accepts forwarded commands. [`LivestatusSource`]
//! speaks the line protocol to a live backend; [`StaticSource`] serves an
//! in-memory dump.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;

use crate::peer::PeerError;
use crate::query::{FIXED16_LEN, Request, parse_fixed16};
use crate::table::{PEER_KEY, PEER_NAME, TableName};

/// Largest response body accepted from a backend (256 MiB).
pub const MAX_RESPONSE_BYTES: usize = 256 * 1024 * 1024;

/// Abstract backend a peer connection refreshes from.
#[async_trait::async_trait]
pub trait PeerSource: Send + Sync + 'static {
    /// Send a `GET` request and return the response body.
    async fn query(&self, request: &str) -> Result<Vec<u8>, PeerError>;

    /// Forward a command line (`COMMAND [ts] text`) verbatim.
    async fn send_command(&self, command: &str) -> Result<(), PeerError>;
}

// =============================================================================
// Livestatus Source
// =============================================================================

/// Line-protocol backend reached over TCP or a Unix socket.
///
/// A new connection is opened per exchange; every exchange is bounded by the
/// configured timeout.
#[derive(Debug, Clone)]
pub struct LivestatusSource {
    addr: String,
    timeout: Duration,
}

impl LivestatusSource {
    pub fn new(addr: impl Into<String>, timeout: Duration) -> Self {
        Self {
            addr: addr.into(),
            timeout,
        }
    }

    pub fn addr(&self) -> &str {
        &self.addr
    }

    fn is_unix(&self) -> bool {
        self.addr.contains('/')
    }

    async fn with_timeout<T>(
        &self,
        fut: impl Future<Output = Result<T, PeerError>>,
    ) -> Result<T, PeerError> {
        tokio::time::timeout(self.timeout, fut)
            .await
            .map_err(|_| PeerError::Timeout {
                addr: self.addr.clone(),
                timeout: self.timeout,
            })?
    }

    async fn exchange(&self, request: &str, expect_reply: bool) -> Result<Vec<u8>, PeerError> {
        let connect_err = |source| PeerError::Connect {
            addr: self.addr.clone(),
            source,
        };

        if self.is_unix() {
            #[cfg(unix)]
            {
                let stream = tokio::net::UnixStream::connect(&self.addr)
                    .await
                    .map_err(connect_err)?;
                return self.converse(stream, request, expect_reply).await;
            }
            #[cfg(not(unix))]
            return Err(connect_err(std::io::Error::new(
                std::io::ErrorKind::Unsupported,
                "unix sockets are not supported on this platform",
            )));
        }

        let stream = TcpStream::connect(&self.addr).await.map_err(connect_err)?;
        self.converse(stream, request, expect_reply).await
    }

    async fn converse<S>(
        &self,
        mut stream: S,
        request: &str,
        expect_reply: bool,
    ) -> Result<Vec<u8>, PeerError>
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        let io_err = |source| PeerError::Connect {
            addr: self.addr.clone(),
            source,
        };

        stream.write_all(request.as_bytes()).await.map_err(io_err)?;
        stream.flush().await.map_err(io_err)?;
        if !expect_reply {
            stream.shutdown().await.map_err(io_err)?;
            return Ok(Vec::new());
        }

        let mut preamble = [0u8; FIXED16_LEN];
        stream.read_exact(&mut preamble).await.map_err(io_err)?;
        let (status, len) = parse_fixed16(&preamble).ok_or_else(|| {
            PeerError::Protocol(format!(
                "invalid response header {:?}",
                String::from_utf8_lossy(&preamble)
            ))
        })?;

        if len > MAX_RESPONSE_BYTES {
            return Err(PeerError::Protocol(format!(
                "response of {len} bytes exceeds the limit of {MAX_RESPONSE_BYTES} bytes"
            )));
        }

        let mut body = Vec::with_capacity(len.min(64 * 1024));
        (&mut stream)
            .take(len as u64)
            .read_to_end(&mut body)
            .await
            .map_err(io_err)?;
        if body.len() != len {
            return Err(PeerError::Protocol(format!(
                "response truncated after {} of {len} bytes",
                body.len()
            )));
        }
        if status != 200 {
            return Err(PeerError::Protocol(format!(
                "status {}: {}",
                status,
                String::from_utf8_lossy(&body).trim()
            )));
        }
        Ok(body)
    }
}

#[async_trait::async_trait]
impl PeerSource for LivestatusSource {
    async fn query(&self, request: &str) -> Result<Vec<u8>, PeerError> {
        self.with_timeout(self.exchange(request, true)).await
    }

    async fn send_command(&self, command: &str) -> Result<(), PeerError> {
        let request = format!("{command}\n\n");
        self.with_timeout(self.exchange(&request, false))
            .await
            .map(|_| ())
    }
}

// =============================================================================
// Static Source
// =============================================================================

#[derive(Debug, Default)]
struct StaticState {
    tables: HashMap<TableName, Vec<serde_json::Map<String, serde_json::Value>>>,
    failure: Option<String>,
    commands: Vec<String>,
}

/// In-memory backend serving fixed rows and recording forwarded commands.
///
/// Rows are JSON objects keyed by column name; columns a row lacks are
/// served as `null` and read as the zero value of their type.
#[derive(Debug, Default)]
pub struct StaticSource {
    state: Mutex<StaticState>,
}

impl StaticSource {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style variant of [`StaticSource::set_rows`].
    pub fn with_rows(self, table: TableName, rows: Vec<serde_json::Value>) -> Self {
        self.set_rows(table, rows);
        self
    }

    /// Replace the rows served for `table`. Non-object values are ignored.
    pub fn set_rows(&self, table: TableName, rows: Vec<serde_json::Value>) {
        let rows = rows
            .into_iter()
            .filter_map(|row| match row {
                serde_json::Value::Object(map) => Some(map),
                _ => None,
            })
            .collect();
        self.lock().tables.insert(table, rows);
    }

    /// Make every following exchange fail with `reason`, or succeed again with `None`.
    pub fn set_failure(&self, reason: Option<&str>) {
        self.lock().failure = reason.map(str::to_string);
    }

    /// Commands received so far, in order.
    pub fn commands(&self) -> Vec<String> {
        self.lock().commands.clone()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, StaticState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn check_failure(state: &StaticState) -> Result<(), PeerError> {
        match &state.failure {
            Some(reason) => Err(PeerError::Connect {
                addr: "static".to_string(),
                source: std::io::Error::new(std::io::ErrorKind::ConnectionRefused, reason.clone()),
            }),
            None => Ok(()),
        }
    }
}

#[async_trait::async_trait]
impl PeerSource for StaticSource {
    async fn query(&self, request: &str) -> Result<Vec<u8>, PeerError> {
        let Request::Get(query) =
            Request::parse(request).map_err(|e| PeerError::Protocol(e.to_string()))?
        else {
            return Err(PeerError::Protocol("expected a GET request".to_string()));
        };

        let state = self.lock();
        Self::check_failure(&state)?;

        let columns: Vec<&str> = query
            .output_columns()
            .iter()
            .map(|c| c.name)
            .filter(|name| *name != PEER_KEY && *name != PEER_NAME)
            .collect();
        let rows: Vec<Vec<serde_json::Value>> = state
            .tables
            .get(&query.table)
            .map(|rows| {
                rows.iter()
                    .map(|row| {
                        columns
                            .iter()
                            .map(|name| row.get(*name).cloned().unwrap_or_default())
                            .collect()
                    })
                    .collect()
            })
            .unwrap_or_default();

        serde_json::to_vec(&rows).map_err(|e| PeerError::Protocol(e.to_string()))
    }

    async fn send_command(&self, command: &str) -> Result<(), PeerError> {
        let mut state = self.lock();
        Self::check_failure(&state)?;
        state.commands.push(command.to_string());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::query::fixed16_preamble;
    use tokio::net::TcpListener;

    #[tokio::test]
    async fn test_static_source_projects_columns() {
        let source = StaticSource::new().with_rows(
            TableName::Hosts,
            vec![serde_json::json!({"name": "web1", "state": 1, "unused": true})],
        );
        let body = source
            .query("GET hosts\nColumns: state name alias\n\n")
            .await
            .unwrap();
        let rows: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(rows, serde_json::json!([[1, "web1", null]]));
    }

    #[tokio::test]
    async fn test_static_source_failure_and_commands() {
        let source = StaticSource::new();
        source.send_command("COMMAND [1] TEST").await.unwrap();
        assert_eq!(source.commands(), vec!["COMMAND [1] TEST"]);

        source.set_failure(Some("refused"));
        assert!(source.query("GET hosts\n\n").await.is_err());
        assert!(source.send_command("COMMAND [2] TEST").await.is_err());

        source.set_failure(None);
        assert_eq!(source.query("GET hosts\n\n").await.unwrap(), b"[]");
    }

    async fn serve_reply(listener: TcpListener, reply: String) {
        let (mut socket, _) = listener.accept().await.unwrap();
        let mut buf = vec![0u8; 1024];
        let _ = socket.read(&mut buf).await.unwrap();
        socket.write_all(reply.as_bytes()).await.unwrap();
    }

    async fn serve_once(listener: TcpListener, status: u16, body: &'static str) {
        serve_reply(listener, format!("{}{}", fixed16_preamble(status, body.len()), body)).await;
    }

    async fn bind_local() -> Option<(TcpListener, String)> {
        let listener = match TcpListener::bind("127.0.0.1:0").await {
            Ok(listener) => listener,
            Err(e) if e.kind() == std::io::ErrorKind::PermissionDenied => return None,
            Err(e) => panic!("bind failed: {e}"),
        };
        let addr = listener.local_addr().unwrap().to_string();
        Some((listener, addr))
    }

    #[tokio::test]
    async fn test_livestatus_source_reads_fixed16_reply() {
        let listener = match TcpListener::bind("127.0.0.1:0").await {
            Ok(listener) => listener,
            Err(e) if e.kind() == std::io::ErrorKind::PermissionDenied => return,
            Err(e) => panic!("bind failed: {e}"),
        };
        let addr = listener.local_addr().unwrap().to_string();
        let server = tokio::spawn(serve_once(listener, 200, "[[\"web1\"]]"));

        let source = LivestatusSource::new(addr, Duration::from_secs(2));
        let body = source.query("GET hosts\nColumns: name\n\n").await.unwrap();
        assert_eq!(body, b"[[\"web1\"]]");
        server.await.unwrap();
    }

    #[tokio::test]
    async fn test_livestatus_source_rejects_oversized_length() {
        let Some((listener, addr)) = bind_local().await else {
            return;
        };
        let server = tokio::spawn(serve_reply(listener, "200 99999999999\n".to_string()));

        let source = LivestatusSource::new(addr, Duration::from_secs(2));
        let err = source.query("GET hosts\n\n").await.unwrap_err();
        assert!(matches!(err, PeerError::Protocol(_)));
        assert!(err.to_string().contains("exceeds the limit"));
        server.await.unwrap();
    }

    #[tokio::test]
    async fn test_livestatus_source_detects_truncated_body() {
        let Some((listener, addr)) = bind_local().await else {
            return;
        };
        let reply = format!("{}[[\"web1\"]]", fixed16_preamble(200, 100));
        let server = tokio::spawn(serve_reply(listener, reply));

        let source = LivestatusSource::new(addr, Duration::from_secs(2));
        let err = source.query("GET hosts\n\n").await.unwrap_err();
        assert!(err.to_string().contains("truncated after 10 of 100 bytes"));
        server.await.unwrap();
    }

    #[tokio::test]
    async fn test_livestatus_source_reports_error_status() {
        let listener = match TcpListener::bind("127.0.0.1:0").await {
            Ok(listener) => listener,
            Err(e) if e.kind() == std::io::ErrorKind::PermissionDenied => return,
            Err(e) => panic!("bind failed: {e}"),
        };
        let addr = listener.local_addr().unwrap().to_string();
        let server = tokio::spawn(serve_once(listener, 400, "bad request: nope\n"));

        let source = LivestatusSource::new(addr, Duration::from_secs(2));
        let err = source.query("GET hosts\n\n").await.unwrap_err();
        assert_eq!(err.to_string(), "peer protocol error: status 400: bad request: nope");
        server.await.unwrap();
    }

    #[tokio::test]
    async fn test_livestatus_source_connect_failure() {
        let source = LivestatusSource::new("127.0.0.1:1", Duration::from_secs(2));
        let err = source.query("GET hosts\n\n").await.unwrap_err();
        assert!(matches!(err, PeerError::Connect { .. } | PeerError::Timeout { .. }));
    }
}
