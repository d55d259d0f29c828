//! Listener module for livemux.
//!
//! Serves the line protocol on TCP and Unix sockets and a small HTTP API:
//! liveness and readiness probes plus a `POST /query` endpoint taking the same
//! request text as the sockets.

use std::path::PathBuf;
use std::sync::Arc;

use axum::{
    Json, Router,
    body::Bytes,
    extract::State,
    http::{StatusCode, header},
    response::{IntoResponse, Response as HttpResponse},
    routing::{get, post},
};
use serde::Serialize;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tower_http::trace::{DefaultMakeSpan, TraceLayer};

use crate::query::{
    OutputFormat, QueryExecutor, Request, Response, ResponseOptions, read_text, sniff_header,
};

// =============================================================================
// Request Handling
// =============================================================================

/// Parse and execute one request text.
///
/// Returns the response together with the request's response options.
/// A request that fails to parse gets default options, with the header
/// mode it asked for, and never keeps the connection open.
pub async fn answer(executor: &QueryExecutor, text: &str) -> (Response, ResponseOptions) {
    match Request::parse(text) {
        Ok(request) => {
            let result = executor.execute(&request).await;
            if let Err(e) = &result {
                tracing::debug!(error = %e, "Request failed");
            }
            let response = Response::from_result(&request, result);
            (response, request.options().clone())
        }
        Err(e) => {
            tracing::debug!(error = %e, "Rejected request");
            let options = ResponseOptions {
                header: sniff_header(text),
                ..Default::default()
            };
            let response = Response::error(options.header, e.status_code(), &e.to_string());
            (response, options)
        }
    }
}

/// Serve requests on one client connection until it closes or a response
/// without keep-alive has been sent.
pub async fn handle_connection<S>(stream: S, executor: QueryExecutor) -> std::io::Result<()>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let (read, mut write) = tokio::io::split(stream);
    let mut reader = BufReader::new(read);

    loop {
        let (response, keep_alive) = match read_text(&mut reader).await {
            Ok(Some((text, size))) => {
                tracing::debug!(bytes = size, "Request received");
                let (response, options) = answer(&executor, &text).await;
                (response, options.keep_alive)
            }
            Ok(None) => break,
            Err(e) => {
                tracing::debug!(error = %e, "Failed to read request");
                let status = e.status_code();
                (Response::error(Default::default(), status, &e.to_string()), false)
            }
        };
        write.write_all(&response.to_bytes()).await?;
        write.flush().await?;
        if !keep_alive {
            break;
        }
    }
    write.shutdown().await
}

// =============================================================================
// Line Protocol Listeners
// =============================================================================

/// A bound line-protocol listener.
#[derive(Debug)]
pub enum LineListener {
    Tcp(TcpListener),
    #[cfg(unix)]
    Unix(tokio::net::UnixListener, PathBuf),
}

impl LineListener {
    /// Bind `addr`: a Unix socket when it contains `/`, TCP `host:port` otherwise.
    ///
    /// A stale socket file left at a Unix path is replaced.
    pub async fn bind(addr: &str) -> std::io::Result<Self> {
        if addr.contains('/') {
            #[cfg(unix)]
            {
                let path = PathBuf::from(addr);
                if path.exists() {
                    std::fs::remove_file(&path)?;
                }
                let listener = tokio::net::UnixListener::bind(&path)?;
                return Ok(Self::Unix(listener, path));
            }
            #[cfg(not(unix))]
            return Err(std::io::Error::new(
                std::io::ErrorKind::Unsupported,
                "unix sockets are not supported on this platform",
            ));
        }
        Ok(Self::Tcp(TcpListener::bind(addr).await?))
    }

    /// Printable bound address.
    pub fn local_addr(&self) -> String {
        match self {
            Self::Tcp(listener) => listener
                .local_addr()
                .map(|a| a.to_string())
                .unwrap_or_else(|_| "tcp".to_string()),
            #[cfg(unix)]
            Self::Unix(_, path) => path.display().to_string(),
        }
    }

    /// Accept connections until `shutdown` is cancelled; each connection is
    /// served in its own task.
    pub async fn serve(self, executor: QueryExecutor, shutdown: CancellationToken) {
        let addr = self.local_addr();
        tracing::info!(listen = %addr, "Line protocol listener started");

        loop {
            let accepted = tokio::select! {
                _ = shutdown.cancelled() => break,
                accepted = self.accept(executor.clone()) => accepted,
            };
            if let Err(e) = accepted {
                tracing::warn!(listen = %addr, error = %e, "Accept failed");
            }
        }

        #[cfg(unix)]
        if let Self::Unix(_, path) = &self
            && let Err(e) = std::fs::remove_file(path)
        {
            tracing::debug!(path = %path.display(), error = %e, "Failed to remove socket file");
        }
        tracing::info!(listen = %addr, "Line protocol listener stopped");
    }

    async fn accept(&self, executor: QueryExecutor) -> std::io::Result<()> {
        match self {
            Self::Tcp(listener) => {
                let (stream, peer) = listener.accept().await?;
                tokio::spawn(async move {
                    if let Err(e) = handle_connection(stream, executor).await {
                        tracing::debug!(client = %peer, error = %e, "Connection closed with error");
                    }
                });
            }
            #[cfg(unix)]
            Self::Unix(listener, _) => {
                let (stream, _) = listener.accept().await?;
                tokio::spawn(async move {
                    if let Err(e) = handle_connection(stream, executor).await {
                        tracing::debug!(error = %e, "Connection closed with error");
                    }
                });
            }
        }
        Ok(())
    }
}

// =============================================================================
// HTTP API
// =============================================================================

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    pub executor: QueryExecutor,
}

/// Health check response.
#[derive(Serialize)]
struct HealthResponse {
    status: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    peers_up: Option<usize>,
}

/// Create the Axum router with all routes.
pub fn create_router(state: AppState) -> Router {
    let app_state = Arc::new(state);

    Router::new()
        .route("/healthz", get(healthz_handler))
        .route("/readyz", get(readyz_handler))
        .route("/query", post(query_handler))
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(DefaultMakeSpan::default().include_headers(true)),
        )
        .with_state(app_state)
}

/// Liveness probe.
async fn healthz_handler() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        peers_up: None,
    })
}

/// Readiness probe: ready once at least one peer serves data.
async fn readyz_handler(State(state): State<Arc<AppState>>) -> HttpResponse {
    let peers = state.executor.peers();
    let up = peers
        .peers()
        .iter()
        .filter(|p| p.state() == crate::peer::PeerState::Up)
        .count();

    if peers.is_ready() {
        Json(HealthResponse {
            status: "ok".to_string(),
            peers_up: Some(up),
        })
        .into_response()
    } else {
        (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(HealthResponse {
                status: "not_ready".to_string(),
                peers_up: Some(up),
            }),
        )
            .into_response()
    }
}

/// Execute a request text posted as the body.
async fn query_handler(State(state): State<Arc<AppState>>, body: Bytes) -> HttpResponse {
    let text = String::from_utf8_lossy(&body);
    let (response, options) = answer(&state.executor, &text).await;

    let status = StatusCode::from_u16(response.status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    let content_type = match options.format {
        OutputFormat::Json | OutputFormat::WrappedJson if response.is_success() => {
            "application/json"
        }
        _ => "text/plain; charset=utf-8",
    };
    (status, [(header::CONTENT_TYPE, content_type)], response.body).into_response()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{PeerConfig, RefreshSettings};
    use crate::peer::{PeerSetManager, PeerSource, StaticSource};
    use crate::query::ResponseHeader;
    use crate::table::TableName;
    use axum::http::Request as HttpRequest;
    use std::time::Duration;
    use tower::ServiceExt;

    async fn create_test_state(peers: &[&str]) -> AppState {
        let manager = Arc::new(PeerSetManager::new(Arc::new(
            |_: &PeerConfig, _: &RefreshSettings| -> Arc<dyn PeerSource> {
                Arc::new(StaticSource::new().with_rows(
                    TableName::Hosts,
                    vec![serde_json::json!({"name": "web1"})],
                ))
            },
        )));
        let configs: Vec<PeerConfig> = peers.iter().map(|k| PeerConfig::new(*k, "static")).collect();
        manager.reload(&configs, RefreshSettings::default());
        for peer in manager.peers().iter() {
            let mut rx = peer.subscribe();
            tokio::time::timeout(Duration::from_secs(5), rx.wait_for(|h| h.attempts > 0))
                .await
                .unwrap()
                .unwrap();
        }
        AppState {
            executor: QueryExecutor::new(manager),
        }
    }

    async fn body_text(response: HttpResponse) -> String {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        String::from_utf8_lossy(&bytes).into_owned()
    }

    fn post_query(text: &str) -> HttpRequest<axum::body::Body> {
        HttpRequest::builder()
            .method("POST")
            .uri("/query")
            .body(axum::body::Body::from(text.to_string()))
            .unwrap()
    }

    #[tokio::test]
    async fn test_probes() {
        let app = create_router(create_test_state(&[]).await);
        let response = app
            .clone()
            .oneshot(HttpRequest::builder().uri("/healthz").body(axum::body::Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let response = app
            .oneshot(HttpRequest::builder().uri("/readyz").body(axum::body::Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);

        let app = create_router(create_test_state(&["mockid0"]).await);
        let response = app
            .oneshot(HttpRequest::builder().uri("/readyz").body(axum::body::Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_query_endpoint() {
        let state = create_test_state(&["mockid0"]).await;
        let app = create_router(state.clone());

        let response = app
            .clone()
            .oneshot(post_query("GET backends\nColumns: peer_key state\n\n"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body_text(response).await, "mockid0;up\n");

        let response = app
            .clone()
            .oneshot(post_query("GET hosts\nColumns: name\nOutputFormat: json\n\n"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers()[header::CONTENT_TYPE], "application/json");
        assert_eq!(body_text(response).await, "[[\"web1\"]]\n");

        let response = app
            .clone()
            .oneshot(post_query("GET none\nOutputFormat: json\n\n"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(
            response.headers()[header::CONTENT_TYPE],
            "text/plain; charset=utf-8"
        );

        let response = app.oneshot(post_query("GET none\n\n")).await.unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(
            body_text(response).await,
            "bad request: table none does not exist\n"
        );
        state.executor.peers().shutdown().await;
    }

    #[tokio::test]
    async fn test_connection_keep_alive() {
        let state = create_test_state(&["mockid0"]).await;
        let (client, server) = tokio::io::duplex(4096);
        let task = tokio::spawn(handle_connection(server, state.executor.clone()));

        let (read, mut write) = tokio::io::split(client);
        write
            .write_all(
                b"GET backends\nColumns: peer_key\nKeepAlive: on\nResponseHeader: fixed16\n\n\
                  GET backends\nColumns: peer_key\n\n",
            )
            .await
            .unwrap();

        let mut output = String::new();
        let mut read = read;
        tokio::io::AsyncReadExt::read_to_string(&mut read, &mut output)
            .await
            .unwrap();
        assert_eq!(output, "200           8\nmockid0\nmockid0\n");
        task.await.unwrap().unwrap();
        state.executor.peers().shutdown().await;
    }

    #[tokio::test]
    async fn test_parse_error_honours_fixed16() {
        let state = create_test_state(&[]).await;
        let (response, options) =
            answer(&state.executor, "GET none\nResponseHeader: fixed16\n").await;
        assert!(!options.keep_alive);
        assert_eq!(options.header, ResponseHeader::Fixed16);
        let bytes = response.to_bytes();
        assert!(bytes.starts_with(b"400 "));
        assert!(bytes.ends_with(b"bad request: table none does not exist\n"));
    }
}
