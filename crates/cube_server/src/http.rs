//! Raw TCP + tokio HTTP front end.
//!
//! The surface is three routes; a full HTTP framework would be more
//! dependency than the protocol deserves:
//! - `POST /`: one command per request, plain-text body, `X-Client-Name`
//!   header required. Replies are plain text: a value, `OK`,
//!   `<old> <new>`, or `ERR <reason>`.
//! - `GET /`: liveness ("Hello").
//! - `GET /status`: JSON counters for operators and tests.
//!
//! Connections are one-shot: read one request, write one response, close.

use std::future::Future;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Instant;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};

use cube_common::error::CubeError;
use cube_storage::engine::CubeEngine;
use cube_txn::TxnManager;

use crate::command::{parse_command, Command};

/// Upper bound on request head (request line + headers).
const MAX_HEAD_BYTES: usize = 8 * 1024;

/// Upper bound on command body.
const MAX_BODY_BYTES: usize = 1024 * 1024;

/// Shared state behind the listener.
pub struct ServerState {
    engine: Arc<CubeEngine>,
    txns: Arc<TxnManager>,
    started_at: Instant,
    active_connections: AtomicUsize,
}

impl ServerState {
    pub fn new(engine: Arc<CubeEngine>, txns: Arc<TxnManager>) -> Self {
        Self {
            engine,
            txns,
            started_at: Instant::now(),
            active_connections: AtomicUsize::new(0),
        }
    }

    pub fn active_connections(&self) -> usize {
        self.active_connections.load(Ordering::Relaxed)
    }

    fn status_json(&self) -> String {
        let data = self.engine.data_stats();
        let wal = self.engine.wal_stats();
        let txn = self.txns.stats();
        format!(
            concat!(
                r#"{{"status":"ok","uptime_secs":{},"active_connections":{},"#,
                r#""data":{{"reads":{},"appends":{},"rewrites":{},"corrupt_lines":{}}},"#,
                r#""wal":{{"records_written":{},"fsyncs":{},"fsync_avg_us":{},"fsync_max_us":{}}},"#,
                r#""txn":{{"begins":{},"commits":{},"conflict_aborts":{},"rollbacks":{},"reaped":{},"active":{}}}}}"#
            ),
            self.started_at.elapsed().as_secs(),
            self.active_connections(),
            data.reads,
            data.appends,
            data.rewrites,
            data.corrupt_lines,
            wal.records_written,
            wal.fsyncs,
            wal.fsync_avg_us,
            wal.fsync_max_us,
            txn.begins,
            txn.commits,
            txn.conflict_aborts,
            txn.rollbacks,
            txn.reaped,
            txn.active,
        )
    }
}

/// Accept loop. Serves until `shutdown` resolves; each connection is handled
/// on its own task.
pub async fn run_server(
    listener: TcpListener,
    state: Arc<ServerState>,
    shutdown: impl Future<Output = ()>,
) {
    match listener.local_addr() {
        Ok(addr) => tracing::info!("HTTP server listening on {}", addr),
        Err(e) => tracing::warn!("HTTP server listening (local_addr failed: {})", e),
    }

    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            result = listener.accept() => {
                match result {
                    Ok((stream, _)) => {
                        let state = state.clone();
                        tokio::spawn(async move {
                            state.active_connections.fetch_add(1, Ordering::Relaxed);
                            cube_observability::record_active_connections(state.active_connections());
                            if let Err(e) = handle_connection(stream, &state).await {
                                tracing::debug!("connection error: {}", e);
                            }
                            state.active_connections.fetch_sub(1, Ordering::Relaxed);
                            cube_observability::record_active_connections(state.active_connections());
                        });
                    }
                    Err(e) => {
                        tracing::debug!("accept error: {}", e);
                    }
                }
            }
            _ = &mut shutdown => {
                tracing::info!("HTTP server shutting down");
                break;
            }
        }
    }
}

async fn handle_connection(mut stream: TcpStream, state: &ServerState) -> std::io::Result<()> {
    let request = match read_request(&mut stream).await? {
        Some(request) => request,
        None => return Ok(()),
    };

    let (status, content_type, body) = route(state, &request).await;
    write_response(&mut stream, status, content_type, &body).await
}

async fn route(state: &ServerState, request: &Request) -> (u16, &'static str, String) {
    match (request.method.as_str(), request.path.as_str()) {
        ("GET", "/") => (200, "text/plain", "Hello".to_string()),
        ("GET", "/status") => (200, "application/json", state.status_json()),
        ("POST", "/") => {
            let Some(client) = request.header("x-client-name") else {
                return (
                    400,
                    "text/plain",
                    "ERR X-Client-Name header required".to_string(),
                );
            };
            let client = client.to_string();
            let started = Instant::now();
            let (status, body, command) = execute_command(state, &client, &request.body).await;
            cube_observability::record_command_metrics(
                started.elapsed().as_micros() as u64,
                command,
                status == 200,
            );
            (status, "text/plain", body)
        }
        _ => (404, "text/plain", "Not found".to_string()),
    }
}

/// Parse and run one command for `client`. Returns status, body, and the
/// command name for metrics.
async fn execute_command(
    state: &ServerState,
    client: &str,
    body: &str,
) -> (u16, String, &'static str) {
    let command = match parse_command(body) {
        Ok(command) => command,
        Err(e) => {
            let e = CubeError::from(e);
            return (e.http_status(), e.reply(), "parse_error");
        }
    };
    let name = command.name();

    let result = match command {
        Command::Get { key } => state.txns.get(client, &key).await,
        Command::Set { key, value } => state
            .txns
            .set(client, &key, value)
            .await
            .map(|(old, new)| format!("{old} {new}")),
        Command::Begin => state.txns.begin(client).await.map(|_| "OK".to_string()),
        Command::Commit => {
            let result = state.txns.commit(client).await.map(|_| "OK".to_string());
            cube_observability::record_txn_metrics(if result.is_ok() { "commit" } else { "abort" });
            result
        }
        Command::Rollback => state.txns.rollback(client).await.map(|_| "OK".to_string()),
    };

    match result {
        Ok(body) => (200, body, name),
        Err(e) => {
            if !e.is_user_error() {
                tracing::error!(client, command = name, error = %e, "command failed");
            }
            (e.http_status(), e.reply(), name)
        }
    }
}

struct Request {
    method: String,
    path: String,
    /// Header names lowercased.
    headers: Vec<(String, String)>,
    body: String,
}

impl Request {
    fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, v)| v.as_str())
    }
}

/// Read one HTTP request. `None` on an empty (closed) connection.
async fn read_request(stream: &mut TcpStream) -> std::io::Result<Option<Request>> {
    let mut buf = Vec::with_capacity(1024);
    let head_end = loop {
        if let Some(pos) = find_head_end(&buf) {
            break pos;
        }
        if buf.len() > MAX_HEAD_BYTES {
            return Err(std::io::Error::other("request head too large"));
        }
        let mut chunk = [0u8; 1024];
        let n = stream.read(&mut chunk).await?;
        if n == 0 {
            if buf.is_empty() {
                return Ok(None);
            }
            return Err(std::io::Error::other("connection closed mid-request"));
        }
        buf.extend_from_slice(&chunk[..n]);
    };

    let head = String::from_utf8_lossy(&buf[..head_end]).into_owned();
    let mut lines = head.split("\r\n");
    let request_line = lines.next().unwrap_or_default();
    let mut parts = request_line.split_whitespace();
    let method = parts.next().unwrap_or_default().to_string();
    let path = parts.next().unwrap_or("/").to_string();

    let mut headers = Vec::new();
    for line in lines {
        if let Some((name, value)) = line.split_once(':') {
            headers.push((name.trim().to_ascii_lowercase(), value.trim().to_string()));
        }
    }

    let content_length: usize = headers
        .iter()
        .find(|(n, _)| n == "content-length")
        .and_then(|(_, v)| v.parse().ok())
        .unwrap_or(0);
    if content_length > MAX_BODY_BYTES {
        return Err(std::io::Error::other("request body too large"));
    }

    let mut body = buf[head_end + 4..].to_vec();
    while body.len() < content_length {
        let mut chunk = [0u8; 4096];
        let n = stream.read(&mut chunk).await?;
        if n == 0 {
            return Err(std::io::Error::other("connection closed mid-body"));
        }
        body.extend_from_slice(&chunk[..n]);
    }
    body.truncate(content_length);

    Ok(Some(Request {
        method,
        path,
        headers,
        body: String::from_utf8_lossy(&body).into_owned(),
    }))
}

fn find_head_end(buf: &[u8]) -> Option<usize> {
    buf.windows(4).position(|w| w == b"\r\n\r\n")
}

async fn write_response(
    stream: &mut TcpStream,
    status: u16,
    content_type: &str,
    body: &str,
) -> std::io::Result<()> {
    let response = format!(
        "HTTP/1.1 {} {}\r\nContent-Type: {}; charset=utf-8\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
        status,
        status_text(status),
        content_type,
        body.len(),
        body
    );
    stream.write_all(response.as_bytes()).await?;
    stream.flush().await
}

fn status_text(status: u16) -> &'static str {
    match status {
        200 => "OK",
        400 => "Bad Request",
        404 => "Not Found",
        _ => "Internal Server Error",
    }
}
