//! Request Server.
//!
//! A tokio Unix-domain-socket accept loop gating connections behind a
//! bounded semaphore, speaking one JSON request/response pair per
//! newline-terminated line. Each connection carries its own idle read
//! timeout and write deadline; SIGTERM/SIGINT stop the accept loop,
//! let in-flight handlers drain, and remove the socket file.
//!
//! Grounded on `platform/threading.rs`'s `Arc<Semaphore>` task gate,
//! moved from gating CPU tasks to gating accepted connections.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::Deserialize;
use serde_json::{json, Value};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::UnixListener;
use tokio::sync::{watch, Semaphore};

use crate::config::Config;
use crate::error::Error;
use crate::filter::parse_where;
use crate::query::{AggFunc, QueryEngine, QueryOutcome, QueryRequest};
use crate::Result;

/// One decoded request line.
#[derive(Debug, Deserialize)]
struct Request {
    action: String,
    csv: Option<String>,
    #[serde(rename = "indexDir")]
    index_dir: Option<String>,
    #[serde(rename = "where")]
    where_clause: Option<Value>,
    #[serde(rename = "groupBy")]
    group_by: Option<String>,
    #[serde(rename = "aggCol")]
    agg_col: Option<String>,
    #[serde(rename = "aggFunc")]
    agg_func: Option<String>,
    limit: Option<usize>,
    offset: Option<usize>,
    #[serde(default)]
    #[allow(dead_code)]
    verbose: bool,
    #[serde(default)]
    explain: bool,
}

fn error_response(msg: impl Into<String>) -> Value {
    json!({ "error": msg.into() })
}

/// Run the server until a shutdown signal arrives, binding a Unix
/// socket at `socket_path` (removed first if stale, removed again on
/// exit).
pub async fn run(config: Config, socket_path: impl AsRef<Path>) -> Result<()> {
    let socket_path: PathBuf = socket_path.as_ref().to_path_buf();
    let _ = std::fs::remove_file(&socket_path);
    let listener = UnixListener::bind(&socket_path)?;
    log::info!("request server listening on {}", socket_path.display());

    let semaphore = Arc::new(Semaphore::new(config.max_concurrency));
    let config = Arc::new(config);

    let (shutdown_tx, mut shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        shutdown_signal().await;
        let _ = shutdown_tx.send(true);
    });

    loop {
        tokio::select! {
            accepted = listener.accept() => {
                let (stream, _) = accepted?;
                let mut acquire_shutdown_rx = shutdown_rx.clone();
                let permit = tokio::select! {
                    res = semaphore.clone().acquire_owned() => {
                        match res {
                            Ok(permit) => permit,
                            Err(_) => continue,
                        }
                    }
                    _ = wait_for_shutdown(&mut acquire_shutdown_rx) => {
                        log::warn!("connection closed: {}", Error::Capacity);
                        drop(stream);
                        continue;
                    }
                };
                let cfg = config.clone();
                tokio::spawn(async move {
                    let _permit = permit;
                    if let Err(e) = handle_connection(stream, cfg).await {
                        log::warn!("connection error: {e}");
                    }
                });
            }
            _ = wait_for_shutdown(&mut shutdown_rx) => {
                log::info!("shutdown signal received, draining connections");
                break;
            }
        }
    }

    let _ = std::fs::remove_file(&socket_path);
    Ok(())
}

/// Resolves immediately if shutdown has already been signaled, otherwise
/// waits for the signal. Safe to call repeatedly on a cloned receiver,
/// unlike awaiting `shutdown_signal()` itself a second time.
async fn wait_for_shutdown(rx: &mut watch::Receiver<bool>) {
    if *rx.borrow() {
        return;
    }
    let _ = rx.changed().await;
}

#[cfg(unix)]
async fn shutdown_signal() {
    use tokio::signal::unix::{signal, SignalKind};
    let mut term = signal(SignalKind::terminate()).expect("failed to install SIGTERM handler");
    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);
    tokio::select! {
        _ = term.recv() => {}
        _ = &mut ctrl_c => {}
    }
}

#[cfg(not(unix))]
async fn shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
}

async fn handle_connection(stream: tokio::net::UnixStream, config: Arc<Config>) -> Result<()> {
    let (reader, mut writer) = stream.into_split();
    let mut lines = BufReader::new(reader).lines();

    loop {
        let line = match tokio::time::timeout(config.idle_timeout, lines.next_line()).await {
            Ok(Ok(Some(line))) => line,
            Ok(Ok(None)) => break,
            Ok(Err(e)) => return Err(e.into()),
            Err(_) => break, // idle timeout
        };
        if line.trim().is_empty() {
            continue;
        }

        let response = dispatch(line, config.clone()).await;
        let mut payload = serde_json::to_vec(&response)?;
        payload.push(b'\n');

        match tokio::time::timeout(config.write_deadline, writer.write_all(&payload)).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => return Err(e.into()),
            Err(_) => return Err(Error::internal("write deadline exceeded")),
        }
    }
    Ok(())
}

async fn dispatch(line: String, config: Arc<Config>) -> Value {
    match tokio::task::spawn_blocking(move || handle_request(&line, &config)).await {
        Ok(Ok(v)) => v,
        Ok(Err(e)) => error_response(e.to_string()),
        Err(_) => error_response("request handler panicked"),
    }
}

fn handle_request(line: &str, config: &Config) -> Result<Value> {
    let req: Request = serde_json::from_str(line).map_err(|e| Error::invalid_input(e.to_string()))?;
    match req.action.as_str() {
        "ping" => Ok(json!({ "error": null, "pong": true })),
        "status" => handle_status(req, config),
        "count" | "select" | "query" | "groupby" => handle_query_action(req, config),
        other => Ok(error_response(format!("unknown action: {other}"))),
    }
}

fn open_engine(req: &Request, config: &Config) -> Result<QueryEngine> {
    let csv = req
        .csv
        .as_ref()
        .ok_or_else(|| Error::invalid_input("csv is required"))?;
    let index_dir = req
        .index_dir
        .clone()
        .unwrap_or_else(|| default_index_dir(csv));
    QueryEngine::open(csv, index_dir, config.clone())
}

fn default_index_dir(csv: &str) -> String {
    Path::new(csv)
        .parent()
        .map(|p| p.to_string_lossy().into_owned())
        .filter(|p| !p.is_empty())
        .unwrap_or_else(|| ".".to_string())
}

fn handle_status(req: Request, config: &Config) -> Result<Value> {
    let engine = open_engine(&req, config)?;
    Ok(json!({
        "error": null,
        "rows": engine.row_count(),
        "columns": engine.header().names(),
        "socketPath": config.socket_path("csvquery.sock"),
    }))
}

fn handle_query_action(req: Request, config: &Config) -> Result<Value> {
    let engine = open_engine(&req, config)?;

    let where_clause = match &req.where_clause {
        Some(v) if !v.is_null() => parse_where(v)?,
        _ => None,
    };
    let group_by = req.group_by.clone();
    if req.action == "groupby" && group_by.is_none() {
        return Err(Error::invalid_input("groupby action requires groupBy"));
    }

    let query_req = QueryRequest {
        where_clause,
        limit: req.limit,
        offset: req.offset.unwrap_or(0),
        count_only: req.action == "count",
        group_by,
        agg_col: req.agg_col.clone(),
        agg_func: req
            .agg_func
            .as_deref()
            .map(AggFunc::parse)
            .unwrap_or(AggFunc::None),
    };

    if req.explain {
        let explain = engine.explain(&query_req);
        return Ok(json!({ "error": null, "explain": explain }));
    }

    match engine.run(&query_req)? {
        QueryOutcome::Count(n) => Ok(json!({ "error": null, "count": n })),
        QueryOutcome::Rows(rows) => {
            let rows: Vec<Value> = rows
                .into_iter()
                .map(|(offset, line)| json!({ "offset": offset, "line": line }))
                .collect();
            Ok(json!({ "error": null, "rows": rows }))
        }
        QueryOutcome::Groups(groups) => Ok(json!({ "error": null, "groups": groups })),
    }
}
