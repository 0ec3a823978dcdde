//! Newline-delimited JSON transport
//!
//! Each line in is `{"id", "method", "path", "body"}`; each line out is the
//! response envelope with the same `id`. Requests on one connection run
//! concurrently up to the configured in-flight limit and may complete out of
//! order.

use std::net::SocketAddr;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{Semaphore, mpsc};
use tracing::{Instrument, debug, info, info_span, warn};
use uuid::Uuid;

use super::{ApiResponse, RouteAccess, dispatch};
use crate::config::ServerConfig;
use crate::engine::GitEngine;
use crate::error::Result;

/// One request line
#[derive(Debug, Clone, Deserialize)]
pub struct WireRequest {
    #[serde(default)]
    pub id: Value,
    pub method: String,
    pub path: String,
    #[serde(default)]
    pub body: Value,
}

/// One response line
#[derive(Debug, Clone, Serialize)]
pub struct WireResponse {
    pub id: Value,
    #[serde(flatten)]
    pub response: ApiResponse,
}

/// TCP listener serving the route table
pub struct Server {
    listener: TcpListener,
    engine: Arc<GitEngine>,
    max_in_flight: usize,
    access: RouteAccess,
}

impl Server {
    /// Bind the listening socket
    pub async fn bind(config: &ServerConfig, engine: Arc<GitEngine>) -> Result<Self> {
        let listener = TcpListener::bind(&config.bind).await?;
        Ok(Self {
            listener,
            engine,
            max_in_flight: config.max_in_flight.max(1),
            access: RouteAccess::from_flag(config.allow_token_rotation),
        })
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    /// Accept connections until the task is dropped
    pub async fn serve(self) -> Result<()> {
        info!("Listening on {}", self.local_addr()?);
        loop {
            let (socket, peer) = self.listener.accept().await?;
            let span = info_span!("connection", id = %Uuid::new_v4(), %peer);
            tokio::spawn(
                handle_connection(
                    socket,
                    Arc::clone(&self.engine),
                    self.access,
                    self.max_in_flight,
                )
                .instrument(span),
            );
        }
    }
}

/// Decode one line and run it, `None` for lines that are not requests
pub async fn handle_line(
    engine: &GitEngine,
    access: RouteAccess,
    line: &str,
) -> Option<WireResponse> {
    let line = line.trim();
    if line.is_empty() {
        return None;
    }

    let request: WireRequest = match serde_json::from_str(line) {
        Ok(request) => request,
        Err(e) => {
            return Some(WireResponse {
                id: Value::Null,
                response: ApiResponse::failure(format!("Malformed request: {}", e), "validation"),
            });
        }
    };

    debug!("{} {}", request.method, request.path);
    let response = dispatch(
        engine,
        access,
        &request.method,
        &request.path,
        request.body,
    )
    .await;
    Some(WireResponse {
        id: request.id,
        response,
    })
}

async fn handle_connection(
    socket: TcpStream,
    engine: Arc<GitEngine>,
    access: RouteAccess,
    max_in_flight: usize,
) {
    debug!("Client connected");
    let (reader, mut writer) = socket.into_split();
    let mut lines = BufReader::new(reader).lines();

    let (out_tx, mut out_rx) = mpsc::unbounded_channel::<String>();
    let write_task = tokio::spawn(async move {
        while let Some(message) = out_rx.recv().await {
            if writer.write_all(message.as_bytes()).await.is_err() {
                break;
            }
            if writer.write_all(b"\n").await.is_err() {
                break;
            }
        }
    });

    let limiter = Arc::new(Semaphore::new(max_in_flight));

    loop {
        let line = match lines.next_line().await {
            Ok(Some(line)) => line,
            Ok(None) => break,
            Err(e) => {
                warn!("Read failed: {}", e);
                break;
            }
        };

        let Ok(permit) = Arc::clone(&limiter).acquire_owned().await else {
            break;
        };
        let engine = Arc::clone(&engine);
        let out_tx = out_tx.clone();
        tokio::spawn(
            async move {
                let _permit = permit;
                let Some(response) = handle_line(&engine, access, &line).await else {
                    return;
                };
                match serde_json::to_string(&response) {
                    Ok(encoded) => {
                        let _ = out_tx.send(encoded);
                    }
                    Err(e) => warn!("Failed to encode response: {}", e),
                }
            }
            .in_current_span(),
        );
    }

    // Let in-flight requests finish before closing the writer
    let _ = limiter.acquire_many(max_in_flight as u32).await;
    drop(out_tx);
    let _ = write_task.await;
    debug!("Client disconnected");
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use secrecy::SecretBox;
    use serde_json::json;
    use tempfile::TempDir;
    use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};

    use crate::config::{HistoryConfig, RepoSettings};

    fn engine(dir: &TempDir) -> Arc<GitEngine> {
        let settings = RepoSettings {
            path: dir.path().join("mirror"),
            remote_url: "https://example.com/me/notes.git".to_string(),
            remote_name: "origin".to_string(),
            token: SecretBox::new(Box::new("tok".to_string())),
            command_timeout: Duration::from_secs(5),
            network_timeout: Duration::from_secs(5),
        };
        Arc::new(GitEngine::new(settings, HistoryConfig::default()))
    }

    #[tokio::test]
    async fn test_handle_line_errors() {
        let dir = TempDir::new().unwrap();
        let engine = engine(&dir);

        assert!(handle_line(&engine, RouteAccess::Public, "   ").await.is_none());

        let malformed = handle_line(&engine, RouteAccess::Public, "{not json")
            .await
            .unwrap();
        assert_eq!(malformed.id, Value::Null);
        assert!(!malformed.response.success);

        let line = r#"{"id":1,"method":"GET","path":"/nope"}"#;
        let unknown = handle_line(&engine, RouteAccess::Public, line).await.unwrap();
        assert_eq!(unknown.id, json!(1));
        assert_eq!(unknown.response.error_kind.as_deref(), Some("not_found"));
    }

    #[tokio::test]
    async fn test_validation_failure_envelope() {
        let dir = TempDir::new().unwrap();
        let engine = engine(&dir);

        let line = json!({
            "id": "c1",
            "method": "POST",
            "path": "/git/commit",
            "body": { "message": "ab" }
        })
        .to_string();
        let response = handle_line(&engine, RouteAccess::Public, &line).await.unwrap();

        assert_eq!(response.id, json!("c1"));
        assert!(!response.response.success);
        assert_eq!(response.response.error_kind.as_deref(), Some("validation"));
        // rejected before the mirror was created
        assert!(!dir.path().join("mirror").exists());
    }

    #[tokio::test]
    async fn test_serves_over_tcp() {
        let dir = TempDir::new().unwrap();
        let config = ServerConfig {
            bind: "127.0.0.1:0".to_string(),
            max_in_flight: 2,
            allow_token_rotation: false,
        };
        let server = Server::bind(&config, engine(&dir)).await.unwrap();
        let addr = server.local_addr().unwrap();
        let handle = tokio::spawn(server.serve());

        let stream = TcpStream::connect(addr).await.unwrap();
        let (reader, mut writer) = stream.into_split();
        writer
            .write_all(b"{\"id\":7,\"method\":\"POST\",\"path\":\"/git/branches\",\"body\":{\"name\":\"a..b\"}}\n")
            .await
            .unwrap();

        let mut lines = BufReader::new(reader).lines();
        let line = lines.next_line().await.unwrap().unwrap();
        let value: Value = serde_json::from_str(&line).unwrap();

        assert_eq!(value["id"], json!(7));
        assert_eq!(value["success"], json!(false));
        assert_eq!(value["error_kind"], json!("validation"));
        assert!(value.get("data").is_none());

        handle.abort();
    }
}
