//! Upstream Transports
//!
//! Two ways to reach an upstream MCP server: a spawned child process
//! speaking newline-delimited JSON-RPC on stdio, and an HTTP server-sent
//! events stream with a POST back-channel. Both route responses back to
//! the issuing request through per-id oneshot channels.

use crate::protocol::{JsonRpcNotification, JsonRpcRequest, JsonRpcResponse};
use crate::upstream::ConnectionState;
use crate::Result;
use anyhow::{anyhow, bail, Context};
use async_trait::async_trait;
use futures_util::StreamExt;
use serde_json::Value;
use std::collections::HashMap;
use std::process::Stdio;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStdin, Command};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::debug;

/// How long to wait for the SSE `endpoint` event before giving up
const SSE_ENDPOINT_TIMEOUT: Duration = Duration::from_secs(10);

/// RPC channel to one upstream MCP server
#[async_trait]
pub trait McpTransport: Send + Sync {
    /// Issue a request and await its response. Upstream error messages
    /// are surfaced verbatim; classification happens in the caller.
    async fn request(&self, method: &str, params: Value) -> Result<Value>;

    /// Send a fire-and-forget notification
    async fn notify(&self, method: &str, params: Value) -> Result<()>;

    /// Whether the underlying channel has been observed closed
    fn is_closed(&self) -> bool;

    /// Tear the channel down and release its resources
    async fn close(&self);
}

type PendingMap = Arc<Mutex<HashMap<u64, oneshot::Sender<JsonRpcResponse>>>>;

fn register_pending(pending: &PendingMap, id: u64) -> oneshot::Receiver<JsonRpcResponse> {
    let (tx, rx) = oneshot::channel();
    pending.lock().expect("pending lock poisoned").insert(id, tx);
    rx
}

fn dispatch_response(pending: &PendingMap, response: JsonRpcResponse) {
    let Some(id) = response.id else {
        debug!("Ignoring upstream frame without id");
        return;
    };

    let sender = pending.lock().expect("pending lock poisoned").remove(&id);
    match sender {
        Some(tx) => {
            let _ = tx.send(response);
        }
        None => debug!("Ignoring response for unknown or timed-out request id {}", id),
    }
}

fn fail_all_pending(pending: &PendingMap) {
    pending.lock().expect("pending lock poisoned").clear();
}

/// Unwrap a JSON-RPC response into the result value, surfacing the
/// upstream error message verbatim.
fn unwrap_response(response: JsonRpcResponse) -> Result<Value> {
    if let Some(error) = response.error {
        bail!("{}", error.message);
    }
    Ok(response.result.unwrap_or(Value::Null))
}

// ---------------------------------------------------------------------
// stdio transport
// ---------------------------------------------------------------------

/// Child process transport: JSON-RPC frames are single lines on the
/// child's stdin/stdout.
pub struct StdioTransport {
    stdin: tokio::sync::Mutex<ChildStdin>,
    child: tokio::sync::Mutex<Child>,
    pending: PendingMap,
    next_id: AtomicU64,
    closed: Arc<AtomicBool>,
    reader: JoinHandle<()>,
}

impl StdioTransport {
    /// Spawn the configured command. Only the allow-listed environment
    /// variable names are inherited; variables unset in the proxy's own
    /// environment are passed as empty strings.
    pub async fn spawn(
        command: &str,
        args: &[String],
        env_allowlist: &[String],
        state: Arc<ConnectionState>,
    ) -> Result<Self> {
        let mut cmd = Command::new(command);
        cmd.args(args)
            .env_clear()
            .envs(inherited_env(env_allowlist))
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .kill_on_drop(true);

        let mut child = cmd
            .spawn()
            .with_context(|| format!("Failed to spawn upstream command '{}'", command))?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| anyhow!("Child process has no stdin"))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| anyhow!("Child process has no stdout"))?;

        let pending: PendingMap = Arc::new(Mutex::new(HashMap::new()));
        let closed = Arc::new(AtomicBool::new(false));

        let reader = {
            let pending = Arc::clone(&pending);
            let closed = Arc::clone(&closed);
            tokio::spawn(async move {
                let mut lines = BufReader::new(stdout).lines();
                loop {
                    match lines.next_line().await {
                        Ok(Some(line)) => {
                            if line.trim().is_empty() {
                                continue;
                            }
                            match serde_json::from_str::<JsonRpcResponse>(&line) {
                                Ok(response) => dispatch_response(&pending, response),
                                Err(e) => debug!("Ignoring unparseable upstream frame: {}", e),
                            }
                        }
                        Ok(None) => {
                            closed.store(true, Ordering::Release);
                            state.mark_disconnected("Connection closed: upstream process exited");
                            fail_all_pending(&pending);
                            break;
                        }
                        Err(e) => {
                            closed.store(true, Ordering::Release);
                            state.mark_disconnected(format!("Connection error reading stdout: {}", e));
                            fail_all_pending(&pending);
                            break;
                        }
                    }
                }
            })
        };

        Ok(Self {
            stdin: tokio::sync::Mutex::new(stdin),
            child: tokio::sync::Mutex::new(child),
            pending,
            next_id: AtomicU64::new(1),
            closed,
            reader,
        })
    }

    async fn write_frame(&self, frame: String) -> Result<()> {
        let mut stdin = self.stdin.lock().await;
        stdin
            .write_all(frame.as_bytes())
            .await
            .map_err(|e| anyhow!("Connection error writing to upstream: {}", e))?;
        stdin
            .write_all(b"\n")
            .await
            .map_err(|e| anyhow!("Connection error writing to upstream: {}", e))?;
        stdin
            .flush()
            .await
            .map_err(|e| anyhow!("Connection error flushing upstream: {}", e))?;
        Ok(())
    }
}

#[async_trait]
impl McpTransport for StdioTransport {
    async fn request(&self, method: &str, params: Value) -> Result<Value> {
        if self.is_closed() {
            bail!("Connection closed: upstream process exited");
        }

        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let rx = register_pending(&self.pending, id);

        let frame = serde_json::to_string(&JsonRpcRequest::new(id, method, Some(params)))?;
        if let Err(e) = self.write_frame(frame).await {
            self.pending.lock().expect("pending lock poisoned").remove(&id);
            return Err(e);
        }

        let response = rx
            .await
            .map_err(|_| anyhow!("Connection closed before response to '{}'", method))?;
        unwrap_response(response)
    }

    async fn notify(&self, method: &str, params: Value) -> Result<()> {
        let frame = serde_json::to_string(&JsonRpcNotification::new(method, Some(params)))?;
        self.write_frame(frame).await
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    async fn close(&self) {
        self.closed.store(true, Ordering::Release);
        self.reader.abort();
        fail_all_pending(&self.pending);
        if let Err(e) = self.child.lock().await.kill().await {
            debug!("Failed to kill upstream process: {}", e);
        }
    }
}

/// Resolve the allow-listed environment for a child process
fn inherited_env(allowlist: &[String]) -> Vec<(String, String)> {
    allowlist
        .iter()
        .map(|name| (name.clone(), std::env::var(name).unwrap_or_default()))
        .collect()
}

// ---------------------------------------------------------------------
// SSE transport
// ---------------------------------------------------------------------

/// Server-sent events transport. The stream's first `endpoint` event
/// names the POST back-channel; responses to posted requests arrive as
/// `message` events on the stream.
pub struct SseTransport {
    http: reqwest::Client,
    post_url: url::Url,
    pending: PendingMap,
    next_id: AtomicU64,
    closed: Arc<AtomicBool>,
    reader: JoinHandle<()>,
}

impl SseTransport {
    pub async fn connect(sse_url: &str, state: Arc<ConnectionState>) -> Result<Self> {
        let base = url::Url::parse(sse_url)
            .with_context(|| format!("Invalid SSE url '{}'", sse_url))?;

        let http = reqwest::Client::new();
        let response = http
            .get(base.clone())
            .header(reqwest::header::ACCEPT, "text/event-stream")
            .send()
            .await
            .map_err(|e| anyhow!("Connection error opening SSE stream: {}", e))?
            .error_for_status()
            .map_err(|e| anyhow!("Connection rejected by SSE endpoint: {}", e))?;

        let pending: PendingMap = Arc::new(Mutex::new(HashMap::new()));
        let closed = Arc::new(AtomicBool::new(false));
        let (endpoint_tx, endpoint_rx) = oneshot::channel::<String>();

        let reader = {
            let pending = Arc::clone(&pending);
            let closed = Arc::clone(&closed);
            let mut endpoint_tx = Some(endpoint_tx);
            tokio::spawn(async move {
                let mut stream = response.bytes_stream();
                let mut buffer = String::new();

                loop {
                    match stream.next().await {
                        Some(Ok(chunk)) => {
                            buffer.push_str(&String::from_utf8_lossy(&chunk).replace("\r\n", "\n"));
                            while let Some(split) = buffer.find("\n\n") {
                                let block = buffer[..split].to_string();
                                buffer.drain(..split + 2);
                                let (event, data) = parse_sse_event(&block);
                                match event.as_str() {
                                    "endpoint" => {
                                        if let Some(tx) = endpoint_tx.take() {
                                            let _ = tx.send(data);
                                        }
                                    }
                                    "message" => {
                                        match serde_json::from_str::<JsonRpcResponse>(&data) {
                                            Ok(response) => dispatch_response(&pending, response),
                                            Err(e) => {
                                                debug!("Ignoring unparseable SSE message: {}", e)
                                            }
                                        }
                                    }
                                    other => debug!("Ignoring SSE event '{}'", other),
                                }
                            }
                        }
                        Some(Err(e)) => {
                            closed.store(true, Ordering::Release);
                            state.mark_disconnected(format!("Connection error on SSE stream: {}", e));
                            fail_all_pending(&pending);
                            break;
                        }
                        None => {
                            closed.store(true, Ordering::Release);
                            state.mark_disconnected("Connection closed: SSE stream ended");
                            fail_all_pending(&pending);
                            break;
                        }
                    }
                }
            })
        };

        let endpoint = tokio::time::timeout(SSE_ENDPOINT_TIMEOUT, endpoint_rx)
            .await
            .map_err(|_| anyhow!("timeout waiting for SSE endpoint event from '{}'", sse_url))?
            .map_err(|_| anyhow!("Connection closed before SSE endpoint event"))?;

        let post_url = base
            .join(endpoint.trim())
            .with_context(|| format!("Invalid SSE endpoint '{}'", endpoint))?;

        Ok(Self {
            http,
            post_url,
            pending,
            next_id: AtomicU64::new(1),
            closed,
            reader,
        })
    }
}

#[async_trait]
impl McpTransport for SseTransport {
    async fn request(&self, method: &str, params: Value) -> Result<Value> {
        if self.is_closed() {
            bail!("Connection closed: SSE stream ended");
        }

        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let rx = register_pending(&self.pending, id);

        let request = JsonRpcRequest::new(id, method, Some(params));
        let post = self
            .http
            .post(self.post_url.clone())
            .json(&request)
            .send()
            .await
            .map_err(|e| anyhow!("Connection error posting to upstream: {}", e));

        match post.and_then(|r| {
            r.error_for_status()
                .map_err(|e| anyhow!("Connection rejected by upstream: {}", e))
        }) {
            Ok(_) => {}
            Err(e) => {
                self.pending.lock().expect("pending lock poisoned").remove(&id);
                return Err(e);
            }
        }

        let response = rx
            .await
            .map_err(|_| anyhow!("Connection closed before response to '{}'", method))?;
        unwrap_response(response)
    }

    async fn notify(&self, method: &str, params: Value) -> Result<()> {
        let notification = JsonRpcNotification::new(method, Some(params));
        self.http
            .post(self.post_url.clone())
            .json(&notification)
            .send()
            .await
            .map_err(|e| anyhow!("Connection error posting to upstream: {}", e))?
            .error_for_status()
            .map_err(|e| anyhow!("Connection rejected by upstream: {}", e))?;
        Ok(())
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    async fn close(&self) {
        self.closed.store(true, Ordering::Release);
        self.reader.abort();
        fail_all_pending(&self.pending);
    }
}

/// Split one SSE event block into its event name (default "message")
/// and concatenated data lines.
fn parse_sse_event(block: &str) -> (String, String) {
    let mut event = "message".to_string();
    let mut data_lines = Vec::new();

    for line in block.lines() {
        if let Some(rest) = line.strip_prefix("event:") {
            event = rest.trim().to_string();
        } else if let Some(rest) = line.strip_prefix("data:") {
            data_lines.push(rest.trim_start().to_string());
        }
    }

    (event, data_lines.join("\n"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_sse_endpoint_event() {
        let (event, data) = parse_sse_event("event: endpoint\ndata: /messages?sessionId=abc");
        assert_eq!(event, "endpoint");
        assert_eq!(data, "/messages?sessionId=abc");
    }

    #[test]
    fn test_parse_sse_default_event_and_multiline_data() {
        let (event, data) = parse_sse_event("data: {\"a\":\ndata: 1}");
        assert_eq!(event, "message");
        assert_eq!(data, "{\"a\":\n1}");
    }

    #[test]
    fn test_unwrap_response_surfaces_error_verbatim() {
        let response = JsonRpcResponse::failure(Some(1), -32603, "Tool frob not found".into());
        let err = unwrap_response(response).unwrap_err();
        assert_eq!(err.to_string(), "Tool frob not found");
    }

    #[test]
    fn test_inherited_env_maps_unknown_to_empty() {
        let env = inherited_env(&["MCPROXY_TEST_SURELY_UNSET_VAR".to_string()]);
        assert_eq!(env.len(), 1);
        assert_eq!(env[0].1, "");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_stdio_transport_round_trip() {
        // `cat` echoes the request frame back; a frame with neither
        // result nor error unwraps to null. The child env is cleared,
        // so the command must be an absolute path.
        let state = Arc::new(ConnectionState::new("echo"));
        let transport = StdioTransport::spawn("/bin/cat", &[], &[], Arc::clone(&state))
            .await
            .unwrap();

        let result = transport
            .request("ping", serde_json::json!({}))
            .await
            .unwrap();
        assert_eq!(result, Value::Null);

        transport.close().await;
        assert!(transport.is_closed());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_stdio_transport_detects_exit() {
        let state = Arc::new(ConnectionState::new("true"));
        state.mark_connected();
        let transport = StdioTransport::spawn("/bin/true", &[], &[], Arc::clone(&state))
            .await
            .unwrap();

        // The process exits immediately; the reader observes EOF.
        tokio::time::sleep(Duration::from_millis(200)).await;
        assert!(transport.is_closed());
        assert!(!state.is_connected());
        assert!(state.last_error().unwrap().contains("Connection closed"));
        transport.close().await;
    }
}
