//! Downstream stdio Surface
//!
//! Serves MCP over stdin/stdout: one JSON-RPC frame per line in, one
//! per line out. Requests dispatch concurrently; responses interleave
//! in completion order behind a shared writer lock.

use super::proxy::ProxyServer;
use crate::protocol::{
    JsonRpcRequest, JsonRpcResponse, ERROR_INTERNAL, ERROR_INVALID_PARAMS, ERROR_METHOD_NOT_FOUND,
    ERROR_PARSE,
};
use crate::Result;
use serde_json::Value;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, Stdout};
use tokio::sync::{broadcast, Mutex};
use tracing::{debug, error, info};

/// Run the downstream loop until EOF or shutdown.
pub async fn serve(proxy: Arc<ProxyServer>, mut shutdown: broadcast::Receiver<()>) -> Result<()> {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let stdout = Arc::new(Mutex::new(tokio::io::stdout()));

    info!("Serving MCP on stdio");

    loop {
        tokio::select! {
            _ = shutdown.recv() => {
                info!("stdio surface received shutdown signal");
                break;
            }
            line = lines.next_line() => {
                match line {
                    Ok(Some(line)) => {
                        if line.trim().is_empty() {
                            continue;
                        }
                        handle_frame(&proxy, &stdout, line).await;
                    }
                    Ok(None) => {
                        info!("Downstream closed stdin");
                        break;
                    }
                    Err(e) => {
                        error!("Failed to read from stdin: {}", e);
                        break;
                    }
                }
            }
        }
    }

    Ok(())
}

async fn handle_frame(proxy: &Arc<ProxyServer>, stdout: &Arc<Mutex<Stdout>>, line: String) {
    let frame: Value = match serde_json::from_str(&line) {
        Ok(frame) => frame,
        Err(e) => {
            debug!("Unparseable downstream frame: {}", e);
            let response =
                JsonRpcResponse::failure(None, ERROR_PARSE, format!("Parse error: {}", e));
            write_response(stdout, &response).await;
            return;
        }
    };

    // Notifications carry no id and get no response
    if frame.get("id").is_none() {
        if let Some(method) = frame.get("method").and_then(Value::as_str) {
            debug!("Downstream notification '{}'", method);
        }
        return;
    }

    let request: JsonRpcRequest = match serde_json::from_value(frame) {
        Ok(request) => request,
        Err(e) => {
            let response = JsonRpcResponse::failure(
                None,
                ERROR_PARSE,
                format!("Malformed request frame: {}", e),
            );
            write_response(stdout, &response).await;
            return;
        }
    };

    // Dispatch concurrently; slow tool calls must not block listings
    let proxy = Arc::clone(proxy);
    let stdout = Arc::clone(stdout);
    tokio::spawn(async move {
        let id = request.id;
        let params = request.params.unwrap_or(Value::Null);

        let response = match proxy.handle_request(&request.method, params).await {
            Ok(result) => JsonRpcResponse::success(id, result),
            Err(error) => {
                let message = format!("{}", error);
                let code = error_code(&message);
                JsonRpcResponse::failure(Some(id), code, message)
            }
        };

        write_response(&stdout, &response).await;
    });
}

/// Map a handler error onto a JSON-RPC error code; the message text is
/// always preserved verbatim.
fn error_code(message: &str) -> i64 {
    if message.starts_with("Method not found") {
        ERROR_METHOD_NOT_FOUND
    } else if message.starts_with("Invalid parameters") {
        ERROR_INVALID_PARAMS
    } else {
        ERROR_INTERNAL
    }
}

async fn write_response(stdout: &Arc<Mutex<Stdout>>, response: &JsonRpcResponse) {
    let frame = match serde_json::to_string(response) {
        Ok(frame) => frame,
        Err(e) => {
            error!("Failed to serialize response: {}", e);
            return;
        }
    };

    let mut stdout = stdout.lock().await;
    if let Err(e) = stdout.write_all(frame.as_bytes()).await {
        error!("Failed to write response: {}", e);
        return;
    }
    if let Err(e) = stdout.write_all(b"\n").await {
        error!("Failed to write response terminator: {}", e);
        return;
    }
    if let Err(e) = stdout.flush().await {
        error!("Failed to flush stdout: {}", e);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_code_mapping() {
        assert_eq!(error_code("Method not found: nope"), ERROR_METHOD_NOT_FOUND);
        assert_eq!(
            error_code("Invalid parameters: missing tool name"),
            ERROR_INVALID_PARAMS
        );
        assert_eq!(error_code("Tool weather not found"), ERROR_INTERNAL);
        assert_eq!(error_code("timeout after 60000ms"), ERROR_INTERNAL);
    }
}
