//! Line-delimited JSON transport over stdin/stdout.
//!
//! Each input line is one request, `{"id"?, "command", "params"?}`, and
//! produces exactly one response line. The `id`, when present, is echoed
//! back. Logs never go to stdout.

use serde::Deserialize;
use serde_json::{json, Value};
use std::future::Future;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::signal;
use tracing::{debug, info, warn};

use crate::tools::ToolDispatcher;

#[derive(Debug, Deserialize)]
struct Request {
    #[serde(default)]
    id: Option<Value>,
    command: String,
    #[serde(default)]
    params: Value,
}

/// Serve stdin/stdout until EOF, an `exit` request or a termination signal.
pub async fn run_stdio_interface(dispatcher: ToolDispatcher) -> std::io::Result<()> {
    let stdin = BufReader::new(tokio::io::stdin());
    let stdout = tokio::io::stdout();
    serve(dispatcher, stdin, stdout, shutdown_signal()).await
}

/// Serve requests from `reader`, writing responses to `writer`, until EOF,
/// an `exit` request or `shutdown` completes. The session is closed on the
/// way out.
pub async fn serve<R, W, S>(
    dispatcher: ToolDispatcher,
    reader: R,
    mut writer: W,
    shutdown: S,
) -> std::io::Result<()>
where
    R: AsyncBufRead + Unpin,
    W: AsyncWrite + Unpin,
    S: Future<Output = ()>,
{
    let mut lines = reader.lines();
    tokio::pin!(shutdown);

    loop {
        let line = tokio::select! {
            line = lines.next_line() => line?,
            _ = &mut shutdown => {
                info!("Shutdown requested");
                break;
            }
        };
        let Some(line) = line else {
            debug!("Input closed");
            break;
        };
        if line.trim().is_empty() {
            continue;
        }

        let (response, exit) = handle_line(&dispatcher, &line).await;
        let mut encoded = serde_json::to_string(&response)?;
        encoded.push('\n');
        writer.write_all(encoded.as_bytes()).await?;
        writer.flush().await?;

        if exit {
            break;
        }
    }

    if let Err(e) = dispatcher.manager().close().await {
        warn!("Error closing session on shutdown: {}", e);
    }
    Ok(())
}

/// Response for one input line, and whether the loop should stop.
async fn handle_line(dispatcher: &ToolDispatcher, line: &str) -> (Value, bool) {
    let request: Request = match serde_json::from_str(line) {
        Ok(request) => request,
        Err(e) => {
            warn!("Malformed request: {}", e);
            return (
                json!({
                    "success": false,
                    "status": "error",
                    "error_type": "DeserializationError",
                    "error": format!("Invalid request: {}", e),
                }),
                false,
            );
        }
    };

    let exit = request.command.trim().eq_ignore_ascii_case("exit");
    let mut response = if exit {
        json!({"success": true, "status": "exiting"})
    } else {
        dispatcher.dispatch(&request.command, request.params).await
    };
    if let (Some(id), Some(object)) = (request.id, response.as_object_mut()) {
        object.insert("id".to_string(), id);
    }
    (response, exit)
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            warn!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                warn!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
