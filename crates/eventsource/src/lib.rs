//! SSE listener: a long-lived subscription to the mail provider's
//! event-source URL that forwards opaque "something changed" tokens to
//! the main loop. Grounded on `eventsource.py`'s `sse_listener` (same
//! reconnect/backoff/read-timeout shape) translated into a `tokio` task
//! that watches a `CancellationToken` instead of a `threading.Event`.

use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use health::HealthState;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

/// Twice the server's 30s ping interval, plus slack -- absence of pings
/// for this long means the connection is stalled, not merely quiet.
const READ_TIMEOUT: Duration = Duration::from_secs(90);
const CONNECT_TIMEOUT: Duration = Duration::from_secs(30);
const MAX_BACKOFF_SECS: u64 = 60;

/// Run the SSE listener until `shutdown` is cancelled. Pushes a unit
/// token to `tx` for every `event: state` line observed; never touches
/// mail or contact state directly.
#[instrument(skip(token, tx, shutdown, health))]
pub async fn run(
    token: &str,
    event_source_url: &str,
    tx: mpsc::UnboundedSender<()>,
    shutdown: CancellationToken,
    health: Arc<HealthState>,
) {
    let url = format!("{event_source_url}?types=Email,Mailbox&closeafter=no&ping=30");
    let client = match reqwest::Client::builder().connect_timeout(CONNECT_TIMEOUT).build() {
        Ok(c) => c,
        Err(e) => {
            warn!(error = %e, "failed to build eventsource http client");
            return;
        }
    };

    let mut attempt: u32 = 0;
    let mut server_retry_ms: Option<u64> = None;

    while !shutdown.is_cancelled() {
        match stream_once(
            &client,
            &url,
            token,
            &tx,
            &shutdown,
            &health,
            &mut server_retry_ms,
            &mut attempt,
        )
        .await
        {
            Ok(()) => {
                // clean return only happens on shutdown
                return;
            }
            Err(e) => {
                if shutdown.is_cancelled() {
                    return;
                }
                attempt += 1;
                health.mark_sse_disconnected(&e);
                let delay_secs = server_retry_ms
                    .map(|ms| ms as f64 / 1000.0)
                    .unwrap_or_else(|| 2f64.powi(attempt as i32).min(MAX_BACKOFF_SECS as f64));
                let delay = Duration::from_secs_f64(delay_secs.max(0.0));

                if attempt <= 1 {
                    debug!(retry_in = ?delay, attempt, error = %e, "eventsource disconnected");
                } else {
                    warn!(retry_in = ?delay, attempt, error = %e, "eventsource disconnected");
                }

                tokio::select! {
                    _ = tokio::time::sleep(delay) => {}
                    _ = shutdown.cancelled() => return,
                }
            }
        }
    }
    info!("eventsource stopped");
}

/// Connect once and stream lines until disconnect, shutdown, or a
/// protocol/transport error. Returns `Ok(())` only on a clean shutdown.
async fn stream_once(
    client: &reqwest::Client,
    url: &str,
    token: &str,
    tx: &mpsc::UnboundedSender<()>,
    shutdown: &CancellationToken,
    health: &Arc<HealthState>,
    server_retry_ms: &mut Option<u64>,
    attempt: &mut u32,
) -> Result<(), String> {
    let resp = client
        .get(url)
        .bearer_auth(token)
        .header(reqwest::header::ACCEPT, "text/event-stream")
        .send()
        .await
        .map_err(|e| e.to_string())?;
    let resp = resp.error_for_status().map_err(|e| e.to_string())?;

    health.mark_sse_connected();
    *server_retry_ms = None;
    *attempt = 0;
    info!("eventsource connected");

    let mut stream = resp.bytes_stream();
    let mut buffer = Vec::new();

    loop {
        if shutdown.is_cancelled() {
            return Ok(());
        }

        let next = tokio::select! {
            chunk = tokio::time::timeout(READ_TIMEOUT, stream.next()) => chunk,
            _ = shutdown.cancelled() => return Ok(()),
        };

        let chunk = match next {
            Ok(Some(Ok(bytes))) => bytes,
            Ok(Some(Err(e))) => return Err(e.to_string()),
            Ok(None) => return Err("eventsource stream ended".to_string()),
            Err(_) => return Err("eventsource read timed out".to_string()),
        };

        buffer.extend_from_slice(&chunk);
        while let Some(pos) = buffer.iter().position(|&b| b == b'\n') {
            let line_bytes: Vec<u8> = buffer.drain(..=pos).collect();
            let line = String::from_utf8_lossy(&line_bytes);
            let line = line.trim_end_matches(['\r', '\n']);
            handle_line(line, tx, health, server_retry_ms);
        }
    }
}

fn handle_line(
    line: &str,
    tx: &mpsc::UnboundedSender<()>,
    health: &Arc<HealthState>,
    server_retry_ms: &mut Option<u64>,
) {
    if line.starts_with(':') || line.is_empty() {
        return; // keepalive comment or blank event separator
    }
    if line.starts_with("event: state") || line.starts_with("event:state") {
        let _ = tx.send(());
        health.mark_sse_event();
    } else if let Some(value) = line.strip_prefix("retry:") {
        if let Ok(ms) = value.trim().parse::<u64>() {
            *server_retry_ms = Some(ms);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn state_event_line_triggers_token() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let health = Arc::new(HealthState::new());
        let mut retry = None;
        handle_line("event: state", &tx, &health, &mut retry);
        assert!(rx.try_recv().is_ok());
    }

    #[test]
    fn comment_line_is_not_forwarded() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let health = Arc::new(HealthState::new());
        let mut retry = None;
        handle_line(": keepalive", &tx, &health, &mut retry);
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn retry_line_updates_override() {
        let (tx, _rx) = mpsc::unbounded_channel();
        let health = Arc::new(HealthState::new());
        let mut retry = None;
        handle_line("retry: 2500", &tx, &health, &mut retry);
        assert_eq!(retry, Some(2500));
    }

    #[test]
    fn malformed_retry_line_is_ignored() {
        let (tx, _rx) = mpsc::unbounded_channel();
        let health = Arc::new(HealthState::new());
        let mut retry = None;
        handle_line("retry: not-a-number", &tx, &health, &mut retry);
        assert_eq!(retry, None);
    }
}
