//! Debounced dispatcher (C4): owned by the supervisor's main loop.
//! Mirrors the teacher's channel+timeout polling idiom
//! (`workflows::resource_management::mailbox::MailboxMessageReceiver`)
//! generalized to the push/fallback/debounce rules in the specification.

use std::time::Duration;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TriggerReason {
    Push,
    Fallback,
}

/// Block until a cycle should run, or report that shutdown has begun.
///
/// On a push token, drains any further tokens that arrive during the
/// debounce window and coalesces them into a single trigger. On pure
/// timeout (no token within `poll_interval`), triggers as a fallback.
pub async fn wait_for_trigger(
    rx: &mut mpsc::UnboundedReceiver<()>,
    shutdown: &CancellationToken,
    poll_interval: Duration,
    debounce: Duration,
) -> Option<TriggerReason> {
    tokio::select! {
        _ = shutdown.cancelled() => None,
        received = tokio::time::timeout(poll_interval, rx.recv()) => {
            match received {
                Ok(Some(())) => {
                    let collapsed = drain_during_debounce(rx, shutdown, debounce).await;
                    if collapsed > 0 {
                        debug!(collapsed, "coalesced additional eventsource tokens during debounce window");
                    }
                    Some(TriggerReason::Push)
                }
                Ok(None) => None, // sender dropped -- treat like shutdown
                Err(_) => Some(TriggerReason::Fallback),
            }
        }
    }
}

async fn drain_during_debounce(
    rx: &mut mpsc::UnboundedReceiver<()>,
    shutdown: &CancellationToken,
    debounce: Duration,
) -> usize {
    let deadline = tokio::time::Instant::now() + debounce;
    let mut collapsed = 0;
    loop {
        let remaining = deadline.saturating_duration_since(tokio::time::Instant::now());
        if remaining.is_zero() {
            return collapsed;
        }
        tokio::select! {
            _ = shutdown.cancelled() => return collapsed,
            got = tokio::time::timeout(remaining, rx.recv()) => {
                match got {
                    Ok(Some(())) => collapsed += 1,
                    _ => return collapsed,
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn fallback_fires_on_plain_timeout() {
        let (_tx, mut rx) = mpsc::unbounded_channel();
        let shutdown = CancellationToken::new();
        let trigger = wait_for_trigger(
            &mut rx,
            &shutdown,
            Duration::from_secs(1),
            Duration::from_millis(100),
        )
        .await;
        assert_eq!(trigger, Some(TriggerReason::Fallback));
    }

    #[tokio::test(start_paused = true)]
    async fn push_collapses_burst_into_one_trigger() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let shutdown = CancellationToken::new();
        tx.send(()).unwrap();
        tx.send(()).unwrap();
        tx.send(()).unwrap();
        let trigger = wait_for_trigger(
            &mut rx,
            &shutdown,
            Duration::from_secs(5),
            Duration::from_millis(50),
        )
        .await;
        assert_eq!(trigger, Some(TriggerReason::Push));
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn shutdown_short_circuits_immediately() {
        let (_tx, mut rx) = mpsc::unbounded_channel();
        let shutdown = CancellationToken::new();
        shutdown.cancel();
        let trigger = wait_for_trigger(
            &mut rx,
            &shutdown,
            Duration::from_secs(5),
            Duration::from_millis(50),
        )
        .await;
        assert_eq!(trigger, None);
    }
}
