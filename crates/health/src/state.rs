//! Process-wide health state. Each field has exactly one writer (the main
//! loop writes `last_successful_poll`; the SSE task writes everything
//! else), so plain atomics and an occasional `Mutex<Option<String>>` are
//! enough -- no field needs a reader/writer lock.

use std::sync::atomic::{AtomicI64, AtomicU64, AtomicU8, Ordering};
use std::sync::Mutex;
use std::time::{SystemTime, UNIX_EPOCH};

use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SseStatus {
    NotStarted,
    Connected,
    Disconnected,
}

impl SseStatus {
    fn from_u8(v: u8) -> Self {
        match v {
            1 => SseStatus::Connected,
            2 => SseStatus::Disconnected,
            _ => SseStatus::NotStarted,
        }
    }

    fn as_u8(self) -> u8 {
        match self {
            SseStatus::NotStarted => 0,
            SseStatus::Connected => 1,
            SseStatus::Disconnected => 2,
        }
    }
}

fn now_unix() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}

pub struct HealthState {
    last_successful_poll: AtomicI64,
    sse_status: AtomicU8,
    sse_connected_since: AtomicI64,
    sse_last_event_at: AtomicI64,
    sse_reconnect_count: AtomicU64,
    sse_last_error: Mutex<Option<String>>,
}

impl Default for HealthState {
    fn default() -> Self {
        Self {
            last_successful_poll: AtomicI64::new(0),
            sse_status: AtomicU8::new(SseStatus::NotStarted.as_u8()),
            sse_connected_since: AtomicI64::new(0),
            sse_last_event_at: AtomicI64::new(0),
            sse_reconnect_count: AtomicU64::new(0),
            sse_last_error: Mutex::new(None),
        }
    }
}

impl HealthState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Written by the main loop after every successful `Poll()`.
    pub fn mark_poll_success(&self) {
        self.last_successful_poll.store(now_unix(), Ordering::Relaxed);
    }

    /// Written by the SSE task on a successful connection.
    pub fn mark_sse_connected(&self) {
        self.sse_status.store(SseStatus::Connected.as_u8(), Ordering::Relaxed);
        self.sse_connected_since.store(now_unix(), Ordering::Relaxed);
    }

    /// Written by the SSE task on each forwarded state-change event.
    pub fn mark_sse_event(&self) {
        self.sse_last_event_at.store(now_unix(), Ordering::Relaxed);
    }

    /// Written by the SSE task on disconnection.
    pub fn mark_sse_disconnected(&self, error: &str) {
        self.sse_status
            .store(SseStatus::Disconnected.as_u8(), Ordering::Relaxed);
        self.sse_reconnect_count.fetch_add(1, Ordering::Relaxed);
        *self.sse_last_error.lock().unwrap() = Some(error.to_string());
    }

    pub fn last_successful_poll(&self) -> i64 {
        self.last_successful_poll.load(Ordering::Relaxed)
    }

    /// Seconds since the last successful poll, or `None` if no poll has
    /// ever succeeded.
    pub fn last_poll_age_seconds(&self) -> Option<i64> {
        let last = self.last_successful_poll();
        if last == 0 {
            None
        } else {
            Some((now_unix() - last).max(0))
        }
    }

    pub fn snapshot(&self, poll_interval_secs: Option<u64>) -> HealthSnapshot {
        HealthSnapshot {
            status: if self.is_healthy(poll_interval_secs) { "ok" } else { "unhealthy" },
            last_poll_age_seconds: self.last_poll_age_seconds(),
            eventsource: EventSourceSnapshot {
                status: SseStatus::from_u8(self.sse_status.load(Ordering::Relaxed)),
                connected_since: non_zero(self.sse_connected_since.load(Ordering::Relaxed)),
                last_event_at: non_zero(self.sse_last_event_at.load(Ordering::Relaxed)),
                reconnect_count: self.sse_reconnect_count.load(Ordering::Relaxed),
                last_error: self.sse_last_error.lock().unwrap().clone(),
            },
        }
    }

    /// Unhealthy once no poll has succeeded in more than twice the poll
    /// interval -- mirrors the `/healthz` 503 rule.
    pub fn is_healthy(&self, poll_interval_secs: Option<u64>) -> bool {
        match (self.last_poll_age_seconds(), poll_interval_secs) {
            (None, _) => false,
            (Some(_), None) => true,
            (Some(age), Some(interval)) => age <= (interval as i64) * 2,
        }
    }
}

fn non_zero(v: i64) -> Option<i64> {
    if v == 0 {
        None
    } else {
        Some(v)
    }
}

#[derive(Debug, Serialize)]
pub struct EventSourceSnapshot {
    pub status: SseStatus,
    pub connected_since: Option<i64>,
    pub last_event_at: Option<i64>,
    pub reconnect_count: u64,
    pub last_error: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct HealthSnapshot {
    pub status: &'static str,
    pub last_poll_age_seconds: Option<i64>,
    pub eventsource: EventSourceSnapshot,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn starts_unhealthy_with_no_poll() {
        let state = HealthState::new();
        assert!(!state.is_healthy(Some(60)));
        assert_eq!(state.last_poll_age_seconds(), None);
    }

    #[test]
    fn healthy_after_poll_success() {
        let state = HealthState::new();
        state.mark_poll_success();
        assert!(state.is_healthy(Some(60)));
        assert_eq!(state.last_poll_age_seconds(), Some(0));
    }

    #[test]
    fn sse_disconnect_increments_reconnect_count_and_records_error() {
        let state = HealthState::new();
        state.mark_sse_connected();
        state.mark_sse_disconnected("timeout");
        let snap = state.snapshot(Some(60));
        assert_eq!(snap.eventsource.status, SseStatus::Disconnected);
        assert_eq!(snap.eventsource.reconnect_count, 1);
        assert_eq!(snap.eventsource.last_error.as_deref(), Some("timeout"));
    }
}
