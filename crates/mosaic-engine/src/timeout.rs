//! Deadline helpers for verification runs.

use std::time::{Duration, Instant};

pub(crate) fn overall_timeout_duration(timeout_secs: u64) -> Option<Duration> {
    if timeout_secs == 0 {
        None
    } else {
        Some(Duration::from_secs(timeout_secs))
    }
}

pub(crate) fn deadline_from_timeout_secs(timeout_secs: u64) -> Option<Instant> {
    overall_timeout_duration(timeout_secs).and_then(|t| Instant::now().checked_add(t))
}

pub(crate) fn deadline_exceeded(deadline: Option<Instant>) -> bool {
    match deadline {
        Some(deadline) => Instant::now() >= deadline,
        None => false,
    }
}

/// Per-worker time budget in milliseconds; `0` disables it.
pub(crate) fn worker_budget(budget_ms: u64) -> Option<Duration> {
    if budget_ms == 0 {
        None
    } else {
        Some(Duration::from_millis(budget_ms))
    }
}

pub(crate) fn timeout_unknown_reason(context: &str) -> String {
    format!("{context} timed out before completion.")
}
