//! Shared health state for the /health endpoint.
//! Updated by ResultWriter, read by the API.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::RwLock;

use chrono::Utc;

#[derive(Default)]
pub struct HealthState {
    /// Runs persisted since startup.
    pub runs_persisted: AtomicU64,
    /// Failed persist attempts since startup.
    pub write_errors: AtomicU64,
    /// Millisecond timestamp of the last successful persist (0 = none).
    pub last_persisted_at_ms: AtomicU64,
    last_run_id: RwLock<Option<String>>,
}

impl HealthState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_persisted(&self, run_id: &str) {
        self.runs_persisted.fetch_add(1, Ordering::Relaxed);
        let now_ms = u64::try_from(Utc::now().timestamp_millis()).unwrap_or_default();
        self.last_persisted_at_ms.store(now_ms, Ordering::Relaxed);
        if let Ok(mut last) = self.last_run_id.write() {
            *last = Some(run_id.to_string());
        }
    }

    pub fn record_write_error(&self) {
        self.write_errors.fetch_add(1, Ordering::Relaxed);
    }

    pub fn runs_persisted(&self) -> u64 {
        self.runs_persisted.load(Ordering::Relaxed)
    }

    pub fn write_errors(&self) -> u64 {
        self.write_errors.load(Ordering::Relaxed)
    }

    pub fn last_persisted_at_ms(&self) -> u64 {
        self.last_persisted_at_ms.load(Ordering::Relaxed)
    }

    pub fn last_run_id(&self) -> Option<String> {
        self.last_run_id.read().ok().and_then(|g| g.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tracks_persists_and_errors() {
        let h = HealthState::new();
        assert_eq!(h.runs_persisted(), 0);
        assert!(h.last_run_id().is_none());

        h.record_persisted("run-1");
        h.record_write_error();
        assert_eq!(h.runs_persisted(), 1);
        assert_eq!(h.write_errors(), 1);
        assert_eq!(h.last_run_id().as_deref(), Some("run-1"));
        assert!(h.last_persisted_at_ms() > 0);
    }
}
