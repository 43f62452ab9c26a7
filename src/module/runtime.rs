//! Shared bookkeeping for module implementations
//!
//! `ModuleRuntime` tracks a module's own view of its lifecycle and its
//! processing counters. It is lock-free on the hot path: state is an atomic,
//! counters are atomics, only the last error string sits behind a mutex.

use super::status::{ModuleState, ModuleStatus, ResourceUsage};
use crate::error::{ModuleError, ModuleResult};
use std::sync::atomic::{AtomicU64, AtomicU8, Ordering};
use std::sync::Mutex;
use std::time::Duration;

/// Lifecycle state and counters of one module instance
#[derive(Debug)]
pub struct ModuleRuntime {
    name: String,
    state: AtomicU8,
    requests: AtomicU64,
    errors: AtomicU64,
    total_latency_us: AtomicU64,
    last_error: Mutex<Option<String>>,
}

impl ModuleRuntime {
    /// New runtime in the `Loading` state
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            state: AtomicU8::new(ModuleState::Loading.as_u8()),
            requests: AtomicU64::new(0),
            errors: AtomicU64::new(0),
            total_latency_us: AtomicU64::new(0),
            last_error: Mutex::new(None),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn state(&self) -> ModuleState {
        ModuleState::from_u8(self.state.load(Ordering::Acquire))
    }

    /// Move to `next`, rejecting illegal transitions
    pub fn transition(&self, next: ModuleState) -> ModuleResult<()> {
        let current = self.state();
        if current == next {
            return Ok(());
        }
        if !current.can_transition_to(next) {
            return Err(ModuleError::Lifecycle {
                module: self.name.clone(),
                reason: format!("illegal transition {} -> {}", current, next),
            });
        }
        self.state.store(next.as_u8(), Ordering::Release);
        Ok(())
    }

    /// Mark the module failed and remember why
    pub fn fail(&self, reason: impl Into<String>) {
        self.state
            .store(ModuleState::Failed.as_u8(), Ordering::Release);
        self.set_last_error(reason.into());
    }

    /// Contract guard for processing methods: only a Running module may
    /// process traffic
    pub fn ensure_running(&self) -> ModuleResult<()> {
        match self.state() {
            ModuleState::Running => Ok(()),
            other => Err(ModuleError::NotRunning {
                module: self.name.clone(),
                state: other.to_string(),
            }),
        }
    }

    /// Count one processed request
    pub fn record_success(&self, latency: Duration) {
        self.requests.fetch_add(1, Ordering::Relaxed);
        self.total_latency_us
            .fetch_add(latency.as_micros() as u64, Ordering::Relaxed);
    }

    /// Count one processed request that hit an internal error
    pub fn record_failure(&self, latency: Duration, reason: impl Into<String>) {
        self.record_success(latency);
        self.record_error(reason);
    }

    /// Count an error without counting a request
    pub fn record_error(&self, reason: impl Into<String>) {
        self.errors.fetch_add(1, Ordering::Relaxed);
        self.set_last_error(reason.into());
    }

    pub fn requests_processed(&self) -> u64 {
        self.requests.load(Ordering::Relaxed)
    }

    pub fn error_count(&self) -> u64 {
        self.errors.load(Ordering::Relaxed)
    }

    pub fn average_latency(&self) -> Duration {
        let n = self.requests_processed();
        if n == 0 {
            return Duration::ZERO;
        }
        Duration::from_micros(self.total_latency_us.load(Ordering::Relaxed) / n)
    }

    pub fn last_error(&self) -> Option<String> {
        self.last_error
            .lock()
            .map(|g| g.clone())
            .unwrap_or_else(|poisoned| poisoned.into_inner().clone())
    }

    fn set_last_error(&self, reason: String) {
        match self.last_error.lock() {
            Ok(mut g) => *g = Some(reason),
            Err(poisoned) => *poisoned.into_inner() = Some(reason),
        }
    }

    /// Status snapshot
    pub fn status(&self) -> ModuleStatus {
        ModuleStatus {
            state: self.state(),
            requests_processed: self.requests_processed(),
            error_count: self.error_count(),
            average_latency: self.average_latency(),
            resource_usage: ResourceUsage::default(),
            last_error: self.last_error(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lifecycle_happy_path() {
        let rt = ModuleRuntime::new("m");
        assert_eq!(rt.state(), ModuleState::Loading);
        rt.transition(ModuleState::Initializing).unwrap();
        rt.transition(ModuleState::Ready).unwrap();
        assert!(rt.ensure_running().is_err());
        rt.transition(ModuleState::Running).unwrap();
        assert!(rt.ensure_running().is_ok());
        rt.transition(ModuleState::Draining).unwrap();
        rt.transition(ModuleState::Stopped).unwrap();
        let err = rt.ensure_running().unwrap_err();
        assert!(matches!(err, ModuleError::NotRunning { ref state, .. } if state == "Stopped"));
    }

    #[test]
    fn test_illegal_transition() {
        let rt = ModuleRuntime::new("m");
        let err = rt.transition(ModuleState::Running).unwrap_err();
        assert!(err.to_string().contains("illegal transition Loading -> Running"));
    }

    #[test]
    fn test_fail_from_any_state() {
        let rt = ModuleRuntime::new("m");
        rt.fail("boom");
        assert_eq!(rt.state(), ModuleState::Failed);
        assert_eq!(rt.last_error().as_deref(), Some("boom"));
    }

    #[test]
    fn test_counters() {
        let rt = ModuleRuntime::new("m");
        rt.record_success(Duration::from_millis(2));
        rt.record_failure(Duration::from_millis(4), "sink down");
        let status = rt.status();
        assert_eq!(status.requests_processed, 2);
        assert_eq!(status.error_count, 1);
        assert_eq!(status.average_latency, Duration::from_millis(3));
        assert_eq!(status.last_error.as_deref(), Some("sink down"));
    }
}
