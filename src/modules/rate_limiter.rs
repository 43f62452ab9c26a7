//! Per-tenant rate limiting using the GCRA algorithm.
//!
//! Each tenant (or the single global key) gets its own governor limiter,
//! created lazily on first request. A tenant's quota is `limit` requests per
//! `window` with a burst of `limit`, so a fresh bucket admits exactly `limit`
//! requests before the window starts throttling. Idle buckets are evicted by
//! a background task while the module is running.

use crate::config::duration_format;
use crate::error::{ModuleError, ModuleResult};
use crate::module::{
    HealthStatus, Module, ModuleConfig, ModuleMetrics, ModuleRuntime, ModuleState, ModuleStatus,
    ModuleType, ProcessRequestContext, ProcessRequestResult, ProcessResponseContext,
    ProcessResponseResult, ProcessResult,
};
use async_trait::async_trait;
use dashmap::DashMap;
use governor::clock::{Clock, DefaultClock};
use governor::middleware::NoOpMiddleware;
use governor::state::{InMemoryState, NotKeyed};
use governor::{Quota, RateLimiter as GovernorLimiter};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::num::NonZeroU32;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

/// Implementation id used by the built-in factory
pub const IMPLEMENTATION: &str = "rate_limiter";

type TenantLimiter = GovernorLimiter<NotKeyed, InMemoryState, DefaultClock, NoOpMiddleware>;

/// What requests are bucketed by
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LimitKey {
    /// One bucket per tenant
    #[default]
    Tenant,
    /// One bucket for all traffic
    Global,
}

/// Module options (`config` table of the module entry)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RateLimiterOptions {
    /// Requests admitted per window
    pub default_limit: u32,
    #[serde(with = "duration_format")]
    pub window: Duration,
    /// Per-tenant overrides of `default_limit`
    pub tenant_limits: HashMap<String, u32>,
    pub key: LimitKey,
    /// Idle buckets older than this are evicted
    #[serde(with = "duration_format")]
    pub stale_after: Duration,
}

impl Default for RateLimiterOptions {
    fn default() -> Self {
        Self {
            default_limit: 60,
            window: Duration::from_secs(60),
            tenant_limits: HashMap::new(),
            key: LimitKey::Tenant,
            stale_after: Duration::from_secs(600),
        }
    }
}

impl RateLimiterOptions {
    fn quota(&self, limit: u32) -> Result<Quota, String> {
        let burst = NonZeroU32::new(limit).ok_or("limits must be greater than zero")?;
        let period = self.window / limit;
        Quota::with_period(period)
            .map(|q| q.allow_burst(burst))
            .ok_or_else(|| format!("window {:?} is too short for limit {}", self.window, limit))
    }
}

/// Validated options with precomputed quotas
#[derive(Debug)]
struct Limits {
    options: RateLimiterOptions,
    default_quota: Quota,
    tenant_quotas: HashMap<String, Quota>,
}

impl Limits {
    fn from_config(config: &ModuleConfig) -> Result<Self, String> {
        let options: RateLimiterOptions = config.options()?;
        if options.stale_after.is_zero() {
            return Err("stale_after must be greater than zero".to_string());
        }
        let default_quota = options.quota(options.default_limit)?;
        let tenant_quotas = options
            .tenant_limits
            .iter()
            .map(|(tenant, limit)| {
                options
                    .quota(*limit)
                    .map(|q| (tenant.clone(), q))
                    .map_err(|e| format!("tenant '{}': {}", tenant, e))
            })
            .collect::<Result<_, _>>()?;
        Ok(Self {
            options,
            default_quota,
            tenant_quotas,
        })
    }

    /// Idle time after which a bucket is dropped. Never shorter than the
    /// window: only a fully refilled bucket is equivalent to a fresh one.
    fn evict_after(&self) -> Duration {
        self.options.stale_after.max(self.options.window)
    }

    fn key_for(&self, ctx: &ProcessRequestContext) -> String {
        match self.options.key {
            LimitKey::Global => "*".to_string(),
            LimitKey::Tenant if ctx.tenant_id.is_empty() => "anonymous".to_string(),
            LimitKey::Tenant => ctx.tenant_id.clone(),
        }
    }

    fn limit_for(&self, key: &str) -> (u32, Quota) {
        match (
            self.options.tenant_limits.get(key),
            self.tenant_quotas.get(key),
        ) {
            (Some(limit), Some(quota)) => (*limit, *quota),
            _ => (self.options.default_limit, self.default_quota),
        }
    }
}

struct Bucket {
    limiter: TenantLimiter,
    last_seen: Instant,
}

/// Bucket table plus active limits, shared with the cleanup task
struct LimiterState {
    buckets: DashMap<String, Bucket>,
    limits: RwLock<Option<Arc<Limits>>>,
}

impl LimiterState {
    fn limits(&self) -> Option<Arc<Limits>> {
        self.limits
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn set_limits(&self, limits: Limits) {
        *self.limits.write().unwrap_or_else(PoisonError::into_inner) = Some(Arc::new(limits));
    }

    /// Remove buckets not seen within `idle`; returns how many
    fn cleanup_stale(&self, idle: Duration) -> usize {
        let Some(cutoff) = Instant::now().checked_sub(idle) else {
            return 0;
        };
        let before = self.buckets.len();
        self.buckets.retain(|_, bucket| bucket.last_seen > cutoff);
        let removed = before - self.buckets.len();
        if removed > 0 {
            debug!(
                removed,
                remaining = self.buckets.len(),
                "Evicted idle rate limit buckets"
            );
        }
        removed
    }
}

/// Token-bucket rate limiter keyed by tenant
pub struct RateLimiterModule {
    name: String,
    runtime: ModuleRuntime,
    config: RwLock<ModuleConfig>,
    state: Arc<LimiterState>,
    clock: DefaultClock,
    allowed: AtomicU64,
    rejected: AtomicU64,
    cleanup: Mutex<Option<CancellationToken>>,
}

impl RateLimiterModule {
    pub fn new(name: impl Into<String>) -> Self {
        let name = name.into();
        Self {
            runtime: ModuleRuntime::new(name.clone()),
            config: RwLock::new(ModuleConfig::new(name.clone(), ModuleType::Policy)),
            name,
            state: Arc::new(LimiterState {
                buckets: DashMap::new(),
                limits: RwLock::new(None),
            }),
            clock: DefaultClock::default(),
            allowed: AtomicU64::new(0),
            rejected: AtomicU64::new(0),
            cleanup: Mutex::new(None),
        }
    }

    /// Number of live buckets
    pub fn tracked_keys(&self) -> usize {
        self.state.buckets.len()
    }

    fn invalid(&self, reason: impl Into<String>) -> ModuleError {
        ModuleError::invalid_config(&self.name, reason)
    }

    fn stop_cleanup(&self) {
        if let Some(token) = self
            .cleanup
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
        {
            token.cancel();
        }
    }

    fn check(&self, ctx: &ProcessRequestContext) -> ModuleResult<ProcessResult> {
        let limits = self.state.limits().ok_or_else(|| ModuleError::NotRunning {
            module: self.name.clone(),
            state: "uninitialized".to_string(),
        })?;
        let key = limits.key_for(ctx);
        let (limit, quota) = limits.limit_for(&key);

        let mut bucket = self
            .state
            .buckets
            .entry(key.clone())
            .or_insert_with(|| Bucket {
                limiter: GovernorLimiter::direct(quota),
                last_seen: Instant::now(),
            });
        bucket.last_seen = Instant::now();

        match bucket.limiter.check() {
            Ok(()) => {
                self.allowed.fetch_add(1, Ordering::Relaxed);
                Ok(ProcessResult::allow()
                    .with_annotation("limit", limit)
                    .with_annotation("key", key))
            }
            Err(not_until) => {
                self.rejected.fetch_add(1, Ordering::Relaxed);
                let retry_after = not_until.wait_time_from(self.clock.now());
                debug!(
                    module = %self.name,
                    key = %key,
                    retry_after_ms = retry_after.as_millis() as u64,
                    "Rate limit exceeded"
                );
                let reason = match limits.options.key {
                    LimitKey::Global => "rate limit exceeded".to_string(),
                    LimitKey::Tenant => format!("rate limit exceeded for tenant '{}'", key),
                };
                Ok(ProcessResult::block(reason)
                    .with_metadata("retry_after_ms", retry_after.as_millis() as u64)
                    .with_annotation("limit", limit))
            }
        }
    }
}

#[async_trait]
impl Module for RateLimiterModule {
    fn name(&self) -> &str {
        &self.name
    }

    fn version(&self) -> &str {
        env!("CARGO_PKG_VERSION")
    }

    fn module_type(&self) -> ModuleType {
        ModuleType::Policy
    }

    fn description(&self) -> &str {
        "Per-tenant token bucket rate limiting"
    }

    fn author(&self) -> &str {
        "modhost"
    }

    async fn initialize(&self, config: ModuleConfig) -> ModuleResult<()> {
        self.runtime.transition(ModuleState::Initializing)?;
        let limits = match Limits::from_config(&config) {
            Ok(limits) => limits,
            Err(reason) => {
                self.runtime.fail(reason.clone());
                return Err(self.invalid(reason));
            }
        };
        info!(
            module = %self.name,
            default_limit = limits.options.default_limit,
            window = %duration_format::format_duration(limits.options.window),
            overrides = limits.tenant_quotas.len(),
            "Rate limiter configured"
        );
        self.state.set_limits(limits);
        *self.config.write().unwrap_or_else(PoisonError::into_inner) = config;
        self.runtime.transition(ModuleState::Ready)
    }

    async fn start(&self) -> ModuleResult<()> {
        self.runtime.transition(ModuleState::Running)?;
        let evict_after = self
            .state
            .limits()
            .map(|l| l.evict_after())
            .unwrap_or(Duration::from_secs(600));
        let token = CancellationToken::new();
        let shutdown = token.clone();
        let state = Arc::clone(&self.state);
        let interval = (evict_after / 2).max(Duration::from_millis(100));
        tokio::spawn(async move {
            let mut tick = tokio::time::interval(interval);
            tick.tick().await;
            loop {
                tokio::select! {
                    _ = tick.tick() => {
                        if let Some(limits) = state.limits() {
                            state.cleanup_stale(limits.evict_after());
                        }
                    }
                    _ = shutdown.cancelled() => break,
                }
            }
        });
        if let Some(previous) = self
            .cleanup
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .replace(token)
        {
            previous.cancel();
        }
        Ok(())
    }

    async fn stop(&self) -> ModuleResult<()> {
        self.runtime.transition(ModuleState::Draining)?;
        self.stop_cleanup();
        self.runtime.transition(ModuleState::Stopped)
    }

    async fn shutdown(&self) -> ModuleResult<()> {
        self.stop_cleanup();
        self.state.buckets.clear();
        self.runtime.transition(ModuleState::Stopped)
    }

    async fn health(&self) -> HealthStatus {
        match self.runtime.state() {
            ModuleState::Running | ModuleState::Ready => HealthStatus::healthy("rate limiter ok")
                .with_detail("tracked_keys", self.tracked_keys() as u64),
            other => HealthStatus::unhealthy(format!("rate limiter is {}", other)),
        }
    }

    fn status(&self) -> ModuleStatus {
        self.runtime.status()
    }

    fn metrics(&self) -> ModuleMetrics {
        let mut m = ModuleMetrics::new();
        m.insert("allowed".into(), self.allowed.load(Ordering::Relaxed) as f64);
        m.insert("rejected".into(), self.rejected.load(Ordering::Relaxed) as f64);
        m.insert("tracked_keys".into(), self.tracked_keys() as f64);
        m
    }

    async fn process_request(
        &self,
        ctx: &ProcessRequestContext,
    ) -> ModuleResult<ProcessRequestResult> {
        self.runtime.ensure_running()?;
        let started = Instant::now();
        let result = self.check(ctx);
        match &result {
            Ok(_) => self.runtime.record_success(started.elapsed()),
            Err(e) => self.runtime.record_failure(started.elapsed(), e.to_string()),
        }
        result
    }

    async fn process_response(
        &self,
        _ctx: &ProcessResponseContext,
    ) -> ModuleResult<ProcessResponseResult> {
        self.runtime.ensure_running()?;
        Ok(ProcessResult::allow())
    }

    fn validate_config(&self, config: &ModuleConfig) -> ModuleResult<()> {
        Limits::from_config(config)
            .map(|_| ())
            .map_err(|reason| self.invalid(reason))
    }

    async fn update_config(&self, config: ModuleConfig) -> ModuleResult<()> {
        let limits = Limits::from_config(&config).map_err(|reason| self.invalid(reason))?;
        let unchanged = self
            .state
            .limits()
            .is_some_and(|current| current.options == limits.options);
        if !unchanged {
            self.state.buckets.clear();
            info!(module = %self.name, "Rate limits changed, buckets reset");
        }
        self.state.set_limits(limits);
        *self.config.write().unwrap_or_else(PoisonError::into_inner) = config;
        Ok(())
    }

    fn get_config(&self) -> ModuleConfig {
        self.config
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}
