//! Prometheus metrics using the prometheus-client crate.
//!
//! Exported on `GET /metrics` in OpenMetrics text format. All names carry
//! the `modhost_` prefix.

use prometheus_client::encoding::EncodeLabelSet;
use prometheus_client::metrics::counter::Counter;
use prometheus_client::metrics::family::Family;
use prometheus_client::metrics::gauge::Gauge;
use prometheus_client::metrics::histogram::Histogram;
use prometheus_client::registry::Registry;
use std::time::Duration;

/// Labels for pipeline run counters
#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
pub struct RunLabels {
    /// "request" or "response"
    pub phase: String,
    /// Final action, or "aborted"
    pub action: String,
}

/// Labels for pipeline duration histograms
#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
pub struct PhaseLabels {
    pub phase: String,
}

/// Labels for per-module invocation counters
#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
pub struct InvocationLabels {
    pub module: String,
    /// "ok", "error", "timeout", "panic", "skipped" or "cancelled"
    pub outcome: String,
}

/// Labels for per-module duration histograms
#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
pub struct ModuleLabels {
    pub module: String,
}

/// Duration buckets in milliseconds
const DURATION_BUCKETS: &[f64] = &[
    0.1, 0.5, 1.0, 2.5, 5.0, 10.0, 25.0, 50.0, 100.0, 250.0, 500.0, 1000.0, 5000.0,
];

/// Host-wide metrics
pub struct HostMetrics {
    pub pipeline_runs_total: Family<RunLabels, Counter>,
    pub pipeline_duration_ms: Family<PhaseLabels, Histogram>,
    pub module_invocations_total: Family<InvocationLabels, Counter>,
    pub module_duration_ms: Family<ModuleLabels, Histogram>,
    pub modules_registered: Gauge,
}

impl HostMetrics {
    /// Create and register all metrics with the given registry
    pub fn new(registry: &mut Registry) -> Self {
        let pipeline_runs_total = Family::<RunLabels, Counter>::default();
        registry.register(
            "modhost_pipeline_runs",
            "Pipeline runs by phase and final action",
            pipeline_runs_total.clone(),
        );

        let pipeline_duration_ms = Family::<PhaseLabels, Histogram>::new_with_constructor(|| {
            Histogram::new(DURATION_BUCKETS.iter().copied())
        });
        registry.register(
            "modhost_pipeline_duration_ms",
            "Pipeline run latency in milliseconds",
            pipeline_duration_ms.clone(),
        );

        let module_invocations_total = Family::<InvocationLabels, Counter>::default();
        registry.register(
            "modhost_module_invocations",
            "Module invocations by outcome",
            module_invocations_total.clone(),
        );

        let module_duration_ms = Family::<ModuleLabels, Histogram>::new_with_constructor(|| {
            Histogram::new(DURATION_BUCKETS.iter().copied())
        });
        registry.register(
            "modhost_module_duration_ms",
            "Module processing latency in milliseconds",
            module_duration_ms.clone(),
        );

        let modules_registered = Gauge::default();
        registry.register(
            "modhost_modules_registered",
            "Number of registered modules",
            modules_registered.clone(),
        );

        Self {
            pipeline_runs_total,
            pipeline_duration_ms,
            module_invocations_total,
            module_duration_ms,
            modules_registered,
        }
    }

    /// Metrics bound to a private registry nobody scrapes
    pub fn detached() -> Self {
        Self::new(&mut Registry::default())
    }

    pub fn record_run(&self, phase: &str, action: &str, elapsed: Duration) {
        self.pipeline_runs_total
            .get_or_create(&RunLabels {
                phase: phase.to_string(),
                action: action.to_string(),
            })
            .inc();
        self.pipeline_duration_ms
            .get_or_create(&PhaseLabels {
                phase: phase.to_string(),
            })
            .observe(elapsed.as_secs_f64() * 1000.0);
    }

    pub fn record_invocation(&self, module: &str, outcome: &str, elapsed: Option<Duration>) {
        self.module_invocations_total
            .get_or_create(&InvocationLabels {
                module: module.to_string(),
                outcome: outcome.to_string(),
            })
            .inc();
        if let Some(elapsed) = elapsed {
            self.module_duration_ms
                .get_or_create(&ModuleLabels {
                    module: module.to_string(),
                })
                .observe(elapsed.as_secs_f64() * 1000.0);
        }
    }

    pub fn set_modules_registered(&self, count: usize) {
        self.modules_registered.set(count as i64);
    }
}

/// Encode a registry in OpenMetrics text format
pub fn encode(registry: &Registry) -> Result<String, std::fmt::Error> {
    let mut buffer = String::new();
    prometheus_client::encoding::text::encode(&mut buffer, registry)?;
    Ok(buffer)
}
