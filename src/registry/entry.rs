//! One registered module as the host sees it

use crate::module::{ConditionSet, Module, ModuleConfig, ModuleRuntime, ModuleState};
use std::sync::Arc;
use tokio::sync::RwLock;

/// A module plus the host-side bookkeeping around it.
///
/// Entries are immutable snapshots; `reload` swaps in a new entry that shares
/// the same module, gate and tracker with the old one.
pub struct RegisteredModule {
    module: Arc<dyn Module>,
    config: ModuleConfig,
    conditions: ConditionSet,
    seq: u64,
    gate: Arc<RwLock<()>>,
    tracker: Arc<ModuleRuntime>,
}

impl RegisteredModule {
    pub(crate) fn new(
        module: Arc<dyn Module>,
        config: ModuleConfig,
        conditions: ConditionSet,
        seq: u64,
    ) -> Self {
        let tracker = Arc::new(ModuleRuntime::new(config.name.clone()));
        Self {
            module,
            config,
            conditions,
            seq,
            gate: Arc::new(RwLock::new(())),
            tracker,
        }
    }

    /// Same module, new config
    pub(crate) fn with_config(&self, config: ModuleConfig, conditions: ConditionSet) -> Self {
        Self {
            module: self.module.clone(),
            config,
            conditions,
            seq: self.seq,
            gate: self.gate.clone(),
            tracker: self.tracker.clone(),
        }
    }

    pub fn name(&self) -> &str {
        &self.config.name
    }

    pub fn module(&self) -> &Arc<dyn Module> {
        &self.module
    }

    pub fn config(&self) -> &ModuleConfig {
        &self.config
    }

    pub fn conditions(&self) -> &ConditionSet {
        &self.conditions
    }

    /// Registration order, used to break priority ties
    pub fn seq(&self) -> u64 {
        self.seq
    }

    /// Lifecycle state as tracked by the registry
    pub fn state(&self) -> ModuleState {
        self.tracker.state()
    }

    /// Host-side lifecycle and invocation counters
    pub fn tracker(&self) -> &ModuleRuntime {
        &self.tracker
    }

    /// Held shared while the pipeline invokes the module, exclusively while
    /// it is reconfigured or drained
    pub fn gate(&self) -> &Arc<RwLock<()>> {
        &self.gate
    }

    /// Whether the pipeline should consider this module at all
    pub fn is_executable(&self) -> bool {
        self.config.enabled && self.state().is_executable()
    }

    pub(crate) fn sort_key(&self) -> (i32, u64) {
        (self.config.priority, self.seq)
    }
}

impl std::fmt::Debug for RegisteredModule {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RegisteredModule")
            .field("name", &self.config.name)
            .field("type", &self.config.module_type)
            .field("priority", &self.config.priority)
            .field("state", &self.state())
            .finish()
    }
}
