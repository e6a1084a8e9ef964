use std::path::Path;
use std::sync::{Arc, Mutex};

use hive_types::Run;

use crate::{
    CheckpointStore, ConfigStore, CostTracker, EventBus, EventLog, HandoffStore, HiveConfig,
    HivePaths, ScratchpadStore, TraceContext,
};

/// Tunables read from the environment exactly once, at context
/// construction. Nothing else in the engine touches `std::env`.
#[derive(Debug, Clone)]
pub struct RunSettings {
    pub hive_dir: Option<String>,
    pub auto_mode: bool,
    pub parallel_review: bool,
    pub fast_mode: bool,
    pub cost_aware: bool,
    pub cost_budget: Option<f64>,
    pub cost_input_price: f64,
    pub cost_output_price: f64,
    pub confidence_threshold: f64,
    pub max_challenges: u32,
    pub challenge_retry_attempts: u32,
    pub max_parallel: usize,
    pub skip_min_samples: u32,
    pub skip_success_threshold: f64,
    pub adapt_enabled: bool,
    pub adapt_many_files: usize,
    pub adapt_max_failures: u32,
}

impl Default for RunSettings {
    fn default() -> Self {
        Self {
            hive_dir: None,
            auto_mode: false,
            parallel_review: true,
            fast_mode: false,
            cost_aware: true,
            cost_budget: None,
            cost_input_price: crate::DEFAULT_INPUT_PRICE,
            cost_output_price: crate::DEFAULT_OUTPUT_PRICE,
            confidence_threshold: 0.6,
            max_challenges: 2,
            challenge_retry_attempts: 2,
            max_parallel: 3,
            skip_min_samples: 10,
            skip_success_threshold: 0.95,
            adapt_enabled: true,
            adapt_many_files: 10,
            adapt_max_failures: 3,
        }
    }
}

impl RunSettings {
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            hive_dir: std::env::var("HIVE_DIR").ok().filter(|v| !v.is_empty()),
            auto_mode: env_bool("HIVE_AUTO_MODE", defaults.auto_mode),
            parallel_review: env_bool("HIVE_PARALLEL", defaults.parallel_review),
            fast_mode: env_bool("HIVE_FAST_MODE", defaults.fast_mode),
            cost_aware: env_bool("HIVE_COST_AWARE", defaults.cost_aware),
            cost_budget: env_parse("HIVE_COST_BUDGET"),
            cost_input_price: env_parse("HIVE_COST_INPUT").unwrap_or(defaults.cost_input_price),
            cost_output_price: env_parse("HIVE_COST_OUTPUT").unwrap_or(defaults.cost_output_price),
            confidence_threshold: env_parse("HIVE_CONFIDENCE_THRESHOLD")
                .unwrap_or(defaults.confidence_threshold),
            max_challenges: env_parse("HIVE_MAX_CHALLENGES").unwrap_or(defaults.max_challenges),
            challenge_retry_attempts: env_parse("HIVE_CHALLENGE_RETRY_ATTEMPTS")
                .unwrap_or(defaults.challenge_retry_attempts),
            max_parallel: env_parse("HIVE_MAX_PARALLEL").unwrap_or(defaults.max_parallel),
            skip_min_samples: env_parse("HIVE_SKIP_MIN_SAMPLES")
                .unwrap_or(defaults.skip_min_samples),
            skip_success_threshold: env_parse("HIVE_SKIP_SUCCESS_THRESHOLD")
                .unwrap_or(defaults.skip_success_threshold),
            adapt_enabled: env_bool("HIVE_ADAPT_ENABLED", defaults.adapt_enabled),
            adapt_many_files: env_parse("HIVE_ADAPT_MANY_FILES")
                .unwrap_or(defaults.adapt_many_files),
            adapt_max_failures: env_parse("HIVE_ADAPT_MAX_FAILURES")
                .unwrap_or(defaults.adapt_max_failures),
        }
    }
}

fn env_bool(key: &str, default: bool) -> bool {
    match std::env::var(key) {
        Ok(value) => matches!(
            value.trim().to_ascii_lowercase().as_str(),
            "1" | "true" | "yes" | "on"
        ),
        Err(_) => default,
    }
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    std::env::var(key).ok().and_then(|v| v.trim().parse().ok())
}

/// Run-scoped safety switches the confidence gate can flip mid-run.
#[derive(Debug, Clone, Default)]
pub struct RuntimeSafety {
    pub parallel_disabled: bool,
    pub needs_extra_review: bool,
    pub halt_for_human: bool,
}

/// Everything a component needs to act within one run: paths, config
/// snapshot, trace state, event sinks, cost meter, and safety switches.
/// Threaded as a value; no global state.
#[derive(Clone)]
pub struct RunContext {
    pub run_id: String,
    pub epic_id: Option<String>,
    pub objective: String,
    pub workflow: String,
    pub paths: HivePaths,
    pub config: HiveConfig,
    pub settings: RunSettings,
    pub trace: TraceContext,
    pub events: EventLog,
    pub bus: EventBus,
    pub cost: Arc<Mutex<CostTracker>>,
    pub safety: Arc<Mutex<RuntimeSafety>>,
}

impl RunContext {
    /// Wire up a fresh context for a run: resolve the layout, open the
    /// trace, and attach the event log and bus.
    pub fn bootstrap(
        project_root: impl AsRef<Path>,
        run: &Run,
        settings: RunSettings,
    ) -> anyhow::Result<Self> {
        let paths = HivePaths::resolve(project_root.as_ref(), settings.hive_dir.as_deref());
        paths.ensure_layout()?;
        std::fs::create_dir_all(paths.run_output_dir(&run.run_id))?;
        std::fs::create_dir_all(paths.run_snapshots_dir(&run.run_id))?;

        let config = ConfigStore::load(&paths).effective();
        // config-file flags back the env snapshot when the env var is unset
        let mut settings = settings;
        if std::env::var("HIVE_AUTO_MODE").is_err() {
            if let Some(auto) = config.feature("auto_mode") {
                settings.auto_mode = auto;
            }
        }
        if std::env::var("HIVE_COST_AWARE").is_err() {
            if let Some(aware) = config.feature("cost_tracking") {
                settings.cost_aware = aware;
            }
        }
        let trace = TraceContext::init(run.run_id.clone(), paths.trace_dir(&run.run_id))?;
        let bus = EventBus::new();
        let events = EventLog::new(&paths.events_path, trace.clone(), bus.clone());
        let budget = settings.cost_aware.then_some(settings.cost_budget).flatten();
        let cost = CostTracker::new(
            settings.cost_input_price,
            settings.cost_output_price,
            budget,
        );

        Ok(Self {
            run_id: run.run_id.clone(),
            epic_id: run.epic_id.clone(),
            objective: run.objective.clone(),
            workflow: run.workflow.clone(),
            paths,
            config,
            settings,
            trace,
            events,
            bus,
            cost: Arc::new(Mutex::new(cost)),
            safety: Arc::new(Mutex::new(RuntimeSafety::default())),
        })
    }

    /// Worker context for parallel execution: shared stores and meters,
    /// private span stack inherited from the parent at fork time.
    pub fn fork_for_worker(&self) -> Self {
        let trace = self.trace.fork();
        let events = EventLog::new(self.paths.events_path.clone(), trace.clone(), self.bus.clone());
        Self {
            trace,
            events,
            ..self.clone()
        }
    }

    pub fn scratchpad_store(&self) -> ScratchpadStore {
        ScratchpadStore::new(&self.paths.scratchpad_path)
    }

    pub fn checkpoint_store(&self) -> CheckpointStore {
        CheckpointStore::new(&self.paths.checkpoints_dir)
    }

    pub fn handoff_store(&self) -> HandoffStore {
        HandoffStore::new(&self.paths.handoffs_dir)
    }

    pub fn spent(&self) -> f64 {
        self.cost.lock().expect("cost lock poisoned").spent()
    }

    pub fn parallel_allowed(&self) -> bool {
        self.settings.parallel_review
            && !self
                .safety
                .lock()
                .expect("safety lock poisoned")
                .parallel_disabled
    }
}
