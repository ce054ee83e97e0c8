pub mod config;
pub mod engine;
pub mod evaluator;
pub mod machine;
pub mod metrics;

pub use config::EngineConfig;
pub use engine::{Engine, EngineError, ReloadSummary, RuleSummary, StartSummary, TriggerOutcome};
pub use metrics::{EngineMetrics, MetricsSnapshot};
