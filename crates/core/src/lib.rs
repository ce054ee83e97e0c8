pub mod delivery;
pub mod duration;
pub mod eval;
pub mod event;
pub mod rule;
pub mod state;
pub mod template;

pub use delivery::{ActionOutcome, ActionStatus, AggregateStatus, DeliveryReport};
pub use duration::{DurationError, format_duration, parse_duration, parse_window_from};
pub use eval::{EvalErrorKind, EvaluationResult};
pub use event::{AlertEvent, EventKind};
pub use rule::{
    ActionKind, ActionSpec, AggKind, Aggregation, CompareOp, Condition, HttpMethod, QuerySpec,
    Rule,
};
pub use state::{AlertState, RuleState};
pub use template::{AlertContext, render_str, render_value};
