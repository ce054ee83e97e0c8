//! The alert lifecycle transition table.
//!
//! Pure: given the current state and whether the condition held, produce
//! the next state plus the notification and history dispositions. The
//! scheduler applies the plan; nothing here touches the clock or I/O.

use vaultize_core::AlertState;

/// Whether a transition dispatches notifications.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Notify {
    /// No notification.
    Never,
    /// Notify unless the rule's throttle window is still open.
    IfNotThrottled,
    /// Notify unconditionally; state-changing rows ignore the throttle.
    Always,
}

/// Whether a history event is appended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Append {
    Never,
    Always,
    /// Only when a notification was actually sent (the repeat-firing row).
    IfNotified,
}

/// The planned outcome of one successful evaluation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransitionPlan {
    pub next: AlertState,
    pub notify: Notify,
    pub append: Append,
}

/// The six-row transition table. Every reachable transition is one of
/// these rows.
pub fn plan(current: AlertState, condition_met: bool) -> TransitionPlan {
    use AlertState::{Firing, Ok, Resolved};
    match (current, condition_met) {
        (Ok, false) => TransitionPlan {
            next: Ok,
            notify: Notify::Never,
            append: Append::Never,
        },
        (Ok, true) => TransitionPlan {
            next: Firing,
            notify: Notify::IfNotThrottled,
            append: Append::Always,
        },
        (Firing, true) => TransitionPlan {
            next: Firing,
            notify: Notify::IfNotThrottled,
            append: Append::IfNotified,
        },
        (Firing, false) => TransitionPlan {
            next: Resolved,
            notify: Notify::Always,
            append: Append::Always,
        },
        (Resolved, false) => TransitionPlan {
            next: Ok,
            notify: Notify::Never,
            append: Append::Never,
        },
        (Resolved, true) => TransitionPlan {
            next: Firing,
            notify: Notify::Always,
            append: Append::Always,
        },
    }
}
