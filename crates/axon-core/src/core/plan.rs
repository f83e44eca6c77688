//! Plan tracking: event emission helpers and the fold.
//!
//! Plans are mutated only through `plan_start` / `plan_update` /
//! `plan_finish` events; independent of the main loop, which merely
//! observes them.

use std::sync::Arc;

use axon_types::{Event, EventKind, Plan, PlanStep};

use crate::core::event_stream::EventStream;

/// Emits plan lifecycle events onto a stream.
#[derive(Clone)]
pub struct Planner {
    stream: Arc<EventStream>,
}

impl Planner {
    pub fn new(stream: Arc<EventStream>) -> Self {
        Self { stream }
    }

    pub fn start(&self) {
        self.stream.emit(EventKind::PlanStart);
    }

    pub fn update(&self, steps: Vec<PlanStep>) {
        self.stream.emit(EventKind::PlanUpdate { steps });
    }

    pub fn finish(&self, summary: Option<String>) {
        self.stream.emit(EventKind::PlanFinish { summary });
    }
}

/// Folds the event log into the current plan state.
pub fn fold_plan(events: &[Event]) -> Plan {
    let mut plan = Plan::default();
    for event in events {
        match &event.kind {
            EventKind::PlanStart => plan = Plan::default(),
            EventKind::PlanUpdate { steps } => plan.steps.clone_from(steps),
            EventKind::PlanFinish { summary } => {
                plan.completed = true;
                plan.summary.clone_from(summary);
            }
            _ => {}
        }
    }
    plan
}
