// trace.rs — Record of every scheduling decision made by a PassManager
//
// One event per decision, in decision order. Serializes to JSON for
// `--emit trace`.

use std::collections::BTreeMap;

use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum TraceAction {
    /// The pass executed.
    Ran { changed: bool },
    /// A valid cached result was reused.
    Cached,
    /// The pass is gated above the active optimization level.
    Skipped,
    /// A valid result was dropped by an invalidation edge.
    Invalidated,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct TraceEvent {
    pub pass: &'static str,
    #[serde(flatten)]
    pub action: TraceAction,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct Trace {
    events: Vec<TraceEvent>,
}

impl Trace {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&mut self, pass: &'static str, action: TraceAction) {
        self.events.push(TraceEvent { pass, action });
    }

    pub fn events(&self) -> &[TraceEvent] {
        &self.events
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    /// How many times `pass` actually executed.
    pub fn run_count(&self, pass: &str) -> usize {
        self.events
            .iter()
            .filter(|e| e.pass == pass && matches!(e.action, TraceAction::Ran { .. }))
            .count()
    }

    /// Execution counts for every pass that ran at least once.
    pub fn run_counts(&self) -> BTreeMap<&'static str, usize> {
        let mut counts = BTreeMap::new();
        for e in &self.events {
            if let TraceAction::Ran { .. } = e.action {
                *counts.entry(e.pass).or_insert(0) += 1;
            }
        }
        counts
    }

    /// Names of executed passes, in execution order.
    pub fn executed(&self) -> Vec<&'static str> {
        self.events
            .iter()
            .filter(|e| matches!(e.action, TraceAction::Ran { .. }))
            .map(|e| e.pass)
            .collect()
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }
}
