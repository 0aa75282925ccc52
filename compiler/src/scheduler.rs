// scheduler.rs — PassManager: demand-driven pass execution with cached analyses
//
// A PassManager borrows an initialized PassRegistry and owns everything that
// changes during a scheduling run: the active optimization level, the
// ValiditySet, the lazily created pass instances and the Trace. The Module is
// borrowed per call.
//
// Demanding a pass resolves its prerequisites depth-first in declaration
// order on an explicit worklist, executes it, applies its invalidation edges
// (each target plus everything that transitively required the target) and,
// for an analysis, marks it valid.
//
// Preconditions: the registry passed to `new` has been initialized.
// Postconditions: after a successful call every executed analysis whose
//   result was not invalidated afterwards is Valid.
// Failure modes: ScheduleError. A failing pass leaves validity untouched.
// Side effects: mutates the Module through the passes it runs.

use std::fmt;

use serde::Serialize;
use tracing::{debug, info, warn};

use crate::id::PassId;
use crate::ir::Module;
use crate::pass::{OptLevel, Pass, PassContext, PassError};
use crate::registry::PassRegistry;
use crate::trace::{Trace, TraceAction};
use crate::validity::{PassState, ValiditySet};

/// Upper bound on the prerequisite chain a single demand may open.
pub const MAX_SCHEDULE_DEPTH: usize = 256;

// ── Errors ──────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ScheduleError {
    #[error("unknown pass '{name}'")]
    UnknownPass { name: String },
    #[error("pass '{pass}' failed: {source}")]
    PassFailed {
        pass: &'static str,
        #[source]
        source: PassError,
    },
    #[error("requirement cycle while scheduling: {}", .path.join(" -> "))]
    RequirementCycle { path: Vec<&'static str> },
    #[error("prerequisite chain deeper than {depth} passes")]
    DepthExceeded { depth: usize },
    #[error("prerequisite '{prerequisite}' of pass '{pass}' was invalidated before '{pass}' could run")]
    StalePrerequisite {
        pass: &'static str,
        prerequisite: &'static str,
    },
}

/// Result of a fixed-point drive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct FixedPointOutcome {
    /// Iterations actually run, including the final unchanged one.
    pub iterations: usize,
    /// False when the iteration cap was reached while passes still reported
    /// changes.
    pub converged: bool,
}

// ── PassManager ─────────────────────────────────────────────────────────────

struct Frame {
    id: PassId,
    /// Index of the next prerequisite to resolve.
    next: usize,
}

pub struct PassManager<'r> {
    registry: &'r PassRegistry,
    opt_level: OptLevel,
    validity: ValiditySet,
    instances: Vec<Option<Box<dyn Pass>>>,
    trace: Trace,
}

impl<'r> PassManager<'r> {
    pub fn new(registry: &'r PassRegistry, opt_level: OptLevel) -> Self {
        Self {
            registry,
            opt_level,
            validity: ValiditySet::new(registry.len()),
            instances: (0..registry.len()).map(|_| None).collect(),
            trace: Trace::new(),
        }
    }

    pub fn registry(&self) -> &'r PassRegistry {
        self.registry
    }

    pub fn opt_level(&self) -> OptLevel {
        self.opt_level
    }

    /// Change the gate. Existing pass instances are dropped so the next
    /// demand recreates them through their factory with the new level.
    pub fn set_opt_level(&mut self, level: OptLevel) {
        self.opt_level = level;
        for slot in &mut self.instances {
            *slot = None;
        }
    }

    /// Begin a new scheduling run: no analysis result is trusted.
    pub fn reset(&mut self) {
        self.validity.reset();
    }

    pub fn state(&self, name: &str) -> Option<PassState> {
        self.registry.id(name).map(|id| self.validity.state(id))
    }

    pub fn is_valid(&self, name: &str) -> bool {
        self.state(name) == Some(PassState::Valid)
    }

    pub fn validity(&self) -> &ValiditySet {
        &self.validity
    }

    pub fn trace(&self) -> &Trace {
        &self.trace
    }

    pub fn take_trace(&mut self) -> Trace {
        std::mem::take(&mut self.trace)
    }

    // ── Drivers ──

    /// Run every pass enabled at the active level once, in registration
    /// order. Returns whether any executed pass reported a change.
    pub fn run_once(&mut self, module: &mut Module) -> Result<bool, ScheduleError> {
        self.reset();
        let mut changed = false;
        for id in self.registry.candidates(self.opt_level) {
            changed |= self.run_pass_id(module, id)?;
        }
        info!(opt_level = self.opt_level, changed, "pass run finished");
        Ok(changed)
    }

    /// Like `run_once`, over the named passes in the given order. Every name
    /// is checked before anything runs.
    pub fn run_list<S: AsRef<str>>(
        &mut self,
        module: &mut Module,
        names: &[S],
    ) -> Result<bool, ScheduleError> {
        let ids = self.resolve_names(names)?;
        self.reset();
        let mut changed = false;
        for id in ids {
            changed |= self.run_pass_id(module, id)?;
        }
        info!(
            opt_level = self.opt_level,
            passes = names.len(),
            changed,
            "pass list finished"
        );
        Ok(changed)
    }

    /// Repeat `run_once` until an iteration changes nothing or
    /// `max_iterations` iterations have run.
    pub fn run_to_fixed_point(
        &mut self,
        module: &mut Module,
        max_iterations: usize,
    ) -> Result<FixedPointOutcome, ScheduleError> {
        self.fixed_point(module, max_iterations, |pm, m| pm.run_once(m))
    }

    pub fn run_list_to_fixed_point<S: AsRef<str>>(
        &mut self,
        module: &mut Module,
        names: &[S],
        max_iterations: usize,
    ) -> Result<FixedPointOutcome, ScheduleError> {
        self.resolve_names(names)?;
        self.fixed_point(module, max_iterations, |pm, m| pm.run_list(m, names))
    }

    fn fixed_point(
        &mut self,
        module: &mut Module,
        max_iterations: usize,
        mut step: impl FnMut(&mut Self, &mut Module) -> Result<bool, ScheduleError>,
    ) -> Result<FixedPointOutcome, ScheduleError> {
        let mut iterations = 0;
        while iterations < max_iterations {
            iterations += 1;
            if !step(self, module)? {
                info!(iterations, "fixed point reached");
                return Ok(FixedPointOutcome {
                    iterations,
                    converged: true,
                });
            }
        }
        warn!(max_iterations, "iteration cap reached before a fixed point");
        Ok(FixedPointOutcome {
            iterations,
            converged: false,
        })
    }

    fn resolve_names<S: AsRef<str>>(&self, names: &[S]) -> Result<Vec<PassId>, ScheduleError> {
        names
            .iter()
            .map(|n| {
                let n = n.as_ref();
                self.registry
                    .id(n)
                    .ok_or_else(|| ScheduleError::UnknownPass { name: n.to_string() })
            })
            .collect()
    }

    // ── Scheduling primitive ──

    /// Demand one pass, respecting its prerequisites. Returns the pass's own
    /// "changed" flag; a cached or gated pass reports `false`.
    pub fn run_pass(&mut self, module: &mut Module, name: &str) -> Result<bool, ScheduleError> {
        let id = self
            .registry
            .id(name)
            .ok_or_else(|| ScheduleError::UnknownPass {
                name: name.to_string(),
            })?;
        self.run_pass_id(module, id)
    }

    /// Like `run_pass`, keyed by id. An id the registry did not issue is an
    /// `UnknownPass`.
    pub fn run_pass_id(&mut self, module: &mut Module, id: PassId) -> Result<bool, ScheduleError> {
        if id.index() >= self.registry.len() {
            return Err(ScheduleError::UnknownPass {
                name: format!("{id:?}"),
            });
        }
        let d = self.registry.descriptor(id);
        if !d.is_enabled_at(self.opt_level) {
            debug!(pass = d.name, min_opt_level = d.min_opt_level, "skipped");
            self.trace.record(d.name, TraceAction::Skipped);
            return Ok(false);
        }
        if self.validity.is_valid(id) {
            debug!(pass = d.name, "cached");
            self.trace.record(d.name, TraceAction::Cached);
            return Ok(false);
        }
        self.schedule(module, id)
    }

    fn schedule(&mut self, module: &mut Module, root: PassId) -> Result<bool, ScheduleError> {
        let registry = self.registry;
        let name = |id: PassId| registry.descriptor(id).name;
        let mut stack = vec![Frame { id: root, next: 0 }];

        while let Some(frame) = stack.last_mut() {
            let id = frame.id;
            if let Some(&req) = registry.requirements(id).get(frame.next) {
                frame.next += 1;
                if self.validity.is_valid(req) {
                    debug!(pass = name(req), "cached");
                    self.trace.record(name(req), TraceAction::Cached);
                    continue;
                }
                if let Some(start) = stack.iter().position(|f| f.id == req) {
                    let mut path: Vec<&'static str> =
                        stack[start..].iter().map(|f| name(f.id)).collect();
                    path.push(name(req));
                    return Err(ScheduleError::RequirementCycle { path });
                }
                if stack.len() >= MAX_SCHEDULE_DEPTH {
                    return Err(ScheduleError::DepthExceeded {
                        depth: MAX_SCHEDULE_DEPTH,
                    });
                }
                stack.push(Frame { id: req, next: 0 });
                continue;
            }

            stack.pop();
            let changed = self.execute(module, id)?;
            if stack.is_empty() {
                return Ok(changed);
            }
        }
        Ok(false)
    }

    fn execute(&mut self, module: &mut Module, id: PassId) -> Result<bool, ScheduleError> {
        let registry = self.registry;
        let d = registry.descriptor(id);

        // Initialization rejects prerequisite lists that can trip this.
        for &req in registry.requirements(id) {
            let rd = registry.descriptor(req);
            if rd.is_analysis() && !self.validity.is_valid(req) {
                return Err(ScheduleError::StalePrerequisite {
                    pass: d.name,
                    prerequisite: rd.name,
                });
            }
        }

        let cx = PassContext {
            name: d.name,
            opt_level: self.opt_level,
        };
        let pass = self.instances[id.index()].get_or_insert_with(|| registry.factory(id).create(&cx));
        let changed = pass
            .run(module)
            .map_err(|source| ScheduleError::PassFailed {
                pass: d.name,
                source,
            })?;
        debug!(pass = d.name, changed, "ran");
        self.trace.record(d.name, TraceAction::Ran { changed });

        for &target in registry.invalidations(id) {
            self.invalidate_with_dependents(target);
        }
        self.validity.record_run(id, d.kind);
        Ok(changed)
    }

    fn invalidate_with_dependents(&mut self, target: PassId) {
        let registry = self.registry;
        let dependents = registry.requirement_graph().transitive_dependents(target);
        for id in std::iter::once(target).chain(dependents) {
            if self.validity.invalidate(id) {
                let name = registry.descriptor(id).name;
                debug!(pass = name, "invalidated");
                self.trace.record(name, TraceAction::Invalidated);
            }
        }
    }
}

impl fmt::Debug for PassManager<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PassManager")
            .field("opt_level", &self.opt_level)
            .field("validity", &self.validity)
            .field("trace_len", &self.trace.len())
            .finish()
    }
}

// ── Tests ──────────────────────────────────────────────────────────────────
