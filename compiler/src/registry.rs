// registry.rs — Pass registration and one-time configuration validation
//
// Passes are registered into a RegistryBuilder, in any order, each with a
// descriptor and a factory. `initialize()` consumes the builder, resolves all
// pass references, rejects invalid configurations and freezes the result into
// a PassRegistry that is read-only from then on and can be shared by any
// number of scheduling runs.
//
// Preconditions: none.
// Postconditions: a PassRegistry only exists for a fully valid configuration.
// Failure modes: ConfigError (duplicate / self / repeated references at
//   registration; unknown references, analysis cycles, level-gated and
//   mutually invalidating prerequisites at initialization).
// Side effects: none.

use std::collections::{HashMap, HashSet};
use std::fmt;

use tracing::debug;

use crate::graph::RequirementGraph;
use crate::id::{IdAllocator, PassId};
use crate::pass::{OptLevel, PassDescriptor, PassFactory};

// ── Errors ──────────────────────────────────────────────────────────────────

/// Which descriptor list a pass reference came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Relation {
    Requires,
    Invalidates,
}

impl fmt::Display for Relation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Relation::Requires => write!(f, "requires"),
            Relation::Invalidates => write!(f, "invalidates"),
        }
    }
}

/// Invalid pass configuration. Fatal: no pass pipeline can run with it.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    #[error("duplicate pass '{name}'")]
    DuplicatePass { name: &'static str },
    #[error("pass '{name}' requires itself")]
    SelfRequirement { name: &'static str },
    #[error("pass '{name}' requires '{requirement}' more than once")]
    DuplicateRequirement {
        name: &'static str,
        requirement: &'static str,
    },
    #[error("pass '{name}' invalidates '{target}' more than once")]
    DuplicateInvalidation {
        name: &'static str,
        target: &'static str,
    },
    #[error("unknown pass reference: '{name}' {relation} '{reference}'")]
    UnknownPassReference {
        name: &'static str,
        relation: Relation,
        reference: &'static str,
    },
    #[error("circular pass dependency: {}", .cycle.join(" -> "))]
    CircularDependency { cycle: Vec<&'static str> },
    #[error(
        "pass '{name}' (level {level}) requires '{requirement}', which is gated at level {requirement_level}"
    )]
    GatedPrerequisite {
        name: &'static str,
        level: OptLevel,
        requirement: &'static str,
        requirement_level: OptLevel,
    },
    #[error(
        "pass '{name}' requires '{prerequisite}', but '{invalidator}' invalidates it before '{name}' can run"
    )]
    ConflictingPrerequisites {
        name: &'static str,
        prerequisite: &'static str,
        invalidator: &'static str,
    },
}

// ── Builder ─────────────────────────────────────────────────────────────────

struct RegisteredPass {
    descriptor: PassDescriptor,
    factory: Box<dyn PassFactory>,
}

/// Collects registrations. Reference resolution is deferred to
/// `initialize()`, so registration order across call sites is irrelevant.
#[derive(Default)]
pub struct RegistryBuilder {
    passes: Vec<RegisteredPass>,
    index: HashMap<&'static str, PassId>,
    ids: IdAllocator,
}

impl RegistryBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a pass type. Rejects duplicate names and descriptor
    /// authoring mistakes immediately.
    pub fn register(
        &mut self,
        descriptor: PassDescriptor,
        factory: impl PassFactory + 'static,
    ) -> Result<&mut Self, ConfigError> {
        let name = descriptor.name;
        if self.index.contains_key(name) {
            return Err(ConfigError::DuplicatePass { name });
        }
        if descriptor.requires.contains(&name) {
            return Err(ConfigError::SelfRequirement { name });
        }
        if let Some(requirement) = first_repeat(&descriptor.requires) {
            return Err(ConfigError::DuplicateRequirement { name, requirement });
        }
        if let Some(target) = first_repeat(&descriptor.invalidates) {
            return Err(ConfigError::DuplicateInvalidation { name, target });
        }

        let id = self.ids.alloc_pass();
        self.index.insert(name, id);
        self.passes.push(RegisteredPass {
            descriptor,
            factory: Box::new(factory),
        });
        Ok(self)
    }

    pub fn len(&self) -> usize {
        self.passes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.passes.is_empty()
    }

    /// Resolve references, validate the configuration and freeze it.
    ///
    /// Checks, in order: every referenced name is registered; the
    /// requirement relation restricted to analysis passes is acyclic; no pass
    /// requires a prerequisite gated at a higher level than itself; no
    /// prerequisite invalidates an analysis listed before it by the same pass.
    pub fn initialize(self) -> Result<PassRegistry, ConfigError> {
        let RegistryBuilder { passes, index, .. } = self;

        let resolve = |name: &'static str, relation: Relation, reference: &'static str| {
            index
                .get(reference)
                .copied()
                .ok_or(ConfigError::UnknownPassReference {
                    name,
                    relation,
                    reference,
                })
        };

        let mut requirements = Vec::with_capacity(passes.len());
        let mut invalidations = Vec::with_capacity(passes.len());
        for pass in &passes {
            let d = &pass.descriptor;
            let reqs = d
                .requires
                .iter()
                .map(|r| resolve(d.name, Relation::Requires, r))
                .collect::<Result<Vec<_>, _>>()?;
            let invs = d
                .invalidates
                .iter()
                .map(|r| resolve(d.name, Relation::Invalidates, r))
                .collect::<Result<Vec<_>, _>>()?;
            requirements.push(reqs);
            invalidations.push(invs);
        }

        if let Some(cycle) = find_analysis_cycle(&passes, &requirements) {
            return Err(ConfigError::CircularDependency { cycle });
        }

        for (pass, reqs) in passes.iter().zip(&requirements) {
            let d = &pass.descriptor;
            for req in reqs {
                let rd = &passes[req.index()].descriptor;
                if rd.min_opt_level > d.min_opt_level {
                    return Err(ConfigError::GatedPrerequisite {
                        name: d.name,
                        level: d.min_opt_level,
                        requirement: rd.name,
                        requirement_level: rd.min_opt_level,
                    });
                }
            }
        }

        let edges = requirements.iter().enumerate().flat_map(|(i, reqs)| {
            let dependent = PassId(i as u32);
            reqs.iter().map(move |&prerequisite| (prerequisite, dependent))
        });
        let graph = RequirementGraph::from_edges(passes.len(), edges);

        if let Some(conflict) =
            find_prerequisite_conflict(&passes, &requirements, &invalidations, &graph)
        {
            return Err(conflict);
        }

        debug!(
            passes = passes.len(),
            requirement_edges = graph.edge_count(),
            "pass registry initialized"
        );

        Ok(PassRegistry {
            passes,
            index,
            requirements,
            invalidations,
            graph,
        })
    }
}

fn first_repeat(names: &[&'static str]) -> Option<&'static str> {
    let mut seen = HashSet::new();
    names.iter().copied().find(|n| !seen.insert(*n))
}

/// Depth-first search over analysis→analysis requirement edges. Returns the
/// first cycle found, closed (first node repeated at the end).
fn find_analysis_cycle(
    passes: &[RegisteredPass],
    requirements: &[Vec<PassId>],
) -> Option<Vec<&'static str>> {
    #[derive(Clone, Copy, PartialEq, Eq)]
    enum Mark {
        New,
        Active,
        Done,
    }

    let is_analysis = |id: PassId| passes[id.index()].descriptor.is_analysis();
    let name = |id: PassId| passes[id.index()].descriptor.name;
    let mut marks = vec![Mark::New; passes.len()];

    for root in (0..passes.len()).map(|i| PassId(i as u32)) {
        if marks[root.index()] != Mark::New || !is_analysis(root) {
            continue;
        }
        marks[root.index()] = Mark::Active;
        let mut stack: Vec<(PassId, usize)> = vec![(root, 0)];

        while let Some(top) = stack.last_mut() {
            let id = top.0;
            let Some(&req) = requirements[id.index()].get(top.1) else {
                marks[id.index()] = Mark::Done;
                stack.pop();
                continue;
            };
            top.1 += 1;
            if !is_analysis(req) {
                continue;
            }
            match marks[req.index()] {
                Mark::Done => {}
                Mark::Active => {
                    let start = stack.iter().position(|(p, _)| *p == req).unwrap_or(0);
                    let mut cycle: Vec<&'static str> =
                        stack[start..].iter().map(|(p, _)| name(*p)).collect();
                    cycle.push(name(req));
                    return Some(cycle);
                }
                Mark::New => {
                    marks[req.index()] = Mark::Active;
                    stack.push((req, 0));
                }
            }
        }
    }
    None
}

/// A pass whose prerequisite list is `[.., A, .., X, ..]`, where X or anything
/// X requires invalidates the analysis A (directly or through the requirement
/// graph), may find A stale when it is about to run. Everything that can run
/// between A and the pass is in the requirement closure of a later
/// prerequisite, so checking those closures covers every schedule.
fn find_prerequisite_conflict(
    passes: &[RegisteredPass],
    requirements: &[Vec<PassId>],
    invalidations: &[Vec<PassId>],
    graph: &RequirementGraph,
) -> Option<ConfigError> {
    let descriptor = |id: PassId| &passes[id.index()].descriptor;

    for (pass, reqs) in passes.iter().zip(requirements) {
        for (j, &later) in reqs.iter().enumerate().skip(1) {
            let mut closure = Vec::new();
            visit_requirements(requirements, later, &mut HashSet::new(), &mut closure);

            for runner in closure {
                for &target in &invalidations[runner.index()] {
                    let stale = graph.transitive_dependents(target);
                    let hit = reqs[..j].iter().find(|&&req| {
                        descriptor(req).is_analysis() && (req == target || stale.contains(&req))
                    });
                    if let Some(&req) = hit {
                        return Some(ConfigError::ConflictingPrerequisites {
                            name: pass.descriptor.name,
                            prerequisite: descriptor(req).name,
                            invalidator: descriptor(runner).name,
                        });
                    }
                }
            }
        }
    }
    None
}

/// Post-order walk over `requires`: prerequisites first, `id` last.
fn visit_requirements(
    requirements: &[Vec<PassId>],
    id: PassId,
    visited: &mut HashSet<PassId>,
    order: &mut Vec<PassId>,
) {
    if !visited.insert(id) {
        return;
    }
    for &dep in &requirements[id.index()] {
        visit_requirements(requirements, dep, visited, order);
    }
    order.push(id);
}

// ── Registry ────────────────────────────────────────────────────────────────

/// A validated, read-only set of passes.
pub struct PassRegistry {
    passes: Vec<RegisteredPass>,
    index: HashMap<&'static str, PassId>,
    requirements: Vec<Vec<PassId>>,
    invalidations: Vec<Vec<PassId>>,
    graph: RequirementGraph,
}

impl PassRegistry {
    pub fn len(&self) -> usize {
        self.passes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.passes.is_empty()
    }

    pub fn id(&self, name: &str) -> Option<PassId> {
        self.index.get(name).copied()
    }

    pub fn lookup(&self, name: &str) -> Option<&PassDescriptor> {
        self.id(name).map(|id| self.descriptor(id))
    }

    /// Panics if `id` was not issued by this registry.
    pub fn descriptor(&self, id: PassId) -> &PassDescriptor {
        &self.passes[id.index()].descriptor
    }

    /// Descriptors in registration order.
    pub fn descriptors(&self) -> impl Iterator<Item = &PassDescriptor> {
        self.passes.iter().map(|p| &p.descriptor)
    }

    pub fn ids(&self) -> impl Iterator<Item = PassId> {
        (0..self.passes.len()).map(|i| PassId(i as u32))
    }

    /// Resolved `requires` list, in declaration order.
    pub fn requirements(&self, id: PassId) -> &[PassId] {
        &self.requirements[id.index()]
    }

    /// Resolved `invalidates` list, in declaration order.
    pub fn invalidations(&self, id: PassId) -> &[PassId] {
        &self.invalidations[id.index()]
    }

    /// Compact JSON of every descriptor in registration order. Stable across
    /// runs, used as the registry fingerprint in build provenance.
    pub fn canonical_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(&self.descriptors().collect::<Vec<_>>())
    }

    pub fn requirement_graph(&self) -> &RequirementGraph {
        &self.graph
    }

    pub fn factory(&self, id: PassId) -> &dyn PassFactory {
        self.passes[id.index()].factory.as_ref()
    }

    /// Passes eligible at `level`, in registration order.
    pub fn candidates(&self, level: OptLevel) -> Vec<PassId> {
        self.ids()
            .filter(|&id| self.descriptor(id).is_enabled_at(level))
            .collect()
    }

    /// `id` and its transitive prerequisites, in the order a fresh scheduling
    /// run would execute them.
    pub fn required_passes(&self, id: PassId) -> Vec<PassId> {
        let mut order = Vec::new();
        visit_requirements(&self.requirements, id, &mut HashSet::new(), &mut order);
        order
    }
}

impl fmt::Debug for PassRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PassRegistry")
            .field("passes", &self.descriptors().collect::<Vec<_>>())
            .field("graph", &self.graph)
            .finish()
    }
}

// ── Tests ──────────────────────────────────────────────────────────────────
