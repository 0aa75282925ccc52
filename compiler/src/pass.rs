// pass.rs — Pass descriptors, the Pass trait and pass factories
//
// A PassDescriptor is the static metadata the scheduler plans with: a unique
// name, the pass kind, the minimum optimization level at which the pass is a
// candidate, the passes whose results it requires and the passes whose
// results it invalidates. Descriptors are built with chained calls and handed
// to `RegistryBuilder::register` together with a factory.
//
// Names in `requires` / `invalidates` are not resolved here; the registry
// resolves and validates them once, at `initialize()`.

use crate::ir::Module;

/// Optimization level gate. `0` means "always a candidate".
pub type OptLevel = u32;

// ── Pass kind ──────────────────────────────────────────────────────────────

/// Analysis passes compute a cacheable fact; transformation passes mutate
/// the module and are never cached.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PassKind {
    Analysis,
    Transformation,
}

impl std::fmt::Display for PassKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PassKind::Analysis => write!(f, "analysis"),
            PassKind::Transformation => write!(f, "transformation"),
        }
    }
}

// ── Pass descriptor ────────────────────────────────────────────────────────

/// Static metadata about a registered pass.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
pub struct PassDescriptor {
    /// Unique scheduling key.
    pub name: &'static str,
    pub kind: PassKind,
    /// The pass is a candidate only when the active level is at least this.
    pub min_opt_level: OptLevel,
    /// Passes that must hold a valid result before this one runs, in
    /// resolution order.
    pub requires: Vec<&'static str>,
    /// Passes whose results are stale once this one has run, whether or not
    /// it reported a change.
    pub invalidates: Vec<&'static str>,
}

impl PassDescriptor {
    pub fn new(name: &'static str, kind: PassKind) -> Self {
        Self {
            name,
            kind,
            min_opt_level: 0,
            requires: Vec::new(),
            invalidates: Vec::new(),
        }
    }

    pub fn analysis(name: &'static str) -> Self {
        Self::new(name, PassKind::Analysis)
    }

    pub fn transformation(name: &'static str) -> Self {
        Self::new(name, PassKind::Transformation)
    }

    /// Append a prerequisite. Duplicates are rejected at registration.
    pub fn requires(mut self, name: &'static str) -> Self {
        self.requires.push(name);
        self
    }

    /// Append an invalidation edge.
    pub fn invalidates(mut self, name: &'static str) -> Self {
        self.invalidates.push(name);
        self
    }

    pub fn with_min_opt_level(mut self, level: OptLevel) -> Self {
        self.min_opt_level = level;
        self
    }

    pub fn with_kind(mut self, kind: PassKind) -> Self {
        self.kind = kind;
        self
    }

    pub fn is_analysis(&self) -> bool {
        self.kind == PassKind::Analysis
    }

    pub fn is_enabled_at(&self, level: OptLevel) -> bool {
        self.min_opt_level <= level
    }
}

// ── Pass errors ────────────────────────────────────────────────────────────

/// Failure raised by a pass while it runs. The scheduler wraps it in
/// `ScheduleError::PassFailed` together with the pass name.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PassError {
    #[error("function '{function}': {message}")]
    Malformed { function: String, message: String },
    #[error("analysis '{analysis}' has no cached result")]
    MissingAnalysis { analysis: &'static str },
    #[error("{0}")]
    Internal(String),
}

// ── Pass and factory ───────────────────────────────────────────────────────

/// A unit of work over a module.
///
/// Returns `true` iff the module was changed. Analyses only write to the
/// module's analysis cache, which does not count as a change. A pass must not
/// keep references into the module beyond the call.
pub trait Pass {
    fn run(&mut self, module: &mut Module) -> Result<bool, PassError>;
}

/// What a factory knows about the scheduler it is creating a pass for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PassContext {
    pub name: &'static str,
    pub opt_level: OptLevel,
}

/// Creates pass instances bound to a scheduler. Registered once per pass.
pub trait PassFactory: Send + Sync {
    fn create(&self, cx: &PassContext) -> Box<dyn Pass>;
}

impl<F> PassFactory for F
where
    F: Fn(&PassContext) -> Box<dyn Pass> + Send + Sync,
{
    fn create(&self, cx: &PassContext) -> Box<dyn Pass> {
        self(cx)
    }
}

// ── Tests ──────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    struct Noop;

    impl Pass for Noop {
        fn run(&mut self, _module: &mut Module) -> Result<bool, PassError> {
            Ok(false)
        }
    }

    #[test]
    fn builder_preserves_insertion_order() {
        let d = PassDescriptor::transformation("dce")
            .requires("liveness")
            .requires("verify")
            .invalidates("liveness")
            .with_min_opt_level(2);
        assert_eq!(d.requires, vec!["liveness", "verify"]);
        assert_eq!(d.invalidates, vec!["liveness"]);
        assert_eq!(d.min_opt_level, 2);
        assert!(!d.is_analysis());
    }

    #[test]
    fn builder_does_not_deduplicate() {
        let d = PassDescriptor::analysis("a").requires("b").requires("b");
        assert_eq!(d.requires, vec!["b", "b"]);
    }

    #[test]
    fn level_gate() {
        let d = PassDescriptor::analysis("a").with_min_opt_level(2);
        assert!(!d.is_enabled_at(0));
        assert!(!d.is_enabled_at(1));
        assert!(d.is_enabled_at(2));
        assert!(d.is_enabled_at(3));
    }

    #[test]
    fn with_kind_switches_variant() {
        let d = PassDescriptor::transformation("x").with_kind(PassKind::Analysis);
        assert!(d.is_analysis());
    }

    #[test]
    fn closures_are_factories() {
        let factory = |_: &PassContext| -> Box<dyn Pass> { Box::new(Noop) };
        let cx = PassContext {
            name: "noop",
            opt_level: 1,
        };
        let mut pass = factory.create(&cx);
        assert_eq!(pass.run(&mut Module::new()), Ok(false));
    }

    #[test]
    fn pass_error_messages() {
        let e = PassError::Malformed {
            function: "main".into(),
            message: "value %3 defined twice".into(),
        };
        assert_eq!(e.to_string(), "function 'main': value %3 defined twice");
        let e = PassError::MissingAnalysis {
            analysis: "liveness",
        };
        assert_eq!(e.to_string(), "analysis 'liveness' has no cached result");
    }
}
