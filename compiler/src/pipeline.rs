// pipeline.rs — Driver: configuration, optimization runs and build provenance
//
// Ties the reader, the registry and the PassManager together. A
// PipelineConfig (from JSON and/or CLI flags) selects the optimization level,
// an optional explicit pass list and the run mode; `optimize` drives one
// PassManager over a Module accordingly and `compile` does the same starting
// from IR text.
//
// Preconditions: the registry is initialized.
// Postconditions: on Ok, the returned Module is the optimized input and the
//   report's trace lists every scheduling decision in order.
// Failure modes: PipelineError (parse diagnostics, unknown pass names, pass
//   failures, unreadable or invalid config files).
// Side effects: `PipelineConfig::load` reads the filesystem.

use std::path::{Path, PathBuf};
use std::time::Instant;

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::diag::Diagnostic;
use crate::ir::Module;
use crate::pass::OptLevel;
use crate::registry::{ConfigError, PassRegistry};
use crate::scheduler::{FixedPointOutcome, PassManager, ScheduleError};
use crate::trace::Trace;

pub const DEFAULT_OPT_LEVEL: OptLevel = 1;
pub const DEFAULT_MAX_ITERATIONS: usize = 16;

// ── Errors ──────────────────────────────────────────────────────────────────

#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error("input has {} error(s)", .0.len())]
    Parse(Vec<Diagnostic>),
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Schedule(#[from] ScheduleError),
    #[error("{}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid pipeline config: {0}")]
    Json(#[from] serde_json::Error),
}

// ── Configuration ───────────────────────────────────────────────────────────

/// How the selected passes are driven.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RunMode {
    /// One top-to-bottom run.
    #[default]
    Once,
    /// Repeat until nothing changes or the cap is hit.
    FixedPoint {
        #[serde(default = "default_max_iterations")]
        max_iterations: usize,
    },
}

fn default_max_iterations() -> usize {
    DEFAULT_MAX_ITERATIONS
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PipelineConfig {
    pub opt_level: OptLevel,
    /// Explicit pass list. `None` runs every pass enabled at `opt_level`, in
    /// registration order.
    pub passes: Option<Vec<String>>,
    pub mode: RunMode,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            opt_level: DEFAULT_OPT_LEVEL,
            passes: None,
            mode: RunMode::Once,
        }
    }
}

impl PipelineConfig {
    pub fn from_json(text: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(text)
    }

    pub fn load(path: &Path) -> Result<Self, PipelineError> {
        let text = std::fs::read_to_string(path).map_err(|source| PipelineError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Ok(Self::from_json(&text)?)
    }
}

// ── Optimization ────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OptimizeReport {
    /// Whether any executed pass reported a change.
    pub changed: bool,
    /// Set in fixed-point mode.
    pub fixed_point: Option<FixedPointOutcome>,
    pub trace: Trace,
}

/// Run the configured passes over `module`.
pub fn optimize(
    module: &mut Module,
    registry: &PassRegistry,
    config: &PipelineConfig,
) -> Result<OptimizeReport, PipelineError> {
    let started = Instant::now();
    let mut pm = PassManager::new(registry, config.opt_level);

    let (changed, fixed_point) = match (&config.passes, config.mode) {
        (None, RunMode::Once) => (pm.run_once(module)?, None),
        (Some(names), RunMode::Once) => (pm.run_list(module, names)?, None),
        (None, RunMode::FixedPoint { max_iterations }) => {
            let outcome = pm.run_to_fixed_point(module, max_iterations)?;
            (outcome_changed(outcome), Some(outcome))
        }
        (Some(names), RunMode::FixedPoint { max_iterations }) => {
            let outcome = pm.run_list_to_fixed_point(module, names, max_iterations)?;
            (outcome_changed(outcome), Some(outcome))
        }
    };

    let trace = pm.take_trace();
    info!(
        opt_level = config.opt_level,
        executed = trace.executed().len(),
        changed,
        elapsed_us = started.elapsed().as_micros() as u64,
        "optimization finished"
    );
    Ok(OptimizeReport {
        changed,
        fixed_point,
        trace,
    })
}

/// Every iteration but a converged last one reported a change.
fn outcome_changed(outcome: FixedPointOutcome) -> bool {
    outcome.iterations > 1 || (outcome.iterations == 1 && !outcome.converged)
}

// ── Provenance ──────────────────────────────────────────────────────────────

/// Provenance metadata for `--emit build-info`.
///
/// `source_hash`: SHA-256 of the raw input text.
/// `output_hash`: SHA-256 of the printed optimized module.
/// `registry_fingerprint`: SHA-256 of `PassRegistry::canonical_json()`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Provenance {
    pub source_hash: [u8; 32],
    pub output_hash: [u8; 32],
    pub registry_fingerprint: [u8; 32],
    pub opt_level: OptLevel,
    pub compiler_version: &'static str,
}

#[derive(Serialize)]
struct ProvenanceJson<'a> {
    source_hash: String,
    output_hash: String,
    registry_fingerprint: String,
    opt_level: OptLevel,
    compiler_version: &'a str,
}

impl Provenance {
    pub fn source_hash_hex(&self) -> String {
        bytes_to_hex(&self.source_hash)
    }

    pub fn output_hash_hex(&self) -> String {
        bytes_to_hex(&self.output_hash)
    }

    pub fn registry_fingerprint_hex(&self) -> String {
        bytes_to_hex(&self.registry_fingerprint)
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(&ProvenanceJson {
            source_hash: self.source_hash_hex(),
            output_hash: self.output_hash_hex(),
            registry_fingerprint: self.registry_fingerprint_hex(),
            opt_level: self.opt_level,
            compiler_version: self.compiler_version,
        })
    }
}

fn bytes_to_hex(bytes: &[u8; 32]) -> String {
    use std::fmt::Write;
    let mut s = String::with_capacity(64);
    for b in bytes {
        let _ = write!(s, "{b:02x}");
    }
    s
}

fn sha256(data: &[u8]) -> [u8; 32] {
    use sha2::{Digest, Sha256};
    let mut hasher = Sha256::new();
    hasher.update(data);
    let mut hash = [0u8; 32];
    hash.copy_from_slice(&hasher.finalize());
    hash
}

pub fn compute_provenance(
    source: &str,
    output: &Module,
    registry: &PassRegistry,
    opt_level: OptLevel,
) -> Result<Provenance, serde_json::Error> {
    Ok(Provenance {
        source_hash: sha256(source.as_bytes()),
        output_hash: sha256(output.to_string().as_bytes()),
        registry_fingerprint: sha256(registry.canonical_json()?.as_bytes()),
        opt_level,
        compiler_version: env!("CARGO_PKG_VERSION"),
    })
}

// ── Whole pipeline ──────────────────────────────────────────────────────────

#[derive(Debug)]
pub struct Compiled {
    pub module: Module,
    pub report: OptimizeReport,
    pub provenance: Provenance,
}

/// Parse `source`, optimize it and compute provenance.
pub fn compile(
    source: &str,
    registry: &PassRegistry,
    config: &PipelineConfig,
) -> Result<Compiled, PipelineError> {
    let parsed = crate::parser::parse(source);
    let Some(mut module) = parsed.module else {
        return Err(PipelineError::Parse(parsed.diagnostics));
    };
    debug!(
        functions = module.functions.len(),
        insts = module.inst_count(),
        "parsed module"
    );

    let report = optimize(&mut module, registry, config)?;
    let provenance = compute_provenance(source, &module, registry, config.opt_level)?;
    Ok(Compiled {
        module,
        report,
        provenance,
    })
}

// ── Tests ──────────────────────────────────────────────────────────────────
