use std::path::{Path, PathBuf};

use clap::Parser;
use tracing::Level;

use xyopt::pipeline::{
    self, Compiled, PipelineConfig, PipelineError, RunMode, DEFAULT_MAX_ITERATIONS,
};
use xyopt::registry::PassRegistry;

#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
enum Emit {
    /// Optimized IR text
    Ir,
    /// Scheduling trace as JSON
    Trace,
    /// Registered passes
    Passes,
    /// Requirement graph in Graphviz DOT
    Dot,
    /// Build provenance as JSON
    BuildInfo,
}

#[derive(Parser, Debug)]
#[command(
    name = "xyopt",
    version,
    about = "xyopt — runs the pass scheduler over textual SSA IR"
)]
struct Cli {
    /// Input .xy IR file
    source: Option<PathBuf>,

    /// Output file path (stdout if omitted)
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Optimization level
    #[arg(short = 'O', long = "opt-level")]
    opt_level: Option<u32>,

    /// Explicit pass list, comma separated, run in the given order
    #[arg(long, value_delimiter = ',')]
    passes: Vec<String>,

    /// Repeat the pipeline until nothing changes
    #[arg(long)]
    fixed_point: bool,

    /// Iteration cap for fixed-point mode; implies --fixed-point
    #[arg(long)]
    max_iterations: Option<usize>,

    /// Pipeline config file (JSON); flags override its values
    #[arg(long)]
    config: Option<PathBuf>,

    /// Output kind
    #[arg(long, value_enum, default_value_t = Emit::Ir)]
    emit: Emit,

    /// Log scheduling decisions to stderr (-v: runs, -vv: every decision)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,
}

fn main() {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let registry = match xyopt::passes::standard_registry() {
        Ok(r) => r,
        Err(e) => {
            eprintln!("xyopt: error: {}", e);
            std::process::exit(2);
        }
    };

    let config = match build_config(&cli) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("xyopt: error: {}", e);
            std::process::exit(2);
        }
    };

    let text: Result<String, Box<dyn std::error::Error>> = match cli.emit {
        Emit::Passes => Ok(list_passes(&registry)),
        Emit::Dot => xyopt::dot::emit_dot(&registry, Some(config.opt_level)).map_err(Into::into),
        Emit::Ir => Ok(compile_input(&cli, &registry, &config).module.to_string()),
        Emit::Trace => compile_input(&cli, &registry, &config)
            .report
            .trace
            .to_json()
            .map(|j| j + "\n")
            .map_err(Into::into),
        Emit::BuildInfo => compile_input(&cli, &registry, &config)
            .provenance
            .to_json()
            .map(|j| j + "\n")
            .map_err(Into::into),
    };
    match text {
        Ok(text) => write_output(cli.output.as_deref(), &text),
        Err(e) => {
            eprintln!("xyopt: error: {}", e);
            std::process::exit(2);
        }
    }
}

/// Read, parse and optimize the input file. Exits on failure.
fn compile_input(cli: &Cli, registry: &PassRegistry, config: &PipelineConfig) -> Compiled {
    let Some(path) = cli.source.as_deref() else {
        eprintln!("xyopt: error: no input file");
        std::process::exit(2);
    };
    let source = match std::fs::read_to_string(path) {
        Ok(s) => s,
        Err(e) => {
            eprintln!("xyopt: error: {}: {}", path.display(), e);
            std::process::exit(2);
        }
    };

    let compiled = match pipeline::compile(&source, registry, config) {
        Ok(c) => c,
        Err(PipelineError::Parse(diags)) => {
            for d in &diags {
                eprintln!("xyopt: {}:{}", path.display(), d.render(&source));
            }
            std::process::exit(1);
        }
        Err(e) => {
            eprintln!("xyopt: error: {}", e);
            std::process::exit(1);
        }
    };

    if let Some(outcome) = compiled.report.fixed_point {
        if !outcome.converged {
            eprintln!(
                "xyopt: warning: no fixed point after {} iterations",
                outcome.iterations
            );
        }
    }
    compiled
}

fn init_logging(verbosity: u8) {
    let level = match verbosity {
        0 => Level::WARN,
        1 => Level::INFO,
        _ => Level::DEBUG,
    };
    tracing_subscriber::fmt()
        .with_max_level(level)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

/// Config file first, then flags on top.
fn build_config(cli: &Cli) -> Result<PipelineConfig, PipelineError> {
    let mut config = match &cli.config {
        Some(path) => PipelineConfig::load(path)?,
        None => PipelineConfig::default(),
    };
    if let Some(level) = cli.opt_level {
        config.opt_level = level;
    }
    if !cli.passes.is_empty() {
        config.passes = Some(cli.passes.clone());
    }
    let configured_cap = match config.mode {
        RunMode::FixedPoint { max_iterations } => Some(max_iterations),
        RunMode::Once => None,
    };
    if cli.fixed_point || cli.max_iterations.is_some() {
        config.mode = RunMode::FixedPoint {
            max_iterations: cli
                .max_iterations
                .or(configured_cap)
                .unwrap_or(DEFAULT_MAX_ITERATIONS),
        };
    }
    Ok(config)
}

fn list_passes(registry: &PassRegistry) -> String {
    let mut out = String::new();
    for d in registry.descriptors() {
        let requires = if d.requires.is_empty() {
            "-".to_string()
        } else {
            d.requires.join(",")
        };
        let invalidates = if d.invalidates.is_empty() {
            "-".to_string()
        } else {
            d.invalidates.join(",")
        };
        out.push_str(&format!(
            "{:<20} {:<15} O{}  requires={}  invalidates={}\n",
            d.name,
            d.kind.to_string(),
            d.min_opt_level,
            requires,
            invalidates
        ));
    }
    out
}

fn write_output(path: Option<&Path>, text: &str) {
    match path {
        Some(path) => {
            if let Err(e) = std::fs::write(path, text) {
                eprintln!("xyopt: error: {}: {}", path.display(), e);
                std::process::exit(2);
            }
        }
        None => print!("{text}"),
    }
}
