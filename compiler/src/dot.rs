// dot.rs — Graphviz DOT output for a pass registry
//
// One node per registered pass (ellipse = analysis, box = transformation),
// a solid edge from each pass to every pass it requires and a dashed red
// edge to every pass it invalidates. With an optimization level, passes
// gated above it are drawn greyed out.
//
// Preconditions: `registry` is initialized.
// Postconditions: returns a valid DOT string; output is deterministic.
// Failure modes: only errors raised by the `fmt::Write` sink.
// Side effects: none.

use std::fmt::{self, Write};

use crate::id::PassId;
use crate::pass::{OptLevel, PassKind};
use crate::registry::PassRegistry;

/// Emit the registry's requirement and invalidation edges as DOT.
pub fn emit_dot(registry: &PassRegistry, level: Option<OptLevel>) -> Result<String, fmt::Error> {
    let mut buf = String::new();
    write_dot(&mut buf, registry, level)?;
    Ok(buf)
}

/// Stream the DOT text into any formatter sink.
pub fn write_dot(
    out: &mut impl Write,
    registry: &PassRegistry,
    level: Option<OptLevel>,
) -> fmt::Result {
    writeln!(out, "digraph passes {{")?;
    writeln!(out, "    rankdir=BT;")?;
    writeln!(out, "    node [fontname=\"Helvetica\", fontsize=10];")?;
    writeln!(out, "    edge [fontname=\"Helvetica\", fontsize=9];")?;

    writeln!(out)?;
    for id in registry.ids() {
        let d = registry.descriptor(id);
        let shape = match d.kind {
            PassKind::Analysis => "ellipse",
            PassKind::Transformation => "box",
        };
        let label = format!("{}\\nO{}", escape(d.name), d.min_opt_level);
        let gated = level.is_some_and(|l| !d.is_enabled_at(l));
        if gated {
            writeln!(
                out,
                "    {} [label=\"{label}\", shape={shape}, style=dashed, color=gray60, fontcolor=gray60];",
                node_id(id)
            )?;
        } else {
            writeln!(out, "    {} [label=\"{label}\", shape={shape}];", node_id(id))?;
        }
    }

    writeln!(out)?;
    for id in registry.ids() {
        for &req in registry.requirements(id) {
            writeln!(out, "    {} -> {};", node_id(id), node_id(req))?;
        }
        for &target in registry.invalidations(id) {
            writeln!(
                out,
                "    {} -> {} [style=dashed, color=red, constraint=false];",
                node_id(id),
                node_id(target)
            )?;
        }
    }
    writeln!(out, "}}")
}

fn node_id(id: PassId) -> String {
    format!("p{}", id.0)
}

fn escape(name: &str) -> String {
    name.replace('\\', "\\\\").replace('"', "\\\"")
}
