// xyopt — pass scheduling engine for a small SSA IR
//
// Library root. Reader (lexer, parser, ir), scheduling core (pass, registry,
// graph, validity, scheduler, trace), the standard pass set and the driver.

pub mod diag;
pub mod dot;
pub mod graph;
pub mod id;
pub mod ir;
pub mod lexer;
pub mod parser;
pub mod pass;
pub mod passes;
pub mod pipeline;
pub mod registry;
pub mod scheduler;
pub mod trace;
pub mod validity;
