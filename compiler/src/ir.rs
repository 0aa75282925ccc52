// ir.rs — Minimal SSA module handed to the pass scheduler
//
// The scheduler treats a Module as opaque and only forwards it to passes.
// This module gives the standard passes something real to work on: functions
// made of labelled basic blocks, three-address instructions over SSA values,
// and an explicit terminator per block.
//
// Preconditions: none (data-only module).
// Postconditions: `Display` output is deterministic and re-parses to an equal Module.
// Failure modes: none.
// Side effects: none.

use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::fmt;

use crate::id::ValueId;

// ── Operands and operations ────────────────────────────────────────────────

/// An instruction or terminator input: an SSA value or an immediate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operand {
    Value(ValueId),
    Imm(i64),
}

impl Operand {
    pub fn as_value(&self) -> Option<ValueId> {
        match self {
            Operand::Value(v) => Some(*v),
            Operand::Imm(_) => None,
        }
    }

    pub fn as_imm(&self) -> Option<i64> {
        match self {
            Operand::Imm(n) => Some(*n),
            Operand::Value(_) => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BinOp {
    Add,
    Sub,
    Mul,
    Div,
    Eq,
    Lt,
}

impl BinOp {
    pub fn mnemonic(self) -> &'static str {
        match self {
            BinOp::Add => "add",
            BinOp::Sub => "sub",
            BinOp::Mul => "mul",
            BinOp::Div => "div",
            BinOp::Eq => "eq",
            BinOp::Lt => "lt",
        }
    }

    /// Evaluate on immediates. Arithmetic wraps; division by zero and
    /// `i64::MIN / -1` have no compile-time value.
    pub fn eval(self, lhs: i64, rhs: i64) -> Option<i64> {
        match self {
            BinOp::Add => Some(lhs.wrapping_add(rhs)),
            BinOp::Sub => Some(lhs.wrapping_sub(rhs)),
            BinOp::Mul => Some(lhs.wrapping_mul(rhs)),
            BinOp::Div => lhs.checked_div(rhs),
            BinOp::Eq => Some((lhs == rhs) as i64),
            BinOp::Lt => Some((lhs < rhs) as i64),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Op {
    Const(i64),
    Copy(Operand),
    Binary(BinOp, Operand, Operand),
}

impl Op {
    pub fn operands(&self) -> Vec<Operand> {
        match self {
            Op::Const(_) => Vec::new(),
            Op::Copy(src) => vec![*src],
            Op::Binary(_, lhs, rhs) => vec![*lhs, *rhs],
        }
    }

    pub fn operands_mut(&mut self) -> Vec<&mut Operand> {
        match self {
            Op::Const(_) => Vec::new(),
            Op::Copy(src) => vec![src],
            Op::Binary(_, lhs, rhs) => vec![lhs, rhs],
        }
    }
}

/// `dest = op`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Inst {
    pub dest: ValueId,
    pub op: Op,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Terminator {
    Ret(Operand),
    Jmp(String),
    Br(Operand, String, String),
}

impl Terminator {
    pub fn operands(&self) -> Vec<Operand> {
        match self {
            Terminator::Ret(v) | Terminator::Br(v, _, _) => vec![*v],
            Terminator::Jmp(_) => Vec::new(),
        }
    }

    pub fn operands_mut(&mut self) -> Vec<&mut Operand> {
        match self {
            Terminator::Ret(v) | Terminator::Br(v, _, _) => vec![v],
            Terminator::Jmp(_) => Vec::new(),
        }
    }

    pub fn successors(&self) -> Vec<&str> {
        match self {
            Terminator::Ret(_) => Vec::new(),
            Terminator::Jmp(target) => vec![target.as_str()],
            Terminator::Br(_, then_label, else_label) => {
                vec![then_label.as_str(), else_label.as_str()]
            }
        }
    }
}

// ── Blocks, functions, module ──────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Block {
    pub label: String,
    pub insts: Vec<Inst>,
    pub term: Terminator,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Function {
    pub name: String,
    pub params: Vec<ValueId>,
    pub blocks: Vec<Block>,
}

impl Function {
    pub fn inst_count(&self) -> usize {
        self.blocks.iter().map(|b| b.insts.len()).sum()
    }

    pub fn block(&self, label: &str) -> Option<&Block> {
        self.blocks.iter().find(|b| b.label == label)
    }
}

/// The unit of optimization. Analysis results computed by passes live in
/// `analyses` and are not part of the module's identity or printed form.
#[derive(Default)]
pub struct Module {
    pub functions: Vec<Function>,
    pub analyses: AnalysisCache,
}

impl Module {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_functions(functions: Vec<Function>) -> Self {
        Self {
            functions,
            analyses: AnalysisCache::default(),
        }
    }

    pub fn function(&self, name: &str) -> Option<&Function> {
        self.functions.iter().find(|f| f.name == name)
    }

    pub fn inst_count(&self) -> usize {
        self.functions.iter().map(Function::inst_count).sum()
    }
}

/// Cloning a module drops its cached analyses: the copy has not been analyzed.
impl Clone for Module {
    fn clone(&self) -> Self {
        Self::from_functions(self.functions.clone())
    }
}

impl PartialEq for Module {
    fn eq(&self, other: &Self) -> bool {
        self.functions == other.functions
    }
}

impl Eq for Module {}

impl fmt::Debug for Module {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Module")
            .field("functions", &self.functions)
            .field("cached_analyses", &self.analyses.len())
            .finish()
    }
}

// ── Analysis cache ─────────────────────────────────────────────────────────

/// Type-keyed side table holding one cached result per analysis type.
#[derive(Default)]
pub struct AnalysisCache {
    entries: HashMap<TypeId, Box<dyn Any>>,
}

impl AnalysisCache {
    /// Store `value`, returning the previous result of the same type.
    pub fn insert<T: Any>(&mut self, value: T) -> Option<T> {
        self.entries
            .insert(TypeId::of::<T>(), Box::new(value))
            .and_then(|old| old.downcast::<T>().ok())
            .map(|old| *old)
    }

    pub fn get<T: Any>(&self) -> Option<&T> {
        self.entries
            .get(&TypeId::of::<T>())
            .and_then(|v| v.downcast_ref::<T>())
    }

    pub fn remove<T: Any>(&mut self) -> Option<T> {
        self.entries
            .remove(&TypeId::of::<T>())
            .and_then(|old| old.downcast::<T>().ok())
            .map(|old| *old)
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

// ── Text form ──────────────────────────────────────────────────────────────

impl fmt::Display for Operand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Operand::Value(v) => write!(f, "{v}"),
            Operand::Imm(n) => write!(f, "{n}"),
        }
    }
}

impl fmt::Display for Inst {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.op {
            Op::Const(n) => write!(f, "{} = const {}", self.dest, n),
            Op::Copy(src) => write!(f, "{} = copy {}", self.dest, src),
            Op::Binary(op, lhs, rhs) => {
                write!(f, "{} = {} {}, {}", self.dest, op.mnemonic(), lhs, rhs)
            }
        }
    }
}

impl fmt::Display for Terminator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Terminator::Ret(v) => write!(f, "ret {v}"),
            Terminator::Jmp(target) => write!(f, "jmp {target}"),
            Terminator::Br(cond, then_label, else_label) => {
                write!(f, "br {cond}, {then_label}, {else_label}")
            }
        }
    }
}

impl fmt::Display for Block {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "{}:", self.label)?;
        for inst in &self.insts {
            writeln!(f, "  {inst}")?;
        }
        writeln!(f, "  {}", self.term)
    }
}

impl fmt::Display for Function {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let params: Vec<String> = self.params.iter().map(|p| p.to_string()).collect();
        writeln!(f, "fn {}({}) {{", self.name, params.join(", "))?;
        for block in &self.blocks {
            write!(f, "{block}")?;
        }
        writeln!(f, "}}")
    }
}

impl fmt::Display for Module {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, func) in self.functions.iter().enumerate() {
            if i > 0 {
                writeln!(f)?;
            }
            write!(f, "{func}")?;
        }
        Ok(())
    }
}

// ── Tests ──────────────────────────────────────────────────────────────────
