// passes.rs — The standard pass set and its registration function
//
// Two analyses (`verify`, `liveness`) and four transformations. Every
// transformation invalidates `verify`; `liveness` requires `verify`, so the
// requirement graph carries that invalidation on to `liveness` as well.
//
// Preconditions: `verify` is the first pass to touch a freshly parsed module
//   (every other pass requires it directly or transitively).
// Postconditions: a transformation leaves a verified module verified.
// Failure modes: `verify` rejects malformed modules; `dead-code-elim` fails
//   if no liveness result is cached.
// Side effects: analyses write their result into `Module::analyses`.

use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};

use crate::id::ValueId;
use crate::ir::{BinOp, Function, Module, Op, Operand, Terminator};
use crate::pass::{Pass, PassContext, PassDescriptor, PassError};
use crate::registry::{ConfigError, PassRegistry, RegistryBuilder};

pub const VERIFY: &str = "verify";
pub const LIVENESS: &str = "liveness";
pub const CONST_FOLD: &str = "const-fold";
pub const SIMPLIFY_BRANCHES: &str = "simplify-branches";
pub const ALGEBRAIC_SIMPLIFY: &str = "algebraic-simplify";
pub const DEAD_CODE_ELIM: &str = "dead-code-elim";

// ── Registration ────────────────────────────────────────────────────────────

fn boxed<P: Pass + Default + 'static>(_: &PassContext) -> Box<dyn Pass> {
    Box::<P>::default()
}

/// Register every standard pass, in a fixed order.
pub fn register_standard_passes(builder: &mut RegistryBuilder) -> Result<(), ConfigError> {
    builder
        .register(PassDescriptor::analysis(VERIFY), boxed::<Verify>)?
        .register(
            PassDescriptor::analysis(LIVENESS).requires(VERIFY),
            boxed::<ComputeLiveness>,
        )?
        .register(
            PassDescriptor::transformation(CONST_FOLD)
                .with_min_opt_level(1)
                .requires(VERIFY)
                .invalidates(VERIFY),
            boxed::<ConstFold>,
        )?
        .register(
            PassDescriptor::transformation(SIMPLIFY_BRANCHES)
                .with_min_opt_level(2)
                .requires(VERIFY)
                .invalidates(VERIFY),
            boxed::<SimplifyBranches>,
        )?
        .register(
            PassDescriptor::transformation(ALGEBRAIC_SIMPLIFY)
                .with_min_opt_level(2)
                .requires(VERIFY)
                .invalidates(VERIFY),
            boxed::<AlgebraicSimplify>,
        )?
        .register(
            PassDescriptor::transformation(DEAD_CODE_ELIM)
                .with_min_opt_level(1)
                .requires(LIVENESS)
                .invalidates(VERIFY),
            boxed::<DeadCodeElim>,
        )?;
    Ok(())
}

/// An initialized registry holding exactly the standard passes.
pub fn standard_registry() -> Result<PassRegistry, ConfigError> {
    let mut builder = RegistryBuilder::new();
    register_standard_passes(&mut builder)?;
    builder.initialize()
}

// ── verify ──────────────────────────────────────────────────────────────────

/// Cached by `verify` once the module passed its checks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Verified;

#[derive(Debug, Default)]
pub struct Verify;

impl Pass for Verify {
    fn run(&mut self, module: &mut Module) -> Result<bool, PassError> {
        module.analyses.remove::<Verified>();
        let mut names = HashSet::new();
        for func in &module.functions {
            if !names.insert(func.name.as_str()) {
                return Err(malformed(func, "function defined more than once"));
            }
            verify_function(func)?;
        }
        module.analyses.insert(Verified);
        Ok(false)
    }
}

fn malformed(func: &Function, message: impl Into<String>) -> PassError {
    PassError::Malformed {
        function: func.name.clone(),
        message: message.into(),
    }
}

fn verify_function(func: &Function) -> Result<(), PassError> {
    if func.blocks.is_empty() {
        return Err(malformed(func, "function has no blocks"));
    }

    let mut labels = HashSet::new();
    for block in &func.blocks {
        if !labels.insert(block.label.as_str()) {
            return Err(malformed(
                func,
                format!("block label '{}' used more than once", block.label),
            ));
        }
    }

    let mut defined = HashSet::new();
    let dests = func
        .blocks
        .iter()
        .flat_map(|b| &b.insts)
        .map(|inst| inst.dest);
    for value in func.params.iter().copied().chain(dests) {
        if !defined.insert(value) {
            return Err(malformed(func, format!("value {value} defined more than once")));
        }
    }

    for block in &func.blocks {
        let uses = block
            .insts
            .iter()
            .flat_map(|inst| inst.op.operands())
            .chain(block.term.operands())
            .filter_map(|operand| operand.as_value());
        for value in uses {
            if !defined.contains(&value) {
                return Err(malformed(
                    func,
                    format!("use of undefined value {value} in block '{}'", block.label),
                ));
            }
        }
        for target in block.term.successors() {
            if !labels.contains(target) {
                return Err(malformed(
                    func,
                    format!("block '{}' jumps to unknown block '{target}'", block.label),
                ));
            }
        }
    }
    Ok(())
}

// ── liveness ────────────────────────────────────────────────────────────────

/// Values each function's terminators depend on, directly or through the
/// instructions that define them.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Liveness {
    live: BTreeMap<String, BTreeSet<ValueId>>,
}

impl Liveness {
    pub fn compute(module: &Module) -> Self {
        let live = module
            .functions
            .iter()
            .map(|f| (f.name.clone(), live_values(f)))
            .collect();
        Self { live }
    }

    pub fn live_values(&self, function: &str) -> Option<&BTreeSet<ValueId>> {
        self.live.get(function)
    }

    /// Unknown functions have no live values.
    pub fn is_live(&self, function: &str, value: ValueId) -> bool {
        self.live
            .get(function)
            .is_some_and(|values| values.contains(&value))
    }
}

fn live_values(func: &Function) -> BTreeSet<ValueId> {
    let defs: HashMap<ValueId, &Op> = func
        .blocks
        .iter()
        .flat_map(|b| &b.insts)
        .map(|inst| (inst.dest, &inst.op))
        .collect();

    let mut live = BTreeSet::new();
    let mut work: Vec<ValueId> = func
        .blocks
        .iter()
        .flat_map(|b| b.term.operands())
        .filter_map(|o| o.as_value())
        .collect();
    while let Some(value) = work.pop() {
        if !live.insert(value) {
            continue;
        }
        if let Some(op) = defs.get(&value) {
            work.extend(op.operands().into_iter().filter_map(|o| o.as_value()));
        }
    }
    live
}

#[derive(Debug, Default)]
pub struct ComputeLiveness;

impl Pass for ComputeLiveness {
    fn run(&mut self, module: &mut Module) -> Result<bool, PassError> {
        let liveness = Liveness::compute(module);
        module.analyses.insert(liveness);
        Ok(false)
    }
}

// ── const-fold ──────────────────────────────────────────────────────────────

/// Folds binary operations on immediates and propagates constants into
/// their uses until nothing more folds.
#[derive(Debug, Default)]
pub struct ConstFold;

impl Pass for ConstFold {
    fn run(&mut self, module: &mut Module) -> Result<bool, PassError> {
        let mut changed = false;
        for func in &mut module.functions {
            changed |= fold_function(func);
        }
        Ok(changed)
    }
}

fn fold_function(func: &mut Function) -> bool {
    let mut changed = false;
    loop {
        let known: HashMap<ValueId, i64> = func
            .blocks
            .iter()
            .flat_map(|b| &b.insts)
            .filter_map(|inst| match inst.op {
                Op::Const(n) | Op::Copy(Operand::Imm(n)) => Some((inst.dest, n)),
                _ => None,
            })
            .collect();

        let mut round = false;
        for block in &mut func.blocks {
            for inst in &mut block.insts {
                round |= substitute(inst.op.operands_mut(), &known);
                let folded = match inst.op {
                    Op::Binary(op, Operand::Imm(lhs), Operand::Imm(rhs)) => op.eval(lhs, rhs),
                    Op::Copy(Operand::Imm(n)) => Some(n),
                    _ => None,
                };
                if let Some(n) = folded {
                    inst.op = Op::Const(n);
                    round = true;
                }
            }
            round |= substitute(block.term.operands_mut(), &known);
        }

        if !round {
            return changed;
        }
        changed = true;
    }
}

fn substitute(operands: Vec<&mut Operand>, known: &HashMap<ValueId, i64>) -> bool {
    let mut changed = false;
    for operand in operands {
        if let Operand::Value(v) = *operand {
            if let Some(&n) = known.get(&v) {
                *operand = Operand::Imm(n);
                changed = true;
            }
        }
    }
    changed
}

// ── simplify-branches ───────────────────────────────────────────────────────

/// `br` on an immediate, or with identical targets, becomes `jmp`.
#[derive(Debug, Default)]
pub struct SimplifyBranches;

impl Pass for SimplifyBranches {
    fn run(&mut self, module: &mut Module) -> Result<bool, PassError> {
        let mut changed = false;
        for block in module.functions.iter_mut().flat_map(|f| &mut f.blocks) {
            let target = match &block.term {
                Terminator::Br(Operand::Imm(cond), then_label, else_label) => {
                    let taken = if *cond != 0 { then_label } else { else_label };
                    Some(taken.clone())
                }
                Terminator::Br(_, then_label, else_label) if then_label == else_label => {
                    Some(then_label.clone())
                }
                _ => None,
            };
            if let Some(target) = target {
                block.term = Terminator::Jmp(target);
                changed = true;
            }
        }
        Ok(changed)
    }
}

// ── algebraic-simplify ──────────────────────────────────────────────────────

#[derive(Debug, Default)]
pub struct AlgebraicSimplify;

impl Pass for AlgebraicSimplify {
    fn run(&mut self, module: &mut Module) -> Result<bool, PassError> {
        let mut changed = false;
        let insts = module
            .functions
            .iter_mut()
            .flat_map(|f| &mut f.blocks)
            .flat_map(|b| &mut b.insts);
        for inst in insts {
            if let Some(op) = simplify(&inst.op) {
                inst.op = op;
                changed = true;
            }
        }
        Ok(changed)
    }
}

fn simplify(op: &Op) -> Option<Op> {
    let Op::Binary(bin, lhs, rhs) = *op else {
        return None;
    };
    use Operand::{Imm, Value};
    match (bin, lhs, rhs) {
        (BinOp::Add, x, Imm(0))
        | (BinOp::Add, Imm(0), x)
        | (BinOp::Sub, x, Imm(0))
        | (BinOp::Mul, x, Imm(1))
        | (BinOp::Mul, Imm(1), x) => Some(Op::Copy(x)),
        (BinOp::Mul, _, Imm(0)) | (BinOp::Mul, Imm(0), _) => Some(Op::Const(0)),
        (BinOp::Sub, Value(a), Value(b)) if a == b => Some(Op::Const(0)),
        _ => None,
    }
}

// ── dead-code-elim ──────────────────────────────────────────────────────────

/// Drops instructions whose result is not live. Reads the cached Liveness.
#[derive(Debug, Default)]
pub struct DeadCodeElim;

impl Pass for DeadCodeElim {
    fn run(&mut self, module: &mut Module) -> Result<bool, PassError> {
        let Module {
            functions,
            analyses,
        } = module;
        let liveness = analyses
            .get::<Liveness>()
            .ok_or(PassError::MissingAnalysis {
                analysis: LIVENESS,
            })?;

        let mut changed = false;
        for func in functions.iter_mut() {
            let Some(live) = liveness.live_values(&func.name) else {
                continue;
            };
            for block in &mut func.blocks {
                let before = block.insts.len();
                block.insts.retain(|inst| live.contains(&inst.dest));
                changed |= block.insts.len() != before;
            }
        }
        Ok(changed)
    }
}

// ── Tests ──────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::parse;
    use crate::scheduler::PassManager;

    fn module(src: &str) -> Module {
        let result = parse(src);
        assert!(result.diagnostics.is_empty(), "{:?}", result.diagnostics);
        result.module.unwrap()
    }

    fn run<P: Pass>(mut pass: P, src: &str) -> (bool, Module) {
        let mut m = module(src);
        let changed = pass.run(&mut m).unwrap();
        (changed, m)
    }

    #[test]
    fn registration_table() {
        let registry = standard_registry().unwrap();
        let rows: Vec<_> = registry
            .descriptors()
            .map(|d| (d.name, d.is_analysis(), d.min_opt_level))
            .collect();
        assert_eq!(
            rows,
            vec![
                (VERIFY, true, 0),
                (LIVENESS, true, 0),
                (CONST_FOLD, false, 1),
                (SIMPLIFY_BRANCHES, false, 2),
                (ALGEBRAIC_SIMPLIFY, false, 2),
                (DEAD_CODE_ELIM, false, 1),
            ]
        );
        let verify = registry.id(VERIFY).unwrap();
        let liveness = registry.id(LIVENESS).unwrap();
        assert!(registry
            .requirement_graph()
            .transitive_dependents(verify)
            .contains(&liveness));
    }

    #[test]
    fn verify_accepts_well_formed_module() {
        let (changed, m) = run(Verify, "fn f(%0) {\nentry:\n  %1 = add %0, 1\n  ret %1\n}\n");
        assert!(!changed);
        assert_eq!(m.analyses.get::<Verified>(), Some(&Verified));
    }

    #[test]
    fn verify_rejects_double_definition() {
        let mut m = module("fn f(%0) {\nentry:\n  %0 = const 1\n  ret %0\n}\n");
        let err = Verify.run(&mut m).unwrap_err();
        assert_eq!(
            err,
            PassError::Malformed {
                function: "f".into(),
                message: "value %0 defined more than once".into()
            }
        );
        assert!(m.analyses.get::<Verified>().is_none());
    }

    #[test]
    fn verify_rejects_undefined_use_and_bad_target() {
        let mut m = module("fn f() {\nentry:\n  ret %4\n}\n");
        assert!(Verify.run(&mut m).unwrap_err().to_string().contains("undefined value %4"));

        let mut m = module("fn f() {\nentry:\n  jmp nowhere\n}\n");
        assert!(Verify.run(&mut m).unwrap_err().to_string().contains("unknown block 'nowhere'"));
    }

    #[test]
    fn verify_rejects_duplicate_labels_and_functions() {
        let mut m = module("fn f() {\na:\n  jmp a\na:\n  ret 0\n}\n");
        assert!(Verify.run(&mut m).unwrap_err().to_string().contains("label 'a'"));

        let mut m = module("fn f() {\na:\n  ret 0\n}\nfn f() {\na:\n  ret 1\n}\n");
        assert!(Verify
            .run(&mut m)
            .unwrap_err()
            .to_string()
            .contains("defined more than once"));
    }

    #[test]
    fn liveness_follows_definitions_from_terminators() {
        let m = module(
            "fn f(%0) {\nentry:\n  %1 = add %0, 1\n  %2 = mul %1, 2\n  %3 = const 9\n  ret %2\n}\n",
        );
        let live = Liveness::compute(&m);
        let values: Vec<_> = live.live_values("f").unwrap().iter().copied().collect();
        assert_eq!(values, vec![ValueId(0), ValueId(1), ValueId(2)]);
        assert!(!live.is_live("f", ValueId(3)));
        assert!(!live.is_live("g", ValueId(0)));
    }

    #[test]
    fn const_fold_chains() {
        let (changed, m) = run(
            ConstFold,
            "fn f() {\nentry:\n  %0 = const 6\n  %1 = mul %0, 7\n  %2 = sub %1, 2\n  ret %2\n}\n",
        );
        assert!(changed);
        assert_eq!(
            m.to_string(),
            "fn f() {\nentry:\n  %0 = const 6\n  %1 = const 42\n  %2 = const 40\n  ret 40\n}\n"
        );
    }

    #[test]
    fn const_fold_leaves_division_by_zero() {
        let (changed, m) = run(ConstFold, "fn f() {\nentry:\n  %0 = div 1, 0\n  ret %0\n}\n");
        assert!(!changed);
        assert_eq!(
            m.functions[0].blocks[0].insts[0].op,
            Op::Binary(BinOp::Div, Operand::Imm(1), Operand::Imm(0))
        );
    }

    #[test]
    fn const_fold_is_stable() {
        let (_, mut m) = run(
            ConstFold,
            "fn f(%0) {\nentry:\n  %1 = copy 3\n  %2 = add %0, %1\n  ret %2\n}\n",
        );
        assert_eq!(
            m.to_string(),
            "fn f(%0) {\nentry:\n  %1 = const 3\n  %2 = add %0, 3\n  ret %2\n}\n"
        );
        assert!(!ConstFold.run(&mut m).unwrap());
    }

    #[test]
    fn branches_on_immediates_become_jumps() {
        let (changed, m) = run(
            SimplifyBranches,
            "fn f(%0) {\nentry:\n  br 0, a, b\na:\n  br %0, b, b\nb:\n  ret 0\n}\n",
        );
        assert!(changed);
        assert_eq!(m.functions[0].blocks[0].term, Terminator::Jmp("b".into()));
        assert_eq!(m.functions[0].blocks[1].term, Terminator::Jmp("b".into()));
    }

    #[test]
    fn algebraic_identities() {
        let (changed, m) = run(
            AlgebraicSimplify,
            "fn f(%0) {\nentry:\n  %1 = add %0, 0\n  %2 = mul 1, %1\n  %3 = mul %2, 0\n  %4 = sub %0, %0\n  %5 = sub %0, 1\n  ret %5\n}\n",
        );
        assert!(changed);
        let ops: Vec<_> = m.functions[0].blocks[0]
            .insts
            .iter()
            .map(|i| i.op.clone())
            .collect();
        assert_eq!(
            ops,
            vec![
                Op::Copy(Operand::Value(ValueId(0))),
                Op::Copy(Operand::Value(ValueId(1))),
                Op::Const(0),
                Op::Const(0),
                Op::Binary(BinOp::Sub, Operand::Value(ValueId(0)), Operand::Imm(1)),
            ]
        );
    }

    #[test]
    fn dead_code_elim_needs_liveness() {
        let mut m = module("fn f() {\nentry:\n  ret 0\n}\n");
        assert_eq!(
            DeadCodeElim.run(&mut m),
            Err(PassError::MissingAnalysis {
                analysis: LIVENESS
            })
        );
    }

    #[test]
    fn dead_code_elim_removes_unused_values() {
        let mut m = module("fn f(%0) {\nentry:\n  %1 = const 1\n  %2 = add %0, %0\n  ret %2\n}\n");
        ComputeLiveness.run(&mut m).unwrap();
        assert!(DeadCodeElim.run(&mut m).unwrap());
        assert_eq!(m.to_string(), "fn f(%0) {\nentry:\n  %2 = add %0, %0\n  ret %2\n}\n");
    }

    #[test]
    fn o1_pipeline_folds_and_cleans_up() {
        let registry = standard_registry().unwrap();
        let mut m = module(
            "fn f() {\nentry:\n  %0 = const 2\n  %1 = add %0, 3\n  %2 = mul %1, 4\n  ret %2\n}\n",
        );
        let mut pm = PassManager::new(&registry, 1);
        assert!(pm.run_once(&mut m).unwrap());
        assert_eq!(m.to_string(), "fn f() {\nentry:\n  ret 20\n}\n");
        assert_eq!(
            pm.trace().executed(),
            vec![VERIFY, LIVENESS, CONST_FOLD, VERIFY, LIVENESS, DEAD_CODE_ELIM]
        );
    }
}
