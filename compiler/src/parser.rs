// Parser for the textual IR form.
//
// Parses a token stream (from the lexer) into an `ir::Module`. Uses chumsky
// combinators. Grammar:
//
//   module   := nl* (function nl*)*
//   function := 'fn' IDENT '(' (VALUE (',' VALUE)*)? ')' '{' nl* block+ '}'
//   block    := IDENT ':' nl+ (inst nl+)* term nl+
//   inst     := VALUE '=' ('const' INT | 'copy' operand | BINOP operand ',' operand)
//   term     := 'ret' operand | 'jmp' IDENT | 'br' operand ',' IDENT ',' IDENT
//   operand  := VALUE | INT
//
// Preconditions: none.
// Postconditions: returns a Module plus diagnostics; the Module is `None` when
//   the input could not be parsed. Structural SSA rules are not checked here
//   (that is the `verify` pass's job).
// Failure modes: lex and syntax errors become E0001 / E0002 diagnostics.
// Side effects: none.

use chumsky::input::{Stream, ValueInput};
use chumsky::prelude::*;
use chumsky::span::SimpleSpan;

use crate::diag::{codes, DiagLevel, Diagnostic};
use crate::id::ValueId;
use crate::ir::{BinOp, Block, Function, Inst, Module, Op, Operand, Terminator};
use crate::lexer::Token;

/// Result of parsing: module plus any diagnostics.
#[derive(Debug)]
pub struct ParseResult {
    pub module: Option<Module>,
    pub diagnostics: Vec<Diagnostic>,
}

/// Parse IR text. Lexes then parses.
pub fn parse(source: &str) -> ParseResult {
    let lex_result = crate::lexer::lex(source);
    let len = source.len();

    let token_iter = lex_result.tokens.into_iter().map(|(tok, span)| {
        let cspan: SimpleSpan = (span.start..span.end).into();
        (tok, cspan)
    });
    let eoi: SimpleSpan = (len..len).into();
    let stream = Stream::from_iter(token_iter).map(eoi, |(t, s): (_, _)| (t, s));

    let parser = module_parser(source);
    let (module, parse_errors) = parser.parse(stream).into_output_errors();

    let mut diagnostics: Vec<Diagnostic> = lex_result
        .errors
        .into_iter()
        .map(|e| {
            let span: SimpleSpan = (e.span.start..e.span.end).into();
            Diagnostic::new(DiagLevel::Error, span, e.message).with_code(codes::E0001)
        })
        .collect();
    diagnostics.extend(parse_errors.into_iter().map(|e| {
        Diagnostic::new(DiagLevel::Error, *e.span(), e.to_string()).with_code(codes::E0002)
    }));

    // A module recovered around lex errors would silently miss whatever the
    // bad characters stood for.
    let module = if diagnostics.is_empty() { module } else { None };

    ParseResult {
        module,
        diagnostics,
    }
}

// ── Main parser builder ──
//
// All grammar rules are built inside `module_parser` so that the `source`
// reference is captured once and shared by all combinators.

fn module_parser<'tokens, 'src: 'tokens, I>(
    source: &'src str,
) -> impl Parser<'tokens, I, Module, extra::Err<Rich<'tokens, Token, SimpleSpan>>> + 'src
where
    'tokens: 'src,
    I: ValueInput<'tokens, Token = Token, Span = SimpleSpan>,
{
    let nl = just(Token::Newline).repeated().ignored();
    let nl1 = just(Token::Newline).repeated().at_least(1).ignored();

    // ── Leaves ──

    let ident = just(Token::Ident).map_with(move |_, e| {
        let span: SimpleSpan = e.span();
        source[span.start()..span.end()].to_string()
    });

    let value = select! { Token::Value(v) => ValueId(v) };
    let int = select! { Token::Int(n) => n };

    let operand = value.clone().map(Operand::Value).or(int.clone().map(Operand::Imm));

    let binop = select! {
        Token::Add => BinOp::Add,
        Token::Sub => BinOp::Sub,
        Token::Mul => BinOp::Mul,
        Token::Div => BinOp::Div,
        Token::Eq => BinOp::Eq,
        Token::Lt => BinOp::Lt,
    };

    // ── Instructions ──

    let op = choice((
        just(Token::Const).ignore_then(int.clone()).map(Op::Const),
        just(Token::Copy).ignore_then(operand.clone()).map(Op::Copy),
        binop
            .then(operand.clone())
            .then_ignore(just(Token::Comma))
            .then(operand.clone())
            .map(|((op, lhs), rhs)| Op::Binary(op, lhs, rhs)),
    ));

    let inst = value
        .clone()
        .then_ignore(just(Token::Equals))
        .then(op)
        .map(|(dest, op)| Inst { dest, op });

    // ── Terminators ──

    let term = choice((
        just(Token::Ret).ignore_then(operand.clone()).map(Terminator::Ret),
        just(Token::Jmp).ignore_then(ident.clone()).map(Terminator::Jmp),
        just(Token::Br)
            .ignore_then(operand)
            .then_ignore(just(Token::Comma))
            .then(ident.clone())
            .then_ignore(just(Token::Comma))
            .then(ident.clone())
            .map(|((cond, then_label), else_label)| Terminator::Br(cond, then_label, else_label)),
    ));

    // ── Blocks ──

    let block = ident
        .clone()
        .then_ignore(just(Token::Colon))
        .then_ignore(nl1.clone())
        .then(inst.then_ignore(nl1.clone()).repeated().collect::<Vec<_>>())
        .then(term)
        .then_ignore(nl1)
        .map(|((label, insts), term)| Block { label, insts, term });

    // ── Functions ──

    let params = value
        .separated_by(just(Token::Comma))
        .collect::<Vec<_>>()
        .delimited_by(just(Token::LParen), just(Token::RParen));

    let body = nl
        .clone()
        .ignore_then(block.repeated().at_least(1).collect::<Vec<_>>())
        .delimited_by(just(Token::LBrace), just(Token::RBrace));

    let function = just(Token::Fn)
        .ignore_then(ident)
        .then(params)
        .then(body)
        .map(|((name, params), blocks)| Function {
            name,
            params,
            blocks,
        });

    nl.clone()
        .ignore_then(function.then_ignore(nl).repeated().collect::<Vec<_>>())
        .map(Module::from_functions)
}

// ── Tests ──
