// Copyright 2024 The git-sift Authors
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
// https://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! The built-in predicate host: a small statement language over the
//! mutable commit/entry contexts.
//!
//! Scripts are one or more statements separated by `;` or newlines. A
//! statement is either an assignment (`commit.message += "x"`,
//! `entry.discard = entry.size > 10`) or a bare expression. Expressions
//! support `|| && ! == != < <= > >= + -`, parentheses, string/integer
//! literals and a few string methods (`contains`, `starts_with`,
//! `ends_with`, `len`).

use std::fmt;

use once_cell::sync::Lazy;
use pest::iterators::Pair;
use pest::pratt_parser::{Assoc, Op, PrattParser};
use pest::Parser as _;
use pest_derive::Parser;
use thiserror::Error;

use crate::object_id::ObjectId as _;
use crate::predicate::{
    CommitPredicate, EntryPredicate, MutableCommit, MutableEntry, PredicateCompileError,
    PredicateHost, PredicateRuntimeError,
};
use crate::store::{Signature, Store};

#[derive(Parser)]
#[grammar = "script.pest"]
struct ScriptParser;

impl Rule {
    fn to_symbol(self) -> Option<&'static str> {
        match self {
            Rule::logical_or_op => Some("||"),
            Rule::logical_and_op => Some("&&"),
            Rule::eq_op => Some("=="),
            Rule::ne_op => Some("!="),
            Rule::le_op => Some("<="),
            Rule::lt_op => Some("<"),
            Rule::ge_op => Some(">="),
            Rule::gt_op => Some(">"),
            Rule::add_op => Some("+"),
            Rule::sub_op => Some("-"),
            Rule::logical_not_op => Some("!"),
            Rule::negate_op => Some("-"),
            Rule::assign_op => Some("="),
            _ => None,
        }
    }
}

pub type ScriptParseResult<T> = Result<T, ScriptParseError>;

#[derive(Debug, Error)]
#[error("{pest_error}")]
pub struct ScriptParseError {
    pest_error: Box<pest::error::Error<Rule>>,
}

impl From<pest::error::Error<Rule>> for ScriptParseError {
    fn from(err: pest::error::Error<Rule>) -> Self {
        let err = err.renamed_rules(|rule| {
            rule.to_symbol()
                .map(|sym| format!("`{sym}`"))
                .unwrap_or_else(|| format!("<{rule:?}>"))
        });
        ScriptParseError {
            pest_error: Box::new(err),
        }
    }
}

/// Line/column of a node in the script source, for runtime diagnostics.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct SourcePos {
    line: usize,
    column: usize,
}

fn pos_of(pair: &Pair<'_, Rule>) -> SourcePos {
    let (line, column) = pair.as_span().start_pos().line_col();
    SourcePos { line, column }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum UnaryOp {
    LogicalNot,
    Negate,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum BinaryOp {
    LogicalOr,
    LogicalAnd,
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    Add,
    Sub,
}

#[derive(Debug, Clone)]
struct ExprNode {
    kind: ExprKind,
    pos: SourcePos,
}

impl ExprNode {
    fn new(kind: ExprKind, pos: SourcePos) -> Self {
        ExprNode { kind, pos }
    }
}

#[derive(Debug, Clone)]
enum ExprKind {
    Boolean(bool),
    Integer(i64),
    String(String),
    Identifier(String),
    Member(Box<ExprNode>, String),
    MethodCall(Box<ExprNode>, String, Vec<ExprNode>),
    Unary(UnaryOp, Box<ExprNode>),
    Binary(BinaryOp, Box<ExprNode>, Box<ExprNode>),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum AssignOp {
    Set,
    Append,
}

#[derive(Debug, Clone)]
struct Statement {
    kind: StatementKind,
    pos: SourcePos,
}

#[derive(Debug, Clone)]
enum StatementKind {
    Assign {
        target: Vec<String>,
        op: AssignOp,
        value: ExprNode,
    },
    Expression(ExprNode),
}

#[derive(Debug)]
struct Program {
    statements: Vec<Statement>,
}

fn parse_identifier_or_literal(pair: Pair<'_, Rule>) -> ExprKind {
    assert_eq!(pair.as_rule(), Rule::identifier);
    match pair.as_str() {
        "false" => ExprKind::Boolean(false),
        "true" => ExprKind::Boolean(true),
        name => ExprKind::Identifier(name.to_owned()),
    }
}

fn parse_string_literal(pair: Pair<'_, Rule>) -> String {
    assert_eq!(pair.as_rule(), Rule::literal);
    let mut result = String::new();
    for part in pair.into_inner() {
        match part.as_rule() {
            Rule::raw_literal => {
                result.push_str(part.as_str());
            }
            Rule::escape => match &part.as_str()[1..] {
                "\"" => result.push('"'),
                "\\" => result.push('\\'),
                "t" => result.push('\t'),
                "r" => result.push('\r'),
                "n" => result.push('\n'),
                "0" => result.push('\0'),
                char => panic!("invalid escape: \\{char:?}"),
            },
            _ => panic!("unexpected part of string: {part:?}"),
        }
    }
    result
}

fn parse_term_node(pair: Pair<'_, Rule>) -> ScriptParseResult<ExprNode> {
    assert_eq!(pair.as_rule(), Rule::term);
    let mut inner = pair.into_inner();
    let expr = inner.next().unwrap();
    let pos = pos_of(&expr);
    let mut node = match expr.as_rule() {
        Rule::literal => {
            let text = parse_string_literal(expr);
            ExprNode::new(ExprKind::String(text), pos)
        }
        Rule::integer_literal => {
            let span = expr.as_span();
            let value = expr.as_str().parse().map_err(|_| {
                ScriptParseError::from(pest::error::Error::new_from_span(
                    pest::error::ErrorVariant::<Rule>::CustomError {
                        message: "Invalid integer literal".to_string(),
                    },
                    span,
                ))
            })?;
            ExprNode::new(ExprKind::Integer(value), pos)
        }
        Rule::identifier => ExprNode::new(parse_identifier_or_literal(expr), pos),
        Rule::expression => parse_expression_node(expr)?,
        other => panic!("unexpected term: {other:?}"),
    };
    for chain in inner {
        assert_eq!(chain.as_rule(), Rule::accessor);
        let chain_pos = pos_of(&chain);
        let mut accessor = chain.into_inner();
        let name = accessor.next().unwrap().as_str().to_owned();
        node = match accessor.next() {
            None => ExprNode::new(ExprKind::Member(Box::new(node), name), chain_pos),
            Some(args_pair) => {
                assert_eq!(args_pair.as_rule(), Rule::function_arguments);
                let args = args_pair
                    .into_inner()
                    .map(parse_expression_node)
                    .collect::<ScriptParseResult<Vec<_>>>()?;
                ExprNode::new(
                    ExprKind::MethodCall(Box::new(node), name, args),
                    chain_pos,
                )
            }
        };
    }
    Ok(node)
}

fn parse_expression_node(pair: Pair<'_, Rule>) -> ScriptParseResult<ExprNode> {
    assert_eq!(pair.as_rule(), Rule::expression);
    static PRATT: Lazy<PrattParser<Rule>> = Lazy::new(|| {
        PrattParser::new()
            .op(Op::infix(Rule::logical_or_op, Assoc::Left))
            .op(Op::infix(Rule::logical_and_op, Assoc::Left))
            .op(Op::infix(Rule::eq_op, Assoc::Left)
                | Op::infix(Rule::ne_op, Assoc::Left)
                | Op::infix(Rule::le_op, Assoc::Left)
                | Op::infix(Rule::lt_op, Assoc::Left)
                | Op::infix(Rule::ge_op, Assoc::Left)
                | Op::infix(Rule::gt_op, Assoc::Left))
            .op(Op::infix(Rule::add_op, Assoc::Left) | Op::infix(Rule::sub_op, Assoc::Left))
            .op(Op::prefix(Rule::logical_not_op) | Op::prefix(Rule::negate_op))
    });
    PRATT
        .map_primary(parse_term_node)
        .map_prefix(|op, rhs| {
            let op_kind = match op.as_rule() {
                Rule::logical_not_op => UnaryOp::LogicalNot,
                Rule::negate_op => UnaryOp::Negate,
                r => panic!("unexpected prefix operator rule {r:?}"),
            };
            let pos = pos_of(&op);
            Ok(ExprNode::new(ExprKind::Unary(op_kind, Box::new(rhs?)), pos))
        })
        .map_infix(|lhs, op, rhs| {
            let op_kind = match op.as_rule() {
                Rule::logical_or_op => BinaryOp::LogicalOr,
                Rule::logical_and_op => BinaryOp::LogicalAnd,
                Rule::eq_op => BinaryOp::Eq,
                Rule::ne_op => BinaryOp::Ne,
                Rule::le_op => BinaryOp::Le,
                Rule::lt_op => BinaryOp::Lt,
                Rule::ge_op => BinaryOp::Ge,
                Rule::gt_op => BinaryOp::Gt,
                Rule::add_op => BinaryOp::Add,
                Rule::sub_op => BinaryOp::Sub,
                r => panic!("unexpected infix operator rule {r:?}"),
            };
            let lhs = lhs?;
            let pos = lhs.pos;
            Ok(ExprNode::new(
                ExprKind::Binary(op_kind, Box::new(lhs), Box::new(rhs?)),
                pos,
            ))
        })
        .parse(pair.into_inner())
}

fn parse_assignment_node(pair: Pair<'_, Rule>) -> ScriptParseResult<Statement> {
    assert_eq!(pair.as_rule(), Rule::assignment);
    let pos = pos_of(&pair);
    let mut inner = pair.into_inner();
    let target_pair = inner.next().unwrap();
    assert_eq!(target_pair.as_rule(), Rule::target);
    let op_pair = inner.next().unwrap();
    let value_pair = inner.next().unwrap();
    let target = target_pair
        .into_inner()
        .map(|p| p.as_str().to_owned())
        .collect();
    let op = match op_pair.as_str() {
        "=" => AssignOp::Set,
        "+=" => AssignOp::Append,
        other => panic!("unexpected assignment operator {other:?}"),
    };
    let value = parse_expression_node(value_pair)?;
    Ok(Statement {
        kind: StatementKind::Assign { target, op, value },
        pos,
    })
}

fn parse_program(text: &str) -> ScriptParseResult<Program> {
    let mut pairs = ScriptParser::parse(Rule::program, text)?;
    let program_pair = pairs.next().unwrap();
    let mut statements = vec![];
    for pair in program_pair.into_inner() {
        match pair.as_rule() {
            Rule::assignment => statements.push(parse_assignment_node(pair)?),
            Rule::expression => {
                let pos = pos_of(&pair);
                let node = parse_expression_node(pair)?;
                statements.push(Statement {
                    kind: StatementKind::Expression(node),
                    pos,
                });
            }
            Rule::EOI => {}
            other => panic!("unexpected statement: {other:?}"),
        }
    }
    Ok(Program { statements })
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Value {
    Boolean(bool),
    Integer(i64),
    String(String),
}

impl Value {
    fn type_name(&self) -> &'static str {
        match self {
            Value::Boolean(_) => "boolean",
            Value::Integer(_) => "integer",
            Value::String(_) => "string",
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Boolean(v) => write!(f, "{v}"),
            Value::Integer(v) => write!(f, "{v}"),
            Value::String(v) => write!(f, "{v}"),
        }
    }
}

#[derive(Debug)]
struct EvalError {
    message: String,
    pos: SourcePos,
}

impl EvalError {
    fn new(message: impl Into<String>, pos: SourcePos) -> Self {
        EvalError {
            message: message.into(),
            pos,
        }
    }

    fn into_runtime(self) -> PredicateRuntimeError {
        PredicateRuntimeError {
            message: format!(
                "{} (line {}, column {})",
                self.message, self.pos.line, self.pos.column
            ),
        }
    }
}

/// The variables visible to a running script.
enum Scope<'a> {
    Commit {
        commit: &'a mut MutableCommit,
    },
    Entry {
        pattern: &'a str,
        commit: &'a mut MutableCommit,
        entry: &'a mut MutableEntry,
    },
}

fn signature_field(signature: &Signature, field: &str) -> Option<Value> {
    match field {
        "name" => Some(Value::String(signature.name.clone())),
        "email" => Some(Value::String(signature.email.clone())),
        _ => None,
    }
}

impl Scope<'_> {
    fn commit(&self) -> &MutableCommit {
        match self {
            Scope::Commit { commit } => commit,
            Scope::Entry { commit, .. } => commit,
        }
    }

    fn commit_mut(&mut self) -> &mut MutableCommit {
        match self {
            Scope::Commit { commit } => commit,
            Scope::Entry { commit, .. } => commit,
        }
    }

    fn read_path(&self, path: &[&str], pos: SourcePos) -> Result<Value, EvalError> {
        let unknown = || {
            EvalError::new(
                format!(r#"Unknown variable or member "{}""#, path.join(".")),
                pos,
            )
        };
        match path {
            ["pattern"] => match self {
                Scope::Entry { pattern, .. } => Ok(Value::String((*pattern).to_string())),
                Scope::Commit { .. } => Err(unknown()),
            },
            ["commit", "id"] => Ok(Value::String(self.commit().id().hex())),
            ["commit", "message"] => Ok(Value::String(self.commit().message.clone())),
            ["commit", "discard"] => Ok(Value::Boolean(self.commit().discard)),
            ["commit", "tag"] => Ok(Value::String(
                self.commit().tag.clone().unwrap_or_default(),
            )),
            ["commit", "author", field] => {
                signature_field(&self.commit().author, field).ok_or_else(unknown)
            }
            ["commit", "committer", field] => {
                signature_field(&self.commit().committer, field).ok_or_else(unknown)
            }
            ["entry", rest @ ..] => {
                let Scope::Entry { entry, .. } = self else {
                    return Err(unknown());
                };
                match *rest {
                    ["discard"] => Ok(Value::Boolean(entry.discard)),
                    ["path"] => Ok(Value::String(entry.info().path.clone())),
                    ["name"] => Ok(Value::String(entry.info().name.clone())),
                    ["size"] => Ok(Value::Integer(entry.info().size as i64)),
                    ["is_binary"] => Ok(Value::Boolean(entry.info().is_binary)),
                    ["content"] => Err(EvalError::new("entry.content is write-only", pos)),
                    _ => Err(unknown()),
                }
            }
            _ => Err(unknown()),
        }
    }

    fn write_path(&mut self, path: &[&str], value: Value, pos: SourcePos) -> Result<(), EvalError> {
        let unknown = || {
            EvalError::new(
                format!(r#"Unknown or read-only assignment target "{}""#, path.join(".")),
                pos,
            )
        };
        let expect_boolean = |value: Value| match value {
            Value::Boolean(v) => Ok(v),
            other => Err(EvalError::new(
                format!(
                    r#"Expected boolean value for "{}", got {}"#,
                    path.join("."),
                    other.type_name()
                ),
                pos,
            )),
        };
        let expect_string = |value: Value| match value {
            Value::String(v) => Ok(v),
            other => Err(EvalError::new(
                format!(
                    r#"Expected string value for "{}", got {}"#,
                    path.join("."),
                    other.type_name()
                ),
                pos,
            )),
        };
        match path {
            ["commit", "message"] => {
                self.commit_mut().message = expect_string(value)?;
                Ok(())
            }
            ["commit", "discard"] => {
                self.commit_mut().discard = expect_boolean(value)?;
                Ok(())
            }
            ["commit", "tag"] => {
                self.commit_mut().tag = Some(expect_string(value)?);
                Ok(())
            }
            ["commit", "author", "name"] => {
                self.commit_mut().author.name = expect_string(value)?;
                Ok(())
            }
            ["commit", "author", "email"] => {
                self.commit_mut().author.email = expect_string(value)?;
                Ok(())
            }
            ["commit", "committer", "name"] => {
                self.commit_mut().committer.name = expect_string(value)?;
                Ok(())
            }
            ["commit", "committer", "email"] => {
                self.commit_mut().committer.email = expect_string(value)?;
                Ok(())
            }
            ["entry", rest @ ..] => {
                let Scope::Entry { entry, .. } = self else {
                    return Err(unknown());
                };
                match *rest {
                    ["discard"] => {
                        entry.discard = expect_boolean(value)?;
                        Ok(())
                    }
                    ["content"] => {
                        entry.set_content(expect_string(value)?.into_bytes());
                        Ok(())
                    }
                    _ => Err(unknown()),
                }
            }
            _ => Err(unknown()),
        }
    }

    fn append_path(
        &mut self,
        path: &[&str],
        value: Value,
        pos: SourcePos,
    ) -> Result<(), EvalError> {
        let current = self.read_path(path, pos)?;
        let combined = add_values(current, value, pos)?;
        self.write_path(path, combined, pos)
    }
}

fn add_values(lhs: Value, rhs: Value, pos: SourcePos) -> Result<Value, EvalError> {
    match (lhs, rhs) {
        (Value::Integer(a), Value::Integer(b)) => Ok(Value::Integer(a + b)),
        (Value::String(mut a), Value::String(b)) => {
            a.push_str(&b);
            Ok(Value::String(a))
        }
        (a, b) => Err(EvalError::new(
            format!("Cannot add {} and {}", a.type_name(), b.type_name()),
            pos,
        )),
    }
}

fn path_of(node: &ExprNode) -> Option<Vec<&str>> {
    match &node.kind {
        ExprKind::Identifier(name) => Some(vec![name.as_str()]),
        ExprKind::Member(object, name) => {
            let mut path = path_of(object)?;
            path.push(name.as_str());
            Some(path)
        }
        _ => None,
    }
}

fn eval(node: &ExprNode, scope: &Scope<'_>) -> Result<Value, EvalError> {
    match &node.kind {
        ExprKind::Boolean(value) => Ok(Value::Boolean(*value)),
        ExprKind::Integer(value) => Ok(Value::Integer(*value)),
        ExprKind::String(value) => Ok(Value::String(value.clone())),
        ExprKind::Identifier(_) | ExprKind::Member(..) => {
            let path = path_of(node).ok_or_else(|| {
                EvalError::new("Invalid member access", node.pos)
            })?;
            scope.read_path(&path, node.pos)
        }
        ExprKind::MethodCall(object, name, args) => {
            let receiver = eval(object, scope)?;
            let args = args
                .iter()
                .map(|arg| eval(arg, scope))
                .collect::<Result<Vec<_>, _>>()?;
            eval_method(receiver, name, &args, node.pos)
        }
        ExprKind::Unary(op, operand) => {
            let value = eval(operand, scope)?;
            match (op, value) {
                (UnaryOp::LogicalNot, Value::Boolean(v)) => Ok(Value::Boolean(!v)),
                (UnaryOp::Negate, Value::Integer(v)) => Ok(Value::Integer(-v)),
                (UnaryOp::LogicalNot, other) => Err(EvalError::new(
                    format!("Cannot apply ! to {}", other.type_name()),
                    node.pos,
                )),
                (UnaryOp::Negate, other) => Err(EvalError::new(
                    format!("Cannot negate {}", other.type_name()),
                    node.pos,
                )),
            }
        }
        ExprKind::Binary(op, lhs_node, rhs_node) => {
            match op {
                // Short-circuiting, like the operators they mirror.
                BinaryOp::LogicalOr | BinaryOp::LogicalAnd => {
                    let lhs = expect_boolean_value(eval(lhs_node, scope)?, node.pos)?;
                    match (op, lhs) {
                        (BinaryOp::LogicalOr, true) => Ok(Value::Boolean(true)),
                        (BinaryOp::LogicalAnd, false) => Ok(Value::Boolean(false)),
                        _ => {
                            let rhs = expect_boolean_value(eval(rhs_node, scope)?, node.pos)?;
                            Ok(Value::Boolean(rhs))
                        }
                    }
                }
                BinaryOp::Eq | BinaryOp::Ne => {
                    let lhs = eval(lhs_node, scope)?;
                    let rhs = eval(rhs_node, scope)?;
                    if lhs.type_name() != rhs.type_name() {
                        return Err(EvalError::new(
                            format!(
                                "Cannot compare {} with {}",
                                lhs.type_name(),
                                rhs.type_name()
                            ),
                            node.pos,
                        ));
                    }
                    let equal = lhs == rhs;
                    Ok(Value::Boolean(if *op == BinaryOp::Eq {
                        equal
                    } else {
                        !equal
                    }))
                }
                BinaryOp::Lt | BinaryOp::Le | BinaryOp::Gt | BinaryOp::Ge => {
                    let lhs = eval(lhs_node, scope)?;
                    let rhs = eval(rhs_node, scope)?;
                    let ordering = match (&lhs, &rhs) {
                        (Value::Integer(a), Value::Integer(b)) => a.cmp(b),
                        (Value::String(a), Value::String(b)) => a.cmp(b),
                        _ => {
                            return Err(EvalError::new(
                                format!(
                                    "Cannot order {} and {}",
                                    lhs.type_name(),
                                    rhs.type_name()
                                ),
                                node.pos,
                            ));
                        }
                    };
                    let result = match op {
                        BinaryOp::Lt => ordering.is_lt(),
                        BinaryOp::Le => ordering.is_le(),
                        BinaryOp::Gt => ordering.is_gt(),
                        BinaryOp::Ge => ordering.is_ge(),
                        _ => unreachable!(),
                    };
                    Ok(Value::Boolean(result))
                }
                BinaryOp::Add => {
                    let lhs = eval(lhs_node, scope)?;
                    let rhs = eval(rhs_node, scope)?;
                    add_values(lhs, rhs, node.pos)
                }
                BinaryOp::Sub => {
                    let lhs = eval(lhs_node, scope)?;
                    let rhs = eval(rhs_node, scope)?;
                    match (lhs, rhs) {
                        (Value::Integer(a), Value::Integer(b)) => Ok(Value::Integer(a - b)),
                        (a, b) => Err(EvalError::new(
                            format!(
                                "Cannot subtract {} from {}",
                                b.type_name(),
                                a.type_name()
                            ),
                            node.pos,
                        )),
                    }
                }
            }
        }
    }
}

fn expect_boolean_value(value: Value, pos: SourcePos) -> Result<bool, EvalError> {
    match value {
        Value::Boolean(v) => Ok(v),
        other => Err(EvalError::new(
            format!("Expected boolean operand, got {}", other.type_name()),
            pos,
        )),
    }
}

fn eval_method(
    receiver: Value,
    name: &str,
    args: &[Value],
    pos: SourcePos,
) -> Result<Value, EvalError> {
    let string_arg = |args: &[Value]| -> Result<String, EvalError> {
        match args {
            [Value::String(s)] => Ok(s.clone()),
            _ => Err(EvalError::new(
                format!(r#"Method "{name}" expects one string argument"#),
                pos,
            )),
        }
    };
    match (&receiver, name) {
        (Value::String(s), "contains") => Ok(Value::Boolean(s.contains(&string_arg(args)?))),
        (Value::String(s), "starts_with") => {
            Ok(Value::Boolean(s.starts_with(&string_arg(args)?)))
        }
        (Value::String(s), "ends_with") => Ok(Value::Boolean(s.ends_with(&string_arg(args)?))),
        (Value::String(s), "len") => {
            if args.is_empty() {
                Ok(Value::Integer(s.len() as i64))
            } else {
                Err(EvalError::new(r#"Method "len" expects no arguments"#, pos))
            }
        }
        _ => Err(EvalError::new(
            format!(
                r#"Method "{name}" doesn't exist for type "{}""#,
                receiver.type_name()
            ),
            pos,
        )),
    }
}

impl Program {
    fn run(&self, scope: &mut Scope<'_>) -> Result<(), EvalError> {
        for statement in &self.statements {
            match &statement.kind {
                StatementKind::Assign { target, op, value } => {
                    let value = eval(value, scope)?;
                    let path: Vec<&str> = target.iter().map(String::as_str).collect();
                    match op {
                        AssignOp::Set => scope.write_path(&path, value, statement.pos)?,
                        AssignOp::Append => scope.append_path(&path, value, statement.pos)?,
                    }
                }
                StatementKind::Expression(expr) => {
                    eval(expr, scope)?;
                }
            }
        }
        Ok(())
    }

    fn roots(&self) -> Vec<(&str, SourcePos)> {
        fn expr_roots<'a>(node: &'a ExprNode, out: &mut Vec<(&'a str, SourcePos)>) {
            match &node.kind {
                ExprKind::Identifier(name) => out.push((name, node.pos)),
                ExprKind::Member(object, _) => expr_roots(object, out),
                ExprKind::MethodCall(object, _, args) => {
                    expr_roots(object, out);
                    for arg in args {
                        expr_roots(arg, out);
                    }
                }
                ExprKind::Unary(_, operand) => expr_roots(operand, out),
                ExprKind::Binary(_, lhs, rhs) => {
                    expr_roots(lhs, out);
                    expr_roots(rhs, out);
                }
                ExprKind::Boolean(_) | ExprKind::Integer(_) | ExprKind::String(_) => {}
            }
        }
        let mut out = vec![];
        for statement in &self.statements {
            match &statement.kind {
                StatementKind::Assign { target, value, .. } => {
                    if let Some(root) = target.first() {
                        out.push((root.as_str(), statement.pos));
                    }
                    expr_roots(value, &mut out);
                }
                StatementKind::Expression(expr) => expr_roots(expr, &mut out),
            }
        }
        out
    }
}

fn indented_source(text: &str) -> String {
    text.lines()
        .map(|line| format!("    {line}"))
        .collect::<Vec<_>>()
        .join("\n")
}

fn compile_program(
    text: &str,
    allowed_roots: &[&str],
) -> Result<Program, PredicateCompileError> {
    let program = parse_program(text).map_err(|err| PredicateCompileError {
        diagnostics: format!("{err}\nIn script:\n{}", indented_source(text)),
    })?;
    for (root, pos) in program.roots() {
        if !allowed_roots.contains(&root) {
            return Err(PredicateCompileError {
                diagnostics: format!(
                    r#"Unknown variable "{root}" (line {}, column {})
In script:
{}"#,
                    pos.line,
                    pos.column,
                    indented_source(text)
                ),
            });
        }
    }
    Ok(program)
}

const COMMIT_ROOTS: &[&str] = &["commit", "repo"];
const ENTRY_ROOTS: &[&str] = &["commit", "entry", "pattern", "repo"];

#[derive(Debug)]
struct CommitScript {
    program: Program,
}

impl CommitPredicate for CommitScript {
    fn invoke(
        &self,
        _repo: &Store,
        commit: &mut MutableCommit,
    ) -> Result<(), PredicateRuntimeError> {
        let mut scope = Scope::Commit { commit };
        self.program.run(&mut scope).map_err(EvalError::into_runtime)
    }
}

#[derive(Debug)]
struct EntryScript {
    program: Program,
}

impl EntryPredicate for EntryScript {
    fn invoke(
        &self,
        _repo: &Store,
        pattern: &str,
        commit: &mut MutableCommit,
        entry: &mut MutableEntry,
    ) -> Result<(), PredicateRuntimeError> {
        let mut scope = Scope::Entry {
            pattern,
            commit,
            entry,
        };
        self.program.run(&mut scope).map_err(EvalError::into_runtime)
    }
}

/// The default [`PredicateHost`], interpreting the embedded script
/// language.
#[derive(Debug, Default)]
pub struct ScriptHost;

impl ScriptHost {
    pub fn new() -> Self {
        ScriptHost
    }
}

impl PredicateHost for ScriptHost {
    fn compile_commit(
        &self,
        text: &str,
    ) -> Result<Box<dyn CommitPredicate>, PredicateCompileError> {
        let program = compile_program(text, COMMIT_ROOTS)?;
        Ok(Box::new(CommitScript { program }))
    }

    fn compile_entry(&self, text: &str) -> Result<Box<dyn EntryPredicate>, PredicateCompileError> {
        let program = compile_program(text, ENTRY_ROOTS)?;
        Ok(Box::new(EntryScript { program }))
    }
}
