//! Python code generator.
//!
//! Each generator is a pure function of (node, context): the context carries
//! the generation depth and loop-ness, and every construct can predict its
//! emitted line count before emission so the source-map builder can reserve
//! ranges. Absolute indentation is always `indent_width * depth` computed
//! from the context alone; generators never stack a statement-relative
//! offset on top of an absolute one.

use std::collections::BTreeSet;

use crate::compiler::ast::{referenced_names, NodeKind, QuantifierMode, RuleNode};
use crate::compiler::expr::{translate_condition, translate_value};
use crate::error::CompileError;
use crate::registry::Registries;
use crate::sourcemap::SourceMapBuilder;
use crate::types::PatternKind;

/// Generation context threaded through the emitters.
#[derive(Debug, Clone, Copy)]
pub struct GenContext {
    pub depth: usize,
    pub in_loop: bool,
}

impl GenContext {
    pub fn top() -> Self {
        Self {
            depth: 0,
            in_loop: false,
        }
    }

    fn nested(self) -> Self {
        Self {
            depth: self.depth + 1,
            ..self
        }
    }

    fn loop_body(self) -> Self {
        Self {
            depth: self.depth + 1,
            in_loop: true,
        }
    }
}

#[derive(Debug)]
pub struct GeneratedUnit {
    pub lines: Vec<String>,
    pub imports: Vec<String>,
    pub map: SourceMapBuilder,
}

impl GeneratedUnit {
    pub fn code(&self) -> String {
        let mut code = self.lines.join("\n");
        code.push('\n');
        code
    }
}

pub fn generate(
    nodes: &[RuleNode],
    registries: &Registries,
    indent_width: usize,
) -> Result<GeneratedUnit, CompileError> {
    let mut emitter = Emitter {
        registries,
        indent_width,
        lines: Vec::new(),
        map: SourceMapBuilder::new(),
    };

    let imports = collect_imports(nodes, registries);
    for import in &imports {
        let line = emitter.next_line();
        emitter.lines.push(format!("import {import}"));
        emitter.map.record_line(0, line, PatternKind::Import, None);
    }

    for node in nodes {
        emitter.emit_node(node, GenContext::top())?;
    }

    Ok(GeneratedUnit {
        lines: emitter.lines,
        imports,
        map: emitter.map,
    })
}

/// Total lines `node` will emit, children included. Must agree exactly with
/// `Emitter::emit_node`; the compile pipeline checks the two against each
/// other and records a mapping issue on drift.
pub fn line_count(node: &RuleNode) -> usize {
    match &node.kind {
        NodeKind::Comment { .. } => 1,
        NodeKind::Unknown => 0,
        NodeKind::Assignment { .. }
        | NodeKind::Call { .. }
        | NodeKind::Return { .. }
        | NodeKind::Break
        | NodeKind::Continue => 1,
        NodeKind::If {
            arms, else_body, ..
        } => {
            let mut total = 0;
            for arm in arms {
                total += 1 + body_count(&arm.body);
            }
            if let Some(body) = else_body {
                total += 1 + body_count(body);
            }
            total
        }
        NodeKind::While { body, .. } | NodeKind::For { body, .. } => 1 + body_count(body),
        NodeKind::Quantifier {
            body, else_body, ..
        } => {
            let mut total = 5;
            if !body.is_empty() || else_body.is_some() {
                total += 1 + body_count(body);
                if let Some(else_nodes) = else_body {
                    total += 1 + body_count(else_nodes);
                }
            }
            total
        }
        NodeKind::Switch {
            cases,
            default_body,
            ..
        } => {
            let mut total = 1;
            for case in cases {
                total += 1 + body_count(&case.body);
            }
            if let Some(body) = default_body {
                if cases.is_empty() {
                    total += body.iter().map(line_count).sum::<usize>();
                } else {
                    total += 1 + body_count(body);
                }
            }
            total
        }
        NodeKind::Try {
            body,
            handlers,
            finally_body,
            ..
        } => {
            let mut total = 1 + body_count(body);
            for handler in handlers {
                total += 1 + body_count(&handler.body);
            }
            if let Some(nodes) = finally_body {
                total += 1 + body_count(nodes);
            }
            total
        }
    }
}

/// Lines a dependent body occupies, including the `pass` synthesized when
/// nothing in it is executable.
fn body_count(nodes: &[RuleNode]) -> usize {
    let total: usize = nodes.iter().map(line_count).sum();
    if has_executable(nodes) {
        total
    } else {
        total + 1
    }
}

fn has_executable(nodes: &[RuleNode]) -> bool {
    nodes
        .iter()
        .any(|n| !matches!(n.kind, NodeKind::Comment { .. } | NodeKind::Unknown))
}

/// Python modules required by registered functions the rules call.
fn collect_imports(nodes: &[RuleNode], registries: &Registries) -> Vec<String> {
    let mut imports = BTreeSet::new();
    let mut stack: Vec<&RuleNode> = nodes.iter().collect();
    while let Some(node) = stack.pop() {
        for name in referenced_names(&node.raw_text) {
            if let Some(signature) = registries.functions.function(&name) {
                if let Some(module) = &signature.requires_import {
                    imports.insert(module.clone());
                }
            }
        }
        match &node.kind {
            NodeKind::If {
                arms, else_body, ..
            } => {
                for arm in arms {
                    stack.extend(arm.body.iter());
                }
                if let Some(body) = else_body {
                    stack.extend(body.iter());
                }
            }
            NodeKind::While { body, .. } | NodeKind::For { body, .. } => {
                stack.extend(body.iter())
            }
            NodeKind::Quantifier {
                body, else_body, ..
            } => {
                stack.extend(body.iter());
                if let Some(else_nodes) = else_body {
                    stack.extend(else_nodes.iter());
                }
            }
            NodeKind::Switch {
                cases,
                default_body,
                ..
            } => {
                for case in cases {
                    stack.extend(case.body.iter());
                }
                if let Some(body) = default_body {
                    stack.extend(body.iter());
                }
            }
            NodeKind::Try {
                body,
                handlers,
                finally_body,
                ..
            } => {
                stack.extend(body.iter());
                for handler in handlers {
                    stack.extend(handler.body.iter());
                }
                if let Some(nodes) = finally_body {
                    stack.extend(nodes.iter());
                }
            }
            _ => {}
        }
    }
    imports.into_iter().collect()
}

struct Emitter<'a> {
    registries: &'a Registries,
    indent_width: usize,
    lines: Vec<String>,
    map: SourceMapBuilder,
}

impl Emitter<'_> {
    fn next_line(&self) -> usize {
        self.lines.len() + 1
    }

    fn push(
        &mut self,
        depth: usize,
        text: &str,
        business_line: usize,
        kind: PatternKind,
        statement_id: Option<&str>,
    ) {
        let generated_line = self.next_line();
        let indent = " ".repeat(self.indent_width * depth);
        self.lines.push(format!("{indent}{text}"));
        self.map
            .record_line(business_line, generated_line, kind, statement_id);
    }

    fn emit_node(&mut self, node: &RuleNode, ctx: GenContext) -> Result<(), CompileError> {
        let stmt_id = format!("stmt_{}", node.business_line);
        let line = node.business_line;

        match &node.kind {
            NodeKind::Comment { text } => {
                self.push(ctx.depth, &format!("# {text}"), line, PatternKind::Structural, None);
                Ok(())
            }
            NodeKind::Unknown => Ok(()),
            NodeKind::Assignment { target, value } => {
                let value = translate_value(value, &self.registries.operators);
                self.push(
                    ctx.depth,
                    &format!("{target} = {value}"),
                    line,
                    PatternKind::Assignment,
                    None,
                );
                Ok(())
            }
            NodeKind::Call { expression } => {
                let call = translate_value(expression, &self.registries.operators);
                self.push(ctx.depth, &call, line, PatternKind::Call, None);
                Ok(())
            }
            NodeKind::Return { value } => {
                let text = match value {
                    Some(v) => format!(
                        "return {}",
                        translate_value(v, &self.registries.operators)
                    ),
                    None => "return".to_string(),
                };
                self.push(ctx.depth, &text, line, PatternKind::Call, None);
                Ok(())
            }
            NodeKind::Break => {
                if !ctx.in_loop {
                    return Err(CompileError::Generation {
                        business_line: line,
                        message: "'break' is only allowed inside a loop".to_string(),
                    });
                }
                self.push(ctx.depth, "break", line, PatternKind::Call, None);
                Ok(())
            }
            NodeKind::Continue => {
                if !ctx.in_loop {
                    return Err(CompileError::Generation {
                        business_line: line,
                        message: "'continue' is only allowed inside a loop".to_string(),
                    });
                }
                self.push(ctx.depth, "continue", line, PatternKind::Call, None);
                Ok(())
            }
            NodeKind::If {
                arms,
                else_body,
                else_line,
            } => {
                for (i, arm) in arms.iter().enumerate() {
                    let keyword = if i == 0 { "if" } else { "elif" };
                    let condition =
                        translate_condition(&arm.condition, &self.registries.operators);
                    self.push(
                        ctx.depth,
                        &format!("{keyword} {condition}:"),
                        arm.business_line,
                        PatternKind::Condition,
                        Some(&stmt_id),
                    );
                    self.emit_body(&arm.body, ctx.nested(), arm.business_line, &stmt_id)?;
                }
                if let Some(body) = else_body {
                    let owner = else_line.unwrap_or(line);
                    self.push(
                        ctx.depth,
                        "else:",
                        owner,
                        PatternKind::Condition,
                        Some(&stmt_id),
                    );
                    self.emit_body(body, ctx.nested(), owner, &stmt_id)?;
                }
                Ok(())
            }
            NodeKind::While { condition, body } => {
                let condition = translate_condition(condition, &self.registries.operators);
                self.push(
                    ctx.depth,
                    &format!("while {condition}:"),
                    line,
                    PatternKind::Loop,
                    Some(&stmt_id),
                );
                self.emit_body(body, ctx.loop_body(), line, &stmt_id)
            }
            NodeKind::For {
                binding,
                iterable,
                body,
            } => {
                let iterable = translate_value(iterable, &self.registries.operators);
                self.push(
                    ctx.depth,
                    &format!("for {binding} in {iterable}:"),
                    line,
                    PatternKind::Loop,
                    Some(&stmt_id),
                );
                self.emit_body(body, ctx.loop_body(), line, &stmt_id)
            }
            NodeKind::Quantifier {
                mode,
                binding,
                iterable,
                condition,
                body,
                else_body,
                else_line,
            } => {
                let flag = match mode {
                    QuantifierMode::Any => format!("_any_match_{line}"),
                    QuantifierMode::All => format!("_all_match_{line}"),
                };
                let iterable = translate_value(iterable, &self.registries.operators);
                let condition = translate_condition(condition, &self.registries.operators);
                let (init, test, update) = match mode {
                    QuantifierMode::Any => ("False", format!("if {condition}:"), "True"),
                    QuantifierMode::All => ("True", format!("if not ({condition}):"), "False"),
                };

                self.push(
                    ctx.depth,
                    &format!("{flag} = {init}"),
                    line,
                    PatternKind::Quantifier,
                    Some(&stmt_id),
                );
                self.push(
                    ctx.depth,
                    &format!("for {binding} in {iterable}:"),
                    line,
                    PatternKind::Quantifier,
                    Some(&stmt_id),
                );
                self.push(
                    ctx.depth + 1,
                    &test,
                    line,
                    PatternKind::Quantifier,
                    Some(&stmt_id),
                );
                self.push(
                    ctx.depth + 2,
                    &format!("{flag} = {update}"),
                    line,
                    PatternKind::Quantifier,
                    Some(&stmt_id),
                );
                self.push(
                    ctx.depth + 2,
                    "break",
                    line,
                    PatternKind::Quantifier,
                    Some(&stmt_id),
                );

                if !body.is_empty() || else_body.is_some() {
                    self.push(
                        ctx.depth,
                        &format!("if {flag}:"),
                        line,
                        PatternKind::Quantifier,
                        Some(&stmt_id),
                    );
                    self.emit_body(body, ctx.nested(), line, &stmt_id)?;
                    if let Some(else_nodes) = else_body {
                        let owner = else_line.unwrap_or(line);
                        self.push(
                            ctx.depth,
                            "else:",
                            owner,
                            PatternKind::Quantifier,
                            Some(&stmt_id),
                        );
                        self.emit_body(else_nodes, ctx.nested(), owner, &stmt_id)?;
                    }
                }
                Ok(())
            }
            NodeKind::Switch {
                scrutinee,
                cases,
                default_body,
                default_line,
            } => {
                let scrutinee_var = format!("_switch_value_{line}");
                let value = translate_value(scrutinee, &self.registries.operators);
                self.push(
                    ctx.depth,
                    &format!("{scrutinee_var} = {value}"),
                    line,
                    PatternKind::Switch,
                    Some(&stmt_id),
                );

                for (i, case) in cases.iter().enumerate() {
                    let keyword = if i == 0 { "if" } else { "elif" };
                    let case_value =
                        translate_value(&case.value, &self.registries.operators);
                    self.push(
                        ctx.depth,
                        &format!("{keyword} {scrutinee_var} == {case_value}:"),
                        case.business_line,
                        PatternKind::Switch,
                        Some(&stmt_id),
                    );
                    self.emit_body(&case.body, ctx.nested(), case.business_line, &stmt_id)?;
                }

                if let Some(body) = default_body {
                    let owner = default_line.unwrap_or(line);
                    if cases.is_empty() {
                        // Degenerate default-only switch: the body runs
                        // unconditionally.
                        for child in body {
                            self.emit_node(child, ctx)?;
                        }
                    } else {
                        self.push(
                            ctx.depth,
                            "else:",
                            owner,
                            PatternKind::Switch,
                            Some(&stmt_id),
                        );
                        self.emit_body(body, ctx.nested(), owner, &stmt_id)?;
                    }
                }
                Ok(())
            }
            NodeKind::Try {
                body,
                handlers,
                finally_body,
                finally_line,
            } => {
                self.push(ctx.depth, "try:", line, PatternKind::Try, Some(&stmt_id));
                self.emit_body(body, ctx.nested(), line, &stmt_id)?;

                for handler in handlers {
                    let clause = if handler.exception.is_empty() {
                        "except Exception:".to_string()
                    } else {
                        format!("except {}:", handler.exception)
                    };
                    self.push(
                        ctx.depth,
                        &clause,
                        handler.business_line,
                        PatternKind::Try,
                        Some(&stmt_id),
                    );
                    self.emit_body(&handler.body, ctx.nested(), handler.business_line, &stmt_id)?;
                }

                if let Some(nodes) = finally_body {
                    let owner = finally_line.unwrap_or(line);
                    self.push(ctx.depth, "finally:", owner, PatternKind::Try, Some(&stmt_id));
                    self.emit_body(nodes, ctx.nested(), owner, &stmt_id)?;
                }
                Ok(())
            }
        }
    }

    /// Emit a dependent body, adding `pass` when nothing executable landed.
    fn emit_body(
        &mut self,
        nodes: &[RuleNode],
        ctx: GenContext,
        owner_line: usize,
        stmt_id: &str,
    ) -> Result<(), CompileError> {
        for node in nodes {
            self.emit_node(node, ctx)?;
        }
        if !has_executable(nodes) {
            self.push(
                ctx.depth,
                "pass",
                owner_line,
                PatternKind::Structural,
                Some(stmt_id),
            );
        }
        Ok(())
    }
}
