//! Statement tree produced by the rule parser.
//!
//! Nesting comes from indentation during parsing; the tree itself is
//! indentation-free. Expressions stay as raw rule text and are translated
//! to Python at generation time.

use crate::types::{RuleStatement, StatementKind};

#[derive(Debug, Clone, PartialEq)]
pub struct RuleNode {
    pub business_line: usize,
    pub raw_text: String,
    pub kind: NodeKind,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QuantifierMode {
    Any,
    All,
}

/// One `if`/`elseif` arm of a conditional chain.
#[derive(Debug, Clone, PartialEq)]
pub struct CondArm {
    pub business_line: usize,
    pub condition: String,
    pub body: Vec<RuleNode>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SwitchCase {
    pub business_line: usize,
    pub value: String,
    pub body: Vec<RuleNode>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ExceptArm {
    pub business_line: usize,
    /// Exception class name; empty means catch-all.
    pub exception: String,
    pub body: Vec<RuleNode>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum NodeKind {
    Assignment {
        target: String,
        value: String,
    },
    /// `if`/`elseif` chain with an optional trailing `else`.
    If {
        arms: Vec<CondArm>,
        else_body: Option<Vec<RuleNode>>,
        else_line: Option<usize>,
    },
    While {
        condition: String,
        body: Vec<RuleNode>,
    },
    For {
        binding: String,
        iterable: String,
        body: Vec<RuleNode>,
    },
    /// `any`/`all` early-exit iteration, optionally with a matched body and
    /// an `else` clause.
    Quantifier {
        mode: QuantifierMode,
        binding: String,
        iterable: String,
        condition: String,
        body: Vec<RuleNode>,
        else_body: Option<Vec<RuleNode>>,
        else_line: Option<usize>,
    },
    Switch {
        scrutinee: String,
        cases: Vec<SwitchCase>,
        default_body: Option<Vec<RuleNode>>,
        default_line: Option<usize>,
    },
    Try {
        body: Vec<RuleNode>,
        handlers: Vec<ExceptArm>,
        finally_body: Option<Vec<RuleNode>>,
        finally_line: Option<usize>,
    },
    Call {
        expression: String,
    },
    Return {
        value: Option<String>,
    },
    Break,
    Continue,
    Comment {
        text: String,
    },
    /// Recognized by nothing; produces no code.
    Unknown,
}

impl RuleNode {
    pub fn statement_kind(&self) -> StatementKind {
        match &self.kind {
            NodeKind::Assignment { .. } => StatementKind::Assignment,
            NodeKind::If { .. } => StatementKind::Condition,
            NodeKind::While { .. } | NodeKind::For { .. } => StatementKind::Loop,
            NodeKind::Quantifier { .. } => StatementKind::Quantifier,
            NodeKind::Switch { .. } => StatementKind::Switch,
            NodeKind::Try { .. } => StatementKind::Try,
            NodeKind::Call { .. } => StatementKind::Call,
            NodeKind::Return { .. } | NodeKind::Break | NodeKind::Continue => StatementKind::Call,
            NodeKind::Comment { .. } => StatementKind::Comment,
            NodeKind::Unknown => StatementKind::Unknown,
        }
    }

    /// Variables this node introduces at its own line.
    pub fn defined_variables(&self) -> Vec<String> {
        match &self.kind {
            NodeKind::Assignment { target, .. } => {
                // `customer.tier = ...` defines nothing new; bare names do.
                if target.contains('.') {
                    vec![]
                } else {
                    vec![target.clone()]
                }
            }
            NodeKind::For { binding, .. } | NodeKind::Quantifier { binding, .. } => {
                vec![binding.clone()]
            }
            _ => vec![],
        }
    }

    /// Flatten this node (and children) into the per-compile statement list.
    pub fn collect_statements(&self, out: &mut Vec<RuleStatement>) {
        out.push(RuleStatement {
            kind: self.statement_kind(),
            business_line: self.business_line,
            raw_text: self.raw_text.clone(),
            defined: self.defined_variables(),
            referenced: referenced_names(&self.raw_text),
        });

        match &self.kind {
            NodeKind::If {
                arms, else_body, ..
            } => {
                for arm in arms {
                    for child in &arm.body {
                        child.collect_statements(out);
                    }
                }
                if let Some(body) = else_body {
                    for child in body {
                        child.collect_statements(out);
                    }
                }
            }
            NodeKind::While { body, .. } | NodeKind::For { body, .. } => {
                for child in body {
                    child.collect_statements(out);
                }
            }
            NodeKind::Quantifier {
                body, else_body, ..
            } => {
                for child in body {
                    child.collect_statements(out);
                }
                if let Some(body) = else_body {
                    for child in body {
                        child.collect_statements(out);
                    }
                }
            }
            NodeKind::Switch {
                cases,
                default_body,
                ..
            } => {
                for case in cases {
                    for child in &case.body {
                        child.collect_statements(out);
                    }
                }
                if let Some(body) = default_body {
                    for child in body {
                        child.collect_statements(out);
                    }
                }
            }
            NodeKind::Try {
                body,
                handlers,
                finally_body,
                ..
            } => {
                for child in body {
                    child.collect_statements(out);
                }
                for handler in handlers {
                    for child in &handler.body {
                        child.collect_statements(out);
                    }
                }
                if let Some(body) = finally_body {
                    for child in body {
                        child.collect_statements(out);
                    }
                }
            }
            _ => {}
        }
    }
}

/// Bare identifier scan used to populate `RuleStatement::referenced`.
/// Keywords and string contents are skipped.
pub fn referenced_names(text: &str) -> Vec<String> {
    const KEYWORDS: &[&str] = &[
        "if", "elseif", "else", "while", "for", "switch", "case", "default", "try", "except",
        "finally", "any", "all", "in", "has", "return", "break", "continue", "and", "or", "not",
        "true", "false", "null",
    ];

    let mut names = Vec::new();
    let mut chars = text.char_indices().peekable();
    let mut in_string: Option<char> = None;

    while let Some((i, c)) = chars.next() {
        if let Some(quote) = in_string {
            if c == quote {
                in_string = None;
            }
            continue;
        }
        match c {
            '"' | '\'' => in_string = Some(c),
            '#' => break,
            c if c.is_alphabetic() || c == '_' => {
                let mut end = i + c.len_utf8();
                while let Some(&(j, next)) = chars.peek() {
                    if next.is_alphanumeric() || next == '_' {
                        end = j + next.len_utf8();
                        chars.next();
                    } else {
                        break;
                    }
                }
                let word = &text[i..end];
                if !KEYWORDS.contains(&word) && !names.iter().any(|n| n == word) {
                    names.push(word.to_string());
                }
            }
            _ => {}
        }
    }

    names
}
