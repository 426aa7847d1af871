//! Indentation-aware recursive-descent parser for rule text.
//!
//! Rule text is line-oriented: one statement per line, nesting expressed by
//! indentation relative to the enclosing statement. The parser walks lines
//! with an indent stack and produces a statement tree; there is no pattern
//! priority order, overlapping shapes (`if any ...` vs `if ...`) are
//! resolved structurally.
//!
//! Unrecognized lines are non-fatal: each one becomes a `ParseIssue` plus an
//! `Unknown` node, and parsing continues so a single bad line does not hide
//! errors further down.

use crate::compiler::ast::{
    CondArm, ExceptArm, NodeKind, QuantifierMode, RuleNode, SwitchCase,
};
use crate::error::ParseIssue;

/// A scanned physical line: 1-based number, leading-space count, trimmed text.
#[derive(Debug, Clone)]
struct Line {
    number: usize,
    indent: usize,
    text: String,
}

#[derive(Debug)]
pub struct ParseOutcome {
    pub nodes: Vec<RuleNode>,
    pub issues: Vec<ParseIssue>,
}

pub fn parse(source: &str) -> ParseOutcome {
    let mut issues = Vec::new();
    let mut lines = Vec::new();

    for (idx, raw) in source.lines().enumerate() {
        let number = idx + 1;
        if raw.trim().is_empty() {
            continue;
        }
        let leading = &raw[..raw.len() - raw.trim_start().len()];
        if leading.contains('\t') {
            issues.push(ParseIssue {
                business_line: number,
                message: "tabs are not allowed in indentation; use spaces".to_string(),
            });
            continue;
        }
        lines.push(Line {
            number,
            indent: leading.len(),
            text: raw.trim().to_string(),
        });
    }

    let mut parser = Parser {
        lines,
        pos: 0,
        issues,
    };
    let nodes = parser.parse_block(None);
    ParseOutcome {
        nodes,
        issues: parser.issues,
    }
}

struct Parser {
    lines: Vec<Line>,
    pos: usize,
    issues: Vec<ParseIssue>,
}

impl Parser {
    fn peek(&self) -> Option<&Line> {
        self.lines.get(self.pos)
    }

    fn advance(&mut self) -> Line {
        let line = self.lines[self.pos].clone();
        self.pos += 1;
        line
    }

    fn issue(&mut self, line: usize, message: impl Into<String>) {
        self.issues.push(ParseIssue {
            business_line: line,
            message: message.into(),
        });
    }

    /// Parse statements strictly more indented than `parent_indent`
    /// (or everything, at the top level).
    fn parse_block(&mut self, parent_indent: Option<usize>) -> Vec<RuleNode> {
        let mut nodes = Vec::new();
        let block_indent = self.peek().map(|l| l.indent);

        while let Some(line) = self.peek() {
            if let Some(parent) = parent_indent {
                if line.indent <= parent {
                    break;
                }
            }
            if let (Some(expected), Some(_)) = (block_indent, parent_indent) {
                if line.indent < expected {
                    // Dedent below the block's own level ends the block even
                    // when it stays above the parent; the caller re-examines
                    // the line.
                    break;
                }
            }
            nodes.push(self.parse_statement());
        }

        nodes
    }

    fn parse_statement(&mut self) -> RuleNode {
        let line = self.advance();
        let keyword = first_word(&line.text);

        match keyword {
            "#" => RuleNode {
                business_line: line.number,
                raw_text: line.text.clone(),
                kind: NodeKind::Comment {
                    text: line.text.trim_start_matches('#').trim().to_string(),
                },
            },
            "if" => self.parse_if(&line),
            "while" => {
                let condition = rest_after(&line.text, "while").to_string();
                let body = self.parse_block(Some(line.indent));
                RuleNode {
                    business_line: line.number,
                    raw_text: line.text.clone(),
                    kind: NodeKind::While { condition, body },
                }
            }
            "for" => self.parse_for(&line),
            "any" => {
                self.parse_quantifier(&line, rest_after(&line.text, "any"), QuantifierMode::Any)
            }
            "all" => {
                self.parse_quantifier(&line, rest_after(&line.text, "all"), QuantifierMode::All)
            }
            "switch" => self.parse_switch(&line),
            "try" => self.parse_try(&line),
            "return" => {
                let rest = rest_after(&line.text, "return");
                RuleNode {
                    business_line: line.number,
                    raw_text: line.text.clone(),
                    kind: NodeKind::Return {
                        value: if rest.is_empty() {
                            None
                        } else {
                            Some(rest.to_string())
                        },
                    },
                }
            }
            "break" => RuleNode {
                business_line: line.number,
                raw_text: line.text.clone(),
                kind: NodeKind::Break,
            },
            "continue" => RuleNode {
                business_line: line.number,
                raw_text: line.text.clone(),
                kind: NodeKind::Continue,
            },
            "elseif" | "else" | "case" | "default" | "except" | "finally" => {
                self.issue(
                    line.number,
                    format!("'{keyword}' has no matching opening statement"),
                );
                // Swallow any body so children do not masquerade as
                // top-level statements.
                let _ = self.parse_block(Some(line.indent));
                RuleNode {
                    business_line: line.number,
                    raw_text: line.text.clone(),
                    kind: NodeKind::Unknown,
                }
            }
            _ => self.parse_simple(&line),
        }
    }

    fn parse_if(&mut self, line: &Line) -> RuleNode {
        let condition = rest_after(&line.text, "if").to_string();

        // `if any x in items has ...` is the quantifier shape with the
        // conditional's body attached; recognize it by structure.
        let quantifier_keyword = first_word(&condition);
        if (quantifier_keyword == "any" || quantifier_keyword == "all")
            && looks_like_quantifier(rest_after(&condition, quantifier_keyword))
        {
            let mode = if quantifier_keyword == "any" {
                QuantifierMode::Any
            } else {
                QuantifierMode::All
            };
            let tail = rest_after(&condition, quantifier_keyword).to_string();
            return self.parse_quantifier(line, &tail, mode);
        }

        let body = self.parse_block(Some(line.indent));
        let mut arms = vec![CondArm {
            business_line: line.number,
            condition,
            body,
        }];
        let mut else_body = None;
        let mut else_line = None;

        while let Some(next) = self.peek() {
            if next.indent != line.indent {
                break;
            }
            let next_keyword = first_word(&next.text);
            match next_keyword {
                "elseif" => {
                    let arm_line = self.advance();
                    let condition = rest_after(&arm_line.text, "elseif").to_string();
                    if condition.is_empty() {
                        self.issue(arm_line.number, "'elseif' requires a condition");
                    }
                    let body = self.parse_block(Some(arm_line.indent));
                    arms.push(CondArm {
                        business_line: arm_line.number,
                        condition,
                        body,
                    });
                }
                "else" => {
                    let else_l = self.advance();
                    else_line = Some(else_l.number);
                    else_body = Some(self.parse_block(Some(else_l.indent)));
                    break;
                }
                _ => break,
            }
        }

        RuleNode {
            business_line: line.number,
            raw_text: line.text.clone(),
            kind: NodeKind::If {
                arms,
                else_body,
                else_line,
            },
        }
    }

    fn parse_for(&mut self, line: &Line) -> RuleNode {
        let rest = rest_after(&line.text, "for");
        let (binding, iterable) = match split_keyword(rest, "in") {
            Some(parts) => parts,
            None => {
                self.issue(line.number, "'for' requires the form: for <name> in <items>");
                return RuleNode {
                    business_line: line.number,
                    raw_text: line.text.clone(),
                    kind: NodeKind::Unknown,
                };
            }
        };
        let body = self.parse_block(Some(line.indent));
        RuleNode {
            business_line: line.number,
            raw_text: line.text.clone(),
            kind: NodeKind::For {
                binding,
                iterable,
                body,
            },
        }
    }

    /// Parse the `<binding> in <iterable> has <condition>` tail of a
    /// quantifier, either standalone or hoisted out of an `if` condition.
    fn parse_quantifier(&mut self, line: &Line, tail: &str, mode: QuantifierMode) -> RuleNode {
        let parsed = split_keyword(tail, "in").and_then(|(binding, rest)| {
            split_keyword(&rest, "has").map(|(iterable, condition)| (binding, iterable, condition))
        });

        let (binding, iterable, condition) = match parsed {
            Some(parts) => parts,
            None => {
                self.issue(
                    line.number,
                    "quantifier requires the form: any|all <name> in <items> has <condition>",
                );
                return RuleNode {
                    business_line: line.number,
                    raw_text: line.text.clone(),
                    kind: NodeKind::Unknown,
                };
            }
        };

        let body = self.parse_block(Some(line.indent));
        let mut else_body = None;
        let mut else_line = None;

        if let Some(next) = self.peek() {
            if next.indent == line.indent && first_word(&next.text) == "else" {
                let else_l = self.advance();
                else_line = Some(else_l.number);
                else_body = Some(self.parse_block(Some(else_l.indent)));
            }
        }

        RuleNode {
            business_line: line.number,
            raw_text: line.text.clone(),
            kind: NodeKind::Quantifier {
                mode,
                binding,
                iterable,
                condition,
                body,
                else_body,
                else_line,
            },
        }
    }

    fn parse_switch(&mut self, line: &Line) -> RuleNode {
        let scrutinee = rest_after(&line.text, "switch").to_string();
        let mut cases = Vec::new();
        let mut default_body = None;
        let mut default_line = None;

        while let Some(next) = self.peek() {
            if next.indent <= line.indent {
                break;
            }
            let next_keyword = first_word(&next.text);
            match next_keyword {
                "case" => {
                    let case_line = self.advance();
                    let value = rest_after(&case_line.text, "case").to_string();
                    if value.is_empty() {
                        self.issue(case_line.number, "'case' requires a value");
                    }
                    let body = self.parse_block(Some(case_line.indent));
                    cases.push(SwitchCase {
                        business_line: case_line.number,
                        value,
                        body,
                    });
                }
                "default" => {
                    let default_l = self.advance();
                    default_line = Some(default_l.number);
                    default_body = Some(self.parse_block(Some(default_l.indent)));
                }
                _ => {
                    let stray = self.advance();
                    self.issue(
                        stray.number,
                        "only 'case' and 'default' may appear directly inside 'switch'",
                    );
                    let _ = self.parse_block(Some(stray.indent));
                }
            }
        }

        if cases.is_empty() && default_body.is_none() {
            self.issue(line.number, "'switch' requires at least one 'case' or 'default'");
        }

        RuleNode {
            business_line: line.number,
            raw_text: line.text.clone(),
            kind: NodeKind::Switch {
                scrutinee,
                cases,
                default_body,
                default_line,
            },
        }
    }

    fn parse_try(&mut self, line: &Line) -> RuleNode {
        let body = self.parse_block(Some(line.indent));
        let mut handlers = Vec::new();
        let mut finally_body = None;
        let mut finally_line = None;

        while let Some(next) = self.peek() {
            if next.indent != line.indent {
                break;
            }
            let next_keyword = first_word(&next.text);
            match next_keyword {
                "except" => {
                    let handler_line = self.advance();
                    let exception = rest_after(&handler_line.text, "except").to_string();
                    let body = self.parse_block(Some(handler_line.indent));
                    handlers.push(ExceptArm {
                        business_line: handler_line.number,
                        exception,
                        body,
                    });
                }
                "finally" => {
                    let finally_l = self.advance();
                    finally_line = Some(finally_l.number);
                    finally_body = Some(self.parse_block(Some(finally_l.indent)));
                    break;
                }
                _ => break,
            }
        }

        if handlers.is_empty() && finally_body.is_none() {
            self.issue(line.number, "'try' requires an 'except' or 'finally' clause");
        }

        RuleNode {
            business_line: line.number,
            raw_text: line.text.clone(),
            kind: NodeKind::Try {
                body,
                handlers,
                finally_body,
                finally_line,
            },
        }
    }

    /// Assignment, call, or unknown.
    fn parse_simple(&mut self, line: &Line) -> RuleNode {
        if let Some((target, value)) = split_assignment(&line.text) {
            if is_assignable_target(&target) {
                return RuleNode {
                    business_line: line.number,
                    raw_text: line.text.clone(),
                    kind: NodeKind::Assignment { target, value },
                };
            }
        }

        if looks_like_call(&line.text) {
            return RuleNode {
                business_line: line.number,
                raw_text: line.text.clone(),
                kind: NodeKind::Call {
                    expression: line.text.clone(),
                },
            };
        }

        self.issue(
            line.number,
            "line does not match any recognized rule statement",
        );
        RuleNode {
            business_line: line.number,
            raw_text: line.text.clone(),
            kind: NodeKind::Unknown,
        }
    }
}

/* ===================== Line-shape helpers ===================== */

fn first_word(text: &str) -> &str {
    if text.starts_with('#') {
        return "#";
    }
    text.split_whitespace().next().unwrap_or("")
}

fn rest_after<'a>(text: &'a str, keyword: &str) -> &'a str {
    text.strip_prefix(keyword).unwrap_or(text).trim()
}

/// Split `text` on a standalone keyword outside string literals.
/// `"x in items"` with keyword `in` yields `("x", "items")`.
fn split_keyword(text: &str, keyword: &str) -> Option<(String, String)> {
    let needle = format!(" {keyword} ");
    let mut in_string: Option<char> = None;

    for (i, c) in text.char_indices() {
        if let Some(quote) = in_string {
            if c == quote {
                in_string = None;
            }
            continue;
        }
        match c {
            '"' | '\'' => in_string = Some(c),
            _ => {
                if text[i..].starts_with(&needle) {
                    let left = text[..i].trim().to_string();
                    let right = text[i + needle.len()..].trim().to_string();
                    if !left.is_empty() && !right.is_empty() {
                        return Some((left, right));
                    }
                }
            }
        }
    }
    None
}

fn looks_like_quantifier(tail: &str) -> bool {
    split_keyword(tail, "in")
        .map(|(_, rest)| split_keyword(&rest, "has").is_some())
        .unwrap_or(false)
}

/// Find the first top-level `=` that is an assignment, not a comparison.
fn split_assignment(text: &str) -> Option<(String, String)> {
    let bytes = text.as_bytes();
    let mut in_string: Option<u8> = None;
    let mut depth = 0usize;

    for i in 0..bytes.len() {
        let c = bytes[i];
        if let Some(quote) = in_string {
            if c == quote {
                in_string = None;
            }
            continue;
        }
        match c {
            b'"' | b'\'' => in_string = Some(c),
            b'(' | b'[' => depth += 1,
            b')' | b']' => depth = depth.saturating_sub(1),
            b'=' if depth == 0 => {
                let prev = i.checked_sub(1).map(|j| bytes[j]);
                let next = bytes.get(i + 1).copied();
                let is_comparison = matches!(prev, Some(b'=') | Some(b'!') | Some(b'<') | Some(b'>'))
                    || next == Some(b'=');
                if !is_comparison {
                    let target = text[..i].trim().to_string();
                    let value = text[i + 1..].trim().to_string();
                    if !target.is_empty() && !value.is_empty() {
                        return Some((target, value));
                    }
                    return None;
                }
            }
            _ => {}
        }
    }
    None
}

/// `name` or `name.prop.prop` — the only things assignment may write to.
fn is_assignable_target(target: &str) -> bool {
    !target.is_empty()
        && target.split('.').all(|part| {
            let mut chars = part.chars();
            matches!(chars.next(), Some(c) if c.is_alphabetic() || c == '_')
                && chars.all(|c| c.is_alphanumeric() || c == '_')
        })
}

fn looks_like_call(text: &str) -> bool {
    if !text.ends_with(')') {
        return false;
    }
    let open = match text.find('(') {
        Some(i) => i,
        None => return false,
    };
    is_assignable_target(text[..open].trim())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compiler::ast::{NodeKind, QuantifierMode};

    #[test]
    fn test_parse_assignment() {
        let outcome = parse("total = 5");
        assert!(outcome.issues.is_empty());
        assert_eq!(outcome.nodes.len(), 1);
        match &outcome.nodes[0].kind {
            NodeKind::Assignment { target, value } => {
                assert_eq!(target, "total");
                assert_eq!(value, "5");
            }
            other => panic!("expected assignment, got {other:?}"),
        }
    }

    #[test]
    fn test_parse_if_else_chain() {
        let source = "if a > 5\n  b = 1\nelseif a > 2\n  b = 2\nelse\n  b = 3";
        let outcome = parse(source);
        assert!(outcome.issues.is_empty());
        assert_eq!(outcome.nodes.len(), 1);
        match &outcome.nodes[0].kind {
            NodeKind::If {
                arms, else_body, ..
            } => {
                assert_eq!(arms.len(), 2);
                assert_eq!(arms[0].condition, "a > 5");
                assert_eq!(arms[1].condition, "a > 2");
                assert_eq!(arms[0].body.len(), 1);
                assert_eq!(else_body.as_ref().unwrap().len(), 1);
            }
            other => panic!("expected if chain, got {other:?}"),
        }
    }

    #[test]
    fn test_parse_quantifier() {
        let outcome = parse("any x in items has x.age = 4");
        assert!(outcome.issues.is_empty());
        match &outcome.nodes[0].kind {
            NodeKind::Quantifier {
                mode,
                binding,
                iterable,
                condition,
                body,
                else_body,
                ..
            } => {
                assert_eq!(*mode, QuantifierMode::Any);
                assert_eq!(binding, "x");
                assert_eq!(iterable, "items");
                assert_eq!(condition, "x.age = 4");
                assert!(body.is_empty());
                assert!(else_body.is_none());
            }
            other => panic!("expected quantifier, got {other:?}"),
        }
    }

    #[test]
    fn test_if_any_resolves_structurally() {
        let source = "if any x in items has x.age > 10\n  flagged = true\nelse\n  flagged = false";
        let outcome = parse(source);
        assert!(outcome.issues.is_empty());
        match &outcome.nodes[0].kind {
            NodeKind::Quantifier {
                mode,
                body,
                else_body,
                ..
            } => {
                assert_eq!(*mode, QuantifierMode::Any);
                assert_eq!(body.len(), 1);
                assert_eq!(else_body.as_ref().unwrap().len(), 1);
            }
            other => panic!("expected quantifier from 'if any', got {other:?}"),
        }
    }

    #[test]
    fn test_parse_switch() {
        let source = "switch status\n  case \"open\"\n    priority = 1\n  default\n    priority = 0";
        let outcome = parse(source);
        assert!(outcome.issues.is_empty());
        match &outcome.nodes[0].kind {
            NodeKind::Switch {
                scrutinee,
                cases,
                default_body,
                ..
            } => {
                assert_eq!(scrutinee, "status");
                assert_eq!(cases.len(), 1);
                assert_eq!(cases[0].value, "\"open\"");
                assert!(default_body.is_some());
            }
            other => panic!("expected switch, got {other:?}"),
        }
    }

    #[test]
    fn test_parse_try_except_finally() {
        let source = "try\n  total = riskyCall()\nexcept\n  total = 0\nfinally\n  log(\"done\")";
        let outcome = parse(source);
        assert!(outcome.issues.is_empty());
        match &outcome.nodes[0].kind {
            NodeKind::Try {
                body,
                handlers,
                finally_body,
                ..
            } => {
                assert_eq!(body.len(), 1);
                assert_eq!(handlers.len(), 1);
                assert!(finally_body.is_some());
            }
            other => panic!("expected try, got {other:?}"),
        }
    }

    #[test]
    fn test_unrecognized_line_is_nonfatal() {
        let outcome = parse("total = 1\n???\nnext = 2");
        assert_eq!(outcome.issues.len(), 1);
        assert_eq!(outcome.issues[0].business_line, 2);
        assert_eq!(outcome.nodes.len(), 3);
        assert_eq!(outcome.nodes[1].kind, NodeKind::Unknown);
        // The statement after the bad line still parses.
        match &outcome.nodes[2].kind {
            NodeKind::Assignment { target, .. } => assert_eq!(target, "next"),
            other => panic!("expected assignment, got {other:?}"),
        }
    }

    #[test]
    fn test_orphan_else_reports_line() {
        let outcome = parse("else\n  b = 1");
        assert_eq!(outcome.issues.len(), 1);
        assert_eq!(outcome.issues[0].business_line, 1);
    }

    #[test]
    fn test_tab_indentation_rejected() {
        let outcome = parse("if a > 1\n\tb = 2");
        assert!(outcome
            .issues
            .iter()
            .any(|i| i.message.contains("tabs")));
    }

    #[test]
    fn test_condition_equals_stays_raw_until_generation() {
        let outcome = parse("if tier = \"gold\"\n  discount = 10");
        match &outcome.nodes[0].kind {
            NodeKind::If { arms, .. } => assert_eq!(arms[0].condition, "tier = \"gold\""),
            other => panic!("expected if, got {other:?}"),
        }
    }
}
