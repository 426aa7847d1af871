//! Expression translation from rule text to Python.
//!
//! The rule dialect is deliberately close to Python: comparisons and
//! `and`/`or`/`not` pass through unchanged. The differences handled here:
//! literal casing (`true`/`false`/`null`), the authored equality `=` inside
//! conditions, and registered natural-language operators
//! (`name contains "x"`).

use crate::registry::OperatorRegistry;

/// Translate an expression appearing in condition position (`if`, `elseif`,
/// `while`, quantifier `has`). A bare `=` here is authored equality.
pub fn translate_condition(expr: &str, operators: &OperatorRegistry) -> String {
    let clauses = split_connectors(expr);
    let mut out = String::new();
    for (connector, clause) in clauses {
        if let Some(connector) = connector {
            out.push(' ');
            out.push_str(connector);
            out.push(' ');
        }
        out.push_str(&translate_clause(&clause, operators, true));
    }
    out
}

/// Translate an expression appearing in value position (assignment
/// right-hand side, call arguments, return values).
pub fn translate_value(expr: &str, operators: &OperatorRegistry) -> String {
    let clauses = split_connectors(expr);
    let mut out = String::new();
    for (connector, clause) in clauses {
        if let Some(connector) = connector {
            out.push(' ');
            out.push_str(connector);
            out.push(' ');
        }
        out.push_str(&translate_clause(&clause, operators, false));
    }
    out
}

fn translate_clause(clause: &str, operators: &OperatorRegistry, condition: bool) -> String {
    let clause = replace_literals(clause);

    // A registered natural-language operator splits the clause into
    // left/right operands.
    for op in operators.names() {
        if let Some((left, right)) = split_word(&clause, op) {
            let left = replace_literals(&left);
            let right = replace_literals(&right);
            if let Some(lowered) = operators.lower(op, left.trim(), right.trim()) {
                return lowered;
            }
        }
    }

    if condition {
        replace_bare_equals(&clause)
    } else {
        clause
    }
}

/// Map rule literals to Python literals outside string contents.
fn replace_literals(text: &str) -> String {
    let mut out = replace_word(text, "true", "True");
    out = replace_word(&out, "false", "False");
    out = replace_word(&out, "null", "None");
    out
}

/// Split on top-level `and`/`or` connectors, outside strings and parens.
/// Returns (connector-before-clause, clause) pairs; the first connector is
/// `None`. `not` stays attached to its clause since Python spells it the
/// same way.
fn split_connectors(expr: &str) -> Vec<(Option<&'static str>, String)> {
    let mut clauses = Vec::new();
    let mut current = String::new();
    let mut pending: Option<&'static str> = None;
    let mut in_string: Option<char> = None;
    let mut depth = 0usize;
    let mut rest = expr;
    let mut prev: Option<char> = None;

    'outer: while !rest.is_empty() {
        let at_boundary = prev.map_or(true, |p| !p.is_alphanumeric() && p != '_');
        if in_string.is_none() && depth == 0 && at_boundary {
            for (keyword, connector) in [("and", "and"), ("or", "or")] {
                if let Some(after) = strip_leading_word(rest, keyword) {
                    let clause = current.trim().to_string();
                    if !clause.is_empty() {
                        clauses.push((pending, clause));
                    }
                    pending = Some(connector);
                    current = String::new();
                    rest = after;
                    prev = Some(' ');
                    continue 'outer;
                }
            }
        }

        let c = rest.chars().next().unwrap();
        match (in_string, c) {
            (Some(quote), c) if c == quote => in_string = None,
            (Some(_), _) => {}
            (None, '"') | (None, '\'') => in_string = Some(c),
            (None, '(') | (None, '[') => depth += 1,
            (None, ')') | (None, ']') => depth = depth.saturating_sub(1),
            _ => {}
        }
        current.push(c);
        prev = Some(c);
        rest = &rest[c.len_utf8()..];
    }

    let clause = current.trim().to_string();
    if !clause.is_empty() {
        clauses.push((pending, clause));
    }
    if clauses.is_empty() {
        clauses.push((None, String::new()));
    }
    clauses
}

/// If `text` starts with `word` followed by whitespace (a clause boundary),
/// return the remainder. Requires a preceding boundary too, which the caller
/// guarantees by consuming up to here.
fn strip_leading_word<'a>(text: &'a str, word: &str) -> Option<&'a str> {
    let after = text.strip_prefix(word)?;
    if after.starts_with(char::is_whitespace) {
        Some(after.trim_start())
    } else {
        None
    }
}

/// Split `text` at a standalone word outside strings; both sides must be
/// non-empty.
fn split_word(text: &str, word: &str) -> Option<(String, String)> {
    let mut in_string: Option<char> = None;
    let bytes = text.as_bytes();

    for (i, c) in text.char_indices() {
        if let Some(quote) = in_string {
            if c == quote {
                in_string = None;
            }
            continue;
        }
        if c == '"' || c == '\'' {
            in_string = Some(c);
            continue;
        }
        if text[i..].starts_with(word) {
            let end = i + word.len();
            let before_ok = i == 0 || !is_ident_byte(bytes[i - 1]);
            let after_ok = end == text.len() || !is_ident_byte(bytes[end]);
            if before_ok && after_ok {
                let left = text[..i].trim();
                let right = text[end..].trim();
                if !left.is_empty() && !right.is_empty() {
                    return Some((left.to_string(), right.to_string()));
                }
            }
        }
    }
    None
}

/// Replace a standalone word outside strings.
fn replace_word(text: &str, from: &str, to: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut in_string: Option<char> = None;
    let bytes = text.as_bytes();
    let mut i = 0;

    while i < text.len() {
        let c = text[i..].chars().next().unwrap();
        if let Some(quote) = in_string {
            if c == quote {
                in_string = None;
            }
            out.push(c);
            i += c.len_utf8();
            continue;
        }
        if c == '"' || c == '\'' {
            in_string = Some(c);
            out.push(c);
            i += c.len_utf8();
            continue;
        }
        if text[i..].starts_with(from) {
            let end = i + from.len();
            let before_ok = i == 0 || !is_ident_byte(bytes[i - 1]);
            let after_ok = end == text.len() || !is_ident_byte(bytes[end]);
            if before_ok && after_ok {
                out.push_str(to);
                i = end;
                continue;
            }
        }
        out.push(c);
        i += c.len_utf8();
    }
    out
}

/// Rewrite authored equality: a bare `=` outside strings that is not part
/// of `==`, `!=`, `<=`, `>=` becomes `==`.
fn replace_bare_equals(text: &str) -> String {
    let bytes = text.as_bytes();
    let mut out = String::with_capacity(text.len() + 4);
    let mut in_string: Option<u8> = None;
    let mut i = 0;

    while i < bytes.len() {
        let c = bytes[i];
        if let Some(quote) = in_string {
            if c == quote {
                in_string = None;
            }
            out.push(c as char);
            i += 1;
            continue;
        }
        match c {
            b'"' | b'\'' => {
                in_string = Some(c);
                out.push(c as char);
                i += 1;
            }
            b'=' => {
                let prev = i.checked_sub(1).map(|j| bytes[j]);
                let next = bytes.get(i + 1).copied();
                let part_of_comparison = matches!(
                    prev,
                    Some(b'=') | Some(b'!') | Some(b'<') | Some(b'>')
                ) || next == Some(b'=');
                if part_of_comparison {
                    out.push('=');
                } else {
                    out.push_str("==");
                }
                i += 1;
            }
            _ => {
                // Copy the full UTF-8 scalar, not just the lead byte.
                let ch = text[i..].chars().next().unwrap();
                out.push(ch);
                i += ch.len_utf8();
            }
        }
    }
    out
}

fn is_ident_byte(b: u8) -> bool {
    b.is_ascii_alphanumeric() || b == b'_'
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ops() -> OperatorRegistry {
        OperatorRegistry::with_defaults()
    }

    #[test]
    fn test_bare_equals_becomes_comparison() {
        assert_eq!(translate_condition("x.age = 4", &ops()), "x.age == 4");
        assert_eq!(translate_condition("a == 4", &ops()), "a == 4");
        assert_eq!(translate_condition("a != 4", &ops()), "a != 4");
        assert_eq!(translate_condition("a <= 4", &ops()), "a <= 4");
    }

    #[test]
    fn test_equals_inside_string_untouched() {
        assert_eq!(
            translate_condition("name = \"a = b\"", &ops()),
            "name == \"a = b\""
        );
    }

    #[test]
    fn test_literals() {
        assert_eq!(translate_value("true", &ops()), "True");
        assert_eq!(translate_value("[true, false, null]", &ops()), "[True, False, None]");
        // Identifiers containing the words stay intact.
        assert_eq!(translate_value("trueValue", &ops()), "trueValue");
    }

    #[test]
    fn test_natural_operator_lowering() {
        assert_eq!(
            translate_condition("name contains \"smith\"", &ops()),
            "\"smith\" in name"
        );
        assert_eq!(
            translate_condition("email beginsWith \"admin\"", &ops()),
            "email.startswith(\"admin\")"
        );
    }

    #[test]
    fn test_connectors_translate_per_clause() {
        assert_eq!(
            translate_condition("name contains \"a\" and age = 4", &ops()),
            "\"a\" in name and age == 4"
        );
        assert_eq!(
            translate_condition("not done or count > 2", &ops()),
            "not done or count > 2"
        );
    }
}
