//! Incremental scope tracker over rule text.
//!
//! Maintains the symbol table completion and stepping lean on: every
//! declaration with its line, nesting depth and inferred type. Refresh
//! re-derives the table from scratch but is content-hash-gated, so repeated
//! refreshes over unchanged text are cheap.

use tracing::debug;

use crate::blockmap::sha256_hex;
use crate::registry::Registries;
use crate::types::{InferredType, PrimitiveType, TypeSource, VariableInfo};

/// A lexical scope with its line extent. Extents let lookups honor "the
/// innermost enclosing scope that contains a declaration" exactly.
#[derive(Debug, Clone)]
struct Scope {
    parent: Option<usize>,
    depth: usize,
    start_line: usize,
    end_line: usize,
}

#[derive(Debug, Default)]
pub struct ScopeTracker {
    scopes: Vec<Scope>,
    /// Declarations in document order, each tagged with its scope index.
    declarations: Vec<(usize, VariableInfo)>,
    content_hash: Option<String>,
}

impl ScopeTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Rebuild the symbol table unless the document is unchanged.
    /// Returns whether a rebuild actually ran.
    pub fn refresh(&mut self, text: &str, registries: &Registries) -> bool {
        let hash = sha256_hex(text);
        if self.content_hash.as_deref() == Some(hash.as_str()) {
            return false;
        }

        self.scopes = vec![Scope {
            parent: None,
            depth: 0,
            start_line: 1,
            end_line: usize::MAX,
        }];
        self.declarations.clear();

        let mut scope_stack: Vec<usize> = vec![0];
        let mut indent_stack: Vec<usize> = vec![0];

        for (idx, raw) in text.lines().enumerate() {
            let line_no = idx + 1;
            if raw.trim().is_empty() || raw.trim_start().starts_with('#') {
                continue;
            }
            let indent = raw.len() - raw.trim_start().len();

            while indent < *indent_stack.last().unwrap() {
                indent_stack.pop();
                if let Some(closed) = scope_stack.pop() {
                    self.scopes[closed].end_line = line_no.saturating_sub(1);
                }
            }
            if indent > *indent_stack.last().unwrap() {
                let parent = *scope_stack.last().unwrap();
                let depth = self.scopes[parent].depth + 1;
                self.scopes.push(Scope {
                    parent: Some(parent),
                    depth,
                    start_line: line_no,
                    end_line: usize::MAX,
                });
                scope_stack.push(self.scopes.len() - 1);
                indent_stack.push(indent);
            }

            let scope_id = *scope_stack.last().unwrap();
            self.collect_declaration(raw.trim(), line_no, scope_id, registries);
        }

        let last_line = text.lines().count();
        for scope in &mut self.scopes {
            if scope.end_line == usize::MAX {
                scope.end_line = last_line;
            }
        }

        self.content_hash = Some(hash);
        debug!(
            declarations = self.declarations.len(),
            scopes = self.scopes.len(),
            "symbol table rebuilt"
        );
        true
    }

    fn collect_declaration(
        &mut self,
        trimmed: &str,
        line_no: usize,
        scope_id: usize,
        registries: &Registries,
    ) {
        let depth = self.scopes[scope_id].depth;

        // Loop/quantifier bindings. Like the Python the rules compile to,
        // the binding lives in the scope holding the loop header.
        let first = trimmed.split_whitespace().next().unwrap_or("");
        if matches!(first, "for" | "any" | "all") {
            let tail = trimmed[first.len()..].trim();
            if let Some(in_pos) = find_word(tail, "in") {
                let binding = tail[..in_pos].trim();
                if is_identifier(binding) {
                    self.declarations.push((
                        scope_id,
                        VariableInfo {
                            name: binding.to_string(),
                            inferred: InferredType::Unknown,
                            confidence: 0.3,
                            declaring_line: line_no,
                            scope_depth: depth,
                            source: TypeSource::Loop,
                        },
                    ));
                }
            }
            return;
        }

        // Assignments to bare names declare.
        if let Some(eq) = find_assignment_equals(trimmed) {
            let target = trimmed[..eq].trim();
            if is_identifier(target) {
                let value = trimmed[eq + 1..].trim();
                let (inferred, confidence, source) =
                    infer_expression(value, line_no, self, registries);
                self.declarations.push((
                    scope_id,
                    VariableInfo {
                        name: target.to_string(),
                        inferred,
                        confidence,
                        declaring_line: line_no,
                        scope_depth: depth,
                        source,
                    },
                ));
            }
        }
    }

    /// All declarations, document order.
    pub fn variables(&self) -> Vec<&VariableInfo> {
        self.declarations.iter().map(|(_, v)| v).collect()
    }

    /// Resolve `name` as visible at `line`: the most recent declaration with
    /// `declaring_line <= line` in the innermost enclosing scope that has
    /// one.
    pub fn resolve(&self, name: &str, line: usize) -> Option<&VariableInfo> {
        let mut scope_id = Some(self.innermost_scope_at(line));
        while let Some(id) = scope_id {
            let found = self
                .declarations
                .iter()
                .filter(|(sid, v)| *sid == id && v.name == name && v.declaring_line <= line)
                .map(|(_, v)| v)
                .max_by_key(|v| v.declaring_line);
            if found.is_some() {
                return found;
            }
            scope_id = self.scopes[id].parent;
        }
        None
    }

    fn innermost_scope_at(&self, line: usize) -> usize {
        self.scopes
            .iter()
            .enumerate()
            .filter(|(_, s)| s.start_line <= line && line <= s.end_line)
            .max_by_key(|(_, s)| s.depth)
            .map(|(i, _)| i)
            .unwrap_or(0)
    }
}

/* ===================== Expression inference ===================== */

/// Infer the type of a right-hand-side expression. Resolution order:
/// literal, registered call return, property chain, prior variable, global
/// business object, unknown.
pub fn infer_expression(
    expr: &str,
    line: usize,
    tracker: &ScopeTracker,
    registries: &Registries,
) -> (InferredType, f32, TypeSource) {
    let trimmed = expr.trim();

    if let Some(primitive) = literal_type(trimmed) {
        return (
            InferredType::Primitive { name: primitive },
            1.0,
            TypeSource::Literal,
        );
    }

    // someFunction(...)
    if trimmed.ends_with(')') {
        if let Some(open) = trimmed.find('(') {
            let callee = trimmed[..open].trim();
            if is_identifier(callee) {
                if let Some(signature) = registries.functions.function(callee) {
                    return (signature.returns.clone(), 0.9, TypeSource::Call);
                }
                // A class name used as a constructor.
                if registries.objects.class(callee).is_some() {
                    return (
                        InferredType::Instance {
                            class: callee.to_string(),
                        },
                        0.9,
                        TypeSource::Call,
                    );
                }
                return (InferredType::Unknown, 0.1, TypeSource::Call);
            }
        }
    }

    // base.property.chain
    if trimmed.contains('.') && is_property_chain(trimmed) {
        let mut parts = trimmed.split('.');
        let base = parts.next().unwrap();
        let (mut current, mut confidence, source) =
            resolve_name(base, line, tracker, registries);
        for part in parts {
            let field = properties_of_type(&current, registries)
                .into_iter()
                .find(|f| f.name == part);
            match field {
                Some(field) => {
                    current = field.ty;
                    confidence *= 0.9;
                }
                None => return (InferredType::Unknown, 0.0, source),
            }
        }
        return (current, confidence, source);
    }

    if is_identifier(trimmed) {
        return resolve_name(trimmed, line, tracker, registries);
    }

    (InferredType::Unknown, 0.0, TypeSource::Assignment)
}

fn resolve_name(
    name: &str,
    line: usize,
    tracker: &ScopeTracker,
    registries: &Registries,
) -> (InferredType, f32, TypeSource) {
    if let Some(var) = tracker.resolve(name, line.saturating_sub(1)) {
        return (
            var.inferred.clone(),
            var.confidence * 0.95,
            TypeSource::Assignment,
        );
    }
    if let Some(ty) = registries.objects.global(name) {
        return (ty.clone(), 0.8, TypeSource::Global);
    }
    (InferredType::Unknown, 0.0, TypeSource::Assignment)
}

/// Typed fields of an inferred type, resolved through the registries.
pub fn properties_of_type(
    ty: &InferredType,
    registries: &Registries,
) -> Vec<crate::registry::FieldDef> {
    match ty {
        InferredType::Instance { class } => registries
            .objects
            .class(class)
            .map(|c| c.properties.clone())
            .unwrap_or_default(),
        InferredType::CallResult { shape } => registries
            .functions
            .shape(shape)
            .map(|s| s.fields.clone())
            .unwrap_or_default(),
        _ => Vec::new(),
    }
}

fn literal_type(expr: &str) -> Option<PrimitiveType> {
    if expr.is_empty() {
        return None;
    }
    if (expr.starts_with('"') && expr.ends_with('"') && expr.len() >= 2)
        || (expr.starts_with('\'') && expr.ends_with('\'') && expr.len() >= 2)
    {
        return Some(PrimitiveType::Str);
    }
    if expr == "true" || expr == "false" {
        return Some(PrimitiveType::Bool);
    }
    if expr == "null" {
        return Some(PrimitiveType::Null);
    }
    if expr.starts_with('[') && expr.ends_with(']') {
        return Some(PrimitiveType::List);
    }
    if expr.starts_with('{') && expr.ends_with('}') {
        return Some(PrimitiveType::Dict);
    }
    if expr.parse::<i64>().is_ok() {
        return Some(PrimitiveType::Int);
    }
    if expr.parse::<f64>().is_ok() {
        return Some(PrimitiveType::Float);
    }
    None
}

fn is_identifier(text: &str) -> bool {
    let mut chars = text.chars();
    matches!(chars.next(), Some(c) if c.is_alphabetic() || c == '_')
        && chars.all(|c| c.is_alphanumeric() || c == '_')
}

fn is_property_chain(text: &str) -> bool {
    text.split('.').all(is_identifier)
}

/// Position of a standalone word, outside strings.
fn find_word(text: &str, word: &str) -> Option<usize> {
    let needle = format!(" {word} ");
    text.find(&needle).map(|i| i + 1)
}

/// Position of an assignment `=`, skipping comparison operators and string
/// contents.
fn find_assignment_equals(text: &str) -> Option<usize> {
    let bytes = text.as_bytes();
    let mut in_string: Option<u8> = None;
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
            b'=' => {
                let prev = i.checked_sub(1).map(|j| bytes[j]);
                let next = bytes.get(i + 1).copied();
                let comparison = matches!(prev, Some(b'=') | Some(b'!') | Some(b'<') | Some(b'>'))
                    || next == Some(b'=');
                if !comparison {
                    return Some(i);
                }
            }
            _ => {}
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::Registries;

    fn tracker(text: &str) -> (ScopeTracker, Registries) {
        let registries = Registries::with_defaults();
        let mut tracker = ScopeTracker::new();
        tracker.refresh(text, &registries);
        (tracker, registries)
    }

    #[test]
    fn test_literal_inference() {
        let (tracker, _) = tracker("count = 5\nname = \"amy\"\nflag = true\nrate = 1.5");
        let count = tracker.resolve("count", 10).unwrap();
        assert_eq!(
            count.inferred,
            InferredType::Primitive {
                name: PrimitiveType::Int
            }
        );
        assert_eq!(count.source, TypeSource::Literal);
        assert_eq!(
            tracker.resolve("rate", 10).unwrap().inferred,
            InferredType::Primitive {
                name: PrimitiveType::Float
            }
        );
    }

    #[test]
    fn test_declaration_not_visible_before_line() {
        let (tracker, _) = tracker("a = 1\nb = 2");
        assert!(tracker.resolve("b", 1).is_none());
        assert!(tracker.resolve("b", 2).is_some());
    }

    #[test]
    fn test_redeclaration_takes_latest() {
        let (tracker, _) = tracker("a = 1\na = \"now a string\"");
        let a = tracker.resolve("a", 5).unwrap();
        assert_eq!(
            a.inferred,
            InferredType::Primitive {
                name: PrimitiveType::Str
            }
        );
        assert_eq!(a.declaring_line, 2);
    }

    #[test]
    fn test_inner_scope_shadows_outer() {
        let text = "a = 1\nif a > 0\n  a = \"inner\"\n  b = a\nc = a";
        let (tracker, _) = tracker(text);
        // At line 4 (inside the if body) the inner declaration wins.
        let inner = tracker.resolve("a", 4).unwrap();
        assert_eq!(inner.declaring_line, 3);
        // At line 5 (back at top level) the outer declaration wins.
        let outer = tracker.resolve("a", 5).unwrap();
        assert_eq!(outer.declaring_line, 1);
    }

    #[test]
    fn test_loop_binding_recorded() {
        let (tracker, _) = tracker("for item in orders\n  total = item");
        let item = tracker.resolve("item", 2).unwrap();
        assert_eq!(item.source, TypeSource::Loop);
        assert_eq!(item.declaring_line, 1);
    }

    #[test]
    fn test_refresh_is_hash_gated() {
        let registries = Registries::with_defaults();
        let mut tracker = ScopeTracker::new();
        assert!(tracker.refresh("a = 1", &registries));
        assert!(!tracker.refresh("a = 1", &registries));
        assert!(tracker.refresh("a = 2", &registries));
    }

    #[test]
    fn test_copy_assignment_propagates_type() {
        let (tracker, _) = tracker("a = 5\nb = a");
        let b = tracker.resolve("b", 5).unwrap();
        assert_eq!(
            b.inferred,
            InferredType::Primitive {
                name: PrimitiveType::Int
            }
        );
        assert!(b.confidence < 1.0);
    }
}
