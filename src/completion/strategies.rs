//! The completion strategy battery.
//!
//! Strategies run in a fixed order and the first non-empty result wins.
//! Each one is independently testable: it receives the cursor context and
//! the inference service, and returns a ranked list or no opinion.

use crate::completion::CompletionContext;
use crate::inference::{properties_of_type, TypeInferenceService};
use crate::types::{CompletionItem, CompletionKind, InferredType, PrimitiveType, VariableInfo};

/// Rule-language keywords with their hover blurbs.
pub const KEYWORDS: &[(&str, &str)] = &[
    ("if", "Conditional statement"),
    ("elseif", "Additional condition branch"),
    ("else", "Fallback branch"),
    ("while", "Loop while a condition holds"),
    ("for", "Iterate over a collection"),
    ("switch", "Select one of several cases"),
    ("case", "One switch value"),
    ("default", "Switch fallback"),
    ("try", "Guard statements that may fail"),
    ("except", "Handle a failure"),
    ("finally", "Always-run cleanup"),
    ("any", "True if any element matches"),
    ("all", "True if every element matches"),
    ("in", "Membership / iteration source"),
    ("has", "Quantifier condition"),
    ("return", "Stop and produce a value"),
    ("break", "Exit the current loop"),
    ("continue", "Skip to the next iteration"),
    ("and", "Both conditions hold"),
    ("or", "Either condition holds"),
    ("not", "Negate a condition"),
    ("true", "Boolean true"),
    ("false", "Boolean false"),
    ("null", "No value"),
];

const SQL_KEYWORDS: &[&str] = &[
    "SELECT", "FROM", "WHERE", "AND", "OR", "ORDER BY", "GROUP BY", "HAVING", "LIMIT", "JOIN",
    "LEFT JOIN", "INNER JOIN", "ON", "AS", "DISTINCT",
];

type Strategy = fn(&CompletionContext, &TypeInferenceService) -> Option<Vec<CompletionItem>>;

/// Run the ordered battery; first non-empty result wins.
pub fn run_battery(
    ctx: &CompletionContext,
    inference: &TypeInferenceService,
) -> Vec<CompletionItem> {
    const BATTERY: &[Strategy] = &[
        keyword_snippets,
        sql_completions,
        iterable_completions,
        post_operator_completions,
        parameter_completions,
        keyword_guard,
        property_access,
        class_names,
        default_listing,
    ];

    for strategy in BATTERY {
        if let Some(items) = strategy(ctx, inference) {
            if !items.is_empty() {
                return items;
            }
        }
    }
    Vec::new()
}

fn item(
    index: usize,
    label: &str,
    kind: CompletionKind,
    insert_text: &str,
    detail: Option<String>,
    documentation: Option<String>,
) -> CompletionItem {
    CompletionItem {
        label: label.to_string(),
        kind,
        insert_text: insert_text.to_string(),
        detail,
        documentation,
        sort_text: format!("{index:03}_{label}"),
    }
}

/* ===================== 1. Statement snippets ===================== */

/// On a blank statement position, offer whole-statement snippets.
pub fn keyword_snippets(
    ctx: &CompletionContext,
    _inference: &TypeInferenceService,
) -> Option<Vec<CompletionItem>> {
    if !ctx.prefix.trim().is_empty() {
        return None;
    }
    let snippets: &[(&str, &str, &str)] = &[
        ("if", "if ${1:condition}\n  ${2}", "Conditional statement"),
        ("for", "for ${1:item} in ${2:items}\n  ${3}", "Iterate over a collection"),
        ("while", "while ${1:condition}\n  ${2}", "Loop while a condition holds"),
        ("any", "any ${1:item} in ${2:items} has ${3:condition}", "True if any element matches"),
        ("all", "all ${1:item} in ${2:items} has ${3:condition}", "True if every element matches"),
        ("switch", "switch ${1:value}\n  case ${2:first}\n    ${3}", "Select one of several cases"),
        ("try", "try\n  ${1}\nexcept\n  ${2}", "Guard statements that may fail"),
        ("return", "return ${1:value}", "Stop and produce a value"),
    ];
    Some(
        snippets
            .iter()
            .enumerate()
            .map(|(i, (label, insert, doc))| {
                item(
                    i,
                    label,
                    CompletionKind::Snippet,
                    insert,
                    None,
                    Some(doc.to_string()),
                )
            })
            .collect(),
    )
}

/* ===================== 2. SQL context ===================== */

/// Inside a string that reads like SQL, offer SQL keywords.
pub fn sql_completions(
    ctx: &CompletionContext,
    _inference: &TypeInferenceService,
) -> Option<Vec<CompletionItem>> {
    let content = string_content_at_cursor(&ctx.prefix)?;
    let upper = content.trim_start().to_uppercase();
    let looks_like_sql =
        upper.starts_with("SELECT") || upper.starts_with("INSERT") || upper.starts_with("UPDATE");
    if !looks_like_sql {
        return None;
    }
    let partial = ctx.current_word.to_uppercase();
    Some(
        SQL_KEYWORDS
            .iter()
            .filter(|kw| partial.is_empty() || kw.starts_with(&partial))
            .enumerate()
            .map(|(i, kw)| item(i, kw, CompletionKind::Keyword, kw, None, None))
            .collect(),
    )
}

/// Content of the string literal the cursor is inside, if any.
fn string_content_at_cursor(prefix: &str) -> Option<String> {
    let mut in_string: Option<char> = None;
    let mut content = String::new();
    for c in prefix.chars() {
        match in_string {
            Some(quote) if c == quote => {
                in_string = None;
                content.clear();
            }
            Some(_) => content.push(c),
            None if c == '"' || c == '\'' => in_string = Some(c),
            None => {}
        }
    }
    in_string.map(|_| content)
}

/* ===================== 3. Iterables after `in` ===================== */

/// After `for x in` / `any x in`, prefer collection-typed variables.
pub fn iterable_completions(
    ctx: &CompletionContext,
    inference: &TypeInferenceService,
) -> Option<Vec<CompletionItem>> {
    let before_word = before_current_word(ctx);
    let trimmed = before_word.trim_end();
    if !trimmed.ends_with(" in") {
        return None;
    }
    let head = trimmed.trim_start();
    if !(head.starts_with("for ") || head.starts_with("any ") || head.starts_with("all ")) {
        return None;
    }

    let lists: Vec<&VariableInfo> = visible_variables(ctx, inference)
        .into_iter()
        .filter(|v| {
            matches!(
                v.inferred,
                InferredType::Primitive {
                    name: PrimitiveType::List
                }
            )
        })
        .collect();
    let pool = if lists.is_empty() {
        visible_variables(ctx, inference)
    } else {
        lists
    };

    Some(
        pool.into_iter()
            .filter(|v| matches_word(&v.name, &ctx.current_word))
            .enumerate()
            .map(|(i, v)| {
                item(
                    i,
                    &v.name,
                    CompletionKind::Variable,
                    &v.name,
                    Some(v.inferred.display_name()),
                    None,
                )
            })
            .collect(),
    )
}

/* ===================== 4. After an operator ===================== */

/// After a comparison or logical operator, offer identifiers and literals.
pub fn post_operator_completions(
    ctx: &CompletionContext,
    inference: &TypeInferenceService,
) -> Option<Vec<CompletionItem>> {
    let before_word = before_current_word(ctx);
    let trimmed = before_word.trim_end();
    let after_operator = ["==", "!=", "<=", ">=", "<", ">", "="]
        .iter()
        .any(|op| trimmed.ends_with(op))
        || [" and", " or", " not"].iter().any(|kw| trimmed.ends_with(kw));
    if !after_operator {
        return None;
    }

    let mut items: Vec<CompletionItem> = visible_variables(ctx, inference)
        .into_iter()
        .filter(|v| matches_word(&v.name, &ctx.current_word))
        .enumerate()
        .map(|(i, v)| {
            item(
                i,
                &v.name,
                CompletionKind::Variable,
                &v.name,
                Some(v.inferred.display_name()),
                None,
            )
        })
        .collect();

    for (i, literal) in ["true", "false", "null"].iter().enumerate() {
        if matches_word(literal, &ctx.current_word) {
            items.push(item(
                100 + i,
                literal,
                CompletionKind::Keyword,
                literal,
                None,
                None,
            ));
        }
    }
    Some(items)
}

/* ===================== 5. Call parameters ===================== */

/// Inside a registered function's argument list, offer variables whose
/// inferred type matches the active parameter.
pub fn parameter_completions(
    ctx: &CompletionContext,
    inference: &TypeInferenceService,
) -> Option<Vec<CompletionItem>> {
    let (callee, param_index) = enclosing_call(&ctx.prefix)?;
    let signature = inference.registries().functions.function(&callee)?;
    let param = signature.params.get(param_index)?;

    let matches: Vec<CompletionItem> = visible_variables(ctx, inference)
        .into_iter()
        .filter(|v| v.inferred == param.ty && matches_word(&v.name, &ctx.current_word))
        .enumerate()
        .map(|(i, v)| {
            item(
                i,
                &v.name,
                CompletionKind::Variable,
                &v.name,
                Some(format!("{}: {}", param.name, param.ty.display_name())),
                Some(signature.render()),
            )
        })
        .collect();
    if matches.is_empty() {
        None
    } else {
        Some(matches)
    }
}

/// Walk back through the prefix for the innermost unclosed call: returns
/// the callee and the 0-based index of the argument under the cursor.
fn enclosing_call(prefix: &str) -> Option<(String, usize)> {
    let mut depth = 0i32;
    let mut open = None;
    for (i, c) in prefix.char_indices().rev() {
        match c {
            ')' => depth += 1,
            '(' => {
                if depth == 0 {
                    open = Some(i);
                    break;
                }
                depth -= 1;
            }
            _ => {}
        }
    }
    let open = open?;
    let callee: String = prefix[..open]
        .chars()
        .rev()
        .take_while(|c| c.is_alphanumeric() || *c == '_')
        .collect::<Vec<_>>()
        .into_iter()
        .rev()
        .collect();
    if callee.is_empty() {
        return None;
    }
    let args = &prefix[open + 1..];
    let mut commas = 0;
    let mut arg_depth = 0i32;
    for c in args.chars() {
        match c {
            '(' | '[' => arg_depth += 1,
            ')' | ']' => arg_depth -= 1,
            ',' if arg_depth == 0 => commas += 1,
            _ => {}
        }
    }
    Some((callee, commas))
}

/* ===================== 6. Keyword guard ===================== */

/// A partial word that prefixes a keyword completes to it.
pub fn keyword_guard(
    ctx: &CompletionContext,
    _inference: &TypeInferenceService,
) -> Option<Vec<CompletionItem>> {
    if ctx.current_word.is_empty() {
        return None;
    }
    let matches: Vec<CompletionItem> = KEYWORDS
        .iter()
        .filter(|(kw, _)| kw.starts_with(&ctx.current_word) && *kw != ctx.current_word)
        .enumerate()
        .map(|(i, (kw, doc))| {
            item(
                i,
                kw,
                CompletionKind::Keyword,
                kw,
                None,
                Some(doc.to_string()),
            )
        })
        .collect();
    if matches.is_empty() {
        None
    } else {
        Some(matches)
    }
}

/* ===================== 7. Member access ===================== */

/// After a dot, list the typed properties of the base expression.
pub fn property_access(
    ctx: &CompletionContext,
    inference: &TypeInferenceService,
) -> Option<Vec<CompletionItem>> {
    if !ctx.after_dot {
        return None;
    }
    let target = ctx.dot_target.as_deref()?;

    // Resolve the base, then walk any remaining property chain.
    let mut parts = target.split('.');
    let base = parts.next()?;
    let (mut ty, _) = inference.type_of(base, ctx.cursor_line);
    for part in parts {
        let field = properties_of_type(&ty, inference.registries())
            .into_iter()
            .find(|f| f.name == part)?;
        ty = field.ty;
    }

    let fields = properties_of_type(&ty, inference.registries());
    if fields.is_empty() {
        return None;
    }
    Some(
        fields
            .iter()
            .filter(|f| matches_word(&f.name, &ctx.current_word))
            .enumerate()
            .map(|(i, f)| {
                item(
                    i,
                    &f.name,
                    CompletionKind::Property,
                    &f.name,
                    Some(f.ty.display_name()),
                    None,
                )
            })
            .collect(),
    )
}

/* ===================== 8. Class names ===================== */

/// A capitalized partial word completes to registered class names.
pub fn class_names(
    ctx: &CompletionContext,
    inference: &TypeInferenceService,
) -> Option<Vec<CompletionItem>> {
    let first = ctx.current_word.chars().next()?;
    if !first.is_uppercase() {
        return None;
    }
    let matches: Vec<CompletionItem> = inference
        .registries()
        .objects
        .class_names()
        .filter(|name| name.starts_with(&ctx.current_word))
        .enumerate()
        .map(|(i, name)| item(i, name, CompletionKind::Class, name, None, None))
        .collect();
    if matches.is_empty() {
        None
    } else {
        Some(matches)
    }
}

/* ===================== 9. Default listing ===================== */

/// Variables in scope, registered functions and ambient business objects.
pub fn default_listing(
    ctx: &CompletionContext,
    inference: &TypeInferenceService,
) -> Option<Vec<CompletionItem>> {
    let mut items = Vec::new();
    let mut index = 0;

    for variable in visible_variables(ctx, inference) {
        if matches_word(&variable.name, &ctx.current_word) {
            items.push(item(
                index,
                &variable.name,
                CompletionKind::Variable,
                &variable.name,
                Some(variable.inferred.display_name()),
                None,
            ));
            index += 1;
        }
    }

    for signature in inference.registries().functions.functions() {
        if matches_word(&signature.name, &ctx.current_word) {
            items.push(item(
                100 + index,
                &signature.name,
                CompletionKind::Function,
                &format!("{}(", signature.name),
                Some(signature.render()),
                Some(signature.documentation.clone()),
            ));
            index += 1;
        }
    }

    for (name, ty) in inference.registries().objects.globals() {
        if matches_word(name, &ctx.current_word) {
            items.push(item(
                200 + index,
                name,
                CompletionKind::Module,
                name,
                Some(ty.display_name()),
                None,
            ));
            index += 1;
        }
    }

    Some(items)
}

/* ===================== Shared helpers ===================== */

fn before_current_word<'a>(ctx: &'a CompletionContext) -> &'a str {
    &ctx.prefix[..ctx.prefix.len() - ctx.current_word.len()]
}

fn matches_word(candidate: &str, partial: &str) -> bool {
    partial.is_empty() || candidate.starts_with(partial)
}

/// Latest declaration per name, visible at the cursor line.
fn visible_variables<'a>(
    ctx: &CompletionContext,
    inference: &'a TypeInferenceService,
) -> Vec<&'a VariableInfo> {
    let mut seen: Vec<&str> = Vec::new();
    let mut out: Vec<&VariableInfo> = Vec::new();
    let mut all = inference.variables();
    all.retain(|v| v.declaring_line <= ctx.cursor_line);
    all.sort_by_key(|v| std::cmp::Reverse(v.declaring_line));
    for variable in all {
        if !seen.contains(&variable.name.as_str()) {
            seen.push(&variable.name);
            out.push(variable);
        }
    }
    out.reverse();
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::completion::CompletionContext;
    use crate::registry::{FunctionSignature, ParamDef, Registries};
    use crate::types::{InferredType, PrimitiveType};
    use std::sync::Arc;

    fn inference_for(text: &str) -> TypeInferenceService {
        let mut registries = Registries::with_defaults();
        registries.functions.register_function(FunctionSignature {
            name: "notify".to_string(),
            params: vec![ParamDef {
                name: "message".to_string(),
                ty: InferredType::Primitive {
                    name: PrimitiveType::Str,
                },
            }],
            returns: InferredType::Primitive {
                name: PrimitiveType::Bool,
            },
            documentation: "Send a notification.".to_string(),
            requires_import: None,
        });
        let mut service = TypeInferenceService::new(Arc::new(registries));
        service.refresh(text);
        service
    }

    fn ctx(text: &str, line: usize, column: usize) -> CompletionContext {
        CompletionContext::from_position(text, line, column)
    }

    #[test]
    fn test_snippets_on_blank_line() {
        let text = "a = 1\n";
        let items = keyword_snippets(&ctx(text, 1, 0), &inference_for(text)).unwrap();
        assert!(items.iter().any(|i| i.label == "if"));
        assert!(items.iter().any(|i| i.label == "any"));
    }

    #[test]
    fn test_sql_inside_select_string() {
        let text = "rows = query(\"SELECT name ";
        let items = sql_completions(&ctx(text, 0, text.len()), &inference_for(text)).unwrap();
        assert!(items.iter().any(|i| i.label == "FROM"));
    }

    #[test]
    fn test_sql_requires_sql_looking_string() {
        let text = "name = \"hello ";
        assert!(sql_completions(&ctx(text, 0, text.len()), &inference_for(text)).is_none());
    }

    #[test]
    fn test_iterable_after_for_in() {
        let text = "orders = [1, 2]\ncount = 3\nfor x in ";
        let items = iterable_completions(&ctx(text, 2, 9), &inference_for(text)).unwrap();
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].label, "orders");
    }

    #[test]
    fn test_post_operator_offers_variables_and_literals() {
        let text = "age = 4\nif age == ";
        let items =
            post_operator_completions(&ctx(text, 1, 10), &inference_for(text)).unwrap();
        assert!(items.iter().any(|i| i.label == "age"));
        assert!(items.iter().any(|i| i.label == "true"));
    }

    #[test]
    fn test_parameter_type_aware() {
        let text = "greeting = \"hi\"\ncount = 2\nnotify(";
        let items = parameter_completions(&ctx(text, 2, 7), &inference_for(text)).unwrap();
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].label, "greeting");
        assert_eq!(items[0].detail.as_deref(), Some("message: str"));
    }

    #[test]
    fn test_keyword_guard_on_partial() {
        let text = "el";
        let items = keyword_guard(&ctx(text, 0, 2), &inference_for(text)).unwrap();
        let labels: Vec<_> = items.iter().map(|i| i.label.as_str()).collect();
        assert!(labels.contains(&"else"));
        assert!(labels.contains(&"elseif"));
    }

    #[test]
    fn test_default_listing_filters_by_partial() {
        let text = "banana = 1\nberry = 2\nba";
        let items = default_listing(&ctx(text, 2, 2), &inference_for(text)).unwrap();
        let labels: Vec<_> = items.iter().map(|i| i.label.as_str()).collect();
        assert_eq!(labels, vec!["banana"]);
    }
}
