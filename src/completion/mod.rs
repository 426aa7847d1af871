//! Completion orchestration.
//!
//! A fixed, ordered battery of strategies runs over the cursor context; the
//! first one with an opinion wins. Results are cached per document content
//! hash and discarded wholesale on change.

pub mod strategies;

use std::sync::Arc;

use crate::blockmap::sha256_hex;
use crate::inference::TypeInferenceService;
use crate::registry::Registries;
use crate::types::CompletionItem;

/// Cursor context handed to every strategy.
#[derive(Debug, Clone)]
pub struct CompletionContext {
    /// Text before the cursor on the current line.
    pub prefix: String,
    /// The identifier fragment being typed, possibly empty.
    pub current_word: String,
    /// Whether the cursor sits right after a member-access dot.
    pub after_dot: bool,
    /// The expression before that dot (identifier or property chain).
    pub dot_target: Option<String>,
    /// 1-based line the cursor is on.
    pub cursor_line: usize,
}

impl CompletionContext {
    /// Extract context from a document position. `cursor_line` is 0-based,
    /// `cursor_column` a 0-based character offset, matching editor surfaces.
    pub fn from_position(source: &str, cursor_line: usize, cursor_column: usize) -> Self {
        let current_line = source.lines().nth(cursor_line).unwrap_or("");
        let prefix: String = current_line.chars().take(cursor_column).collect();

        let current_word = prefix
            .chars()
            .rev()
            .take_while(|c| c.is_alphanumeric() || *c == '_')
            .collect::<Vec<_>>()
            .into_iter()
            .rev()
            .collect::<String>();

        let before_word = &prefix[..prefix.len() - current_word.len()];
        let after_dot = before_word.trim_end().ends_with('.');

        let dot_target = if after_dot {
            let trimmed = before_word.trim_end();
            let base = &trimmed[..trimmed.len() - 1];
            let target: String = base
                .chars()
                .rev()
                .take_while(|c| c.is_alphanumeric() || *c == '_' || *c == '.')
                .collect::<Vec<_>>()
                .into_iter()
                .rev()
                .collect();
            if target.is_empty() {
                None
            } else {
                Some(target)
            }
        } else {
            None
        };

        Self {
            prefix,
            current_word,
            after_dot,
            dot_target,
            cursor_line: cursor_line + 1,
        }
    }
}

pub struct CompletionOrchestrator {
    inference: TypeInferenceService,
    cache: Option<CacheEntry>,
}

struct CacheEntry {
    content_hash: String,
    cursor_line: usize,
    cursor_column: usize,
    items: Vec<CompletionItem>,
}

impl CompletionOrchestrator {
    pub fn new(registries: Arc<Registries>) -> Self {
        Self {
            inference: TypeInferenceService::new(registries),
            cache: None,
        }
    }

    /// Ranked completions for a cursor position.
    pub fn complete(
        &mut self,
        document_text: &str,
        cursor_line: usize,
        cursor_column: usize,
    ) -> Vec<CompletionItem> {
        let content_hash = sha256_hex(document_text);
        if let Some(entry) = &self.cache {
            if entry.content_hash == content_hash
                && entry.cursor_line == cursor_line
                && entry.cursor_column == cursor_column
            {
                return entry.items.clone();
            }
        }

        self.inference.refresh(document_text);
        let context = CompletionContext::from_position(document_text, cursor_line, cursor_column);

        let mut items = strategies::run_battery(&context, &self.inference);
        items.sort_by(|a, b| a.sort_text.cmp(&b.sort_text).then(a.label.cmp(&b.label)));

        self.cache = Some(CacheEntry {
            content_hash,
            cursor_line,
            cursor_column,
            items: items.clone(),
        });
        items
    }

    pub fn inference(&self) -> &TypeInferenceService {
        &self.inference
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::{FieldDef, FunctionSignature, ParamDef, Registries, ShapeDef};
    use crate::types::{CompletionKind, InferredType, PrimitiveType};

    fn registries() -> Arc<Registries> {
        let mut registries = Registries::with_defaults();
        registries.functions.register_shape(ShapeDef {
            name: "UserDataResult".to_string(),
            fields: vec![
                FieldDef {
                    name: "user".to_string(),
                    ty: InferredType::Instance {
                        class: "User".to_string(),
                    },
                },
                FieldDef {
                    name: "success".to_string(),
                    ty: InferredType::Primitive {
                        name: PrimitiveType::Bool,
                    },
                },
                FieldDef {
                    name: "message".to_string(),
                    ty: InferredType::Primitive {
                        name: PrimitiveType::Str,
                    },
                },
            ],
        });
        registries.functions.register_function(FunctionSignature {
            name: "getUserData".to_string(),
            params: vec![ParamDef {
                name: "userId".to_string(),
                ty: InferredType::Primitive {
                    name: PrimitiveType::Int,
                },
            }],
            returns: InferredType::CallResult {
                shape: "UserDataResult".to_string(),
            },
            documentation: "Fetch a user record by id.".to_string(),
            requires_import: None,
        });
        Arc::new(registries)
    }

    #[test]
    fn test_member_access_lists_declared_shape_fields() {
        let mut orchestrator = CompletionOrchestrator::new(registries());
        let text = "result = getUserData(123)\nresult.";
        let items = orchestrator.complete(text, 1, 7);

        let labels: Vec<_> = items.iter().map(|i| i.label.as_str()).collect();
        assert_eq!(labels, vec!["user", "success", "message"]);
        let details: Vec<_> = items
            .iter()
            .map(|i| i.detail.clone().unwrap())
            .collect();
        assert_eq!(details, vec!["User", "bool", "str"]);
        assert!(items.iter().all(|i| i.kind == CompletionKind::Property));
    }

    #[test]
    fn test_cache_hit_and_invalidation() {
        let mut orchestrator = CompletionOrchestrator::new(registries());
        let first = orchestrator.complete("a = 1\n", 1, 0);
        let second = orchestrator.complete("a = 1\n", 1, 0);
        assert_eq!(first.len(), second.len());

        // Content change invalidates the cache; the new variable shows up.
        let text = "a = 1\nbanana = 2\nba";
        let items = orchestrator.complete(text, 2, 2);
        assert!(items.iter().any(|i| i.label == "banana"));
    }

    #[test]
    fn test_context_extraction() {
        let ctx = CompletionContext::from_position("result.user.", 0, 12);
        assert!(ctx.after_dot);
        assert_eq!(ctx.dot_target.as_deref(), Some("result.user"));

        let ctx = CompletionContext::from_position("if cou", 0, 6);
        assert!(!ctx.after_dot);
        assert_eq!(ctx.current_word, "cou");
    }
}
