//! Live type inference over rule text.
//!
//! Runs independently of compilation: the editor surface refreshes the
//! service on every document change and queries it for completion. Inferred
//! types are a closed variant with a confidence score so the completion
//! orchestrator can prefer high-confidence matches.

pub mod scope;

pub use scope::{infer_expression, properties_of_type, ScopeTracker};

use std::sync::Arc;

use crate::registry::{FieldDef, Registries};
use crate::types::{InferredType, VariableInfo};

pub struct TypeInferenceService {
    registries: Arc<Registries>,
    tracker: ScopeTracker,
}

impl TypeInferenceService {
    pub fn new(registries: Arc<Registries>) -> Self {
        Self {
            registries,
            tracker: ScopeTracker::new(),
        }
    }

    /// Idempotent, content-hash-gated rebuild of the symbol table.
    /// Returns whether a rebuild actually ran.
    pub fn refresh(&mut self, document_text: &str) -> bool {
        self.tracker.refresh(document_text, &self.registries)
    }

    pub fn variables(&self) -> Vec<&VariableInfo> {
        self.tracker.variables()
    }

    /// Type of `name` as visible at `line`, with its confidence. Ambient
    /// business objects are visible at every line regardless of scope.
    pub fn type_of(&self, name: &str, line: usize) -> (InferredType, f32) {
        if let Some(var) = self.tracker.resolve(name, line) {
            return (var.inferred.clone(), var.confidence);
        }
        if let Some(ty) = self.registries.objects.global(name) {
            return (ty.clone(), 0.8);
        }
        (InferredType::Unknown, 0.0)
    }

    /// Typed properties of a named class or return shape.
    pub fn properties_of(&self, type_name: &str) -> Vec<FieldDef> {
        if let Some(class) = self.registries.objects.class(type_name) {
            return class.properties.clone();
        }
        if let Some(shape) = self.registries.functions.shape(type_name) {
            return shape.fields.clone();
        }
        Vec::new()
    }

    /// Typed properties reachable from a variable or ambient name at `line`.
    pub fn properties_of_name(&self, name: &str, line: usize) -> Vec<FieldDef> {
        let (ty, _) = self.type_of(name, line);
        properties_of_type(&ty, &self.registries)
    }

    pub fn registries(&self) -> &Registries {
        &self.registries
    }
}
