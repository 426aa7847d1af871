//! Explicit registries for everything the language treats as pluggable:
//! natural-language operators, callable signatures, and ambient business
//! objects.
//!
//! Constructed once at startup and passed by reference into the compiler,
//! the type-inference service and the completion orchestrator. There is no
//! module-level mutable state.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::types::InferredType;

/* ===================== Operators ===================== */

/// How a natural-language operator lowers into Python.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "lowering", rename_all = "lowercase")]
pub enum OperatorLowering {
    /// `left.<method>(right)`
    Method { method: String },
    /// `right in left`
    Membership,
    /// `left <op> right` with a raw Python operator.
    Binary { op: String },
}

/// Registry of natural-language string operators (`contains`, `beginsWith`,
/// ...). Registered externally; the compiler never hard-codes these.
#[derive(Debug, Clone, Default)]
pub struct OperatorRegistry {
    operators: BTreeMap<String, OperatorLowering>,
}

impl OperatorRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// The base vocabulary shipped with the language.
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        registry.register("contains", OperatorLowering::Membership);
        registry.register(
            "beginsWith",
            OperatorLowering::Method {
                method: "startswith".to_string(),
            },
        );
        registry.register(
            "endsWith",
            OperatorLowering::Method {
                method: "endswith".to_string(),
            },
        );
        registry
    }

    pub fn register(&mut self, name: impl Into<String>, lowering: OperatorLowering) {
        self.operators.insert(name.into(), lowering);
    }

    pub fn is_registered(&self, name: &str) -> bool {
        self.operators.contains_key(name)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.operators.keys().map(|s| s.as_str())
    }

    /// Render `left <name> right` as a Python expression.
    pub fn lower(&self, name: &str, left: &str, right: &str) -> Option<String> {
        let lowered = match self.operators.get(name)? {
            OperatorLowering::Method { method } => format!("{left}.{method}({right})"),
            OperatorLowering::Membership => format!("{right} in {left}"),
            OperatorLowering::Binary { op } => format!("{left} {op} {right}"),
        };
        Some(lowered)
    }
}

/* ===================== Functions ===================== */

/// A named field with its declared type.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FieldDef {
    pub name: String,
    pub ty: InferredType,
}

/// A named return shape (the record a function call produces).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ShapeDef {
    pub name: String,
    pub fields: Vec<FieldDef>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ParamDef {
    pub name: String,
    pub ty: InferredType,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FunctionSignature {
    pub name: String,
    pub params: Vec<ParamDef>,
    pub returns: InferredType,
    pub documentation: String,
    /// Python module the generated call site needs imported, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub requires_import: Option<String>,
}

impl FunctionSignature {
    /// `name(param, param)` rendering used as completion detail.
    pub fn render(&self) -> String {
        let params: Vec<String> = self
            .params
            .iter()
            .map(|p| format!("{}: {}", p.name, p.ty.display_name()))
            .collect();
        format!(
            "{}({}) -> {}",
            self.name,
            params.join(", "),
            self.returns.display_name()
        )
    }
}

/// Signature table for callable functions and modules, plus the return
/// shapes they produce.
#[derive(Debug, Clone, Default)]
pub struct FunctionRegistry {
    functions: BTreeMap<String, FunctionSignature>,
    shapes: BTreeMap<String, ShapeDef>,
}

impl FunctionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register_function(&mut self, signature: FunctionSignature) {
        self.functions.insert(signature.name.clone(), signature);
    }

    pub fn register_shape(&mut self, shape: ShapeDef) {
        self.shapes.insert(shape.name.clone(), shape);
    }

    pub fn function(&self, name: &str) -> Option<&FunctionSignature> {
        self.functions.get(name)
    }

    pub fn shape(&self, name: &str) -> Option<&ShapeDef> {
        self.shapes.get(name)
    }

    pub fn functions(&self) -> impl Iterator<Item = &FunctionSignature> {
        self.functions.values()
    }
}

/* ===================== Business objects ===================== */

/// A registered class with typed properties.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClassDef {
    pub name: String,
    pub properties: Vec<FieldDef>,
}

/// Ambient business objects visible at every line regardless of scope,
/// plus the classes backing them.
#[derive(Debug, Clone, Default)]
pub struct BusinessObjectRegistry {
    globals: BTreeMap<String, InferredType>,
    classes: BTreeMap<String, ClassDef>,
}

impl BusinessObjectRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register_global(&mut self, name: impl Into<String>, ty: InferredType) {
        self.globals.insert(name.into(), ty);
    }

    pub fn register_class(&mut self, class: ClassDef) {
        self.classes.insert(class.name.clone(), class);
    }

    pub fn global(&self, name: &str) -> Option<&InferredType> {
        self.globals.get(name)
    }

    pub fn class(&self, name: &str) -> Option<&ClassDef> {
        self.classes.get(name)
    }

    pub fn globals(&self) -> impl Iterator<Item = (&str, &InferredType)> {
        self.globals.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn class_names(&self) -> impl Iterator<Item = &str> {
        self.classes.keys().map(|s| s.as_str())
    }
}

/* ===================== Bundle ===================== */

/// The full registry set threaded through the compiler, inference and
/// completion layers.
#[derive(Debug, Clone, Default)]
pub struct Registries {
    pub operators: OperatorRegistry,
    pub functions: FunctionRegistry,
    pub objects: BusinessObjectRegistry,
}

impl Registries {
    pub fn with_defaults() -> Self {
        Self {
            operators: OperatorRegistry::with_defaults(),
            functions: FunctionRegistry::new(),
            objects: BusinessObjectRegistry::new(),
        }
    }

    /// Load externally-registered operators, signatures, shapes, classes and
    /// ambient globals from a TOML document, layered over the defaults.
    pub fn from_toml_str(text: &str) -> Result<Self, toml::de::Error> {
        let file: RegistryFile = toml::from_str(text)?;
        let mut registries = Self::with_defaults();
        for (name, lowering) in file.operators {
            registries.operators.register(name, lowering);
        }
        for signature in file.functions {
            registries.functions.register_function(signature);
        }
        for shape in file.shapes {
            registries.functions.register_shape(shape);
        }
        for class in file.classes {
            registries.objects.register_class(class);
        }
        for (name, ty) in file.globals {
            registries.objects.register_global(name, ty);
        }
        Ok(registries)
    }
}

/// On-disk registry document.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RegistryFile {
    #[serde(default)]
    pub operators: BTreeMap<String, OperatorLowering>,
    #[serde(default)]
    pub functions: Vec<FunctionSignature>,
    #[serde(default)]
    pub shapes: Vec<ShapeDef>,
    #[serde(default)]
    pub classes: Vec<ClassDef>,
    #[serde(default)]
    pub globals: BTreeMap<String, InferredType>,
}
