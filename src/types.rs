use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::collections::BTreeMap;

/* ===================== Rule statements ===================== */

/// Shape of a recognized business-rule line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StatementKind {
    Assignment,
    Condition,
    Loop,
    Quantifier,
    Switch,
    Try,
    Call,
    Comment,
    Unknown,
}

/// One recognized line/block of rule text. Produced fresh per compile,
/// never mutated afterwards.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuleStatement {
    pub kind: StatementKind,
    pub business_line: usize,
    pub raw_text: String,
    /// Variables this statement introduces.
    pub defined: Vec<String>,
    /// Variables this statement reads.
    pub referenced: Vec<String>,
}

/* ===================== Source map ===================== */

/// What produced a generated line. Synthetic kinds (probe, harness) are
/// excluded from the generated-line -> business-line total-function
/// invariant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PatternKind {
    Assignment,
    Condition,
    Loop,
    Quantifier,
    Switch,
    Try,
    Call,
    Structural,
    Import,
    Probe,
    Harness,
}

impl PatternKind {
    /// Synthetic lines carry no business-line obligation of their own.
    pub fn is_synthetic(self) -> bool {
        matches!(
            self,
            PatternKind::Import | PatternKind::Probe | PatternKind::Harness
        )
    }
}

/// One business-line -> generated-line correspondence.
///
/// A business line may fan out to many generated lines; a generated line
/// maps back to exactly one business line.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LineMapping {
    pub business_line: usize,
    pub generated_line: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub generated_column: Option<usize>,
    pub pattern_type: PatternKind,
    /// Shared across all generated lines of a multi-line construct.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub statement_id: Option<String>,
}

/// Source-map document handed to callers.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SourceMapDocument {
    pub version: u32,
    pub sources: Vec<String>,
    pub sources_content: Vec<String>,
    pub mappings: Vec<LineMapping>,
    pub file: String,
}

impl SourceMapDocument {
    /// The business line whose generation produced this generated line.
    /// `None` for synthetic lines (probes, imports, harness).
    pub fn business_line_for(&self, generated_line: usize) -> Option<usize> {
        self.mappings
            .iter()
            .find(|m| m.generated_line == generated_line && !m.pattern_type.is_synthetic())
            .map(|m| m.business_line)
    }

    /// Every generated line a business line expanded into.
    pub fn generated_lines_for(&self, business_line: usize) -> Vec<usize> {
        self.mappings
            .iter()
            .filter(|m| m.business_line == business_line && !m.pattern_type.is_synthetic())
            .map(|m| m.generated_line)
            .collect()
    }
}

/* ===================== Block map ===================== */

/// Semantic unit used as breakpoint granularity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BlockType {
    Condition,
    Action,
    LoopStart,
    LoopEnd,
    Assignment,
    FunctionCall,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BlockInfo {
    pub block_id: String,
    pub block_type: BlockType,
    pub business_line: usize,
    pub generated_lines: Vec<usize>,
    pub description: String,
    pub variables: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parent_block_id: Option<String>,
    pub child_block_ids: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BlockMapMetadata {
    pub generated_at: DateTime<Utc>,
    pub business_rules_hash: String,
    pub generated_code_hash: String,
    pub total_blocks: usize,
}

/// Breakpoint index over the instrumented artifact. Replaced wholesale on
/// every compile, never patched in place.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BlockMap {
    pub version: u32,
    pub blocks: BTreeMap<String, BlockInfo>,
    pub metadata: BlockMapMetadata,
}

pub const BLOCK_MAP_VERSION: u32 = 2;

impl BlockMap {
    pub fn get(&self, block_id: &str) -> Option<&BlockInfo> {
        self.blocks.get(block_id)
    }

    /// Roots of the block forest, in generated-line order.
    pub fn roots(&self) -> Vec<&BlockInfo> {
        let mut roots: Vec<&BlockInfo> = self
            .blocks
            .values()
            .filter(|b| b.parent_block_id.is_none())
            .collect();
        roots.sort_by_key(|b| b.generated_lines.first().copied().unwrap_or(0));
        roots
    }
}

/* ===================== Execution steps ===================== */

/// Step kinds the client recognizes. Anything else coming off the wire is
/// dropped during response validation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepType {
    Condition,
    Action,
    LoopStart,
    LoopEnd,
    Assignment,
    FunctionCall,
    Complete,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExecutionOutcome {
    Success,
    Error,
    Skipped,
}

/// One recorded execution event, scoped to a block, carrying only
/// business-relevant variables. Created during a live session and
/// discarded when the session stops or is superseded.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BusinessStep {
    pub block_id: String,
    pub step_type: StepType,
    pub business_line: usize,
    pub description: String,
    pub variables: JsonValue,
    pub execution_result: ExecutionOutcome,
    pub timestamp: DateTime<Utc>,
    pub step_index: usize,
    pub is_first: bool,
    pub is_last: bool,
}

/* ===================== Type inference ===================== */

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PrimitiveType {
    Int,
    Float,
    Str,
    Bool,
    List,
    Dict,
    Null,
}

impl PrimitiveType {
    pub fn name(self) -> &'static str {
        match self {
            PrimitiveType::Int => "int",
            PrimitiveType::Float => "float",
            PrimitiveType::Str => "str",
            PrimitiveType::Bool => "bool",
            PrimitiveType::List => "list",
            PrimitiveType::Dict => "dict",
            PrimitiveType::Null => "null",
        }
    }
}

/// Closed variant for inferred types, instead of stringly-typed names.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum InferredType {
    /// Inferred from a literal at the point of declaration.
    Primitive { name: PrimitiveType },
    /// An instance of a registered class / business object.
    Instance { class: String },
    /// The declared return shape of a registered function.
    CallResult { shape: String },
    Unknown,
}

impl InferredType {
    /// Human-readable name used as completion detail.
    pub fn display_name(&self) -> String {
        match self {
            InferredType::Primitive { name } => name.name().to_string(),
            InferredType::Instance { class } => class.clone(),
            InferredType::CallResult { shape } => shape.clone(),
            InferredType::Unknown => "unknown".to_string(),
        }
    }

    pub fn is_known(&self) -> bool {
        !matches!(self, InferredType::Unknown)
    }
}

/// Where a variable's type came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TypeSource {
    Literal,
    Assignment,
    Call,
    Module,
    Loop,
    Global,
}

/// One entry in the symbol table.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VariableInfo {
    pub name: String,
    pub inferred: InferredType,
    /// 0.0..=1.0, higher means the orchestrator should prefer this match.
    pub confidence: f32,
    pub declaring_line: usize,
    pub scope_depth: usize,
    pub source: TypeSource,
}

/* ===================== Completion ===================== */

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CompletionKind {
    Keyword,
    Snippet,
    Variable,
    Function,
    Property,
    Class,
    Module,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CompletionItem {
    pub label: String,
    pub kind: CompletionKind,
    pub insert_text: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub documentation: Option<String>,
    pub sort_text: String,
}
