//! Compilation pipeline: rule text in, executable artifacts out.
//!
//! parse -> generate (+ source map) -> instrument (+ updated map) -> block
//! map. The whole pipeline is synchronous, performs no I/O, and is a pure
//! function of (source, registries, indent width); recompiling unchanged
//! text reproduces byte-identical code and identical block ids.

use tracing::{debug, warn};

pub mod ast;
pub mod expr;
pub mod generator;
pub mod parser;

pub use ast::{NodeKind, QuantifierMode, RuleNode};
pub use generator::{line_count, GenContext};

use crate::blockmap::build_block_map;
use crate::error::{CompileError, InstrumentationError, MappingIssue, ParseIssue};
use crate::instrument::instrument;
use crate::registry::Registries;
use crate::types::{BlockMap, RuleStatement, SourceMapDocument};

#[derive(Debug)]
pub struct CompileOutput {
    /// False when any rule line failed to parse. Artifacts are still
    /// produced best-effort for the lines that did.
    pub success: bool,
    pub statements: Vec<RuleStatement>,
    pub generated_code: String,
    pub imports: Vec<String>,
    pub source_map: SourceMapDocument,
    /// The probe-instrumented variant; absent when instrumentation failed.
    pub instrumented_code: Option<String>,
    pub instrumented_source_map: Option<SourceMapDocument>,
    /// Breakpoint index; present exactly when instrumentation succeeded.
    pub block_map: Option<BlockMap>,
    pub parse_issues: Vec<ParseIssue>,
    pub mapping_issues: Vec<MappingIssue>,
    pub instrumentation_error: Option<InstrumentationError>,
}

impl CompileOutput {
    /// Whether stepped execution can run against this compile.
    pub fn stepping_available(&self) -> bool {
        self.block_map.is_some()
    }
}

pub struct Compiler<'a> {
    registries: &'a Registries,
    indent_width: usize,
}

impl<'a> Compiler<'a> {
    pub fn new(registries: &'a Registries, indent_width: usize) -> Self {
        Self {
            registries,
            indent_width,
        }
    }

    pub fn compile(&self, source: &str, file_stem: &str) -> Result<CompileOutput, CompileError> {
        let parsed = parser::parse(source);
        let parse_issues = parsed.issues;

        let mut statements = Vec::new();
        for node in &parsed.nodes {
            node.collect_statements(&mut statements);
        }

        let unit = generator::generate(&parsed.nodes, self.registries, self.indent_width)?;
        let mut mapping_issues: Vec<MappingIssue> = unit.map.issues().to_vec();

        // Every generator predicted its line count before emission; drift
        // between prediction and emission is a mapping defect, not a fatal
        // error.
        let predicted: usize = parsed.nodes.iter().map(line_count).sum();
        let emitted = unit.lines.len() - unit.imports.len();
        if predicted != emitted {
            warn!(predicted, emitted, "line-count prediction drifted from emission");
            mapping_issues.push(MappingIssue {
                generated_line: emitted,
                message: format!(
                    "generator predicted {predicted} lines but emitted {emitted}"
                ),
            });
        }

        let generated_code = unit.code();
        let source_map =
            unit.map
                .to_document("business-rules", source, &format!("{file_stem}.py"));

        let (instrumented_code, instrumented_source_map, block_map, instrumentation_error) =
            match instrument(&unit.lines, &unit.map, self.indent_width) {
                Ok(instrumented) => {
                    mapping_issues.extend(instrumented.map.issues().to_vec());
                    let block_map = build_block_map(
                        &instrumented.lines,
                        &instrumented.map,
                        &statements,
                        source,
                        &generated_code,
                        self.indent_width,
                    );
                    let doc = instrumented.map.to_document(
                        "business-rules",
                        source,
                        &format!("{file_stem}.instrumented.py"),
                    );
                    (
                        Some(instrumented.code()),
                        Some(doc),
                        Some(block_map),
                        None,
                    )
                }
                Err(err) => {
                    warn!(error = %err, "instrumentation failed; stepping disabled");
                    (None, None, None, Some(err))
                }
            };

        debug!(
            statements = statements.len(),
            parse_issues = parse_issues.len(),
            stepping = block_map.is_some(),
            "compile finished"
        );

        Ok(CompileOutput {
            success: parse_issues.is_empty(),
            statements,
            generated_code,
            imports: unit.imports,
            source_map,
            instrumented_code,
            instrumented_source_map,
            block_map,
            parse_issues,
            mapping_issues,
            instrumentation_error,
        })
    }
}

#[cfg(test)]
mod compile_tests {
    use super::*;
    use crate::types::{BlockType, PatternKind};

    fn compile(source: &str) -> CompileOutput {
        let registries = Registries::with_defaults();
        Compiler::new(&registries, 4)
            .compile(source, "rules")
            .unwrap()
    }

    #[test]
    fn test_round_trip_every_generated_line() {
        let source = "total = 0\nif total > 5\n  level = \"high\"\nelse\n  level = \"low\"\nfor x in items\n  total = total + x";
        let output = compile(source);
        assert!(output.success);

        // Generated -> business is total over all non-synthetic lines.
        let line_count = output.generated_code.lines().count();
        for generated_line in 1..=line_count {
            assert!(
                output.source_map.business_line_for(generated_line).is_some(),
                "generated line {generated_line} has no business line"
            );
        }

        // Exact, not approximate: each business line's generated range
        // contains the text that line produced.
        let generated: Vec<&str> = output.generated_code.lines().collect();
        let lines_for_total = output.source_map.generated_lines_for(1);
        assert!(lines_for_total
            .iter()
            .any(|&g| generated[g - 1].contains("total = 0")));
        let lines_for_else = output.source_map.generated_lines_for(4);
        assert!(lines_for_else
            .iter()
            .any(|&g| generated[g - 1].trim() == "else:"));

        // And back again: every mapped generated line round-trips to the
        // business line that produced it.
        for mapping in &output.source_map.mappings {
            if mapping.pattern_type.is_synthetic() {
                continue;
            }
            assert_eq!(
                output.source_map.business_line_for(mapping.generated_line),
                Some(mapping.business_line)
            );
        }
    }

    #[test]
    fn test_idempotent_compile() {
        let source = "if a > 5\n  b = 1\nelse\n  b = 2\nany x in items has x.age = 4";
        let first = compile(source);
        let second = compile(source);
        assert_eq!(first.generated_code, second.generated_code);
        assert_eq!(first.instrumented_code, second.instrumented_code);
        let first_ids: Vec<_> = first.block_map.unwrap().blocks.into_keys().collect();
        let second_ids: Vec<_> = second.block_map.unwrap().blocks.into_keys().collect();
        assert_eq!(first_ids, second_ids);
    }

    #[test]
    fn test_parse_error_is_best_effort() {
        let output = compile("a = 1\n???\nb = 2");
        assert!(!output.success);
        assert_eq!(output.parse_issues.len(), 1);
        assert_eq!(output.parse_issues[0].business_line, 2);
        // The other statements still generated.
        assert!(output.generated_code.contains("a = 1"));
        assert!(output.generated_code.contains("b = 2"));
    }

    #[test]
    fn test_comment_lines_carry_through() {
        let output = compile("# setup\na = 1");
        assert!(output.success);
        assert!(output.generated_code.contains("# setup"));
    }

    #[test]
    fn test_scenario_a_condition_parenting() {
        let output = compile("if a > 5\n  b = 1\nelse\n  b = 2");
        let block_map = output.block_map.expect("block map");
        let condition = block_map
            .blocks
            .values()
            .find(|b| b.block_type == BlockType::Condition)
            .unwrap();
        assert!(condition.parent_block_id.is_none());
        let children: Vec<_> = block_map
            .blocks
            .values()
            .filter(|b| b.block_type == BlockType::Assignment)
            .collect();
        assert_eq!(children.len(), 2);
        for child in children {
            assert_eq!(
                child.parent_block_id.as_deref(),
                Some(condition.block_id.as_str())
            );
        }
    }

    #[test]
    fn test_scenario_b_quantifier_lowering() {
        let output = compile("any x in items has x.age = 4");
        assert!(output.success);
        let flag_lines = output
            .generated_code
            .lines()
            .filter(|l| l.trim() == "_any_match_1 = False")
            .count();
        assert_eq!(flag_lines, 1, "exactly one exit-flag declaration");

        let block_map = output.block_map.unwrap();
        let loop_start = block_map
            .blocks
            .values()
            .find(|b| b.block_type == BlockType::LoopStart)
            .unwrap();
        assert_eq!(loop_start.business_line, 1);
    }

    #[test]
    fn test_scenario_d_probe_placement() {
        let output = compile("while a < 3\n  y = x + 1\n  break");
        let instrumented = output.instrumented_code.unwrap();
        let lines: Vec<&str> = instrumented.lines().collect();

        let y_idx = lines.iter().position(|l| l.trim() == "y = x + 1").unwrap();
        assert!(lines[y_idx + 1].trim().starts_with("__STEP_CONTROL__"));

        let break_idx = lines.iter().position(|l| l.trim() == "break").unwrap();
        assert!(lines[break_idx - 1].trim().starts_with("__STEP_CONTROL__"));
    }

    #[test]
    fn test_instrumented_map_covers_probe_lines() {
        let output = compile("a = 1");
        let doc = output.instrumented_source_map.unwrap();
        let probes: Vec<_> = doc
            .mappings
            .iter()
            .filter(|m| m.pattern_type == PatternKind::Probe)
            .collect();
        assert_eq!(probes.len(), 1);
        assert_eq!(probes[0].business_line, 1);
    }
}
