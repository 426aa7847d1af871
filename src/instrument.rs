//! Step-control instrumentation.
//!
//! Rewrites generated code with `__STEP_CONTROL__` probe calls. Ordinary
//! statements get their probe immediately after; statements that transfer
//! control (return/break/continue/raise/yield) get it immediately before,
//! since a probe after them would be unreachable. Probes reproduce the
//! indentation of the line they instrument exactly; if indentation cannot
//! be determined unambiguously the whole instrumentation step fails rather
//! than silently mis-indenting an indentation-significant target.
//!
//! The instrumented artifact carries the same harness the original runtime
//! expects: an import prelude, a default no-op `__STEP_CONTROL__` the
//! sandbox overrides, a `try:` wrapper that reports `__EXECUTION_ERROR__`
//! as JSON, and a trailing COMPLETE probe.

use tracing::debug;

use crate::error::InstrumentationError;
use crate::sourcemap::SourceMapBuilder;
use crate::types::PatternKind;

/// Name of the probe call embedded in instrumented code. The sandbox
/// provides the real implementation; its return value decides whether
/// execution pauses.
pub const PROBE_NAME: &str = "__STEP_CONTROL__";

const PRELUDE: &[&str] = &[
    "import sys",
    "import json",
    "import traceback",
    "",
    "# Step control scaffolding; the sandbox replaces this at execution time.",
    "step_control = {\"current_step\": 0, \"mode\": \"step\", \"target_step\": 1}",
    "",
    "def __STEP_CONTROL__(step_id, python_line, business_line, description=\"\"):",
    "    step_control[\"current_step\"] += 1",
    "    return True",
    "",
    "try:",
];

const EPILOGUE: &[&str] = &[
    "except Exception as e:",
    "    print(\"__EXECUTION_ERROR__\")",
    "    print(json.dumps({\"error\": str(e), \"traceback\": traceback.format_exc()}))",
    "",
    "__STEP_CONTROL__(\"COMPLETE\", 0, 0, \"Execution completed\")",
];

#[derive(Debug)]
pub struct InstrumentedUnit {
    pub lines: Vec<String>,
    pub map: SourceMapBuilder,
}

impl InstrumentedUnit {
    pub fn code(&self) -> String {
        let mut code = self.lines.join("\n");
        code.push('\n');
        code
    }
}

/// Instrument generated code, producing the rewritten script and a source
/// map updated for the prelude offset, the body re-indent, and every probe
/// line.
pub fn instrument(
    generated_lines: &[String],
    map: &SourceMapBuilder,
    indent_width: usize,
) -> Result<InstrumentedUnit, InstrumentationError> {
    let mut out = Out {
        lines: Vec::new(),
        map: SourceMapBuilder::new(),
    };
    let shift = " ".repeat(indent_width);

    for line in PRELUDE {
        out.push_harness(line);
    }

    let mut instrumented_any = false;

    for (idx, line) in generated_lines.iter().enumerate() {
        let original_line = idx + 1;
        let mapping = map
            .mapping_for(original_line)
            .cloned()
            .ok_or(InstrumentationError::UnmappedLine {
                generated_line: original_line,
            })?;

        let leading = &line[..line.len() - line.trim_start().len()];
        if leading.contains('\t') {
            return Err(InstrumentationError::AmbiguousIndentation {
                generated_line: original_line,
                message: "leading whitespace mixes tabs and spaces".to_string(),
            });
        }

        let shifted = if line.is_empty() {
            String::new()
        } else {
            format!("{shift}{line}")
        };
        let probe_indent = format!("{shift}{leading}");
        let trimmed = line.trim_start();

        let placement = probe_placement(trimmed, mapping.pattern_type);
        let statement_id = mapping
            .statement_id
            .clone()
            .unwrap_or_else(|| format!("stmt_{}", mapping.business_line));

        match placement {
            ProbePlacement::Before => {
                // The statement lands one line after its probe.
                let statement_line = out.next_line() + 1;
                out.push_probe(
                    &probe_indent,
                    statement_line,
                    mapping.business_line,
                    trimmed,
                    &statement_id,
                );
                out.push_mapped(&shifted, &mapping, statement_line);
                instrumented_any = true;
            }
            ProbePlacement::After => {
                let statement_line = out.next_line();
                out.push_mapped(&shifted, &mapping, statement_line);
                out.push_probe(
                    &probe_indent,
                    statement_line,
                    mapping.business_line,
                    trimmed,
                    &statement_id,
                );
                instrumented_any = true;
            }
            ProbePlacement::None => {
                let statement_line = out.next_line();
                out.push_mapped(&shifted, &mapping, statement_line);
            }
        }
    }

    if generated_lines.is_empty() {
        out.push_harness(&format!("{shift}pass"));
    }

    for line in EPILOGUE {
        out.push_harness(line);
    }

    debug!(
        probes = instrumented_any,
        total_lines = out.lines.len(),
        "instrumentation complete"
    );

    Ok(InstrumentedUnit {
        lines: out.lines,
        map: out.map,
    })
}

enum ProbePlacement {
    Before,
    After,
    None,
}

/// Eligibility and placement for one generated line. Structural lines,
/// imports, comments and no-ops carry no probe; control-transfer statements
/// take theirs before.
fn probe_placement(trimmed: &str, kind: PatternKind) -> ProbePlacement {
    if trimmed.is_empty()
        || trimmed.starts_with('#')
        || trimmed == "pass"
        || trimmed.ends_with(':')
    {
        return ProbePlacement::None;
    }
    match kind {
        PatternKind::Import | PatternKind::Harness | PatternKind::Probe => ProbePlacement::None,
        PatternKind::Structural => ProbePlacement::None,
        _ => {
            let terminal = ["return", "break", "continue", "raise", "yield"]
                .iter()
                .any(|kw| trimmed == *kw || trimmed.starts_with(&format!("{kw} ")));
            if terminal {
                ProbePlacement::Before
            } else {
                ProbePlacement::After
            }
        }
    }
}

struct Out {
    lines: Vec<String>,
    map: SourceMapBuilder,
}

impl Out {
    fn next_line(&self) -> usize {
        self.lines.len() + 1
    }

    fn push_harness(&mut self, text: &str) {
        let line = self.next_line();
        self.lines.push(text.to_string());
        self.map.record_line(0, line, PatternKind::Harness, None);
    }

    fn push_mapped(
        &mut self,
        text: &str,
        mapping: &crate::types::LineMapping,
        expected_line: usize,
    ) {
        debug_assert_eq!(self.next_line(), expected_line);
        self.lines.push(text.to_string());
        self.map.record_line(
            mapping.business_line,
            expected_line,
            mapping.pattern_type,
            mapping.statement_id.as_deref(),
        );
    }

    fn push_probe(
        &mut self,
        indent: &str,
        statement_line: usize,
        business_line: usize,
        statement_text: &str,
        statement_id: &str,
    ) {
        let line = self.next_line();
        let description = escape_python(statement_text);
        self.lines.push(format!(
            "{indent}{PROBE_NAME}(\"STMT_{business_line}\", {statement_line}, {business_line}, \"{description}\")"
        ));
        self.map
            .record_line(business_line, line, PatternKind::Probe, Some(statement_id));
    }
}

fn escape_python(text: &str) -> String {
    text.replace('\\', "\\\\").replace('"', "\\\"")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compiler::generator::generate;
    use crate::compiler::parser::parse;
    use crate::registry::Registries;

    fn instrumented(source: &str) -> InstrumentedUnit {
        let outcome = parse(source);
        assert!(outcome.issues.is_empty());
        let unit = generate(&outcome.nodes, &Registries::with_defaults(), 4).unwrap();
        instrument(&unit.lines, &unit.map, 4).unwrap()
    }

    #[test]
    fn test_probe_after_ordinary_statement() {
        let unit = instrumented("y = x + 1");
        let body_start = PRELUDE.len();
        assert_eq!(unit.lines[body_start], "    y = x + 1");
        assert!(unit.lines[body_start + 1].starts_with("    __STEP_CONTROL__(\"STMT_1\""));
    }

    #[test]
    fn test_probe_before_terminal_statement() {
        let unit = instrumented("for x in items\n  break");
        let break_idx = unit
            .lines
            .iter()
            .position(|l| l.trim() == "break")
            .expect("break line present");
        assert!(
            unit.lines[break_idx - 1].trim_start().starts_with("__STEP_CONTROL__"),
            "probe must come before the break, got: {:?}",
            &unit.lines[break_idx - 1]
        );
        // Probe indentation matches the statement it guards.
        let probe_indent = unit.lines[break_idx - 1].len()
            - unit.lines[break_idx - 1].trim_start().len();
        let break_indent = unit.lines[break_idx].len() - unit.lines[break_idx].trim_start().len();
        assert_eq!(probe_indent, break_indent);
    }

    #[test]
    fn test_probe_references_statement_line() {
        let unit = instrumented("y = 1");
        let body_start = PRELUDE.len();
        let statement_line = body_start + 1;
        let probe = &unit.lines[body_start + 1];
        assert!(probe.contains(&format!("\"STMT_1\", {statement_line}, 1,")));
    }

    #[test]
    fn test_structural_lines_carry_no_probe() {
        let unit = instrumented("if a > 5\n  b = 1\nelse\n  b = 2");
        let probe_count = unit
            .lines
            .iter()
            .filter(|l| l.trim_start().starts_with(PROBE_NAME) && l.contains("STMT_"))
            .count();
        // Probes for `b = 1` and `b = 2` only; the if/else headers are
        // structural.
        assert_eq!(probe_count, 2);
    }

    #[test]
    fn test_wrapper_and_trailer_present() {
        let unit = instrumented("a = 1");
        assert_eq!(unit.lines[0], "import sys");
        assert!(unit.lines.iter().any(|l| l == "try:"));
        assert!(unit.lines.iter().any(|l| l.starts_with("except Exception")));
        assert_eq!(
            unit.lines.last().unwrap(),
            "__STEP_CONTROL__(\"COMPLETE\", 0, 0, \"Execution completed\")"
        );
    }

    #[test]
    fn test_updated_map_round_trips_through_offset() {
        let unit = instrumented("a = 1\nb = 2");
        let body_start = PRELUDE.len();
        // Line 1 of the plain artifact is now body_start + 1, and still maps
        // to business line 1.
        assert_eq!(unit.map.business_line_for(body_start + 1), Some(1));
        // Its probe occupies the next line and is synthetic.
        assert_eq!(unit.map.business_line_for(body_start + 2), None);
        // Business line 2 now generates at body_start + 3.
        assert_eq!(unit.map.generated_lines_for(2), vec![body_start + 3]);
    }

    #[test]
    fn test_tab_indentation_fails_instrumentation() {
        let mut map = SourceMapBuilder::new();
        map.record_line(1, 1, PatternKind::Assignment, None);
        let lines = vec!["\ta = 1".to_string()];
        let err = instrument(&lines, &map, 4).unwrap_err();
        match err {
            InstrumentationError::AmbiguousIndentation { generated_line, .. } => {
                assert_eq!(generated_line, 1)
            }
            other => panic!("expected indentation failure, got {other:?}"),
        }
    }

    #[test]
    fn test_unmapped_line_fails_instrumentation() {
        let map = SourceMapBuilder::new();
        let lines = vec!["a = 1".to_string()];
        let err = instrument(&lines, &map, 4).unwrap_err();
        assert!(matches!(err, InstrumentationError::UnmappedLine { generated_line: 1 }));
    }
}
