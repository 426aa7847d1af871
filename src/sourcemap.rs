//! Bidirectional line-correspondence table between rule text and generated
//! code.
//!
//! The builder accumulates per-statement records during generation and
//! instrumentation. Queries go both ways: generated -> business is a total
//! function over non-synthetic lines, business -> generated may fan out.
//! Inconsistencies never abort a compile; they are recorded, logged and
//! degrade breakpoint fidelity for the affected lines only.

use std::collections::BTreeMap;
use std::ops::Range;
use tracing::warn;

use crate::error::MappingIssue;
use crate::types::{LineMapping, PatternKind, SourceMapDocument};

pub const SOURCE_MAP_VERSION: u32 = 3;

#[derive(Debug, Default)]
pub struct SourceMapBuilder {
    mappings: Vec<LineMapping>,
    by_generated: BTreeMap<usize, usize>,
    by_business: BTreeMap<usize, Vec<usize>>,
    issues: Vec<MappingIssue>,
}

impl SourceMapBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record one business line producing a range of generated lines.
    pub fn record(
        &mut self,
        business_line: usize,
        generated: Range<usize>,
        pattern_type: PatternKind,
        statement_id: Option<&str>,
    ) {
        for generated_line in generated {
            self.record_line(business_line, generated_line, pattern_type, statement_id);
        }
    }

    pub fn record_line(
        &mut self,
        business_line: usize,
        generated_line: usize,
        pattern_type: PatternKind,
        statement_id: Option<&str>,
    ) {
        if self.by_generated.contains_key(&generated_line) {
            let issue = MappingIssue {
                generated_line,
                message: format!(
                    "generated line already mapped; ignoring remap to business line {business_line}"
                ),
            };
            warn!(generated_line, business_line, "inconsistent source mapping");
            self.issues.push(issue);
            return;
        }

        let index = self.mappings.len();
        self.mappings.push(LineMapping {
            business_line,
            generated_line,
            generated_column: None,
            pattern_type,
            statement_id: statement_id.map(|s| s.to_string()),
        });
        self.by_generated.insert(generated_line, index);
        if !pattern_type.is_synthetic() {
            self.by_business
                .entry(business_line)
                .or_default()
                .push(index);
        }
    }

    /// The business line whose generation produced this generated line.
    /// `None` for synthetic lines (probes, harness, imports) and unmapped
    /// lines.
    pub fn business_line_for(&self, generated_line: usize) -> Option<usize> {
        let mapping = &self.mappings[*self.by_generated.get(&generated_line)?];
        if mapping.pattern_type.is_synthetic() {
            None
        } else {
            Some(mapping.business_line)
        }
    }

    /// Every generated line a business line expanded into, probes included.
    pub fn generated_lines_for(&self, business_line: usize) -> Vec<usize> {
        self.mappings
            .iter()
            .filter(|m| m.business_line == business_line && !m.pattern_type.is_synthetic())
            .map(|m| m.generated_line)
            .collect()
    }

    pub fn mapping_for(&self, generated_line: usize) -> Option<&LineMapping> {
        self.by_generated
            .get(&generated_line)
            .map(|&i| &self.mappings[i])
    }

    pub fn mappings(&self) -> &[LineMapping] {
        &self.mappings
    }

    pub fn issues(&self) -> &[MappingIssue] {
        &self.issues
    }

    pub fn take_issues(&mut self) -> Vec<MappingIssue> {
        std::mem::take(&mut self.issues)
    }

    /// Export the wholesale document handed to callers.
    pub fn to_document(&self, source_name: &str, rule_source: &str, file: &str) -> SourceMapDocument {
        let mut mappings = self.mappings.clone();
        mappings.sort_by_key(|m| m.generated_line);
        SourceMapDocument {
            version: SOURCE_MAP_VERSION,
            sources: vec![source_name.to_string()],
            sources_content: vec![rule_source.to_string()],
            mappings,
            file: file.to_string(),
        }
    }
}
