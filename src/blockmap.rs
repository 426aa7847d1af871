//! Block map construction.
//!
//! Walks the instrumented artifact in generated-line order with a nesting
//! stack driven by the structural pattern kinds the generator recorded in
//! the source map. Control statements that open a scope become `condition`
//! or `loop_start` blocks owning every block nested beneath them; loop
//! closes synthesize `loop_end` blocks. Probes attach to the block of the
//! statement they instrument.
//!
//! Block IDs are content-derived: sha256 over (block type, business line,
//! parent id), so recompiling unchanged source reproduces identical IDs and
//! breakpoints survive unrelated edits.

use chrono::Utc;
use sha2::{Digest, Sha256};
use std::collections::{BTreeMap, HashMap};

use crate::sourcemap::SourceMapBuilder;
use crate::types::{
    BlockInfo, BlockMap, BlockMapMetadata, BlockType, PatternKind, RuleStatement,
    BLOCK_MAP_VERSION,
};

pub fn sha256_hex(content: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(content.as_bytes());
    format!("{:x}", hasher.finalize())
}

pub fn build_block_map(
    instrumented_lines: &[String],
    map: &SourceMapBuilder,
    statements: &[RuleStatement],
    rule_source: &str,
    generated_code: &str,
    indent_width: usize,
) -> BlockMap {
    let mut builder = Builder {
        blocks: BTreeMap::new(),
        stack: Vec::new(),
        by_business: HashMap::new(),
        used_keys: HashMap::new(),
        pending_probe: None,
        prev_line: 0,
        rule_lines: rule_source.lines().map(|l| l.trim().to_string()).collect(),
        statements,
        indent_width,
    };

    for (idx, line) in instrumented_lines.iter().enumerate() {
        builder.visit(idx + 1, line, map);
    }
    builder.close_to_depth(0);

    for block in builder.blocks.values_mut() {
        block.generated_lines.sort_unstable();
        block.generated_lines.dedup();
    }

    let total_blocks = builder.blocks.len();
    BlockMap {
        version: BLOCK_MAP_VERSION,
        blocks: builder.blocks,
        metadata: BlockMapMetadata {
            generated_at: Utc::now(),
            business_rules_hash: sha256_hex(rule_source),
            generated_code_hash: sha256_hex(generated_code),
            total_blocks,
        },
    }
}

/// An open container on the nesting stack.
struct Open {
    block_id: String,
    block_type: BlockType,
    depth: usize,
    statement_id: Option<String>,
}

struct Builder<'a> {
    blocks: BTreeMap<String, BlockInfo>,
    stack: Vec<Open>,
    /// Latest block per business line; probes attach through this.
    by_business: HashMap<usize, String>,
    used_keys: HashMap<String, usize>,
    /// A probe seen before its statement (terminal placement).
    pending_probe: Option<usize>,
    prev_line: usize,
    rule_lines: Vec<String>,
    statements: &'a [RuleStatement],
    indent_width: usize,
}

impl Builder<'_> {
    fn visit(&mut self, line_no: usize, line: &str, map: &SourceMapBuilder) {
        let mapping = match map.mapping_for(line_no) {
            Some(m) => m.clone(),
            None => return,
        };
        if mapping.pattern_type == PatternKind::Harness {
            return;
        }

        let leading = line.len() - line.trim_start().len();
        let depth = leading / self.indent_width.max(1);
        let trimmed = line.trim_start();

        // Probes never drive the nesting stack; they attach to the block of
        // the statement they instrument (or wait for it, when placed before
        // a control-transfer statement).
        if mapping.pattern_type == PatternKind::Probe {
            let target = self
                .stack
                .last()
                .filter(|top| {
                    top.statement_id.is_some() && top.statement_id == mapping.statement_id
                })
                .map(|top| top.block_id.clone())
                .or_else(|| self.by_business.get(&mapping.business_line).cloned());
            match target {
                Some(block_id) => self.attach_line(&block_id, line_no),
                None => self.pending_probe = Some(line_no),
            }
            self.prev_line = line_no;
            return;
        }

        // Unwind containers this line no longer belongs to. A line carrying
        // the statement id of an open container (chain headers, quantifier
        // machinery) stops the unwind and attaches instead.
        loop {
            match self.stack.last() {
                None => break,
                Some(top) => {
                    let extends = top.statement_id.is_some()
                        && top.statement_id == mapping.statement_id;
                    if extends || top.depth < depth {
                        break;
                    }
                }
            }
            self.close_top();
        }

        let extend_id = self.stack.last().and_then(|top| {
            if top.statement_id.is_some() && top.statement_id == mapping.statement_id {
                Some(top.block_id.clone())
            } else {
                None
            }
        });
        if let Some(id) = extend_id {
            // Chain header / machinery line of the open container.
            self.attach_line(&id, line_no);
            self.prev_line = line_no;
            return;
        }

        match mapping.pattern_type {
            // Probes returned early above.
            PatternKind::Probe
            | PatternKind::Structural
            | PatternKind::Import
            | PatternKind::Harness => {}
            PatternKind::Try => {
                // try/except/finally headers group visually but attach their
                // children to the enclosing block.
            }
            PatternKind::Condition => {
                self.open_container(BlockType::Condition, &mapping, depth, line_no);
            }
            PatternKind::Loop => {
                self.open_container(BlockType::LoopStart, &mapping, depth, line_no);
            }
            PatternKind::Quantifier => {
                // First quantifier line (the flag declaration) opens the
                // early-exit loop's block; everything else attached above.
                self.open_container(BlockType::LoopStart, &mapping, depth, line_no);
            }
            PatternKind::Switch => {
                self.open_container(BlockType::Condition, &mapping, depth, line_no);
            }
            PatternKind::Assignment => {
                self.leaf(BlockType::Assignment, &mapping, line_no);
            }
            PatternKind::Call => {
                let block_type = if is_control_transfer(trimmed) {
                    BlockType::Action
                } else {
                    BlockType::FunctionCall
                };
                self.leaf(block_type, &mapping, line_no);
            }
        }

        self.prev_line = line_no;
    }

    fn open_container(
        &mut self,
        block_type: BlockType,
        mapping: &crate::types::LineMapping,
        depth: usize,
        line_no: usize,
    ) {
        let block_id = self.create_block(block_type, mapping.business_line, line_no);
        self.stack.push(Open {
            block_id,
            block_type,
            depth,
            statement_id: mapping.statement_id.clone(),
        });
    }

    fn leaf(
        &mut self,
        block_type: BlockType,
        mapping: &crate::types::LineMapping,
        line_no: usize,
    ) {
        let block_id = self.create_block(block_type, mapping.business_line, line_no);
        if let Some(probe_line) = self.pending_probe.take() {
            self.attach_line(&block_id, probe_line);
        }
    }

    fn create_block(
        &mut self,
        block_type: BlockType,
        business_line: usize,
        line_no: usize,
    ) -> String {
        let parent_id = self.stack.last().map(|o| o.block_id.clone());
        let block_id = self.block_id(block_type, business_line, parent_id.as_deref());

        let description = self.describe(business_line);
        let variables = self
            .statements
            .iter()
            .find(|s| s.business_line == business_line)
            .map(|s| s.defined.clone())
            .unwrap_or_default();

        if let Some(parent) = &parent_id {
            if let Some(parent_block) = self.blocks.get_mut(parent) {
                parent_block.child_block_ids.push(block_id.clone());
            }
        }

        self.blocks.insert(
            block_id.clone(),
            BlockInfo {
                block_id: block_id.clone(),
                block_type,
                business_line,
                generated_lines: vec![line_no],
                description,
                variables,
                parent_block_id: parent_id,
                child_block_ids: Vec::new(),
            },
        );
        self.by_business.insert(business_line, block_id.clone());
        block_id
    }

    fn attach_line(&mut self, block_id: &str, line_no: usize) {
        if let Some(block) = self.blocks.get_mut(block_id) {
            block.generated_lines.push(line_no);
        }
    }

    fn close_top(&mut self) {
        let open = match self.stack.pop() {
            Some(o) => o,
            None => return,
        };
        if open.block_type == BlockType::LoopStart {
            // Synthesize the matching loop_end as a sibling.
            let business_line = self
                .blocks
                .get(&open.block_id)
                .map(|b| b.business_line)
                .unwrap_or(0);
            let parent_id = self.stack.last().map(|o| o.block_id.clone());
            let end_id = self.block_id(BlockType::LoopEnd, business_line, parent_id.as_deref());
            let description = format!("end of {}", self.describe(business_line));

            if let Some(parent) = &parent_id {
                if let Some(parent_block) = self.blocks.get_mut(parent) {
                    parent_block.child_block_ids.push(end_id.clone());
                }
            }
            self.blocks.insert(
                end_id.clone(),
                BlockInfo {
                    block_id: end_id.clone(),
                    block_type: BlockType::LoopEnd,
                    business_line,
                    generated_lines: vec![self.prev_line],
                    description,
                    variables: Vec::new(),
                    parent_block_id: parent_id,
                    child_block_ids: Vec::new(),
                },
            );
        }
    }

    fn close_to_depth(&mut self, depth: usize) {
        while self.stack.last().map_or(false, |top| top.depth >= depth) {
            self.close_top();
        }
    }

    /// Deterministic id from (type, business line, parent chain). The parent
    /// id already encodes its own chain, so hashing it transitively pins the
    /// full path.
    fn block_id(
        &mut self,
        block_type: BlockType,
        business_line: usize,
        parent_id: Option<&str>,
    ) -> String {
        let key = format!(
            "{:?}|{}|{}",
            block_type,
            business_line,
            parent_id.unwrap_or("")
        );
        let occurrence = self.used_keys.entry(key.clone()).or_insert(0);
        let input = if *occurrence == 0 {
            key.clone()
        } else {
            format!("{key}#{occurrence}")
        };
        *occurrence += 1;
        format!("blk_{}", &sha256_hex(&input)[..12])
    }

    fn describe(&self, business_line: usize) -> String {
        business_line
            .checked_sub(1)
            .and_then(|i| self.rule_lines.get(i))
            .cloned()
            .unwrap_or_default()
    }
}

fn is_control_transfer(trimmed: &str) -> bool {
    ["return", "break", "continue", "raise"]
        .iter()
        .any(|kw| trimmed == *kw || trimmed.starts_with(&format!("{kw} ")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compiler::generator::generate;
    use crate::compiler::parser::parse;
    use crate::instrument::instrument;
    use crate::registry::Registries;
    use crate::types::BlockType;

    fn block_map(source: &str) -> BlockMap {
        let outcome = parse(source);
        assert!(outcome.issues.is_empty(), "{:?}", outcome.issues);
        let mut statements = Vec::new();
        for node in &outcome.nodes {
            node.collect_statements(&mut statements);
        }
        let unit = generate(&outcome.nodes, &Registries::with_defaults(), 4).unwrap();
        let instrumented = instrument(&unit.lines, &unit.map, 4).unwrap();
        build_block_map(
            &instrumented.lines,
            &instrumented.map,
            &statements,
            source,
            &unit.code(),
            4,
        )
    }

    #[test]
    fn test_two_branch_conditional_forest() {
        let map = block_map("if a > 5\n  b = 1\nelse\n  b = 2");

        let condition = map
            .blocks
            .values()
            .find(|b| b.block_type == BlockType::Condition)
            .expect("condition block");
        assert!(condition.parent_block_id.is_none());

        let assignments: Vec<_> = map
            .blocks
            .values()
            .filter(|b| b.block_type == BlockType::Assignment)
            .collect();
        assert_eq!(assignments.len(), 2);
        for assignment in &assignments {
            assert_eq!(
                assignment.parent_block_id.as_deref(),
                Some(condition.block_id.as_str())
            );
            assert!(condition
                .child_block_ids
                .contains(&assignment.block_id));
        }
    }

    #[test]
    fn test_quantifier_block_maps_to_business_line() {
        let map = block_map("any x in items has x.age = 4");
        let loop_start = map
            .blocks
            .values()
            .find(|b| b.block_type == BlockType::LoopStart)
            .expect("loop_start block");
        assert_eq!(loop_start.business_line, 1);
        assert_eq!(loop_start.description, "any x in items has x.age = 4");
        // The machinery (flag, for, test, set, break, probes) attaches to
        // the quantifier's own block rather than spawning siblings.
        assert!(loop_start.generated_lines.len() >= 5);
        let loop_end = map
            .blocks
            .values()
            .find(|b| b.block_type == BlockType::LoopEnd)
            .expect("loop_end block");
        assert_eq!(loop_end.business_line, 1);
    }

    #[test]
    fn test_forest_invariant() {
        let map = block_map(
            "total = 0\nfor x in items\n  if x.active\n    total = total + 1\nlog(total)",
        );
        for block in map.blocks.values() {
            if let Some(parent_id) = &block.parent_block_id {
                let parent = map.blocks.get(parent_id).expect("parent exists");
                assert!(parent.child_block_ids.contains(&block.block_id));
            }
            // No block is its own ancestor.
            let mut seen = vec![block.block_id.clone()];
            let mut cursor = block.parent_block_id.clone();
            while let Some(id) = cursor {
                assert!(!seen.contains(&id), "cycle through {id}");
                seen.push(id.clone());
                cursor = map.blocks.get(&id).and_then(|b| b.parent_block_id.clone());
            }
        }
    }

    #[test]
    fn test_block_ids_stable_across_recompiles() {
        let source = "if a > 5\n  b = 1\nelse\n  b = 2";
        let first = block_map(source);
        let second = block_map(source);
        let first_ids: Vec<_> = first.blocks.keys().collect();
        let second_ids: Vec<_> = second.blocks.keys().collect();
        assert_eq!(first_ids, second_ids);
    }

    #[test]
    fn test_loop_gets_start_and_end() {
        let map = block_map("for x in items\n  total = x");
        let types: Vec<_> = map.blocks.values().map(|b| b.block_type).collect();
        assert!(types.contains(&BlockType::LoopStart));
        assert!(types.contains(&BlockType::LoopEnd));
        let start = map
            .blocks
            .values()
            .find(|b| b.block_type == BlockType::LoopStart)
            .unwrap();
        let end = map
            .blocks
            .values()
            .find(|b| b.block_type == BlockType::LoopEnd)
            .unwrap();
        // Start and end are siblings.
        assert_eq!(start.parent_block_id, end.parent_block_id);
    }

    #[test]
    fn test_metadata_hashes_detect_staleness() {
        let first = block_map("a = 1");
        let second = block_map("a = 2");
        assert_ne!(
            first.metadata.business_rules_hash,
            second.metadata.business_rules_hash
        );
        assert_eq!(first.metadata.total_blocks, first.blocks.len());
    }

    #[test]
    fn test_control_transfer_is_action_block() {
        let map = block_map("for x in items\n  break");
        let action = map
            .blocks
            .values()
            .find(|b| b.block_type == BlockType::Action)
            .expect("action block for break");
        assert_eq!(action.business_line, 2);
        // Probe line plus the break line itself.
        assert_eq!(action.generated_lines.len(), 2);
    }
}
