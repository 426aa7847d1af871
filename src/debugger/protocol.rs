//! Wire types for the sandbox step protocol, plus response validation.
//!
//! Everything coming back from the sandbox is untrusted: steps missing
//! required fields, carrying an unrecognized step type, or an unrecognized
//! execution result are dropped with a warning rather than propagated.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use tracing::warn;

use crate::types::{BlockMap, BusinessStep, ExecutionOutcome, StepType};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StepMode {
    Step,
    Continue,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StepRequest {
    pub generated_code: String,
    pub block_map: BlockMap,
    /// Block ids, not line numbers.
    pub breakpoints: Vec<String>,
    pub initial_variables: JsonValue,
    pub mode: StepMode,
}

/// One raw execution event as the sandbox reports it. All fields optional;
/// validation decides what survives.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawStep {
    #[serde(default)]
    pub block_id: Option<String>,
    #[serde(default)]
    pub step_type: Option<String>,
    #[serde(default)]
    pub business_line: Option<usize>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub variables: Option<JsonValue>,
    #[serde(default)]
    pub execution_result: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Timing {
    #[serde(default)]
    pub total_ms: Option<u64>,
    #[serde(default)]
    pub sandbox_ms: Option<u64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StepResponse {
    pub success: bool,
    #[serde(default)]
    pub business_steps: Vec<RawStep>,
    #[serde(default)]
    pub executed_blocks: usize,
    #[serde(default)]
    pub total_blocks: usize,
    #[serde(default)]
    pub error: Option<String>,
    #[serde(default)]
    pub timing: Timing,
}

/// Validate one raw step into a `BusinessStep`, filtered to
/// business-relevant variables. Returns `None` (with a warning) for
/// anything malformed.
pub fn validate_step(raw: &RawStep, step_index: usize) -> Option<BusinessStep> {
    let block_id = match &raw.block_id {
        Some(id) if !id.is_empty() => id.clone(),
        _ => {
            warn!("dropping step without a block id");
            return None;
        }
    };

    let step_type: StepType = match raw
        .step_type
        .as_deref()
        .and_then(|s| serde_json::from_value(JsonValue::String(s.to_string())).ok())
    {
        Some(t) => t,
        None => {
            warn!(
                block_id,
                step_type = raw.step_type.as_deref().unwrap_or("<missing>"),
                "dropping step with unrecognized step type"
            );
            return None;
        }
    };

    let execution_result: ExecutionOutcome = match raw
        .execution_result
        .as_deref()
        .and_then(|s| serde_json::from_value(JsonValue::String(s.to_string())).ok())
    {
        Some(r) => r,
        None => {
            warn!(
                block_id,
                result = raw.execution_result.as_deref().unwrap_or("<missing>"),
                "dropping step with unrecognized execution result"
            );
            return None;
        }
    };

    let business_line = match raw.business_line {
        Some(line) => line,
        None => {
            warn!(block_id, "dropping step without a business line");
            return None;
        }
    };

    Some(BusinessStep {
        block_id,
        step_type,
        business_line,
        description: raw.description.clone().unwrap_or_default(),
        variables: business_variables(raw.variables.clone()),
        execution_result,
        timestamp: Utc::now(),
        step_index,
        is_first: false,
        is_last: false,
    })
}

/// Strip synthetic machinery out of a variable snapshot: underscore-prefixed
/// names (exit flags, switch scrutinees, probe internals) and the step
/// control table are not business state.
pub fn business_variables(variables: Option<JsonValue>) -> JsonValue {
    match variables {
        Some(JsonValue::Object(map)) => {
            let filtered: serde_json::Map<String, JsonValue> = map
                .into_iter()
                .filter(|(name, _)| !name.starts_with('_') && name != "step_control")
                .collect();
            JsonValue::Object(filtered)
        }
        Some(other) => other,
        None => JsonValue::Object(serde_json::Map::new()),
    }
}

/// Sanity-check a request against its own block map before it goes out:
/// breakpoints naming unknown blocks are dropped with a warning.
pub fn retained_breakpoints(breakpoints: &[String], block_map: &BlockMap) -> Vec<String> {
    breakpoints
        .iter()
        .filter(|id| {
            let known = block_map.blocks.contains_key(*id);
            if !known {
                warn!(block_id = %id, "dropping breakpoint for unknown block");
            }
            known
        })
        .cloned()
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn raw(step_type: &str, result: &str) -> RawStep {
        RawStep {
            block_id: Some("blk_abc".to_string()),
            step_type: Some(step_type.to_string()),
            business_line: Some(3),
            description: Some("b = 1".to_string()),
            variables: Some(json!({"b": 1, "_any_match_3": true, "step_control": {}})),
            execution_result: Some(result.to_string()),
        }
    }

    #[test]
    fn test_valid_step_survives_with_filtered_variables() {
        let step = validate_step(&raw("assignment", "success"), 0).unwrap();
        assert_eq!(step.step_type, StepType::Assignment);
        assert_eq!(step.execution_result, ExecutionOutcome::Success);
        assert_eq!(step.variables, json!({"b": 1}));
    }

    #[test]
    fn test_unrecognized_step_type_dropped() {
        assert!(validate_step(&raw("telepathy", "success"), 0).is_none());
    }

    #[test]
    fn test_unrecognized_result_dropped() {
        assert!(validate_step(&raw("assignment", "exploded"), 0).is_none());
    }

    #[test]
    fn test_missing_block_id_dropped() {
        let mut step = raw("assignment", "success");
        step.block_id = None;
        assert!(validate_step(&step, 0).is_none());
    }

    #[test]
    fn test_loop_start_wire_name() {
        let step = validate_step(&raw("loop_start", "success"), 0).unwrap();
        assert_eq!(step.step_type, StepType::LoopStart);
    }
}
