//! Evaluation tasks: prompt, label type and how labels are read from metadata
//! and from model output.

use std::fmt::Debug;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::extract::JsonObject;
use crate::scoring::{BinaryConfusion, Scoreboard};

/// Several labels reported together as one class.
#[derive(Debug, Clone)]
pub struct LabelGroup<L> {
    pub name: &'static str,
    pub members: Vec<L>,
    /// Labels forming the other side of the group's two-way split.
    pub complement: Vec<L>,
}

pub trait EvalTask: Send + Sync {
    type Label: Ord + Clone + Debug + Send + Sync;

    /// Short name used in file names and reports.
    fn slug(&self) -> &'static str;

    /// Field holding the label, both in `metadata.jsonl` and in model output.
    fn label_field(&self) -> &'static str;

    fn prompt(&self) -> &'static str;

    /// All labels, in report order.
    fn labels(&self) -> Vec<Self::Label>;

    fn label_name(&self, label: &Self::Label) -> String;

    fn parse_ground_truth(&self, value: &Value) -> Option<Self::Label>;

    /// Read the predicted label from the extracted response object.
    fn parse_prediction(&self, response: &JsonObject) -> Option<Self::Label>;

    /// Unscored response fields worth keeping in the debug log.
    fn debug_extras(&self, _response: &JsonObject) -> JsonObject {
        Map::new()
    }

    fn label_groups(&self) -> Vec<LabelGroup<Self::Label>> {
        Vec::new()
    }

    fn binary_confusion(&self, _board: &Scoreboard<Self::Label>) -> Option<BinaryConfusion> {
        None
    }
}

// =============================================================================
// CO detector
// =============================================================================

const CO_DETECTOR_PROMPT: &str = r#"
Portable CO detector appearance:
- small rectangular or polygonal box, roughly palm-sized
- a small display on the front
- usually one larger button on the top or front
- typically dark blue/black or orange
- worn on the chest or at the waist

---
Is the worker in the image wearing a portable CO detector? Answer strictly in the following JSON format:
{
  "has-co-detector": true|false,
  "color": "color of the detector (if present)",
  "position": "where it is worn (if present)"
}
"#;

/// Binary task: is the worker wearing a portable CO detector.
#[derive(Debug, Clone, Copy, Default)]
pub struct CoDetectorTask;

impl EvalTask for CoDetectorTask {
    type Label = bool;

    fn slug(&self) -> &'static str {
        "co_detector"
    }

    fn label_field(&self) -> &'static str {
        "has-co-detector"
    }

    fn prompt(&self) -> &'static str {
        CO_DETECTOR_PROMPT
    }

    fn labels(&self) -> Vec<bool> {
        vec![true, false]
    }

    fn label_name(&self, label: &bool) -> String {
        label.to_string()
    }

    fn parse_ground_truth(&self, value: &Value) -> Option<bool> {
        value.as_bool()
    }

    fn parse_prediction(&self, response: &JsonObject) -> Option<bool> {
        match response.get(self.label_field())? {
            Value::Bool(b) => Some(*b),
            Value::String(s) => match s.trim().to_ascii_lowercase().as_str() {
                "true" => Some(true),
                "false" => Some(false),
                _ => None,
            },
            _ => None,
        }
    }

    fn debug_extras(&self, response: &JsonObject) -> JsonObject {
        ["color", "position"]
            .into_iter()
            .map(|k| (k.to_string(), response.get(k).cloned().unwrap_or(Value::Null)))
            .collect()
    }

    fn binary_confusion(&self, board: &Scoreboard<bool>) -> Option<BinaryConfusion> {
        Some(board.binary_confusion())
    }
}

// =============================================================================
// Gaze direction
// =============================================================================

const GAZE_DIRECTION_PROMPT: &str = r#"
**Image Description:** A surveillance camera view from a steel mill. The upper part of the image shows a section of a steel rolling line, consisting of a conveyor track that runs from left to right and multiple rolling mills. Steel billets from upstream (outside the left of the frame) are conveyed through the mills and rolled into bars.

**Task:** Determine the gaze direction of the person marked with a red box in the surveillance image (looking towards the upstream direction of the rolling line | looking towards the downstream direction of the rolling line | gaze clearly diverted from the rolling line) and strictly output in JSON.

**Output Requirements:**
* The JSON must include:
    * "gaze_direction": "upstream" | "downstream" | "clearly_diverted"
"#;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GazeDirection {
    Upstream,
    Downstream,
    ClearlyDiverted,
}

impl GazeDirection {
    pub const ALL: [GazeDirection; 3] = [
        GazeDirection::Upstream,
        GazeDirection::Downstream,
        GazeDirection::ClearlyDiverted,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            GazeDirection::Upstream => "upstream",
            GazeDirection::Downstream => "downstream",
            GazeDirection::ClearlyDiverted => "clearly_diverted",
        }
    }

    /// Strict parse of the metadata spelling.
    pub fn parse(s: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|g| g.as_str() == s)
    }

    /// Lenient parse for model output: case, spaces and hyphens are normalized.
    pub fn parse_lenient(s: &str) -> Option<Self> {
        let normalized = s.trim().to_ascii_lowercase().replace(['-', ' '], "_");
        Self::parse(&normalized)
    }
}

/// Three-way task: where is the marked worker looking relative to the line.
#[derive(Debug, Clone, Copy, Default)]
pub struct GazeDirectionTask;

impl EvalTask for GazeDirectionTask {
    type Label = GazeDirection;

    fn slug(&self) -> &'static str {
        "gaze_direction"
    }

    fn label_field(&self) -> &'static str {
        "gaze_direction"
    }

    fn prompt(&self) -> &'static str {
        GAZE_DIRECTION_PROMPT
    }

    fn labels(&self) -> Vec<GazeDirection> {
        GazeDirection::ALL.to_vec()
    }

    fn label_name(&self, label: &GazeDirection) -> String {
        label.as_str().to_string()
    }

    fn parse_ground_truth(&self, value: &Value) -> Option<GazeDirection> {
        value.as_str().and_then(GazeDirection::parse)
    }

    fn parse_prediction(&self, response: &JsonObject) -> Option<GazeDirection> {
        response
            .get(self.label_field())?
            .as_str()
            .and_then(GazeDirection::parse_lenient)
    }

    fn label_groups(&self) -> Vec<LabelGroup<GazeDirection>> {
        vec![LabelGroup {
            name: "not-upstream",
            members: vec![GazeDirection::Downstream, GazeDirection::ClearlyDiverted],
            complement: vec![GazeDirection::Upstream],
        }]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn obj(v: Value) -> JsonObject {
        v.as_object().cloned().unwrap()
    }

    #[test]
    fn test_prompts_name_the_label_fields() {
        assert!(CoDetectorTask.prompt().contains("\"has-co-detector\""));
        let gaze = GazeDirectionTask.prompt();
        assert!(gaze.contains("\"gaze_direction\""));
        for g in GazeDirection::ALL {
            assert!(gaze.contains(g.as_str()));
        }
    }

    #[test]
    fn test_co_detector_prediction_parsing() {
        let task = CoDetectorTask;
        assert_eq!(task.parse_prediction(&obj(json!({"has-co-detector": true}))), Some(true));
        assert_eq!(task.parse_prediction(&obj(json!({"has-co-detector": "False"}))), Some(false));
        assert_eq!(task.parse_prediction(&obj(json!({"has-co-detector": "maybe"}))), None);
        assert_eq!(task.parse_prediction(&obj(json!({"color": "orange"}))), None);
    }

    #[test]
    fn test_co_detector_extras() {
        let extras = CoDetectorTask.debug_extras(&obj(json!({
            "has-co-detector": true,
            "color": "orange"
        })));
        assert_eq!(extras["color"], "orange");
        assert_eq!(extras["position"], Value::Null);
    }

    #[test]
    fn test_gaze_parsing() {
        let task = GazeDirectionTask;
        assert_eq!(
            task.parse_ground_truth(&json!("clearly_diverted")),
            Some(GazeDirection::ClearlyDiverted)
        );
        assert_eq!(task.parse_ground_truth(&json!("Upstream")), None);
        assert_eq!(
            task.parse_prediction(&obj(json!({"gaze_direction": " Clearly Diverted "}))),
            Some(GazeDirection::ClearlyDiverted)
        );
        assert_eq!(task.parse_prediction(&obj(json!({"gaze_direction": "left"}))), None);
    }
}
