//! Built-in workflow templates.

use serde_json::json;

use crate::error::CoreError;
use crate::graph::Graph;

pub const TEMPLATE_EMPTY: &str = "empty";
pub const TEMPLATE_FAL_FLUX_DEV: &str = "fal-flux-dev";
pub const TEMPLATE_FAL_FLUX_SCHNELL: &str = "fal-flux-schnell";

/// All template names, in display order.
pub const TEMPLATE_NAMES: &[&str] = &[
    TEMPLATE_EMPTY,
    TEMPLATE_FAL_FLUX_DEV,
    TEMPLATE_FAL_FLUX_SCHNELL,
];

pub fn list_templates() -> &'static [&'static str] {
    TEMPLATE_NAMES
}

/// Build a fresh copy of the named template.
pub fn template(name: &str) -> Result<Graph, CoreError> {
    let raw = match name {
        TEMPLATE_EMPTY => json!({}),
        TEMPLATE_FAL_FLUX_DEV => json!({
            "1": {"class_type": "RemoteCheckpointLoader_fal", "inputs": {"ckpt_name": "fal-ai/flux/dev"}},
            "2": {"class_type": "StringInput_fal", "inputs": {"text": "A beautiful landscape"}},
            "3": {"class_type": "IntegerInput_fal", "inputs": {"value": 1024}},
            "4": {"class_type": "IntegerInput_fal", "inputs": {"value": 1024}},
            "5": {"class_type": "IntegerInput_fal", "inputs": {"value": 28}},
            "6": {"class_type": "FloatInput_fal", "inputs": {"value": 3.5}},
            "7": {
                "class_type": "SaveImage_fal",
                "inputs": {"filename_prefix": "flux_output", "images": ["1", 0]}
            }
        }),
        TEMPLATE_FAL_FLUX_SCHNELL => json!({
            "1": {"class_type": "RemoteCheckpointLoader_fal", "inputs": {"ckpt_name": "fal-ai/flux/schnell"}},
            "2": {"class_type": "StringInput_fal", "inputs": {"text": "A beautiful landscape"}},
            "3": {
                "class_type": "SaveImage_fal",
                "inputs": {"filename_prefix": "flux_schnell", "images": ["1", 0]}
            }
        }),
        _ => {
            return Err(CoreError::NotFound {
                entity: "template",
                id: format!("{name} (available: {})", TEMPLATE_NAMES.join(", ")),
            })
        }
    };
    Graph::from_json(raw)
}
