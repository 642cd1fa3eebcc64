/// Node identifiers are the string keys of the workflow JSON object.
pub type NodeId = String;

/// Opaque identifier assigned by the engine when a prompt is queued.
pub type PromptId = String;
