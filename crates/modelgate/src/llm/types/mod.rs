pub mod bedrock;
pub mod completions;
pub mod gemini;
pub mod messages;

use gate_core::prelude::Strng;
use macro_rules_attribute::apply;

use crate::serdes::schema;

/// CommonMessage is a provider-neutral view over one conversation turn. It is derived
/// from the provider's own message array; edits never flow back through this view, they
/// go through the request envelope's override map.
#[apply(schema!)]
#[derive(Default)]
pub struct CommonMessage {
	pub role: Strng,
	pub content: Strng,
	/// Tool results carried by this turn (role=tool for OpenAI-family, tool_result
	/// content blocks for Anthropic/Bedrock, functionResponse parts for Gemini).
	#[serde(default, skip_serializing_if = "Vec::is_empty")]
	pub tool_results: Vec<ToolResultView>,
}

/// One tool result as seen by policy stages: the payload the client-side executor
/// produced for a prior tool call.
#[apply(schema!)]
#[derive(Default)]
pub struct ToolResultView {
	pub id: String,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub name: Option<String>,
	pub content: String,
	#[serde(default)]
	pub is_error: bool,
}

/// A tool made available to the model by the client.
#[apply(schema!)]
pub struct CommonToolDefinition {
	pub name: String,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub description: Option<String>,
	pub input_schema: serde_json::Value,
}

/// A tool invocation proposed by the model.
#[apply(schema!)]
pub struct CommonToolCall {
	pub id: String,
	pub name: String,
	/// JSON object once complete; providers stream it as string fragments.
	pub arguments: serde_json::Value,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct TokenUsage {
	pub input_tokens: u64,
	pub output_tokens: u64,
}
