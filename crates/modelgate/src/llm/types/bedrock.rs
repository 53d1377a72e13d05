//! Wire types for the Bedrock Converse API.
//!
//! Request/response bodies are JSON; streaming responses arrive as binary event-stream
//! frames whose payloads deserialize into [`ConverseStreamOutput`] variants keyed by the
//! frame's `:event-type` header.

use serde::{Deserialize, Serialize};

use crate::parse::aws_sse;

#[derive(Debug, Deserialize, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Request {
	pub messages: Vec<Message>,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub system: Option<Vec<SystemContentBlock>>,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub tool_config: Option<ToolConfig>,
	#[serde(flatten, default)]
	pub rest: serde_json::Value,
}

#[derive(Debug, Deserialize, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
	pub role: String,
	#[serde(default)]
	pub content: Vec<ContentBlock>,
	#[serde(flatten, default)]
	pub rest: serde_json::Value,
}

/// Converse content block, flat passthrough. Exactly one of the fields is set per block
/// on the wire.
#[derive(Debug, Deserialize, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ContentBlock {
	#[serde(skip_serializing_if = "Option::is_none")]
	pub text: Option<String>,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub tool_use: Option<ToolUseBlock>,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub tool_result: Option<ToolResultBlock>,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub image: Option<ImageBlock>,
	/// MCP-style inline image fields, rewritten to `image` on materialization.
	#[serde(skip_serializing_if = "Option::is_none")]
	pub data: Option<String>,
	#[serde(rename = "mimeType", skip_serializing_if = "Option::is_none")]
	pub mime_type: Option<String>,
	#[serde(flatten, default)]
	pub rest: serde_json::Value,
}

impl ContentBlock {
	pub fn text(text: impl Into<String>) -> Self {
		ContentBlock {
			text: Some(text.into()),
			tool_use: None,
			tool_result: None,
			image: None,
			data: None,
			mime_type: None,
			rest: crate::serdes::empty_rest(),
		}
	}
}

#[derive(Debug, Deserialize, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolUseBlock {
	pub tool_use_id: String,
	pub name: String,
	#[serde(default)]
	pub input: serde_json::Value,
}

#[derive(Debug, Deserialize, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolResultBlock {
	pub tool_use_id: String,
	#[serde(default)]
	pub content: Vec<ToolResultContentBlock>,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub status: Option<String>,
}

#[derive(Debug, Deserialize, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum ToolResultContentBlock {
	Text(String),
	Json(serde_json::Value),
	Image(ImageBlock),
	Video(serde_json::Value),
}

#[derive(Debug, Deserialize, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ImageBlock {
	pub format: String,
	pub source: ImageSource,
}

#[derive(Debug, Deserialize, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ImageSource {
	pub bytes: String,
}

#[derive(Debug, Deserialize, Clone, Serialize)]
#[serde(rename_all = "camelCase", untagged)]
pub enum SystemContentBlock {
	Text { text: String },
	Other(serde_json::Value),
}

#[derive(Debug, Deserialize, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolConfig {
	#[serde(default)]
	pub tools: Vec<ToolEntry>,
	#[serde(flatten, default)]
	pub rest: serde_json::Value,
}

#[derive(Debug, Deserialize, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolEntry {
	#[serde(skip_serializing_if = "Option::is_none")]
	pub tool_spec: Option<ToolSpecification>,
	#[serde(flatten, default)]
	pub rest: serde_json::Value,
}

#[derive(Debug, Deserialize, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolSpecification {
	pub name: String,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub description: Option<String>,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub input_schema: Option<ToolInputSchema>,
}

#[derive(Debug, Deserialize, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum ToolInputSchema {
	Json(serde_json::Value),
}

#[derive(Debug, Deserialize, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConverseResponse {
	pub output: ConverseOutput,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub stop_reason: Option<String>,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub usage: Option<TokenUsage>,
	#[serde(flatten, default)]
	pub rest: serde_json::Value,
}

#[derive(Debug, Deserialize, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConverseOutput {
	#[serde(skip_serializing_if = "Option::is_none")]
	pub message: Option<Message>,
	#[serde(flatten, default)]
	pub rest: serde_json::Value,
}

#[derive(Debug, Deserialize, Clone, Copy, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenUsage {
	#[serde(default)]
	pub input_tokens: u64,
	#[serde(default)]
	pub output_tokens: u64,
	#[serde(default)]
	pub total_tokens: u64,
}

/// Streaming events, one per event-stream frame.
// This is NOT deserialized directly, see the associated method
#[derive(Debug, Clone)]
pub enum ConverseStreamOutput {
	MessageStart(MessageStartEvent),
	ContentBlockStart(ContentBlockStartEvent),
	ContentBlockDelta(ContentBlockDeltaEvent),
	ContentBlockStop(ContentBlockStopEvent),
	MessageStop(MessageStopEvent),
	Metadata(ConverseStreamMetadataEvent),
}

impl ConverseStreamOutput {
	pub fn deserialize(m: &aws_sse::Message) -> anyhow::Result<Self> {
		let Some(event_type) = aws_sse::event_type(m) else {
			anyhow::bail!("no event type header")
		};
		let body = aws_sse::decode_body(m)?;
		Ok(match event_type {
			"messageStart" => ConverseStreamOutput::MessageStart(serde_json::from_value(body)?),
			"contentBlockStart" => {
				ConverseStreamOutput::ContentBlockStart(serde_json::from_value(body)?)
			},
			"contentBlockDelta" => {
				ConverseStreamOutput::ContentBlockDelta(serde_json::from_value(body)?)
			},
			"contentBlockStop" => {
				ConverseStreamOutput::ContentBlockStop(serde_json::from_value(body)?)
			},
			"messageStop" => ConverseStreamOutput::MessageStop(serde_json::from_value(body)?),
			"metadata" => ConverseStreamOutput::Metadata(serde_json::from_value(body)?),
			other => anyhow::bail!("unexpected event type: {other}"),
		})
	}

	pub fn event_type(&self) -> &'static str {
		match self {
			ConverseStreamOutput::MessageStart(_) => "messageStart",
			ConverseStreamOutput::ContentBlockStart(_) => "contentBlockStart",
			ConverseStreamOutput::ContentBlockDelta(_) => "contentBlockDelta",
			ConverseStreamOutput::ContentBlockStop(_) => "contentBlockStop",
			ConverseStreamOutput::MessageStop(_) => "messageStop",
			ConverseStreamOutput::Metadata(_) => "metadata",
		}
	}
}

#[derive(Debug, Deserialize, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageStartEvent {
	pub role: String,
	#[serde(flatten, default)]
	pub rest: serde_json::Value,
}

#[derive(Debug, Deserialize, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ContentBlockStartEvent {
	#[serde(skip_serializing_if = "Option::is_none")]
	pub start: Option<ContentBlockStart>,
	pub content_block_index: i32,
}

#[derive(Debug, Deserialize, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum ContentBlockStart {
	ToolUse(ToolUseBlockStart),
	#[serde(untagged)]
	Other(serde_json::Value),
}

#[derive(Debug, Deserialize, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolUseBlockStart {
	pub tool_use_id: String,
	pub name: String,
}

#[derive(Debug, Deserialize, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ContentBlockDeltaEvent {
	#[serde(skip_serializing_if = "Option::is_none")]
	pub delta: Option<ContentBlockDelta>,
	pub content_block_index: i32,
}

#[derive(Debug, Deserialize, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum ContentBlockDelta {
	Text(String),
	ToolUse(ToolUseDelta),
	#[serde(untagged)]
	Other(serde_json::Value),
}

#[derive(Debug, Deserialize, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolUseDelta {
	pub input: String,
}

#[derive(Debug, Deserialize, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ContentBlockStopEvent {
	pub content_block_index: i32,
}

#[derive(Debug, Deserialize, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageStopEvent {
	pub stop_reason: String,
	#[serde(flatten, default)]
	pub rest: serde_json::Value,
}

#[derive(Debug, Deserialize, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConverseStreamMetadataEvent {
	#[serde(skip_serializing_if = "Option::is_none")]
	pub usage: Option<TokenUsage>,
	#[serde(flatten, default)]
	pub rest: serde_json::Value,
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn request_round_trips() {
		let raw = serde_json::json!({
			"messages": [
				{"role": "user", "content": [{"text": "hi"}]},
				{"role": "assistant", "content": [
					{"toolUse": {"toolUseId": "tu_1", "name": "list_files", "input": {}}}
				]},
				{"role": "user", "content": [
					{"toolResult": {"toolUseId": "tu_1", "content": [{"text": "[]"}]}}
				]}
			],
			"inferenceConfig": {"maxTokens": 512},
		});
		let req: Request = serde_json::from_value(raw.clone()).unwrap();
		assert_eq!(serde_json::to_value(&req).unwrap(), raw);
	}

	#[test]
	fn stream_event_from_frame() {
		let frame = aws_sse::encode_event(
			"contentBlockDelta",
			&serde_json::json!({"delta": {"text": "hello"}, "contentBlockIndex": 0}),
		)
		.unwrap();
		let msg = aws_sse::decode_frame(&frame).unwrap();
		let ev = ConverseStreamOutput::deserialize(&msg).unwrap();
		let ConverseStreamOutput::ContentBlockDelta(d) = ev else {
			panic!("wrong event");
		};
		assert!(matches!(d.delta, Some(ContentBlockDelta::Text(ref t)) if t == "hello"));
	}
}
