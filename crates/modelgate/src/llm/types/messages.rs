//! Wire types for the Anthropic Messages format.
//!
//! Requests and non-streamed responses use passthrough structs (typed fields the gateway
//! touches, `rest` for everything else). The streaming event grammar is fully typed in
//! [`StreamEvent`] since the stream adapter has to tag every frame.

use serde::{Deserialize, Serialize};

#[derive(Debug, Deserialize, Clone, Serialize)]
pub struct Request {
	#[serde(skip_serializing_if = "Option::is_none")]
	pub model: Option<String>,
	pub messages: Vec<RequestMessage>,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub system: Option<serde_json::Value>,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub stream: Option<bool>,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub tools: Option<Vec<Tool>>,
	#[serde(flatten, default)]
	pub rest: serde_json::Value,
}

#[derive(Debug, Deserialize, Clone, Serialize)]
pub struct RequestMessage {
	pub role: String,
	pub content: Content,
	#[serde(flatten, default)]
	pub rest: serde_json::Value,
}

#[derive(Debug, Deserialize, Clone, Serialize)]
#[serde(untagged)]
pub enum Content {
	Text(String),
	Blocks(Vec<ContentBlock>),
}

/// One content block, kept as a flat passthrough struct: Anthropic's block grammar is
/// wide (text, image, tool_use, tool_result, thinking, documents, …) and the gateway
/// only ever inspects or rewrites a handful of fields.
#[derive(Debug, Deserialize, Clone, Serialize)]
pub struct ContentBlock {
	pub r#type: String,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub text: Option<String>,
	/// tool_use: the invocation id; also the block id for server tool use.
	#[serde(skip_serializing_if = "Option::is_none")]
	pub id: Option<String>,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub name: Option<String>,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub input: Option<serde_json::Value>,
	/// tool_result: which tool_use this answers.
	#[serde(skip_serializing_if = "Option::is_none")]
	pub tool_use_id: Option<String>,
	/// tool_result: string or array-of-blocks payload.
	#[serde(skip_serializing_if = "Option::is_none")]
	pub content: Option<serde_json::Value>,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub is_error: Option<bool>,
	/// image: `{type: base64, media_type, data}`.
	#[serde(skip_serializing_if = "Option::is_none")]
	pub source: Option<serde_json::Value>,
	/// MCP-style inline image fields, rewritten to `source` on materialization.
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
			r#type: "text".to_string(),
			text: Some(text.into()),
			id: None,
			name: None,
			input: None,
			tool_use_id: None,
			content: None,
			is_error: None,
			source: None,
			data: None,
			mime_type: None,
			rest: crate::serdes::empty_rest(),
		}
	}
}

#[derive(Debug, Deserialize, Clone, Serialize)]
pub struct Tool {
	pub name: String,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub description: Option<String>,
	pub input_schema: serde_json::Value,
	#[serde(flatten, default)]
	pub rest: serde_json::Value,
}

#[derive(Debug, Deserialize, Clone, Serialize)]
pub struct Response {
	pub id: String,
	pub r#type: String,
	pub role: String,
	pub model: String,
	pub content: Vec<ContentBlock>,
	pub stop_reason: Option<String>,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub stop_sequence: Option<String>,
	pub usage: Usage,
	#[serde(flatten, default)]
	pub rest: serde_json::Value,
}

#[derive(Debug, Deserialize, Clone, Serialize)]
pub struct Usage {
	#[serde(default)]
	pub input_tokens: u64,
	#[serde(default)]
	pub output_tokens: u64,
	#[serde(flatten, default)]
	pub rest: serde_json::Value,
}

/// The Messages streaming event grammar.
#[derive(Debug, Deserialize, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StreamEvent {
	MessageStart {
		message: MessageStart,
	},
	ContentBlockStart {
		index: usize,
		content_block: ContentBlock,
	},
	ContentBlockDelta {
		index: usize,
		delta: Delta,
	},
	ContentBlockStop {
		index: usize,
	},
	MessageDelta {
		delta: MessageDelta,
		#[serde(skip_serializing_if = "Option::is_none")]
		usage: Option<DeltaUsage>,
	},
	MessageStop,
	Ping,
	Error {
		error: serde_json::Value,
	},
	#[serde(other)]
	Unknown,
}

impl StreamEvent {
	pub fn event_name(&self) -> &'static str {
		match self {
			Self::MessageStart { .. } => "message_start",
			Self::ContentBlockStart { .. } => "content_block_start",
			Self::ContentBlockDelta { .. } => "content_block_delta",
			Self::ContentBlockStop { .. } => "content_block_stop",
			Self::MessageDelta { .. } => "message_delta",
			Self::MessageStop => "message_stop",
			Self::Ping => "ping",
			Self::Error { .. } => "error",
			Self::Unknown => "unknown",
		}
	}
}

#[derive(Debug, Deserialize, Clone, Serialize)]
pub struct MessageStart {
	pub id: String,
	pub model: String,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub usage: Option<Usage>,
	#[serde(flatten, default)]
	pub rest: serde_json::Value,
}

#[derive(Debug, Deserialize, Clone, Serialize)]
pub struct Delta {
	pub r#type: String,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub text: Option<String>,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub partial_json: Option<String>,
	#[serde(flatten, default)]
	pub rest: serde_json::Value,
}

#[derive(Debug, Deserialize, Clone, Serialize)]
pub struct MessageDelta {
	pub stop_reason: Option<String>,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub stop_sequence: Option<String>,
	#[serde(flatten, default)]
	pub rest: serde_json::Value,
}

#[derive(Debug, Deserialize, Clone, Serialize)]
pub struct DeltaUsage {
	#[serde(default)]
	pub output_tokens: u64,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub input_tokens: Option<u64>,
	#[serde(flatten, default)]
	pub rest: serde_json::Value,
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn request_round_trips() {
		let raw = serde_json::json!({
			"model": "claude-sonnet-4-20250514",
			"max_tokens": 1024,
			"system": "be brief",
			"messages": [
				{"role": "user", "content": "hello"},
				{"role": "assistant", "content": [
					{"type": "tool_use", "id": "tu_1", "name": "list-files", "input": {}}
				]},
				{"role": "user", "content": [
					{"type": "tool_result", "tool_use_id": "tu_1", "content": "[]", "is_error": false}
				]}
			],
		});
		let req: Request = serde_json::from_value(raw.clone()).unwrap();
		assert_eq!(serde_json::to_value(&req).unwrap(), raw);
	}

	#[test]
	fn stream_events_tagged() {
		let ev: StreamEvent = serde_json::from_str(
			r#"{"type":"content_block_start","index":1,"content_block":{"type":"tool_use","id":"tu_1","name":"f","input":{}}}"#,
		)
		.unwrap();
		let StreamEvent::ContentBlockStart {
			index,
			content_block,
		} = &ev
		else {
			panic!("wrong variant");
		};
		assert_eq!(*index, 1);
		assert_eq!(content_block.r#type, "tool_use");
		assert_eq!(ev.event_name(), "content_block_start");
	}

	#[test]
	fn unknown_event_tolerated() {
		let ev: StreamEvent =
			serde_json::from_str(r#"{"type":"content_block_shrug","index":1}"#).unwrap();
		assert!(matches!(ev, StreamEvent::Unknown));
	}
}
