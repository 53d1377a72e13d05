//! Wire types for the OpenAI chat-completions format, shared by every
//! OpenAI-compatible provider (OpenAI, Cerebras, Mistral, Cohere, Ollama, VLLM,
//! Zhipuai).
//!
//! The outer structs parse only the fields the gateway reads or rewrites; everything
//! else rides along in `rest` so the materialized request stays byte-equivalent for
//! fields we do not touch.

use serde::{Deserialize, Serialize};

#[derive(Debug, Deserialize, Clone, Serialize)]
pub struct Request {
	#[serde(skip_serializing_if = "Option::is_none")]
	pub model: Option<String>,
	pub messages: Vec<RequestMessage>,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub stream: Option<bool>,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub stream_options: Option<StreamOptions>,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub tools: Option<Vec<Tool>>,
	#[serde(flatten, default)]
	pub rest: serde_json::Value,
}

#[derive(Debug, Deserialize, Clone, Serialize)]
pub struct RequestMessage {
	pub role: String,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub content: Option<MessageContent>,
	/// Present on role=tool messages: which call this result answers.
	#[serde(skip_serializing_if = "Option::is_none")]
	pub tool_call_id: Option<String>,
	/// Present on assistant messages that invoked tools.
	#[serde(skip_serializing_if = "Option::is_none")]
	pub tool_calls: Option<Vec<MessageToolCall>>,
	#[serde(flatten, default)]
	pub rest: serde_json::Value,
}

#[derive(Debug, Deserialize, Clone, Serialize)]
#[serde(untagged)]
pub enum MessageContent {
	Text(String),
	Array(Vec<ContentPart>),
}

impl MessageContent {
	pub fn as_text(&self) -> Option<String> {
		match self {
			MessageContent::Text(t) => Some(t.clone()),
			MessageContent::Array(parts) => {
				let texts: Vec<&str> = parts
					.iter()
					.filter(|p| p.r#type == "text")
					.filter_map(|p| p.text.as_deref())
					.collect();
				if texts.is_empty() {
					None
				} else {
					Some(texts.join("\n"))
				}
			},
		}
	}
}

#[derive(Debug, Deserialize, Clone, Serialize)]
pub struct ContentPart {
	pub r#type: String,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub text: Option<String>,
	/// MCP-style inline image payload (base64).
	#[serde(skip_serializing_if = "Option::is_none")]
	pub data: Option<String>,
	#[serde(rename = "mimeType", skip_serializing_if = "Option::is_none")]
	pub mime_type: Option<String>,
	/// Native OpenAI image reference.
	#[serde(skip_serializing_if = "Option::is_none")]
	pub image_url: Option<serde_json::Value>,
	#[serde(flatten, default)]
	pub rest: serde_json::Value,
}

#[derive(Debug, Deserialize, Clone, Serialize)]
pub struct MessageToolCall {
	pub id: String,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub r#type: Option<String>,
	pub function: FunctionCall,
	#[serde(flatten, default)]
	pub rest: serde_json::Value,
}

#[derive(Debug, Deserialize, Clone, Serialize)]
pub struct FunctionCall {
	pub name: String,
	pub arguments: String,
}

#[derive(Debug, Deserialize, Clone, Serialize)]
pub struct Tool {
	pub r#type: String,
	pub function: FunctionObject,
	#[serde(flatten, default)]
	pub rest: serde_json::Value,
}

#[derive(Debug, Deserialize, Clone, Serialize)]
pub struct FunctionObject {
	pub name: String,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub description: Option<String>,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub parameters: Option<serde_json::Value>,
	#[serde(flatten, default)]
	pub rest: serde_json::Value,
}

#[derive(Debug, Deserialize, Clone, Serialize)]
pub struct StreamOptions {
	pub include_usage: bool,
	#[serde(flatten, default)]
	pub rest: serde_json::Value,
}

#[derive(Debug, Deserialize, Clone, Serialize)]
pub struct Response {
	#[serde(skip_serializing_if = "Option::is_none")]
	pub id: Option<String>,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub model: Option<String>,
	#[serde(default)]
	pub choices: Vec<Choice>,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub usage: Option<Usage>,
	#[serde(flatten, default)]
	pub rest: serde_json::Value,
}

#[derive(Debug, Deserialize, Clone, Serialize)]
pub struct Choice {
	#[serde(default)]
	pub index: u32,
	pub message: ResponseMessage,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub finish_reason: Option<String>,
	#[serde(flatten, default)]
	pub rest: serde_json::Value,
}

#[derive(Debug, Deserialize, Clone, Serialize)]
pub struct ResponseMessage {
	#[serde(skip_serializing_if = "Option::is_none")]
	pub role: Option<String>,
	pub content: Option<String>,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub tool_calls: Option<Vec<MessageToolCall>>,
	#[serde(flatten, default)]
	pub rest: serde_json::Value,
}

#[derive(Debug, Deserialize, Clone, Serialize)]
pub struct Usage {
	#[serde(default)]
	pub prompt_tokens: u64,
	#[serde(default)]
	pub completion_tokens: u64,
	#[serde(default)]
	pub total_tokens: u64,
	#[serde(flatten, default)]
	pub rest: serde_json::Value,
}

/// One SSE chunk of a streamed completion.
#[derive(Debug, Deserialize, Clone, Serialize)]
pub struct StreamResponse {
	#[serde(skip_serializing_if = "Option::is_none")]
	pub id: Option<String>,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub model: Option<String>,
	#[serde(default)]
	pub choices: Vec<StreamChoice>,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub usage: Option<Usage>,
	#[serde(flatten, default)]
	pub rest: serde_json::Value,
}

#[derive(Debug, Deserialize, Clone, Serialize)]
pub struct StreamChoice {
	#[serde(default)]
	pub index: u32,
	pub delta: StreamDelta,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub finish_reason: Option<String>,
	#[serde(flatten, default)]
	pub rest: serde_json::Value,
}

#[derive(Debug, Deserialize, Clone, Serialize)]
pub struct StreamDelta {
	#[serde(skip_serializing_if = "Option::is_none")]
	pub role: Option<String>,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub content: Option<String>,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub tool_calls: Option<Vec<ToolCallChunk>>,
	#[serde(flatten, default)]
	pub rest: serde_json::Value,
}

#[derive(Debug, Deserialize, Clone, Serialize)]
pub struct ToolCallChunk {
	#[serde(default)]
	pub index: u32,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub id: Option<String>,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub r#type: Option<String>,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub function: Option<FunctionCallChunk>,
	#[serde(flatten, default)]
	pub rest: serde_json::Value,
}

#[derive(Debug, Deserialize, Clone, Serialize)]
pub struct FunctionCallChunk {
	#[serde(skip_serializing_if = "Option::is_none")]
	pub name: Option<String>,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub arguments: Option<String>,
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn request_round_trips_unknown_fields() {
		let raw = serde_json::json!({
			"model": "gpt-4o",
			"messages": [{"role": "user", "content": "hi", "name": "alice"}],
			"temperature": 0.3,
			"seed": 7,
		});
		let req: Request = serde_json::from_value(raw.clone()).unwrap();
		assert_eq!(req.model.as_deref(), Some("gpt-4o"));
		let back = serde_json::to_value(&req).unwrap();
		assert_eq!(back, raw);
	}

	#[test]
	fn tool_message_parses() {
		let raw = serde_json::json!({
			"model": "gpt-4o",
			"messages": [
				{"role": "assistant", "tool_calls": [
					{"id": "call_1", "type": "function", "function": {"name": "list-files", "arguments": "{}"}}
				]},
				{"role": "tool", "tool_call_id": "call_1", "content": "[]"}
			],
		});
		let req: Request = serde_json::from_value(raw).unwrap();
		assert_eq!(
			req.messages[0].tool_calls.as_ref().unwrap()[0].function.name,
			"list-files"
		);
		assert_eq!(req.messages[1].tool_call_id.as_deref(), Some("call_1"));
	}

	#[test]
	fn stream_chunk_with_tool_delta() {
		let raw = serde_json::json!({
			"id": "chatcmpl-1",
			"object": "chat.completion.chunk",
			"model": "gpt-4o",
			"choices": [{"index": 0, "delta": {"tool_calls": [
				{"index": 0, "id": "call_1", "function": {"name": "f", "arguments": "{\"a\""}}
			]}, "finish_reason": null}],
		});
		let chunk: StreamResponse = serde_json::from_value(raw).unwrap();
		let tc = chunk.choices[0].delta.tool_calls.as_ref().unwrap();
		assert_eq!(tc[0].id.as_deref(), Some("call_1"));
		assert_eq!(
			tc[0].function.as_ref().unwrap().arguments.as_deref(),
			Some("{\"a\"")
		);
	}
}
