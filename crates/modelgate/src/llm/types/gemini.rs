//! Wire types for the Gemini REST (generativelanguage) API.
//!
//! The model name travels in the URL path rather than the body, so these types carry no
//! model field; the adapter receives it from the route.

use serde::{Deserialize, Serialize};

#[derive(Debug, Deserialize, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Request {
	pub contents: Vec<ContentEntry>,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub system_instruction: Option<serde_json::Value>,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub tools: Option<Vec<ToolEntry>>,
	#[serde(flatten, default)]
	pub rest: serde_json::Value,
}

#[derive(Debug, Deserialize, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ContentEntry {
	#[serde(skip_serializing_if = "Option::is_none")]
	pub role: Option<String>,
	#[serde(default)]
	pub parts: Vec<Part>,
	#[serde(flatten, default)]
	pub rest: serde_json::Value,
}

#[derive(Debug, Deserialize, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Part {
	#[serde(skip_serializing_if = "Option::is_none")]
	pub text: Option<String>,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub function_call: Option<FunctionCall>,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub function_response: Option<FunctionResponse>,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub inline_data: Option<InlineData>,
	/// MCP-style inline image fields, rewritten to `inline_data` on materialization.
	#[serde(skip_serializing_if = "Option::is_none")]
	pub data: Option<String>,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub mime_type: Option<String>,
	#[serde(flatten, default)]
	pub rest: serde_json::Value,
}

impl Part {
	pub fn text(text: impl Into<String>) -> Self {
		Part {
			text: Some(text.into()),
			function_call: None,
			function_response: None,
			inline_data: None,
			data: None,
			mime_type: None,
			rest: crate::serdes::empty_rest(),
		}
	}
}

#[derive(Debug, Deserialize, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FunctionCall {
	pub name: String,
	#[serde(default)]
	pub args: serde_json::Value,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub id: Option<String>,
}

#[derive(Debug, Deserialize, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FunctionResponse {
	pub name: String,
	#[serde(default)]
	pub response: serde_json::Value,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub id: Option<String>,
}

#[derive(Debug, Deserialize, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InlineData {
	pub mime_type: String,
	pub data: String,
}

#[derive(Debug, Deserialize, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolEntry {
	#[serde(skip_serializing_if = "Option::is_none")]
	pub function_declarations: Option<Vec<FunctionDeclaration>>,
	#[serde(flatten, default)]
	pub rest: serde_json::Value,
}

#[derive(Debug, Deserialize, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FunctionDeclaration {
	pub name: String,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub description: Option<String>,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub parameters: Option<serde_json::Value>,
	#[serde(flatten, default)]
	pub rest: serde_json::Value,
}

#[derive(Debug, Deserialize, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Response {
	#[serde(default)]
	pub candidates: Vec<Candidate>,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub usage_metadata: Option<UsageMetadata>,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub model_version: Option<String>,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub response_id: Option<String>,
	#[serde(flatten, default)]
	pub rest: serde_json::Value,
}

#[derive(Debug, Deserialize, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Candidate {
	#[serde(skip_serializing_if = "Option::is_none")]
	pub content: Option<ContentEntry>,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub finish_reason: Option<String>,
	#[serde(flatten, default)]
	pub rest: serde_json::Value,
}

#[derive(Debug, Deserialize, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UsageMetadata {
	#[serde(default)]
	pub prompt_token_count: u64,
	#[serde(default)]
	pub candidates_token_count: u64,
	#[serde(default)]
	pub total_token_count: u64,
	#[serde(flatten, default)]
	pub rest: serde_json::Value,
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn request_round_trips() {
		let raw = serde_json::json!({
			"contents": [
				{"role": "user", "parts": [{"text": "hi"}]},
				{"role": "model", "parts": [{"functionCall": {"name": "list-files", "args": {}}}]},
				{"role": "user", "parts": [{"functionResponse": {"name": "list-files", "response": {"output": "[]"}}}]}
			],
			"generationConfig": {"temperature": 0.1},
		});
		let req: Request = serde_json::from_value(raw.clone()).unwrap();
		assert_eq!(serde_json::to_value(&req).unwrap(), raw);
	}

	#[test]
	fn response_parses_function_call() {
		let raw = serde_json::json!({
			"candidates": [{"content": {"role": "model", "parts": [
				{"functionCall": {"name": "f", "args": {"x": 1}}}
			]}, "finishReason": "STOP"}],
			"usageMetadata": {"promptTokenCount": 5, "candidatesTokenCount": 3, "totalTokenCount": 8},
		});
		let resp: Response = serde_json::from_value(raw).unwrap();
		let part = &resp.candidates[0].content.as_ref().unwrap().parts[0];
		assert_eq!(part.function_call.as_ref().unwrap().name, "f");
		assert_eq!(resp.usage_metadata.as_ref().unwrap().prompt_token_count, 5);
	}
}
