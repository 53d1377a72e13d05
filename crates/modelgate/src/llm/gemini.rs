use std::collections::HashMap;

use bytes::Bytes;
use gate_core::prelude::Strng;
use gate_core::strng;
use itertools::Itertools;
use macro_rules_attribute::apply;

use crate::http::{HeaderMap, HeaderValue, header};
use crate::llm::adapter::{
	IMAGE_OMITTED_PLACEHOLDER, RequestAdapter, ResponseAdapter, StreamAccumulator, StreamAdapter,
	StreamChunkOutcome, image_too_large,
};
use crate::llm::types::gemini::{InlineData, Part, Request, Response};
use crate::llm::types::{
	CommonMessage, CommonToolCall, CommonToolDefinition, TokenUsage, ToolResultView,
};
use crate::llm::AIError;
use crate::parse::sse::{SseParser, data_frame};
use crate::serdes::schema;

#[apply(schema!)]
#[derive(Default)]
pub struct Provider {
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub model: Option<Strng>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub host_override: Option<Strng>,
}

impl super::Provider for Provider {
	const NAME: Strng = strng::literal!("gemini");
}

pub const DEFAULT_HOST: Strng = strng::literal!("generativelanguage.googleapis.com");

impl Provider {
	pub fn host(&self) -> Strng {
		self.host_override.clone().unwrap_or(DEFAULT_HOST)
	}
}

/// Extract the model from a `…/models/{model}:generateContent` path.
pub fn model_from_path(path: &str) -> Option<&str> {
	let (_, tail) = path.rsplit_once("/models/")?;
	let (model, _) = tail.split_once(':')?;
	Some(model)
}

pub fn upstream_path(model: &str, streaming: bool) -> Strng {
	if streaming {
		strng::format!("/v1beta/models/{model}:streamGenerateContent?alt=sse")
	} else {
		strng::format!("/v1beta/models/{model}:generateContent")
	}
}

fn part_tool_result_id(fr: &crate::llm::types::gemini::FunctionResponse) -> String {
	fr.id.clone().unwrap_or_else(|| fr.name.clone())
}

pub struct GenerateRequestAdapter {
	req: Request,
	path_model: Option<String>,
	pending_model: Option<String>,
	pending_tool_results: HashMap<String, String>,
}

impl GenerateRequestAdapter {
	pub fn parse(body: &[u8], path_model: Option<&str>) -> Result<Self, AIError> {
		let req: Request = serde_json::from_slice(body).map_err(AIError::RequestParsing)?;
		Ok(GenerateRequestAdapter {
			req,
			path_model: path_model.map(|m| m.to_string()),
			pending_model: None,
			pending_tool_results: HashMap::new(),
		})
	}
}

impl RequestAdapter for GenerateRequestAdapter {
	fn model(&self) -> Option<Strng> {
		self
			.pending_model
			.as_deref()
			.or(self.path_model.as_deref())
			.map(strng::new)
	}

	fn set_model(&mut self, model: &str) {
		self.pending_model = Some(model.to_string());
	}

	fn streaming(&self) -> bool {
		// Streaming is a property of the route (:streamGenerateContent), not the body.
		false
	}

	fn messages(&self) -> Vec<CommonMessage> {
		self
			.req
			.contents
			.iter()
			.map(|entry| {
				let mut texts: Vec<&str> = Vec::new();
				let mut tool_results = Vec::new();
				for part in &entry.parts {
					if let Some(t) = &part.text {
						texts.push(t);
					}
					if let Some(fr) = &part.function_response {
						let id = part_tool_result_id(fr);
						let content = self
							.pending_tool_results
							.get(&id)
							.cloned()
							.unwrap_or_else(|| fr.response.to_string());
						tool_results.push(ToolResultView {
							id,
							name: Some(fr.name.clone()),
							content,
							is_error: false,
						});
					}
				}
				CommonMessage {
					role: strng::new(entry.role.as_deref().unwrap_or("user")),
					content: strng::new(texts.join("\n")),
					tool_results,
				}
			})
			.collect()
	}

	fn tool_definitions(&self) -> Vec<CommonToolDefinition> {
		self
			.req
			.tools
			.iter()
			.flatten()
			.flat_map(|t| t.function_declarations.iter().flatten())
			.map(|f| CommonToolDefinition {
				name: f.name.clone(),
				description: f.description.clone(),
				input_schema: f.parameters.clone().unwrap_or_default(),
			})
			.collect()
	}

	fn tool_results(&self) -> Vec<ToolResultView> {
		self
			.messages()
			.into_iter()
			.flat_map(|m| m.tool_results)
			.collect()
	}

	fn update_tool_result(&mut self, id: &str, text: &str) {
		self.pending_tool_results.insert(id.to_string(), text.to_string());
	}

	fn to_provider_request(&self, convert_images: bool) -> Result<Vec<u8>, AIError> {
		let mut req = self.req.clone();
		for entry in &mut req.contents {
			for part in entry.parts.iter_mut() {
				if let Some(fr) = &mut part.function_response {
					let id = part_tool_result_id(fr);
					if let Some(updated) = self.pending_tool_results.get(&id) {
						fr.response = serde_json::from_str(updated)
							.unwrap_or_else(|_| serde_json::json!({"output": updated}));
					}
				}
				if convert_images {
					convert_image_part(part);
				}
			}
		}
		serde_json::to_vec(&req).map_err(AIError::RequestMarshal)
	}
}

/// Rewrite an MCP-style image part (`data`/`mimeType`) into Gemini's `inlineData` form.
fn convert_image_part(part: &mut Part) {
	let Some(data) = part.data.take() else {
		return;
	};
	let Some(mime_type) = part.mime_type.take() else {
		part.data = Some(data);
		return;
	};
	if image_too_large(&data) {
		*part = Part::text(IMAGE_OMITTED_PLACEHOLDER);
		return;
	}
	part.inline_data = Some(InlineData { mime_type, data });
}

pub struct GenerateResponseAdapter {
	resp: Response,
}

impl GenerateResponseAdapter {
	pub fn parse(body: &[u8]) -> Result<Self, AIError> {
		let resp: Response = serde_json::from_slice(body).map_err(AIError::ResponseParsing)?;
		Ok(GenerateResponseAdapter { resp })
	}
}

fn response_tool_calls(resp: &Response) -> Vec<CommonToolCall> {
	resp
		.candidates
		.first()
		.and_then(|c| c.content.as_ref())
		.into_iter()
		.flat_map(|c| c.parts.iter())
		.filter_map(|p| p.function_call.as_ref())
		.map(|fc| CommonToolCall {
			id: fc.id.clone().unwrap_or_else(|| fc.name.clone()),
			name: fc.name.clone(),
			arguments: fc.args.clone(),
		})
		.collect()
}

impl ResponseAdapter for GenerateResponseAdapter {
	fn id(&self) -> Option<Strng> {
		self.resp.response_id.as_deref().map(strng::new)
	}

	fn model(&self) -> Option<Strng> {
		self.resp.model_version.as_deref().map(strng::new)
	}

	fn text(&self) -> String {
		self
			.resp
			.candidates
			.first()
			.and_then(|c| c.content.as_ref())
			.map(|c| {
				c.parts
					.iter()
					.filter_map(|p| p.text.as_deref())
					.join("\n")
			})
			.unwrap_or_default()
	}

	fn tool_calls(&self) -> Vec<CommonToolCall> {
		response_tool_calls(&self.resp)
	}

	fn usage(&self) -> Option<TokenUsage> {
		self.resp.usage_metadata.as_ref().map(|u| TokenUsage {
			input_tokens: u.prompt_token_count,
			output_tokens: u.candidates_token_count,
		})
	}

	fn to_refusal(&self, message: &str) -> Result<Vec<u8>, AIError> {
		let mut resp = self.resp.clone();
		for candidate in resp.candidates.iter_mut() {
			if let Some(content) = &mut candidate.content {
				content.parts = vec![Part::text(message)];
			}
			candidate.finish_reason = Some("STOP".to_string());
		}
		serde_json::to_vec(&resp).map_err(AIError::ResponseMarshal)
	}

	fn serialize(&self) -> Result<Vec<u8>, AIError> {
		serde_json::to_vec(&self.resp).map_err(AIError::ResponseMarshal)
	}
}

/// Streaming state machine for `:streamGenerateContent?alt=sse`: each SSE data frame is
/// a complete GenerateContentResponse chunk. Function calls arrive whole, never as
/// fragments, so a tool chunk buffers in one piece.
pub struct GenerateStreamAdapter {
	parser: SseParser,
	acc: StreamAccumulator,
	buffered_tool_frames: Vec<Bytes>,
	saw_tool_call: bool,
	replaced: bool,
	model: String,
}

impl GenerateStreamAdapter {
	pub fn new(model: &str) -> Self {
		GenerateStreamAdapter {
			parser: SseParser::new(),
			acc: StreamAccumulator::default(),
			buffered_tool_frames: Vec::new(),
			saw_tool_call: false,
			replaced: false,
			model: model.to_string(),
		}
	}

	fn synth_chunk(&self, parts: serde_json::Value, finish_reason: Option<&str>) -> Bytes {
		let mut candidate = serde_json::json!({
			"content": {"role": "model", "parts": parts},
		});
		if let Some(fr) = finish_reason {
			candidate["finishReason"] = serde_json::Value::String(fr.to_string());
		}
		let chunk = serde_json::json!({
			"candidates": [candidate],
			"modelVersion": self.acc.model.clone().unwrap_or_else(|| self.model.clone()),
		});
		data_frame(&serde_json::to_vec(&chunk).unwrap_or_default())
	}
}

impl StreamAdapter for GenerateStreamAdapter {
	fn process_chunk(&mut self, chunk: &[u8]) -> Result<Vec<StreamChunkOutcome>, AIError> {
		let mut out = Vec::new();
		for frame in self.parser.push(chunk) {
			let parsed: Response = match serde_json::from_str(&frame.data) {
				Ok(p) => p,
				Err(e) => {
					tracing::debug!("failed to parse gemini stream chunk: {e}");
					out.push(StreamChunkOutcome::forward(frame.raw));
					continue;
				},
			};
			self.acc.saw_chunk();
			if let Some(id) = &parsed.response_id
				&& self.acc.response_id.is_none()
			{
				self.acc.response_id = Some(id.clone());
			}
			if let Some(model) = &parsed.model_version
				&& self.acc.model.is_none()
			{
				self.acc.model = Some(model.clone());
			}
			if let Some(u) = &parsed.usage_metadata {
				self.acc.usage = Some(TokenUsage {
					input_tokens: u.prompt_token_count,
					output_tokens: u.candidates_token_count,
				});
			}
			let mut is_final = false;
			if let Some(c) = parsed.candidates.first() {
				if let Some(fr) = &c.finish_reason {
					self.acc.stop_reason = Some(fr.clone());
					is_final = true;
				}
				if let Some(content) = &c.content {
					for p in &content.parts {
						if let Some(t) = &p.text {
							self.acc.text.push_str(t);
						}
					}
				}
			}
			let tool_calls = response_tool_calls(&parsed);
			if !tool_calls.is_empty() {
				self.saw_tool_call = true;
				self.acc.tool_calls.extend(tool_calls);
				self.buffered_tool_frames.push(frame.raw);
				out.push(StreamChunkOutcome {
					sse_data: None,
					is_tool_call: true,
					is_final,
				});
			} else {
				out.push(StreamChunkOutcome {
					sse_data: Some(frame.raw),
					is_tool_call: false,
					is_final,
				});
			}
		}
		Ok(out)
	}

	fn sse_headers(&self) -> HeaderMap {
		let mut headers = HeaderMap::new();
		headers.insert(header::CONTENT_TYPE, HeaderValue::from_static("text/event-stream"));
		headers.insert(header::CACHE_CONTROL, HeaderValue::from_static("no-cache"));
		headers.insert(header::CONNECTION, HeaderValue::from_static("keep-alive"));
		headers
	}

	fn format_text_delta(&mut self, text: &str) -> Bytes {
		self.synth_chunk(serde_json::json!([{"text": text}]), None)
	}

	fn format_complete_text(&mut self, text: &str) -> Vec<Bytes> {
		self.replaced = true;
		vec![self.synth_chunk(serde_json::json!([{"text": text}]), Some("STOP"))]
	}

	fn raw_tool_call_events(&mut self) -> Vec<Bytes> {
		std::mem::take(&mut self.buffered_tool_frames)
	}

	fn format_end(&mut self) -> Vec<Bytes> {
		// The alt=sse stream has no terminator frame; it simply ends.
		Vec::new()
	}

	fn accumulator(&self) -> &StreamAccumulator {
		&self.acc
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn model_extraction() {
		assert_eq!(
			model_from_path("/v1beta/models/gemini-2.0-flash:generateContent"),
			Some("gemini-2.0-flash")
		);
		assert_eq!(
			model_from_path("/v1beta/models/gemini-2.0-flash:streamGenerateContent"),
			Some("gemini-2.0-flash")
		);
		assert_eq!(model_from_path("/v1beta/models"), None);
	}

	#[test]
	fn stream_buffers_function_calls() {
		let mut adapter = GenerateStreamAdapter::new("gemini-2.0-flash");
		let chunk = serde_json::json!({
			"candidates": [{"content": {"role": "model", "parts": [
				{"functionCall": {"name": "list-files", "args": {"dir": "."}}}
			]}, "finishReason": "STOP"}],
			"usageMetadata": {"promptTokenCount": 10, "candidatesTokenCount": 4, "totalTokenCount": 14},
		});
		let frame = format!("data: {chunk}\n\n");
		let outcomes = adapter.process_chunk(frame.as_bytes()).unwrap();
		assert_eq!(outcomes.len(), 1);
		assert!(outcomes[0].is_tool_call);
		assert!(outcomes[0].is_final);
		assert!(outcomes[0].sse_data.is_none());
		assert_eq!(adapter.accumulator().tool_calls.len(), 1);
		assert_eq!(adapter.accumulator().tool_calls[0].name, "list-files");
		assert_eq!(
			adapter.accumulator().usage.unwrap().input_tokens,
			10
		);
		// The buffered frame replays byte-identical after approval
		let replay = adapter.raw_tool_call_events();
		assert_eq!(replay.len(), 1);
		assert_eq!(replay[0].as_ref(), frame.as_bytes());
	}
}
