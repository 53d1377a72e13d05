use std::collections::BTreeMap;
use std::collections::HashMap;

use bytes::Bytes;
use gate_core::prelude::Strng;
use gate_core::strng;
use macro_rules_attribute::apply;

use crate::http::{HeaderMap, HeaderValue, header};
use crate::llm::adapter::{
	IMAGE_OMITTED_PLACEHOLDER, RequestAdapter, ResponseAdapter, StreamAccumulator, StreamAdapter,
	StreamChunkOutcome, image_too_large,
};
use crate::llm::types::completions::{
	ContentPart, MessageContent, Request, Response, StreamOptions, StreamResponse,
};
use crate::llm::types::{
	CommonMessage, CommonToolCall, CommonToolDefinition, TokenUsage, ToolResultView,
};
use crate::llm::AIError;
use crate::parse::sse::{SseParser, data_frame, done_frame};
use crate::serdes::{empty_rest, schema};

#[apply(schema!)]
#[derive(Default)]
pub struct Provider {
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub model: Option<Strng>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub host_override: Option<Strng>,
}

impl super::Provider for Provider {
	const NAME: Strng = strng::literal!("openai");
}

pub const DEFAULT_HOST: Strng = strng::literal!("api.openai.com");
pub const CHAT_PATH: &str = "/v1/chat/completions";

impl Provider {
	pub fn host(&self) -> Strng {
		self.host_override.clone().unwrap_or(DEFAULT_HOST)
	}
}

/// Request adapter for every provider speaking the chat-completions format.
pub struct CompletionsRequestAdapter {
	req: Request,
	pending_model: Option<String>,
	pending_tool_results: HashMap<String, String>,
}

impl CompletionsRequestAdapter {
	pub fn parse(body: &[u8]) -> Result<Self, AIError> {
		let req: Request = serde_json::from_slice(body).map_err(AIError::RequestParsing)?;
		Ok(CompletionsRequestAdapter {
			req,
			pending_model: None,
			pending_tool_results: HashMap::new(),
		})
	}

	/// Tool-call id to tool name, resolved from prior assistant turns.
	fn tool_names_by_id(&self) -> HashMap<&str, &str> {
		let mut names = HashMap::new();
		for msg in &self.req.messages {
			for tc in msg.tool_calls.iter().flatten() {
				names.insert(tc.id.as_str(), tc.function.name.as_str());
			}
		}
		names
	}
}

impl RequestAdapter for CompletionsRequestAdapter {
	fn model(&self) -> Option<Strng> {
		self
			.pending_model
			.as_deref()
			.or(self.req.model.as_deref())
			.map(strng::new)
	}

	fn set_model(&mut self, model: &str) {
		self.pending_model = Some(model.to_string());
	}

	fn streaming(&self) -> bool {
		self.req.stream.unwrap_or_default()
	}

	fn messages(&self) -> Vec<CommonMessage> {
		let names = self.tool_names_by_id();
		self
			.req
			.messages
			.iter()
			.map(|m| {
				let content = m
					.content
					.as_ref()
					.and_then(|c| c.as_text())
					.unwrap_or_default();
				let tool_results = if m.role == "tool" {
					let id = m.tool_call_id.clone().unwrap_or_default();
					vec![ToolResultView {
						name: names.get(id.as_str()).map(|n| n.to_string()),
						content: self
							.pending_tool_results
							.get(&id)
							.cloned()
							.unwrap_or_else(|| content.to_string()),
						id,
						is_error: false,
					}]
				} else {
					Vec::new()
				};
				CommonMessage {
					role: strng::new(&m.role),
					content: strng::new(&content),
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
			.filter(|t| t.r#type == "function")
			.map(|t| CommonToolDefinition {
				name: t.function.name.clone(),
				description: t.function.description.clone(),
				input_schema: t.function.parameters.clone().unwrap_or_default(),
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
		if let Some(model) = &self.pending_model {
			req.model = Some(model.clone());
		}
		// Token accounting needs usage on streams; providers only send it when asked.
		if req.stream.unwrap_or_default() && req.stream_options.is_none() {
			req.stream_options = Some(StreamOptions {
				include_usage: true,
				rest: empty_rest(),
			});
		}
		for msg in &mut req.messages {
			if msg.role == "tool"
				&& let Some(id) = &msg.tool_call_id
				&& let Some(updated) = self.pending_tool_results.get(id)
			{
				msg.content = Some(MessageContent::Text(updated.clone()));
			}
			if convert_images && let Some(MessageContent::Array(parts)) = &mut msg.content {
				for part in parts.iter_mut() {
					convert_image_part(part);
				}
			}
		}
		serde_json::to_vec(&req).map_err(AIError::RequestMarshal)
	}
}

/// Rewrite an MCP-style inline image part to OpenAI's `image_url` form, dropping
/// oversized payloads.
fn convert_image_part(part: &mut ContentPart) {
	if part.r#type != "image" {
		return;
	}
	let Some(data) = part.data.take() else {
		return;
	};
	if image_too_large(&data) {
		part.r#type = "text".to_string();
		part.text = Some(IMAGE_OMITTED_PLACEHOLDER.to_string());
		part.mime_type = None;
		return;
	}
	let mime = part
		.mime_type
		.take()
		.unwrap_or_else(|| "image/png".to_string());
	part.r#type = "image_url".to_string();
	part.image_url = Some(serde_json::json!({
		"url": format!("data:{mime};base64,{data}")
	}));
}

pub struct CompletionsResponseAdapter {
	resp: Response,
}

impl CompletionsResponseAdapter {
	pub fn parse(body: &[u8]) -> Result<Self, AIError> {
		let resp: Response = serde_json::from_slice(body).map_err(AIError::ResponseParsing)?;
		Ok(CompletionsResponseAdapter { resp })
	}
}

impl ResponseAdapter for CompletionsResponseAdapter {
	fn id(&self) -> Option<Strng> {
		self.resp.id.as_deref().map(strng::new)
	}

	fn model(&self) -> Option<Strng> {
		self.resp.model.as_deref().map(strng::new)
	}

	fn text(&self) -> String {
		self
			.resp
			.choices
			.first()
			.and_then(|c| c.message.content.clone())
			.unwrap_or_default()
	}

	fn tool_calls(&self) -> Vec<CommonToolCall> {
		self
			.resp
			.choices
			.first()
			.and_then(|c| c.message.tool_calls.as_ref())
			.into_iter()
			.flatten()
			.map(|tc| CommonToolCall {
				id: tc.id.clone(),
				name: tc.function.name.clone(),
				arguments: serde_json::from_str(&tc.function.arguments)
					.unwrap_or(serde_json::Value::String(tc.function.arguments.clone())),
			})
			.collect()
	}

	fn usage(&self) -> Option<TokenUsage> {
		self.resp.usage.as_ref().map(|u| TokenUsage {
			input_tokens: u.prompt_tokens,
			output_tokens: u.completion_tokens,
		})
	}

	fn to_refusal(&self, message: &str) -> Result<Vec<u8>, AIError> {
		let mut resp = self.resp.clone();
		for choice in resp.choices.iter_mut() {
			choice.message.content = Some(message.to_string());
			choice.message.tool_calls = None;
			choice.finish_reason = Some("stop".to_string());
		}
		serde_json::to_vec(&resp).map_err(AIError::ResponseMarshal)
	}

	fn serialize(&self) -> Result<Vec<u8>, AIError> {
		serde_json::to_vec(&self.resp).map_err(AIError::ResponseMarshal)
	}
}

#[derive(Default)]
struct PartialToolCall {
	id: Option<String>,
	name: Option<String>,
	arguments: String,
}

/// Streaming state machine for chat-completions SSE: `data: <json>` frames terminated by
/// `data: [DONE]`.
pub struct CompletionsStreamAdapter {
	parser: SseParser,
	acc: StreamAccumulator,
	partial_tools: BTreeMap<u32, PartialToolCall>,
	buffered_tool_frames: Vec<Bytes>,
	pending_final_frames: Vec<Bytes>,
	saw_tool_call: bool,
	dropped_role_chunk: bool,
	replaced: bool,
	model: String,
	created: i64,
}

impl CompletionsStreamAdapter {
	pub fn new(model: &str) -> Self {
		CompletionsStreamAdapter {
			parser: SseParser::new(),
			acc: StreamAccumulator::default(),
			partial_tools: BTreeMap::new(),
			buffered_tool_frames: Vec::new(),
			pending_final_frames: Vec::new(),
			saw_tool_call: false,
			dropped_role_chunk: false,
			replaced: false,
			model: model.to_string(),
			created: chrono::Utc::now().timestamp(),
		}
	}

	fn finish_tool_calls(&mut self) {
		for (_, partial) in std::mem::take(&mut self.partial_tools) {
			let arguments = serde_json::from_str(&partial.arguments)
				.unwrap_or(serde_json::Value::String(partial.arguments));
			self.acc.tool_calls.push(CommonToolCall {
				id: partial.id.unwrap_or_default(),
				name: partial.name.unwrap_or_default(),
				arguments,
			});
		}
	}

	fn synth_chunk(&self, delta: serde_json::Value, finish_reason: Option<&str>) -> Bytes {
		let chunk = serde_json::json!({
			"id": self.acc.response_id.clone().unwrap_or_else(|| format!("chatcmpl-{}", uuid::Uuid::new_v4().simple())),
			"object": "chat.completion.chunk",
			"created": self.created,
			"model": self.acc.model.clone().unwrap_or_else(|| self.model.clone()),
			"choices": [{
				"index": 0,
				"delta": delta,
				"finish_reason": finish_reason,
			}],
		});
		data_frame(&serde_json::to_vec(&chunk).unwrap_or_default())
	}
}

impl StreamAdapter for CompletionsStreamAdapter {
	fn process_chunk(&mut self, chunk: &[u8]) -> Result<Vec<StreamChunkOutcome>, AIError> {
		let mut out = Vec::new();
		for frame in self.parser.push(chunk) {
			if frame.data == "[DONE]" {
				self.finish_tool_calls();
				out.push(StreamChunkOutcome {
					sse_data: None,
					is_tool_call: false,
					is_final: true,
				});
				continue;
			}
			let parsed: StreamResponse = match serde_json::from_str(&frame.data) {
				Ok(p) => p,
				Err(e) => {
					tracing::debug!("failed to parse streaming chunk: {e}");
					out.push(StreamChunkOutcome::forward(frame.raw));
					continue;
				},
			};
			self.acc.saw_chunk();
			if let Some(id) = &parsed.id
				&& self.acc.response_id.is_none()
			{
				self.acc.response_id = Some(id.clone());
			}
			if let Some(model) = &parsed.model
				&& self.acc.model.is_none()
			{
				self.acc.model = Some(model.clone());
			}
			if let Some(usage) = &parsed.usage {
				self.acc.usage = Some(TokenUsage {
					input_tokens: usage.prompt_tokens,
					output_tokens: usage.completion_tokens,
				});
			}

			let mut is_tool_frame = false;
			let mut is_finish_frame = false;
			let mut role_only = false;
			for choice in &parsed.choices {
				if let Some(tcs) = &choice.delta.tool_calls {
					is_tool_frame = true;
					for tc in tcs {
						let partial = self.partial_tools.entry(tc.index).or_default();
						if let Some(id) = &tc.id {
							partial.id = Some(id.clone());
						}
						if let Some(f) = &tc.function {
							if let Some(name) = &f.name {
								partial.name = Some(name.clone());
							}
							if let Some(args) = &f.arguments {
								partial.arguments.push_str(args);
							}
						}
					}
				}
				if let Some(fr) = &choice.finish_reason {
					is_finish_frame = true;
					self.acc.stop_reason = Some(fr.clone());
				}
				if let Some(text) = &choice.delta.content {
					self.acc.text.push_str(text);
				}
				if choice.delta.role.is_some()
					&& choice.delta.content.is_none()
					&& choice.delta.tool_calls.is_none()
					&& choice.finish_reason.is_none()
				{
					role_only = true;
				}
			}

			if is_finish_frame {
				self.finish_tool_calls();
			}

			if is_tool_frame {
				self.saw_tool_call = true;
				self.buffered_tool_frames.push(frame.raw);
				out.push(StreamChunkOutcome::buffered_tool_call());
			} else if role_only && !self.dropped_role_chunk {
				// The leading role-only delta is absorbed; clients tolerate its absence.
				self.dropped_role_chunk = true;
				out.push(StreamChunkOutcome::swallowed());
			} else if self.saw_tool_call && (is_finish_frame || parsed.usage.is_some()) {
				// Post-content frames cannot precede the buffered tool events.
				self.pending_final_frames.push(frame.raw);
				out.push(StreamChunkOutcome::swallowed());
			} else {
				out.push(StreamChunkOutcome::forward(frame.raw));
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
		self.synth_chunk(serde_json::json!({"content": text}), None)
	}

	fn format_complete_text(&mut self, text: &str) -> Vec<Bytes> {
		self.replaced = true;
		vec![
			self.synth_chunk(
				serde_json::json!({"role": "assistant", "content": text}),
				None,
			),
			self.synth_chunk(serde_json::json!({}), Some("stop")),
		]
	}

	fn raw_tool_call_events(&mut self) -> Vec<Bytes> {
		std::mem::take(&mut self.buffered_tool_frames)
	}

	fn format_end(&mut self) -> Vec<Bytes> {
		let mut out = if self.replaced {
			Vec::new()
		} else {
			std::mem::take(&mut self.pending_final_frames)
		};
		out.push(done_frame());
		out
	}

	fn accumulator(&self) -> &StreamAccumulator {
		&self.acc
	}
}

#[cfg(test)]
#[path = "openai_tests.rs"]
mod tests;
