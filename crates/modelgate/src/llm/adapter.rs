//! Provider adapter contracts.
//!
//! Every provider supplies three cooperating pieces behind the same interfaces: a
//! [`RequestAdapter`] that wraps the raw provider request and materializes policy edits,
//! a [`ResponseAdapter`] over buffered responses, and a [`StreamAdapter`] that drives the
//! provider's streaming state machine while the orchestrator stays format-agnostic.
//! Concrete implementations live in the provider modules; [`AIProvider`] is the factory.

use std::collections::HashMap;
use std::time::Instant;

use bytes::Bytes;
use gate_core::prelude::Strng;

use crate::http::HeaderMap;
use crate::llm::types::{
	CommonMessage, CommonToolCall, CommonToolDefinition, TokenUsage, ToolResultView,
};
use crate::llm::{AIError, AIProvider, anthropic, bedrock, gemini, openai};

/// Mutable state accumulated over one upstream stream.
#[derive(Debug)]
pub struct StreamAccumulator {
	pub response_id: Option<String>,
	pub model: Option<String>,
	pub text: String,
	pub tool_calls: Vec<CommonToolCall>,
	pub usage: Option<TokenUsage>,
	pub stop_reason: Option<String>,
	pub started: Instant,
	pub first_chunk: Option<Instant>,
}

impl Default for StreamAccumulator {
	fn default() -> Self {
		StreamAccumulator {
			response_id: None,
			model: None,
			text: String::new(),
			tool_calls: Vec::new(),
			usage: None,
			stop_reason: None,
			started: Instant::now(),
			first_chunk: None,
		}
	}
}

impl StreamAccumulator {
	pub fn saw_chunk(&mut self) {
		if self.first_chunk.is_none() {
			self.first_chunk = Some(Instant::now());
		}
	}
}

/// Result of processing one decoded upstream event.
#[derive(Debug)]
pub struct StreamChunkOutcome {
	/// Bytes to forward to the client now. Tool-call events are held back instead and
	/// replayed through `raw_tool_call_events` after policy approval.
	pub sse_data: Option<Bytes>,
	pub is_tool_call: bool,
	pub is_final: bool,
}

impl StreamChunkOutcome {
	pub fn forward(data: Bytes) -> Self {
		StreamChunkOutcome {
			sse_data: Some(data),
			is_tool_call: false,
			is_final: false,
		}
	}

	pub fn buffered_tool_call() -> Self {
		StreamChunkOutcome {
			sse_data: None,
			is_tool_call: true,
			is_final: false,
		}
	}

	pub fn swallowed() -> Self {
		StreamChunkOutcome {
			sse_data: None,
			is_tool_call: false,
			is_final: false,
		}
	}
}

/// Wraps a provider-specific request body. Stages record desired changes through this
/// interface; nothing mutates the raw body until `to_provider_request` materializes it.
pub trait RequestAdapter: Send + Sync {
	fn model(&self) -> Option<Strng>;
	fn set_model(&mut self, model: &str);
	fn streaming(&self) -> bool;
	/// Provider-neutral view of the conversation. Derived on demand; edits do not flow
	/// back through it.
	fn messages(&self) -> Vec<CommonMessage>;
	fn tool_definitions(&self) -> Vec<CommonToolDefinition>;
	fn tool_results(&self) -> Vec<ToolResultView>;
	fn update_tool_result(&mut self, id: &str, text: &str);
	/// Applying the same override map twice yields the same provider request.
	fn apply_tool_result_updates(&mut self, overrides: &HashMap<String, String>) {
		let mut ordered: Vec<(&String, &String)> = overrides.iter().collect();
		ordered.sort_by_key(|(id, _)| id.as_str());
		for (id, text) in ordered {
			self.update_tool_result(id, text);
		}
	}
	/// Materialize the request with all recorded edits applied. When `convert_images` is
	/// set, MCP-style inline image blocks are rewritten to the provider's native image
	/// representation, and oversized images are replaced with a text placeholder.
	fn to_provider_request(&self, convert_images: bool) -> Result<Vec<u8>, AIError>;
}

/// Read-only view over a buffered (non-streamed) provider response, plus refusal
/// synthesis in the provider's own response shape.
pub trait ResponseAdapter: Send + Sync {
	fn id(&self) -> Option<Strng>;
	fn model(&self) -> Option<Strng>;
	fn text(&self) -> String;
	fn tool_calls(&self) -> Vec<CommonToolCall>;
	fn usage(&self) -> Option<TokenUsage>;
	/// The same response with content replaced by `message`, tool blocks dropped, and an
	/// end-of-turn stop reason, so refused responses parse like any other.
	fn to_refusal(&self, message: &str) -> Result<Vec<u8>, AIError>;
	fn serialize(&self) -> Result<Vec<u8>, AIError>;
}

/// Drives one provider stream. Text passes through immediately; tool-call events are
/// buffered in the accumulator until the invocation policy has run.
pub trait StreamAdapter: Send {
	fn process_chunk(&mut self, chunk: &[u8]) -> Result<Vec<StreamChunkOutcome>, AIError>;
	fn sse_headers(&self) -> HeaderMap;
	/// Frame a text fragment the way this provider streams text (used for dual-LLM
	/// progress and refusal text).
	fn format_text_delta(&mut self, text: &str) -> Bytes;
	/// Frame a complete text block, replacing whatever the upstream produced.
	fn format_complete_text(&mut self, text: &str) -> Vec<Bytes>;
	/// The buffered tool-call events, exactly as the provider framed them (Bedrock
	/// re-frames when tool names were encoded on the wire).
	fn raw_tool_call_events(&mut self) -> Vec<Bytes>;
	/// Final framing: buffered post-content events or the provider's terminator.
	fn format_end(&mut self) -> Vec<Bytes>;
	fn accumulator(&self) -> &StreamAccumulator;
}

impl AIProvider {
	/// `path_model` carries the model parsed from the URL for providers that do not put
	/// it in the body (Gemini).
	pub fn request_adapter(
		&self,
		body: &[u8],
		path_model: Option<&str>,
	) -> Result<Box<dyn RequestAdapter>, AIError> {
		Ok(match self.family() {
			crate::llm::WireFamily::OpenAI => Box::new(openai::CompletionsRequestAdapter::parse(body)?),
			crate::llm::WireFamily::Anthropic => {
				Box::new(anthropic::MessagesRequestAdapter::parse(body)?)
			},
			crate::llm::WireFamily::Gemini => Box::new(gemini::GenerateRequestAdapter::parse(
				body, path_model,
			)?),
			crate::llm::WireFamily::Bedrock => Box::new(bedrock::ConverseRequestAdapter::parse(
				body, path_model,
			)?),
		})
	}

	pub fn response_adapter(&self, body: &[u8]) -> Result<Box<dyn ResponseAdapter>, AIError> {
		Ok(match self.family() {
			crate::llm::WireFamily::OpenAI => {
				Box::new(openai::CompletionsResponseAdapter::parse(body)?)
			},
			crate::llm::WireFamily::Anthropic => {
				Box::new(anthropic::MessagesResponseAdapter::parse(body)?)
			},
			crate::llm::WireFamily::Gemini => Box::new(gemini::GenerateResponseAdapter::parse(body)?),
			crate::llm::WireFamily::Bedrock => Box::new(bedrock::ConverseResponseAdapter::parse(body)?),
		})
	}

	/// `tools` feeds the Bedrock tool-name decode map; other providers ignore it.
	pub fn stream_adapter(
		&self,
		model: &str,
		tools: &[CommonToolDefinition],
	) -> Box<dyn StreamAdapter> {
		match self.family() {
			crate::llm::WireFamily::OpenAI => Box::new(openai::CompletionsStreamAdapter::new(model)),
			crate::llm::WireFamily::Anthropic => Box::new(anthropic::MessagesStreamAdapter::new(model)),
			crate::llm::WireFamily::Gemini => Box::new(gemini::GenerateStreamAdapter::new(model)),
			crate::llm::WireFamily::Bedrock => Box::new(bedrock::ConverseStreamAdapter::new(
				model,
				bedrock::tool_name_decode_map(model, tools),
			)),
		}
	}
}

pub(crate) const IMAGE_OMITTED_PLACEHOLDER: &str = "[Image omitted due to size]";
/// Images whose decoded size exceeds this are stripped rather than forwarded.
pub(crate) const MAX_IMAGE_BYTES: usize = 102_400;

/// Estimate decoded size from base64 length without decoding.
pub(crate) fn image_too_large(b64: &str) -> bool {
	b64.len() * 3 / 4 > MAX_IMAGE_BYTES
}
