use std::collections::{BTreeMap, HashMap, HashSet};

use bytes::{Bytes, BytesMut};
use gate_core::prelude::Strng;
use gate_core::strng;
use itertools::Itertools;
use macro_rules_attribute::apply;

use crate::http::{HeaderMap, HeaderValue, header};
use crate::llm::adapter::{
	IMAGE_OMITTED_PLACEHOLDER, RequestAdapter, ResponseAdapter, StreamAccumulator, StreamAdapter,
	StreamChunkOutcome, image_too_large,
};
use crate::llm::types::messages::{
	Content, ContentBlock, Delta, MessageDelta, MessageStart, Request, Response, StreamEvent, Usage,
};
use crate::llm::types::{
	CommonMessage, CommonToolCall, CommonToolDefinition, TokenUsage, ToolResultView,
};
use crate::llm::AIError;
use crate::parse::sse::{SseFrame, SseParser, event_frame};
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
	const NAME: Strng = strng::literal!("anthropic");
}

pub const DEFAULT_HOST: Strng = strng::literal!("api.anthropic.com");
pub const CHAT_PATH: &str = "/v1/messages";
pub const VERSION_HEADER: &str = "2023-06-01";

impl Provider {
	pub fn host(&self) -> Strng {
		self.host_override.clone().unwrap_or(DEFAULT_HOST)
	}
}

fn block_text(content: &serde_json::Value) -> String {
	match content {
		serde_json::Value::String(s) => s.clone(),
		serde_json::Value::Array(items) => items
			.iter()
			.filter_map(|i| {
				(i.get("type").and_then(|t| t.as_str()) == Some("text"))
					.then(|| i.get("text").and_then(|t| t.as_str()))
					.flatten()
			})
			.collect::<Vec<_>>()
			.join("\n"),
		_ => String::new(),
	}
}

pub struct MessagesRequestAdapter {
	req: Request,
	pending_model: Option<String>,
	pending_tool_results: HashMap<String, String>,
}

impl MessagesRequestAdapter {
	pub fn parse(body: &[u8]) -> Result<Self, AIError> {
		let req: Request = serde_json::from_slice(body).map_err(AIError::RequestParsing)?;
		Ok(MessagesRequestAdapter {
			req,
			pending_model: None,
			pending_tool_results: HashMap::new(),
		})
	}

	fn tool_names_by_id(&self) -> HashMap<&str, &str> {
		let mut names = HashMap::new();
		for msg in &self.req.messages {
			if let Content::Blocks(blocks) = &msg.content {
				for b in blocks {
					if b.r#type == "tool_use"
						&& let (Some(id), Some(name)) = (&b.id, &b.name)
					{
						names.insert(id.as_str(), name.as_str());
					}
				}
			}
		}
		names
	}
}

impl RequestAdapter for MessagesRequestAdapter {
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
				let mut text_parts: Vec<&str> = Vec::new();
				let mut tool_results = Vec::new();
				match &m.content {
					Content::Text(t) => text_parts.push(t),
					Content::Blocks(blocks) => {
						for b in blocks {
							match b.r#type.as_str() {
								"text" => {
									if let Some(t) = &b.text {
										text_parts.push(t);
									}
								},
								"tool_result" => {
									let id = b.tool_use_id.clone().unwrap_or_default();
									let content = self
										.pending_tool_results
										.get(&id)
										.cloned()
										.unwrap_or_else(|| {
											b.content.as_ref().map(block_text).unwrap_or_default()
										});
									tool_results.push(ToolResultView {
										name: names.get(id.as_str()).map(|n| n.to_string()),
										id,
										content,
										is_error: b.is_error.unwrap_or_default(),
									});
								},
								_ => {},
							}
						}
					},
				}
				CommonMessage {
					role: strng::new(&m.role),
					content: strng::new(text_parts.join("\n")),
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
			.map(|t| CommonToolDefinition {
				name: t.name.clone(),
				description: t.description.clone(),
				input_schema: t.input_schema.clone(),
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
		for msg in &mut req.messages {
			let Content::Blocks(blocks) = &mut msg.content else {
				continue;
			};
			for b in blocks.iter_mut() {
				if b.r#type == "tool_result"
					&& let Some(id) = &b.tool_use_id
					&& let Some(updated) = self.pending_tool_results.get(id)
				{
					b.content = Some(serde_json::Value::String(updated.clone()));
				}
				if convert_images && b.r#type == "image" && b.source.is_none() {
					convert_image_block(b);
				}
			}
		}
		serde_json::to_vec(&req).map_err(AIError::RequestMarshal)
	}
}

/// Rewrite an MCP-style image block (`data`/`mimeType`) into Anthropic's `source` form.
fn convert_image_block(b: &mut ContentBlock) {
	let Some(data) = b.data.take() else {
		return;
	};
	if image_too_large(&data) {
		*b = ContentBlock::text(IMAGE_OMITTED_PLACEHOLDER);
		return;
	}
	let media_type = b.mime_type.take().unwrap_or_else(|| "image/png".to_string());
	b.source = Some(serde_json::json!({
		"type": "base64",
		"media_type": media_type,
		"data": data,
	}));
}

pub struct MessagesResponseAdapter {
	resp: Response,
}

impl MessagesResponseAdapter {
	pub fn parse(body: &[u8]) -> Result<Self, AIError> {
		let resp: Response = serde_json::from_slice(body).map_err(AIError::ResponseParsing)?;
		Ok(MessagesResponseAdapter { resp })
	}
}

impl ResponseAdapter for MessagesResponseAdapter {
	fn id(&self) -> Option<Strng> {
		Some(strng::new(&self.resp.id))
	}

	fn model(&self) -> Option<Strng> {
		Some(strng::new(&self.resp.model))
	}

	fn text(&self) -> String {
		self
			.resp
			.content
			.iter()
			.filter(|b| b.r#type == "text")
			.filter_map(|b| b.text.as_deref())
			.join("\n")
	}

	fn tool_calls(&self) -> Vec<CommonToolCall> {
		self
			.resp
			.content
			.iter()
			.filter(|b| b.r#type == "tool_use")
			.map(|b| CommonToolCall {
				id: b.id.clone().unwrap_or_default(),
				name: b.name.clone().unwrap_or_default(),
				arguments: b.input.clone().unwrap_or_default(),
			})
			.collect()
	}

	fn usage(&self) -> Option<TokenUsage> {
		Some(TokenUsage {
			input_tokens: self.resp.usage.input_tokens,
			output_tokens: self.resp.usage.output_tokens,
		})
	}

	fn to_refusal(&self, message: &str) -> Result<Vec<u8>, AIError> {
		let mut resp = self.resp.clone();
		resp.content = vec![ContentBlock::text(message)];
		resp.stop_reason = Some("end_turn".to_string());
		serde_json::to_vec(&resp).map_err(AIError::ResponseMarshal)
	}

	fn serialize(&self) -> Result<Vec<u8>, AIError> {
		serde_json::to_vec(&self.resp).map_err(AIError::ResponseMarshal)
	}
}

#[derive(Default)]
struct PartialToolUse {
	id: String,
	name: String,
	input_json: String,
}

/// Streaming state machine for the Messages SSE grammar (named events).
///
/// Text blocks stream through verbatim. Tool-use blocks are detected by index at
/// `content_block_start` and buffered, frames included, until the invocation policy has
/// run; `message_delta`/`message_stop` are held back so the stream can still end in a
/// refusal.
pub struct MessagesStreamAdapter {
	parser: SseParser,
	acc: StreamAccumulator,
	tool_indexes: HashSet<usize>,
	partial_tools: BTreeMap<usize, PartialToolUse>,
	buffered_tool_frames: Vec<Bytes>,
	pending_final_frames: Vec<Bytes>,
	max_index: usize,
	message_started: bool,
	replaced: bool,
	/// Set when a synthetic text block was opened before upstream bytes (dual-LLM
	/// progress); upstream block indexes are shifted by this amount.
	index_offset: usize,
	synth_block_open: bool,
	model: String,
}

impl MessagesStreamAdapter {
	pub fn new(model: &str) -> Self {
		MessagesStreamAdapter {
			parser: SseParser::new(),
			acc: StreamAccumulator::default(),
			tool_indexes: HashSet::new(),
			partial_tools: BTreeMap::new(),
			buffered_tool_frames: Vec::new(),
			pending_final_frames: Vec::new(),
			max_index: 0,
			message_started: false,
			replaced: false,
			index_offset: 0,
			synth_block_open: false,
			model: model.to_string(),
		}
	}

	fn synth_message_start(&mut self) -> Bytes {
		self.message_started = true;
		let ev = StreamEvent::MessageStart {
			message: MessageStart {
				id: generate_message_id(),
				model: self.model.clone(),
				usage: Some(Usage {
					input_tokens: 0,
					output_tokens: 0,
					rest: empty_rest(),
				}),
				rest: serde_json::json!({
					"type": "message",
					"role": "assistant",
					"content": [],
					"stop_reason": null,
					"stop_sequence": null,
				}),
			},
		};
		encode_event(&ev)
	}

	/// Re-emit a frame with its block index shifted; used only after a synthetic block
	/// was opened, where upstream indexes would otherwise collide.
	fn reframe(&self, frame: &SseFrame, ev: &StreamEvent) -> Bytes {
		if self.index_offset == 0 {
			return frame.raw.clone();
		}
		let shifted = match ev.clone() {
			StreamEvent::ContentBlockStart {
				index,
				content_block,
			} => StreamEvent::ContentBlockStart {
				index: index + self.index_offset,
				content_block,
			},
			StreamEvent::ContentBlockDelta { index, delta } => StreamEvent::ContentBlockDelta {
				index: index + self.index_offset,
				delta,
			},
			StreamEvent::ContentBlockStop { index } => StreamEvent::ContentBlockStop {
				index: index + self.index_offset,
			},
			other => other,
		};
		encode_event(&shifted)
	}

	fn close_synth_block(&mut self, out: &mut BytesMut) {
		if self.synth_block_open {
			self.synth_block_open = false;
			out.extend_from_slice(&encode_event(&StreamEvent::ContentBlockStop { index: 0 }));
		}
	}

	fn finish_tool(&mut self, index: usize) {
		if let Some(partial) = self.partial_tools.remove(&index) {
			let arguments = if partial.input_json.is_empty() {
				serde_json::json!({})
			} else {
				serde_json::from_str(&partial.input_json)
					.unwrap_or(serde_json::Value::String(partial.input_json))
			};
			self.acc.tool_calls.push(CommonToolCall {
				id: partial.id,
				name: partial.name,
				arguments,
			});
		}
	}
}

fn encode_event(ev: &StreamEvent) -> Bytes {
	event_frame(
		ev.event_name(),
		&serde_json::to_vec(ev).unwrap_or_default(),
	)
}

fn generate_message_id() -> String {
	let timestamp = chrono::Utc::now().timestamp_millis();
	let random: u32 = rand::random();
	format!("msg_{timestamp:x}{random:08x}")
}

impl StreamAdapter for MessagesStreamAdapter {
	fn process_chunk(&mut self, chunk: &[u8]) -> Result<Vec<StreamChunkOutcome>, AIError> {
		let mut out = Vec::new();
		for frame in self.parser.push(chunk) {
			let ev: StreamEvent = match serde_json::from_str(&frame.data) {
				Ok(ev) => ev,
				Err(e) => {
					tracing::debug!("failed to parse messages stream event: {e}");
					out.push(StreamChunkOutcome::forward(frame.raw));
					continue;
				},
			};
			self.acc.saw_chunk();
			match &ev {
				StreamEvent::MessageStart { message } => {
					self.acc.response_id = Some(message.id.clone());
					self.acc.model = Some(message.model.clone());
					if let Some(u) = &message.usage {
						self.acc.usage = Some(TokenUsage {
							input_tokens: u.input_tokens,
							output_tokens: u.output_tokens,
						});
					}
					if self.message_started {
						// A synthetic message_start already went out; the upstream one
						// must not produce a second message on the client.
						out.push(StreamChunkOutcome::swallowed());
					} else {
						self.message_started = true;
						out.push(StreamChunkOutcome::forward(frame.raw));
					}
				},
				StreamEvent::ContentBlockStart {
					index,
					content_block,
				} => {
					self.max_index = self.max_index.max(index + self.index_offset);
					if content_block.r#type == "tool_use" || content_block.r#type == "server_tool_use" {
						self.tool_indexes.insert(*index);
						self.partial_tools.insert(
							*index,
							PartialToolUse {
								id: content_block.id.clone().unwrap_or_default(),
								name: content_block.name.clone().unwrap_or_default(),
								input_json: String::new(),
							},
						);
						self.buffered_tool_frames.push(self.reframe(&frame, &ev));
						out.push(StreamChunkOutcome::buffered_tool_call());
					} else {
						let mut data = BytesMut::new();
						self.close_synth_block(&mut data);
						data.extend_from_slice(&self.reframe(&frame, &ev));
						out.push(StreamChunkOutcome::forward(data.freeze()));
					}
				},
				StreamEvent::ContentBlockDelta { index, delta } => {
					if self.tool_indexes.contains(index) {
						if let Some(pj) = &delta.partial_json {
							if let Some(partial) = self.partial_tools.get_mut(index) {
								partial.input_json.push_str(pj);
							}
						}
						self.buffered_tool_frames.push(self.reframe(&frame, &ev));
						out.push(StreamChunkOutcome::buffered_tool_call());
					} else {
						if delta.r#type == "text_delta"
							&& let Some(t) = &delta.text
						{
							self.acc.text.push_str(t);
						}
						out.push(StreamChunkOutcome::forward(self.reframe(&frame, &ev)));
					}
				},
				StreamEvent::ContentBlockStop { index } => {
					if self.tool_indexes.contains(index) {
						self.finish_tool(*index);
						self.buffered_tool_frames.push(self.reframe(&frame, &ev));
						out.push(StreamChunkOutcome::buffered_tool_call());
					} else {
						out.push(StreamChunkOutcome::forward(self.reframe(&frame, &ev)));
					}
				},
				StreamEvent::MessageDelta { delta, usage } => {
					if let Some(sr) = &delta.stop_reason {
						self.acc.stop_reason = Some(sr.clone());
					}
					if let Some(u) = usage {
						let input = u
							.input_tokens
							.or(self.acc.usage.map(|c| c.input_tokens))
							.unwrap_or_default();
						self.acc.usage = Some(TokenUsage {
							input_tokens: input,
							output_tokens: u.output_tokens,
						});
					}
					// Held back until tool blocks are either replayed or replaced.
					self.pending_final_frames.push(frame.raw);
					out.push(StreamChunkOutcome::swallowed());
				},
				StreamEvent::MessageStop => {
					self.pending_final_frames.push(frame.raw);
					out.push(StreamChunkOutcome {
						sse_data: None,
						is_tool_call: false,
						is_final: true,
					});
				},
				StreamEvent::Ping | StreamEvent::Error { .. } | StreamEvent::Unknown => {
					out.push(StreamChunkOutcome::forward(frame.raw));
				},
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
		let mut data = BytesMut::new();
		if !self.message_started {
			let start = self.synth_message_start();
			data.extend_from_slice(&start);
		}
		if !self.synth_block_open && self.index_offset == 0 {
			self.synth_block_open = true;
			self.index_offset = 1;
			data.extend_from_slice(&encode_event(&StreamEvent::ContentBlockStart {
				index: 0,
				content_block: ContentBlock::text(""),
			}));
		}
		data.extend_from_slice(&encode_event(&StreamEvent::ContentBlockDelta {
			index: 0,
			delta: Delta {
				r#type: "text_delta".to_string(),
				text: Some(text.to_string()),
				partial_json: None,
				rest: empty_rest(),
			},
		}));
		data.freeze()
	}

	fn format_complete_text(&mut self, text: &str) -> Vec<Bytes> {
		self.replaced = true;
		let index = self.max_index + 1;
		let mut out = Vec::new();
		if !self.message_started {
			out.push(self.synth_message_start());
		}
		out.push(encode_event(&StreamEvent::ContentBlockStart {
			index,
			content_block: ContentBlock::text(""),
		}));
		out.push(encode_event(&StreamEvent::ContentBlockDelta {
			index,
			delta: Delta {
				r#type: "text_delta".to_string(),
				text: Some(text.to_string()),
				partial_json: None,
				rest: empty_rest(),
			},
		}));
		out.push(encode_event(&StreamEvent::ContentBlockStop { index }));
		out
	}

	fn raw_tool_call_events(&mut self) -> Vec<Bytes> {
		std::mem::take(&mut self.buffered_tool_frames)
	}

	fn format_end(&mut self) -> Vec<Bytes> {
		let mut out = Vec::new();
		let mut closer = BytesMut::new();
		self.close_synth_block(&mut closer);
		if !closer.is_empty() {
			out.push(closer.freeze());
		}
		if self.replaced || self.pending_final_frames.is_empty() {
			let stop_reason = if self.replaced {
				"end_turn".to_string()
			} else {
				self.acc.stop_reason.clone().unwrap_or_else(|| "end_turn".to_string())
			};
			out.push(encode_event(&StreamEvent::MessageDelta {
				delta: MessageDelta {
					stop_reason: Some(stop_reason),
					stop_sequence: None,
					rest: empty_rest(),
				},
				usage: self.acc.usage.map(|u| crate::llm::types::messages::DeltaUsage {
					output_tokens: u.output_tokens,
					input_tokens: Some(u.input_tokens),
					rest: empty_rest(),
				}),
			}));
			out.push(encode_event(&StreamEvent::MessageStop));
			self.pending_final_frames.clear();
		} else {
			out.append(&mut self.pending_final_frames);
		}
		out
	}

	fn accumulator(&self) -> &StreamAccumulator {
		&self.acc
	}
}

#[cfg(test)]
#[path = "anthropic_tests.rs"]
mod tests;
