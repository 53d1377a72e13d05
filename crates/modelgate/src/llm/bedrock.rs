use std::collections::{BTreeMap, HashMap, HashSet};

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
use crate::llm::types::bedrock::{
	ContentBlock, ContentBlockDelta, ContentBlockStart, ConverseResponse, ConverseStreamOutput,
	ImageBlock, ImageSource, Request, ToolResultContentBlock,
};
use crate::llm::types::{
	CommonMessage, CommonToolCall, CommonToolDefinition, TokenUsage, ToolResultView,
};
use crate::llm::AIError;
use crate::parse::aws_sse::{self, FrameBuffer};
use crate::serdes::schema;

#[apply(schema!)]
pub struct Provider {
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub model: Option<Strng>,
	#[serde(default = "default_region")]
	pub region: Strng,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub host_override: Option<Strng>,
}

fn default_region() -> Strng {
	strng::literal!("us-east-1")
}

impl Default for Provider {
	fn default() -> Self {
		Provider {
			model: None,
			region: default_region(),
			host_override: None,
		}
	}
}

impl super::Provider for Provider {
	const NAME: Strng = strng::literal!("bedrock");
}

impl Provider {
	pub fn host(&self) -> Strng {
		self
			.host_override
			.clone()
			.unwrap_or_else(|| strng::format!("bedrock-runtime.{}.amazonaws.com", self.region))
	}
}

/// Extract the model from a `/model/{model}/converse[-stream]` path.
pub fn model_from_path(path: &str) -> Option<&str> {
	let (_, tail) = path.split_once("/model/")?;
	let (model, _) = tail.rsplit_once('/')?;
	Some(model)
}

pub fn upstream_path(model: &str, streaming: bool) -> Strng {
	if streaming {
		strng::format!("/model/{model}/converse-stream")
	} else {
		strng::format!("/model/{model}/converse")
	}
}

/// Nova models reject hyphens in tool names, so they travel as underscores on the wire
/// and are decoded back in everything the client sees.
pub fn is_nova_model(model: &str) -> bool {
	model.to_ascii_lowercase().contains("nova")
}

pub fn encode_tool_name(name: &str) -> String {
	name.replace('-', "_")
}

/// encoded name -> original name, for every declared tool whose name changes under
/// encoding. Empty for non-Nova models.
pub fn tool_name_decode_map(model: &str, tools: &[CommonToolDefinition]) -> HashMap<String, String> {
	if !is_nova_model(model) {
		return HashMap::new();
	}
	tools
		.iter()
		.filter(|t| t.name.contains('-'))
		.map(|t| (encode_tool_name(&t.name), t.name.clone()))
		.collect()
}

/// Rewrite tool names in a buffered converse response so the client sees the names it
/// declared. Returns None when nothing needed rewriting.
pub fn decode_response_tool_names(
	body: &[u8],
	map: &HashMap<String, String>,
) -> Option<Vec<u8>> {
	if map.is_empty() {
		return None;
	}
	let mut resp: ConverseResponse = serde_json::from_slice(body).ok()?;
	let mut changed = false;
	if let Some(message) = &mut resp.output.message {
		for block in &mut message.content {
			if let Some(tu) = &mut block.tool_use
				&& let Some(original) = map.get(&tu.name)
			{
				tu.name = original.clone();
				changed = true;
			}
		}
	}
	if !changed {
		return None;
	}
	serde_json::to_vec(&resp).ok()
}

fn tool_result_text(content: &[ToolResultContentBlock]) -> String {
	content
		.iter()
		.filter_map(|c| match c {
			ToolResultContentBlock::Text(t) => Some(t.clone()),
			ToolResultContentBlock::Json(v) => Some(v.to_string()),
			_ => None,
		})
		.join("\n")
}

pub struct ConverseRequestAdapter {
	req: Request,
	path_model: Option<String>,
	pending_model: Option<String>,
	pending_tool_results: HashMap<String, String>,
}

impl ConverseRequestAdapter {
	pub fn parse(body: &[u8], path_model: Option<&str>) -> Result<Self, AIError> {
		let req: Request = serde_json::from_slice(body).map_err(AIError::RequestParsing)?;
		Ok(ConverseRequestAdapter {
			req,
			path_model: path_model.map(|m| m.to_string()),
			pending_model: None,
			pending_tool_results: HashMap::new(),
		})
	}

	fn tool_names_by_id(&self) -> HashMap<&str, &str> {
		let mut names = HashMap::new();
		for msg in &self.req.messages {
			for block in &msg.content {
				if let Some(tu) = &block.tool_use {
					names.insert(tu.tool_use_id.as_str(), tu.name.as_str());
				}
			}
		}
		names
	}

	fn effective_model(&self) -> Option<&str> {
		self.pending_model.as_deref().or(self.path_model.as_deref())
	}
}

impl RequestAdapter for ConverseRequestAdapter {
	fn model(&self) -> Option<Strng> {
		self.effective_model().map(strng::new)
	}

	fn set_model(&mut self, model: &str) {
		self.pending_model = Some(model.to_string());
	}

	fn streaming(&self) -> bool {
		// Streaming is a property of the route (/converse-stream), not the body.
		false
	}

	fn messages(&self) -> Vec<CommonMessage> {
		let names = self.tool_names_by_id();
		self
			.req
			.messages
			.iter()
			.map(|m| {
				let mut texts: Vec<&str> = Vec::new();
				let mut tool_results = Vec::new();
				for block in &m.content {
					if let Some(t) = &block.text {
						texts.push(t);
					}
					if let Some(tr) = &block.tool_result {
						let id = tr.tool_use_id.clone();
						let content = self
							.pending_tool_results
							.get(&id)
							.cloned()
							.unwrap_or_else(|| tool_result_text(&tr.content));
						tool_results.push(ToolResultView {
							name: names.get(id.as_str()).map(|n| n.to_string()),
							id,
							content,
							is_error: tr.status.as_deref() == Some("error"),
						});
					}
				}
				CommonMessage {
					role: strng::new(&m.role),
					content: strng::new(texts.join("\n")),
					tool_results,
				}
			})
			.collect()
	}

	fn tool_definitions(&self) -> Vec<CommonToolDefinition> {
		self
			.req
			.tool_config
			.iter()
			.flat_map(|tc| tc.tools.iter())
			.filter_map(|t| t.tool_spec.as_ref())
			.map(|spec| CommonToolDefinition {
				name: spec.name.clone(),
				description: spec.description.clone(),
				input_schema: spec
					.input_schema
					.as_ref()
					.map(|s| match s {
						crate::llm::types::bedrock::ToolInputSchema::Json(v) => v.clone(),
					})
					.unwrap_or_default(),
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
		let encode_names = self.effective_model().is_some_and(is_nova_model);
		for msg in &mut req.messages {
			for block in msg.content.iter_mut() {
				if let Some(tr) = &mut block.tool_result
					&& let Some(updated) = self.pending_tool_results.get(&tr.tool_use_id)
				{
					tr.content = vec![ToolResultContentBlock::Text(updated.clone())];
				}
				if encode_names && let Some(tu) = &mut block.tool_use {
					tu.name = encode_tool_name(&tu.name);
				}
				if convert_images {
					convert_image_block(block);
				}
			}
		}
		if encode_names && let Some(tc) = &mut req.tool_config {
			for tool in &mut tc.tools {
				if let Some(spec) = &mut tool.tool_spec {
					spec.name = encode_tool_name(&spec.name);
				}
			}
		}
		serde_json::to_vec(&req).map_err(AIError::RequestMarshal)
	}
}

/// Rewrite an MCP-style image block (`data`/`mimeType`) into Converse's `image` form.
fn convert_image_block(block: &mut ContentBlock) {
	let Some(data) = block.data.take() else {
		return;
	};
	if image_too_large(&data) {
		*block = ContentBlock::text(IMAGE_OMITTED_PLACEHOLDER);
		return;
	}
	let format = block
		.mime_type
		.take()
		.and_then(|m| m.rsplit_once('/').map(|(_, f)| f.to_string()))
		.unwrap_or_else(|| "png".to_string());
	block.image = Some(ImageBlock {
		format,
		source: ImageSource { bytes: data },
	});
}

pub struct ConverseResponseAdapter {
	resp: ConverseResponse,
}

impl ConverseResponseAdapter {
	pub fn parse(body: &[u8]) -> Result<Self, AIError> {
		let resp: ConverseResponse = serde_json::from_slice(body).map_err(AIError::ResponseParsing)?;
		Ok(ConverseResponseAdapter { resp })
	}
}

impl ResponseAdapter for ConverseResponseAdapter {
	fn id(&self) -> Option<Strng> {
		None
	}

	fn model(&self) -> Option<Strng> {
		None
	}

	fn text(&self) -> String {
		self
			.resp
			.output
			.message
			.as_ref()
			.map(|m| {
				m.content
					.iter()
					.filter_map(|b| b.text.as_deref())
					.join("\n")
			})
			.unwrap_or_default()
	}

	fn tool_calls(&self) -> Vec<CommonToolCall> {
		self
			.resp
			.output
			.message
			.as_ref()
			.into_iter()
			.flat_map(|m| m.content.iter())
			.filter_map(|b| b.tool_use.as_ref())
			.map(|tu| CommonToolCall {
				id: tu.tool_use_id.clone(),
				name: tu.name.clone(),
				arguments: tu.input.clone(),
			})
			.collect()
	}

	fn usage(&self) -> Option<TokenUsage> {
		self.resp.usage.map(|u| TokenUsage {
			input_tokens: u.input_tokens,
			output_tokens: u.output_tokens,
		})
	}

	fn to_refusal(&self, message: &str) -> Result<Vec<u8>, AIError> {
		let mut resp = self.resp.clone();
		if let Some(m) = &mut resp.output.message {
			m.content = vec![ContentBlock::text(message)];
		}
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

/// Streaming state machine for converse-stream's binary event-stream framing.
///
/// Text frames replay verbatim. Tool-use frames buffer; when a Nova name map is active
/// the `contentBlockStart` frame is re-encoded with the decoded name. `messageStop` and
/// `metadata` are held until tool blocks are either replayed or replaced, preserving
/// Bedrock's event order for native eventstream parsers.
pub struct ConverseStreamAdapter {
	frames: FrameBuffer,
	acc: StreamAccumulator,
	name_map: HashMap<String, String>,
	tool_indexes: HashSet<i32>,
	partial_tools: BTreeMap<i32, PartialToolUse>,
	buffered_tool_frames: Vec<Bytes>,
	pending_final_frames: Vec<Bytes>,
	replaced: bool,
}

impl ConverseStreamAdapter {
	pub fn new(_model: &str, name_map: HashMap<String, String>) -> Self {
		ConverseStreamAdapter {
			frames: FrameBuffer::new(),
			acc: StreamAccumulator::default(),
			name_map,
			tool_indexes: HashSet::new(),
			partial_tools: BTreeMap::new(),
			buffered_tool_frames: Vec::new(),
			pending_final_frames: Vec::new(),
			replaced: false,
		}
	}

	fn finish_tool(&mut self, index: i32) {
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

	fn encode(&self, event_type: &str, payload: serde_json::Value) -> Bytes {
		aws_sse::encode_event(event_type, &payload).unwrap_or_default()
	}
}

impl StreamAdapter for ConverseStreamAdapter {
	fn process_chunk(&mut self, chunk: &[u8]) -> Result<Vec<StreamChunkOutcome>, AIError> {
		let mut out = Vec::new();
		for raw in self.frames.push(chunk) {
			let message = match aws_sse::decode_frame(&raw) {
				Ok(m) => m,
				Err(e) => {
					return Err(AIError::StreamFraming(e.to_string()));
				},
			};
			let event = match ConverseStreamOutput::deserialize(&message) {
				Ok(e) => e,
				Err(e) => {
					tracing::debug!("unrecognized converse stream event: {e}");
					out.push(StreamChunkOutcome::forward(raw));
					continue;
				},
			};
			self.acc.saw_chunk();
			match event {
				ConverseStreamOutput::MessageStart(_) => {
					out.push(StreamChunkOutcome::forward(raw));
				},
				ConverseStreamOutput::ContentBlockStart(start) => {
					if let Some(ContentBlockStart::ToolUse(tu)) = &start.start {
						self.tool_indexes.insert(start.content_block_index);
						let decoded = self
							.name_map
							.get(&tu.name)
							.cloned()
							.unwrap_or_else(|| tu.name.clone());
						self.partial_tools.insert(
							start.content_block_index,
							PartialToolUse {
								id: tu.tool_use_id.clone(),
								name: decoded.clone(),
								input_json: String::new(),
							},
						);
						let frame = if decoded != tu.name {
							self.encode(
								"contentBlockStart",
								serde_json::json!({
									"start": {"toolUse": {"toolUseId": tu.tool_use_id, "name": decoded}},
									"contentBlockIndex": start.content_block_index,
								}),
							)
						} else {
							raw
						};
						self.buffered_tool_frames.push(frame);
						out.push(StreamChunkOutcome::buffered_tool_call());
					} else {
						out.push(StreamChunkOutcome::forward(raw));
					}
				},
				ConverseStreamOutput::ContentBlockDelta(delta) => {
					if self.tool_indexes.contains(&delta.content_block_index) {
						if let Some(ContentBlockDelta::ToolUse(tu)) = &delta.delta
							&& let Some(partial) = self.partial_tools.get_mut(&delta.content_block_index)
						{
							partial.input_json.push_str(&tu.input);
						}
						self.buffered_tool_frames.push(raw);
						out.push(StreamChunkOutcome::buffered_tool_call());
					} else {
						if let Some(ContentBlockDelta::Text(t)) = &delta.delta {
							self.acc.text.push_str(t);
						}
						out.push(StreamChunkOutcome::forward(raw));
					}
				},
				ConverseStreamOutput::ContentBlockStop(stop) => {
					if self.tool_indexes.contains(&stop.content_block_index) {
						self.finish_tool(stop.content_block_index);
						self.buffered_tool_frames.push(raw);
						out.push(StreamChunkOutcome::buffered_tool_call());
					} else {
						out.push(StreamChunkOutcome::forward(raw));
					}
				},
				ConverseStreamOutput::MessageStop(stop) => {
					self.acc.stop_reason = Some(stop.stop_reason.clone());
					self.pending_final_frames.push(raw);
					out.push(StreamChunkOutcome::swallowed());
				},
				ConverseStreamOutput::Metadata(meta) => {
					if let Some(u) = meta.usage {
						self.acc.usage = Some(TokenUsage {
							input_tokens: u.input_tokens,
							output_tokens: u.output_tokens,
						});
					}
					self.pending_final_frames.push(raw);
					out.push(StreamChunkOutcome {
						sse_data: None,
						is_tool_call: false,
						is_final: true,
					});
				},
			}
		}
		Ok(out)
	}

	fn sse_headers(&self) -> HeaderMap {
		let mut headers = HeaderMap::new();
		headers.insert(
			header::CONTENT_TYPE,
			HeaderValue::from_static("application/vnd.amazon.eventstream"),
		);
		headers
	}

	fn format_text_delta(&mut self, text: &str) -> Bytes {
		self.encode(
			"contentBlockDelta",
			serde_json::json!({"delta": {"text": text}, "contentBlockIndex": 0}),
		)
	}

	fn format_complete_text(&mut self, text: &str) -> Vec<Bytes> {
		self.replaced = true;
		let index = self
			.tool_indexes
			.iter()
			.max()
			.map(|i| i + 1)
			.unwrap_or_default();
		vec![
			self.encode(
				"contentBlockDelta",
				serde_json::json!({"delta": {"text": text}, "contentBlockIndex": index}),
			),
			self.encode(
				"contentBlockStop",
				serde_json::json!({"contentBlockIndex": index}),
			),
		]
	}

	fn raw_tool_call_events(&mut self) -> Vec<Bytes> {
		std::mem::take(&mut self.buffered_tool_frames)
	}

	fn format_end(&mut self) -> Vec<Bytes> {
		if self.replaced || self.pending_final_frames.is_empty() {
			self.pending_final_frames.clear();
			let mut out = vec![self.encode(
				"messageStop",
				serde_json::json!({"stopReason": "end_turn"}),
			)];
			if let Some(u) = self.acc.usage {
				out.push(self.encode(
					"metadata",
					serde_json::json!({"usage": {
						"inputTokens": u.input_tokens,
						"outputTokens": u.output_tokens,
						"totalTokens": u.input_tokens + u.output_tokens,
					}}),
				));
			}
			out
		} else {
			std::mem::take(&mut self.pending_final_frames)
		}
	}

	fn accumulator(&self) -> &StreamAccumulator {
		&self.acc
	}
}

#[cfg(test)]
#[path = "bedrock_tests.rs"]
mod tests;
