use super::*;
use crate::llm::adapter::{RequestAdapter as _, ResponseAdapter as _, StreamAdapter as _};
use crate::parse::sse::event_frame;

fn request_with_tool_result() -> MessagesRequestAdapter {
	let body = serde_json::json!({
		"model": "claude-sonnet-4-20250514",
		"max_tokens": 1024,
		"stream": true,
		"messages": [
			{"role": "user", "content": "list my files"},
			{"role": "assistant", "content": [
				{"type": "tool_use", "id": "tu_1", "name": "list-files", "input": {}}
			]},
			{"role": "user", "content": [
				{"type": "tool_result", "tool_use_id": "tu_1", "content": "[\"a.rs\"]"}
			]}
		],
		"tools": [{"name": "list-files", "input_schema": {"type": "object"}}],
	});
	MessagesRequestAdapter::parse(&serde_json::to_vec(&body).unwrap()).unwrap()
}

#[test]
fn common_view_and_overrides() {
	let mut adapter = request_with_tool_result();
	assert!(adapter.streaming());
	assert_eq!(adapter.model().as_deref(), Some("claude-sonnet-4-20250514"));
	let results = adapter.tool_results();
	assert_eq!(results.len(), 1);
	assert_eq!(results[0].name.as_deref(), Some("list-files"));

	adapter.update_tool_result("tu_1", "a.rs");
	let out: serde_json::Value =
		serde_json::from_slice(&adapter.to_provider_request(false).unwrap()).unwrap();
	assert_eq!(out["messages"][2]["content"][0]["content"], "a.rs");
	// Unrelated fields ride through
	assert_eq!(out["max_tokens"], 1024);
}

#[test]
fn mcp_image_blocks_become_native_sources() {
	let body = serde_json::json!({
		"model": "claude-sonnet-4-20250514",
		"max_tokens": 10,
		"messages": [{"role": "user", "content": [
			{"type": "image", "data": "dGlueQ==", "mimeType": "image/jpeg"}
		]}],
	});
	let adapter = MessagesRequestAdapter::parse(&serde_json::to_vec(&body).unwrap()).unwrap();
	let out: serde_json::Value =
		serde_json::from_slice(&adapter.to_provider_request(true).unwrap()).unwrap();
	let block = &out["messages"][0]["content"][0];
	assert_eq!(block["type"], "image");
	assert_eq!(block["source"]["type"], "base64");
	assert_eq!(block["source"]["media_type"], "image/jpeg");
	assert_eq!(block["source"]["data"], "dGlueQ==");
	assert!(block.get("data").is_none());
}

#[test]
fn response_refusal_ends_turn() {
	let body = serde_json::json!({
		"id": "msg_1", "type": "message", "role": "assistant",
		"model": "claude-sonnet-4-20250514",
		"content": [
			{"type": "text", "text": "running it now"},
			{"type": "tool_use", "id": "tu_9", "name": "rm", "input": {"path": "/"}}
		],
		"stop_reason": "tool_use", "stop_sequence": null,
		"usage": {"input_tokens": 20, "output_tokens": 9},
	});
	let adapter = MessagesResponseAdapter::parse(&serde_json::to_vec(&body).unwrap()).unwrap();
	assert_eq!(adapter.tool_calls().len(), 1);
	let refusal: serde_json::Value =
		serde_json::from_slice(&adapter.to_refusal("blocked").unwrap()).unwrap();
	assert_eq!(refusal["content"].as_array().unwrap().len(), 1);
	assert_eq!(refusal["content"][0]["text"], "blocked");
	assert_eq!(refusal["stop_reason"], "end_turn");
	assert_eq!(refusal["id"], "msg_1");
}

fn frames_for_tool_stream() -> Vec<bytes::Bytes> {
	vec![
		event_frame("message_start", br#"{"type":"message_start","message":{"id":"msg_s1","type":"message","role":"assistant","content":[],"model":"claude-sonnet-4-20250514","stop_reason":null,"stop_sequence":null,"usage":{"input_tokens":25,"output_tokens":1}}}"#),
		event_frame("content_block_start", br#"{"type":"content_block_start","index":0,"content_block":{"type":"text","text":""}}"#),
		event_frame("content_block_delta", br#"{"type":"content_block_delta","index":0,"delta":{"type":"text_delta","text":"Hi"}}"#),
		event_frame("content_block_stop", br#"{"type":"content_block_stop","index":0}"#),
		event_frame("content_block_start", br#"{"type":"content_block_start","index":1,"content_block":{"type":"tool_use","id":"tu_1","name":"list-files","input":{}}}"#),
		event_frame("content_block_delta", br#"{"type":"content_block_delta","index":1,"delta":{"type":"input_json_delta","partial_json":"{\"dir\":\""}}"#),
		event_frame("content_block_delta", br#"{"type":"content_block_delta","index":1,"delta":{"type":"input_json_delta","partial_json":"sub\"}"}}"#),
		event_frame("content_block_stop", br#"{"type":"content_block_stop","index":1}"#),
		event_frame("message_delta", br#"{"type":"message_delta","delta":{"stop_reason":"tool_use","stop_sequence":null},"usage":{"output_tokens":30}}"#),
		event_frame("message_stop", br#"{"type":"message_stop"}"#),
	]
}

#[test]
fn stream_buffers_tool_blocks_and_finals() {
	let mut adapter = MessagesStreamAdapter::new("claude-sonnet-4-20250514");
	let frames = frames_for_tool_stream();
	let mut outcomes = Vec::new();
	for f in &frames {
		outcomes.extend(adapter.process_chunk(f).unwrap());
	}
	assert_eq!(outcomes.len(), frames.len());
	// message_start and the text block stream through untouched
	assert_eq!(outcomes[0].sse_data.as_deref(), Some(frames[0].as_ref()));
	assert_eq!(outcomes[2].sse_data.as_deref(), Some(frames[2].as_ref()));
	// every tool_use frame buffers
	for o in &outcomes[4..8] {
		assert!(o.is_tool_call);
		assert!(o.sse_data.is_none());
	}
	// message_delta and message_stop are held back
	assert!(outcomes[8].sse_data.is_none());
	assert!(outcomes[9].is_final);

	let acc = adapter.accumulator();
	assert_eq!(acc.response_id.as_deref(), Some("msg_s1"));
	assert_eq!(acc.text, "Hi");
	assert_eq!(acc.tool_calls.len(), 1);
	assert_eq!(acc.tool_calls[0].name, "list-files");
	assert_eq!(acc.tool_calls[0].arguments, serde_json::json!({"dir": "sub"}));
	let usage = acc.usage.unwrap();
	assert_eq!((usage.input_tokens, usage.output_tokens), (25, 30));
	assert_eq!(acc.stop_reason.as_deref(), Some("tool_use"));

	let replay = adapter.raw_tool_call_events();
	assert_eq!(replay.len(), 4);
	assert_eq!(replay[0].as_ref(), frames[4].as_ref());
	// Approved: the original finals replay verbatim
	let end = adapter.format_end();
	assert_eq!(end.len(), 2);
	assert_eq!(end[0].as_ref(), frames[8].as_ref());
	assert_eq!(end[1].as_ref(), frames[9].as_ref());
}

#[test]
fn stream_refusal_synthesizes_text_block_and_end_turn() {
	let mut adapter = MessagesStreamAdapter::new("claude-sonnet-4-20250514");
	for f in frames_for_tool_stream() {
		adapter.process_chunk(&f).unwrap();
	}
	let frames = adapter.format_complete_text("blocked by policy");
	// start, delta, stop on a fresh index
	assert_eq!(frames.len(), 3);
	let start = String::from_utf8(frames[0].to_vec()).unwrap();
	assert!(start.starts_with("event: content_block_start\n"));
	assert!(start.contains("\"index\":2"));

	let end = adapter.format_end();
	assert_eq!(end.len(), 2);
	let delta = String::from_utf8(end[0].to_vec()).unwrap();
	assert!(delta.starts_with("event: message_delta\n"));
	assert!(delta.contains("\"stop_reason\":\"end_turn\""));
	let stop = String::from_utf8(end[1].to_vec()).unwrap();
	assert!(stop.starts_with("event: message_stop\n"));
}

#[test]
fn progress_deltas_open_a_synthetic_block_and_shift_upstream_indexes() {
	let mut adapter = MessagesStreamAdapter::new("claude-sonnet-4-20250514");
	let progress = adapter.format_text_delta("Analyzing with Dual LLM:\n\n");
	let text = String::from_utf8(progress.to_vec()).unwrap();
	assert!(text.contains("event: message_start\n"));
	assert!(text.contains("event: content_block_start\n"));
	assert!(text.contains("Analyzing with Dual LLM"));

	// The upstream message_start must not produce a second message
	let frames = frames_for_tool_stream();
	let outcomes = adapter.process_chunk(&frames[0]).unwrap();
	assert!(outcomes[0].sse_data.is_none());

	// Upstream block 0 closes our synthetic block and is re-indexed to 1
	let outcomes = adapter.process_chunk(&frames[1]).unwrap();
	let data = String::from_utf8(outcomes[0].sse_data.clone().unwrap().to_vec()).unwrap();
	assert!(data.contains("event: content_block_stop\ndata: {\"type\":\"content_block_stop\",\"index\":0}"));
	assert!(data.contains("\"index\":1"));
}
