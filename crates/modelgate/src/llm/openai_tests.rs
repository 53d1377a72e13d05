use super::*;
use crate::llm::adapter::{RequestAdapter as _, ResponseAdapter as _, StreamAdapter as _};

fn request_with_tool_result() -> CompletionsRequestAdapter {
	let body = serde_json::json!({
		"model": "gpt-4o",
		"stream": true,
		"messages": [
			{"role": "user", "content": "list my files"},
			{"role": "assistant", "tool_calls": [
				{"id": "call_1", "type": "function", "function": {"name": "list-files", "arguments": "{}"}}
			]},
			{"role": "tool", "tool_call_id": "call_1", "content": "[\"a.rs\",\"b.rs\"]"}
		],
		"tools": [
			{"type": "function", "function": {"name": "list-files", "parameters": {"type": "object"}}}
		],
	});
	CompletionsRequestAdapter::parse(&serde_json::to_vec(&body).unwrap()).unwrap()
}

#[test]
fn common_view_resolves_tool_names() {
	let adapter = request_with_tool_result();
	let results = adapter.tool_results();
	assert_eq!(results.len(), 1);
	assert_eq!(results[0].id, "call_1");
	assert_eq!(results[0].name.as_deref(), Some("list-files"));
	assert_eq!(results[0].content, "[\"a.rs\",\"b.rs\"]");

	let tools = adapter.tool_definitions();
	assert_eq!(tools.len(), 1);
	assert_eq!(tools[0].name, "list-files");
}

#[test]
fn materialization_applies_overrides_and_usage_injection() {
	let mut adapter = request_with_tool_result();
	adapter.set_model("gpt-4o-mini");
	adapter.update_tool_result("call_1", "files[2]: a.rs,b.rs");

	let out: serde_json::Value =
		serde_json::from_slice(&adapter.to_provider_request(true).unwrap()).unwrap();
	assert_eq!(out["model"], "gpt-4o-mini");
	assert_eq!(out["messages"][2]["content"], "files[2]: a.rs,b.rs");
	// Streams always ask for usage so token accounting works
	assert_eq!(out["stream_options"]["include_usage"], true);
}

#[test]
fn apply_tool_result_updates_is_idempotent() {
	let mut adapter = request_with_tool_result();
	let mut overrides = std::collections::HashMap::new();
	overrides.insert("call_1".to_string(), "sanitized".to_string());
	adapter.apply_tool_result_updates(&overrides);
	let first = adapter.to_provider_request(false).unwrap();
	adapter.apply_tool_result_updates(&overrides);
	let second = adapter.to_provider_request(false).unwrap();
	assert_eq!(first, second);
}

#[test]
fn oversized_images_become_placeholders() {
	let big = "A".repeat(200_000);
	let body = serde_json::json!({
		"model": "gpt-4o",
		"messages": [{"role": "user", "content": [
			{"type": "text", "text": "look"},
			{"type": "image", "data": big, "mimeType": "image/png"},
			{"type": "image", "data": "dGlueQ==", "mimeType": "image/png"},
		]}],
	});
	let adapter = CompletionsRequestAdapter::parse(&serde_json::to_vec(&body).unwrap()).unwrap();
	let out: serde_json::Value =
		serde_json::from_slice(&adapter.to_provider_request(true).unwrap()).unwrap();
	let parts = out["messages"][0]["content"].as_array().unwrap();
	assert_eq!(parts[1]["type"], "text");
	assert_eq!(parts[1]["text"], "[Image omitted due to size]");
	assert_eq!(parts[2]["type"], "image_url");
	assert_eq!(
		parts[2]["image_url"]["url"],
		"data:image/png;base64,dGlueQ=="
	);
}

#[test]
fn response_adapter_refusal_keeps_provider_shape() {
	let body = serde_json::json!({
		"id": "chatcmpl-1",
		"object": "chat.completion",
		"model": "gpt-4o",
		"choices": [{"index": 0, "message": {
			"role": "assistant",
			"content": null,
			"tool_calls": [{"id": "call_1", "type": "function",
				"function": {"name": "rm", "arguments": "{\"path\":\"/\"}"}}],
		}, "finish_reason": "tool_calls"}],
		"usage": {"prompt_tokens": 12, "completion_tokens": 10, "total_tokens": 22},
	});
	let adapter =
		CompletionsResponseAdapter::parse(&serde_json::to_vec(&body).unwrap()).unwrap();
	let calls = adapter.tool_calls();
	assert_eq!(calls.len(), 1);
	assert_eq!(calls[0].name, "rm");
	assert_eq!(calls[0].arguments, serde_json::json!({"path": "/"}));
	let usage = adapter.usage().unwrap();
	assert_eq!((usage.input_tokens, usage.output_tokens), (12, 10));

	let refusal: serde_json::Value =
		serde_json::from_slice(&adapter.to_refusal("blocked").unwrap()).unwrap();
	assert_eq!(refusal["choices"][0]["message"]["content"], "blocked");
	assert!(refusal["choices"][0]["message"]["tool_calls"].is_null());
	assert_eq!(refusal["choices"][0]["finish_reason"], "stop");
	// Unrelated fields survive untouched
	assert_eq!(refusal["id"], "chatcmpl-1");
	assert_eq!(refusal["object"], "chat.completion");
}

fn chunk(json: serde_json::Value) -> String {
	format!("data: {json}\n\n")
}

#[test]
fn stream_buffers_tool_calls_until_released() {
	let mut adapter = CompletionsStreamAdapter::new("gpt-4o");
	let frames = [
		chunk(serde_json::json!({"id":"chatcmpl-1","object":"chat.completion.chunk","created":1,
			"model":"gpt-4o","choices":[{"index":0,"delta":{"role":"assistant"},"finish_reason":null}]})),
		chunk(serde_json::json!({"id":"chatcmpl-1","object":"chat.completion.chunk","created":1,
			"model":"gpt-4o","choices":[{"index":0,"delta":{"content":"Hel"},"finish_reason":null}]})),
		chunk(serde_json::json!({"id":"chatcmpl-1","object":"chat.completion.chunk","created":1,
			"model":"gpt-4o","choices":[{"index":0,"delta":{"tool_calls":[{"index":0,"id":"call_1",
			"type":"function","function":{"name":"list-files","arguments":"{\"p\":"}}]},"finish_reason":null}]})),
		chunk(serde_json::json!({"id":"chatcmpl-1","object":"chat.completion.chunk","created":1,
			"model":"gpt-4o","choices":[{"index":0,"delta":{"tool_calls":[{"index":0,
			"function":{"arguments":"1}"}}]},"finish_reason":null}]})),
		chunk(serde_json::json!({"id":"chatcmpl-1","object":"chat.completion.chunk","created":1,
			"model":"gpt-4o","choices":[{"index":0,"delta":{},"finish_reason":"tool_calls"}]})),
		chunk(serde_json::json!({"id":"chatcmpl-1","object":"chat.completion.chunk","created":1,
			"model":"gpt-4o","choices":[],
			"usage":{"prompt_tokens":12,"completion_tokens":10,"total_tokens":22}})),
		"data: [DONE]\n\n".to_string(),
	];

	let mut outcomes = Vec::new();
	for f in &frames {
		outcomes.extend(adapter.process_chunk(f.as_bytes()).unwrap());
	}
	assert_eq!(outcomes.len(), 7);
	// role-only delta dropped
	assert!(outcomes[0].sse_data.is_none() && !outcomes[0].is_tool_call);
	// text passes through verbatim
	assert_eq!(outcomes[1].sse_data.as_deref(), Some(frames[1].as_bytes()));
	// tool deltas buffered
	assert!(outcomes[2].is_tool_call && outcomes[2].sse_data.is_none());
	assert!(outcomes[3].is_tool_call);
	// finish + usage held until after policy
	assert!(outcomes[4].sse_data.is_none());
	assert!(outcomes[5].sse_data.is_none());
	assert!(outcomes[6].is_final);

	let acc = adapter.accumulator();
	assert_eq!(acc.text, "Hel");
	assert_eq!(acc.tool_calls.len(), 1);
	assert_eq!(acc.tool_calls[0].id, "call_1");
	assert_eq!(acc.tool_calls[0].arguments, serde_json::json!({"p": 1}));
	let usage = acc.usage.unwrap();
	assert_eq!((usage.input_tokens, usage.output_tokens), (12, 10));
	assert_eq!(acc.stop_reason.as_deref(), Some("tool_calls"));

	// Approved: tool frames replay verbatim, then finals, then the terminator
	let replay = adapter.raw_tool_call_events();
	assert_eq!(replay.len(), 2);
	assert_eq!(replay[0].as_ref(), frames[2].as_bytes());
	assert_eq!(replay[1].as_ref(), frames[3].as_bytes());
	let end = adapter.format_end();
	assert_eq!(end.len(), 3);
	assert_eq!(end[0].as_ref(), frames[4].as_bytes());
	assert_eq!(end[1].as_ref(), frames[5].as_bytes());
	assert_eq!(end[2].as_ref(), b"data: [DONE]\n\n");
}

#[test]
fn stream_refusal_replaces_tail() {
	let mut adapter = CompletionsStreamAdapter::new("gpt-4o");
	let tool = chunk(serde_json::json!({"id":"chatcmpl-2","object":"chat.completion.chunk","created":1,
		"model":"gpt-4o","choices":[{"index":0,"delta":{"tool_calls":[{"index":0,"id":"call_9",
		"type":"function","function":{"name":"rm","arguments":"{}"}}]},"finish_reason":null}]}));
	adapter.process_chunk(tool.as_bytes()).unwrap();
	adapter.process_chunk(b"data: [DONE]\n\n").unwrap();

	let frames = adapter.format_complete_text("blocked by policy");
	assert_eq!(frames.len(), 2);
	let first: serde_json::Value = serde_json::from_slice(
		frames[0]
			.strip_prefix(b"data: ".as_slice())
			.unwrap()
			.strip_suffix(b"\n\n".as_slice())
			.unwrap(),
	)
	.unwrap();
	assert_eq!(
		first["choices"][0]["delta"]["content"],
		"blocked by policy"
	);
	// Refused responses end with only the terminator; buffered frames are dropped
	let end = adapter.format_end();
	assert_eq!(end.len(), 1);
	assert_eq!(end[0].as_ref(), b"data: [DONE]\n\n");
}
