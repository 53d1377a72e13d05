use super::*;
use crate::llm::adapter::{RequestAdapter as _, ResponseAdapter as _, StreamAdapter as _};
use crate::llm::types::CommonToolDefinition;
use crate::parse::aws_sse;

const NOVA: &str = "us.amazon.nova-lite-v1:0";
const CLAUDE: &str = "anthropic.claude-3-5-sonnet-20241022-v2:0";

fn tool(name: &str) -> CommonToolDefinition {
	CommonToolDefinition {
		name: name.to_string(),
		description: None,
		input_schema: serde_json::json!({"type": "object"}),
	}
}

#[test]
fn paths_and_models() {
	assert_eq!(
		model_from_path("/model/us.amazon.nova-lite-v1:0/converse-stream"),
		Some("us.amazon.nova-lite-v1:0")
	);
	assert_eq!(upstream_path(NOVA, true).as_str(), format!("/model/{NOVA}/converse-stream"));
	assert_eq!(upstream_path(NOVA, false).as_str(), format!("/model/{NOVA}/converse"));
}

#[test]
fn nova_tool_names_encode_on_the_wire() {
	let body = serde_json::json!({
		"messages": [
			{"role": "user", "content": [{"text": "list files"}]},
			{"role": "assistant", "content": [
				{"toolUse": {"toolUseId": "tu_1", "name": "list-files", "input": {}}}
			]},
		],
		"toolConfig": {"tools": [{"toolSpec": {"name": "list-files", "inputSchema": {"json": {}}}}]},
	});
	let bytes = serde_json::to_vec(&body).unwrap();

	let adapter = ConverseRequestAdapter::parse(&bytes, Some(NOVA)).unwrap();
	let out: serde_json::Value =
		serde_json::from_slice(&adapter.to_provider_request(false).unwrap()).unwrap();
	assert_eq!(
		out["toolConfig"]["tools"][0]["toolSpec"]["name"],
		"list_files"
	);
	assert_eq!(
		out["messages"][1]["content"][0]["toolUse"]["name"],
		"list_files"
	);

	// Non-Nova models keep the declared names
	let adapter = ConverseRequestAdapter::parse(&bytes, Some(CLAUDE)).unwrap();
	let out: serde_json::Value =
		serde_json::from_slice(&adapter.to_provider_request(false).unwrap()).unwrap();
	assert_eq!(
		out["toolConfig"]["tools"][0]["toolSpec"]["name"],
		"list-files"
	);
}

#[test]
fn decode_map_round_trips_names() {
	let map = tool_name_decode_map(NOVA, &[tool("list-files"), tool("plain")]);
	assert_eq!(map.len(), 1);
	assert_eq!(map.get("list_files").map(|s| s.as_str()), Some("list-files"));
	assert!(tool_name_decode_map(CLAUDE, &[tool("list-files")]).is_empty());

	let resp = serde_json::json!({
		"output": {"message": {"role": "assistant", "content": [
			{"toolUse": {"toolUseId": "tu_1", "name": "list_files", "input": {}}}
		]}},
		"stopReason": "tool_use",
		"usage": {"inputTokens": 9, "outputTokens": 4, "totalTokens": 13},
	});
	let decoded =
		decode_response_tool_names(&serde_json::to_vec(&resp).unwrap(), &map).unwrap();
	let decoded: serde_json::Value = serde_json::from_slice(&decoded).unwrap();
	assert_eq!(
		decoded["output"]["message"]["content"][0]["toolUse"]["name"],
		"list-files"
	);
}

#[test]
fn response_adapter_reads_converse_shape() {
	let resp = serde_json::json!({
		"output": {"message": {"role": "assistant", "content": [
			{"text": "done"},
			{"toolUse": {"toolUseId": "tu_1", "name": "list-files", "input": {"dir": "."}}}
		]}},
		"stopReason": "tool_use",
		"usage": {"inputTokens": 9, "outputTokens": 4, "totalTokens": 13},
	});
	let adapter = ConverseResponseAdapter::parse(&serde_json::to_vec(&resp).unwrap()).unwrap();
	assert_eq!(adapter.text(), "done");
	assert_eq!(adapter.tool_calls()[0].name, "list-files");
	let usage = adapter.usage().unwrap();
	assert_eq!((usage.input_tokens, usage.output_tokens), (9, 4));

	let refusal: serde_json::Value =
		serde_json::from_slice(&adapter.to_refusal("blocked").unwrap()).unwrap();
	assert_eq!(refusal["output"]["message"]["content"][0]["text"], "blocked");
	assert_eq!(refusal["stopReason"], "end_turn");
}

fn stream_frames() -> Vec<bytes::Bytes> {
	vec![
		aws_sse::encode_event("messageStart", &serde_json::json!({"role": "assistant"})).unwrap(),
		aws_sse::encode_event(
			"contentBlockStart",
			&serde_json::json!({"start": {"toolUse": {"toolUseId": "tu_1", "name": "list_files"}},
				"contentBlockIndex": 0}),
		)
		.unwrap(),
		aws_sse::encode_event(
			"contentBlockDelta",
			&serde_json::json!({"delta": {"toolUse": {"input": "{\"dir\":\".\"}"}}, "contentBlockIndex": 0}),
		)
		.unwrap(),
		aws_sse::encode_event("contentBlockStop", &serde_json::json!({"contentBlockIndex": 0}))
			.unwrap(),
		aws_sse::encode_event("messageStop", &serde_json::json!({"stopReason": "tool_use"})).unwrap(),
		aws_sse::encode_event(
			"metadata",
			&serde_json::json!({"usage": {"inputTokens": 9, "outputTokens": 4, "totalTokens": 13}}),
		)
		.unwrap(),
	]
}

#[test]
fn stream_decodes_names_and_holds_finals() {
	let map = tool_name_decode_map(NOVA, &[tool("list-files")]);
	let mut adapter = ConverseStreamAdapter::new(NOVA, map);

	// Feed everything as one buffer; the frame splitter finds the boundaries.
	let mut joined = Vec::new();
	for f in stream_frames() {
		joined.extend_from_slice(&f);
	}
	let outcomes = adapter.process_chunk(&joined).unwrap();
	assert_eq!(outcomes.len(), 6);
	assert!(outcomes[0].sse_data.is_some());
	for o in &outcomes[1..4] {
		assert!(o.is_tool_call);
		assert!(o.sse_data.is_none());
	}
	assert!(outcomes[4].sse_data.is_none());
	assert!(outcomes[5].is_final);

	let acc = adapter.accumulator();
	assert_eq!(acc.tool_calls.len(), 1);
	// The client sees the name it declared
	assert_eq!(acc.tool_calls[0].name, "list-files");
	assert_eq!(acc.tool_calls[0].arguments, serde_json::json!({"dir": "."}));
	assert_eq!(acc.stop_reason.as_deref(), Some("tool_use"));

	// The buffered start frame was re-encoded with the decoded name
	let replay = adapter.raw_tool_call_events();
	assert_eq!(replay.len(), 3);
	let start = aws_sse::decode_frame(&replay[0]).unwrap();
	assert_eq!(aws_sse::event_type(&start), Some("contentBlockStart"));
	let body = aws_sse::decode_body(&start).unwrap();
	assert_eq!(body["start"]["toolUse"]["name"], "list-files");

	// Finals replay after the tool frames, in their original framing
	let end = adapter.format_end();
	assert_eq!(end.len(), 2);
	assert_eq!(end[0].as_ref(), stream_frames()[4].as_ref());
	assert_eq!(end[1].as_ref(), stream_frames()[5].as_ref());
}

#[test]
fn text_frames_replay_byte_identical() {
	let mut adapter = ConverseStreamAdapter::new(CLAUDE, Default::default());
	let frame = aws_sse::encode_event(
		"contentBlockDelta",
		&serde_json::json!({"delta": {"text": "hello"}, "contentBlockIndex": 0}),
	)
	.unwrap();
	let outcomes = adapter.process_chunk(&frame).unwrap();
	assert_eq!(outcomes.len(), 1);
	assert_eq!(outcomes[0].sse_data.as_deref(), Some(frame.as_ref()));
	assert_eq!(adapter.accumulator().text, "hello");
}
