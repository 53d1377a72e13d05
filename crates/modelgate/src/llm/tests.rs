use ::http::{HeaderMap, HeaderValue};

use super::*;

fn provider(tag: &str) -> AIProvider {
	AIProvider::from_tag(tag).unwrap()
}

#[test]
fn chat_routes_per_provider() {
	assert_eq!(
		provider("openai").chat_route("/chat/completions"),
		Some(ChatRoute::BodyControlled)
	);
	assert_eq!(
		provider("openai").chat_route("/v1/chat/completions"),
		Some(ChatRoute::BodyControlled)
	);
	assert_eq!(provider("openai").chat_route("/v1/models"), None);

	assert_eq!(
		provider("anthropic").chat_route("/v1/messages"),
		Some(ChatRoute::BodyControlled)
	);
	assert_eq!(
		provider("anthropic").chat_route("/v1/messages/count_tokens"),
		None
	);

	assert_eq!(
		provider("gemini").chat_route("/v1beta/models/gemini-2.0-flash:generateContent"),
		Some(ChatRoute::Buffered)
	);
	assert_eq!(
		provider("gemini").chat_route("/v1beta/models/gemini-2.0-flash:streamGenerateContent?alt=sse"),
		Some(ChatRoute::Streaming)
	);

	assert_eq!(
		provider("bedrock").chat_route("/model/us.amazon.nova-lite-v1:0/converse"),
		Some(ChatRoute::Buffered)
	);
	assert_eq!(
		provider("bedrock").chat_route("/model/us.amazon.nova-lite-v1:0/converse-stream"),
		Some(ChatRoute::Streaming)
	);

	assert_eq!(
		provider("cohere").chat_route("/chat"),
		Some(ChatRoute::BodyControlled)
	);
	assert_eq!(
		provider("zhipuai").chat_route("/api/paas/v4/chat/completions"),
		Some(ChatRoute::BodyControlled)
	);
}

#[test]
fn api_key_extraction_and_placement() {
	let mut headers = HeaderMap::new();
	headers.insert("x-api-key", HeaderValue::from_static("sk-ant-1"));
	let key = provider("anthropic").extract_api_key(&headers).unwrap();
	assert_eq!(key, "sk-ant-1");

	// Anthropic OAuth bearer tokens are tagged internally
	let mut headers = HeaderMap::new();
	headers.insert("authorization", HeaderValue::from_static("Bearer oat-1"));
	let key = provider("anthropic").extract_api_key(&headers).unwrap();
	assert_eq!(key, "Bearer:oat-1");
	let mut upstream = HeaderMap::new();
	provider("anthropic")
		.apply_api_key(&mut upstream, &key)
		.unwrap();
	assert_eq!(upstream.get("authorization").unwrap(), "Bearer oat-1");
	assert_eq!(upstream.get("anthropic-version").unwrap(), "2023-06-01");
	assert!(upstream.get("x-api-key").is_none());

	let mut upstream = HeaderMap::new();
	provider("anthropic")
		.apply_api_key(&mut upstream, "sk-ant-1")
		.unwrap();
	assert_eq!(upstream.get("x-api-key").unwrap(), "sk-ant-1");

	let mut headers = HeaderMap::new();
	headers.insert("x-goog-api-key", HeaderValue::from_static("g-1"));
	assert_eq!(
		provider("gemini").extract_api_key(&headers).unwrap(),
		"g-1"
	);

	let mut headers = HeaderMap::new();
	headers.insert("authorization", HeaderValue::from_static("Bearer sk-1"));
	assert_eq!(
		provider("openai").extract_api_key(&headers).unwrap(),
		"sk-1"
	);
	let mut upstream = HeaderMap::new();
	provider("openai").apply_api_key(&mut upstream, "sk-1").unwrap();
	assert_eq!(upstream.get("authorization").unwrap(), "Bearer sk-1");
}

#[test]
fn aux_requests_parse_as_provider_requests() {
	let (path, body) = provider("openai").aux_chat_request("gpt-4o-mini", "sys", "user");
	assert_eq!(path, "/v1/chat/completions");
	let req: types::completions::Request = serde_json::from_slice(&body).unwrap();
	assert_eq!(req.model.as_deref(), Some("gpt-4o-mini"));
	assert_eq!(req.messages.len(), 2);

	let (path, body) =
		provider("anthropic").aux_chat_request("claude-3-5-haiku-latest", "sys", "user");
	assert_eq!(path, "/v1/messages");
	let req: types::messages::Request = serde_json::from_slice(&body).unwrap();
	assert_eq!(req.messages.len(), 1);

	let (path, body) = provider("gemini").aux_chat_request("gemini-2.0-flash", "sys", "user");
	assert_eq!(
		path,
		"/v1beta/models/gemini-2.0-flash:generateContent"
	);
	let req: types::gemini::Request = serde_json::from_slice(&body).unwrap();
	assert_eq!(req.contents.len(), 1);

	let (path, body) =
		provider("bedrock").aux_chat_request("us.amazon.nova-lite-v1:0", "sys", "user");
	assert_eq!(path, "/model/us.amazon.nova-lite-v1:0/converse");
	let req: types::bedrock::Request = serde_json::from_slice(&body).unwrap();
	assert_eq!(req.messages.len(), 1);
}

#[test]
fn token_counting_grows_with_content() {
	let p = provider("openai");
	let short = vec![CommonMessage {
		role: gate_core::strng::literal!("user"),
		content: gate_core::strng::literal!("hi"),
		tool_results: vec![],
	}];
	let long = vec![CommonMessage {
		role: gate_core::strng::literal!("user"),
		content: gate_core::strng::new("hi ".repeat(200)),
		tool_results: vec![],
	}];
	let short_count = p.count_tokens("gpt-4o", &short);
	let long_count = p.count_tokens("gpt-4o", &long);
	assert!(short_count > 0);
	assert!(long_count > short_count);
	// Deterministic
	assert_eq!(p.count_tokens("gpt-4o", &short), short_count);
}

#[test]
fn path_models_for_url_model_providers() {
	assert_eq!(
		provider("gemini").path_model("/v1beta/models/gemini-2.0-flash:generateContent"),
		Some("gemini-2.0-flash")
	);
	assert_eq!(
		provider("bedrock").path_model("/model/us.amazon.nova-lite-v1:0/converse"),
		Some("us.amazon.nova-lite-v1:0")
	);
	assert_eq!(provider("openai").path_model("/chat/completions"), None);
}
