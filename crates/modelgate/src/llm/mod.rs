use gate_core::prelude::Strng;
use gate_core::strng;
use macro_rules_attribute::apply;
use tiktoken_rs::CoreBPE;
use tiktoken_rs::tokenizer::{Tokenizer, get_tokenizer};

use crate::serdes::schema;

pub mod adapter;
pub mod anthropic;
pub mod bedrock;
pub mod cerebras;
pub mod cohere;
pub mod cost;
pub mod gemini;
pub mod mistral;
pub mod ollama;
pub mod openai;
pub mod policy;
pub mod toon;
pub mod trust;
pub mod types;
pub mod vllm;
pub mod zhipuai;

#[cfg(test)]
mod tests;

pub use types::{CommonMessage, CommonToolCall, CommonToolDefinition, TokenUsage, ToolResultView};

trait Provider {
	const NAME: Strng;
}

/// The closed set of upstream providers. Each variant carries its deploy-time
/// configuration; wire-format behavior lives in the adapter returned by the factory
/// methods in `adapter`.
#[apply(schema!)]
#[serde(tag = "kind")]
pub enum AIProvider {
	#[serde(rename = "openai")]
	OpenAI(openai::Provider),
	#[serde(rename = "anthropic")]
	Anthropic(anthropic::Provider),
	#[serde(rename = "gemini")]
	Gemini(gemini::Provider),
	#[serde(rename = "bedrock")]
	Bedrock(bedrock::Provider),
	#[serde(rename = "cohere")]
	Cohere(cohere::Provider),
	#[serde(rename = "mistral")]
	Mistral(mistral::Provider),
	#[serde(rename = "cerebras")]
	Cerebras(cerebras::Provider),
	#[serde(rename = "ollama")]
	Ollama(ollama::Provider),
	#[serde(rename = "vllm")]
	Vllm(vllm::Provider),
	#[serde(rename = "zhipuai")]
	Zhipuai(zhipuai::Provider),
}

/// Wire-format family a provider speaks. Everything OpenAI-compatible shares one
/// adapter implementation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WireFamily {
	OpenAI,
	Anthropic,
	Gemini,
	Bedrock,
}

impl AIProvider {
	pub fn provider(&self) -> Strng {
		match self {
			AIProvider::OpenAI(_) => openai::Provider::NAME,
			AIProvider::Anthropic(_) => anthropic::Provider::NAME,
			AIProvider::Gemini(_) => gemini::Provider::NAME,
			AIProvider::Bedrock(_) => bedrock::Provider::NAME,
			AIProvider::Cohere(_) => cohere::Provider::NAME,
			AIProvider::Mistral(_) => mistral::Provider::NAME,
			AIProvider::Cerebras(_) => cerebras::Provider::NAME,
			AIProvider::Ollama(_) => ollama::Provider::NAME,
			AIProvider::Vllm(_) => vllm::Provider::NAME,
			AIProvider::Zhipuai(_) => zhipuai::Provider::NAME,
		}
	}

	pub fn family(&self) -> WireFamily {
		match self {
			AIProvider::Anthropic(_) => WireFamily::Anthropic,
			AIProvider::Gemini(_) => WireFamily::Gemini,
			AIProvider::Bedrock(_) => WireFamily::Bedrock,
			_ => WireFamily::OpenAI,
		}
	}

	/// Build the provider for a URL tag with default configuration.
	pub fn from_tag(tag: &str) -> Option<AIProvider> {
		Some(match tag {
			"openai" => AIProvider::OpenAI(Default::default()),
			"anthropic" => AIProvider::Anthropic(Default::default()),
			"gemini" => AIProvider::Gemini(Default::default()),
			"bedrock" => AIProvider::Bedrock(Default::default()),
			"cohere" => AIProvider::Cohere(Default::default()),
			"mistral" => AIProvider::Mistral(Default::default()),
			"cerebras" => AIProvider::Cerebras(Default::default()),
			"ollama" => AIProvider::Ollama(Default::default()),
			"vllm" => AIProvider::Vllm(Default::default()),
			"zhipuai" => AIProvider::Zhipuai(Default::default()),
			_ => return None,
		})
	}

	/// Hostname the provider's API lives at, honoring any configured override.
	pub fn default_host(&self) -> Strng {
		match self {
			AIProvider::OpenAI(p) => p.host(),
			AIProvider::Anthropic(p) => p.host(),
			AIProvider::Gemini(p) => p.host(),
			AIProvider::Bedrock(p) => p.host(),
			AIProvider::Cohere(p) => p.host(),
			AIProvider::Mistral(p) => p.host(),
			AIProvider::Cerebras(p) => p.host(),
			AIProvider::Ollama(p) => p.host(),
			AIProvider::Vllm(p) => p.host(),
			AIProvider::Zhipuai(p) => p.host(),
		}
	}

	pub fn override_model(&self) -> Option<Strng> {
		match self {
			AIProvider::OpenAI(p) => p.model.clone(),
			AIProvider::Anthropic(p) => p.model.clone(),
			AIProvider::Gemini(p) => p.model.clone(),
			AIProvider::Bedrock(p) => p.model.clone(),
			AIProvider::Cohere(p) => p.model.clone(),
			AIProvider::Mistral(p) => p.model.clone(),
			AIProvider::Cerebras(p) => p.model.clone(),
			AIProvider::Ollama(p) => p.model.clone(),
			AIProvider::Vllm(p) => p.model.clone(),
			AIProvider::Zhipuai(p) => p.model.clone(),
		}
	}

	/// The smaller model used for auxiliary (dual-LLM) classification calls.
	pub fn aux_model(&self) -> Strng {
		match self {
			AIProvider::OpenAI(_) => strng::literal!("gpt-4o-mini"),
			AIProvider::Anthropic(_) => strng::literal!("claude-3-5-haiku-latest"),
			AIProvider::Gemini(_) => strng::literal!("gemini-2.0-flash"),
			AIProvider::Bedrock(_) => strng::literal!("us.amazon.nova-lite-v1:0"),
			AIProvider::Cohere(_) => strng::literal!("command-r7b-12-2024"),
			AIProvider::Mistral(_) => strng::literal!("mistral-small-latest"),
			AIProvider::Cerebras(_) => strng::literal!("llama-3.1-8b"),
			AIProvider::Ollama(p) => p.model.clone().unwrap_or(strng::literal!("llama3.2")),
			AIProvider::Vllm(p) => p.model.clone().unwrap_or(strng::literal!("default")),
			AIProvider::Zhipuai(_) => strng::literal!("glm-4-flash"),
		}
	}

	/// Count tokens for the common message view using the provider family's tokenizer.
	/// Non-OpenAI families are approximated with cl100k; the counts gate compression and
	/// rule predicates, not billing.
	pub fn count_tokens(&self, model: &str, messages: &[CommonMessage]) -> u64 {
		let model = match self.family() {
			WireFamily::OpenAI => model,
			_ => "",
		};
		num_tokens_from_messages(model, messages)
	}

	pub fn count_text_tokens(&self, model: &str, text: &str) -> u64 {
		let model = match self.family() {
			WireFamily::OpenAI => model,
			_ => "",
		};
		let bpe = get_bpe_for_model(model);
		bpe.encode_with_special_tokens(text).len() as u64
	}
}

/// How a matched chat endpoint decides between streaming and buffered dispatch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChatRoute {
	/// The request body's `stream` flag decides.
	BodyControlled,
	Streaming,
	Buffered,
}

impl AIProvider {
	/// Match an inbound path (after the provider/agent segments) against this provider's
	/// chat endpoint. Anything else is transparently proxied.
	pub fn chat_route(&self, path: &str) -> Option<ChatRoute> {
		let path = path.split('?').next().unwrap_or(path);
		match self {
			AIProvider::Anthropic(_) => path
				.ends_with("/v1/messages")
				.then_some(ChatRoute::BodyControlled),
			AIProvider::Gemini(_) => {
				if path.ends_with(":streamGenerateContent") {
					Some(ChatRoute::Streaming)
				} else if path.ends_with(":generateContent") {
					Some(ChatRoute::Buffered)
				} else {
					None
				}
			},
			AIProvider::Bedrock(_) => {
				if path.ends_with("/converse-stream") {
					Some(ChatRoute::Streaming)
				} else if path.ends_with("/converse") {
					Some(ChatRoute::Buffered)
				} else {
					None
				}
			},
			AIProvider::Cohere(_) => (path.ends_with("/chat") || path.ends_with("/chat/completions"))
				.then_some(ChatRoute::BodyControlled),
			_ => path
				.ends_with("/chat/completions")
				.then_some(ChatRoute::BodyControlled),
		}
	}

	/// Model named in the URL path, for providers that carry it there.
	pub fn path_model<'a>(&self, path: &'a str) -> Option<&'a str> {
		match self {
			AIProvider::Gemini(_) => gemini::model_from_path(path),
			AIProvider::Bedrock(_) => bedrock::model_from_path(path),
			_ => None,
		}
	}

	/// Loopback and self-hosted runtimes speak plain HTTP; hosted providers get TLS.
	pub fn upstream_scheme(&self) -> &'static str {
		let host = self.default_host();
		if host.starts_with("localhost") || host.starts_with("127.") {
			return "http";
		}
		match self {
			AIProvider::Ollama(_) | AIProvider::Vllm(_) => "http",
			_ => "https",
		}
	}

	pub fn upstream_chat_path(&self, model: &str, streaming: bool) -> Strng {
		match self {
			AIProvider::OpenAI(_) => strng::new(openai::CHAT_PATH),
			AIProvider::Anthropic(_) => strng::new(anthropic::CHAT_PATH),
			AIProvider::Gemini(_) => gemini::upstream_path(model, streaming),
			AIProvider::Bedrock(_) => bedrock::upstream_path(model, streaming),
			AIProvider::Cohere(_) => strng::new(cohere::CHAT_PATH),
			AIProvider::Mistral(_) => strng::new(mistral::CHAT_PATH),
			AIProvider::Cerebras(_) => strng::new(cerebras::CHAT_PATH),
			AIProvider::Ollama(_) => strng::new(ollama::CHAT_PATH),
			AIProvider::Vllm(_) => strng::new(vllm::CHAT_PATH),
			AIProvider::Zhipuai(_) => strng::new(zhipuai::CHAT_PATH),
		}
	}

	/// Pull the caller's provider credential out of the inbound headers. Anthropic
	/// OAuth bearer tokens are tagged with a `Bearer:` prefix internally so the
	/// upstream dispatch can restore the right header.
	pub fn extract_api_key(&self, headers: &::http::HeaderMap) -> Option<Strng> {
		let bearer = || {
			headers
				.get(::http::header::AUTHORIZATION)
				.and_then(|v| v.to_str().ok())
				.and_then(|v| v.strip_prefix("Bearer "))
		};
		match self {
			AIProvider::Anthropic(_) => headers
				.get("x-api-key")
				.and_then(|v| v.to_str().ok())
				.map(strng::new)
				.or_else(|| bearer().map(|t| strng::format!("Bearer:{t}"))),
			AIProvider::Gemini(_) => headers
				.get("x-goog-api-key")
				.and_then(|v| v.to_str().ok())
				.map(strng::new),
			_ => bearer().map(strng::new),
		}
	}

	/// Place a credential on an upstream request's headers the way this provider
	/// expects it.
	pub fn apply_api_key(
		&self,
		headers: &mut ::http::HeaderMap,
		key: &str,
	) -> Result<(), ::http::header::InvalidHeaderValue> {
		match self {
			AIProvider::Anthropic(_) => {
				if let Some(token) = key.strip_prefix("Bearer:") {
					let mut v = ::http::HeaderValue::from_str(&format!("Bearer {token}"))?;
					v.set_sensitive(true);
					headers.insert(::http::header::AUTHORIZATION, v);
				} else {
					let mut v = ::http::HeaderValue::from_str(key)?;
					v.set_sensitive(true);
					headers.insert("x-api-key", v);
				}
				headers.insert(
					"anthropic-version",
					::http::HeaderValue::from_static(anthropic::VERSION_HEADER),
				);
			},
			AIProvider::Gemini(_) => {
				let mut v = ::http::HeaderValue::from_str(key)?;
				v.set_sensitive(true);
				headers.insert("x-goog-api-key", v);
			},
			_ => {
				let mut v = ::http::HeaderValue::from_str(&format!("Bearer {key}"))?;
				v.set_sensitive(true);
				headers.insert(::http::header::AUTHORIZATION, v);
			},
		}
		Ok(())
	}

	/// Build a minimal non-streaming chat request for the auxiliary (dual-LLM) call.
	pub fn aux_chat_request(&self, model: &str, system: &str, user: &str) -> (Strng, Vec<u8>) {
		let path = self.upstream_chat_path(model, false);
		let body = match self.family() {
			WireFamily::OpenAI => serde_json::json!({
				"model": model,
				"messages": [
					{"role": "system", "content": system},
					{"role": "user", "content": user},
				],
				"stream": false,
			}),
			WireFamily::Anthropic => serde_json::json!({
				"model": model,
				"max_tokens": 1024,
				"system": system,
				"messages": [{"role": "user", "content": user}],
			}),
			WireFamily::Gemini => serde_json::json!({
				"systemInstruction": {"parts": [{"text": system}]},
				"contents": [{"role": "user", "parts": [{"text": user}]}],
			}),
			WireFamily::Bedrock => serde_json::json!({
				"system": [{"text": system}],
				"messages": [{"role": "user", "content": [{"text": user}]}],
				"inferenceConfig": {"maxTokens": 1024},
			}),
		};
		(path, serde_json::to_vec(&body).unwrap_or_default())
	}

	/// The assistant text of an auxiliary call's response.
	pub fn parse_aux_response(&self, body: &[u8]) -> Result<String, AIError> {
		Ok(self.response_adapter(body)?.text())
	}
}

fn num_tokens_from_messages(model: &str, messages: &[CommonMessage]) -> u64 {
	let bpe = get_bpe_for_model(model);

	let tokens_per_message = 3;

	let mut num_tokens: u64 = 0;
	for message in messages {
		num_tokens += tokens_per_message;
		// Role is always 1 token
		num_tokens += 1;
		num_tokens += bpe
			.encode_with_special_tokens(message.content.as_str())
			.len() as u64;
		for tr in &message.tool_results {
			num_tokens += bpe.encode_with_special_tokens(&tr.content).len() as u64;
		}
	}
	num_tokens += 3; // every reply is primed with <|start|>assistant<|message|>
	num_tokens
}

fn get_bpe_for_model(model: &str) -> &'static CoreBPE {
	let tokenizer = get_tokenizer(model).unwrap_or(Tokenizer::Cl100kBase);
	get_bpe_from_tokenizer(tokenizer)
}

/// Tokenizers take about 200ms to load and are lazy loaded. This loads them on demand,
/// outside the request path
pub fn preload_tokenizers() {
	let _ = tiktoken_rs::cl100k_base_singleton();
	let _ = tiktoken_rs::o200k_base_singleton();
}

pub fn get_bpe_from_tokenizer<'a>(tokenizer: Tokenizer) -> &'a CoreBPE {
	match tokenizer {
		Tokenizer::O200kHarmony => tiktoken_rs::o200k_harmony_singleton(),
		Tokenizer::O200kBase => tiktoken_rs::o200k_base_singleton(),
		Tokenizer::Cl100kBase => tiktoken_rs::cl100k_base_singleton(),
		Tokenizer::R50kBase => tiktoken_rs::r50k_base_singleton(),
		Tokenizer::P50kBase => tiktoken_rs::r50k_base_singleton(),
		Tokenizer::P50kEdit => tiktoken_rs::r50k_base_singleton(),
		Tokenizer::Gpt2 => tiktoken_rs::r50k_base_singleton(),
	}
}

#[derive(thiserror::Error, Debug)]
pub enum AIError {
	#[error("missing field: {0}")]
	MissingField(Strng),
	#[error("unknown provider: {0}")]
	UnknownProvider(Strng),
	#[error("request was too large")]
	RequestTooLarge,
	#[error("response was too large")]
	ResponseTooLarge,
	#[error("failed to parse request: {0}")]
	RequestParsing(serde_json::Error),
	#[error("failed to marshal request: {0}")]
	RequestMarshal(serde_json::Error),
	#[error("failed to parse response: {0}")]
	ResponseParsing(serde_json::Error),
	#[error("failed to marshal response: {0}")]
	ResponseMarshal(serde_json::Error),
	#[error("failed to process stream: {0}")]
	StreamFraming(String),
}
