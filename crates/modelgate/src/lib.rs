use gate_core::prelude::*;
use serde::Deserialize;

pub mod client;
pub mod http;
pub mod llm;
pub mod parse;
pub mod proxy;
pub mod serdes;
pub mod store;
pub mod telemetry;

/// RawConfig represents the inputs a user can pass in. Config is the validated internal
/// representation.
#[derive(Deserialize, Default, Clone, Debug)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct RawConfig {
	pub default_organization: Option<String>,
	pub toon_compression: Option<bool>,
	pub dual_llm_streaming: Option<bool>,
	pub image_conversion: Option<bool>,
	pub request_body_limit: Option<usize>,
}

#[derive(Clone, Debug, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Config {
	/// Organization used when an agent has no team membership to derive one from.
	pub default_organization: Strng,
	/// Rewrite JSON tool results into TOON when it is token-cheaper.
	pub toon_compression: bool,
	/// Stream dual-LLM analysis progress to the client before the upstream response.
	pub dual_llm_streaming: bool,
	/// Rewrite MCP-style image blocks into each provider's native representation.
	pub image_conversion: bool,
	/// Maximum inbound request body size in bytes.
	pub request_body_limit: usize,
}

impl Config {
	pub fn from_raw(raw: RawConfig) -> Config {
		Config {
			default_organization: raw
				.default_organization
				.map(strng::new)
				.unwrap_or(strng::literal!("default")),
			toon_compression: raw.toon_compression.unwrap_or(true),
			dual_llm_streaming: raw.dual_llm_streaming.unwrap_or(false),
			image_conversion: raw.image_conversion.unwrap_or(true),
			request_body_limit: raw.request_body_limit.unwrap_or(DEFAULT_BODY_LIMIT),
		}
	}
}

impl Default for Config {
	fn default() -> Self {
		Config::from_raw(RawConfig::default())
	}
}

/// Request bodies above this size are rejected before parsing.
pub const DEFAULT_BODY_LIMIT: usize = 2_097_152;
