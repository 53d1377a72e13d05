//! Cost accounting and model-substitution rules.
//!
//! Rules are resolved per (organization, provider), ordered by priority; the first rule
//! whose predicate matches the request's token count and tool usage substitutes its
//! target model. Cost is plain token-times-price arithmetic and is undefined whenever a
//! token count or price row is missing.

use gate_core::prelude::Strng;
use macro_rules_attribute::apply;

use crate::serdes::schema;

#[apply(schema!)]
pub struct OptimizationRule {
	pub organization_id: Strng,
	pub provider: Strng,
	#[serde(default)]
	pub predicate: RulePredicate,
	pub target_model: Strng,
	pub priority: i32,
	#[serde(default = "default_enabled")]
	pub enabled: bool,
}

fn default_enabled() -> bool {
	true
}

#[apply(schema!)]
#[derive(Default)]
pub struct RulePredicate {
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub min_tokens: Option<u64>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub max_tokens: Option<u64>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub requires_tools: Option<bool>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub forbids_tools: Option<bool>,
}

impl RulePredicate {
	pub fn matches(&self, token_count: u64, has_tools: bool) -> bool {
		if let Some(min) = self.min_tokens
			&& token_count < min
		{
			return false;
		}
		if let Some(max) = self.max_tokens
			&& token_count > max
		{
			return false;
		}
		if self.requires_tools == Some(true) && !has_tools {
			return false;
		}
		if self.forbids_tools == Some(true) && has_tools {
			return false;
		}
		true
	}
}

/// First enabled rule that matches, in priority order. Callers pass rules already
/// scoped to (organization, provider).
pub fn match_rule(
	rules: &[OptimizationRule],
	token_count: u64,
	has_tools: bool,
) -> Option<&OptimizationRule> {
	let mut ordered: Vec<&OptimizationRule> = rules.iter().filter(|r| r.enabled).collect();
	ordered.sort_by_key(|r| r.priority);
	ordered
		.into_iter()
		.find(|r| r.predicate.matches(token_count, has_tools))
}

#[apply(schema!)]
#[derive(Copy, PartialEq)]
pub struct ModelPrice {
	pub per_million_input: f64,
	pub per_million_output: f64,
}

/// Fallback pricing used when an unknown model shows up; a row is inserted so later
/// lookups succeed.
pub fn default_price(provider: &str) -> ModelPrice {
	let (input, output) = match provider {
		"openai" => (2.5, 10.0),
		"anthropic" => (3.0, 15.0),
		"gemini" => (0.3, 2.5),
		"bedrock" => (3.0, 15.0),
		"cohere" => (2.5, 10.0),
		"mistral" => (2.0, 6.0),
		"cerebras" => (0.6, 1.2),
		"zhipuai" => (0.6, 2.2),
		// Self-hosted runtimes bill nothing.
		"ollama" | "vllm" => (0.0, 0.0),
		_ => (1.0, 2.0),
	};
	ModelPrice {
		per_million_input: input,
		per_million_output: output,
	}
}

/// `cost = input/1e6 * price_in + output/1e6 * price_out`, undefined when either token
/// count is missing.
pub fn calculate(
	price: Option<&ModelPrice>,
	input_tokens: Option<u64>,
	output_tokens: Option<u64>,
) -> Option<f64> {
	let price = price?;
	let input = input_tokens? as f64;
	let output = output_tokens? as f64;
	Some(
		input / 1_000_000.0 * price.per_million_input
			+ output / 1_000_000.0 * price.per_million_output,
	)
}
