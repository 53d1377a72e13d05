//! Persistence boundary.
//!
//! The pipeline reads and writes through these traits only; row-level storage lives in
//! external collaborators. The in-memory implementations back tests and single-node
//! deployments.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use async_trait::async_trait;
use gate_core::prelude::Strng;
use macro_rules_attribute::apply;
use parking_lot::Mutex;
use uuid::Uuid;

use crate::llm::cost::{ModelPrice, OptimizationRule, default_price};
use crate::llm::types::CommonToolDefinition;
use crate::serdes::schema;

/// The logical principal making LLM calls.
#[apply(schema!)]
pub struct AgentProfile {
	pub id: Strng,
	pub organization_id: Strng,
	#[serde(default, skip_serializing_if = "Vec::is_empty")]
	pub teams: Vec<Strng>,
	/// Treat prior tool output as potentially attacker-controlled and run the dual-LLM
	/// evaluation even under a permissive global policy.
	#[serde(default)]
	pub consider_context_untrusted: bool,
	/// Whitelist of tool names this agent may invoke.
	#[serde(default)]
	pub enabled_tools: Vec<Strng>,
	#[serde(default, skip_serializing_if = "Vec::is_empty")]
	pub tool_rules: Vec<ToolRule>,
}

#[apply(schema!)]
pub struct ToolRule {
	pub action: RuleAction,
	pub tool: Strng,
}

#[apply(schema!)]
#[derive(Copy, PartialEq, Eq)]
pub enum RuleAction {
	Allow,
	Deny,
}

/// Org-wide default answer when no per-agent rule applies.
#[apply(schema!)]
#[derive(Copy, PartialEq, Eq, Default)]
pub enum GlobalToolPolicy {
	#[default]
	Permissive,
	Restrictive,
}

#[derive(Debug, Clone)]
pub enum LimitDecision {
	Allowed,
	Exceeded { message: String },
}

/// Immutable record of one gateway interaction, written exactly once per request.
#[apply(schema!)]
pub struct InteractionRecord {
	pub profile_id: Strng,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub external_agent_id: Option<Strng>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub execution_id: Option<Strng>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub user_id: Option<Strng>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub session_id: Option<Strng>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub session_source: Option<Strng>,
	pub interaction_type: Strng,
	pub request: serde_json::Value,
	pub processed_request: serde_json::Value,
	pub response: serde_json::Value,
	pub model: Strng,
	/// The model the caller originally asked for, kept for cost comparison even when a
	/// rule substituted another one.
	pub baseline_model: Strng,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub input_tokens: Option<u64>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub output_tokens: Option<u64>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub cost: Option<f64>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub baseline_cost: Option<f64>,
	pub toon_tokens_before: u64,
	pub toon_tokens_after: u64,
	pub toon_cost_savings: f64,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub toon_skip_reason: Option<Strng>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub context_is_trusted: Option<bool>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub refusal_reason: Option<Strng>,
}

#[async_trait]
pub trait AgentStore: Send + Sync {
	async fn profile(&self, id: Uuid) -> anyhow::Result<Option<AgentProfile>>;
	async fn default_profile(&self, organization: &str) -> anyhow::Result<Option<AgentProfile>>;
	async fn global_tool_policy(&self, organization: &str) -> anyhow::Result<GlobalToolPolicy>;
	/// Organization for a team, used to resolve an agent's org through its memberships.
	async fn team_organization(&self, team: &str) -> anyhow::Result<Option<Strng>>;
}

#[async_trait]
pub trait PriceStore: Send + Sync {
	async fn price(&self, provider: &str, model: &str) -> anyhow::Result<Option<ModelPrice>>;
	/// Insert-if-absent with provider-default pricing so later lookups succeed.
	async fn ensure_price(&self, provider: &str, model: &str) -> anyhow::Result<ModelPrice>;
}

#[async_trait]
pub trait RuleStore: Send + Sync {
	async fn rules(
		&self,
		organization: &str,
		provider: &str,
	) -> anyhow::Result<Vec<OptimizationRule>>;
}

#[async_trait]
pub trait LimitStore: Send + Sync {
	async fn check(&self, organization: &str, profile: &str) -> anyhow::Result<LimitDecision>;
}

#[async_trait]
pub trait InteractionStore: Send + Sync {
	async fn record(&self, record: InteractionRecord) -> anyhow::Result<()>;
}

#[async_trait]
pub trait ToolStore: Send + Sync {
	async fn persist_tools(
		&self,
		profile: &str,
		tools: &[CommonToolDefinition],
	) -> anyhow::Result<()>;
}

#[async_trait]
pub trait ExecutionStore: Send + Sync {
	/// Returns true the first time an execution id is seen.
	async fn first_seen(&self, execution_id: &str, profile: &str) -> anyhow::Result<bool>;
}

#[derive(Clone)]
pub struct Stores {
	pub agents: Arc<dyn AgentStore>,
	pub prices: Arc<dyn PriceStore>,
	pub rules: Arc<dyn RuleStore>,
	pub limits: Arc<dyn LimitStore>,
	pub interactions: Arc<dyn InteractionStore>,
	pub tools: Arc<dyn ToolStore>,
	pub executions: Arc<dyn ExecutionStore>,
}

/// Concrete in-memory stores, with the handles kept so tests can seed and inspect them.
#[derive(Clone, Default)]
pub struct MemoryStores {
	pub agents: Arc<MemoryAgentStore>,
	pub prices: Arc<MemoryPriceStore>,
	pub rules: Arc<MemoryRuleStore>,
	pub limits: Arc<MemoryLimitStore>,
	pub interactions: Arc<MemoryInteractionStore>,
	pub tools: Arc<MemoryToolStore>,
	pub executions: Arc<MemoryExecutionStore>,
}

impl MemoryStores {
	pub fn stores(&self) -> Stores {
		Stores {
			agents: self.agents.clone(),
			prices: self.prices.clone(),
			rules: self.rules.clone(),
			limits: self.limits.clone(),
			interactions: self.interactions.clone(),
			tools: self.tools.clone(),
			executions: self.executions.clone(),
		}
	}
}

#[derive(Default)]
pub struct MemoryAgentStore {
	profiles: Mutex<HashMap<Uuid, AgentProfile>>,
	defaults: Mutex<HashMap<Strng, AgentProfile>>,
	policies: Mutex<HashMap<Strng, GlobalToolPolicy>>,
	team_orgs: Mutex<HashMap<Strng, Strng>>,
}

impl MemoryAgentStore {
	pub fn insert_profile(&self, id: Uuid, profile: AgentProfile) {
		self.profiles.lock().insert(id, profile);
	}

	pub fn set_default(&self, organization: Strng, profile: AgentProfile) {
		self.defaults.lock().insert(organization, profile);
	}

	pub fn set_policy(&self, organization: Strng, policy: GlobalToolPolicy) {
		self.policies.lock().insert(organization, policy);
	}

	pub fn set_team_organization(&self, team: Strng, organization: Strng) {
		self.team_orgs.lock().insert(team, organization);
	}
}

#[async_trait]
impl AgentStore for MemoryAgentStore {
	async fn profile(&self, id: Uuid) -> anyhow::Result<Option<AgentProfile>> {
		Ok(self.profiles.lock().get(&id).cloned())
	}

	async fn default_profile(&self, organization: &str) -> anyhow::Result<Option<AgentProfile>> {
		Ok(self.defaults.lock().get(organization).cloned())
	}

	async fn global_tool_policy(&self, organization: &str) -> anyhow::Result<GlobalToolPolicy> {
		Ok(
			self
				.policies
				.lock()
				.get(organization)
				.copied()
				.unwrap_or_default(),
		)
	}

	async fn team_organization(&self, team: &str) -> anyhow::Result<Option<Strng>> {
		Ok(self.team_orgs.lock().get(team).cloned())
	}
}

#[derive(Default)]
pub struct MemoryPriceStore {
	prices: Mutex<HashMap<(Strng, Strng), ModelPrice>>,
}

impl MemoryPriceStore {
	pub fn set_price(&self, provider: Strng, model: Strng, price: ModelPrice) {
		self.prices.lock().insert((provider, model), price);
	}
}

#[async_trait]
impl PriceStore for MemoryPriceStore {
	async fn price(&self, provider: &str, model: &str) -> anyhow::Result<Option<ModelPrice>> {
		Ok(
			self
				.prices
				.lock()
				.get(&(gate_core::strng::new(provider), gate_core::strng::new(model)))
				.copied(),
		)
	}

	async fn ensure_price(&self, provider: &str, model: &str) -> anyhow::Result<ModelPrice> {
		let key = (
			gate_core::strng::new(provider),
			gate_core::strng::new(model),
		);
		Ok(
			*self
				.prices
				.lock()
				.entry(key)
				.or_insert_with(|| default_price(provider)),
		)
	}
}

#[derive(Default)]
pub struct MemoryRuleStore {
	rules: Mutex<Vec<OptimizationRule>>,
}

impl MemoryRuleStore {
	pub fn add_rule(&self, rule: OptimizationRule) {
		self.rules.lock().push(rule);
	}
}

#[async_trait]
impl RuleStore for MemoryRuleStore {
	async fn rules(
		&self,
		organization: &str,
		provider: &str,
	) -> anyhow::Result<Vec<OptimizationRule>> {
		Ok(
			self
				.rules
				.lock()
				.iter()
				.filter(|r| r.organization_id == organization && r.provider == provider)
				.cloned()
				.collect(),
		)
	}
}

#[derive(Default)]
pub struct MemoryLimitStore {
	exceeded: Mutex<HashMap<Strng, String>>,
}

impl MemoryLimitStore {
	pub fn set_exceeded(&self, profile: Strng, message: impl Into<String>) {
		self.exceeded.lock().insert(profile, message.into());
	}
}

#[async_trait]
impl LimitStore for MemoryLimitStore {
	async fn check(&self, _organization: &str, profile: &str) -> anyhow::Result<LimitDecision> {
		Ok(match self.exceeded.lock().get(profile) {
			Some(message) => LimitDecision::Exceeded {
				message: message.clone(),
			},
			None => LimitDecision::Allowed,
		})
	}
}

#[derive(Default)]
pub struct MemoryInteractionStore {
	records: Mutex<Vec<InteractionRecord>>,
}

impl MemoryInteractionStore {
	pub fn records(&self) -> Vec<InteractionRecord> {
		self.records.lock().clone()
	}
}

#[async_trait]
impl InteractionStore for MemoryInteractionStore {
	async fn record(&self, record: InteractionRecord) -> anyhow::Result<()> {
		self.records.lock().push(record);
		Ok(())
	}
}

#[derive(Default)]
pub struct MemoryToolStore {
	tools: Mutex<HashMap<Strng, Vec<CommonToolDefinition>>>,
}

impl MemoryToolStore {
	pub fn tools_for(&self, profile: &str) -> Vec<CommonToolDefinition> {
		self
			.tools
			.lock()
			.get(profile)
			.cloned()
			.unwrap_or_default()
	}
}

#[async_trait]
impl ToolStore for MemoryToolStore {
	async fn persist_tools(
		&self,
		profile: &str,
		tools: &[CommonToolDefinition],
	) -> anyhow::Result<()> {
		self
			.tools
			.lock()
			.insert(gate_core::strng::new(profile), tools.to_vec());
		Ok(())
	}
}

#[derive(Default)]
pub struct MemoryExecutionStore {
	seen: Mutex<HashSet<Strng>>,
}

#[async_trait]
impl ExecutionStore for MemoryExecutionStore {
	async fn first_seen(&self, execution_id: &str, _profile: &str) -> anyhow::Result<bool> {
		Ok(self.seen.lock().insert(gate_core::strng::new(execution_id)))
	}
}

#[cfg(test)]
mod tests {
	use gate_core::strng;

	use super::*;

	#[tokio::test]
	async fn price_store_insert_if_absent() {
		let store = MemoryPriceStore::default();
		assert!(store.price("openai", "gpt-4o").await.unwrap().is_none());
		let inserted = store.ensure_price("openai", "gpt-4o").await.unwrap();
		assert_eq!(inserted, default_price("openai"));
		// A second ensure does not clobber an existing row
		store.set_price(
			strng::literal!("openai"),
			strng::literal!("gpt-4o"),
			ModelPrice {
				per_million_input: 1.0,
				per_million_output: 2.0,
			},
		);
		let kept = store.ensure_price("openai", "gpt-4o").await.unwrap();
		assert_eq!(kept.per_million_input, 1.0);
	}

	#[tokio::test]
	async fn execution_first_seen_once() {
		let store = MemoryExecutionStore::default();
		assert!(store.first_seen("exec-1", "p").await.unwrap());
		assert!(!store.first_seen("exec-1", "p").await.unwrap());
	}
}
