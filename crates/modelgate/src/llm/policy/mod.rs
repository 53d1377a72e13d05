//! Tool-invocation policy.
//!
//! After the upstream response is assembled (or its tool-call events buffered, when
//! streaming), every proposed invocation is checked here before any tool-call byte
//! reaches the client. A refusal applies to the whole response: the text is replaced and
//! the tool blocks are suppressed.

use gate_core::prelude::Strng;
use gate_core::strng;

use crate::llm::types::CommonToolCall;
use crate::store::{AgentProfile, GlobalToolPolicy, RuleAction};

#[cfg(test)]
#[path = "tests.rs"]
mod tests;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolRefusal {
	/// Machine-readable reason recorded on the interaction.
	pub reason: Strng,
	/// Text streamed back to the caller in place of the assistant's response.
	pub message: String,
}

/// Decide whether the proposed tool calls may go out. First matching rule wins, per
/// call; any refused call refuses the entire response.
pub fn evaluate_tool_calls(
	calls: &[CommonToolCall],
	profile: &AgentProfile,
	global: GlobalToolPolicy,
	context_is_trusted: bool,
) -> Option<ToolRefusal> {
	for call in calls {
		if let Some(refusal) = evaluate_call(call, profile, global, context_is_trusted) {
			return Some(refusal);
		}
	}
	None
}

fn evaluate_call(
	call: &CommonToolCall,
	profile: &AgentProfile,
	global: GlobalToolPolicy,
	context_is_trusted: bool,
) -> Option<ToolRefusal> {
	// An empty whitelist means tool enablement is not configured for this agent; the
	// remaining rules still apply.
	if !profile.enabled_tools.is_empty()
		&& !profile.enabled_tools.iter().any(|t| t == call.name.as_str())
	{
		return Some(ToolRefusal {
			reason: strng::literal!("tool_not_enabled"),
			message: format!(
				"The tool \"{}\" is not enabled for this agent, so the request was not carried out.",
				call.name
			),
		});
	}
	if global == GlobalToolPolicy::Restrictive && !context_is_trusted {
		return Some(ToolRefusal {
			reason: strng::literal!("untrusted_context"),
			message: "Tool invocations were blocked because this conversation contains external data \
				that could not be verified as safe."
				.to_string(),
		});
	}
	for rule in &profile.tool_rules {
		if rule.tool == call.name.as_str() {
			return match rule.action {
				RuleAction::Deny => Some(ToolRefusal {
					reason: strng::literal!("agent_rule_deny"),
					message: format!(
						"The tool \"{}\" is blocked by this agent's policy.",
						call.name
					),
				}),
				RuleAction::Allow => None,
			};
		}
	}
	match global {
		GlobalToolPolicy::Permissive => None,
		GlobalToolPolicy::Restrictive => Some(ToolRefusal {
			reason: strng::literal!("restrictive_default"),
			message: format!(
				"The tool \"{}\" is not explicitly allowed under this organization's restrictive policy.",
				call.name
			),
		}),
	}
}
