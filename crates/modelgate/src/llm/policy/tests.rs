use gate_core::strng;

use super::*;
use crate::store::ToolRule;

fn call(name: &str) -> CommonToolCall {
	CommonToolCall {
		id: format!("call_{name}"),
		name: name.to_string(),
		arguments: serde_json::json!({}),
	}
}

fn profile(enabled: &[&str], rules: Vec<ToolRule>) -> AgentProfile {
	AgentProfile {
		id: strng::literal!("profile-1"),
		organization_id: strng::literal!("org-1"),
		teams: vec![],
		consider_context_untrusted: false,
		enabled_tools: enabled.iter().map(strng::new).collect(),
		tool_rules: rules,
	}
}

#[test]
fn whitelist_refuses_unknown_tools() {
	let p = profile(&["list-files"], vec![]);
	let refusal = evaluate_tool_calls(
		&[call("delete-files")],
		&p,
		GlobalToolPolicy::Permissive,
		true,
	)
	.unwrap();
	assert_eq!(refusal.reason, "tool_not_enabled");

	assert!(
		evaluate_tool_calls(&[call("list-files")], &p, GlobalToolPolicy::Permissive, true).is_none()
	);
}

#[test]
fn empty_whitelist_is_unconfigured() {
	let p = profile(&[], vec![]);
	assert!(
		evaluate_tool_calls(&[call("anything")], &p, GlobalToolPolicy::Permissive, true).is_none()
	);
}

#[test]
fn restrictive_untrusted_context_refuses_before_agent_rules() {
	let p = profile(
		&["list-files"],
		vec![ToolRule {
			action: RuleAction::Allow,
			tool: strng::literal!("list-files"),
		}],
	);
	let refusal = evaluate_tool_calls(
		&[call("list-files")],
		&p,
		GlobalToolPolicy::Restrictive,
		false,
	)
	.unwrap();
	assert_eq!(refusal.reason, "untrusted_context");
}

#[test]
fn agent_deny_rule_wins_over_allow_default() {
	let p = profile(
		&[],
		vec![ToolRule {
			action: RuleAction::Deny,
			tool: strng::literal!("rm"),
		}],
	);
	let refusal =
		evaluate_tool_calls(&[call("rm")], &p, GlobalToolPolicy::Permissive, true).unwrap();
	assert_eq!(refusal.reason, "agent_rule_deny");
}

#[test]
fn allow_rule_overrides_restrictive_default() {
	let p = profile(
		&[],
		vec![ToolRule {
			action: RuleAction::Allow,
			tool: strng::literal!("list-files"),
		}],
	);
	assert!(
		evaluate_tool_calls(
			&[call("list-files")],
			&p,
			GlobalToolPolicy::Restrictive,
			true
		)
		.is_none()
	);
	// But a second, unmatched tool still falls to the restrictive default
	let refusal = evaluate_tool_calls(
		&[call("list-files"), call("other")],
		&p,
		GlobalToolPolicy::Restrictive,
		true,
	)
	.unwrap();
	assert_eq!(refusal.reason, "restrictive_default");
}

#[test]
fn no_calls_no_refusal() {
	let p = profile(&[], vec![]);
	assert!(evaluate_tool_calls(&[], &p, GlobalToolPolicy::Restrictive, false).is_none());
}
