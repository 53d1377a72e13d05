//! TOON (token-oriented object notation) encoding for tool results.
//!
//! JSON tool results are often dominated by repeated keys and punctuation that tokenize
//! poorly. TOON lays the same data out as indented key/value lines and tabular rows for
//! uniform object arrays. Whether it actually helps is measured in tokens, not bytes;
//! the compressor only substitutes when the tokenizer agrees.

use serde_json::Value;

use crate::llm::AIProvider;
use crate::llm::adapter::RequestAdapter;

/// Why compression did not rewrite anything, recorded on the interaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ToonSkipReason {
	NotEnabled,
	NoToolResults,
	NotEffective,
}

impl ToonSkipReason {
	pub fn as_str(&self) -> &'static str {
		match self {
			ToonSkipReason::NotEnabled => "not_enabled",
			ToonSkipReason::NoToolResults => "no_tool_results",
			ToonSkipReason::NotEffective => "not_effective",
		}
	}
}

#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct ToonReport {
	pub tokens_before: u64,
	pub tokens_after: u64,
	pub cost_savings: f64,
	pub was_effective: bool,
	pub had_tool_results: bool,
}

/// Unwrap the common client-side wrapping `[{"type":"text","text":"<payload>"}]` down to
/// the bare payload string. Anything else passes through unchanged.
pub fn unwrap_tool_payload(content: &str) -> String {
	let Ok(Value::Array(items)) = serde_json::from_str::<Value>(content) else {
		return content.to_string();
	};
	if items.is_empty() {
		return content.to_string();
	}
	let mut texts = Vec::with_capacity(items.len());
	for item in &items {
		let is_text = item.get("type").and_then(|t| t.as_str()) == Some("text");
		let Some(text) = is_text.then(|| item.get("text").and_then(|t| t.as_str())).flatten() else {
			return content.to_string();
		};
		texts.push(text);
	}
	texts.join("\n")
}

/// Rewrite each JSON tool result into TOON where that is token-cheaper. Error results
/// are skipped entirely; unparseable results are measured but never rewritten.
pub fn compress_tool_results(
	provider: &AIProvider,
	adapter: &mut dyn RequestAdapter,
	model: &str,
	input_price_per_million: Option<f64>,
) -> ToonReport {
	let results = adapter.tool_results();
	let mut report = ToonReport::default();
	let mut updates: Vec<(String, String)> = Vec::new();
	for result in &results {
		if result.is_error {
			continue;
		}
		report.had_tool_results = true;
		let unwrapped = unwrap_tool_payload(&result.content);
		let before = provider.count_text_tokens(model, &unwrapped);
		let Ok(parsed) = serde_json::from_str::<Value>(&unwrapped) else {
			report.tokens_before += before;
			report.tokens_after += before;
			continue;
		};
		let toon = encode(&parsed);
		let after = provider.count_text_tokens(model, &toon);
		report.tokens_before += before;
		if after < before {
			report.tokens_after += after;
			updates.push((result.id.clone(), toon));
		} else {
			report.tokens_after += before;
		}
	}
	for (id, toon) in updates {
		adapter.update_tool_result(&id, &toon);
		report.was_effective = true;
	}
	let saved = report.tokens_before.saturating_sub(report.tokens_after);
	report.cost_savings = input_price_per_million
		.map(|p| (saved as f64) / 1_000_000.0 * p)
		.unwrap_or_default();
	report
}

pub fn encode(value: &Value) -> String {
	let mut out = String::new();
	match value {
		Value::Object(map) => encode_object(&mut out, map, 0),
		Value::Array(arr) => encode_array(&mut out, None, arr, 0),
		prim => out.push_str(&encode_scalar(prim)),
	}
	out.trim_end().to_string()
}

fn indent(out: &mut String, level: usize) {
	for _ in 0..level {
		out.push_str("  ");
	}
}

fn encode_object(out: &mut String, map: &serde_json::Map<String, Value>, level: usize) {
	for (k, v) in map {
		match v {
			Value::Object(inner) if inner.is_empty() => {
				indent(out, level);
				out.push_str(&format!("{}:\n", quote_if_needed(k)));
			},
			Value::Object(inner) => {
				indent(out, level);
				out.push_str(&format!("{}:\n", quote_if_needed(k)));
				encode_object(out, inner, level + 1);
			},
			Value::Array(arr) => encode_array(out, Some(k), arr, level),
			prim => {
				indent(out, level);
				out.push_str(&format!("{}: {}\n", quote_if_needed(k), encode_scalar(prim)));
			},
		}
	}
}

fn encode_array(out: &mut String, key: Option<&str>, arr: &[Value], level: usize) {
	let prefix = key.map(quote_if_needed).unwrap_or_default();
	indent(out, level);
	if arr.is_empty() {
		out.push_str(&format!("{prefix}[0]:\n"));
		return;
	}
	if arr.iter().all(is_primitive) {
		let row = arr.iter().map(encode_scalar).collect::<Vec<_>>().join(",");
		out.push_str(&format!("{prefix}[{}]: {row}\n", arr.len()));
		return;
	}
	if let Some(fields) = tabular_fields(arr) {
		let header = fields
			.iter()
			.map(|f| quote_if_needed(f))
			.collect::<Vec<_>>()
			.join(",");
		out.push_str(&format!("{prefix}[{}]{{{header}}}:\n", arr.len()));
		for item in arr {
			indent(out, level + 1);
			let row = fields
				.iter()
				.map(|f| encode_scalar(item.get(f.as_str()).unwrap_or(&Value::Null)))
				.collect::<Vec<_>>()
				.join(",");
			out.push_str(&row);
			out.push('\n');
		}
		return;
	}
	// Mixed or nested arrays fall back to one item per line.
	out.push_str(&format!("{prefix}[{}]:\n", arr.len()));
	for item in arr {
		indent(out, level + 1);
		out.push_str("- ");
		match item {
			prim if is_primitive(prim) => out.push_str(&encode_scalar(prim)),
			other => out.push_str(&other.to_string()),
		}
		out.push('\n');
	}
}

/// Field list when every element is an object with identical keys and primitive values.
fn tabular_fields(arr: &[Value]) -> Option<Vec<String>> {
	let first = arr.first()?.as_object()?;
	let fields: Vec<String> = first.keys().cloned().collect();
	for item in arr {
		let obj = item.as_object()?;
		if obj.len() != fields.len() {
			return None;
		}
		for f in &fields {
			if !obj.get(f).is_some_and(is_primitive) {
				return None;
			}
		}
	}
	Some(fields)
}

fn is_primitive(v: &Value) -> bool {
	!matches!(v, Value::Object(_) | Value::Array(_))
}

fn encode_scalar(v: &Value) -> String {
	match v {
		Value::Null => "null".to_string(),
		Value::Bool(b) => b.to_string(),
		Value::Number(n) => n.to_string(),
		Value::String(s) => quote_if_needed(s),
		other => other.to_string(),
	}
}

fn quote_if_needed(s: &str) -> String {
	let needs = s.is_empty()
		|| s != s.trim()
		|| s
			.chars()
			.any(|c| matches!(c, ',' | ':' | '"' | '\n' | '\r' | '{' | '}' | '[' | ']'))
		|| s == "null"
		|| s == "true"
		|| s == "false"
		|| s.parse::<f64>().is_ok();
	if needs {
		serde_json::to_string(s).unwrap_or_else(|_| s.to_string())
	} else {
		s.to_string()
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn encodes_tabular_arrays() {
		let value = serde_json::json!({
			"files": [
				{"name": "a.rs", "size": 10},
				{"name": "b.rs", "size": 20},
			],
			"total": 2,
		});
		assert_eq!(
			encode(&value),
			"files[2]{name,size}:\n  a.rs,10\n  b.rs,20\ntotal: 2"
		);
	}

	#[test]
	fn encodes_primitive_arrays_inline() {
		let value = serde_json::json!({"tags": ["a", "b", "c"], "ok": true});
		assert_eq!(encode(&value), "tags[3]: a,b,c\nok: true");
	}

	#[test]
	fn quotes_delimiters_and_ambiguous_strings() {
		let value = serde_json::json!({"note": "a,b", "version": "2", "name": "plain"});
		assert_eq!(
			encode(&value),
			"note: \"a,b\"\nversion: \"2\"\nname: plain"
		);
	}

	#[test]
	fn nested_objects_indent() {
		let value = serde_json::json!({"outer": {"inner": 1}});
		assert_eq!(encode(&value), "outer:\n  inner: 1");
	}

	#[test]
	fn unwraps_text_wrapping() {
		let wrapped = r#"[{"type":"text","text":"{\"a\":1}"}]"#;
		assert_eq!(unwrap_tool_payload(wrapped), r#"{"a":1}"#);
		// Non-wrapped payloads pass through
		assert_eq!(unwrap_tool_payload(r#"{"a":1}"#), r#"{"a":1}"#);
		assert_eq!(unwrap_tool_payload("plain words"), "plain words");
	}

	#[test]
	fn mixed_arrays_fall_back_to_lines() {
		let value = serde_json::json!({"items": [1, {"a": 1}]});
		assert_eq!(encode(&value), "items[2]:\n  - 1\n  - {\"a\":1}");
	}
}
