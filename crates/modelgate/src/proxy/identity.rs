//! Header-based identity resolution.
//!
//! Nothing here is authentication; these values only label the interaction record.
//! Missing identity is never fatal, and resolution is a pure function of the headers.

use gate_core::prelude::Strng;
use gate_core::strng;

use crate::http::{HeaderMap, x_headers};

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SessionInfo {
	pub id: Option<Strng>,
	pub source: Option<Strng>,
}

fn header_str(headers: &HeaderMap, name: &crate::http::HeaderName) -> Option<Strng> {
	headers
		.get(name)
		.and_then(|v| v.to_str().ok())
		.filter(|v| !v.is_empty())
		.map(strng::new)
}

/// Explicit user-id header first, forwarded-email fallback second.
pub fn resolve_user(headers: &HeaderMap) -> Option<Strng> {
	header_str(headers, &x_headers::X_USER_ID).or_else(|| header_str(headers, &x_headers::X_USER_EMAIL))
}

/// Session id from the documented header set, tagged with where it came from.
pub fn resolve_session(headers: &HeaderMap) -> SessionInfo {
	let candidates: [(&crate::http::HeaderName, &str); 3] = [
		(&x_headers::X_SESSION_ID, "archestra"),
		(&x_headers::X_CHAT_ID, "openwebui"),
		(&x_headers::SESSION_ID, "header"),
	];
	for (name, source) in candidates {
		if let Some(id) = header_str(headers, name) {
			return SessionInfo {
				id: Some(id),
				source: Some(strng::new(source)),
			};
		}
	}
	SessionInfo::default()
}

pub fn resolve_execution(headers: &HeaderMap) -> Option<Strng> {
	header_str(headers, &x_headers::X_EXECUTION_ID)
}

/// Opaque client-provided id for cross-system correlation.
pub fn resolve_external_agent(headers: &HeaderMap) -> Option<Strng> {
	header_str(headers, &x_headers::X_AGENT_ID)
}

#[cfg(test)]
mod tests {
	use crate::http::HeaderValue;

	use super::*;

	#[test]
	fn user_prefers_explicit_id() {
		let mut headers = HeaderMap::new();
		headers.insert("x-archestra-user-id", HeaderValue::from_static("u-1"));
		headers.insert(
			"x-openwebui-user-email",
			HeaderValue::from_static("a@b.example"),
		);
		assert_eq!(resolve_user(&headers).as_deref(), Some("u-1"));

		headers.remove("x-archestra-user-id");
		assert_eq!(resolve_user(&headers).as_deref(), Some("a@b.example"));

		headers.remove("x-openwebui-user-email");
		assert_eq!(resolve_user(&headers), None);
	}

	#[test]
	fn session_precedence_and_source_tags() {
		let mut headers = HeaderMap::new();
		headers.insert("session_id", HeaderValue::from_static("generic"));
		headers.insert("x-openwebui-chat-id", HeaderValue::from_static("chat-9"));
		let s = resolve_session(&headers);
		assert_eq!(s.id.as_deref(), Some("chat-9"));
		assert_eq!(s.source.as_deref(), Some("openwebui"));

		headers.insert(
			"x-archestra-session-id",
			HeaderValue::from_static("sess-1"),
		);
		let s = resolve_session(&headers);
		assert_eq!(s.id.as_deref(), Some("sess-1"));
		assert_eq!(s.source.as_deref(), Some("archestra"));
	}

	#[test]
	fn resolution_is_deterministic() {
		let mut headers = HeaderMap::new();
		headers.insert("x-archestra-user-id", HeaderValue::from_static("u-2"));
		headers.insert("session_id", HeaderValue::from_static("s-2"));
		let a = (resolve_user(&headers), resolve_session(&headers));
		let b = (resolve_user(&headers), resolve_session(&headers));
		assert_eq!(a, b);
	}

	#[test]
	fn empty_values_are_unresolved() {
		let mut headers = HeaderMap::new();
		headers.insert("x-archestra-user-id", HeaderValue::from_static(""));
		assert_eq!(resolve_user(&headers), None);
	}
}
