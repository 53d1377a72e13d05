//! Inbound HTTP surface.
//!
//! One route set serves every provider: `/v1/{provider}/…` with an optional UUID agent
//! segment after the provider tag. Paths matching the provider's chat endpoint enter
//! the policy pipeline; everything else is transparently reverse-proxied upstream with
//! the agent segment stripped.

pub mod gateway;
pub mod identity;

use std::sync::Arc;

use axum::Router;
use axum::extract::{Path, State};
use axum::routing::any;
use uuid::Uuid;

pub use gateway::{Gateway, GatewayError, RequestEnvelope};

use crate::http::{Body, Method, Request, Response, header};

pub fn router(gateway: Arc<Gateway>) -> Router {
	Router::new()
		.route("/v1/{provider}/{*rest}", any(dispatch))
		.with_state(gateway)
}

async fn dispatch(
	State(gw): State<Arc<Gateway>>,
	Path((provider_tag, rest)): Path<(String, String)>,
	req: Request,
) -> Response {
	let Some(provider) = gw.provider(&provider_tag) else {
		return GatewayError::UnknownProvider.into_response();
	};
	let (agent_id, tail) = split_agent_segment(&rest);
	let sub_path = format!("/{tail}");
	match provider.chat_route(&sub_path) {
		Some(route) if req.method() == Method::POST => {
			gw.handle_chat(provider, agent_id, route, &sub_path, req).await
		},
		_ => passthrough(&gw, provider, &sub_path, req).await,
	}
}

/// A leading UUID segment names the agent; anything else belongs to the provider path.
fn split_agent_segment(rest: &str) -> (Option<Uuid>, &str) {
	if let Some((first, tail)) = rest.split_once('/')
		&& let Ok(id) = Uuid::parse_str(first)
	{
		return (Some(id), tail);
	}
	(None, rest)
}

/// Forward a non-chat request to the provider as-is; these never enter the pipeline.
async fn passthrough(
	gw: &Arc<Gateway>,
	provider: crate::llm::AIProvider,
	sub_path: &str,
	req: Request,
) -> Response {
	let (parts, body) = req.into_parts();
	let host = provider.default_host();
	let scheme = provider.upstream_scheme();
	let uri = match parts.uri.query() {
		Some(q) => format!("{scheme}://{host}{sub_path}?{q}"),
		None => format!("{scheme}://{host}{sub_path}"),
	};
	let mut builder = ::http::Request::builder().method(parts.method).uri(uri);
	if let Some(headers) = builder.headers_mut() {
		for (name, value) in &parts.headers {
			if name != header::HOST {
				headers.insert(name.clone(), value.clone());
			}
		}
	}
	let upstream_req = match builder.body(Body::new(body)) {
		Ok(r) => r,
		Err(e) => return GatewayError::Internal(e.into()).into_response(),
	};
	match gw.client.call(&provider.provider(), upstream_req).await {
		Ok(resp) => resp,
		Err(e) => GatewayError::Upstream {
			status: None,
			message: e.to_string(),
		}
		.into_response(),
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn agent_segment_requires_a_uuid() {
		let id = "0192e4a1-7e7b-4f3c-9a5e-111111111111";
		let path = format!("{id}/chat/completions");
		let (agent, tail) = split_agent_segment(&path);
		assert_eq!(agent, Some(Uuid::parse_str(id).unwrap()));
		assert_eq!(tail, "chat/completions");

		let (agent, tail) = split_agent_segment("chat/completions");
		assert_eq!(agent, None);
		assert_eq!(tail, "chat/completions");

		// Malformed ids are treated as ordinary path segments
		let (agent, tail) = split_agent_segment("not-a-uuid/chat/completions");
		assert_eq!(agent, None);
		assert_eq!(tail, "not-a-uuid/chat/completions");
	}
}
