pub use ::http::{HeaderMap, HeaderName, HeaderValue, Method, StatusCode, Uri, header, uri};
use bytes::Bytes;

pub type Body = axum::body::Body;
pub type Request = ::http::Request<Body>;
pub type Response = ::http::Response<Body>;

pub mod x_headers {
	use http::HeaderName;

	pub const X_AMZN_REQUESTID: HeaderName = HeaderName::from_static("x-amzn-requestid");
	pub const X_USER_ID: HeaderName = HeaderName::from_static("x-archestra-user-id");
	pub const X_USER_EMAIL: HeaderName = HeaderName::from_static("x-openwebui-user-email");
	pub const X_SESSION_ID: HeaderName = HeaderName::from_static("x-archestra-session-id");
	pub const X_CHAT_ID: HeaderName = HeaderName::from_static("x-openwebui-chat-id");
	pub const SESSION_ID: HeaderName = HeaderName::from_static("session_id");
	pub const X_EXECUTION_ID: HeaderName = HeaderName::from_static("x-archestra-execution-id");
	pub const X_AGENT_ID: HeaderName = HeaderName::from_static("x-archestra-agent-id");
	pub const ANTHROPIC_BETA: HeaderName = HeaderName::from_static("anthropic-beta");
}

/// Build a JSON response with the given status. Falls back to an empty 500 if the value
/// cannot be serialized, which cannot happen for the static shapes we pass in.
pub fn json_response(status: StatusCode, value: &serde_json::Value) -> Response {
	let body = serde_json::to_vec(value).unwrap_or_default();
	::http::response::Builder::new()
		.status(status)
		.header(header::CONTENT_TYPE, "application/json")
		.body(Body::from(body))
		.unwrap_or_else(|_| {
			let mut r = Response::new(Body::empty());
			*r.status_mut() = StatusCode::INTERNAL_SERVER_ERROR;
			r
		})
}

pub fn modify_uri(
	req: &mut Request,
	f: impl FnOnce(&mut uri::Parts) -> anyhow::Result<()>,
) -> anyhow::Result<()> {
	let uri = std::mem::take(req.uri_mut());
	let mut parts = uri.into_parts();
	f(&mut parts)?;
	*req.uri_mut() = Uri::from_parts(parts)?;
	Ok(())
}

/// Read a request body with a hard cap; the inbound surface never buffers more.
pub async fn read_body(body: Body, limit: usize) -> Result<Bytes, axum::Error> {
	axum::body::to_bytes(body, limit).await
}
