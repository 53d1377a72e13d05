//! The per-request pipeline.
//!
//! One generic procedure regardless of provider: resolve identity and agent, gate on
//! usage limits, apply model-substitution rules, run the dual-LLM trusted-data
//! evaluation, compress tool results, dispatch upstream, enforce the tool-invocation
//! policy, and record the interaction exactly once, whether the request completed,
//! was refused, or aborted mid-stream.
//!
//! The outgoing response stays uncommitted until the handler returns: every failure up
//! to and including the upstream dispatch maps to its true HTTP status. After the
//! streaming response is committed, failures become a single in-stream error event and
//! the status stays 200.

use std::collections::HashMap;
use std::sync::Arc;

use bytes::Bytes;
use futures_util::StreamExt;
use gate_core::prelude::Strng;
use gate_core::strng;
use http_body_util::BodyExt;
use parking_lot::Mutex;
use serde_json::Value;
use uuid::Uuid;

use crate::client::Client;
use crate::http::{self, Body, HeaderMap, Request, Response, StatusCode, header};
use crate::llm::adapter::StreamAdapter;
use crate::llm::cost::{self, ModelPrice};
use crate::llm::policy::{ToolRefusal, evaluate_tool_calls};
use crate::llm::toon::{self, ToonReport, ToonSkipReason};
use crate::llm::trust::{ANALYSIS_HEADER, Progress, TrustEvaluator};
use crate::llm::types::{CommonToolDefinition, TokenUsage};
use crate::llm::{AIError, AIProvider, ChatRoute, WireFamily, bedrock};
use crate::proxy::identity::{
	self, SessionInfo, resolve_execution, resolve_external_agent, resolve_user,
};
use crate::store::{
	AgentProfile, GlobalToolPolicy, InteractionRecord, InteractionStore, LimitDecision, Stores,
};
use crate::telemetry::metrics::Metrics;
use crate::{Config, DEFAULT_BODY_LIMIT};

#[derive(thiserror::Error, Debug)]
pub enum GatewayError {
	#[error("token or cost limit exceeded: {0}")]
	LimitExceeded(String),
	#[error("agent not found")]
	AgentNotFound,
	#[error("unknown provider")]
	UnknownProvider,
	#[error("upstream error: {message}")]
	Upstream { status: Option<u16>, message: String },
	#[error(transparent)]
	Ai(#[from] AIError),
	#[error("internal error")]
	Internal(#[from] anyhow::Error),
}

impl GatewayError {
	pub fn status(&self) -> StatusCode {
		match self {
			GatewayError::LimitExceeded(_) => StatusCode::TOO_MANY_REQUESTS,
			GatewayError::AgentNotFound => StatusCode::NOT_FOUND,
			GatewayError::UnknownProvider => StatusCode::NOT_FOUND,
			GatewayError::Upstream { status, .. } => status
				.and_then(|s| StatusCode::from_u16(s).ok())
				.unwrap_or(StatusCode::INTERNAL_SERVER_ERROR),
			GatewayError::Ai(AIError::RequestTooLarge) => StatusCode::PAYLOAD_TOO_LARGE,
			GatewayError::Ai(AIError::RequestParsing(_) | AIError::MissingField(_)) => {
				StatusCode::BAD_REQUEST
			},
			GatewayError::Ai(_) => StatusCode::INTERNAL_SERVER_ERROR,
			GatewayError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
		}
	}

	pub fn into_response(self) -> Response {
		let status = self.status();
		let body = match &self {
			GatewayError::LimitExceeded(message) => serde_json::json!({
				"error": {
					"type": "rate_limit_exceeded",
					"code": "token_cost_limit_exceeded",
					"message": message,
				}
			}),
			GatewayError::AgentNotFound => serde_json::json!({
				"error": {"type": "not_found", "message": "agent not found"}
			}),
			GatewayError::UnknownProvider => serde_json::json!({
				"error": {"type": "not_found", "message": "unknown provider"}
			}),
			GatewayError::Upstream { message, .. } => serde_json::json!({
				"error": {"type": "api_error", "message": message}
			}),
			GatewayError::Ai(e) => serde_json::json!({
				"error": {"type": "invalid_request_error", "message": e.to_string()}
			}),
			// Internal details never reach the wire.
			GatewayError::Internal(e) => {
				tracing::error!("internal error handling request: {e:#}");
				serde_json::json!({
					"error": {"type": "api_error", "message": "internal server error"}
				})
			},
		};
		http::json_response(status, &body)
	}
}

/// Everything resolved about a request before dispatch. Owns the mutable override
/// slots; the adapter materializes them when the provider request is built.
pub struct RequestEnvelope {
	pub organization_id: Strng,
	pub profile: AgentProfile,
	pub external_agent_id: Option<Strng>,
	pub execution_id: Option<Strng>,
	pub session: SessionInfo,
	pub user_id: Option<Strng>,
	pub provider: Strng,
	pub model_override: Option<Strng>,
	pub tool_result_overrides: HashMap<String, String>,
}

pub struct Gateway {
	pub config: Arc<Config>,
	pub stores: Stores,
	pub client: Client,
	pub metrics: Arc<Metrics>,
	providers: HashMap<Strng, AIProvider>,
}

impl Gateway {
	pub fn new(config: Arc<Config>, stores: Stores, client: Client, metrics: Arc<Metrics>) -> Self {
		Gateway {
			config,
			stores,
			client,
			metrics,
			providers: HashMap::new(),
		}
	}

	/// Replace the default deploy-time configuration for one provider.
	pub fn with_provider(mut self, provider: AIProvider) -> Self {
		self.providers.insert(provider.provider(), provider);
		self
	}

	pub fn provider(&self, tag: &str) -> Option<AIProvider> {
		self
			.providers
			.get(tag)
			.cloned()
			.or_else(|| AIProvider::from_tag(tag))
	}

	pub async fn handle_chat(
		&self,
		provider: AIProvider,
		agent_id: Option<Uuid>,
		route: ChatRoute,
		sub_path: &str,
		req: Request,
	) -> Response {
		match self
			.orchestrate(provider, agent_id, route, sub_path, req)
			.await
		{
			Ok(resp) => resp,
			Err(e) => e.into_response(),
		}
	}

	async fn orchestrate(
		&self,
		provider: AIProvider,
		agent_id: Option<Uuid>,
		route: ChatRoute,
		sub_path: &str,
		req: Request,
	) -> Result<Response, GatewayError> {
		let (parts, body) = req.into_parts();
		let provider_tag = provider.provider();
		self
			.metrics
			.requests
			.get_or_create(&Metrics::labels(&provider_tag))
			.inc();

		// 1. Identity is resolved before anything that can fail.
		let user_id = resolve_user(&parts.headers);
		let session = identity::resolve_session(&parts.headers);
		let execution_id = resolve_execution(&parts.headers);
		let external_agent_id = resolve_external_agent(&parts.headers);
		let api_key = provider.extract_api_key(&parts.headers);

		// 2. Agent resolution: explicit id or the organization's default profile.
		let profile = match agent_id {
			Some(id) => self
				.stores
				.agents
				.profile(id)
				.await
				.map_err(GatewayError::Internal)?
				.ok_or(GatewayError::AgentNotFound)?,
			None => self
				.stores
				.agents
				.default_profile(&self.config.default_organization)
				.await
				.map_err(GatewayError::Internal)?
				.ok_or(GatewayError::AgentNotFound)?,
		};

		// 3. First sighting of an execution id emits a telemetry event.
		if let Some(exec) = &execution_id
			&& self
				.stores
				.executions
				.first_seen(exec, &profile.id)
				.await
				.unwrap_or(false)
		{
			tracing::info!(execution = %exec, profile = %profile.id, "agent execution started");
		}

		let organization = self.resolve_organization(&profile).await;

		// 4. Usage/cost limit gate: refused requests never reach upstream and leave no
		// interaction record.
		match self
			.stores
			.limits
			.check(&organization, &profile.id)
			.await
			.map_err(GatewayError::Internal)?
		{
			LimitDecision::Allowed => {},
			LimitDecision::Exceeded { message } => {
				return Err(GatewayError::LimitExceeded(message));
			},
		}

		let body_bytes = http::read_body(body, self.config.request_body_limit)
			.await
			.map_err(|_| GatewayError::Ai(AIError::RequestTooLarge))?;
		let raw_request: Value = serde_json::from_slice(&body_bytes).unwrap_or(Value::Null);
		let path_model = provider.path_model(sub_path).map(|m| m.to_string());
		let mut adapter = provider.request_adapter(&body_bytes, path_model.as_deref())?;

		let streaming = match route {
			ChatRoute::Streaming => true,
			ChatRoute::Buffered => false,
			ChatRoute::BodyControlled => adapter.streaming(),
		};

		let baseline_model = adapter
			.model()
			.or_else(|| provider.override_model())
			.ok_or_else(|| GatewayError::Ai(AIError::MissingField(strng::literal!("model"))))?;

		let mut envelope = RequestEnvelope {
			organization_id: organization.clone(),
			profile,
			external_agent_id,
			execution_id,
			session,
			user_id,
			provider: provider_tag.clone(),
			model_override: None,
			tool_result_overrides: HashMap::new(),
		};

		// 5/6. Tool persistence and rule/price resolution are independent lookups.
		let tool_definitions = adapter.tool_definitions();
		let messages = adapter.messages();
		let token_count = provider.count_tokens(&baseline_model, &messages);
		let has_tools = !tool_definitions.is_empty();
		let (persisted, rules) = tokio::join!(
			self
				.stores
				.tools
				.persist_tools(&envelope.profile.id, &tool_definitions),
			self.stores.rules.rules(&organization, &provider_tag),
		);
		if let Err(e) = persisted {
			tracing::warn!("failed to persist tool definitions: {e}");
		}
		let rules = rules.map_err(GatewayError::Internal)?;
		if let Some(rule) = cost::match_rule(&rules, token_count, has_tools)
			&& rule.target_model != baseline_model
		{
			envelope.model_override = Some(rule.target_model.clone());
			adapter.set_model(&rule.target_model);
		}
		let model = envelope
			.model_override
			.clone()
			.unwrap_or_else(|| baseline_model.clone());

		// Rows must exist before cost calculation; unknown models get provider defaults.
		let (price, baseline_price) = tokio::join!(
			self.stores.prices.ensure_price(&provider_tag, &model),
			self.stores.prices.ensure_price(&provider_tag, &baseline_model),
		);
		let price = price.ok();
		let baseline_price = baseline_price.ok();

		let stream_adapter: SharedStream = Arc::new(Mutex::new(
			provider.stream_adapter(&model, &tool_definitions),
		));
		let prelude: Arc<Mutex<Vec<Bytes>>> = Arc::new(Mutex::new(Vec::new()));

		// 7. Trusted-data evaluation, with progress streamed into the response prelude
		// when enabled. The auxiliary calls fan out and join before dispatch.
		let global_policy = self
			.stores
			.agents
			.global_tool_policy(&organization)
			.await
			.unwrap_or_default();
		let tool_results = adapter.tool_results();
		let needs_trust_check = envelope.profile.consider_context_untrusted
			|| (global_policy == GlobalToolPolicy::Restrictive && !tool_results.is_empty());
		let mut context_is_trusted = None;
		if needs_trust_check {
			let progress = (streaming && self.config.dual_llm_streaming).then(|| {
				let start_adapter = stream_adapter.clone();
				let start_prelude = prelude.clone();
				let step_adapter = stream_adapter.clone();
				let step_prelude = prelude.clone();
				Progress {
					on_start: Box::new(move || {
						let frame = start_adapter.lock().format_text_delta(ANALYSIS_HEADER);
						start_prelude.lock().push(frame);
					}),
					on_step: Box::new(move |fragment: &str| {
						let frame = step_adapter.lock().format_text_delta(fragment);
						step_prelude.lock().push(frame);
					}),
				}
			});
			let evaluator = TrustEvaluator {
				client: &self.client,
				provider: &provider,
				api_key: api_key.clone(),
			};
			let evaluation = evaluator.evaluate(&tool_results, progress).await;
			for verdict in &evaluation.verdicts {
				if !verdict.is_trusted {
					let replacement = verdict
						.sanitized
						.clone()
						.unwrap_or_else(|| "[Tool result withheld]".to_string());
					envelope
						.tool_result_overrides
						.insert(verdict.tool_call_id.clone(), replacement);
				}
			}
			adapter.apply_tool_result_updates(&envelope.tool_result_overrides);
			context_is_trusted = Some(evaluation.context_is_trusted);
		}

		// 8. TOON compression, measured in tokens.
		let (toon_report, toon_skip) = if !self.config.toon_compression {
			(ToonReport::default(), Some(ToonSkipReason::NotEnabled))
		} else {
			let report = toon::compress_tool_results(
				&provider,
				adapter.as_mut(),
				&model,
				price.as_ref().map(|p| p.per_million_input),
			);
			let skip = if !report.had_tool_results {
				Some(ToonSkipReason::NoToolResults)
			} else if !report.was_effective {
				Some(ToonSkipReason::NotEffective)
			} else {
				None
			};
			(report, skip)
		};

		// 9. Materialize and dispatch.
		let final_body = adapter.to_provider_request(self.config.image_conversion)?;
		let processed_request: Value = serde_json::from_slice(&final_body).unwrap_or(Value::Null);
		let upstream_req =
			self.build_upstream_request(&provider, &model, streaming, &parts.headers, api_key, final_body)?;
		let upstream = self
			.client
			.call(&provider_tag, upstream_req)
			.await
			.map_err(|e| GatewayError::Upstream {
				status: None,
				message: e.to_string(),
			})?;

		let guard = RecordGuard {
			interactions: Some(self.stores.interactions.clone()),
			metrics: self.metrics.clone(),
			ctx: Some(RecordContext {
				profile_id: envelope.profile.id.clone(),
				external_agent_id: envelope.external_agent_id.clone(),
				execution_id: envelope.execution_id.clone(),
				user_id: envelope.user_id.clone(),
				session_id: envelope.session.id.clone(),
				session_source: envelope.session.source.clone(),
				provider: provider_tag.clone(),
				request: raw_request,
				processed_request,
				model: model.clone(),
				baseline_model: baseline_model.clone(),
				price,
				baseline_price,
				toon: toon_report,
				toon_skip,
				context_is_trusted,
			}),
			stream: None,
			completed: false,
			refusal: None,
		};

		if streaming {
			self
				.stream_response(
					provider,
					envelope,
					global_policy,
					context_is_trusted,
					stream_adapter,
					prelude,
					upstream,
					guard,
				)
				.await
		} else {
			self
				.buffered_response(
					provider,
					envelope,
					global_policy,
					context_is_trusted,
					&model,
					&tool_definitions,
					upstream,
					guard,
				)
				.await
		}
	}

	async fn resolve_organization(&self, profile: &AgentProfile) -> Strng {
		for team in &profile.teams {
			match self.stores.agents.team_organization(team).await {
				Ok(Some(org)) => return org,
				Ok(None) => {},
				Err(e) => tracing::warn!("failed to resolve team organization: {e}"),
			}
		}
		if !profile.organization_id.is_empty() {
			return profile.organization_id.clone();
		}
		self.config.default_organization.clone()
	}

	fn build_upstream_request(
		&self,
		provider: &AIProvider,
		model: &str,
		streaming: bool,
		inbound: &HeaderMap,
		api_key: Option<Strng>,
		body: Vec<u8>,
	) -> Result<Request, GatewayError> {
		let host = provider.default_host();
		let scheme = provider.upstream_scheme();
		let path = provider.upstream_chat_path(model, streaming);
		let uri = format!("{scheme}://{host}{path}");
		let mut req = ::http::Request::builder()
			.method(::http::Method::POST)
			.uri(uri)
			.header(header::CONTENT_TYPE, "application/json")
			.body(Body::from(body))
			.map_err(|e| GatewayError::Internal(e.into()))?;
		if let Some(key) = api_key {
			provider
				.apply_api_key(req.headers_mut(), &key)
				.map_err(|e| GatewayError::Internal(e.into()))?;
		}
		// Opt-in features ride through untouched.
		if let Some(beta) = inbound.get(http::x_headers::ANTHROPIC_BETA) {
			req
				.headers_mut()
				.insert(http::x_headers::ANTHROPIC_BETA, beta.clone());
		}
		Ok(req)
	}

	#[allow(clippy::too_many_arguments)]
	async fn buffered_response(
		&self,
		provider: AIProvider,
		envelope: RequestEnvelope,
		global_policy: GlobalToolPolicy,
		context_is_trusted: Option<bool>,
		model: &str,
		tool_definitions: &[CommonToolDefinition],
		upstream: Response,
		mut guard: RecordGuard,
	) -> Result<Response, GatewayError> {
		let (mut parts, body) = upstream.into_parts();
		let bytes = body
			.collect()
			.await
			.map_err(|e| GatewayError::Upstream {
				status: None,
				message: e.to_string(),
			})?
			.to_bytes();
		if !parts.status.is_success() {
			let message = String::from_utf8_lossy(&bytes).to_string();
			guard.finish(
				serde_json::from_slice(&bytes).unwrap_or(Value::Null),
				None,
				None,
			);
			return Err(GatewayError::Upstream {
				status: Some(parts.status.as_u16()),
				message,
			});
		}

		// Nova tool names come back encoded; the client sees the names it declared.
		let decoded = match &provider {
			AIProvider::Bedrock(_) => {
				let map = bedrock::tool_name_decode_map(model, tool_definitions);
				bedrock::decode_response_tool_names(&bytes, &map).map(Bytes::from)
			},
			_ => None,
		};
		let bytes = decoded.unwrap_or(bytes);

		let response_adapter = provider.response_adapter(&bytes)?;
		let refusal = evaluate_tool_calls(
			&response_adapter.tool_calls(),
			&envelope.profile,
			global_policy,
			context_is_trusted.unwrap_or(true),
		);
		let usage = response_adapter.usage();
		let (out_bytes, refusal_reason) = match refusal {
			Some(ToolRefusal { reason, message }) => {
				self
					.metrics
					.blocked_tools
					.get_or_create(&Metrics::labels(&envelope.provider))
					.inc();
				(
					Bytes::from(response_adapter.to_refusal(&message)?),
					Some(reason),
				)
			},
			None => (bytes, None),
		};

		let response_value: Value = serde_json::from_slice(&out_bytes).unwrap_or(Value::Null);
		guard.finish(response_value, usage, refusal_reason);

		parts.headers.remove(header::CONTENT_LENGTH);
		Ok(Response::from_parts(parts, Body::from(out_bytes)))
	}

	#[allow(clippy::too_many_arguments)]
	async fn stream_response(
		&self,
		provider: AIProvider,
		envelope: RequestEnvelope,
		global_policy: GlobalToolPolicy,
		context_is_trusted: Option<bool>,
		stream_adapter: SharedStream,
		prelude: Arc<Mutex<Vec<Bytes>>>,
		upstream: Response,
		mut guard: RecordGuard,
	) -> Result<Response, GatewayError> {
		let (upstream_parts, upstream_body) = upstream.into_parts();
		if !upstream_parts.status.is_success() {
			let bytes = upstream_body
				.collect()
				.await
				.map(|b| b.to_bytes())
				.unwrap_or_default();
			let message = String::from_utf8_lossy(&bytes).to_string();
			guard.finish(
				serde_json::from_slice(&bytes).unwrap_or(Value::Null),
				None,
				None,
			);
			// Headers are not committed yet, so the true status goes out (never as SSE).
			return Err(GatewayError::Upstream {
				status: Some(upstream_parts.status.as_u16()),
				message,
			});
		}

		let mut headers = { stream_adapter.lock().sse_headers() };
		forward_stream_headers(&upstream_parts.headers, &mut headers);
		guard.stream = Some(stream_adapter.clone());

		let metrics = self.metrics.clone();
		let provider_tag = envelope.provider.clone();
		let profile = envelope.profile;
		let error_family = provider.family();

		let stream = async_stream::stream! {
			let mut guard = guard;
			let prelude_frames = std::mem::take(&mut *prelude.lock());
			for frame in prelude_frames {
				yield Ok::<Bytes, std::convert::Infallible>(frame);
			}
			let mut upstream = upstream_body.into_data_stream();
			let mut upstream_failed = false;
			'read: while let Some(chunk) = upstream.next().await {
				let chunk = match chunk {
					Ok(c) => c,
					Err(e) => {
						tracing::warn!("upstream stream interrupted: {e}");
						metrics
							.interrupted_streams
							.get_or_create(&Metrics::labels(&provider_tag))
							.inc();
						yield Ok(mid_stream_error_frame(error_family, "upstream stream interrupted"));
						upstream_failed = true;
						break 'read;
					},
				};
				let outcomes = { stream_adapter.lock().process_chunk(&chunk) };
				let outcomes = match outcomes {
					Ok(o) => o,
					Err(e) => {
						tracing::warn!("failed to process stream chunk: {e}");
						yield Ok(mid_stream_error_frame(error_family, "stream processing error"));
						upstream_failed = true;
						break 'read;
					},
				};
				let mut done = false;
				for outcome in outcomes {
					if let Some(data) = outcome.sse_data {
						yield Ok(data);
					}
					done |= outcome.is_final;
				}
				if done {
					break 'read;
				}
			}

			if !upstream_failed {
				// Tool policy runs before any buffered tool-call byte is emitted.
				let tool_calls = { stream_adapter.lock().accumulator().tool_calls.clone() };
				let refusal = evaluate_tool_calls(
					&tool_calls,
					&profile,
					global_policy,
					context_is_trusted.unwrap_or(true),
				);
				match refusal {
					Some(ToolRefusal { reason, message }) => {
						metrics
							.blocked_tools
							.get_or_create(&Metrics::labels(&provider_tag))
							.inc();
						guard.refusal = Some(reason);
						let frames = { stream_adapter.lock().format_complete_text(&message) };
						for frame in frames {
							yield Ok(frame);
						}
					},
					None => {
						let frames = { stream_adapter.lock().raw_tool_call_events() };
						for frame in frames {
							yield Ok(frame);
						}
					},
				}
				let frames = { stream_adapter.lock().format_end() };
				for frame in frames {
					yield Ok(frame);
				}
			}
			guard.finish_from_stream();
		};

		let mut builder = ::http::Response::builder().status(StatusCode::OK);
		if let Some(h) = builder.headers_mut() {
			*h = headers;
		}
		builder
			.body(Body::from_stream(stream))
			.map_err(|e| GatewayError::Internal(e.into()))
	}
}

type SharedStream = Arc<Mutex<Box<dyn StreamAdapter>>>;

/// Upstream headers clients rely on during streaming (rate-limit state, request ids).
fn forward_stream_headers(upstream: &HeaderMap, out: &mut HeaderMap) {
	for (name, value) in upstream {
		let n = name.as_str();
		if n.starts_with("anthropic-ratelimit-")
			|| n == "request-id"
			|| n == "x-request-id"
			|| n == "x-amzn-requestid"
		{
			out.insert(name.clone(), value.clone());
		}
	}
}

/// Single error event written after headers are committed; the HTTP status is already
/// on the wire, so this is all the client gets.
fn mid_stream_error_frame(family: WireFamily, message: &str) -> Bytes {
	let payload = serde_json::json!({"type": "api_error", "message": message});
	match family {
		WireFamily::Bedrock => crate::parse::aws_sse::encode_event("error", &payload)
			.unwrap_or_default(),
		WireFamily::Anthropic => crate::parse::sse::event_frame(
			"error",
			&serde_json::to_vec(&serde_json::json!({"type": "error", "error": payload}))
				.unwrap_or_default(),
		),
		_ => crate::parse::sse::data_frame(
			&serde_json::to_vec(&payload).unwrap_or_default(),
		),
	}
}

struct RecordContext {
	profile_id: Strng,
	external_agent_id: Option<Strng>,
	execution_id: Option<Strng>,
	user_id: Option<Strng>,
	session_id: Option<Strng>,
	session_source: Option<Strng>,
	provider: Strng,
	request: Value,
	processed_request: Value,
	model: Strng,
	baseline_model: Strng,
	price: Option<ModelPrice>,
	baseline_price: Option<ModelPrice>,
	toon: ToonReport,
	toon_skip: Option<ToonSkipReason>,
	context_is_trusted: Option<bool>,
}

/// Writes the interaction record exactly once: explicitly on completion or refusal, and
/// from Drop when the response stream is abandoned mid-flight (client disconnect).
struct RecordGuard {
	interactions: Option<Arc<dyn InteractionStore>>,
	metrics: Arc<Metrics>,
	ctx: Option<RecordContext>,
	stream: Option<SharedStream>,
	completed: bool,
	refusal: Option<Strng>,
}

impl RecordGuard {
	fn finish(&mut self, response: Value, usage: Option<TokenUsage>, refusal: Option<Strng>) {
		self.completed = true;
		self.refusal = refusal.or(self.refusal.take());
		self.write(response, usage);
	}

	/// Terminal bookkeeping for streams: reads whatever the accumulator holds, which is
	/// also correct for partial streams.
	fn finish_from_stream(&mut self) {
		self.completed = true;
		let (response, usage) = self.stream_snapshot();
		self.write(response, usage);
	}

	fn stream_snapshot(&self) -> (Value, Option<TokenUsage>) {
		let Some(stream) = &self.stream else {
			return (Value::Null, None);
		};
		let stream = stream.lock();
		let acc = stream.accumulator();
		let response = serde_json::json!({
			"id": acc.response_id,
			"model": acc.model,
			"text": acc.text,
			"tool_calls": acc.tool_calls,
			"stop_reason": acc.stop_reason,
		});
		(response, acc.usage)
	}

	fn write(&mut self, response: Value, usage: Option<TokenUsage>) {
		let Some(ctx) = self.ctx.take() else {
			return;
		};
		let Some(interactions) = self.interactions.take() else {
			return;
		};
		let input_tokens = usage.map(|u| u.input_tokens);
		let output_tokens = usage.map(|u| u.output_tokens);
		let record = InteractionRecord {
			profile_id: ctx.profile_id,
			external_agent_id: ctx.external_agent_id,
			execution_id: ctx.execution_id,
			user_id: ctx.user_id,
			session_id: ctx.session_id,
			session_source: ctx.session_source,
			interaction_type: strng::literal!("chat"),
			request: ctx.request,
			processed_request: ctx.processed_request,
			response,
			model: ctx.model,
			baseline_model: ctx.baseline_model,
			input_tokens,
			output_tokens,
			cost: cost::calculate(ctx.price.as_ref(), input_tokens, output_tokens),
			baseline_cost: cost::calculate(ctx.baseline_price.as_ref(), input_tokens, output_tokens),
			toon_tokens_before: ctx.toon.tokens_before,
			toon_tokens_after: ctx.toon.tokens_after,
			toon_cost_savings: ctx.toon.cost_savings,
			toon_skip_reason: ctx.toon_skip.map(|s| strng::new(s.as_str())),
			context_is_trusted: ctx.context_is_trusted,
			refusal_reason: self.refusal.take(),
		};
		tokio::spawn(async move {
			if let Err(e) = interactions.record(record).await {
				tracing::error!("failed to write interaction record: {e}");
			}
		});
	}
}

impl Drop for RecordGuard {
	fn drop(&mut self) {
		if self.ctx.is_none() {
			return;
		}
		// The stream was dropped before its end: client disconnect or task abort.
		if !self.completed {
			if let Some(ctx) = &self.ctx {
				self
					.metrics
					.interrupted_streams
					.get_or_create(&Metrics::labels(&ctx.provider))
					.inc();
			}
		}
		let (response, usage) = self.stream_snapshot();
		self.write(response, usage);
	}
}
