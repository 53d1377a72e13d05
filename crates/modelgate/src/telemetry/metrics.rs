use prometheus_client::encoding::EncodeLabelSet;
use prometheus_client::metrics::counter::Counter;
use prometheus_client::metrics::family::Family;
use prometheus_client::metrics::histogram::{Histogram, exponential_buckets};
use prometheus_client::registry::Registry;

#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
pub struct ProviderLabels {
	pub provider: String,
}

#[derive(Debug)]
pub struct Metrics {
	/// Requests entering the chat pipeline.
	pub requests: Family<ProviderLabels, Counter>,
	/// Wall time of the upstream HTTP exchange, headers to last byte.
	pub upstream_duration: Family<ProviderLabels, Histogram>,
	/// Responses where the tool policy refused the proposed tool calls.
	pub blocked_tools: Family<ProviderLabels, Counter>,
	/// Streams terminated before the provider's end-of-stream marker.
	pub interrupted_streams: Family<ProviderLabels, Counter>,
}

impl Metrics {
	pub fn new(registry: &mut Registry) -> Self {
		let requests = Family::<ProviderLabels, Counter>::default();
		registry.register(
			"gateway_requests",
			"Requests entering the chat pipeline",
			requests.clone(),
		);
		let upstream_duration = Family::<ProviderLabels, Histogram>::new_with_constructor(|| {
			Histogram::new(exponential_buckets(0.025, 2.0, 12))
		});
		registry.register(
			"upstream_request_duration_seconds",
			"Duration of upstream LLM provider requests",
			upstream_duration.clone(),
		);
		let blocked_tools = Family::<ProviderLabels, Counter>::default();
		registry.register(
			"blocked_tools",
			"Responses refused by the tool invocation policy",
			blocked_tools.clone(),
		);
		let interrupted_streams = Family::<ProviderLabels, Counter>::default();
		registry.register(
			"interrupted_streams",
			"Streams terminated before completion",
			interrupted_streams.clone(),
		);
		Metrics {
			requests,
			upstream_duration,
			blocked_tools,
			interrupted_streams,
		}
	}

	pub fn labels(provider: &str) -> ProviderLabels {
		ProviderLabels {
			provider: provider.to_string(),
		}
	}
}
