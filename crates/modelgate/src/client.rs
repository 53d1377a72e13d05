//! Upstream HTTP client.
//!
//! One shared hyper client with rustls drives every provider dispatch, including the
//! auxiliary dual-LLM calls. Each exchange records an upstream request-duration metric
//! (to response headers; streamed bodies keep flowing afterwards).

use std::sync::Arc;
use std::time::Instant;

use hyper_util::client::legacy::Client as HyperClient;
use hyper_util::client::legacy::connect::HttpConnector;
use hyper_util::rt::TokioExecutor;

use crate::http::{Body, Request, Response};
use crate::telemetry::metrics::Metrics;

#[derive(Clone)]
pub struct Client {
	inner: HyperClient<hyper_rustls::HttpsConnector<HttpConnector>, Body>,
	metrics: Arc<Metrics>,
}

impl Client {
	pub fn new(metrics: Arc<Metrics>) -> anyhow::Result<Client> {
		let https = hyper_rustls::HttpsConnectorBuilder::new()
			.with_native_roots()?
			.https_or_http()
			.enable_http1()
			.build();
		let inner = HyperClient::builder(TokioExecutor::new()).build(https);
		Ok(Client { inner, metrics })
	}

	pub async fn call(&self, provider: &str, req: Request) -> anyhow::Result<Response> {
		let start = Instant::now();
		let result = self.inner.request(req).await;
		self
			.metrics
			.upstream_duration
			.get_or_create(&Metrics::labels(provider))
			.observe(start.elapsed().as_secs_f64());
		match result {
			Ok(resp) => Ok(resp.map(Body::new)),
			Err(e) => Err(anyhow::anyhow!("upstream request failed: {e}")),
		}
	}
}
