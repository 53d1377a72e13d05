use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use modelgate::client::Client;
use modelgate::proxy::{Gateway, router};
use modelgate::store::MemoryStores;
use modelgate::telemetry::metrics::Metrics;
use modelgate::{Config, RawConfig};
use prometheus_client::registry::Registry;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "modelgate", about = "Policy-enforcing LLM gateway")]
struct Args {
	/// Path to a yaml config file. Defaults apply when omitted.
	#[arg(short, long)]
	config: Option<PathBuf>,

	/// Listen address.
	#[arg(short, long, default_value = "127.0.0.1:8080")]
	address: SocketAddr,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
	tracing_subscriber::fmt()
		.with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
		.init();

	let args = Args::parse();
	let raw: RawConfig = match &args.config {
		Some(path) => serde_yaml::from_str(&std::fs::read_to_string(path)?)?,
		None => RawConfig::default(),
	};
	let config = Arc::new(Config::from_raw(raw));

	// Tokenizers take a moment to build; do it before traffic arrives.
	tokio::task::spawn_blocking(modelgate::llm::preload_tokenizers);

	let mut registry = Registry::default();
	let metrics = Arc::new(Metrics::new(&mut registry));
	let client = Client::new(metrics.clone())?;
	let stores = MemoryStores::default();
	let gateway = Arc::new(Gateway::new(
		config,
		stores.stores(),
		client,
		metrics,
	));

	let listener = tokio::net::TcpListener::bind(args.address).await?;
	tracing::info!("listening on {}", args.address);
	axum::serve(listener, router(gateway)).await?;
	Ok(())
}
