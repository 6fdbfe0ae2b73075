use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tracing_subscriber::EnvFilter;

use dirac_base_client::{
	default_registry, global_transport_pool, CallContext, Client, ClientOptions, ConfigView,
	NoSecurityHelper, YamlConfig,
};

/// Opens a connection to a DIRAC-style RPC service and proposes one action,
/// printing the server's response. Mirrors how a DIRAC client script would
/// exercise `BaseClient` from the command line.
#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
struct Args {
	/// Logical service name (e.g. "Framework/Notification") or an
	/// already-qualified URL.
	service: String,

	/// Action to propose to the service once connected.
	#[arg(short, long, default_value = "ping")]
	action: String,

	/// YAML configuration file providing /DIRAC/... and /Systems/... paths.
	#[arg(short, long, value_name = "file")]
	config: std::path::PathBuf,

	/// Site name this client runs from, used for gateway lookup.
	#[arg(long, default_value = "Unknown")]
	site: String,

	/// Override the deployment setup instead of reading it from config.
	#[arg(long)]
	setup: Option<String>,

	/// Override the virtual organization.
	#[arg(long)]
	vo: Option<String>,

	/// Act under the host/server certificate identity.
	#[arg(long)]
	use_certificates: bool,

	/// Bypass the site gateway even if one is configured.
	#[arg(long)]
	ignore_gateways: bool,

	/// Request timeout in seconds (clamped to >= 120).
	#[arg(long)]
	timeout: Option<u64>,
}

#[tokio::main]
async fn main() -> Result<()> {
	tracing_subscriber::fmt()
		.with_env_filter(EnvFilter::from_default_env().add_directive(tracing::Level::INFO.into()))
		.with_writer(std::io::stderr)
		.with_ansi(false)
		.init();

	let args = Args::parse();

	let yaml = tokio::fs::read_to_string(&args.config)
		.await
		.with_context(|| format!("reading config file {}", args.config.display()))?;
	let config: Arc<dyn ConfigView> = Arc::new(
		YamlConfig::from_str(&yaml, args.site)
			.with_context(|| format!("parsing config file {}", args.config.display()))?,
	);

	let options = ClientOptions {
		setup: args.setup,
		vo: args.vo,
		use_certificates: args.use_certificates.then_some(true),
		ignore_gateways: args.ignore_gateways,
		timeout: args.timeout,
		..Default::default()
	};

	let ctx = CallContext::new();
	let client = Client::new(
		args.service,
		options,
		&ctx,
		config,
		default_registry(),
		global_transport_pool(),
		Arc::new(NoSecurityHelper),
	)
	.await;

	let conn = client
		.connect(&ctx)
		.await
		.context("connecting to service")?;
	tracing::info!(url = %conn.tuple, "connected");

	let response = client
		.propose_action(&conn, &args.action)
		.await
		.context("proposing action")?;
	println!("{}", serde_json::to_string_pretty(&response)?);

	client.disconnect(conn).await;
	Ok(())
}
