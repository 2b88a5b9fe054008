//! Process entry point: loads config from the environment, wires every
//! component, and serves the gateway's HTTP surface plus a separate admin
//! listener for `/health`, `/ready`, and `/metrics`.

use clap::Parser;
use gatekeeper::adapter::chaos::ChaosAdapter;
use gatekeeper::adapter::live::LiveAdapter;
use gatekeeper::adapter::mock::MockAdapter;
use gatekeeper::adapter::Adapter;
use gatekeeper::breaker::{CircuitBreaker, Params as BreakerParams};
use gatekeeper::cache::ResponseCache;
use gatekeeper::config::{Config, UpstreamMode};
use gatekeeper::idempotency::IdempotencyStore;
use gatekeeper::metrics::Metrics;
use gatekeeper::policy::PolicyEngine;
use gatekeeper::ratelimit::RateLimiter;
use gatekeeper::retry::{Params as RetryParams, RetryExecutor};
use gatekeeper::secrets::EnvSecretProvider;
use gatekeeper::store::memory::MemoryStore;
use gatekeeper::store::Store;
use gatekeeper::telemetry::{SseBroker, TracingTelemetrySink};
use gatekeeper::token::cipher;
use gatekeeper::token::TokenService;
use gatekeeper::{admin_router, api_router, router, GatewayState};
use secrecy::ExposeSecret;
use std::process::ExitCode;
use std::sync::Arc;
use tower_http::cors::CorsLayer;

#[derive(Parser)]
#[command(name = "gatekeeper", about = "Zero-trust API gateway for autonomous agents", version)]
struct Args {
	/// Address the main HTTP surface binds to.
	#[arg(long, default_value = "0.0.0.0:8080")]
	addr: String,

	/// Address the admin surface (/health, /ready, /metrics) binds to.
	/// Served on the same router as `addr` when omitted.
	#[arg(long)]
	admin_addr: Option<String>,

	/// Load and validate config, print the result, then exit without serving.
	#[arg(long)]
	config_check: bool,
}

fn main() -> ExitCode {
	let args = Args::parse();

	tracing_subscriber::fmt()
		.with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
		.init();

	let config = match Config::from_env() {
		Ok(c) => c,
		Err(err) => {
			tracing::error!(target: "audit", %err, "config load failed");
			return ExitCode::from(1);
		},
	};

	if args.config_check {
		tracing::info!("config ok: upstream_mode={:?} flags={:?}", config.upstream_mode, config.flags);
		return ExitCode::SUCCESS;
	}

	let runtime = match tokio::runtime::Builder::new_multi_thread().enable_all().build() {
		Ok(rt) => rt,
		Err(err) => {
			eprintln!("failed to start tokio runtime: {err}");
			return ExitCode::from(2);
		},
	};

	runtime.block_on(run(args, config))
}

async fn run(args: Args, config: Config) -> ExitCode {
	let state = match build_state(config).await {
		Ok(s) => s,
		Err(err) => {
			tracing::error!(target: "audit", %err, "failed to initialize gateway state");
			return ExitCode::from(1);
		},
	};

	let (trigger, watcher) = gatekeeper_core::signal::new();
	trigger.spawn_signal_handler();

	let main_app = match &args.admin_addr {
		Some(_) => api_router(state.clone()),
		None => router(state.clone()),
	}
	.layer(CorsLayer::permissive());
	let main_listener = match tokio::net::TcpListener::bind(&args.addr).await {
		Ok(l) => l,
		Err(err) => {
			tracing::error!(target: "audit", addr = %args.addr, %err, "failed to bind");
			return ExitCode::from(2);
		},
	};
	tracing::info!(addr = %args.addr, "gatekeeper listening");
	let mut main_watcher = watcher.clone();
	let main_serve = axum::serve(main_listener, main_app).with_graceful_shutdown(async move {
		main_watcher.signaled().await;
	});

	let admin_serve = match &args.admin_addr {
		None => None,
		Some(admin_addr) => {
			let admin_listener = match tokio::net::TcpListener::bind(admin_addr).await {
				Ok(l) => l,
				Err(err) => {
					tracing::error!(target: "audit", addr = %admin_addr, %err, "failed to bind admin listener");
					return ExitCode::from(2);
				},
			};
			tracing::info!(addr = %admin_addr, "admin surface listening");
			let mut admin_watcher = watcher.clone();
			Some(axum::serve(admin_listener, admin_router(state)).with_graceful_shutdown(async move {
				admin_watcher.signaled().await;
			}))
		},
	};

	let result = match admin_serve {
		Some(admin_serve) => {
			let (main_result, admin_result) = tokio::join!(main_serve, admin_serve);
			main_result.and(admin_result)
		},
		None => main_serve.await,
	};

	if let Err(err) = result {
		tracing::error!(target: "audit", %err, "server exited with an error");
		return ExitCode::from(1);
	}

	ExitCode::SUCCESS
}

async fn build_state(config: Config) -> anyhow::Result<Arc<GatewayState>> {
	let store: Arc<dyn Store> = Arc::new(MemoryStore::new());
	let metrics = Arc::new(Metrics::new());

	let gateway_private_key = cipher::private_key_from_pem(config.gateway_private_key_pem.expose_secret())?;

	let tokens = Arc::new(TokenService::new(
		store.clone(),
		metrics.clone(),
		gateway_private_key,
		config.signing_secret.clone(),
		config.signing_secret_previous.clone(),
		config.max_token_lifetime,
		config.rotation_threshold,
	));

	let adapter: Arc<dyn Adapter> = build_adapter(&config);

	Ok(Arc::new(GatewayState {
		store: store.clone(),
		tokens,
		policy: Arc::new(PolicyEngine::new(store.clone())),
		rate_limiter: Arc::new(RateLimiter::new(config.rate_limit_per_minute)),
		idempotency: Arc::new(IdempotencyStore::new(std::time::Duration::from_secs(24 * 60 * 60), metrics.clone())),
		cache: Arc::new(ResponseCache::new(10_000, config.flags.cache)),
		breaker: Arc::new(CircuitBreaker::new(config.flags.breakers, BreakerParams::default(), metrics.clone())),
		retry: Arc::new(RetryExecutor::new(config.flags.retry, RetryParams::default(), metrics.clone())),
		adapter,
		secrets: Arc::new(EnvSecretProvider),
		metrics,
		sse: Arc::new(SseBroker::new()),
		telemetry: Arc::new(TracingTelemetrySink),
		config,
		build: gatekeeper_core::build::BuildInfo::current(),
	}))
}

fn build_adapter(config: &Config) -> Arc<dyn Adapter> {
	let base: Arc<dyn Adapter> = match config.upstream_mode {
		UpstreamMode::Mock => Arc::new(MockAdapter::new()),
		UpstreamMode::Live => Arc::new(LiveAdapter::new(reqwest::Client::new(), Default::default())),
	};
	if !config.flags.chaos {
		return base;
	}
	// Chaos can only wrap a concrete adapter, not a trait object, so the
	// underlying adapter is rebuilt here rather than wrapping `base`.
	match config.upstream_mode {
		UpstreamMode::Mock => Arc::new(ChaosAdapter::new(MockAdapter::new(), config.chaos)),
		UpstreamMode::Live => Arc::new(ChaosAdapter::new(
			LiveAdapter::new(reqwest::Client::new(), Default::default()),
			config.chaos,
		)),
	}
}
