use std::sync::Arc;

use anyhow::Result;
use clap::Parser;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use resilient_gateway::{
    breaker::CircuitBreaker,
    clock::SystemClock,
    config::Config,
    limiter::RateLimiter,
    proxy::ProxyPipeline,
    store::RedisStore,
    web::WebServer,
};

#[derive(Parser)]
#[command(name = "resilient-gateway")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Resilient HTTP reverse proxy with a shared rate limiter and circuit breaker")]
struct Cli {
    /// Listening IP address
    #[arg(short = 'H', long, value_name = "IP", default_value = "0.0.0.0")]
    host: String,

    /// Listening port (overrides PORT)
    #[arg(short, long, value_name = "PORT")]
    port: Option<u16>,

    /// Upstream base URL (overrides UPSTREAM_URL)
    #[arg(short = 'u', long, value_name = "URL")]
    upstream_url: Option<String>,

    /// Log level
    #[arg(short = 'v', long, default_value = "info")]
    log_level: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let log_filter = format!("resilient_gateway={}", cli.log_level);
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| log_filter.into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting Resilient API Gateway v{}", env!("CARGO_PKG_VERSION"));

    let mut config = Config::load()?;
    if let Some(port) = cli.port {
        config.port = port;
    }
    if let Some(upstream_url) = cli.upstream_url {
        config.upstream_url = upstream_url;
    }
    info!("Configuration loaded; upstream: {}", config.upstream_url);

    let store = Arc::new(RedisStore::connect(&config.redis_host, config.redis_port).await?);
    info!("Connected to shared state store at {}:{}", config.redis_host, config.redis_port);

    let clock = Arc::new(SystemClock);

    let limiter = RateLimiter::new(
        store.clone(),
        clock.clone(),
        config.rate_limit_capacity,
        config.rate_limit_refill_rate,
    );
    let breaker = CircuitBreaker::new(
        store,
        clock,
        config.circuit_breaker_failure_threshold,
        config.circuit_breaker_reset_timeout_seconds,
        config.circuit_breaker_half_open_success_threshold,
    );
    let pipeline = Arc::new(ProxyPipeline::new(limiter, breaker, config.upstream_url));

    let web_server = WebServer::new(&cli.host, config.port, pipeline)?;

    info!("Listening on {}:{}", web_server.host(), web_server.port());
    web_server.serve().await?;

    Ok(())
}
