//! # Prerender CLI Entry Point
//!
//! Main binary for the prerender service: a server that fetches JavaScript
//! component bundles, executes them in an isolated sandbox and returns the
//! rendered HTML and stylesheet as JSON.
//!
//! ## Usage
//!
//! ```bash
//! # Production: shared-secret check against a secret file
//! prerender --port 3000 --secret-file /etc/prerender/secret
//!
//! # Development: skip the secret check
//! prerender --dev --port 3000 --log-level debug
//! ```
//!
//! The environment variables `GAE_VERSION` and `GAE_INSTANCE` surface in the
//! `/_api/version` and `/flush` responses respectively.

use anyhow::{Result, bail};
use argh::FromArgs;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use prerender_common::secret::SecretStore;
use prerender_server::config::{FetcherConfig, RenderLimits};
use prerender_server::{HttpFetcher, HttpServer, PackageCache, Renderer, ServerState};

/// prerender - server-side rendering service
#[derive(FromArgs)]
struct Cli {
    /// port to bind the HTTP server to
    ///
    /// Defaults to 3000.
    #[argh(option, short = 'p', default = "3000")]
    port: u16,

    /// address to bind on
    ///
    /// Defaults to "0.0.0.0".
    #[argh(option, default = "String::from(\"0.0.0.0\")")]
    bind: String,

    /// run in dev mode: the shared-secret check is skipped
    #[argh(switch)]
    dev: bool,

    /// path to the shared-secret file
    ///
    /// Required unless --dev is set. Upstream servers must send the file's
    /// content as `secret` in every render body.
    #[argh(option, long = "secret-file")]
    secret_file: Option<PathBuf>,

    /// log level filter (error, warn, info, debug, trace)
    ///
    /// RUST_LOG overrides this when set. Defaults to "info".
    #[argh(option, long = "log-level", default = "String::from(\"info\")")]
    log_level: String,

    /// total fetch attempts per package, including the first
    ///
    /// Defaults to 3.
    #[argh(option, long = "fetch-attempts", default = "3")]
    fetch_attempts: u32,

    /// timeout for each fetch attempt in milliseconds
    ///
    /// Defaults to 60000ms (60 seconds).
    #[argh(option, long = "fetch-timeout-ms", default = "60000")]
    fetch_timeout_ms: u64,

    /// upper bound on the awaited render promise in milliseconds
    ///
    /// Defaults to 30000ms (30 seconds).
    #[argh(option, long = "render-timeout-ms", default = "30000")]
    render_timeout_ms: u64,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli: Cli = argh::from_env();

    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(cli.log_level.clone()));
    tracing_subscriber::fmt().with_env_filter(env_filter).init();

    let secrets = if cli.dev {
        tracing::warn!("dev mode: the shared-secret check is disabled");
        SecretStore::dev()
    } else {
        match &cli.secret_file {
            Some(path) => SecretStore::from_file(path),
            None => bail!("--secret-file is required unless --dev is set"),
        }
    };

    let fetcher_config = FetcherConfig::new()
        .with_attempts(cli.fetch_attempts)
        .with_attempt_timeout(Duration::from_millis(cli.fetch_timeout_ms));
    if let Err(message) = fetcher_config.validate() {
        bail!("invalid fetch configuration: {}", message);
    }

    let limits = RenderLimits::new()
        .with_render_timeout(Duration::from_millis(cli.render_timeout_ms));
    if let Err(message) = limits.validate() {
        bail!("invalid render configuration: {}", message);
    }

    // One HTTP client per process: it is the keep-alive connection pool for
    // package fetches and GraphQL requests alike.
    let http = reqwest::Client::new();
    let fetcher = HttpFetcher::new(http.clone(), fetcher_config);
    let cache = Arc::new(PackageCache::new(Arc::new(fetcher)));
    let renderer = Renderer::new(cache, http, limits);

    let addr: SocketAddr = format!("{}:{}", cli.bind, cli.port)
        .parse()
        .map_err(|e| anyhow::anyhow!("invalid bind address: {}", e))?;

    let server = HttpServer::new(Arc::new(ServerState { renderer, secrets }));
    server.run(addr).await?;

    Ok(())
}
