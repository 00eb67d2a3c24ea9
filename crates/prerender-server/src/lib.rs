//! Prerender Server
//!
//! This crate implements the render pipeline and HTTP surface of the
//! prerender service.
//!
//! # Architecture
//!
//! A render request names a list of JavaScript package URLs (dependency
//! order, last one is the entry point), a props object and optional globals.
//! The pipeline:
//!
//! 1. validates the input ([`renderer`])
//! 2. sweeps and fills the package cache, fetching misses in parallel with
//!    single-flight coalescing ([`cache`], [`fetcher`])
//! 3. builds a fresh sandbox, installs globals and executes the packages in
//!    order ([`runtime`])
//! 4. invokes the callback the entry point registered, awaits `{html, css}`
//!    under a deadline, harvests and responds
//!
//! # Thread Safety
//!
//! Each request builds its own sandbox; sandboxes never cross threads and
//! never outlive their request. The package cache is the only shared
//! mutable state.
//!
//! # Main Components
//!
//! - [`http_server::HttpServer`] - accept loop and routing
//! - [`renderer::Renderer`] - the per-request orchestrator
//! - [`cache::PackageCache`] - single-flight package store
//! - [`runtime::RenderContext`] - the sandbox wrapper

pub mod cache;
pub mod config;
pub mod fetcher;
pub mod http_server;
pub mod renderer;
pub mod runtime;
pub mod stats;

pub use cache::PackageCache;
pub use config::{FetcherConfig, RenderLimits};
pub use fetcher::{HttpFetcher, PackageSource};
pub use http_server::{HttpServer, ServerState};
pub use renderer::Renderer;
pub use runtime::RenderContext;
