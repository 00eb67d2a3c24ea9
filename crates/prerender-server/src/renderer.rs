//! The render orchestrator.
//!
//! One [`Renderer`] lives for the whole process and drives every render
//! through the same state machine:
//!
//! ```text
//! RECEIVED → VALIDATED → FETCHING → CONTEXT_READY → AWAITING_RENDER → RESPONDED
//!                │            │               │             │
//!                └──400───────┴──500──────────┴─────500─────┘
//! ```
//!
//! Validation failures surface as input errors (400). A package fetch that
//! exhausts its retries is logged as `FETCH FAIL (<location>)`; sandbox
//! failures and render timeouts as `RENDER FAIL (<location>)`; both map to
//! 500. Every path emits the request's stats line and decrements the
//! pending-render gauge; the sandbox is closed on every path, including
//! cancellation (the context closes itself on drop).

use bytes::Bytes;
use prerender_common::protocol::{RenderBody, RenderError, RenderResult, Result, ValidatedRender};
use std::sync::Arc;
use url::Url;

use crate::cache::PackageCache;
use crate::config::RenderLimits;
use crate::runtime::{ContextArgs, RenderContext};
use crate::stats::{PendingRenders, RequestStats};

pub struct Renderer {
    cache: Arc<PackageCache>,
    http: reqwest::Client,
    limits: RenderLimits,
    pending: Arc<PendingRenders>,
}

impl Renderer {
    pub fn new(cache: Arc<PackageCache>, http: reqwest::Client, limits: RenderLimits) -> Self {
        Self {
            cache,
            http,
            limits,
            pending: Arc::new(PendingRenders::new()),
        }
    }

    pub fn pending(&self) -> &Arc<PendingRenders> {
        &self.pending
    }

    pub fn cache(&self) -> &Arc<PackageCache> {
        &self.cache
    }

    /// Runs one render request through the full pipeline.
    ///
    /// The secret check is the HTTP layer's concern and has already
    /// happened by the time a body reaches this method.
    pub async fn render(&self, body: RenderBody) -> Result<RenderResult> {
        let _guard = self.pending.enter();

        let validated = body.validate()?;
        let stats = Arc::new(RequestStats::new(self.pending.current()));
        let entry = validated.entry.clone();
        let location = validated.location.clone();

        let result = self.run_pipeline(validated, &stats).await;

        match serde_json::to_string(&stats.snapshot()) {
            Ok(stats_json) => tracing::info!("render-stats for {}: {}", entry, stats_json),
            Err(e) => tracing::warn!("failed to serialize render stats: {}", e),
        }

        match &result {
            Err(err @ RenderError::Fetch(_)) => {
                tracing::error!("FETCH FAIL ({}): {}", location, err);
            }
            Err(err) if !err.is_input_error() => {
                tracing::error!("RENDER FAIL ({}): {}", location, err);
            }
            _ => {}
        }

        result
    }

    async fn run_pipeline(
        &self,
        validated: ValidatedRender,
        stats: &Arc<RequestStats>,
    ) -> Result<RenderResult> {
        // The cache is a per-render hot set; sweep before fetching.
        self.cache.flush_unused();

        let fetches = validated
            .js_urls
            .iter()
            .map(|url| self.cache.get_or_fetch(url, stats));
        let bodies = futures::future::try_join_all(fetches).await?;

        let packages: Vec<(Url, Bytes)> = validated
            .js_urls
            .iter()
            .cloned()
            .zip(bodies.into_iter().map(|(content, _)| content))
            .collect();

        // From here on execution is synchronous: the sandbox cannot be held
        // across an await. The render deadline is enforced inside the job
        // loop.
        let mut context = RenderContext::build(ContextArgs {
            location: validated.location,
            globals: validated.globals,
            packages,
            graphql: validated.graphql,
            graphql_timeout: self.limits.graphql_timeout,
            cache: Arc::clone(&self.cache),
            stats: Arc::clone(stats),
            http: self.http.clone(),
        })?;

        let outcome = context.render(&validated.props, self.limits.render_timeout);
        context.close();
        outcome
    }
}
