//! The per-request render context.
//!
//! A [`RenderContext`] wraps one boa `Context` prepared for a single render:
//! bootstrap prelude evaluated, host bindings installed, request globals
//! copied in and every package executed in list order. The orchestrator then
//! invokes the callback the entry point registered via `__registerForSSR__`
//! and drives the job queues until the render promise settles or the
//! deadline passes.
//!
//! # Thread Safety
//!
//! Boa's `Context` has thread-local state and is not thread-safe. The
//! `ThreadNotSendSync` marker makes the whole wrapper `!Send` and `!Sync` at
//! the type level, so a context can never migrate off the thread that
//! created it. Each request builds its own fresh context; contexts are never
//! shared or reused.
//!
//! # Lifecycle
//!
//! NEW → LOADED → RENDERING → CLOSED, exactly once. `close()` is idempotent
//! and also runs on drop, which covers cancellation: a request task dropped
//! mid-render still flips `__SSR_ACTIVE__` off and closes the resource
//! loader.

use boa_engine::builtins::promise::PromiseState;
use boa_engine::object::builtins::JsPromise;
use boa_engine::{Context, Source, js_string, value::JsValue};
use bytes::Bytes;
use prerender_common::protocol::{GraphqlNetwork, RenderError, RenderResult, Result};
use serde_json::{Map, Value};
use std::marker::PhantomData;
use std::rc::Rc;
use std::sync::Arc;
use std::time::{Duration, Instant};
use url::Url;

use crate::cache::PackageCache;
use crate::runtime::bindings::{self, ConsoleOutput, SandboxHooks};
use crate::runtime::conversions::{js_to_json, json_to_js};
use crate::runtime::executor::{DrainOutcome, SandboxJobExecutor};
use crate::runtime::{graphql, resources};
use crate::stats::RequestStats;

const BOOTSTRAP: &str = include_str!("bootstrap.js");

/// Zero-sized marker that is `!Send` and `!Sync`, preventing the context
/// from crossing threads.
struct ThreadNotSendSync {
    _marker: PhantomData<Rc<()>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContextState {
    New,
    Loaded,
    Rendering,
    Closed,
}

/// Everything the factory needs to assemble one sandbox.
pub struct ContextArgs {
    /// Base URL of the sandbox; authoritative over any request global
    pub location: Url,
    /// Request globals copied into the sandbox namespace
    pub globals: Map<String, Value>,
    /// Packages in execution order, each attributed to its source URL
    pub packages: Vec<(Url, Bytes)>,
    pub graphql: Option<GraphqlNetwork>,
    pub graphql_timeout: Duration,
    pub cache: Arc<PackageCache>,
    pub stats: Arc<RequestStats>,
    pub http: reqwest::Client,
}

pub struct RenderContext {
    _thread_marker: ThreadNotSendSync,
    ctx: Context,
    executor: Rc<SandboxJobExecutor>,
    hooks: Arc<SandboxHooks>,
    state: ContextState,
    vm_context_size: u64,
    has_graphql: bool,
}

impl RenderContext {
    /// Builds a sandbox and executes every package in it.
    ///
    /// On return the context is LOADED: the entry point has run and, if it
    /// behaves, has registered its render callback.
    pub fn build(args: ContextArgs) -> Result<Self> {
        let executor = Rc::new(SandboxJobExecutor::new());
        let ctx = Context::builder()
            .job_executor(executor.clone())
            .build()
            .map_err(|e| RenderError::Sandbox(format!("failed to build sandbox: {}", e)))?;

        let hooks = SandboxHooks::new(args.cache, Arc::clone(&args.stats));
        let mut context = Self {
            _thread_marker: ThreadNotSendSync {
                _marker: PhantomData,
            },
            ctx,
            executor,
            hooks,
            state: ContextState::New,
            vm_context_size: 0,
            has_graphql: args.graphql.is_some(),
        };

        bindings::install_console(&mut context.ctx, &context.hooks)?;
        resources::install(&mut context.ctx, &context.hooks)?;
        bindings::install_location(&mut context.ctx, &args.location)?;

        context
            .ctx
            .eval(Source::from_bytes(BOOTSTRAP))
            .map_err(|e| RenderError::Sandbox(format!("failed to evaluate prelude: {}", e)))?;

        if let Some(graphql_config) = &args.graphql {
            graphql::install(
                &mut context.ctx,
                graphql_config,
                args.http.clone(),
                args.graphql_timeout,
            )?;
        }

        bindings::install_globals(&mut context.ctx, &args.globals)?;

        for (url, content) in &args.packages {
            context
                .ctx
                .eval(Source::from_bytes(&content[..]))
                .map_err(|e| {
                    RenderError::Sandbox(format!("error evaluating {}: {}", url, e))
                })?;
            // Two bytes per source byte: a crude stand-in for the engine's
            // string representation, kept for stats-line compatibility. Not
            // a real memory measurement.
            context.vm_context_size += content.len() as u64 * 2;
        }

        args.stats.record_vm_context(context.vm_context_size);
        context.state = ContextState::Loaded;
        Ok(context)
    }

    /// Invokes the registered render callback with `(props, graphqlClient)`
    /// and drives the sandbox until its promise settles, bounded by
    /// `timeout`.
    pub fn render(&mut self, props: &Value, timeout: Duration) -> Result<RenderResult> {
        if self.state != ContextState::Loaded {
            return Err(RenderError::Sandbox(format!(
                "render is not valid in context state {:?}",
                self.state
            )));
        }
        self.state = ContextState::Rendering;

        let global = self.ctx.global_object();
        let rrs = global
            .get(js_string!("__rrs"), &mut self.ctx)
            .map_err(|e| RenderError::Sandbox(e.to_string()))?;
        let rrs = rrs
            .as_object()
            .ok_or_else(|| RenderError::Sandbox("__rrs is missing from the sandbox".into()))?;

        let callback = rrs
            .get(js_string!("getRenderPromiseCallback"), &mut self.ctx)
            .map_err(|e| RenderError::Sandbox(e.to_string()))?;
        if callback.is_undefined() {
            return Err(RenderError::Sandbox(
                "entry point never called __registerForSSR__".into(),
            ));
        }
        let callback = callback
            .as_object()
            .filter(|o| o.is_callable())
            .ok_or_else(|| {
                RenderError::Sandbox("registered render callback is not a function".into())
            })?;

        let client = if self.has_graphql {
            let graphql = rrs
                .get(js_string!("graphql"), &mut self.ctx)
                .map_err(|e| RenderError::Sandbox(e.to_string()))?;
            match graphql.as_object() {
                Some(graphql) => graphql
                    .get(js_string!("client"), &mut self.ctx)
                    .map_err(|e| RenderError::Sandbox(e.to_string()))?,
                None => JsValue::null(),
            }
        } else {
            JsValue::null()
        };

        let props_js = json_to_js(props, &mut self.ctx)?;
        let value = callback
            .call(&JsValue::undefined(), &[props_js, client], &mut self.ctx)
            .map_err(|e| RenderError::Sandbox(format!("render callback threw: {}", e)))?;

        let deadline = Instant::now() + timeout;
        let settled = match value.as_object().map(|o| JsPromise::from_object(o.clone())) {
            Some(Ok(promise)) => {
                let outcome = self
                    .executor
                    .run_jobs_with_deadline(&mut self.ctx, deadline);
                match promise.state() {
                    PromiseState::Fulfilled(settled) => settled,
                    PromiseState::Rejected(reason) => {
                        let reason = match reason.as_string() {
                            Some(s) => s.to_std_string_escaped(),
                            None => format!("{:?}", reason),
                        };
                        return Err(RenderError::Sandbox(format!(
                            "render promise rejected: {}",
                            reason
                        )));
                    }
                    PromiseState::Pending => {
                        return Err(match outcome {
                            DrainOutcome::DeadlineExceeded => {
                                RenderError::RenderTimeout(timeout.as_millis() as u64)
                            }
                            DrainOutcome::Completed => RenderError::Sandbox(
                                "render promise never settled".into(),
                            ),
                        });
                    }
                }
            }
            _ => {
                // A synchronous result is unusual but accepted; drain any
                // microtasks the callback queued.
                let _ = self
                    .executor
                    .run_jobs_with_deadline(&mut self.ctx, deadline);
                value
            }
        };

        let harvested = js_to_json(&settled, &mut self.ctx)?;
        serde_json::from_value(harvested)
            .map_err(|e| RenderError::Sandbox(format!("render result has unexpected shape: {}", e)))
    }

    /// Tears the sandbox down: deactivates the SSR flag (so gated timers
    /// drop their callbacks), closes the resource loader and marks the
    /// context CLOSED. Idempotent; also runs on drop.
    pub fn close(&mut self) {
        if self.state == ContextState::Closed {
            return;
        }
        self.state = ContextState::Closed;

        let global = self.ctx.global_object();
        let _ = global.set(
            js_string!("__SSR_ACTIVE__"),
            JsValue::new(false),
            false,
            &mut self.ctx,
        );
        self.hooks.resources.close();
    }

    pub fn state(&self) -> ContextState {
        self.state
    }

    pub fn vm_context_size(&self) -> u64 {
        self.vm_context_size
    }

    pub fn console_output(&self) -> ConsoleOutput {
        self.hooks.console_output()
    }
}

impl Drop for RenderContext {
    fn drop(&mut self) {
        self.close();
    }
}
