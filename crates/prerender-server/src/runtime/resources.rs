//! Outbound resource loading for the sandbox.
//!
//! The DOM shim funnels every resource request (images, runtime script
//! loads, data fetches) through the `__loadResource__` binding installed
//! here:
//!
//! - **Images** are always rejected with "blocked". Component bundles probe
//!   for images during render; the rejection is expected and never logged.
//! - **Scripts and data** are routed through the package cache, so runtime
//!   loads coalesce with the render's own package fetches and count in the
//!   same request stats.
//!
//! The loader tracks in-flight loads. After `close()` new loads are refused
//! and completions of in-flight loads are dropped without touching the
//! sandbox, so no callback fires into a torn-down context.

use boa_engine::job::{Job, NativeAsyncJob};
use boa_engine::object::FunctionObjectBuilder;
use boa_engine::object::builtins::JsPromise;
use boa_engine::property::Attribute;
use boa_engine::{Context, js_string, native_function::NativeFunction, value::JsValue};
use prerender_common::protocol::{RenderError, Result};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use url::Url;

use crate::runtime::bindings::SandboxHooks;

/// In-flight tracking and the closed flag for one sandbox's resource loader.
#[derive(Debug, Default)]
pub struct ResourceState {
    closed: AtomicBool,
    in_flight: AtomicUsize,
}

impl ResourceState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Refuses new loads and drops the completions of in-flight ones.
    pub fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
        let outstanding = self.in_flight.load(Ordering::SeqCst);
        if outstanding > 0 {
            tracing::debug!(outstanding, "resource loader closed with loads in flight");
        }
    }

    pub fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::SeqCst)
    }

    fn begin(&self) {
        self.in_flight.fetch_add(1, Ordering::SeqCst);
    }

    fn end(&self) {
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Installs `__loadResource__(url, kind)` into the sandbox.
pub fn install(ctx: &mut Context, hooks: &Arc<SandboxHooks>) -> Result<()> {
    let hooks_arc = Arc::clone(hooks);
    let load_fn = FunctionObjectBuilder::new(
        ctx.realm(),
        NativeFunction::from_copy_closure_with_captures(
            move |_this, args: &[JsValue], hooks: &Arc<SandboxHooks>, context| {
                let url = args
                    .first()
                    .and_then(JsValue::as_string)
                    .map(|s| s.to_std_string_escaped())
                    .unwrap_or_default();
                let kind = args
                    .get(1)
                    .and_then(JsValue::as_string)
                    .map(|s| s.to_std_string_escaped())
                    .unwrap_or_else(|| "data".to_string());

                let (promise, resolvers) = JsPromise::new_pending(context);

                if kind == "image" {
                    // Expected during SSR; rejected quietly.
                    let reason = JsValue::new(js_string!("blocked"));
                    resolvers
                        .reject
                        .call(&JsValue::undefined(), &[reason], context)?;
                    return Ok(promise.into());
                }

                if hooks.resources.is_closed() {
                    let reason = JsValue::new(js_string!("resource loader is closed"));
                    resolvers
                        .reject
                        .call(&JsValue::undefined(), &[reason], context)?;
                    return Ok(promise.into());
                }

                let parsed = match Url::parse(&url) {
                    Ok(parsed) => parsed,
                    Err(_) => {
                        let reason =
                            JsValue::new(js_string!(format!("invalid resource URL: {}", url)));
                        resolvers
                            .reject
                            .call(&JsValue::undefined(), &[reason], context)?;
                        return Ok(promise.into());
                    }
                };

                hooks.resources.begin();
                let hooks_for_job = Arc::clone(hooks);
                context.enqueue_job(Job::AsyncJob(
                    NativeAsyncJob::new(async move |context| {
                        let outcome = hooks_for_job
                            .cache
                            .get_or_fetch(&parsed, &hooks_for_job.stats)
                            .await;
                        hooks_for_job.resources.end();

                        let mut ctx = context.borrow_mut();
                        if hooks_for_job.resources.is_closed() {
                            // Teardown happened mid-flight; nothing may fire
                            // into the sandbox after close.
                            return Ok(JsValue::undefined());
                        }

                        match outcome {
                            Ok((content, _)) => {
                                let text = String::from_utf8_lossy(&content).into_owned();
                                resolvers
                                    .resolve
                                    .call(
                                        &JsValue::undefined(),
                                        &[JsValue::new(js_string!(text.as_str()))],
                                        &mut *ctx,
                                    )
                                    .map_err(Into::into)
                            }
                            Err(err) => {
                                let reason =
                                    JsValue::new(js_string!(err.to_string().as_str()));
                                resolvers
                                    .reject
                                    .call(&JsValue::undefined(), &[reason], &mut *ctx)
                                    .map_err(Into::into)
                            }
                        }
                    })
                    .into(),
                ));

                Ok(promise.into())
            },
            &hooks_arc,
        ),
    )
    .build();

    ctx.register_global_property(js_string!("__loadResource__"), load_fn, Attribute::all())
        .map_err(|e| RenderError::Sandbox(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::PackageCache;
    use crate::fetcher::PackageSource;
    use crate::runtime::bindings::install_console;
    use crate::runtime::executor::SandboxJobExecutor;
    use crate::stats::RequestStats;
    use boa_engine::Source;
    use bytes::Bytes;
    use futures::future::BoxFuture;
    use prerender_common::protocol::FetchFailure;
    use std::rc::Rc;
    use std::sync::atomic::AtomicUsize;
    use std::time::{Duration, Instant};

    struct StaticSource {
        body: &'static str,
        hits: AtomicUsize,
    }

    impl PackageSource for StaticSource {
        fn fetch(&self, _url: Url) -> BoxFuture<'static, std::result::Result<Bytes, FetchFailure>> {
            self.hits.fetch_add(1, Ordering::SeqCst);
            let body = Bytes::from_static(self.body.as_bytes());
            Box::pin(async move { Ok(body) })
        }
    }

    struct Sandbox {
        ctx: Context,
        executor: Rc<SandboxJobExecutor>,
        hooks: Arc<SandboxHooks>,
    }

    fn sandbox(source: Arc<StaticSource>) -> Sandbox {
        let executor = Rc::new(SandboxJobExecutor::new());
        let mut ctx = Context::builder()
            .job_executor(executor.clone())
            .build()
            .unwrap();
        let hooks = SandboxHooks::new(
            Arc::new(PackageCache::new(source)),
            Arc::new(RequestStats::new(1)),
        );
        install_console(&mut ctx, &hooks).unwrap();
        install(&mut ctx, &hooks).unwrap();
        Sandbox {
            ctx,
            executor,
            hooks,
        }
    }

    fn drive(sandbox: &mut Sandbox) {
        sandbox.executor.run_jobs_with_deadline(
            &mut sandbox.ctx,
            Instant::now() + Duration::from_secs(5),
        );
    }

    fn global_string(sandbox: &mut Sandbox, name: &str) -> Option<String> {
        let global = sandbox.ctx.global_object();
        let value = global.get(js_string!(name), &mut sandbox.ctx).unwrap();
        value.as_string().map(|s| s.to_std_string_escaped())
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_images_are_blocked_quietly() {
        let source = Arc::new(StaticSource {
            body: "",
            hits: AtomicUsize::new(0),
        });
        let mut sandbox = sandbox(Arc::clone(&source));

        sandbox
            .ctx
            .eval(Source::from_bytes(
                r#"
                __loadResource__("https://cdn.example.com/pic.png", "image")
                    .catch(function (reason) { globalThis.__blocked = String(reason); });
            "#,
            ))
            .unwrap();
        drive(&mut sandbox);

        assert_eq!(
            global_string(&mut sandbox, "__blocked").as_deref(),
            Some("blocked")
        );
        // Never hit the network, never logged.
        assert_eq!(source.hits.load(Ordering::SeqCst), 0);
        let console = sandbox.hooks.console_output();
        assert!(console.warns.is_empty() && console.errors.is_empty());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_script_loads_route_through_cache() {
        let source = Arc::new(StaticSource {
            body: "globalThis.__sideEffect = 'ran';",
            hits: AtomicUsize::new(0),
        });
        let mut sandbox = sandbox(Arc::clone(&source));

        sandbox
            .ctx
            .eval(Source::from_bytes(
                r#"
                __loadResource__("https://cdn.example.com/chunk.js", "script")
                    .then(function (code) { globalThis.__code = code; });
            "#,
            ))
            .unwrap();
        drive(&mut sandbox);

        assert_eq!(
            global_string(&mut sandbox, "__code").as_deref(),
            Some("globalThis.__sideEffect = 'ran';")
        );
        assert_eq!(source.hits.load(Ordering::SeqCst), 1);
        assert_eq!(sandbox.hooks.stats.snapshot().package_fetches, 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_closed_loader_refuses_new_loads() {
        let source = Arc::new(StaticSource {
            body: "x",
            hits: AtomicUsize::new(0),
        });
        let mut sandbox = sandbox(Arc::clone(&source));
        sandbox.hooks.resources.close();

        sandbox
            .ctx
            .eval(Source::from_bytes(
                r#"
                __loadResource__("https://cdn.example.com/late.js", "script")
                    .catch(function (reason) { globalThis.__refused = String(reason); });
            "#,
            ))
            .unwrap();
        drive(&mut sandbox);

        assert_eq!(
            global_string(&mut sandbox, "__refused").as_deref(),
            Some("resource loader is closed")
        );
        assert_eq!(source.hits.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_in_flight_accounting() {
        let state = ResourceState::new();
        assert_eq!(state.in_flight(), 0);
        state.begin();
        state.begin();
        assert_eq!(state.in_flight(), 2);
        state.end();
        assert_eq!(state.in_flight(), 1);
        assert!(!state.is_closed());
        state.close();
        assert!(state.is_closed());
    }
}
