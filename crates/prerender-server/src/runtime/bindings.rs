//! Native host bindings installed into the sandbox.
//!
//! This is the single place where Rust functions are exposed to the
//! JavaScript sandbox. The bootstrap prelude wraps these raw hooks in the
//! browser-shaped surface bundles expect:
//!
//! - `__consoleLog__` / `__consoleWarn__` / `__consoleError__` - virtual
//!   console sinks
//! - `__loadResource__` - outbound resource loading (installed by
//!   [`crate::runtime::resources`])
//! - `__graphqlFetch__` - the GraphQL link transport (installed by
//!   [`crate::runtime::graphql`])
//!
//! Shared per-render state travels as an `Arc<SandboxHooks>` cloned into
//! each native closure.

use boa_engine::object::FunctionObjectBuilder;
use boa_engine::property::Attribute;
use boa_engine::{Context, js_string, native_function::NativeFunction, value::JsValue};
use prerender_common::protocol::{RenderError, Result};
use serde_json::{Map, Value, json};
use std::sync::{Arc, Mutex};
use url::Url;

use crate::cache::PackageCache;
use crate::runtime::conversions::json_to_js;
use crate::runtime::resources::ResourceState;
use crate::stats::RequestStats;

/// Output captured from the sandbox's virtual console.
#[derive(Debug, Default, Clone)]
pub struct ConsoleOutput {
    pub logs: Vec<String>,
    pub warns: Vec<String>,
    pub errors: Vec<String>,
}

/// Per-render state shared between the host and the sandbox's native
/// bindings.
pub struct SandboxHooks {
    pub console: Mutex<ConsoleOutput>,
    pub resources: ResourceState,
    pub cache: Arc<PackageCache>,
    pub stats: Arc<RequestStats>,
}

impl SandboxHooks {
    pub fn new(cache: Arc<PackageCache>, stats: Arc<RequestStats>) -> Arc<Self> {
        Arc::new(Self {
            console: Mutex::new(ConsoleOutput::default()),
            resources: ResourceState::new(),
            cache,
            stats,
        })
    }

    pub fn console_output(&self) -> ConsoleOutput {
        self.console.lock().expect("console poisoned").clone()
    }
}

/// The image-load diagnostics jsdom-style environments emit; the virtual
/// console swallows these because blocked images are expected, not errors.
fn is_image_load_diagnostic(message: &str) -> bool {
    message.contains("Could not load img")
}

fn first_string_arg(args: &[JsValue]) -> String {
    args.first()
        .and_then(JsValue::as_string)
        .map(|s| s.to_std_string_escaped())
        .unwrap_or_default()
}

/// Installs the virtual console sinks.
pub fn install_console(ctx: &mut Context, hooks: &Arc<SandboxHooks>) -> Result<()> {
    let hooks_arc = Arc::clone(hooks);
    let log_fn = FunctionObjectBuilder::new(
        ctx.realm(),
        NativeFunction::from_copy_closure_with_captures(
            move |_this, args: &[JsValue], hooks: &Arc<SandboxHooks>, _context| {
                let message = first_string_arg(args);
                tracing::debug!(target: "sandbox", "{}", message);
                hooks.console.lock().expect("console poisoned").logs.push(message);
                Ok(JsValue::undefined())
            },
            &hooks_arc,
        ),
    )
    .build();

    let warn_fn = FunctionObjectBuilder::new(
        ctx.realm(),
        NativeFunction::from_copy_closure_with_captures(
            move |_this, args: &[JsValue], hooks: &Arc<SandboxHooks>, _context| {
                let message = first_string_arg(args);
                if !is_image_load_diagnostic(&message) {
                    tracing::warn!(target: "sandbox", "{}", message);
                    hooks.console.lock().expect("console poisoned").warns.push(message);
                }
                Ok(JsValue::undefined())
            },
            &hooks_arc,
        ),
    )
    .build();

    let error_fn = FunctionObjectBuilder::new(
        ctx.realm(),
        NativeFunction::from_copy_closure_with_captures(
            move |_this, args: &[JsValue], hooks: &Arc<SandboxHooks>, _context| {
                let message = first_string_arg(args);
                if !is_image_load_diagnostic(&message) {
                    tracing::warn!(target: "sandbox", "{}", message);
                    hooks.console.lock().expect("console poisoned").errors.push(message);
                }
                Ok(JsValue::undefined())
            },
            &hooks_arc,
        ),
    )
    .build();

    ctx.register_global_property(js_string!("__consoleLog__"), log_fn, Attribute::all())
        .map_err(|e| RenderError::Sandbox(e.to_string()))?;
    ctx.register_global_property(js_string!("__consoleWarn__"), warn_fn, Attribute::all())
        .map_err(|e| RenderError::Sandbox(e.to_string()))?;
    ctx.register_global_property(js_string!("__consoleError__"), error_fn, Attribute::all())
        .map_err(|e| RenderError::Sandbox(e.to_string()))?;

    Ok(())
}

/// Installs the sandbox `location` object from the render's base URL.
///
/// This runs before the bootstrap prelude so `window.location` and
/// `document.location` alias it.
pub fn install_location(ctx: &mut Context, location: &Url) -> Result<()> {
    let parts = json!({
        "href": location.as_str(),
        "origin": location.origin().ascii_serialization(),
        "protocol": format!("{}:", location.scheme()),
        "host": location.host_str().map(|host| match location.port() {
            Some(port) => format!("{}:{}", host, port),
            None => host.to_string(),
        }).unwrap_or_default(),
        "hostname": location.host_str().unwrap_or_default(),
        "port": location.port().map(|p| p.to_string()).unwrap_or_default(),
        "pathname": location.path(),
        "search": location.query().map(|q| format!("?{}", q)).unwrap_or_default(),
        "hash": location.fragment().map(|f| format!("#{}", f)).unwrap_or_default(),
    });

    let value = json_to_js(&parts, ctx)?;
    ctx.register_global_property(js_string!("location"), value, Attribute::all())
        .map_err(|e| RenderError::Sandbox(e.to_string()))
}

/// Copies request globals into the sandbox namespace.
///
/// The `location` key is never copied: the sandbox's own location, set at
/// construction, drives same-origin semantics and stays authoritative.
pub fn install_globals(ctx: &mut Context, globals: &Map<String, Value>) -> Result<()> {
    for (key, value) in globals {
        if key == "location" {
            continue;
        }
        let value = json_to_js(value, ctx)?;
        ctx.register_global_property(js_string!(key.as_str()), value, Attribute::all())
            .map_err(|e| {
                RenderError::Sandbox(format!("failed to install global '{}': {}", key, e))
            })?;
    }
    Ok(())
}
