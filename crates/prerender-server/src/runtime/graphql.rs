//! GraphQL network shim for the sandbox.
//!
//! Rendering code that data-fetches during SSR expects a client constructed
//! outside the DOM; the sandbox's own `fetch` is not used for GraphQL. When
//! a render request carries `apolloNetwork`, this module installs the
//! well-known slot `__rrs.graphql` holding three objects: the client
//! binding, an in-memory cache object and an HTTP link. The link's fetch:
//!
//! - rejects when the endpoint URL is absent or the sentinel `"BAD_URL"`
//! - races the request against a timeout (default 1000 ms, overridable per
//!   render via `apolloNetwork.timeout`)
//! - rejects on any non-200 status
//! - carries the caller-supplied headers on every request
//!
//! The `client` object is what the render callback receives as its second
//! argument.

use boa_engine::job::{Job, NativeAsyncJob};
use boa_engine::object::FunctionObjectBuilder;
use boa_engine::object::builtins::JsPromise;
use boa_engine::property::Attribute;
use boa_engine::{Context, Source, js_string, native_function::NativeFunction, value::JsValue};
use prerender_common::protocol::{GraphqlNetwork, RenderError, Result};
use serde::Deserialize;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

/// The JavaScript half of the shim: builds `__rrs.graphql` over the
/// `__graphqlFetch__` binding.
const GRAPHQL_SHIM: &str = r#"
(function () {
    "use strict";
    var cfg = JSON.parse(globalThis.__rrs_graphql_config);

    var link = {
        uri: cfg.url,
        fetch: function (uri, options) {
            options = options || {};
            return __graphqlFetch__(
                uri === undefined || uri === null ? cfg.url : uri,
                JSON.stringify({
                    method: options.method || "POST",
                    body: typeof options.body === "string" ? options.body : null
                })
            ).then(function (body) {
                return {
                    ok: true,
                    status: 200,
                    text: function () { return Promise.resolve(body); },
                    json: function () { return Promise.resolve(JSON.parse(body)); }
                };
            });
        }
    };

    var cache = {
        data: {},
        read: function (key) { return this.data[key]; },
        write: function (key, value) { this.data[key] = value; },
        reset: function () { this.data = {}; }
    };

    var client = {
        link: link,
        cache: cache,
        query: function (options) {
            options = options || {};
            return link.fetch(cfg.url, {
                method: "POST",
                body: JSON.stringify({
                    query: options.query,
                    variables: options.variables
                })
            }).then(function (response) { return response.json(); });
        }
    };

    globalThis.__rrs.graphql = { client: client, cache: cache, link: link };
})();
"#;

/// Endpoint binding captured by the `__graphqlFetch__` closure.
struct GraphqlEndpoint {
    http: reqwest::Client,
    headers: HashMap<String, String>,
    timeout: Duration,
}

/// Request options forwarded from the JavaScript link.
#[derive(Debug, Default, Deserialize)]
struct LinkOptions {
    method: Option<String>,
    body: Option<String>,
}

/// Installs the GraphQL shim into the sandbox. Must run after the bootstrap
/// prelude (it extends `__rrs`).
pub fn install(
    ctx: &mut Context,
    config: &GraphqlNetwork,
    http: reqwest::Client,
    default_timeout: Duration,
) -> Result<()> {
    let endpoint = Arc::new(GraphqlEndpoint {
        http,
        headers: config.headers.clone().unwrap_or_default(),
        timeout: config
            .timeout
            .map(Duration::from_millis)
            .unwrap_or(default_timeout),
    });

    let fetch_fn = FunctionObjectBuilder::new(
        ctx.realm(),
        NativeFunction::from_copy_closure_with_captures(
            move |_this, args: &[JsValue], endpoint: &Arc<GraphqlEndpoint>, context| {
                let (promise, resolvers) = JsPromise::new_pending(context);

                let url = args
                    .first()
                    .and_then(JsValue::as_string)
                    .map(|s| s.to_std_string_escaped())
                    .unwrap_or_default();
                if url.is_empty() || url == "BAD_URL" {
                    let reason =
                        JsValue::new(js_string!("Missing or invalid GraphQL endpoint URL"));
                    resolvers
                        .reject
                        .call(&JsValue::undefined(), &[reason], context)?;
                    return Ok(promise.into());
                }

                let options: LinkOptions = args
                    .get(1)
                    .and_then(JsValue::as_string)
                    .map(|s| s.to_std_string_escaped())
                    .and_then(|raw| serde_json::from_str(&raw).ok())
                    .unwrap_or_default();

                let endpoint = Arc::clone(endpoint);
                context.enqueue_job(Job::AsyncJob(
                    NativeAsyncJob::new(async move |context| {
                        let outcome = request(&endpoint, &url, options).await;

                        let mut ctx = context.borrow_mut();
                        match outcome {
                            Ok(body) => resolvers
                                .resolve
                                .call(
                                    &JsValue::undefined(),
                                    &[JsValue::new(js_string!(body.as_str()))],
                                    &mut *ctx,
                                )
                                .map_err(Into::into),
                            Err(reason) => resolvers
                                .reject
                                .call(
                                    &JsValue::undefined(),
                                    &[JsValue::new(js_string!(reason.as_str()))],
                                    &mut *ctx,
                                )
                                .map_err(Into::into),
                        }
                    })
                    .into(),
                ));

                Ok(promise.into())
            },
            &endpoint,
        ),
    )
    .build();

    ctx.register_global_property(js_string!("__graphqlFetch__"), fetch_fn, Attribute::all())
        .map_err(|e| RenderError::Sandbox(e.to_string()))?;

    let config_json = serde_json::json!({
        "url": config.url,
        "headers": config.headers.clone().unwrap_or_default(),
    });
    ctx.register_global_property(
        js_string!("__rrs_graphql_config"),
        JsValue::new(js_string!(config_json.to_string().as_str())),
        Attribute::all(),
    )
    .map_err(|e| RenderError::Sandbox(e.to_string()))?;

    ctx.eval(Source::from_bytes(GRAPHQL_SHIM))
        .map_err(|e| RenderError::Sandbox(format!("failed to install GraphQL shim: {}", e)))?;

    Ok(())
}

/// One bounded GraphQL request: endpoint headers on every call, the timeout
/// raced against the transfer, non-200 rejected.
async fn request(
    endpoint: &GraphqlEndpoint,
    url: &str,
    options: LinkOptions,
) -> std::result::Result<String, String> {
    let method = match options.method.as_deref().unwrap_or("POST") {
        "GET" => reqwest::Method::GET,
        _ => reqwest::Method::POST,
    };

    let mut builder = endpoint.http.request(method, url);
    for (name, value) in &endpoint.headers {
        builder = builder.header(name, value);
    }
    builder = builder.header("content-type", "application/json");
    if let Some(body) = options.body {
        builder = builder.body(body);
    }

    let response = tokio::time::timeout(endpoint.timeout, builder.send())
        .await
        .map_err(|_| {
            format!(
                "GraphQL request timed out after {}ms",
                endpoint.timeout.as_millis()
            )
        })?
        .map_err(|e| format!("GraphQL request failed: {}", e))?;

    let status = response.status().as_u16();
    if status != 200 {
        return Err(format!("GraphQL request failed with status {}", status));
    }

    tokio::time::timeout(endpoint.timeout, response.text())
        .await
        .map_err(|_| {
            format!(
                "GraphQL request timed out after {}ms",
                endpoint.timeout.as_millis()
            )
        })?
        .map_err(|e| format!("failed to read GraphQL response: {}", e))
}
