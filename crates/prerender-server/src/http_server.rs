//! HTTP surface of the render service.
//!
//! The server accepts HTTP/1.1 connections and spawns a tokio task per
//! connection. Routes:
//!
//! | Route | Method | Behavior |
//! |---|---|---|
//! | `/render` | POST | run the render pipeline, respond `{html, css}` |
//! | `/flush` | POST | drop the package cache, respond the instance id |
//! | `/_api/ping` | GET | `pong!\n` |
//! | `/_api/version` | GET | `GAE_VERSION` or `dev`, newline-terminated |
//! | `/_ah/health`, `/_ah/start`, `/_ah/stop` | GET | `ok!\n` |
//!
//! POST bodies must be `application/json` and are capped at 5 MB before
//! parsing. Errors respond with the `{error, value?, stack?}` schema: input
//! and secret failures as 400, pipeline failures as 500.

use http_body_util::BodyExt;
use http_body_util::Full;
use hyper::body::{Bytes, Incoming};
use hyper::header::CONTENT_TYPE;
use hyper::service::service_fn;
use hyper::{Method, Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;

use prerender_common::protocol::{ErrorBody, RenderBody, RenderError};
use prerender_common::secret::SecretStore;

use crate::renderer::Renderer;

/// Maximum request body size (5 MB).
///
/// Render bodies carry props and globals, not bundles; anything larger is a
/// malfunctioning caller, rejected before it can balloon memory.
const MAX_BODY_SIZE: usize = 5 * 1024 * 1024;

pub type HyperRequest = Request<Incoming>;
pub type HyperResponse = Response<Full<Bytes>>;

/// Shared state behind every connection task.
pub struct ServerState {
    pub renderer: Renderer,
    pub secrets: SecretStore,
}

#[derive(Debug, Default, Deserialize)]
struct FlushBody {
    secret: Option<String>,
}

/// The HTTP server: accept loop plus request routing.
pub struct HttpServer {
    state: Arc<ServerState>,
}

impl HttpServer {
    pub fn new(state: Arc<ServerState>) -> Self {
        Self { state }
    }

    /// Binds `addr` and serves until the process exits.
    pub async fn run(self, addr: SocketAddr) -> Result<(), RenderError> {
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|e| RenderError::Internal(format!("failed to bind {}: {}", addr, e)))?;
        self.serve(listener).await
    }

    /// Serves connections from an already-bound listener.
    pub async fn serve(self, listener: TcpListener) -> Result<(), RenderError> {
        let local_addr = listener
            .local_addr()
            .map_err(|e| RenderError::Internal(format!("failed to read local address: {}", e)))?;
        tracing::info!("prerender listening on {}", local_addr);

        loop {
            let (stream, _) = listener
                .accept()
                .await
                .map_err(|e| RenderError::Internal(format!("failed to accept: {}", e)))?;

            let io = TokioIo::new(stream);
            let state = Arc::clone(&self.state);

            tokio::task::spawn(async move {
                let service = service_fn(move |req| {
                    let state = Arc::clone(&state);
                    async move { Self::handle_request(state, req).await }
                });

                if let Err(err) = hyper::server::conn::http1::Builder::new()
                    .serve_connection(io, service)
                    .await
                {
                    tracing::error!("error serving connection: {}", err);
                }
            });
        }
    }

    async fn handle_request(
        state: Arc<ServerState>,
        req: HyperRequest,
    ) -> Result<HyperResponse, RenderError> {
        let path = req.uri().path().to_string();

        let response = if req.method() == Method::POST {
            match path.as_str() {
                "/render" => Self::handle_render(state, req).await,
                "/flush" => Self::handle_flush(state, req).await,
                _ => not_found(),
            }
        } else if req.method() == Method::GET {
            match path.as_str() {
                "/_api/ping" => text_response(StatusCode::OK, "pong!\n".to_string()),
                "/_api/version" => text_response(
                    StatusCode::OK,
                    format!(
                        "{}\n",
                        std::env::var("GAE_VERSION").unwrap_or_else(|_| "dev".to_string())
                    ),
                ),
                "/_ah/health" | "/_ah/start" | "/_ah/stop" => {
                    text_response(StatusCode::OK, "ok!\n".to_string())
                }
                _ => not_found(),
            }
        } else {
            not_found()
        };

        Ok(response)
    }

    async fn handle_render(state: Arc<ServerState>, req: HyperRequest) -> HyperResponse {
        if !has_json_content_type(&req) {
            return error_response(&RenderError::invalid(
                "Content-Type must be application/json",
            ));
        }

        let body = match read_body(req).await {
            Ok(body) => body,
            Err(response) => return response,
        };

        let render_body: RenderBody = match serde_json::from_slice(&body) {
            Ok(render_body) => render_body,
            Err(e) => {
                return error_response(&RenderError::invalid(format!(
                    "failed to parse request body: {}",
                    e
                )));
            }
        };

        if let Err(err) = state.secrets.verify(render_body.secret.as_deref()) {
            return error_response(&err);
        }

        match state.renderer.render(render_body).await {
            Ok(result) => json_response(StatusCode::OK, &result),
            Err(err) => error_response(&err),
        }
    }

    async fn handle_flush(state: Arc<ServerState>, req: HyperRequest) -> HyperResponse {
        if !has_json_content_type(&req) {
            return error_response(&RenderError::invalid(
                "Content-Type must be application/json",
            ));
        }

        let body = match read_body(req).await {
            Ok(body) => body,
            Err(response) => return response,
        };

        let flush_body: FlushBody = match serde_json::from_slice(&body) {
            Ok(flush_body) => flush_body,
            Err(e) => {
                return error_response(&RenderError::invalid(format!(
                    "failed to parse request body: {}",
                    e
                )));
            }
        };

        if let Err(err) = state.secrets.verify(flush_body.secret.as_deref()) {
            return error_response(&err);
        }

        state.renderer.cache().flush_all();
        tracing::info!("package cache flushed");

        let instance = std::env::var("GAE_INSTANCE").unwrap_or_else(|_| "dev".to_string());
        text_response(StatusCode::OK, format!("{}\n", instance))
    }
}

fn not_found() -> HyperResponse {
    json_response(
        StatusCode::NOT_FOUND,
        &ErrorBody {
            error: "not found".to_string(),
            value: None,
            stack: None,
        },
    )
}

fn has_json_content_type(req: &HyperRequest) -> bool {
    req.headers()
        .get(CONTENT_TYPE)
        .and_then(|value| value.to_str().ok())
        .map(|value| value.starts_with("application/json"))
        .unwrap_or(false)
}

async fn read_body(req: HyperRequest) -> Result<Bytes, HyperResponse> {
    let body = match req.into_body().collect().await {
        Ok(collected) => collected.to_bytes(),
        Err(e) => {
            tracing::error!("failed to read request body: {}", e);
            return Err(error_response(&RenderError::invalid(
                "failed to read request body",
            )));
        }
    };

    if body.len() > MAX_BODY_SIZE {
        tracing::error!(
            "request body too large: {} bytes (max {} bytes)",
            body.len(),
            MAX_BODY_SIZE
        );
        return Err(json_response(
            StatusCode::PAYLOAD_TOO_LARGE,
            &ErrorBody {
                error: format!("request body exceeds {} bytes", MAX_BODY_SIZE),
                value: None,
                stack: None,
            },
        ));
    }

    Ok(body)
}

fn json_response<T: Serialize>(status: StatusCode, body: &T) -> HyperResponse {
    let body = serde_json::to_vec(body).unwrap_or_default();
    Response::builder()
        .status(status)
        .header(CONTENT_TYPE, "application/json")
        .body(Full::new(Bytes::from(body)))
        .expect("response build cannot fail")
}

fn text_response(status: StatusCode, body: String) -> HyperResponse {
    Response::builder()
        .status(status)
        .header(CONTENT_TYPE, "text/plain; charset=utf-8")
        .body(Full::new(Bytes::from(body)))
        .expect("response build cannot fail")
}

fn error_response(err: &RenderError) -> HyperResponse {
    let status = if err.is_input_error() {
        StatusCode::BAD_REQUEST
    } else {
        StatusCode::INTERNAL_SERVER_ERROR
    };
    json_response(status, &err.to_body())
}
