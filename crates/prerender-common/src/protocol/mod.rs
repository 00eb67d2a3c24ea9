//! Prerender Protocol Definitions
//!
//! This module defines the wire types of the render service: the render
//! request body, the render result, the error response schema and the error
//! taxonomy used throughout the system.
//!
//! # Error Handling
//!
//! Errors carry their HTTP classification:
//! - **Input errors** (malformed URL list, non-object props, bad secret)
//!   map to 400 responses
//! - **Pipeline errors** (package fetch exhaustion, sandbox failures,
//!   timeouts) map to 500 responses
//!
//! Every error converts into the stable `{error, value?, stack?}` response
//! schema via [`RenderError::to_body`].

pub mod error;
pub mod render;

pub use error::{FetchFailure, RenderError, Result};
pub use render::{
    CssValue, ErrorBody, GraphqlNetwork, RenderBody, RenderResult, ValidatedRender,
};
