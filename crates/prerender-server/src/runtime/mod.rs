//! The sandboxed execution runtime.
//!
//! One render gets one sandbox: a boa `Context` with a browser-shaped
//! prelude, native host bindings for console/resources/GraphQL, and a job
//! executor that drives promise resolution on tokio. The host⇄bundle
//! contract is three globals, preserved byte-for-byte:
//! `__registerForSSR__`, `__rrs`, `__SSR_ACTIVE__`.

pub mod bindings;
pub mod context;
pub mod conversions;
pub mod executor;
pub mod graphql;
pub mod resources;

pub use bindings::{ConsoleOutput, SandboxHooks};
pub use context::{ContextArgs, ContextState, RenderContext};
pub use executor::{DrainOutcome, SandboxJobExecutor};
