//! Prerender Common Types
//!
//! This crate provides the protocol definitions shared by the prerender
//! server and CLI.
//!
//! # Overview
//!
//! Prerender is a server-side rendering service: it fetches a bundle of
//! JavaScript packages, executes them in an isolated browser-like sandbox and
//! returns the produced HTML and stylesheet as JSON. This crate contains the
//! pieces every component agrees on:
//!
//! - **Protocol Layer**: render request/response bodies, the error response
//!   schema and the error taxonomy
//! - **Secret Layer**: shared-secret validation backed by a secret file
//!
//! # Components
//!
//! - [`protocol`] - Core protocol types (RenderBody, RenderResult, RenderError)
//! - [`secret`] - Shared-secret file loading and constant-time validation

pub mod protocol;
pub mod secret;

pub use protocol::*;
pub use secret::SecretStore;
