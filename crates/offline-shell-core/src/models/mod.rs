//! Data models for intercepted traffic.
//!
//! - `Request`, `Method`: an outbound request as seen by the engine
//! - `RequestKey`: canonical cache identity (method + absolute URL)
//! - `Response`: a fully materialized response snapshot
//! - `CachedEntry`: a stored response with its key and timestamp

pub mod request;
pub mod response;

pub use request::{Method, Request, RequestKey};
pub use response::{CachedEntry, Response};
