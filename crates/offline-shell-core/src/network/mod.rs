//! Network fetch primitive used by the engine.
//!
//! This module provides the `Fetch` trait the engine calls for every
//! network round trip, and `HttpFetcher`, its reqwest-backed implementation.
//!
//! Only transport failures are errors here. An HTTP 404 or 500 is a
//! successfully fetched `Response`; deciding what to do with it is the
//! engine's job.

pub mod client;
pub mod error;

use async_trait::async_trait;

use crate::models::{Request, Response};

pub use client::HttpFetcher;
pub use error::FetchError;

#[async_trait]
pub trait Fetch: Send + Sync {
    /// Perform one network round trip for `request`.
    async fn fetch(&self, request: &Request) -> Result<Response, FetchError>;
}
