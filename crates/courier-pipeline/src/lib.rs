//! Request pipeline with built-in response caching.
//!
//! Requests flow through an [`InterceptorPipeline`]: request hooks run in
//! priority order and may answer the request themselves, otherwise the
//! [`Transport`] performs the network call, then response hooks run. If
//! anything fails, error hooks get a chance to recover. Caching is one such
//! hook, the [`CacheInterceptor`], which applies a [`CacheStrategy`] on top
//! of a `courier_cache::CacheStore`.
//!
//! [`HttpClient`] wires a transport, a pipeline and an optional cache together
//! and is what host applications hold.

pub mod client;
mod compression;
pub mod error;
pub mod interceptor;
pub mod keying;
pub mod options;
pub mod pipeline;
pub mod request;
pub mod strategy;
pub mod transport;

pub use client::{HttpClient, CACHE_INTERCEPTOR_NAME};
pub use error::{NetworkError, RequestError};
pub use interceptor::{
    Interceptor, InterceptorHandle, InterceptorId, InterceptorOptions, RequestFlow, Scope,
};
pub use keying::{CacheKeying, ExcludeRules, KeyGenerator};
pub use options::{CacheOptions, CacheStrategy, ExcludeOptions};
pub use pipeline::InterceptorPipeline;
pub use request::{CacheStatus, HttpRequest, HttpResponse, CACHE_STATUS_HEADER};
pub use strategy::CacheInterceptor;
pub use transport::Transport;

pub use http::Method;
