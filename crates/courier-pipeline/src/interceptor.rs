use crate::error::RequestError;
use crate::request::{HttpRequest, HttpResponse};
use async_trait::async_trait;
use http::Method;
use regex::Regex;
use std::collections::HashSet;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Outcome of a request hook.
#[derive(Debug)]
pub enum RequestFlow {
    /// Hand the (possibly modified) request to the next hook.
    Continue,
    /// Answer now. Later request hooks and the network are skipped; response
    /// hooks still run.
    Respond(HttpResponse),
}

/// A participant in the request pipeline. Every hook is optional.
#[async_trait]
pub trait Interceptor: Send + Sync {
    /// Inspect or rewrite the outgoing request, or answer it directly.
    async fn on_request(&self, _request: &mut HttpRequest) -> Result<RequestFlow, RequestError> {
        Ok(RequestFlow::Continue)
    }

    /// Inspect or replace a response before the caller sees it.
    async fn on_response(
        &self,
        _request: &HttpRequest,
        response: HttpResponse,
    ) -> Result<HttpResponse, RequestError> {
        Ok(response)
    }

    /// Offer a recovery response for a failed request. The first hook to
    /// return `Some` wins.
    async fn on_error(
        &self,
        _request: &HttpRequest,
        _error: &RequestError,
    ) -> Result<Option<HttpResponse>, RequestError> {
        Ok(None)
    }
}

/// Restricts an interceptor to a subset of requests. Unset fields match all.
#[derive(Clone, Debug, Default)]
pub struct Scope {
    pub url_pattern: Option<Regex>,
    pub methods: Option<HashSet<Method>>,
}

impl Scope {
    pub fn url(pattern: Regex) -> Self {
        Self {
            url_pattern: Some(pattern),
            methods: None,
        }
    }

    pub fn with_methods(mut self, methods: impl IntoIterator<Item = Method>) -> Self {
        self.methods = Some(methods.into_iter().collect());
        self
    }

    pub fn matches(&self, request: &HttpRequest) -> bool {
        if let Some(methods) = &self.methods {
            if !methods.contains(&request.method) {
                return false;
            }
        }
        match &self.url_pattern {
            Some(re) => re.is_match(&request.full_url()),
            None => true,
        }
    }
}

#[derive(Clone, Debug)]
pub struct InterceptorOptions {
    pub name: Option<String>,
    /// Higher runs first. Equal priorities keep registration order.
    pub priority: i32,
    pub enabled: bool,
    pub scope: Option<Scope>,
}

impl Default for InterceptorOptions {
    fn default() -> Self {
        Self {
            name: None,
            priority: 0,
            enabled: true,
            scope: None,
        }
    }
}

impl InterceptorOptions {
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: Some(name.into()),
            ..Default::default()
        }
    }

    pub fn priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    pub fn disabled(mut self) -> Self {
        self.enabled = false;
        self
    }

    pub fn scope(mut self, scope: Scope) -> Self {
        self.scope = Some(scope);
        self
    }
}

/// Unique per pipeline, never reused.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct InterceptorId(pub(crate) u64);

impl fmt::Display for InterceptorId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "interceptor-{}", self.0)
    }
}

/// Returned on registration. Toggling the handle affects every hook that has
/// not run yet, including those of requests already in flight.
#[derive(Clone)]
pub struct InterceptorHandle {
    id: InterceptorId,
    name: Option<String>,
    priority: i32,
    enabled: Arc<AtomicBool>,
}

impl InterceptorHandle {
    pub(crate) fn new(
        id: InterceptorId,
        name: Option<String>,
        priority: i32,
        enabled: Arc<AtomicBool>,
    ) -> Self {
        Self {
            id,
            name,
            priority,
            enabled,
        }
    }

    pub fn id(&self) -> InterceptorId {
        self.id
    }

    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    pub fn priority(&self) -> i32 {
        self.priority
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::Acquire)
    }

    pub fn enable(&self) {
        self.enabled.store(true, Ordering::Release);
    }

    pub fn disable(&self) {
        self.enabled.store(false, Ordering::Release);
    }
}

impl fmt::Debug for InterceptorHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InterceptorHandle")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("priority", &self.priority)
            .field("enabled", &self.is_enabled())
            .finish()
    }
}
