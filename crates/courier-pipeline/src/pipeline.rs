use crate::error::RequestError;
use crate::interceptor::{
    Interceptor, InterceptorHandle, InterceptorId, InterceptorOptions, RequestFlow, Scope,
};
use crate::request::{HttpRequest, HttpResponse};
use crate::transport::{self, Transport};
use parking_lot::RwLock;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

struct Registered {
    id: InterceptorId,
    name: Option<String>,
    priority: i32,
    enabled: Arc<AtomicBool>,
    scope: Option<Scope>,
    interceptor: Arc<dyn Interceptor>,
}

impl Registered {
    fn applies_to(&self, request: &HttpRequest) -> bool {
        self.enabled.load(Ordering::Acquire)
            && self.scope.as_ref().map_or(true, |s| s.matches(request))
    }

    fn label(&self) -> String {
        match &self.name {
            Some(name) => name.clone(),
            None => self.id.to_string(),
        }
    }

    fn handle(&self) -> InterceptorHandle {
        InterceptorHandle::new(
            self.id,
            self.name.clone(),
            self.priority,
            Arc::clone(&self.enabled),
        )
    }
}

/// Ordered set of interceptors applied to every request.
///
/// Each phase works on a snapshot of the registrations, so adding or removing
/// interceptors never disturbs a request that is already running.
pub struct InterceptorPipeline {
    entries: RwLock<Vec<Arc<Registered>>>,
    next_id: AtomicU64,
}

impl Default for InterceptorPipeline {
    fn default() -> Self {
        Self::new()
    }
}

impl InterceptorPipeline {
    pub fn new() -> Self {
        Self {
            entries: RwLock::new(Vec::new()),
            next_id: AtomicU64::new(1),
        }
    }

    pub fn add(
        &self,
        interceptor: Arc<dyn Interceptor>,
        options: InterceptorOptions,
    ) -> InterceptorHandle {
        let id = InterceptorId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let registered = Arc::new(Registered {
            id,
            name: options.name,
            priority: options.priority,
            enabled: Arc::new(AtomicBool::new(options.enabled)),
            scope: options.scope,
            interceptor,
        });
        let handle = registered.handle();

        let mut entries = self.entries.write();
        entries.push(registered);
        // Stable sort keeps registration order among equal priorities.
        entries.sort_by(|a, b| b.priority.cmp(&a.priority));
        drop(entries);

        tracing::debug!(
            id = %id,
            name = handle.name().unwrap_or(""),
            priority = handle.priority(),
            "interceptor registered"
        );
        handle
    }

    /// Unregister by id. Unknown ids are a no-op.
    pub fn remove(&self, id: InterceptorId) -> bool {
        let mut entries = self.entries.write();
        let before = entries.len();
        entries.retain(|e| e.id != id);
        let removed = entries.len() != before;
        if removed {
            tracing::debug!(id = %id, "interceptor removed");
        }
        removed
    }

    pub fn remove_all(&self) -> usize {
        let removed = std::mem::take(&mut *self.entries.write()).len();
        tracing::debug!(removed, "all interceptors removed");
        removed
    }

    /// Registered interceptors in execution order.
    pub fn get_all(&self) -> Vec<InterceptorHandle> {
        self.entries.read().iter().map(|e| e.handle()).collect()
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }

    fn snapshot(&self) -> Vec<Arc<Registered>> {
        self.entries.read().clone()
    }

    /// Run request hooks in priority order until one answers or errors.
    pub async fn execute_request(
        &self,
        request: &mut HttpRequest,
    ) -> Result<RequestFlow, RequestError> {
        for entry in self.snapshot() {
            if !entry.applies_to(request) {
                continue;
            }
            if let RequestFlow::Respond(response) = entry.interceptor.on_request(request).await? {
                tracing::debug!(
                    interceptor = %entry.label(),
                    url = %request.url,
                    "request answered by interceptor"
                );
                return Ok(RequestFlow::Respond(response));
            }
        }
        Ok(RequestFlow::Continue)
    }

    /// Thread the response through response hooks, same order as requests.
    pub async fn execute_response(
        &self,
        request: &HttpRequest,
        mut response: HttpResponse,
    ) -> Result<HttpResponse, RequestError> {
        for entry in self.snapshot() {
            if entry.applies_to(request) {
                response = entry.interceptor.on_response(request, response).await?;
            }
        }
        Ok(response)
    }

    /// Give error hooks a chance to recover; the original error is returned
    /// when none does.
    pub async fn execute_error(
        &self,
        request: &HttpRequest,
        error: RequestError,
    ) -> Result<HttpResponse, RequestError> {
        for entry in self.snapshot() {
            if !entry.applies_to(request) {
                continue;
            }
            if let Some(response) = entry.interceptor.on_error(request, &error).await? {
                tracing::debug!(
                    interceptor = %entry.label(),
                    error = %error,
                    "error recovered by interceptor"
                );
                return Ok(response);
            }
        }
        Err(error)
    }

    /// Full request lifecycle: request hooks, network (unless answered),
    /// response hooks, and error hooks on any failure along the way.
    pub async fn execute(
        &self,
        mut request: HttpRequest,
        transport: &dyn Transport,
    ) -> Result<HttpResponse, RequestError> {
        match self.run(&mut request, transport).await {
            Ok(response) => Ok(response),
            Err(error) => self.execute_error(&request, error).await,
        }
    }

    async fn run(
        &self,
        request: &mut HttpRequest,
        transport: &dyn Transport,
    ) -> Result<HttpResponse, RequestError> {
        let response = match self.execute_request(request).await? {
            RequestFlow::Respond(response) => response,
            RequestFlow::Continue => transport::send(transport, request).await?,
        };
        self.execute_response(request, response).await
    }
}
