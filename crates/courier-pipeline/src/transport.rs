use crate::error::NetworkError;
use crate::request::{HttpRequest, HttpResponse};
use async_trait::async_trait;

/// The network leg. Implementations decide how bytes move (hyper, a native
/// platform client, a test double); the pipeline only needs this one call.
///
/// Any HTTP status is a response, not an error. Errors are reserved for
/// requests that produced no response at all.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn execute(&self, request: &HttpRequest) -> Result<HttpResponse, NetworkError>;
}

/// Run `request` on `transport`, applying the request's timeout.
pub(crate) async fn send(
    transport: &dyn Transport,
    request: &HttpRequest,
) -> Result<HttpResponse, NetworkError> {
    match request.timeout {
        Some(limit) => tokio::time::timeout(limit, transport.execute(request))
            .await
            .map_err(|_| NetworkError::Timeout(limit))?,
        None => transport.execute(request).await,
    }
}
