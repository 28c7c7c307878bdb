use async_trait::async_trait;
use courier_pipeline::{HttpRequest, HttpResponse, Interceptor, RequestError, RequestFlow};

/// Logs requests that leave the cache layer and the outcome of every request.
pub struct RequestLogger;

#[async_trait]
impl Interceptor for RequestLogger {
    async fn on_request(&self, request: &mut HttpRequest) -> Result<RequestFlow, RequestError> {
        tracing::debug!(method = %request.method, url = %request.url, "forwarding upstream");
        Ok(RequestFlow::Continue)
    }

    async fn on_response(
        &self,
        request: &HttpRequest,
        response: HttpResponse,
    ) -> Result<HttpResponse, RequestError> {
        tracing::debug!(
            method = %request.method,
            url = %request.url,
            status = response.status,
            cache = response.cache_status.map(|s| s.as_str()).unwrap_or("NONE"),
            bytes = response.body.len(),
            "request completed"
        );
        Ok(response)
    }

    async fn on_error(
        &self,
        request: &HttpRequest,
        error: &RequestError,
    ) -> Result<Option<HttpResponse>, RequestError> {
        tracing::debug!(method = %request.method, url = %request.url, error = %error, "request errored");
        Ok(None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use courier_pipeline::{InterceptorOptions, InterceptorPipeline, NetworkError, Transport};

    struct Down;

    #[async_trait]
    impl Transport for Down {
        async fn execute(&self, _request: &HttpRequest) -> Result<HttpResponse, NetworkError> {
            Err(NetworkError::Connect("refused".into()))
        }
    }

    #[tokio::test]
    async fn logger_is_transparent() {
        let pipeline = InterceptorPipeline::new();
        pipeline.add(std::sync::Arc::new(RequestLogger), InterceptorOptions::default());

        let err = pipeline
            .execute(HttpRequest::get("http://upstream.test/"), &Down)
            .await
            .unwrap_err();
        assert_eq!(
            err,
            RequestError::Network(NetworkError::Connect("refused".into()))
        );
    }
}
