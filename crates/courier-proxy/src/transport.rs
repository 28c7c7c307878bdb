use async_trait::async_trait;
use bytes::Bytes;
use courier_pipeline::{HttpRequest, HttpResponse, NetworkError, Transport};
use http_body_util::{BodyExt, Full};
use hyper::header::{HeaderName, HeaderValue};
use hyper::Request;
use hyper_util::client::legacy::connect::HttpConnector;
use hyper_util::client::legacy::Client;
use hyper_util::rt::TokioExecutor;
use std::collections::BTreeMap;

/// Headers that describe a single connection and must not be forwarded.
pub const HOP_BY_HOP: &[&str] = &[
    "connection",
    "keep-alive",
    "proxy-connection",
    "te",
    "trailer",
    "transfer-encoding",
    "upgrade",
    "host",
];

pub fn is_hop_by_hop(name: &str) -> bool {
    HOP_BY_HOP.iter().any(|h| name.eq_ignore_ascii_case(h))
}

/// Fold a repeated response header into the flat header map. `set-cookie`
/// cannot be comma-joined, so its last value wins.
fn merge_header(headers: &mut BTreeMap<String, String>, name: &str, value: &str) {
    if name.eq_ignore_ascii_case("set-cookie") {
        headers.insert(name.to_string(), value.to_string());
        return;
    }
    headers
        .entry(name.to_string())
        .and_modify(|v| {
            v.push_str(", ");
            v.push_str(value);
        })
        .or_insert_with(|| value.to_string());
}

/// Plain-HTTP upstream transport on the hyper legacy client.
#[derive(Clone)]
pub struct HyperTransport {
    client: Client<HttpConnector, Full<Bytes>>,
}

impl HyperTransport {
    pub fn new() -> Self {
        Self {
            client: Client::builder(TokioExecutor::new()).build_http(),
        }
    }
}

impl Default for HyperTransport {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Transport for HyperTransport {
    async fn execute(&self, request: &HttpRequest) -> Result<HttpResponse, NetworkError> {
        let url = request.full_url();
        let mut builder = Request::builder().method(request.method.clone()).uri(&url);
        for (name, value) in &request.headers {
            if is_hop_by_hop(name) {
                continue;
            }
            match (
                HeaderName::from_bytes(name.as_bytes()),
                HeaderValue::from_str(value),
            ) {
                (Ok(name), Ok(value)) => builder = builder.header(name, value),
                _ => tracing::debug!(header = %name, "dropping invalid request header"),
            }
        }
        let body = request.body.clone().unwrap_or_default();
        let upstream_req = builder
            .body(Full::new(body))
            .map_err(|e| NetworkError::Transport(format!("invalid upstream request: {e}")))?;

        let upstream_resp = self.client.request(upstream_req).await.map_err(|e| {
            if e.is_connect() {
                NetworkError::Connect(e.to_string())
            } else {
                NetworkError::Transport(e.to_string())
            }
        })?;

        let status = upstream_resp.status().as_u16();
        let mut headers: BTreeMap<String, String> = BTreeMap::new();
        for (name, value) in upstream_resp.headers() {
            if is_hop_by_hop(name.as_str()) {
                continue;
            }
            let Ok(value) = value.to_str() else {
                continue;
            };
            merge_header(&mut headers, name.as_str(), value);
        }

        let body = upstream_resp
            .into_body()
            .collect()
            .await
            .map_err(|e| NetworkError::Transport(format!("failed to read upstream body: {e}")))?
            .to_bytes();

        Ok(HttpResponse {
            status,
            headers,
            body,
            cache_status: None,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hop_by_hop_detection() {
        assert!(is_hop_by_hop("Connection"));
        assert!(is_hop_by_hop("transfer-encoding"));
        assert!(is_hop_by_hop("host"));
        assert!(!is_hop_by_hop("content-type"));
        assert!(!is_hop_by_hop("etag"));
    }

    #[test]
    fn repeated_headers_merge_except_set_cookie() {
        let mut headers = BTreeMap::new();
        merge_header(&mut headers, "vary", "accept");
        merge_header(&mut headers, "vary", "accept-encoding");
        merge_header(&mut headers, "set-cookie", "a=1; Path=/");
        merge_header(&mut headers, "set-cookie", "b=2; Path=/");

        assert_eq!(headers["vary"], "accept, accept-encoding");
        assert_eq!(headers["set-cookie"], "b=2; Path=/");
    }

    #[tokio::test]
    async fn unreachable_upstream_is_connect_error() {
        // Bind then drop to get a port nothing listens on.
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let transport = HyperTransport::new();
        let err = transport
            .execute(&HttpRequest::get(format!("http://{addr}/")))
            .await
            .unwrap_err();
        assert!(matches!(err, NetworkError::Connect(_)));
    }

    #[tokio::test]
    async fn forwards_to_live_upstream() {
        use axum::routing::get;
        let app = axum::Router::new().route(
            "/items/{id}",
            get(|axum::extract::Path(id): axum::extract::Path<u32>| async move {
                (
                    axum::response::AppendHeaders([
                        ("etag", "\"v1\""),
                        ("set-cookie", "session=a"),
                        ("set-cookie", "theme=dark"),
                    ]),
                    format!("item {id}"),
                )
            }),
        );
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.ok();
        });

        let transport = HyperTransport::new();
        let resp = transport
            .execute(&HttpRequest::get(format!("http://{addr}/items/7")))
            .await
            .unwrap();
        assert_eq!(resp.status, 200);
        assert_eq!(resp.body, "item 7");
        assert_eq!(resp.header("etag"), Some("\"v1\""));
        assert_eq!(resp.header("set-cookie"), Some("theme=dark"));
    }
}
