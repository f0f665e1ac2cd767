use crate::error::TransportError;
use crate::request::Request;
use crate::request::Response;
use async_trait::async_trait;
use http::HeaderMap;
use http::HeaderValue;
use http::header::CONTENT_TYPE;

/// Header names the backend and proxies use to correlate requests.
const REQUEST_ID_HEADERS: [&str; 2] = ["x-request-id", "x-correlation-id"];

#[async_trait]
pub trait HttpTransport: Send + Sync {
    async fn execute(&self, req: Request) -> Result<Response, TransportError>;
}

/// [`HttpTransport`] over a shared `reqwest` connection pool. Every request
/// is logged at debug level with its outcome; bodies are never logged.
#[derive(Clone, Debug)]
pub struct ReqwestTransport {
    client: reqwest::Client,
}

impl ReqwestTransport {
    pub fn new(client: reqwest::Client) -> Self {
        Self { client }
    }

    fn build(&self, req: Request) -> Result<reqwest::RequestBuilder, TransportError> {
        let Request {
            method,
            url,
            mut headers,
            body,
            timeout,
        } = req;

        let parsed = reqwest::Url::parse(&url)
            .map_err(|err| TransportError::Build(format!("invalid url {url}: {err}")))?;
        let mut builder = self.client.request(method, parsed);
        if let Some(timeout) = timeout {
            builder = builder.timeout(timeout);
        }
        if let Some(body) = body {
            headers
                .entry(CONTENT_TYPE)
                .or_insert(HeaderValue::from_static("application/json"));
            builder = builder.json(&body);
        }
        Ok(builder.headers(headers))
    }

    fn map_error(err: reqwest::Error) -> TransportError {
        if err.is_timeout() {
            TransportError::Timeout
        } else {
            TransportError::Network(err.to_string())
        }
    }
}

fn request_ids(headers: &HeaderMap) -> Vec<(&'static str, String)> {
    REQUEST_ID_HEADERS
        .iter()
        .filter_map(|&name| {
            let value = headers.get(name)?.to_str().ok()?;
            Some((name, value.to_string()))
        })
        .collect()
}

impl Default for ReqwestTransport {
    fn default() -> Self {
        Self::new(reqwest::Client::new())
    }
}

#[async_trait]
impl HttpTransport for ReqwestTransport {
    async fn execute(&self, req: Request) -> Result<Response, TransportError> {
        let method = req.method.clone();
        let url = req.url.clone();
        let builder = self.build(req)?;

        let resp = match builder.send().await {
            Ok(resp) => resp,
            Err(err) => {
                tracing::debug!(
                    %method,
                    %url,
                    status = err.status().map(|s| s.as_u16()),
                    error = %err,
                    "Request failed"
                );
                return Err(Self::map_error(err));
            }
        };
        let status = resp.status();
        let headers = resp.headers().clone();
        tracing::debug!(
            %method,
            %url,
            %status,
            request_ids = ?request_ids(&headers),
            "Request completed"
        );

        let bytes = resp.bytes().await.map_err(Self::map_error)?;
        if !status.is_success() {
            let body = String::from_utf8(bytes.to_vec()).ok();
            return Err(TransportError::Http {
                status,
                url: Some(url),
                headers: Some(headers),
                body,
            });
        }
        Ok(Response {
            status,
            headers,
            body: bytes,
        })
    }
}
