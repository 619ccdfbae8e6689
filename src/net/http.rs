use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, AUTHORIZATION, CONTENT_TYPE};
use reqwest::Response;
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use url::Url;

use crate::error::{EtlError, EtlResult};
use crate::net::rate_limit::RateLimiter;

// ---------------------------------------------------------------------------
// UpstreamClient: one JSON-over-HTTP client per upstream
// ---------------------------------------------------------------------------

/// HTTP client the source adapters talk through. Every request goes through
/// the shared rate limiter, so retry and backoff behavior is identical for
/// REST and GraphQL calls.
#[derive(Clone)]
pub struct UpstreamClient {
    http: reqwest::Client,
    base_url: Url,
    limiter: Arc<RateLimiter>,
}

impl UpstreamClient {
    pub fn new(
        base_url: &str,
        token: &str,
        accept: Option<&str>,
        timeout: Duration,
        limiter: Arc<RateLimiter>,
    ) -> EtlResult<Self> {
        let base_url: Url = base_url.parse()?;

        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        headers.insert(
            ACCEPT,
            HeaderValue::from_str(accept.unwrap_or("application/json"))
                .map_err(|err| EtlError::Config(format!("invalid accept header: {err}")))?,
        );
        let mut auth = HeaderValue::from_str(&format!("Bearer {token}"))
            .map_err(|err| EtlError::Config(format!("invalid token: {err}")))?;
        auth.set_sensitive(true);
        headers.insert(AUTHORIZATION, auth);

        let http = reqwest::Client::builder()
            .default_headers(headers)
            .timeout(timeout)
            .build()?;

        Ok(Self {
            http,
            base_url,
            limiter,
        })
    }

    pub fn limiter(&self) -> &RateLimiter {
        &self.limiter
    }

    /// Join a path against the base URL.
    fn url(&self, path: &str) -> EtlResult<Url> {
        self.base_url
            .join(path.trim_start_matches('/'))
            .map_err(EtlError::UrlParse)
    }

    /// Execute a GET and decode the JSON body, retrying per the limiter's
    /// policy.
    pub async fn get_json(&self, path: &str, query: &[(&str, String)]) -> EtlResult<Value> {
        let url = self.url(path)?;
        self.limiter
            .execute(|| {
                let request = self.http.get(url.clone()).query(query);
                async move {
                    let resp = request.send().await?;
                    self.decode_response(resp).await
                }
            })
            .await
    }

    /// Execute a GraphQL query against an absolute endpoint URL. Transport
    /// is HTTP 200 even on failure; the `errors` array decides.
    pub async fn post_graphql(
        &self,
        endpoint: &str,
        query: &str,
        variables: Value,
    ) -> EtlResult<Value> {
        let url: Url = endpoint.parse()?;
        let body = json!({ "query": query, "variables": variables });
        self.limiter
            .execute(|| {
                let request = self.http.post(url.clone()).json(&body);
                async move {
                    let resp = request.send().await?;
                    let value = self.decode_response(resp).await?;
                    check_graphql_errors(value)
                }
            })
            .await
    }

    async fn decode_response(&self, resp: Response) -> EtlResult<Value> {
        self.observe_rate_headers(&resp);
        let status = resp.status();
        if status.is_success() {
            Ok(resp.json::<Value>().await?)
        } else {
            Err(status_error(status.as_u16(), resp).await)
        }
    }

    fn observe_rate_headers(&self, resp: &Response) {
        let header = |name: &str| {
            resp.headers()
                .get(name)
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.parse::<i64>().ok())
        };
        self.limiter.state().observe(
            header("X-RateLimit-Remaining"),
            header("X-RateLimit-Reset"),
        );
    }
}

/// Map a non-success status to the error taxonomy: 429 (and GitHub's
/// 403-with-rate-limit-body) is a rate limit with the reset hint attached,
/// everything else keeps its status for the retryable/permanent split.
async fn status_error(status: u16, resp: Response) -> EtlError {
    let reset_at = resp
        .headers()
        .get("X-RateLimit-Reset")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.parse::<i64>().ok());
    let message = resp.text().await.unwrap_or_default();
    let rate_limited =
        status == 429 || (status == 403 && message.to_ascii_lowercase().contains("rate limit"));
    if rate_limited {
        EtlError::RateLimited { message, reset_at }
    } else {
        EtlError::Api { status, message }
    }
}

/// GraphQL error dialect: a "rate limit" message retries as 429, anything
/// else is permanent for the current repository.
fn check_graphql_errors(value: Value) -> EtlResult<Value> {
    let Some(errors) = value.get("errors").and_then(Value::as_array) else {
        return Ok(value);
    };
    if errors.is_empty() {
        return Ok(value);
    }
    let messages: Vec<String> = errors
        .iter()
        .map(|e| {
            e.get("message")
                .and_then(Value::as_str)
                .unwrap_or("unknown GraphQL error")
                .to_string()
        })
        .collect();
    let joined = messages.join("; ");
    if joined.to_ascii_lowercase().contains("rate limit") {
        Err(EtlError::RateLimited {
            message: joined,
            reset_at: None,
        })
    } else {
        Err(EtlError::GraphQl(joined))
    }
}
