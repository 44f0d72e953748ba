//! reqwest-backed [`ApiClient`]

use std::time::Duration;

use async_trait::async_trait;
use url::Url;

use super::traits::{ApiClient, ApiError, ApiRequest, ApiResponse, Method};

/// Default timeout for a single REST call
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// REST client for one instance and one access token
#[derive(Clone, Debug)]
pub struct HttpApiClient {
    http: reqwest::Client,
    base: Url,
    access_token: String,
}

impl HttpApiClient {
    /// Create a client for the instance at `base`
    pub fn new(
        base: Url,
        access_token: impl Into<String>,
        user_agent: &str,
    ) -> Result<Self, ApiError> {
        let http = reqwest::Client::builder()
            .timeout(DEFAULT_REQUEST_TIMEOUT)
            .user_agent(user_agent)
            .build()?;
        Ok(Self {
            http,
            base,
            access_token: access_token.into(),
        })
    }

    /// Underlying HTTP client, shared with the SSE transport
    ///
    /// The per-request timeout applies to calls made here only; streaming
    /// requests should build their own client.
    #[must_use]
    pub fn http(&self) -> &reqwest::Client {
        &self.http
    }

    /// Instance base URL
    #[must_use]
    pub fn base(&self) -> &Url {
        &self.base
    }

    /// Resolve a request path against the base URL
    pub fn url_for(&self, path: &str) -> Result<Url, ApiError> {
        Ok(self.base.join(path)?)
    }
}

#[async_trait]
impl ApiClient for HttpApiClient {
    async fn call(&self, request: ApiRequest) -> Result<ApiResponse, ApiError> {
        let url = self.url_for(&request.path)?;
        let method = match request.method {
            Method::Get => reqwest::Method::GET,
            Method::Post => reqwest::Method::POST,
            Method::Delete => reqwest::Method::DELETE,
        };

        tracing::debug!(method = request.method.as_str(), %url, "API call");

        let mut builder = self
            .http
            .request(method, url)
            .bearer_auth(&self.access_token);
        if !request.query.is_empty() {
            builder = builder.query(&request.query);
        }
        if let Some(body) = &request.body {
            builder = builder.json(body);
        }

        let response = builder.send().await?;
        let status = response.status();
        let headers = response
            .headers()
            .iter()
            .filter_map(|(name, value)| {
                value
                    .to_str()
                    .ok()
                    .map(|v| (name.as_str().to_ascii_lowercase(), v.to_string()))
            })
            .collect();
        let body = response.text().await?;

        if !status.is_success() {
            let err = ApiError::from_body(
                status.as_u16(),
                &body,
                status.canonical_reason().unwrap_or("request failed"),
            );
            tracing::warn!(path = %request.path, error = %err, "API call rejected");
            return Err(err);
        }

        Ok(ApiResponse {
            status: status.as_u16(),
            headers,
            body,
        })
    }
}
