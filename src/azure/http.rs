//! HTTP utilities for Azure REST API calls

use crate::error::{ApiError, ApiResult};
use reqwest::{Client, RequestBuilder, StatusCode};
use serde_json::Value;

/// Maximum length of response body to log (to avoid logging sensitive data)
const MAX_LOG_BODY_LENGTH: usize = 200;

const USER_AGENT: &str = concat!("azinv/", env!("CARGO_PKG_VERSION"));

/// Sanitize response body for logging
/// Truncates long responses and drops non-printable characters
fn sanitize_for_log(body: &str) -> String {
    let truncated = if body.len() > MAX_LOG_BODY_LENGTH {
        let cut = (0..=MAX_LOG_BODY_LENGTH)
            .rev()
            .find(|i| body.is_char_boundary(*i))
            .unwrap_or(0);
        format!("{}... [truncated, {} bytes total]", &body[..cut], body.len())
    } else {
        body.to_string()
    };

    truncated.replace(|c: char| !c.is_ascii_graphic() && c != ' ', "")
}

/// Map a non-success status into the collector's error taxonomy
pub fn status_error(status: StatusCode, url: &str) -> ApiError {
    match status.as_u16() {
        404 => ApiError::NotFound(url.to_string()),
        409 => ApiError::Conflict(url.to_string()),
        401 | 403 => ApiError::Unauthorized(status.to_string()),
        code => ApiError::Http {
            status: code,
            message: status.canonical_reason().unwrap_or("unknown").to_string(),
        },
    }
}

/// HTTP client wrapper for Azure Resource Manager calls
#[derive(Clone)]
pub struct ArmHttpClient {
    client: Client,
}

impl ArmHttpClient {
    /// Create a new HTTP client
    pub fn new() -> ApiResult<Self> {
        let client = Client::builder().user_agent(USER_AGENT).build()?;
        Ok(Self { client })
    }

    /// Make a GET request to an ARM endpoint
    pub async fn get(&self, url: &str, token: &str) -> ApiResult<Value> {
        tracing::debug!("GET {}", url);
        self.send(self.client.get(url).bearer_auth(token), url).await
    }

    /// Make a POST request to an ARM endpoint
    pub async fn post(&self, url: &str, token: &str, body: Option<&Value>) -> ApiResult<Value> {
        tracing::debug!("POST {}", url);

        let mut request = self.client.post(url).bearer_auth(token);
        request = match body {
            Some(body) => request.json(body),
            None => request.header(reqwest::header::CONTENT_LENGTH, 0),
        };

        self.send(request, url).await
    }

    async fn send(&self, request: RequestBuilder, url: &str) -> ApiResult<Value> {
        let response = request.send().await?;

        let status = response.status();
        let body = response.text().await?;

        if !status.is_success() {
            // Only log sanitized/truncated error body to avoid leaking sensitive data
            tracing::debug!("API error: {} - {}", status, sanitize_for_log(&body));
            return Err(status_error(status, url));
        }

        // Handle empty response
        if body.is_empty() {
            return Ok(Value::Null);
        }

        Ok(serde_json::from_str(&body)?)
    }
}

/// Fetches raw template bodies over HTTP
#[async_trait::async_trait]
pub trait TemplateTransport: Send + Sync {
    async fn fetch(&self, uri: &str) -> ApiResult<String>;
}

/// Template downloader honoring proxy and TLS settings
#[derive(Clone)]
pub struct HttpTemplateFetcher {
    client: Client,
}

impl HttpTemplateFetcher {
    pub fn new(proxy: Option<&str>, ssl_verify: bool) -> ApiResult<Self> {
        let mut builder = Client::builder()
            .user_agent(USER_AGENT)
            .danger_accept_invalid_certs(!ssl_verify);

        if let Some(proxy) = proxy {
            builder = builder.proxy(reqwest::Proxy::all(proxy)?);
        }

        Ok(Self {
            client: builder.build()?,
        })
    }
}

#[async_trait::async_trait]
impl TemplateTransport for HttpTemplateFetcher {
    async fn fetch(&self, uri: &str) -> ApiResult<String> {
        tracing::debug!("GET template {}", uri);

        let response = self.client.get(uri).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(status_error(status, uri));
        }

        Ok(response.text().await?)
    }
}

/// Format an error for terminal display without leaking API details
pub fn format_api_error(error: &ApiError) -> String {
    match error {
        ApiError::Unauthorized(_) => {
            "Authentication failed. Run 'az login' or set AZURE_ACCESS_TOKEN.".to_string()
        }
        ApiError::NotFound(_) => "Resource not found.".to_string(),
        ApiError::Conflict(_) => "Resource conflict.".to_string(),
        ApiError::Http { status: 429, .. } => {
            "Rate limit exceeded. Please try again later.".to_string()
        }
        ApiError::Http { status, .. } if *status >= 500 => {
            "Azure service temporarily unavailable. Please try again.".to_string()
        }
        ApiError::Http { status, .. } => format!("Request failed with status {status}."),
        ApiError::Transport(_) => {
            "Request failed. Check your network connection and try again.".to_string()
        }
        ApiError::Decode(_) => "Unexpected response from Azure.".to_string(),
    }
}
