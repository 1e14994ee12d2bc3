use async_trait::async_trait;
use url::Url;

/// Result of a single HTTP exchange with the News backend or a direct feed.
///
/// Transport failures are folded into the response rather than returned as
/// errors: callers degrade a failed request to "no content" and carry on.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ApiResponse {
    pub http_status: Option<u16>,
    pub etag: Option<String>,
    pub content: Option<String>,
    pub error: Option<String>,
    pub response_time_ms: u64,
}

impl ApiResponse {
    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            error: Some(error.into()),
            ..Default::default()
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self.http_status, Some(status) if (200..300).contains(&status))
    }

    /// The body, when the request succeeded and returned something.
    pub fn body(&self) -> Option<&str> {
        if !self.is_success() {
            return None;
        }
        self.content.as_deref().filter(|body| !body.trim().is_empty())
    }
}

/// HTTP access used by every fetching component.
#[async_trait]
pub trait ApiRequest: Send + Sync {
    async fn get(&self, url: &Url) -> ApiResponse;

    /// Headers only; used for ETag staleness probes.
    async fn head(&self, url: &Url) -> ApiResponse;
}
