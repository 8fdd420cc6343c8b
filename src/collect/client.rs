use chrono::{DateTime, Utc};
use reqwest::header::HeaderMap;

const LOG_TARGET: &str = "client";

/// Quota information reported by API response headers.
#[derive(Debug, Clone, Copy)]
pub struct RateLimitInfo {
    pub remaining: u32,
    pub reset_at: DateTime<Utc>,
}

/// Classified outcome of one API call.
pub enum ApiResult {
    /// Request succeeded.
    Success(reqwest::Response, Option<RateLimitInfo>),

    /// Quota exhausted upstream (403 or 429). Retry after the reset time.
    RateLimited(RateLimitInfo),

    /// The requested resource does not exist (404).
    NotFound(Option<RateLimitInfo>),

    /// The resource exists but has no content to list (409, e.g. an empty
    /// repository's commit log).
    Conflict(Option<RateLimitInfo>),

    /// Request failed permanently. Do not retry.
    Failed(ohno::AppError, Option<RateLimitInfo>),
}

/// GitHub REST API client.
#[derive(Debug, Clone)]
pub struct Client {
    client: reqwest::Client,
    base_url: String,
}

impl Client {
    /// Create a client authenticated with `token` against `base_url`.
    pub fn new(token: &str, base_url: impl Into<String>) -> crate::Result<Self> {
        use reqwest::header::{ACCEPT, AUTHORIZATION, HeaderValue};

        let mut auth_val = HeaderValue::from_str(&format!("Bearer {token}"))?;
        auth_val.set_sensitive(true);

        let mut headers = HeaderMap::new();
        let _ = headers.insert(AUTHORIZATION, auth_val);
        let _ = headers.insert(ACCEPT, HeaderValue::from_static("application/vnd.github+json"));

        Ok(Self {
            client: reqwest::Client::builder()
                .user_agent("gh-metrics")
                .default_headers(headers)
                .build()?,
            base_url: base_url.into(),
        })
    }

    #[must_use]
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Build a full URL from an API path such as `/repos/acme/widgets/commits`.
    #[must_use]
    pub fn url(&self, path: &str) -> String {
        format!("{}{path}", self.base_url)
    }

    /// Make one API call and classify the result.
    pub async fn get(&self, url: &str) -> ApiResult {
        log::debug!(target: LOG_TARGET, "GET {url}");

        let resp = match self.client.get(url).send().await {
            Ok(r) => r,
            Err(e) => return ApiResult::Failed(e.into(), None),
        };

        let rate_limit = extract_rate_limit_from_headers(resp.headers());

        let status = resp.status();
        if status.is_success() {
            return ApiResult::Success(resp, rate_limit);
        }

        let status_code = status.as_u16();
        if matches!(status_code, 403 | 429) {
            let rate_limit = rate_limit.unwrap_or_else(|| RateLimitInfo {
                remaining: 0,
                reset_at: Utc::now() + chrono::Duration::hours(1),
            });
            return ApiResult::RateLimited(rate_limit);
        }

        if status_code == 404 {
            return ApiResult::NotFound(rate_limit);
        }

        if status_code == 409 {
            return ApiResult::Conflict(rate_limit);
        }

        let error = resp.error_for_status().expect_err("status is not successful at this point");
        ApiResult::Failed(error.into(), rate_limit)
    }
}

/// Extract rate limit information from API response headers.
pub(crate) fn extract_rate_limit_from_headers(headers: &HeaderMap) -> Option<RateLimitInfo> {
    let remaining = headers.get("x-ratelimit-remaining")?.to_str().ok()?.parse::<u32>().ok()?;
    let reset_timestamp = headers.get("x-ratelimit-reset")?.to_str().ok()?.parse::<i64>().ok()?;
    let reset_at = DateTime::from_timestamp(reset_timestamp, 0)?;

    Some(RateLimitInfo { remaining, reset_at })
}

/// Pull the `rel="next"` URL out of a `Link` response header, if present.
pub(crate) fn next_page_url(headers: &HeaderMap) -> Option<String> {
    let link = headers.get("link")?.to_str().ok()?;

    for part in link.split(',') {
        let mut sections = part.split(';');
        let url = sections.next()?.trim().trim_start_matches('<').trim_end_matches('>');
        if sections.any(|s| s.trim() == r#"rel="next""#) {
            return Some(url.to_string());
        }
    }

    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use reqwest::header::HeaderValue;

    #[test]
    fn rate_limit_headers_parse() {
        let mut headers = HeaderMap::new();
        let _ = headers.insert("x-ratelimit-remaining", HeaderValue::from_static("4999"));
        let _ = headers.insert("x-ratelimit-reset", HeaderValue::from_static("1704067200"));

        let info = extract_rate_limit_from_headers(&headers).unwrap();
        assert_eq!(info.remaining, 4999);
        assert_eq!(info.reset_at.timestamp(), 1_704_067_200);
    }

    #[test]
    fn rate_limit_headers_missing_or_invalid() {
        assert!(extract_rate_limit_from_headers(&HeaderMap::new()).is_none());

        let mut headers = HeaderMap::new();
        let _ = headers.insert("x-ratelimit-remaining", HeaderValue::from_static("lots"));
        let _ = headers.insert("x-ratelimit-reset", HeaderValue::from_static("1704067200"));
        assert!(extract_rate_limit_from_headers(&headers).is_none());
    }

    #[test]
    fn link_header_yields_next_url() {
        let mut headers = HeaderMap::new();
        let _ = headers.insert(
            "link",
            HeaderValue::from_static(
                r#"<https://api.github.com/repos/a/b/commits?page=2>; rel="next", <https://api.github.com/repos/a/b/commits?page=9>; rel="last""#,
            ),
        );

        assert_eq!(
            next_page_url(&headers).as_deref(),
            Some("https://api.github.com/repos/a/b/commits?page=2")
        );
    }

    #[test]
    fn link_header_without_next_is_last_page() {
        let mut headers = HeaderMap::new();
        let _ = headers.insert(
            "link",
            HeaderValue::from_static(r#"<https://api.github.com/repos/a/b/commits?page=1>; rel="prev""#),
        );

        assert!(next_page_url(&headers).is_none());
        assert!(next_page_url(&HeaderMap::new()).is_none());
    }

    #[test]
    fn client_builds_urls_from_base() {
        let client = Client::new("t", "https://api.github.com").unwrap();
        assert_eq!(client.url("/orgs/acme/repos"), "https://api.github.com/orgs/acme/repos");
        assert_eq!(client.base_url(), "https://api.github.com");
    }
}
