use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use std::collections::BTreeMap;

/// Parameters a URL is fetched with through the scraping backend
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScrapeParams {
    /// Render the page in a headless browser
    pub render_js: bool,

    /// Enable the backend's anti-bot protection bypass
    pub asp: bool,

    /// Keep the backend's debug trace for the request
    #[serde(default)]
    pub debug: bool,

    /// Proxy country to route through
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub country: Option<String>,

    /// HTTP method
    #[serde(default = "default_method")]
    pub method: String,

    /// Request headers forwarded to the target
    #[serde(default)]
    pub headers: BTreeMap<String, String>,
}

fn default_method() -> String {
    "GET".to_string()
}

/// Browser-like header set sent with every request
pub(crate) fn default_headers() -> BTreeMap<String, String> {
    [
        (
            "User-Agent",
            "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/122.0.0.0 Safari/537.36",
        ),
        (
            "Accept",
            "text/html,application/xhtml+xml,application/xml;q=0.9,image/avif,image/webp,*/*;q=0.8",
        ),
        ("Accept-Language", "de-DE,de;q=0.9,en-US;q=0.8,en;q=0.7"),
        ("Accept-Encoding", "gzip, deflate, br"),
        ("Cache-Control", "no-cache"),
        ("Pragma", "no-cache"),
        ("Sec-Ch-Ua", r#""Chromium";v="122", "Not(A:Brand";v="24", "Google Chrome";v="122""#),
        ("Sec-Ch-Ua-Mobile", "?0"),
        ("Sec-Ch-Ua-Platform", r#""macOS""#),
        ("Sec-Fetch-Dest", "document"),
        ("Sec-Fetch-Mode", "navigate"),
        ("Sec-Fetch-Site", "none"),
        ("Sec-Fetch-User", "?1"),
    ]
    .into_iter()
    .map(|(k, v)| (k.to_string(), v.to_string()))
    .collect()
}

impl Default for ScrapeParams {
    fn default() -> Self {
        Self {
            render_js: false,
            asp: true,
            debug: true,
            country: None,
            method: default_method(),
            headers: default_headers(),
        }
    }
}

/// Timing of the last fetch of a URL
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Timing {
    /// Request attempts made, including the successful one
    pub attempts: u32,

    /// Wall time across all attempts, backoff sleeps included
    pub elapsed_ms: u64,
}

/// Metadata kept for one frontier key
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LinkRecord {
    /// The normalized URL key
    pub url: String,

    /// Last HTTP status code
    pub status_code: Option<u16>,

    /// Content-Type of the last response
    pub content_type: Option<String>,

    /// When the URL was last fetched
    pub crawled_at: Option<DateTime<Utc>>,

    /// Last error message
    pub error: Option<String>,

    /// Proxy country the URL was fetched through
    pub proxy_country: Option<String>,

    /// Whether the page was rendered with JavaScript
    pub render_js: Option<bool>,

    /// Timing of the last fetch
    pub timing: Option<Timing>,

    /// Parameters the URL is fetched with
    #[serde(default)]
    pub scrape_params: ScrapeParams,

    /// URL after following redirects
    #[serde(default)]
    pub final_url: Option<String>,

    /// Every URL visited on the way to `final_url`, in order
    #[serde(default, deserialize_with = "null_as_empty")]
    pub redirect_chain: Vec<String>,

    /// Whether the fetch was redirected
    #[serde(default)]
    pub is_redirected: bool,
}

/// Older snapshots store a missing redirect chain as `null`
fn null_as_empty<'de, D>(deserializer: D) -> Result<Vec<String>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::<Vec<String>>::deserialize(deserializer)?.unwrap_or_default())
}

impl LinkRecord {
    /// Creates an empty record for a newly discovered key
    pub fn new(url: impl Into<String>, scrape_params: ScrapeParams) -> Self {
        Self {
            url: url.into(),
            status_code: None,
            content_type: None,
            crawled_at: None,
            error: None,
            proxy_country: None,
            render_js: None,
            timing: None,
            scrape_params,
            final_url: None,
            redirect_chain: Vec::new(),
            is_redirected: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_params() {
        let params = ScrapeParams::default();
        assert!(!params.render_js);
        assert!(params.asp);
        assert_eq!(params.method, "GET");
        assert!(params.headers.contains_key("User-Agent"));
        assert_eq!(params.headers.len(), 13);
        assert_eq!(params.headers["Sec-Ch-Ua-Mobile"], "?0");
        assert_eq!(params.headers["Sec-Ch-Ua-Platform"], "\"macOS\"");
        assert!(params.headers["Sec-Ch-Ua"].contains("\"Google Chrome\";v=\"122\""));
    }

    #[test]
    fn test_new_record_is_empty() {
        let record = LinkRecord::new("https://example.com/", ScrapeParams::default());
        assert_eq!(record.url, "https://example.com/");
        assert!(record.status_code.is_none());
        assert!(record.redirect_chain.is_empty());
        assert!(!record.is_redirected);
    }

    #[test]
    fn test_deserialize_null_redirect_chain() {
        let json = r#"{
            "url": "https://example.com/",
            "status_code": 200,
            "content_type": "text/html",
            "crawled_at": null,
            "error": null,
            "proxy_country": null,
            "render_js": false,
            "timing": null,
            "scrape_params": {"render_js": false, "asp": true},
            "final_url": null,
            "redirect_chain": null,
            "is_redirected": false
        }"#;

        let record: LinkRecord = serde_json::from_str(json).unwrap();
        assert_eq!(record.status_code, Some(200));
        assert!(record.redirect_chain.is_empty());
        assert_eq!(record.scrape_params.method, "GET");
    }
}
