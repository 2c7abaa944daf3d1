use crate::UrlError;
use url::form_urlencoded;
use url::Url;

/// Tracking, analytics, cache-busting and session-id query parameters
const TRACKING_PARAMS: &[&str] = &[
    // Ad click identifiers
    "fbclid",
    "gclid",
    "dclid",
    "gbraid",
    "wbraid",
    "msclkid",
    "yclid",
    "igshid",
    // Mailing and analytics
    "mc_cid",
    "mc_eid",
    "_ga",
    "_gl",
    "_hsenc",
    "_hsmi",
    "ref",
    "ref_src",
    // Cache busting
    "_",
    "cb",
    "cachebuster",
    "nocache",
    // Session identifiers
    "sid",
    "sessionid",
    "session_id",
    "phpsessid",
    "jsessionid",
    "aspsessionid",
];

/// Prefixes of whole tracking parameter families
const TRACKING_PREFIXES: &[&str] = &["utm_", "pk_", "mtm_", "hsa_"];

/// Normalizes a possibly relative URL into a frontier key
///
/// # Normalization Steps
///
/// 1. Resolve against `base` if the reference is not absolute
/// 2. Remove tracking query parameters
/// 3. Remove fragment (everything after #)
/// 4. Lowercase scheme and host
///
/// Only HTTP and HTTPS URLs with a host are accepted. Normalization is
/// idempotent: normalizing a key again yields the same key.
///
/// # Examples
///
/// ```
/// use scrapfly_crawl::url::normalize_url;
/// use url::Url;
///
/// let base = Url::parse("https://example.com/docs/").unwrap();
/// let url = normalize_url(&base, "intro?utm_source=x#top").unwrap();
/// assert_eq!(url.as_str(), "https://example.com/docs/intro");
/// ```
pub fn normalize_url(base: &Url, reference: &str) -> Result<Url, UrlError> {
    let url = base
        .join(reference.trim())
        .map_err(|e| UrlError::Parse(format!("{}: {}", reference, e)))?;
    canonicalize(url)
}

/// Normalizes an absolute URL string into a frontier key
pub fn normalize_absolute(url_str: &str) -> Result<Url, UrlError> {
    let url = Url::parse(url_str.trim()).map_err(|e| UrlError::Parse(format!("{}: {}", url_str, e)))?;
    canonicalize(url)
}

/// Applies the normalization steps to an already absolute URL
fn canonicalize(mut url: Url) -> Result<Url, UrlError> {
    if url.scheme() != "http" && url.scheme() != "https" {
        return Err(UrlError::InvalidScheme(format!(
            "Only HTTP and HTTPS schemes are supported, got: {}",
            url.scheme()
        )));
    }

    if url.host_str().map_or(true, str::is_empty) {
        return Err(UrlError::MissingDomain);
    }

    strip_tracking_params(&mut url);
    url.set_fragment(None);

    // The url crate already lowercases scheme and host of special schemes
    // while parsing, so the key is canonical at this point.
    Ok(url)
}

/// Removes tracking parameters, leaving untouched queries byte-for-byte intact
fn strip_tracking_params(url: &mut Url) {
    let Some(query) = url.query() else {
        return;
    };

    if query.is_empty() {
        url.set_query(None);
        return;
    }

    // Kept parameters stay byte-for-byte; only keys are decoded for matching
    let parts: Vec<&str> = query.split('&').collect();
    let kept: Vec<&str> = parts.iter().copied().filter(|part| !is_tracking_part(part)).collect();

    if kept.len() == parts.len() {
        return;
    }

    let rebuilt = kept.join("&");
    if rebuilt.is_empty() {
        url.set_query(None);
    } else {
        url.set_query(Some(&rebuilt));
    }
}

/// Checks if a raw `key=value` query segment carries a tracking parameter
fn is_tracking_part(part: &str) -> bool {
    form_urlencoded::parse(part.as_bytes())
        .next()
        .is_some_and(|(key, _)| is_tracking_param(&key))
}

/// Checks if a query parameter is a tracking parameter
fn is_tracking_param(key: &str) -> bool {
    let key = key.to_ascii_lowercase();

    if TRACKING_PARAMS.contains(&key.as_str()) {
        return true;
    }

    TRACKING_PREFIXES.iter().any(|prefix| key.starts_with(prefix))
}
