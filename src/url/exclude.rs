use url::Url;

/// Checks if a URL matches any user exclusion pattern
///
/// A pattern matches when it is a plain substring of the URL's path. There is
/// no globbing and no regex. Empty patterns never match.
///
/// # Examples
///
/// ```
/// use scrapfly_crawl::url::should_exclude;
///
/// let patterns = vec!["/private".to_string()];
/// assert!(should_exclude("https://example.com/private/page", &patterns));
/// assert!(!should_exclude("https://example.com/public?q=/private", &patterns));
/// ```
pub fn should_exclude(url: &str, patterns: &[String]) -> bool {
    if patterns.is_empty() {
        return false;
    }

    let path = match Url::parse(url) {
        Ok(parsed) => parsed.path().to_string(),
        Err(_) => url.to_string(),
    };

    patterns
        .iter()
        .filter(|p| !p.is_empty())
        .any(|p| path.contains(p.as_str()))
}
