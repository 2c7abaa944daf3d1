//! URL handling module
//!
//! This module provides URL normalization into frontier keys, domain
//! extraction, non-content resource detection and user exclusion patterns.

mod domain;
mod exclude;
mod normalize;
mod resource;

use std::collections::HashSet;
use url::Url;

// Re-export main functions
pub use domain::{domain_of, extract_domain};
pub use exclude::should_exclude;
pub use normalize::{normalize_absolute, normalize_url};
pub use resource::{has_resource_extension, is_resource_url};

/// Filters raw anchor hrefs down to crawlable same-domain frontier keys
///
/// Each href is resolved against `base_url` and normalized. Resource URLs,
/// URLs on another domain than `base_url` and URLs matching an exclusion
/// pattern are discarded. The result has set semantics and no ordering.
///
/// # Examples
///
/// ```
/// use scrapfly_crawl::url::filter_links;
/// use url::Url;
///
/// let base = Url::parse("https://example.com/").unwrap();
/// let links = filter_links(
///     &base,
///     ["/a", "/a#top", "https://other.com/", "/logo.png"],
///     &[],
/// );
/// assert_eq!(links.len(), 1);
/// assert!(links.contains("https://example.com/a"));
/// ```
pub fn filter_links<'a, I>(base_url: &Url, raw_links: I, exclude_patterns: &[String]) -> HashSet<String>
where
    I: IntoIterator<Item = &'a str>,
{
    let Some(domain) = extract_domain(base_url) else {
        return HashSet::new();
    };

    let mut keys = HashSet::new();

    for raw in raw_links {
        if raw.trim().is_empty() {
            continue;
        }

        let normalized = match normalize_url(base_url, raw) {
            Ok(n) => n,
            Err(e) => {
                tracing::trace!("Skipping link {}: {}", raw, e);
                continue;
            }
        };

        let key = normalized.as_str();

        if is_resource_url(key) {
            continue;
        }

        if extract_domain(&normalized).as_deref() != Some(domain.as_str()) {
            continue;
        }

        if should_exclude(key, exclude_patterns) {
            continue;
        }

        keys.insert(normalized.to_string());
    }

    keys
}
