//! HTML link extraction
//!
//! Pulls raw link targets out of a page. Resolution, normalization and
//! filtering happen afterwards in [`crate::url::filter_links`].

use scraper::{Html, Selector};

/// Schemes that never lead to a crawlable page
const SKIPPED_PREFIXES: &[&str] = &["javascript:", "mailto:", "tel:", "data:", "#"];

/// Extracts the raw href values of a page
///
/// # Link Extraction Rules
///
/// **Include:**
/// - `<a href="...">` anywhere in the document
/// - `<link rel="canonical" href="...">`
///
/// **Exclude:**
/// - `<a href="..." download>`
/// - `javascript:`, `mailto:`, `tel:` and `data:` links
/// - Fragment-only links
///
/// `rel="nofollow"` links are kept.
///
/// # Returns
///
/// * `Ok(Vec<String>)` - Trimmed hrefs in document order, duplicates included
/// * `Err(String)` - A selector could not be built
///
/// # Example
///
/// ```
/// use scrapfly_crawl::crawler::extract_links;
///
/// let html = r#"<html><body><a href="/page">Link</a><a href="mailto:x@y.z">Mail</a></body></html>"#;
/// assert_eq!(extract_links(html).unwrap(), vec!["/page"]);
/// ```
pub fn extract_links(html: &str) -> Result<Vec<String>, String> {
    let anchor_selector = Selector::parse("a[href]").map_err(|e| format!("invalid selector: {:?}", e))?;
    let canonical_selector =
        Selector::parse("link[rel='canonical'][href]").map_err(|e| format!("invalid selector: {:?}", e))?;

    let document = Html::parse_document(html);
    let mut links = Vec::new();

    for element in document.select(&anchor_selector) {
        if element.value().attr("download").is_some() {
            continue;
        }
        if let Some(href) = element.value().attr("href").and_then(keep_href) {
            links.push(href);
        }
    }

    for element in document.select(&canonical_selector) {
        if let Some(href) = element.value().attr("href").and_then(keep_href) {
            links.push(href);
        }
    }

    Ok(links)
}

fn keep_href(href: &str) -> Option<String> {
    let href = href.trim();
    if href.is_empty() {
        return None;
    }

    let lower = href.to_ascii_lowercase();
    if SKIPPED_PREFIXES.iter().any(|prefix| lower.starts_with(prefix)) {
        return None;
    }

    Some(href.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extract_relative_and_absolute() {
        let html = r#"<html><body><a href="/other">A</a><a href="https://other.com/page">B</a><a href="rel">C</a></body></html>"#;
        assert_eq!(extract_links(html).unwrap(), vec!["/other", "https://other.com/page", "rel"]);
    }

    #[test]
    fn test_skip_special_schemes() {
        let html = r#"
            <html><body>
                <a href="javascript:void(0)">js</a>
                <a href="JavaScript:alert(1)">js</a>
                <a href="mailto:test@example.com">mail</a>
                <a href="tel:+1234567890">call</a>
                <a href="data:text/html,x">data</a>
                <a href="/kept">kept</a>
            </body></html>
        "#;
        assert_eq!(extract_links(html).unwrap(), vec!["/kept"]);
    }

    #[test]
    fn test_skip_download_and_fragment_only() {
        let html = r##"<html><body><a href="/file.zip" download>d</a><a href="#top">t</a><a href="  ">e</a></body></html>"##;
        assert!(extract_links(html).unwrap().is_empty());
    }

    #[test]
    fn test_follow_nofollow_links() {
        let html = r#"<html><body><a href="/page" rel="nofollow">Link</a></body></html>"#;
        assert_eq!(extract_links(html).unwrap(), vec!["/page"]);
    }

    #[test]
    fn test_extract_canonical_link() {
        let html = r#"<html><head><link rel="canonical" href="https://example.com/canonical" /><link rel="stylesheet" href="/a.css"></head><body></body></html>"#;
        assert_eq!(extract_links(html).unwrap(), vec!["https://example.com/canonical"]);
    }

    #[test]
    fn test_malformed_html_is_tolerated() {
        let html = r#"<html><body><div><a href="/one">one<a href="/two">two</div></p></html>"#;
        let links = extract_links(html).unwrap();
        assert_eq!(links, vec!["/one", "/two"]);
    }

    #[test]
    fn test_duplicates_are_kept() {
        let html = r#"<a href="/x">1</a><a href="/x">2</a>"#;
        assert_eq!(extract_links(html).unwrap().len(), 2);
    }
}
