use url::Url;

/// File extensions of non-content resources that are never enqueued
const RESOURCE_EXTENSIONS: &[&str] = &[
    // Images
    ".jpg", ".jpeg", ".png", ".gif", ".svg", ".webp", ".ico", ".bmp", ".avif", ".tif", ".tiff",
    // Web resources
    ".js", ".css", ".map",
    // Fonts
    ".woff", ".woff2", ".ttf", ".eot", ".otf",
    // Documents
    ".pdf", ".doc", ".docx", ".xls", ".xlsx", ".ppt", ".pptx",
    // Data
    ".json", ".xml",
    // Media
    ".mp4", ".webm", ".mp3", ".wav", ".ogg", ".mov", ".avi", ".m4a",
    // Archives
    ".zip", ".tar", ".gz", ".tgz", ".bz2", ".rar", ".7z",
];

/// Path segments that mark bundled static assets
const RESOURCE_SEGMENTS: &[&str] = &[
    "/assets/", "/static/", "/media/", "/dist/", "/build/", "/vendor/",
];

/// Third-party asset hosts
const RESOURCE_HOSTS: &[&str] = &[
    "fonts.googleapis.com",
    "fonts.gstatic.com",
    "ajax.googleapis.com",
    "cdnjs.cloudflare.com",
    "cdn.jsdelivr.net",
    "unpkg.com",
];

/// Checks if a URL points at a non-content resource
///
/// True when the path ends with a resource extension (images, fonts, archives,
/// stylesheets, scripts, documents, media), contains a static-asset path
/// segment, or the host is a known asset CDN.
///
/// # Examples
///
/// ```
/// use scrapfly_crawl::url::is_resource_url;
///
/// assert!(is_resource_url("https://example.com/logo.PNG"));
/// assert!(is_resource_url("https://example.com/static/app"));
/// assert!(!is_resource_url("https://example.com/about"));
/// ```
pub fn is_resource_url(url: &str) -> bool {
    let (host, path) = host_and_path(url);

    if RESOURCE_EXTENSIONS.iter().any(|ext| path.ends_with(ext)) {
        return true;
    }

    if RESOURCE_SEGMENTS.iter().any(|segment| path.contains(segment)) {
        return true;
    }

    RESOURCE_HOSTS.iter().any(|cdn| host == *cdn)
}

/// Checks only the path extension, ignoring asset segments and hosts
///
/// Used to spot binary payloads served from ordinary content paths.
pub fn has_resource_extension(url: &str) -> bool {
    let (_, path) = host_and_path(url);
    RESOURCE_EXTENSIONS.iter().any(|ext| path.ends_with(ext))
}

fn host_and_path(url: &str) -> (String, String) {
    match Url::parse(url) {
        Ok(parsed) => (
            parsed.host_str().unwrap_or_default().to_lowercase(),
            parsed.path().to_lowercase(),
        ),
        Err(_) => (String::new(), url.to_lowercase()),
    }
}
