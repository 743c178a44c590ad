use std::collections::HashMap;
use std::sync::Arc;

use once_cell::sync::Lazy;
use regex::Regex;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use url::Url;

use crate::config::FetchSettings;
use crate::cookies::Cookies;

// ── Constants ────────────────────────────────────────────────────────────────

const USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/124.0 Safari/537.36";
const ACCEPT: &str =
    "text/html,application/xhtml+xml,application/xml;q=0.9,image/avif,image/webp,*/*;q=0.8";
const ACCEPT_LANGUAGE: &str = "en-US,en;q=0.9";
const MAX_REDIRECTS: usize = 10;

const IMAGE_UPLOAD: &str = "/image/upload/";
const ZEE5_IMAGE_HOST: &str = "akamaividz.zee5.com";
const ZEE5_WIDTH: &str = "w_1920";
const ZEE5_HEIGHT: &str = "h_1080";

/// Characters that regularly trail a URL embedded in markup or inline JSON.
const TRAILING_JUNK: &[char] = &['"', ')', '.', ',', '>', ']', '}', '\\'];

// ── Platforms ────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Platform {
    Hotstar,
    JioCinema,
    SonyLiv,
    Zee5,
    AirtelXstream,
    DangalPlay,
    Voot,
}

impl Platform {
    pub const ALL: [Platform; 7] = [
        Platform::Hotstar,
        Platform::JioCinema,
        Platform::SonyLiv,
        Platform::Zee5,
        Platform::AirtelXstream,
        Platform::DangalPlay,
        Platform::Voot,
    ];

    pub fn domain(self) -> &'static str {
        match self {
            Platform::Hotstar => "hotstar.com",
            Platform::JioCinema => "jiocinema.com",
            Platform::SonyLiv => "sonyliv.com",
            Platform::Zee5 => "zee5.com",
            Platform::AirtelXstream => "airtelxstream.in",
            Platform::DangalPlay => "dangalplay.com",
            Platform::Voot => "voot.com",
        }
    }

    /// JSON key prefix whose string value is the page's poster image.
    fn marker(self) -> Option<&'static str> {
        match self {
            Platform::Hotstar => Some(r#""posterImage":{"url":""#),
            Platform::JioCinema => Some(r#""thumbnail":""#),
            Platform::SonyLiv => Some(r#""imageUri":""#),
            Platform::Zee5 => Some(r#""image_url":""#),
            Platform::AirtelXstream => Some(r#""poster":""#),
            Platform::DangalPlay => Some(r#""image":""#),
            Platform::Voot => None,
        }
    }

    pub fn from_url(url: &Url) -> Option<Platform> {
        let host = url.host_str()?;
        Platform::ALL
            .into_iter()
            .find(|p| host_matches(host, p.domain()))
    }
}

fn host_matches(host: &str, domain: &str) -> bool {
    let host = host.to_ascii_lowercase();
    host == domain
        || host
            .strip_suffix(domain)
            .is_some_and(|prefix| prefix.ends_with('.'))
}

// ── Lazy static regexes ──────────────────────────────────────────────────────

/// CDN templates in scan order. Results keep this order.
static CDN_TEMPLATES: Lazy<Vec<(Platform, Regex)>> = Lazy::new(|| {
    [
        (
            Platform::Zee5,
            r#"https://akamaividz\.zee5\.com/image/upload/[^\s"'<>]+pr_[^\s"'<>]+"#,
        ),
        (
            Platform::Hotstar,
            r#"https://img1\.hotstar\.com/image/upload/[^\s"'<>]+pr_[^\s"'<>]+"#,
        ),
        (
            Platform::Hotstar,
            r#"https://img\.hotstar\.com/image/upload/[^\s"'<>]+pr_[^\s"'<>]+"#,
        ),
        (
            Platform::SonyLiv,
            r#"https://shimageapi\.sonyliv\.com/[^\s"'<>]+?\.jpg[^\s"'<>]*"#,
        ),
        (
            Platform::SonyLiv,
            r#"https://setimages\.sonyliv\.com/[^\s"'<>]+?\.jpg[^\s"'<>]*"#,
        ),
        (
            Platform::JioCinema,
            r#"https://jiocinemacdn\.jiocinema\.com/[^\s"'<>]+?\.jpg[^\s"'<>]*"#,
        ),
        (
            Platform::JioCinema,
            r#"https://jiocinemaimages-a\.akamaihd\.net/[^\s"'<>]+?\.jpg[^\s"'<>]*"#,
        ),
        (
            Platform::Voot,
            r#"https://v3img\.voot\.com/[^\s"'<>]+?\.jpg[^\s"'<>]*"#,
        ),
        (
            Platform::DangalPlay,
            r#"https://images\.dangalplay\.com/[^\s"'<>]+?\.jpg[^\s"'<>]*"#,
        ),
        (
            Platform::AirtelXstream,
            r#"https://assets-airtelxstream\.in/[^\s"'<>]+?\.jpg[^\s"'<>]*"#,
        ),
    ]
    .into_iter()
    .map(|(platform, pattern)| (platform, Regex::new(pattern).unwrap()))
    .collect()
});

static ZEE5_WIDTH_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\bw_\d+").unwrap());

static ZEE5_HEIGHT_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\bh_\d+").unwrap());

// ── Error type ───────────────────────────────────────────────────────────────

#[derive(Debug, thiserror::Error)]
pub enum ExtractionError {
    #[error("Invalid URL: {0}")]
    InvalidUrl(String),
    #[error("Invalid header: {0}")]
    InvalidHeader(String),
    #[error("HTTP error: {0}")]
    Upstream(reqwest::StatusCode),
    #[error("{0}")]
    Request(String),
}

// ── Public API ───────────────────────────────────────────────────────────────

/// Fetches `page_url` and returns every thumbnail found on it, best first.
///
/// An empty list means the page loaded but carried no known CDN image.
pub async fn extract_thumbnails(
    page_url: &str,
    headers: &HashMap<String, String>,
    cookies: &Cookies,
    settings: &FetchSettings,
) -> Result<Vec<String>, ExtractionError> {
    let url = validate_url(page_url)?;
    let html = fetch_page(&url, headers, cookies, settings).await?;
    let thumbnails = thumbnails_from_html(&html, &url);
    tracing::info!(url = %url, count = thumbnails.len(), "thumbnail extraction finished");
    Ok(thumbnails)
}

// ── URL validation ───────────────────────────────────────────────────────────

pub fn validate_url(raw: &str) -> Result<Url, ExtractionError> {
    let parsed = Url::parse(raw.trim()).map_err(|e| ExtractionError::InvalidUrl(e.to_string()))?;
    match parsed.scheme() {
        "http" | "https" => Ok(parsed),
        other => Err(ExtractionError::InvalidUrl(format!(
            "unsupported scheme '{}'",
            other
        ))),
    }
}

// ── HTTP fetch ───────────────────────────────────────────────────────────────

pub async fn fetch_page(
    url: &Url,
    headers: &HashMap<String, String>,
    cookies: &Cookies,
    settings: &FetchSettings,
) -> Result<String, ExtractionError> {
    let request_headers = build_headers(headers)?;

    let mut builder = reqwest::ClientBuilder::new()
        .timeout(settings.timeout)
        .redirect(reqwest::redirect::Policy::limited(MAX_REDIRECTS));

    if !cookies.is_empty() {
        builder = builder.cookie_provider(cookie_jar(url, cookies));
    }

    if settings.insecure_ssl {
        builder = builder.danger_accept_invalid_certs(true);
    }

    let client = builder
        .build()
        .map_err(|e| ExtractionError::Request(e.to_string()))?;

    tracing::debug!(url = %url, cookies = cookies.len(), headers = headers.len(), "fetching page");

    let response = client
        .get(url.clone())
        .headers(request_headers)
        .send()
        .await
        .map_err(|e| {
            if e.is_timeout() {
                ExtractionError::Request(format!("TimeoutError: {}", e))
            } else if e.is_connect() {
                ExtractionError::Request(format!("ConnectError: {}", e))
            } else {
                ExtractionError::Request(format!("RequestError: {}", e))
            }
        })?;

    let status = response.status();
    if !status.is_success() {
        tracing::warn!(url = %url, %status, "upstream returned an error");
        return Err(ExtractionError::Upstream(status));
    }

    response
        .text()
        .await
        .map_err(|e| ExtractionError::Request(e.to_string()))
}

/// Browser-like defaults, overridden by name with the caller's headers.
fn build_headers(overrides: &HashMap<String, String>) -> Result<HeaderMap, ExtractionError> {
    let mut headers = HeaderMap::new();
    headers.insert(reqwest::header::USER_AGENT, HeaderValue::from_static(USER_AGENT));
    headers.insert(reqwest::header::ACCEPT, HeaderValue::from_static(ACCEPT));
    headers.insert(
        reqwest::header::ACCEPT_LANGUAGE,
        HeaderValue::from_static(ACCEPT_LANGUAGE),
    );
    headers.insert(reqwest::header::CACHE_CONTROL, HeaderValue::from_static("no-cache"));

    for (name, value) in overrides {
        let name = HeaderName::from_bytes(name.trim().as_bytes())
            .map_err(|_| ExtractionError::InvalidHeader(format!("bad header name {:?}", name)))?;
        let value = HeaderValue::from_str(value)
            .map_err(|_| ExtractionError::InvalidHeader(format!("bad value for {}", name)))?;
        headers.insert(name, value);
    }

    Ok(headers)
}

/// Cookies are scoped to the platform's registrable domain when the page
/// belongs to a known platform, so they survive redirects between its
/// subdomains. Otherwise they are host-only.
fn cookie_jar(url: &Url, cookies: &Cookies) -> Arc<reqwest::cookie::Jar> {
    let jar = reqwest::cookie::Jar::default();
    let domain = Platform::from_url(url).map(Platform::domain);
    for (name, value) in cookies {
        let cookie = match domain {
            Some(domain) => format!("{}={}; Domain={}; Path=/", name, value, domain),
            None => format!("{}={}; Path=/", name, value),
        };
        jar.add_cookie_str(&cookie, url);
    }
    Arc::new(jar)
}

// ── Main extraction pipeline ─────────────────────────────────────────────────

pub fn thumbnails_from_html(html: &str, page_url: &Url) -> Vec<String> {
    let mut raw = scan_cdn_urls(html);

    if raw.is_empty() {
        if let Some(platform) = Platform::from_url(page_url) {
            if let Some(url) = marker_thumbnail(html, platform) {
                tracing::debug!(?platform, "no CDN template matched, using page marker");
                raw.push(url);
            }
        }
    }

    let mut thumbnails: Vec<String> = Vec::with_capacity(raw.len());
    for url in raw.iter().map(|u| normalize(u)) {
        if !thumbnails.contains(&url) {
            thumbnails.push(url);
        }
    }
    thumbnails
}

/// Every CDN template match, in template order then document order.
pub fn scan_cdn_urls(html: &str) -> Vec<String> {
    let mut found: Vec<String> = Vec::new();
    for (platform, re) in CDN_TEMPLATES.iter() {
        for m in re.find_iter(html) {
            let url = m.as_str().trim_end_matches(TRAILING_JUNK);
            if !url.is_empty() && !found.iter().any(|f| f == url) {
                tracing::debug!(?platform, url, "CDN template matched");
                found.push(url.to_string());
            }
        }
    }
    found
}

/// Value of the first platform marker that holds an absolute URL.
pub fn marker_thumbnail(html: &str, platform: Platform) -> Option<String> {
    let marker = platform.marker()?;
    html.match_indices(marker).find_map(|(idx, _)| {
        let rest = &html[idx + marker.len()..];
        let value = &rest[..rest.find('"')?];
        value.starts_with("http").then(|| value.to_string())
    })
}

// ── URL post-processing ──────────────────────────────────────────────────────

/// Forces the largest rendition each CDN is known to serve.
pub fn normalize(url: &str) -> String {
    let mut url = url.replace("\\u0026", "&");
    let host = Url::parse(&url)
        .ok()
        .and_then(|u| u.host_str().map(str::to_ascii_lowercase))
        .unwrap_or_default();

    if host == ZEE5_IMAGE_HOST {
        url = ZEE5_WIDTH_RE.replace_all(&url, ZEE5_WIDTH).into_owned();
        url = ZEE5_HEIGHT_RE.replace_all(&url, ZEE5_HEIGHT).into_owned();
        if url.contains(IMAGE_UPLOAD) && !url.contains(ZEE5_WIDTH) && !url.contains(ZEE5_HEIGHT) {
            url = url.replacen(IMAGE_UPLOAD, "/image/upload/w_1920,h_1080,c_scale/", 1);
        }
    }

    if host_matches(&host, Platform::Hotstar.domain())
        && url.contains(IMAGE_UPLOAD)
        && !url.contains("f_auto")
    {
        url = url.replacen(IMAGE_UPLOAD, "/image/upload/f_auto,", 1);
    }

    url
}
