use thiserror::Error;
use url::Url;

/// Errors produced while normalizing the shop and storefront URLs.
#[derive(Error, Debug)]
pub enum UrlError {
    /// The URL string could not be parsed.
    #[error("Invalid URL: {0}")]
    Invalid(#[from] url::ParseError),
    /// The URL uses a scheme other than http or https.
    #[error("Unsupported scheme: {0} (only http/https allowed)")]
    UnsupportedScheme(String),
    /// The URL has no host component.
    #[error("URL has no host")]
    MissingHost,
    /// Plain HTTP to a non-local host.
    #[error("Insecure URL: HTTPS required (except localhost for testing)")]
    Insecure,
}

fn is_local(url: &Url) -> bool {
    matches!(url.host_str(), Some("localhost") | Some("127.0.0.1") | Some("[::1]"))
}

/// Normalizes the upstream shop address into an API origin.
///
/// Accepts a bare domain (`racoon-lab.myshopify.com`) or a full URL. Bare
/// domains get `https://`. Plain `http://` is only allowed for localhost so the
/// access token is never sent in clear text to a real shop.
///
/// ```
/// use shopfeed::util::normalize_shop_url;
///
/// let url = normalize_shop_url("racoon-lab.myshopify.com").unwrap();
/// assert_eq!(url.as_str(), "https://racoon-lab.myshopify.com/");
/// assert!(normalize_shop_url("http://example.com").is_err());
/// ```
pub fn normalize_shop_url(raw: &str) -> Result<Url, UrlError> {
    let trimmed = raw.trim().trim_end_matches('/');
    let candidate = if trimmed.contains("://") {
        trimmed.to_string()
    } else {
        format!("https://{trimmed}")
    };

    let mut url = Url::parse(&candidate)?;
    match url.scheme() {
        "https" => {}
        "http" if is_local(&url) => {
            tracing::warn!(url = %url, "Using non-HTTPS shop URL (localhost only)");
        }
        "http" => return Err(UrlError::Insecure),
        scheme => return Err(UrlError::UnsupportedScheme(scheme.to_owned())),
    }
    if url.host_str().is_none() {
        return Err(UrlError::MissingHost);
    }

    // Only the origin matters; API paths are appended per request
    url.set_path("/");
    url.set_query(None);
    url.set_fragment(None);
    Ok(url)
}

/// Normalizes the public storefront URL used to build item links.
///
/// The result has no trailing slash so `"{base}/products/{handle}"` composes
/// cleanly.
pub fn normalize_base_url(raw: &str) -> Result<String, UrlError> {
    let url = Url::parse(raw.trim())?;
    match url.scheme() {
        "http" | "https" => {}
        scheme => return Err(UrlError::UnsupportedScheme(scheme.to_owned())),
    }
    if url.host_str().is_none() {
        return Err(UrlError::MissingHost);
    }
    Ok(url.as_str().trim_end_matches('/').to_string())
}
