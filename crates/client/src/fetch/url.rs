//! URL resolution for manifest entries and primed URLs.

use url::Url;

/// Error type for URL resolution failures.
#[derive(Debug, Clone, thiserror::Error)]
pub enum UrlError {
    #[error("empty URL")]
    Empty,

    #[error("unsupported scheme: {0}")]
    UnsupportedScheme(String),

    #[error("cross-origin URL: {0}")]
    CrossOrigin(String),

    #[error("invalid URL: {0}")]
    InvalidUrl(String),
}

/// Resolve a path or absolute URL against the agent origin.
///
/// Normalization steps:
/// 1. Trim leading/trailing whitespace
/// 2. Join relative input onto `origin`
/// 3. Lowercase the host
/// 4. Remove fragment (#...)
/// 5. Keep query string intact (do not reorder)
///
/// The result must share `origin`'s origin; stores never hold foreign entries.
pub fn resolve(origin: &Url, input: &str) -> Result<Url, UrlError> {
    let trimmed = input.trim();

    if trimmed.is_empty() {
        return Err(UrlError::Empty);
    }

    let mut parsed = origin.join(trimmed).map_err(|e| UrlError::InvalidUrl(e.to_string()))?;

    match parsed.scheme() {
        "http" | "https" => {}
        scheme => return Err(UrlError::UnsupportedScheme(scheme.to_string())),
    }

    if let Some(host) = parsed.host_str() {
        let host = host.to_lowercase();
        parsed
            .set_host(Some(&host))
            .map_err(|e| UrlError::InvalidUrl(e.to_string()))?;
    }

    parsed.set_fragment(None);

    if parsed.origin() != origin.origin() {
        return Err(UrlError::CrossOrigin(parsed.to_string()));
    }

    Ok(parsed)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn origin() -> Url {
        Url::parse("https://app.example").unwrap()
    }

    #[test]
    fn test_resolve_path() {
        let url = resolve(&origin(), "/icons/icon-192x192.png").unwrap();
        assert_eq!(url.as_str(), "https://app.example/icons/icon-192x192.png");
    }

    #[test]
    fn test_resolve_absolute_same_origin() {
        let url = resolve(&origin(), "https://APP.example/games").unwrap();
        assert_eq!(url.host_str(), Some("app.example"));
        assert_eq!(url.path(), "/games");
    }

    #[test]
    fn test_resolve_remove_fragment() {
        let url = resolve(&origin(), "/progress#week").unwrap();
        assert_eq!(url.fragment(), None);
        assert_eq!(url.path(), "/progress");
    }

    #[test]
    fn test_resolve_preserve_query() {
        let url = resolve(&origin(), "/check-in?b=2&a=1").unwrap();
        assert_eq!(url.query(), Some("b=2&a=1"));
    }

    #[test]
    fn test_resolve_trim_whitespace() {
        let url = resolve(&origin(), "  /settings  ").unwrap();
        assert_eq!(url.as_str(), "https://app.example/settings");
    }

    #[test]
    fn test_resolve_cross_origin() {
        let result = resolve(&origin(), "https://cdn.example/app.js");
        assert!(matches!(result, Err(UrlError::CrossOrigin(_))));
    }

    #[test]
    fn test_resolve_unsupported_scheme() {
        let result = resolve(&origin(), "file:///etc/passwd");
        assert!(matches!(result, Err(UrlError::UnsupportedScheme(_))));
    }

    #[test]
    fn test_resolve_empty() {
        assert!(matches!(resolve(&origin(), ""), Err(UrlError::Empty)));
        assert!(matches!(resolve(&origin(), "   "), Err(UrlError::Empty)));
    }
}
