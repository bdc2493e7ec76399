use axum::{
    extract::Request,
    http::{HeaderMap, header},
    middleware::Next,
    response::Response,
};
use std::fmt;

/// Represents an API version
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ApiVersion {
    V1,
    #[default]
    V2,
}

pub const SUPPORTED_VERSIONS: &str = "v1,v2";

impl ApiVersion {
    /// Get the URL path segment for this version
    pub fn path_segment(&self) -> &'static str {
        match self {
            ApiVersion::V1 => "v1",
            ApiVersion::V2 => "v2",
        }
    }

    /// Parse a version string into an ApiVersion
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "v1" | "1" | "1.0" => Some(ApiVersion::V1),
            "v2" | "2" | "2.0" => Some(ApiVersion::V2),
            _ => None,
        }
    }

    /// Check if this version is deprecated
    pub fn is_deprecated(&self) -> bool {
        match self {
            ApiVersion::V1 => true,
            ApiVersion::V2 => false,
        }
    }
}

impl fmt::Display for ApiVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.path_segment())
    }
}

/// Extension type for storing API version in request
#[derive(Debug, Clone, Copy)]
pub struct RequestApiVersion(pub ApiVersion);

/// Extract API version from Accept header
/// Format: application/vnd.mutt.v2+json
fn extract_version_from_accept(accept: &str) -> Option<ApiVersion> {
    if accept.contains("application/vnd.mutt.") {
        let parts: Vec<&str> = accept.split('.').collect();
        if parts.len() >= 3 {
            let version_part = parts[2].split('+').next()?;
            return ApiVersion::from_str(version_part);
        }
    }
    None
}

/// Middleware for API version negotiation. Every response carries the
/// negotiated version and the supported set; deprecated versions are
/// flagged so callers can migrate before removal.
pub async fn version_middleware(headers: HeaderMap, mut request: Request, next: Next) -> Response {
    let requested_version = headers
        .get(header::ACCEPT)
        .and_then(|v| v.to_str().ok())
        .and_then(extract_version_from_accept)
        .unwrap_or_default();

    request
        .extensions_mut()
        .insert(RequestApiVersion(requested_version));

    let mut response = next.run(request).await;

    let headers = response.headers_mut();
    if !headers.contains_key("X-API-Version") {
        headers.insert(
            "X-API-Version",
            requested_version.to_string().parse().unwrap(),
        );
    }
    headers.insert(
        "X-API-Supported-Versions",
        SUPPORTED_VERSIONS.parse().unwrap(),
    );
    if requested_version.is_deprecated() {
        headers.insert("X-API-Deprecated", "true".parse().unwrap());
    }

    response
}

/// Route-level middleware for deprecated path aliases: stamps the old
/// version and the deprecation flag regardless of Accept negotiation.
pub async fn deprecated_v1_middleware(request: Request, next: Next) -> Response {
    let mut response = next.run(request).await;

    let headers = response.headers_mut();
    headers.insert("X-API-Version", "v1".parse().unwrap());
    headers.insert("X-API-Deprecated", "true".parse().unwrap());

    response
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version_parsing() {
        assert_eq!(ApiVersion::from_str("v1"), Some(ApiVersion::V1));
        assert_eq!(ApiVersion::from_str("V2"), Some(ApiVersion::V2));
        assert_eq!(ApiVersion::from_str("2"), Some(ApiVersion::V2));
        assert_eq!(ApiVersion::from_str("1.0"), Some(ApiVersion::V1));
        assert_eq!(ApiVersion::from_str("v3"), None);
    }

    #[test]
    fn test_accept_header_parsing() {
        assert_eq!(
            extract_version_from_accept("application/vnd.mutt.v2+json"),
            Some(ApiVersion::V2)
        );
        assert_eq!(
            extract_version_from_accept("application/vnd.mutt.v1+json"),
            Some(ApiVersion::V1)
        );
        assert_eq!(extract_version_from_accept("application/json"), None);
    }

    #[test]
    fn only_v1_is_deprecated() {
        assert!(ApiVersion::V1.is_deprecated());
        assert!(!ApiVersion::V2.is_deprecated());
        assert_eq!(ApiVersion::default(), ApiVersion::V2);
    }
}
