//! CORS (Cross-Origin Resource Sharing) support

use http::HeaderValue;
use http::header::{
    ACCESS_CONTROL_ALLOW_CREDENTIALS, ACCESS_CONTROL_ALLOW_HEADERS, ACCESS_CONTROL_ALLOW_METHODS,
    ACCESS_CONTROL_ALLOW_ORIGIN, ACCESS_CONTROL_MAX_AGE, VARY,
};
use hyper::HeaderMap;

const ALLOW_METHODS: HeaderValue = HeaderValue::from_static("GET, POST, OPTIONS");
const ALLOW_HEADERS: HeaderValue =
    HeaderValue::from_static("Content-Type, Accept, Authorization, Sec-WebSocket-Protocol");
const MAX_AGE: HeaderValue = HeaderValue::from_static("86400");

/// Which browser origins may talk to the network transport.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum CorsPolicy {
    /// No cross-origin access
    #[default]
    Disabled,
    /// Exactly the listed origins
    AllowList(Vec<String>),
    /// Any origin, reflected back in `Access-Control-Allow-Origin`
    Dynamic,
}

impl CorsPolicy {
    /// Dynamic reflection wins over the allow-list when both are configured.
    pub fn from_options(enable_dynamic_cors: bool, allowed_origins: &[String]) -> Self {
        if enable_dynamic_cors {
            CorsPolicy::Dynamic
        } else if allowed_origins.is_empty() {
            CorsPolicy::Disabled
        } else {
            CorsPolicy::AllowList(
                allowed_origins
                    .iter()
                    .map(|origin| origin.trim_end_matches('/').to_string())
                    .collect(),
            )
        }
    }

    pub fn allows(&self, origin: &str) -> bool {
        match self {
            CorsPolicy::Disabled => false,
            CorsPolicy::Dynamic => true,
            CorsPolicy::AllowList(origins) => {
                let origin = origin.trim_end_matches('/');
                origins.iter().any(|allowed| allowed == "*" || allowed == origin)
            }
        }
    }

    /// Add CORS headers for a request from `origin`. Returns whether the origin was allowed;
    /// a disallowed or missing origin gets no `Access-Control-Allow-Origin` header.
    pub fn apply(&self, headers: &mut HeaderMap, origin: Option<&str>) -> bool {
        let Some(origin) = origin else {
            return false;
        };
        if !self.allows(origin) {
            return false;
        }
        let Ok(value) = HeaderValue::from_str(origin) else {
            return false;
        };

        headers.insert(ACCESS_CONTROL_ALLOW_ORIGIN, value);
        headers.insert(ACCESS_CONTROL_ALLOW_METHODS, ALLOW_METHODS);
        headers.insert(ACCESS_CONTROL_ALLOW_HEADERS, ALLOW_HEADERS);
        headers.insert(ACCESS_CONTROL_ALLOW_CREDENTIALS, HeaderValue::from_static("true"));
        headers.insert(ACCESS_CONTROL_MAX_AGE, MAX_AGE);
        headers.append(VARY, HeaderValue::from_static("Origin"));
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn allow_list() -> CorsPolicy {
        CorsPolicy::from_options(false, &["https://example.com/".to_string()])
    }

    #[test]
    fn test_policy_from_options() {
        assert_eq!(CorsPolicy::from_options(false, &[]), CorsPolicy::Disabled);
        assert_eq!(
            CorsPolicy::from_options(true, &["https://example.com".to_string()]),
            CorsPolicy::Dynamic
        );
        assert_eq!(
            allow_list(),
            CorsPolicy::AllowList(vec!["https://example.com".to_string()])
        );
    }

    #[test]
    fn test_allowed_origin_gets_headers() {
        let mut headers = HeaderMap::new();
        assert!(allow_list().apply(&mut headers, Some("https://example.com")));

        assert_eq!(
            headers.get(ACCESS_CONTROL_ALLOW_ORIGIN).unwrap(),
            "https://example.com"
        );
        assert_eq!(headers.get(ACCESS_CONTROL_ALLOW_CREDENTIALS).unwrap(), "true");
        assert!(headers.contains_key(ACCESS_CONTROL_ALLOW_METHODS));
        assert!(headers.contains_key(ACCESS_CONTROL_MAX_AGE));
    }

    #[test]
    fn test_disallowed_origin_gets_no_headers() {
        let mut headers = HeaderMap::new();
        assert!(!allow_list().apply(&mut headers, Some("https://evil.example")));
        assert!(!CorsPolicy::Disabled.apply(&mut headers, Some("https://example.com")));
        assert!(!allow_list().apply(&mut headers, None));
        assert!(headers.get(ACCESS_CONTROL_ALLOW_ORIGIN).is_none());
    }

    #[test]
    fn test_dynamic_policy_reflects_origin() {
        let mut headers = HeaderMap::new();
        assert!(CorsPolicy::Dynamic.apply(&mut headers, Some("http://localhost:3000")));
        assert_eq!(
            headers.get(ACCESS_CONTROL_ALLOW_ORIGIN).unwrap(),
            "http://localhost:3000"
        );
    }
}
