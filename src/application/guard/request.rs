//! Request-time input to the guard

use axum::extract::Query;
use axum::http::{HeaderMap, HeaderName, HeaderValue, Method, request::Parts};
use std::collections::HashMap;
use std::net::IpAddr;

use crate::config::TransportConfig;

/// Endpoint-specific limit declared by the caller for one request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EndpointLimit {
    pub max: u32,
    pub window_ms: u64,
}

/// Everything the guard needs to know about an inbound request
#[derive(Debug, Clone)]
pub struct GuardRequest {
    pub method: Method,
    pub path: String,
    /// Route identifier used for endpoint limits; defaults to "{METHOD} {path}"
    pub route: String,
    pub ip: Option<IpAddr>,
    pub headers: HeaderMap,
    pub query: HashMap<String, String>,
    pub cookies: HashMap<String, String>,
    /// Overrides any configured rule for the route
    pub endpoint_limit: Option<EndpointLimit>,
}

impl GuardRequest {
    pub fn new(method: Method, path: impl Into<String>) -> Self {
        let path = path.into();
        Self {
            route: format!("{} {}", method, path),
            method,
            path,
            ip: None,
            headers: HeaderMap::new(),
            query: HashMap::new(),
            cookies: HashMap::new(),
            endpoint_limit: None,
        }
    }

    /// Build from the head of an HTTP request
    ///
    /// The query string is decoded as form data; every `Cookie` header is
    /// parsed and malformed pairs are skipped.
    pub fn from_parts(parts: &Parts, ip: Option<IpAddr>) -> Self {
        let query = Query::<HashMap<String, String>>::try_from_uri(&parts.uri)
            .map(|Query(query)| query)
            .unwrap_or_default();

        let mut cookies = HashMap::new();
        for value in parts.headers.get_all(axum::http::header::COOKIE) {
            let Ok(value) = value.to_str() else {
                continue;
            };
            for cookie in cookie::Cookie::split_parse(value).flatten() {
                cookies.insert(cookie.name().to_string(), cookie.value().to_string());
            }
        }

        let mut request = Self::new(parts.method.clone(), parts.uri.path());
        request.ip = ip;
        request.headers = parts.headers.clone();
        request.query = query;
        request.cookies = cookies;
        request
    }

    pub fn with_ip(mut self, ip: IpAddr) -> Self {
        self.ip = Some(ip);
        self
    }

    pub fn with_route(mut self, route: impl Into<String>) -> Self {
        self.route = route.into();
        self
    }

    /// Add a header; invalid names or values are ignored
    pub fn with_header(mut self, name: &str, value: &str) -> Self {
        if let (Ok(name), Ok(value)) = (HeaderName::try_from(name), HeaderValue::try_from(value)) {
            self.headers.append(name, value);
        }
        self
    }

    pub fn with_query(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.query.insert(name.into(), value.into());
        self
    }

    pub fn with_cookie(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.cookies.insert(name.into(), value.into());
        self
    }

    pub fn with_endpoint_limit(mut self, max: u32, window_ms: u64) -> Self {
        self.endpoint_limit = Some(EndpointLimit { max, window_ms });
        self
    }

    /// Presented token: header, then query parameter, then cookie
    ///
    /// Empty values count as absent.
    pub fn extract_token(&self, transport: &TransportConfig) -> Option<String> {
        let from_header = self
            .headers
            .get(transport.header_name.as_str())
            .and_then(|v| v.to_str().ok())
            .map(str::trim);

        from_header
            .filter(|t| !t.is_empty())
            .or_else(|| self.query.get(&transport.query_param).map(String::as_str).filter(|t| !t.is_empty()))
            .or_else(|| self.cookies.get(&transport.cookie_name).map(String::as_str).filter(|t| !t.is_empty()))
            .map(str::to_string)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::Request;

    fn transport() -> TransportConfig {
        TransportConfig::default()
    }

    #[test]
    fn test_header_wins_over_query_and_cookie() {
        let request = GuardRequest::new(Method::GET, "/items")
            .with_header("x-api-key", "from-header")
            .with_query("api_key", "from-query")
            .with_cookie("api_key", "from-cookie");
        assert_eq!(request.extract_token(&transport()).as_deref(), Some("from-header"));
    }

    #[test]
    fn test_query_wins_over_cookie() {
        let request = GuardRequest::new(Method::GET, "/items")
            .with_query("api_key", "from-query")
            .with_cookie("api_key", "from-cookie");
        assert_eq!(request.extract_token(&transport()).as_deref(), Some("from-query"));
    }

    #[test]
    fn test_empty_values_are_absent() {
        let request = GuardRequest::new(Method::GET, "/items")
            .with_header("x-api-key", "")
            .with_cookie("api_key", "from-cookie");
        assert_eq!(request.extract_token(&transport()).as_deref(), Some("from-cookie"));
        assert!(GuardRequest::new(Method::GET, "/").extract_token(&transport()).is_none());
    }

    #[test]
    fn test_custom_transport_names() {
        let transport = TransportConfig {
            header_name: "authorization-key".to_string(),
            ..Default::default()
        };
        let request = GuardRequest::new(Method::GET, "/").with_header("authorization-key", "abc");
        assert_eq!(request.extract_token(&transport).as_deref(), Some("abc"));
    }

    #[test]
    fn test_from_parts() {
        let (parts, _) = Request::builder()
            .method(Method::POST)
            .uri("/v1/reports?api_key=q-token&x=1")
            .header("cookie", "session=abc; api_key=c-token")
            .body(())
            .unwrap()
            .into_parts();

        let request = GuardRequest::from_parts(&parts, Some("10.0.0.1".parse().unwrap()));
        assert_eq!(request.route, "POST /v1/reports");
        assert_eq!(request.query.get("api_key").map(String::as_str), Some("q-token"));
        assert_eq!(request.cookies.get("api_key").map(String::as_str), Some("c-token"));
        assert_eq!(request.extract_token(&transport()).as_deref(), Some("q-token"));
    }
}
