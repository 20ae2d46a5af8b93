use crate::config::RateLimitConfig;
use crate::domain::LimiterKind;
use crate::errors::{AppError, Result};
use crate::observability::MetricsRecorder;
use crate::rate_limit::limiter::AdmissionControl;
use axum::{
    extract::{ConnectInfo, Request, State},
    http::{header::HeaderName, HeaderMap},
    middleware::Next,
    response::{IntoResponse, Response},
};
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;

/// State for the admission middleware
#[derive(Clone)]
pub struct AdmissionFilter {
    admission: Arc<dyn AdmissionControl>,
    token_header: HeaderName,
    trust_proxy_headers: bool,
}

impl AdmissionFilter {
    pub fn new(
        admission: Arc<dyn AdmissionControl>,
        token_header: &str,
        trust_proxy_headers: bool,
    ) -> Result<Self> {
        let token_header = HeaderName::from_bytes(token_header.trim().as_bytes()).map_err(|e| {
            AppError::Configuration(format!("Invalid token header '{}': {}", token_header, e))
        })?;

        Ok(Self {
            admission,
            token_header,
            trust_proxy_headers,
        })
    }

    pub fn from_config(
        admission: Arc<dyn AdmissionControl>,
        config: &RateLimitConfig,
    ) -> Result<Self> {
        Self::new(admission, &config.token_header, config.trust_proxy_headers)
    }

    /// Pick the identifier for a request: the API token when present,
    /// otherwise the client IP
    fn identify(&self, request: &Request) -> Result<(String, LimiterKind)> {
        if let Some(token) = extract_token(request.headers(), &self.token_header) {
            return Ok((token, LimiterKind::Token));
        }

        let forwarded = if self.trust_proxy_headers {
            extract_forwarded_ip(request.headers())
        } else {
            None
        };

        let ip = forwarded
            .or_else(|| {
                request
                    .extensions()
                    .get::<ConnectInfo<SocketAddr>>()
                    .map(|ConnectInfo(addr)| addr.ip())
            })
            .ok_or_else(|| AppError::Internal("Unable to determine client address".to_string()))?;

        Ok((ip.to_string(), LimiterKind::Ip))
    }
}

/// Rate limiting middleware
pub async fn rate_limit_middleware(
    State(filter): State<AdmissionFilter>,
    request: Request,
    next: Next,
) -> Response {
    let method = request.method().as_str().to_owned();

    let response = match admit(&filter, request, next).await {
        Ok(response) => response,
        Err(e) => e.into_response(),
    };

    MetricsRecorder::record_http_request(&method, response.status().as_u16());

    response
}

async fn admit(filter: &AdmissionFilter, request: Request, next: Next) -> Result<Response> {
    let (identifier, kind) = filter.identify(&request)?;

    let allowed = filter.admission.is_allowed(&identifier, kind).await?;

    if !allowed {
        tracing::warn!(
            identifier = %identifier,
            kind = %kind,
            "Rate limit exceeded"
        );

        return Err(AppError::RateLimitExceeded);
    }

    Ok(next.run(request).await)
}

/// Non-empty API token from the configured header
fn extract_token(headers: &HeaderMap, header: &HeaderName) -> Option<String> {
    headers
        .get(header)
        .and_then(|value| value.to_str().ok())
        .map(str::trim)
        .filter(|token| !token.is_empty())
        .map(str::to_string)
}

/// Client IP as reported by a fronting proxy
fn extract_forwarded_ip(headers: &HeaderMap) -> Option<IpAddr> {
    let forwarded_for = headers
        .get("x-forwarded-for")
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.split(',').next())
        .and_then(|first| first.trim().parse::<IpAddr>().ok());

    forwarded_for.or_else(|| {
        headers
            .get("x-real-ip")
            .and_then(|value| value.to_str().ok())
            .and_then(|value| value.trim().parse::<IpAddr>().ok())
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rate_limit::error::{RateLimitError, Result as LimitResult};
    use async_trait::async_trait;
    use axum::{body::Body, http::StatusCode, middleware::from_fn_with_state, routing::get, Router};
    use parking_lot::Mutex;
    use tower::ServiceExt;

    /// Admission control returning a fixed verdict and recording its calls
    struct MockAdmission {
        verdict: std::result::Result<bool, ()>,
        calls: Mutex<Vec<(String, LimiterKind)>>,
    }

    impl MockAdmission {
        fn new(verdict: std::result::Result<bool, ()>) -> Arc<Self> {
            Arc::new(Self {
                verdict,
                calls: Mutex::new(Vec::new()),
            })
        }

        fn calls(&self) -> Vec<(String, LimiterKind)> {
            self.calls.lock().clone()
        }
    }

    #[async_trait]
    impl AdmissionControl for MockAdmission {
        async fn is_allowed(&self, identifier: &str, kind: LimiterKind) -> LimitResult<bool> {
            self.calls.lock().push((identifier.to_string(), kind));
            self.verdict
                .map_err(|_| RateLimitError::StorageUnavailable("test error".to_string()))
        }
    }

    fn app(admission: Arc<MockAdmission>, trust_proxy_headers: bool) -> Router {
        let filter = AdmissionFilter::new(admission, "API_KEY", trust_proxy_headers).unwrap();

        Router::new()
            .route("/", get(|| async { "ok" }))
            .layer(from_fn_with_state(filter, rate_limit_middleware))
    }

    fn request(headers: &[(&str, &str)], peer: Option<[u8; 4]>) -> Request {
        let mut builder = axum::http::Request::builder().uri("/");
        for (name, value) in headers {
            builder = builder.header(*name, *value);
        }

        let mut request = builder.body(Body::empty()).unwrap();
        if let Some(ip) = peer {
            request
                .extensions_mut()
                .insert(ConnectInfo(SocketAddr::from((ip, 40000))));
        }
        request
    }

    #[tokio::test]
    async fn test_allowed_request_with_token() {
        let admission = MockAdmission::new(Ok(true));
        let response = app(admission.clone(), true)
            .oneshot(request(&[("API_KEY", "test-token")], Some([10, 0, 0, 1])))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        // Token wins over the peer address
        assert_eq!(
            admission.calls(),
            vec![("test-token".to_string(), LimiterKind::Token)]
        );
    }

    #[tokio::test]
    async fn test_blocked_request_with_token() {
        let admission = MockAdmission::new(Ok(false));
        let response = app(admission, true)
            .oneshot(request(&[("API_KEY", "test-token")], None))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
    }

    #[tokio::test]
    async fn test_allowed_request_without_token() {
        let admission = MockAdmission::new(Ok(true));
        let response = app(admission.clone(), true)
            .oneshot(request(&[], Some([192, 168, 1, 1])))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            admission.calls(),
            vec![("192.168.1.1".to_string(), LimiterKind::Ip)]
        );
    }

    #[tokio::test]
    async fn test_blocked_request_without_token() {
        let admission = MockAdmission::new(Ok(false));
        let response = app(admission, true)
            .oneshot(request(&[], Some([192, 168, 1, 1])))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
    }

    #[tokio::test]
    async fn test_error_from_admission_control() {
        let admission = MockAdmission::new(Err(()));
        let response = app(admission, true)
            .oneshot(request(&[], Some([192, 168, 1, 1])))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[tokio::test]
    async fn test_empty_token_falls_back_to_ip() {
        let admission = MockAdmission::new(Ok(true));
        app(admission.clone(), true)
            .oneshot(request(&[("API_KEY", "  ")], Some([172, 16, 0, 9])))
            .await
            .unwrap();

        assert_eq!(
            admission.calls(),
            vec![("172.16.0.9".to_string(), LimiterKind::Ip)]
        );
    }

    #[tokio::test]
    async fn test_forwarded_for_used_when_trusted() {
        let admission = MockAdmission::new(Ok(true));
        app(admission.clone(), true)
            .oneshot(request(
                &[("x-forwarded-for", "203.0.113.42, 10.0.0.1")],
                Some([10, 0, 0, 1]),
            ))
            .await
            .unwrap();

        assert_eq!(
            admission.calls(),
            vec![("203.0.113.42".to_string(), LimiterKind::Ip)]
        );
    }

    #[tokio::test]
    async fn test_forwarded_for_ignored_when_untrusted() {
        let admission = MockAdmission::new(Ok(true));
        app(admission.clone(), false)
            .oneshot(request(&[("x-forwarded-for", "203.0.113.42")], Some([10, 0, 0, 1])))
            .await
            .unwrap();

        assert_eq!(
            admission.calls(),
            vec![("10.0.0.1".to_string(), LimiterKind::Ip)]
        );
    }

    #[tokio::test]
    async fn test_missing_client_address() {
        let admission = MockAdmission::new(Ok(true));
        let response = app(admission.clone(), true)
            .oneshot(request(&[], None))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert!(admission.calls().is_empty());
    }

    #[test]
    fn test_extract_forwarded_ip() {
        let mut headers = HeaderMap::new();
        headers.insert("x-real-ip", "203.0.113.42".parse().unwrap());
        assert_eq!(
            extract_forwarded_ip(&headers),
            Some("203.0.113.42".parse().unwrap())
        );

        // An unparseable X-Forwarded-For falls through to X-Real-IP
        headers.insert("x-forwarded-for", "garbage".parse().unwrap());
        assert_eq!(
            extract_forwarded_ip(&headers),
            Some("203.0.113.42".parse().unwrap())
        );

        assert_eq!(extract_forwarded_ip(&HeaderMap::new()), None);
    }

    #[test]
    fn test_invalid_token_header_name() {
        let admission = MockAdmission::new(Ok(true));
        assert!(matches!(
            AdmissionFilter::new(admission, "bad header", true),
            Err(AppError::Configuration(_))
        ));
    }
}
