use axum::{
    extract::{ConnectInfo, Request},
    http::HeaderValue,
    middleware::Next,
    response::Response,
};
use std::net::SocketAddr;
use std::time::Instant;
use tracing::info;
use uuid::Uuid;

pub const REQUEST_ID: &str = "x-request-id";

/// Logging middleware for request/response tracking. Tags every request
/// with an `x-request-id`, keeping one the client already sent.
pub async fn logging_middleware(mut request: Request, next: Next) -> Response {
    let method = request.method().clone();
    let uri = request.uri().clone();
    let client_ip = get_client_ip(&request);
    let request_id = ensure_request_id(&mut request);
    let started = Instant::now();

    info!(
        target: "cmdgate::middleware",
        request_id = %request_id,
        method = %method,
        uri = %uri,
        client_ip = %client_ip,
        "Incoming request"
    );

    let mut response = next.run(request).await;

    info!(
        target: "cmdgate::middleware",
        request_id = %request_id,
        method = %method,
        uri = %uri,
        status = %response.status(),
        elapsed_ms = started.elapsed().as_millis() as u64,
        "Request completed"
    );

    if let Ok(value) = HeaderValue::from_str(&request_id) {
        response.headers_mut().insert(REQUEST_ID, value);
    }
    response
}

fn ensure_request_id(request: &mut Request) -> String {
    if let Some(existing) = request
        .headers()
        .get(REQUEST_ID)
        .and_then(|v| v.to_str().ok())
        .filter(|v| !v.is_empty())
    {
        return existing.to_string();
    }

    let id = Uuid::new_v4().to_string();
    if let Ok(value) = HeaderValue::from_str(&id) {
        request.headers_mut().insert(REQUEST_ID, value);
    }
    id
}

fn get_client_ip(request: &Request) -> String {
    // Try to get real IP from headers first
    if let Some(forwarded) = request.headers().get("x-forwarded-for") {
        if let Ok(forwarded_str) = forwarded.to_str() {
            if let Some(first_ip) = forwarded_str.split(',').next() {
                return first_ip.trim().to_string();
            }
        }
    }

    if let Some(real_ip) = request.headers().get("x-real-ip") {
        if let Ok(ip_str) = real_ip.to_str() {
            return ip_str.to_string();
        }
    }

    if let Some(ConnectInfo(addr)) = request.extensions().get::<ConnectInfo<SocketAddr>>() {
        addr.ip().to_string()
    } else {
        "unknown".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_get_client_ip_with_forwarded_header() {
        let mut request = Request::new(axum::body::Body::empty());
        request.headers_mut().insert(
            "x-forwarded-for",
            HeaderValue::from_static("192.168.1.1, 10.0.0.1"),
        );

        assert_eq!(get_client_ip(&request), "192.168.1.1");
    }

    #[test]
    fn test_get_client_ip_fallback() {
        let request = Request::new(axum::body::Body::empty());
        assert_eq!(get_client_ip(&request), "unknown");
    }

    #[test]
    fn test_request_id_generated_when_absent() {
        let mut request = Request::new(axum::body::Body::empty());
        let id = ensure_request_id(&mut request);

        assert!(Uuid::parse_str(&id).is_ok());
        assert_eq!(request.headers().get(REQUEST_ID).unwrap(), id.as_str());
    }

    #[test]
    fn test_request_id_propagated() {
        let mut request = Request::new(axum::body::Body::empty());
        request
            .headers_mut()
            .insert(REQUEST_ID, HeaderValue::from_static("abc-123"));

        assert_eq!(ensure_request_id(&mut request), "abc-123");
    }
}
