//! CORS policy built from `[server.cors]`.

use axum::http::{header, HeaderValue, Method};
use tower_http::cors::{AllowOrigin, Any, CorsLayer};

use va_domain::config::CorsConfig;

const METHODS: [Method; 5] = [
    Method::GET,
    Method::POST,
    Method::PATCH,
    Method::DELETE,
    Method::OPTIONS,
];

/// Build the CORS layer. A lone `"*"` allows every origin (without
/// credentials); otherwise origins are matched by [`origin_allowed`].
pub fn layer(cors: &CorsConfig) -> CorsLayer {
    let base = CorsLayer::new()
        .allow_methods(METHODS)
        .allow_headers([header::CONTENT_TYPE, header::AUTHORIZATION]);

    if cors.is_wildcard() {
        tracing::warn!("CORS configured with wildcard \"*\", all origins allowed");
        return base.allow_origin(Any);
    }

    let allowed = cors.allowed_origins.clone();
    base.allow_origin(AllowOrigin::predicate(move |origin: &HeaderValue, _| {
        origin
            .to_str()
            .map(|o| origin_allowed(&allowed, o))
            .unwrap_or(false)
    }))
    .allow_credentials(true)
}

/// Exact match, or a `scheme://host:*` pattern matching any numeric port.
pub fn origin_allowed(allowed: &[String], origin: &str) -> bool {
    allowed.iter().any(|pattern| match pattern.strip_suffix('*') {
        Some(prefix) if prefix.ends_with(':') => origin
            .strip_prefix(prefix)
            .is_some_and(|port| !port.is_empty() && port.bytes().all(|b| b.is_ascii_digit())),
        _ => pattern == origin,
    })
}
