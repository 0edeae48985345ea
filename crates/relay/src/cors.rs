// CORS policy for the relay's HTTP surface.
//
// Origins come from `RelayConfig::cors_origins`: `"*"` allows any origin, a
// comma-separated list allows exactly those, and unset falls back to local
// whiteboard dev servers.

use axum::http::{HeaderName, HeaderValue, Method};
use tower_http::cors::{AllowOrigin, CorsLayer};

use crate::error::REQUEST_ID_HEADER;

const DEFAULT_DEV_ORIGINS: &[&str] = &[
    "http://localhost:3000",
    "http://localhost:5173",
    "http://127.0.0.1:3000",
    "http://127.0.0.1:5173",
];

/// The relay carries no credentials, so no configuration allows them.
pub fn cors_layer(origins: Option<&str>) -> CorsLayer {
    let base = CorsLayer::new()
        .allow_methods([Method::GET, Method::OPTIONS])
        .allow_headers([axum::http::header::CONTENT_TYPE, HeaderName::from_static(REQUEST_ID_HEADER)])
        .expose_headers([HeaderName::from_static(REQUEST_ID_HEADER)])
        .max_age(std::time::Duration::from_secs(3600));

    match origins.map(str::trim) {
        Some("*") => base.allow_origin(AllowOrigin::any()),
        Some(list) => base.allow_origin(parse_origins(list)),
        None => base.allow_origin(parse_origins(&DEFAULT_DEV_ORIGINS.join(","))),
    }
}

fn parse_origins(comma_separated: &str) -> Vec<HeaderValue> {
    comma_separated
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .filter_map(|s| HeaderValue::from_str(s).ok())
        .collect()
}
