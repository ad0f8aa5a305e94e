use axum::http::{header, HeaderName, Method};
use tower_http::cors::{Any, CorsLayer};

/// The questionnaire and test-task pages are served from another origin.
pub fn public_cors() -> CorsLayer {
    CorsLayer::new()
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers([header::CONTENT_TYPE, HeaderName::from_static("x-requested-with")])
        .allow_origin(Any)
}
