use http::Method;
use http::{HeaderValue, request::Parts as RequestParts};
use tower_http::cors::{AllowOrigin, CorsLayer};

/// Origins the embedded storefront serves the board from.
pub const ORIGIN_URL_ENDSWITH: &[u8] = b".whop.com";

#[cfg(feature = "production")]
pub fn cors_layer() -> CorsLayer {
    CorsLayer::new()
        .allow_methods([Method::GET, Method::POST, Method::PATCH])
        .allow_origin(AllowOrigin::predicate(
            |org: &HeaderValue, _rq_pts: &RequestParts| {
                org.as_bytes().ends_with(ORIGIN_URL_ENDSWITH)
            },
        ))
}

#[cfg(not(feature = "production"))]
pub fn cors_layer() -> CorsLayer {
    CorsLayer::new()
        .allow_methods([Method::GET, Method::POST, Method::PATCH])
        .allow_origin(AllowOrigin::any())
}
