use std::net::SocketAddr;
use std::net::{IpAddr, Ipv4Addr};
use std::sync::Arc;

use axum::body::Body;
use axum::extract::{MatchedPath, Request};
use axum::middleware::{self, Next, from_fn};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, patch, post};
use axum::{Json, Router};
use http::StatusCode;
use serde::Serialize;
use thiserror::Error;
use tokio::sync::mpsc::{UnboundedReceiver, UnboundedSender};
use tokio::task::JoinHandle;
use tower_http::trace::TraceLayer;
use tracing::instrument;

use crate::access::resolver::EntitlementResolver;
use crate::api::handler::*;
use crate::api::middleware::capabilities::resolve_capabilities;
use crate::api::middleware::cors::cors_layer;
use crate::config::BoardConfig;
use crate::db::prelude::*;
use crate::db::redis::{RedisStore, redis_pool};
use crate::util::env::Var;
use crate::util::vision::{VisionErr, VisionGateway};
use crate::util::whop::{CommerceApi, EntitlementApi, WhopClient};
use crate::var;

pub type JsonResult<T> = core::result::Result<Json<T>, RouteError>;

pub struct AppState {
    pub resolver: EntitlementResolver,
    pub plays: PlayRepository,
    pub claims: Arc<ClaimLedger>,
    pub vision: Arc<VisionGateway>,
    pub config: Arc<BoardConfig>,
}

#[instrument(skip(tx))]
pub async fn router(tx: UnboundedSender<SocketAddr>) {
    let config = Arc::new(BoardConfig::standard());

    let whop = Arc::new(WhopClient::new(&config).await.unwrap());
    let entitlements: Arc<dyn EntitlementApi> = whop.clone();
    let commerce: Arc<dyn CommerceApi> = whop;

    let store: Arc<dyn KvStore> =
        Arc::new(RedisStore::new(redis_pool().await.unwrap().manager.clone()));

    let state = Arc::new(AppState {
        resolver: EntitlementResolver::new(entitlements.clone(), config.clone()),
        plays: PlayRepository::new(store.clone()),
        claims: Arc::new(ClaimLedger::new(
            store,
            commerce,
            entitlements,
            config.clone(),
        )),
        vision: Arc::new(VisionGateway::new().await.unwrap()),
        config,
    });

    let app = Router::new()
        .route("/", get(|| async { Response::new(Body::empty()) }))
        //
        // play board
        .route("/plays", get(list_plays).post(create_play))
        .route("/plays/scan", post(scan_slip))
        .route("/plays/{id}/result", patch(update_play_result))
        .route("/plays/{id}/slip", get(play_slip_image))
        //
        // free-unlock claims
        .route("/claims", post(submit_claim))
        .route("/claims/me", get(claim_status))
        .layer(
            TraceLayer::new_for_http().make_span_with(|req: &axum::http::Request<_>| {
                let method = req.method();
                let uri = req.uri();

                let matched_path = req
                    .extensions()
                    .get::<MatchedPath>()
                    .map(|matched| matched.as_str());

                tracing::debug_span!("api_request", ?method, ?uri, ?matched_path)
            }),
        )
        .layer(from_fn(log_route_errors))
        .layer(middleware::from_fn_with_state(
            state.clone(),
            resolve_capabilities,
        ))
        .layer(cors_layer())
        .with_state(state);

    let port = var!(Var::ServerApiPort)
        .await
        .unwrap()
        .parse::<u16>()
        .unwrap();

    let socket_addr = SocketAddr::new(IpAddr::V4(Ipv4Addr::new(0, 0, 0, 0)), port);
    let listener = tokio::net::TcpListener::bind(socket_addr).await.unwrap();

    tx.send(socket_addr).unwrap();
    axum::serve(listener, app).await.unwrap()
}

/// Custom error trace handler for `RouteError`-type responses
#[instrument(skip(request, next), fields(uri = request.uri().to_string()))]
async fn log_route_errors(request: Request, next: Next) -> Response {
    let res = next.run(request).await;
    if let Some(err) = res.extensions().get::<Arc<RouteError>>() {
        tracing::error!(error = ?err, "error occurred inside route handler");
    }

    res
}

#[instrument]
pub async fn start_server(
    tx: UnboundedSender<SocketAddr>,
    mut rx: UnboundedReceiver<SocketAddr>,
) -> Result<Vec<JoinHandle<()>>, RouteError> {
    tracing::info!("starting server");
    let server_handle = tokio::task::spawn(async move {
        router(tx).await;
    });

    let logging_handle = tokio::task::spawn(async move {
        while !rx.is_closed() {
            if let Some(msg) = rx.recv().await {
                tracing::info!(
                    server_url = &format!("http://127.0.0.1:{}", msg.port()),
                    "server ready"
                );
                break;
            }
        }
    });

    let handles = vec![server_handle, logging_handle];
    Ok(handles)
}

#[derive(Debug, Error)]
pub enum RouteError {
    #[error("authentication required")]
    Unauthenticated,

    #[error("admin access required")]
    AdminRequired,

    #[error("premium access required")]
    PremiumRequired,

    #[error("{0}")]
    Validation(String),

    #[error(transparent)]
    Play(#[from] PlayErr),

    #[error(transparent)]
    Claim(#[from] ClaimErr),

    #[error(transparent)]
    Vision(#[from] VisionErr),
}

#[derive(Serialize)]
struct ErrorBody {
    error: &'static str,
    message: String,
    #[serde(skip_serializing_if = "Option::is_none", rename = "promoCode")]
    promo_code: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none", rename = "checkoutUrl")]
    checkout_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    details: Option<serde_json::Value>,
}

impl ErrorBody {
    fn plain(error: &'static str, message: String) -> Self {
        Self {
            error,
            message,
            promo_code: None,
            checkout_url: None,
            details: None,
        }
    }
}

impl IntoResponse for RouteError {
    fn into_response(self) -> Response {
        let (status, body, err) = match &self {
            RouteError::Unauthenticated => (
                StatusCode::UNAUTHORIZED,
                ErrorBody::plain("unauthorized", self.to_string()),
                None,
            ),

            RouteError::AdminRequired => (
                StatusCode::FORBIDDEN,
                ErrorBody::plain("admin_required", self.to_string()),
                None,
            ),

            RouteError::PremiumRequired => (
                StatusCode::FORBIDDEN,
                ErrorBody::plain("premium_required", self.to_string()),
                None,
            ),

            RouteError::Validation(message) => (
                StatusCode::BAD_REQUEST,
                ErrorBody::plain("validation", message.clone()),
                None,
            ),

            RouteError::Play(play_err) => match play_err {
                PlayErr::NotFound(_) | PlayErr::AttachmentNotFound(_) => (
                    StatusCode::NOT_FOUND,
                    ErrorBody::plain("not_found", play_err.to_string()),
                    None,
                ),
                PlayErr::Validation(message) => (
                    StatusCode::BAD_REQUEST,
                    ErrorBody::plain("validation", message.clone()),
                    None,
                ),
                PlayErr::Store(_) | PlayErr::Serde(_) => (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    ErrorBody::plain("internal_error", play_err.to_string()),
                    Some(self),
                ),
            },

            RouteError::Claim(claim_err) => match claim_err {
                ClaimErr::AlreadyClaimed {
                    claim,
                    checkout_url,
                } => (
                    StatusCode::BAD_REQUEST,
                    ErrorBody {
                        error: "already_claimed",
                        message: String::from("You've already claimed your free month!"),
                        promo_code: Some(claim.promo_code.clone()),
                        checkout_url: Some(checkout_url.clone()),
                        details: None,
                    },
                    None,
                ),

                ClaimErr::AlreadyEntitled => (
                    StatusCode::BAD_REQUEST,
                    ErrorBody::plain(
                        "already_has_access",
                        String::from("You already have Player Props access!"),
                    ),
                    None,
                ),

                ClaimErr::VerificationFailed { message, judgment } => (
                    StatusCode::BAD_REQUEST,
                    ErrorBody {
                        error: "verification_failed",
                        message: message.clone(),
                        promo_code: None,
                        checkout_url: None,
                        details: Some(serde_json::json!({
                            "is_chalkboard": judgment.is_chalkboard,
                            "has_account": judgment.has_account,
                            "has_deposit": judgment.has_deposit,
                        })),
                    },
                    None,
                ),

                ClaimErr::DuplicateExternalAccount => (
                    StatusCode::BAD_REQUEST,
                    ErrorBody::plain(
                        "chalkboard_already_claimed",
                        String::from(
                            "This ChalkBoard account has already been used to claim a free month.",
                        ),
                    ),
                    None,
                ),

                ClaimErr::IssuanceFailed(_) => (
                    StatusCode::BAD_GATEWAY,
                    ErrorBody::plain(
                        "promo_creation_failed",
                        String::from(
                            "Verification passed but we couldn't create your promo code. Please contact support.",
                        ),
                    ),
                    Some(self),
                ),

                ClaimErr::Store(_) | ClaimErr::Serde(_) => (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    ErrorBody::plain("internal_error", claim_err.to_string()),
                    Some(self),
                ),
            },

            RouteError::Vision(vision_err) => match vision_err {
                VisionErr::UnparsableReply => (
                    StatusCode::SERVICE_UNAVAILABLE,
                    ErrorBody::plain(
                        "verification_error",
                        String::from(
                            "Could not process the screenshot. Please try uploading a clearer image.",
                        ),
                    ),
                    Some(self),
                ),
                _ => (
                    StatusCode::SERVICE_UNAVAILABLE,
                    ErrorBody::plain(
                        "verification_error",
                        String::from(
                            "Verification service temporarily unavailable. Please try again.",
                        ),
                    ),
                    Some(self),
                ),
            },
        };

        let mut response = (status, Json(body)).into_response();
        if let Some(err) = err {
            response.extensions_mut().insert(Arc::new(err));
        }

        response
    }
}
