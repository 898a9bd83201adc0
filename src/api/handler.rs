use std::collections::HashSet;
use std::sync::Arc;

use axum::extract::{Path, State};
use axum::{Extension, Json};
use serde::{Deserialize, Serialize};
use tracing::instrument;

use crate::access::redact::{self, PlayView};
use crate::access::resolver::Capabilities;
use crate::api::server::{AppState, JsonResult, RouteError};
use crate::db::prelude::*;
use crate::util::vision::{ImagePayload, SlipScan};

#[derive(Debug, Serialize)]
pub struct PlayListResponse {
    pub plays: Vec<PlayView>,
    #[serde(rename = "isAdmin")]
    pub is_admin: bool,
}

#[derive(Debug, Serialize)]
pub struct PlayResponse {
    pub play: Play,
    pub success: bool,
}

#[derive(Debug, Deserialize)]
pub struct UpdateResultBody {
    pub result: BetResult,
}

#[derive(Debug, Deserialize)]
pub struct ImageUpload {
    #[serde(default, rename = "imageData")]
    pub image_data: Option<String>,
    #[serde(default, rename = "mediaType")]
    pub media_type: Option<String>,
}

impl ImageUpload {
    fn into_payload(self, missing: &str) -> Result<ImagePayload, RouteError> {
        match self.image_data {
            Some(data) if !data.is_empty() => Ok(ImagePayload::new(data, self.media_type)),
            _ => Err(RouteError::Validation(missing.to_string())),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct ClaimResponse {
    pub success: bool,
    #[serde(rename = "promoCode")]
    pub promo_code: String,
    #[serde(rename = "checkoutUrl")]
    pub checkout_url: String,
    #[serde(rename = "chalkboardUsername")]
    pub chalkboard_username: String,
    pub message: String,
}

#[derive(Debug, Serialize)]
pub struct ClaimStatusResponse {
    pub claimed: bool,
    #[serde(skip_serializing_if = "Option::is_none", rename = "promoCode")]
    pub promo_code: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none", rename = "checkoutUrl")]
    pub checkout_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none", rename = "claimedAt")]
    pub claimed_at: Option<i64>,
}

/// GET /plays: the board, projected per the caller's capability set.
#[instrument(skip(state, caps))]
pub async fn list_plays(
    State(state): State<Arc<AppState>>,
    Extension(caps): Extension<Capabilities>,
) -> JsonResult<PlayListResponse> {
    if caps.identity.is_none() {
        return Err(RouteError::Unauthenticated);
    }

    let plays = state.plays.list().await?;

    // slip flags are only derivable by full viewers; locked projections
    // always report false, so skip the lookups entirely
    let with_slip = if caps.can_view_full() {
        state.plays.attachment_flags(&plays).await?
    } else {
        HashSet::new()
    };

    let views = redact::project_all(&plays, &caps, &with_slip);
    Ok(Json(PlayListResponse {
        plays: views,
        is_admin: caps.is_admin,
    }))
}

/// POST /plays: operator posts a play (admin only).
#[instrument(skip(state, caps, draft))]
pub async fn create_play(
    State(state): State<Arc<AppState>>,
    Extension(caps): Extension<Capabilities>,
    Json(draft): Json<PlayDraft>,
) -> JsonResult<PlayResponse> {
    require_admin(&caps)?;

    let play = state.plays.create(draft).await?;
    Ok(Json(PlayResponse {
        play,
        success: true,
    }))
}

/// PATCH /plays/{id}/result: grade a play (admin only).
#[instrument(skip(state, caps))]
pub async fn update_play_result(
    State(state): State<Arc<AppState>>,
    Extension(caps): Extension<Capabilities>,
    Path(id): Path<String>,
    Json(body): Json<UpdateResultBody>,
) -> JsonResult<PlayResponse> {
    require_admin(&caps)?;

    let play = state.plays.update_result(&id.into(), body.result).await?;
    Ok(Json(PlayResponse {
        play,
        success: true,
    }))
}

/// GET /plays/{id}/slip: raw slip image, gated to full viewers.
#[instrument(skip(state, caps))]
pub async fn play_slip_image(
    State(state): State<Arc<AppState>>,
    Extension(caps): Extension<Capabilities>,
    Path(id): Path<String>,
) -> JsonResult<SlipImage> {
    if caps.identity.is_none() {
        return Err(RouteError::Unauthenticated);
    }
    if !caps.can_view_full() {
        return Err(RouteError::PremiumRequired);
    }

    let id: PlayId = id.into();
    match state.plays.get_attachment(&id).await? {
        Some(image) => Ok(Json(image)),
        None => Err(RouteError::Play(PlayErr::AttachmentNotFound(id))),
    }
}

/// POST /plays/scan: pre-fill a parlay draft from a slip screenshot
/// (admin only). A scan that reads zero legs is a usable answer.
#[instrument(skip(state, caps, upload))]
pub async fn scan_slip(
    State(state): State<Arc<AppState>>,
    Extension(caps): Extension<Capabilities>,
    Json(upload): Json<ImageUpload>,
) -> JsonResult<SlipScan> {
    require_admin(&caps)?;

    let image = upload.into_payload("no image uploaded")?;
    let scan = state.vision.scan_slip(&image).await?;

    Ok(Json(scan))
}

/// POST /claims: verify an external-account screenshot and issue the
/// one-time free-unlock code.
#[instrument(skip(state, caps, upload))]
pub async fn submit_claim(
    State(state): State<Arc<AppState>>,
    Extension(caps): Extension<Capabilities>,
    Json(upload): Json<ImageUpload>,
) -> JsonResult<ClaimResponse> {
    let Some(identity) = caps.identity else {
        return Err(RouteError::Unauthenticated);
    };

    // cheap existence check before paying for a vision call; the ledger
    // re-checks under its lock
    if let Some(existing) = state.claims.get_claim(&identity).await.map_err(RouteError::from)? {
        let checkout_url = state.claims.checkout_url(&existing.promo_code);
        return Err(RouteError::Claim(ClaimErr::AlreadyClaimed {
            claim: existing,
            checkout_url,
        }));
    }

    let image = upload.into_payload("no screenshot uploaded")?;
    let judgment = state.vision.verify_account(&image).await?;

    let claim = state.claims.claim(&identity, judgment).await?;
    let checkout_url = state.claims.checkout_url(&claim.promo_code);

    Ok(Json(ClaimResponse {
        success: true,
        promo_code: claim.promo_code,
        checkout_url,
        chalkboard_username: claim
            .account
            .resolved()
            .unwrap_or("unknown")
            .to_string(),
        message: String::from(
            "Your ChalkBoard account has been verified! Use the link below to claim your free month.",
        ),
    }))
}

/// GET /claims/me: idempotent status poll. Unauthenticated callers simply
/// read as "not claimed".
#[instrument(skip(state, caps))]
pub async fn claim_status(
    State(state): State<Arc<AppState>>,
    Extension(caps): Extension<Capabilities>,
) -> JsonResult<ClaimStatusResponse> {
    let Some(identity) = caps.identity else {
        return Ok(Json(ClaimStatusResponse {
            claimed: false,
            promo_code: None,
            checkout_url: None,
            claimed_at: None,
        }));
    };

    match state.claims.get_claim(&identity).await.map_err(RouteError::from)? {
        Some(claim) => {
            let checkout_url = state.claims.checkout_url(&claim.promo_code);
            Ok(Json(ClaimStatusResponse {
                claimed: true,
                promo_code: Some(claim.promo_code),
                checkout_url: Some(checkout_url),
                claimed_at: Some(claim.claimed_at),
            }))
        }
        None => Ok(Json(ClaimStatusResponse {
            claimed: false,
            promo_code: None,
            checkout_url: None,
            claimed_at: None,
        })),
    }
}

fn require_admin(caps: &Capabilities) -> Result<(), RouteError> {
    if caps.identity.is_none() {
        return Err(RouteError::Unauthenticated);
    }
    if !caps.is_admin {
        return Err(RouteError::AdminRequired);
    }

    Ok(())
}
