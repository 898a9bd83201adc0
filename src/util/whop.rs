//! Entitlement-provider and commerce-platform client.
//!
//! Both concerns live on the same upstream API, so one client implements the
//! two seams the core consumes: [`EntitlementApi`] (who is the caller, what
//! can they access) and [`CommerceApi`] (promo-code registration).

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{Value, json};
use thiserror::Error;
use tracing::instrument;

use crate::config::BoardConfig;
use crate::db::models::claim::CallerId;
use crate::util::env::{EnvErr, Var};
use crate::var;

pub const WHOP_API_BASE: &str = "https://api.whop.com/api/v1";

#[derive(Debug)]
pub enum WhopUri {
    VerifyCaller,
    CheckAccess { product_id: String, user_id: String },
    PromoCodes,
}

impl From<WhopUri> for String {
    fn from(value: WhopUri) -> Self {
        match value {
            WhopUri::VerifyCaller => format!("{WHOP_API_BASE}/me"),
            WhopUri::CheckAccess {
                product_id,
                user_id,
            } => format!("{WHOP_API_BASE}/users/{user_id}/access/{product_id}"),
            WhopUri::PromoCodes => format!("{WHOP_API_BASE}/promo_codes"),
        }
    }
}

/// Access-check response: `access_level` is only populated for company-level
/// checks, `has_access` for product-level ones.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct AccessCheck {
    #[serde(default)]
    pub access_level: Option<String>,
    #[serde(default)]
    pub has_access: bool,
}

#[async_trait]
pub trait EntitlementApi: Send + Sync + 'static {
    /// Resolves an inbound credential to a caller identity. Fails on any
    /// unverifiable credential; callers are expected to treat failure as
    /// "unauthenticated", never to surface it.
    async fn verify_caller(&self, credential: &str) -> WhopResult<CallerId>;

    async fn check_access(&self, product_id: &str, identity: &CallerId) -> WhopResult<AccessCheck>;
}

#[derive(Debug, Clone)]
pub struct PromoCodeRequest {
    pub code: String,
    pub product_id: String,
    pub plan_ids: Vec<String>,
    pub percent_off: u32,
    pub duration_months: u32,
    pub stock: u32,
}

#[async_trait]
pub trait CommerceApi: Send + Sync + 'static {
    /// Registers a promo code upstream. Fail-closed: any non-2xx response is
    /// an error and the caller must not treat the code as issued.
    async fn create_promo_code(&self, request: &PromoCodeRequest) -> WhopResult<()>;
}

pub struct WhopClient {
    client: reqwest::Client,
    api_key: String,
    company_id: String,
}

impl WhopClient {
    pub async fn new(config: &BoardConfig) -> WhopResult<Self> {
        let api_key = var!(Var::WhopApiKey).await?.to_string();

        Ok(Self {
            client: reqwest::Client::new(),
            api_key,
            company_id: config.company_id.clone(),
        })
    }

    /// Turns a non-2xx response into an error, preferring whatever detail the
    /// body carries over the bare status code.
    async fn fail_from(res: reqwest::Response) -> WhopErr {
        let status = res.status();
        tracing::error!(code = %status, "non-2xx response from whop");

        match res.json::<Value>().await {
            Ok(body) => {
                tracing::error!(body = ?body, "error detail in response");
                WhopErr::FetchErrWithBody { body }
            }
            Err(_) => WhopErr::FetchErr(status.to_string()),
        }
    }
}

#[derive(Debug, Deserialize)]
struct VerifiedCaller {
    id: String,
}

#[async_trait]
impl EntitlementApi for WhopClient {
    #[instrument(skip(self, credential))]
    async fn verify_caller(&self, credential: &str) -> WhopResult<CallerId> {
        let res = self
            .client
            .get(String::from(WhopUri::VerifyCaller))
            .bearer_auth(credential)
            .send()
            .await?;

        if !res.status().is_success() {
            return Err(Self::fail_from(res).await);
        }

        let caller = res.json::<VerifiedCaller>().await?;
        Ok(CallerId(caller.id))
    }

    #[instrument(skip(self))]
    async fn check_access(&self, product_id: &str, identity: &CallerId) -> WhopResult<AccessCheck> {
        let uri = String::from(WhopUri::CheckAccess {
            product_id: product_id.to_string(),
            user_id: identity.0.clone(),
        });

        let res = self
            .client
            .get(uri)
            .bearer_auth(&self.api_key)
            .send()
            .await?;

        if !res.status().is_success() {
            return Err(Self::fail_from(res).await);
        }

        Ok(res.json::<AccessCheck>().await?)
    }
}

#[async_trait]
impl CommerceApi for WhopClient {
    #[instrument(skip(self, request), fields(code = %request.code))]
    async fn create_promo_code(&self, request: &PromoCodeRequest) -> WhopResult<()> {
        let body = json!({
            "amount_off": request.percent_off,
            "base_currency": "usd",
            "code": request.code,
            "company_id": self.company_id,
            "new_users_only": false,
            "promo_duration_months": request.duration_months,
            "promo_type": "percentage",
            "product_id": request.product_id,
            "plan_ids": request.plan_ids,
            "stock": request.stock,
            "unlimited_stock": false,
        });

        let res = self
            .client
            .post(String::from(WhopUri::PromoCodes))
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await?;

        if !res.status().is_success() {
            return Err(Self::fail_from(res).await);
        }

        tracing::info!(code = %request.code, "registered promo code");
        Ok(())
    }
}

pub type WhopResult<T> = core::result::Result<T, WhopErr>;

#[derive(Debug, Error)]
pub enum WhopErr {
    #[error("reqwest error: {0}")]
    ReqwestError(#[from] reqwest::Error),

    #[error("while parsing environment vars: {0}")]
    EnvError(#[from] EnvErr),

    #[error("error during whop fetch: {0}")]
    FetchErr(String),

    #[error("error (with detail) during whop fetch: {:#?}", body)]
    FetchErrWithBody { body: Value },
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_uri_construction() {
        let uri = String::from(WhopUri::CheckAccess {
            product_id: "prod_abc".to_string(),
            user_id: "user_1".to_string(),
        });

        assert_eq!(uri, format!("{WHOP_API_BASE}/users/user_1/access/prod_abc"));
    }

    #[test]
    fn test_access_check_defaults_closed() {
        // partial upstream documents must never default to granting access
        let check: AccessCheck = serde_json::from_str("{}").unwrap();

        assert!(!check.has_access);
        assert!(check.access_level.is_none());
    }
}
