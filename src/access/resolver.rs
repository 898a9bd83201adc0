use std::sync::Arc;

use tracing::instrument;

use crate::config::BoardConfig;
use crate::db::models::claim::CallerId;
use crate::util::whop::EntitlementApi;

/// Provider access level that marks the operator's own staff.
pub const ADMIN_ACCESS_LEVEL: &str = "admin";

/// Resolved capability set for one request. The default value is the
/// fail-closed "nobody": no identity, no flags.
#[derive(Debug, Clone, Default)]
pub struct Capabilities {
    pub identity: Option<CallerId>,
    pub is_admin: bool,
    pub has_premium_access: bool,
}

impl Capabilities {
    pub fn can_view_full(&self) -> bool {
        self.is_admin || self.has_premium_access
    }
}

/// Translates an inbound credential into a [`Capabilities`] set.
///
/// Every provider failure is swallowed into the closed position: an
/// unverifiable caller and a provider outage look identical to downstream
/// code. This function never returns an error.
#[derive(Clone)]
pub struct EntitlementResolver {
    provider: Arc<dyn EntitlementApi>,
    config: Arc<BoardConfig>,
}

impl EntitlementResolver {
    pub fn new(provider: Arc<dyn EntitlementApi>, config: Arc<BoardConfig>) -> Self {
        Self { provider, config }
    }

    #[instrument(skip(self, credential))]
    pub async fn resolve(&self, credential: Option<&str>) -> Capabilities {
        let Some(credential) = credential else {
            return Capabilities::default();
        };

        let identity = match self.provider.verify_caller(credential).await {
            Ok(identity) => identity,
            Err(e) => {
                tracing::debug!(error = ?e, "caller verification failed");
                return Capabilities::default();
            }
        };

        let is_admin = match self
            .provider
            .check_access(&self.config.company_id, &identity)
            .await
        {
            Ok(check) => check.access_level.as_deref() == Some(ADMIN_ACCESS_LEVEL),
            Err(e) => {
                tracing::debug!(error = ?e, "company access check failed");
                false
            }
        };

        // each product check stands alone: a failure counts as "no access"
        // for that product and the remaining products are still evaluated
        let mut has_premium_access = false;
        for product_id in &self.config.premium_products {
            match self.provider.check_access(product_id, &identity).await {
                Ok(check) if check.has_access => {
                    has_premium_access = true;
                    break;
                }
                Ok(_) => (),
                Err(e) => {
                    tracing::debug!(product_id, error = ?e, "product access check failed");
                }
            }
        }

        Capabilities {
            identity: Some(identity),
            is_admin,
            has_premium_access,
        }
    }
}
