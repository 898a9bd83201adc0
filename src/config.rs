//! Immutable board configuration.
//!
//! Product and plan identifiers come from the operator's commerce dashboard.
//! Core logic never reads these from ambient state; the struct is built once
//! at startup and injected into the resolver and the claim ledger.

pub const COMPANY_ID: &str = "biz_KfwlM1WObd2QW6";

pub const PRODUCT_FREE: &str = "prod_OVVaWf1nemJrp";
pub const PRODUCT_MAX_BET_POTD: &str = "prod_12U89lKiPpVxP";
pub const PRODUCT_PREMIUM: &str = "prod_o1jjamUG8rP8W";
pub const PRODUCT_PLAYER_PROPS: &str = "prod_RYRii4L26sK9m";
pub const PRODUCT_HIGH_ROLLERS: &str = "prod_bNsUIqwSfzLzU";

pub const PLAYER_PROPS_PLAN_ID: &str = "plan_la8tljuRIc3n3";

pub const CHECKOUT_BASE_URL: &str = "https://whop.com/rwtw/rwtw-propboard/";

/// Prefix on every issued promo code ("CB-XXXXXXXX").
pub const PROMO_CODE_PREFIX: &str = "CB";

#[derive(Debug, Clone)]
pub struct BoardConfig {
    /// Operator company against which the admin access level is checked.
    pub company_id: String,

    /// Products whose holders see unredacted plays.
    pub premium_products: Vec<String>,

    /// Product/plan the free-unlock promo code is scoped to.
    pub target_product_id: String,
    pub target_plan_id: String,

    pub checkout_base_url: String,
    pub promo_code_prefix: String,
}

impl BoardConfig {
    /// The operator's standard tier table: Player Props and High Rollers see
    /// prop plays in full, everyone else gets the paywall projection.
    pub fn standard() -> Self {
        Self {
            company_id: COMPANY_ID.to_string(),
            premium_products: vec![
                PRODUCT_PLAYER_PROPS.to_string(),
                PRODUCT_HIGH_ROLLERS.to_string(),
            ],
            target_product_id: PRODUCT_PLAYER_PROPS.to_string(),
            target_plan_id: PLAYER_PROPS_PLAN_ID.to_string(),
            checkout_base_url: CHECKOUT_BASE_URL.to_string(),
            promo_code_prefix: PROMO_CODE_PREFIX.to_string(),
        }
    }

    pub fn checkout_url(&self, code: &str) -> String {
        format!("{}?code={}", self.checkout_base_url, code)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_checkout_url_embeds_code() {
        let config = BoardConfig::standard();
        let url = config.checkout_url("CB-ABCD2345");

        assert!(url.ends_with("?code=CB-ABCD2345"));
        assert!(url.starts_with(CHECKOUT_BASE_URL));
    }
}
