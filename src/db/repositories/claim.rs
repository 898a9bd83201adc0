use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use chrono::Utc;
use thiserror::Error;
use tinyrand::{Rand, RandRange, Seeded, StdRand};
use tinyrand_std::clock_seed::ClockSeed;
use tracing::instrument;

use crate::config::BoardConfig;
use crate::db::models::claim::{CallerId, Claim, ExternalAccount};
use crate::db::redis::BoardKey;
use crate::db::store::{KvStore, StoreErr};
use crate::util::vision::AccountJudgment;
use crate::util::whop::{CommerceApi, EntitlementApi, PromoCodeRequest, WhopErr};

/// Code alphabet with the easily-confused glyphs (0/O, 1/I) removed.
pub const PROMO_ALPHABET: &[u8] = b"ABCDEFGHJKLMNPQRSTUVWXYZ23456789";
pub const PROMO_RANDOM_LEN: usize = 8;

const GENERIC_REJECTION: &str = "Could not verify your ChalkBoard account. Make sure the screenshot shows your ChalkBoard account with a deposit of at least $10.";

/// Owner of claim records: at most one free-unlock claim per caller identity
/// and per resolved external account.
///
/// The check-then-issue-then-persist sequence runs under a per-identity async
/// mutex. That is a correctness requirement, not an optimization: two
/// concurrent claims passing the existence check together would both register
/// a promo code, and double issuance has real monetary cost.
pub struct ClaimLedger {
    store: Arc<dyn KvStore>,
    commerce: Arc<dyn CommerceApi>,
    entitlements: Arc<dyn EntitlementApi>,
    config: Arc<BoardConfig>,
    locks: Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
}

impl ClaimLedger {
    pub fn new(
        store: Arc<dyn KvStore>,
        commerce: Arc<dyn CommerceApi>,
        entitlements: Arc<dyn EntitlementApi>,
        config: Arc<BoardConfig>,
    ) -> Self {
        Self {
            store,
            commerce,
            entitlements,
            config,
            locks: Mutex::new(HashMap::new()),
        }
    }

    #[instrument(skip(self))]
    pub async fn get_claim(&self, identity: &CallerId) -> ClaimResult<Option<Claim>> {
        let key = String::from(BoardKey::ClaimUser(identity.0.clone()));
        match self.store.get(&key).await? {
            Some(doc) => Ok(Some(serde_json::from_str(&doc)?)),
            None => Ok(None),
        }
    }

    pub fn checkout_url(&self, code: &str) -> String {
        self.config.checkout_url(code)
    }

    /// Runs the full claim sequence for one identity. Terminal on success:
    /// a persisted claim is never reversed.
    #[instrument(skip(self, judgment), fields(identity = %identity))]
    pub async fn claim(&self, identity: &CallerId, judgment: AccountJudgment) -> ClaimResult<Claim> {
        let lock = self.identity_lock(identity);
        let _guard = lock.lock().await;

        if let Some(existing) = self.get_claim(identity).await? {
            let checkout_url = self.checkout_url(&existing.promo_code);
            return Err(ClaimErr::AlreadyClaimed {
                claim: existing,
                checkout_url,
            });
        }

        // someone already paying for the product gets nothing for free; a
        // failed provider check is treated as "not entitled" and the claim
        // proceeds rather than blocking a legitimate caller on an outage
        match self
            .entitlements
            .check_access(&self.config.target_product_id, identity)
            .await
        {
            Ok(check) if check.has_access => return Err(ClaimErr::AlreadyEntitled),
            Ok(_) => (),
            Err(e) => {
                tracing::debug!(error = ?e, "entitlement pre-check failed, continuing");
            }
        }

        verify_judgment(&judgment)?;

        let account = ExternalAccount::normalize(judgment.username.as_deref());
        if let Some(name) = account.resolved() {
            let key = String::from(BoardKey::ClaimAccount(name.to_string()));
            if let Some(owner) = self.store.get(&key).await?
                && owner != identity.0
            {
                tracing::warn!(account = name, "external account already claimed");
                return Err(ClaimErr::DuplicateExternalAccount);
            }
        }

        let code = generate_promo_code(&self.config.promo_code_prefix);
        let request = PromoCodeRequest {
            code: code.clone(),
            product_id: self.config.target_product_id.clone(),
            plan_ids: vec![self.config.target_plan_id.clone()],
            percent_off: 100,
            duration_months: 1,
            stock: 1,
        };

        // issuance success is a precondition for persistence: if the
        // commerce call fails nothing is written and the identity may retry
        self.commerce
            .create_promo_code(&request)
            .await
            .map_err(ClaimErr::IssuanceFailed)?;

        let claim = Claim {
            identity: identity.clone(),
            account: account.clone(),
            promo_code: code,
            claimed_at: Utc::now().timestamp_millis(),
        };

        let user_key = String::from(BoardKey::ClaimUser(identity.0.clone()));
        self.store
            .set(&user_key, serde_json::to_string(&claim)?)
            .await?;

        if let Some(name) = account.resolved() {
            let account_key = String::from(BoardKey::ClaimAccount(name.to_string()));
            let wrote = self.store.set_nx(&account_key, identity.0.clone()).await?;
            if !wrote {
                // a racing claim under another identity got the account key
                // first; the code here is already issued, so the identity
                // claim stands and the first writer keeps the account
                tracing::warn!(account = name, "account claim key already written");
            }
        }

        tracing::info!(identity = %identity, code = %claim.promo_code, "claim issued");
        Ok(claim)
    }

    fn identity_lock(&self, identity: &CallerId) -> Arc<tokio::sync::Mutex<()>> {
        let mut locks = self.locks.lock().unwrap();
        locks
            .entry(identity.0.clone())
            .or_insert_with(|| Arc::new(tokio::sync::Mutex::new(())))
            .clone()
    }
}

/// Accept/reject is re-derived from the judgment's constituent flags. The
/// upstream `is_valid` aggregate alone is never trusted: partial-true
/// combinations from the probabilistic model must be rejected.
fn verify_judgment(judgment: &AccountJudgment) -> ClaimResult<()> {
    if judgment.is_valid && judgment.is_chalkboard && judgment.has_deposit {
        return Ok(());
    }

    let message = judgment
        .rejection_reason
        .clone()
        .filter(|reason| !reason.trim().is_empty())
        .unwrap_or_else(|| GENERIC_REJECTION.to_string());

    Err(ClaimErr::VerificationFailed {
        message,
        judgment: judgment.clone(),
    })
}

fn generate_promo_code(prefix: &str) -> String {
    let mut rand = StdRand::seed(ClockSeed::default().next_u64());
    let mut code = String::with_capacity(prefix.len() + 1 + PROMO_RANDOM_LEN);

    code.push_str(prefix);
    code.push('-');
    for _ in 0..PROMO_RANDOM_LEN {
        let idx = rand.next_range(0..PROMO_ALPHABET.len());
        code.push(PROMO_ALPHABET[idx] as char);
    }

    code
}

pub type ClaimResult<T> = core::result::Result<T, ClaimErr>;

#[derive(Debug, Error)]
pub enum ClaimErr {
    #[error("free month already claimed")]
    AlreadyClaimed { claim: Claim, checkout_url: String },

    #[error("identity already holds the target product")]
    AlreadyEntitled,

    #[error("{message}")]
    VerificationFailed {
        message: String,
        judgment: AccountJudgment,
    },

    #[error("external account has already been used to claim a free month")]
    DuplicateExternalAccount,

    #[error("promo code issuance failed")]
    IssuanceFailed(#[source] WhopErr),

    #[error(transparent)]
    Store(#[from] StoreErr),

    #[error("malformed claim document: {0}")]
    Serde(#[from] serde_json::Error),
}

#[cfg(test)]
mod test {
    use super::*;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    use async_trait::async_trait;
    use crate::db::store::MemoryStore;
    use crate::util::whop::{AccessCheck, WhopResult};

    struct StubCommerce {
        fail: AtomicBool,
        created: AtomicUsize,
    }

    impl StubCommerce {
        fn ok() -> Self {
            Self {
                fail: AtomicBool::new(false),
                created: AtomicUsize::new(0),
            }
        }

        fn failing() -> Self {
            Self {
                fail: AtomicBool::new(true),
                created: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl CommerceApi for StubCommerce {
        async fn create_promo_code(&self, _request: &PromoCodeRequest) -> WhopResult<()> {
            if self.fail.load(Ordering::SeqCst) {
                return Err(WhopErr::FetchErr("502 Bad Gateway".to_string()));
            }

            self.created.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    struct StubEntitlements {
        has_target: bool,
        fail: bool,
    }

    #[async_trait]
    impl EntitlementApi for StubEntitlements {
        async fn verify_caller(&self, _credential: &str) -> WhopResult<CallerId> {
            Ok(CallerId("user_stub".to_string()))
        }

        async fn check_access(
            &self,
            _product_id: &str,
            _identity: &CallerId,
        ) -> WhopResult<AccessCheck> {
            if self.fail {
                return Err(WhopErr::FetchErr("500 Internal Server Error".to_string()));
            }

            Ok(AccessCheck {
                access_level: None,
                has_access: self.has_target,
            })
        }
    }

    fn passing_judgment(username: &str) -> AccountJudgment {
        AccountJudgment {
            is_valid: true,
            is_chalkboard: true,
            has_account: true,
            has_deposit: true,
            deposit_amount: Some("$25".to_string()),
            username: Some(username.to_string()),
            confidence: Some("high".to_string()),
            rejection_reason: None,
        }
    }

    fn ledger_with(
        commerce: StubCommerce,
        entitlements: StubEntitlements,
    ) -> (Arc<ClaimLedger>, Arc<StubCommerce>, MemoryStore) {
        let store = MemoryStore::new();
        let commerce = Arc::new(commerce);
        let ledger = ClaimLedger::new(
            Arc::new(store.clone()),
            commerce.clone(),
            Arc::new(entitlements),
            Arc::new(BoardConfig::standard()),
        );

        (Arc::new(ledger), commerce, store)
    }

    fn ledger() -> (Arc<ClaimLedger>, Arc<StubCommerce>, MemoryStore) {
        ledger_with(
            StubCommerce::ok(),
            StubEntitlements {
                has_target: false,
                fail: false,
            },
        )
    }

    #[tokio::test]
    async fn test_claim_issues_prefixed_code() {
        let (ledger, commerce, _) = ledger();
        let claim = ledger
            .claim(&"user_1".into(), passing_judgment("Abc"))
            .await
            .unwrap();

        assert!(claim.promo_code.starts_with("CB-"));
        let random = &claim.promo_code[3..];
        assert_eq!(random.len(), PROMO_RANDOM_LEN);
        assert!(random.bytes().all(|b| PROMO_ALPHABET.contains(&b)));
        assert_eq!(claim.account, ExternalAccount::Resolved("abc".to_string()));
        assert_eq!(commerce.created.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_second_claim_returns_same_code() {
        let (ledger, commerce, _) = ledger();
        let first = ledger
            .claim(&"user_1".into(), passing_judgment("abc"))
            .await
            .unwrap();

        let err = ledger
            .claim(&"user_1".into(), passing_judgment("abc"))
            .await
            .unwrap_err();

        match err {
            ClaimErr::AlreadyClaimed { claim, checkout_url } => {
                assert_eq!(claim.promo_code, first.promo_code);
                assert!(checkout_url.contains(&first.promo_code));
            }
            other => panic!("expected AlreadyClaimed, got {other:?}"),
        }

        // only the first call issued a code
        assert_eq!(commerce.created.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_already_entitled_identity_is_refused() {
        let (ledger, commerce, _) = ledger_with(
            StubCommerce::ok(),
            StubEntitlements {
                has_target: true,
                fail: false,
            },
        );

        let err = ledger
            .claim(&"user_1".into(), passing_judgment("abc"))
            .await
            .unwrap_err();

        assert!(matches!(err, ClaimErr::AlreadyEntitled));
        assert_eq!(commerce.created.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_entitlement_outage_does_not_block_claim() {
        let (ledger, _, _) = ledger_with(
            StubCommerce::ok(),
            StubEntitlements {
                has_target: true,
                fail: true,
            },
        );

        // provider down: treated as not entitled, claim proceeds
        assert!(
            ledger
                .claim(&"user_1".into(), passing_judgment("abc"))
                .await
                .is_ok()
        );
    }

    #[tokio::test]
    async fn test_aggregate_flag_alone_is_not_trusted() {
        let (ledger, commerce, _) = ledger();
        let mut judgment = passing_judgment("abc");
        judgment.is_chalkboard = false;

        let err = ledger
            .claim(&"user_1".into(), judgment)
            .await
            .unwrap_err();

        assert!(matches!(err, ClaimErr::VerificationFailed { .. }));
        assert_eq!(commerce.created.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_missing_deposit_fails_with_stated_reason() {
        let (ledger, _, _) = ledger();
        let mut judgment = passing_judgment("abc");
        judgment.has_deposit = false;
        judgment.rejection_reason = Some("No deposit history visible".to_string());

        let err = ledger.claim(&"user_1".into(), judgment).await.unwrap_err();

        match err {
            ClaimErr::VerificationFailed { message, .. } => {
                assert_eq!(message, "No deposit history visible");
            }
            other => panic!("expected VerificationFailed, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_missing_reason_gets_generic_message() {
        let (ledger, _, _) = ledger();
        let mut judgment = passing_judgment("abc");
        judgment.is_valid = false;
        judgment.rejection_reason = None;

        let err = ledger.claim(&"user_1".into(), judgment).await.unwrap_err();

        match err {
            ClaimErr::VerificationFailed { message, .. } => {
                assert_eq!(message, GENERIC_REJECTION);
            }
            other => panic!("expected VerificationFailed, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_cross_identity_account_dedup() {
        let (ledger, commerce, _) = ledger();

        // usernames differing only in case/whitespace are the same account
        ledger
            .claim(&"user_1".into(), passing_judgment("SharpBettor"))
            .await
            .unwrap();

        let err = ledger
            .claim(&"user_2".into(), passing_judgment("  sharpbettor "))
            .await
            .unwrap_err();

        assert!(matches!(err, ClaimErr::DuplicateExternalAccount));
        assert_eq!(commerce.created.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_unresolved_accounts_are_never_deduplicated() {
        let (ledger, commerce, _) = ledger();

        ledger
            .claim(&"user_1".into(), passing_judgment("unknown"))
            .await
            .unwrap();
        ledger
            .claim(&"user_2".into(), passing_judgment("unknown"))
            .await
            .unwrap();

        assert_eq!(commerce.created.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_issuance_failure_persists_nothing_and_allows_retry() {
        let (ledger, commerce, _) = ledger_with(
            StubCommerce::failing(),
            StubEntitlements {
                has_target: false,
                fail: false,
            },
        );

        let err = ledger
            .claim(&"user_1".into(), passing_judgment("abc"))
            .await
            .unwrap_err();
        assert!(matches!(err, ClaimErr::IssuanceFailed(_)));

        // no claim record under either key
        assert!(ledger.get_claim(&"user_1".into()).await.unwrap().is_none());

        // retry succeeds once the platform recovers
        commerce.fail.store(false, Ordering::SeqCst);
        let claim = ledger
            .claim(&"user_1".into(), passing_judgment("abc"))
            .await
            .unwrap();
        assert!(claim.promo_code.starts_with("CB-"));
    }

    #[tokio::test]
    async fn test_concurrent_claims_for_one_identity_issue_one_code() {
        let (ledger, commerce, _) = ledger();

        let a = {
            let ledger = ledger.clone();
            tokio::spawn(
                async move { ledger.claim(&"user_1".into(), passing_judgment("abc")).await },
            )
        };
        let b = {
            let ledger = ledger.clone();
            tokio::spawn(
                async move { ledger.claim(&"user_1".into(), passing_judgment("abc")).await },
            )
        };

        let results = [a.await.unwrap(), b.await.unwrap()];
        let issued: Vec<_> = results.iter().filter(|r| r.is_ok()).collect();

        assert_eq!(issued.len(), 1, "exactly one claim must win");
        assert_eq!(commerce.created.load(Ordering::SeqCst), 1);
        assert!(results.iter().any(|r| matches!(
            r,
            Err(ClaimErr::AlreadyClaimed { .. })
        )));
    }

    #[tokio::test]
    async fn test_get_claim_roundtrip() {
        let (ledger, _, _) = ledger();
        assert!(ledger.get_claim(&"user_1".into()).await.unwrap().is_none());

        let issued = ledger
            .claim(&"user_1".into(), passing_judgment("abc"))
            .await
            .unwrap();
        let polled = ledger.get_claim(&"user_1".into()).await.unwrap().unwrap();

        assert_eq!(polled.promo_code, issued.promo_code);
        assert_eq!(polled.claimed_at, issued.claimed_at);
    }

    #[test]
    fn test_generated_codes_use_the_unambiguous_alphabet() {
        for _ in 0..50 {
            let code = generate_promo_code("CB");
            assert_eq!(code.len(), 11);
            assert!(code.starts_with("CB-"));
            for b in code[3..].bytes() {
                assert!(PROMO_ALPHABET.contains(&b), "bad glyph in {code}");
                assert!(b != b'0' && b != b'O' && b != b'1' && b != b'I');
            }
        }
    }
}
