pub mod models;
pub mod redis;
pub mod repositories;
pub mod store;

pub mod prelude {
    pub use crate::db::models::claim::{CallerId, Claim, ExternalAccount};
    pub use crate::db::models::play::{BetResult, Leg, Play, PlayDraft, PlayId, SlipImage};
    pub use crate::db::repositories::claim::{ClaimErr, ClaimLedger, ClaimResult};
    pub use crate::db::repositories::play::{PlayErr, PlayRepository, PlayResult};
    pub use crate::db::store::{KvStore, MemoryStore, StoreErr, StoreResult};
}
