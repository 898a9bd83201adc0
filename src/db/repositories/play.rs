use std::collections::HashSet;
use std::sync::Arc;

use chrono::Utc;
use thiserror::Error;
use tracing::instrument;

use crate::db::models::play::{BetResult, Leg, Play, PlayDraft, PlayId, SlipImage, posted_at_stamp};
use crate::db::redis::BoardKey;
use crate::db::store::{KvStore, StoreErr};

/// Slip images expire 30 days after their last write; reads never extend.
pub const SLIP_TTL_SECS: u64 = 60 * 60 * 24 * 30;

/// Owner of the ordered play list and the per-play attachment side-table.
///
/// The whole list lives under one key and every mutation is a read-modify-
/// write of that document. Concurrent writers can lose an update
/// (last-write-wins on the whole list), accepted for single-operator
/// posting; see the race note in the tests.
#[derive(Clone)]
pub struct PlayRepository {
    store: Arc<dyn KvStore>,
}

impl PlayRepository {
    pub fn new(store: Arc<dyn KvStore>) -> Self {
        Self { store }
    }

    /// Newest-first by insertion order. The stored order is the source of
    /// truth; nothing re-sorts by `createdAt`.
    #[instrument(skip(self))]
    pub async fn list(&self) -> PlayResult<Vec<Play>> {
        let key = String::from(BoardKey::Plays);
        match self.store.get(&key).await? {
            Some(doc) => Ok(serde_json::from_str(&doc)?),
            None => Ok(Vec::new()),
        }
    }

    /// Assigns id and timestamps, validates the draft, prepends. The list
    /// document cannot carry the slip payload (`Play` has no field for it),
    /// so an attached image goes straight to the side-table.
    #[instrument(skip(self, draft))]
    pub async fn create(&self, draft: PlayDraft) -> PlayResult<Play> {
        if let Some(legs) = &draft.legs
            && legs.len() < 2
        {
            return Err(PlayErr::Validation(String::from(
                "a parlay needs at least 2 legs",
            )));
        }

        if draft.units == 0 {
            return Err(PlayErr::Validation(String::from(
                "units must be a positive integer",
            )));
        }

        let now = Utc::now();
        let play = Play {
            id: PlayId::generate(),
            team: draft.team,
            bet_type: draft.bet_type,
            odds: draft.odds,
            matchup: draft.matchup,
            time: draft.time,
            sport: draft.sport,
            result: BetResult::Pending,
            posted_at: posted_at_stamp(now),
            units: draft.units,
            created_at: now.timestamp_millis(),
            legs: draft
                .legs
                .map(|legs| legs.into_iter().map(Leg::from).collect()),
        };

        let mut plays = self.list().await?;
        plays.insert(0, play.clone());
        self.persist(&plays).await?;

        if let Some(image_data) = draft.slip_image {
            let image = SlipImage {
                image_data,
                media_type: draft
                    .media_type
                    .unwrap_or_else(|| String::from("image/png")),
            };
            self.put_attachment(&play.id, image).await?;
        }

        tracing::info!(id = %play.id, sport = %play.sport, "posted play");
        Ok(play)
    }

    /// Overwrites the result. No transition guard: grading an already-graded
    /// play overwrites again (operator correction tooling).
    #[instrument(skip(self))]
    pub async fn update_result(&self, id: &PlayId, result: BetResult) -> PlayResult<Play> {
        let mut plays = self.list().await?;
        let play = plays
            .iter_mut()
            .find(|play| &play.id == id)
            .ok_or_else(|| PlayErr::NotFound(id.clone()))?;

        play.result = result;
        let updated = play.clone();
        self.persist(&plays).await?;

        tracing::info!(id = %updated.id, result = ?updated.result, "graded play");
        Ok(updated)
    }

    #[instrument(skip(self))]
    pub async fn get_attachment(&self, id: &PlayId) -> PlayResult<Option<SlipImage>> {
        let key = String::from(BoardKey::Slip(id.0.clone()));
        match self.store.get(&key).await? {
            Some(doc) => Ok(Some(serde_json::from_str(&doc)?)),
            None => Ok(None),
        }
    }

    #[instrument(skip(self, image))]
    pub async fn put_attachment(&self, id: &PlayId, image: SlipImage) -> PlayResult<()> {
        let key = String::from(BoardKey::Slip(id.0.clone()));
        self.store
            .set_ex(&key, serde_json::to_string(&image)?, SLIP_TTL_SECS)
            .await?;

        Ok(())
    }

    pub async fn has_attachment(&self, id: &PlayId) -> PlayResult<bool> {
        let key = String::from(BoardKey::Slip(id.0.clone()));
        Ok(self.store.exists(&key).await?)
    }

    /// Ids of the given plays whose attachment currently exists. An expired
    /// or never-written image simply isn't in the set; never an error.
    #[instrument(skip(self, plays), fields(play_count = plays.len()))]
    pub async fn attachment_flags(&self, plays: &[Play]) -> PlayResult<HashSet<PlayId>> {
        let mut with_slip = HashSet::new();
        for play in plays {
            if self.has_attachment(&play.id).await? {
                with_slip.insert(play.id.clone());
            }
        }

        Ok(with_slip)
    }

    async fn persist(&self, plays: &[Play]) -> PlayResult<()> {
        let key = String::from(BoardKey::Plays);
        self.store.set(&key, serde_json::to_string(plays)?).await?;

        Ok(())
    }
}

pub type PlayResult<T> = core::result::Result<T, PlayErr>;

#[derive(Debug, Error)]
pub enum PlayErr {
    #[error(transparent)]
    Store(#[from] StoreErr),

    #[error("malformed play document: {0}")]
    Serde(#[from] serde_json::Error),

    #[error("no play with id '{0}'")]
    NotFound(PlayId),

    #[error("no slip image for play '{0}'")]
    AttachmentNotFound(PlayId),

    #[error("{0}")]
    Validation(String),
}
