use core::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PlayId(pub String);

impl PlayId {
    pub fn generate() -> Self {
        PlayId(format!("play_{}", Uuid::new_v4().simple()))
    }
}

impl fmt::Display for PlayId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<String> for PlayId {
    fn from(value: String) -> Self {
        PlayId(value)
    }
}

impl From<&str> for PlayId {
    fn from(value: &str) -> Self {
        PlayId(value.to_string())
    }
}

/// Lifecycle result of a play. Starts `pending`; grading overwrites it with a
/// terminal value. There is no transition guard on re-grading (operator
/// correction tooling relies on the overwrite).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BetResult {
    Pending,
    Win,
    Loss,
    Push,
}

impl BetResult {
    pub fn is_pending(&self) -> bool {
        matches!(self, BetResult::Pending)
    }
}

/// One selection inside a parlay.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Leg {
    pub id: String,
    pub player: String,
    pub prop: String,
    pub line: String,
    pub matchup: String,
    pub sport: String,
}

/// A postable betting unit. Legacy single-bet plays populate the descriptive
/// strings directly; parlays carry `legs` and the strings describe the
/// aggregate.
///
/// The slip image is deliberately NOT a field here: the list document stays
/// bounded in size no matter how many plays carry images. The image lives in
/// its own keyed entry with an independent TTL, and `hasSlipImage` is derived
/// at projection time.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Play {
    pub id: PlayId,
    pub team: String,
    #[serde(rename = "betType")]
    pub bet_type: String,
    pub odds: String,
    pub matchup: String,
    pub time: String,
    pub sport: String,
    pub result: BetResult,
    #[serde(rename = "postedAt")]
    pub posted_at: String,
    pub units: u32,
    #[serde(rename = "createdAt")]
    pub created_at: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub legs: Option<Vec<Leg>>,
}

/// Inbound shape for posting a play. Ids and timestamps are assigned by the
/// repository; the optional slip image is routed to the attachment side-table
/// and never into the play record.
#[derive(Debug, Clone, Deserialize)]
pub struct PlayDraft {
    pub team: String,
    #[serde(rename = "betType")]
    pub bet_type: String,
    pub odds: String,
    pub matchup: String,
    pub time: String,
    pub sport: String,
    #[serde(default = "default_units")]
    pub units: u32,
    #[serde(default)]
    pub legs: Option<Vec<LegDraft>>,
    #[serde(default, rename = "slipImage")]
    pub slip_image: Option<String>,
    #[serde(default, rename = "mediaType")]
    pub media_type: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LegDraft {
    pub player: String,
    pub prop: String,
    pub line: String,
    pub matchup: String,
    pub sport: String,
}

impl From<LegDraft> for Leg {
    fn from(value: LegDraft) -> Self {
        Leg {
            id: format!("leg_{}", Uuid::new_v4().simple()),
            player: value.player,
            prop: value.prop,
            line: value.line,
            matchup: value.matchup,
            sport: value.sport,
        }
    }
}

#[inline]
const fn default_units() -> u32 {
    1
}

/// Slip screenshot payload as uploaded: base64 data plus its media type.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SlipImage {
    #[serde(rename = "imageData")]
    pub image_data: String,
    #[serde(rename = "mediaType")]
    pub media_type: String,
}

/// Human-readable posted-at stamp, fixed at creation in US/Eastern:
/// `"Dec 8, 3:05 PM ET"`.
pub fn posted_at_stamp(now: DateTime<Utc>) -> String {
    let eastern = now.with_timezone(&chrono_tz::America::New_York);
    format!("{} ET", eastern.format("%b %-d, %-I:%M %p"))
}

#[cfg(test)]
mod test {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_posted_at_stamp_is_eastern() {
        // 2024-12-08 20:05 UTC is 3:05 PM EST
        let utc = Utc.with_ymd_and_hms(2024, 12, 8, 20, 5, 0).unwrap();
        assert_eq!(posted_at_stamp(utc), "Dec 8, 3:05 PM ET");
    }

    #[test]
    fn test_result_wire_format_is_lowercase() {
        assert_eq!(serde_json::to_string(&BetResult::Pending).unwrap(), "\"pending\"");
        assert_eq!(serde_json::to_string(&BetResult::Win).unwrap(), "\"win\"");

        let parsed: BetResult = serde_json::from_str("\"push\"").unwrap();
        assert_eq!(parsed, BetResult::Push);
    }

    #[test]
    fn test_play_ids_are_prefixed_and_unique() {
        let a = PlayId::generate();
        let b = PlayId::generate();

        assert!(a.0.starts_with("play_"));
        assert_ne!(a, b);
    }
}
