//! One-way projection from stored plays to viewer-appropriate shapes.
//!
//! Everything here is pure: capability checks happen upstream, attachment
//! existence is passed in, and no projection ever carries attachment bytes.

use std::collections::HashSet;

use serde::Serialize;

use crate::access::resolver::Capabilities;
use crate::db::models::play::{BetResult, Leg, Play, PlayId};

pub const LOCKED_TEAM: &str = "🔒 Locked";
pub const LOCKED_ODDS: &str = "🔒";
pub const LOCKED_MATCHUP: &str = "🔒 Upgrade to view";
pub const LOCKED_LEG_FIELD: &str = "🔒 Locked";

#[derive(Debug, Clone, Serialize)]
pub struct PlayView {
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
    #[serde(skip_serializing_if = "Option::is_none")]
    pub legs: Option<Vec<LegView>>,
    #[serde(rename = "hasSlipImage")]
    pub has_slip_image: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct LegView {
    pub id: String,
    pub player: String,
    pub prop: String,
    pub line: String,
    pub matchup: String,
    pub sport: String,
}

/// Projects one play for the given capability set.
///
/// Returns `None` when the play is not visible at all: graded plays vanish
/// entirely for viewers without premium or admin capability.
pub fn project(play: &Play, caps: &Capabilities, has_slip: bool) -> Option<PlayView> {
    if caps.can_view_full() {
        return Some(full_view(play, has_slip));
    }

    if !play.result.is_pending() {
        return None;
    }

    Some(locked_view(play))
}

/// Projects a whole list, preserving its order. `with_slip` holds the ids
/// whose attachment currently exists; callers may pass an empty set for
/// viewers that can never see the flag anyway.
pub fn project_all(plays: &[Play], caps: &Capabilities, with_slip: &HashSet<PlayId>) -> Vec<PlayView> {
    plays
        .iter()
        .filter_map(|play| project(play, caps, with_slip.contains(&play.id)))
        .collect()
}

fn full_view(play: &Play, has_slip: bool) -> PlayView {
    PlayView {
        id: play.id.clone(),
        team: play.team.clone(),
        bet_type: play.bet_type.clone(),
        odds: play.odds.clone(),
        matchup: play.matchup.clone(),
        time: play.time.clone(),
        sport: play.sport.clone(),
        result: play.result,
        posted_at: play.posted_at.clone(),
        units: play.units,
        created_at: play.created_at,
        legs: play.legs.as_ref().map(|legs| legs.iter().map(full_leg).collect()),
        has_slip_image: has_slip,
    }
}

fn full_leg(leg: &Leg) -> LegView {
    LegView {
        id: leg.id.clone(),
        player: leg.player.clone(),
        prop: leg.prop.clone(),
        line: leg.line.clone(),
        matchup: leg.matchup.clone(),
        sport: leg.sport.clone(),
    }
}

// The locked projection keeps only what the paywall card renders: sport
// icon/category, bet type, posting time and the pending state. Every gated
// string is replaced wholesale, never partially masked.
fn locked_view(play: &Play) -> PlayView {
    PlayView {
        id: play.id.clone(),
        team: LOCKED_TEAM.to_string(),
        bet_type: play.bet_type.clone(),
        odds: LOCKED_ODDS.to_string(),
        matchup: LOCKED_MATCHUP.to_string(),
        time: play.time.clone(),
        sport: play.sport.clone(),
        result: play.result,
        posted_at: play.posted_at.clone(),
        units: 0,
        created_at: play.created_at,
        legs: play.legs.as_ref().map(|legs| legs.iter().map(locked_leg).collect()),
        has_slip_image: false,
    }
}

fn locked_leg(leg: &Leg) -> LegView {
    LegView {
        id: leg.id.clone(),
        player: LOCKED_LEG_FIELD.to_string(),
        prop: LOCKED_LEG_FIELD.to_string(),
        line: LOCKED_LEG_FIELD.to_string(),
        matchup: LOCKED_LEG_FIELD.to_string(),
        sport: leg.sport.clone(),
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::db::models::play::posted_at_stamp;
    use chrono::Utc;

    fn parlay() -> Play {
        Play {
            id: PlayId::generate(),
            team: "Lakers ML + Celtics -3.5".to_string(),
            bet_type: "PLAYER PROP".to_string(),
            odds: "+450".to_string(),
            matchup: "Lakers vs Celtics".to_string(),
            time: "7:30 PM".to_string(),
            sport: "NBA".to_string(),
            result: BetResult::Pending,
            posted_at: posted_at_stamp(Utc::now()),
            units: 2,
            created_at: Utc::now().timestamp_millis(),
            legs: Some(vec![
                Leg {
                    id: "leg_1".to_string(),
                    player: "LeBron James Over 25.5 Points".to_string(),
                    prop: "Over".to_string(),
                    line: "O 25.5".to_string(),
                    matchup: "Lakers vs Celtics".to_string(),
                    sport: "NBA".to_string(),
                },
                Leg {
                    id: "leg_2".to_string(),
                    player: "Jayson Tatum Under 7.5 Assists".to_string(),
                    prop: "Under".to_string(),
                    line: "U 7.5".to_string(),
                    matchup: "Lakers vs Celtics".to_string(),
                    sport: "NBA".to_string(),
                },
            ]),
        }
    }

    fn plain_viewer() -> Capabilities {
        Capabilities {
            identity: Some("user_plain".into()),
            is_admin: false,
            has_premium_access: false,
        }
    }

    fn premium_viewer() -> Capabilities {
        Capabilities {
            identity: Some("user_premium".into()),
            is_admin: false,
            has_premium_access: true,
        }
    }

    #[test]
    fn test_redaction_leaks_no_gated_substrings() {
        let play = parlay();
        let view = project(&play, &plain_viewer(), true).unwrap();
        let serialized = serde_json::to_string(&view).unwrap();

        for gated in [
            play.team.as_str(),
            play.odds.as_str(),
            play.matchup.as_str(),
        ] {
            assert!(!serialized.contains(gated), "leaked: {gated}");
        }
        for leg in play.legs.as_ref().unwrap() {
            for gated in [&leg.player, &leg.prop, &leg.line, &leg.matchup] {
                assert!(!serialized.contains(gated.as_str()), "leaked leg field: {gated}");
            }
        }
    }

    #[test]
    fn test_locked_view_zeroes_units_and_slip_flag() {
        let view = project(&parlay(), &plain_viewer(), true).unwrap();

        assert_eq!(view.units, 0);
        assert!(!view.has_slip_image);
        assert_eq!(view.team, LOCKED_TEAM);
        assert_eq!(view.odds, LOCKED_ODDS);
        assert_eq!(view.matchup, LOCKED_MATCHUP);
    }

    #[test]
    fn test_locked_legs_keep_id_and_sport() {
        let play = parlay();
        let view = project(&play, &plain_viewer(), false).unwrap();
        let legs = view.legs.unwrap();

        assert_eq!(legs.len(), 2);
        assert_eq!(legs[0].id, "leg_1");
        assert_eq!(legs[0].sport, "NBA");
        assert_eq!(legs[0].player, LOCKED_LEG_FIELD);
        assert_eq!(legs[1].line, LOCKED_LEG_FIELD);
    }

    #[test]
    fn test_graded_plays_vanish_for_plain_viewers() {
        let mut play = parlay();
        play.result = BetResult::Win;

        assert!(project(&play, &plain_viewer(), false).is_none());

        let views = project_all(&[play], &plain_viewer(), &HashSet::new());
        assert!(views.is_empty());
    }

    #[test]
    fn test_graded_plays_remain_in_full_projection() {
        let mut play = parlay();
        play.result = BetResult::Win;

        let view = project(&play, &premium_viewer(), false).unwrap();
        assert_eq!(view.result, BetResult::Win);
        assert_eq!(view.team, play.team);
    }

    #[test]
    fn test_full_view_passes_through_with_slip_flag() {
        let play = parlay();
        let mut with_slip = HashSet::new();
        with_slip.insert(play.id.clone());

        let views = project_all(&[play.clone()], &premium_viewer(), &with_slip);

        assert_eq!(views.len(), 1);
        assert!(views[0].has_slip_image);
        assert_eq!(views[0].odds, "+450");
        assert_eq!(views[0].units, 2);
        assert_eq!(
            views[0].legs.as_ref().unwrap()[0].player,
            "LeBron James Over 25.5 Points"
        );
    }

    #[test]
    fn test_admin_sees_full_view() {
        let caps = Capabilities {
            identity: Some("user_admin".into()),
            is_admin: true,
            has_premium_access: false,
        };

        let play = parlay();
        let view = project(&play, &caps, false).unwrap();
        assert_eq!(view.matchup, play.matchup);
    }
}
