// Individual pick representation for the draft order log.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::Serialize;

use super::progress::round_for_pick;

/// A single selection in the draft.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DraftPick {
    /// 1-based overall pick number.
    pub pick_number: u16,
    /// Team making the selection.
    pub team_name: String,
    /// Player selected.
    pub player_name: String,
    /// When the pick was stored. `None` until the pick has been written;
    /// populated by `Database::load_picks` from the SQLite default.
    pub recorded_at: Option<DateTime<Utc>>,
}

impl DraftPick {
    pub fn new(pick_number: u16, team_name: &str, player_name: &str) -> Self {
        DraftPick {
            pick_number,
            team_name: team_name.to_string(),
            player_name: player_name.to_string(),
            recorded_at: None,
        }
    }

    /// Round this pick falls in.
    pub fn round(&self) -> u16 {
        round_for_pick(self.pick_number)
    }
}

impl fmt::Display for DraftPick {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Round {}, pick {}: {} select {}",
            self.round(),
            self.pick_number,
            self.team_name,
            self.player_name
        )
    }
}
