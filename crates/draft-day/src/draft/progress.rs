// Draft progress: the persisted pick cursor and in-progress flag.

use serde::Serialize;

/// Highest valid pick cursor. A cursor of `MAX_PICK` means every pick in
/// the draft has been made.
pub const MAX_PICK: u16 = 262;

/// Number of teams selecting in each round.
pub const TEAMS_PER_ROUND: u16 = 32;

/// Number of rounds in the draft. Compensatory picks past
/// `TEAMS_PER_ROUND * ROUNDS` are all part of the final round.
pub const ROUNDS: u16 = 7;

/// Check that `pick` is a valid cursor value (0 through `MAX_PICK`
/// inclusive) and narrow it to `u16`. Returns `None` when out of range.
pub fn checked_pick(pick: i64) -> Option<u16> {
    u16::try_from(pick).ok().filter(|p| *p <= MAX_PICK)
}

/// Map a 1-based pick number to its round (1 through `ROUNDS`).
///
/// Pick 0 is treated as the first pick, so the round of the *next*
/// selection is `round_for_pick(cursor + 1)`.
pub fn round_for_pick(pick_number: u16) -> u16 {
    let index = pick_number.saturating_sub(1);
    (index / TEAMS_PER_ROUND + 1).min(ROUNDS)
}

/// Stored draft progress for one dynasty season.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct DraftProgress {
    /// Index of the next selection to be made; 0 means the draft has not
    /// started.
    pub current_pick: u16,
    /// True when the session was closed before the last pick.
    pub in_progress: bool,
}

impl DraftProgress {
    /// Whether opening a session from this progress should resume mid-draft.
    pub fn is_resumable(&self) -> bool {
        self.in_progress && self.current_pick > 0
    }

    /// Whether every pick has been made.
    pub fn is_complete(&self) -> bool {
        self.current_pick >= MAX_PICK
    }
}

/// A progress value together with the key it was read from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DraftProgressRecord {
    pub dynasty_id: String,
    /// `None` when the dynasty has no season rows at all.
    pub season: Option<i64>,
    #[serde(flatten)]
    pub progress: DraftProgress,
}

impl DraftProgressRecord {
    /// A record holding the default progress (pick 0, not in progress).
    pub fn empty(dynasty_id: &str, season: Option<i64>) -> Self {
        Self {
            dynasty_id: dynasty_id.to_string(),
            season,
            progress: DraftProgress::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn checked_pick_accepts_bounds() {
        assert_eq!(checked_pick(0), Some(0));
        assert_eq!(checked_pick(150), Some(150));
        assert_eq!(checked_pick(262), Some(262));
    }

    #[test]
    fn checked_pick_rejects_out_of_range() {
        assert_eq!(checked_pick(-1), None);
        assert_eq!(checked_pick(263), None);
        assert_eq!(checked_pick(i64::MAX), None);
        assert_eq!(checked_pick(i64::MIN), None);
    }

    #[test]
    fn rounds_cover_regular_and_compensatory_picks() {
        assert_eq!(round_for_pick(0), 1);
        assert_eq!(round_for_pick(1), 1);
        assert_eq!(round_for_pick(32), 1);
        assert_eq!(round_for_pick(33), 2);
        assert_eq!(round_for_pick(224), 7);
        assert_eq!(round_for_pick(225), 7);
        assert_eq!(round_for_pick(262), 7);
    }

    #[test]
    fn default_progress_is_not_resumable() {
        let progress = DraftProgress::default();
        assert_eq!(progress.current_pick, 0);
        assert!(!progress.in_progress);
        assert!(!progress.is_resumable());
        assert!(!progress.is_complete());
    }

    #[test]
    fn in_progress_at_pick_zero_is_not_resumable() {
        let progress = DraftProgress {
            current_pick: 0,
            in_progress: true,
        };
        assert!(!progress.is_resumable());
    }

    #[test]
    fn record_serializes_flat() {
        let record = DraftProgressRecord {
            dynasty_id: "eagles".into(),
            season: Some(2025),
            progress: DraftProgress {
                current_pick: 150,
                in_progress: true,
            },
        };
        let json = serde_json::to_value(&record).unwrap();
        assert_eq!(json["current_pick"], 150);
        assert_eq!(json["in_progress"], true);
        assert_eq!(json["season"], 2025);
    }
}
