// Draft session controller: resumes from saved progress on open and writes
// progress through to the database on every pick and on close.

use std::sync::Arc;

use thiserror::Error;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use super::pick::DraftPick;
use super::progress::{round_for_pick, MAX_PICK};
use crate::db::Database;
use crate::protocol::{SessionNotice, SessionSnapshot};

#[derive(Debug, Error, PartialEq, Eq)]
pub enum SessionError {
    #[error("the draft is complete; all {max} picks have been made", max = MAX_PICK)]
    DraftComplete,
}

/// A live draft session for one dynasty season.
///
/// The pick cursor lives here; the database holds the only persisted copy.
/// Persistence failures never escape: they are logged and surfaced as
/// `SessionNotice::SaveFailed` while the session carries on.
///
/// Dropping a session without calling `close` still performs the final
/// save.
pub struct DraftSession {
    db: Arc<Database>,
    dynasty_id: String,
    season: i64,
    cursor: u16,
    resumed: bool,
    /// Set once picks left past the cursor by an earlier draft have been
    /// discarded from the draft order log.
    picks_synced: bool,
    notices: mpsc::Sender<SessionNotice>,
    closed: bool,
}

impl DraftSession {
    /// Open a session, resuming mid-draft if this season's saved progress
    /// is an unfinished draft.
    ///
    /// The dynasty's latest state is read first; when a newer season exists
    /// the session's own season row is read instead. A completed season
    /// opens complete and refuses further picks. When resuming, a
    /// `SessionNotice::ResumeAvailable` is sent. A progress read failure is
    /// treated as "nothing to resume".
    pub fn open(
        db: Arc<Database>,
        dynasty_id: &str,
        season: i64,
        notices: mpsc::Sender<SessionNotice>,
    ) -> Self {
        let latest = db.get_latest_state(dynasty_id);
        let stored = if latest.season == Some(season) {
            latest.progress
        } else {
            debug!(
                "Latest season for {} is {:?}, reading season {} directly",
                dynasty_id, latest.season, season
            );
            db.get_current_state(dynasty_id, season).progress
        };
        let resume = stored.is_resumable();

        let cursor = if resume {
            info!(
                "Resuming draft for {} season {} at pick {}",
                dynasty_id, season, stored.current_pick
            );
            stored.current_pick
        } else if stored.is_complete() {
            info!("Draft for {} season {} is already complete", dynasty_id, season);
            MAX_PICK
        } else {
            info!("Starting fresh draft for {} season {}", dynasty_id, season);
            0
        };

        let session = DraftSession {
            db,
            dynasty_id: dynasty_id.to_string(),
            season,
            cursor,
            resumed: resume,
            picks_synced: false,
            notices,
            closed: false,
        };

        if resume {
            session.notify(SessionNotice::ResumeAvailable {
                current_pick: cursor,
            });
        }
        session
    }

    pub fn dynasty_id(&self) -> &str {
        &self.dynasty_id
    }

    pub fn season(&self) -> i64 {
        self.season
    }

    /// Index of the next selection (0 before the first pick).
    pub fn cursor(&self) -> u16 {
        self.cursor
    }

    /// Whether this session picked up saved progress when it opened.
    pub fn resumed(&self) -> bool {
        self.resumed
    }

    pub fn is_complete(&self) -> bool {
        self.cursor >= MAX_PICK
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        SessionSnapshot {
            dynasty_id: self.dynasty_id.clone(),
            season: self.season,
            current_pick: self.cursor,
            round: round_for_pick(self.cursor.saturating_add(1)),
            in_progress: self.cursor > 0 && !self.is_complete(),
            complete: self.is_complete(),
        }
    }

    /// Make the next selection.
    ///
    /// Records the pick in the draft order log, advances the cursor, then
    /// saves progress with `in_progress = true`. The first pick of a session
    /// discards any logged picks past the starting cursor, left there by an
    /// earlier draft of the same season. If any write fails, or the pick
    /// number is already taken in the log, the cursor still advances and a
    /// `SaveFailed` notice is sent.
    pub fn advance(
        &mut self,
        team_name: &str,
        player_name: &str,
    ) -> Result<DraftPick, SessionError> {
        if self.is_complete() {
            return Err(SessionError::DraftComplete);
        }

        let pick = DraftPick::new(self.cursor + 1, team_name, player_name);
        let mut saved = true;

        if !self.picks_synced {
            match self
                .db
                .truncate_picks(&self.dynasty_id, self.season, self.cursor)
            {
                Ok(removed) => {
                    if removed > 0 {
                        info!(
                            "Discarded {} logged picks after pick {} from an earlier draft",
                            removed, self.cursor
                        );
                    }
                    self.picks_synced = true;
                }
                Err(e) => warn!("Failed to discard stale picks: {:#}", e),
            }
        }

        match self.db.record_pick(&self.dynasty_id, self.season, &pick) {
            Ok(true) => {}
            Ok(false) => {
                warn!(
                    "Pick {} is already in the draft order log, not recorded",
                    pick.pick_number
                );
                saved = false;
            }
            Err(e) => {
                warn!("Failed to record pick {}: {:#}", pick.pick_number, e);
                saved = false;
            }
        }

        self.cursor = pick.pick_number;

        if !self.db.update_draft_progress(
            &self.dynasty_id,
            self.season,
            i64::from(self.cursor),
            true,
        ) {
            saved = false;
        }

        info!("{}", pick);
        if !saved {
            warn!(
                "Draft progress not saved at pick {}, continuing in memory",
                self.cursor
            );
            self.notify(SessionNotice::SaveFailed {
                current_pick: self.cursor,
            });
        }
        self.notify(SessionNotice::PickMade(pick.clone()));
        if self.is_complete() {
            self.notify(SessionNotice::DraftComplete);
        }

        Ok(pick)
    }

    /// Close the session, saving the final cursor. `in_progress` is stored
    /// as `true` unless the last pick has been made. Returns whether the
    /// save succeeded.
    pub fn close(mut self) -> bool {
        self.finish()
    }

    fn finish(&mut self) -> bool {
        self.closed = true;
        let in_progress = self.cursor < MAX_PICK;
        let saved = self.db.update_draft_progress(
            &self.dynasty_id,
            self.season,
            i64::from(self.cursor),
            in_progress,
        );
        if saved {
            info!(
                "Closed draft session for {} season {} at pick {} (in_progress={})",
                self.dynasty_id, self.season, self.cursor, in_progress
            );
        } else {
            self.notify(SessionNotice::SaveFailed {
                current_pick: self.cursor,
            });
        }
        saved
    }

    /// Send a notice without blocking. A full or closed channel only loses
    /// the notice; a lost save warning is logged at `warn`.
    fn notify(&self, notice: SessionNotice) {
        if let Err(e) = self.notices.try_send(notice) {
            match e.into_inner() {
                SessionNotice::SaveFailed { current_pick } => warn!(
                    "Dropped save warning for pick {}, notice channel unavailable",
                    current_pick
                ),
                other => debug!("Dropped session notice: {:?}", other),
            }
        }
    }
}

impl Drop for DraftSession {
    fn drop(&mut self) {
        if !self.closed {
            self.finish();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const DYNASTY: &str = "eagles";
    const SEASON: i64 = 2025;

    fn test_db() -> Arc<Database> {
        let db = Database::open(":memory:").expect("in-memory database should open");
        db.create_dynasty(DYNASTY, "Eagles Dynasty").unwrap();
        db.ensure_season(DYNASTY, SEASON).unwrap();
        Arc::new(db)
    }

    fn drain(rx: &mut mpsc::Receiver<SessionNotice>) -> Vec<SessionNotice> {
        let mut notices = Vec::new();
        while let Ok(notice) = rx.try_recv() {
            notices.push(notice);
        }
        notices
    }

    #[test]
    fn fresh_open_starts_at_zero_without_notice() {
        let db = test_db();
        let (tx, mut rx) = mpsc::channel(16);

        let session = DraftSession::open(db, DYNASTY, SEASON, tx);
        assert_eq!(session.cursor(), 0);
        assert!(!session.resumed());
        assert!(drain(&mut rx).is_empty());
    }

    #[test]
    fn open_resumes_saved_pick_with_notice() {
        let db = test_db();
        assert!(db.update_draft_progress(DYNASTY, SEASON, 150, true));
        let (tx, mut rx) = mpsc::channel(16);

        let session = DraftSession::open(db, DYNASTY, SEASON, tx);
        assert_eq!(session.cursor(), 150);
        assert!(session.resumed());
        assert_eq!(
            drain(&mut rx),
            vec![SessionNotice::ResumeAvailable { current_pick: 150 }]
        );
    }

    #[test]
    fn completed_draft_does_not_resume() {
        let db = test_db();
        db.record_pick(DYNASTY, SEASON, &DraftPick::new(1, "Eagles", "First Overall"))
            .unwrap();
        assert!(db.update_draft_progress(DYNASTY, SEASON, 262, false));
        let (tx, mut rx) = mpsc::channel(16);

        let mut session = DraftSession::open(db.clone(), DYNASTY, SEASON, tx);
        assert!(!session.resumed());
        assert!(session.is_complete());
        assert!(drain(&mut rx).is_empty());

        assert_eq!(
            session.advance("Eagles", "Replacement"),
            Err(SessionError::DraftComplete)
        );
        assert!(session.close());

        let progress = db.get_current_state(DYNASTY, SEASON).progress;
        assert_eq!(progress.current_pick, 262);
        assert!(!progress.in_progress);
        assert_eq!(
            db.load_picks(DYNASTY, SEASON).unwrap()[0].player_name,
            "First Overall"
        );
    }

    #[test]
    fn not_in_progress_does_not_resume() {
        let db = test_db();
        assert!(db.update_draft_progress(DYNASTY, SEASON, 40, false));
        let (tx, _rx) = mpsc::channel(16);

        let session = DraftSession::open(db, DYNASTY, SEASON, tx);
        assert_eq!(session.cursor(), 0);
    }

    #[test]
    fn unfinished_draft_from_other_season_does_not_resume() {
        let db = test_db();
        db.ensure_season(DYNASTY, 2026).unwrap();
        assert!(db.update_draft_progress(DYNASTY, 2026, 20, true));
        let (tx, mut rx) = mpsc::channel(16);

        let session = DraftSession::open(db, DYNASTY, SEASON, tx);
        assert_eq!(session.cursor(), 0);
        assert!(drain(&mut rx).is_empty());
    }

    #[test]
    fn older_season_resumes_own_progress_when_newer_season_exists() {
        let db = test_db();
        assert!(db.update_draft_progress(DYNASTY, SEASON, 150, true));
        db.ensure_season(DYNASTY, 2026).unwrap();
        let (tx, mut rx) = mpsc::channel(16);

        let session = DraftSession::open(db.clone(), DYNASTY, SEASON, tx);
        assert_eq!(session.cursor(), 150);
        assert!(session.resumed());
        assert_eq!(
            drain(&mut rx),
            vec![SessionNotice::ResumeAvailable { current_pick: 150 }]
        );
        assert!(session.close());

        let progress = db.get_current_state(DYNASTY, SEASON).progress;
        assert_eq!(progress.current_pick, 150);
        assert!(progress.in_progress);
    }

    #[test]
    fn fresh_start_discards_picks_from_earlier_draft() {
        let db = test_db();
        db.record_pick(DYNASTY, SEASON, &DraftPick::new(1, "Eagles", "Old A"))
            .unwrap();
        db.record_pick(DYNASTY, SEASON, &DraftPick::new(2, "Bears", "Old B"))
            .unwrap();
        assert!(db.update_draft_progress(DYNASTY, SEASON, 2, false));
        let (tx, mut rx) = mpsc::channel(16);

        let mut session = DraftSession::open(db.clone(), DYNASTY, SEASON, tx);
        assert_eq!(session.cursor(), 0);
        session.advance("Eagles", "New A").unwrap();

        let picks = db.load_picks(DYNASTY, SEASON).unwrap();
        assert_eq!(picks.len(), 1);
        assert_eq!(picks[0].player_name, "New A");
        assert!(!drain(&mut rx)
            .iter()
            .any(|n| matches!(n, SessionNotice::SaveFailed { .. })));
    }

    #[test]
    fn resume_discards_picks_logged_past_saved_pick() {
        let db = test_db();
        for n in 1..=3 {
            db.record_pick(DYNASTY, SEASON, &DraftPick::new(n, "Eagles", &format!("P{n}")))
                .unwrap();
        }
        // Pick 3 was logged but the process died before progress was saved.
        assert!(db.update_draft_progress(DYNASTY, SEASON, 2, true));
        let (tx, _rx) = mpsc::channel(16);

        let mut session = DraftSession::open(db.clone(), DYNASTY, SEASON, tx);
        assert_eq!(session.cursor(), 2);
        session.advance("Bears", "Redo").unwrap();

        let names: Vec<_> = db
            .load_picks(DYNASTY, SEASON)
            .unwrap()
            .into_iter()
            .map(|p| p.player_name)
            .collect();
        assert_eq!(names, vec!["P1", "P2", "Redo"]);
    }

    #[test]
    fn taken_pick_number_reports_save_failed() {
        let db = test_db();
        let (tx, mut rx) = mpsc::channel(16);
        let mut session = DraftSession::open(db.clone(), DYNASTY, SEASON, tx);
        session.advance("Eagles", "A").unwrap();

        // Another writer fills the next slot behind the session's back.
        db.record_pick(DYNASTY, SEASON, &DraftPick::new(2, "Bears", "Elsewhere"))
            .unwrap();
        drain(&mut rx);

        let pick = session.advance("Bears", "B").unwrap();
        assert_eq!(pick.pick_number, 2);
        assert_eq!(session.cursor(), 2);
        assert!(drain(&mut rx).contains(&SessionNotice::SaveFailed { current_pick: 2 }));
        assert_eq!(
            db.load_picks(DYNASTY, SEASON).unwrap()[1].player_name,
            "Elsewhere"
        );
    }

    #[test]
    fn advance_records_pick_and_saves_progress() {
        let db = test_db();
        let (tx, mut rx) = mpsc::channel(16);
        let mut session = DraftSession::open(db.clone(), DYNASTY, SEASON, tx);

        let pick = session.advance("Bears", "Caleb Williams").unwrap();
        assert_eq!(pick.pick_number, 1);
        assert_eq!(session.cursor(), 1);

        let progress = db.get_current_state(DYNASTY, SEASON).progress;
        assert_eq!(progress.current_pick, 1);
        assert!(progress.in_progress);

        let picks = db.load_picks(DYNASTY, SEASON).unwrap();
        assert_eq!(picks.len(), 1);
        assert_eq!(picks[0].player_name, "Caleb Williams");

        let notices = drain(&mut rx);
        assert!(matches!(notices.as_slice(), [SessionNotice::PickMade(p)] if p.pick_number == 1));
    }

    #[test]
    fn close_mid_draft_marks_in_progress() {
        let db = test_db();
        let (tx, _rx) = mpsc::channel(16);
        let mut session = DraftSession::open(db.clone(), DYNASTY, SEASON, tx);
        session.advance("Bears", "A").unwrap();
        session.advance("Commanders", "B").unwrap();

        assert!(session.close());

        let progress = db.get_current_state(DYNASTY, SEASON).progress;
        assert_eq!(progress.current_pick, 2);
        assert!(progress.in_progress);
    }

    #[test]
    fn close_after_last_pick_clears_in_progress() {
        let db = test_db();
        assert!(db.update_draft_progress(DYNASTY, SEASON, 261, true));
        let (tx, mut rx) = mpsc::channel(16);
        let mut session = DraftSession::open(db.clone(), DYNASTY, SEASON, tx);
        assert_eq!(session.cursor(), 261);

        session.advance("Eagles", "Mr. Irrelevant").unwrap();
        assert!(session.is_complete());
        assert_eq!(
            session.advance("Eagles", "One Too Many"),
            Err(SessionError::DraftComplete)
        );
        assert!(session.close());

        let progress = db.get_current_state(DYNASTY, SEASON).progress;
        assert_eq!(progress.current_pick, 262);
        assert!(!progress.in_progress);

        let notices = drain(&mut rx);
        assert!(notices.contains(&SessionNotice::DraftComplete));
        assert_eq!(db.pick_count(DYNASTY, SEASON).unwrap(), 1);
    }

    #[test]
    fn drop_saves_like_close() {
        let db = test_db();
        let (tx, _rx) = mpsc::channel(16);
        {
            let mut session = DraftSession::open(db.clone(), DYNASTY, SEASON, tx);
            session.advance("Bears", "A").unwrap();
            // Simulate an in-memory cursor ahead of storage.
            session.cursor = 5;
        }

        let progress = db.get_current_state(DYNASTY, SEASON).progress;
        assert_eq!(progress.current_pick, 5);
        assert!(progress.in_progress);
    }

    #[test]
    fn save_failure_does_not_block_session() {
        let db = test_db();
        let (tx, mut rx) = mpsc::channel(16);
        // No state row for this season: every write fails.
        let mut session = DraftSession::open(db.clone(), DYNASTY, 1999, tx);

        let pick = session.advance("Bears", "A").unwrap();
        assert_eq!(pick.pick_number, 1);
        assert_eq!(session.cursor(), 1);
        session.advance("Bears", "B").unwrap();
        assert_eq!(session.cursor(), 2);

        let notices = drain(&mut rx);
        assert_eq!(
            notices
                .iter()
                .filter(|n| matches!(n, SessionNotice::SaveFailed { .. }))
                .count(),
            2
        );

        assert!(!session.close());
    }

    #[test]
    fn lost_save_warning_does_not_block_session() {
        let db = test_db();
        let (tx, rx) = mpsc::channel(1);
        drop(rx);
        let mut session = DraftSession::open(db, DYNASTY, 1999, tx);
        assert_eq!(session.advance("Bears", "A").unwrap().pick_number, 1);
        assert!(!session.close());
    }

    #[test]
    fn closed_channel_does_not_block_session() {
        let db = test_db();
        let (tx, rx) = mpsc::channel(1);
        drop(rx);
        let mut session = DraftSession::open(db, DYNASTY, SEASON, tx);
        session.advance("Bears", "A").unwrap();
        assert!(session.close());
    }

    #[test]
    fn snapshot_reports_round_of_next_pick() {
        let db = test_db();
        assert!(db.update_draft_progress(DYNASTY, SEASON, 32, true));
        let (tx, _rx) = mpsc::channel(16);
        let session = DraftSession::open(db, DYNASTY, SEASON, tx);

        let snapshot = session.snapshot();
        assert_eq!(snapshot.current_pick, 32);
        assert_eq!(snapshot.round, 2);
        assert!(snapshot.in_progress);
        assert!(!snapshot.complete);
    }
}
