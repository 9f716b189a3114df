// Application state and orchestration logic.
//
// The event loop that applies user commands to the live draft session and
// pushes notices to the presentation surface.

use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::db::Database;
use crate::draft::session::DraftSession;
use crate::protocol::{SessionNotice, UserCommand};

// ---------------------------------------------------------------------------
// AppState
// ---------------------------------------------------------------------------

/// The complete application state.
pub struct AppState {
    pub config: Config,
    pub db: Arc<Database>,
    /// The open draft session. `None` only before `open_session` and
    /// briefly while reopening.
    pub session: Option<DraftSession>,
    /// Sender for notices; each session gets a clone.
    pub notice_tx: mpsc::Sender<SessionNotice>,
}

impl AppState {
    pub fn new(config: Config, db: Arc<Database>, notice_tx: mpsc::Sender<SessionNotice>) -> Self {
        AppState {
            config,
            db,
            session: None,
            notice_tx,
        }
    }

    /// Make sure the configured dynasty and season have state rows, so
    /// progress writes have something to update.
    pub fn ensure_dynasty(&self) -> anyhow::Result<()> {
        let dynasty = &self.config.dynasty;
        self.db.create_dynasty(&dynasty.id, &dynasty.name)?;
        self.db.ensure_season(&dynasty.id, dynasty.season)?;
        Ok(())
    }

    /// Open a draft session for the configured dynasty season, closing any
    /// session already open. Returns whether the new session resumed
    /// saved progress.
    pub fn open_session(&mut self) -> bool {
        if let Some(previous) = self.session.take() {
            previous.close();
        }

        let dynasty = &self.config.dynasty;
        let session = DraftSession::open(
            Arc::clone(&self.db),
            &dynasty.id,
            dynasty.season,
            self.notice_tx.clone(),
        );
        let resumed = session.resumed();
        self.session = Some(session);
        resumed
    }

    /// Close the open session, if any. Returns whether the final save
    /// succeeded (`true` when there was nothing to close).
    pub fn close_session(&mut self) -> bool {
        match self.session.take() {
            Some(session) => session.close(),
            None => true,
        }
    }

    fn notify(&self, notice: SessionNotice) {
        if let Err(e) = self.notice_tx.try_send(notice) {
            debug!("Dropped notice: {}", e);
        }
    }
}

// ---------------------------------------------------------------------------
// Event loop
// ---------------------------------------------------------------------------

/// Run the app loop until a `Quit` command arrives or the command channel
/// closes, then close the session (final progress save).
///
/// Opens the session first if the caller has not.
pub async fn run(
    mut cmd_rx: mpsc::Receiver<UserCommand>,
    mut state: AppState,
) -> anyhow::Result<()> {
    info!("Application event loop started");

    if state.session.is_none() {
        state.open_session();
    }

    loop {
        match cmd_rx.recv().await {
            Some(UserCommand::Quit) => {
                info!("Quit command received, shutting down");
                break;
            }
            Some(cmd) => handle_user_command(&mut state, cmd),
            None => {
                info!("Command channel closed, shutting down");
                break;
            }
        }
    }

    if !state.close_session() {
        warn!("Final draft progress save failed");
    }
    info!("Application event loop exiting");
    Ok(())
}

/// Handle a user command.
fn handle_user_command(state: &mut AppState, cmd: UserCommand) {
    match cmd {
        UserCommand::Pick {
            team_name,
            player_name,
        } => {
            let Some(session) = state.session.as_mut() else {
                state.notify(SessionNotice::Rejected {
                    reason: "no draft session is open".into(),
                });
                return;
            };
            if let Err(e) = session.advance(&team_name, &player_name) {
                info!("Pick rejected: {}", e);
                state.notify(SessionNotice::Rejected {
                    reason: e.to_string(),
                });
            }
        }
        UserCommand::Status => {
            if let Some(snapshot) = state.session.as_ref().map(DraftSession::snapshot) {
                state.notify(SessionNotice::Status(snapshot));
            }
        }
        UserCommand::Reopen => {
            info!("Reopening draft session");
            state.open_session();
        }
        UserCommand::Quit => {
            // Handled in the main loop
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{DynastyConfig, LoggingConfig};

    fn test_config() -> Config {
        Config {
            dynasty: DynastyConfig {
                id: "eagles".into(),
                name: "Eagles Dynasty".into(),
                season: 2025,
            },
            db_path: ":memory:".into(),
            logging: LoggingConfig::default(),
        }
    }

    fn create_test_app_state() -> (AppState, mpsc::Receiver<SessionNotice>) {
        let db = Arc::new(Database::open(":memory:").expect("in-memory db"));
        let (notice_tx, notice_rx) = mpsc::channel(64);
        let state = AppState::new(test_config(), db, notice_tx);
        state.ensure_dynasty().unwrap();
        (state, notice_rx)
    }

    fn pick(team: &str, player: &str) -> UserCommand {
        UserCommand::Pick {
            team_name: team.into(),
            player_name: player.into(),
        }
    }

    #[test]
    fn ensure_dynasty_is_idempotent() {
        let (state, _rx) = create_test_app_state();
        state.ensure_dynasty().unwrap();
        assert_eq!(state.db.list_seasons("eagles").unwrap(), vec![2025]);
    }

    #[test]
    fn open_session_fresh_then_resumed() {
        let (mut state, _rx) = create_test_app_state();
        assert!(!state.open_session());

        handle_user_command(&mut state, pick("Bears", "A"));
        handle_user_command(&mut state, pick("Commanders", "B"));

        // Reopening closes the current session first, saving pick 2.
        assert!(state.open_session());
        assert_eq!(state.session.as_ref().unwrap().cursor(), 2);
    }

    #[test]
    fn pick_without_session_is_rejected() {
        let (mut state, mut rx) = create_test_app_state();
        handle_user_command(&mut state, pick("Bears", "A"));
        assert!(matches!(rx.try_recv(), Ok(SessionNotice::Rejected { .. })));
    }

    #[test]
    fn status_reports_snapshot() {
        let (mut state, mut rx) = create_test_app_state();
        state.open_session();
        handle_user_command(&mut state, pick("Bears", "A"));
        handle_user_command(&mut state, UserCommand::Status);

        let mut snapshot = None;
        while let Ok(notice) = rx.try_recv() {
            if let SessionNotice::Status(s) = notice {
                snapshot = Some(s);
            }
        }
        let snapshot = snapshot.expect("status notice");
        assert_eq!(snapshot.current_pick, 1);
        assert_eq!(snapshot.dynasty_id, "eagles");
        assert!(snapshot.in_progress);
    }

    #[tokio::test]
    async fn event_loop_handles_quit_command() {
        let (state, _notice_rx) = create_test_app_state();
        let db = Arc::clone(&state.db);
        let (cmd_tx, cmd_rx) = mpsc::channel(16);

        let handle = tokio::spawn(run(cmd_rx, state));

        cmd_tx.send(pick("Bears", "A")).await.unwrap();
        cmd_tx.send(pick("Commanders", "B")).await.unwrap();
        cmd_tx.send(pick("Patriots", "C")).await.unwrap();
        cmd_tx.send(UserCommand::Quit).await.unwrap();

        let result = handle.await.unwrap();
        assert!(result.is_ok());

        let progress = db.get_current_state("eagles", 2025).progress;
        assert_eq!(progress.current_pick, 3);
        assert!(progress.in_progress);
        assert_eq!(db.pick_count("eagles", 2025).unwrap(), 3);
    }

    #[tokio::test]
    async fn event_loop_saves_when_channel_closes() {
        let (state, _notice_rx) = create_test_app_state();
        let db = Arc::clone(&state.db);
        let (cmd_tx, cmd_rx) = mpsc::channel(16);

        let handle = tokio::spawn(run(cmd_rx, state));
        cmd_tx.send(pick("Bears", "A")).await.unwrap();
        drop(cmd_tx);

        assert!(handle.await.unwrap().is_ok());
        let progress = db.get_current_state("eagles", 2025).progress;
        assert_eq!(progress.current_pick, 1);
        assert!(progress.in_progress);
    }

    #[tokio::test]
    async fn event_loop_reopen_sends_resume_notice() {
        let (state, mut notice_rx) = create_test_app_state();
        let (cmd_tx, cmd_rx) = mpsc::channel(16);

        let handle = tokio::spawn(run(cmd_rx, state));
        cmd_tx.send(pick("Bears", "A")).await.unwrap();
        cmd_tx.send(UserCommand::Reopen).await.unwrap();
        cmd_tx.send(UserCommand::Quit).await.unwrap();
        assert!(handle.await.unwrap().is_ok());

        let mut notices = Vec::new();
        while let Ok(notice) = notice_rx.try_recv() {
            notices.push(notice);
        }
        assert!(notices.contains(&SessionNotice::ResumeAvailable { current_pick: 1 }));
    }
}
