// Messages exchanged between the input reader, the app loop, and the
// presentation surface.

use serde::Serialize;

use crate::draft::pick::DraftPick;

/// Commands parsed from user input and sent to the app loop.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UserCommand {
    /// Make the next selection.
    Pick {
        team_name: String,
        player_name: String,
    },
    /// Report the current session snapshot.
    Status,
    /// Close the session (saving progress) and open it again.
    Reopen,
    Quit,
}

impl UserCommand {
    /// Parse one line of input.
    ///
    /// Accepted forms: `pick <team> <player name...>`, `status`, `reopen`,
    /// `quit` (or `exit`). Leading/trailing whitespace and keyword case are
    /// ignored. Returns `None` for anything else.
    pub fn parse(line: &str) -> Option<Self> {
        let mut parts = line.split_whitespace();
        let keyword = parts.next()?.to_lowercase();
        match keyword.as_str() {
            "pick" => {
                let team_name = parts.next()?.to_string();
                let player_name = parts.collect::<Vec<_>>().join(" ");
                if player_name.is_empty() {
                    return None;
                }
                Some(UserCommand::Pick {
                    team_name,
                    player_name,
                })
            }
            "status" => Some(UserCommand::Status),
            "reopen" => Some(UserCommand::Reopen),
            "quit" | "exit" => Some(UserCommand::Quit),
            _ => None,
        }
    }
}

/// Point-in-time view of a draft session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SessionSnapshot {
    pub dynasty_id: String,
    pub season: i64,
    pub current_pick: u16,
    /// Round of the next selection.
    pub round: u16,
    pub in_progress: bool,
    pub complete: bool,
}

/// Notices pushed from the session to the presentation surface.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionNotice {
    /// The session picked up a draft left unfinished in an earlier session.
    ResumeAvailable { current_pick: u16 },
    /// A pick was made.
    PickMade(DraftPick),
    /// Saving progress failed; the session keeps going.
    SaveFailed { current_pick: u16 },
    /// The last pick of the draft was made.
    DraftComplete,
    Status(SessionSnapshot),
    /// Input the app loop could not act on.
    Rejected { reason: String },
}
