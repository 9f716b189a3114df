// Draft day entry point.
//
// Startup sequence:
// 1. Load config
// 2. Initialize tracing (log to file, stdout is for the session)
// 3. Open database (applies the draft progress migration)
// 4. Ensure the dynasty and season rows exist
// 5. Open the draft session (resuming if a draft was left unfinished)
// 6. Spawn the stdin reader and app logic tasks
// 7. Print notices until the app loop exits
// 8. Cleanup on exit

use std::io::BufRead;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use draft_day::app::{self, AppState};
use draft_day::config::{self, LoggingConfig};
use draft_day::db::Database;
use draft_day::protocol::{SessionNotice, UserCommand};

use anyhow::Context;
use tokio::sync::mpsc;
use tracing::{error, info, warn};

const LOG_FILE: &str = "draft-day.log";

/// Room for a burst of piped commands without losing notices.
const NOTICE_CHANNEL_CAPACITY: usize = 256;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // 1. Load config
    let config = config::load_config().context("failed to load configuration")?;

    // 2. Initialize tracing
    let log_path = init_tracing(&config.logging)?;
    info!("Draft day starting up, logging to {}", log_path.display());
    info!(
        "Config loaded: dynasty={} ({}), season {}",
        config.dynasty.id, config.dynasty.name, config.dynasty.season
    );

    // 3. Open database
    if let Some(parent) = Path::new(&config.db_path).parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("failed to create {}", parent.display()))?;
        }
    }
    let db = Database::open(&config.db_path).context("failed to open database")?;
    info!("Database opened at {}", config.db_path);

    // 4-5. Dynasty rows and session
    let (notice_tx, mut notice_rx) = mpsc::channel(NOTICE_CHANNEL_CAPACITY);
    let (cmd_tx, cmd_rx) = mpsc::channel(16);

    let mut state = AppState::new(config, Arc::new(db), notice_tx);
    state
        .ensure_dynasty()
        .context("failed to create dynasty season")?;
    if state.open_session() {
        info!("Draft state restored from previous session");
    } else {
        info!("Starting fresh draft session");
    }
    print_help();

    // 6. Input and app logic tasks
    let input_tx = cmd_tx.clone();
    std::thread::spawn(move || read_commands(input_tx));
    let app_handle = tokio::spawn(async move {
        if let Err(e) = app::run(cmd_rx, state).await {
            error!("Application loop error: {}", e);
        }
    });

    // Ctrl+C quits through the app loop so the final save still happens.
    let interrupt_tx = cmd_tx;
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Interrupted, closing draft session");
            let _ = interrupt_tx.send(UserCommand::Quit).await;
        }
    });

    // 7. Print notices; the channel closes once the app loop has dropped
    //    the state (and with it every sender).
    while let Some(notice) = notice_rx.recv().await {
        print_notice(&notice);
    }

    // 8. Cleanup
    if let Err(e) = app_handle.await {
        error!("Application task failed: {}", e);
    }

    info!("Draft day shut down cleanly");
    Ok(())
}

/// Append tracing output to `<logging.dir>/draft-day.log`, keeping the log
/// of earlier sessions. Stdout is left to the session. Returns the log path.
fn init_tracing(logging: &LoggingConfig) -> anyhow::Result<PathBuf> {
    use tracing_subscriber::EnvFilter;

    let log_dir = PathBuf::from(&logging.dir);
    std::fs::create_dir_all(&log_dir)
        .with_context(|| format!("failed to create log directory {}", log_dir.display()))?;
    let log_path = log_dir.join(LOG_FILE);
    let log_file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(&log_path)
        .with_context(|| format!("failed to open log file {}", log_path.display()))?;

    // RUST_LOG wins over the configured filter.
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&logging.filter))
        .with_context(|| format!("invalid log filter `{}`", logging.filter))?;

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(log_file)
        .with_ansi(false)
        .with_target(false)
        .try_init()
        .map_err(|e| anyhow::anyhow!("failed to set tracing subscriber: {e}"))?;

    Ok(log_path)
}

/// Read stdin lines, forwarding parsed commands. EOF sends `Quit`.
///
/// Runs on a plain thread: a blocking stdin read must not hold up runtime
/// shutdown.
fn read_commands(cmd_tx: mpsc::Sender<UserCommand>) {
    for line in std::io::stdin().lock().lines() {
        let line = match line {
            Ok(line) => line,
            Err(e) => {
                warn!("Failed to read input: {}", e);
                break;
            }
        };
        if line.trim().is_empty() {
            continue;
        }
        match UserCommand::parse(&line) {
            Some(cmd) => {
                let quit = cmd == UserCommand::Quit;
                if cmd_tx.blocking_send(cmd).is_err() || quit {
                    return;
                }
            }
            None => {
                println!("Unrecognized command: {}", line.trim());
                print_help();
            }
        }
    }
    let _ = cmd_tx.blocking_send(UserCommand::Quit);
}

fn print_help() {
    println!("Commands: pick <team> <player name>, status, reopen, quit");
}

fn print_notice(notice: &SessionNotice) {
    match notice {
        SessionNotice::ResumeAvailable { current_pick } => {
            println!("Resuming draft at pick {current_pick}.");
        }
        SessionNotice::PickMade(pick) => println!("{pick}"),
        SessionNotice::SaveFailed { current_pick } => {
            println!("Warning: draft progress at pick {current_pick} was not saved.");
        }
        SessionNotice::DraftComplete => println!("The draft is complete."),
        SessionNotice::Status(snapshot) => match serde_json::to_string_pretty(snapshot) {
            Ok(json) => println!("{json}"),
            Err(e) => warn!("Failed to render status: {}", e),
        },
        SessionNotice::Rejected { reason } => println!("Rejected: {reason}"),
    }
}
