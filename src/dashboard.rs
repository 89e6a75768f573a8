use std::io::IsTerminal;
use std::time::Duration;

use anyhow::{Context, Result};
use tokio::io::BufReader;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use logdeck_logs::{EntryStore, QueryEngine, ReaderSource, UPDATE_RATE, stream_to_store};
use logdeck_tui::{
    AppState, DashboardScreen, Effect, Event, EventHandler, FIELD_HISTORY_FILE,
    FILTER_HISTORY_FILE, History, KeyBindings, Prettifier, Stats, Tui, home_path,
};
use logdeck_types::RAW_FIELD;

use crate::config::DashboardConfig;

/// How long to wait for the stdin reader after the UI closes. A blocked
/// read on a pipe that never closes must not hold the exit.
const INGEST_SHUTDOWN_GRACE: Duration = Duration::from_secs(1);

/// Read records from stdin into the store and show them until the user quits
pub async fn run(config: DashboardConfig) -> Result<()> {
    let cancel = CancellationToken::new();

    let mut store = EntryStore::new(config.max_sort);
    if let Some(key) = &config.lookup_key {
        store = store.with_lookup_key(key.clone());
    }

    let engine = QueryEngine::new();
    if let Some(filter) = &config.filter {
        engine.set(filter);
    }
    store.add_known_fields(engine.keywords().iter().copied());
    store.add_known_fields([RAW_FIELD]);

    let prettifier = Prettifier::new(config.exclude.clone(), config.durations.clone());

    let filter_path = home_path(FILTER_HISTORY_FILE);
    let field_path = home_path(FIELD_HISTORY_FILE);
    let filter_history = load_history(filter_path.as_deref(), None);
    let field_seed = config.exclude.join(",");
    let field_history = load_history(field_path.as_deref(), Some(&field_seed));

    let ingest = spawn_stdin_ingest(store.clone(), cancel.clone());

    let stats = Stats::new();
    let sampler = stats.spawn_sampler(store.clone(), cancel.clone());

    let mut state = AppState::new(
        store.clone(),
        engine,
        prettifier,
        filter_history,
        field_history,
        stats,
    );

    let result = run_ui(&mut state, cancel.clone()).await;

    // Shutdown
    cancel.cancel();
    if let Some(pid) = store.pid() {
        interrupt(pid);
    }
    if let Err(e) = sampler.await {
        debug!(error = %e, "stats sampler ended abnormally");
    }
    if tokio::time::timeout(INGEST_SHUTDOWN_GRACE, ingest).await.is_err() {
        debug!("stdin reader still blocked, leaving it behind");
    }

    if let Some(path) = &filter_path {
        state.filter_history().save_or_warn(path);
    }
    if let Some(path) = &field_path {
        state.field_history().save_or_warn(path);
    }

    result
}

async fn run_ui(state: &mut AppState, cancel: CancellationToken) -> Result<()> {
    let mut tui = Tui::new().context("Failed to initialize terminal")?;
    let mut events = EventHandler::new(Duration::from_secs(1) / UPDATE_RATE, cancel);
    let keybindings = KeyBindings::new();

    loop {
        state.refresh();
        tui.terminal()
            .draw(|frame| DashboardScreen::render(frame, state))?;

        let Some(event) = events.next().await else {
            break;
        };

        match event {
            Event::Key(key) => {
                let Some(action) = keybindings.get_action(state.key_context(), &key) else {
                    continue;
                };
                match state.handle(action) {
                    Some(Effect::Quit) => break,
                    Some(Effect::Interrupt(pid)) => interrupt(pid),
                    None => {}
                }
            }
            Event::Tick | Event::Resize(_, _) => {}
            Event::Error(e) => {
                warn!(error = %e, "terminal input failed");
                break;
            }
        }
    }

    events.shutdown().await;
    tui.restore()?;
    Ok(())
}

fn load_history(path: Option<&std::path::Path>, seed: Option<&str>) -> History {
    match path {
        Some(path) => History::load(path, seed),
        None => {
            let mut history = History::new();
            if let Some(seed) = seed {
                history.add(seed);
            }
            history
        }
    }
}

/// Records come from stdin. When stdin is the terminal itself there is
/// nothing to read and the keyboard belongs to the dashboard.
fn spawn_stdin_ingest(store: EntryStore, cancel: CancellationToken) -> JoinHandle<()> {
    if std::io::stdin().is_terminal() {
        debug!("stdin is a terminal, no records to read");
        stream_to_store(ReaderSource::new("stdin", tokio::io::empty()), store, cancel)
    } else {
        let reader = BufReader::new(tokio::io::stdin());
        stream_to_store(ReaderSource::new("stdin", reader), store, cancel)
    }
}

/// Only a positive pid names a single process; 0 and negatives address
/// process groups
fn is_single_process(pid: i32) -> bool {
    pid > 0
}

/// Ask the aggregating process to stop its sources
#[cfg(unix)]
fn interrupt(pid: i32) {
    if !is_single_process(pid) {
        warn!(pid, "refusing to signal a process group");
        return;
    }
    // SAFETY: kill has no memory safety requirements
    let rc = unsafe { libc::kill(pid, libc::SIGINT) };
    if rc != 0 {
        warn!(pid, error = %std::io::Error::last_os_error(), "failed to interrupt aggregator");
    } else {
        debug!(pid, "interrupted aggregator");
    }
}

#[cfg(not(unix))]
fn interrupt(pid: i32) {
    warn!(pid, "interrupting the aggregator is not supported on this platform");
}
