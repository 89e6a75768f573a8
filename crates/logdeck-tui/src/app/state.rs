use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::Instant;

use chrono::Local;
use tracing::warn;

use logdeck_logs::{EntryStore, QueryEngine};
use logdeck_types::{Entry, ID_FIELD};

use super::{Action, Effect};
use crate::config::KeyContext;
use crate::history::History;
use crate::prettifier::Prettifier;
use crate::stats::Stats;

/// Dashboard interaction mode
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum Mode {
    #[default]
    Normal,
    /// Picking an entry to build a query from
    Lookup,
}

/// Which setting the input line edits
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum InputKind {
    Filter,
    Fields,
    Durations,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct InputState {
    pub kind: InputKind,
    pub text: String,
}

/// Dashboard state: the active query, the visible entries and the input line
pub struct AppState {
    store: EntryStore,
    engine: QueryEngine,
    prettifier: Prettifier,
    filter_history: History,
    field_history: History,
    stats: Stats,

    mode: Mode,
    input: Option<InputState>,
    selected: Option<usize>,
    selected_id: u64,
    lookup_hold: Option<String>,
    show_help: bool,
    wrap: bool,
    notice: Option<String>,
    error: Option<String>,

    view: Vec<Entry>,
    height: usize,
    measure_filter: bool,
}

impl AppState {
    pub fn new(
        store: EntryStore,
        engine: QueryEngine,
        prettifier: Prettifier,
        filter_history: History,
        field_history: History,
        stats: Stats,
    ) -> Self {
        Self {
            store,
            engine,
            prettifier,
            filter_history,
            field_history,
            stats,
            mode: Mode::Normal,
            input: None,
            selected: None,
            selected_id: 0,
            lookup_hold: None,
            show_help: false,
            wrap: false,
            notice: None,
            error: None,
            view: Vec::new(),
            height: 0,
            measure_filter: true,
        }
    }

    pub fn store(&self) -> &EntryStore {
        &self.store
    }

    pub fn query(&self) -> String {
        self.engine.query()
    }

    pub fn prettifier(&self) -> &Prettifier {
        &self.prettifier
    }

    pub fn filter_history(&self) -> &History {
        &self.filter_history
    }

    pub fn field_history(&self) -> &History {
        &self.field_history
    }

    pub fn stats(&self) -> &Stats {
        &self.stats
    }

    pub fn mode(&self) -> Mode {
        self.mode
    }

    pub fn input(&self) -> Option<&InputState> {
        self.input.as_ref()
    }

    /// Index into `view()` of the entry picked in lookup mode
    pub fn selected(&self) -> Option<usize> {
        self.selected
    }

    pub fn show_help(&self) -> bool {
        self.show_help
    }

    pub fn wrap(&self) -> bool {
        self.wrap
    }

    pub fn notice(&self) -> Option<&str> {
        self.notice.as_deref()
    }

    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    pub fn view(&self) -> &[Entry] {
        &self.view
    }

    pub fn set_height(&mut self, height: usize) {
        self.height = height;
    }

    /// Which key bindings apply right now
    pub fn key_context(&self) -> KeyContext {
        if self.show_help {
            KeyContext::Help
        } else if self.input.is_some() {
            KeyContext::Input
        } else {
            KeyContext::Dashboard
        }
    }

    /// Label in front of the input line
    pub fn prompt(&self) -> &'static str {
        match self.input.as_ref().map(|i| i.kind) {
            Some(InputKind::Fields) => "$ ",
            Some(InputKind::Durations) => "% ",
            _ if self.store.paused() => "||> ",
            _ => " |> ",
        }
    }

    /// Re-run the active query for the visible window.
    ///
    /// On error the previous view is kept and the error is shown instead.
    pub fn refresh(&mut self) {
        if let Some(e) = self.engine.error() {
            self.error = Some(e.to_string());
            return;
        }

        let start = Instant::now();
        let query = self.engine.query();
        let engine = &self.engine;

        match self.store.filter_n(self.height, &query, |entry| engine.execute(entry)) {
            Ok(view) => {
                if self.measure_filter {
                    self.stats.set_last_filter_time(start.elapsed());
                    self.measure_filter = false;
                }
                self.view = view;
                self.error = None;
            }
            Err(e) => self.error = Some(e.to_string()),
        }

        if let Some(selected) = self.selected {
            let selected = selected.min(self.view.len().saturating_sub(1));
            self.selected = Some(selected);
            self.selected_id = self.view.get(selected).map(|e| e.id).unwrap_or(0);
        }
    }

    pub fn handle(&mut self, action: Action) -> Option<Effect> {
        self.notice = None;

        match action {
            Action::Quit => return Some(Effect::Quit),
            Action::Kill => return self.store.pid().map(Effect::Interrupt),

            Action::ToggleHelp => self.show_help = !self.show_help,
            Action::CloseHelp => self.show_help = false,
            Action::EditFilter => {
                let text = self.engine.query();
                self.open_input(InputKind::Filter, text);
            }
            Action::EditFields => {
                let text = self.prettifier.fields().join(",");
                self.open_input(InputKind::Fields, text);
            }
            Action::EditDurations => {
                let text = self.prettifier.durations().join(",");
                self.open_input(InputKind::Durations, text);
            }

            Action::TogglePause => self.store.toggle_paused(),
            Action::Clear => {
                self.store.clear();
                self.view.clear();
            }
            Action::Save => {
                self.notice = Some(match self.save_to(Path::new(".")) {
                    Ok(path) => format!("Wrote filtered logs to {}", path.display()),
                    Err(e) => {
                        warn!(error = %e, "failed to save filtered logs");
                        format!("Failed to save logs: {}", e)
                    }
                });
            }

            Action::ScrollUp => match self.mode {
                Mode::Normal => self.store.offset_add(1),
                Mode::Lookup => self.selected = self.selected.map(|s| s.saturating_sub(1)),
            },
            Action::ScrollDown => match self.mode {
                Mode::Normal => self.store.offset_add(-1),
                Mode::Lookup => {
                    let last = self.view.len().saturating_sub(1);
                    self.selected = self.selected.map(|s| (s + 1).min(last));
                }
            },
            Action::ScrollToBottom => self.store.offset_reset(),

            Action::ToggleWrap => self.wrap = !self.wrap,
            Action::ToggleJson => self.prettifier.toggle_json(),
            Action::ToggleJsonPretty => self.prettifier.toggle_json_pretty(),
            Action::ToggleFullTime => self.prettifier.toggle_full_time(),
            Action::ToggleFieldsExclude => self.prettifier.toggle_exclude(),
            Action::ToggleColors => self.prettifier.toggle_colors(),

            Action::ToggleLookup => self.toggle_lookup(),
            Action::Select => self.select(),
            Action::Isolate => self.isolate(),
            Action::Cancel => self.cancel(),

            Action::InputChar(c) => {
                if let Some(input) = self.input.as_mut() {
                    input.text.push(c);
                }
            }
            Action::InputBackspace => {
                if let Some(input) = self.input.as_mut() {
                    input.text.pop();
                }
            }
            Action::InputClear => {
                if let Some(input) = self.input.as_mut() {
                    input.text.clear();
                }
            }
            Action::InputComplete => self.complete(),
            Action::InputSubmit => self.submit(),
            Action::InputCancel => self.input = None,
            Action::HistoryPrevious => self.step_history(true),
            Action::HistoryNext => self.step_history(false),
        }

        None
    }

    /// Write every entry matching the active query to
    /// `<dir>/logs-<timestamp>.json`, one record per line
    pub fn save_to(&self, dir: &Path) -> io::Result<PathBuf> {
        let path = dir.join(Local::now().format("logs-%Y%m%d%H%M%S.json").to_string());
        let query = self.engine.query();
        let entries = self
            .store
            .filter_n(self.store.count(), &query, |entry| self.engine.execute(entry))
            .map_err(io::Error::other)?;

        let mut out = Vec::new();
        for entry in &entries {
            out.extend_from_slice(&entry.raw);
            out.push(b'\n');
        }
        fs::write(&path, out)?;

        Ok(path)
    }

    fn set_query(&mut self, query: &str) {
        self.engine.set(query);
        self.measure_filter = true;
    }

    fn open_input(&mut self, kind: InputKind, text: String) {
        self.filter_history.reset();
        self.field_history.reset();
        self.input = Some(InputState { kind, text });
    }

    fn submit(&mut self) {
        let Some(input) = self.input.take() else {
            return;
        };

        match input.kind {
            InputKind::Filter => {
                let query = input.text.trim();
                self.set_query(query);
                self.lookup_hold = None;
                if !query.is_empty() {
                    self.filter_history.add(query);
                }
            }
            InputKind::Fields => {
                let fields = split_list(&input.text);
                if !fields.is_empty() {
                    self.field_history.add(&input.text);
                }
                self.prettifier.set_fields(fields);
            }
            InputKind::Durations => self.prettifier.set_durations(split_list(&input.text)),
        }
    }

    fn complete(&mut self) {
        let Some(input) = self.input.as_mut() else {
            return;
        };

        let (fixed, word) = split_for_completion(&input.text);
        if word.is_empty() {
            return;
        }
        let Some(field) = self.store.known_fields_match(word).into_iter().next() else {
            return;
        };
        input.text = format!("{}{}", fixed, field);
    }

    fn step_history(&mut self, back: bool) {
        let Some(input) = self.input.as_mut() else {
            return;
        };
        let history = match input.kind {
            InputKind::Filter => &mut self.filter_history,
            InputKind::Fields => &mut self.field_history,
            InputKind::Durations => return,
        };

        let text = if back {
            history.previous(&input.text)
        } else {
            history.next()
        };
        if let Some(text) = text {
            input.text = text.to_string();
        }
    }

    fn leave_lookup(&mut self) {
        self.mode = Mode::Normal;
        self.selected = None;
        self.selected_id = 0;
    }

    fn toggle_lookup(&mut self) {
        if self.mode == Mode::Lookup {
            self.leave_lookup();
            self.lookup_hold = None;
            return;
        }

        self.mode = Mode::Lookup;
        match self.lookup_hold.clone() {
            Some(hold) => self.set_query(&hold),
            None => self.lookup_hold = Some(self.engine.query()),
        }
        self.store.pause();
        self.selected = Some(self.view.len().saturating_sub(1));
        self.selected_id = self.view.last().map(|e| e.id).unwrap_or(0);
    }

    /// Query for the lookup key's value in the selected entry
    fn select(&mut self) {
        if self.mode != Mode::Lookup {
            return;
        }
        let id = self.selected_id;
        self.leave_lookup();

        let Some(key) = self.store.lookup_key().map(str::to_string) else {
            self.lookup_hold = None;
            return;
        };

        match self.store.lookup_value(id, &key) {
            Some(value) => self.set_query(&format!("{} = {}", key, value)),
            None => {
                let hold = self.lookup_hold.clone().unwrap_or_default();
                self.set_query(&hold);
            }
        }
    }

    /// Query for the selected entry alone
    fn isolate(&mut self) {
        if self.mode != Mode::Lookup {
            return;
        }
        let id = self.selected_id;
        self.leave_lookup();
        self.set_query(&format!("{} = {}", ID_FIELD, id));
    }

    /// Leave lookup mode, or restore the query in effect before it
    fn cancel(&mut self) {
        if self.mode == Mode::Lookup {
            self.leave_lookup();
            self.lookup_hold = None;
            return;
        }
        if let Some(hold) = self.lookup_hold.take() {
            self.set_query(&hold);
        }
    }
}

/// Split input into the fixed part and the trailing identifier to complete
pub fn split_for_completion(text: &str) -> (&str, &str) {
    let tail = text
        .char_indices()
        .rev()
        .take_while(|(_, c)| c.is_ascii_alphanumeric() || *c == '_')
        .last()
        .map(|(i, _)| i)
        .unwrap_or(text.len());

    // an identifier cannot start with a digit
    let start = text[tail..]
        .find(|c: char| !c.is_ascii_digit())
        .map(|i| tail + i)
        .unwrap_or(text.len());

    text.split_at(start)
}

fn split_list(text: &str) -> Vec<String> {
    text.split(',')
        .map(str::trim)
        .filter(|f| !f.is_empty())
        .map(str::to_string)
        .collect()
}
