use std::fs;
use std::io::{self, ErrorKind};
use std::path::{Path, PathBuf};

use tracing::warn;

/// File (in the home directory) holding past filter queries
pub const FILTER_HISTORY_FILE: &str = ".logdeck-filters";

/// File (in the home directory) holding past field selections
pub const FIELD_HISTORY_FILE: &str = ".logdeck-fields";

/// Input history with shell-like up/down navigation.
///
/// Entries are kept oldest first with no duplicates; re-adding an entry
/// moves it to the end. The text being typed when navigation starts is
/// held and handed back when stepping past the newest entry.
#[derive(Clone, Debug, Default)]
pub struct History {
    entries: Vec<String>,
    cursor: usize,
    hold: String,
}

impl History {
    pub fn new() -> Self {
        Self::default()
    }

    /// Load a newline-delimited history file. A missing file is an empty
    /// history; other read errors are logged and ignored.
    pub fn load(path: &Path, seed: Option<&str>) -> Self {
        let mut history = Self::new();

        match fs::read_to_string(path) {
            Ok(content) => {
                for line in content.lines() {
                    history.add(line);
                }
            }
            Err(e) if e.kind() == ErrorKind::NotFound => {}
            Err(e) => warn!(path = %path.display(), error = %e, "failed to load history"),
        }

        if let Some(seed) = seed {
            history.add(seed);
        }
        history
    }

    /// Append an entry, dropping an earlier copy of it
    pub fn add(&mut self, entry: &str) {
        let entry = entry.trim();
        if !entry.is_empty() {
            self.entries.retain(|e| e != entry);
            self.entries.push(entry.to_string());
        }
        self.reset();
    }

    /// Step back in time; `current` is remembered on the first step
    pub fn previous(&mut self, current: &str) -> Option<&str> {
        if self.entries.is_empty() {
            return None;
        }
        if self.cursor == self.entries.len() {
            self.hold = current.to_string();
        }
        self.cursor = self.cursor.saturating_sub(1);
        self.entries.get(self.cursor).map(String::as_str)
    }

    /// Step forward in time, ending on the held input
    pub fn next(&mut self) -> Option<&str> {
        if self.cursor >= self.entries.len() {
            return None;
        }
        if self.cursor + 1 < self.entries.len() {
            self.cursor += 1;
            return self.entries.get(self.cursor).map(String::as_str);
        }

        self.cursor = self.entries.len();
        Some(&self.hold)
    }

    /// Forget any navigation in progress
    pub fn reset(&mut self) {
        self.cursor = self.entries.len();
        self.hold.clear();
    }

    pub fn entries(&self) -> &[String] {
        &self.entries
    }

    pub fn save(&self, path: &Path) -> io::Result<()> {
        if self.entries.is_empty() {
            return Ok(());
        }
        let mut content = self.entries.join("\n");
        content.push('\n');
        fs::write(path, content)
    }

    /// Save, logging instead of failing
    pub fn save_or_warn(&self, path: &Path) {
        if let Err(e) = self.save(path) {
            warn!(path = %path.display(), error = %e, "failed to save history");
        }
    }
}

/// Path of a history file in the user's home directory
pub fn home_path(name: &str) -> Option<PathBuf> {
    dirs::home_dir().map(|home| home.join(name))
}
