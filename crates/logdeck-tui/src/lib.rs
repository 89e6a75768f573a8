//! Terminal dashboard for logdeck
//!
//! This crate provides the live log view: state management, keybindings,
//! event handling, rendering of stored records and persisted input history.

pub mod app;
pub mod config;
pub mod history;
pub mod prettifier;
pub mod stats;
pub mod tui;
pub mod ui;

pub use app::{Action, AppState, Effect, InputKind, InputState, Mode};
pub use config::{KeyBinding, KeyBindings, KeyContext};
pub use history::{FIELD_HISTORY_FILE, FILTER_HISTORY_FILE, History, home_path};
pub use prettifier::{Prettifier, format_duration};
pub use stats::{SAMPLE_INTERVAL, Stats};
pub use tui::{Event, EventHandler, Tui};
pub use ui::components::{HelpOverlay, PromptBar};
pub use ui::screens::DashboardScreen;
pub use ui::{Layout, Theme};
