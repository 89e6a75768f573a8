use ratatui::style::{Color, Modifier, Style};

use logdeck_types::LogLevel;

/// Color theme for the dashboard
pub struct Theme;

impl Theme {
    // Base colors
    pub const BG: Color = Color::Rgb(0x00, 0x28, 0x33);
    pub const FG: Color = Color::Rgb(0xee, 0xe8, 0xd5);
    pub const FG_DIM: Color = Color::Rgb(0x58, 0x6e, 0x75);

    // Accent colors
    pub const PRIMARY: Color = Color::Rgb(0x58, 0xb5, 0xae);
    pub const HIGHLIGHT: Color = Color::Rgb(0x00, 0x63, 0x7f);

    // Status colors
    pub const WARNING: Color = Color::Rgb(0xc0, 0x9a, 0x24);
    pub const ERROR: Color = Color::Rgb(0xe7, 0x77, 0x75);

    /// Style for a level label and the keys of a record at that level
    pub fn level(level: LogLevel) -> Style {
        let color = match level {
            LogLevel::Trace | LogLevel::Debug => Self::FG,
            LogLevel::Info => Self::PRIMARY,
            LogLevel::Warn => Self::WARNING,
            LogLevel::Error | LogLevel::Fatal | LogLevel::Panic | LogLevel::Unknown => Self::ERROR,
        };
        Style::default().fg(color)
    }

    // Text styles
    pub fn title() -> Style {
        Style::default()
            .fg(Self::PRIMARY)
            .add_modifier(Modifier::BOLD)
    }

    pub fn text() -> Style {
        Style::default().fg(Self::FG)
    }

    pub fn text_dim() -> Style {
        Style::default().fg(Self::FG_DIM)
    }

    pub fn selected() -> Style {
        Style::default().bg(Self::HIGHLIGHT)
    }

    // Prompt bar
    pub fn prompt_bar() -> Style {
        Style::default().fg(Self::FG).bg(Self::BG)
    }

    pub fn prompt() -> Style {
        Style::default()
            .fg(Self::PRIMARY)
            .bg(Self::BG)
            .add_modifier(Modifier::BOLD)
    }

    pub fn prompt_paused() -> Style {
        Style::default()
            .fg(Self::WARNING)
            .bg(Self::BG)
            .add_modifier(Modifier::BOLD)
    }

    pub fn error() -> Style {
        Style::default()
            .fg(Self::ERROR)
            .add_modifier(Modifier::BOLD)
    }
}
