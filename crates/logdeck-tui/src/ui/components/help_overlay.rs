use ratatui::{
    Frame,
    style::{Modifier, Style},
    text::{Line, Span},
    widgets::{Block, Borders, Clear, Paragraph},
};

use crate::ui::{Layout, Theme};

/// Help overlay showing keybindings
pub struct HelpOverlay;

impl HelpOverlay {
    pub fn render(frame: &mut Frame) {
        let popup_area = Layout::centered(frame.area(), 56, 34);

        // Clear the background
        frame.render_widget(Clear, popup_area);

        let help_text = vec![
            Self::section("Filtering"),
            Self::key_line("/", "Edit the filter query"),
            Self::key_line("f", "Edit the field list"),
            Self::key_line("i", "Toggle field list exclude/include"),
            Self::key_line("d", "Edit the duration fields"),
            Self::key_line("Tab", "Complete a field name"),
            Self::key_line("↑/↓", "Input history"),
            Line::from(""),
            Self::section("Navigation"),
            Self::key_line("Space", "Pause/resume"),
            Self::key_line("j/↓", "Scroll down"),
            Self::key_line("k/↑", "Scroll up"),
            Self::key_line("G", "Back to the newest entries"),
            Line::from(""),
            Self::section("Lookup"),
            Self::key_line("l", "Enter/leave lookup mode"),
            Self::key_line("Enter", "Filter on the selected entry's key"),
            Self::key_line("z", "Show only the selected entry"),
            Self::key_line("Esc", "Restore the previous filter"),
            Line::from(""),
            Self::section("Display"),
            Self::key_line("p", "Toggle JSON output"),
            Self::key_line("P", "Toggle pretty JSON"),
            Self::key_line("t", "Toggle full timestamps"),
            Self::key_line("c", "Toggle colors"),
            Self::key_line("w", "Toggle line wrap"),
            Line::from(""),
            Self::section("Actions"),
            Self::key_line("s", "Save filtered logs"),
            Self::key_line("C", "Clear all logs"),
            Self::key_line("K", "Interrupt the monitored process"),
            Self::key_line("?/h", "Toggle this help"),
            Self::key_line("q", "Quit"),
        ];

        let help_widget = Paragraph::new(help_text)
            .style(Style::default().bg(Theme::BG))
            .block(
                Block::default()
                    .borders(Borders::ALL)
                    .border_style(Style::default().fg(Theme::PRIMARY))
                    .title(Span::styled(" Help ", Theme::title())),
            );

        frame.render_widget(help_widget, popup_area);
    }

    fn section(title: &str) -> Line<'_> {
        Line::from(Span::styled(
            title,
            Style::default()
                .fg(Theme::WARNING)
                .add_modifier(Modifier::BOLD),
        ))
    }

    fn key_line<'a>(key: &'a str, desc: &'a str) -> Line<'a> {
        Line::from(vec![
            Span::styled(format!("  {:>8}", key), Style::default().fg(Theme::PRIMARY)),
            Span::styled(format!("  {}", desc), Theme::text()),
        ])
    }
}
