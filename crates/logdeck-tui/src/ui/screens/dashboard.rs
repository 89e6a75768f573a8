use ratatui::{
    Frame,
    layout::{Position, Rect},
    style::Style,
    text::{Line, Span},
    widgets::{Block, Paragraph},
};
use unicode_width::UnicodeWidthChar;

use crate::app::AppState;
use crate::ui::components::{HelpOverlay, PromptBar};
use crate::ui::{Layout, Theme};

/// The live log view with the prompt bar underneath
pub struct DashboardScreen;

impl DashboardScreen {
    pub fn render(frame: &mut Frame, state: &mut AppState) {
        let area = frame.area();
        frame.render_widget(Block::default().style(Style::default().bg(Theme::BG)), area);

        let (logs_area, prompt_area) = Layout::dashboard(area);
        state.set_height(logs_area.height as usize);

        Self::render_logs(frame, logs_area, state);
        Self::render_prompt(frame, prompt_area, state);

        if state.show_help() {
            HelpOverlay::render(frame);
        }
    }

    fn render_logs(frame: &mut Frame, area: Rect, state: &AppState) {
        let width = area.width as usize;
        let prettifier = state.prettifier();
        let mut lines = Vec::new();

        for (i, entry) in state.view().iter().enumerate() {
            let selected = state.selected() == Some(i);

            for mut line in prettifier.render(&entry.raw) {
                if selected {
                    line = if prettifier.colors() {
                        line.patch_style(Theme::selected())
                    } else {
                        let mut spans = vec![Span::raw("=> ")];
                        spans.extend(line.spans);
                        Line::from(spans)
                    };
                }

                if state.wrap() {
                    lines.extend(wrap_line(line, width));
                } else {
                    lines.push(line);
                }
            }
        }

        // newest entries at the bottom
        let skip = lines.len().saturating_sub(area.height as usize);
        let visible: Vec<Line> = lines.into_iter().skip(skip).collect();

        frame.render_widget(Paragraph::new(visible).style(Theme::text()), area);
    }

    fn render_prompt(frame: &mut Frame, area: Rect, state: &AppState) {
        let label = state.prompt();
        let query = state.query();

        let bar = match (state.input(), state.notice(), state.error()) {
            (Some(input), _, _) => PromptBar::new(label, &input.text)
                .text_style(Theme::prompt_bar().bg(Theme::HIGHLIGHT)),
            (None, Some(notice), _) => PromptBar::new("  ", notice),
            (None, None, Some(error)) => PromptBar::new(label, error).text_style(Theme::error()),
            (None, None, None) => PromptBar::new(label, &query),
        };
        let bar = if state.store().paused() {
            bar.label_style(Theme::prompt_paused())
        } else {
            bar
        };

        let cursor = state
            .input()
            .map(|_| Position::new(area.x + bar.cursor_offset(), area.y));

        frame.render_widget(bar.right(state.stats().text()), area);

        if let Some(cursor) = cursor {
            frame.set_cursor_position(cursor);
        }
    }
}

/// Split a line into rows of at most `width` columns, keeping span styles
pub fn wrap_line(line: Line<'static>, width: usize) -> Vec<Line<'static>> {
    if width == 0 || line.width() <= width {
        return vec![line];
    }

    let line_style = line.style;
    let mut rows = Vec::new();
    let mut current: Vec<Span<'static>> = Vec::new();
    let mut used = 0;

    for span in line.spans {
        let style = span.style;
        let mut chunk = String::new();

        for c in span.content.chars() {
            let w = c.width().unwrap_or(0);
            if used + w > width && used > 0 {
                if !chunk.is_empty() {
                    current.push(Span::styled(std::mem::take(&mut chunk), style));
                }
                rows.push(Line::from(std::mem::take(&mut current)).style(line_style));
                used = 0;
            }
            chunk.push(c);
            used += w;
        }

        if !chunk.is_empty() {
            current.push(Span::styled(chunk, style));
        }
    }

    if !current.is_empty() {
        rows.push(Line::from(current).style(line_style));
    }
    rows
}
