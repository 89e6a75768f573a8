use ratatui::{
    buffer::Buffer,
    layout::Rect,
    style::Style,
    text::{Line, Span},
    widgets::Widget,
};
use unicode_width::UnicodeWidthStr;

use crate::ui::Theme;

/// Bottom line: prompt label, the query or input text, and stats on the right
pub struct PromptBar<'a> {
    label: &'a str,
    label_style: Style,
    text: &'a str,
    text_style: Style,
    right_text: Option<String>,
}

impl<'a> PromptBar<'a> {
    pub fn new(label: &'a str, text: &'a str) -> Self {
        Self {
            label,
            label_style: Theme::prompt(),
            text,
            text_style: Theme::prompt_bar(),
            right_text: None,
        }
    }

    pub fn label_style(mut self, style: Style) -> Self {
        self.label_style = style;
        self
    }

    pub fn text_style(mut self, style: Style) -> Self {
        self.text_style = style;
        self
    }

    /// Set text to display on the right side
    pub fn right<S: Into<String>>(mut self, text: S) -> Self {
        self.right_text = Some(text.into());
        self
    }

    /// Column of the input cursor, relative to the bar
    pub fn cursor_offset(&self) -> u16 {
        (1 + self.label.width() + self.text.width()) as u16
    }
}

impl Widget for PromptBar<'_> {
    fn render(self, area: Rect, buf: &mut Buffer) {
        // Fill background
        buf.set_style(area, Theme::prompt_bar());

        let right_width = self.right_text.as_deref().map(|r| r.width() as u16 + 2).unwrap_or(0);
        let line = Line::from(vec![
            Span::styled(self.label, self.label_style),
            Span::styled(self.text, self.text_style),
        ]);
        buf.set_line(
            area.x + 1,
            area.y,
            &line,
            area.width.saturating_sub(right_width + 1),
        );

        if let Some(right) = self.right_text {
            let right_x = area.x + area.width.saturating_sub(right_width - 1);
            let line_width = line.width() as u16;
            if right_x > area.x + line_width + 1 {
                buf.set_span(right_x, area.y, &Span::styled(&right, Theme::text_dim()), right.width() as u16);
            }
        }
    }
}
