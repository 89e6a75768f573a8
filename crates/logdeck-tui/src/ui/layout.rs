use ratatui::layout::{Constraint, Direction, Layout as RatatuiLayout, Rect};

/// Layout helper for the dashboard
pub struct Layout;

impl Layout {
    /// Split into the log area and the one-line prompt bar below it
    pub fn dashboard(area: Rect) -> (Rect, Rect) {
        let chunks = RatatuiLayout::default()
            .direction(Direction::Vertical)
            .constraints([
                Constraint::Min(1),    // Logs
                Constraint::Length(1), // Prompt bar
            ])
            .split(area);

        (chunks[0], chunks[1])
    }

    /// A popup of at most `width` x `height`, centered in `area`
    pub fn centered(area: Rect, width: u16, height: u16) -> Rect {
        let width = width.min(area.width.saturating_sub(4));
        let height = height.min(area.height.saturating_sub(2));
        let x = area.x + area.width.saturating_sub(width) / 2;
        let y = area.y + area.height.saturating_sub(height) / 2;
        Rect::new(x, y, width, height)
    }
}
