mod help_overlay;
mod prompt_bar;

pub use help_overlay::HelpOverlay;
pub use prompt_bar::PromptBar;
