use crossterm::event::{KeyCode, KeyEvent, KeyModifiers};
use std::collections::HashMap;

use crate::app::Action;

/// A key combination
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct KeyBinding {
    pub code: KeyCode,
    pub modifiers: KeyModifiers,
}

impl KeyBinding {
    pub fn new(code: KeyCode) -> Self {
        Self {
            code,
            modifiers: KeyModifiers::NONE,
        }
    }

    pub fn ctrl(code: KeyCode) -> Self {
        Self {
            code,
            modifiers: KeyModifiers::CONTROL,
        }
    }

    pub fn shift(code: KeyCode) -> Self {
        Self {
            code,
            modifiers: KeyModifiers::SHIFT,
        }
    }

    pub fn from_event(event: &KeyEvent) -> Self {
        Self {
            code: event.code,
            modifiers: event.modifiers,
        }
    }
}

/// Context for keybindings
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum KeyContext {
    Global,
    Dashboard,
    Input,
    Help,
}

/// Keybinding configuration
pub struct KeyBindings {
    bindings: HashMap<KeyContext, HashMap<KeyBinding, Action>>,
}

impl KeyBindings {
    pub fn new() -> Self {
        let mut bindings = HashMap::new();

        // Global bindings
        let mut global = HashMap::new();
        global.insert(KeyBinding::ctrl(KeyCode::Char('c')), Action::Quit);
        bindings.insert(KeyContext::Global, global);

        let mut dashboard = HashMap::new();
        dashboard.insert(KeyBinding::new(KeyCode::Char('q')), Action::Quit);
        dashboard.insert(KeyBinding::shift(KeyCode::Char('K')), Action::Kill);
        dashboard.insert(KeyBinding::new(KeyCode::Char('?')), Action::ToggleHelp);
        dashboard.insert(KeyBinding::shift(KeyCode::Char('?')), Action::ToggleHelp);
        dashboard.insert(KeyBinding::new(KeyCode::Char('h')), Action::ToggleHelp);
        // Inputs
        dashboard.insert(KeyBinding::new(KeyCode::Char('/')), Action::EditFilter);
        dashboard.insert(KeyBinding::new(KeyCode::Char('f')), Action::EditFields);
        dashboard.insert(KeyBinding::new(KeyCode::Char('d')), Action::EditDurations);
        // Store controls
        dashboard.insert(KeyBinding::new(KeyCode::Char(' ')), Action::TogglePause);
        dashboard.insert(KeyBinding::shift(KeyCode::Char('C')), Action::Clear);
        dashboard.insert(KeyBinding::new(KeyCode::Char('s')), Action::Save);
        // Scrolling
        dashboard.insert(KeyBinding::new(KeyCode::Char('j')), Action::ScrollDown);
        dashboard.insert(KeyBinding::new(KeyCode::Down), Action::ScrollDown);
        dashboard.insert(KeyBinding::new(KeyCode::Char('k')), Action::ScrollUp);
        dashboard.insert(KeyBinding::new(KeyCode::Up), Action::ScrollUp);
        dashboard.insert(KeyBinding::shift(KeyCode::Char('G')), Action::ScrollToBottom);
        // Rendering
        dashboard.insert(KeyBinding::new(KeyCode::Char('w')), Action::ToggleWrap);
        dashboard.insert(KeyBinding::new(KeyCode::Char('p')), Action::ToggleJson);
        dashboard.insert(KeyBinding::shift(KeyCode::Char('P')), Action::ToggleJsonPretty);
        dashboard.insert(KeyBinding::new(KeyCode::Char('t')), Action::ToggleFullTime);
        dashboard.insert(KeyBinding::new(KeyCode::Char('i')), Action::ToggleFieldsExclude);
        dashboard.insert(KeyBinding::new(KeyCode::Char('c')), Action::ToggleColors);
        // Lookup
        dashboard.insert(KeyBinding::new(KeyCode::Char('l')), Action::ToggleLookup);
        dashboard.insert(KeyBinding::new(KeyCode::Enter), Action::Select);
        dashboard.insert(KeyBinding::new(KeyCode::Right), Action::Select);
        dashboard.insert(KeyBinding::new(KeyCode::Char('z')), Action::Isolate);
        dashboard.insert(KeyBinding::new(KeyCode::Esc), Action::Cancel);
        bindings.insert(KeyContext::Dashboard, dashboard);

        // Input line bindings
        let mut input = HashMap::new();
        input.insert(KeyBinding::new(KeyCode::Enter), Action::InputSubmit);
        input.insert(KeyBinding::new(KeyCode::Esc), Action::InputCancel);
        input.insert(KeyBinding::new(KeyCode::Backspace), Action::InputBackspace);
        input.insert(KeyBinding::ctrl(KeyCode::Char('u')), Action::InputClear);
        input.insert(KeyBinding::new(KeyCode::Tab), Action::InputComplete);
        input.insert(KeyBinding::new(KeyCode::Up), Action::HistoryPrevious);
        input.insert(KeyBinding::new(KeyCode::Down), Action::HistoryNext);
        bindings.insert(KeyContext::Input, input);

        Self { bindings }
    }

    /// Look up action for key event in given context
    pub fn get_action(&self, context: KeyContext, key: &KeyEvent) -> Option<Action> {
        let binding = KeyBinding::from_event(key);

        // First check context-specific bindings
        if let Some(action) = self.bindings.get(&context).and_then(|b| b.get(&binding)) {
            return Some(action.clone());
        }

        match context {
            // Any key closes the help overlay
            KeyContext::Help => return Some(Action::CloseHelp),
            KeyContext::Input => {
                if let KeyCode::Char(c) = key.code {
                    if key.modifiers.is_empty() || key.modifiers == KeyModifiers::SHIFT {
                        return Some(Action::InputChar(c));
                    }
                }
            }
            _ => {}
        }

        // Fall back to global bindings
        self.bindings
            .get(&KeyContext::Global)?
            .get(&binding)
            .cloned()
    }
}

impl Default for KeyBindings {
    fn default() -> Self {
        Self::new()
    }
}
