mod action;
mod state;

pub use action::{Action, Effect};
pub use state::{AppState, InputKind, InputState, Mode, split_for_completion};
