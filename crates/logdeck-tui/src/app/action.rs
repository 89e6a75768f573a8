/// All possible actions in the dashboard (command pattern)
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Action {
    Quit,
    /// Send SIGINT to the monitored process
    Kill,

    // Overlays and inputs
    ToggleHelp,
    CloseHelp,
    EditFilter,
    EditFields,
    EditDurations,

    // Store controls
    TogglePause,
    Clear,
    Save,

    // Scrolling (moves the selection in lookup mode)
    ScrollUp,
    ScrollDown,
    ScrollToBottom,

    // Rendering toggles
    ToggleWrap,
    ToggleJson,
    ToggleJsonPretty,
    ToggleFullTime,
    ToggleFieldsExclude,
    ToggleColors,

    // Lookup
    ToggleLookup,
    Select,
    Isolate,
    Cancel,

    // Input line
    InputChar(char),
    InputBackspace,
    InputClear,
    InputComplete,
    InputSubmit,
    InputCancel,
    HistoryPrevious,
    HistoryNext,
}

/// What the run loop must do after an action
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Effect {
    Quit,
    /// Interrupt the process with this pid
    Interrupt(i32),
}
