/// The three states a session can be in. Any other string (including empty) normalizes to
/// `Idle` via [`Phase::from_str_normalized`] — this is how an older, removed fourth phase
/// (`ACTIVE_COMMITTED`) is handled on read: it's just another unknown string.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Idle,
    Active,
    Ended,
}

impl Phase {
    pub fn from_str_normalized(s: &str) -> Phase {
        match s {
            "ACTIVE" => Phase::Active,
            "ENDED" => Phase::Ended,
            _ => Phase::Idle,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Phase::Idle => "IDLE",
            Phase::Active => "ACTIVE",
            Phase::Ended => "ENDED",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Event {
    TurnStart,
    TurnEnd,
    GitCommit,
    SessionStart,
    SessionStop,
}

/// Facts the transition table branches on. Computed by the caller before invoking
/// [`transition`]; the function itself never inspects anything but these.
#[derive(Debug, Clone, Copy, Default)]
pub struct Context {
    pub has_files_touched: bool,
    pub is_rebase_in_progress: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    Condense,
    CondenseIfFilesTouched,
    DiscardIfNoFiles,
    WarnStaleSession,
    ClearEndedAt,
    UpdateLastInteraction,
}

/// Pure state transition: no I/O, no clock reads, no store calls. The caller is responsible
/// for executing the returned actions against the store and session state.
pub fn transition(phase: Phase, event: Event, ctx: Context) -> (Phase, Vec<Action>) {
    use Action::*;
    use Event::*;
    use Phase::*;

    match (phase, event) {
        (Idle, TurnStart) => (Active, vec![UpdateLastInteraction]),
        (Idle, TurnEnd) => (Idle, vec![]),
        (Idle, GitCommit) => {
            if ctx.is_rebase_in_progress {
                (Idle, vec![])
            } else {
                (Idle, vec![Condense, UpdateLastInteraction])
            }
        }
        (Idle, SessionStart) => (Idle, vec![]),
        (Idle, SessionStop) => (Ended, vec![UpdateLastInteraction]),

        (Active, TurnStart) => (Active, vec![UpdateLastInteraction]),
        (Active, TurnEnd) => (Idle, vec![UpdateLastInteraction]),
        (Active, GitCommit) => {
            if ctx.is_rebase_in_progress {
                (Active, vec![])
            } else {
                (Active, vec![Condense, UpdateLastInteraction])
            }
        }
        (Active, SessionStart) => (Active, vec![WarnStaleSession]),
        (Active, SessionStop) => (Ended, vec![UpdateLastInteraction]),

        (Ended, TurnStart) => (Active, vec![ClearEndedAt, UpdateLastInteraction]),
        (Ended, TurnEnd) => (Ended, vec![]),
        (Ended, GitCommit) => {
            if ctx.is_rebase_in_progress {
                (Ended, vec![])
            } else if ctx.has_files_touched {
                (Ended, vec![CondenseIfFilesTouched, UpdateLastInteraction])
            } else {
                (Ended, vec![DiscardIfNoFiles, UpdateLastInteraction])
            }
        }
        (Ended, SessionStart) => (Idle, vec![ClearEndedAt]),
        (Ended, SessionStop) => (Ended, vec![]),
    }
}
