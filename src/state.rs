use crate::error::SchedulerError;
use lazy_static::lazy_static;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

/// The closed set of lifecycle states a [`CountdownTimer`](crate::timer::CountdownTimer)
/// moves through.
///
/// A timer begins `Paused`, runs as `Running`, and ends `Dead`. `Finished` and
/// `Stopped` describe *how* it ended and are delivered to callbacks and waiters
/// during the terminal transition; the stored state afterwards is always `Dead`.
/// `Died` is a legacy alias notification fired alongside `Dead` for subscribers
/// that registered under the old name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TimerState {
    Running,
    Paused,
    Finished,
    Stopped,
    Dead,
    Died,
}

lazy_static! {
    static ref STATES_BY_NAME: HashMap<&'static str, TimerState> = TimerState::all()
        .iter()
        .map(|state| (state.name(), *state))
        .collect();
}

impl TimerState {
    /// Every member of the state set, in declaration order. The returned slice
    /// is `'static` and immutable.
    pub fn all() -> &'static [TimerState] {
        &[
            TimerState::Running,
            TimerState::Paused,
            TimerState::Finished,
            TimerState::Stopped,
            TimerState::Dead,
            TimerState::Died,
        ]
    }

    /// Looks a state up by its canonical name.
    ///
    /// # Errors
    ///
    /// Returns [`SchedulerError::UnknownEnumMember`] for any name that is not a
    /// member, rather than falling back to a default.
    pub fn from_name(name: &str) -> Result<TimerState, SchedulerError> {
        STATES_BY_NAME
            .get(name)
            .copied()
            .ok_or_else(|| SchedulerError::UnknownEnumMember(name.to_string()))
    }

    pub fn name(&self) -> &'static str {
        match self {
            TimerState::Running => "Running",
            TimerState::Paused => "Paused",
            TimerState::Finished => "Finished",
            TimerState::Stopped => "Stopped",
            TimerState::Dead => "Dead",
            TimerState::Died => "Died",
        }
    }

    /// `Dead` is the only state no transition leaves.
    pub fn is_terminal(&self) -> bool {
        matches!(self, TimerState::Dead)
    }
}

impl fmt::Display for TimerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn from_name_resolves_every_member() {
        for state in TimerState::all() {
            assert_eq!(TimerState::from_name(state.name()).unwrap(), *state);
        }
    }

    #[test]
    fn from_name_rejects_unknown_members() {
        let err = TimerState::from_name("Sleeping").unwrap_err();
        assert!(matches!(err, SchedulerError::UnknownEnumMember(name) if name == "Sleeping"));
    }

    #[test]
    fn only_dead_is_terminal() {
        let terminal: Vec<_> = TimerState::all()
            .iter()
            .filter(|s| s.is_terminal())
            .collect();
        assert_eq!(terminal, vec![&TimerState::Dead]);
    }
}
