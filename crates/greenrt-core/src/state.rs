//! Green-thread lifecycle state

use core::fmt;

/// State of one green thread
///
/// ```text
/// NotStarted -> Running -> Completed
///                  |  ^
///                  v  |
///                 Yielded
/// ```
///
/// `Completed` is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum GreenThreadState {
    /// Stack allocated, entry function not yet entered
    NotStarted = 0,

    /// Executing on some OS thread
    Running = 1,

    /// Parked at a yield point, owned by a `SuspendedContext`
    Yielded = 2,

    /// Entry function returned (or unwound); stack released
    Completed = 3,
}

impl GreenThreadState {
    /// Whether `self -> next` is a legal edge of the state machine
    #[inline]
    pub const fn can_transition_to(self, next: GreenThreadState) -> bool {
        matches!(
            (self, next),
            (GreenThreadState::NotStarted, GreenThreadState::Running)
                | (GreenThreadState::Running, GreenThreadState::Yielded)
                | (GreenThreadState::Running, GreenThreadState::Completed)
                | (GreenThreadState::Yielded, GreenThreadState::Running)
        )
    }

    /// Only a yielded green thread may be resumed
    #[inline]
    pub const fn is_resumable(self) -> bool {
        matches!(self, GreenThreadState::Yielded)
    }

    #[inline]
    pub const fn is_terminal(self) -> bool {
        matches!(self, GreenThreadState::Completed)
    }
}

impl From<u8> for GreenThreadState {
    fn from(v: u8) -> Self {
        match v {
            0 => GreenThreadState::NotStarted,
            1 => GreenThreadState::Running,
            2 => GreenThreadState::Yielded,
            _ => GreenThreadState::Completed,
        }
    }
}

impl From<GreenThreadState> for u8 {
    fn from(state: GreenThreadState) -> u8 {
        state as u8
    }
}

impl fmt::Display for GreenThreadState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            GreenThreadState::NotStarted => "not-started",
            GreenThreadState::Running => "running",
            GreenThreadState::Yielded => "yielded",
            GreenThreadState::Completed => "completed",
        };
        f.write_str(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use GreenThreadState::*;

    #[test]
    fn test_legal_transitions() {
        assert!(NotStarted.can_transition_to(Running));
        assert!(Running.can_transition_to(Yielded));
        assert!(Running.can_transition_to(Completed));
        assert!(Yielded.can_transition_to(Running));
    }

    #[test]
    fn test_illegal_transitions() {
        assert!(!NotStarted.can_transition_to(Yielded));
        assert!(!Yielded.can_transition_to(Completed));
        assert!(!Yielded.can_transition_to(Yielded));
        assert!(!Completed.can_transition_to(Running));
        assert!(Completed.is_terminal());
        assert!(!Running.is_resumable());
        assert!(Yielded.is_resumable());
    }

    #[test]
    fn test_u8_roundtrip() {
        for s in [NotStarted, Running, Yielded, Completed] {
            assert_eq!(GreenThreadState::from(u8::from(s)), s);
        }
    }
}
