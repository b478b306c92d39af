use std::sync::Arc;

use crate::matcher::MatcherTrack;

/// Where a catalogue load is. Observers see these in order:
/// `Idle -> StartLoading -> Loading(..)* -> Sorting -> Loaded`, or
/// `IncompleteDatabases` instead of `Sorting`/`Loaded` when a file failed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoadState {
    Idle,
    StartLoading,
    /// Percentage, 0 to 100.
    Loading(u8),
    Sorting,
    Loaded(Arc<Vec<MatcherTrack>>),
    /// A file could not be located or decoded; the catalogue is not shown.
    IncompleteDatabases,
}

impl LoadState {
    /// A run is between `StartLoading` and its terminal state.
    pub fn is_in_flight(&self) -> bool {
        matches!(self, Self::StartLoading | Self::Loading(_) | Self::Sorting)
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Loaded(_) | Self::IncompleteDatabases)
    }

    pub fn tracks(&self) -> Option<&Arc<Vec<MatcherTrack>>> {
        match self {
            Self::Loaded(tracks) => Some(tracks),
            _ => None,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::StartLoading => "starting",
            Self::Loading(_) => "loading",
            Self::Sorting => "sorting",
            Self::Loaded(_) => "loaded",
            Self::IncompleteDatabases => "incomplete databases",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_state_classification() {
        assert!(!LoadState::Idle.is_in_flight());
        assert!(LoadState::StartLoading.is_in_flight());
        assert!(LoadState::Loading(40).is_in_flight());
        assert!(LoadState::Sorting.is_in_flight());
        assert!(LoadState::IncompleteDatabases.is_terminal());

        let loaded = LoadState::Loaded(Arc::new(vec![MatcherTrack::new("a", "b")]));
        assert!(loaded.is_terminal());
        assert_eq!(loaded.tracks().map(|t| t.len()), Some(1));
        assert!(LoadState::Sorting.tracks().is_none());
    }
}
