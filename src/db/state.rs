use std::sync::atomic::{AtomicU8, Ordering};

use crate::error::DbError;

/// Lifecycle of a database handle.
///
/// `Patching` is entered by `init()`, `Open` only once table creation and
/// every schema patch have completed. The only backward transition is
/// `Closed -> Patching` via a fresh `init()` on the same handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum DatabaseState {
    Patching = 0,
    Open = 1,
    Closing = 2,
    Closed = 3,
}

impl DatabaseState {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => DatabaseState::Patching,
            1 => DatabaseState::Open,
            2 => DatabaseState::Closing,
            _ => DatabaseState::Closed,
        }
    }
}

/// Lock-free state cell shared between the handle, the transaction worker
/// and the query path.
#[derive(Debug)]
pub(crate) struct StateCell(AtomicU8);

impl StateCell {
    pub(crate) fn new() -> Self {
        StateCell(AtomicU8::new(DatabaseState::Closed as u8))
    }

    pub(crate) fn get(&self) -> DatabaseState {
        DatabaseState::from_u8(self.0.load(Ordering::Acquire))
    }

    pub(crate) fn set(&self, state: DatabaseState) {
        self.0.store(state as u8, Ordering::Release);
    }

    /// Compare-and-swap transition. Returns false when some other task got
    /// there first, e.g. a close() racing the end of initialization.
    pub(crate) fn transition(&self, from: DatabaseState, to: DatabaseState) -> bool {
        self.0
            .compare_exchange(from as u8, to as u8, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }
}

/// Which side of the engine an operation enters through.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccessKind {
    Read,
    Write,
}

/// Pluggable policy deciding which operations are legal in which states.
///
/// The engine only hard-codes one rule itself: a `Closed` handle rejects
/// everything except `init()`. Anything stricter lives behind this trait.
pub trait AccessGuard: Send + Sync {
    fn check(&self, state: DatabaseState, kind: AccessKind) -> Result<(), DbError>;
}

/// Default guard: reads and writes are allowed only while the handle is
/// `Open`. Patches run inline during init and are never guarded.
pub(crate) struct StateAccessGuard;

impl AccessGuard for StateAccessGuard {
    fn check(&self, state: DatabaseState, _kind: AccessKind) -> Result<(), DbError> {
        match state {
            DatabaseState::Open => Ok(()),
            DatabaseState::Closed | DatabaseState::Closing => Err(DbError::Closed),
            DatabaseState::Patching => Err(DbError::AccessDenied(state)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transition_succeeds_only_from_expected_state() {
        let cell = StateCell::new();
        assert_eq!(cell.get(), DatabaseState::Closed);
        assert!(!cell.transition(DatabaseState::Open, DatabaseState::Closed));
        cell.set(DatabaseState::Patching);
        assert!(cell.transition(DatabaseState::Patching, DatabaseState::Open));
        assert_eq!(cell.get(), DatabaseState::Open);
        assert!(!cell.transition(DatabaseState::Patching, DatabaseState::Open));
    }

    #[test]
    fn default_guard_only_allows_open() {
        let guard = StateAccessGuard;
        assert!(guard.check(DatabaseState::Open, AccessKind::Read).is_ok());
        assert!(matches!(
            guard.check(DatabaseState::Closed, AccessKind::Write),
            Err(DbError::Closed)
        ));
        assert!(matches!(
            guard.check(DatabaseState::Patching, AccessKind::Read),
            Err(DbError::AccessDenied(DatabaseState::Patching))
        ));
    }
}
