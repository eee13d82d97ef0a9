//! Document lifecycle state machine

use std::fmt;

use tracing::debug;

use crate::error::SessionError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum SyncState {
    #[default]
    Idle,
    Loading,
    Ready,
    Exporting,
    Error,
}

impl fmt::Display for SyncState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SyncState::Idle => "idle",
            SyncState::Loading => "loading",
            SyncState::Ready => "ready",
            SyncState::Exporting => "exporting",
            SyncState::Error => "error",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SyncEvent {
    Open,
    Loaded,
    LoadFailed,
    ExportRequested,
    ExportSucceeded,
    ExportCancelled,
    ExportFailed,
}

impl fmt::Display for SyncEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SyncEvent::Open => "open",
            SyncEvent::Loaded => "loaded",
            SyncEvent::LoadFailed => "load failed",
            SyncEvent::ExportRequested => "export requested",
            SyncEvent::ExportSucceeded => "export succeeded",
            SyncEvent::ExportCancelled => "export cancelled",
            SyncEvent::ExportFailed => "export failed",
        };
        f.write_str(name)
    }
}

/// Tracks the session state; rejects transitions not in the table
#[derive(Debug, Clone, Default)]
pub struct SyncStateMachine {
    state: SyncState,
    /// Set once document metadata has loaded; allows export retries from Error
    metadata_loaded: bool,
}

impl SyncStateMachine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> SyncState {
        self.state
    }

    pub fn metadata_loaded(&self) -> bool {
        self.metadata_loaded
    }

    /// Target state of `event`, if allowed from the current state
    pub fn next(&self, event: SyncEvent) -> Option<SyncState> {
        use SyncEvent::*;
        use SyncState::*;

        match (self.state, event) {
            (Idle, Open) | (Error, Open) => Some(Loading),
            (Loading, SyncEvent::Loaded) => Some(Ready),
            (Loading, LoadFailed) => Some(SyncState::Error),
            (Ready, ExportRequested) => Some(Exporting),
            (SyncState::Error, ExportRequested) if self.metadata_loaded => Some(Exporting),
            (Exporting, ExportSucceeded) | (Exporting, ExportCancelled) => Some(Ready),
            (Exporting, ExportFailed) => Some(SyncState::Error),
            _ => None,
        }
    }

    pub fn transition(&mut self, event: SyncEvent) -> Result<SyncState, SessionError> {
        let from = self.state;
        let to = self.next(event).ok_or(SessionError::InvalidTransition { from, event })?;
        if event == SyncEvent::Loaded {
            self.metadata_loaded = true;
        }
        self.state = to;
        debug!(%from, %to, %event, "session state changed");
        Ok(to)
    }
}
