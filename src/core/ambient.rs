//! Ambient state preservation
//!
//! A GraphQL call can be embedded in another process (a page render, a
//! shortcode) that keeps its own "current item". The pipeline captures that
//! state at entry and restores it when the request is finalized, or when the
//! guard is dropped early by a panic or cancellation.

use std::{any::Any, sync::Arc};

use arc_swap::ArcSwapOption;
use log::{trace, warn};

use super::{error::PipelineResult, traits::AmbientState};

/// Opaque value produced by [`AmbientState::capture`]
pub type AmbientSnapshot = Box<dyn Any + Send + Sync>;

/// Scoped holder of a captured snapshot; restores it exactly once.
pub struct AmbientGuard {
    state: Arc<dyn AmbientState>,
    snapshot: Option<AmbientSnapshot>,
}

impl AmbientGuard {
    pub fn capture(state: Arc<dyn AmbientState>) -> PipelineResult<Self> {
        let snapshot = state.capture()?;
        trace!("Captured ambient state");
        Ok(Self {
            state,
            snapshot: Some(snapshot),
        })
    }

    /// Put the captured state back. Later calls are no-ops.
    pub fn restore(&mut self) {
        if let Some(snapshot) = self.snapshot.take() {
            self.state.restore(snapshot);
            trace!("Restored ambient state");
        }
    }

    /// True until the snapshot has been restored
    pub fn is_pending(&self) -> bool {
        self.snapshot.is_some()
    }
}

impl Drop for AmbientGuard {
    fn drop(&mut self) {
        self.restore();
    }
}

/// Ambient state that has nothing to preserve
#[derive(Debug, Default, Clone, Copy)]
pub struct NoAmbientState;

impl AmbientState for NoAmbientState {
    fn capture(&self) -> PipelineResult<AmbientSnapshot> {
        Ok(Box::new(()))
    }

    fn restore(&self, _snapshot: AmbientSnapshot) {}
}

/// A swappable "current item" pointer shared with the embedding process.
pub struct CurrentItem<T> {
    slot: ArcSwapOption<T>,
}

impl<T> Default for CurrentItem<T> {
    fn default() -> Self {
        Self {
            slot: ArcSwapOption::empty(),
        }
    }
}

impl<T> CurrentItem<T> {
    pub fn new(item: Option<T>) -> Self {
        Self {
            slot: ArcSwapOption::new(item.map(Arc::new)),
        }
    }

    pub fn get(&self) -> Option<Arc<T>> {
        self.slot.load_full()
    }

    /// Swap in a new item, returning the previous one
    pub fn replace(&self, item: Option<T>) -> Option<Arc<T>> {
        self.slot.swap(item.map(Arc::new))
    }
}

impl<T: Send + Sync + 'static> AmbientState for CurrentItem<T> {
    fn capture(&self) -> PipelineResult<AmbientSnapshot> {
        Ok(Box::new(self.slot.load_full()))
    }

    fn restore(&self, snapshot: AmbientSnapshot) {
        match snapshot.downcast::<Option<Arc<T>>>() {
            Ok(previous) => self.slot.store(*previous),
            Err(_) => warn!("Ambient snapshot type mismatch, current item left untouched"),
        }
    }
}
