use std::sync::{PoisonError, RwLock};
use crate::data::types::{ForecastSelection, ForecastSnapshot};

/// Latest forecast points, shared between the poller (single writer) and
/// scrape handlers (many readers).
pub struct ForecastStore {
    snapshot: RwLock<ForecastSnapshot>,
}

impl ForecastStore {
    pub fn new() -> Self {
        Self {
            snapshot: RwLock::new(ForecastSnapshot::default()),
        }
    }

    /// Copy of both points, taken under one read guard.
    pub fn snapshot(&self) -> ForecastSnapshot {
        *self.snapshot.read().unwrap_or_else(PoisonError::into_inner)
    }

    /// Write the selected points. Unselected points keep their value.
    pub fn apply(&self, selection: &ForecastSelection) {
        let mut snapshot = self.snapshot.write().unwrap_or_else(PoisonError::into_inner);

        if let Some(today) = selection.today {
            snapshot.today = today;
        }
        if let Some(tomorrow) = selection.tomorrow {
            snapshot.tomorrow = tomorrow;
        }
    }
}

impl Default for ForecastStore {
    fn default() -> Self {
        Self::new()
    }
}
