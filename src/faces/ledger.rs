//! Crops and thumbnails written during an event run that no stored face
//! owns yet. Whatever is still listed when the run ends, fails or is
//! abandoned gets deleted.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};

#[derive(Default)]
struct RunState {
    unpersisted: Vec<PathBuf>,
    abandoned: bool,
}

/// Unowned files of a single event run.
///
/// Shared with blocking crop tasks, which may outlive an abandoned run.
#[derive(Default)]
pub struct RunFiles {
    state: Mutex<RunState>,
}

impl RunFiles {
    fn lock(&self) -> MutexGuard<'_, RunState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Record files about to be written. Returns false once the run is abandoned.
    pub fn track(&self, paths: &[&Path]) -> bool {
        let mut state = self.lock();
        if state.abandoned {
            return false;
        }
        state.unpersisted.extend(paths.iter().map(|p| p.to_path_buf()));
        true
    }

    /// The files now belong to a stored face.
    pub fn release(&self, paths: &[&Path]) {
        self.lock().unpersisted.retain(|p| !paths.contains(&p.as_path()));
    }

    pub fn is_abandoned(&self) -> bool {
        self.lock().abandoned
    }

    fn close(&self) -> Vec<PathBuf> {
        let mut state = self.lock();
        state.abandoned = true;
        std::mem::take(&mut state.unpersisted)
    }
}

/// Open runs keyed by visitor event id.
#[derive(Default)]
pub struct FileLedger {
    runs: Mutex<HashMap<i64, Arc<RunFiles>>>,
}

impl FileLedger {
    pub fn new() -> Self {
        Self::default()
    }

    fn runs(&self) -> MutexGuard<'_, HashMap<i64, Arc<RunFiles>>> {
        self.runs.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Open a run for `event_id`. A stale run for the same event is closed
    /// and its files are returned alongside the new run.
    pub fn begin(&self, event_id: i64) -> (Arc<RunFiles>, Vec<PathBuf>) {
        let run = Arc::new(RunFiles::default());
        let stale = self
            .runs()
            .insert(event_id, run.clone())
            .map(|previous| previous.close())
            .unwrap_or_default();
        (run, stale)
    }

    /// Close the event's run. Returns the files nothing took ownership of;
    /// crop tasks still in flight clean up after themselves.
    pub fn close(&self, event_id: i64) -> Vec<PathBuf> {
        match self.runs().remove(&event_id) {
            Some(run) => run.close(),
            None => Vec::new(),
        }
    }

    pub fn open_runs(&self) -> usize {
        self.runs().len()
    }
}
