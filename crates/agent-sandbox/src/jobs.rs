//! Per-sandbox job table.
//!
//! The map lock is held only to insert, look up, or snapshot entries; each job
//! carries its own state lock, so unrelated jobs never wait on one another.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};

use crate::types::ProcessId;

/// Exit code recorded for a job terminated by `kill_process` or disposal.
pub const KILLED_EXIT_CODE: i32 = 137;

/// Jobs owned by one sandbox instance, keyed by sandbox-local sequence number.
#[derive(Debug)]
pub struct JobTable<J> {
    jobs: RwLock<HashMap<ProcessId, Arc<J>>>,
    next: AtomicU64,
}

impl<J> Default for JobTable<J> {
    fn default() -> Self {
        Self {
            jobs: RwLock::new(HashMap::new()),
            next: AtomicU64::new(1),
        }
    }
}

impl<J> JobTable<J> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Allocate the next handle. Handles are never reused.
    pub fn allocate(&self) -> ProcessId {
        ProcessId(self.next.fetch_add(1, Ordering::Relaxed))
    }

    pub fn insert(&self, id: ProcessId, job: Arc<J>) {
        self.jobs
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .insert(id, job);
    }

    pub fn get(&self, id: ProcessId) -> Option<Arc<J>> {
        self.jobs
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .get(&id)
            .cloned()
    }

    /// All jobs, ordered by handle.
    pub fn snapshot(&self) -> Vec<(ProcessId, Arc<J>)> {
        let mut all: Vec<_> = self
            .jobs
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .iter()
            .map(|(id, job)| (*id, Arc::clone(job)))
            .collect();
        all.sort_by_key(|(id, _)| *id);
        all
    }

    /// Remove and return every job.
    pub fn drain(&self) -> Vec<(ProcessId, Arc<J>)> {
        let mut all: Vec<_> = self
            .jobs
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .drain()
            .collect();
        all.sort_by_key(|(id, _)| *id);
        all
    }

    pub fn len(&self) -> usize {
        self.jobs
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
