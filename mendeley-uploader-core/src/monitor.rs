//! Shared progress of the current (or last) upload run.
//!
//! The dashboard reads [`RunMonitor::snapshot`] while a batch writes through its
//! [`RunGuard`]. Holding the guard is what "running" means: only one can exist at
//! a time, and dropping it always clears the running flag, even if the batch task
//! panics or is cancelled.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use serde::Serialize;
use tracing::info;
use uuid::Uuid;

use crate::ledger::Outcome;

pub const IDLE_MESSAGE: &str = "Idle";

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RunStatus {
    pub is_running: bool,
    pub run_id: Option<Uuid>,
    pub total_files: usize,
    pub processed_files: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub skipped: usize,
    pub current_file: String,
    pub status_message: String,
}

impl Default for RunStatus {
    fn default() -> Self {
        Self {
            is_running: false,
            run_id: None,
            total_files: 0,
            processed_files: 0,
            succeeded: 0,
            failed: 0,
            skipped: 0,
            current_file: String::new(),
            status_message: IDLE_MESSAGE.to_string(),
        }
    }
}

#[derive(Debug, Default)]
pub struct RunMonitor {
    status: Mutex<RunStatus>,
    stop: AtomicBool,
}

impl RunMonitor {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    fn lock(&self) -> MutexGuard<'_, RunStatus> {
        self.status
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Claim the monitor for a new run. Returns `None` while another run holds it.
    pub fn try_start(self: &Arc<Self>) -> Option<RunGuard> {
        let mut status = self.lock();
        if status.is_running {
            return None;
        }
        let run_id = Uuid::new_v4();
        *status = RunStatus {
            is_running: true,
            run_id: Some(run_id),
            status_message: "Starting".to_string(),
            ..RunStatus::default()
        };
        self.stop.store(false, Ordering::SeqCst);
        info!(%run_id, "Upload run started");
        Some(RunGuard {
            monitor: Arc::clone(self),
            run_id,
            finished: false,
        })
    }

    /// Ask the active run to stop after the current file. Returns false if nothing is running.
    pub fn request_stop(&self) -> bool {
        let status = self.lock();
        if !status.is_running {
            return false;
        }
        self.stop.store(true, Ordering::SeqCst);
        info!(run_id = ?status.run_id, "Stop requested");
        true
    }

    pub fn is_running(&self) -> bool {
        self.lock().is_running
    }

    pub fn snapshot(&self) -> RunStatus {
        self.lock().clone()
    }
}

/// Write access to the monitor for the duration of one run.
pub struct RunGuard {
    monitor: Arc<RunMonitor>,
    run_id: Uuid,
    finished: bool,
}

impl RunGuard {
    pub fn run_id(&self) -> Uuid {
        self.run_id
    }

    pub fn stop_requested(&self) -> bool {
        self.monitor.stop.load(Ordering::SeqCst)
    }

    pub fn set_message(&self, message: impl Into<String>) {
        self.monitor.lock().status_message = message.into();
    }

    pub fn set_totals(&self, total_files: usize, skipped: usize) {
        let mut status = self.monitor.lock();
        status.total_files = total_files;
        status.skipped = skipped;
    }

    pub fn begin_file(&self, file_name: &str) {
        self.monitor.lock().current_file = file_name.to_string();
    }

    pub fn record(&self, outcome: Outcome) {
        let mut status = self.monitor.lock();
        status.processed_files += 1;
        match outcome {
            Outcome::Success => status.succeeded += 1,
            Outcome::FailedMetadata | Outcome::FailedUpload => status.failed += 1,
        }
    }

    /// End the run with a final status message.
    pub fn finish(mut self, message: impl Into<String>) {
        let message = message.into();
        self.release(&message);
        self.finished = true;
    }

    fn release(&self, message: &str) {
        let mut status = self.monitor.lock();
        status.is_running = false;
        status.current_file.clear();
        status.status_message = message.to_string();
        info!(run_id = %self.run_id, status = message, "Upload run ended");
    }
}

impl Drop for RunGuard {
    fn drop(&mut self) {
        if !self.finished {
            self.release("Interrupted");
        }
    }
}
