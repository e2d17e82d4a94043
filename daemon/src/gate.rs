//! Ingestion gate
//!
//! The only state shared with producer threads. Readiness and the input
//! endpoint live together behind one mutex so they always change together;
//! a frame is forwarded only while the gate is open and the endpoint is
//! present, and the push itself happens inside the critical section so a
//! concurrent `close()` can never overtake an in-flight frame.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use common::FrameCounters;

use crate::engine::InputEndpoint;
use crate::frame::Frame;
use crate::pipeline::PipelineController;

/// What happened to a submitted frame
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteOutcome {
    /// Handed to the pipeline
    Forwarded,
    /// Gate closed; silently discarded
    Dropped,
    /// The pipeline refused it and the gate is now closed
    Rejected,
}

#[derive(Default)]
struct GateState {
    ready: bool,
    input: Option<Arc<dyn InputEndpoint>>,
}

/// Readiness flag plus the mutex-protected frame entry point
#[derive(Default)]
pub struct IngestionGate {
    state: Mutex<GateState>,
    forwarded: AtomicU64,
    dropped: AtomicU64,
    rejected: AtomicU64,
}

impl IngestionGate {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, GateState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Start forwarding to `input`. Only call after a confirmed Playing transition.
    pub fn open(&self, input: Arc<dyn InputEndpoint>) {
        let mut state = self.lock();
        state.input = Some(input);
        state.ready = true;
        log::debug!("Ingestion gate opened");
    }

    /// Stop forwarding and release the endpoint reference
    pub fn close(&self) {
        let mut state = self.lock();
        if state.ready || state.input.is_some() {
            log::debug!("Ingestion gate closed");
        }
        state.ready = false;
        state.input = None;
    }

    pub fn is_open(&self) -> bool {
        let state = self.lock();
        state.ready && state.input.is_some()
    }

    /// Submit one access unit from any thread.
    ///
    /// Never surfaces an error: a closed gate drops the frame, and a refused
    /// push closes the gate until the next successful start reopens it.
    pub fn write(&self, timestamp: u64, bytes: &[u8]) -> WriteOutcome {
        let mut state = self.lock();

        let result = match state.input.as_deref() {
            Some(input) if state.ready => {
                PipelineController::push(input, Frame::copy_from(timestamp, bytes))
            }
            _ => {
                self.dropped.fetch_add(1, Ordering::Relaxed);
                log::trace!("Dropping {} byte frame, gate closed", bytes.len());
                return WriteOutcome::Dropped;
            }
        };

        match result {
            Ok(()) => {
                self.forwarded.fetch_add(1, Ordering::Relaxed);
                WriteOutcome::Forwarded
            }
            Err(_) => {
                state.ready = false;
                self.rejected.fetch_add(1, Ordering::Relaxed);
                WriteOutcome::Rejected
            }
        }
    }

    /// Snapshot of the frame counters (read without the lock)
    pub fn counters(&self) -> FrameCounters {
        FrameCounters {
            forwarded: self.forwarded.load(Ordering::Relaxed),
            dropped: self.dropped.load(Ordering::Relaxed),
            rejected: self.rejected.load(Ordering::Relaxed),
        }
    }
}
