use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use crate::error::TimeSeriesError;
use crate::timeseries::{LineSender, Row};

type RejectFn = Box<dyn Fn(&Row) -> bool + Send>;

#[derive(Default)]
struct MemoryState {
    pending: Vec<Row>,
    flushed: Vec<Vec<Row>>,
    flush_attempts: usize,
    failing_flushes: usize,
    reject: Option<RejectFn>,
    closed: bool,
}

/// In-memory `LineSender`.
///
/// Clones share state, so a test can keep one handle for inspection while the
/// writer under test owns another.
#[derive(Clone, Default)]
pub struct MemoryLineSender {
    state: Arc<Mutex<MemoryState>>,
}

impl MemoryLineSender {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, MemoryState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Reject every row for which `predicate` returns true
    pub fn reject_rows<F>(&self, predicate: F)
    where
        F: Fn(&Row) -> bool + Send + 'static,
    {
        self.state().reject = Some(Box::new(predicate));
    }

    /// Fail the next `count` flushes
    pub fn fail_next_flushes(&self, count: usize) {
        self.state().failing_flushes = count;
    }

    /// Batches delivered by successful flushes, oldest first
    pub fn flushed_batches(&self) -> Vec<Vec<Row>> {
        self.state().flushed.clone()
    }

    /// Every row delivered so far, in delivery order
    pub fn flushed_rows(&self) -> Vec<Row> {
        self.state().flushed.iter().flatten().cloned().collect()
    }

    pub fn flush_attempts(&self) -> usize {
        self.state().flush_attempts
    }

    pub fn is_closed(&self) -> bool {
        self.state().closed
    }
}

impl LineSender for MemoryLineSender {
    fn append(&mut self, row: &Row) -> Result<(), TimeSeriesError> {
        let mut state = self.state();
        if state.closed {
            return Err(TimeSeriesError::Closed);
        }
        if state.reject.as_ref().is_some_and(|reject| reject(row)) {
            return Err(TimeSeriesError::RowRejected(format!(
                "injected rejection for table {}",
                row.table
            )));
        }
        state.pending.push(row.clone());
        Ok(())
    }

    fn flush(&mut self) -> Result<(), TimeSeriesError> {
        let mut state = self.state();
        if state.closed {
            return Err(TimeSeriesError::Closed);
        }
        state.flush_attempts += 1;
        if state.failing_flushes > 0 {
            state.failing_flushes -= 1;
            return Err(TimeSeriesError::FlushFailed("injected flush failure".to_string()));
        }
        if !state.pending.is_empty() {
            let batch = std::mem::take(&mut state.pending);
            state.flushed.push(batch);
        }
        Ok(())
    }

    fn pending_rows(&self) -> usize {
        self.state().pending.len()
    }

    fn discard(&mut self) -> usize {
        let mut state = self.state();
        let dropped = state.pending.len();
        state.pending.clear();
        dropped
    }

    fn close(&mut self) -> Result<(), TimeSeriesError> {
        self.state().closed = true;
        Ok(())
    }
}
