//! Shared work distribution for a parallel segment dump.

use crate::error::{CoreError, CoreResult};
use crate::types::SegmentId;
use parking_lot::{Condvar, Mutex};
use std::sync::Arc;
use tracing::warn;

#[derive(Debug)]
struct DumpState {
    total_count: usize,
    next_index: usize,
    finish_count: usize,
    exit_count: usize,
    first_error: Option<CoreError>,
}

/// Coordinates the workers of one parallel dump.
///
/// Workers claim item indexes one at a time. The first failure clamps the
/// total to the number of items already claimed, so no new work starts
/// while in-flight items still report back. The coordinator waits in
/// [`DumpControl::exit_task`] until every claimed item has reported.
///
/// The control is shared through an `Arc`: workers scheduled on other
/// threads may exit after the coordinator has returned.
#[derive(Debug)]
pub struct DumpControl {
    segment_id: SegmentId,
    state: Mutex<DumpState>,
    all_finished: Condvar,
}

impl DumpControl {
    /// Creates a control over `total_count` items.
    #[must_use]
    pub fn new(segment_id: SegmentId, total_count: usize) -> Arc<Self> {
        Arc::new(Self {
            segment_id,
            state: Mutex::new(DumpState {
                total_count,
                next_index: 0,
                finish_count: 0,
                exit_count: 0,
                first_error: None,
            }),
            all_finished: Condvar::new(),
        })
    }

    /// Segment being dumped.
    #[must_use]
    pub fn segment_id(&self) -> SegmentId {
        self.segment_id
    }

    /// Claims the first item index for a worker, if any remain.
    #[must_use]
    pub fn start_task(&self) -> Option<usize> {
        let mut state = self.state.lock();
        Self::claim(&mut state)
    }

    /// Reports the result of `index` and claims the next item.
    pub fn iterate(&self, index: usize, result: CoreResult<()>) -> Option<usize> {
        let mut state = self.state.lock();
        state.finish_count += 1;
        if let Err(err) = result {
            warn!(segment_id = %self.segment_id, index, error = %err, "dump item failed");
            if state.first_error.is_none() {
                state.first_error = Some(err);
                state.total_count = state.next_index;
            }
        }
        if state.finish_count >= state.total_count {
            self.all_finished.notify_all();
        }
        Self::claim(&mut state)
    }

    /// Leaves the dump.
    ///
    /// A worker returns immediately. The coordinator waits until all claimed
    /// items have reported and returns the first failure.
    ///
    /// # Errors
    ///
    /// For the coordinator, returns the first error any worker reported.
    pub fn exit_task(self: Arc<Self>, is_coordinator: bool) -> CoreResult<()> {
        let mut state = self.state.lock();
        state.exit_count += 1;
        if !is_coordinator {
            return Ok(());
        }
        while state.finish_count < state.total_count {
            self.all_finished.wait(&mut state);
        }
        match state.first_error.take() {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    /// Number of items claimed so far.
    #[must_use]
    pub fn claimed_count(&self) -> usize {
        self.state.lock().next_index
    }

    /// Number of items that reported a result.
    #[must_use]
    pub fn finish_count(&self) -> usize {
        self.state.lock().finish_count
    }

    /// Number of [`DumpControl::exit_task`] calls so far.
    #[must_use]
    pub fn exit_count(&self) -> usize {
        self.state.lock().exit_count
    }

    fn claim(state: &mut DumpState) -> Option<usize> {
        if state.next_index >= state.total_count {
            return None;
        }
        let index = state.next_index;
        state.next_index += 1;
        Some(index)
    }
}
