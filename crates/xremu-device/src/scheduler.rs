//! Frame scheduler driven explicitly by the caller.

use std::cell::RefCell;
use std::rc::Rc;

use xremu_vr::{FrameCallback, FrameScheduler};

#[derive(Default)]
struct SchedulerState {
    next_handle: u32,
    pending: Vec<(u32, FrameCallback)>,
}

/// Queues animation-frame callbacks until [`ManualScheduler::advance`].
///
/// Clones share the same queue, so a host can keep one handle while the
/// device owns another.
#[derive(Clone, Default)]
pub struct ManualScheduler {
    state: Rc<RefCell<SchedulerState>>,
}

impl std::fmt::Debug for ManualScheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ManualScheduler")
            .field("pending", &self.pending())
            .finish()
    }
}

impl ManualScheduler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn pending(&self) -> usize {
        self.state.borrow().pending.len()
    }

    /// Run every callback queued so far with `now_ms`. Callbacks requested
    /// while running wait for the next call. Returns how many ran.
    pub fn advance(&self, now_ms: f64) -> usize {
        let callbacks = std::mem::take(&mut self.state.borrow_mut().pending);
        let count = callbacks.len();
        for (_, callback) in callbacks {
            callback(now_ms);
        }
        count
    }
}

impl FrameScheduler for ManualScheduler {
    fn request_animation_frame(&mut self, callback: FrameCallback) -> u32 {
        let mut state = self.state.borrow_mut();
        state.next_handle += 1;
        let handle = state.next_handle;
        state.pending.push((handle, callback));
        handle
    }

    fn cancel_animation_frame(&mut self, handle: u32) {
        self.state.borrow_mut().pending.retain(|(h, _)| *h != handle);
    }
}
