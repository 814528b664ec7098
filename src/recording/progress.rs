use std::sync::{Arc, Mutex};

pub const PROGRESS_INDETERMINATE: i32 = -1;
pub const PROGRESS_COMPLETE: i32 = 100;

pub type ProgressCallback = Arc<dyn Fn(i32) + Send + Sync>;

#[derive(Default)]
pub(crate) struct ProgressListeners {
    callbacks: Mutex<Vec<ProgressCallback>>,
}

impl ProgressListeners {
    pub fn register(&self, callback: ProgressCallback) {
        self.callbacks
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(callback);
    }

    pub fn emit(&self, value: i32) {
        let value = value.clamp(PROGRESS_INDETERMINATE, PROGRESS_COMPLETE);
        // a callback may register another one
        let callbacks = self
            .callbacks
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone();
        for callback in callbacks {
            callback(value);
        }
    }
}

pub(crate) fn percent(index: usize, count: usize) -> i32 {
    ((index as f64 / count as f64) * 100.0).round() as i32
}
