use std::collections::VecDeque;
use std::sync::{Mutex, MutexGuard};

use rustc_hash::FxHashSet;
use tokio::sync::Notify;

#[derive(Default)]
struct State {
    order: VecDeque<String>,
    /// Keys waiting to be handed out, including in-flight keys re-added
    /// while processing.
    dirty: FxHashSet<String>,
    processing: FxHashSet<String>,
    shutting_down: bool,
}

/// FIFO of distinct keys. A key is handed to at most one worker at a time;
/// adding a key that is in flight re-queues it once the worker calls `done`.
pub struct KeyQueue {
    name: &'static str,
    state: Mutex<State>,
    notify: Notify,
}

impl KeyQueue {
    pub fn new(name: &'static str) -> Self {
        Self { name, state: Mutex::new(State::default()), notify: Notify::new() }
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn report_depth(&self, st: &State) {
        metrics::gauge!("sources_queue_depth", st.order.len() as f64, "queue" => self.name);
    }

    pub fn add(&self, key: &str) {
        let mut st = self.lock();
        if st.shutting_down || st.dirty.contains(key) {
            return;
        }
        st.dirty.insert(key.to_string());
        if st.processing.contains(key) {
            return;
        }
        st.order.push_back(key.to_string());
        self.report_depth(&st);
        drop(st);
        self.notify.notify_one();
    }

    /// Next key, waiting if the queue is empty. `None` once shut down and drained.
    pub async fn get(&self) -> Option<String> {
        loop {
            let notified = self.notify.notified();
            {
                let mut st = self.lock();
                if let Some(key) = st.order.pop_front() {
                    st.dirty.remove(&key);
                    st.processing.insert(key.clone());
                    self.report_depth(&st);
                    return Some(key);
                }
                if st.shutting_down {
                    return None;
                }
            }
            notified.await;
        }
    }

    /// Mark `key` finished; re-queues it if it was added while in flight.
    pub fn done(&self, key: &str) {
        let mut st = self.lock();
        st.processing.remove(key);
        if st.dirty.contains(key) {
            st.order.push_back(key.to_string());
            self.report_depth(&st);
            drop(st);
            self.notify.notify_one();
        }
    }

    /// Stop accepting keys. Workers drain what is queued, then `get` yields `None`.
    pub fn shut_down(&self) {
        self.lock().shutting_down = true;
        self.notify.notify_waiters();
    }

    pub fn len(&self) -> usize {
        self.lock().order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
