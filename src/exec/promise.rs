use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use crate::foundation::error::{PixelflowError, PixelflowResult};

type Callback<T> = Box<dyn FnOnce(&PixelflowResult<T>) + Send>;

enum State<T> {
    Pending(Vec<Callback<T>>),
    Done(PixelflowResult<T>),
}

struct Shared<T> {
    state: Mutex<State<T>>,
    cond: Condvar,
}

/// Set-once shared result cell.
///
/// Any number of clones may wait on or subscribe to the outcome; the first [`Promise::complete`]
/// wins. Continuations registered with [`Promise::on_complete`] run on the completing thread, or
/// immediately when the promise is already complete.
pub struct Promise<T> {
    shared: Arc<Shared<T>>,
}

impl<T> Clone for Promise<T> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl<T> std::fmt::Debug for Promise<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let done = matches!(*lock(&self.shared.state), State::Done(_));
        f.debug_struct("Promise").field("complete", &done).finish()
    }
}

impl<T: Clone + Send + 'static> Default for Promise<T> {
    fn default() -> Self {
        Self::new()
    }
}

fn lock<S>(m: &Mutex<S>) -> MutexGuard<'_, S> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

impl<T: Clone + Send + 'static> Promise<T> {
    /// A pending promise.
    pub fn new() -> Self {
        Self {
            shared: Arc::new(Shared {
                state: Mutex::new(State::Pending(Vec::new())),
                cond: Condvar::new(),
            }),
        }
    }

    /// An already-resolved promise.
    pub fn resolved(value: T) -> Self {
        let p = Self::new();
        p.complete(Ok(value));
        p
    }

    /// An already-failed promise.
    pub fn failed(err: PixelflowError) -> Self {
        let p = Self::new();
        p.complete(Err(err));
        p
    }

    /// Set the outcome. Returns `false` if the promise was already complete.
    pub fn complete(&self, outcome: PixelflowResult<T>) -> bool {
        let callbacks = {
            let mut state = lock(&self.shared.state);
            let State::Pending(callbacks) = &mut *state else {
                return false;
            };
            let callbacks = std::mem::take(callbacks);
            *state = State::Done(outcome.clone());
            callbacks
        };
        self.shared.cond.notify_all();
        for cb in callbacks {
            cb(&outcome);
        }
        true
    }

    /// Whether an outcome has been set.
    pub fn is_complete(&self) -> bool {
        matches!(*lock(&self.shared.state), State::Done(_))
    }

    /// The outcome, if already set.
    pub fn try_get(&self) -> Option<PixelflowResult<T>> {
        match &*lock(&self.shared.state) {
            State::Done(r) => Some(r.clone()),
            State::Pending(_) => None,
        }
    }

    /// Block until complete.
    pub fn wait(&self) -> PixelflowResult<T> {
        let mut state = lock(&self.shared.state);
        loop {
            if let State::Done(r) = &*state {
                return r.clone();
            }
            state = self
                .shared
                .cond
                .wait(state)
                .unwrap_or_else(PoisonError::into_inner);
        }
    }

    /// Block until complete or `timeout` elapses; the latter yields [`PixelflowError::Timeout`].
    pub fn wait_timeout(&self, timeout: Duration) -> PixelflowResult<T> {
        let start = Instant::now();
        let mut state = lock(&self.shared.state);
        loop {
            if let State::Done(r) = &*state {
                return r.clone();
            }
            let elapsed = start.elapsed();
            let Some(left) = timeout.checked_sub(elapsed).filter(|d| !d.is_zero()) else {
                return Err(PixelflowError::Timeout { elapsed });
            };
            state = self
                .shared
                .cond
                .wait_timeout(state, left)
                .unwrap_or_else(PoisonError::into_inner)
                .0;
        }
    }

    /// Register a continuation for the outcome.
    pub fn on_complete(&self, f: impl FnOnce(&PixelflowResult<T>) + Send + 'static) {
        let outcome = {
            let mut state = lock(&self.shared.state);
            match &mut *state {
                State::Pending(callbacks) => {
                    callbacks.push(Box::new(f));
                    return;
                }
                State::Done(r) => r.clone(),
            }
        };
        f(&outcome);
    }

    /// Derive a promise completed with `f` applied to this promise's value.
    pub fn map<U, F>(&self, f: F) -> Promise<U>
    where
        U: Clone + Send + 'static,
        F: FnOnce(T) -> PixelflowResult<U> + Send + 'static,
    {
        let out = Promise::new();
        let target = out.clone();
        self.on_complete(move |r| {
            target.complete(r.clone().and_then(f));
        });
        out
    }
}

#[cfg(test)]
#[path = "../../tests/unit/exec/promise.rs"]
mod tests;
