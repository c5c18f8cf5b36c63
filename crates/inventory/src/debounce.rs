use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, trace};

type Action = Arc<dyn Fn() + Send + Sync>;

#[derive(Default)]
struct TimerState {
    generation: u64,
    pending: Option<JoinHandle<()>>,
}

/// Single-shot delay timer that restarts on every `schedule` call.
///
/// A burst of calls closer together than `delay` produces one firing of the
/// action, `delay` after the last call. `schedule` may be called from any
/// thread; the timer itself runs on the runtime handle given at construction.
pub struct Debouncer {
    name: &'static str,
    delay: Duration,
    runtime: Handle,
    action: Action,
    state: Arc<Mutex<TimerState>>,
}

impl Debouncer {
    pub fn new(
        name: &'static str,
        delay: Duration,
        runtime: Handle,
        action: impl Fn() + Send + Sync + 'static,
    ) -> Self {
        Self {
            name,
            delay,
            runtime,
            action: Arc::new(action),
            state: Arc::new(Mutex::new(TimerState::default())),
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn delay(&self) -> Duration {
        self.delay
    }

    pub fn schedule(&self) {
        let mut state = lock(&self.state);
        state.generation = state.generation.wrapping_add(1);
        let generation = state.generation;
        if let Some(previous) = state.pending.take() {
            previous.abort();
            trace!(debouncer = self.name, "restarted pending timer");
        }

        let deadline = Instant::now() + self.delay;
        let shared = Arc::clone(&self.state);
        let action = Arc::clone(&self.action);
        let name = self.name;
        state.pending = Some(self.runtime.spawn(async move {
            tokio::time::sleep_until(deadline).await;
            {
                let mut state = lock(&shared);
                if state.generation != generation {
                    return;
                }
                state.pending = None;
            }
            debug!(debouncer = name, "debounce delay elapsed");
            action();
        }));
    }

    /// Drop a pending fire, if any.
    pub fn cancel(&self) {
        let mut state = lock(&self.state);
        state.generation = state.generation.wrapping_add(1);
        if let Some(pending) = state.pending.take() {
            pending.abort();
        }
    }

    pub fn pending(&self) -> bool {
        lock(&self.state).pending.is_some()
    }
}

impl Drop for Debouncer {
    fn drop(&mut self) {
        self.cancel();
    }
}

impl std::fmt::Debug for Debouncer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Debouncer")
            .field("name", &self.name)
            .field("delay", &self.delay)
            .field("pending", &self.pending())
            .finish()
    }
}

fn lock(state: &Mutex<TimerState>) -> MutexGuard<'_, TimerState> {
    state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}
