//! Cancellable fixed-interval task
//!
//! Each periodic publisher owns its own [`PeriodicTask`]; stopping one never
//! touches another. Ticks run under a liveness lock, and [`PeriodicTask::stop`]
//! takes the same lock before flipping it off, so once `stop` returns no tick
//! body can run again, even if the runtime polls the task on another thread.

use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::debug;

#[derive(Debug)]
pub struct PeriodicTask {
    name: &'static str,
    period: Duration,
    live: Arc<Mutex<bool>>,
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

impl PeriodicTask {
    /// Spawns `on_tick` every `period`, first firing one period from now.
    ///
    /// Missed ticks are delayed rather than bursted, so two tick bodies never
    /// overlap. Must be called from within a tokio runtime.
    pub fn spawn<F>(name: &'static str, period: Duration, mut on_tick: F) -> Self
    where
        F: FnMut() + Send + 'static,
    {
        let live = Arc::new(Mutex::new(true));
        let cancel = CancellationToken::new();

        let task_live = live.clone();
        let task_cancel = cancel.clone();
        let handle = tokio::spawn(async move {
            let mut timer = interval_at(Instant::now() + period, period);
            timer.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    biased;
                    _ = task_cancel.cancelled() => break,
                    _ = timer.tick() => {
                        if !run_tick(&task_live, &mut on_tick) {
                            break;
                        }
                    }
                }
            }
            debug!("Periodic task '{}' finished", name);
        });

        debug!("Periodic task '{}' started with {:?} period", name, period);
        Self {
            name,
            period,
            live,
            cancel,
            handle,
        }
    }

    pub fn period(&self) -> Duration {
        self.period
    }

    /// Stops the task; no tick runs after this returns.
    pub fn stop(self) {
        self.halt();
    }

    fn halt(&self) {
        let mut live = self.live.lock().unwrap_or_else(PoisonError::into_inner);
        if *live {
            *live = false;
            debug!("Periodic task '{}' stopped", self.name);
        }
        drop(live);
        self.cancel.cancel();
        self.handle.abort();
    }
}

// Runs one tick body unless the task was stopped; false means stopped.
fn run_tick<F: FnMut()>(live: &Mutex<bool>, on_tick: &mut F) -> bool {
    let guard = live.lock().unwrap_or_else(PoisonError::into_inner);
    if !*guard {
        return false;
    }
    on_tick();
    true
}

impl Drop for PeriodicTask {
    fn drop(&mut self) {
        self.halt();
    }
}
