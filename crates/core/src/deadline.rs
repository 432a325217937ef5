use std::sync::mpsc;
use std::thread;
use std::time::{Duration, Instant};

/// Cooperative wall-clock budget. Long-running scans poll [`Deadline::expired`]
/// and return what they have produced so far.
#[derive(Debug, Clone, Copy, Default)]
pub struct Deadline(Option<Instant>);

impl Deadline {
    pub fn none() -> Self {
        Self(None)
    }

    pub fn after(budget: Duration) -> Self {
        Self(Instant::now().checked_add(budget))
    }

    /// `None` or a zero budget means unbounded.
    pub fn from_budget(budget: Option<Duration>) -> Self {
        match budget {
            Some(d) if !d.is_zero() => Self::after(d),
            _ => Self::none(),
        }
    }

    pub fn expired(&self) -> bool {
        matches!(self.0, Some(at) if Instant::now() >= at)
    }

    pub fn is_bounded(&self) -> bool {
        self.0.is_some()
    }
}

/// Runs `work` on a helper thread and waits at most `budget` for it.
/// Returns `None` when the budget runs out; the helper is left to finish on
/// its own and its result is discarded.
pub fn run_with_budget<T, F>(budget: Option<Duration>, work: F) -> Option<T>
where
    T: Send + 'static,
    F: FnOnce() -> T + Send + 'static,
{
    let Some(budget) = budget.filter(|d| !d.is_zero()) else {
        return Some(work());
    };
    let (tx, rx) = mpsc::channel();
    thread::spawn(move || {
        let _ = tx.send(work());
    });
    match rx.recv_timeout(budget) {
        Ok(value) => Some(value),
        Err(_) => {
            tracing::warn!(budget_ms = budget.as_millis() as u64, "[timeout] work exceeded budget");
            None
        }
    }
}
