use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, PoisonError};
use std::time::{Duration, Instant};

/// Fleet-wide counters, shared by every wallet monitor.
pub struct Metrics {
    pub fetch_ok: AtomicU64,
    pub fetch_err: AtomicU64,
    pub tx_seen: AtomicU64,
    pub tx_duplicate: AtomicU64,
    pub tx_invalid: AtomicU64,
    pub events: AtomicU64,
    pub notify_ok: AtomicU64,
    pub notify_err: AtomicU64,
    pub notify_suppressed: AtomicU64,
    last_log: Mutex<Instant>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Snapshot {
    pub fetch_ok: u64,
    pub fetch_err: u64,
    pub tx_seen: u64,
    pub tx_duplicate: u64,
    pub tx_invalid: u64,
    pub events: u64,
    pub notify_ok: u64,
    pub notify_err: u64,
    pub notify_suppressed: u64,
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

impl Metrics {
    pub fn new() -> Self {
        Self {
            fetch_ok: AtomicU64::new(0),
            fetch_err: AtomicU64::new(0),
            tx_seen: AtomicU64::new(0),
            tx_duplicate: AtomicU64::new(0),
            tx_invalid: AtomicU64::new(0),
            events: AtomicU64::new(0),
            notify_ok: AtomicU64::new(0),
            notify_err: AtomicU64::new(0),
            notify_suppressed: AtomicU64::new(0),
            last_log: Mutex::new(Instant::now()),
        }
    }

    pub fn add(counter: &AtomicU64, n: u64) {
        counter.fetch_add(n, Ordering::Relaxed);
    }

    pub fn bump_log_tick(&self, every: Duration) -> bool {
        let mut guard = self.last_log.lock().unwrap_or_else(PoisonError::into_inner);
        if guard.elapsed() >= every {
            *guard = Instant::now();
            true
        } else {
            false
        }
    }

    pub fn snapshot(&self) -> Snapshot {
        Snapshot {
            fetch_ok: self.fetch_ok.load(Ordering::Relaxed),
            fetch_err: self.fetch_err.load(Ordering::Relaxed),
            tx_seen: self.tx_seen.load(Ordering::Relaxed),
            tx_duplicate: self.tx_duplicate.load(Ordering::Relaxed),
            tx_invalid: self.tx_invalid.load(Ordering::Relaxed),
            events: self.events.load(Ordering::Relaxed),
            notify_ok: self.notify_ok.load(Ordering::Relaxed),
            notify_err: self.notify_err.load(Ordering::Relaxed),
            notify_suppressed: self.notify_suppressed.load(Ordering::Relaxed),
        }
    }
}

impl std::fmt::Display for Snapshot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "fetch_ok={} fetch_err={} tx_seen={} tx_duplicate={} tx_invalid={} events={} notify_ok={} notify_err={} notify_suppressed={}",
            self.fetch_ok,
            self.fetch_err,
            self.tx_seen,
            self.tx_duplicate,
            self.tx_invalid,
            self.events,
            self.notify_ok,
            self.notify_err,
            self.notify_suppressed
        )
    }
}
