use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

/// Count of running virtual users.
///
/// A group counter may roll up into a run-wide parent, so entering the group
/// also counts towards the run.
#[derive(Debug, Default)]
pub struct ActiveThreads {
    active: AtomicU64,
    peak: AtomicU64,
    started: AtomicU64,
    parent: Option<Arc<ActiveThreads>>,
}

impl ActiveThreads {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn child_of(parent: Arc<ActiveThreads>) -> Arc<Self> {
        Arc::new(Self {
            parent: Some(parent),
            ..Self::default()
        })
    }

    pub fn enter(self: &Arc<Self>) -> ActiveThreadGuard {
        self.increment();
        ActiveThreadGuard {
            threads: self.clone(),
        }
    }

    fn increment(&self) {
        self.started.fetch_add(1, Ordering::Relaxed);
        let now = self.active.fetch_add(1, Ordering::AcqRel).saturating_add(1);

        let mut peak = self.peak.load(Ordering::Relaxed);
        while now > peak {
            match self
                .peak
                .compare_exchange_weak(peak, now, Ordering::Relaxed, Ordering::Relaxed)
            {
                Ok(_) => break,
                Err(actual) => peak = actual,
            }
        }

        if let Some(parent) = &self.parent {
            parent.increment();
        }
    }

    fn decrement(&self) {
        self.active.fetch_sub(1, Ordering::AcqRel);
        if let Some(parent) = &self.parent {
            parent.decrement();
        }
    }

    pub fn count(&self) -> u64 {
        self.active.load(Ordering::Acquire)
    }

    pub fn peak(&self) -> u64 {
        self.peak.load(Ordering::Relaxed)
    }

    pub fn started_total(&self) -> u64 {
        self.started.load(Ordering::Relaxed)
    }
}

#[derive(Debug)]
pub struct ActiveThreadGuard {
    threads: Arc<ActiveThreads>,
}

impl Drop for ActiveThreadGuard {
    fn drop(&mut self) {
        self.threads.decrement();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn guards_track_active_and_peak() {
        let run = ActiveThreads::new();
        let group = ActiveThreads::child_of(run.clone());

        let a = group.enter();
        let b = group.enter();
        assert_eq!(group.count(), 2);
        assert_eq!(run.count(), 2);

        drop(a);
        assert_eq!(group.count(), 1);
        assert_eq!(run.count(), 1);

        drop(b);
        assert_eq!(run.count(), 0);
        assert_eq!(run.peak(), 2);
        assert_eq!(group.started_total(), 2);
    }
}
