//! Dispatch counters and summaries

#[derive(Debug)]
pub struct TlsCounter {
    // mutex is used primarily from one thread, so it's not a bottleneck
    count: thread_local::ThreadLocal<std::sync::Mutex<u64>>,
}

impl TlsCounter {
    pub fn new() -> Self {
        Self {
            count: thread_local::ThreadLocal::new(),
        }
    }

    pub fn add(&self, value: u64) {
        let mutex = self.count.get_or(|| std::sync::Mutex::new(0));
        let mut guard = mutex
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        *guard += value;
    }

    pub fn inc(&self) {
        self.add(1);
    }

    pub fn get(&self) -> u64 {
        self.count.iter().fold(0, |x, y| {
            x + *y.lock().unwrap_or_else(std::sync::PoisonError::into_inner)
        })
    }
}

impl Default for TlsCounter {
    fn default() -> Self {
        Self::new()
    }
}

/// Outcome counts of one or more dispatches.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct Summary {
    pub transferred: usize,
    pub bytes_transferred: u64,
    pub rejected: usize,
    pub already_processed: usize,
    pub vanished: usize,
    pub not_watched: usize,
    pub permission_denied: usize,
    pub failed: usize,
}

impl Summary {
    pub fn dispatched(&self) -> usize {
        self.transferred
            + self.rejected
            + self.already_processed
            + self.vanished
            + self.not_watched
            + self.permission_denied
            + self.failed
    }
}

impl std::ops::Add for Summary {
    type Output = Self;
    fn add(self, other: Self) -> Self {
        Self {
            transferred: self.transferred + other.transferred,
            bytes_transferred: self.bytes_transferred + other.bytes_transferred,
            rejected: self.rejected + other.rejected,
            already_processed: self.already_processed + other.already_processed,
            vanished: self.vanished + other.vanished,
            not_watched: self.not_watched + other.not_watched,
            permission_denied: self.permission_denied + other.permission_denied,
            failed: self.failed + other.failed,
        }
    }
}

impl std::fmt::Display for Summary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "dispatched: {}\n\
            transferred: {}\n\
            bytes transferred: {}\n\
            rejected: {}\n\
            already processed: {}\n\
            vanished: {}\n\
            not watched: {}\n\
            permission denied: {}\n\
            failed: {}\n",
            self.dispatched(),
            self.transferred,
            bytesize::ByteSize(self.bytes_transferred),
            self.rejected,
            self.already_processed,
            self.vanished,
            self.not_watched,
            self.permission_denied,
            self.failed,
        )
    }
}

/// Live counters shared by every dispatch of a process.
#[derive(Debug)]
pub struct Progress {
    pub transferred: TlsCounter,
    pub bytes_transferred: TlsCounter,
    pub rejected: TlsCounter,
    pub already_processed: TlsCounter,
    pub vanished: TlsCounter,
    pub not_watched: TlsCounter,
    pub permission_denied: TlsCounter,
    pub failed: TlsCounter,
}

impl Progress {
    pub fn new() -> Self {
        Self {
            transferred: Default::default(),
            bytes_transferred: Default::default(),
            rejected: Default::default(),
            already_processed: Default::default(),
            vanished: Default::default(),
            not_watched: Default::default(),
            permission_denied: Default::default(),
            failed: Default::default(),
        }
    }

    pub fn add(&self, summary: &Summary) {
        self.transferred.add(summary.transferred as u64);
        self.bytes_transferred.add(summary.bytes_transferred);
        self.rejected.add(summary.rejected as u64);
        self.already_processed.add(summary.already_processed as u64);
        self.vanished.add(summary.vanished as u64);
        self.not_watched.add(summary.not_watched as u64);
        self.permission_denied.add(summary.permission_denied as u64);
        self.failed.add(summary.failed as u64);
    }

    pub fn summary(&self) -> Summary {
        Summary {
            transferred: self.transferred.get() as usize,
            bytes_transferred: self.bytes_transferred.get(),
            rejected: self.rejected.get() as usize,
            already_processed: self.already_processed.get() as usize,
            vanished: self.vanished.get() as usize,
            not_watched: self.not_watched.get() as usize,
            permission_denied: self.permission_denied.get() as usize,
            failed: self.failed.get() as usize,
        }
    }
}

impl Default for Progress {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::Result;

    #[test]
    fn basic_counting() -> Result<()> {
        let tls_counter = TlsCounter::new();
        for _ in 0..10 {
            tls_counter.inc();
        }
        assert!(tls_counter.get() == 10);
        Ok(())
    }

    #[test]
    fn threaded_counting() -> Result<()> {
        let tls_counter = TlsCounter::new();
        std::thread::scope(|scope| {
            for _ in 0..10 {
                scope.spawn(|| {
                    for _ in 0..100 {
                        tls_counter.inc();
                    }
                });
            }
        });
        assert!(tls_counter.get() == 1000);
        Ok(())
    }

    #[test]
    fn progress_accumulates_summaries() {
        let progress = Progress::new();
        let one = Summary {
            transferred: 1,
            bytes_transferred: 1024,
            ..Default::default()
        };
        let other = Summary {
            rejected: 2,
            failed: 1,
            ..Default::default()
        };
        progress.add(&one);
        progress.add(&other);
        let total = progress.summary();
        assert_eq!(total, one + other);
        assert_eq!(total.dispatched(), 4);
        assert!(format!("{}", total).contains("\ntransferred: 1\n"));
    }
}
