use tracing::{event, instrument, Level};

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
        let mut guard = mutex.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
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

/// Counts operations that have started and finished; the difference is the number in flight.
#[derive(Debug)]
pub struct ProgressCounter {
    started: TlsCounter,
    finished: TlsCounter,
}

impl Default for ProgressCounter {
    fn default() -> Self {
        Self::new()
    }
}

/// Marks one operation as started for as long as it lives.
pub struct ProgressGuard<'a> {
    progress: &'a ProgressCounter,
}

impl<'a> ProgressGuard<'a> {
    pub fn new(progress: &'a ProgressCounter) -> Self {
        progress.started.inc();
        Self { progress }
    }
}

impl Drop for ProgressGuard<'_> {
    fn drop(&mut self) {
        self.progress.finished.inc();
    }
}

pub struct Status {
    pub started: u64,
    pub finished: u64,
}

impl ProgressCounter {
    pub fn new() -> Self {
        Self {
            started: TlsCounter::new(),
            finished: TlsCounter::new(),
        }
    }

    pub fn guard(&self) -> ProgressGuard<'_> {
        ProgressGuard::new(self)
    }

    #[instrument]
    pub fn get(&self) -> Status {
        let mut status = Status {
            started: self.started.get(),
            finished: self.finished.get(),
        };
        if status.finished > status.started {
            event!(
                Level::DEBUG,
                "Progress inversion - started: {}, finished {}",
                status.started,
                status.finished
            );
            status.started = status.finished;
        }
        status
    }
}

/// Process-wide counters of the third-party-copy layer.
pub struct Progress {
    pub transfers: ProgressCounter,
    pub transfers_failed: TlsCounter,
    pub chunks_pulled: TlsCounter,
    pub bytes_pulled: TlsCounter,
    pub sessions_created: TlsCounter,
    pub sessions_verified: TlsCounter,
    pub sessions_rejected: TlsCounter,
    pub sessions_expired: TlsCounter,
    pub sessions_removed: TlsCounter,
    start_time: std::time::Instant,
}

impl Progress {
    pub fn new() -> Self {
        Self {
            transfers: Default::default(),
            transfers_failed: Default::default(),
            chunks_pulled: Default::default(),
            bytes_pulled: Default::default(),
            sessions_created: Default::default(),
            sessions_verified: Default::default(),
            sessions_rejected: Default::default(),
            sessions_expired: Default::default(),
            sessions_removed: Default::default(),
            start_time: std::time::Instant::now(),
        }
    }

    pub fn get_duration(&self) -> std::time::Duration {
        self.start_time.elapsed()
    }
}

impl Default for Progress {
    fn default() -> Self {
        Self::new()
    }
}

pub struct ProgressPrinter<'a> {
    progress: &'a Progress,
    last_bytes: u64,
    last_update: std::time::Instant,
}

impl<'a> ProgressPrinter<'a> {
    pub fn new(progress: &'a Progress) -> Self {
        Self {
            progress,
            last_bytes: progress.bytes_pulled.get(),
            last_update: std::time::Instant::now(),
        }
    }

    pub fn print(&mut self) -> String {
        let time_now = std::time::Instant::now();
        let transfers = self.progress.transfers.get();
        let total_duration_secs = self.progress.get_duration().as_secs_f64().max(f64::EPSILON);
        let curr_duration_secs = (time_now - self.last_update).as_secs_f64().max(f64::EPSILON);
        let bytes = self.progress.bytes_pulled.get();
        let average_bytes_rate = bytes as f64 / total_duration_secs;
        let current_bytes_rate = bytes.saturating_sub(self.last_bytes) as f64 / curr_duration_secs;
        self.last_bytes = bytes;
        self.last_update = time_now;
        format!(
            "-----------------------\n\
            TRANSFERS:\n\
            running:  {:>10}\n\
            finished: {:>10}\n\
            failed:   {:>10}\n\
            -----------------------\n\
            PULLED:\n\
            average: {:>10}/s\n\
            current: {:>10}/s\n\
            total:   {:>10}\n\
            chunks:  {:>10}\n\
            -----------------------\n\
            SESSIONS:\n\
            created:  {:>10}\n\
            verified: {:>10}\n\
            rejected: {:>10}\n\
            expired:  {:>10}\n\
            removed:  {:>10}",
            transfers.started - transfers.finished,
            transfers.finished,
            self.progress.transfers_failed.get(),
            bytesize::ByteSize(average_bytes_rate as u64),
            bytesize::ByteSize(current_bytes_rate as u64),
            bytesize::ByteSize(bytes),
            self.progress.chunks_pulled.get(),
            self.progress.sessions_created.get(),
            self.progress.sessions_verified.get(),
            self.progress.sessions_rejected.get(),
            self.progress.sessions_expired.get(),
            self.progress.sessions_removed.get(),
        )
    }
}
