//! Periodic job runner on a dedicated thread.

use std::io;
use std::sync::{Arc, Mutex, mpsc};
use std::thread;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use tracing::{debug, info};

/// Handle to stop a running job and read its counters.
#[derive(Debug)]
pub struct JobHandle {
    shutdown: mpsc::Sender<()>,
    join: Option<thread::JoinHandle<()>>,
    stats: Arc<Mutex<JobStats>>,
}

impl JobHandle {
    /// Request graceful shutdown and wait for the current run to finish.
    pub fn shutdown(mut self) {
        let _ = self.shutdown.send(());
        if let Some(j) = self.join.take() {
            let _ = j.join();
        }
    }

    pub fn stats(&self) -> JobStats {
        self.stats.lock().map(|s| s.clone()).unwrap_or_default()
    }
}

#[derive(Debug, Clone, Default, serde::Serialize)]
pub struct JobStats {
    pub runs: u64,
    pub last_run_at: Option<DateTime<Utc>>,
    pub last_run_ms: u64,
}

/// Runs a closure every `interval` until shut down.
///
/// The first run happens one interval after spawn. A run that takes longer
/// than the interval delays the next one; runs never overlap.
#[derive(Debug, Clone)]
pub struct PeriodicJob {
    name: String,
    interval: Duration,
}

impl PeriodicJob {
    pub fn new(name: impl Into<String>, interval: Duration) -> Self {
        Self {
            name: name.into(),
            interval,
        }
    }

    pub fn spawn<F>(self, mut tick: F) -> io::Result<JobHandle>
    where
        F: FnMut() + Send + 'static,
    {
        let (shutdown_tx, shutdown_rx) = mpsc::channel::<()>();
        let stats = Arc::new(Mutex::new(JobStats::default()));
        let stats_clone = stats.clone();

        let join = thread::Builder::new()
            .name(self.name.clone())
            .spawn(move || job_loop(&self, &mut tick, shutdown_rx, stats_clone))?;

        Ok(JobHandle {
            shutdown: shutdown_tx,
            join: Some(join),
            stats,
        })
    }
}

fn job_loop<F: FnMut()>(
    job: &PeriodicJob,
    tick: &mut F,
    shutdown_rx: mpsc::Receiver<()>,
    stats: Arc<Mutex<JobStats>>,
) {
    info!(job = %job.name, interval_secs = job.interval.as_secs_f64(), "periodic job started");

    loop {
        match shutdown_rx.recv_timeout(job.interval) {
            Err(mpsc::RecvTimeoutError::Timeout) => {}
            // Shutdown requested or handle dropped.
            Ok(()) | Err(mpsc::RecvTimeoutError::Disconnected) => break,
        }

        let started = Instant::now();
        tick();
        let elapsed = started.elapsed();

        if let Ok(mut s) = stats.lock() {
            s.runs += 1;
            s.last_run_at = Some(Utc::now());
            s.last_run_ms = elapsed.as_millis() as u64;
        }
        debug!(
            job = %job.name,
            elapsed_ms = elapsed.as_millis() as u64,
            "periodic job run finished"
        );
    }

    info!(job = %job.name, "periodic job stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn runs_repeatedly_until_shutdown() {
        let counter = Arc::new(AtomicUsize::new(0));
        let c = counter.clone();
        let handle = PeriodicJob::new("test-tick", Duration::from_millis(10))
            .spawn(move || {
                c.fetch_add(1, Ordering::SeqCst);
            })
            .unwrap();

        let deadline = Instant::now() + Duration::from_secs(5);
        while counter.load(Ordering::SeqCst) < 3 && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(5));
        }
        assert!(handle.stats().runs >= 3);
        handle.shutdown();

        let after = counter.load(Ordering::SeqCst);
        thread::sleep(Duration::from_millis(50));
        assert_eq!(counter.load(Ordering::SeqCst), after);
    }

    #[test]
    fn shutdown_does_not_wait_for_the_interval() {
        let handle = PeriodicJob::new("test-idle", Duration::from_secs(3600))
            .spawn(|| {})
            .unwrap();

        let started = Instant::now();
        handle.shutdown();
        assert!(started.elapsed() < Duration::from_secs(5));
    }
}
