//! Background dispatch scheduler.
//!
//! One polling thread per process wakes up, promotes due scheduled
//! tickets through the engine, and sleeps. Store failures are never
//! fatal: the poll interval doubles up to a ceiling and the scan is
//! retried forever. The sleep runs in one-second slices so a stop
//! request does not wait out a multi-minute backoff.

use chrono::{DateTime, Utc};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{mpsc, Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crate::db::Database;
use crate::engine::Engine;

/// Poll timing. The defaults match the production cadence; tests shrink
/// them to milliseconds.
#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    /// Sleep between successful scans.
    pub poll_interval: Duration,
    /// Ceiling for the failure backoff.
    pub max_backoff: Duration,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(60),
            max_backoff: Duration::from_secs(300),
        }
    }
}

/// Emitted whenever a scan promoted at least one ticket. Best-effort and
/// in-process only: notices nobody is listening for are dropped.
#[derive(Debug, Clone)]
pub struct DispatchNotice {
    pub count: usize,
    pub at: DateTime<Utc>,
}

/// Owns the polling thread and its lifecycle. Stopping (or dropping)
/// signals the thread and joins it.
pub struct DispatchScheduler {
    thread_handle: Option<JoinHandle<()>>,
    running: Arc<AtomicBool>,
    current_interval: Arc<Mutex<Duration>>,
    notice_rx: mpsc::Receiver<DispatchNotice>,
}

impl DispatchScheduler {
    /// Spawns the polling thread and returns its handle object.
    pub fn start(db: Arc<Database>, config: SchedulerConfig) -> Self {
        let (notice_tx, notice_rx) = mpsc::channel();
        let running = Arc::new(AtomicBool::new(true));
        let current_interval = Arc::new(Mutex::new(config.poll_interval));

        let thread_running = Arc::clone(&running);
        let thread_interval = Arc::clone(&current_interval);
        let engine = Engine::new(db);

        let thread_handle = thread::spawn(move || {
            poll_loop(engine, config, notice_tx, thread_running, thread_interval);
        });

        Self {
            thread_handle: Some(thread_handle),
            running,
            current_interval,
            notice_rx,
        }
    }

    pub fn is_running(&self) -> bool {
        self.thread_handle.is_some() && self.running.load(Ordering::SeqCst)
    }

    /// The sleep the poller will take before its next scan. Grows while
    /// the store is unreachable, resets on the first successful scan.
    pub fn current_interval(&self) -> Duration {
        *self.current_interval.lock().unwrap()
    }

    /// Non-blocking: the next pending promotion notice, if any.
    pub fn try_recv_notice(&self) -> Option<DispatchNotice> {
        self.notice_rx.try_recv().ok()
    }

    /// Non-blocking: every pending promotion notice.
    pub fn drain_notices(&self) -> Vec<DispatchNotice> {
        let mut notices = Vec::new();
        while let Ok(notice) = self.notice_rx.try_recv() {
            notices.push(notice);
        }
        notices
    }

    /// Cooperative shutdown: flips the stop flag and joins the thread.
    /// The poller notices the flag within one second.
    pub fn stop(&mut self) {
        self.running.store(false, Ordering::SeqCst);
        if let Some(handle) = self.thread_handle.take() {
            let _ = handle.join();
        }
    }
}

impl Drop for DispatchScheduler {
    fn drop(&mut self) {
        self.stop();
    }
}

fn poll_loop(
    engine: Engine,
    config: SchedulerConfig,
    notice_tx: mpsc::Sender<DispatchNotice>,
    running: Arc<AtomicBool>,
    current_interval: Arc<Mutex<Duration>>,
) {
    log::info!("dispatch scheduler started");
    let mut interval = config.poll_interval;

    while running.load(Ordering::SeqCst) {
        match engine.dispatch_due() {
            Ok(count) => {
                if count > 0 {
                    let _ = notice_tx.send(DispatchNotice {
                        count,
                        at: Utc::now(),
                    });
                }
                interval = config.poll_interval;
            }
            Err(e) => {
                interval = (interval * 2).min(config.max_backoff);
                log::warn!(
                    "scheduled dispatch scan failed ({}); next attempt in {:?}",
                    e,
                    interval
                );
            }
        }
        *current_interval.lock().unwrap() = interval;

        // Sleep in short slices so a stop request is honored promptly.
        let mut remaining = interval;
        while remaining > Duration::ZERO && running.load(Ordering::SeqCst) {
            let slice = remaining.min(Duration::from_secs(1));
            thread::sleep(slice);
            remaining -= slice;
        }
    }

    log::info!("dispatch scheduler stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{NewRequirement, Priority, Role, Status};
    use chrono::Duration as ChronoDuration;
    use std::time::Instant;
    use tempfile::TempDir;

    fn fast_config() -> SchedulerConfig {
        SchedulerConfig {
            poll_interval: Duration::from_millis(10),
            max_backoff: Duration::from_millis(200),
        }
    }

    fn seed_overdue_ticket(db: &Database) -> i64 {
        let admin = db
            .insert_user("boss", "pw", "Boss", "boss@example.com", Role::Admin)
            .unwrap();
        let staff = db
            .insert_user("worker", "pw", "Worker", "w@example.com", Role::Staff)
            .unwrap();
        let new = NewRequirement {
            title: "Overdue".to_string(),
            description: "Trigger already passed".to_string(),
            assignee_id: staff,
            priority: Priority::Normal,
            scheduled_time: Some(Utc::now() - ChronoDuration::minutes(1)),
        };
        db.insert_requirement(&new, admin, Utc::now()).unwrap()
    }

    fn wait_until(deadline: Duration, mut check: impl FnMut() -> bool) -> bool {
        let start = Instant::now();
        while start.elapsed() < deadline {
            if check() {
                return true;
            }
            thread::sleep(Duration::from_millis(5));
        }
        false
    }

    #[test]
    fn test_scheduler_promotes_due_tickets_and_notifies() {
        let db = Arc::new(Database::open_in_memory().unwrap());
        let id = seed_overdue_ticket(&db);

        let mut scheduler = DispatchScheduler::start(Arc::clone(&db), fast_config());
        assert!(scheduler.is_running());

        let promoted = wait_until(Duration::from_secs(2), || {
            db.ticket_by_id(id, false)
                .unwrap()
                .map(|t| t.requirement.status == Status::Pending)
                .unwrap_or(false)
        });
        assert!(promoted, "scheduler never promoted the overdue ticket");

        let noticed = wait_until(Duration::from_secs(2), || {
            scheduler.try_recv_notice().map(|n| n.count).unwrap_or(0) > 0
        });
        assert!(noticed, "scheduler never sent a promotion notice");

        scheduler.stop();
        assert!(!scheduler.is_running());
    }

    #[test]
    fn test_scheduler_backs_off_while_store_is_broken() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("reqmgr.db");
        let db = Arc::new(Database::open(&path).unwrap());

        // Break the store behind the scheduler's back.
        rusqlite::Connection::open(&path)
            .unwrap()
            .execute_batch("DROP TABLE requirements")
            .unwrap();

        let base = fast_config();
        let scheduler = DispatchScheduler::start(Arc::clone(&db), base.clone());

        let backed_off = wait_until(Duration::from_secs(2), || {
            scheduler.current_interval() > base.poll_interval
        });
        assert!(backed_off, "interval never grew past the base value");

        // Still alive: failures are retried, never fatal.
        assert!(scheduler.is_running());
        assert!(scheduler.current_interval() <= base.max_backoff);
    }

    #[test]
    fn test_stop_interrupts_a_long_sleep() {
        let db = Arc::new(Database::open_in_memory().unwrap());

        // Production-length interval: the first sleep would be a minute.
        let mut scheduler = DispatchScheduler::start(Arc::clone(&db), SchedulerConfig::default());

        let start = Instant::now();
        scheduler.stop();
        assert!(
            start.elapsed() < Duration::from_secs(3),
            "stop waited out the sleep instead of interrupting it"
        );
    }
}
