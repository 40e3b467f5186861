//! Task scheduler (C7)
//!
//! Periodic execution of the named background tasks with minute-granular
//! intervals from settings. Tasks are not reentrant: a trigger while the
//! task is already running drops the duplicate.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Datelike, TimeZone, Timelike, Utc};
use futures_util::FutureExt;
use serde::Serialize;

const TICK_INTERVAL: Duration = Duration::from_secs(30);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    Idle,
    Running,
    Success,
    Error,
}

#[derive(Debug, Clone, Serialize)]
pub struct TaskRecord {
    pub id: &'static str,
    pub name: &'static str,
    pub description: &'static str,
    pub interval_minutes: u64,
    pub last_run_at: Option<DateTime<Utc>>,
    pub next_run_at: Option<DateTime<Utc>>,
    pub status: TaskStatus,
    pub last_error: Option<String>,
}

/// A named background task. Implementations read their interval from
/// settings so changes apply at the next reschedule.
#[async_trait]
pub trait Task: Send + Sync {
    fn id(&self) -> &'static str;
    fn name(&self) -> &'static str;
    fn description(&self) -> &'static str;
    fn interval_minutes(&self) -> u64;
    /// Returns a one-line summary for the log.
    async fn run(&self) -> anyhow::Result<String>;
}

pub struct TaskScheduler {
    tasks: Vec<Arc<dyn Task>>,
    records: RwLock<HashMap<&'static str, TaskRecord>>,
    me: std::sync::Weak<TaskScheduler>,
}

impl TaskScheduler {
    pub fn new(tasks: Vec<Arc<dyn Task>>) -> Arc<Self> {
        let now = Utc::now();
        let records = tasks
            .iter()
            .map(|task| {
                let interval = task.interval_minutes();
                (
                    task.id(),
                    TaskRecord {
                        id: task.id(),
                        name: task.name(),
                        description: task.description(),
                        interval_minutes: interval,
                        last_run_at: None,
                        next_run_at: Some(next_run_after(now, interval)),
                        status: TaskStatus::Idle,
                        last_error: None,
                    },
                )
            })
            .collect();
        Arc::new_cyclic(|me| Self {
            tasks,
            records: RwLock::new(records),
            me: me.clone(),
        })
    }

    fn strong(&self) -> Arc<Self> {
        self.me.upgrade().expect("scheduler dropped while in use")
    }

    pub fn list(&self) -> Vec<TaskRecord> {
        let records = self.records.read().unwrap();
        let mut list: Vec<TaskRecord> = records.values().cloned().collect();
        list.sort_by_key(|r| r.id);
        list
    }

    /// Start the ticker loop on a background task.
    pub fn start(&self) {
        let scheduler = self.strong();
        tokio::spawn(async move {
            tracing::info!("Task scheduler started with {} tasks", scheduler.tasks.len());
            let mut ticker = tokio::time::interval(TICK_INTERVAL);
            loop {
                ticker.tick().await;
                let now = Utc::now();
                let due: Vec<&'static str> = {
                    let records = scheduler.records.read().unwrap();
                    records
                        .values()
                        .filter(|r| {
                            r.status != TaskStatus::Running
                                && r.next_run_at.map_or(false, |next| next <= now)
                        })
                        .map(|r| r.id)
                        .collect()
                };
                for id in due {
                    scheduler.execute_task_now(id);
                }
            }
        });
    }

    /// Start a task asynchronously without waiting for it. Returns false
    /// when the task is unknown or already running (the duplicate is
    /// dropped).
    pub fn execute_task_now(&self, id: &str) -> bool {
        let Some(task) = self.tasks.iter().find(|t| t.id() == id).cloned() else {
            return false;
        };

        {
            let mut records = self.records.write().unwrap();
            let record = records.get_mut(task.id()).expect("record exists per task");
            if record.status == TaskStatus::Running {
                tracing::debug!("Task '{}' already running, dropping trigger", id);
                return false;
            }
            record.status = TaskStatus::Running;
        }

        let scheduler = self.strong();
        tokio::spawn(async move {
            tracing::info!("Task '{}' started", task.id());
            // Nothing may escape a scheduled task, panics included.
            let outcome = std::panic::AssertUnwindSafe(task.run()).catch_unwind().await;

            let now = Utc::now();
            let interval = task.interval_minutes();
            let mut records = scheduler.records.write().unwrap();
            let record = records.get_mut(task.id()).expect("record exists per task");
            record.last_run_at = Some(now);
            record.interval_minutes = interval;
            record.next_run_at = Some(next_run_after(now, interval));

            match outcome {
                Ok(Ok(summary)) => {
                    record.status = TaskStatus::Success;
                    record.last_error = None;
                    tracing::info!("Task '{}' finished: {}", task.id(), summary);
                }
                Ok(Err(e)) => {
                    record.status = TaskStatus::Error;
                    record.last_error = Some(e.to_string());
                    tracing::error!("Task '{}' failed: {}", task.id(), e);
                }
                Err(panic) => {
                    let message = panic
                        .downcast_ref::<&str>()
                        .map(|s| s.to_string())
                        .or_else(|| panic.downcast_ref::<String>().cloned())
                        .unwrap_or_else(|| "task panicked".to_string());
                    record.status = TaskStatus::Error;
                    record.last_error = Some(message.clone());
                    tracing::error!("Task '{}' panicked: {}", task.id(), message);
                }
            }
        });
        true
    }
}

/// Compute the next trigger after `now` for an interval in minutes:
/// under an hour, every N minutes; under a day, every ⌊N/60⌋ hours on the
/// hour; under a week, every ⌊N/1440⌋ days at 00:00; otherwise monthly at
/// 02:00.
pub fn next_run_after(now: DateTime<Utc>, interval_minutes: u64) -> DateTime<Utc> {
    let m = interval_minutes.max(1);
    if m < 60 {
        now + chrono::Duration::minutes(m as i64)
    } else if m < 24 * 60 {
        let hours = (m / 60) as i64;
        let on_the_hour = now
            .with_minute(0)
            .and_then(|d| d.with_second(0))
            .and_then(|d| d.with_nanosecond(0))
            .unwrap_or(now);
        on_the_hour + chrono::Duration::hours(hours)
    } else if m < 7 * 24 * 60 {
        let days = (m / (24 * 60)) as i64;
        let midnight = Utc
            .with_ymd_and_hms(now.year(), now.month(), now.day(), 0, 0, 0)
            .single()
            .unwrap_or(now);
        midnight + chrono::Duration::days(days)
    } else {
        let (year, month) = if now.month() == 12 {
            (now.year() + 1, 1)
        } else {
            (now.year(), now.month() + 1)
        };
        Utc.with_ymd_and_hms(year, month, 1, 2, 0, 0)
            .single()
            .unwrap_or(now + chrono::Duration::days(30))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn at(s: &str) -> DateTime<Utc> {
        s.parse().unwrap()
    }

    #[test]
    fn minute_intervals_add_directly() {
        let now = at("2025-03-10T10:17:30Z");
        assert_eq!(next_run_after(now, 30), at("2025-03-10T10:47:30Z"));
    }

    #[test]
    fn hour_intervals_land_on_the_hour() {
        let now = at("2025-03-10T10:17:30Z");
        assert_eq!(next_run_after(now, 120), at("2025-03-10T12:00:00Z"));
        assert_eq!(next_run_after(now, 90), at("2025-03-10T11:00:00Z"));
    }

    #[test]
    fn day_intervals_land_at_midnight() {
        let now = at("2025-03-10T10:17:30Z");
        assert_eq!(next_run_after(now, 2 * 24 * 60), at("2025-03-12T00:00:00Z"));
    }

    #[test]
    fn week_or_more_becomes_monthly_at_two() {
        let now = at("2025-03-10T10:17:30Z");
        assert_eq!(next_run_after(now, 8 * 24 * 60), at("2025-04-01T02:00:00Z"));
        let december = at("2025-12-20T23:00:00Z");
        assert_eq!(
            next_run_after(december, 30 * 24 * 60),
            at("2026-01-01T02:00:00Z")
        );
    }

    struct CountingTask {
        runs: Arc<AtomicUsize>,
        fail: bool,
    }

    #[async_trait]
    impl Task for CountingTask {
        fn id(&self) -> &'static str {
            "counting"
        }
        fn name(&self) -> &'static str {
            "Counting"
        }
        fn description(&self) -> &'static str {
            "test task"
        }
        fn interval_minutes(&self) -> u64 {
            30
        }
        async fn run(&self) -> anyhow::Result<String> {
            self.runs.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(50)).await;
            if self.fail {
                anyhow::bail!("expected failure")
            }
            Ok("done".to_string())
        }
    }

    async fn wait_idle(scheduler: &Arc<TaskScheduler>) {
        for _ in 0..100 {
            if scheduler.list()[0].status != TaskStatus::Running {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("task never finished");
    }

    #[tokio::test]
    async fn manual_trigger_runs_and_records_success() {
        let runs = Arc::new(AtomicUsize::new(0));
        let scheduler = TaskScheduler::new(vec![Arc::new(CountingTask {
            runs: Arc::clone(&runs),
            fail: false,
        })]);

        assert!(scheduler.execute_task_now("counting"));
        wait_idle(&scheduler).await;

        let record = &scheduler.list()[0];
        assert_eq!(record.status, TaskStatus::Success);
        assert!(record.last_run_at.is_some());
        assert!(record.next_run_at.unwrap() > record.last_run_at.unwrap());
        assert_eq!(runs.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn duplicate_trigger_is_dropped_while_running() {
        let runs = Arc::new(AtomicUsize::new(0));
        let scheduler = TaskScheduler::new(vec![Arc::new(CountingTask {
            runs: Arc::clone(&runs),
            fail: false,
        })]);

        assert!(scheduler.execute_task_now("counting"));
        // Second trigger while the first still runs is dropped.
        assert!(!scheduler.execute_task_now("counting"));
        wait_idle(&scheduler).await;
        assert_eq!(runs.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn failures_are_recorded_not_propagated() {
        let scheduler = TaskScheduler::new(vec![Arc::new(CountingTask {
            runs: Arc::new(AtomicUsize::new(0)),
            fail: true,
        })]);
        scheduler.execute_task_now("counting");
        wait_idle(&scheduler).await;

        let record = &scheduler.list()[0];
        assert_eq!(record.status, TaskStatus::Error);
        assert_eq!(record.last_error.as_deref(), Some("expected failure"));
    }

    #[tokio::test]
    async fn unknown_task_is_rejected() {
        let scheduler = TaskScheduler::new(vec![]);
        assert!(!scheduler.execute_task_now("nope"));
    }
}
