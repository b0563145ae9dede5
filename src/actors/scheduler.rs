//! SchedulerActor - runs recurring jobs on their own timers
//!
//! Each registered job gets a task with an independent timer. Job ids are
//! stable: registering an id that is already running replaces that job.
//!
//! ```text
//! SchedulerHandle ──Register/Remove/List/Shutdown──▶ SchedulerActor
//!                                                     ├── collect_metrics   (every N s)
//!                                                     ├── check_alerts      (every M s)
//!                                                     └── clear_old_metrics (daily)
//! ```

use std::collections::HashMap;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::{DateTime, Days, NaiveTime, Utc};
use futures::FutureExt;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior, interval};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, instrument, trace, warn};

pub use super::messages::{Job, JobFuture, JobInfo, SchedulerCommand, ShutdownReport, Trigger};

pub const COLLECT_METRICS: &str = "collect_metrics";
pub const CHECK_ALERTS: &str = "check_alerts";
pub const CLEAR_OLD_METRICS: &str = "clear_old_metrics";

/// Next occurrence of `hour:minute` UTC strictly after `now`.
pub fn next_daily_run(now: DateTime<Utc>, hour: u32, minute: u32) -> DateTime<Utc> {
    let time = NaiveTime::from_hms_opt(hour.min(23), minute.min(59), 0).unwrap_or_default();
    let today = now.date_naive().and_time(time).and_utc();

    if today > now {
        today
    } else {
        today.checked_add_days(Days::new(1)).unwrap_or(today)
    }
}

struct RunningJob {
    trigger: Trigger,
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

pub struct SchedulerActor {
    command_rx: mpsc::Receiver<SchedulerCommand>,
    jobs: HashMap<String, RunningJob>,
    shutdown_timeout: Duration,
}

impl SchedulerActor {
    pub fn new(command_rx: mpsc::Receiver<SchedulerCommand>, shutdown_timeout: Duration) -> Self {
        Self {
            command_rx,
            jobs: HashMap::new(),
            shutdown_timeout,
        }
    }

    #[instrument(skip(self))]
    pub async fn run(mut self) {
        debug!("starting scheduler actor");

        while let Some(cmd) = self.command_rx.recv().await {
            trace!("received {cmd:?}");
            match cmd {
                SchedulerCommand::Register {
                    id,
                    trigger,
                    job,
                    respond_to,
                } => {
                    let replaced = self.register(id, trigger, job);
                    let _ = respond_to.send(replaced);
                }

                SchedulerCommand::Remove { id, respond_to } => {
                    let removed = match self.jobs.remove(&id) {
                        Some(running) => {
                            running.cancel.cancel();
                            running.handle.abort();
                            debug!("removed job {id}");
                            true
                        }
                        None => false,
                    };
                    let _ = respond_to.send(removed);
                }

                SchedulerCommand::List { respond_to } => {
                    let mut jobs: Vec<JobInfo> = self
                        .jobs
                        .iter()
                        .map(|(id, running)| JobInfo {
                            id: id.clone(),
                            trigger: running.trigger,
                            active: !running.handle.is_finished(),
                        })
                        .collect();
                    jobs.sort_by(|a, b| a.id.cmp(&b.id));
                    let _ = respond_to.send(jobs);
                }

                SchedulerCommand::Shutdown { respond_to } => {
                    let report = self.stop_all().await;
                    let _ = respond_to.send(report);
                    debug!("scheduler actor stopped");
                    return;
                }
            }
        }

        warn!("command channel closed, stopping all jobs");
        for (_, running) in self.jobs.drain() {
            running.handle.abort();
        }
    }

    fn register(&mut self, id: String, trigger: Trigger, job: Job) -> Result<bool> {
        trigger
            .validate()
            .with_context(|| format!("cannot schedule job {id} ({trigger})"))?;

        let replaced = match self.jobs.remove(&id) {
            Some(previous) => {
                previous.cancel.cancel();
                previous.handle.abort();
                true
            }
            None => false,
        };

        let cancel = CancellationToken::new();
        let handle = tokio::spawn(run_job(id.clone(), trigger, job, cancel.clone()));
        debug!("registered job {id} ({trigger})");

        self.jobs.insert(id, RunningJob { trigger, cancel, handle });
        Ok(replaced)
    }

    /// Cancel every job, wait for in-flight runs up to the shutdown
    /// timeout and abort the rest.
    async fn stop_all(&mut self) -> ShutdownReport {
        let deadline = Instant::now() + self.shutdown_timeout;
        let mut report = ShutdownReport::default();

        for running in self.jobs.values() {
            running.cancel.cancel();
        }

        let mut jobs: Vec<(String, RunningJob)> = self.jobs.drain().collect();
        jobs.sort_by(|a, b| a.0.cmp(&b.0));

        for (id, mut running) in jobs {
            match tokio::time::timeout_at(deadline, &mut running.handle).await {
                Ok(_) => report.stopped.push(id),
                Err(_) => {
                    warn!("job {id} did not stop in time, aborting");
                    running.handle.abort();
                    report.aborted.push(id);
                }
            }
        }

        report
    }
}

#[instrument(skip(trigger, job, cancel), fields(trigger = %trigger))]
async fn run_job(id: String, trigger: Trigger, job: Job, cancel: CancellationToken) {
    let mut ticker = match trigger {
        Trigger::Every(period) => {
            let mut ticker = interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            Some(ticker)
        }
        Trigger::DailyAt { .. } => None,
    };

    loop {
        let wait = async {
            match (&mut ticker, trigger) {
                (Some(ticker), _) => {
                    ticker.tick().await;
                }
                (None, Trigger::DailyAt { hour, minute }) => {
                    let now = Utc::now();
                    let delay = (next_daily_run(now, hour, minute) - now)
                        .to_std()
                        .unwrap_or_default();
                    tokio::time::sleep(delay).await;
                }
                (None, Trigger::Every(period)) => tokio::time::sleep(period).await,
            }
        };

        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = wait => {}
        }

        trace!("running job {id}");
        match AssertUnwindSafe(job()).catch_unwind().await {
            Ok(Ok(())) => trace!("job {id} finished"),
            Ok(Err(e)) => error!("job {id} failed: {e:#}"),
            Err(_) => error!("job {id} panicked"),
        }

        if cancel.is_cancelled() {
            break;
        }
    }

    debug!("job {id} stopped");
}

/// Handle for controlling the scheduler actor
#[derive(Clone)]
pub struct SchedulerHandle {
    sender: mpsc::Sender<SchedulerCommand>,
}

impl SchedulerHandle {
    /// Spawn the scheduler actor and return a handle to it.
    pub fn spawn(shutdown_timeout: Duration) -> Self {
        let (cmd_tx, cmd_rx) = mpsc::channel(32);
        let actor = SchedulerActor::new(cmd_rx, shutdown_timeout);

        tokio::spawn(actor.run());

        Self { sender: cmd_tx }
    }

    /// Start `job` under `id`. Returns `true` when a job with the same id
    /// was replaced. A trigger that can never fire is an error and leaves
    /// any existing job with that id running.
    pub async fn register<F, Fut>(&self, id: impl Into<String>, trigger: Trigger, job: F) -> Result<bool>
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<()>> + Send + 'static,
    {
        let job: Job = Arc::new(move || job().boxed());
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(SchedulerCommand::Register {
                id: id.into(),
                trigger,
                job,
                respond_to: tx,
            })
            .await
            .context("failed to send Register command")?;

        rx.await.context("failed to receive response")?
    }

    pub async fn remove(&self, id: impl Into<String>) -> Result<bool> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(SchedulerCommand::Remove {
                id: id.into(),
                respond_to: tx,
            })
            .await
            .context("failed to send Remove command")?;

        rx.await.context("failed to receive response")
    }

    pub async fn jobs(&self) -> Result<Vec<JobInfo>> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(SchedulerCommand::List { respond_to: tx })
            .await
            .context("failed to send List command")?;

        rx.await.context("failed to receive response")
    }

    /// Stop all jobs. Waits for in-flight runs up to the shutdown timeout.
    pub async fn shutdown(&self) -> Result<ShutdownReport> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(SchedulerCommand::Shutdown { respond_to: tx })
            .await
            .context("failed to send Shutdown command")?;

        rx.await.context("failed to receive response")
    }
}
