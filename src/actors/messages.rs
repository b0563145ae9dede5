//! Message types for the scheduler actor

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use futures::future::BoxFuture;
use serde::Serialize;
use tokio::sync::oneshot;

/// One run of a scheduled job.
pub type JobFuture = BoxFuture<'static, anyhow::Result<()>>;

/// A job body, called once per firing.
pub type Job = Arc<dyn Fn() -> JobFuture + Send + Sync>;

/// When a job fires.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Trigger {
    /// Fixed interval, first run immediately
    Every(Duration),
    /// Once a day at the given UTC time
    DailyAt { hour: u32, minute: u32 },
}

impl Trigger {
    /// A zero interval would spin forever, so it is rejected.
    pub fn validate(&self) -> anyhow::Result<()> {
        match self {
            Trigger::Every(period) if period.is_zero() => {
                anyhow::bail!("interval must be greater than zero")
            }
            Trigger::DailyAt { hour, minute } if *hour > 23 || *minute > 59 => {
                anyhow::bail!("invalid daily time {hour:02}:{minute:02}")
            }
            _ => Ok(()),
        }
    }
}

impl fmt::Display for Trigger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Trigger::Every(interval) => write!(f, "every {}s", interval.as_secs_f64()),
            Trigger::DailyAt { hour, minute } => write!(f, "daily at {hour:02}:{minute:02} UTC"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct JobInfo {
    pub id: String,
    pub trigger: Trigger,
    /// False once the job task has ended
    pub active: bool,
}

/// Jobs that finished within the shutdown timeout and those that had to
/// be aborted.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ShutdownReport {
    pub stopped: Vec<String>,
    pub aborted: Vec<String>,
}

pub enum SchedulerCommand {
    /// Start a job, replacing any job with the same id
    Register {
        id: String,
        trigger: Trigger,
        job: Job,
        /// `true` when an existing job was replaced, an error when the
        /// trigger can never fire
        respond_to: oneshot::Sender<anyhow::Result<bool>>,
    },

    Remove {
        id: String,
        respond_to: oneshot::Sender<bool>,
    },

    List {
        respond_to: oneshot::Sender<Vec<JobInfo>>,
    },

    /// Stop all jobs and exit the actor
    Shutdown {
        respond_to: oneshot::Sender<ShutdownReport>,
    },
}

impl fmt::Debug for SchedulerCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SchedulerCommand::Register { id, trigger, .. } => {
                write!(f, "Register({id}, {trigger})")
            }
            SchedulerCommand::Remove { id, .. } => write!(f, "Remove({id})"),
            SchedulerCommand::List { .. } => write!(f, "List"),
            SchedulerCommand::Shutdown { .. } => write!(f, "Shutdown"),
        }
    }
}
