//! Background workers of the monitoring hub
//!
//! ```text
//!                 ┌──────────────────┐
//!                 │  SchedulerActor  │  command channel (SchedulerHandle)
//!                 └────────┬─────────┘
//!          ┌───────────────┼──────────────────┐
//!          │               │                  │
//!  collect_metrics    check_alerts     clear_old_metrics
//!          │               │                  │
//!  MetricsCollector  AlertEvaluator     MetricsSink::prune_before
//!          │               │
//!   (SystemProbe)    (Dispatcher)
//! ```
//!
//! - **SchedulerActor**: owns the job timers, replaces jobs by id, stops
//!   them on shutdown
//! - **MetricsCollector**: polls every device with bounded parallelism
//! - **AlertEvaluator**: checks rules against the latest samples and
//!   dispatches notifications

pub mod alert;
pub mod collector;
pub mod messages;
pub mod scheduler;

pub use alert::{AlertEvaluator, RuleOutcome};
pub use collector::{MetricsCollector, PollOutcome};
pub use scheduler::{SchedulerHandle, Trigger};
