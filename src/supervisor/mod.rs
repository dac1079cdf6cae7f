//! Background supervisor: periodic jobs on a cron scheduler.
//!
//! Every job runs on its own schedule and swallows its own errors, so one
//! failing pass never blocks the others. Tests skip the scheduler and call
//! [`Supervisor::run_once`].

use std::sync::Arc;

use anyhow::Context;
use tokio_cron_scheduler::{Job, JobScheduler};
use tracing::{error, info};

mod tasks;

pub use tasks::Jobs;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Task {
    StallDetector,
    ExpirationWatchdog,
    RadiusEscalation,
    HeartbeatPing,
}

impl Task {
    pub const ALL: [Task; 4] = [
        Task::StallDetector,
        Task::ExpirationWatchdog,
        Task::RadiusEscalation,
        Task::HeartbeatPing,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            Task::StallDetector => "stall_detector",
            Task::ExpirationWatchdog => "expiration_watchdog",
            Task::RadiusEscalation => "radius_escalation",
            Task::HeartbeatPing => "heartbeat_ping",
        }
    }

    /// Cron expression, seconds first.
    pub fn schedule(&self) -> &'static str {
        match self {
            Task::StallDetector => "0 */5 * * * *",
            Task::ExpirationWatchdog => "0 */15 * * * *",
            Task::RadiusEscalation => "0 */2 * * * *",
            Task::HeartbeatPing => "0 */14 * * * *",
        }
    }
}

pub struct Supervisor {
    jobs: Arc<Jobs>,
    scheduler: Option<JobScheduler>,
}

impl Supervisor {
    pub fn new(jobs: Jobs) -> Self {
        Self {
            jobs: Arc::new(jobs),
            scheduler: None,
        }
    }

    /// Register every task and start ticking.
    pub async fn start(&mut self) -> anyhow::Result<()> {
        if self.scheduler.is_some() {
            return Ok(());
        }
        let scheduler = JobScheduler::new()
            .await
            .context("failed to create scheduler")?;

        for task in Task::ALL {
            let jobs = Arc::clone(&self.jobs);
            let job = Job::new_async(task.schedule(), move |_uuid, _lock| {
                let jobs = Arc::clone(&jobs);
                Box::pin(async move {
                    if let Err(e) = jobs.run(task).await {
                        error!(task = task.name(), error = %e, "supervisor task failed");
                    }
                })
            })
            .with_context(|| format!("failed to create {} schedule", task.name()))?;
            scheduler
                .add(job)
                .await
                .with_context(|| format!("failed to add {} schedule", task.name()))?;
            info!("Registered: {} ({})", task.name(), task.schedule());
        }

        scheduler.start().await.context("failed to start scheduler")?;
        info!("supervisor started");
        self.scheduler = Some(scheduler);
        Ok(())
    }

    pub async fn shutdown(&mut self) -> anyhow::Result<()> {
        if let Some(mut scheduler) = self.scheduler.take() {
            scheduler
                .shutdown()
                .await
                .context("failed to shut down scheduler")?;
            info!("supervisor shut down");
        }
        Ok(())
    }

    /// One pass of `task`, returning how many records it acted on.
    pub async fn run_once(&self, task: Task) -> anyhow::Result<usize> {
        Ok(self.jobs.run(task).await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn schedules_parse_as_six_field_cron() {
        for task in Task::ALL {
            assert_eq!(task.schedule().split_whitespace().count(), 6, "{}", task.name());
        }
    }

    #[tokio::test]
    async fn ping_without_public_url_is_a_no_op() {
        let h = crate::testutil::Harness::new();
        let supervisor = Supervisor::new(Jobs::for_harness(&h));
        assert_eq!(supervisor.run_once(Task::HeartbeatPing).await.unwrap(), 0);
    }
}
