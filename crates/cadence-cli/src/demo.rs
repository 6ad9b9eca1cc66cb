//! Scripted scenarios exercising the scheduler end to end.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use cadence_core::{JobId, SchedulerSettings};
use cadence_scheduler::{
    JobDefinition, JobInstance, RecurrenceConfiguration, RetryPolicy, Scheduler,
};
use clap::Subcommand;
use tracing::info;

#[derive(Subcommand, Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scenario {
    /// One job that returns a greeting
    Hello,
    /// A long-running job cancelled mid-flight
    Cancel,
    /// A job repeated three times
    Repeat,
    /// A job that fails twice before succeeding under exponential backoff
    Retry,
    /// A repeating job whose third execution fails
    Fail,
}

pub async fn run(scenario: Scenario, settings: SchedulerSettings) -> anyhow::Result<Vec<JobInstance>> {
    let scheduler = Scheduler::in_memory()?.with_settings(settings);

    match scenario {
        Scenario::Hello => hello(&scheduler).await?,
        Scenario::Cancel => cancel(&scheduler).await?,
        Scenario::Repeat => repeat(&scheduler).await?,
        Scenario::Retry => retry(&scheduler).await?,
        Scenario::Fail => fail(&scheduler).await?,
    }

    Ok(scheduler.list_jobs()?)
}

async fn hello(scheduler: &Scheduler) -> anyhow::Result<()> {
    let id = JobId::generate();
    let handle = scheduler.schedule(JobDefinition::blocking(id, "Hello", || {
        Ok("Hello from a scheduled job".to_string())
    }))?;

    let greeting = handle.await_result::<String>().await?.into_result()?;
    info!(job_id = %handle.id(), %greeting, "hello finished");
    Ok(())
}

async fn cancel(scheduler: &Scheduler) -> anyhow::Result<()> {
    let handle = scheduler.schedule(JobDefinition::new("long-task", "Long task", |ctx| async move {
        // Cooperative: checks the token between units of work.
        for _ in 0..100 {
            if ctx.is_cancelled() {
                anyhow::bail!("stopped early");
            }
            tokio::time::sleep(Duration::from_millis(100)).await;
        }
        Ok(())
    }))?;

    tokio::time::sleep(Duration::from_millis(250)).await;
    let cancelled = scheduler.cancel_job(handle.id())?;
    handle.record().wait().await;
    info!(job_id = %handle.id(), cancelled, status = %handle.status(), "cancel finished");
    Ok(())
}

async fn repeat(scheduler: &Scheduler) -> anyhow::Result<()> {
    let definition = JobDefinition::new("heartbeat", "Heartbeat", |ctx| async move {
        Ok(format!("beat {}", ctx.execution + 1))
    })
    .with_recurrence(RecurrenceConfiguration::repeat(3, Duration::from_millis(200)));
    scheduler.schedule(definition)?;

    let last = scheduler.await_result::<String>("heartbeat").await?;
    info!(last = ?last.result, "repeat finished");
    Ok(())
}

async fn retry(scheduler: &Scheduler) -> anyhow::Result<()> {
    let calls = Arc::new(AtomicU32::new(0));
    let counter = Arc::clone(&calls);
    scheduler.schedule_job::<u32, _>(|job| {
        job.id("unreliable")
            .name("Unreliable")
            .retry_policy(RetryPolicy::exponential(
                4,
                Duration::from_millis(100),
                Duration::from_secs(1),
            ))
            .action(move |ctx| {
                let counter = Arc::clone(&counter);
                async move {
                    if counter.fetch_add(1, Ordering::SeqCst) < 2 {
                        anyhow::bail!("transient failure on attempt {}", ctx.attempt);
                    }
                    Ok(ctx.attempt)
                }
            })
    })?;

    let attempt = scheduler
        .await_result::<u32>("unreliable")
        .await?
        .into_result()?;
    info!(attempt, "retry finished");
    Ok(())
}

async fn fail(scheduler: &Scheduler) -> anyhow::Result<()> {
    let calls = Arc::new(AtomicU32::new(0));
    let counter = Arc::clone(&calls);
    let definition = JobDefinition::new("fragile", "Fragile", move |_| {
        let n = counter.fetch_add(1, Ordering::SeqCst) + 1;
        async move {
            if n == 3 {
                anyhow::bail!("execution {n} hit a bad record");
            }
            Ok(n)
        }
    })
    .with_recurrence(RecurrenceConfiguration::repeat(5, Duration::from_millis(100)));
    scheduler.schedule(definition)?;

    let last = scheduler.await_result::<u32>("fragile").await?;
    info!(status = %last.status, error = ?last.error, "fail finished");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use cadence_scheduler::JobStatus;

    async fn only_job(scenario: Scenario) -> JobInstance {
        let mut jobs = run(scenario, SchedulerSettings::default()).await.unwrap();
        assert_eq!(jobs.len(), 1);
        jobs.remove(0)
    }

    #[tokio::test]
    async fn hello_completes() {
        let job = only_job(Scenario::Hello).await;
        assert_eq!(job.status, JobStatus::Completed);
        assert_eq!(job.name, "Hello");
    }

    #[tokio::test]
    async fn cancel_ends_cancelled() {
        let job = only_job(Scenario::Cancel).await;
        assert_eq!(job.status, JobStatus::Cancelled);
    }

    #[tokio::test]
    async fn repeat_runs_three_times() {
        let job = only_job(Scenario::Repeat).await;
        assert_eq!(job.executions_completed, 3);
        assert_eq!(job.status, JobStatus::Completed);
    }

    #[tokio::test]
    async fn retry_recovers_in_one_execution() {
        let job = only_job(Scenario::Retry).await;
        assert_eq!(job.status, JobStatus::Completed);
        assert_eq!(job.executions_completed, 1);
    }

    #[tokio::test]
    async fn fail_stops_at_the_third_execution() {
        let job = only_job(Scenario::Fail).await;
        assert_eq!(job.status, JobStatus::Failed);
        assert_eq!(job.executions_completed, 3);
        assert!(job.last_error.unwrap().contains("bad record"));
    }
}
