//! 周期任务与定时投放的轮询调度
//!
//! 每个轮询周期做两件事：触发上个周期以来到点的周期任务，认领已到期的定时投放。
//! 任务本身交给 [`TaskRunner`]，调度循环只负责决定"什么时候做什么"。

use crate::{
    error::{AppError, Result},
    services::{
        jobs::RecurringJob,
        schedule::ScheduleService,
        worker::{Task, TaskRunner},
    },
};
use chrono::{DateTime, Utc};
use cron::Schedule;
use std::{str::FromStr, time::Duration};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// cron crate 需要带秒的表达式，五段式前补 "0 "
pub fn parse_cron(expression: &str) -> Result<Schedule> {
    let full = if expression.split_whitespace().count() == 5 {
        format!("0 {}", expression)
    } else {
        expression.to_string()
    };
    Schedule::from_str(&full)
        .map_err(|e| AppError::Parse(format!("Invalid cron expression \"{}\": {}", expression, e)))
}

#[derive(Clone)]
pub struct Scheduler {
    schedules: ScheduleService,
    runner: TaskRunner,
    poll_interval: Duration,
    jobs: Vec<(RecurringJob, Schedule)>,
}

impl Scheduler {
    pub fn new(schedules: ScheduleService, runner: TaskRunner, poll_interval_secs: u64) -> Result<Self> {
        let jobs = RecurringJob::ALL
            .iter()
            .map(|job| Ok((*job, parse_cron(job.cron_expression())?)))
            .collect::<Result<Vec<_>>>()?;

        Ok(Self {
            schedules,
            runner,
            poll_interval: Duration::from_secs(poll_interval_secs.max(1)),
            jobs,
        })
    }

    /// `since` 之后、`now` 之前（含）有触发点的周期任务
    pub fn due_jobs(&self, since: DateTime<Utc>, now: DateTime<Utc>) -> Vec<RecurringJob> {
        self.jobs
            .iter()
            .filter(|(_, schedule)| matches!(schedule.after(&since).next(), Some(next) if next <= now))
            .map(|(job, _)| *job)
            .collect()
    }

    /// 执行一个轮询周期，返回提交的任务数
    pub async fn tick(&self, since: DateTime<Utc>, now: DateTime<Utc>) -> Result<usize> {
        let mut submitted = 0;

        for job in self.due_jobs(since, now) {
            info!("Recurring job {} is due", job);
            match self.runner.submit(Task::RunJob(job)).await {
                Ok(_) => submitted += 1,
                Err(e) => error!("Recurring job {} failed: {}", job, e),
            }
        }

        for schedule_id in self.schedules.claim_due(now).await? {
            info!("Schedule {} is due", schedule_id);
            match self
                .runner
                .submit(Task::ExecuteSchedule {
                    schedule_id: schedule_id.clone(),
                })
                .await
            {
                Ok(_) => submitted += 1,
                Err(e) => {
                    error!("Schedule {} failed: {}", schedule_id, e);
                    if let Err(e) = self.schedules.release(&schedule_id).await {
                        error!("Failed to release schedule {}: {}", schedule_id, e);
                    }
                }
            }
        }

        Ok(submitted)
    }

    /// 重新提交上次进程退出时仍在执行的定时投放，已通知的客户会被跳过
    pub async fn resume_stalled(&self) -> Result<usize> {
        let mut resumed = 0;
        for schedule_id in self.schedules.stalled().await? {
            warn!("Resuming schedule {} left executing by a previous run", schedule_id);
            match self
                .runner
                .submit(Task::ExecuteSchedule {
                    schedule_id: schedule_id.clone(),
                })
                .await
            {
                Ok(_) => resumed += 1,
                Err(e) => error!("Schedule {} failed to resume: {}", schedule_id, e),
            }
        }
        Ok(resumed)
    }

    pub fn start(self, cancel: CancellationToken) -> JoinHandle<()> {
        info!(
            "Scheduler started, polling every {}s",
            self.poll_interval.as_secs()
        );

        tokio::spawn(async move {
            match self.resume_stalled().await {
                Ok(0) => {}
                Ok(count) => info!("Resumed {} stalled schedules", count),
                Err(e) => error!("Failed to resume stalled schedules: {}", e),
            }

            let mut last_tick = Utc::now();
            let mut interval = tokio::time::interval(self.poll_interval);
            // 第一次 tick 立即返回
            interval.tick().await;

            loop {
                tokio::select! {
                    _ = cancel.cancelled() => {
                        info!("Scheduler stopping");
                        break;
                    }
                    _ = interval.tick() => {
                        let now = Utc::now();
                        match self.tick(last_tick, now).await {
                            Ok(count) => debug!("Scheduler tick submitted {} tasks", count),
                            Err(e) => error!("Scheduler tick error: {}", e),
                        }
                        last_tick = now;
                    }
                }
            }
        })
    }
}
