//! 后台任务执行
//!
//! `WORKER_ENABLED=false` 时任务在调用方内联执行；为 true 时进入有界队列，
//! 由固定数量的 worker 消费。两种模式执行的逻辑完全相同。

use crate::{
    config::Config,
    error::{AppError, Result},
    models::template::TemplateKind,
    services::{campaign::CampaignService, jobs::JobService, jobs::RecurringJob, schedule::ScheduleService},
};
use chrono::Utc;
use serde::Serialize;
use serde_json::Value;
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

/// 可排队的任务
#[derive(Debug, Clone, PartialEq)]
pub enum Task {
    SendCampaign { template_id: String },
    ExecuteSchedule { schedule_id: String },
    RunJob(RecurringJob),
    NotifyBooking { booking_id: String, kind: TemplateKind },
    NotifyAssessment { assessment_id: String },
    SendDirect {
        client_id: String,
        kind: TemplateKind,
        title: String,
        message: String,
    },
}

impl Task {
    pub fn name(&self) -> String {
        match self {
            Task::SendCampaign { template_id } => format!("send_campaign:{}", template_id),
            Task::ExecuteSchedule { schedule_id } => format!("execute_schedule:{}", schedule_id),
            Task::RunJob(job) => format!("job:{}", job),
            Task::NotifyBooking { booking_id, kind } => format!("{}:{}", kind, booking_id),
            Task::NotifyAssessment { assessment_id } => format!("assessment_ready:{}", assessment_id),
            Task::SendDirect { client_id, .. } => format!("direct:{}", client_id),
        }
    }
}

/// 提交结果：内联执行返回结果，排队返回 queued
#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum TaskStatus {
    Completed { result: Value },
    Queued { task: String },
}

/// 任务的实际执行者
#[derive(Clone)]
pub struct TaskExecutor {
    campaigns: CampaignService,
    schedules: ScheduleService,
    jobs: JobService,
}

impl TaskExecutor {
    pub fn new(campaigns: CampaignService, schedules: ScheduleService, jobs: JobService) -> Self {
        Self {
            campaigns,
            schedules,
            jobs,
        }
    }

    pub async fn execute(&self, task: Task) -> Result<Value> {
        match task {
            Task::SendCampaign { template_id } => {
                let template = self.campaigns.ensure_sendable(&template_id).await?;
                let report = self
                    .campaigns
                    .send_campaign(&template, None, Default::default())
                    .await?;
                Ok(serde_json::to_value(report)?)
            }
            Task::ExecuteSchedule { schedule_id } => {
                let schedule = self.schedules.run_claimed(&schedule_id).await?;
                Ok(serde_json::to_value(schedule)?)
            }
            Task::RunJob(job) => {
                let report = self.jobs.run(job, Utc::now()).await?;
                Ok(serde_json::to_value(report)?)
            }
            Task::NotifyBooking { booking_id, kind } => {
                let outcome = self.campaigns.notify_booking(&booking_id, kind).await?;
                Ok(serde_json::to_value(outcome)?)
            }
            Task::NotifyAssessment { assessment_id } => {
                let outcome = self.campaigns.notify_assessment(&assessment_id).await?;
                Ok(serde_json::to_value(outcome)?)
            }
            Task::SendDirect {
                client_id,
                kind,
                title,
                message,
            } => {
                let outcome = self
                    .campaigns
                    .send_direct(&client_id, kind, &title, &message)
                    .await?;
                Ok(serde_json::to_value(outcome)?)
            }
        }
    }
}

/// 任务入口：按配置内联执行或投递到 worker 队列
#[derive(Clone)]
pub struct TaskRunner {
    executor: Arc<TaskExecutor>,
    queue: Option<mpsc::Sender<Task>>,
    cancel: CancellationToken,
    workers: Arc<Mutex<Vec<JoinHandle<()>>>>,
}

impl TaskRunner {
    /// 内联模式
    pub fn inline(executor: TaskExecutor) -> Self {
        Self {
            executor: Arc::new(executor),
            queue: None,
            cancel: CancellationToken::new(),
            workers: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// 后台模式：启动 `concurrency` 个 worker；取消令牌触发后不再接收任务，
    /// worker 执行完队列中剩余的任务后退出
    pub fn spawn_workers(executor: TaskExecutor, concurrency: usize, queue_size: usize, cancel: CancellationToken) -> Self {
        let executor = Arc::new(executor);
        let (tx, rx) = mpsc::channel::<Task>(queue_size.max(1));
        let rx = Arc::new(Mutex::new(rx));

        let handles = (0..concurrency.max(1))
            .map(|worker_id| {
                let executor = executor.clone();
                let rx = rx.clone();
                let cancel = cancel.clone();
                tokio::spawn(async move {
                    run_worker(worker_id, executor, rx, cancel).await;
                })
            })
            .collect::<Vec<_>>();

        info!("Started {} notification workers", handles.len());
        Self {
            executor,
            queue: Some(tx),
            cancel,
            workers: Arc::new(Mutex::new(handles)),
        }
    }

    pub fn from_config(config: &Config, executor: TaskExecutor, cancel: CancellationToken) -> Self {
        if config.worker_enabled {
            Self::spawn_workers(executor, config.worker_concurrency, config.worker_queue_size, cancel)
        } else {
            Self::inline(executor)
        }
    }

    pub fn is_background(&self) -> bool {
        self.queue.is_some()
    }

    pub async fn submit(&self, task: Task) -> Result<TaskStatus> {
        match &self.queue {
            None => {
                debug!("Running task {} inline", task.name());
                let result = self.executor.execute(task).await?;
                Ok(TaskStatus::Completed { result })
            }
            Some(queue) => {
                if self.cancel.is_cancelled() {
                    return Err(AppError::ServiceUnavailable(
                        "Task workers are shutting down".to_string(),
                    ));
                }
                let name = task.name();
                queue.try_send(task).map_err(|e| match e {
                    mpsc::error::TrySendError::Full(_) => {
                        AppError::ServiceUnavailable("Task queue is full, try again later".to_string())
                    }
                    mpsc::error::TrySendError::Closed(_) => {
                        AppError::ServiceUnavailable("Task workers are shutting down".to_string())
                    }
                })?;
                debug!("Queued task {}", name);
                Ok(TaskStatus::Queued { task: name })
            }
        }
    }

    /// 停止接收任务并等待 worker 处理完队列
    pub async fn shutdown(&self) {
        self.cancel.cancel();
        let handles = std::mem::take(&mut *self.workers.lock().await);
        if handles.is_empty() {
            return;
        }

        info!("Waiting for {} workers to drain the task queue", handles.len());
        for handle in handles {
            if let Err(e) = handle.await {
                error!("Worker terminated abnormally: {}", e);
            }
        }
    }
}

async fn run_worker(
    worker_id: usize,
    executor: Arc<TaskExecutor>,
    rx: Arc<Mutex<mpsc::Receiver<Task>>>,
    cancel: CancellationToken,
) {
    loop {
        let task = tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                drain(worker_id, &executor, &rx).await;
                debug!(worker_id, "Worker stopping");
                break;
            }
            task = async { rx.lock().await.recv().await } => task,
        };

        match task {
            Some(task) => run_task(worker_id, &executor, task).await,
            None => break,
        }
    }
}

/// 取消后执行队列中已有的任务
async fn drain(worker_id: usize, executor: &TaskExecutor, rx: &Mutex<mpsc::Receiver<Task>>) {
    loop {
        let next = rx.lock().await.try_recv();
        match next {
            Ok(task) => run_task(worker_id, executor, task).await,
            Err(_) => break,
        }
    }
}

async fn run_task(worker_id: usize, executor: &TaskExecutor, task: Task) {
    let name = task.name();
    match executor.execute(task).await {
        Ok(result) => info!(worker_id, task = %name, result = %result, "Task finished"),
        Err(e) => error!(worker_id, task = %name, "Task failed: {}", e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::template::CreateTemplateRequest;
    use crate::services::campaign::harness::{build, CampaignHarness};

    async fn executor(h: &CampaignHarness) -> TaskExecutor {
        let config = Config::default();
        let schedules = ScheduleService::new(h.db.clone(), h.templates.clone(), h.campaigns.clone())
            .await
            .unwrap();
        let jobs = JobService::new(
            &config,
            h.roster.clone(),
            h.templates.clone(),
            h.preferences.clone(),
            h.log.clone(),
            h.dispatch.clone(),
        );
        TaskExecutor::new(h.campaigns.clone(), schedules, jobs)
    }

    #[tokio::test]
    async fn test_inline_runner_returns_result() {
        let h = build().await;
        let runner = TaskRunner::inline(executor(&h).await);
        assert!(!runner.is_background());

        let status = runner
            .submit(Task::RunJob(RecurringJob::CleanupNotifications))
            .await
            .unwrap();
        match status {
            TaskStatus::Completed { result } => assert_eq!(result["job"], "cleanup_notifications"),
            other => panic!("unexpected status {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_inline_errors_reach_caller() {
        let h = build().await;
        let runner = TaskRunner::inline(executor(&h).await);
        let result = runner
            .submit(Task::SendCampaign {
                template_id: "missing".to_string(),
            })
            .await;
        assert!(matches!(result, Err(AppError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_background_runner_processes_queue() {
        let h = build().await;
        h.roster
            .create_client(crate::models::client::CreateClientRequest {
                id: Some("a".to_string()),
                first_name: "A".to_string(),
                last_name: None,
                username: "a".to_string(),
                email: "a@example.com".to_string(),
                phone: None,
                is_active: None,
            })
            .await
            .unwrap();
        let template = h
            .templates
            .create(CreateTemplateRequest {
                name: "Camp".to_string(),
                kind: TemplateKind::CustomCampaign,
                description: None,
                email_subject: "Camp".to_string(),
                email_body_html: String::new(),
                email_body_text: "Join".to_string(),
                sms_body: None,
                target_filters: None,
                is_active: Some(true),
            })
            .await
            .unwrap();

        let cancel = CancellationToken::new();
        let runner = TaskRunner::spawn_workers(executor(&h).await, 2, 8, cancel.clone());
        let status = runner
            .submit(Task::SendCampaign {
                template_id: template.id.clone(),
            })
            .await
            .unwrap();
        assert!(matches!(status, TaskStatus::Queued { .. }));

        for _ in 0..50 {
            if h.email.sent_count() == 1 {
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        }
        assert_eq!(h.email.sent_count(), 1);
        cancel.cancel();
    }

    #[tokio::test]
    async fn test_shutdown_drains_queued_tasks() {
        let h = build().await;
        for id in ["a", "b"] {
            h.roster
                .create_client(crate::models::client::CreateClientRequest {
                    id: Some(id.to_string()),
                    first_name: id.to_uppercase(),
                    last_name: None,
                    username: id.to_string(),
                    email: format!("{}@example.com", id),
                    phone: None,
                    is_active: None,
                })
                .await
                .unwrap();
        }

        let cancel = CancellationToken::new();
        let runner = TaskRunner::spawn_workers(executor(&h).await, 1, 8, cancel.clone());
        for client_id in ["a", "b", "a"] {
            runner
                .submit(Task::SendDirect {
                    client_id: client_id.to_string(),
                    kind: TemplateKind::Promotional,
                    title: "Court closed".to_string(),
                    message: "Court 2 is closed today".to_string(),
                })
                .await
                .unwrap();
        }

        cancel.cancel();
        runner.shutdown().await;
        assert_eq!(h.email.sent_count(), 3);

        let rejected = runner
            .submit(Task::RunJob(RecurringJob::CleanupNotifications))
            .await;
        assert!(matches!(rejected, Err(AppError::ServiceUnavailable(_))));
    }
}
