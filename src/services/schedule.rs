use crate::{
    error::{AppError, Result},
    models::{notification::NotificationRefs, schedule::*},
    services::{
        campaign::{CampaignReport, CampaignService},
        template::TemplateService,
        Database,
    },
};
use chrono::{DateTime, Utc};
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::{debug, error, info, warn};
use uuid::Uuid;
use validator::Validate;

pub const SCHEDULE_TABLE: &str = "notification_schedule";

/// 定时投放：创建、取消、认领与执行
#[derive(Clone)]
pub struct ScheduleService {
    db: Arc<Database>,
    templates: TemplateService,
    campaigns: CampaignService,
}

impl ScheduleService {
    pub async fn new(db: Arc<Database>, templates: TemplateService, campaigns: CampaignService) -> Result<Self> {
        Ok(Self {
            db,
            templates,
            campaigns,
        })
    }

    pub async fn create(
        &self,
        request: CreateScheduleRequest,
        created_by: Option<String>,
    ) -> Result<NotificationSchedule> {
        request.validate()?;

        if request.scheduled_at <= Utc::now() {
            return Err(AppError::validation("scheduled_at must be in the future"));
        }
        self.templates.get(&request.template_id).await?;

        let schedule = NotificationSchedule {
            id: Uuid::new_v4().to_string(),
            name: request.name,
            template_id: request.template_id,
            scheduled_at: request.scheduled_at,
            status: ScheduleStatus::Pending,
            target_filters: request.target_filters,
            recipients_count: 0,
            sent_count: 0,
            failed_count: 0,
            created_by,
            created_at: Utc::now(),
            executed_at: None,
            completed_at: None,
            error: None,
        };

        info!("Schedule {} created for {}", schedule.name, schedule.scheduled_at);
        self.db.create(SCHEDULE_TABLE, &schedule.id, schedule.clone()).await
    }

    pub async fn get(&self, schedule_id: &str) -> Result<NotificationSchedule> {
        self.db
            .get_by_id(SCHEDULE_TABLE, schedule_id)
            .await?
            .ok_or_else(|| AppError::not_found("Schedule"))
    }

    pub async fn list(&self) -> Result<Vec<NotificationSchedule>> {
        let mut schedules: Vec<NotificationSchedule> = self.db.select_all(SCHEDULE_TABLE).await?;
        schedules.sort_by(|a, b| b.scheduled_at.cmp(&a.scheduled_at));
        Ok(schedules)
    }

    /// 只有 pending 状态可以取消；状态判断与写入在同一条语句里完成
    pub async fn cancel(&self, schedule_id: &str) -> Result<NotificationSchedule> {
        let updated = self
            .transition(schedule_id, ScheduleStatus::Pending, "status = 'cancelled'", json!({}))
            .await?;
        if !updated {
            let schedule = self.get(schedule_id).await?;
            return Err(AppError::Conflict(format!(
                "Only pending schedules can be cancelled (status: {:?})",
                schedule.status
            )));
        }

        info!("Schedule {} cancelled", schedule_id);
        self.get(schedule_id).await
    }

    /// 批量取消，跳过非 pending 的条目，返回取消数量
    pub async fn cancel_many(&self, ids: &[String]) -> Result<usize> {
        let mut cancelled = 0;
        for id in ids {
            match self.cancel(id).await {
                Ok(_) => cancelled += 1,
                Err(AppError::Conflict(_)) | Err(AppError::NotFound(_)) => {
                    debug!("Skipping schedule {} during bulk cancel", id)
                }
                Err(e) => return Err(e),
            }
        }
        Ok(cancelled)
    }

    /// 条件更新：仅当当前状态为 `from` 时执行 `assignments`，返回是否命中
    async fn transition(
        &self,
        schedule_id: &str,
        from: ScheduleStatus,
        assignments: &str,
        mut params: Value,
    ) -> Result<bool> {
        if let Value::Object(map) = &mut params {
            map.insert("table".to_string(), Value::from(SCHEDULE_TABLE));
            map.insert("id".to_string(), Value::from(schedule_id));
            map.insert("from".to_string(), serde_json::to_value(from)?);
        }
        let query = format!(
            "UPDATE type::thing($table, $id) SET {} WHERE status = $from RETURN AFTER",
            assignments
        );
        let mut response = self.db.query_with_params(&query, params).await?;
        let updated: Vec<Value> = response.take(0)?;
        Ok(!updated.is_empty())
    }

    /// pending → executing，同一条只会成功一次
    pub async fn claim(&self, schedule_id: &str) -> Result<bool> {
        self.transition(
            schedule_id,
            ScheduleStatus::Pending,
            "status = 'executing', executed_at = $now",
            json!({ "now": Utc::now() }),
        )
        .await
    }

    /// 认领后未能排队时退回 pending，等待下一次轮询
    pub async fn release(&self, schedule_id: &str) -> Result<bool> {
        let released = self
            .transition(
                schedule_id,
                ScheduleStatus::Executing,
                "status = 'pending', executed_at = NULL",
                json!({}),
            )
            .await?;
        if released {
            warn!("Schedule {} released back to pending", schedule_id);
        }
        Ok(released)
    }

    /// 认领所有已到期的 pending 定时投放
    pub async fn claim_due(&self, now: DateTime<Utc>) -> Result<Vec<String>> {
        let pending: Vec<NotificationSchedule> = self
            .db
            .find_by(SCHEDULE_TABLE, "status", ScheduleStatus::Pending)
            .await?;

        let mut claimed = Vec::new();
        for schedule in pending.into_iter().filter(|s| s.is_due(now)) {
            if self.claim(&schedule.id).await? {
                claimed.push(schedule.id);
            }
        }
        Ok(claimed)
    }

    /// 仍处于 executing 的定时投放（上次进程退出时未完成）
    pub async fn stalled(&self) -> Result<Vec<String>> {
        let executing: Vec<NotificationSchedule> = self
            .db
            .find_by(SCHEDULE_TABLE, "status", ScheduleStatus::Executing)
            .await?;
        Ok(executing.into_iter().map(|s| s.id).collect())
    }

    /// 管理端 "Execute Now"：立即认领，执行交给调用方排队
    pub async fn claim_now(&self, schedule_id: &str) -> Result<NotificationSchedule> {
        let schedule = self.get(schedule_id).await?;
        if schedule.status != ScheduleStatus::Pending {
            return Err(AppError::Conflict(format!(
                "Only pending schedules can be executed (status: {:?})",
                schedule.status
            )));
        }
        self.campaigns.check_channels()?;

        if !self.claim(schedule_id).await? {
            return Err(AppError::conflict("Schedule was claimed by another run"));
        }
        self.get(schedule_id).await
    }

    /// executing → 终态，写回计数；行已不在 executing 时返回冲突
    async fn finish(
        &self,
        schedule_id: &str,
        status: ScheduleStatus,
        report: Option<&CampaignReport>,
        error: Option<String>,
    ) -> Result<NotificationSchedule> {
        let (recipients, sent, failed) = report
            .map(|r| (r.recipients, r.outcome.sent, r.outcome.failed))
            .unwrap_or_default();

        let finished = self
            .transition(
                schedule_id,
                ScheduleStatus::Executing,
                "status = $status, recipients_count = $recipients, sent_count = $sent, \
                 failed_count = $failed, completed_at = $now, error = $error",
                json!({
                    "status": status,
                    "recipients": recipients,
                    "sent": sent,
                    "failed": failed,
                    "now": Utc::now(),
                    "error": error,
                }),
            )
            .await?;
        if !finished {
            return Err(AppError::Conflict(format!(
                "Schedule {} is no longer executing",
                schedule_id
            )));
        }
        self.get(schedule_id).await
    }

    /// 执行已认领的定时投放，写回计数并标记完成；出错时标记 failed
    pub async fn run_claimed(&self, schedule_id: &str) -> Result<NotificationSchedule> {
        let schedule = self.get(schedule_id).await?;
        if schedule.status != ScheduleStatus::Executing {
            return Err(AppError::Conflict(format!(
                "Schedule {} has not been claimed for execution",
                schedule_id
            )));
        }

        let template = match self.templates.get(&schedule.template_id).await {
            Ok(template) => template,
            Err(AppError::NotFound(_)) => {
                error!(
                    "Template {} for schedule {} no longer exists, cancelling",
                    schedule.template_id, schedule_id
                );
                return self
                    .finish(
                        schedule_id,
                        ScheduleStatus::Cancelled,
                        None,
                        Some("Template no longer exists".to_string()),
                    )
                    .await;
            }
            Err(e) => return Err(self.fail(schedule_id, e).await),
        };

        let report = match self
            .campaigns
            .send_campaign(
                &template,
                schedule.target_filters.as_ref(),
                NotificationRefs::schedule(schedule_id),
            )
            .await
        {
            Ok(report) => report,
            Err(e) => return Err(self.fail(schedule_id, e).await),
        };

        info!(
            "Schedule {} completed: {} recipients, {} sent, {} failed",
            schedule.name, report.recipients, report.outcome.sent, report.outcome.failed
        );
        self.finish(schedule_id, ScheduleStatus::Completed, Some(&report), None)
            .await
    }

    /// 标记 failed 并返回原始错误
    async fn fail(&self, schedule_id: &str, err: AppError) -> AppError {
        error!("Schedule {} failed: {}", schedule_id, err);
        if let Err(e) = self
            .finish(schedule_id, ScheduleStatus::Failed, None, Some(err.to_string()))
            .await
        {
            error!("Failed to record failure of schedule {}: {}", schedule_id, e);
        }
        err
    }
}
