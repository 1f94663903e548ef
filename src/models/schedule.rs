use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use validator::Validate;

use super::template::TargetFilter;

/// 定时投放状态
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ScheduleStatus {
    Pending,
    Executing,
    Completed,
    Cancelled,
    /// 执行出错，不会再自动重试
    Failed,
}

impl ScheduleStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            ScheduleStatus::Completed | ScheduleStatus::Cancelled | ScheduleStatus::Failed
        )
    }
}

/// 管理员设定的一次性定时投放
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct NotificationSchedule {
    pub id: String,
    pub name: String,
    pub template_id: String,
    pub scheduled_at: DateTime<Utc>,
    pub status: ScheduleStatus,
    /// 覆盖模板自带的定向条件
    #[serde(default)]
    pub target_filters: Option<TargetFilter>,
    #[serde(default)]
    pub recipients_count: u32,
    #[serde(default)]
    pub sent_count: u32,
    #[serde(default)]
    pub failed_count: u32,
    pub created_by: Option<String>,
    pub created_at: DateTime<Utc>,
    pub executed_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub error: Option<String>,
}

impl NotificationSchedule {
    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        self.status == ScheduleStatus::Pending && self.scheduled_at <= now
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct CreateScheduleRequest {
    #[validate(length(min = 1, max = 100, message = "Schedule name must be 1-100 characters"))]
    pub name: String,

    #[validate(length(min = 1, message = "template_id is required"))]
    pub template_id: String,

    pub scheduled_at: DateTime<Utc>,

    pub target_filters: Option<TargetFilter>,
}

/// 批量取消请求
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CancelSchedulesRequest {
    pub ids: Vec<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn test_is_due_only_for_pending() {
        let now = Utc::now();
        let mut schedule = NotificationSchedule {
            id: "s1".to_string(),
            name: "Spring camp".to_string(),
            template_id: "t1".to_string(),
            scheduled_at: now - Duration::minutes(1),
            status: ScheduleStatus::Pending,
            target_filters: None,
            recipients_count: 0,
            sent_count: 0,
            failed_count: 0,
            created_by: None,
            created_at: now,
            executed_at: None,
            completed_at: None,
            error: None,
        };
        assert!(schedule.is_due(now));
        assert!(!schedule.status.is_terminal());

        schedule.status = ScheduleStatus::Cancelled;
        assert!(!schedule.is_due(now));
        assert!(schedule.status.is_terminal());
        assert!(ScheduleStatus::Failed.is_terminal());
        assert!(!ScheduleStatus::Executing.is_terminal());

        schedule.status = ScheduleStatus::Pending;
        schedule.scheduled_at = now + Duration::hours(1);
        assert!(!schedule.is_due(now));
    }
}
