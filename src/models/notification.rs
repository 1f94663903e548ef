use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use validator::Validate;

use super::template::TemplateKind;

/// 投递渠道
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum Channel {
    Email,
    Sms,
    Push,
}

impl std::fmt::Display for Channel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Channel::Email => f.write_str("email"),
            Channel::Sms => f.write_str("sms"),
            Channel::Push => f.write_str("push"),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum NotificationStatus {
    Pending,
    Sent,
    Failed,
    Read,
}

/// 通知日志：每次投递尝试一行
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Notification {
    pub id: String,
    pub client_id: String,
    pub template_id: Option<String>,
    pub kind: TemplateKind,
    pub channel: Channel,
    pub title: String,
    pub message: String,
    pub status: NotificationStatus,
    pub error: Option<String>,
    pub booking_id: Option<String>,
    pub package_id: Option<String>,
    pub event_id: Option<String>,
    pub schedule_id: Option<String>,
    #[serde(default)]
    pub assessment_id: Option<String>,
    pub sent_at: Option<DateTime<Utc>>,
    pub read_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl Notification {
    pub fn is_unread(&self) -> bool {
        self.status == NotificationStatus::Sent && self.read_at.is_none()
    }
}

/// 通知关联的业务对象
#[derive(Debug, Clone, Default, PartialEq)]
pub struct NotificationRefs {
    pub booking_id: Option<String>,
    pub package_id: Option<String>,
    pub event_id: Option<String>,
    pub schedule_id: Option<String>,
    pub assessment_id: Option<String>,
}

impl NotificationRefs {
    pub fn booking(id: &str) -> Self {
        Self {
            booking_id: Some(id.to_string()),
            ..Default::default()
        }
    }

    pub fn package(id: &str) -> Self {
        Self {
            package_id: Some(id.to_string()),
            ..Default::default()
        }
    }

    pub fn event(id: &str) -> Self {
        Self {
            event_id: Some(id.to_string()),
            ..Default::default()
        }
    }

    pub fn schedule(id: &str) -> Self {
        Self {
            schedule_id: Some(id.to_string()),
            ..Default::default()
        }
    }

    pub fn assessment(id: &str) -> Self {
        Self {
            assessment_id: Some(id.to_string()),
            ..Default::default()
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct NotificationHistoryQuery {
    pub page: Option<usize>,
    pub limit: Option<usize>,
    pub kind: Option<TemplateKind>,
}

/// 管理端直接发送给单个客户的通知
#[derive(Debug, Clone, Deserialize, Validate)]
pub struct SendDirectRequest {
    #[validate(length(min = 1, max = 200, message = "Title must be 1-200 characters"))]
    pub title: String,

    #[validate(length(min = 1, message = "Message is required"))]
    pub message: String,

    /// 默认按促销类偏好选择渠道
    pub kind: Option<TemplateKind>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_channel_serialization() {
        assert_eq!(serde_json::to_string(&Channel::Sms).unwrap(), "\"sms\"");
        assert_eq!(Channel::Push.to_string(), "push");
    }

    #[test]
    fn test_refs_constructors() {
        let refs = NotificationRefs::booking("b1");
        assert_eq!(refs.booking_id.as_deref(), Some("b1"));
        assert!(refs.package_id.is_none());
    }
}
