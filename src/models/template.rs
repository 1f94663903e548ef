use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use validator::Validate;

/// 模板类型，同时也是通知记录的类型
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum TemplateKind {
    BookingConfirmed,
    BookingReminder,
    BookingCancelled,
    WeeklyReminder,
    InactiveClient,
    PackageExpiring,
    PackageExhausted,
    AssessmentReady,
    UpcomingEvent,
    CustomCampaign,
    Promotional,
}

impl TemplateKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            TemplateKind::BookingConfirmed => "booking_confirmed",
            TemplateKind::BookingReminder => "booking_reminder",
            TemplateKind::BookingCancelled => "booking_cancelled",
            TemplateKind::WeeklyReminder => "weekly_reminder",
            TemplateKind::InactiveClient => "inactive_client",
            TemplateKind::PackageExpiring => "package_expiring",
            TemplateKind::PackageExhausted => "package_exhausted",
            TemplateKind::AssessmentReady => "assessment_ready",
            TemplateKind::UpcomingEvent => "upcoming_event",
            TemplateKind::CustomCampaign => "custom_campaign",
            TemplateKind::Promotional => "promotional",
        }
    }

    pub fn display_name(&self) -> &'static str {
        match self {
            TemplateKind::BookingConfirmed => "Booking Confirmed",
            TemplateKind::BookingReminder => "Booking Reminder",
            TemplateKind::BookingCancelled => "Booking Cancelled",
            TemplateKind::WeeklyReminder => "Weekly Session Reminder",
            TemplateKind::InactiveClient => "Inactive Client Re-engagement",
            TemplateKind::PackageExpiring => "Package Expiring Soon",
            TemplateKind::PackageExhausted => "Package Sessions Exhausted",
            TemplateKind::AssessmentReady => "Assessment Ready",
            TemplateKind::UpcomingEvent => "Upcoming Event",
            TemplateKind::CustomCampaign => "Custom Campaign",
            TemplateKind::Promotional => "Promotional",
        }
    }
}

impl std::fmt::Display for TemplateKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 定向条件（JSON）。未识别的键被忽略，`false`/`0` 等同于未设置
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct TargetFilter {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub has_active_package: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub inactive_weeks: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_sessions: Option<u32>,
}

impl TargetFilter {
    pub fn requires_active_package(&self) -> bool {
        self.has_active_package.unwrap_or(false)
    }

    pub fn inactive_weeks(&self) -> Option<u32> {
        self.inactive_weeks.filter(|w| *w > 0)
    }

    pub fn min_sessions(&self) -> Option<u32> {
        self.min_sessions.filter(|s| *s > 0)
    }

    pub fn is_empty(&self) -> bool {
        !self.requires_active_package()
            && self.inactive_weeks().is_none()
            && self.min_sessions().is_none()
    }
}

/// 可复用的通知模板
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct NotificationTemplate {
    pub id: String,
    pub name: String,
    pub kind: TemplateKind,
    #[serde(default)]
    pub description: String,
    pub email_subject: String,
    pub email_body_html: String,
    pub email_body_text: String,
    #[serde(default)]
    pub sms_body: String,
    #[serde(default)]
    pub target_filters: TargetFilter,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl NotificationTemplate {
    pub fn has_email(&self) -> bool {
        !self.email_subject.trim().is_empty()
    }

    pub fn has_sms(&self) -> bool {
        !self.sms_body.trim().is_empty()
    }

    /// 不落库的临时模板，用于直接发送标题和正文；ID 为空
    pub fn direct(kind: TemplateKind, title: &str, message: &str) -> Self {
        let now = Utc::now();
        Self {
            id: String::new(),
            name: format!("Direct {}", kind),
            kind,
            description: String::new(),
            email_subject: title.to_string(),
            email_body_html: String::new(),
            email_body_text: message.to_string(),
            sms_body: message.to_string(),
            target_filters: TargetFilter::default(),
            is_active: true,
            created_at: now,
            updated_at: now,
        }
    }

    /// 复制模板：新ID、名称加 "(Copy)"、默认停用
    pub fn duplicate(&self, new_id: String) -> Self {
        let now = Utc::now();
        Self {
            id: new_id,
            name: format!("{} (Copy)", self.name),
            is_active: false,
            created_at: now,
            updated_at: now,
            ..self.clone()
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct CreateTemplateRequest {
    #[validate(length(min = 1, max = 100, message = "Template name must be 1-100 characters"))]
    pub name: String,

    pub kind: TemplateKind,

    pub description: Option<String>,

    #[validate(length(max = 200, message = "Email subject must be at most 200 characters"))]
    pub email_subject: String,

    pub email_body_html: String,

    pub email_body_text: String,

    #[validate(length(max = 160, message = "SMS body is limited to 160 characters"))]
    pub sms_body: Option<String>,

    pub target_filters: Option<TargetFilter>,

    pub is_active: Option<bool>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, Validate)]
pub struct UpdateTemplateRequest {
    #[validate(length(min = 1, max = 100, message = "Template name must be 1-100 characters"))]
    pub name: Option<String>,

    pub kind: Option<TemplateKind>,

    pub description: Option<String>,

    #[validate(length(max = 200, message = "Email subject must be at most 200 characters"))]
    pub email_subject: Option<String>,

    pub email_body_html: Option<String>,

    pub email_body_text: Option<String>,

    #[validate(length(max = 160, message = "SMS body is limited to 160 characters"))]
    pub sms_body: Option<String>,

    pub target_filters: Option<TargetFilter>,

    pub is_active: Option<bool>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, Validate)]
pub struct TestEmailRequest {
    #[validate(email(message = "Invalid email address"))]
    pub to_email: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_target_filter_ignores_unknown_keys() {
        let filter: TargetFilter = serde_json::from_value(serde_json::json!({
            "inactive_weeks": 3,
            "has_package": true,
            "region": "north"
        }))
        .unwrap();

        assert_eq!(filter.inactive_weeks(), Some(3));
        assert!(!filter.requires_active_package());
        assert_eq!(filter.min_sessions(), None);
    }

    #[test]
    fn test_falsy_values_are_unset() {
        let filter: TargetFilter = serde_json::from_value(serde_json::json!({
            "has_active_package": false,
            "inactive_weeks": 0,
            "min_sessions": 0
        }))
        .unwrap();
        assert!(filter.is_empty());
    }

    #[test]
    fn test_template_kind_serialization() {
        let serialized = serde_json::to_string(&TemplateKind::InactiveClient).unwrap();
        assert_eq!(serialized, "\"inactive_client\"");
        assert_eq!(TemplateKind::UpcomingEvent.to_string(), "upcoming_event");
    }
}
