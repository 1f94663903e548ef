use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use validator::Validate;

use super::template::TemplateKind;

/// 某类通知的投递方式
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum DeliveryMethod {
    #[default]
    Email,
    Sms,
    Both,
    None,
}

impl DeliveryMethod {
    pub fn wants_email(&self) -> bool {
        matches!(self, DeliveryMethod::Email | DeliveryMethod::Both)
    }

    pub fn wants_sms(&self) -> bool {
        matches!(self, DeliveryMethod::Sms | DeliveryMethod::Both)
    }

    pub fn is_none(&self) -> bool {
        matches!(self, DeliveryMethod::None)
    }
}

fn default_reminder_hours() -> i32 {
    24
}

fn default_true() -> bool {
    true
}

fn promotional_default() -> DeliveryMethod {
    DeliveryMethod::None
}

/// 客户通知偏好，以客户ID为主键
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct NotificationPreference {
    pub id: String,
    pub client_id: String,
    #[serde(default)]
    pub booking_confirmations: DeliveryMethod,
    #[serde(default)]
    pub booking_reminders: DeliveryMethod,
    #[serde(default)]
    pub booking_cancellations: DeliveryMethod,
    #[serde(default)]
    pub purchase_confirmations: DeliveryMethod,
    #[serde(default)]
    pub assessment_notifications: DeliveryMethod,
    #[serde(default = "promotional_default")]
    pub promotional_updates: DeliveryMethod,
    #[serde(default = "default_true")]
    pub push_enabled: bool,
    #[serde(default = "default_reminder_hours")]
    pub reminder_hours_before: i32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl NotificationPreference {
    pub fn new(client_id: &str) -> Self {
        let now = Utc::now();
        Self {
            id: client_id.to_string(),
            client_id: client_id.to_string(),
            booking_confirmations: DeliveryMethod::Email,
            booking_reminders: DeliveryMethod::Email,
            booking_cancellations: DeliveryMethod::Email,
            purchase_confirmations: DeliveryMethod::Email,
            assessment_notifications: DeliveryMethod::Email,
            promotional_updates: DeliveryMethod::None,
            push_enabled: true,
            reminder_hours_before: default_reminder_hours(),
            created_at: now,
            updated_at: now,
        }
    }

    /// 按模板类型选择投递方式；未映射的类型一律走邮件
    pub fn method_for(&self, kind: TemplateKind) -> DeliveryMethod {
        match kind {
            TemplateKind::BookingConfirmed => self.booking_confirmations,
            TemplateKind::BookingReminder => self.booking_reminders,
            TemplateKind::BookingCancelled => self.booking_cancellations,
            TemplateKind::AssessmentReady => self.assessment_notifications,
            TemplateKind::Promotional => self.promotional_updates,
            _ => DeliveryMethod::Email,
        }
    }

    pub fn apply(&mut self, update: UpdatePreferenceRequest) {
        if let Some(method) = update.booking_confirmations {
            self.booking_confirmations = method;
        }
        if let Some(method) = update.booking_reminders {
            self.booking_reminders = method;
        }
        if let Some(method) = update.booking_cancellations {
            self.booking_cancellations = method;
        }
        if let Some(method) = update.purchase_confirmations {
            self.purchase_confirmations = method;
        }
        if let Some(method) = update.assessment_notifications {
            self.assessment_notifications = method;
        }
        if let Some(method) = update.promotional_updates {
            self.promotional_updates = method;
        }
        if let Some(push_enabled) = update.push_enabled {
            self.push_enabled = push_enabled;
        }
        if let Some(hours) = update.reminder_hours_before {
            self.reminder_hours_before = hours;
        }
        self.updated_at = Utc::now();
    }
}

/// 没有偏好记录的客户：所有类型都走邮件
pub fn method_without_preference(_kind: TemplateKind) -> DeliveryMethod {
    DeliveryMethod::Email
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, Validate)]
pub struct UpdatePreferenceRequest {
    pub booking_confirmations: Option<DeliveryMethod>,
    pub booking_reminders: Option<DeliveryMethod>,
    pub booking_cancellations: Option<DeliveryMethod>,
    pub purchase_confirmations: Option<DeliveryMethod>,
    pub assessment_notifications: Option<DeliveryMethod>,
    pub promotional_updates: Option<DeliveryMethod>,
    pub push_enabled: Option<bool>,

    #[validate(range(min = 1, max = 168, message = "Reminder must be 1-168 hours before the session"))]
    pub reminder_hours_before: Option<i32>,
}
