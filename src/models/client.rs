use chrono::{DateTime, NaiveDate, NaiveTime, Utc};
use serde::{Deserialize, Serialize};
use validator::Validate;

/// 客户（家长/监护人或球队教练）
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Client {
    pub id: String,
    pub first_name: String,
    #[serde(default)]
    pub last_name: String,
    pub username: String,
    pub email: String,
    #[serde(default)]
    pub phone: String,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
}

impl Client {
    /// 消息中使用的称呼：优先名字，否则用户名
    pub fn display_name(&self) -> &str {
        if self.first_name.trim().is_empty() {
            &self.username
        } else {
            &self.first_name
        }
    }

    pub fn has_phone(&self) -> bool {
        !self.phone.trim().is_empty()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct CreateClientRequest {
    /// 外部系统的客户ID，缺省时生成
    pub id: Option<String>,

    #[validate(length(max = 100, message = "First name must be at most 100 characters"))]
    pub first_name: String,

    pub last_name: Option<String>,

    #[validate(length(min = 1, max = 150, message = "Username must be 1-150 characters"))]
    pub username: String,

    #[validate(email(message = "Invalid email address"))]
    pub email: String,

    #[validate(length(max = 20, message = "Phone must be at most 20 characters"))]
    pub phone: Option<String>,

    pub is_active: Option<bool>,
}

/// 预约状态
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum BookingStatus {
    Pending,
    Confirmed,
    Completed,
    Cancelled,
    NoShow,
}

impl BookingStatus {
    /// 视为客户活跃的预约
    pub fn counts_as_activity(&self) -> bool {
        matches!(
            self,
            BookingStatus::Pending | BookingStatus::Confirmed | BookingStatus::Completed
        )
    }

    /// 已确认或已完成（计算"最近一次训练"时使用）
    pub fn is_attended(&self) -> bool {
        matches!(self, BookingStatus::Confirmed | BookingStatus::Completed)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Booking {
    pub id: String,
    pub client_id: String,
    pub player_name: Option<String>,
    pub coach_name: String,
    pub session_type: Option<String>,
    pub scheduled_date: NaiveDate,
    pub scheduled_time: NaiveTime,
    pub status: BookingStatus,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct CreateBookingRequest {
    pub id: Option<String>,

    #[validate(length(min = 1, message = "client_id is required"))]
    pub client_id: String,

    pub player_name: Option<String>,

    #[validate(length(min = 1, max = 100, message = "Coach name must be 1-100 characters"))]
    pub coach_name: String,

    pub session_type: Option<String>,
    pub scheduled_date: NaiveDate,
    pub scheduled_time: NaiveTime,
    pub status: Option<BookingStatus>,
}

/// 客户购买的课时包状态
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum PackageStatus {
    Active,
    Expired,
    Exhausted,
    Cancelled,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ClientPackage {
    pub id: String,
    pub client_id: String,
    pub package_name: String,
    pub start_date: NaiveDate,
    pub expiry_date: NaiveDate,
    pub sessions_remaining: i32,
    pub sessions_used: i32,
    pub status: PackageStatus,
    pub created_at: DateTime<Utc>,
}

impl ClientPackage {
    /// 状态为 active 且未过期
    pub fn is_active_on(&self, today: NaiveDate) -> bool {
        self.status == PackageStatus::Active && self.expiry_date >= today
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct CreateClientPackageRequest {
    pub id: Option<String>,

    #[validate(length(min = 1, message = "client_id is required"))]
    pub client_id: String,

    #[validate(length(min = 1, max = 100, message = "Package name must be 1-100 characters"))]
    pub package_name: String,

    pub start_date: NaiveDate,
    pub expiry_date: NaiveDate,

    #[validate(range(min = 0, message = "sessions_remaining cannot be negative"))]
    pub sessions_remaining: i32,

    #[validate(range(min = 0, message = "sessions_used cannot be negative"))]
    pub sessions_used: Option<i32>,

    pub status: Option<PackageStatus>,
}

/// 特别活动（训练营、诊所等）
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Event {
    pub id: String,
    pub name: String,
    pub event_start_date: NaiveDate,
    pub event_end_date: Option<NaiveDate>,
    pub location: Option<String>,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct CreateEventRequest {
    pub id: Option<String>,

    #[validate(length(min = 1, max = 100, message = "Event name must be 1-100 characters"))]
    pub name: String,

    pub event_start_date: NaiveDate,
    pub event_end_date: Option<NaiveDate>,

    #[validate(length(max = 200, message = "Location must be at most 200 characters"))]
    pub location: Option<String>,

    pub is_active: Option<bool>,
}

/// 教练提交的球员评估
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Assessment {
    pub id: String,
    pub client_id: String,
    pub booking_id: Option<String>,
    pub player_name: String,
    pub coach_name: String,
    pub training_type: Option<String>,
    pub assessment_date: NaiveDate,
    #[serde(default)]
    pub notification_sent: bool,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct CreateAssessmentRequest {
    pub id: Option<String>,

    #[validate(length(min = 1, message = "client_id is required"))]
    pub client_id: String,

    pub booking_id: Option<String>,

    #[validate(length(min = 1, max = 100, message = "Player name must be 1-100 characters"))]
    pub player_name: String,

    #[validate(length(min = 1, max = 100, message = "Coach name must be 1-100 characters"))]
    pub coach_name: String,

    pub training_type: Option<String>,
    pub assessment_date: NaiveDate,
}

/// 针对某一时刻的客户名册快照，定向与定时任务都在其上求值
#[derive(Debug, Clone, Default)]
pub struct RosterSnapshot {
    pub clients: Vec<Client>,
    pub bookings: Vec<Booking>,
    pub packages: Vec<ClientPackage>,
}

impl RosterSnapshot {
    pub fn bookings_for<'a>(&'a self, client_id: &'a str) -> impl Iterator<Item = &'a Booking> + 'a {
        self.bookings.iter().filter(move |b| b.client_id == client_id)
    }

    pub fn packages_for<'a>(&'a self, client_id: &'a str) -> impl Iterator<Item = &'a ClientPackage> + 'a {
        self.packages.iter().filter(move |p| p.client_id == client_id)
    }

    pub fn client(&self, client_id: &str) -> Option<&Client> {
        self.clients.iter().find(|c| c.id == client_id)
    }
}
