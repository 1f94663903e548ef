pub mod database;
pub mod auth;
pub mod roster;
pub mod preference;
pub mod template;
pub mod targeting;
pub mod renderer;
pub mod context;
pub mod channels;
pub mod notification;
pub mod dispatch;
pub mod campaign;
pub mod schedule;
pub mod jobs;
pub mod worker;
pub mod scheduler;

// 重新导出常用类型
pub use database::Database;
pub use auth::AuthService;
pub use roster::RosterService;
pub use preference::PreferenceService;
pub use template::TemplateService;
pub use notification::NotificationService;
pub use dispatch::DispatchService;
pub use campaign::CampaignService;
pub use schedule::ScheduleService;
pub use jobs::JobService;
pub use worker::{TaskExecutor, TaskRunner};
pub use scheduler::Scheduler;
