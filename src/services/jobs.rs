use crate::{
    config::Config,
    error::{AppError, Result},
    models::{
        client::{BookingStatus, Event, PackageStatus, RosterSnapshot},
        notification::NotificationRefs,
        preference::DeliveryMethod,
        template::{NotificationTemplate, TargetFilter, TemplateKind},
    },
    services::{
        context,
        dispatch::{Delivery, DispatchOutcome, DispatchService},
        notification::NotificationService,
        preference::PreferenceService,
        roster::RosterService,
        targeting::TargetingEngine,
        template::TemplateService,
    },
};
use chrono::{DateTime, Duration, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use tracing::{info, warn};

const WEEKLY_REMINDER_COOLDOWN_DAYS: i64 = 6;
const INACTIVE_AFTER_WEEKS: u32 = 3;
/// 到期提醒：提前天数与对应冷却期
const EXPIRY_NOTICES: [(i64, i64); 2] = [(7, 7), (3, 3)];

/// 固定周期任务（UTC）
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum RecurringJob {
    WeeklyReminders,
    InactiveClients,
    BookingReminders,
    ExpiringPackages,
    EventReminders,
    CleanupNotifications,
}

impl RecurringJob {
    pub const ALL: [RecurringJob; 6] = [
        RecurringJob::WeeklyReminders,
        RecurringJob::InactiveClients,
        RecurringJob::BookingReminders,
        RecurringJob::ExpiringPackages,
        RecurringJob::EventReminders,
        RecurringJob::CleanupNotifications,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            RecurringJob::WeeklyReminders => "weekly_reminders",
            RecurringJob::InactiveClients => "inactive_clients",
            RecurringJob::BookingReminders => "booking_reminders",
            RecurringJob::ExpiringPackages => "expiring_packages",
            RecurringJob::EventReminders => "event_reminders",
            RecurringJob::CleanupNotifications => "cleanup_notifications",
        }
    }

    /// 五段式 cron 表达式
    pub fn cron_expression(&self) -> &'static str {
        match self {
            RecurringJob::WeeklyReminders => "0 9 * * Mon",
            RecurringJob::InactiveClients => "0 10 * * *",
            RecurringJob::BookingReminders => "0 8 * * *",
            RecurringJob::ExpiringPackages => "0 9 * * *",
            RecurringJob::EventReminders => "0 8 * * *",
            RecurringJob::CleanupNotifications => "0 2 * * Sun",
        }
    }

    fn template_kind(&self) -> Option<TemplateKind> {
        match self {
            RecurringJob::WeeklyReminders => Some(TemplateKind::WeeklyReminder),
            RecurringJob::InactiveClients => Some(TemplateKind::InactiveClient),
            RecurringJob::BookingReminders => Some(TemplateKind::BookingReminder),
            RecurringJob::ExpiringPackages => Some(TemplateKind::PackageExpiring),
            RecurringJob::EventReminders => Some(TemplateKind::UpcomingEvent),
            RecurringJob::CleanupNotifications => None,
        }
    }
}

impl std::fmt::Display for RecurringJob {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for RecurringJob {
    type Err = AppError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        RecurringJob::ALL
            .into_iter()
            .find(|job| job.name() == s)
            .ok_or_else(|| AppError::not_found(&format!("Job {}", s)))
    }
}

/// 一次任务运行的结果
#[derive(Debug, Clone, Default, Serialize, PartialEq)]
pub struct JobReport {
    pub job: String,
    /// 缺少启用模板时为 false，本次不发送
    pub template_found: bool,
    pub candidates: u32,
    #[serde(flatten)]
    pub outcome: DispatchOutcome,
    pub deleted: u32,
}

impl JobReport {
    fn new(job: RecurringJob) -> Self {
        Self {
            job: job.name().to_string(),
            ..Default::default()
        }
    }
}

/// 周期任务的具体逻辑；每个任务通过冷却期或去重保证可重复运行
#[derive(Clone)]
pub struct JobService {
    roster: RosterService,
    templates: TemplateService,
    preferences: PreferenceService,
    log: NotificationService,
    dispatch: DispatchService,
    retention_days: i64,
    reengagement_cooldown_days: i64,
}

impl JobService {
    pub fn new(
        config: &Config,
        roster: RosterService,
        templates: TemplateService,
        preferences: PreferenceService,
        log: NotificationService,
        dispatch: DispatchService,
    ) -> Self {
        Self {
            roster,
            templates,
            preferences,
            log,
            dispatch,
            retention_days: config.notification_retention_days,
            reengagement_cooldown_days: config.reengagement_cooldown_days,
        }
    }

    pub async fn run(&self, job: RecurringJob, now: DateTime<Utc>) -> Result<JobReport> {
        info!("Running job {}", job);
        let mut report = JobReport::new(job);

        if job == RecurringJob::CleanupNotifications {
            report.template_found = true;
            report.deleted = self.log.cleanup(self.retention_days).await? as u32;
            return Ok(report);
        }

        let template = match job.template_kind() {
            Some(kind) => self.templates.active_by_kind(kind).await?,
            None => None,
        };
        let template = match template {
            Some(template) => template,
            None => {
                warn!("No active template for job {}, skipping", job);
                return Ok(report);
            }
        };
        report.template_found = true;

        let snapshot = self.roster.snapshot().await?;
        let today = now.date_naive();
        let deliveries = match job {
            RecurringJob::WeeklyReminders => self.weekly_reminders(&snapshot, now).await?,
            RecurringJob::InactiveClients => self.inactive_clients(&snapshot, now).await?,
            RecurringJob::BookingReminders => self.booking_reminders(&snapshot, today).await?,
            RecurringJob::ExpiringPackages => self.expiring_packages(&snapshot, now).await?,
            RecurringJob::EventReminders => self.event_reminders(&snapshot, today).await?,
            RecurringJob::CleanupNotifications => Vec::new(),
        };

        report.candidates = deliveries.len() as u32;
        report.outcome = self.send(&template, deliveries).await;
        info!(
            "Job {} finished: {} candidates, {} sent, {} failed",
            job, report.candidates, report.outcome.sent, report.outcome.failed
        );
        Ok(report)
    }

    async fn send(&self, template: &NotificationTemplate, deliveries: Vec<Delivery>) -> DispatchOutcome {
        if deliveries.is_empty() {
            return DispatchOutcome::default();
        }
        self.dispatch.dispatch(template, deliveries).await
    }

    /// 过去 7 天没有已确认/已完成预约的活跃客户；promotional 为 none 的跳过
    async fn weekly_reminders(&self, snapshot: &RosterSnapshot, now: DateTime<Utc>) -> Result<Vec<Delivery>> {
        let week_ago = now.date_naive() - Duration::days(7);
        let cooldown_start = now - Duration::days(WEEKLY_REMINDER_COOLDOWN_DAYS);
        let site_url = self.dispatch.site_url();

        let mut deliveries = Vec::new();
        for client in snapshot.clients.iter().filter(|c| c.is_active) {
            let booked_this_week = snapshot
                .bookings_for(&client.id)
                .any(|b| b.status.is_attended() && b.scheduled_date >= week_ago);
            if booked_this_week {
                continue;
            }

            let preference = self.preferences.find(&client.id).await?;
            if preference.map(|p| p.promotional_updates) == Some(DeliveryMethod::None) {
                continue;
            }

            if self
                .log
                .sent_since(&client.id, TemplateKind::WeeklyReminder, cooldown_start)
                .await?
            {
                continue;
            }

            deliveries.push(Delivery::new(client.clone()).with_context(context::campaign(site_url)));
        }
        Ok(deliveries)
    }

    /// 以前预约过、但 3 周内没有活动的客户；每人冷却 14 天
    async fn inactive_clients(&self, snapshot: &RosterSnapshot, now: DateTime<Utc>) -> Result<Vec<Delivery>> {
        let today = now.date_naive();
        let filter = TargetFilter {
            inactive_weeks: Some(INACTIVE_AFTER_WEEKS),
            ..Default::default()
        };
        let cooldown_start = now - Duration::days(self.reengagement_cooldown_days);
        let site_url = self.dispatch.site_url();

        let mut deliveries = Vec::new();
        for client in TargetingEngine::evaluate(&filter, snapshot, today) {
            // 从未预约过的客户不属于流失
            if snapshot.bookings_for(&client.id).next().is_none() {
                continue;
            }

            if self
                .log
                .sent_since(&client.id, TemplateKind::InactiveClient, cooldown_start)
                .await?
            {
                continue;
            }

            let weeks_inactive = snapshot
                .bookings_for(&client.id)
                .filter(|b| b.status.is_attended())
                .map(|b| b.scheduled_date)
                .max()
                .map(|last| (today - last).num_days() / 7)
                .unwrap_or(i64::from(INACTIVE_AFTER_WEEKS));

            deliveries.push(
                Delivery::new(client.clone()).with_context(context::reengagement(site_url, weeks_inactive)),
            );
        }
        Ok(deliveries)
    }

    /// 明天的已确认预约，每个预约只提醒一次
    async fn booking_reminders(&self, snapshot: &RosterSnapshot, today: NaiveDate) -> Result<Vec<Delivery>> {
        let tomorrow = today + Duration::days(1);
        let site_url = self.dispatch.site_url();

        let mut deliveries = Vec::new();
        for booking in snapshot
            .bookings
            .iter()
            .filter(|b| b.status == BookingStatus::Confirmed && b.scheduled_date == tomorrow)
        {
            let client = match snapshot.client(&booking.client_id) {
                Some(client) if client.is_active => client,
                _ => continue,
            };

            if self
                .log
                .exists_for_booking(TemplateKind::BookingReminder, &booking.id)
                .await?
            {
                continue;
            }

            deliveries.push(
                Delivery::new(client.clone())
                    .with_context(context::booking(site_url, booking))
                    .with_refs(NotificationRefs::booking(&booking.id)),
            );
        }
        Ok(deliveries)
    }

    /// 7 天和 3 天后到期的有效课时包
    async fn expiring_packages(&self, snapshot: &RosterSnapshot, now: DateTime<Utc>) -> Result<Vec<Delivery>> {
        let today = now.date_naive();
        let site_url = self.dispatch.site_url();

        let mut deliveries = Vec::new();
        for (days_ahead, cooldown_days) in EXPIRY_NOTICES {
            let expiry_date = today + Duration::days(days_ahead);
            let cooldown_start = now - Duration::days(cooldown_days);

            for package in snapshot
                .packages
                .iter()
                .filter(|p| p.status == PackageStatus::Active && p.expiry_date == expiry_date)
            {
                let client = match snapshot.client(&package.client_id) {
                    Some(client) if client.is_active => client,
                    _ => continue,
                };

                if self
                    .log
                    .package_notified_since(TemplateKind::PackageExpiring, &package.id, cooldown_start)
                    .await?
                {
                    continue;
                }

                deliveries.push(
                    Delivery::new(client.clone())
                        .with_context(context::package(site_url, package, days_ahead))
                        .with_refs(NotificationRefs::package(&package.id)),
                );
            }
        }
        Ok(deliveries)
    }

    /// 明天开始的活动，通知持有有效课时包的客户；每个客户每个活动一次
    async fn event_reminders(&self, snapshot: &RosterSnapshot, today: NaiveDate) -> Result<Vec<Delivery>> {
        let tomorrow = today + Duration::days(1);
        let site_url = self.dispatch.site_url();
        let events: Vec<Event> = self
            .roster
            .list_events()
            .await?
            .into_iter()
            .filter(|e| e.is_active && e.event_start_date == tomorrow)
            .collect();

        let filter = TargetFilter {
            has_active_package: Some(true),
            ..Default::default()
        };
        let interested = TargetingEngine::evaluate(&filter, snapshot, today);

        let mut deliveries = Vec::new();
        for event in &events {
            for client in &interested {
                if self.log.exists_for_event(&client.id, &event.id).await? {
                    continue;
                }

                deliveries.push(
                    Delivery::new((*client).clone())
                        .with_context(context::event(site_url, event))
                        .with_refs(NotificationRefs::event(&event.id)),
                );
            }
        }
        Ok(deliveries)
    }
}
