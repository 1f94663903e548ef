use crate::{
    error::{AppError, Result},
    models::{notification::*, template::TemplateKind},
    services::{database::PaginatedResult, Database},
};
use chrono::{DateTime, Duration, Utc};
use serde_json::{json, Value};
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{debug, info};
use uuid::Uuid;

pub const NOTIFICATION_TABLE: &str = "notification";

/// 一次渠道投递的结果，写入通知日志
#[derive(Debug, Clone)]
pub struct DeliveryRecord {
    pub client_id: String,
    pub template_id: Option<String>,
    pub kind: TemplateKind,
    pub channel: Channel,
    pub title: String,
    pub message: String,
    pub refs: NotificationRefs,
    pub error: Option<String>,
}

/// 通知日志服务
#[derive(Clone)]
pub struct NotificationService {
    db: Arc<Database>,
}

impl NotificationService {
    pub async fn new(db: Arc<Database>) -> Result<Self> {
        Ok(Self { db })
    }

    pub async fn record(&self, record: DeliveryRecord) -> Result<Notification> {
        let now = Utc::now();
        let (status, sent_at) = match record.error {
            None => (NotificationStatus::Sent, Some(now)),
            Some(_) => (NotificationStatus::Failed, None),
        };

        let notification = Notification {
            id: Uuid::new_v4().to_string(),
            client_id: record.client_id,
            template_id: record.template_id,
            kind: record.kind,
            channel: record.channel,
            title: record.title,
            message: record.message,
            status,
            error: record.error,
            booking_id: record.refs.booking_id,
            package_id: record.refs.package_id,
            event_id: record.refs.event_id,
            schedule_id: record.refs.schedule_id,
            assessment_id: record.refs.assessment_id,
            sent_at,
            read_at: None,
            created_at: now,
        };

        self.db
            .create(NOTIFICATION_TABLE, &notification.id, notification.clone())
            .await
    }

    async fn for_client(&self, client_id: &str) -> Result<Vec<Notification>> {
        let mut notifications: Vec<Notification> = self
            .db
            .find_by(NOTIFICATION_TABLE, "client_id", client_id)
            .await?;
        notifications.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(notifications)
    }

    /// 客户的通知历史，按时间倒序分页
    pub async fn history(
        &self,
        client_id: &str,
        query: &NotificationHistoryQuery,
    ) -> Result<PaginatedResult<Notification>> {
        let mut notifications = self.for_client(client_id).await?;
        if let Some(kind) = query.kind {
            notifications.retain(|n| n.kind == kind);
        }

        Ok(PaginatedResult::paginate(
            notifications,
            query.page.unwrap_or(1),
            query.limit.unwrap_or(20),
        ))
    }

    pub async fn unread_count(&self, client_id: &str) -> Result<usize> {
        Ok(self
            .for_client(client_id)
            .await?
            .iter()
            .filter(|n| n.is_unread())
            .count())
    }

    /// 最近一条成功发送的通知，推送 Service Worker 用它来显示内容
    pub async fn latest(&self, client_id: &str) -> Result<Option<Notification>> {
        Ok(self
            .for_client(client_id)
            .await?
            .into_iter()
            .find(|n| matches!(n.status, NotificationStatus::Sent | NotificationStatus::Read)))
    }

    pub async fn mark_read(&self, client_id: &str, notification_id: &str) -> Result<Notification> {
        let mut notification: Notification = self
            .db
            .get_by_id(NOTIFICATION_TABLE, notification_id)
            .await?
            .filter(|n: &Notification| n.client_id == client_id)
            .ok_or_else(|| AppError::not_found("Notification"))?;

        if notification.status == NotificationStatus::Sent {
            notification.status = NotificationStatus::Read;
            notification.read_at = Some(Utc::now());
            self.db
                .upsert(NOTIFICATION_TABLE, notification_id, notification.clone())
                .await?;
        }

        Ok(notification)
    }

    pub async fn mark_all_read(&self, client_id: &str) -> Result<usize> {
        let now = Utc::now();
        let mut updated = 0;

        for mut notification in self.for_client(client_id).await? {
            if !notification.is_unread() {
                continue;
            }
            notification.status = NotificationStatus::Read;
            notification.read_at = Some(now);
            let id = notification.id.clone();
            self.db.upsert(NOTIFICATION_TABLE, &id, notification).await?;
            updated += 1;
        }

        debug!("Marked {} notifications read for client {}", updated, client_id);
        Ok(updated)
    }

    /// 条件命中至少一行时返回 true；时间字段以字符串存储，比较前转成 datetime
    async fn any_where(&self, condition: &str, mut params: Value) -> Result<bool> {
        if let Value::Object(map) = &mut params {
            map.insert("table".to_string(), Value::from(NOTIFICATION_TABLE));
        }
        let query = format!(
            "SELECT meta::id(id) AS id FROM type::table($table) WHERE {} LIMIT 1",
            condition
        );
        let mut response = self.db.query_with_params(&query, params).await?;
        let rows: Vec<Value> = response.take(0)?;
        Ok(!rows.is_empty())
    }

    /// 冷却期判断：`since` 之后是否已给该客户记录过同类通知
    pub async fn sent_since(&self, client_id: &str, kind: TemplateKind, since: DateTime<Utc>) -> Result<bool> {
        self.any_where(
            "client_id = $client_id AND kind = $kind AND <datetime> created_at >= <datetime> $since",
            json!({ "client_id": client_id, "kind": kind, "since": since }),
        )
        .await
    }

    pub async fn exists_for_booking(&self, kind: TemplateKind, booking_id: &str) -> Result<bool> {
        self.any_where(
            "booking_id = $booking_id AND kind = $kind",
            json!({ "booking_id": booking_id, "kind": kind }),
        )
        .await
    }

    pub async fn package_notified_since(
        &self,
        kind: TemplateKind,
        package_id: &str,
        since: DateTime<Utc>,
    ) -> Result<bool> {
        self.any_where(
            "package_id = $package_id AND kind = $kind AND <datetime> created_at >= <datetime> $since",
            json!({ "package_id": package_id, "kind": kind, "since": since }),
        )
        .await
    }

    pub async fn exists_for_event(&self, client_id: &str, event_id: &str) -> Result<bool> {
        self.any_where(
            "event_id = $event_id AND client_id = $client_id",
            json!({ "event_id": event_id, "client_id": client_id }),
        )
        .await
    }

    /// 某次定时投放已经记录过的客户，中断后续跑时跳过他们
    pub async fn clients_for_schedule(&self, schedule_id: &str) -> Result<HashSet<String>> {
        let mut response = self
            .db
            .query_with_params(
                "SELECT VALUE client_id FROM type::table($table) WHERE schedule_id = $schedule_id",
                json!({ "table": NOTIFICATION_TABLE, "schedule_id": schedule_id }),
            )
            .await?;
        let clients: Vec<String> = response.take(0)?;
        Ok(clients.into_iter().collect())
    }

    /// 删除超过保留期且已发送或已读的记录，返回删除数量
    pub async fn cleanup(&self, retention_days: i64) -> Result<usize> {
        let cutoff = Utc::now() - Duration::days(retention_days);
        let mut response = self
            .db
            .query_with_params(
                r#"
                    DELETE type::table($table)
                    WHERE status IN ['sent', 'read'] AND <datetime> created_at < <datetime> $cutoff
                    RETURN BEFORE
                "#,
                json!({ "table": NOTIFICATION_TABLE, "cutoff": cutoff }),
            )
            .await?;
        let deleted: Vec<Value> = response.take(0)?;

        info!("Cleaned up {} notifications older than {} days", deleted.len(), retention_days);
        Ok(deleted.len())
    }

    /// 直接写入一条记录，测试和数据迁移用
    pub async fn insert(&self, notification: Notification) -> Result<Notification> {
        self.db
            .create(NOTIFICATION_TABLE, &notification.id, notification.clone())
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;

    async fn service() -> NotificationService {
        let db = Database::new(&Config::default()).await.unwrap();
        NotificationService::new(Arc::new(db)).await.unwrap()
    }

    fn record(client_id: &str, kind: TemplateKind, error: Option<&str>) -> DeliveryRecord {
        DeliveryRecord {
            client_id: client_id.to_string(),
            template_id: Some("t1".to_string()),
            kind,
            channel: Channel::Email,
            title: "Hello".to_string(),
            message: "Body".to_string(),
            refs: NotificationRefs::default(),
            error: error.map(|e| e.to_string()),
        }
    }

    #[tokio::test]
    async fn test_record_sets_status() {
        let log = service().await;
        let sent = log.record(record("c1", TemplateKind::Promotional, None)).await.unwrap();
        let failed = log
            .record(record("c1", TemplateKind::Promotional, Some("boom")))
            .await
            .unwrap();

        assert_eq!(sent.status, NotificationStatus::Sent);
        assert!(sent.sent_at.is_some());
        assert_eq!(failed.status, NotificationStatus::Failed);
        assert_eq!(failed.error.as_deref(), Some("boom"));
        assert_eq!(log.unread_count("c1").await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_mark_read_is_scoped_to_client() {
        let log = service().await;
        let sent = log.record(record("c1", TemplateKind::Promotional, None)).await.unwrap();

        assert!(matches!(log.mark_read("c2", &sent.id).await, Err(AppError::NotFound(_))));

        let read = log.mark_read("c1", &sent.id).await.unwrap();
        assert_eq!(read.status, NotificationStatus::Read);
        assert_eq!(log.unread_count("c1").await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_mark_all_read() {
        let log = service().await;
        for _ in 0..3 {
            log.record(record("c1", TemplateKind::WeeklyReminder, None)).await.unwrap();
        }
        log.record(record("c1", TemplateKind::WeeklyReminder, Some("bounced"))).await.unwrap();

        assert_eq!(log.mark_all_read("c1").await.unwrap(), 3);
        assert_eq!(log.unread_count("c1").await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_history_paginates_newest_first() {
        let log = service().await;
        for i in 0..25 {
            let mut r = record("c1", TemplateKind::Promotional, None);
            r.title = format!("n{}", i);
            log.record(r).await.unwrap();
        }

        let page = log
            .history(
                "c1",
                &NotificationHistoryQuery {
                    page: Some(2),
                    limit: Some(20),
                    kind: None,
                },
            )
            .await
            .unwrap();
        assert_eq!(page.total, 25);
        assert_eq!(page.data.len(), 5);
        assert_eq!(page.total_pages, 2);
    }

    #[tokio::test]
    async fn test_cleanup_keeps_recent_and_failed() {
        let log = service().await;
        let old = Utc::now() - Duration::days(120);
        let base = log.record(record("c1", TemplateKind::Promotional, None)).await.unwrap();

        for (id, status) in [
            ("old-sent", NotificationStatus::Sent),
            ("old-read", NotificationStatus::Read),
            ("old-failed", NotificationStatus::Failed),
        ] {
            log.insert(Notification {
                id: id.to_string(),
                status,
                created_at: old,
                ..base.clone()
            })
            .await
            .unwrap();
        }

        assert_eq!(log.cleanup(90).await.unwrap(), 2);
        let remaining = log.for_client("c1").await.unwrap();
        let mut ids: Vec<&str> = remaining.iter().map(|n| n.id.as_str()).collect();
        ids.sort();
        let mut expected = vec!["old-failed", base.id.as_str()];
        expected.sort();
        assert_eq!(ids, expected);
    }

    #[tokio::test]
    async fn test_cooldown_window() {
        let log = service().await;
        log.record(record("c1", TemplateKind::InactiveClient, None)).await.unwrap();

        let window_start = Utc::now() - Duration::days(14);
        assert!(log.sent_since("c1", TemplateKind::InactiveClient, window_start).await.unwrap());
        assert!(!log.sent_since("c1", TemplateKind::WeeklyReminder, window_start).await.unwrap());
        assert!(!log.sent_since("c2", TemplateKind::InactiveClient, window_start).await.unwrap());
    }

    #[tokio::test]
    async fn test_sent_since_compares_created_at() {
        let log = service().await;
        let base = log.record(record("seed", TemplateKind::InactiveClient, None)).await.unwrap();
        let now = Utc::now();
        log.insert(Notification {
            id: "thirteen-days".to_string(),
            client_id: "c1".to_string(),
            created_at: now - Duration::days(13),
            ..base.clone()
        })
        .await
        .unwrap();

        assert!(log
            .sent_since("c1", TemplateKind::InactiveClient, now - Duration::days(14))
            .await
            .unwrap());
        assert!(!log
            .sent_since("c1", TemplateKind::InactiveClient, now - Duration::days(12))
            .await
            .unwrap());
    }

    #[tokio::test]
    async fn test_clients_for_schedule() {
        let log = service().await;
        for client in ["a", "b"] {
            let mut r = record(client, TemplateKind::CustomCampaign, None);
            r.refs = NotificationRefs::schedule("s1");
            log.record(r).await.unwrap();
        }
        log.record(record("c", TemplateKind::CustomCampaign, None)).await.unwrap();

        let clients = log.clients_for_schedule("s1").await.unwrap();
        assert_eq!(clients.len(), 2);
        assert!(clients.contains("a") && clients.contains("b"));
        assert!(log.clients_for_schedule("s2").await.unwrap().is_empty());
    }
}
