use crate::{
    error::{AppError, Result},
    models::template::*,
    services::Database,
};
use chrono::Utc;
use std::sync::Arc;
use tracing::{debug, info};
use uuid::Uuid;
use validator::Validate;

pub const TEMPLATE_TABLE: &str = "notification_template";

#[derive(Clone)]
pub struct TemplateService {
    db: Arc<Database>,
}

impl TemplateService {
    pub async fn new(db: Arc<Database>) -> Result<Self> {
        Ok(Self { db })
    }

    pub async fn create(&self, request: CreateTemplateRequest) -> Result<NotificationTemplate> {
        request.validate()?;

        let now = Utc::now();
        let template = NotificationTemplate {
            id: Uuid::new_v4().to_string(),
            name: request.name,
            kind: request.kind,
            description: request.description.unwrap_or_default(),
            email_subject: request.email_subject,
            email_body_html: request.email_body_html,
            email_body_text: request.email_body_text,
            sms_body: request.sms_body.unwrap_or_default(),
            target_filters: request.target_filters.unwrap_or_default(),
            is_active: request.is_active.unwrap_or(true),
            created_at: now,
            updated_at: now,
        };

        let created = self.db.create(TEMPLATE_TABLE, &template.id, template.clone()).await?;
        info!("Created template {} ({})", created.name, created.kind);
        Ok(created)
    }

    pub async fn get(&self, template_id: &str) -> Result<NotificationTemplate> {
        self.db
            .get_by_id(TEMPLATE_TABLE, template_id)
            .await?
            .ok_or_else(|| AppError::not_found("Template"))
    }

    pub async fn list(&self) -> Result<Vec<NotificationTemplate>> {
        let mut templates: Vec<NotificationTemplate> = self.db.select_all(TEMPLATE_TABLE).await?;
        templates.sort_by(|a, b| a.kind.as_str().cmp(b.kind.as_str()).then(a.name.cmp(&b.name)));
        Ok(templates)
    }

    pub async fn update(
        &self,
        template_id: &str,
        request: UpdateTemplateRequest,
    ) -> Result<NotificationTemplate> {
        request.validate()?;
        let mut template = self.get(template_id).await?;

        if let Some(name) = request.name {
            template.name = name;
        }
        if let Some(kind) = request.kind {
            template.kind = kind;
        }
        if let Some(description) = request.description {
            template.description = description;
        }
        if let Some(subject) = request.email_subject {
            template.email_subject = subject;
        }
        if let Some(html) = request.email_body_html {
            template.email_body_html = html;
        }
        if let Some(text) = request.email_body_text {
            template.email_body_text = text;
        }
        if let Some(sms) = request.sms_body {
            template.sms_body = sms;
        }
        if let Some(filters) = request.target_filters {
            template.target_filters = filters;
        }
        if let Some(is_active) = request.is_active {
            template.is_active = is_active;
        }
        template.updated_at = Utc::now();

        debug!("Updating template {}", template_id);
        self.db.upsert(TEMPLATE_TABLE, template_id, template).await
    }

    /// 删除模板；已有的通知记录保留对它的软引用
    pub async fn delete(&self, template_id: &str) -> Result<()> {
        self.get(template_id).await?;
        self.db.delete_by_id(TEMPLATE_TABLE, template_id).await?;
        info!("Deleted template {}", template_id);
        Ok(())
    }

    pub async fn duplicate(&self, template_id: &str) -> Result<NotificationTemplate> {
        let original = self.get(template_id).await?;
        let copy = original.duplicate(Uuid::new_v4().to_string());
        self.db.create(TEMPLATE_TABLE, &copy.id, copy).await
    }

    /// 某类型的第一个启用模板（按名称排序，结果稳定）
    pub async fn active_by_kind(&self, kind: TemplateKind) -> Result<Option<NotificationTemplate>> {
        let mut templates: Vec<NotificationTemplate> =
            self.db.find_by(TEMPLATE_TABLE, "kind", kind).await?;
        templates.retain(|t| t.is_active);
        templates.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(templates.into_iter().next())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;

    async fn service() -> TemplateService {
        let db = Database::new(&Config::default()).await.unwrap();
        TemplateService::new(Arc::new(db)).await.unwrap()
    }

    fn request(name: &str, kind: TemplateKind, is_active: bool) -> CreateTemplateRequest {
        CreateTemplateRequest {
            name: name.to_string(),
            kind,
            description: None,
            email_subject: "We miss you, {{client_name}}".to_string(),
            email_body_html: "<p>Hi {{client_name}}</p>".to_string(),
            email_body_text: "Hi {{client_name}}".to_string(),
            sms_body: None,
            target_filters: Some(TargetFilter {
                inactive_weeks: Some(3),
                ..Default::default()
            }),
            is_active: Some(is_active),
        }
    }

    #[tokio::test]
    async fn test_create_and_update() {
        let templates = service().await;
        let created = templates
            .create(request("Come back", TemplateKind::InactiveClient, true))
            .await
            .unwrap();
        assert_eq!(created.target_filters.inactive_weeks(), Some(3));

        let updated = templates
            .update(
                &created.id,
                UpdateTemplateRequest {
                    sms_body: Some("Hi {{client_name}}, book at {{booking_link}}".to_string()),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        assert!(updated.has_sms());
        assert_eq!(templates.get(&created.id).await.unwrap().sms_body, updated.sms_body);
    }

    #[tokio::test]
    async fn test_sms_body_limit() {
        let templates = service().await;
        let mut long = request("Too long", TemplateKind::Promotional, true);
        long.sms_body = Some("x".repeat(161));
        assert!(templates.create(long).await.is_err());
    }

    #[tokio::test]
    async fn test_duplicate_is_inactive_copy() {
        let templates = service().await;
        let created = templates
            .create(request("Spring camp", TemplateKind::CustomCampaign, true))
            .await
            .unwrap();

        let copy = templates.duplicate(&created.id).await.unwrap();
        assert_ne!(copy.id, created.id);
        assert_eq!(copy.name, "Spring camp (Copy)");
        assert!(!copy.is_active);
        assert_eq!(templates.list().await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_active_by_kind_skips_inactive() {
        let templates = service().await;
        templates
            .create(request("A inactive", TemplateKind::WeeklyReminder, false))
            .await
            .unwrap();
        assert!(templates
            .active_by_kind(TemplateKind::WeeklyReminder)
            .await
            .unwrap()
            .is_none());

        templates
            .create(request("B active", TemplateKind::WeeklyReminder, true))
            .await
            .unwrap();
        let found = templates
            .active_by_kind(TemplateKind::WeeklyReminder)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(found.name, "B active");
    }

    #[tokio::test]
    async fn test_delete_missing_template() {
        let templates = service().await;
        assert!(matches!(templates.delete("nope").await, Err(AppError::NotFound(_))));
    }
}
