use crate::{
    error::{AppError, Result},
    models::{
        notification::NotificationRefs,
        template::{NotificationTemplate, TargetFilter, TemplateKind},
    },
    services::{
        channels::EmailMessage,
        context,
        dispatch::{Delivery, DispatchOutcome, DispatchService},
        renderer::MessageContext,
        roster::RosterService,
        targeting::TargetingEngine,
        template::TemplateService,
    },
};
use chrono::Utc;
use serde::Serialize;
use std::collections::HashSet;
use tracing::{info, warn};

const ASSESSMENT_FALLBACK_TITLE: &str = "Assessment Ready for {{player_name}}";
const ASSESSMENT_FALLBACK_MESSAGE: &str =
    "Coach {{coach_name}} has submitted an assessment for {{player_name}}'s training session on {{date}}.";

/// 一次营销投放的结果
#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
pub struct CampaignReport {
    pub recipients: u32,
    #[serde(flatten)]
    pub outcome: DispatchOutcome,
}

/// 管理端的模板操作：预览、立即投放、测试邮件、预约通知
#[derive(Clone)]
pub struct CampaignService {
    templates: TemplateService,
    roster: RosterService,
    dispatch: DispatchService,
}

impl CampaignService {
    pub fn new(templates: TemplateService, roster: RosterService, dispatch: DispatchService) -> Self {
        Self {
            templates,
            roster,
            dispatch,
        }
    }

    /// 预览命中人数
    pub async fn preview(&self, template_id: &str, filter: Option<TargetFilter>) -> Result<usize> {
        let template = self.templates.get(template_id).await?;
        let filter = filter.unwrap_or(template.target_filters);
        let snapshot = self.roster.snapshot().await?;
        Ok(TargetingEngine::preview(&filter, &snapshot, Utc::now().date_naive()))
    }

    /// 启用状态与渠道配置检查，排队前调用
    pub async fn ensure_sendable(&self, template_id: &str) -> Result<NotificationTemplate> {
        let template = self.templates.get(template_id).await?;
        if !template.is_active {
            return Err(AppError::BadRequest(format!(
                "Template \"{}\" is inactive and cannot be sent",
                template.name
            )));
        }
        self.dispatch.channels().check_ready()?;
        Ok(template)
    }

    pub fn check_channels(&self) -> Result<()> {
        self.dispatch.channels().check_ready()
    }

    /// 对定向结果投放模板
    pub async fn send_campaign(
        &self,
        template: &NotificationTemplate,
        filter: Option<&TargetFilter>,
        refs: NotificationRefs,
    ) -> Result<CampaignReport> {
        let filter = filter.unwrap_or(&template.target_filters);
        let snapshot = self.roster.snapshot().await?;
        let site_url = self.dispatch.site_url().to_string();

        // 重新执行的定时投放跳过已有日志的客户
        let already_notified = match &refs.schedule_id {
            Some(schedule_id) => self.dispatch.log().clients_for_schedule(schedule_id).await?,
            None => HashSet::new(),
        };
        if !already_notified.is_empty() {
            info!(
                "Resuming campaign \"{}\", skipping {} already notified clients",
                template.name,
                already_notified.len()
            );
        }

        let deliveries: Vec<Delivery> = TargetingEngine::evaluate(filter, &snapshot, Utc::now().date_naive())
            .into_iter()
            .filter(|client| !already_notified.contains(&client.id))
            .map(|client| {
                Delivery::new(client.clone())
                    .with_context(context::campaign(&site_url))
                    .with_refs(refs.clone())
            })
            .collect();

        let recipients = deliveries.len() as u32;
        let outcome = self.dispatch.dispatch(template, deliveries).await;
        info!(
            "Campaign \"{}\" sent to {} of {} recipients",
            template.name, outcome.sent, recipients
        );

        Ok(CampaignReport { recipients, outcome })
    }

    /// 管理端 "Send Campaign Now"
    pub async fn send_now(&self, template_id: &str) -> Result<CampaignReport> {
        let template = self.ensure_sendable(template_id).await?;
        self.send_campaign(&template, None, NotificationRefs::default()).await
    }

    /// 用示例数据渲染并发送测试邮件，服务商错误直接返回给调用方
    pub async fn send_test_email(&self, template_id: &str, to: &str) -> Result<()> {
        let template = self.templates.get(template_id).await?;
        if !template.has_email() {
            return Err(AppError::BadRequest(
                "Template has no email subject".to_string(),
            ));
        }

        let email = &self.dispatch.channels().email;
        email.check_ready()?;

        let sample = context::sample(self.dispatch.site_url());
        let rendered = self.dispatch.renderer().render(&template, &sample)?;

        let message = EmailMessage {
            to: to.to_string(),
            subject: format!("[TEST] {}", rendered.subject),
            text: rendered.text,
            html: Some(rendered.html).filter(|h| !h.trim().is_empty()),
        };
        email.send(&message).await?;

        info!("Test email for template {} sent to {}", template.name, to);
        Ok(())
    }

    /// 预约确认/取消通知；没有启用模板时跳过
    pub async fn notify_booking(&self, booking_id: &str, kind: TemplateKind) -> Result<DispatchOutcome> {
        if !matches!(
            kind,
            TemplateKind::BookingConfirmed | TemplateKind::BookingCancelled
        ) {
            return Err(AppError::BadRequest(format!(
                "{} is not a booking notification",
                kind
            )));
        }

        let booking = self.roster.get_booking(booking_id).await?;
        let client = self.roster.get_client(&booking.client_id).await?;

        let template = match self.templates.active_by_kind(kind).await? {
            Some(template) => template,
            None => {
                warn!("No active {} template, skipping booking {}", kind, booking_id);
                return Ok(DispatchOutcome::default());
            }
        };

        let delivery = Delivery::new(client)
            .with_context(context::booking(self.dispatch.site_url(), &booking))
            .with_refs(NotificationRefs::booking(&booking.id));

        Ok(self.dispatch.dispatch(&template, vec![delivery]).await)
    }

    /// 评估完成通知；没有启用模板时使用内置标题和正文
    pub async fn notify_assessment(&self, assessment_id: &str) -> Result<DispatchOutcome> {
        let assessment = self.roster.get_assessment(assessment_id).await?;
        if assessment.notification_sent {
            return Err(AppError::Conflict(format!(
                "Assessment {} has already been announced",
                assessment_id
            )));
        }
        let client = self.roster.get_client(&assessment.client_id).await?;

        let template = match self.templates.active_by_kind(TemplateKind::AssessmentReady).await? {
            Some(template) => template,
            None => NotificationTemplate::direct(
                TemplateKind::AssessmentReady,
                ASSESSMENT_FALLBACK_TITLE,
                ASSESSMENT_FALLBACK_MESSAGE,
            ),
        };

        let delivery = Delivery::new(client)
            .with_context(context::assessment(self.dispatch.site_url(), &assessment))
            .with_refs(NotificationRefs::assessment(&assessment.id));
        let outcome = self.dispatch.dispatch(&template, vec![delivery]).await;

        if outcome.sent > 0 {
            self.roster.mark_assessment_notified(&assessment.id).await?;
        }
        Ok(outcome)
    }

    /// 不经模板直接发送标题和正文，渠道按 `kind` 对应的偏好选择
    pub async fn send_direct(
        &self,
        client_id: &str,
        kind: TemplateKind,
        title: &str,
        message: &str,
    ) -> Result<DispatchOutcome> {
        let client = self.roster.get_client(client_id).await?;
        let template = NotificationTemplate::direct(kind, title, message);
        let delivery = Delivery::new(client).with_context(context::campaign(self.dispatch.site_url()));

        Ok(self.dispatch.dispatch(&template, vec![delivery]).await)
    }

    pub fn sample_context(&self) -> MessageContext {
        context::sample(self.dispatch.site_url())
    }
}
