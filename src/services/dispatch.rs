use crate::{
    config::Config,
    error::Result,
    models::{
        client::Client,
        notification::{Channel, NotificationRefs},
        preference::{method_without_preference, DeliveryMethod},
        template::NotificationTemplate,
    },
    services::{
        channels::{Channels, DeliveryError, EmailMessage, PushPayload},
        notification::{DeliveryRecord, NotificationService},
        preference::PreferenceService,
        renderer::{truncate_sms, MessageContext, MessageRenderer, RenderedMessage},
    },
};
use chrono::Utc;
use futures::stream::{self, StreamExt};
use serde::Serialize;
use tracing::{debug, error, info, warn};

const DISPATCH_CONCURRENCY: usize = 8;
const PUSH_BODY_LIMIT: usize = 200;
const PUSH_ICON: &str = "/static/img/icon-192.png";

/// 单个收件人的投递请求
#[derive(Debug, Clone)]
pub struct Delivery {
    pub client: Client,
    /// 按类型附加的模板变量
    pub context: MessageContext,
    pub refs: NotificationRefs,
}

impl Delivery {
    pub fn new(client: Client) -> Self {
        Self {
            client,
            context: MessageContext::new(),
            refs: NotificationRefs::default(),
        }
    }

    pub fn with_context(mut self, context: MessageContext) -> Self {
        self.context = context;
        self
    }

    pub fn with_refs(mut self, refs: NotificationRefs) -> Self {
        self.refs = refs;
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecipientOutcome {
    /// 至少一个渠道成功
    Sent,
    /// 尝试过的渠道全部失败
    Failed,
    /// 没有可尝试的渠道
    Skipped,
}

/// 一批投递的汇总
#[derive(Debug, Clone, Copy, Default, Serialize, PartialEq, Eq)]
pub struct DispatchOutcome {
    pub sent: u32,
    pub failed: u32,
    pub skipped: u32,
}

impl DispatchOutcome {
    pub fn add(&mut self, outcome: RecipientOutcome) {
        match outcome {
            RecipientOutcome::Sent => self.sent += 1,
            RecipientOutcome::Failed => self.failed += 1,
            RecipientOutcome::Skipped => self.skipped += 1,
        }
    }

    pub fn attempted(&self) -> u32 {
        self.sent + self.failed
    }
}

/// 投递引擎：按偏好选渠道、渲染、发送并写日志
#[derive(Clone)]
pub struct DispatchService {
    preferences: PreferenceService,
    log: NotificationService,
    channels: Channels,
    renderer: MessageRenderer,
    site_url: String,
}

impl DispatchService {
    pub fn new(
        config: &Config,
        preferences: PreferenceService,
        log: NotificationService,
        channels: Channels,
    ) -> Self {
        Self {
            preferences,
            log,
            channels,
            renderer: MessageRenderer::new(),
            site_url: config.site_url.trim_end_matches('/').to_string(),
        }
    }

    pub fn channels(&self) -> &Channels {
        &self.channels
    }

    pub fn log(&self) -> &NotificationService {
        &self.log
    }

    pub fn renderer(&self) -> &MessageRenderer {
        &self.renderer
    }

    pub fn site_url(&self) -> &str {
        &self.site_url
    }

    /// 批量投递；单个收件人的失败不会中断整批
    pub async fn dispatch(&self, template: &NotificationTemplate, deliveries: Vec<Delivery>) -> DispatchOutcome {
        let total = deliveries.len();
        let outcomes: Vec<RecipientOutcome> = stream::iter(deliveries)
            .map(|delivery| async move { self.deliver_one(template, &delivery).await })
            .buffer_unordered(DISPATCH_CONCURRENCY)
            .collect()
            .await;

        let mut summary = DispatchOutcome::default();
        for outcome in outcomes {
            summary.add(outcome);
        }

        info!(
            template = %template.name,
            kind = %template.kind,
            recipients = total,
            sent = summary.sent,
            failed = summary.failed,
            skipped = summary.skipped,
            "Dispatch finished"
        );
        summary
    }

    /// 投递给单个收件人，错误转为 Failed
    pub async fn deliver_one(&self, template: &NotificationTemplate, delivery: &Delivery) -> RecipientOutcome {
        match self.deliver(template, delivery).await {
            Ok(outcome) => outcome,
            Err(e) => {
                error!(
                    client_id = %delivery.client.id,
                    template = %template.name,
                    "Failed to notify client: {}", e
                );
                RecipientOutcome::Failed
            }
        }
    }

    async fn deliver(&self, template: &NotificationTemplate, delivery: &Delivery) -> Result<RecipientOutcome> {
        let client = &delivery.client;
        let preference = self.preferences.find(&client.id).await?;

        let method = preference
            .as_ref()
            .map(|p| p.method_for(template.kind))
            .unwrap_or_else(|| method_without_preference(template.kind));
        if method.is_none() {
            debug!("Client {} opted out of {} notifications", client.id, template.kind);
            return Ok(RecipientOutcome::Skipped);
        }
        let push_allowed = preference.as_ref().map(|p| p.push_enabled).unwrap_or(true);

        let context = MessageContext::for_client(client, &self.site_url).merge(delivery.context.clone());
        let rendered = self.renderer.render(template, &context)?;

        let mut attempts: Vec<bool> = Vec::new();

        if method.wants_email() && template.has_email() {
            let result = self.send_email(client, &rendered).await;
            attempts.push(
                self.log_attempt(template, delivery, Channel::Email, &rendered.subject, &rendered.text, result)
                    .await,
            );
        }

        if self.should_send_sms(method, template, client) {
            let result = self.send_sms(client, &rendered).await;
            let body = truncate_sms(&rendered.sms);
            attempts.push(
                self.log_attempt(template, delivery, Channel::Sms, &rendered.subject, &body, result)
                    .await,
            );
        }

        if push_allowed {
            if let Some(result) = self.send_push(template, client, &rendered).await {
                attempts.push(
                    self.log_attempt(template, delivery, Channel::Push, &rendered.subject, &rendered.text, result)
                        .await,
                );
            }
        }

        Ok(if attempts.is_empty() {
            RecipientOutcome::Skipped
        } else if attempts.iter().any(|ok| *ok) {
            RecipientOutcome::Sent
        } else {
            RecipientOutcome::Failed
        })
    }

    fn should_send_sms(&self, method: DeliveryMethod, template: &NotificationTemplate, client: &Client) -> bool {
        method.wants_sms() && template.has_sms() && client.has_phone() && self.channels.sms_enabled()
    }

    async fn send_email(&self, client: &Client, rendered: &RenderedMessage) -> std::result::Result<(), DeliveryError> {
        let message = EmailMessage {
            to: client.email.clone(),
            subject: rendered.subject.clone(),
            text: rendered.text.clone(),
            html: Some(rendered.html.clone()).filter(|h| !h.trim().is_empty()),
        };
        self.channels.email.send(&message).await
    }

    async fn send_sms(&self, client: &Client, rendered: &RenderedMessage) -> std::result::Result<(), DeliveryError> {
        match &self.channels.sms {
            Some(sms) => sms.send(&client.phone, &rendered.sms).await.map(|_| ()),
            None => Err(DeliveryError::Disabled(Channel::Sms)),
        }
    }

    /// 发往客户全部有效设备；没有可用设备时返回 None。
    /// 订阅表的读写失败只记日志，不影响其他渠道的结果
    async fn send_push(
        &self,
        template: &NotificationTemplate,
        client: &Client,
        rendered: &RenderedMessage,
    ) -> Option<std::result::Result<(), DeliveryError>> {
        let push = self.channels.push.as_ref()?;

        let subscriptions = match self.preferences.active_subscriptions(&client.id).await {
            Ok(subscriptions) => subscriptions,
            Err(e) => {
                error!("Failed to load push subscriptions for client {}: {}", client.id, e);
                return None;
            }
        };
        if subscriptions.is_empty() {
            return None;
        }

        let payload = self.push_payload(template, rendered);
        let mut delivered = false;
        let mut last_error = None;
        for subscription in subscriptions {
            match push.send(&subscription, &payload).await {
                Ok(()) => {
                    delivered = true;
                    if let Err(e) = self.preferences.touch_last_used(&subscription.id).await {
                        warn!("Failed to update push subscription {}: {}", subscription.id, e);
                    }
                }
                Err(e) if e.is_gone() => {
                    warn!(
                        "Push endpoint gone for client {}, deactivating subscription {}",
                        client.id, subscription.id
                    );
                    if let Err(err) = self.preferences.deactivate(&subscription.id).await {
                        error!("Failed to deactivate push subscription {}: {}", subscription.id, err);
                    }
                    last_error = Some(e);
                }
                Err(e) => {
                    error!("Push to subscription {} failed: {}", subscription.id, e);
                    last_error = Some(e);
                }
            }
        }

        Some(match (delivered, last_error) {
            (true, _) => Ok(()),
            (false, Some(e)) => Err(e),
            (false, None) => Ok(()),
        })
    }

    fn push_payload(&self, template: &NotificationTemplate, rendered: &RenderedMessage) -> PushPayload {
        let title = if rendered.subject.trim().is_empty() {
            template.kind.display_name().to_string()
        } else {
            rendered.subject.clone()
        };
        PushPayload {
            title,
            body: rendered.text.chars().take(PUSH_BODY_LIMIT).collect(),
            url: self.site_url.clone(),
            icon: PUSH_ICON.to_string(),
            timestamp: Utc::now().timestamp_millis(),
        }
    }

    /// 写入一行日志，返回该渠道是否成功
    async fn log_attempt(
        &self,
        template: &NotificationTemplate,
        delivery: &Delivery,
        channel: Channel,
        title: &str,
        message: &str,
        result: std::result::Result<(), DeliveryError>,
    ) -> bool {
        let ok = result.is_ok();
        let error = result.err().map(|e| {
            error!(
                client_id = %delivery.client.id,
                channel = %channel,
                "Delivery failed: {}", e
            );
            e.to_string()
        });

        let record = DeliveryRecord {
            client_id: delivery.client.id.clone(),
            template_id: Some(template.id.clone()).filter(|id| !id.is_empty()),
            kind: template.kind,
            channel,
            title: if title.is_empty() {
                template.kind.display_name().to_string()
            } else {
                title.to_string()
            },
            message: message.to_string(),
            refs: delivery.refs.clone(),
            error,
        };

        if let Err(e) = self.log.record(record).await {
            error!("Failed to write notification log for client {}: {}", delivery.client.id, e);
        }
        ok
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::notification::{NotificationHistoryQuery, NotificationStatus};
    use crate::models::preference::UpdatePreferenceRequest;
    use crate::models::push::{PushKeys, SubscribePushRequest};
    use crate::models::template::{TargetFilter, TemplateKind};
    use crate::services::channels::fakes::{FakeEmailSender, FakePushSender, FakeSmsSender};
    use crate::services::targeting::fixtures;
    use crate::services::Database;
    use std::sync::Arc;

    struct Harness {
        dispatch: DispatchService,
        preferences: PreferenceService,
        log: NotificationService,
    }

    async fn harness(channels: Channels) -> Harness {
        let config = Config::default();
        let db = Arc::new(Database::new(&config).await.unwrap());
        harness_on(db, channels).await
    }

    async fn harness_on(db: Arc<Database>, channels: Channels) -> Harness {
        let config = Config::default();
        let preferences = PreferenceService::new(db.clone()).await.unwrap();
        let log = NotificationService::new(db).await.unwrap();
        let dispatch = DispatchService::new(&config, preferences.clone(), log.clone(), channels);
        Harness {
            dispatch,
            preferences,
            log,
        }
    }

    /// 推送成功，但发送期间订阅行被删除
    struct DroppingPushSender {
        db: Arc<Database>,
    }

    #[async_trait::async_trait]
    impl crate::services::channels::PushSender for DroppingPushSender {
        fn public_key(&self) -> &str {
            "fake-public-key"
        }

        async fn send(
            &self,
            subscription: &crate::models::push::PushSubscription,
            _payload: &PushPayload,
        ) -> std::result::Result<(), DeliveryError> {
            self.db
                .delete_by_id(crate::services::preference::PUSH_SUBSCRIPTION_TABLE, &subscription.id)
                .await
                .unwrap();
            Ok(())
        }
    }

    async fn subscribe(preferences: &PreferenceService, client_id: &str, endpoint: &str) {
        preferences
            .subscribe_push(
                client_id,
                SubscribePushRequest {
                    endpoint: endpoint.to_string(),
                    keys: PushKeys {
                        p256dh: "key".to_string(),
                        auth: "auth".to_string(),
                    },
                    user_agent: None,
                },
            )
            .await
            .unwrap();
    }

    fn email_only(email: Arc<FakeEmailSender>) -> Channels {
        Channels {
            email,
            sms: None,
            push: None,
        }
    }

    fn template(kind: TemplateKind) -> NotificationTemplate {
        NotificationTemplate {
            id: "t1".to_string(),
            name: "Test".to_string(),
            kind,
            description: String::new(),
            email_subject: "Hi {{client_name}}".to_string(),
            email_body_html: "<p>Book at {{booking_link}}</p>".to_string(),
            email_body_text: "Book at {{booking_link}}".to_string(),
            sms_body: "Hi {{client_name}}".to_string(),
            target_filters: TargetFilter::default(),
            is_active: true,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn test_provider_errors_do_not_abort_batch() {
        let email = Arc::new(FakeEmailSender::failing_for(&["c3@example.com", "c7@example.com"]));
        let h = harness(email_only(email.clone())).await;

        let deliveries = (0..10)
            .map(|i| Delivery::new(fixtures::client(&format!("c{}", i))))
            .collect();
        let outcome = h.dispatch.dispatch(&template(TemplateKind::CustomCampaign), deliveries).await;

        assert_eq!(
            outcome,
            DispatchOutcome {
                sent: 8,
                failed: 2,
                skipped: 0
            }
        );
        assert_eq!(email.sent_count(), 8);

        let failed_log = h
            .log
            .history("c3", &NotificationHistoryQuery { page: None, limit: None, kind: None })
            .await
            .unwrap();
        assert_eq!(failed_log.data.len(), 1);
        assert_eq!(failed_log.data[0].status, NotificationStatus::Failed);
        assert!(failed_log.data[0].error.is_some());
    }

    #[tokio::test]
    async fn test_opted_out_client_is_skipped_without_log() {
        let email = Arc::new(FakeEmailSender::default());
        let h = harness(email_only(email.clone())).await;

        // promotional 默认为 none；先建偏好记录
        h.preferences
            .update("c1", UpdatePreferenceRequest::default())
            .await
            .unwrap();

        let outcome = h
            .dispatch
            .dispatch(&template(TemplateKind::Promotional), vec![Delivery::new(fixtures::client("c1"))])
            .await;
        assert_eq!(outcome.skipped, 1);
        assert_eq!(email.sent_count(), 0);
        assert_eq!(h.log.unread_count("c1").await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_context_is_rendered_into_email() {
        let email = Arc::new(FakeEmailSender::default());
        let h = harness(email_only(email.clone())).await;

        let delivery = Delivery::new(fixtures::client("c1")).with_context(
            MessageContext::new().with("booking_link", "http://localhost:8000/portal/book/"),
        );
        h.dispatch.dispatch(&template(TemplateKind::InactiveClient), vec![delivery]).await;

        let sent = email.sent.lock().unwrap();
        assert_eq!(sent[0].subject, "Hi Client c1");
        assert_eq!(sent[0].text, "Book at http://localhost:8000/portal/book/");
    }

    #[tokio::test]
    async fn test_sms_requires_phone_and_enabled_channel() {
        let email = Arc::new(FakeEmailSender::default());
        let sms = Arc::new(FakeSmsSender::default());
        let h = harness(Channels {
            email: email.clone(),
            sms: Some(sms.clone()),
            push: None,
        })
        .await;

        h.preferences
            .update(
                "c1",
                UpdatePreferenceRequest {
                    booking_reminders: Some(DeliveryMethod::Sms),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        h.preferences
            .update(
                "c2",
                UpdatePreferenceRequest {
                    booking_reminders: Some(DeliveryMethod::Sms),
                    ..Default::default()
                },
            )
            .await
            .unwrap();

        let mut with_phone = fixtures::client("c1");
        with_phone.phone = "+15552223333".to_string();
        let without_phone = fixtures::client("c2");

        let outcome = h
            .dispatch
            .dispatch(
                &template(TemplateKind::BookingReminder),
                vec![Delivery::new(with_phone), Delivery::new(without_phone)],
            )
            .await;

        assert_eq!(outcome.sent, 1);
        assert_eq!(outcome.skipped, 1);
        assert_eq!(email.sent_count(), 0);
        assert_eq!(sms.sent.lock().unwrap()[0].0, "+15552223333");
    }

    #[tokio::test]
    async fn test_gone_push_subscription_is_deactivated() {
        let gone_endpoint = "https://push.example.com/gone";
        let live_endpoint = "https://push.example.com/live";
        let push = Arc::new(FakePushSender {
            gone: [gone_endpoint.to_string()].into_iter().collect(),
            ..Default::default()
        });
        let email = Arc::new(FakeEmailSender::default());
        let h = harness(Channels {
            email,
            sms: None,
            push: Some(push.clone()),
        })
        .await;

        for endpoint in [gone_endpoint, live_endpoint] {
            subscribe(&h.preferences, "c1", endpoint).await;
        }

        let outcome = h
            .dispatch
            .dispatch(&template(TemplateKind::CustomCampaign), vec![Delivery::new(fixtures::client("c1"))])
            .await;
        assert_eq!(outcome.sent, 1);

        let active = h.preferences.active_subscriptions("c1").await.unwrap();
        assert_eq!(active.len(), 1);
        assert_eq!(active[0].endpoint, live_endpoint);

        // 失效的订阅不再被推送
        h.dispatch
            .dispatch(&template(TemplateKind::CustomCampaign), vec![Delivery::new(fixtures::client("c1"))])
            .await;
        let delivered = push.delivered.lock().unwrap();
        assert_eq!(delivered.len(), 2);
        assert!(delivered.iter().all(|e| e == live_endpoint));
    }

    #[tokio::test]
    async fn test_push_payload_uses_rendered_message() {
        let push = Arc::new(FakePushSender::default());
        let h = harness(Channels {
            email: Arc::new(FakeEmailSender::default()),
            sms: None,
            push: Some(push.clone()),
        })
        .await;
        subscribe(&h.preferences, "c1", "https://push.example.com/live").await;

        let delivery = Delivery::new(fixtures::client("c1")).with_context(
            MessageContext::new().with("booking_link", "http://localhost:8000/portal/book/"),
        );
        h.dispatch.dispatch(&template(TemplateKind::CustomCampaign), vec![delivery]).await;

        let payloads = push.payloads.lock().unwrap();
        assert_eq!(payloads.len(), 1);
        assert_eq!(payloads[0].title, "Hi Client c1");
        assert_eq!(payloads[0].body, "Book at http://localhost:8000/portal/book/");
        assert_eq!(payloads[0].icon, PUSH_ICON);
        assert_eq!(payloads[0].url, h.dispatch.site_url());
    }

    #[tokio::test]
    async fn test_push_bookkeeping_failure_keeps_recipient_sent() {
        let config = Config::default();
        let db = Arc::new(Database::new(&config).await.unwrap());
        let email = Arc::new(FakeEmailSender::default());
        let h = harness_on(
            db.clone(),
            Channels {
                email: email.clone(),
                sms: None,
                push: Some(Arc::new(DroppingPushSender { db })),
            },
        )
        .await;
        subscribe(&h.preferences, "c1", "https://push.example.com/live").await;

        let outcome = h
            .dispatch
            .dispatch(&template(TemplateKind::CustomCampaign), vec![Delivery::new(fixtures::client("c1"))])
            .await;
        assert_eq!(outcome.sent, 1);
        assert_eq!(outcome.failed, 0);
        assert_eq!(email.sent_count(), 1);

        let history = h
            .log
            .history("c1", &NotificationHistoryQuery { page: None, limit: None, kind: None })
            .await
            .unwrap();
        let mut channels: Vec<Channel> = history.data.iter().map(|n| n.channel).collect();
        channels.sort_by_key(|c| c.to_string());
        assert_eq!(channels, vec![Channel::Email, Channel::Push]);
        assert!(history.data.iter().all(|n| n.status == NotificationStatus::Sent));
    }
}
