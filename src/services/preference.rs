use crate::{
    error::{AppError, Result},
    models::{preference::*, push::*},
    services::Database,
};
use chrono::Utc;
use std::sync::Arc;
use tracing::{debug, info, warn};
use validator::Validate;

pub const PREFERENCE_TABLE: &str = "notification_preference";
pub const PUSH_SUBSCRIPTION_TABLE: &str = "push_subscription";

/// 通知偏好与推送订阅存储
#[derive(Clone)]
pub struct PreferenceService {
    db: Arc<Database>,
}

impl PreferenceService {
    pub async fn new(db: Arc<Database>) -> Result<Self> {
        Ok(Self { db })
    }

    /// 已保存的偏好；没有记录时返回 None
    pub async fn find(&self, client_id: &str) -> Result<Option<NotificationPreference>> {
        self.db.get_by_id(PREFERENCE_TABLE, client_id).await
    }

    /// 读取偏好，不存在时返回默认值（不落库）
    pub async fn get_or_default(&self, client_id: &str) -> Result<NotificationPreference> {
        Ok(self
            .find(client_id)
            .await?
            .unwrap_or_else(|| NotificationPreference::new(client_id)))
    }

    pub async fn update(
        &self,
        client_id: &str,
        request: UpdatePreferenceRequest,
    ) -> Result<NotificationPreference> {
        request.validate()?;

        let mut preference = self.get_or_default(client_id).await?;
        preference.apply(request);

        debug!("Updating notification preferences for client {}", client_id);
        self.db.upsert(PREFERENCE_TABLE, client_id, preference).await
    }

    /// 保存推送订阅；同一 endpoint 重复订阅时更新归属与密钥并重新激活
    pub async fn subscribe_push(
        &self,
        client_id: &str,
        request: SubscribePushRequest,
    ) -> Result<PushSubscription> {
        request.validate()?;

        let id = PushSubscription::id_for_endpoint(&request.endpoint);
        let existing: Option<PushSubscription> =
            self.db.get_by_id(PUSH_SUBSCRIPTION_TABLE, &id).await?;

        let subscription = PushSubscription {
            id: id.clone(),
            client_id: client_id.to_string(),
            endpoint: request.endpoint,
            p256dh_key: request.keys.p256dh,
            auth_key: request.keys.auth,
            user_agent: request.user_agent,
            is_active: true,
            created_at: existing.as_ref().map(|s| s.created_at).unwrap_or_else(Utc::now),
            last_used_at: existing.and_then(|s| s.last_used_at),
        };

        info!("Push subscription {} saved for client {}", id, client_id);
        self.db.upsert(PUSH_SUBSCRIPTION_TABLE, &id, subscription).await
    }

    /// 取消订阅只会停用，不会删除
    pub async fn unsubscribe_push(&self, client_id: &str, endpoint: &str) -> Result<()> {
        let id = PushSubscription::id_for_endpoint(endpoint);
        let subscription: PushSubscription = self
            .db
            .get_by_id(PUSH_SUBSCRIPTION_TABLE, &id)
            .await?
            .ok_or_else(|| AppError::not_found("Push subscription"))?;

        if subscription.client_id != client_id {
            return Err(AppError::not_found("Push subscription"));
        }

        self.deactivate(&id).await
    }

    pub async fn active_subscriptions(&self, client_id: &str) -> Result<Vec<PushSubscription>> {
        let subscriptions: Vec<PushSubscription> = self
            .db
            .find_by(PUSH_SUBSCRIPTION_TABLE, "client_id", client_id)
            .await?;
        Ok(subscriptions.into_iter().filter(|s| s.is_active).collect())
    }

    pub async fn get_subscription(&self, id: &str) -> Result<PushSubscription> {
        self.db
            .get_by_id(PUSH_SUBSCRIPTION_TABLE, id)
            .await?
            .ok_or_else(|| AppError::not_found("Push subscription"))
    }

    pub async fn deactivate(&self, subscription_id: &str) -> Result<()> {
        let mut subscription = self.get_subscription(subscription_id).await?;
        if !subscription.is_active {
            return Ok(());
        }

        subscription.is_active = false;
        self.db
            .upsert(PUSH_SUBSCRIPTION_TABLE, subscription_id, subscription)
            .await?;
        warn!("Push subscription {} deactivated", subscription_id);
        Ok(())
    }

    pub async fn touch_last_used(&self, subscription_id: &str) -> Result<()> {
        let mut subscription = self.get_subscription(subscription_id).await?;
        subscription.last_used_at = Some(Utc::now());
        self.db
            .upsert(PUSH_SUBSCRIPTION_TABLE, subscription_id, subscription)
            .await?;
        Ok(())
    }
}
