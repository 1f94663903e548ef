pub mod email;
pub mod push;
pub mod sms;

use crate::{
    config::{Config, EmailBackend},
    error::{AppError, Result},
    models::{notification::Channel, push::PushSubscription},
};
use async_trait::async_trait;
use serde::Serialize;
use std::sync::Arc;

pub use email::{ConsoleEmailSender, SendGridEmailSender, SmtpEmailSender};
pub use push::WebPushSender;
pub use sms::TwilioSmsSender;

/// 投递失败原因
#[derive(Debug, Clone, thiserror::Error, PartialEq)]
pub enum DeliveryError {
    #[error("{0} notifications are disabled")]
    Disabled(Channel),

    #[error("{0}")]
    NotConfigured(String),

    #[error("Invalid address: {0}")]
    Address(String),

    #[error("Provider returned {status}: {message}")]
    Provider { status: u16, message: String },

    /// 推送端点已失效（HTTP 404/410）
    #[error("Push subscription is no longer valid")]
    Gone,

    #[error("Transport error: {0}")]
    Transport(String),

    /// 订阅密钥无效或负载加密失败
    #[error("Push payload encryption failed: {0}")]
    Encryption(String),
}

impl DeliveryError {
    pub fn is_gone(&self) -> bool {
        matches!(self, DeliveryError::Gone)
    }
}

impl From<reqwest::Error> for DeliveryError {
    fn from(err: reqwest::Error) -> Self {
        DeliveryError::Transport(err.to_string())
    }
}

impl From<DeliveryError> for AppError {
    fn from(err: DeliveryError) -> Self {
        match err {
            DeliveryError::Disabled(_) | DeliveryError::NotConfigured(_) => {
                AppError::ServiceUnavailable(err.to_string())
            }
            DeliveryError::Address(msg) => AppError::Validation(msg),
            other => AppError::ExternalService(other.to_string()),
        }
    }
}

/// 待发送的邮件
#[derive(Debug, Clone, PartialEq)]
pub struct EmailMessage {
    pub to: String,
    pub subject: String,
    pub text: String,
    pub html: Option<String>,
}

#[async_trait]
pub trait EmailSender: Send + Sync {
    fn name(&self) -> &'static str;

    /// 检查凭据等配置是否齐全
    fn check_ready(&self) -> std::result::Result<(), DeliveryError> {
        Ok(())
    }

    async fn send(&self, message: &EmailMessage) -> std::result::Result<(), DeliveryError>;
}

#[async_trait]
pub trait SmsSender: Send + Sync {
    fn check_ready(&self) -> std::result::Result<(), DeliveryError> {
        Ok(())
    }

    /// 返回服务商的消息ID
    async fn send(&self, to: &str, body: &str) -> std::result::Result<String, DeliveryError>;
}

/// Service Worker 展示的通知内容，加密后随推送发送
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct PushPayload {
    pub title: String,
    pub body: String,
    pub url: String,
    pub icon: String,
    pub timestamp: i64,
}

#[async_trait]
pub trait PushSender: Send + Sync {
    fn public_key(&self) -> &str;

    fn check_ready(&self) -> std::result::Result<(), DeliveryError> {
        Ok(())
    }

    async fn send(
        &self,
        subscription: &PushSubscription,
        payload: &PushPayload,
    ) -> std::result::Result<(), DeliveryError>;
}

/// 已启用的投递渠道；未启用的付费渠道为 None
#[derive(Clone)]
pub struct Channels {
    pub email: Arc<dyn EmailSender>,
    pub sms: Option<Arc<dyn SmsSender>>,
    pub push: Option<Arc<dyn PushSender>>,
}

impl Channels {
    pub fn from_config(config: &Config) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(15))
            .build()
            .map_err(|e| AppError::Internal(format!("Failed to build HTTP client: {}", e)))?;

        let email: Arc<dyn EmailSender> = match config.email_backend {
            EmailBackend::Console => Arc::new(ConsoleEmailSender::new(config)),
            EmailBackend::Smtp => Arc::new(SmtpEmailSender::new(config)?),
            EmailBackend::Sendgrid => Arc::new(SendGridEmailSender::new(config, http.clone())),
        };

        let sms: Option<Arc<dyn SmsSender>> = if config.sms_enabled {
            Some(Arc::new(TwilioSmsSender::new(config, http.clone())))
        } else {
            None
        };

        let push: Option<Arc<dyn PushSender>> = if config.push_notifications_enabled {
            Some(Arc::new(WebPushSender::new(config, http)))
        } else {
            None
        };

        Ok(Self { email, sms, push })
    }

    pub fn sms_enabled(&self) -> bool {
        self.sms.is_some()
    }

    pub fn push_enabled(&self) -> bool {
        self.push.is_some()
    }

    /// 已启用但配置不全的渠道以 ServiceUnavailable 报告
    pub fn check_ready(&self) -> Result<()> {
        self.email.check_ready()?;
        if let Some(sms) = &self.sms {
            sms.check_ready()?;
        }
        if let Some(push) = &self.push {
            push.check_ready()?;
        }
        Ok(())
    }

    pub fn vapid_public_key(&self) -> Option<&str> {
        self.push.as_ref().map(|p| p.public_key())
    }
}

#[cfg(test)]
pub(crate) mod fakes {
    use super::*;
    use std::collections::HashSet;
    use std::sync::Mutex;

    /// 记录发送内容；对 `fail_for` 中的地址返回服务商错误
    #[derive(Default)]
    pub struct FakeEmailSender {
        pub sent: Mutex<Vec<EmailMessage>>,
        pub fail_for: HashSet<String>,
    }

    impl FakeEmailSender {
        pub fn failing_for(addresses: &[&str]) -> Self {
            Self {
                sent: Mutex::new(Vec::new()),
                fail_for: addresses.iter().map(|a| a.to_string()).collect(),
            }
        }

        pub fn sent_count(&self) -> usize {
            self.sent.lock().unwrap().len()
        }
    }

    #[async_trait]
    impl EmailSender for FakeEmailSender {
        fn name(&self) -> &'static str {
            "fake"
        }

        async fn send(&self, message: &EmailMessage) -> std::result::Result<(), DeliveryError> {
            if self.fail_for.contains(&message.to) {
                return Err(DeliveryError::Provider {
                    status: 500,
                    message: "mailbox unavailable".to_string(),
                });
            }
            self.sent.lock().unwrap().push(message.clone());
            Ok(())
        }
    }

    #[derive(Default)]
    pub struct FakeSmsSender {
        pub sent: Mutex<Vec<(String, String)>>,
    }

    #[async_trait]
    impl SmsSender for FakeSmsSender {
        async fn send(&self, to: &str, body: &str) -> std::result::Result<String, DeliveryError> {
            self.sent.lock().unwrap().push((to.to_string(), body.to_string()));
            Ok("SM-fake".to_string())
        }
    }

    /// 记录端点与负载；对 `gone` 中的端点返回 Gone
    #[derive(Default)]
    pub struct FakePushSender {
        pub delivered: Mutex<Vec<String>>,
        pub payloads: Mutex<Vec<PushPayload>>,
        pub gone: HashSet<String>,
    }

    #[async_trait]
    impl PushSender for FakePushSender {
        fn public_key(&self) -> &str {
            "fake-public-key"
        }

        async fn send(
            &self,
            subscription: &PushSubscription,
            payload: &PushPayload,
        ) -> std::result::Result<(), DeliveryError> {
            if self.gone.contains(&subscription.endpoint) {
                return Err(DeliveryError::Gone);
            }
            self.delivered.lock().unwrap().push(subscription.endpoint.clone());
            self.payloads.lock().unwrap().push(payload.clone());
            Ok(())
        }
    }
}
