use serde::{Deserialize, Serialize};
use std::env;

/// 邮件发送后端
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum EmailBackend {
    /// 仅写入日志（开发环境默认）
    Console,
    Smtp,
    Sendgrid,
}

impl std::str::FromStr for EmailBackend {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "console" => Ok(EmailBackend::Console),
            "smtp" => Ok(EmailBackend::Smtp),
            "sendgrid" => Ok(EmailBackend::Sendgrid),
            other => Err(anyhow::anyhow!("Unknown EMAIL_BACKEND: {}", other)),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    // Server configuration
    pub server_host: String,
    pub server_port: u16,
    pub environment: String,
    pub log_level: String,

    // Database configuration
    pub database_url: String,
    pub database_namespace: String,
    pub database_name: String,
    pub database_username: String,
    pub database_password: String,

    // Authentication configuration
    pub jwt_secret: String,

    // Site
    pub site_url: String,
    pub default_from_email: String,
    pub default_from_name: String,

    // Email configuration
    pub email_backend: EmailBackend,
    pub smtp_host: String,
    pub smtp_port: u16,
    pub smtp_username: String,
    pub smtp_password: String,
    pub sendgrid_api_key: Option<String>,
    pub sendgrid_api_url: String,

    // SMS (paid, disabled by default)
    pub sms_enabled: bool,
    pub twilio_account_sid: String,
    pub twilio_auth_token: String,
    pub twilio_phone_number: String,
    pub twilio_api_url: String,

    // Web push
    pub push_notifications_enabled: bool,
    pub vapid_public_key: String,
    pub vapid_private_key: String,
    pub vapid_subject: String,
    pub push_ttl_seconds: u32,

    // Background worker
    pub worker_enabled: bool,
    pub worker_concurrency: usize,
    pub worker_queue_size: usize,

    // Scheduler
    pub scheduler_enabled: bool,
    pub scheduler_poll_interval: u64,

    // Retention & cooldowns
    pub notification_retention_days: i64,
    pub reengagement_cooldown_days: i64,

    // CORS configuration
    pub cors_allowed_origins: String,
}

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        Ok(Config {
            server_host: env::var("SERVER_HOST").unwrap_or_else(|_| "0.0.0.0".to_string()),
            server_port: env::var("SERVER_PORT")
                .unwrap_or_else(|_| "3000".to_string())
                .parse()?,
            environment: env::var("ENVIRONMENT").unwrap_or_else(|_| "development".to_string()),
            log_level: env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string()),

            database_url: env::var("DATABASE_URL")
                .unwrap_or_else(|_| "http://localhost:8000".to_string()),
            database_namespace: env::var("DATABASE_NAMESPACE")
                .unwrap_or_else(|_| "atletas".to_string()),
            database_name: env::var("DATABASE_NAME")
                .unwrap_or_else(|_| "notifications".to_string()),
            database_username: env::var("DATABASE_USERNAME")
                .unwrap_or_else(|_| "root".to_string()),
            database_password: env::var("DATABASE_PASSWORD")
                .unwrap_or_else(|_| "root".to_string()),

            jwt_secret: env::var("JWT_SECRET")
                .map_err(|_| anyhow::anyhow!("JWT_SECRET must be set"))?,

            site_url: env::var("SITE_URL")
                .unwrap_or_else(|_| "http://localhost:8000".to_string()),
            default_from_email: env::var("DEFAULT_FROM_EMAIL")
                .unwrap_or_else(|_| "noreply@atletasworld.com".to_string()),
            default_from_name: env::var("DEFAULT_FROM_NAME")
                .unwrap_or_else(|_| "Atletas World".to_string()),

            email_backend: env::var("EMAIL_BACKEND")
                .unwrap_or_else(|_| "console".to_string())
                .parse()?,
            smtp_host: env::var("SMTP_HOST")
                .unwrap_or_else(|_| "localhost".to_string()),
            smtp_port: env::var("SMTP_PORT")
                .unwrap_or_else(|_| "587".to_string())
                .parse()?,
            smtp_username: env::var("SMTP_USERNAME").unwrap_or_default(),
            smtp_password: env::var("SMTP_PASSWORD").unwrap_or_default(),
            sendgrid_api_key: env::var("SENDGRID_API_KEY").ok().filter(|k| !k.is_empty()),
            sendgrid_api_url: env::var("SENDGRID_API_URL")
                .unwrap_or_else(|_| "https://api.sendgrid.com".to_string()),

            sms_enabled: env::var("SMS_ENABLED")
                .unwrap_or_else(|_| "false".to_string())
                .parse()?,
            twilio_account_sid: env::var("TWILIO_ACCOUNT_SID").unwrap_or_default(),
            twilio_auth_token: env::var("TWILIO_AUTH_TOKEN").unwrap_or_default(),
            twilio_phone_number: env::var("TWILIO_PHONE_NUMBER").unwrap_or_default(),
            twilio_api_url: env::var("TWILIO_API_URL")
                .unwrap_or_else(|_| "https://api.twilio.com".to_string()),

            push_notifications_enabled: env::var("PUSH_NOTIFICATIONS_ENABLED")
                .unwrap_or_else(|_| "false".to_string())
                .parse()?,
            vapid_public_key: env::var("VAPID_PUBLIC_KEY").unwrap_or_default(),
            vapid_private_key: env::var("VAPID_PRIVATE_KEY").unwrap_or_default(),
            vapid_subject: env::var("VAPID_SUBJECT")
                .unwrap_or_else(|_| "mailto:noreply@atletasworld.com".to_string()),
            push_ttl_seconds: env::var("PUSH_TTL_SECONDS")
                .unwrap_or_else(|_| "86400".to_string())
                .parse()?,

            worker_enabled: env::var("WORKER_ENABLED")
                .unwrap_or_else(|_| "false".to_string())
                .parse()?,
            worker_concurrency: env::var("WORKER_CONCURRENCY")
                .unwrap_or_else(|_| "2".to_string())
                .parse()?,
            worker_queue_size: env::var("WORKER_QUEUE_SIZE")
                .unwrap_or_else(|_| "256".to_string())
                .parse()?,

            scheduler_enabled: env::var("SCHEDULER_ENABLED")
                .unwrap_or_else(|_| "true".to_string())
                .parse()?,
            scheduler_poll_interval: env::var("SCHEDULER_POLL_INTERVAL")
                .unwrap_or_else(|_| "60".to_string())
                .parse()?,

            notification_retention_days: env::var("NOTIFICATION_RETENTION_DAYS")
                .unwrap_or_else(|_| "90".to_string())
                .parse()?,
            reengagement_cooldown_days: env::var("REENGAGEMENT_COOLDOWN_DAYS")
                .unwrap_or_else(|_| "14".to_string())
                .parse()?,

            cors_allowed_origins: env::var("CORS_ALLOWED_ORIGINS")
                .unwrap_or_else(|_| "http://localhost:8000".to_string()),
        })
    }

    pub fn is_production(&self) -> bool {
        self.environment == "production"
    }

    pub fn is_development(&self) -> bool {
        self.environment == "development"
    }

    /// 短信是否启用且已配置 Twilio 凭据
    pub fn sms_configured(&self) -> bool {
        !self.twilio_account_sid.is_empty()
            && !self.twilio_auth_token.is_empty()
            && !self.twilio_phone_number.is_empty()
    }

    pub fn vapid_configured(&self) -> bool {
        !self.vapid_private_key.is_empty() && !self.vapid_public_key.is_empty()
    }
}

impl Default for Config {
    /// 开发/测试用默认值：内存数据库、控制台邮件、付费渠道全部关闭
    fn default() -> Self {
        Self {
            server_host: "127.0.0.1".to_string(),
            server_port: 3000,
            environment: "development".to_string(),
            log_level: "info".to_string(),
            database_url: "mem://".to_string(),
            database_namespace: "atletas".to_string(),
            database_name: "notifications".to_string(),
            database_username: "root".to_string(),
            database_password: "root".to_string(),
            jwt_secret: "development-secret".to_string(),
            site_url: "http://localhost:8000".to_string(),
            default_from_email: "noreply@atletasworld.com".to_string(),
            default_from_name: "Atletas World".to_string(),
            email_backend: EmailBackend::Console,
            smtp_host: "localhost".to_string(),
            smtp_port: 587,
            smtp_username: String::new(),
            smtp_password: String::new(),
            sendgrid_api_key: None,
            sendgrid_api_url: "https://api.sendgrid.com".to_string(),
            sms_enabled: false,
            twilio_account_sid: String::new(),
            twilio_auth_token: String::new(),
            twilio_phone_number: String::new(),
            twilio_api_url: "https://api.twilio.com".to_string(),
            push_notifications_enabled: false,
            vapid_public_key: String::new(),
            vapid_private_key: String::new(),
            vapid_subject: "mailto:noreply@atletasworld.com".to_string(),
            push_ttl_seconds: 86400,
            worker_enabled: false,
            worker_concurrency: 2,
            worker_queue_size: 256,
            scheduler_enabled: false,
            scheduler_poll_interval: 60,
            notification_retention_days: 90,
            reengagement_cooldown_days: 14,
            cors_allowed_origins: "http://localhost:8000".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_keeps_paid_channels_off() {
        let config = Config::default();
        assert!(!config.sms_enabled);
        assert!(!config.push_notifications_enabled);
        assert!(!config.worker_enabled);
        assert_eq!(config.email_backend, EmailBackend::Console);
        assert_eq!(config.notification_retention_days, 90);
        assert_eq!(config.reengagement_cooldown_days, 14);
    }

    #[test]
    fn test_email_backend_parsing() {
        assert_eq!("SendGrid".parse::<EmailBackend>().unwrap(), EmailBackend::Sendgrid);
        assert_eq!(" smtp ".parse::<EmailBackend>().unwrap(), EmailBackend::Smtp);
        assert!("mailgun-ish".parse::<EmailBackend>().is_err());
    }

    #[test]
    fn test_sms_configured_requires_all_credentials() {
        let mut config = Config::default();
        config.twilio_account_sid = "AC123".to_string();
        config.twilio_auth_token = "token".to_string();
        assert!(!config.sms_configured());

        config.twilio_phone_number = "+15550001111".to_string();
        assert!(config.sms_configured());
    }
}
