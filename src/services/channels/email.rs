use super::{DeliveryError, EmailMessage, EmailSender};
use crate::{config::Config, error::Result};
use async_trait::async_trait;
use lettre::{
    message::{Mailbox, MultiPart, SinglePart},
    transport::smtp::authentication::Credentials,
    AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor,
};
use serde_json::json;
use tracing::info;

fn from_mailbox(config: &Config) -> String {
    format!("{} <{}>", config.default_from_name, config.default_from_email)
}

/// 开发环境：邮件只写入日志
pub struct ConsoleEmailSender {
    from: String,
}

impl ConsoleEmailSender {
    pub fn new(config: &Config) -> Self {
        Self {
            from: from_mailbox(config),
        }
    }
}

#[async_trait]
impl EmailSender for ConsoleEmailSender {
    fn name(&self) -> &'static str {
        "console"
    }

    async fn send(&self, message: &EmailMessage) -> std::result::Result<(), DeliveryError> {
        info!(
            from = %self.from,
            to = %message.to,
            subject = %message.subject,
            body = %message.text,
            "Console email"
        );
        Ok(())
    }
}

/// SMTP（STARTTLS）发送
pub struct SmtpEmailSender {
    from: String,
    host: String,
    transport: AsyncSmtpTransport<Tokio1Executor>,
}

impl SmtpEmailSender {
    pub fn new(config: &Config) -> Result<Self> {
        let mut builder = AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(&config.smtp_host)
            .map_err(|e| crate::error::AppError::Internal(format!("Invalid SMTP relay: {}", e)))?
            .port(config.smtp_port);

        if !config.smtp_username.is_empty() {
            builder = builder.credentials(Credentials::new(
                config.smtp_username.clone(),
                config.smtp_password.clone(),
            ));
        }

        Ok(Self {
            from: from_mailbox(config),
            host: config.smtp_host.clone(),
            transport: builder.build(),
        })
    }

    fn build_message(&self, message: &EmailMessage) -> std::result::Result<Message, DeliveryError> {
        let from: Mailbox = self
            .from
            .parse()
            .map_err(|e| DeliveryError::Address(format!("{}: {}", self.from, e)))?;
        let to: Mailbox = message
            .to
            .parse()
            .map_err(|e| DeliveryError::Address(format!("{}: {}", message.to, e)))?;

        let builder = Message::builder().from(from).to(to).subject(message.subject.clone());
        let built = match &message.html {
            Some(html) => builder.multipart(MultiPart::alternative_plain_html(
                message.text.clone(),
                html.clone(),
            )),
            None => builder.singlepart(SinglePart::plain(message.text.clone())),
        };

        built.map_err(|e| DeliveryError::Transport(format!("Email build error: {}", e)))
    }
}

#[async_trait]
impl EmailSender for SmtpEmailSender {
    fn name(&self) -> &'static str {
        "smtp"
    }

    fn check_ready(&self) -> std::result::Result<(), DeliveryError> {
        if self.host.trim().is_empty() {
            return Err(DeliveryError::NotConfigured("SMTP_HOST is not set".to_string()));
        }
        Ok(())
    }

    async fn send(&self, message: &EmailMessage) -> std::result::Result<(), DeliveryError> {
        self.check_ready()?;
        let email = self.build_message(message)?;
        self.transport
            .send(email)
            .await
            .map_err(|e| DeliveryError::Transport(e.to_string()))?;
        info!(to = %message.to, "Email sent via SMTP");
        Ok(())
    }
}

/// SendGrid v3 Web API
pub struct SendGridEmailSender {
    client: reqwest::Client,
    api_url: String,
    api_key: Option<String>,
    from_email: String,
    from_name: String,
}

impl SendGridEmailSender {
    pub fn new(config: &Config, client: reqwest::Client) -> Self {
        Self {
            client,
            api_url: config.sendgrid_api_url.trim_end_matches('/').to_string(),
            api_key: config.sendgrid_api_key.clone(),
            from_email: config.default_from_email.clone(),
            from_name: config.default_from_name.clone(),
        }
    }
}

#[async_trait]
impl EmailSender for SendGridEmailSender {
    fn name(&self) -> &'static str {
        "sendgrid"
    }

    fn check_ready(&self) -> std::result::Result<(), DeliveryError> {
        match &self.api_key {
            Some(_) => Ok(()),
            None => Err(DeliveryError::NotConfigured(
                "SENDGRID_API_KEY is not set".to_string(),
            )),
        }
    }

    async fn send(&self, message: &EmailMessage) -> std::result::Result<(), DeliveryError> {
        let api_key = self
            .api_key
            .as_deref()
            .ok_or_else(|| DeliveryError::NotConfigured("SENDGRID_API_KEY is not set".to_string()))?;

        let mut content = vec![json!({ "type": "text/plain", "value": message.text })];
        if let Some(html) = &message.html {
            content.push(json!({ "type": "text/html", "value": html }));
        }

        let payload = json!({
            "personalizations": [{ "to": [{ "email": message.to }] }],
            "from": { "email": self.from_email, "name": self.from_name },
            "subject": message.subject,
            "content": content,
        });

        let response = self
            .client
            .post(format!("{}/v3/mail/send", self.api_url))
            .bearer_auth(api_key)
            .json(&payload)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            return Err(DeliveryError::Provider {
                status: status.as_u16(),
                message,
            });
        }

        info!(to = %message.to, "Email sent via SendGrid");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{body_partial_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn message() -> EmailMessage {
        EmailMessage {
            to: "parent@example.com".to_string(),
            subject: "Reminder".to_string(),
            text: "See you tomorrow".to_string(),
            html: Some("<p>See you tomorrow</p>".to_string()),
        }
    }

    fn sendgrid_config(url: &str, key: Option<&str>) -> Config {
        Config {
            sendgrid_api_url: url.to_string(),
            sendgrid_api_key: key.map(|k| k.to_string()),
            ..Config::default()
        }
    }

    #[tokio::test]
    async fn test_sendgrid_posts_mail() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v3/mail/send"))
            .and(header("authorization", "Bearer SG.test"))
            .and(body_partial_json(json!({
                "personalizations": [{ "to": [{ "email": "parent@example.com" }] }],
                "subject": "Reminder"
            })))
            .respond_with(ResponseTemplate::new(202))
            .expect(1)
            .mount(&server)
            .await;

        let sender = SendGridEmailSender::new(
            &sendgrid_config(&server.uri(), Some("SG.test")),
            reqwest::Client::new(),
        );
        sender.send(&message()).await.unwrap();
    }

    #[tokio::test]
    async fn test_sendgrid_error_status_is_provider_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v3/mail/send"))
            .respond_with(ResponseTemplate::new(401).set_body_string("bad key"))
            .mount(&server)
            .await;

        let sender = SendGridEmailSender::new(
            &sendgrid_config(&server.uri(), Some("SG.wrong")),
            reqwest::Client::new(),
        );
        let err = sender.send(&message()).await.unwrap_err();
        assert_eq!(
            err,
            DeliveryError::Provider {
                status: 401,
                message: "bad key".to_string()
            }
        );
    }

    #[test]
    fn test_sendgrid_without_key_is_not_ready() {
        let sender = SendGridEmailSender::new(
            &sendgrid_config("http://localhost", None),
            reqwest::Client::new(),
        );
        assert!(matches!(sender.check_ready(), Err(DeliveryError::NotConfigured(_))));
    }

    #[tokio::test]
    async fn test_smtp_rejects_bad_address_before_connecting() {
        let sender = SmtpEmailSender::new(&Config::default()).unwrap();
        let mut bad = message();
        bad.to = "not-an-address".to_string();
        let err = sender.send(&bad).await.unwrap_err();
        assert!(matches!(err, DeliveryError::Address(_)));
    }
}
