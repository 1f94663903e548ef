use super::{DeliveryError, SmsSender};
use crate::{config::Config, services::renderer::truncate_sms};
use async_trait::async_trait;
use serde::Deserialize;
use tracing::info;

#[derive(Debug, Deserialize)]
struct TwilioMessage {
    sid: String,
}

#[derive(Debug, Deserialize)]
struct TwilioError {
    message: String,
}

/// Twilio Messages API
pub struct TwilioSmsSender {
    client: reqwest::Client,
    api_url: String,
    account_sid: String,
    auth_token: String,
    from_number: String,
}

impl TwilioSmsSender {
    pub fn new(config: &Config, client: reqwest::Client) -> Self {
        Self {
            client,
            api_url: config.twilio_api_url.trim_end_matches('/').to_string(),
            account_sid: config.twilio_account_sid.clone(),
            auth_token: config.twilio_auth_token.clone(),
            from_number: config.twilio_phone_number.clone(),
        }
    }
}

#[async_trait]
impl SmsSender for TwilioSmsSender {
    fn check_ready(&self) -> Result<(), DeliveryError> {
        if self.account_sid.is_empty() || self.auth_token.is_empty() || self.from_number.is_empty() {
            return Err(DeliveryError::NotConfigured(
                "Twilio credentials are not configured".to_string(),
            ));
        }
        Ok(())
    }

    async fn send(&self, to: &str, body: &str) -> Result<String, DeliveryError> {
        self.check_ready()?;

        let body = truncate_sms(body);
        let url = format!(
            "{}/2010-04-01/Accounts/{}/Messages.json",
            self.api_url, self.account_sid
        );

        let response = self
            .client
            .post(url)
            .basic_auth(&self.account_sid, Some(&self.auth_token))
            .form(&[("To", to), ("From", self.from_number.as_str()), ("Body", body.as_str())])
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            let message = serde_json::from_str::<TwilioError>(&text)
                .map(|e| e.message)
                .unwrap_or(text);
            return Err(DeliveryError::Provider {
                status: status.as_u16(),
                message,
            });
        }

        let sent: TwilioMessage = response.json().await?;
        info!(to = %to, sid = %sent.sid, "SMS sent via Twilio");
        Ok(sent.sid)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::matchers::{body_string_contains, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn config(api_url: &str) -> Config {
        Config {
            sms_enabled: true,
            twilio_account_sid: "AC123".to_string(),
            twilio_auth_token: "secret".to_string(),
            twilio_phone_number: "+15550001111".to_string(),
            twilio_api_url: api_url.to_string(),
            ..Config::default()
        }
    }

    #[tokio::test]
    async fn test_twilio_send_uses_basic_auth_and_form() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/2010-04-01/Accounts/AC123/Messages.json"))
            // base64("AC123:secret")
            .and(header("authorization", "Basic QUMxMjM6c2VjcmV0"))
            .and(body_string_contains("From=%2B15550001111"))
            .respond_with(ResponseTemplate::new(201).set_body_json(json!({ "sid": "SM42" })))
            .expect(1)
            .mount(&server)
            .await;

        let sender = TwilioSmsSender::new(&config(&server.uri()), reqwest::Client::new());
        let sid = sender.send("+15552223333", "Session tomorrow").await.unwrap();
        assert_eq!(sid, "SM42");
    }

    #[tokio::test]
    async fn test_twilio_truncates_long_bodies() {
        let server = MockServer::start().await;
        let expected = format!("Body={}", "a".repeat(160));
        Mock::given(method("POST"))
            .and(body_string_contains(expected.as_str()))
            .respond_with(ResponseTemplate::new(201).set_body_json(json!({ "sid": "SM43" })))
            .expect(1)
            .mount(&server)
            .await;

        let sender = TwilioSmsSender::new(&config(&server.uri()), reqwest::Client::new());
        sender.send("+15552223333", &"a".repeat(200)).await.unwrap();

        let requests = server.received_requests().await.unwrap();
        let body = String::from_utf8(requests[0].body.clone()).unwrap();
        assert!(!body.contains(&"a".repeat(161)));
    }

    #[tokio::test]
    async fn test_twilio_error_message_is_surfaced() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(
                ResponseTemplate::new(400)
                    .set_body_json(json!({ "code": 21211, "message": "Invalid 'To' Phone Number" })),
            )
            .mount(&server)
            .await;

        let sender = TwilioSmsSender::new(&config(&server.uri()), reqwest::Client::new());
        let err = sender.send("12", "hi").await.unwrap_err();
        assert_eq!(
            err,
            DeliveryError::Provider {
                status: 400,
                message: "Invalid 'To' Phone Number".to_string()
            }
        );
    }

    #[tokio::test]
    async fn test_missing_credentials_fail_without_request() {
        let sender = TwilioSmsSender::new(&Config::default(), reqwest::Client::new());
        let err = sender.send("+15552223333", "hi").await.unwrap_err();
        assert!(matches!(err, DeliveryError::NotConfigured(_)));
    }
}
