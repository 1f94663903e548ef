use crate::{
    error::Result,
    models::{client::Client, template::NotificationTemplate},
};
use chrono::{NaiveDate, NaiveTime};
use handlebars::Handlebars;
use serde::Serialize;
use serde_json::{Map, Value};
use std::sync::Arc;

/// 模板变量，键值对形式
#[derive(Debug, Clone, Default, Serialize, PartialEq)]
#[serde(transparent)]
pub struct MessageContext(Map<String, Value>);

impl MessageContext {
    pub fn new() -> Self {
        Self::default()
    }

    /// 所有消息都带的基础变量
    pub fn for_client(client: &Client, site_url: &str) -> Self {
        Self::new()
            .with("client_name", client.display_name())
            .with("site_url", site_url)
    }

    pub fn with<V: Into<Value>>(mut self, key: &str, value: V) -> Self {
        self.0.insert(key.to_string(), value.into());
        self
    }

    pub fn insert<V: Into<Value>>(&mut self, key: &str, value: V) {
        self.0.insert(key.to_string(), value.into());
    }

    /// 调用方的变量覆盖已有同名变量
    pub fn merge(mut self, other: MessageContext) -> Self {
        self.0.extend(other.0);
        self
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }
}

/// 模板渲染结果
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RenderedMessage {
    pub subject: String,
    pub html: String,
    pub text: String,
    pub sms: String,
}

/// 消息渲染器：HTML 正文转义，纯文本与短信不转义
#[derive(Clone)]
pub struct MessageRenderer {
    html: Arc<Handlebars<'static>>,
    plain: Arc<Handlebars<'static>>,
}

impl MessageRenderer {
    pub fn new() -> Self {
        let html = Handlebars::new();

        let mut plain = Handlebars::new();
        plain.register_escape_fn(handlebars::no_escape);

        Self {
            html: Arc::new(html),
            plain: Arc::new(plain),
        }
    }

    pub fn render(&self, template: &NotificationTemplate, context: &MessageContext) -> Result<RenderedMessage> {
        Ok(RenderedMessage {
            subject: self.render_plain(&template.email_subject, context)?,
            html: self.html.render_template(&template.email_body_html, context)?,
            text: self.render_plain(&template.email_body_text, context)?,
            sms: self.render_plain(&template.sms_body, context)?,
        })
    }

    pub fn render_plain(&self, source: &str, context: &MessageContext) -> Result<String> {
        Ok(self.plain.render_template(source, context)?)
    }
}

impl Default for MessageRenderer {
    fn default() -> Self {
        Self::new()
    }
}

/// 例如 "December 15, 2024"
pub fn format_date(date: NaiveDate) -> String {
    date.format("%B %d, %Y").to_string()
}

/// 例如 "03:00 PM"
pub fn format_time(time: NaiveTime) -> String {
    time.format("%I:%M %p").to_string()
}

/// 超过 160 字符的短信截断
pub fn truncate_sms(body: &str) -> String {
    body.chars().take(160).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::template::{TargetFilter, TemplateKind};
    use chrono::Utc;

    fn template() -> NotificationTemplate {
        NotificationTemplate {
            id: "t1".to_string(),
            name: "Reminder".to_string(),
            kind: TemplateKind::BookingReminder,
            description: String::new(),
            email_subject: "See you {{ date }}, {{client_name}}".to_string(),
            email_body_html: "<p>{{client_name}} with {{coach_name}}</p>".to_string(),
            email_body_text: "{{client_name}} with {{coach_name}}{{missing}}".to_string(),
            sms_body: "{{client_name}}: {{time}}".to_string(),
            target_filters: TargetFilter::default(),
            is_active: true,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn test_render_escapes_html_only() {
        let context = MessageContext::new()
            .with("client_name", "Ana & Leo")
            .with("coach_name", "Mirko")
            .with("date", "June 01, 2024")
            .with("time", "03:00 PM");

        let rendered = MessageRenderer::new().render(&template(), &context).unwrap();
        assert_eq!(rendered.subject, "See you June 01, 2024, Ana & Leo");
        assert_eq!(rendered.html, "<p>Ana &amp; Leo with Mirko</p>");
        assert_eq!(rendered.text, "Ana & Leo with Mirko");
        assert_eq!(rendered.sms, "Ana & Leo: 03:00 PM");
    }

    #[test]
    fn test_date_time_formats() {
        let date = NaiveDate::from_ymd_opt(2024, 12, 15).unwrap();
        let time = NaiveTime::from_hms_opt(15, 0, 0).unwrap();
        assert_eq!(format_date(date), "December 15, 2024");
        assert_eq!(format_time(time), "03:00 PM");
    }

    #[test]
    fn test_truncate_sms() {
        assert_eq!(truncate_sms(&"a".repeat(200)).len(), 160);
        assert_eq!(truncate_sms("short"), "short");
    }

    #[test]
    fn test_caller_context_overrides_base() {
        let merged = MessageContext::new()
            .with("site_url", "http://a")
            .merge(MessageContext::new().with("site_url", "http://b"));
        assert_eq!(merged.get("site_url"), Some(&Value::from("http://b")));
    }
}
