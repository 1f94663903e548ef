//! 各类通知的模板变量

use crate::{
    models::client::{Assessment, Booking, ClientPackage, Event},
    services::renderer::{format_date, format_time, MessageContext},
};

pub fn link(site_url: &str, path: &str) -> String {
    format!("{}{}", site_url.trim_end_matches('/'), path)
}

/// 营销活动与每周提醒
pub fn campaign(site_url: &str) -> MessageContext {
    MessageContext::new()
        .with("booking_link", link(site_url, "/portal/book/"))
        .with("packages_link", link(site_url, "/portal/packages/"))
}

pub fn reengagement(site_url: &str, weeks_inactive: i64) -> MessageContext {
    campaign(site_url)
        .with("weeks_inactive", weeks_inactive)
        .with("special_offer_link", link(site_url, "/portal/packages/"))
}

pub fn booking(site_url: &str, booking: &Booking) -> MessageContext {
    MessageContext::new()
        .with(
            "player_name",
            booking.player_name.clone().unwrap_or_else(|| "Your player".to_string()),
        )
        .with(
            "session_type",
            booking
                .session_type
                .clone()
                .unwrap_or_else(|| "Training Session".to_string()),
        )
        .with("coach_name", booking.coach_name.clone())
        .with("date", format_date(booking.scheduled_date))
        .with("time", format_time(booking.scheduled_time))
        .with("booking_link", link(site_url, "/portal/bookings/"))
}

pub fn package(site_url: &str, package: &ClientPackage, days_remaining: i64) -> MessageContext {
    MessageContext::new()
        .with("package_name", package.package_name.clone())
        .with("expiry_date", format_date(package.expiry_date))
        .with("days_remaining", days_remaining)
        .with("sessions_remaining", package.sessions_remaining)
        .with("packages_link", link(site_url, "/portal/packages/"))
}

pub fn event(site_url: &str, event: &Event) -> MessageContext {
    MessageContext::new()
        .with("event_name", event.name.clone())
        .with("event_date", format_date(event.event_start_date))
        .with(
            "event_location",
            event.location.clone().unwrap_or_else(|| "TBD".to_string()),
        )
        .with("event_link", link(site_url, "/portal/packages/"))
}

pub fn assessment(site_url: &str, assessment: &Assessment) -> MessageContext {
    MessageContext::new()
        .with("player_name", assessment.player_name.clone())
        .with("coach_name", assessment.coach_name.clone())
        .with(
            "training_type",
            assessment
                .training_type
                .clone()
                .unwrap_or_else(|| "Training Session".to_string()),
        )
        .with("date", format_date(assessment.assessment_date))
        .with("assessment_link", link(site_url, "/portal/assessments/"))
}

/// 测试邮件使用的示例数据
pub fn sample(site_url: &str) -> MessageContext {
    MessageContext::new()
        .with("client_name", "Test User")
        .with("site_url", site_url)
        .with("player_name", "Test Player")
        .with("date", "December 15, 2024")
        .with("time", "3:00 PM")
        .with("session_type", "Private Training")
        .with("training_type", "Private Training")
        .with("coach_name", "Coach Mirko")
        .with("package_name", "Elite Package")
        .with("expiry_date", "December 31, 2024")
        .with("days_remaining", 7)
        .with("sessions_remaining", 4)
        .with("weeks_inactive", 3)
        .with("event_name", "Winter Skills Camp")
        .with("event_date", "December 20, 2024")
        .with("event_location", "Main Field")
        .with("booking_link", link(site_url, "/portal/book/"))
        .with("packages_link", link(site_url, "/portal/packages/"))
        .with("event_link", link(site_url, "/portal/packages/"))
        .with("assessment_link", link(site_url, "/portal/assessments/"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::client::BookingStatus;
    use crate::services::targeting::fixtures;
    use chrono::NaiveDate;
    use serde_json::Value;

    #[test]
    fn test_booking_context_defaults() {
        let mut booking = fixtures::booking(
            "c1",
            NaiveDate::from_ymd_opt(2024, 12, 15).unwrap(),
            BookingStatus::Confirmed,
        );
        booking.player_name = None;
        booking.session_type = None;

        let context = super::booking("http://localhost:8000/", &booking);
        assert_eq!(context.get("player_name"), Some(&Value::from("Your player")));
        assert_eq!(context.get("session_type"), Some(&Value::from("Training Session")));
        assert_eq!(context.get("date"), Some(&Value::from("December 15, 2024")));
        assert_eq!(context.get("time"), Some(&Value::from("03:00 PM")));
        assert_eq!(
            context.get("booking_link"),
            Some(&Value::from("http://localhost:8000/portal/bookings/"))
        );
    }

    #[test]
    fn test_event_location_falls_back_to_tbd() {
        let event = Event {
            id: "e1".to_string(),
            name: "Summer Camp".to_string(),
            event_start_date: NaiveDate::from_ymd_opt(2024, 7, 1).unwrap(),
            event_end_date: None,
            location: None,
            is_active: true,
            created_at: chrono::Utc::now(),
        };
        let context = super::event("http://localhost:8000", &event);
        assert_eq!(context.get("event_location"), Some(&Value::from("TBD")));
    }

    #[test]
    fn test_assessment_context() {
        let assessment = Assessment {
            id: "as1".to_string(),
            client_id: "c1".to_string(),
            booking_id: None,
            player_name: "Leo".to_string(),
            coach_name: "Mirko".to_string(),
            training_type: None,
            assessment_date: NaiveDate::from_ymd_opt(2024, 12, 15).unwrap(),
            notification_sent: false,
            created_at: chrono::Utc::now(),
        };
        let context = super::assessment("http://localhost:8000", &assessment);
        assert_eq!(context.get("training_type"), Some(&Value::from("Training Session")));
        assert_eq!(context.get("date"), Some(&Value::from("December 15, 2024")));
        assert_eq!(
            context.get("assessment_link"),
            Some(&Value::from("http://localhost:8000/portal/assessments/"))
        );
    }
}
