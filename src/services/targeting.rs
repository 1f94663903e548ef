use crate::models::{
    client::{Client, RosterSnapshot},
    template::TargetFilter,
};
use chrono::{Duration, NaiveDate};

/// 定向引擎：在名册快照上对过滤条件求值，纯函数
pub struct TargetingEngine;

impl TargetingEngine {
    /// 返回匹配的活跃客户；多个条件之间为 AND
    pub fn evaluate<'a>(
        filter: &TargetFilter,
        snapshot: &'a RosterSnapshot,
        today: NaiveDate,
    ) -> Vec<&'a Client> {
        snapshot
            .clients
            .iter()
            .filter(|client| client.is_active)
            .filter(|client| Self::matches(filter, snapshot, client, today))
            .collect()
    }

    /// 只返回匹配数量
    pub fn preview(filter: &TargetFilter, snapshot: &RosterSnapshot, today: NaiveDate) -> usize {
        Self::evaluate(filter, snapshot, today).len()
    }

    fn matches(filter: &TargetFilter, snapshot: &RosterSnapshot, client: &Client, today: NaiveDate) -> bool {
        if filter.requires_active_package()
            && !snapshot
                .packages_for(&client.id)
                .any(|p| p.is_active_on(today))
        {
            return false;
        }

        if let Some(weeks) = filter.inactive_weeks() {
            let cutoff = today - Duration::weeks(i64::from(weeks));
            let active_since_cutoff = snapshot
                .bookings_for(&client.id)
                .any(|b| b.status.counts_as_activity() && b.scheduled_date > cutoff);
            if active_since_cutoff {
                return false;
            }
        }

        if let Some(min_sessions) = filter.min_sessions() {
            let min_sessions = i64::from(min_sessions);
            if !snapshot
                .packages_for(&client.id)
                .any(|p| i64::from(p.sessions_used) >= min_sessions)
            {
                return false;
            }
        }

        true
    }
}

#[cfg(test)]
pub(crate) mod fixtures {
    use crate::models::client::*;
    use chrono::{NaiveDate, NaiveTime, Utc};

    pub fn client(id: &str) -> Client {
        Client {
            id: id.to_string(),
            first_name: format!("Client {}", id),
            last_name: String::new(),
            username: id.to_string(),
            email: format!("{}@example.com", id),
            phone: String::new(),
            is_active: true,
            created_at: Utc::now(),
        }
    }

    pub fn booking(client_id: &str, date: NaiveDate, status: BookingStatus) -> Booking {
        Booking {
            id: format!("b-{}-{}", client_id, date),
            client_id: client_id.to_string(),
            player_name: Some("Leo".to_string()),
            coach_name: "Mirko".to_string(),
            session_type: Some("Private Training".to_string()),
            scheduled_date: date,
            scheduled_time: NaiveTime::from_hms_opt(15, 0, 0).unwrap(),
            status,
            created_at: Utc::now(),
        }
    }

    pub fn package(client_id: &str, expiry_date: NaiveDate, sessions_used: i32) -> ClientPackage {
        ClientPackage {
            id: format!("p-{}", client_id),
            client_id: client_id.to_string(),
            package_name: "Basic 8".to_string(),
            start_date: expiry_date - chrono::Duration::days(60),
            expiry_date,
            sessions_remaining: 8 - sessions_used,
            sessions_used,
            status: PackageStatus::Active,
            created_at: Utc::now(),
        }
    }
}
