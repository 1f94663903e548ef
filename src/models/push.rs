use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use validator::Validate;

/// 浏览器推送订阅，以 endpoint 的 SHA-256 为主键
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PushSubscription {
    pub id: String,
    pub client_id: String,
    pub endpoint: String,
    pub p256dh_key: String,
    pub auth_key: String,
    pub user_agent: Option<String>,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub last_used_at: Option<DateTime<Utc>>,
}

impl PushSubscription {
    pub fn id_for_endpoint(endpoint: &str) -> String {
        hex::encode(Sha256::digest(endpoint.as_bytes()))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PushKeys {
    pub p256dh: String,
    pub auth: String,
}

/// 浏览器 `PushSubscription.toJSON()` 的格式
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct SubscribePushRequest {
    #[validate(url(message = "Invalid push endpoint"))]
    pub endpoint: String,
    pub keys: PushKeys,
    pub user_agent: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UnsubscribePushRequest {
    pub endpoint: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_id_is_stable_per_endpoint() {
        let a = PushSubscription::id_for_endpoint("https://push.example.com/abc");
        let b = PushSubscription::id_for_endpoint("https://push.example.com/abc");
        let c = PushSubscription::id_for_endpoint("https://push.example.com/abd");
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_eq!(a.len(), 64);
    }
}
