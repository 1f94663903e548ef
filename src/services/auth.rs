use crate::{
    config::Config,
    error::{AppError, Result},
};
use jsonwebtoken::{decode, Algorithm, DecodingKey, Validation};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

pub const ADMIN_ROLE: &str = "admin";

/// JWT Claims 结构；令牌由外部签发，这里只做校验
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    pub sub: String,        // 客户 ID
    pub exp: i64,           // 过期时间
    pub iat: i64,           // 签发时间
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub roles: Vec<String>,
}

/// 已认证的调用方
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    pub id: String,
    pub email: Option<String>,
    pub roles: Vec<String>,
}

impl User {
    pub fn is_admin(&self) -> bool {
        self.roles.iter().any(|role| role == ADMIN_ROLE)
    }
}

impl From<Claims> for User {
    fn from(claims: Claims) -> Self {
        Self {
            id: claims.sub,
            email: claims.email,
            roles: claims.roles,
        }
    }
}

#[derive(Clone)]
pub struct AuthService {
    decoding_key: DecodingKey,
}

impl AuthService {
    pub fn new(config: &Config) -> Self {
        Self {
            decoding_key: DecodingKey::from_secret(config.jwt_secret.as_bytes()),
        }
    }

    /// 验证 JWT token
    pub fn verify_jwt(&self, token: &str) -> Result<Claims> {
        let validation = Validation::new(Algorithm::HS256);

        match decode::<Claims>(token, &self.decoding_key, &validation) {
            Ok(token_data) => {
                debug!("JWT token verified for: {}", token_data.claims.sub);
                Ok(token_data.claims)
            }
            Err(e) => {
                warn!("JWT verification failed: {}", e);
                Err(AppError::Jwt(e))
            }
        }
    }

    /// 从 Authorization 头解析出调用方
    pub fn authenticate(&self, header: Option<&str>) -> Result<User> {
        let token = header
            .and_then(|value| value.strip_prefix("Bearer "))
            .ok_or_else(|| AppError::unauthorized("Missing bearer token"))?;
        Ok(self.verify_jwt(token.trim())?.into())
    }
}

#[cfg(test)]
pub(crate) mod tokens {
    use super::*;
    use jsonwebtoken::{encode, EncodingKey, Header};

    pub fn issue(secret: &str, sub: &str, roles: &[&str], ttl_secs: i64) -> String {
        let now = chrono::Utc::now().timestamp();
        let claims = Claims {
            sub: sub.to_string(),
            exp: now + ttl_secs,
            iat: now,
            email: Some(format!("{}@example.com", sub)),
            roles: roles.iter().map(|r| r.to_string()).collect(),
        };
        encode(
            &Header::new(Algorithm::HS256),
            &claims,
            &EncodingKey::from_secret(secret.as_bytes()),
        )
        .unwrap()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn service() -> AuthService {
        AuthService::new(&Config::default())
    }

    #[test]
    fn test_valid_token_yields_user() {
        let config = Config::default();
        let token = tokens::issue(&config.jwt_secret, "client-1", &["admin"], 3600);
        let user = service()
            .authenticate(Some(&format!("Bearer {}", token)))
            .unwrap();
        assert_eq!(user.id, "client-1");
        assert_eq!(user.email.as_deref(), Some("client-1@example.com"));
        assert!(user.is_admin());
    }

    #[test]
    fn test_rejects_missing_or_bad_tokens() {
        let auth = service();
        assert!(matches!(auth.authenticate(None), Err(AppError::Authentication(_))));
        assert!(matches!(
            auth.authenticate(Some("Basic abc")),
            Err(AppError::Authentication(_))
        ));

        let forged = tokens::issue("another-secret", "client-1", &[], 3600);
        assert!(matches!(
            auth.authenticate(Some(&format!("Bearer {}", forged))),
            Err(AppError::Jwt(_))
        ));

        let expired = tokens::issue(&Config::default().jwt_secret, "client-1", &[], -3600);
        assert!(auth.authenticate(Some(&format!("Bearer {}", expired))).is_err());
    }
}
