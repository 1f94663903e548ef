use super::{DeliveryError, PushPayload, PushSender};
use crate::{config::Config, models::push::PushSubscription};
use aes_gcm::{
    aead::{Aead, KeyInit},
    Aes128Gcm, Nonce,
};
use async_trait::async_trait;
use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use chrono::{Duration, Utc};
use hkdf::Hkdf;
use jsonwebtoken::{encode, Algorithm, EncodingKey, Header};
use p256::{ecdh::EphemeralSecret, elliptic_curve::sec1::ToEncodedPoint, PublicKey};
use rand::{rngs::OsRng, RngCore};
use reqwest::StatusCode;
use serde::Serialize;
use sha2::Sha256;
use tracing::debug;
use url::Url;

/// aes128gcm 单条记录大小，负载只占一条记录
const RECORD_SIZE: u32 = 4096;
/// 记录内的分隔符与 GCM 标签占 17 字节
const MAX_PLAINTEXT: usize = RECORD_SIZE as usize - 17;

/// VAPID 令牌声明
#[derive(Debug, Serialize)]
struct VapidClaims {
    aud: String,
    exp: i64,
    sub: String,
}

/// Web Push（VAPID）发送，负载按 RFC 8291 用订阅的 p256dh/auth 密钥加密
pub struct WebPushSender {
    client: reqwest::Client,
    public_key: String,
    private_key_pem: String,
    subject: String,
    ttl_seconds: u32,
}

impl WebPushSender {
    pub fn new(config: &Config, client: reqwest::Client) -> Self {
        Self {
            client,
            public_key: config.vapid_public_key.clone(),
            // 环境变量中的换行常被写成 "\n"
            private_key_pem: config.vapid_private_key.replace("\\n", "\n"),
            subject: config.vapid_subject.clone(),
            ttl_seconds: config.push_ttl_seconds,
        }
    }

    fn signing_key(&self) -> Result<EncodingKey, DeliveryError> {
        EncodingKey::from_ec_pem(self.private_key_pem.as_bytes())
            .map_err(|e| DeliveryError::NotConfigured(format!("Invalid VAPID private key: {}", e)))
    }

    fn vapid_token(&self, endpoint: &Url) -> Result<String, DeliveryError> {
        let claims = VapidClaims {
            aud: endpoint.origin().ascii_serialization(),
            exp: (Utc::now() + Duration::hours(12)).timestamp(),
            sub: self.subject.clone(),
        };

        encode(&Header::new(Algorithm::ES256), &claims, &self.signing_key()?)
            .map_err(|e| DeliveryError::Transport(format!("Failed to sign VAPID token: {}", e)))
    }
}

#[async_trait]
impl PushSender for WebPushSender {
    fn public_key(&self) -> &str {
        &self.public_key
    }

    fn check_ready(&self) -> Result<(), DeliveryError> {
        if self.public_key.is_empty() || self.private_key_pem.is_empty() {
            return Err(DeliveryError::NotConfigured(
                "VAPID keys are not configured".to_string(),
            ));
        }
        self.signing_key().map(|_| ())
    }

    async fn send(&self, subscription: &PushSubscription, payload: &PushPayload) -> Result<(), DeliveryError> {
        self.check_ready()?;

        let endpoint = Url::parse(&subscription.endpoint)
            .map_err(|e| DeliveryError::Address(format!("{}: {}", subscription.endpoint, e)))?;
        let token = self.vapid_token(&endpoint)?;

        let plaintext = serde_json::to_vec(payload)
            .map_err(|e| DeliveryError::Encryption(e.to_string()))?;
        let body = encrypt_payload(&subscription.p256dh_key, &subscription.auth_key, &plaintext)?;

        let response = self
            .client
            .post(endpoint)
            .header(
                reqwest::header::AUTHORIZATION,
                format!("vapid t={}, k={}", token, self.public_key),
            )
            .header("TTL", self.ttl_seconds.to_string())
            .header(reqwest::header::CONTENT_ENCODING, "aes128gcm")
            .header(reqwest::header::CONTENT_TYPE, "application/octet-stream")
            .body(body)
            .send()
            .await?;

        match response.status() {
            StatusCode::NOT_FOUND | StatusCode::GONE => Err(DeliveryError::Gone),
            status if status.is_success() => {
                debug!("Push delivered to subscription {}", subscription.id);
                Ok(())
            }
            status => Err(DeliveryError::Provider {
                status: status.as_u16(),
                message: response.text().await.unwrap_or_default(),
            }),
        }
    }
}

fn decode_key(value: &str, name: &str) -> Result<Vec<u8>, DeliveryError> {
    URL_SAFE_NO_PAD
        .decode(value.trim().trim_end_matches('='))
        .map_err(|e| DeliveryError::Encryption(format!("Invalid {} key: {}", name, e)))
}

/// 由 ECDH 共享密钥推导内容加密密钥与 nonce
fn content_keys(
    auth_secret: &[u8],
    shared_secret: &[u8],
    ua_public: &[u8],
    as_public: &[u8],
    salt: &[u8],
) -> Result<([u8; 16], [u8; 12]), DeliveryError> {
    let expand_failed = |e: hkdf::InvalidLength| DeliveryError::Encryption(e.to_string());

    let mut key_info = Vec::with_capacity(14 + ua_public.len() + as_public.len());
    key_info.extend_from_slice(b"WebPush: info\0");
    key_info.extend_from_slice(ua_public);
    key_info.extend_from_slice(as_public);

    let mut ikm = [0u8; 32];
    Hkdf::<Sha256>::new(Some(auth_secret), shared_secret)
        .expand(&key_info, &mut ikm)
        .map_err(expand_failed)?;

    let prk = Hkdf::<Sha256>::new(Some(salt), &ikm);
    let mut cek = [0u8; 16];
    let mut nonce = [0u8; 12];
    prk.expand(b"Content-Encoding: aes128gcm\0", &mut cek)
        .map_err(expand_failed)?;
    prk.expand(b"Content-Encoding: nonce\0", &mut nonce)
        .map_err(expand_failed)?;
    Ok((cek, nonce))
}

/// 按 aes128gcm 编码加密负载，返回完整请求体：
/// salt(16) | rs(4) | idlen(1) | 服务端临时公钥 | 密文
pub(crate) fn encrypt_payload(p256dh: &str, auth: &str, plaintext: &[u8]) -> Result<Vec<u8>, DeliveryError> {
    if plaintext.len() > MAX_PLAINTEXT {
        return Err(DeliveryError::Encryption(format!(
            "Payload of {} bytes exceeds {} bytes",
            plaintext.len(),
            MAX_PLAINTEXT
        )));
    }

    let ua_key = PublicKey::from_sec1_bytes(&decode_key(p256dh, "p256dh")?)
        .map_err(|_| DeliveryError::Encryption("Invalid p256dh key".to_string()))?;
    let ua_public = ua_key.to_encoded_point(false);
    let auth_secret = decode_key(auth, "auth")?;

    let as_secret = EphemeralSecret::random(&mut OsRng);
    let as_public = as_secret.public_key().to_encoded_point(false);
    let shared = as_secret.diffie_hellman(&ua_key);

    let mut salt = [0u8; 16];
    OsRng.fill_bytes(&mut salt);
    let (cek, nonce) = content_keys(
        &auth_secret,
        shared.raw_secret_bytes().as_slice(),
        ua_public.as_bytes(),
        as_public.as_bytes(),
        &salt,
    )?;

    // 0x02 标记最后一条记录
    let mut record = Vec::with_capacity(plaintext.len() + 1);
    record.extend_from_slice(plaintext);
    record.push(0x02);

    let cipher = Aes128Gcm::new_from_slice(&cek).map_err(|e| DeliveryError::Encryption(e.to_string()))?;
    let ciphertext = cipher
        .encrypt(Nonce::from_slice(&nonce), record.as_slice())
        .map_err(|e| DeliveryError::Encryption(e.to_string()))?;

    let as_public = as_public.as_bytes();
    let mut body = Vec::with_capacity(21 + as_public.len() + ciphertext.len());
    body.extend_from_slice(&salt);
    body.extend_from_slice(&RECORD_SIZE.to_be_bytes());
    body.push(as_public.len() as u8);
    body.extend_from_slice(as_public);
    body.extend_from_slice(&ciphertext);
    Ok(body)
}
