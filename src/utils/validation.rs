use crate::error::{AppError, Result};
use regex::Regex;
use std::sync::OnceLock;

/// 验证邮箱并返回详细错误信息
pub fn validate_email_format(email: &str) -> Result<()> {
    if email.trim().is_empty() {
        return Err(AppError::Validation("Email address is required".to_string()));
    }

    if !validator::validate_email(email) {
        return Err(AppError::Validation("Invalid email address".to_string()));
    }

    // RFC 5321 上限
    if email.len() > 254 {
        return Err(AppError::Validation("Email address is too long".to_string()));
    }

    Ok(())
}

/// 规范化手机号：去掉空格、括号、连字符和点
pub fn normalize_phone(phone: &str) -> String {
    phone
        .chars()
        .filter(|c| !matches!(c, ' ' | '(' | ')' | '-' | '.'))
        .collect()
}

/// 短信发送要求 E.164 风格号码，空号码视为未填写
pub fn validate_phone(phone: &str) -> Result<()> {
    static PHONE: OnceLock<Regex> = OnceLock::new();

    let normalized = normalize_phone(phone);
    if normalized.is_empty() {
        return Ok(());
    }

    let pattern = PHONE.get_or_init(|| Regex::new(r"^\+?[1-9][0-9]{6,14}$").unwrap());
    if !pattern.is_match(&normalized) {
        return Err(AppError::Validation(format!(
            "Invalid phone number: {}",
            phone
        )));
    }

    Ok(())
}
