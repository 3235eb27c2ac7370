use serde::{Deserialize, Serialize};

use crate::error::AppError;

pub const PASSWORD_MIN_BYTES: usize = 8;
// bcrypt 只使用前 72 字节
pub const PASSWORD_MAX_BYTES: usize = 72;
pub const DISPLAY_NAME_MAX_CHARS: usize = 64;

#[derive(Debug, Deserialize)]
pub struct SignupRequest {
    pub email: String,
    pub password: String,
    pub display_name: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct SignupResponse {
    pub user_id: String,
    pub email: String,
    pub display_name: String,
    pub email_verified: bool,
}

#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct LoginResponse {
    pub user_id: String,
    pub token: String,
    pub expires_at: i64,
}

#[derive(Debug, Deserialize)]
pub struct VerifyEmailRequest {
    pub token: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct TokenResponse {
    pub token: String,
    pub expires_at: i64,
}

impl SignupRequest {
    /// 校验并规范化注册信息：邮箱转小写，昵称去除首尾空白
    pub fn normalized(self) -> Result<Self, AppError> {
        let email = normalize_email(&self.email)
            .ok_or_else(|| AppError::Validation("邮箱格式无效".to_string()))?;

        let password_len = self.password.len();
        if !(PASSWORD_MIN_BYTES..=PASSWORD_MAX_BYTES).contains(&password_len) {
            return Err(AppError::Validation(format!(
                "密码长度必须在{}到{}个字符之间",
                PASSWORD_MIN_BYTES, PASSWORD_MAX_BYTES
            )));
        }

        let display_name = self.display_name.trim().to_string();
        let name_len = display_name.chars().count();
        if name_len == 0 || name_len > DISPLAY_NAME_MAX_CHARS {
            return Err(AppError::Validation(format!(
                "昵称长度必须在1到{}个字符之间",
                DISPLAY_NAME_MAX_CHARS
            )));
        }

        Ok(Self {
            email,
            password: self.password,
            display_name,
        })
    }
}

pub fn normalize_email(raw: &str) -> Option<String> {
    let email = raw.trim().to_lowercase();
    let (local, domain) = email.split_once('@')?;
    let valid = !local.is_empty()
        && !domain.contains('@')
        && domain.contains('.')
        && !domain.starts_with('.')
        && !domain.ends_with('.')
        && !email.chars().any(char::is_whitespace);
    valid.then_some(email)
}
