// 认证模块
// 令牌签发/验证、凭证提取和请求用户解析

mod credentials;
mod error;
mod resolve;
mod token;

pub use credentials::extract_token;
pub use error::AuthError;
pub use resolve::{authenticate, resolve_user};
pub use token::{Claims, TokenKeys, TokenPurpose};

use bcrypt::{hash, verify};

pub fn hash_password(password: &str, cost: u32) -> Result<String, bcrypt::BcryptError> {
    hash(password.as_bytes(), cost)
}

pub fn verify_password(password: &str, hash: &str) -> Result<bool, bcrypt::BcryptError> {
    verify(password.as_bytes(), hash)
}
