use thiserror::Error;

/// 认证失败的内部原因
///
/// 对外统一表现为"未认证"，原因只写入日志
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AuthError {
    #[error("no credential presented")]
    Missing,
    #[error("credential is malformed")]
    Malformed,
    #[error("token signature does not match")]
    BadSignature,
    #[error("token has expired")]
    Expired,
    #[error("token was issued for another purpose")]
    WrongPurpose,
    #[error("token subject no longer exists")]
    UnknownSubject,
    #[error("user store failure: {0}")]
    Store(String),
}

impl AuthError {
    pub fn reason(&self) -> &'static str {
        match self {
            AuthError::Missing => "missing",
            AuthError::Malformed => "malformed",
            AuthError::BadSignature => "bad_signature",
            AuthError::Expired => "expired",
            AuthError::WrongPurpose => "wrong_purpose",
            AuthError::UnknownSubject => "unknown_subject",
            AuthError::Store(_) => "store",
        }
    }
}
