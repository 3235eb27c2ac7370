use std::time::Duration;

use chrono::Utc;
use jsonwebtoken::{
    Algorithm, DecodingKey, EncodingKey, Header, Validation, decode, encode, errors::ErrorKind,
};
use serde::{Deserialize, Serialize};

use super::AuthError;

/// 令牌用途，会话令牌不能用于邮箱验证，反之亦然
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TokenPurpose {
    Session,
    VerifyEmail,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Claims {
    pub sub: String, // 用户ID
    pub exp: i64,    // 过期时间
    pub iat: i64,    // 签发时间
    pub purpose: TokenPurpose,
}

/// 由服务端密钥派生的签名/验签密钥
#[derive(Clone)]
pub struct TokenKeys {
    encoding: EncodingKey,
    decoding: DecodingKey,
}

impl TokenKeys {
    pub fn from_secret(secret: &str) -> Self {
        Self {
            encoding: EncodingKey::from_secret(secret.as_bytes()),
            decoding: DecodingKey::from_secret(secret.as_bytes()),
        }
    }

    /// 签发令牌，返回令牌和过期时间戳
    pub fn issue(
        &self,
        subject: &str,
        purpose: TokenPurpose,
        ttl: Duration,
    ) -> Result<(String, i64), jsonwebtoken::errors::Error> {
        let now = Utc::now().timestamp();
        let claims = Claims {
            sub: subject.to_string(),
            exp: now.saturating_add(i64::try_from(ttl.as_secs()).unwrap_or(i64::MAX)),
            iat: now,
            purpose,
        };
        let token = self.sign(&claims)?;
        Ok((token, claims.exp))
    }

    pub fn sign(&self, claims: &Claims) -> Result<String, jsonwebtoken::errors::Error> {
        encode(&Header::new(Algorithm::HS256), claims, &self.encoding)
    }

    /// 验证签名、过期时间和用途
    pub fn verify(&self, token: &str, purpose: TokenPurpose) -> Result<Claims, AuthError> {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.leeway = 0;

        let claims = decode::<Claims>(token, &self.decoding, &validation)
            .map(|data| data.claims)
            .map_err(|e| match e.kind() {
                ErrorKind::ExpiredSignature => AuthError::Expired,
                ErrorKind::InvalidSignature => AuthError::BadSignature,
                _ => AuthError::Malformed,
            })?;

        if claims.purpose != purpose {
            return Err(AuthError::WrongPurpose);
        }
        if claims.sub.is_empty() {
            return Err(AuthError::Malformed);
        }
        Ok(claims)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SECRET: &str = "test-secret-key-at-least-32-characters-long";

    #[test]
    fn issued_token_verifies() {
        let keys = TokenKeys::from_secret(SECRET);
        let (token, exp) = keys
            .issue("user-1", TokenPurpose::Session, Duration::from_secs(3600))
            .unwrap();

        let claims = keys.verify(&token, TokenPurpose::Session).unwrap();
        assert_eq!(claims.sub, "user-1");
        assert_eq!(claims.exp, exp);
        assert!(claims.exp > claims.iat);
    }

    #[test]
    fn other_secret_is_bad_signature() {
        let keys = TokenKeys::from_secret(SECRET);
        let other = TokenKeys::from_secret("another-secret-key-of-decent-length!!");
        let (token, _) = other
            .issue("user-1", TokenPurpose::Session, Duration::from_secs(3600))
            .unwrap();

        assert_eq!(
            keys.verify(&token, TokenPurpose::Session),
            Err(AuthError::BadSignature)
        );
    }

    #[test]
    fn expired_token_is_rejected() {
        let keys = TokenKeys::from_secret(SECRET);
        let now = Utc::now().timestamp();
        let token = keys
            .sign(&Claims {
                sub: "user-1".into(),
                exp: now - 10,
                iat: now - 100,
                purpose: TokenPurpose::Session,
            })
            .unwrap();

        assert_eq!(
            keys.verify(&token, TokenPurpose::Session),
            Err(AuthError::Expired)
        );
    }

    #[test]
    fn garbage_is_malformed() {
        let keys = TokenKeys::from_secret(SECRET);
        assert_eq!(
            keys.verify("not.a.jwt", TokenPurpose::Session),
            Err(AuthError::Malformed)
        );
        assert_eq!(
            keys.verify("", TokenPurpose::Session),
            Err(AuthError::Malformed)
        );
    }

    #[test]
    fn purpose_must_match() {
        let keys = TokenKeys::from_secret(SECRET);
        let (token, _) = keys
            .issue("user-1", TokenPurpose::VerifyEmail, Duration::from_secs(60))
            .unwrap();

        assert_eq!(
            keys.verify(&token, TokenPurpose::Session),
            Err(AuthError::WrongPurpose)
        );
        assert!(keys.verify(&token, TokenPurpose::VerifyEmail).is_ok());
    }
}
