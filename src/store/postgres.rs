use async_trait::async_trait;
use sqlx::PgPool;

use super::{NewUser, StoreError, UserRecord, UserStore};

#[derive(Clone)]
pub struct PgUserStore {
    pool: PgPool,
}

impl PgUserStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl UserStore for PgUserStore {
    async fn find_by_id(&self, user_id: &str) -> Result<Option<UserRecord>, StoreError> {
        let user = sqlx::query_as::<_, UserRecord>(
            r#"
            SELECT user_id, email, display_name, password_hash, email_verified, created_at
            FROM users
            WHERE user_id = $1
            "#,
        )
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(user)
    }

    async fn find_by_email(&self, email: &str) -> Result<Option<UserRecord>, StoreError> {
        let user = sqlx::query_as::<_, UserRecord>(
            r#"
            SELECT user_id, email, display_name, password_hash, email_verified, created_at
            FROM users
            WHERE email = $1
            "#,
        )
        .bind(email)
        .fetch_optional(&self.pool)
        .await?;

        Ok(user)
    }

    async fn create(&self, user: NewUser) -> Result<UserRecord, StoreError> {
        let user_id = uuid::Uuid::new_v4().to_string();
        tracing::debug!("Creating user: {}", user_id);

        let result = sqlx::query_as::<_, UserRecord>(
            r#"
            INSERT INTO users (user_id, email, display_name, password_hash, email_verified)
            VALUES ($1, $2, $3, $4, false)
            RETURNING user_id, email, display_name, password_hash, email_verified, created_at
            "#,
        )
        .bind(&user_id)
        .bind(&user.email)
        .bind(&user.display_name)
        .bind(&user.password_hash)
        .fetch_one(&self.pool)
        .await;

        match result {
            Ok(user) => {
                tracing::info!("Created user: {}", user.user_id);
                Ok(user)
            }
            Err(e) => {
                let e = StoreError::from(e);
                if !matches!(e, StoreError::Conflict) {
                    tracing::error!("Failed to create user: {:?}", e);
                }
                Err(e)
            }
        }
    }

    async fn mark_verified(&self, user_id: &str) -> Result<bool, StoreError> {
        let result = sqlx::query(
            r#"
            UPDATE users
            SET email_verified = true
            WHERE user_id = $1
            "#,
        )
        .bind(user_id)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }
}
