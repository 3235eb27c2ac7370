use async_trait::async_trait;
use chrono::Utc;
use dashmap::{DashMap, mapref::entry::Entry};

use super::{NewUser, StoreError, UserRecord, UserStore};

/// 内存用户存储，用于测试和本地调试
///
/// `emails` 是 email 到 user_id 的唯一索引，相当于数据库里的唯一约束。
#[derive(Default)]
pub struct MemoryUserStore {
    users: DashMap<String, UserRecord>,
    emails: DashMap<String, String>,
}

impl MemoryUserStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// 直接写入一条记录
    pub fn insert(&self, user: UserRecord) {
        self.emails.insert(user.email.clone(), user.user_id.clone());
        self.users.insert(user.user_id.clone(), user);
    }

    pub fn remove(&self, user_id: &str) -> Option<UserRecord> {
        let (_, user) = self.users.remove(user_id)?;
        self.emails.remove_if(&user.email, |_, id| id == user_id);
        Some(user)
    }
}

#[async_trait]
impl UserStore for MemoryUserStore {
    async fn find_by_id(&self, user_id: &str) -> Result<Option<UserRecord>, StoreError> {
        Ok(self.users.get(user_id).map(|user| user.clone()))
    }

    async fn find_by_email(&self, email: &str) -> Result<Option<UserRecord>, StoreError> {
        let Some(user_id) = self.emails.get(email).map(|id| id.clone()) else {
            return Ok(None);
        };
        Ok(self.users.get(&user_id).map(|user| user.clone()))
    }

    async fn create(&self, user: NewUser) -> Result<UserRecord, StoreError> {
        // entry 持有 email 所在分片的写锁，检查和写入是原子的
        let slot = match self.emails.entry(user.email.clone()) {
            Entry::Occupied(_) => return Err(StoreError::Conflict),
            Entry::Vacant(slot) => slot,
        };

        let record = UserRecord {
            user_id: uuid::Uuid::new_v4().to_string(),
            email: user.email,
            display_name: user.display_name,
            password_hash: user.password_hash,
            email_verified: false,
            created_at: Utc::now(),
        };
        self.users.insert(record.user_id.clone(), record.clone());
        slot.insert(record.user_id.clone());
        Ok(record)
    }

    async fn mark_verified(&self, user_id: &str) -> Result<bool, StoreError> {
        match self.users.get_mut(user_id) {
            Some(mut user) => {
                user.email_verified = true;
                Ok(true)
            }
            None => Ok(false),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;

    fn new_user(email: &str) -> NewUser {
        NewUser {
            email: email.to_string(),
            display_name: "Alice".to_string(),
            password_hash: "hash".to_string(),
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_signups_with_same_email_create_one_user() {
        let store = Arc::new(MemoryUserStore::new());

        let handles: Vec<_> = (0..16)
            .map(|_| {
                let store = store.clone();
                tokio::spawn(async move { store.create(new_user("alice@example.com")).await })
            })
            .collect();

        let mut created = 0;
        let mut conflicts = 0;
        for handle in handles {
            match handle.await.unwrap() {
                Ok(_) => created += 1,
                Err(StoreError::Conflict) => conflicts += 1,
                Err(e) => panic!("unexpected error: {e}"),
            }
        }

        assert_eq!(created, 1);
        assert_eq!(conflicts, 15);
        assert_eq!(store.users.len(), 1);
    }

    #[tokio::test]
    async fn removed_user_frees_the_email() {
        let store = MemoryUserStore::new();

        let user = store.create(new_user("bob@example.com")).await.unwrap();
        assert!(store.find_by_email("bob@example.com").await.unwrap().is_some());

        store.remove(&user.user_id);
        assert!(store.find_by_email("bob@example.com").await.unwrap().is_none());
        assert!(store.create(new_user("bob@example.com")).await.is_ok());
    }
}
