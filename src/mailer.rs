use async_trait::async_trait;

/// 发送验证邮件
#[async_trait]
pub trait Mailer: Send + Sync {
    async fn send_verification(&self, email: &str, link: &str);
}

/// 只把验证链接写入日志，未接入邮件服务时使用
#[derive(Debug, Default, Clone, Copy)]
pub struct LogMailer;

#[async_trait]
impl Mailer for LogMailer {
    async fn send_verification(&self, email: &str, link: &str) {
        tracing::info!("Verification link for {}: {}", email, link);
    }
}
