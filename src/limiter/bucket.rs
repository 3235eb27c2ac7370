use std::time::{Duration, Instant};

/// 单个客户端的令牌桶
///
/// 令牌数始终满足 `0 <= tokens <= capacity`。补充按整窗口阶跃进行：
/// 每经过一个完整的 `window` 补充 `capacity` 个令牌，不足一个窗口的部分
/// 在补充发生时被丢弃。窗口边界两侧的突发流量最多可达名义速率的两倍。
#[derive(Debug, Clone)]
pub struct Bucket {
    pub tokens: u32,
    pub last_refill: Instant,
    pub window: Duration,
}

impl Bucket {
    /// 首次出现的 key 视为令牌已满
    pub fn full(capacity: u32, window: Duration, now: Instant) -> Self {
        Self {
            tokens: capacity,
            last_refill: now,
            window,
        }
    }

    /// 按 `floor(elapsed / window) * capacity` 补充令牌并封顶
    pub fn refill(&mut self, capacity: u32, window: Duration, now: Instant) {
        self.window = window;
        // 时钟回拨时 elapsed 为 0，不补充
        let elapsed = now.saturating_duration_since(self.last_refill);
        let windows = elapsed.as_nanos() / window.as_nanos().max(1);

        if windows > 0 {
            let granted = windows.saturating_mul(u128::from(capacity));
            let total = u128::from(self.tokens).saturating_add(granted);
            self.tokens = total.min(u128::from(capacity)) as u32;
            self.last_refill = now;
        }

        // 同一 key 以更小的容量调用时同样封顶
        self.tokens = self.tokens.min(capacity);
    }

    /// 尝试消费一个令牌
    pub fn try_take(&mut self) -> bool {
        if self.tokens == 0 {
            return false;
        }
        self.tokens -= 1;
        true
    }

    /// 距下一次补充的时间
    pub fn retry_after(&self, now: Instant) -> Duration {
        self.window
            .saturating_sub(now.saturating_duration_since(self.last_refill))
    }

    /// 空闲时间超过 `max(max_idle, window)` 的桶下次使用时必然是满的，删除后无可观察差异
    pub fn is_replenished(&self, now: Instant, max_idle: Duration) -> bool {
        now.saturating_duration_since(self.last_refill) >= max_idle.max(self.window)
    }
}
