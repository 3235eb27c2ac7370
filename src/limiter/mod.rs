// 进程内令牌桶限流器
// key 通常是客户端 IP 或 "作用域:IP"，桶在首次出现时创建

mod bucket;
mod clock;

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use dashmap::DashMap;

pub use bucket::Bucket;
pub use clock::{Clock, ManualClock, SystemClock};

/// 运行时可替换的时钟，服务使用系统时钟，测试使用手动时钟
pub type DynClock = Arc<dyn Clock>;

pub const DEFAULT_CAPACITY: u32 = 10;
pub const DEFAULT_REFILL_WINDOW: Duration = Duration::from_millis(60_000);
pub const DEFAULT_MAX_KEYS: usize = 100_000;

/// 拒绝原因，仅用于日志，对外仍然只是布尔结果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DenyReason {
    /// 令牌耗尽
    Exhausted,
    /// 容量或窗口配置为 0
    InvalidPolicy,
}

impl DenyReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            DenyReason::Exhausted => "exhausted",
            DenyReason::InvalidPolicy => "invalid_policy",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    Allowed { remaining: u32 },
    Denied { reason: DenyReason, retry_after: Duration },
}

impl Decision {
    pub fn is_allowed(&self) -> bool {
        matches!(self, Decision::Allowed { .. })
    }
}

pub struct RateLimiter<C: Clock = SystemClock> {
    buckets: DashMap<String, Bucket>,
    clock: C,
    max_keys: usize,
    // 同一时间只允许一个淘汰过程
    eviction: Mutex<()>,
    eviction_passes: AtomicUsize,
}

impl RateLimiter<SystemClock> {
    pub fn new() -> Self {
        Self::with_clock(SystemClock, DEFAULT_MAX_KEYS)
    }
}

impl Default for RateLimiter<SystemClock> {
    fn default() -> Self {
        Self::new()
    }
}

impl<C: Clock> RateLimiter<C> {
    pub fn with_clock(clock: C, max_keys: usize) -> Self {
        Self {
            buckets: DashMap::new(),
            clock,
            max_keys: max_keys.max(1),
            eviction: Mutex::new(()),
            eviction_passes: AtomicUsize::new(0),
        }
    }

    /// 是否放行本次请求，放行时消费一个令牌
    pub fn allow(&self, key: &str, capacity: u32, refill_window: Duration) -> bool {
        self.check(key, capacity, refill_window).is_allowed()
    }

    /// 使用默认容量 10、窗口 60 秒
    pub fn allow_default(&self, key: &str) -> bool {
        self.allow(key, DEFAULT_CAPACITY, DEFAULT_REFILL_WINDOW)
    }

    /// 与 `allow` 相同的状态变化，额外返回拒绝原因和重试等待时间
    pub fn check(&self, key: &str, capacity: u32, refill_window: Duration) -> Decision {
        if capacity == 0 || refill_window.is_zero() {
            return Decision::Denied {
                reason: DenyReason::InvalidPolicy,
                retry_after: refill_window,
            };
        }

        let now = self.clock.now();

        if !self.buckets.contains_key(key) && self.buckets.len() >= self.max_keys {
            self.make_room(now);
        }

        // entry 持有分片写锁，同一 key 的读改写是原子的
        let mut bucket = self
            .buckets
            .entry(key.to_string())
            .or_insert_with(|| Bucket::full(capacity, refill_window, now));

        bucket.refill(capacity, refill_window, now);

        if bucket.try_take() {
            Decision::Allowed {
                remaining: bucket.tokens,
            }
        } else {
            Decision::Denied {
                reason: DenyReason::Exhausted,
                retry_after: bucket.retry_after(now),
            }
        }
    }

    /// 删除空闲超过 `max(max_idle, 桶窗口)` 的桶，返回删除数量
    pub fn sweep_idle(&self, max_idle: Duration) -> usize {
        let now = self.clock.now();
        let before = self.buckets.len();
        self.buckets
            .retain(|_, bucket| !bucket.is_replenished(now, max_idle));
        before.saturating_sub(self.buckets.len())
    }

    pub fn len(&self) -> usize {
        self.buckets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buckets.is_empty()
    }

    /// 因达到 `max_keys` 而触发的淘汰次数
    pub fn eviction_passes(&self) -> usize {
        self.eviction_passes.load(Ordering::Relaxed)
    }

    // 达到上限时一次腾出一批位置：所有已回满的桶，以及最久未补充的
    // `eviction_batch` 个桶，之后的插入不必每次都扫描整张表。
    // 已有淘汰在进行时直接插入，并发插入新 key 时上限是近似的。
    fn make_room(&self, now: Instant) {
        let Ok(_guard) = self.eviction.try_lock() else {
            return;
        };
        if self.buckets.len() < self.max_keys {
            return;
        }
        self.eviction_passes.fetch_add(1, Ordering::Relaxed);

        let mut victims = Vec::new();
        let mut candidates = Vec::with_capacity(self.buckets.len());
        for entry in self.buckets.iter() {
            let seen = (entry.value().last_refill, entry.key().clone());
            if entry.value().is_replenished(now, Duration::ZERO) {
                victims.push(seen);
            } else {
                candidates.push(seen);
            }
        }

        let wanted = eviction_batch(self.max_keys)
            .saturating_sub(victims.len())
            .min(candidates.len());
        if wanted > 0 {
            if wanted < candidates.len() {
                candidates.select_nth_unstable_by_key(wanted, |(last_refill, _)| *last_refill);
                candidates.truncate(wanted);
            }
            victims.extend(candidates);
        }

        // 扫描之后被使用过的桶不删除
        let removed = victims
            .into_iter()
            .filter(|(seen, key)| {
                self.buckets
                    .remove_if(key, |_, bucket| bucket.last_refill == *seen)
                    .is_some()
            })
            .count();
        tracing::debug!(
            "Rate limiter full, evicted {} buckets, {} remaining",
            removed,
            self.buckets.len()
        );
    }
}

// 每次淘汰上限的 1%，至少 1 个
fn eviction_batch(max_keys: usize) -> usize {
    (max_keys / 100).max(1)
}

/// 定期清理空闲桶
pub fn spawn_sweeper<C>(
    limiter: Arc<RateLimiter<C>>,
    every: Duration,
    max_idle: Duration,
) -> tokio::task::JoinHandle<()>
where
    C: Clock + 'static,
{
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(every);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            interval.tick().await;
            let removed = limiter.sweep_idle(max_idle);
            if removed > 0 {
                tracing::debug!(
                    "Swept {} idle rate limit buckets, {} remaining",
                    removed,
                    limiter.len()
                );
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn limiter() -> (Arc<ManualClock>, RateLimiter<Arc<ManualClock>>) {
        let clock = Arc::new(ManualClock::new());
        let limiter = RateLimiter::with_clock(clock.clone(), DEFAULT_MAX_KEYS);
        (clock, limiter)
    }

    #[test]
    fn fresh_key_allows_exactly_capacity() {
        let (_, limiter) = limiter();

        for _ in 0..DEFAULT_CAPACITY {
            assert!(limiter.allow_default("route:login"));
        }
        assert!(!limiter.allow_default("route:login"));
    }

    #[test]
    fn denied_key_recovers_after_one_window() {
        let (clock, limiter) = limiter();
        let window = Duration::from_millis(1000);

        let first: Vec<bool> = (0..3)
            .map(|_| limiter.allow("ip:1.2.3.4", 3, window))
            .collect();
        assert_eq!(first, vec![true, true, true]);
        assert!(!limiter.allow("ip:1.2.3.4", 3, window));

        clock.advance(window);
        assert!(limiter.allow("ip:1.2.3.4", 3, window));
    }

    #[test]
    fn denial_does_not_consume() {
        let (clock, limiter) = limiter();
        let window = Duration::from_millis(1000);

        assert!(limiter.allow("k", 1, window));
        for _ in 0..5 {
            assert!(!limiter.allow("k", 1, window));
        }
        clock.advance(window);
        assert!(limiter.allow("k", 1, window));
        assert!(!limiter.allow("k", 1, window));
    }

    #[test]
    fn long_idle_never_exceeds_capacity() {
        let (clock, limiter) = limiter();
        let window = Duration::from_millis(1000);

        assert!(limiter.allow("k", 4, window));
        clock.advance(Duration::from_millis(2500));

        let allowed = (0..10).filter(|_| limiter.allow("k", 4, window)).count();
        assert_eq!(allowed, 4);
    }

    #[test]
    fn half_window_after_refill_grants_nothing() {
        let (clock, limiter) = limiter();
        let window = Duration::from_millis(1000);

        for _ in 0..2 {
            assert!(limiter.allow("k", 2, window));
        }
        clock.advance(Duration::from_millis(1500));
        for _ in 0..2 {
            assert!(limiter.allow("k", 2, window));
        }

        // 上次补充时丢弃了半个窗口
        clock.advance(Duration::from_millis(500));
        assert!(!limiter.allow("k", 2, window));
        clock.advance(Duration::from_millis(500));
        assert!(limiter.allow("k", 2, window));
    }

    #[test]
    fn keys_are_independent() {
        let (_, limiter) = limiter();
        let window = Duration::from_secs(1);

        assert!(limiter.allow("ip:10.0.0.1", 1, window));
        assert!(!limiter.allow("ip:10.0.0.1", 1, window));
        assert!(limiter.allow("ip:10.0.0.2", 1, window));
    }

    #[test]
    fn check_reports_reason_and_retry_after() {
        let (clock, limiter) = limiter();
        let window = Duration::from_millis(1000);

        assert_eq!(
            limiter.check("k", 2, window),
            Decision::Allowed { remaining: 1 }
        );
        assert!(limiter.check("k", 2, window).is_allowed());

        clock.advance(Duration::from_millis(300));
        assert_eq!(
            limiter.check("k", 2, window),
            Decision::Denied {
                reason: DenyReason::Exhausted,
                retry_after: Duration::from_millis(700),
            }
        );
    }

    #[test]
    fn invalid_policy_denies_without_state() {
        let (_, limiter) = limiter();

        let decision = limiter.check("k", 0, Duration::from_secs(1));
        assert!(matches!(
            decision,
            Decision::Denied {
                reason: DenyReason::InvalidPolicy,
                ..
            }
        ));
        assert!(!limiter.allow("k", 5, Duration::ZERO));
        assert!(limiter.is_empty());
    }

    #[test]
    fn sweep_removes_only_replenished_buckets() {
        let (clock, limiter) = limiter();

        limiter.allow("short", 1, Duration::from_secs(1));
        limiter.allow("long", 1, Duration::from_secs(60));
        clock.advance(Duration::from_secs(5));

        assert_eq!(limiter.sweep_idle(Duration::from_secs(2)), 1);
        assert_eq!(limiter.len(), 1);

        // 被清理的 key 重新出现时是满桶
        assert!(limiter.allow("short", 1, Duration::from_secs(1)));
        assert!(!limiter.allow("long", 1, Duration::from_secs(60)));
    }

    #[test]
    fn max_keys_evicts_oldest_bucket() {
        let clock = Arc::new(ManualClock::new());
        let limiter = RateLimiter::with_clock(clock.clone(), 2);
        let window = Duration::from_secs(60);

        limiter.allow("a", 1, window);
        clock.advance(Duration::from_secs(1));
        limiter.allow("b", 1, window);
        clock.advance(Duration::from_secs(1));
        limiter.allow("c", 1, window);

        assert_eq!(limiter.len(), 2);
        // "a" 被淘汰后重新出现是满桶，"b" 仍然耗尽
        assert!(!limiter.allow("b", 1, window));
        assert!(limiter.allow("a", 1, window));
    }

    #[test]
    fn eviction_runs_once_per_batch_of_new_keys() {
        let clock = Arc::new(ManualClock::new());
        let limiter = RateLimiter::with_clock(clock.clone(), 1000);
        let window = Duration::from_secs(60);

        for i in 0..1000 {
            limiter.allow(&format!("old:{i}"), 1, window);
            clock.advance(Duration::from_millis(1));
        }
        assert_eq!(limiter.len(), 1000);
        assert_eq!(limiter.eviction_passes(), 0);

        limiter.allow("new:0", 1, window);
        assert_eq!(limiter.eviction_passes(), 1);
        assert_eq!(limiter.len(), 991);
        // 最老的 10 个被淘汰，其余仍保持耗尽状态
        assert!(!limiter.allow("old:10", 1, window));
        assert_eq!(limiter.len(), 991);

        for i in 1..100 {
            limiter.allow(&format!("new:{i}"), 1, window);
            assert!(limiter.len() <= 1000);
        }
        // 100 个新 key 只触发 10 次全表扫描
        assert_eq!(limiter.eviction_passes(), 10);
    }

    #[test]
    fn eviction_prefers_replenished_buckets() {
        let clock = Arc::new(ManualClock::new());
        let limiter = RateLimiter::with_clock(clock.clone(), 3);

        limiter.allow("long", 1, Duration::from_secs(3600));
        limiter.allow("short", 1, Duration::from_secs(1));
        clock.advance(Duration::from_secs(2));
        limiter.allow("fresh", 1, Duration::from_secs(3600));
        limiter.allow("newest", 1, Duration::from_secs(3600));

        assert_eq!(limiter.len(), 3);
        assert!(!limiter.allow("long", 1, Duration::from_secs(3600)));
        assert!(!limiter.allow("fresh", 1, Duration::from_secs(3600)));
    }

    #[tokio::test(start_paused = true)]
    async fn sweeper_removes_idle_buckets_on_each_tick() {
        let clock = Arc::new(ManualClock::new());
        let limiter = Arc::new(RateLimiter::with_clock(clock.clone(), DEFAULT_MAX_KEYS));

        limiter.allow("idle", 1, Duration::from_secs(1));
        limiter.allow("busy", 1, Duration::from_secs(3600));
        clock.advance(Duration::from_secs(5));

        let sweeper = spawn_sweeper(
            limiter.clone(),
            Duration::from_secs(10),
            Duration::from_secs(1),
        );

        tokio::time::sleep(Duration::from_secs(15)).await;
        assert_eq!(limiter.len(), 1);
        assert!(!limiter.allow("busy", 1, Duration::from_secs(3600)));

        // 下一个周期继续清理
        limiter.allow("later", 1, Duration::from_secs(1));
        clock.advance(Duration::from_secs(5));
        tokio::time::sleep(Duration::from_secs(10)).await;
        assert_eq!(limiter.len(), 1);

        sweeper.abort();
    }

    #[test]
    fn concurrent_callers_never_over_admit() {
        let limiter = Arc::new(RateLimiter::new());
        let window = Duration::from_secs(3600);

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let limiter = limiter.clone();
                std::thread::spawn(move || {
                    (0..50)
                        .filter(|_| limiter.allow("shared", 100, window))
                        .count()
                })
            })
            .collect();

        let admitted: usize = handles
            .into_iter()
            .map(|h| h.join().unwrap_or(0))
            .sum();
        assert_eq!(admitted, 100);
    }
}
