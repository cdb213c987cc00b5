use std::time::Duration;

use error_stack::{Report, ResultExt};
use futures::future::BoxFuture;
use redis::AsyncCommands;
use redis::aio::ConnectionManager;

use crate::error::CooldownError;
use crate::model::RuleType;

/// Per spec.md §3: `"alert:" + symbol + ":" + rule_type`.
pub fn cooldown_key(symbol: &str, rule_type: RuleType) -> String {
    format!("alert:{symbol}:{rule_type}")
}

/// The atomic "set if absent with TTL" primitive the Rule Engine uses to
/// deduplicate alerts. Backed by Redis because it is the one consistency
/// primitive in this system that must survive a replica restart (an
/// in-memory map would not — see spec.md §9).
pub trait Cooldown: Send + Sync {
    /// Attempts to acquire the cooldown for `key`. Returns `true` if this
    /// caller won the race (the key was absent and is now set with `ttl`),
    /// `false` if it was already held.
    fn try_acquire(&self, key: &str, ttl: Duration) -> BoxFuture<'_, Result<bool, Report<CooldownError>>>;
}

pub struct RedisCooldown {
    conn: ConnectionManager,
}

impl RedisCooldown {
    pub async fn connect(url: &str) -> Result<Self, Report<CooldownError>> {
        let client = redis::Client::open(url).change_context(CooldownError::Connection)?;
        let conn = ConnectionManager::new(client)
            .await
            .change_context(CooldownError::Connection)?;
        Ok(Self { conn })
    }
}

impl Cooldown for RedisCooldown {
    fn try_acquire(
        &self,
        key: &str,
        ttl: Duration,
    ) -> BoxFuture<'_, Result<bool, Report<CooldownError>>> {
        let key = key.to_owned();
        Box::pin(async move {
            let mut conn = self.conn.clone();
            // SET key "1" NX EX ttl_secs -- atomic set-if-absent with expiry.
            let acquired: Option<String> = redis::cmd("SET")
                .arg(&key)
                .arg("1")
                .arg("NX")
                .arg("EX")
                .arg(ttl.as_secs().max(1))
                .query_async(&mut conn)
                .await
                .change_context(CooldownError::Acquire)?;
            Ok(acquired.is_some())
        })
    }
}

/// In-memory cooldown used only by tests: a single-process sharded map with
/// monotonic expiry. Does not survive replica restart, so never used outside
/// `#[cfg(test)]` (spec.md §9 explicitly rules it out for production).
#[cfg(test)]
pub struct InMemoryCooldown {
    entries: tokio::sync::Mutex<std::collections::HashMap<String, std::time::Instant>>,
}

#[cfg(test)]
impl InMemoryCooldown {
    pub fn new() -> Self {
        Self {
            entries: tokio::sync::Mutex::new(std::collections::HashMap::new()),
        }
    }
}

#[cfg(test)]
impl Cooldown for InMemoryCooldown {
    fn try_acquire(
        &self,
        key: &str,
        ttl: Duration,
    ) -> BoxFuture<'_, Result<bool, Report<CooldownError>>> {
        let key = key.to_owned();
        Box::pin(async move {
            let mut entries = self.entries.lock().await;
            let now = std::time::Instant::now();
            if let Some(expires_at) = entries.get(&key) {
                if *expires_at > now {
                    return Ok(false);
                }
            }
            entries.insert(key, now + ttl);
            Ok(true)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cooldown_key_format() {
        assert_eq!(
            cooldown_key("BTCUSDT", RuleType::FuturesBigBull60),
            "alert:BTCUSDT:futures_big_bull_60"
        );
    }

    #[tokio::test]
    async fn second_acquire_within_ttl_fails() {
        let cooldown = InMemoryCooldown::new();
        let key = cooldown_key("BTCUSDT", RuleType::FuturesBigBull60);
        assert!(cooldown.try_acquire(&key, Duration::from_secs(300)).await.unwrap());
        assert!(!cooldown.try_acquire(&key, Duration::from_secs(300)).await.unwrap());
    }

    #[tokio::test]
    async fn acquire_after_expiry_succeeds() {
        let cooldown = InMemoryCooldown::new();
        let key = cooldown_key("BTCUSDT", RuleType::FuturesBigBull60);
        assert!(cooldown.try_acquire(&key, Duration::from_millis(10)).await.unwrap());
        tokio::time::sleep(Duration::from_millis(30)).await;
        assert!(cooldown.try_acquire(&key, Duration::from_secs(300)).await.unwrap());
    }

    #[tokio::test]
    async fn multi_symbol_isolation() {
        let cooldown = InMemoryCooldown::new();
        let btc = cooldown_key("BTCUSDT", RuleType::FuturesBigBull60);
        let eth = cooldown_key("ETHUSDT", RuleType::FuturesBigBull60);
        assert!(cooldown.try_acquire(&btc, Duration::from_secs(300)).await.unwrap());
        assert!(cooldown.try_acquire(&eth, Duration::from_secs(300)).await.unwrap());
    }
}
