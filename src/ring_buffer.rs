use tokio::sync::RwLock;

use crate::model::Candle;

pub const CAPACITY: usize = 1440;

/// Fixed 1440-slot circular buffer of a symbol's 1-minute candles.
///
/// Readers take a shared lock to copy out a slice; the single writer per
/// symbol (the Aggregator's consumer task for that symbol's subject) takes
/// an exclusive lock only to advance the head.
pub struct RingBuffer {
    inner: RwLock<Inner>,
}

struct Inner {
    slots: Vec<Option<Candle>>,
    head: usize,
    count: usize,
}

impl RingBuffer {
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(Inner {
                slots: vec![None; CAPACITY],
                head: 0,
                count: 0,
            }),
        }
    }

    /// Writes `candle` at the head, advances head `mod CAPACITY`, and
    /// increments the populated count up to `CAPACITY`. O(1).
    pub async fn append(&self, candle: Candle) {
        let mut inner = self.inner.write().await;
        let head = inner.head;
        inner.slots[head] = Some(candle);
        inner.head = (head + 1) % CAPACITY;
        inner.count = (inner.count + 1).min(CAPACITY);
    }

    /// The most recently appended entry, or `None` when empty.
    pub async fn get_latest(&self) -> Option<Candle> {
        let inner = self.inner.read().await;
        if inner.count == 0 {
            return None;
        }
        let last_index = (inner.head + CAPACITY - 1) % CAPACITY;
        inner.slots[last_index].clone()
    }

    /// The last `min(n, count)` entries, oldest first.
    pub async fn get_last(&self, n: usize) -> Vec<Candle> {
        let inner = self.inner.read().await;
        let take = n.min(inner.count);
        let mut out = Vec::with_capacity(take);
        for i in (0..take).rev() {
            let index = (inner.head + CAPACITY - 1 - i) % CAPACITY;
            if let Some(c) = &inner.slots[index] {
                out.push(c.clone());
            }
        }
        out
    }

    /// Current population, saturating at `CAPACITY`.
    pub async fn size(&self) -> usize {
        self.inner.read().await.count
    }
}

impl Default for RingBuffer {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn candle(close: f64) -> Candle {
        Candle {
            symbol: "BTCUSDT".into(),
            open_time: Utc::now(),
            close_time: Utc::now() + chrono::Duration::seconds(60),
            open: close,
            high: close,
            low: close,
            close,
            volume: 1.0,
            quote_volume: close,
            trades: 1,
        }
    }

    #[tokio::test]
    async fn size_matches_insertions_until_capacity() {
        let buf = RingBuffer::new();
        for i in 0..10 {
            buf.append(candle(i as f64)).await;
        }
        assert_eq!(buf.size().await, 10);
    }

    #[tokio::test]
    async fn size_saturates_at_capacity() {
        let buf = RingBuffer::new();
        for i in 0..(CAPACITY + 100) {
            buf.append(candle(i as f64)).await;
        }
        assert_eq!(buf.size().await, CAPACITY);
    }

    #[tokio::test]
    async fn get_latest_matches_last_insertion() {
        let buf = RingBuffer::new();
        buf.append(candle(1.0)).await;
        buf.append(candle(2.0)).await;
        buf.append(candle(3.0)).await;
        assert_eq!(buf.get_latest().await.unwrap().close, 3.0);
    }

    #[tokio::test]
    async fn get_latest_empty_is_none() {
        let buf = RingBuffer::new();
        assert!(buf.get_latest().await.is_none());
    }

    #[tokio::test]
    async fn get_last_returns_chronological_order() {
        let buf = RingBuffer::new();
        for i in 0..5 {
            buf.append(candle(i as f64)).await;
        }
        let last3 = buf.get_last(3).await;
        let closes: Vec<f64> = last3.iter().map(|c| c.close).collect();
        assert_eq!(closes, vec![2.0, 3.0, 4.0]);
    }

    #[tokio::test]
    async fn get_last_clamps_to_size() {
        let buf = RingBuffer::new();
        buf.append(candle(1.0)).await;
        buf.append(candle(2.0)).await;
        let last = buf.get_last(10).await;
        assert_eq!(last.len(), 2);
    }

    #[tokio::test]
    async fn overwrite_on_overflow_keeps_newest() {
        let buf = RingBuffer::new();
        for i in 0..(CAPACITY + 5) {
            buf.append(candle(i as f64)).await;
        }
        let last = buf.get_last(CAPACITY).await;
        assert_eq!(last.first().unwrap().close, 5.0);
        assert_eq!(last.last().unwrap().close, (CAPACITY + 4) as f64);
    }
}
