//! Exponential backoff with jitter.
//!
//! Used for transient failures against the coordination store and the backplane on
//! the server, and for reconnection on the client. Each [`Backoff`] tracks one retry
//! sequence; create a new one (or call [`Backoff::reset`]) per operation.

use std::{future::Future, time::Duration};

use rand::Rng;

/// Configuration for a retry sequence.
#[derive(Debug, Clone, PartialEq)]
pub struct BackoffConfig {
    /// Delay before the first retry. Default: 100 ms.
    pub initial_delay: Duration,
    /// Multiplier applied after each failed attempt. Default: 2.0.
    pub multiplier: f64,
    /// Upper bound for a single delay. Default: 5 s.
    pub max_delay: Duration,
    /// Number of retries before giving up. Default: 5.
    pub max_retries: u32,
    /// Jitter factor (0.0–1.0) applied as ±jitter to each delay. Default: 0.25.
    pub jitter: f64,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_millis(100),
            multiplier: 2.0,
            max_delay: Duration::from_secs(5),
            max_retries: 5,
            jitter: 0.25,
        }
    }
}

/// Tracks the attempt count and computes the next delay.
#[derive(Debug, Clone)]
pub struct Backoff {
    config: BackoffConfig,
    retries: u32,
    current_delay: Duration,
}

impl Backoff {
    pub fn new(config: BackoffConfig) -> Self {
        let initial = config.initial_delay;
        Self {
            config,
            retries: 0,
            current_delay: initial,
        }
    }

    /// Next delay to wait, or `None` once the retry budget is spent.
    pub fn next_delay(&mut self) -> Option<Duration> {
        if self.retries >= self.config.max_retries {
            return None;
        }
        let base = self.current_delay;
        self.retries += 1;

        let jittered = if self.config.jitter > 0.0 {
            let jitter = self.config.jitter.min(1.0);
            let factor = rand::rng().random_range((1.0 - jitter)..=(1.0 + jitter));
            base.mul_f64(factor)
        } else {
            base
        };

        let next = self.current_delay.mul_f64(self.config.multiplier.max(1.0));
        self.current_delay = next.min(self.config.max_delay);

        Some(jittered.min(self.config.max_delay))
    }

    /// Number of retries handed out so far.
    pub fn retries(&self) -> u32 {
        self.retries
    }

    pub fn reset(&mut self) {
        self.retries = 0;
        self.current_delay = self.config.initial_delay;
    }
}

/// Run `operation` until it succeeds or the backoff budget is exhausted.
///
/// Only use this for operations that are safe to repeat. The last error is returned
/// when every attempt failed; `on_retry` sees each failure before the wait.
pub async fn retry_with_backoff<T, E, F, Fut, R>(
    config: BackoffConfig,
    mut operation: F,
    mut on_retry: R,
) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    R: FnMut(&E, u32, Duration),
{
    let mut backoff = Backoff::new(config);
    loop {
        match operation().await {
            Ok(value) => return Ok(value),
            Err(err) => match backoff.next_delay() {
                Some(delay) => {
                    on_retry(&err, backoff.retries(), delay);
                    tokio::time::sleep(delay).await;
                }
                None => return Err(err),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn no_jitter(max_retries: u32) -> BackoffConfig {
        BackoffConfig {
            initial_delay: Duration::from_millis(100),
            multiplier: 2.0,
            max_delay: Duration::from_millis(350),
            max_retries,
            jitter: 0.0,
        }
    }

    #[test]
    fn test_next_delay_grows_and_caps() {
        // テスト項目: 待ち時間が指数的に増加し、上限で頭打ちになる
        // given (前提条件):
        let mut backoff = Backoff::new(no_jitter(4));

        // when (操作):
        let delays: Vec<_> = std::iter::from_fn(|| backoff.next_delay()).collect();

        // then (期待する結果):
        assert_eq!(
            delays,
            vec![
                Duration::from_millis(100),
                Duration::from_millis(200),
                Duration::from_millis(350),
                Duration::from_millis(350),
            ]
        );
    }

    #[test]
    fn test_jitter_stays_within_bounds() {
        // テスト項目: ジッターを加えた待ち時間が ±jitter の範囲に収まる
        // given (前提条件):
        let config = BackoffConfig {
            jitter: 0.5,
            max_delay: Duration::from_secs(10),
            ..no_jitter(1)
        };

        for _ in 0..100 {
            // when (操作):
            let delay = Backoff::new(config.clone()).next_delay().unwrap();

            // then (期待する結果):
            assert!(delay >= Duration::from_millis(50));
            assert!(delay <= Duration::from_millis(150));
        }
    }

    #[test]
    fn test_reset_restarts_sequence() {
        // テスト項目: reset 後は初期状態から再開する
        // given (前提条件):
        let mut backoff = Backoff::new(no_jitter(1));
        backoff.next_delay();
        assert_eq!(backoff.next_delay(), None);

        // when (操作):
        backoff.reset();

        // then (期待する結果):
        assert_eq!(backoff.retries(), 0);
        assert_eq!(backoff.next_delay(), Some(Duration::from_millis(100)));
    }

    #[tokio::test]
    async fn test_retry_with_backoff_succeeds_after_failures() {
        // テスト項目: 一時的な失敗の後に成功すれば Ok が返される
        // given (前提条件):
        let mut calls = 0;
        let mut retries_seen = Vec::new();

        // when (操作):
        let result: Result<u32, &str> = retry_with_backoff(
            no_jitter(5),
            || {
                calls += 1;
                let attempt = calls;
                async move { if attempt < 3 { Err("unavailable") } else { Ok(attempt) } }
            },
            |_, retry, _| retries_seen.push(retry),
        )
        .await;

        // then (期待する結果):
        assert_eq!(result, Ok(3));
        assert_eq!(retries_seen, vec![1, 2]);
    }

    #[tokio::test]
    async fn test_retry_with_backoff_gives_up() {
        // テスト項目: リトライ上限に達すると最後のエラーが返される
        // given (前提条件):
        let mut calls = 0;

        // when (操作):
        let result: Result<(), String> = retry_with_backoff(
            no_jitter(2),
            || {
                calls += 1;
                let attempt = calls;
                async move { Err(format!("failure {attempt}")) }
            },
            |_, _, _| {},
        )
        .await;

        // then (期待する結果):
        assert_eq!(result, Err("failure 3".to_string()));
    }
}
