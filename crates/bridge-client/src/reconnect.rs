//! Exponential backoff with jitter, single-armed-timer reconnect scheduler.

use std::sync::Arc;
use std::time::Duration;

use rand::Rng;

/// Why a reconnect is being scheduled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReconnectReason {
    SocketClose,
    SocketError,
    ConnectError,
    OpenSocketThrow,
    ManualClose,
}

/// Emitted every time the scheduler arms a timer.
#[derive(Debug, Clone)]
pub struct ReconnectScheduled {
    pub attempt: u32,
    pub next_delay: Duration,
    pub reason: ReconnectReason,
    pub error: Option<String>,
}

/// Reconnect configuration. Mirrors spec defaults: `initial_delay=500ms`,
/// `max_delay=30s`, `multiplier=2`, `jitter_ratio=0.2`.
#[derive(Clone)]
pub struct ReconnectConfig {
    pub enabled: bool,
    pub initial_delay: Duration,
    pub max_delay: Duration,
    pub multiplier: f64,
    pub jitter_ratio: f64,
    pub should_retry: Option<Arc<dyn Fn(ReconnectReason) -> bool + Send + Sync>>,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        ReconnectConfig {
            enabled: true,
            initial_delay: Duration::from_millis(500),
            max_delay: Duration::from_millis(30_000),
            multiplier: 2.0,
            jitter_ratio: 0.2,
            should_retry: None,
        }
    }
}

impl std::fmt::Debug for ReconnectConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReconnectConfig")
            .field("enabled", &self.enabled)
            .field("initial_delay", &self.initial_delay)
            .field("max_delay", &self.max_delay)
            .field("multiplier", &self.multiplier)
            .field("jitter_ratio", &self.jitter_ratio)
            .field("should_retry", &self.should_retry.is_some())
            .finish()
    }
}

/// Computes the delay for 1-based attempt `n`, with jitter if configured.
/// Floors `initial_delay` at 0, `max_delay` at `initial_delay`, and
/// `multiplier` at 1 before computing, per the spec's delay formula.
pub fn compute_delay(config: &ReconnectConfig, attempt: u32, jitter_sample: f64) -> Duration {
    let initial_ms = config.initial_delay.as_secs_f64().max(0.0) * 1000.0;
    let max_ms = (config.max_delay.as_secs_f64() * 1000.0).max(initial_ms);
    let multiplier = config.multiplier.max(1.0);

    let base = (initial_ms * multiplier.powi(attempt as i32 - 1)).min(max_ms);

    let delay_ms = if config.jitter_ratio == 0.0 {
        base.floor()
    } else {
        // jitter_sample is expected to be uniform in [-1, 1).
        let jittered = base * (1.0 + jitter_sample * config.jitter_ratio);
        jittered.clamp(0.0, max_ms).floor()
    };

    Duration::from_millis(delay_ms as u64)
}

/// Draws a uniform sample in `[-1, 1)` for use with [`compute_delay`].
pub fn sample_jitter() -> f64 {
    rand::thread_rng().gen_range(-1.0..1.0)
}

/// Tracks the reconnect attempt counter and the single armed timer handle.
/// Owned exclusively by the client core's actor task; never shared.
pub struct ReconnectState {
    config: ReconnectConfig,
    attempt: u32,
    timer: Option<tokio::task::JoinHandle<ReconnectReason>>,
    manual_close: bool,
}

impl ReconnectState {
    pub fn new(config: ReconnectConfig) -> Self {
        ReconnectState {
            config,
            attempt: 0,
            timer: None,
            manual_close: false,
        }
    }

    pub fn attempt(&self) -> u32 {
        self.attempt
    }

    pub fn has_armed_timer(&self) -> bool {
        self.timer.is_some()
    }

    pub fn is_manual_close(&self) -> bool {
        self.manual_close
    }

    /// Resets the attempt counter to 0, called after a successful open.
    pub fn reset(&mut self) {
        self.attempt = 0;
    }

    /// Manual close cancels any armed timer and prevents further scheduling
    /// until the next explicit `connect`.
    pub fn manual_close(&mut self) {
        self.manual_close = true;
        if let Some(timer) = self.timer.take() {
            timer.abort();
        }
    }

    pub fn clear_manual_close(&mut self) {
        self.manual_close = false;
    }

    /// Cancels an armed timer without setting `manual_close`, used by
    /// `connect()` which must clear any pending reconnect before opening a
    /// fresh socket.
    pub fn cancel_timer(&mut self) {
        if let Some(timer) = self.timer.take() {
            timer.abort();
        }
    }

    /// Attempts to arm a reconnect timer. No-op if one is already armed, if
    /// `manual_close` is set, if reconnect is disabled, or if
    /// `should_retry` rejects this reason. Returns the scheduled event if a
    /// timer was armed.
    pub fn schedule(
        &mut self,
        reason: ReconnectReason,
        error: Option<String>,
    ) -> Option<ReconnectScheduled> {
        if self.timer.is_some() || self.manual_close || !self.config.enabled {
            return None;
        }
        if let Some(predicate) = &self.config.should_retry {
            if !predicate(reason) {
                return None;
            }
        }

        self.attempt += 1;
        let delay = compute_delay(&self.config, self.attempt, sample_jitter());
        let attempt_reason = reason;
        self.timer = Some(tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            attempt_reason
        }));

        Some(ReconnectScheduled {
            attempt: self.attempt,
            next_delay: delay,
            reason,
            error,
        })
    }

    /// Consumes the armed timer, if any, returning once it fires. The
    /// caller (the client core's `select!` loop) is expected to treat this
    /// as one branch among several event sources.
    pub async fn wait(&mut self) -> Option<ReconnectReason> {
        match self.timer.as_mut() {
            Some(timer) => {
                let result = timer.await.ok();
                self.timer = None;
                result
            }
            None => std::future::pending().await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(jitter_ratio: f64) -> ReconnectConfig {
        ReconnectConfig {
            enabled: true,
            initial_delay: Duration::from_millis(100),
            max_delay: Duration::from_millis(30_000),
            multiplier: 2.0,
            jitter_ratio,
            should_retry: None,
        }
    }

    #[test]
    fn backoff_progression_without_jitter() {
        let cfg = config(0.0);
        let delays: Vec<u64> = (1..=3)
            .map(|n| compute_delay(&cfg, n, 0.0).as_millis() as u64)
            .collect();
        assert_eq!(delays, vec![100, 200, 400]);
    }

    #[test]
    fn backoff_cap_without_jitter() {
        let mut cfg = config(0.0);
        cfg.max_delay = Duration::from_millis(250);
        let delays: Vec<u64> = (1..=4)
            .map(|n| compute_delay(&cfg, n, 0.0).as_millis() as u64)
            .collect();
        assert_eq!(delays, vec![100, 200, 250, 250]);
    }

    #[test]
    fn jitter_clamped_to_max_delay() {
        let cfg = config(1.0);
        let delay = compute_delay(&cfg, 1, 0.999).as_millis() as u64;
        assert!(delay <= 30_000);
    }

    #[tokio::test]
    async fn schedule_is_a_no_op_while_timer_armed() {
        let mut state = ReconnectState::new(config(0.0));
        let first = state.schedule(ReconnectReason::SocketClose, None);
        assert!(first.is_some());
        let second = state.schedule(ReconnectReason::SocketClose, None);
        assert!(second.is_none());
    }

    #[tokio::test]
    async fn manual_close_cancels_timer_and_blocks_scheduling() {
        let mut state = ReconnectState::new(config(0.0));
        assert!(state.schedule(ReconnectReason::SocketClose, None).is_some());
        state.manual_close();
        assert!(!state.has_armed_timer());
        assert!(state
            .schedule(ReconnectReason::SocketClose, None)
            .is_none());
    }

    #[tokio::test]
    async fn reset_zeroes_attempt_counter() {
        let mut state = ReconnectState::new(config(0.0));
        state.schedule(ReconnectReason::SocketClose, None);
        assert_eq!(state.attempt(), 1);
        state.reset();
        assert_eq!(state.attempt(), 0);
    }

    #[test]
    fn should_retry_predicate_blocks_scheduling() {
        let mut cfg = config(0.0);
        cfg.should_retry = Some(Arc::new(|_| false));
        let mut state = ReconnectState::new(cfg);
        assert!(state
            .schedule(ReconnectReason::ConnectError, None)
            .is_none());
    }
}
