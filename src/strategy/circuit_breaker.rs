//! Global halt logic from rolling counters.
//!
//! Three independent trip conditions: reject rate, cancel burst, cumulative
//! errors. Placement counters are cumulative since process start; cancel
//! events live in a 60 s sliding window.

use std::collections::VecDeque;

use crate::util::now_ts;

#[derive(Debug, Clone)]
pub struct CircuitConfig {
    /// rejected / placed threshold, judged once ≥ 20 placements observed.
    pub max_reject_rate: f64,
    pub window_sec: i64,
    pub max_cancels_per_min: usize,
    pub max_errors: u64,
}

impl Default for CircuitConfig {
    fn default() -> Self {
        Self {
            max_reject_rate: 0.30,
            window_sec: 300,
            max_cancels_per_min: 120,
            max_errors: 10,
        }
    }
}

impl CircuitConfig {
    /// Env-driven thresholds. Paper runs loosen the cancel-burst limit so the
    /// simulator's churn cannot self-halt a research run.
    pub fn from_env(is_paper: bool) -> Self {
        let d = Self::default();
        let f = |name: &str, default: f64| -> f64 {
            std::env::var(name)
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(default)
        };
        let cancels_var = if is_paper {
            "PMM_CB_MAX_CANCELS_PER_MIN_PAPER"
        } else {
            "PMM_CB_MAX_CANCELS_PER_MIN"
        };
        let cancels_default = if is_paper { 10_000.0 } else { 120.0 };
        Self {
            max_reject_rate: f("PMM_CB_MAX_REJECT_RATE", d.max_reject_rate),
            window_sec: f("PMM_CB_WINDOW_SEC", d.window_sec as f64) as i64,
            max_cancels_per_min: f(cancels_var, cancels_default) as usize,
            max_errors: f("PMM_CB_MAX_ERRORS", d.max_errors as f64) as u64,
        }
    }
}

#[derive(Debug, Default)]
pub struct CircuitState {
    pub placed: u64,
    pub rejected: u64,
    pub errors: u64,
    /// Unix timestamps of recent cancels, trimmed to the last 60 s on record.
    pub cancel_events: VecDeque<i64>,
}

pub struct CircuitBreaker {
    pub cfg: CircuitConfig,
    pub state: CircuitState,
}

impl CircuitBreaker {
    pub fn new(cfg: CircuitConfig) -> Self {
        Self {
            cfg,
            state: CircuitState::default(),
        }
    }

    /// Record a non-SKIP placement attempt. SKIPs must not reach this.
    pub fn record_place(&mut self, ok: bool) {
        self.state.placed += 1;
        if !ok {
            self.state.rejected += 1;
        }
    }

    pub fn record_cancel(&mut self) {
        self.record_cancel_at(now_ts());
    }

    pub fn record_cancel_at(&mut self, now: i64) {
        self.state.cancel_events.push_back(now);
        while self
            .state
            .cancel_events
            .front()
            .is_some_and(|t| now - t > 60)
        {
            self.state.cancel_events.pop_front();
        }
    }

    pub fn record_error(&mut self) {
        self.state.errors += 1;
    }

    pub fn cancels_last_minute(&self) -> usize {
        self.state.cancel_events.len()
    }

    /// Any tripped condition halts the run. Returns the reason.
    pub fn should_halt(&self) -> Option<String> {
        let reject_rate = self.state.rejected as f64 / self.state.placed.max(1) as f64;
        if reject_rate >= self.cfg.max_reject_rate && self.state.placed >= 20 {
            return Some(format!(
                "reject_rate={:.1}% over placed={}",
                reject_rate * 100.0,
                self.state.placed
            ));
        }
        if self.state.cancel_events.len() > self.cfg.max_cancels_per_min {
            return Some(format!(
                "cancel_rate={}/min",
                self.state.cancel_events.len()
            ));
        }
        if self.state.errors >= self.cfg.max_errors {
            return Some(format!("errors={}", self.state.errors));
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cb() -> CircuitBreaker {
        CircuitBreaker::new(CircuitConfig::default())
    }

    #[test]
    fn test_reject_rate_trip() {
        // 12 rejects over 30 placements → 40% ≥ 30% with placed ≥ 20
        let mut b = cb();
        for i in 0..30 {
            b.record_place(i >= 12);
        }
        let why = b.should_halt().expect("should trip");
        assert!(why.contains("reject_rate"));
    }

    #[test]
    fn test_reject_rate_needs_volume() {
        let mut b = cb();
        for _ in 0..10 {
            b.record_place(false); // 100% rejects but only 10 placements
        }
        assert!(b.should_halt().is_none());
    }

    #[test]
    fn test_cancel_window_trims() {
        let mut b = cb();
        b.record_cancel_at(1000);
        b.record_cancel_at(1030);
        b.record_cancel_at(1061); // evicts ts=1000
        assert_eq!(b.cancels_last_minute(), 2);
        for t in b.state.cancel_events.iter() {
            assert!(1061 - t <= 60);
        }
    }

    #[test]
    fn test_cancel_burst_trip() {
        let mut b = CircuitBreaker::new(CircuitConfig {
            max_cancels_per_min: 3,
            ..CircuitConfig::default()
        });
        for _ in 0..4 {
            b.record_cancel_at(2000);
        }
        assert!(b.should_halt().unwrap().contains("cancel_rate"));
    }

    #[test]
    fn test_error_trip() {
        let mut b = cb();
        for _ in 0..10 {
            b.record_error();
        }
        assert!(b.should_halt().unwrap().contains("errors"));
    }

    #[test]
    fn test_quiet_breaker_stays_closed() {
        let mut b = cb();
        for _ in 0..100 {
            b.record_place(true);
        }
        b.record_cancel_at(100);
        assert!(b.should_halt().is_none());
    }
}
