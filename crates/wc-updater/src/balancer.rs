//! Adaptive load balancer.
//!
//! Samples how much of each tick interval the driver spends working versus
//! sleeping and steers the preferred worker count between 1 and the
//! configured maximum. `sample_begin` runs at the start of a tick (closing
//! the inter-tick sleep span), `sample_end` after the round barrier (closing
//! the work span); the single stamp guarantees sleep measures inter-tick idle
//! only, never intra-tick waiting.

use tracing::debug;

use wc_common::time::IntervalTimer;

/// Tuning for the balancer, derived from configuration at startup.
#[derive(Debug, Clone)]
pub struct BalancerSettings {
    /// When false, the preferred count pins to `configured_threads`.
    pub dynamic: bool,
    pub configured_threads: usize,
    pub max_threads: usize,
    /// Milliseconds between balancing decisions (a multiple of the update
    /// interval).
    pub balance_interval_ms: u64,
    pub load_high: f64,
    pub load_low: f64,
}

pub struct LoadBalancer {
    settings: BalancerSettings,
    preferred: usize,
    work_acc: u64,
    sleep_acc: u64,
    tick_count: u32,
    last_stamp: u64,
    balance_timer: IntervalTimer,
    last_load: f64,
}

impl LoadBalancer {
    pub fn new(settings: BalancerSettings, now_ms: u64) -> Self {
        let preferred = if settings.dynamic {
            1
        } else {
            settings.configured_threads
        };
        let balance_timer = IntervalTimer::new(settings.balance_interval_ms);
        Self {
            settings,
            preferred,
            work_acc: 0,
            sleep_acc: 0,
            tick_count: 0,
            last_stamp: now_ms,
            balance_timer,
            last_load: 0.0,
        }
    }

    /// Start-of-tick sample: the span since the last stamp was sleep.
    pub fn sample_begin(&mut self, now_ms: u64, current_threads: usize) {
        if !self.settings.dynamic {
            self.preferred = self.settings.configured_threads;
            return;
        }
        let diff = self.stamp(now_ms);
        self.sleep_acc += diff;
        self.tick_count += 1;
        self.maybe_decide(current_threads);
    }

    /// End-of-tick sample: the span since the last stamp was work.
    pub fn sample_end(&mut self, now_ms: u64, current_threads: usize) {
        if !self.settings.dynamic {
            return;
        }
        let diff = self.stamp(now_ms);
        self.work_acc += diff;
        self.maybe_decide(current_threads);
    }

    /// Preferred worker count, always within `[1, max_threads]` while
    /// dynamic balancing is on.
    pub fn preferred_threads(&self) -> usize {
        self.preferred
    }

    /// Load ratio of the last completed balance window, in `[0, 1]`.
    pub fn last_load(&self) -> f64 {
        self.last_load
    }

    fn stamp(&mut self, now_ms: u64) -> u64 {
        let diff = now_ms.saturating_sub(self.last_stamp);
        self.last_stamp = now_ms;
        self.balance_timer.update(diff);
        diff
    }

    fn maybe_decide(&mut self, current_threads: usize) {
        if !self.balance_timer.passed()
            || self.tick_count == 0
            || self.work_acc + self.sleep_acc == 0
        {
            return;
        }

        let ticks = self.tick_count as f64;
        let mean_work = self.work_acc as f64 / ticks;
        let mean_total = (self.work_acc + self.sleep_acc) as f64 / ticks;
        let load = mean_work / mean_total;
        self.last_load = load;

        let previous = self.preferred;
        if load >= self.settings.load_high {
            if self.preferred < self.settings.max_threads {
                self.preferred += 1;
            }
        } else if load <= self.settings.load_low {
            if self.preferred > 1 {
                self.preferred -= 1;
            }
        } else {
            self.preferred = current_threads.clamp(1, self.settings.max_threads);
        }

        if self.preferred != previous {
            debug!(
                load,
                ticks = self.tick_count,
                previous,
                preferred = self.preferred,
                "Load balance decision"
            );
        }

        self.work_acc = 0;
        self.sleep_acc = 0;
        self.tick_count = 0;
        self.balance_timer.set_current(0);
    }
}
