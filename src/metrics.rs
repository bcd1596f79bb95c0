//! Process-local counters
//!
//! Plain atomics shared through an `Arc`, rendered in Prometheus text format
//! for `GET /metrics`.

use std::sync::atomic::{AtomicU64, Ordering};

#[derive(Debug, Default)]
pub struct Metrics {
    pub dispatcher_cycles_total: AtomicU64,
    pub dispatcher_cycles_skipped: AtomicU64,
    pub tasks_completed_total: AtomicU64,
    pub tasks_failed_total: AtomicU64,
    pub tasks_unhandled_total: AtomicU64,

    pub duels_created_total: AtomicU64,
    pub duels_confirmed_total: AtomicU64,
    pub duels_voided_total: AtomicU64,
    pub duels_flagged_total: AtomicU64,

    pub payouts_broadcast_total: AtomicU64,
    pub payouts_failed_total: AtomicU64,
    pub settlement_init_failures_total: AtomicU64,
}

impl Metrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn incr(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn add(counter: &AtomicU64, value: u64) {
        counter.fetch_add(value, Ordering::Relaxed);
    }

    fn counters(&self) -> [(&'static str, &'static str, &AtomicU64); 12] {
        [
            ("dispatcher_cycles_total", "Dispatcher cycles run", &self.dispatcher_cycles_total),
            ("dispatcher_cycles_skipped_total", "Dispatcher cycles skipped while a cycle was in flight", &self.dispatcher_cycles_skipped),
            ("tasks_completed_total", "Tasks acknowledged after a successful handler run", &self.tasks_completed_total),
            ("tasks_failed_total", "Handler failures left pending for redelivery", &self.tasks_failed_total),
            ("tasks_unhandled_total", "Tasks seen with no registered handler", &self.tasks_unhandled_total),
            ("duels_created_total", "Duels created", &self.duels_created_total),
            ("duels_confirmed_total", "Duels confirmed and settled", &self.duels_confirmed_total),
            ("duels_voided_total", "Duels voided", &self.duels_voided_total),
            ("duels_flagged_total", "Duels flagged for manual review", &self.duels_flagged_total),
            ("payouts_broadcast_total", "External payouts broadcast", &self.payouts_broadcast_total),
            ("payouts_failed_total", "External payouts that failed", &self.payouts_failed_total),
            ("settlement_init_failures_total", "Settlement connection initialisations that exhausted retries", &self.settlement_init_failures_total),
        ]
    }

    /// Generate Prometheus metrics format
    pub fn to_prometheus_format(&self) -> String {
        let mut output = String::new();
        for (name, help, counter) in self.counters() {
            output.push_str(&format!(
                "# HELP duelgate_{name} {help}\n\
                 # TYPE duelgate_{name} counter\n\
                 duelgate_{name} {}\n\n",
                counter.load(Ordering::Relaxed)
            ));
        }
        output
    }
}
