// src/metrics.rs

#[cfg(feature = "observability")]
pub use metrics::{
    counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram,
    increment_counter, Unit,
};

// NOTE: When observability feature is disabled, provide stub implementations
#[cfg(not(feature = "observability"))]
pub enum Unit {}

// Macros for metrics when observability is disabled
#[cfg(not(feature = "observability"))]
#[macro_export]
macro_rules! counter {
    ($name:expr, $value:expr $(, $label:expr => $label_value:expr)* $(,)?) => {};
    ($name:expr $(, $label:expr => $label_value:expr)* $(,)?) => {};
}

#[cfg(not(feature = "observability"))]
#[macro_export]
macro_rules! gauge {
    ($name:expr, $value:expr $(, $label:expr => $label_value:expr)* $(,)?) => {};
}

#[cfg(not(feature = "observability"))]
#[macro_export]
macro_rules! histogram {
    ($name:expr, $value:expr $(, $label:expr => $label_value:expr)* $(,)?) => {};
}

#[cfg(not(feature = "observability"))]
#[macro_export]
macro_rules! increment_counter {
    ($name:expr $(, $label:expr => $label_value:expr)* $(,)?) => {};
}

#[cfg(not(feature = "observability"))]
#[macro_export]
macro_rules! describe_counter {
    ($name:expr, $unit:expr, $desc:expr) => {};
    ($name:expr, $desc:expr) => {};
}

#[cfg(not(feature = "observability"))]
#[macro_export]
macro_rules! describe_gauge {
    ($name:expr, $desc:expr) => {};
}

#[cfg(not(feature = "observability"))]
#[macro_export]
macro_rules! describe_histogram {
    ($name:expr, $unit:expr, $desc:expr) => {};
    ($name:expr, $desc:expr) => {};
}

// Re-export macros for use in this module when observability is disabled
#[cfg(not(feature = "observability"))]
use crate::{
    counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram,
    increment_counter,
};

/// Initializes the descriptions for all the metrics in the engine.
/// This should be called once at startup.
pub fn describe_metrics() {
    describe_gauge!("engine_up", "Engine process liveness (1=up).");

    describe_counter!(
        "engine_state_events_total",
        Unit::Count,
        "Total state events applied, labeled by kind (created, updated, swap, liquidity)."
    );
    describe_counter!(
        "engine_state_events_dropped_total",
        Unit::Count,
        "Total state events dropped because they referenced an unknown pool."
    );
    describe_counter!(
        "engine_pool_lookups_total",
        Unit::Count,
        "Total pool index lookups, labeled by result (hit, miss)."
    );
    describe_gauge!("engine_pools_tracked", "Number of pools currently tracked.");

    describe_counter!(
        "engine_events_total",
        Unit::Count,
        "Total multiplexed events emitted by the collector, labeled by source (block, pending_tx, log)."
    );
    describe_counter!(
        "engine_events_deduped_total",
        Unit::Count,
        "Total duplicate events suppressed by the dedup window."
    );
    describe_counter!(
        "engine_log_poll_retries_total",
        Unit::Count,
        "Total getLogs retries with a halved block range after an oversized response."
    );

    describe_counter!(
        "engine_simulations_total",
        Unit::Count,
        "Total path simulations, labeled by result (computed, memoized)."
    );
    describe_counter!(
        "engine_cycles_enumerated_total",
        Unit::Count,
        "Total cycles emitted by the finder."
    );
    describe_counter!(
        "engine_opportunities_total",
        Unit::Count,
        "Total opportunities, labeled by outcome (inserted, popped, stale, expired, profitable)."
    );
    describe_histogram!(
        "engine_optimize_ms",
        "Input-size optimization latency in milliseconds per candidate."
    );
    describe_histogram!(
        "engine_multicall_batch_size",
        "Number of calls per multicall batch."
    );
}

/// Record the size of one multicall batch.
pub fn record_multicall_batch_size(size: f64) {
    histogram!("engine_multicall_batch_size", size);
}

/// Record a pool index lookup outcome.
pub fn record_pool_lookup(hit: bool) {
    let result = if hit { "hit" } else { "miss" };
    counter!("engine_pool_lookups_total", 1, "result" => result);
}

/// Record one applied state event.
pub fn record_state_event(kind: &'static str) {
    counter!("engine_state_events_total", 1, "kind" => kind);
}

/// Record a state event dropped for referencing an unknown pool.
pub fn record_dropped_event() {
    counter!("engine_state_events_dropped_total", 1);
}

/// Record a multiplexed event by source.
pub fn record_event(source: &'static str) {
    counter!("engine_events_total", 1, "source" => source);
}

/// Record a duplicate suppressed by the dedup window.
pub fn record_deduped_event() {
    counter!("engine_events_deduped_total", 1);
}

/// Record a halved-range getLogs retry.
pub fn record_log_poll_retry() {
    counter!("engine_log_poll_retries_total", 1);
}

/// Record a simulation, memoized or freshly computed.
pub fn record_simulation(memoized: bool) {
    let result = if memoized { "memoized" } else { "computed" };
    counter!("engine_simulations_total", 1, "result" => result);
}

/// Record one cycle emitted by the finder.
pub fn record_cycle_enumerated() {
    counter!("engine_cycles_enumerated_total", 1);
}

/// Record an opportunity lifecycle outcome.
pub fn record_opportunity(outcome: &'static str) {
    counter!("engine_opportunities_total", 1, "outcome" => outcome);
}

/// Record the current tracked-pool count.
pub fn record_pools_tracked(count: usize) {
    gauge!("engine_pools_tracked", count as f64);
}

/// Record optimization latency for one candidate.
pub fn record_optimize_ms(ms: f64) {
    histogram!("engine_optimize_ms", ms);
}
