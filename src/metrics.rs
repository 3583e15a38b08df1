//! Ambient Prometheus-style metrics (§1 ambient stack, §2 "Observability").
//!
//! Uses the `metrics` facade so call sites (`reducer`, `intake`,
//! `service`) stay decoupled from the exporter; [`install`] wires the
//! Prometheus recorder once at startup and hands back a handle `/metrics`
//! renders from.

use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};

pub const TICKS_TOTAL: &str = "monitoring_service_ticks_total";
pub const EVENTS_PROCESSED_TOTAL: &str = "monitoring_service_events_processed_total";
pub const ACTIONS_FIRED_TOTAL: &str = "monitoring_service_actions_fired_total";
pub const INTAKE_REJECTED_TOTAL: &str = "monitoring_service_intake_rejected_total";
pub const RPC_RETRIES_TOTAL: &str = "monitoring_service_rpc_retries_total";
pub const LATEST_CONFIRMED_BLOCK: &str = "monitoring_service_latest_confirmed_block";

pub fn install() -> PrometheusHandle {
    PrometheusBuilder::new()
        .install_recorder()
        .expect("installing the global metrics recorder must not fail twice in one process")
}

pub fn record_tick() {
    metrics::counter!(TICKS_TOTAL).increment(1);
}

pub fn record_events_processed(count: u64) {
    metrics::counter!(EVENTS_PROCESSED_TOTAL).increment(count);
}

pub fn record_action_fired(kind: &'static str) {
    metrics::counter!(ACTIONS_FIRED_TOTAL, "kind" => kind).increment(1);
}

pub fn record_intake_rejected(reason: &'static str) {
    metrics::counter!(INTAKE_REJECTED_TOTAL, "reason" => reason).increment(1);
}

pub fn record_rpc_retry() {
    metrics::counter!(RPC_RETRIES_TOTAL).increment(1);
}

pub fn record_latest_confirmed_block(block: u64) {
    metrics::gauge!(LATEST_CONFIRMED_BLOCK).set(block as f64);
}
