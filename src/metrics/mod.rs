use once_cell::sync::Lazy;
use prometheus::{register_int_counter, register_int_counter_vec, Encoder, IntCounter, IntCounterVec, TextEncoder};

/// Количество применений набора открытых сайтов
pub static APPLY_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    register_int_counter_vec!(
        "herd_apply_total",
        "Total site exposure apply runs",
        &["result"]
    )
    .expect("Failed to register herd_apply_total metric")
});

/// Операции над реестром прокси
pub static PROXY_OPERATIONS: Lazy<IntCounterVec> = Lazy::new(|| {
    register_int_counter_vec!(
        "herd_proxy_operations_total",
        "Total proxy registry operations",
        &["operation", "result"]
    )
    .expect("Failed to register herd_proxy_operations_total metric")
});

/// Запущенные перезапуски nginx
pub static RESTARTS_SUBMITTED: Lazy<IntCounter> = Lazy::new(|| {
    register_int_counter!(
        "herd_restarts_submitted_total",
        "Total nginx restarts launched"
    )
    .expect("Failed to register herd_restarts_submitted_total metric")
});

pub fn result_label<T, E>(result: &Result<T, E>) -> &'static str {
    if result.is_ok() {
        "success"
    } else {
        "failure"
    }
}

/// Текстовое представление всех метрик в формате Prometheus
pub fn render() -> String {
    Lazy::force(&APPLY_TOTAL);
    Lazy::force(&PROXY_OPERATIONS);
    Lazy::force(&RESTARTS_SUBMITTED);

    let mut buffer = Vec::new();
    let encoder = TextEncoder::new();
    if let Err(e) = encoder.encode(&prometheus::gather(), &mut buffer) {
        log::error!("Failed to encode metrics: {}", e);
        return String::new();
    }
    String::from_utf8_lossy(&buffer).into_owned()
}
