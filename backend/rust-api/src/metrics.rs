use lazy_static::lazy_static;
use prometheus::{
    register_histogram_vec, register_int_counter, register_int_counter_vec, Encoder, HistogramVec,
    IntCounter, IntCounterVec, TextEncoder,
};

lazy_static! {
    // HTTP Metrics
    pub static ref HTTP_REQUESTS_TOTAL: IntCounterVec = register_int_counter_vec!(
        "http_requests_total",
        "Total number of HTTP requests",
        &["method", "path", "status"]
    )
    .unwrap();

    pub static ref HTTP_REQUEST_DURATION_SECONDS: HistogramVec = register_histogram_vec!(
        "http_request_duration_seconds",
        "HTTP request duration in seconds",
        &["method", "path"],
        vec![0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0]
    )
    .unwrap();

    // Snapshot store (Redis or in-memory)
    pub static ref STORE_OPERATIONS_TOTAL: IntCounterVec = register_int_counter_vec!(
        "snapshot_store_operations_total",
        "Total number of snapshot store operations",
        &["operation", "status"]
    )
    .unwrap();

    pub static ref STORE_OPERATION_DURATION_SECONDS: HistogramVec = register_histogram_vec!(
        "snapshot_store_operation_duration_seconds",
        "Snapshot store operation duration in seconds",
        &["operation"],
        vec![0.0001, 0.0005, 0.001, 0.005, 0.01, 0.025, 0.05, 0.1]
    )
    .unwrap();

    // Lesson Metrics
    pub static ref QUESTIONS_GENERATED_TOTAL: IntCounterVec = register_int_counter_vec!(
        "questions_generated_total",
        "Total number of practice questions generated",
        &["stage"]
    )
    .unwrap();

    pub static ref GENERATION_NOVELTY_RELAXED_TOTAL: IntCounterVec = register_int_counter_vec!(
        "generation_novelty_relaxed_total",
        "Questions served as repeats after the retry budget ran out",
        &["stage"]
    )
    .unwrap();

    pub static ref ANSWERS_VERIFIED_TOTAL: IntCounterVec = register_int_counter_vec!(
        "answers_verified_total",
        "Total number of answers verified",
        &["correct"]
    )
    .unwrap();

    pub static ref MISCONCEPTIONS_TOTAL: IntCounterVec = register_int_counter_vec!(
        "misconceptions_total",
        "Incorrect answers by diagnosed misconception",
        &["kind"]
    )
    .unwrap();

    pub static ref GROUND_TRUTH_MISMATCH_TOTAL: IntCounter = register_int_counter!(
        "ground_truth_mismatch_total",
        "Questions whose stated answer disagreed with recomputed rounding"
    )
    .unwrap();

    pub static ref STAGE_TRANSITIONS_TOTAL: IntCounterVec = register_int_counter_vec!(
        "stage_transitions_total",
        "Total number of stage transitions",
        &["from", "to"]
    )
    .unwrap();

    pub static ref FEEDBACK_TOTAL: IntCounterVec = register_int_counter_vec!(
        "feedback_total",
        "Feedback messages produced",
        &["source"]
    )
    .unwrap();
}

/// Renders all metrics in Prometheus text format
pub fn render_metrics() -> Result<String, prometheus::Error> {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();
    encoder.encode(&metric_families, &mut buffer)?;
    String::from_utf8(buffer)
        .map_err(|e| prometheus::Error::Msg(format!("Failed to convert metrics to UTF-8: {}", e)))
}

/// Helper: track snapshot store operation with metrics
pub async fn track_store_operation<F, T>(operation: &str, future: F) -> Result<T, anyhow::Error>
where
    F: std::future::Future<Output = Result<T, anyhow::Error>>,
{
    let start = std::time::Instant::now();
    let result = future.await;
    let duration = start.elapsed().as_secs_f64();

    let status = if result.is_ok() { "success" } else { "error" };

    STORE_OPERATIONS_TOTAL
        .with_label_values(&[operation, status])
        .inc();

    STORE_OPERATION_DURATION_SECONDS
        .with_label_values(&[operation])
        .observe(duration);

    result
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metrics_registration() {
        let _ = HTTP_REQUESTS_TOTAL
            .with_label_values(&["GET", "/health", "200"])
            .get();
        let _ = GROUND_TRUTH_MISMATCH_TOTAL.get();
    }

    #[test]
    fn test_render_metrics() {
        QUESTIONS_GENERATED_TOTAL.with_label_values(&["1.1"]).inc();

        let output = render_metrics().unwrap();
        assert!(output.contains("questions_generated_total"));
    }

    #[tokio::test]
    async fn test_track_store_operation_counts_errors() {
        let before = STORE_OPERATIONS_TOTAL
            .with_label_values(&["probe", "error"])
            .get();
        let result: Result<(), _> =
            track_store_operation("probe", async { Err(anyhow::anyhow!("down")) }).await;
        assert!(result.is_err());
        let after = STORE_OPERATIONS_TOTAL
            .with_label_values(&["probe", "error"])
            .get();
        assert_eq!(after, before + 1);
    }
}
