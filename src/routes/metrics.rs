use axum::extract::State;
use axum::response::IntoResponse;
use metrics_exporter_prometheus::PrometheusHandle;
use std::sync::Arc;

/// Prometheus scrape endpoint for the pipeline counters and histograms.
pub async fn prometheus_metrics(State(handle): State<Arc<PrometheusHandle>>) -> impl IntoResponse {
    handle.render()
}

/// Register descriptions for every metric the pipeline emits.
pub fn describe_metrics() {
    metrics::describe_counter!(
        "pipeline_jobs_completed",
        "Jobs that reached a final video"
    );
    metrics::describe_counter!(
        "pipeline_jobs_failed",
        "Job attempts that ended in an error"
    );
    metrics::describe_counter!(
        "pipeline_jobs_waiting",
        "Job attempts deferred while an avatar render runs"
    );
    metrics::describe_histogram!(
        "pipeline_sweep_seconds",
        "Wall-clock time of one scanner sweep"
    );
    metrics::describe_counter!(
        "render_tasks_terminal",
        "Avatar renders that reached a terminal status, by status"
    );
    metrics::describe_histogram!(
        "segment_compose_seconds",
        "Time to compose one segment, by segment kind"
    );
}
