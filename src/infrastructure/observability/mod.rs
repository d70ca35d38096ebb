//! Observability infrastructure - Prometheus metrics

mod metrics;

pub use metrics::{
    create_metrics_router, init_metrics, record_completion, record_delivery, record_http_request,
    record_llm_request, record_node_failure, record_transition, LlmRequestMetricParams,
    PrometheusMetrics,
};
