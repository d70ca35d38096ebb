mod app_config;

pub use app_config::{
    AppConfig, CallControlConfig, EngineConfig, LlmBackend, LlmConfig, LogFormat, LoggingConfig,
    MetricsConfig, ServerConfig, WorkflowsConfig,
};
