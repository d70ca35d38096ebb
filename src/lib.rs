//! Callflow Engine
//!
//! Drives scripted, multi-turn conversations over live voice calls. A
//! workflow is a graph of Say and Gather nodes; the engine advances each
//! `(workflow, user, call)` execution as conversation updates arrive and
//! computes what should be spoken next.

pub mod api;
pub mod cli;
pub mod config;
pub mod domain;
pub mod infrastructure;

pub use config::AppConfig;

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use tokio_util::sync::CancellationToken;
use tracing::info;

use api::state::AppState;
use domain::workflow::Workflow;
use infrastructure::{
    call_control::CallControlClient,
    llm::CapabilitiesFactory,
    services::ConversationRelay,
    workflow::{InMemoryWorkflowStorage, WorkflowEngine, WorkflowEngineConfig},
};

/// Wire storage, capabilities, engine and relay from configuration
pub async fn create_app_state_with_config(
    config: &AppConfig,
    shutdown: CancellationToken,
) -> anyhow::Result<AppState> {
    let capabilities = CapabilitiesFactory::create(&config.llm)?;
    let storage = Arc::new(InMemoryWorkflowStorage::new());

    let engine = Arc::new(WorkflowEngine::with_config(
        storage,
        capabilities,
        WorkflowEngineConfig::from(&config.engine),
    ));

    if let Some(dir) = &config.workflows.definitions_dir {
        let count = register_workflow_definitions(&engine, dir).await?;
        info!(count, dir = %dir.display(), "Registered workflow definitions");
    }

    let delivery = Arc::new(CallControlClient::new(Duration::from_secs(
        config.call_control.timeout_secs,
    ))?);

    let relay = ConversationRelay::new(engine, delivery).with_control_options(
        &config.call_control.role,
        config.call_control.trigger_response,
    );

    Ok(AppState::new(Arc::new(relay), shutdown))
}

/// Parse a workflow definition from a JSON file
pub fn read_workflow_file(path: &Path) -> anyhow::Result<Workflow> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read {}", path.display()))?;

    serde_json::from_str(&raw).with_context(|| format!("Invalid workflow JSON in {}", path.display()))
}

/// Create every `*.json` workflow in `dir`, in file name order
pub async fn register_workflow_definitions(
    engine: &WorkflowEngine,
    dir: &Path,
) -> anyhow::Result<usize> {
    let mut paths = std::fs::read_dir(dir)
        .with_context(|| format!("Failed to read workflow directory {}", dir.display()))?
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|path| path.extension().is_some_and(|ext| ext == "json"))
        .collect::<Vec<_>>();
    paths.sort();

    for path in &paths {
        let workflow = read_workflow_file(path)?;
        let created = engine
            .create_workflow(workflow)
            .await
            .with_context(|| format!("Failed to register {}", path.display()))?;

        info!(workflow_id = %created.id(), file = %path.display(), "Workflow registered");
    }

    Ok(paths.len())
}
