//! Workflow engine: drives executions through their workflow graph

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::Utc;
use moka::future::Cache;
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, info_span, warn, Instrument, Span};

use crate::config::EngineConfig;
use crate::domain::conversation::ConversationTurn;
use crate::domain::workflow::{
    Capabilities, ExecutionContext, ExecutionKey, Node, NodeOutcome, NodeType, Workflow,
    WorkflowError, WorkflowState, WorkflowStorage,
};
use crate::infrastructure::observability::{
    record_completion, record_node_failure, record_transition,
};

/// Message returned once an execution has finished
pub const WORKFLOW_COMPLETE_MESSAGE: &str = "Workflow complete";

/// Configuration for the workflow engine
#[derive(Debug, Clone)]
pub struct WorkflowEngineConfig {
    /// Maximum number of workflow definitions kept in memory
    pub cache_capacity: u64,

    /// How long a cached definition is trusted before reloading from storage
    pub cache_ttl: Duration,
}

impl Default for WorkflowEngineConfig {
    fn default() -> Self {
        Self::from(&EngineConfig::default())
    }
}

impl From<&EngineConfig> for WorkflowEngineConfig {
    fn from(config: &EngineConfig) -> Self {
        Self {
            cache_capacity: config.workflow_cache_capacity,
            cache_ttl: Duration::from_secs(config.workflow_cache_ttl_secs),
        }
    }
}

type LockMap = Mutex<HashMap<ExecutionKey, Arc<AsyncMutex<()>>>>;

/// Claim on one execution's slot, exclusive once `guard` is set
///
/// The map entry is dropped with the last claim, including waiters that
/// were cancelled before acquiring. Each claim releases its own slot
/// references before the count check under the map mutex.
struct ExecutionLock<'a> {
    locks: &'a LockMap,
    key: ExecutionKey,
    slot: Option<Arc<AsyncMutex<()>>>,
    guard: Option<OwnedMutexGuard<()>>,
}

impl Drop for ExecutionLock<'_> {
    fn drop(&mut self) {
        drop(self.guard.take());

        let mut locks = self.locks.lock().unwrap_or_else(|e| e.into_inner());
        drop(self.slot.take());
        if locks
            .get(&self.key)
            .is_some_and(|slot| Arc::strong_count(slot) == 1)
        {
            locks.remove(&self.key);
        }
    }
}

/// Orchestrates workflow creation and execution
///
/// Each `(workflow, user, call)` triple is processed by one caller at a time
/// within this engine; storage's version check catches writers in other
/// processes.
#[derive(Debug)]
pub struct WorkflowEngine {
    storage: Arc<dyn WorkflowStorage>,
    capabilities: Capabilities,
    workflows: Cache<String, Arc<Workflow>>,
    locks: LockMap,
    span: Span,
}

impl WorkflowEngine {
    pub fn new(storage: Arc<dyn WorkflowStorage>, capabilities: Capabilities) -> Self {
        Self::with_config(storage, capabilities, WorkflowEngineConfig::default())
    }

    pub fn with_config(
        storage: Arc<dyn WorkflowStorage>,
        capabilities: Capabilities,
        config: WorkflowEngineConfig,
    ) -> Self {
        let workflows = Cache::builder()
            .max_capacity(config.cache_capacity)
            .time_to_live(config.cache_ttl)
            .build();

        Self {
            storage,
            capabilities,
            workflows,
            locks: Mutex::new(HashMap::new()),
            span: info_span!("workflow_engine"),
        }
    }

    /// Parent span for every operation this engine performs
    pub fn with_span(mut self, span: Span) -> Self {
        self.span = span;
        self
    }

    /// Validate, timestamp and persist a workflow definition
    pub async fn create_workflow(&self, workflow: Workflow) -> Result<Workflow, WorkflowError> {
        let span = info_span!(parent: &self.span, "create_workflow", workflow_id = %workflow.id());

        async move {
            workflow.validate()?;

            let mut workflow = workflow;
            workflow.stamp(Utc::now());

            self.storage.save_workflow(&workflow).await?;
            self.workflows
                .insert(workflow.id().to_string(), Arc::new(workflow.clone()))
                .await;

            info!(nodes = workflow.nodes().len(), "Workflow created");
            Ok(workflow)
        }
        .instrument(span)
        .await
    }

    /// Load a workflow definition, from cache when possible
    pub async fn get_workflow(&self, workflow_id: &str) -> Result<Arc<Workflow>, WorkflowError> {
        if let Some(workflow) = self.workflows.get(workflow_id).await {
            return Ok(workflow);
        }

        let workflow = self
            .storage
            .get_workflow(workflow_id)
            .await?
            .map(Arc::new)
            .ok_or_else(|| WorkflowError::not_found(workflow_id))?;

        self.workflows
            .insert(workflow_id.to_string(), workflow.clone())
            .await;

        Ok(workflow)
    }

    /// Current persisted state of an execution, fresh if never started
    pub async fn get_workflow_state(&self, key: &ExecutionKey) -> Result<WorkflowState, WorkflowError> {
        Ok(self.storage.get_workflow_state(key).await?)
    }

    /// Position a new execution at the start node; a started execution is returned unchanged
    pub async fn start_workflow(&self, key: &ExecutionKey) -> Result<WorkflowState, WorkflowError> {
        let span = info_span!(
            parent: &self.span,
            "start_workflow",
            workflow_id = %key.workflow_id,
            user_id = %key.user_id,
            call_id = %key.call_id,
        );

        async move {
            let workflow = self.get_workflow(&key.workflow_id).await?;
            let _lock = self.lock(key).await;

            let mut state = self.storage.get_workflow_state(key).await?;
            if state.is_started() {
                debug!(current_node_id = ?state.current_node_id, "Execution already started");
                return Ok(state);
            }

            state.current_node_id = Some(workflow.start_node_id().to_string());
            state.touch(Utc::now());

            let saved = self.storage.save_workflow_state(&state).await?;
            info!(start_node_id = %workflow.start_node_id(), "Execution started");

            Ok(saved)
        }
        .instrument(span)
        .await
    }

    /// Advance an execution in response to new conversation turns
    ///
    /// The current node runs, and if that moves the execution onto a Say node
    /// it runs too. State is persisted only if every step succeeded and
    /// `cancel` has not fired.
    pub async fn process_conversation_update(
        &self,
        key: &ExecutionKey,
        turns: &[ConversationTurn],
        cancel: &CancellationToken,
    ) -> Result<WorkflowState, WorkflowError> {
        let span = info_span!(
            parent: &self.span,
            "process_conversation_update",
            workflow_id = %key.workflow_id,
            user_id = %key.user_id,
            call_id = %key.call_id,
            turns = turns.len(),
        );

        self.process_update(key, turns, cancel).instrument(span).await
    }

    async fn process_update(
        &self,
        key: &ExecutionKey,
        turns: &[ConversationTurn],
        cancel: &CancellationToken,
    ) -> Result<WorkflowState, WorkflowError> {
        let workflow = self.get_workflow(&key.workflow_id).await?;

        let _lock = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(WorkflowError::Cancelled),
            lock = self.lock(key) => lock,
        };

        let stored = self.storage.get_workflow_state(key).await?;
        if stored.is_complete {
            debug!("Execution already complete");
            return Ok(stored);
        }

        let current_id = stored.current_node_id.clone().unwrap_or_default();
        let node = workflow
            .node(&current_id)
            .ok_or_else(|| WorkflowError::node_not_found(&current_id))?;

        let mut working = stored.clone();
        working.last_message_at = Some(Utc::now());

        let ctx = ExecutionContext::new(&self.capabilities, turns, cancel);
        let outcome = self.run_node(node, &mut working, &ctx).await?;

        if matches!(outcome, NodeOutcome::Advanced | NodeOutcome::FellBack { .. }) {
            if let Some(next_id) = working.current_node_id.clone() {
                let next = workflow
                    .node(&next_id)
                    .ok_or_else(|| WorkflowError::node_not_found(&next_id))?;

                if next.node_type() == NodeType::Say {
                    debug!(node_id = %next_id, "Auto-advancing through say node");
                    self.run_node(next, &mut working, &ctx).await?;
                }
            }
        }

        if cancel.is_cancelled() {
            return Err(WorkflowError::Cancelled);
        }

        let saved = self.storage.save_workflow_state(&working).await?;

        if saved.is_complete {
            record_completion();
            info!(completed = ?saved.completed_node_ids, "Execution complete");
        }

        Ok(saved)
    }

    /// The message to speak for the execution's current position
    pub async fn get_current_node_message(
        &self,
        key: &ExecutionKey,
        cancel: &CancellationToken,
    ) -> Result<String, WorkflowError> {
        self.get_current_node_message_with_turns(key, &[], cancel).await
    }

    /// Like [`get_current_node_message`](Self::get_current_node_message), with
    /// the latest turns as context for generated Say messages
    pub async fn get_current_node_message_with_turns(
        &self,
        key: &ExecutionKey,
        turns: &[ConversationTurn],
        cancel: &CancellationToken,
    ) -> Result<String, WorkflowError> {
        let span = info_span!(
            parent: &self.span,
            "get_current_node_message",
            workflow_id = %key.workflow_id,
            user_id = %key.user_id,
            call_id = %key.call_id,
        );

        async move {
            let workflow = self.get_workflow(&key.workflow_id).await?;
            let state = self.storage.get_workflow_state(key).await?;

            if state.is_complete {
                return Ok(WORKFLOW_COMPLETE_MESSAGE.to_string());
            }

            let current_id = state.current_node_id().unwrap_or_default();
            let node = workflow
                .node(current_id)
                .ok_or_else(|| WorkflowError::node_not_found(current_id))?;

            let ctx = ExecutionContext::new(&self.capabilities, turns, cancel);
            node.render_message(&state, &ctx).await
        }
        .instrument(span)
        .await
    }

    async fn run_node(
        &self,
        node: &Node,
        state: &mut WorkflowState,
        ctx: &ExecutionContext<'_>,
    ) -> Result<NodeOutcome, WorkflowError> {
        let node_type = node.node_type().as_str();
        let span = info_span!("execute_node", node_id = %node.id(), node_type);

        let result = node.execute(state, ctx).instrument(span.clone()).await;

        span.in_scope(|| match &result {
            Ok(NodeOutcome::Advanced) => {
                record_transition(node_type);
                debug!(next_node_id = ?state.current_node_id, "Node completed");
            }
            Ok(NodeOutcome::Waiting { attempt, missing }) => {
                info!(attempt, ?missing, "Required fields still missing");
            }
            Ok(NodeOutcome::FellBack { fallback, reason }) => {
                record_transition(node_type);
                warn!(fallback = %fallback, reason = %reason, "Routed to fallback node");
            }
            Ok(NodeOutcome::Skipped) => {}
            Err(e) => {
                record_node_failure(node_type, failure_kind(e));
                warn!(error = %e, "Node execution failed");
            }
        });

        result
    }

    async fn lock(&self, key: &ExecutionKey) -> ExecutionLock<'_> {
        let slot = {
            let mut locks = self.locks.lock().unwrap_or_else(|e| e.into_inner());
            locks.entry(key.clone()).or_default().clone()
        };

        let mut lock = ExecutionLock {
            locks: &self.locks,
            key: key.clone(),
            slot: Some(slot.clone()),
            guard: None,
        };
        lock.guard = Some(slot.lock_owned().await);
        lock
    }

    #[cfg(test)]
    fn active_locks(&self) -> usize {
        self.locks.lock().unwrap().len()
    }
}

fn failure_kind(error: &WorkflowError) -> &'static str {
    match error {
        WorkflowError::Extraction { .. } => "extraction",
        WorkflowError::Generation { .. } => "generation",
        WorkflowError::InvalidNodeConfig { .. } => "invalid_config",
        WorkflowError::Cancelled => "cancelled",
        _ => "other",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::workflow::{
        FieldType, GatherNode, GatherSchema, MockWorkflowStorage, PendingExtractor, SayNode,
        SchemaField, ScriptedExtractor, ScriptedGenerator,
    };
    use crate::infrastructure::workflow::InMemoryWorkflowStorage;
    use serde_json::json;

    fn contact_schema() -> GatherSchema {
        GatherSchema::new("Contact")
            .with_field(SchemaField::required("name", FieldType::String).with_description("Full name"))
            .with_field(SchemaField::required("email", FieldType::String))
            .with_field(SchemaField::optional("age", FieldType::Integer))
    }

    /// greet(Say) -> contact(Gather) -> bye(Say)
    fn intake_workflow() -> Workflow {
        Workflow::new("intake", "Intake", "greet")
            .with_node(Node::new("greet", SayNode::exact("Welcome!")).with_next("contact"))
            .with_node(
                Node::new("contact", GatherNode::new(contact_schema(), "Collect contact details"))
                    .with_next("bye"),
            )
            .with_node(Node::new("bye", SayNode::exact("Goodbye!")))
    }

    /// contact(Gather) -> bye(Say)
    fn gather_then_say() -> Workflow {
        Workflow::new("chain", "Chain", "contact")
            .with_node(
                Node::new("contact", GatherNode::new(contact_schema(), "")).with_next("bye"),
            )
            .with_node(Node::new("bye", SayNode::generated("Thank the caller")))
    }

    fn key(workflow_id: &str) -> ExecutionKey {
        ExecutionKey::new(workflow_id, "user-1", "call-1")
    }

    fn full_contact() -> serde_json::Value {
        json!({"name": "Ada", "email": "ada@example.com"})
    }

    fn engine_with(extractor: Arc<ScriptedExtractor>) -> WorkflowEngine {
        WorkflowEngine::new(
            Arc::new(InMemoryWorkflowStorage::new()),
            Capabilities::new(extractor, Arc::new(ScriptedGenerator::new())),
        )
    }

    fn user(text: &str) -> Vec<ConversationTurn> {
        vec![ConversationTurn::user(text)]
    }

    #[tokio::test]
    async fn test_create_then_start_positions_at_start_node() {
        let engine = engine_with(Arc::new(ScriptedExtractor::new()));

        let created = engine.create_workflow(intake_workflow()).await.unwrap();
        assert!(created.created_at().is_some());
        assert!(created.updated_at().is_some());

        let state = engine.start_workflow(&key("intake")).await.unwrap();
        assert_eq!(state.current_node_id(), Some("greet"));
        assert!(state.completed_node_ids.is_empty());
        assert_eq!(state.version, 1);
    }

    #[tokio::test]
    async fn test_create_rejects_invalid_workflow() {
        let engine = engine_with(Arc::new(ScriptedExtractor::new()));

        let err = engine
            .create_workflow(Workflow::new("", "No id", "greet"))
            .await
            .unwrap_err();
        assert!(matches!(err, WorkflowError::Validation(_)));

        let err = engine
            .create_workflow(Workflow::new("empty", "Empty", "greet"))
            .await
            .unwrap_err();
        assert!(matches!(err, WorkflowError::Validation(_)));
    }

    #[tokio::test]
    async fn test_create_surfaces_storage_errors() {
        let storage = Arc::new(MockWorkflowStorage::new());
        storage.fail_writes("disk full");
        let engine = WorkflowEngine::new(
            storage,
            Capabilities::new(
                Arc::new(ScriptedExtractor::new()),
                Arc::new(ScriptedGenerator::new()),
            ),
        );

        let err = engine.create_workflow(intake_workflow()).await.unwrap_err();
        assert!(matches!(err, WorkflowError::Storage(_)));
        assert!(err.is_retryable());
    }

    #[tokio::test]
    async fn test_start_is_idempotent() {
        let engine = engine_with(Arc::new(ScriptedExtractor::new()));
        engine.create_workflow(intake_workflow()).await.unwrap();

        let first = engine.start_workflow(&key("intake")).await.unwrap();
        let second = engine.start_workflow(&key("intake")).await.unwrap();

        assert_eq!(first, second);
    }

    #[tokio::test]
    async fn test_start_unknown_workflow() {
        let engine = engine_with(Arc::new(ScriptedExtractor::new()));

        let err = engine.start_workflow(&key("missing")).await.unwrap_err();
        assert_eq!(err, WorkflowError::not_found("missing"));
    }

    #[tokio::test]
    async fn test_full_conversation() {
        let extractor = Arc::new(ScriptedExtractor::new().returning(full_contact()));
        let engine = engine_with(extractor);
        let cancel = CancellationToken::new();
        let key = key("intake");

        engine.create_workflow(intake_workflow()).await.unwrap();
        engine.start_workflow(&key).await.unwrap();
        assert_eq!(
            engine.get_current_node_message(&key, &cancel).await.unwrap(),
            "Welcome!"
        );

        let state = engine
            .process_conversation_update(&key, &user("Hi"), &cancel)
            .await
            .unwrap();
        assert_eq!(state.current_node_id(), Some("contact"));
        assert_eq!(state.completed_node_ids, vec!["greet"]);
        assert!(state.last_message_at.is_some());

        let message = engine.get_current_node_message(&key, &cancel).await.unwrap();
        assert!(message.starts_with("I need to gather some information from you:"));
        assert!(message.contains("- name: Full name"));

        let state = engine
            .process_conversation_update(&key, &user("Ada, ada@example.com"), &cancel)
            .await
            .unwrap();
        assert!(state.is_complete);
        assert_eq!(state.completed_node_ids, vec!["greet", "contact", "bye"]);
        assert_eq!(state.last_say_message(), Some("Goodbye!"));
        assert_eq!(
            engine.get_current_node_message(&key, &cancel).await.unwrap(),
            WORKFLOW_COMPLETE_MESSAGE
        );
    }

    #[tokio::test]
    async fn test_gather_then_terminal_say_completes_in_one_update() {
        let extractor = Arc::new(ScriptedExtractor::new().returning(full_contact()));
        let engine = engine_with(extractor);
        let cancel = CancellationToken::new();
        let key = key("chain");

        engine.create_workflow(gather_then_say()).await.unwrap();
        engine.start_workflow(&key).await.unwrap();

        let state = engine
            .process_conversation_update(&key, &user("Ada, ada@example.com"), &cancel)
            .await
            .unwrap();

        assert!(state.is_complete);
        assert_eq!(state.completed_node_ids, vec!["contact", "bye"]);
        assert_eq!(state.variables["name"], json!("Ada"));
        assert_eq!(state.variables["email"], json!("ada@example.com"));
        assert!(!state.variables.contains_key("age"));
    }

    #[tokio::test]
    async fn test_complete_execution_is_unchanged_by_updates() {
        let extractor = Arc::new(ScriptedExtractor::new().returning(full_contact()));
        let engine = engine_with(extractor.clone());
        let cancel = CancellationToken::new();
        let key = key("chain");

        engine.create_workflow(gather_then_say()).await.unwrap();
        engine.start_workflow(&key).await.unwrap();
        let done = engine
            .process_conversation_update(&key, &user("Ada"), &cancel)
            .await
            .unwrap();

        let again = engine
            .process_conversation_update(&key, &user("Hello?"), &cancel)
            .await
            .unwrap();

        assert_eq!(
            serde_json::to_vec(&again).unwrap(),
            serde_json::to_vec(&done).unwrap()
        );
        assert_eq!(extractor.calls(), 1);
    }

    #[tokio::test]
    async fn test_unknown_current_node_leaves_storage_untouched() {
        let mut state = WorkflowState::new(&key("intake"));
        state.current_node_id = Some("ghost".to_string());
        state.version = 3;

        let storage = Arc::new(
            MockWorkflowStorage::new()
                .with_workflow(intake_workflow())
                .with_state(state.clone()),
        );
        let engine = WorkflowEngine::new(
            storage.clone(),
            Capabilities::new(
                Arc::new(ScriptedExtractor::new()),
                Arc::new(ScriptedGenerator::new()),
            ),
        );

        let err = engine
            .process_conversation_update(&key("intake"), &user("Hi"), &CancellationToken::new())
            .await
            .unwrap_err();

        assert_eq!(err, WorkflowError::node_not_found("ghost"));
        assert_eq!(storage.stored_state(&key("intake")), Some(state));
        assert_eq!(storage.state_saves(), 0);
    }

    #[tokio::test]
    async fn test_update_before_start_is_node_not_found() {
        let engine = engine_with(Arc::new(ScriptedExtractor::new()));
        engine.create_workflow(intake_workflow()).await.unwrap();

        let err = engine
            .process_conversation_update(&key("intake"), &user("Hi"), &CancellationToken::new())
            .await
            .unwrap_err();

        assert_eq!(err, WorkflowError::node_not_found(""));
    }

    #[tokio::test]
    async fn test_generation_failure_during_auto_advance_persists_nothing() {
        let storage = Arc::new(MockWorkflowStorage::new());
        let engine = WorkflowEngine::new(
            storage.clone(),
            Capabilities::new(
                Arc::new(ScriptedExtractor::new().returning(full_contact())),
                Arc::new(ScriptedGenerator::failing("model unavailable")),
            ),
        );
        let key = key("chain");

        engine.create_workflow(gather_then_say()).await.unwrap();
        let started = engine.start_workflow(&key).await.unwrap();

        let err = engine
            .process_conversation_update(&key, &user("Ada"), &CancellationToken::new())
            .await
            .unwrap_err();

        assert!(matches!(err, WorkflowError::Generation { ref node, .. } if node == "bye"));
        assert_eq!(storage.stored_state(&key), Some(started));
        assert_eq!(storage.state_saves(), 1);
    }

    #[tokio::test]
    async fn test_extraction_failure_without_fallback_persists_nothing() {
        let storage = Arc::new(MockWorkflowStorage::new());
        let extractor = Arc::new(ScriptedExtractor::new().failing("provider down"));
        let engine = WorkflowEngine::new(
            storage.clone(),
            Capabilities::new(extractor.clone(), Arc::new(ScriptedGenerator::new())),
        );
        let key = key("chain");

        engine.create_workflow(gather_then_say()).await.unwrap();
        let started = engine.start_workflow(&key).await.unwrap();

        let err = engine
            .process_conversation_update(&key, &user("Ada"), &CancellationToken::new())
            .await
            .unwrap_err();

        assert!(matches!(err, WorkflowError::Extraction { .. }));
        assert_eq!(extractor.calls(), 3);
        assert_eq!(storage.stored_state(&key), Some(started));
    }

    #[tokio::test]
    async fn test_extraction_failure_routes_to_fallback() {
        let workflow = Workflow::new("fallback", "Fallback", "contact")
            .with_node(
                Node::new(
                    "contact",
                    GatherNode::new(contact_schema(), "")
                        .with_max_attempts(2)
                        .with_fallback("agent"),
                )
                .with_next("bye"),
            )
            .with_node(Node::new("agent", SayNode::exact("Let me transfer you.")))
            .with_node(Node::new("bye", SayNode::exact("Bye")));

        let extractor = Arc::new(ScriptedExtractor::new().failing("provider down"));
        let engine = engine_with(extractor.clone());
        let key = key("fallback");

        engine.create_workflow(workflow).await.unwrap();
        engine.start_workflow(&key).await.unwrap();

        let state = engine
            .process_conversation_update(&key, &user("Hi"), &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(extractor.calls(), 2);
        assert!(state.is_complete);
        assert_eq!(state.completed_node_ids, vec!["contact", "agent"]);
        assert_eq!(state.last_say_message(), Some("Let me transfer you."));
    }

    #[tokio::test]
    async fn test_partial_extraction_waits_with_follow_up() {
        let workflow = Workflow::new("partial", "Partial", "contact")
            .with_node(
                Node::new(
                    "contact",
                    GatherNode::new(contact_schema(), "").with_follow_up("And your email?"),
                )
                .with_next("bye"),
            )
            .with_node(Node::new("bye", SayNode::exact("Bye")));

        let extractor = Arc::new(
            ScriptedExtractor::new()
                .returning(json!({"name": "Ada"}))
                .returning(json!({"email": "ada@example.com"})),
        );
        let engine = engine_with(extractor);
        let cancel = CancellationToken::new();
        let key = key("partial");

        engine.create_workflow(workflow).await.unwrap();
        engine.start_workflow(&key).await.unwrap();

        let state = engine
            .process_conversation_update(&key, &user("I'm Ada"), &cancel)
            .await
            .unwrap();
        assert_eq!(state.current_node_id(), Some("contact"));
        assert_eq!(state.attempts_for("contact"), 1);
        assert_eq!(
            engine.get_current_node_message(&key, &cancel).await.unwrap(),
            "And your email?"
        );

        let state = engine
            .process_conversation_update(&key, &user("ada@example.com"), &cancel)
            .await
            .unwrap();
        assert!(state.is_complete);
        assert_eq!(state.variables["name"], json!("Ada"));
        assert_eq!(state.variables["email"], json!("ada@example.com"));
    }

    #[tokio::test]
    async fn test_cancellation_aborts_without_persisting() {
        let storage = Arc::new(MockWorkflowStorage::new());
        let engine = WorkflowEngine::new(
            storage.clone(),
            Capabilities::new(Arc::new(PendingExtractor), Arc::new(ScriptedGenerator::new())),
        );
        let key = key("chain");

        engine.create_workflow(gather_then_say()).await.unwrap();
        let started = engine.start_workflow(&key).await.unwrap();

        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            trigger.cancel();
        });

        let err = engine
            .process_conversation_update(&key, &user("Ada"), &cancel)
            .await
            .unwrap_err();

        assert_eq!(err, WorkflowError::Cancelled);
        assert_eq!(storage.stored_state(&key), Some(started));
        assert_eq!(engine.active_locks(), 0);
    }

    async fn spawn_waiter(
        engine: &Arc<WorkflowEngine>,
        key: &ExecutionKey,
        cancel: &CancellationToken,
    ) -> tokio::task::JoinHandle<Result<WorkflowState, WorkflowError>> {
        let engine = engine.clone();
        let key = key.clone();
        let cancel = cancel.clone();
        let handle = tokio::spawn(async move {
            engine
                .process_conversation_update(&key, &user("Hi"), &cancel)
                .await
        });

        for _ in 0..10 {
            tokio::task::yield_now().await;
        }
        handle
    }

    #[tokio::test]
    async fn test_cancelled_waiter_releases_lock_entry() {
        let engine = Arc::new(engine_with(Arc::new(ScriptedExtractor::new())));
        let key = key("intake");
        engine.create_workflow(intake_workflow()).await.unwrap();
        engine.start_workflow(&key).await.unwrap();

        let held = engine.lock(&key).await;
        let cancel = CancellationToken::new();
        let waiter = spawn_waiter(&engine, &key, &cancel).await;
        assert_eq!(engine.active_locks(), 1);

        drop(held);
        cancel.cancel();

        assert_eq!(waiter.await.unwrap(), Err(WorkflowError::Cancelled));
        assert_eq!(engine.active_locks(), 0);
        assert_eq!(
            engine.get_workflow_state(&key).await.unwrap().current_node_id(),
            Some("greet")
        );
    }

    #[tokio::test]
    async fn test_aborted_waiter_releases_lock_entry() {
        let engine = Arc::new(engine_with(Arc::new(ScriptedExtractor::new())));
        let key = key("intake");
        engine.create_workflow(intake_workflow()).await.unwrap();
        engine.start_workflow(&key).await.unwrap();

        let held = engine.lock(&key).await;
        let waiter = spawn_waiter(&engine, &key, &CancellationToken::new()).await;

        waiter.abort();
        assert!(waiter.await.unwrap_err().is_cancelled());
        assert_eq!(engine.active_locks(), 1);

        drop(held);
        assert_eq!(engine.active_locks(), 0);
    }

    #[tokio::test]
    async fn test_storage_write_failure_is_retryable() {
        let storage = Arc::new(MockWorkflowStorage::new());
        let engine = WorkflowEngine::new(
            storage.clone(),
            Capabilities::new(
                Arc::new(ScriptedExtractor::new().returning(full_contact())),
                Arc::new(ScriptedGenerator::new()),
            ),
        );
        let key = key("chain");

        engine.create_workflow(gather_then_say()).await.unwrap();
        engine.start_workflow(&key).await.unwrap();
        storage.fail_writes("connection reset");

        let err = engine
            .process_conversation_update(&key, &user("Ada"), &CancellationToken::new())
            .await
            .unwrap_err();

        assert!(err.is_retryable());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_updates_are_serialized() {
        const N: usize = 8;

        let schema = GatherSchema::new("Step")
            .with_field(SchemaField::required("answer", FieldType::String));
        let mut workflow = Workflow::new("steps", "Steps", "step-0");
        for i in 0..N {
            let mut node = Node::new(format!("step-{}", i), GatherNode::new(schema.clone(), ""));
            if i + 1 < N {
                node = node.with_next(format!("step-{}", i + 1));
            }
            workflow = workflow.with_node(node);
        }

        let extractor = Arc::new(ScriptedExtractor::new().returning(json!({"answer": "yes"})));
        let engine = Arc::new(engine_with(extractor));
        let key = key("steps");

        engine.create_workflow(workflow).await.unwrap();
        engine.start_workflow(&key).await.unwrap();

        let handles: Vec<_> = (0..N)
            .map(|_| {
                let engine = engine.clone();
                let key = key.clone();
                tokio::spawn(async move {
                    engine
                        .process_conversation_update(&key, &user("yes"), &CancellationToken::new())
                        .await
                })
            })
            .collect();

        for handle in handles {
            handle.await.unwrap().unwrap();
        }

        let state = engine.get_workflow_state(&key).await.unwrap();
        let expected: Vec<String> = (0..N).map(|i| format!("step-{}", i)).collect();

        assert!(state.is_complete);
        assert_eq!(state.completed_node_ids, expected);
        assert_eq!(state.version, N as u64 + 1);
        assert_eq!(engine.active_locks(), 0);
    }

    #[tokio::test]
    async fn test_definitions_are_served_from_cache() {
        let storage = Arc::new(MockWorkflowStorage::new());
        let engine = WorkflowEngine::new(
            storage.clone(),
            Capabilities::new(
                Arc::new(ScriptedExtractor::new()),
                Arc::new(ScriptedGenerator::new()),
            ),
        );

        engine.create_workflow(intake_workflow()).await.unwrap();
        storage.fail_reads("offline");

        let workflow = engine.get_workflow("intake").await.unwrap();
        assert_eq!(workflow.start_node_id(), "greet");
    }
}
