//! Sub-Call Router: the loopback HTTP surface the interpreter process
//! calls back into for `llm_query`/`rlm_query`.
//!
//! Two single-call endpoints and two batched siblings. Batched calls fan out
//! concurrently under a bounded semaphore (10 for `llm_query_batched`, 5 for
//! `rlm_query_batched`), preserve input order, and let individual prompts
//! fail without aborting the rest of the batch.

use std::sync::Arc;

use async_trait::async_trait;
use axum::extract::State;
use axum::routing::post;
use axum::{Json, Router};
use serde::Deserialize;
use serde_json::{json, Value};
use tokio::sync::{Mutex, Semaphore};
use tower_http::trace::TraceLayer;

use crate::error::Result;
use crate::interactive::trajectory::{CallTree, SharedBudget, SubCall, SubCallType};
use crate::llm::{ChatMessage, CompletionRequest, LLMClient};

const LLM_QUERY_BATCH_CONCURRENCY: usize = 10;
const RLM_QUERY_BATCH_CONCURRENCY: usize = 5;

/// Recurses into a child controller. Implemented by `controller::Controller`
/// so this module doesn't need to depend back on it for the type.
#[async_trait]
pub trait ChildSpawner: Send + Sync {
    async fn spawn_child(&self, prompt: &str, model: Option<String>) -> Result<String>;
}

pub struct AppState {
    pub llm_client: Arc<dyn LLMClient>,
    pub budget: SharedBudget,
    pub depth: u32,
    pub max_depth: u32,
    pub default_model: Option<String>,
    pub call_tree: Arc<Mutex<CallTree>>,
    pub child_spawner: Arc<dyn ChildSpawner>,
}

impl Clone for AppState {
    fn clone(&self) -> Self {
        Self {
            llm_client: Arc::clone(&self.llm_client),
            budget: self.budget.clone(),
            depth: self.depth,
            max_depth: self.max_depth,
            default_model: self.default_model.clone(),
            call_tree: Arc::clone(&self.call_tree),
            child_spawner: Arc::clone(&self.child_spawner),
        }
    }
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/llm_query", post(llm_query))
        .route("/rlm_query", post(rlm_query))
        .route("/llm_query_batched", post(llm_query_batched))
        .route("/rlm_query_batched", post(rlm_query_batched))
        .layer(TraceLayer::new_for_http())
        .with_state(Arc::new(state))
}

#[derive(Debug, Deserialize)]
struct QueryRequest {
    prompt: String,
    model: Option<String>,
}

#[derive(Debug, Deserialize)]
struct BatchedQueryRequest {
    prompts: Vec<String>,
    model: Option<String>,
}

async fn llm_query(
    State(state): State<Arc<AppState>>,
    Json(req): Json<QueryRequest>,
) -> Json<Value> {
    Json(run_llm_query(&state, &req.prompt, req.model).await)
}

async fn rlm_query(
    State(state): State<Arc<AppState>>,
    Json(req): Json<QueryRequest>,
) -> Json<Value> {
    Json(run_rlm_query(&state, &req.prompt, req.model).await)
}

async fn llm_query_batched(
    State(state): State<Arc<AppState>>,
    Json(req): Json<BatchedQueryRequest>,
) -> Json<Value> {
    let results = run_batched(&state, req.prompts, req.model, LLM_QUERY_BATCH_CONCURRENCY, run_llm_query).await;
    Json(json!({ "results": results }))
}

async fn rlm_query_batched(
    State(state): State<Arc<AppState>>,
    Json(req): Json<BatchedQueryRequest>,
) -> Json<Value> {
    let results = run_batched(&state, req.prompts, req.model, RLM_QUERY_BATCH_CONCURRENCY, run_rlm_query).await;
    Json(json!({ "results": results }))
}

async fn run_batched<F, Fut>(
    state: &Arc<AppState>,
    prompts: Vec<String>,
    model: Option<String>,
    concurrency: usize,
    call: F,
) -> Vec<Value>
where
    F: Fn(Arc<AppState>, String, Option<String>) -> Fut + Copy + Send + 'static,
    Fut: std::future::Future<Output = Value> + Send,
{
    let semaphore = Arc::new(Semaphore::new(concurrency));
    let mut tasks = Vec::with_capacity(prompts.len());

    for prompt in prompts {
        let state = Arc::clone(state);
        let model = model.clone();
        let semaphore = Arc::clone(&semaphore);
        tasks.push(tokio::spawn(async move {
            let _permit = semaphore.acquire_owned().await.expect("semaphore closed");
            call(state, prompt, model).await
        }));
    }

    let mut out = Vec::with_capacity(tasks.len());
    for task in tasks {
        out.push(task.await.unwrap_or_else(|e| json!({ "error": e.to_string() })));
    }
    out
}

fn run_llm_query(
    state: Arc<AppState>,
    prompt: String,
    model: Option<String>,
) -> impl std::future::Future<Output = Value> + Send {
    async move { run_llm_query_inner(&state, &prompt, model).await }
}

fn run_rlm_query(
    state: Arc<AppState>,
    prompt: String,
    model: Option<String>,
) -> impl std::future::Future<Output = Value> + Send {
    async move { run_rlm_query_inner(&state, &prompt, model).await }
}

async fn run_llm_query_inner(state: &AppState, prompt: &str, model: Option<String>) -> Value {
    if !state.budget.try_claim() {
        return json!({ "error": format!(
            "[LLM Error] call budget exhausted: used {}, limit {}",
            state.budget.used(), state.budget.limit()
        ) });
    }

    let resolved_model = model.or_else(|| state.default_model.clone());
    let mut sub_call = SubCall::start(uuid::Uuid::new_v4().to_string(), SubCallType::LlmQuery, prompt, resolved_model.clone());
    bump_started(state, SubCallType::LlmQuery).await;

    let mut request = CompletionRequest::new().with_message(ChatMessage::user(prompt));
    if let Some(model) = &resolved_model {
        request = request.with_model(model.clone());
    }

    let outcome = state.llm_client.complete(request).await;
    let value = match outcome {
        Ok(response) => {
            sub_call.complete(response.content.clone());
            json!({ "result": response.content })
        }
        Err(e) => {
            let message = format!("[LLM Error] {e}");
            sub_call.fail(message.clone());
            json!({ "error": message })
        }
    };
    bump_completed(state, sub_call).await;
    value
}

async fn run_rlm_query_inner(state: &AppState, prompt: &str, model: Option<String>) -> Value {
    if state.depth >= state.max_depth {
        // Degrades to a direct completion once the recursion budget is
        // spent.
        return run_llm_query_inner(state, prompt, model).await;
    }

    if !state.budget.try_claim() {
        return json!({ "error": format!(
            "[RLM Error] call budget exhausted: used {}, limit {}",
            state.budget.used(), state.budget.limit()
        ) });
    }

    let mut sub_call = SubCall::start(uuid::Uuid::new_v4().to_string(), SubCallType::RlmQuery, prompt, model.clone());
    bump_started(state, SubCallType::RlmQuery).await;

    let value = match state.child_spawner.spawn_child(prompt, model).await {
        Ok(answer) => {
            sub_call.complete(answer.clone());
            json!({ "result": answer })
        }
        Err(e) => {
            let message = format!("[RLM Error] {e}");
            sub_call.fail(message.clone());
            json!({ "error": message })
        }
    };
    bump_completed(state, sub_call).await;
    value
}

async fn bump_started(state: &AppState, call_type: SubCallType) {
    let mut tree = state.call_tree.lock().await;
    tree.active_calls += 1;
    match call_type {
        SubCallType::LlmQuery => tree.total_llm_calls += 1,
        SubCallType::RlmQuery => tree.total_rlm_calls += 1,
    }
}

async fn bump_completed(state: &AppState, _sub_call: SubCall) {
    let mut tree = state.call_tree.lock().await;
    tree.active_calls = tree.active_calls.saturating_sub(1);
    tree.completed_calls += 1;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::{CompletionResponse, ModelSpec, Provider, TokenUsage};
    use async_trait::async_trait as async_trait_attr;

    struct StaticClient;

    #[async_trait_attr]
    impl LLMClient for StaticClient {
        async fn complete(&self, request: CompletionRequest) -> Result<CompletionResponse> {
            Ok(CompletionResponse {
                id: "mock".to_string(),
                model: request.model.unwrap_or_else(|| "mock-model".to_string()),
                content: "42".to_string(),
                stop_reason: None,
                usage: TokenUsage::default(),
                timestamp: chrono::Utc::now(),
                cost: Some(0.0),
            })
        }

        fn provider(&self) -> Provider {
            Provider::Anthropic
        }

        fn available_models(&self) -> Vec<ModelSpec> {
            vec![]
        }
    }

    struct NoRecursion;

    #[async_trait_attr]
    impl ChildSpawner for NoRecursion {
        async fn spawn_child(&self, _prompt: &str, _model: Option<String>) -> Result<String> {
            Ok("child answer".to_string())
        }
    }

    fn test_state(depth: u32, max_depth: u32, budget: u64) -> AppState {
        AppState {
            llm_client: Arc::new(StaticClient),
            budget: SharedBudget::new(budget),
            depth,
            max_depth,
            default_model: None,
            call_tree: Arc::new(Mutex::new(CallTree::new("q", max_depth))),
            child_spawner: Arc::new(NoRecursion),
        }
    }

    #[tokio::test]
    async fn llm_query_returns_result_and_charges_budget() {
        let state = test_state(0, 1, 5);
        let value = run_llm_query_inner(&state, "hi", None).await;
        assert_eq!(value["result"], "42");
        assert_eq!(state.budget.used(), 1);
    }

    #[tokio::test]
    async fn llm_query_reports_error_string_once_budget_exhausted() {
        let state = test_state(0, 1, 0);
        let value = run_llm_query_inner(&state, "hi", None).await;
        assert!(value["error"].as_str().unwrap().starts_with("[LLM Error]"));
    }

    #[tokio::test]
    async fn rlm_query_degrades_to_llm_query_at_max_depth() {
        let state = test_state(1, 1, 5);
        let value = run_rlm_query_inner(&state, "hi", None).await;
        assert_eq!(value["result"], "42");
    }

    #[tokio::test]
    async fn rlm_query_recurses_below_max_depth() {
        let state = test_state(0, 1, 5);
        let value = run_rlm_query_inner(&state, "hi", None).await;
        assert_eq!(value["result"], "child answer");
    }
}
