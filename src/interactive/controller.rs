//! Interactive RLM Controller: drives one `rlm(query, context, ...)`
//! call through the read-model/act/observe loop.
//!
//! Each iteration: build a prompt from the query, a preview of the context,
//! and the trajectory so far; call the root model; extract the next unit of
//! interpreter code from its reply; run it through the Interpreter
//! Host; check for a final answer. If the loop exhausts its iteration or
//! call budget without one, a single fallback completion extracts a best-
//! effort answer from the trajectory.

use std::net::SocketAddr;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::net::TcpListener;
use tokio::sync::Mutex;

use crate::error::{Error, Result};
use crate::interactive::config::{ControllerConfig, InterpreterConfig};
use crate::interactive::interpreter::InterpreterHost;
use crate::interactive::parse;
use crate::interactive::subcall::{self, AppState, ChildSpawner};
use crate::interactive::trajectory::{CallTree, SharedBudget, Trajectory, TrajectoryStep};
use crate::llm::{ChatMessage, CompletionRequest, LLMClient};

const CONTEXT_PREVIEW_CHARS: usize = 500;
const OUTPUT_TRUNCATE_CHARS: usize = 4_000;

/// Reads `context` as a literal string, or, if prefixed with `file:`, as the
/// UTF-8 contents of the absolute path that follows.
pub fn resolve_context(context: &str) -> Result<String> {
    match context.strip_prefix("file:") {
        Some(path) => std::fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("failed to read context file '{path}': {e}"))),
        None => Ok(context.to_string()),
    }
}

#[derive(Debug, Clone)]
pub struct RunOutcome {
    pub answer: String,
    pub trajectory: Trajectory,
    pub call_tree: CallTree,
}

pub struct Controller {
    llm_client: Arc<dyn LLMClient>,
    config: ControllerConfig,
    interpreter_config: InterpreterConfig,
}

impl Controller {
    pub fn new(llm_client: Arc<dyn LLMClient>, config: ControllerConfig, interpreter_config: InterpreterConfig) -> Self {
        Self {
            llm_client,
            config,
            interpreter_config,
        }
    }

    pub async fn run(&self, query: &str, context: &str) -> Result<RunOutcome> {
        let context = resolve_context(context)?;
        let budget = SharedBudget::new(self.config.max_llm_calls);
        self.run_at_depth(query, &context, 0, budget).await
    }

    async fn run_at_depth(
        &self,
        query: &str,
        context: &str,
        depth: u32,
        budget: SharedBudget,
    ) -> Result<RunOutcome> {
        let interpreter = InterpreterHost::spawn(self.interpreter_config.clone()).await?;
        let call_tree = Arc::new(Mutex::new(CallTree::new(query, self.config.max_depth)));

        let child_spawner: Arc<dyn ChildSpawner> = Arc::new(RecursiveSpawner {
            llm_client: Arc::clone(&self.llm_client),
            config: self.config.clone(),
            interpreter_config: self.interpreter_config.clone(),
            context: context.to_string(),
            depth: depth + 1,
            budget: budget.clone(),
        });

        let state = AppState {
            llm_client: Arc::clone(&self.llm_client),
            budget: budget.clone(),
            depth,
            max_depth: self.config.max_depth,
            default_model: self.config.sub_call_model.clone(),
            call_tree: Arc::clone(&call_tree),
            child_spawner,
        };

        let listener = TcpListener::bind(("127.0.0.1", self.interpreter_config.router_port))
            .await
            .map_err(|e| Error::SubprocessComm(format!("failed to bind sub-call router: {e}")))?;
        let router_addr = listener
            .local_addr()
            .map_err(|e| Error::SubprocessComm(format!("failed to read router address: {e}")))?;
        let app = subcall::router(state);
        let serve_handle = tokio::spawn(async move {
            let _ = axum::serve(listener, app).await;
        });

        let result = self
            .drive_loop(query, context, depth, &budget, interpreter, router_addr)
            .await;

        serve_handle.abort();

        let outcome = result?;
        let call_tree = call_tree.lock().await.clone();
        Ok(RunOutcome {
            answer: outcome.0,
            trajectory: outcome.1,
            call_tree,
        })
    }

    async fn drive_loop(
        &self,
        query: &str,
        context: &str,
        depth: u32,
        budget: &SharedBudget,
        mut interpreter: InterpreterHost,
        router_addr: SocketAddr,
    ) -> Result<(String, Trajectory)> {
        let mut trajectory = Trajectory::default();
        let mut consecutive_errors = 0u32;

        let bootstrap = format!(
            "context = {}\n__RLM_ROUTER_BASE_URL__ = {}",
            python_literal(context),
            python_literal(&format!("http://{router_addr}"))
        );
        let _ = interpreter.execute(&bootstrap).await?;

        for iteration in 0..self.config.max_iterations {
            if !budget.try_claim() {
                break;
            }

            let prompt = build_iteration_prompt(query, context, &trajectory, iteration, depth);
            let request = CompletionRequest::new()
                .with_system(SYSTEM_PROMPT.to_string())
                .with_message(ChatMessage::user(prompt));
            let request = match &self.config.root_model {
                Some(model) => request.with_model(model.clone()),
                None => request,
            };

            let response = self.llm_client.complete(request).await?;
            let reasoning = response.content;

            let code = match parse::extract_code(&reasoning) {
                Some(code) => code,
                None => {
                    trajectory.push(TrajectoryStep {
                        iteration,
                        depth,
                        reasoning: reasoning.clone(),
                        code: None,
                        output: "No code block found in response.".to_string(),
                        sub_calls: Vec::new(),
                    });
                    consecutive_errors += 1;
                    if consecutive_errors >= self.config.max_consecutive_errors {
                        break;
                    }
                    continue;
                }
            };

            let outcome = interpreter.execute(&code).await;
            let outcome = match outcome {
                Ok(outcome) => outcome,
                Err(e) => {
                    trajectory.push(TrajectoryStep {
                        iteration,
                        depth,
                        reasoning,
                        code: Some(code),
                        output: format!("[stderr] {e}"),
                        sub_calls: Vec::new(),
                    });
                    consecutive_errors += 1;
                    if consecutive_errors >= self.config.max_consecutive_errors {
                        break;
                    }
                    continue;
                }
            };

            if let Some(error) = &outcome.error {
                trajectory.push(TrajectoryStep {
                    iteration,
                    depth,
                    reasoning,
                    code: Some(code),
                    output: format!("[stderr] {error}\n{}", truncate(&outcome.stdout)),
                    sub_calls: Vec::new(),
                });
                consecutive_errors += 1;
                if consecutive_errors >= self.config.max_consecutive_errors {
                    break;
                }
                continue;
            }

            consecutive_errors = 0;

            if let Some(answer) = outcome.final_value() {
                let answer = answer.to_string();
                trajectory.push(TrajectoryStep {
                    iteration,
                    depth,
                    reasoning,
                    code: Some(code),
                    output: truncate(&outcome.stdout),
                    sub_calls: Vec::new(),
                });
                let _ = interpreter.shutdown().await;
                return Ok((answer, trajectory));
            }

            trajectory.push(TrajectoryStep {
                iteration,
                depth,
                reasoning,
                code: Some(code),
                output: truncate(&outcome.stdout),
                sub_calls: Vec::new(),
            });
        }

        let _ = interpreter.shutdown().await;
        let answer = self.fallback_answer(query, context, &trajectory).await?;
        Ok((answer, trajectory))
    }

    /// One-shot extraction when the loop exits without a final answer.
    async fn fallback_answer(&self, query: &str, context: &str, trajectory: &Trajectory) -> Result<String> {
        let mut prompt = String::new();
        prompt.push_str("# Fallback Answer Extraction\n\n");
        prompt.push_str("The interactive loop exhausted its iteration or call budget before ");
        prompt.push_str("reaching a final answer. Extract the best available answer to the ");
        prompt.push_str("query from the trajectory below.\n\n");
        prompt.push_str("## Query\n\n");
        prompt.push_str(query);
        prompt.push_str("\n\n## Context preview\n\n```\n");
        prompt.push_str(&preview(context, CONTEXT_PREVIEW_CHARS));
        prompt.push_str("\n```\n\n## Trajectory\n\n```\n");
        prompt.push_str(&trajectory.render_summary(usize::MAX));
        prompt.push_str("\n```\n");

        let request = CompletionRequest::new()
            .with_system(SYSTEM_PROMPT.to_string())
            .with_message(ChatMessage::user(prompt));
        let request = match &self.config.fallback_model {
            Some(model) => request.with_model(model.clone()),
            None => request,
        };
        let response = self.llm_client.complete(request).await?;
        Ok(response.content)
    }
}

const SYSTEM_PROMPT: &str = "You are the root reasoning loop of an interactive recursive \
language model. On each turn you may emit one fenced ```repl``` (or \
```python```/```py```) code block to run in a persistent Python namespace, \
or an <rlm_query>...</rlm_query>/<llm_query>...</llm_query> tag to delegate \
a sub-question. Call FINAL(value), FINAL_VAR(\"name\"), or SUBMIT(value) from \
within your code once you have the answer.";

fn build_iteration_prompt(query: &str, context: &str, trajectory: &Trajectory, iteration: u32, depth: u32) -> String {
    let mut prompt = String::new();
    prompt.push_str(&format!("## Iteration {iteration} (depth {depth})\n\n"));
    prompt.push_str("### Query\n\n");
    prompt.push_str(query);
    prompt.push_str(&format!(
        "\n\n### Context ({} chars)\n\n```\n",
        context.chars().count()
    ));
    prompt.push_str(&preview(context, CONTEXT_PREVIEW_CHARS));
    prompt.push_str("\n```\n\n");
    if !trajectory.steps.is_empty() {
        prompt.push_str("### Trajectory so far\n\n```\n");
        prompt.push_str(&trajectory.render_summary(usize::MAX));
        prompt.push_str("\n```\n\n");
    }
    if iteration == 0 {
        prompt.push_str(
            "This is the first iteration: explore the context (its shape, size, and \
             relevant structure) before attempting a final answer.\n\n",
        );
    }
    prompt.push_str("Emit the next code block, or call FINAL/FINAL_VAR/SUBMIT if you are done.\n");
    prompt
}

fn preview(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        text.to_string()
    } else {
        let truncated: String = text.chars().take(max_chars).collect();
        format!("{truncated}\n... [truncated, {} chars total]", text.chars().count())
    }
}

fn truncate(text: &str) -> String {
    preview(text, OUTPUT_TRUNCATE_CHARS)
}

fn python_literal(s: &str) -> String {
    let escaped = s.replace('\\', "\\\\").replace("\"\"\"", "\\\"\\\"\\\"");
    format!("\"\"\"{escaped}\"\"\"")
}

struct RecursiveSpawner {
    llm_client: Arc<dyn LLMClient>,
    config: ControllerConfig,
    interpreter_config: InterpreterConfig,
    context: String,
    depth: u32,
    budget: SharedBudget,
}

#[async_trait]
impl ChildSpawner for RecursiveSpawner {
    async fn spawn_child(&self, prompt: &str, model: Option<String>) -> Result<String> {
        let mut config = self.config.clone();
        if let Some(model) = model {
            config.root_model = Some(model);
        }
        let controller = Controller::new(Arc::clone(&self.llm_client), config, self.interpreter_config.clone());
        let outcome = controller
            .run_at_depth(prompt, &self.context, self.depth, self.budget.clone())
            .await?;
        Ok(outcome.answer)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolve_context_reads_plain_string_verbatim() {
        assert_eq!(resolve_context("hello").unwrap(), "hello");
    }

    #[test]
    fn resolve_context_reads_file_prefixed_path() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ctx.txt");
        std::fs::write(&path, "file contents").unwrap();
        let arg = format!("file:{}", path.to_string_lossy());
        assert_eq!(resolve_context(&arg).unwrap(), "file contents");
    }

    #[test]
    fn preview_truncates_and_reports_total_length() {
        let text = "x".repeat(10);
        let rendered = preview(&text, 4);
        assert!(rendered.starts_with("xxxx"));
        assert!(rendered.contains("10 chars total"));
    }

    #[test]
    fn preview_passes_short_text_through_unchanged() {
        assert_eq!(preview("short", 10), "short");
    }

    #[test]
    fn iteration_prompt_always_states_context_length() {
        let trajectory = Trajectory::default();
        let prompt = build_iteration_prompt("q", "short context", &trajectory, 0, 0);
        assert!(prompt.contains("13 chars"));
    }

    #[test]
    fn first_iteration_prompt_includes_exploration_note() {
        let trajectory = Trajectory::default();
        let first = build_iteration_prompt("q", "ctx", &trajectory, 0, 0);
        assert!(first.contains("explore the context"));

        let later = build_iteration_prompt("q", "ctx", &trajectory, 1, 0);
        assert!(!later.contains("explore the context"));
    }

    #[test]
    fn iteration_prompt_carries_full_trajectory_not_a_window() {
        let mut trajectory = Trajectory::default();
        for i in 0..10 {
            trajectory.push(TrajectoryStep {
                iteration: i,
                depth: 0,
                reasoning: format!("reasoning {i}"),
                code: None,
                output: format!("output {i}"),
                sub_calls: Vec::new(),
            });
        }
        let prompt = build_iteration_prompt("q", "ctx", &trajectory, 10, 0);
        assert!(prompt.contains("iteration 0"));
        assert!(prompt.contains("iteration 9"));
    }
}
