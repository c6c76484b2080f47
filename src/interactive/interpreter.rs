//! Interpreter Host: a long-lived interpreter subprocess that keeps
//! namespace state across `execute()` calls.
//!
//! Wire protocol, framed over the child's stdin/stdout:
//!   - on startup the child writes a bare `__REPL_READY__` line;
//!   - each request is `{"code": "..."}` followed by a `__REPL_EXEC__` line;
//!   - the response is ordinary stdout interleaved with one
//!     `__REPL_RESULT_START__` / JSON / `__REPL_RESULT_END__` block carrying
//!     `{stdout, stderr, final_answer?, final_var?, submitted?, error?,
//!     show_vars?}`.
//!
//! Mirrors the repo-scale interpreter's subprocess lifecycle handling
//! (spawn/wait_for_ready/shutdown-then-kill), adapted to the async runtime
//! this controller runs on.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStderr, ChildStdin, ChildStdout, Command};
use tokio::time::{timeout, Duration};

use crate::error::{Error, Result};
use crate::interactive::config::InterpreterConfig;

const READY_SENTINEL: &str = "__REPL_READY__";
const EXEC_SENTINEL: &str = "__REPL_EXEC__";
const RESULT_START_SENTINEL: &str = "__REPL_RESULT_START__";
const RESULT_END_SENTINEL: &str = "__REPL_RESULT_END__";
const STDERR_EXCERPT_CHARS: usize = 500;

/// One `execute()` round-trip's result.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ExecuteOutcome {
    #[serde(default)]
    pub stdout: String,
    #[serde(default)]
    pub stderr: String,
    pub final_answer: Option<String>,
    pub final_var: Option<String>,
    #[serde(default)]
    pub submitted: bool,
    pub error: Option<String>,
    pub show_vars: Option<Value>,
}

impl ExecuteOutcome {
    /// `FINAL`/`FINAL_VAR`/`SUBMIT` all resolve to this.
    pub fn final_value(&self) -> Option<&str> {
        self.final_answer
            .as_deref()
            .or(self.final_var.as_deref())
    }
}

pub struct InterpreterHost {
    child: Child,
    stdin: ChildStdin,
    stdout: BufReader<ChildStdout>,
    config: InterpreterConfig,
}

impl InterpreterHost {
    pub async fn spawn(config: InterpreterConfig) -> Result<Self> {
        let startup_context = format!("command='{} {}'", config.command, config.args.join(" "));

        let mut cmd = Command::new(&config.command);
        cmd.args(&config.args)
            .stdin(std::process::Stdio::piped())
            .stdout(std::process::Stdio::piped())
            .stderr(std::process::Stdio::piped());

        let mut child = cmd.spawn().map_err(|e| {
            Error::SubprocessComm(format!("failed to spawn interpreter ({startup_context}): {e}"))
        })?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| Error::SubprocessComm("failed to get interpreter stdin".to_string()))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| Error::SubprocessComm("failed to get interpreter stdout".to_string()))?;
        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| Error::SubprocessComm("failed to get interpreter stderr".to_string()))?;
        let mut stdout = BufReader::new(stdout);

        if let Err(err) = Self::wait_for_ready(
            &mut stdout,
            stderr,
            Duration::from_millis(config.startup_timeout_ms),
            &startup_context,
        )
        .await
        {
            let _ = child.start_kill();
            let _ = child.wait().await;
            return Err(err);
        }

        Ok(Self {
            child,
            stdin,
            stdout,
            config,
        })
    }

    async fn wait_for_ready(
        stdout: &mut BufReader<ChildStdout>,
        mut stderr: ChildStderr,
        timeout_duration: Duration,
        startup_context: &str,
    ) -> Result<()> {
        let read_ready = async {
            let mut line = String::new();
            loop {
                line.clear();
                let n = stdout.read_line(&mut line).await.map_err(|e| {
                    Error::SubprocessComm(format!(
                        "failed reading ready sentinel ({startup_context}): {e}"
                    ))
                })?;
                if n == 0 {
                    return Err(Error::SubprocessComm(format!(
                        "interpreter exited before sending {READY_SENTINEL} ({startup_context})"
                    )));
                }
                if line.trim() == READY_SENTINEL {
                    return Ok(());
                }
            }
        };

        match timeout(timeout_duration, read_ready).await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(e)) => {
                let detail = read_stderr_excerpt(&mut stderr).await;
                Err(append_stderr(e, detail))
            }
            Err(_) => {
                let detail = read_stderr_excerpt(&mut stderr).await;
                Err(append_stderr(
                    Error::timeout(timeout_duration.as_millis() as u64),
                    detail,
                ))
            }
        }
    }

    /// Run one chunk of code and return its captured outcome. Namespace
    /// state (variables, imports) persists across calls.
    pub async fn execute(&mut self, code: &str) -> Result<ExecuteOutcome> {
        let payload = serde_json::to_string(&serde_json::json!({ "code": code }))?;
        let request = format!("{payload}\n{EXEC_SENTINEL}\n");

        self.stdin
            .write_all(request.as_bytes())
            .await
            .map_err(|e| Error::SubprocessComm(format!("failed to write to interpreter: {e}")))?;
        self.stdin
            .flush()
            .await
            .map_err(|e| Error::SubprocessComm(format!("failed to flush interpreter stdin: {e}")))?;

        let read_result = self.read_result_block();
        match timeout(Duration::from_millis(self.config.execute_timeout_ms), read_result).await {
            Ok(result) => result,
            Err(_) => Err(Error::timeout(self.config.execute_timeout_ms)),
        }
    }

    async fn read_result_block(&mut self) -> Result<ExecuteOutcome> {
        let mut stdout_passthrough = String::new();
        let mut line = String::new();

        loop {
            line.clear();
            let n = self
                .stdout
                .read_line(&mut line)
                .await
                .map_err(|e| Error::SubprocessComm(format!("failed reading interpreter output: {e}")))?;
            if n == 0 {
                return Err(Error::SubprocessComm(
                    "interpreter closed its stdout mid-execute".to_string(),
                ));
            }
            if line.trim_end() == RESULT_START_SENTINEL {
                break;
            }
            stdout_passthrough.push_str(&line);
        }

        let mut json_buf = String::new();
        loop {
            line.clear();
            let n = self
                .stdout
                .read_line(&mut line)
                .await
                .map_err(|e| Error::SubprocessComm(format!("failed reading interpreter result: {e}")))?;
            if n == 0 {
                return Err(Error::SubprocessComm(
                    "interpreter closed its stdout before closing the result block".to_string(),
                ));
            }
            if line.trim_end() == RESULT_END_SENTINEL {
                break;
            }
            json_buf.push_str(&line);
        }

        let mut outcome: ExecuteOutcome = serde_json::from_str(json_buf.trim())?;
        if outcome.stdout.is_empty() {
            outcome.stdout = stdout_passthrough;
        } else {
            outcome.stdout = format!("{stdout_passthrough}{}", outcome.stdout);
        }
        Ok(outcome)
    }

    /// Graceful shutdown: ask the interpreter to exit, wait up to the
    /// configured grace period, then kill if it hasn't.
    pub async fn shutdown(mut self) -> Result<()> {
        let _ = self
            .stdin
            .write_all(format!("{{}}\n__REPL_SHUTDOWN__\n").as_bytes())
            .await;
        let _ = self.stdin.flush().await;

        match timeout(
            Duration::from_millis(self.config.shutdown_grace_ms),
            self.child.wait(),
        )
        .await
        {
            Ok(Ok(_)) => Ok(()),
            _ => {
                let _ = self.child.start_kill();
                let _ = self.child.wait().await;
                Ok(())
            }
        }
    }
}

impl Drop for InterpreterHost {
    fn drop(&mut self) {
        // `shutdown()` consumes `self` for a graceful round-trip; a bare
        // drop (panic unwind, caller forgot to await shutdown) can only
        // best-effort kill the child so it doesn't outlive the host.
        let _ = self.child.start_kill();
    }
}

async fn read_stderr_excerpt(stderr: &mut ChildStderr) -> String {
    use tokio::io::AsyncReadExt;
    let mut buf = String::new();
    let _ = stderr.read_to_string(&mut buf).await;
    let trimmed = buf.trim();
    let excerpt: String = trimmed.chars().take(STDERR_EXCERPT_CHARS).collect();
    if trimmed.chars().count() > STDERR_EXCERPT_CHARS {
        format!("{excerpt}...")
    } else {
        excerpt
    }
}

fn append_stderr(error: Error, detail: String) -> Error {
    if detail.is_empty() {
        error
    } else {
        Error::SubprocessComm(format!("{error}; stderr: {detail}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn execute_outcome_prefers_final_answer_over_final_var() {
        let outcome = ExecuteOutcome {
            final_answer: Some("a".to_string()),
            final_var: Some("b".to_string()),
            ..Default::default()
        };
        assert_eq!(outcome.final_value(), Some("a"));
    }

    #[test]
    fn execute_outcome_falls_back_to_final_var() {
        let outcome = ExecuteOutcome {
            final_var: Some("b".to_string()),
            ..Default::default()
        };
        assert_eq!(outcome.final_value(), Some("b"));
    }
}
