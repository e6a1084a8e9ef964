use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::Instant;

use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::Command;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use hive_types::HiveError;

#[derive(Debug, Clone, Default)]
pub struct InvokeRequest {
    pub cli: String,
    pub model: Option<String>,
    pub prompt: String,
    /// Working directory for the subprocess; isolated worktree workers set
    /// this to their copy.
    pub workdir: Option<std::path::PathBuf>,
}

#[derive(Debug, Clone)]
pub struct InvokeResult {
    pub output: String,
    pub exit_code: i32,
    pub duration_ms: u64,
}

/// The seam between the engine and the outside world: an agent invocation
/// is an opaque subprocess taking a prompt on stdin and producing text on
/// stdout. Tests substitute a deterministic stub.
#[async_trait]
pub trait AgentInvoker: Send + Sync {
    async fn invoke(&self, request: InvokeRequest) -> anyhow::Result<InvokeResult>;

    /// Streaming variant; lines are forwarded to `sink` as they arrive.
    async fn stream(
        &self,
        request: InvokeRequest,
        sink: mpsc::Sender<String>,
    ) -> anyhow::Result<InvokeResult> {
        let result = self.invoke(request).await?;
        for line in result.output.lines() {
            if sink.send(line.to_string()).await.is_err() {
                break;
            }
        }
        Ok(result)
    }
}

/// Real invoker: spawns the configured CLI with piped stdio. Workers are
/// killed when the orchestrator's cancellation token fires.
pub struct SubprocessInvoker {
    cancel: CancellationToken,
}

impl SubprocessInvoker {
    pub fn new(cancel: CancellationToken) -> Self {
        Self { cancel }
    }

    fn command(request: &InvokeRequest) -> Command {
        let mut cmd = Command::new(&request.cli);
        if let Some(model) = &request.model {
            cmd.arg("--model").arg(model);
        }
        if let Some(workdir) = &request.workdir {
            cmd.current_dir(workdir);
        }
        cmd.stdin(std::process::Stdio::piped())
            .stdout(std::process::Stdio::piped())
            .stderr(std::process::Stdio::piped())
            .kill_on_drop(true);
        cmd
    }
}

#[async_trait]
impl AgentInvoker for SubprocessInvoker {
    async fn invoke(&self, request: InvokeRequest) -> anyhow::Result<InvokeResult> {
        let started = Instant::now();
        let mut child = Self::command(&request)
            .spawn()
            .map_err(|err| HiveError::PromptInvocationFailed(err.to_string()))?;

        let mut stdin = child
            .stdin
            .take()
            .ok_or_else(|| HiveError::PromptInvocationFailed("stdin unavailable".to_string()))?;
        stdin.write_all(request.prompt.as_bytes()).await?;
        drop(stdin);

        let waited = child.wait_with_output();
        tokio::select! {
            output = waited => {
                let output = output
                    .map_err(|err| HiveError::PromptInvocationFailed(err.to_string()))?;
                let mut text = String::from_utf8_lossy(&output.stdout).to_string();
                if !output.stderr.is_empty() {
                    text.push_str(&String::from_utf8_lossy(&output.stderr));
                }
                Ok(InvokeResult {
                    output: text,
                    exit_code: output.status.code().unwrap_or(-1),
                    duration_ms: started.elapsed().as_millis() as u64,
                })
            }
            _ = self.cancel.cancelled() => {
                // kill_on_drop reaps the child
                Err(HiveError::PromptInvocationFailed("canceled".to_string()).into())
            }
        }
    }

    async fn stream(
        &self,
        request: InvokeRequest,
        sink: mpsc::Sender<String>,
    ) -> anyhow::Result<InvokeResult> {
        let started = Instant::now();
        let mut child = Self::command(&request)
            .spawn()
            .map_err(|err| HiveError::PromptInvocationFailed(err.to_string()))?;

        let mut stdin = child
            .stdin
            .take()
            .ok_or_else(|| HiveError::PromptInvocationFailed("stdin unavailable".to_string()))?;
        stdin.write_all(request.prompt.as_bytes()).await?;
        drop(stdin);

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| HiveError::PromptInvocationFailed("stdout unavailable".to_string()))?;
        let mut lines = BufReader::new(stdout).lines();
        let mut collected = String::new();

        loop {
            tokio::select! {
                line = lines.next_line() => {
                    match line? {
                        Some(line) => {
                            collected.push_str(&line);
                            collected.push('\n');
                            let _ = sink.send(line).await;
                        }
                        None => break,
                    }
                }
                _ = self.cancel.cancelled() => {
                    let _ = child.kill().await;
                    return Err(HiveError::PromptInvocationFailed("canceled".to_string()).into());
                }
            }
        }

        let status = child.wait().await?;
        Ok(InvokeResult {
            output: collected,
            exit_code: status.code().unwrap_or(-1),
            duration_ms: started.elapsed().as_millis() as u64,
        })
    }
}

/// Deterministic invoker for tests: returns canned outputs in order and
/// records every prompt it receives.
#[derive(Default)]
pub struct StubInvoker {
    responses: Mutex<VecDeque<InvokeResult>>,
    prompts: Mutex<Vec<String>>,
}

impl StubInvoker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_output(&self, output: impl Into<String>) {
        self.responses.lock().expect("stub lock").push_back(InvokeResult {
            output: output.into(),
            exit_code: 0,
            duration_ms: 1,
        });
    }

    pub fn push_result(&self, result: InvokeResult) {
        self.responses.lock().expect("stub lock").push_back(result);
    }

    pub fn prompts(&self) -> Vec<String> {
        self.prompts.lock().expect("stub lock").clone()
    }
}

#[async_trait]
impl AgentInvoker for StubInvoker {
    async fn invoke(&self, request: InvokeRequest) -> anyhow::Result<InvokeResult> {
        self.prompts.lock().expect("stub lock").push(request.prompt);
        Ok(self
            .responses
            .lock()
            .expect("stub lock")
            .pop_front()
            .unwrap_or(InvokeResult {
                output: String::new(),
                exit_code: 1,
                duration_ms: 0,
            }))
    }
}
