//! Shell-command backend: one child process per invocation.
//!
//! The request body is written to stdin as JSON; stdout is the response.

use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tokio::sync::watch;

use devtunnel_core::error::{Result, TunnelError};
use devtunnel_core::invocation::{InvocationRequest, InvocationResponse};
use devtunnel_core::protocol::ErrorInfo;

use crate::config::InvokerSection;
use crate::invoke::{Invoker, InvokerError};

const EXIT_ERROR: &str = "Runtime.ExitError";
const TIMEOUT_ERROR: &str = "TIMEOUT";
const SPAWN_ERROR: &str = "SPAWN";
const HOOK_ERROR: &str = "HOOK_FAILED";
const DESTROYED_ERROR: &str = "DESTROYED";

pub struct CommandInvoker {
    command: String,
    init_command: Option<String>,
    reload_command: Option<String>,
    working_dir: Option<PathBuf>,
    /// Bumped on destroy; running invocations watch it and kill their child.
    teardown: watch::Sender<u64>,
}

impl CommandInvoker {
    pub fn new(command: impl Into<String>) -> Self {
        let (teardown, _) = watch::channel(0);
        Self {
            command: command.into(),
            init_command: None,
            reload_command: None,
            working_dir: None,
            teardown,
        }
    }

    pub fn from_config(cfg: &InvokerSection) -> Result<Self> {
        let command = match cfg.command.as_deref().map(str::trim) {
            Some(c) if !c.is_empty() => c.to_string(),
            _ => {
                return Err(TunnelError::Config(
                    "invoker.command is required for the command backend".into(),
                ))
            }
        };
        Ok(Self {
            init_command: cfg.init_command.clone(),
            reload_command: cfg.reload_command.clone(),
            working_dir: cfg.working_dir.clone(),
            ..Self::new(command)
        })
    }

    fn shell(&self, script: &str) -> Command {
        let mut cmd = Command::new("sh");
        cmd.arg("-c").arg(script).kill_on_drop(true);
        if let Some(dir) = &self.working_dir {
            cmd.current_dir(dir);
        }
        cmd
    }

    async fn run_hook(&self, stage: &str, script: Option<&str>) -> std::result::Result<(), InvokerError> {
        let Some(script) = script else {
            return Ok(());
        };
        tracing::info!(stage, command = script, "running backend hook");
        let out = self
            .shell(script)
            .stdin(Stdio::null())
            .output()
            .await
            .map_err(|e| InvokerError::new(SPAWN_ERROR, format!("{stage} command: {e}")))?;
        if out.status.success() {
            return Ok(());
        }
        let stderr = String::from_utf8_lossy(&out.stderr);
        let mut err = InvokerError::new(
            HOOK_ERROR,
            format!("{stage} command exited with {}: {}", out.status, stderr.trim()),
        );
        if let Some(code) = out.status.code() {
            err = err.with_code(json!(code));
        }
        Err(err)
    }
}

fn lambda_env(req: &InvocationRequest) -> [(&'static str, String); 7] {
    [
        ("AWS_LAMBDA_FUNCTION_NAME", req.function_name.clone()),
        ("AWS_LAMBDA_FUNCTION_VERSION", req.function_version.clone()),
        ("AWS_LAMBDA_FUNCTION_MEMORY_SIZE", req.memory_size.to_string()),
        ("AWS_LAMBDA_LOG_GROUP_NAME", req.log_group_name.clone()),
        ("AWS_LAMBDA_LOG_STREAM_NAME", req.log_stream_name.clone()),
        ("AWS_REGION", req.region.clone()),
        ("AWS_LAMBDA_REQUEST_ID", req.request_id.clone()),
    ]
}

fn parse_stdout(stdout: &[u8]) -> Value {
    let text = String::from_utf8_lossy(stdout);
    let text = text.trim();
    if text.is_empty() {
        return Value::Null;
    }
    serde_json::from_str(text).unwrap_or_else(|_| Value::String(text.to_string()))
}

fn exit_error(status: std::process::ExitStatus, stderr: &[u8]) -> ErrorInfo {
    let stderr = String::from_utf8_lossy(stderr);
    let lines: Vec<String> = stderr
        .lines()
        .map(str::trim_end)
        .filter(|l| !l.is_empty())
        .map(String::from)
        .collect();
    let message = lines
        .last()
        .cloned()
        .unwrap_or_else(|| format!("command exited with {status}"));
    ErrorInfo {
        code: status.code().map(|c| json!(c)),
        stack_trace: (!lines.is_empty()).then_some(lines),
        ..ErrorInfo::new(EXIT_ERROR, message)
    }
}

#[async_trait]
impl Invoker for CommandInvoker {
    fn name(&self) -> &str {
        "command"
    }

    async fn init(&self) -> std::result::Result<(), InvokerError> {
        self.run_hook("init", self.init_command.as_deref()).await
    }

    async fn invoke(
        &self,
        req: &InvocationRequest,
    ) -> std::result::Result<InvocationResponse, InvokerError> {
        let body = serde_json::to_vec(&req.request)
            .map_err(|e| InvokerError::new(SPAWN_ERROR, format!("request body: {e}")))?;

        let mut teardown = self.teardown.subscribe();
        let mut child = self
            .shell(&self.command)
            .envs(&req.env_vars)
            .envs(lambda_env(req))
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| InvokerError::new(SPAWN_ERROR, format!("{}: {e}", self.command)))?;

        tracing::debug!(
            function = %req.function_name,
            request_id = %req.request_id,
            pid = ?child.id(),
            "invocation process started"
        );

        if let Some(mut stdin) = child.stdin.take() {
            tokio::spawn(async move {
                // the child may exit without reading its input
                let _ = stdin.write_all(&body).await;
            });
        }

        let limit = async {
            if req.timeout > 0 {
                tokio::time::sleep(Duration::from_secs(req.timeout)).await;
            } else {
                std::future::pending::<()>().await;
            }
        };

        // Dropping `child` (via its output future) kills the process.
        tokio::select! {
            out = child.wait_with_output() => {
                let out = out.map_err(|e| InvokerError::new(SPAWN_ERROR, e.to_string()))?;
                if out.status.success() {
                    Ok(InvocationResponse::ok(parse_stdout(&out.stdout)))
                } else {
                    Ok(InvocationResponse::failed(exit_error(out.status, &out.stderr)))
                }
            }
            _ = limit => {
                tracing::warn!(function = %req.function_name, timeout_s = req.timeout, "invocation timed out");
                Ok(InvocationResponse::failed(ErrorInfo::new(
                    TIMEOUT_ERROR,
                    format!("task timed out after {} seconds", req.timeout),
                )))
            }
            _ = teardown.changed() => {
                Err(InvokerError::new(DESTROYED_ERROR, "runtime destroyed during invocation"))
            }
        }
    }

    async fn reload(&self) -> std::result::Result<(), InvokerError> {
        self.run_hook("reload", self.reload_command.as_deref()).await
    }

    async fn destroy(&self) -> std::result::Result<(), InvokerError> {
        self.teardown.send_modify(|generation| *generation += 1);
        Ok(())
    }
}

#[cfg(all(test, unix))]
mod tests {
    #![allow(clippy::unwrap_used)]

    use std::sync::Arc;

    use super::*;

    fn request(function: &str, timeout: u64) -> InvocationRequest {
        InvocationRequest {
            function_name: function.into(),
            request_id: "r-1".into(),
            timeout,
            request: json!({"name": "dev"}),
            ..InvocationRequest::default()
        }
    }

    #[tokio::test]
    async fn stdout_json_is_the_response() {
        let inv = CommandInvoker::new(r#"cat >/dev/null; echo '{"ok":true}'"#);
        let resp = inv.invoke(&request("hello", 5)).await.unwrap();
        assert_eq!(resp.response, Some(json!({"ok": true})));
        assert!(!resp.is_error());
    }

    #[tokio::test]
    async fn body_env_and_identity_reach_the_process() {
        let inv = CommandInvoker::new(r#"printf '%s|%s|' "$AWS_LAMBDA_FUNCTION_NAME" "$GREETING"; cat"#);
        let mut req = request("hello", 5);
        req.env_vars.insert("GREETING".into(), "hi".into());

        let resp = inv.invoke(&req).await.unwrap();
        assert_eq!(resp.response, Some(json!(r#"hello|hi|{"name":"dev"}"#)));
    }

    #[tokio::test]
    async fn nonzero_exit_is_a_failed_invocation() {
        let inv = CommandInvoker::new("echo 'bad input' >&2; exit 3");
        let resp = inv.invoke(&request("hello", 5)).await.unwrap();
        let err = resp.error.unwrap();
        assert_eq!(err.kind, EXIT_ERROR);
        assert_eq!(err.message, "bad input");
        assert_eq!(err.code, Some(json!(3)));
    }

    #[tokio::test]
    async fn request_timeout_bounds_the_run() {
        let inv = CommandInvoker::new("sleep 5");
        let resp = inv.invoke(&request("slow", 1)).await.unwrap();
        assert_eq!(resp.error_kind(), Some(TIMEOUT_ERROR));
    }

    #[tokio::test]
    async fn destroy_stops_running_invocations() {
        let inv = Arc::new(CommandInvoker::new("sleep 5"));
        let running = {
            let inv = Arc::clone(&inv);
            tokio::spawn(async move { inv.invoke(&request("slow", 0)).await })
        };
        tokio::time::sleep(Duration::from_millis(100)).await;
        inv.destroy().await.unwrap();

        let err = running.await.unwrap().unwrap_err();
        assert_eq!(err.kind, DESTROYED_ERROR);
    }

    #[tokio::test]
    async fn failing_hook_reports_exit_code() {
        let cfg = InvokerSection {
            command: Some("true".into()),
            init_command: Some("exit 2".into()),
            ..InvokerSection::default()
        };
        let inv = CommandInvoker::from_config(&cfg).unwrap();
        let err = inv.init().await.unwrap_err();
        assert_eq!(err.kind, HOOK_ERROR);
        assert_eq!(err.code, Some(json!(2)));
        inv.reload().await.unwrap();
    }
}
