//! External plan runner invocation
//!
//! Plans are executed by an external binary (curator) that reads an action
//! document and a client config from disk. The runner materializes both files
//! under a per-task working directory, streams the child's output into the
//! log, and enforces a hard wall-clock timeout.

use crate::config::RunnerConfig;
use crate::error::{AppError, Result};
use crate::models::PlanResult;
use async_trait::async_trait;
use std::collections::VecDeque;
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::Command;
use tracing::{debug, info, warn};
use uuid::Uuid;

#[async_trait]
pub trait PlanRunner: Send + Sync {
    /// Execute an encoded action plan. A non-zero exit is reported through
    /// the returned `PlanResult`, not as an error; errors cover failures to
    /// launch, timeouts, and I/O problems.
    async fn run(&self, task_id: Uuid, plan_yaml: &str, config_yaml: &str) -> Result<PlanResult>;
}

/// Runs plans by spawning the configured binary as a subprocess
pub struct ProcessPlanRunner {
    config: RunnerConfig,
}

impl ProcessPlanRunner {
    pub fn new(config: RunnerConfig) -> Arc<Self> {
        Arc::new(Self { config })
    }

    fn task_dir(&self, task_id: Uuid) -> PathBuf {
        self.config.work_dir.join(task_id.to_string())
    }

    async fn write_inputs(
        &self,
        task_id: Uuid,
        plan_yaml: &str,
        config_yaml: &str,
    ) -> Result<(PathBuf, PathBuf)> {
        let dir = self.task_dir(task_id);
        tokio::fs::create_dir_all(&dir).await?;

        let plan_path = dir.join("action.yml");
        let config_path = dir.join("client.yml");
        tokio::fs::write(&plan_path, plan_yaml).await?;
        tokio::fs::write(&config_path, config_yaml).await?;

        Ok((plan_path, config_path))
    }

    async fn cleanup(&self, task_id: Uuid) {
        let dir = self.task_dir(task_id);
        if let Err(e) = tokio::fs::remove_dir_all(&dir).await {
            if e.kind() != std::io::ErrorKind::NotFound {
                warn!(task_id = %task_id, error = %e, "Failed to clean up runner work dir");
            }
        }
    }
}

#[async_trait]
impl PlanRunner for ProcessPlanRunner {
    async fn run(&self, task_id: Uuid, plan_yaml: &str, config_yaml: &str) -> Result<PlanResult> {
        let (plan_path, config_path) = self.write_inputs(task_id, plan_yaml, config_yaml).await?;
        let timeout = Duration::from_secs(self.config.timeout_secs);
        let started = Instant::now();

        let mut child = Command::new(&self.config.binary)
            .arg("--config")
            .arg(&config_path)
            .arg(&plan_path)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| {
                AppError::Runner(format!(
                    "Failed to launch {}: {}",
                    self.config.binary.display(),
                    e
                ))
            })?;

        info!(task_id = %task_id, binary = %self.config.binary.display(), "Launched plan runner");

        let stdout = child.stdout.take();
        let stderr = child.stderr.take();
        let tail_limit = self.config.log_tail_lines;

        // Drain both pipes concurrently so the child never blocks on a full
        // pipe buffer, keeping only the tail for failure reporting.
        let stdout_task = tokio::spawn(collect_tail(stdout, tail_limit, false, task_id));
        let stderr_task = tokio::spawn(collect_tail(stderr, tail_limit, true, task_id));

        let status = match tokio::time::timeout(timeout, child.wait()).await {
            Ok(wait_result) => wait_result?,
            Err(_) => {
                warn!(task_id = %task_id, timeout_secs = timeout.as_secs(), "Plan runner timed out, killing");
                let _ = child.kill().await;
                stdout_task.abort();
                stderr_task.abort();
                self.cleanup(task_id).await;
                return Err(AppError::Timeout(format!(
                    "Plan runner exceeded {}s",
                    timeout.as_secs()
                )));
            }
        };

        let mut log_tail = stdout_task
            .await
            .map_err(|e| AppError::Runner(format!("Log collection failed: {}", e)))?;
        let stderr_tail = stderr_task
            .await
            .map_err(|e| AppError::Runner(format!("Log collection failed: {}", e)))?;
        log_tail.extend(stderr_tail);
        truncate_to_tail(&mut log_tail, tail_limit);

        self.cleanup(task_id).await;

        let exit_code = status.code().unwrap_or(-1);
        let result = PlanResult {
            exit_code,
            duration: started.elapsed(),
            log_tail,
        };

        if result.success() {
            info!(task_id = %task_id, duration_ms = result.duration.as_millis() as u64, "Plan runner completed");
        } else {
            warn!(task_id = %task_id, exit_code, "Plan runner exited non-zero");
        }

        Ok(result)
    }
}

async fn collect_tail<R>(
    reader: Option<R>,
    limit: usize,
    is_stderr: bool,
    task_id: Uuid,
) -> Vec<String>
where
    R: tokio::io::AsyncRead + Unpin + Send,
{
    let Some(reader) = reader else {
        return Vec::new();
    };

    let mut tail: VecDeque<String> = VecDeque::with_capacity(limit.min(256));
    let mut lines = BufReader::new(reader).lines();

    while let Ok(Some(line)) = lines.next_line().await {
        if is_stderr {
            debug!(task_id = %task_id, stream = "stderr", "{}", line);
        } else {
            debug!(task_id = %task_id, stream = "stdout", "{}", line);
        }
        if limit > 0 {
            if tail.len() == limit {
                tail.pop_front();
            }
            tail.push_back(line);
        }
    }

    tail.into_iter().collect()
}

fn truncate_to_tail(lines: &mut Vec<String>, limit: usize) {
    if limit > 0 && lines.len() > limit {
        let excess = lines.len() - limit;
        lines.drain(..excess);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_config(binary: &str, work_dir: &str, timeout_secs: u64) -> RunnerConfig {
        RunnerConfig {
            binary: binary.into(),
            work_dir: work_dir.into(),
            timeout_secs,
            log_tail_lines: 10,
            log_level: "info".to_string(),
        }
    }

    #[tokio::test]
    async fn test_successful_run() {
        let dir = tempfile::tempdir().unwrap();
        let runner = ProcessPlanRunner::new(test_config(
            "true",
            dir.path().to_str().unwrap(),
            30,
        ));

        let result = runner
            .run(Uuid::new_v4(), "actions: {}", "client: {}")
            .await
            .unwrap();

        assert_eq!(result.exit_code, 0);
        assert!(result.success());
    }

    #[tokio::test]
    async fn test_nonzero_exit_is_reported_not_errored() {
        let dir = tempfile::tempdir().unwrap();
        let runner = ProcessPlanRunner::new(test_config(
            "false",
            dir.path().to_str().unwrap(),
            30,
        ));

        let result = runner
            .run(Uuid::new_v4(), "actions: {}", "client: {}")
            .await
            .unwrap();

        assert_ne!(result.exit_code, 0);
        assert!(!result.success());
    }

    #[tokio::test]
    async fn test_missing_binary_is_runner_error() {
        let dir = tempfile::tempdir().unwrap();
        let runner = ProcessPlanRunner::new(test_config(
            "/nonexistent/definitely-not-a-binary",
            dir.path().to_str().unwrap(),
            30,
        ));

        let err = runner
            .run(Uuid::new_v4(), "actions: {}", "client: {}")
            .await
            .unwrap_err();

        assert!(matches!(err, AppError::Runner(_)));
    }

    #[tokio::test]
    async fn test_timeout_kills_child() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().unwrap();
        let script = dir.path().join("slow-runner.sh");
        std::fs::write(&script, "#!/bin/sh\nsleep 30\n").unwrap();
        std::fs::set_permissions(&script, std::fs::Permissions::from_mode(0o755)).unwrap();

        let runner = ProcessPlanRunner::new(test_config(
            script.to_str().unwrap(),
            dir.path().to_str().unwrap(),
            1,
        ));

        let started = Instant::now();
        let err = runner
            .run(Uuid::new_v4(), "actions: {}", "client: {}")
            .await
            .unwrap_err();

        assert!(matches!(err, AppError::Timeout(_)));
        assert!(started.elapsed() < Duration::from_secs(10));
    }

    #[tokio::test]
    async fn test_log_tail_keeps_last_lines() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().unwrap();
        let script = dir.path().join("chatty-runner.sh");
        std::fs::write(
            &script,
            "#!/bin/sh\nfor i in $(seq 1 25); do echo \"line $i\"; done\nexit 2\n",
        )
        .unwrap();
        std::fs::set_permissions(&script, std::fs::Permissions::from_mode(0o755)).unwrap();

        let runner = ProcessPlanRunner::new(test_config(
            script.to_str().unwrap(),
            dir.path().to_str().unwrap(),
            30,
        ));

        let result = runner
            .run(Uuid::new_v4(), "actions: {}", "client: {}")
            .await
            .unwrap();

        assert_eq!(result.exit_code, 2);
        assert_eq!(result.log_tail.len(), 10);
        assert_eq!(result.log_tail.last().unwrap(), "line 25");
    }

    #[tokio::test]
    async fn test_work_dir_cleaned_up() {
        let dir = tempfile::tempdir().unwrap();
        let runner = ProcessPlanRunner::new(test_config(
            "true",
            dir.path().to_str().unwrap(),
            30,
        ));

        let task_id = Uuid::new_v4();
        runner.run(task_id, "a", "b").await.unwrap();

        assert!(!dir.path().join(task_id.to_string()).exists());
    }
}
