//! External command execution and tree id resolution

use crate::trigger::Trigger;
use crate::{Error, Result};
use async_trait::async_trait;
use std::path::PathBuf;

/// Captured result of a finished command
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecOutput {
    /// Process exit code (-1 when killed by a signal)
    pub exit_code: i32,
    /// Captured standard output
    pub stdout: String,
}

/// Runs external commands
#[async_trait]
pub trait CommandRunner: Send + Sync {
    /// Run `command` with `args` and capture its output
    async fn exec(&self, command: &str, args: &[&str]) -> Result<ExecOutput>;
}

/// [`CommandRunner`] spawning real processes
#[derive(Debug, Clone, Default)]
pub struct ProcessRunner {
    cwd: Option<PathBuf>,
}

impl ProcessRunner {
    /// Runner using the current directory
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Runner executing commands in `cwd`
    #[must_use]
    pub fn in_dir(cwd: impl Into<PathBuf>) -> Self {
        Self {
            cwd: Some(cwd.into()),
        }
    }
}

#[async_trait]
impl CommandRunner for ProcessRunner {
    async fn exec(&self, command: &str, args: &[&str]) -> Result<ExecOutput> {
        let mut cmd = tokio::process::Command::new(command);
        cmd.args(args);
        if let Some(cwd) = &self.cwd {
            cmd.current_dir(cwd);
        }
        tracing::debug!(command, ?args, "Running command");
        let output = cmd
            .output()
            .await
            .map_err(|e| Error::io_no_path(e, format!("spawn {command}")))?;
        Ok(ExecOutput {
            exit_code: output.status.code().unwrap_or(-1),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
        })
    }
}

/// Tree id of the commit the job builds.
///
/// Push payloads carry it directly; otherwise it is looked up with `git show`.
pub async fn resolve_tree_id(trigger: &Trigger, runner: &dyn CommandRunner) -> Result<String> {
    if let Trigger::BranchPush {
        tree_id: Some(tree_id),
        ..
    } = trigger
        && !tree_id.is_empty()
    {
        return Ok(tree_id.clone());
    }

    let commit = trigger
        .head_sha()
        .ok_or_else(|| Error::event(format!("{} event does not name a commit", trigger.name())))?;
    let args = ["show", "--quiet", "--format=%T", commit];
    let output = runner.exec("git", &args).await?;
    if output.exit_code != 0 {
        return Err(Error::Command {
            command: format!("git {}", args.join(" ")),
            exit_code: output.exit_code,
        });
    }

    let tree_id = output.stdout.trim().to_string();
    if tree_id.is_empty() {
        return Err(Error::event(format!("commit {commit} has no tree id")));
    }
    tracing::debug!(commit, tree_id = %tree_id, "Resolved tree id");
    Ok(tree_id)
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    struct ScriptedRunner {
        output: ExecOutput,
        calls: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl CommandRunner for ScriptedRunner {
        async fn exec(&self, command: &str, args: &[&str]) -> Result<ExecOutput> {
            self.calls
                .lock()
                .unwrap()
                .push(format!("{command} {}", args.join(" ")));
            Ok(self.output.clone())
        }
    }

    fn runner(exit_code: i32, stdout: &str) -> ScriptedRunner {
        ScriptedRunner {
            output: ExecOutput {
                exit_code,
                stdout: stdout.to_string(),
            },
            calls: Mutex::new(Vec::new()),
        }
    }

    fn pull_request() -> Trigger {
        Trigger::PullRequest {
            number: 1,
            base_ref: "main".into(),
            default_branch: "main".into(),
            head_sha: "deadbeef".into(),
        }
    }

    #[tokio::test]
    async fn test_push_payload_tree_id_skips_git() {
        let trigger = Trigger::BranchPush {
            ref_name: "refs/heads/main".into(),
            default_branch: "main".into(),
            head_sha: "abc".into(),
            tree_id: Some("tree123".into()),
        };
        let runner = runner(0, "unused");
        assert_eq!(resolve_tree_id(&trigger, &runner).await.unwrap(), "tree123");
        assert!(runner.calls.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_tree_id_from_git_show() {
        let runner = runner(0, "cafebabe\n");
        let tree = resolve_tree_id(&pull_request(), &runner).await.unwrap();
        assert_eq!(tree, "cafebabe");
        assert_eq!(
            runner.calls.lock().unwrap().as_slice(),
            ["git show --quiet --format=%T deadbeef"]
        );
    }

    #[tokio::test]
    async fn test_git_failure_is_reported() {
        let err = resolve_tree_id(&pull_request(), &runner(128, ""))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Command { exit_code: 128, .. }));
    }

    #[tokio::test]
    async fn test_missing_commit() {
        let trigger = Trigger::Other {
            name: "workflow_dispatch".into(),
        };
        assert!(resolve_tree_id(&trigger, &runner(0, "x")).await.is_err());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_process_runner_captures_output_and_exit_code() {
        let output = ProcessRunner::new()
            .exec("sh", &["-c", "echo tree; exit 3"])
            .await
            .unwrap();
        assert_eq!(output.exit_code, 3);
        assert_eq!(output.stdout, "tree\n");

        let tmp = tempfile::TempDir::new().unwrap();
        let output = ProcessRunner::in_dir(tmp.path())
            .exec("pwd", &[])
            .await
            .unwrap();
        assert_eq!(
            std::fs::canonicalize(output.stdout.trim()).unwrap(),
            std::fs::canonicalize(tmp.path()).unwrap()
        );
    }
}
