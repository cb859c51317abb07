//! `shardcache` binary: restores caches before a CI build and saves them after it

mod cli;
mod errors;
mod tracing;

use crate::cli::Cli;
use crate::errors::CliError;
use ::tracing::Instrument;
use shardcache_cache::{
    ActionsState, CacheAction, CacheContext, ContentHasher, DirState, FsGlobber, JobState,
    LocalArchiveStore, PathRoots, Phase, ProcessRunner, Trigger,
};
use std::path::PathBuf;
use std::sync::Arc;

#[tokio::main]
async fn main() -> miette::Result<()> {
    let cli = cli::parse();
    crate::tracing::init_tracing(cli.tracing_config())?;

    let span = ::tracing::info_span!(
        "shardcache",
        correlation_id = %crate::tracing::correlation_id(),
        job = %cli.job_id,
    );
    run(&cli).instrument(span).await?;
    Ok(())
}

async fn run(cli: &Cli) -> Result<Phase, CliError> {
    let action = build_action(cli)?;
    let phase = action.run(cli.phase.into()).await?;
    ::tracing::info!(%phase, "Cache phase complete");
    Ok(phase)
}

/// Wire the collaborators for one invocation
fn build_action(cli: &Cli) -> Result<CacheAction, CliError> {
    if cli.job_id.trim().is_empty() {
        return Err(CliError::configuration(
            "job id is empty; pass --job-id or set GITHUB_JOB",
        ));
    }

    let workspace = match &cli.workspace {
        Some(dir) => dir.clone(),
        None => std::env::current_dir()
            .map_err(|e| CliError::configuration(format!("cannot read current directory: {e}")))?,
    };
    if !workspace.is_dir() {
        return Err(CliError::configuration(format!(
            "workspace {} is not a directory",
            workspace.display()
        )));
    }

    let trigger = Trigger::from_event_file(&cli.event_name, &cli.event_path)?;
    let state = open_state(cli.state_dir.as_ref())?;

    let home = dirs::home_dir();
    let roots = PathRoots::new(&workspace, home.clone());
    let globber = Arc::new(FsGlobber::new(&workspace, home));
    let store_dir = match &cli.store_dir {
        Some(dir) => dir.clone(),
        None => LocalArchiveStore::default_root()?,
    };
    ::tracing::debug!(
        workspace = %workspace.display(),
        store = %store_dir.display(),
        trigger = trigger.name(),
        "Configured cache action"
    );

    let store = Arc::new(LocalArchiveStore::new(
        store_dir,
        globber.clone(),
        roots.clone(),
    ));
    let ctx = CacheContext::new(store, Arc::new(ContentHasher::new(globber, roots)), state);

    Ok(CacheAction::new(
        trigger,
        cli.params(),
        ctx,
        Arc::new(ProcessRunner::in_dir(workspace)),
    ))
}

fn open_state(state_dir: Option<&PathBuf>) -> Result<Arc<dyn JobState>, CliError> {
    Ok(match state_dir {
        Some(dir) => Arc::new(DirState::open(dir)?),
        None => Arc::new(ActionsState::from_env()?),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;
    use std::fs;
    use tempfile::TempDir;

    const PUSH_EVENT: &str = r#"{
        "ref": "refs/heads/main",
        "after": "c0ffee",
        "head_commit": { "tree_id": "t1" },
        "repository": { "default_branch": "main" }
    }"#;

    struct Job {
        dir: TempDir,
    }

    impl Job {
        fn new() -> Self {
            let dir = TempDir::new().unwrap();
            fs::create_dir_all(dir.path().join("ws/gradle/wrapper")).unwrap();
            fs::write(
                dir.path().join("ws/gradle/wrapper/gradle-wrapper.properties"),
                "distributionUrl=8.5",
            )
            .unwrap();
            fs::write(dir.path().join("event.json"), PUSH_EVENT).unwrap();
            Self { dir }
        }

        fn cli(&self, job_id: &str, extra: &[&str]) -> Cli {
            let path = |rel: &str| self.dir.path().join(rel).display().to_string();
            let mut args = vec![
                "shardcache".to_string(),
                "--job-id".into(),
                job_id.into(),
                "--event-name".into(),
                "push".into(),
                "--event-path".into(),
                path("event.json"),
                "--workspace".into(),
                path("ws"),
                "--store-dir".into(),
                path("store"),
                "--state-dir".into(),
                path("state"),
                "--build-cache-root".into(),
                path("build-cache-*"),
            ];
            args.extend(extra.iter().map(|s| (*s).to_string()));
            Cli::try_parse_from(args).unwrap()
        }
    }

    #[tokio::test]
    async fn test_run_switches_phase_across_invocations() {
        let job = Job::new();
        let cli = job.cli("build", &[]);

        assert_eq!(run(&cli).await.unwrap(), Phase::Restore);
        assert_eq!(run(&cli).await.unwrap(), Phase::Save);

        let state = DirState::open(&job.dir.path().join("state")).unwrap();
        assert_eq!(state.get("POST").unwrap(), "Y");
    }

    #[test]
    fn test_blank_job_id_is_rejected() {
        let job = Job::new();
        let err = build_action(&job.cli("  ", &[])).err().unwrap();
        assert!(matches!(err, CliError::Configuration { .. }));
    }

    #[test]
    fn test_missing_event_payload_is_reported() {
        let job = Job::new();
        fs::remove_file(job.dir.path().join("event.json")).unwrap();
        let err = build_action(&job.cli("build", &[])).err().unwrap();
        assert!(matches!(err, CliError::Action(_)));
    }
}
