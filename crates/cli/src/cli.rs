use crate::tracing::{LogLevel, TracingConfig, TracingFormat};
use clap::{Parser, ValueEnum};
use shardcache_cache::{ActionParams, DEFAULT_BUILD_CACHE_ROOT, DEFAULT_TOOL_VERSION_FILE, Phase};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "shardcache")]
#[command(about = "Restore and save a sharded build cache around a CI job")]
#[command(
    long_about = "Run once before the build to restore caches and once after it to save \
                  them. Without --phase the second invocation of a job saves."
)]
#[command(version)]
pub struct Cli {
    #[arg(
        long,
        env = "SHARDCACHE_PHASE",
        help = "Phase to run",
        default_value = "auto",
        value_enum
    )]
    pub phase: PhaseArg,

    #[arg(long, env = "GITHUB_JOB", help = "Job identifier, part of every cache key")]
    pub job_id: String,

    #[arg(long, env = "GITHUB_EVENT_NAME", help = "Name of the event that started the job")]
    pub event_name: String,

    #[arg(long, env = "GITHUB_EVENT_PATH", help = "Path to the JSON event payload")]
    pub event_path: PathBuf,

    #[arg(
        long,
        env = "GITHUB_WORKSPACE",
        help = "Workspace root (defaults to the current directory)"
    )]
    pub workspace: Option<PathBuf>,

    #[arg(
        long,
        env = "SHARDCACHE_BUILD_CACHE_ROOT",
        help = "Build cache directory to partition",
        default_value = DEFAULT_BUILD_CACHE_ROOT
    )]
    pub build_cache_root: String,

    #[arg(
        long,
        env = "SHARDCACHE_TOOL_VERSION_FILE",
        help = "File whose contents identify the build tool version",
        default_value = DEFAULT_TOOL_VERSION_FILE
    )]
    pub tool_version_file: String,

    #[arg(long, help = "Do not restore or save the local build cache")]
    pub no_local_build_cache: bool,

    #[arg(
        long,
        env = "SHARDCACHE_STORE_DIR",
        help = "Archive directory (defaults to the user cache directory)"
    )]
    pub store_dir: Option<PathBuf>,

    #[arg(
        long,
        env = "SHARDCACHE_STATE_DIR",
        help = "Keep job state in this directory instead of GITHUB_STATE"
    )]
    pub state_dir: Option<PathBuf>,

    #[arg(
        short = 'l',
        long,
        help = "Set logging level",
        default_value = "info",
        value_enum
    )]
    pub level: LogLevel,

    #[arg(
        long,
        env = "SHARDCACHE_LOG",
        help = "Log filter directives (e.g. 'shardcache_cache=trace'), overriding --level and RUST_LOG"
    )]
    pub log_filter: Option<String>,

    #[arg(long, help = "Log output format", default_value = "compact", value_enum)]
    pub log_format: TracingFormat,

    #[arg(long, help = "Output logs in JSON format")]
    pub json: bool,
}

/// Phase selection on the command line
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum PhaseArg {
    /// Restore on the first invocation of the job, save on the next
    Auto,
    /// Restore caches
    Restore,
    /// Save caches
    Save,
}

impl From<PhaseArg> for Phase {
    fn from(phase: PhaseArg) -> Self {
        match phase {
            PhaseArg::Auto => Self::Auto,
            PhaseArg::Restore => Self::Restore,
            PhaseArg::Save => Self::Save,
        }
    }
}

impl Cli {
    pub fn tracing_config(&self) -> TracingConfig {
        let format = if self.json {
            TracingFormat::Json
        } else {
            self.log_format
        };
        TracingConfig {
            format,
            level: self.level.into(),
            enable_file_location: format == TracingFormat::Dev,
            filter: self.log_filter.clone(),
        }
    }

    pub fn params(&self) -> ActionParams {
        let mut params = ActionParams::new(self.job_id.trim());
        params.local_build_cache = !self.no_local_build_cache;
        params.build_cache_root.clone_from(&self.build_cache_root);
        params.tool_version_file.clone_from(&self.tool_version_file);
        params
    }
}

pub fn parse() -> Cli {
    Cli::parse()
}
