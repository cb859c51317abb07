//! The event that started the job, narrowed to what cache keys need

use crate::{Error, Result};
use serde::Deserialize;
use std::path::Path;

const BRANCH_REF_PREFIX: &str = "refs/heads/";

/// Event that triggered the job
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Trigger {
    /// `pull_request` event
    PullRequest {
        /// Pull request number
        number: u64,
        /// Ref of the branch the pull request targets
        base_ref: String,
        /// Default branch of the repository
        default_branch: String,
        /// Commit the job builds
        head_sha: String,
    },
    /// `push` event on a branch
    BranchPush {
        /// Pushed ref, e.g. `refs/heads/main`
        ref_name: String,
        /// Default branch of the repository
        default_branch: String,
        /// Commit the job builds
        head_sha: String,
        /// Tree of the head commit when the payload carries it
        tree_id: Option<String>,
    },
    /// Any other event
    Other {
        /// Event name
        name: String,
    },
}

#[derive(Debug, Deserialize)]
struct RepositoryPayload {
    default_branch: String,
}

#[derive(Debug, Deserialize)]
struct CommitPayload {
    tree_id: String,
}

#[derive(Debug, Deserialize)]
struct PushPayload {
    #[serde(rename = "ref")]
    git_ref: String,
    #[serde(default)]
    after: String,
    head_commit: Option<CommitPayload>,
    repository: RepositoryPayload,
}

#[derive(Debug, Deserialize)]
struct CommitRefPayload {
    #[serde(rename = "ref")]
    git_ref: String,
    #[serde(default)]
    sha: String,
}

#[derive(Debug, Deserialize)]
struct PullRequestDetails {
    number: u64,
    base: CommitRefPayload,
    head: CommitRefPayload,
}

#[derive(Debug, Deserialize)]
struct PullRequestPayload {
    pull_request: PullRequestDetails,
    repository: RepositoryPayload,
    after: Option<String>,
}

fn branch_name(git_ref: &str) -> &str {
    git_ref.strip_prefix(BRANCH_REF_PREFIX).unwrap_or(git_ref)
}

impl Trigger {
    /// Parse the event `name` with JSON `payload`.
    ///
    /// Only `push` and `pull_request` payloads are inspected; every other
    /// event becomes [`Trigger::Other`].
    pub fn from_event(name: &str, payload: &str) -> Result<Self> {
        match name {
            "pull_request" => {
                let event: PullRequestPayload = serde_json::from_str(payload)
                    .map_err(|e| Error::event(format!("invalid pull_request payload: {e}")))?;
                let head_sha = event
                    .after
                    .filter(|sha| !sha.is_empty())
                    .unwrap_or(event.pull_request.head.sha);
                Ok(Self::PullRequest {
                    number: event.pull_request.number,
                    base_ref: event.pull_request.base.git_ref,
                    default_branch: event.repository.default_branch,
                    head_sha,
                })
            }
            "push" => {
                let event: PushPayload = serde_json::from_str(payload)
                    .map_err(|e| Error::event(format!("invalid push payload: {e}")))?;
                Ok(Self::BranchPush {
                    ref_name: event.git_ref,
                    default_branch: event.repository.default_branch,
                    head_sha: event.after,
                    tree_id: event.head_commit.map(|c| c.tree_id),
                })
            }
            other => Ok(Self::Other {
                name: other.to_string(),
            }),
        }
    }

    /// Read the payload from `path` and parse it
    pub fn from_event_file(name: &str, path: &Path) -> Result<Self> {
        let payload =
            std::fs::read_to_string(path).map_err(|e| Error::io(e, path, "read"))?;
        Self::from_event(name, &payload)
    }

    /// Event name
    #[must_use]
    pub fn name(&self) -> &str {
        match self {
            Self::PullRequest { .. } => "pull_request",
            Self::BranchPush { .. } => "push",
            Self::Other { name } => name,
        }
    }

    /// Fail for triggers no cache key can be derived from
    pub fn ensure_supported(&self) -> Result<()> {
        match self {
            Self::Other { name } => Err(Error::unknown_trigger(name)),
            _ => Ok(()),
        }
    }

    /// Branch or pull request identity used in cache keys: `PR-<n>` or the branch name
    pub fn cache_identity(&self) -> Result<String> {
        match self {
            Self::PullRequest { number, .. } => Ok(format!("PR-{number}")),
            Self::BranchPush { ref_name, .. } => Ok(branch_name(ref_name).to_string()),
            Self::Other { name } => Err(Error::unknown_trigger(name)),
        }
    }

    /// Identities to fall back to, most specific first
    pub fn restore_identities(&self) -> Result<Vec<String>> {
        let identity = self.cache_identity()?;
        match self {
            Self::PullRequest {
                base_ref,
                default_branch,
                ..
            } => Ok(vec![
                identity,
                branch_name(base_ref).to_string(),
                default_branch.clone(),
            ]),
            Self::BranchPush { default_branch, .. } => Ok(vec![identity, default_branch.clone()]),
            Self::Other { name } => Err(Error::unknown_trigger(name)),
        }
    }

    /// Commit the job builds, if known
    #[must_use]
    pub fn head_sha(&self) -> Option<&str> {
        match self {
            Self::PullRequest { head_sha, .. } | Self::BranchPush { head_sha, .. } => {
                Some(head_sha.as_str()).filter(|s| !s.is_empty())
            }
            Self::Other { .. } => None,
        }
    }
}
