//! Fan-out over a group of caches

use crate::entry::{Cache, RestoreOutcome};
use crate::{Error, Result};
use async_trait::async_trait;
use futures::future::join_all;

/// Treats several caches as one.
///
/// Children run concurrently and every child runs to completion regardless
/// of what its siblings do. Failures are logged per child; the first fatal
/// error is returned once all children have finished.
pub struct CompositeCache {
    name: String,
    caches: Vec<Box<dyn Cache>>,
}

impl CompositeCache {
    /// Group `caches` under `name`
    #[must_use]
    pub fn new(name: impl Into<String>, caches: Vec<Box<dyn Cache>>) -> Self {
        Self {
            name: name.into(),
            caches,
        }
    }

    /// Number of children
    #[must_use]
    pub fn len(&self) -> usize {
        self.caches.len()
    }

    /// Whether there are no children
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.caches.is_empty()
    }

    fn settle<'a>(
        &self,
        operation: &str,
        results: impl IntoIterator<Item = (&'a str, Result<()>)>,
    ) -> Result<()> {
        let mut fatal: Option<Error> = None;
        for (child, result) in results {
            let Err(e) = result else { continue };
            if e.is_fatal() {
                tracing::error!(cache = %self.name, child, "{operation} failed: {e}");
                fatal.get_or_insert(e);
            } else {
                tracing::warn!(cache = %self.name, child, "{operation} failed: {e}");
            }
        }
        fatal.map_or(Ok(()), Err)
    }
}

#[async_trait]
impl Cache for CompositeCache {
    fn name(&self) -> &str {
        &self.name
    }

    async fn restore(&self) -> Result<RestoreOutcome> {
        let results = join_all(self.caches.iter().map(|cache| async move {
            let result = cache.restore().await;
            if let Ok(outcome) = &result {
                tracing::debug!(child = cache.name(), %outcome, "Child restore finished");
            }
            (cache.name(), result.map(|_| ()))
        }))
        .await;
        self.settle("restore", results)?;
        Ok(RestoreOutcome::Unknown)
    }

    async fn save(&self) -> Result<()> {
        let results = join_all(
            self.caches
                .iter()
                .map(|cache| async move { (cache.name(), cache.save().await) }),
        )
        .await;
        self.settle("save", results)
    }
}
