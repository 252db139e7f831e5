//! In-memory table of saga execution contexts.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use common::SagaId;
use tokio::sync::RwLock;

use crate::context::SagaExecutionContext;

/// Shared, concurrency-safe map from saga ID to execution context.
///
/// Cloning yields another handle to the same table. Contexts are copied out
/// on read so no lock is held while callers inspect them.
#[derive(Clone, Default)]
pub struct ContextTable {
    contexts: Arc<RwLock<HashMap<SagaId, SagaExecutionContext>>>,
}

impl ContextTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn insert(&self, context: SagaExecutionContext) {
        self.contexts.write().await.insert(context.saga_id, context);
    }

    pub async fn get(&self, saga_id: SagaId) -> Option<SagaExecutionContext> {
        self.contexts.read().await.get(&saga_id).cloned()
    }

    pub async fn all(&self) -> Vec<SagaExecutionContext> {
        self.contexts.read().await.values().cloned().collect()
    }

    pub async fn len(&self) -> usize {
        self.contexts.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.contexts.read().await.is_empty()
    }

    /// Applies `f` to the context under the write lock.
    ///
    /// Returns `None` when the saga is not in the table.
    pub async fn update<R>(
        &self,
        saga_id: SagaId,
        f: impl FnOnce(&mut SagaExecutionContext) -> R,
    ) -> Option<R> {
        self.contexts.write().await.get_mut(&saga_id).map(f)
    }

    /// Applies `f` to every context under a single write lock.
    pub async fn update_all<R>(
        &self,
        mut f: impl FnMut(&mut SagaExecutionContext) -> Option<R>,
    ) -> Vec<R> {
        self.contexts
            .write()
            .await
            .values_mut()
            .filter_map(|ctx| f(ctx))
            .collect()
    }

    /// Removes terminal contexts that ended before `cutoff`.
    pub async fn evict_terminal_before(&self, cutoff: DateTime<Utc>) -> usize {
        let mut contexts = self.contexts.write().await;
        let before = contexts.len();
        contexts.retain(|_, ctx| {
            !(ctx.is_terminal() && ctx.end_time.is_some_and(|end| end <= cutoff))
        });
        before - contexts.len()
    }

    pub async fn clear(&self) {
        self.contexts.write().await.clear();
    }
}
