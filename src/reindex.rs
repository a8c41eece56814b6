use std::sync::Arc;

use crate::backend::Backend;
use crate::cache::Cache;
use crate::error::{Result, ValidationError};

/// Rebuilds the cache by walking the backend: lists every UniqueID, then
/// re-indexes each with the bounded parallelism `Cache::reindex` already
/// provides. Collected validation failures are non-fatal.
pub async fn reindex(backend: Arc<dyn Backend>, cache: &Cache) -> Result<Vec<ValidationError>> {
    cache.reindex(backend).await
}
