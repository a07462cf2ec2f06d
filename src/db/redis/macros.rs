/// Read-through caching for an async computation.
///
/// Looks `$key` up in `$cache`. On a hit the cached value is the result. On a
/// miss `$block` is awaited and its value returned. The value is queued for
/// caching with the cache's default TTL, and the write is dropped if the key
/// was invalidated after the lookup. When Redis cannot be read the value is
/// computed and not cached. Errors from
/// `$block` propagate with `?`, so the macro must be used inside a function
/// returning `AppResult`.
///
/// # Example
/// ```rust,ignore
/// let tree: CategoryTree = cached!(cache, CacheKey::CategoryTree, async {
///     CategoryTree::build(&store.list_categories().await?)
/// });
/// ```
#[macro_export]
macro_rules! cached {
    ($cache:expr, $key:expr, $block:expr) => {{
        let key = $key;
        let (hit, generation) = match $cache.get_from_cache(&key).await {
            Ok(read) => (read.value, Some(read.generation)),
            Err(e) => {
                tracing::warn!(error = %e, key = %key, "Cache read failed, computing value");
                (None, None)
            }
        };
        match hit {
            Some(hit) => {
                tracing::debug!(key = %key, "Cache hit");
                hit
            }
            None => {
                let value = $block.await?;
                if let Some(generation) = generation {
                    $cache.fill(&key, &value, generation);
                }
                value
            }
        }
    }};
}
