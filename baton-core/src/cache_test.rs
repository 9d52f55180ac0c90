#[cfg(test)]
mod tests {
    use futures::future::{self, Ready};
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    use crate::cache::{create_key, Cache, CacheBackend, CacheConfig, InMemoryCacheBackend};
    use crate::error::CacheError;

    /// Loader returning how many times it has been called so far.
    fn counting(calls: &Arc<AtomicUsize>) -> impl FnOnce() -> Ready<Result<usize, String>> + Send + 'static {
        let calls = calls.clone();
        move || future::ready(Ok(calls.fetch_add(1, Ordering::SeqCst) + 1))
    }

    fn cache() -> Cache<InMemoryCacheBackend> {
        Cache::new(Arc::new(InMemoryCacheBackend::new()))
    }

    #[test]
    fn test_create_key_joins_parts() {
        assert_eq!(create_key(&[json!("user"), json!(42)]), "user__42");
        assert_eq!(
            create_key(&[json!("search"), json!({"q": "rust"}), json!(true)]),
            r#"search__{"q":"rust"}__true"#
        );
        assert_eq!(create_key(&[]), "");
    }

    #[tokio::test(start_paused = true)]
    async fn test_entries_go_stale_then_expire() {
        let cache = cache();
        cache.set("user__1", &json!({"name": "ada"})).await.unwrap();

        let fresh = cache.get::<serde_json::Value>("user__1").await.unwrap().unwrap();
        assert!(!fresh.is_stale());
        assert_eq!(fresh.fresh_for, Duration::from_secs(60));
        assert_eq!(fresh.value["name"], "ada");

        tokio::time::advance(Duration::from_secs(61)).await;
        let stale = cache.get::<serde_json::Value>("user__1").await.unwrap().unwrap();
        assert!(stale.is_stale());

        tokio::time::advance(Duration::from_secs(60)).await;
        assert!(cache.get::<serde_json::Value>("user__1").await.unwrap().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_wrap_loads_once_while_fresh() {
        let cache = cache();
        let calls = Arc::new(AtomicUsize::new(0));
        let key = [json!("report"), json!(7)];

        assert_eq!(cache.wrap(&key, counting(&calls)).await.unwrap(), 1);
        tokio::time::advance(Duration::from_secs(30)).await;
        assert_eq!(cache.wrap(&key, counting(&calls)).await.unwrap(), 1);

        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_wrap_serves_stale_and_refreshes() {
        let cache = cache();
        let calls = Arc::new(AtomicUsize::new(0));
        let key = [json!("report"), json!(7)];

        cache.wrap(&key, counting(&calls)).await.unwrap();
        tokio::time::advance(Duration::from_secs(90)).await;

        // Stale hit: old value now, new value loaded behind the caller's back.
        assert_eq!(cache.wrap(&key, counting(&calls)).await.unwrap(), 1);
        tokio::time::sleep(Duration::from_millis(1)).await;

        let refreshed = cache.get::<usize>("report__7").await.unwrap().unwrap();
        assert_eq!(refreshed.value, 2);
        assert!(!refreshed.is_stale());
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_wrap_reloads_after_expiry() {
        let cache = Cache::with_config(
            Arc::new(InMemoryCacheBackend::new()),
            CacheConfig {
                ttl: Duration::from_secs(5),
                refresh_buffer: Duration::from_secs(5),
            },
        );
        let calls = Arc::new(AtomicUsize::new(0));
        let key = [json!("short")];

        cache.wrap(&key, counting(&calls)).await.unwrap();
        tokio::time::advance(Duration::from_secs(11)).await;

        assert_eq!(cache.wrap(&key, counting(&calls)).await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_wrap_surfaces_loader_error_on_miss() {
        let cache = cache();

        let err = cache
            .wrap(&[json!("broken")], || async { Err::<usize, _>("upstream 503".to_string()) })
            .await
            .unwrap_err();

        assert!(matches!(err, CacheError::Loader(ref msg) if msg == "upstream 503"));
        assert!(cache.get::<usize>("broken").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_flush_matches_every_search_term() {
        let backend = Arc::new(InMemoryCacheBackend::new());
        let cache = Cache::new(backend.clone());
        for key in ["user__1__profile", "user__2__profile", "user__1__orders", "order__1"] {
            cache.set(key, &1).await.unwrap();
        }

        assert_eq!(cache.flush("user", &["profile"]).await.unwrap(), 2);
        assert_eq!(cache.flush("user", &["nothing"]).await.unwrap(), 0);

        let mut left = backend.keys("").await.unwrap();
        left.sort();
        assert_eq!(left, vec!["order__1", "user__1__orders"]);

        assert_eq!(cache.flush("", &[]).await.unwrap(), 2);
    }
}
