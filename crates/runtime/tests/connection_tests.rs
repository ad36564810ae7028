use std::sync::Arc;
use std::time::{Duration, Instant};

use pretty_assertions::assert_eq;
use runtime::testing::FakeProvider;
use runtime::{
    CollisionPolicy, ConnectionOptions, ConnectionState, Error, FailurePolicy, ProviderEntry,
    RetryPolicy, ToolConnectionManager,
};
use serde_json::json;

fn options() -> ConnectionOptions {
    ConnectionOptions {
        retry: RetryPolicy::none(),
        close_timeout: Duration::from_millis(500),
        ..ConnectionOptions::default()
    }
}

fn entry(label: &str, provider: &Arc<FakeProvider>) -> ProviderEntry {
    ProviderEntry::new(label, provider.clone())
}

#[tokio::test]
async fn catalog_has_every_providers_tools() {
    let fs = Arc::new(FakeProvider::new(["read_file", "write_file"]));
    let web = Arc::new(FakeProvider::new(["search"]));
    let math = Arc::new(FakeProvider::new(["add", "multiply", "divide"]));
    let manager = ToolConnectionManager::new(
        vec![entry("fs", &fs), entry("web", &web), entry("math", &math)],
        options(),
    );

    let scope = manager.connect().await.unwrap();
    let catalog = scope.catalog().clone();
    scope.close().await;

    assert_eq!(catalog.len(), 6);
    assert_eq!(
        catalog.names(),
        ["read_file", "write_file", "search", "add", "multiply", "divide"]
    );
    for fake in [&fs, &web, &math] {
        assert_eq!(fake.connect_count(), 1);
        assert_eq!(fake.close_count(), 1);
    }
}

#[tokio::test]
async fn zero_providers_yield_empty_catalog() {
    let manager = ToolConnectionManager::new(Vec::new(), options());
    let scope = manager.connect().await.unwrap();
    assert!(scope.catalog().is_empty());
    scope.close().await;
}

#[tokio::test]
async fn failed_provider_aborts_and_closes_the_ready_ones_once() {
    let first = Arc::new(FakeProvider::new(["a"]));
    let second = Arc::new(FakeProvider::new(["b"]));
    let broken = Arc::new(FakeProvider::new(["c"]).failing_connect("handshake refused"));
    let last = Arc::new(FakeProvider::new(["d"]));
    let manager = ToolConnectionManager::new(
        vec![
            entry("first", &first),
            entry("second", &second),
            entry("broken", &broken),
            entry("last", &last),
        ],
        options(),
    );

    let err = manager.connect().await.err().unwrap();

    match err {
        Error::Connection { provider, message } => {
            assert_eq!(provider, "broken");
            assert!(message.contains("handshake refused"));
        }
        other => panic!("unexpected error: {other}"),
    }
    for ready in [&first, &second, &last] {
        assert_eq!(ready.close_count(), 1);
    }
    assert_eq!(broken.close_count(), 0);
}

#[tokio::test]
async fn abort_does_not_wait_for_slow_providers() {
    let broken = Arc::new(FakeProvider::new(["a"]).failing_connect("refused"));
    let slow = Arc::new(FakeProvider::new(["b"]).with_connect_delay(Duration::from_secs(3)));
    let manager = ToolConnectionManager::new(
        vec![entry("broken", &broken), entry("slow", &slow)],
        options(),
    );

    let started = Instant::now();
    let err = manager.connect().await.err().unwrap();
    let elapsed = started.elapsed();

    assert!(
        matches!(&err, Error::Connection { provider, .. } if provider == "broken"),
        "unexpected error: {err}"
    );
    assert!(elapsed < Duration::from_secs(1), "abort took {elapsed:?}");
    assert_eq!(slow.close_count(), 1);
    assert_eq!(broken.close_count(), 0);
}

#[tokio::test]
async fn degrade_policy_keeps_the_providers_that_connected() {
    let good = Arc::new(FakeProvider::new(["search"]));
    let broken = Arc::new(FakeProvider::new(["fetch"]).failing_connect("no such binary"));
    let manager = ToolConnectionManager::new(
        vec![entry("good", &good), entry("broken", &broken)],
        ConnectionOptions {
            failure_policy: FailurePolicy::Degrade,
            ..options()
        },
    );

    let scope = manager.connect().await.unwrap();

    assert_eq!(scope.catalog().names(), ["search"]);
    assert_eq!(scope.failures().len(), 1);
    assert_eq!(scope.failures()[0].provider, "broken");
    assert_eq!(
        scope.connections(),
        [
            ("good", ConnectionState::Ready),
            ("broken", ConnectionState::Failed)
        ]
    );

    scope.close().await;
    assert_eq!(good.close_count(), 1);
    assert_eq!(broken.close_count(), 0);
}

#[tokio::test]
async fn collision_is_rejected_by_default_and_everything_is_closed() {
    let a = Arc::new(FakeProvider::new(["search"]));
    let b = Arc::new(FakeProvider::new(["search"]));
    let manager = ToolConnectionManager::new(vec![entry("a", &a), entry("b", &b)], options());

    let err = manager.connect().await.err().unwrap();

    assert!(matches!(err, Error::ToolNameCollision { .. }));
    assert_eq!(a.close_count(), 1);
    assert_eq!(b.close_count(), 1);
}

#[tokio::test]
async fn namespace_policy_resolves_collisions_deterministically() {
    let a = Arc::new(FakeProvider::new(["search", "open"]));
    let b = Arc::new(FakeProvider::new(["search"]));
    let manager = ToolConnectionManager::new(
        vec![entry("a", &a), entry("b", &b)],
        ConnectionOptions {
            collision_policy: CollisionPolicy::Namespace,
            ..options()
        },
    );

    let scope = manager.connect().await.unwrap();
    let catalog = scope.catalog().clone();

    assert_eq!(catalog.len(), 3);
    assert_eq!(catalog.names(), ["search", "open", "b__search"]);

    catalog.invoke("b__search", json!({"q": "x"})).await.unwrap();
    assert_eq!(b.invocations(), [("search".to_string(), json!({"q": "x"}))]);
    assert!(a.invocations().is_empty());

    scope.close().await;
}

#[tokio::test]
async fn providers_connect_in_parallel() {
    let delay = Duration::from_millis(300);
    let fakes: Vec<_> = (0..4)
        .map(|i| Arc::new(FakeProvider::new([format!("tool{i}")]).with_connect_delay(delay)))
        .collect();
    let entries = fakes
        .iter()
        .enumerate()
        .map(|(i, fake)| entry(&format!("p{i}"), fake))
        .collect();
    let manager = ToolConnectionManager::new(entries, options());

    let started = Instant::now();
    let scope = manager.connect().await.unwrap();
    let elapsed = started.elapsed();
    scope.close().await;

    assert!(elapsed < delay * 3, "connect took {elapsed:?}");
}

#[tokio::test]
async fn connect_timeout_closes_everything_it_opened() {
    let fast = Arc::new(FakeProvider::new(["quick"]));
    let slow = Arc::new(FakeProvider::new(["sluggish"]).with_connect_delay(Duration::from_secs(5)));
    let manager = ToolConnectionManager::new(
        vec![entry("fast", &fast), entry("slow", &slow)],
        ConnectionOptions {
            connect_timeout: Duration::from_millis(100),
            ..options()
        },
    );

    let err = manager.connect().await.err().unwrap();

    assert!(matches!(err, Error::ConnectTimeout(_)));
    assert_eq!(fast.close_count(), 1);
    assert_eq!(slow.close_count(), 1);
}

#[tokio::test]
async fn scoped_closes_on_success_and_on_error() {
    let fake = Arc::new(FakeProvider::new(["search"]));
    let manager = ToolConnectionManager::new(vec![entry("web", &fake)], options());

    let count = manager
        .scoped(|catalog| async move { Ok::<_, Error>(catalog.len()) })
        .await
        .unwrap();
    assert_eq!(count, 1);
    assert_eq!(fake.close_count(), 1);

    let failed: Result<(), Error> = manager
        .scoped(|_catalog| async { Err(Error::InvalidState("body failed".into())) })
        .await;
    assert!(failed.is_err());
    assert_eq!(fake.close_count(), 2);
}

#[tokio::test]
async fn dropped_scope_is_closed_in_the_background() {
    let fake = Arc::new(FakeProvider::new(["search"]));
    let manager = ToolConnectionManager::new(vec![entry("web", &fake)], options());

    let scope = manager.connect().await.unwrap();
    drop(scope);

    for _ in 0..50 {
        if fake.close_count() == 1 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert_eq!(fake.close_count(), 1);
}

#[tokio::test]
async fn cancelled_connect_still_closes_providers() {
    let fast = Arc::new(FakeProvider::new(["quick"]));
    let slow = Arc::new(FakeProvider::new(["sluggish"]).with_connect_delay(Duration::from_secs(5)));
    let manager = ToolConnectionManager::new(
        vec![entry("fast", &fast), entry("slow", &slow)],
        options(),
    );

    let cancelled = tokio::time::timeout(Duration::from_millis(100), manager.connect()).await;
    assert!(cancelled.is_err());

    for _ in 0..50 {
        if fast.close_count() == 1 && slow.close_count() == 1 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert_eq!(fast.close_count(), 1);
    assert_eq!(slow.close_count(), 1);
}
